//! Entity types and the tagged payload union

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::business::{
    Category, Customer, Expense, Product, PurchaseOrder, Sale, SaleItem, SalePayment, ShopSettings,
};
use crate::error::Error;

/// Kind of syncable record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    ShopSettings,
    Category,
    Product,
    Customer,
    Sale,
    SaleItem,
    SalePayment,
    Expense,
    PurchaseOrder,
}

impl EntityType {
    /// All entity types in upload order (referenced records before referrers)
    pub const ALL: [Self; 9] = [
        Self::ShopSettings,
        Self::Category,
        Self::Product,
        Self::Customer,
        Self::Sale,
        Self::SaleItem,
        Self::SalePayment,
        Self::Expense,
        Self::PurchaseOrder,
    ];

    /// Stable storage and wire name
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ShopSettings => "shop_settings",
            Self::Category => "category",
            Self::Product => "product",
            Self::Customer => "customer",
            Self::Sale => "sale",
            Self::SaleItem => "sale_item",
            Self::SalePayment => "sale_payment",
            Self::Expense => "expense",
            Self::PurchaseOrder => "purchase_order",
        }
    }
}

impl fmt::Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        Self::ALL
            .into_iter()
            .find(|ty| ty.as_str() == normalized)
            .ok_or_else(|| Error::InvalidInput(format!("unknown entity type: {s}")))
    }
}

/// Typed business value of a record, tagged with its entity type.
///
/// Serialized as `{"type": "<entity_type>", "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum EntityPayload {
    ShopSettings(ShopSettings),
    Category(Category),
    Product(Product),
    Customer(Customer),
    Sale(Sale),
    SaleItem(SaleItem),
    SalePayment(SalePayment),
    Expense(Expense),
    PurchaseOrder(PurchaseOrder),
}

impl EntityPayload {
    /// Entity type of this payload
    pub const fn entity_type(&self) -> EntityType {
        match self {
            Self::ShopSettings(_) => EntityType::ShopSettings,
            Self::Category(_) => EntityType::Category,
            Self::Product(_) => EntityType::Product,
            Self::Customer(_) => EntityType::Customer,
            Self::Sale(_) => EntityType::Sale,
            Self::SaleItem(_) => EntityType::SaleItem,
            Self::SalePayment(_) => EntityType::SalePayment,
            Self::Expense(_) => EntityType::Expense,
            Self::PurchaseOrder(_) => EntityType::PurchaseOrder,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::business::SaleStatus;
    use pretty_assertions::assert_eq;

    #[test]
    fn entity_type_parses_storage_names() {
        for ty in EntityType::ALL {
            assert_eq!(ty.as_str().parse::<EntityType>().unwrap(), ty);
        }
        assert_eq!(
            "Sale-Item".parse::<EntityType>().unwrap(),
            EntityType::SaleItem
        );
        assert!("invoice".parse::<EntityType>().is_err());
    }

    #[test]
    fn entity_type_serde_matches_as_str() {
        for ty in EntityType::ALL {
            let json = serde_json::to_string(&ty).unwrap();
            assert_eq!(json, format!("\"{}\"", ty.as_str()));
        }
    }

    #[test]
    fn payload_is_adjacently_tagged() {
        let payload = EntityPayload::Sale(Sale {
            receipt_number: "R-7".to_string(),
            customer_id: None,
            status: SaleStatus::Completed,
            subtotal_cents: 1000,
            tax_cents: 160,
            total_cents: 1160,
            completed_at: 42,
        });
        let value = serde_json::to_value(&payload).unwrap();
        assert_eq!(value["type"], "sale");
        assert_eq!(value["data"]["totalCents"], 1160);
        assert_eq!(payload.entity_type(), EntityType::Sale);
    }

    #[test]
    fn payload_rejects_unknown_type_tag() {
        let raw = r#"{"type": "invoice", "data": {}}"#;
        assert!(serde_json::from_str::<EntityPayload>(raw).is_err());
    }
}
