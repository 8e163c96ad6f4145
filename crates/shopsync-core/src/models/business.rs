//! Business payloads carried by syncable records.
//!
//! Money is stored as integer minor units (cents). Timestamps are Unix ms.
//! Every payload rejects unknown fields so malformed server data fails at the
//! boundary instead of being silently dropped.

use serde::{Deserialize, Serialize};

use super::EntityId;

/// Product category
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Category {
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub is_deleted: bool,
}

/// Sellable product with stock level
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Product {
    pub name: String,
    #[serde(default)]
    pub sku: Option<String>,
    #[serde(default)]
    pub category_id: Option<EntityId>,
    pub price_cents: i64,
    pub cost_cents: i64,
    pub stock_quantity: i64,
    #[serde(default)]
    pub is_deleted: bool,
}

/// Customer account, optionally carrying store credit
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Customer {
    pub name: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub credit_balance_cents: i64,
    #[serde(default)]
    pub is_deleted: bool,
}

/// Lifecycle of a recorded sale
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SaleStatus {
    Completed,
    Voided,
    Refunded,
}

/// Completed checkout
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Sale {
    pub receipt_number: String,
    #[serde(default)]
    pub customer_id: Option<EntityId>,
    pub status: SaleStatus,
    pub subtotal_cents: i64,
    pub tax_cents: i64,
    pub total_cents: i64,
    pub completed_at: i64,
}

/// Line item of a sale
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SaleItem {
    pub sale_id: EntityId,
    pub product_id: EntityId,
    pub quantity: i64,
    pub unit_price_cents: i64,
    #[serde(default)]
    pub discount_cents: i64,
}

/// Tender used to settle a sale
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    Cash,
    Card,
    MobileMoney,
    Credit,
}

/// Payment applied to a sale
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SalePayment {
    pub sale_id: EntityId,
    pub method: PaymentMethod,
    pub amount_cents: i64,
    #[serde(default)]
    pub reference: Option<String>,
}

/// Operating expense
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Expense {
    pub description: String,
    pub category: String,
    pub amount_cents: i64,
    pub incurred_at: i64,
    #[serde(default)]
    pub is_deleted: bool,
}

/// Purchase order lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PurchaseOrderStatus {
    Draft,
    Ordered,
    Received,
    Cancelled,
}

/// Stock replenishment order placed with a supplier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PurchaseOrder {
    pub supplier_name: String,
    pub status: PurchaseOrderStatus,
    pub total_cents: i64,
    #[serde(default)]
    pub expected_at: Option<i64>,
    #[serde(default)]
    pub is_deleted: bool,
}

/// Centrally managed shop configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ShopSettings {
    pub shop_name: String,
    pub currency: String,
    pub allow_credit_sales: bool,
    pub low_stock_threshold: i64,
    /// Tax rate in basis points (1600 = 16%)
    pub tax_rate_bps: u32,
}

impl Default for ShopSettings {
    fn default() -> Self {
        Self {
            shop_name: String::new(),
            currency: "USD".to_string(),
            allow_credit_sales: false,
            low_stock_threshold: 5,
            tax_rate_bps: 0,
        }
    }
}
