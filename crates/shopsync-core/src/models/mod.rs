//! Data models for shopsync

mod business;
mod entity;
mod ids;
mod record;

pub use business::{
    Category, Customer, Expense, PaymentMethod, Product, PurchaseOrder, PurchaseOrderStatus, Sale,
    SaleItem, SalePayment, SaleStatus, ShopSettings,
};
pub use entity::{EntityPayload, EntityType};
pub use ids::{EntityId, TenantId};
pub use record::{RecordKey, SyncMetadata, SyncRecord, SyncState};
