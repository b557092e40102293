//! Data models for Tally

mod achievement;
mod invoice;
mod receipt;
mod settings;
mod subscription;

pub use achievement::{Achievement, AchievementDef, AchievementKind, AchievementNotification};
pub use invoice::{
    CarrierType, EInvoice, EInvoiceItem, InvoiceQuery, InvoiceSettings, InvoiceSyncStatus,
};
pub use receipt::{items_total, Category, Receipt, ReceiptId, ReceiptItem};
pub use settings::{AiProvider, AiSettings, StoreNameHistory};
pub use subscription::{BillingStatus, Plan, Subscription};
