//! E-invoice models (carrier-registered electronic invoices)

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::store::{Record, SettingsDocument};

/// Invoice carrier kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CarrierType {
    /// Mobile barcode carrier (e.g. `/ABC1234`)
    #[default]
    Phone,
    /// Natural person certificate
    Natural,
    /// Credit card carrier
    CreditCard,
}

/// Per-invoice sync status mirrored into the settings document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum InvoiceSyncStatus {
    #[default]
    Idle,
    Syncing,
    Success,
    Error,
}

/// Carrier configuration and sync bookkeeping (per-identity settings document)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvoiceSettings {
    pub carrier_type: CarrierType,
    /// Mobile barcode (`/ABC1234`) or certificate number
    pub carrier_number: String,
    pub verify_code: String,
    pub auto_sync: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_sync_at: Option<i64>,
    pub sync_status: InvoiceSyncStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sync_error: Option<String>,
}

impl Default for InvoiceSettings {
    fn default() -> Self {
        Self {
            carrier_type: CarrierType::Phone,
            carrier_number: String::new(),
            verify_code: String::new(),
            auto_sync: true,
            last_sync_at: None,
            sync_status: InvoiceSyncStatus::Idle,
            sync_error: None,
        }
    }
}

impl InvoiceSettings {
    /// Whether a carrier is fully configured
    #[must_use]
    pub fn is_configured(&self) -> bool {
        !self.carrier_number.trim().is_empty() && !self.verify_code.trim().is_empty()
    }
}

impl SettingsDocument for InvoiceSettings {
    const DOC: &'static str = "invoice-settings";
}

/// One line item on an e-invoice
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EInvoiceItem {
    pub description: String,
    pub quantity: u32,
    pub unit_price: f64,
    /// Line amount as reported by the carrier API
    pub amount: f64,
}

/// An electronic invoice fetched from the carrier API
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EInvoice {
    /// `invoiceNumber-invoiceDate`, stable across re-fetches
    pub id: String,
    /// e.g. `AB-12345678`
    pub invoice_number: String,
    pub invoice_date: NaiveDate,
    pub seller_name: String,
    /// Seller business administration number
    pub seller_ban: String,
    /// Invoice total as reported by the carrier API
    pub amount: f64,
    /// Line items; empty until the detail query has run
    pub items: Vec<EInvoiceItem>,
    pub carrier_type: CarrierType,
    pub carrier_number: String,
    /// Set once this invoice has been imported as a receipt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub imported_as_receipt_id: Option<String>,
    /// Fetch timestamp (Unix ms)
    pub created_at: i64,
}

impl Record for EInvoice {
    const COLLECTION: &'static str = "invoices";

    fn id(&self) -> String {
        self.id.clone()
    }

    fn sort_key(&self) -> i64 {
        self.created_at
    }
}

/// Parameters for a carrier invoice query
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvoiceQuery {
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub carrier_type: CarrierType,
    pub carrier_number: String,
    pub verify_code: String,
}
