//! Receipt model

use chrono::{NaiveDate, NaiveTime};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::store::Record;

/// A unique identifier for a receipt, using UUID v7 (time-sortable)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReceiptId(Uuid);

impl ReceiptId {
    /// Create a new unique receipt ID using UUID v7
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Get the string representation of this ID
    #[must_use]
    pub fn as_str(&self) -> String {
        self.0.to_string()
    }
}

impl Default for ReceiptId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ReceiptId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ReceiptId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Expense category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    /// Food and dining
    Food,
    /// Shopping
    Shopping,
    /// Transportation
    Transport,
    /// Entertainment
    Entertainment,
    /// Daily necessities
    Daily,
    /// Medical
    Medical,
    /// Everything else
    #[default]
    Other,
}

impl Category {
    /// All categories in display order
    pub const ALL: [Self; 7] = [
        Self::Food,
        Self::Shopping,
        Self::Transport,
        Self::Entertainment,
        Self::Daily,
        Self::Medical,
        Self::Other,
    ];

    /// Stable wire/storage name
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Food => "food",
            Self::Shopping => "shopping",
            Self::Transport => "transport",
            Self::Entertainment => "entertainment",
            Self::Daily => "daily",
            Self::Medical => "medical",
            Self::Other => "other",
        }
    }
}

impl FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|category| category.as_str() == s.trim().to_lowercase())
            .ok_or_else(|| format!("unknown category: {s}"))
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One line item on a receipt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReceiptItem {
    /// Item name
    pub name: String,
    /// Quantity purchased
    pub quantity: u32,
    /// Unit price
    pub price: f64,
}

impl ReceiptItem {
    /// Line total (price x quantity)
    #[must_use]
    pub fn line_total(&self) -> f64 {
        self.price * f64::from(self.quantity)
    }
}

/// A receipt in the system
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Receipt {
    /// Unique identifier
    pub id: ReceiptId,
    /// Human-readable receipt number
    pub receipt_no: String,
    /// Purchase date
    pub date: NaiveDate,
    /// Purchase time
    pub time: NaiveTime,
    /// Store name
    pub store_name: String,
    /// Expense category
    pub category: Category,
    /// Line items
    pub items: Vec<ReceiptItem>,
    /// Receipt total
    pub total: f64,
    /// Payment method (free-form, e.g. "cash", "credit card")
    pub payment_method: String,
    /// Optional note
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    /// Creation timestamp (Unix ms)
    pub created_at: i64,
}

impl Receipt {
    /// Create a new receipt dated now. The total is always the sum of the
    /// line items, never caller-supplied.
    #[must_use]
    pub fn new(
        store_name: impl Into<String>,
        category: Category,
        items: Vec<ReceiptItem>,
        payment_method: impl Into<String>,
    ) -> Self {
        let id = ReceiptId::new();
        let now = chrono::Local::now();
        let total = items_total(&items);
        Self {
            receipt_no: receipt_no_for(&id),
            id,
            date: now.date_naive(),
            time: now.time(),
            store_name: store_name.into(),
            category,
            items,
            total,
            payment_method: payment_method.into(),
            note: None,
            created_at: now.timestamp_millis(),
        }
    }

    /// Recompute the total from the line items
    pub fn recompute_total(&mut self) {
        self.total = items_total(&self.items);
    }
}

impl Record for Receipt {
    const COLLECTION: &'static str = "receipts";

    fn id(&self) -> String {
        self.id.as_str()
    }

    fn sort_key(&self) -> i64 {
        self.created_at
    }
}

/// Sum of `price x quantity` over items
#[must_use]
pub fn items_total(items: &[ReceiptItem]) -> f64 {
    items.iter().map(ReceiptItem::line_total).sum()
}

fn receipt_no_for(id: &ReceiptId) -> String {
    let short = id
        .as_str()
        .chars()
        .filter(|c| *c != '-')
        .take(8)
        .collect::<String>();
    format!("NO.{}", short.to_uppercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(name: &str, quantity: u32, price: f64) -> ReceiptItem {
        ReceiptItem {
            name: name.to_string(),
            quantity,
            price,
        }
    }

    #[test]
    fn test_receipt_id_unique() {
        let id1 = ReceiptId::new();
        let id2 = ReceiptId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_receipt_id_parse() {
        let id = ReceiptId::new();
        let parsed: ReceiptId = id.as_str().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_new_receipt_totals_items() {
        let receipt = Receipt::new(
            "7-ELEVEN",
            Category::Food,
            vec![item("Onigiri", 2, 35.0), item("Milk", 1, 45.0)],
            "cash",
        );
        assert_eq!(receipt.total, 115.0);
        assert!(receipt.created_at > 0);
        assert!(receipt.receipt_no.starts_with("NO."));
    }

    #[test]
    fn test_recompute_total_overrides_stale_value() {
        let mut receipt = Receipt::new("Store", Category::Other, vec![item("A", 1, 10.0)], "cash");
        receipt.total = 999.0;
        receipt.recompute_total();
        assert_eq!(receipt.total, 10.0);
    }

    #[test]
    fn test_category_round_trip() {
        for category in Category::ALL {
            let parsed: Category = category.as_str().parse().unwrap();
            assert_eq!(parsed, category);
        }
        assert!("snacks".parse::<Category>().is_err());
    }

    #[test]
    fn test_category_serde_lowercase() {
        let json = serde_json::to_string(&Category::Transport).unwrap();
        assert_eq!(json, "\"transport\"");
    }
}
