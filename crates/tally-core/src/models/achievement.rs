//! Achievement model

use serde::{Deserialize, Serialize};

use super::receipt::Category;
use crate::store::Record;

/// What an achievement measures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AchievementKind {
    /// Consecutive days with at least one receipt
    Streak,
    /// Lifetime receipt count
    Count,
    /// Spent less this month than last month
    Saving,
    /// Receipt count within one category
    Category,
}

/// Static achievement definition
#[derive(Debug, Clone, Copy)]
pub struct AchievementDef {
    pub id: &'static str,
    pub kind: AchievementKind,
    pub title: &'static str,
    pub description: &'static str,
    pub icon: &'static str,
    pub requirement: u32,
    pub category: Option<Category>,
}

/// Tracked achievement state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Achievement {
    pub id: String,
    pub kind: AchievementKind,
    pub title: String,
    pub description: String,
    pub icon: String,
    pub requirement: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
    /// Current progress toward `requirement`
    pub current: u32,
    pub unlocked: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unlocked_at: Option<i64>,
}

impl Achievement {
    /// Fresh tracked state for a definition
    #[must_use]
    pub fn from_def(def: &AchievementDef) -> Self {
        Self {
            id: def.id.to_string(),
            kind: def.kind,
            title: def.title.to_string(),
            description: def.description.to_string(),
            icon: def.icon.to_string(),
            requirement: def.requirement,
            category: def.category,
            current: 0,
            unlocked: false,
            unlocked_at: None,
        }
    }
}

impl Record for Achievement {
    const COLLECTION: &'static str = "achievements";

    fn id(&self) -> String {
        self.id.clone()
    }

    fn sort_key(&self) -> i64 {
        self.unlocked_at.unwrap_or(0)
    }
}

/// An unlock event surfaced to the user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AchievementNotification {
    pub achievement: Achievement,
    /// Unlock timestamp (Unix ms); doubles as the notification id
    pub timestamp: i64,
    pub read: bool,
}
