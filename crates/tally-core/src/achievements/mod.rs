//! Achievement definitions and progress evaluation.
//!
//! Achievements are static threshold rules evaluated client-side against
//! the current receipt collection. Once unlocked they stay unlocked, even
//! if the underlying progress later drops (e.g. receipts deleted).

use std::collections::{BTreeSet, HashMap};

use chrono::NaiveDate;

use crate::models::{
    Achievement, AchievementDef, AchievementKind, AchievementNotification, Category, Receipt,
};

/// Local storage key for unlock notifications (device-local, not synced)
pub const NOTIFICATIONS_KEY: &str = "achievement-notifications";

const fn def(
    id: &'static str,
    kind: AchievementKind,
    title: &'static str,
    description: &'static str,
    icon: &'static str,
    requirement: u32,
    category: Option<Category>,
) -> AchievementDef {
    AchievementDef {
        id,
        kind,
        title,
        description,
        icon,
        requirement,
        category,
    }
}

const fn cat(
    id: &'static str,
    title: &'static str,
    description: &'static str,
    icon: &'static str,
    requirement: u32,
    category: Category,
) -> AchievementDef {
    def(
        id,
        AchievementKind::Category,
        title,
        description,
        icon,
        requirement,
        Some(category),
    )
}

/// Every achievement the app knows about
pub const DEFINITIONS: &[AchievementDef] = &[
    // Streaks
    def(
        "streak-7",
        AchievementKind::Streak,
        "First Week",
        "Log receipts 7 days in a row",
        "🔥",
        7,
        None,
    ),
    def(
        "streak-30",
        AchievementKind::Streak,
        "Habit Formed",
        "Log receipts 30 days in a row",
        "🔥",
        30,
        None,
    ),
    def(
        "streak-100",
        AchievementKind::Streak,
        "Century Keeper",
        "Log receipts 100 days in a row",
        "🏆",
        100,
        None,
    ),
    // Lifetime counts
    def(
        "count-10",
        AchievementKind::Count,
        "Getting Started",
        "Record 10 receipts",
        "📝",
        10,
        None,
    ),
    def(
        "count-50",
        AchievementKind::Count,
        "Steady Logger",
        "Record 50 receipts",
        "📝",
        50,
        None,
    ),
    def(
        "count-100",
        AchievementKind::Count,
        "Receipt Collector",
        "Record 100 receipts",
        "📚",
        100,
        None,
    ),
    def(
        "count-500",
        AchievementKind::Count,
        "Ledger Legend",
        "Record 500 receipts",
        "👑",
        500,
        None,
    ),
    // Saving
    def(
        "saving-month",
        AchievementKind::Saving,
        "Smart Saver",
        "Spend less this month than last month",
        "💰",
        1,
        None,
    ),
    // Category specialists
    cat("category-food-10", "Foodie Initiate", "Record 10 food expenses", "🍔", 10, Category::Food),
    cat("category-food-30", "Regular Diner", "Record 30 food expenses", "🍜", 30, Category::Food),
    cat("category-food-50", "Gourmet", "Record 50 food expenses", "🍽️", 50, Category::Food),
    cat("category-shopping-10", "Window Shopper", "Record 10 shopping expenses", "🛍️", 10, Category::Shopping),
    cat("category-shopping-30", "Shopping Pro", "Record 30 shopping expenses", "🛒", 30, Category::Shopping),
    cat("category-shopping-50", "Retail Expert", "Record 50 shopping expenses", "💳", 50, Category::Shopping),
    cat("category-transport-10", "Commuter", "Record 10 transport expenses", "🚗", 10, Category::Transport),
    cat("category-transport-30", "Road Warrior", "Record 30 transport expenses", "🚌", 30, Category::Transport),
    cat("category-transport-50", "Globetrotter", "Record 50 transport expenses", "✈️", 50, Category::Transport),
    cat("category-entertainment-10", "Fun Seeker", "Record 10 entertainment expenses", "🎮", 10, Category::Entertainment),
    cat("category-entertainment-30", "Joy Collector", "Record 30 entertainment expenses", "🎬", 30, Category::Entertainment),
    cat("category-entertainment-50", "Entertainment Expert", "Record 50 entertainment expenses", "🎪", 50, Category::Entertainment),
    cat("category-daily-10", "Homemaker", "Record 10 daily-necessity expenses", "🧺", 10, Category::Daily),
    cat("category-daily-30", "Household Manager", "Record 30 daily-necessity expenses", "🏠", 30, Category::Daily),
    cat("category-daily-50", "Daily Life Expert", "Record 50 daily-necessity expenses", "✨", 50, Category::Daily),
    cat("category-medical-10", "Health Aware", "Record 10 medical expenses", "💊", 10, Category::Medical),
    cat("category-medical-30", "Wellness Keeper", "Record 30 medical expenses", "🏥", 30, Category::Medical),
    cat("category-medical-50", "Health Expert", "Record 50 medical expenses", "⚕️", 50, Category::Medical),
    cat("category-other-10", "Variety Logger", "Record 10 other expenses", "📦", 10, Category::Other),
    cat("category-other-30", "All-Rounder", "Record 30 other expenses", "🎁", 30, Category::Other),
    cat("category-other-50", "Record Expert", "Record 50 other expenses", "🌟", 50, Category::Other),
];

/// Spending totals for the running and previous month
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MonthlySpend {
    pub this_month: f64,
    pub last_month: f64,
}

/// Result of one evaluation pass
#[derive(Debug, Clone, Default)]
pub struct Evaluation {
    /// Full achievement list with refreshed progress
    pub achievements: Vec<Achievement>,
    /// Achievements that crossed their threshold in this pass
    pub newly_unlocked: Vec<AchievementNotification>,
}

/// Consecutive days with at least one receipt, ending today or yesterday.
/// A gap of more than one day before `today` breaks the streak to 0.
#[must_use]
pub fn streak_days(receipts: &[Receipt], today: NaiveDate) -> u32 {
    let dates: Vec<NaiveDate> = receipts
        .iter()
        .map(|receipt| receipt.date)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();
    let Some(latest) = dates.last() else {
        return 0;
    };
    if (today - *latest).num_days() > 1 {
        return 0;
    }

    let mut streak = 1u32;
    for window in dates.windows(2).rev() {
        if (window[1] - window[0]).num_days() == 1 {
            streak += 1;
        } else {
            break;
        }
    }
    streak
}

/// Total spend for the month of `today` and for the month before it
#[must_use]
pub fn monthly_spend(receipts: &[Receipt], today: NaiveDate) -> MonthlySpend {
    use chrono::Datelike;

    let this = (today.year(), today.month());
    let last = if today.month() == 1 {
        (today.year() - 1, 12)
    } else {
        (today.year(), today.month() - 1)
    };

    let mut spend = MonthlySpend::default();
    for receipt in receipts {
        let month = (receipt.date.year(), receipt.date.month());
        if month == this {
            spend.this_month += receipt.total;
        } else if month == last {
            spend.last_month += receipt.total;
        }
    }
    spend
}

/// Receipt count per category
#[must_use]
pub fn category_counts(receipts: &[Receipt]) -> HashMap<Category, u32> {
    let mut counts = HashMap::new();
    for receipt in receipts {
        *counts.entry(receipt.category).or_insert(0) += 1;
    }
    counts
}

/// Refresh progress for every achievement and detect new unlocks.
///
/// `current` carries previously persisted state; achievements it does not
/// contain are seeded from [`DEFINITIONS`]. Unlocked achievements never
/// re-lock.
#[must_use]
pub fn evaluate(
    receipts: &[Receipt],
    current: &[Achievement],
    today: NaiveDate,
    now_ms: i64,
) -> Evaluation {
    let streak = streak_days(receipts, today);
    let total_count = u32::try_from(receipts.len()).unwrap_or(u32::MAX);
    let spend = monthly_spend(receipts, today);
    let by_category = category_counts(receipts);
    let saving_achieved = spend.last_month > 0.0 && spend.this_month < spend.last_month;

    let mut evaluation = Evaluation::default();
    for definition in DEFINITIONS {
        let mut achievement = current
            .iter()
            .find(|existing| existing.id == definition.id)
            .cloned()
            .unwrap_or_else(|| Achievement::from_def(definition));

        achievement.current = match achievement.kind {
            AchievementKind::Streak => streak,
            AchievementKind::Count => total_count,
            AchievementKind::Saving => u32::from(saving_achieved),
            AchievementKind::Category => achievement
                .category
                .and_then(|category| by_category.get(&category).copied())
                .unwrap_or(0),
        };

        if achievement.current >= achievement.requirement && !achievement.unlocked {
            achievement.unlocked = true;
            achievement.unlocked_at = Some(now_ms);
            tracing::info!(id = %achievement.id, "Achievement unlocked");
            evaluation.newly_unlocked.push(AchievementNotification {
                achievement: achievement.clone(),
                timestamp: now_ms,
                read: false,
            });
        }

        evaluation.achievements.push(achievement);
    }
    evaluation
}

/// Number of unread unlock notifications
#[must_use]
pub fn unread_count(notifications: &[AchievementNotification]) -> usize {
    notifications
        .iter()
        .filter(|notification| !notification.read)
        .count()
}

/// Mark the notification with the given timestamp as read
pub fn mark_read(notifications: &mut [AchievementNotification], timestamp: i64) {
    for notification in notifications {
        if notification.timestamp == timestamp {
            notification.read = true;
        }
    }
}

/// Drop notifications that have been read
pub fn clear_read(notifications: &mut Vec<AchievementNotification>) {
    notifications.retain(|notification| !notification.read);
}
