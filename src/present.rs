//! Presentation snapshot.
//!
//! The core is purely reactive: it never schedules redraws itself. Any
//! timer-driven consumer pulls the current state through `snapshot_at`,
//! which resolves the cosmetic lookup tables (colors, conversions),
//! staleness, and both alert classes' visual state into plain rows for the
//! presentation adapter.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::subscription::{Subscription, SubscriptionId};

/// Converted value that suppresses a subscription's row entirely.
///
/// Originates from the conversion table; the presentation adapter must
/// honor it.
pub const DISABLED_SENTINEL: &str = "#DISABLED#";

/// One color rule: applies while the numeric value is below `up_to`.
///
/// The rules form an ordered table; the first rule whose bound exceeds the
/// value wins, and the last rule catches everything else (including
/// non-numeric values).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ColorRule {
    /// Exclusive upper bound; absent in a final catch-all rule.
    #[serde(default)]
    pub up_to: Option<f64>,

    /// Label cell color.
    #[serde(default)]
    pub label: Option<String>,

    /// Value cell color.
    #[serde(default)]
    pub value: Option<String>,

    /// Suffix cell color.
    #[serde(default)]
    pub suffix: Option<String>,
}

/// One conversion rule: rewrite a resolved value for display.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversionRule {
    /// Value to match, compared after trimming.
    pub from: String,

    /// Replacement display value.
    pub to: String,
}

/// A display-ready subscription row.
#[derive(Debug, Clone, PartialEq)]
pub struct PanelRow {
    /// Identity for routing dismiss actions back.
    pub id: SubscriptionId,
    /// Display label.
    pub label: String,
    /// Converted display value.
    pub value: String,
    /// Display suffix.
    pub suffix: String,
    /// The value's age exceeds the configured maximum.
    pub stale: bool,
    /// Selected color rule, if any.
    pub colors: Option<ColorRule>,
    /// Audible alarm is triggered and not dismissed.
    pub alarm_active: bool,
    /// Visual flash is triggered and not dismissed.
    pub flash_active: bool,
    /// Flash color override while flashing.
    pub flash_color: Option<String>,
}

/// Applies the conversion table to a subscription's resolved value.
///
/// Comparison trims both sides; the first matching rule wins.
#[must_use]
pub fn convert_value(sub: &Subscription) -> String {
    for rule in &sub.conversions {
        if sub.value.trim() == rule.from.trim() {
            return rule.to.clone();
        }
    }
    sub.value.clone()
}

/// Selects the color rule for a subscription's current value.
///
/// Walks the table in order and stops at the first rule whose `up_to`
/// bound exceeds the numeric value; exhausting the table (or a
/// non-numeric value) leaves the last rule selected.
#[must_use]
pub fn select_color(sub: &Subscription) -> Option<ColorRule> {
    if sub.colors.is_empty() {
        return None;
    }

    let numeric = sub.value.trim().parse::<f64>().ok();
    let mut selected = None;
    for rule in &sub.colors {
        selected = Some(rule);
        if let (Some(value), Some(up_to)) = (numeric, rule.up_to) {
            if value < up_to {
                break;
            }
        }
    }
    selected.cloned()
}

/// Whether the value's source update is older than the subscription allows.
///
/// Staleness only dims the display; it never feeds alert evaluation.
#[must_use]
pub fn is_too_old(sub: &Subscription, now: DateTime<Utc>) -> bool {
    sub.max_age.map_or(false, |age| sub.time + age < now)
}

/// Builds the display rows for the presentation adapter.
///
/// Hidden subscriptions are filtered, ordering is by `sort_order` with
/// declaration order breaking ties, and rows whose converted value is the
/// disabled sentinel are suppressed.
#[must_use]
pub fn snapshot_at(subscriptions: &[Subscription], now: DateTime<Utc>) -> Vec<PanelRow> {
    let mut visible: Vec<&Subscription> = subscriptions.iter().filter(|s| !s.hidden).collect();
    // Stable sort keeps declaration order within equal sort keys.
    visible.sort_by_key(|s| s.sort_order);

    visible
        .into_iter()
        .filter_map(|sub| {
            let value = convert_value(sub);
            if value == DISABLED_SENTINEL {
                return None;
            }

            Some(PanelRow {
                id: sub.id,
                label: sub.label.clone(),
                value,
                suffix: sub.suffix.clone(),
                stale: is_too_old(sub, now),
                colors: select_color(sub),
                alarm_active: sub.alarm_triggered && !sub.sound_dismissed,
                flash_active: sub.flash_triggered && !sub.flash_dismissed,
                flash_color: sub
                    .visual
                    .as_ref()
                    .and_then(|visual| visual.flash_color.clone()),
            })
        })
        .collect()
}
