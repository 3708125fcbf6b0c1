//! Subscription records.
//!
//! A subscription is one monitored value bound to one topic on one server
//! connection. Records are built in a single batch from configuration at
//! startup and live for the process's entire run — they are mutated in
//! place by the reconciliation pass and never replaced. Audio sinks for
//! audible alerts are opened (and preloaded) here, once, and exclusively
//! owned by their subscription.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;
use uuid::Uuid;

use crate::alert::{AudioSink, AudioSinkFactory, Operator};
use crate::config::{AlertDecl, SubscriptionConfig};
use crate::error::ConfigError;
use crate::present::{ColorRule, ConversionRule};
use crate::transform::ValueTransform;

/// Sound played when an audible alert declares no `audioPath`.
pub const DEFAULT_ALARM_SOUND: &str = "sounds/alarm.wav";

/// Unique identifier for a subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    /// Create a new random subscription id.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Resolved audible alert capability.
///
/// Present only when the declaration was enabled and complete; "disabled"
/// has no representation here.
#[derive(Debug)]
pub struct AudibleAlert {
    /// Threshold comparison operator.
    pub operator: Operator,
    /// Numeric threshold.
    pub threshold: f64,
    /// Loop playback while triggered.
    pub repeat: bool,
    /// Resource locator the sink was opened from.
    pub audio_path: String,
    /// Owned playback handle, acquired at construction for the
    /// subscription's lifetime.
    pub sink: Box<dyn AudioSink>,
}

/// Resolved visual flash capability.
#[derive(Debug, Clone, PartialEq)]
pub struct VisualAlert {
    /// Threshold comparison operator.
    pub operator: Operator,
    /// Numeric threshold.
    pub threshold: f64,
    /// Optional color override while flashing.
    pub flash_color: Option<String>,
}

/// One monitored value.
#[derive(Debug)]
pub struct Subscription {
    /// Stable identity, used by the dismiss action.
    pub id: SubscriptionId,
    /// Identifier of the originating bus connection.
    pub server_key: String,
    /// Topic pattern; may contain wildcard segments.
    pub topic: String,
    /// Display label.
    pub label: String,
    /// Display suffix.
    pub suffix: String,
    /// Value transform pipeline configuration.
    pub transform: ValueTransform,
    /// Staleness threshold.
    pub max_age: Option<Duration>,
    /// Display ordering, ascending; ties keep declaration order.
    pub sort_order: i64,
    /// Ordered color rules consumed at render time.
    pub colors: Vec<ColorRule>,
    /// Ordered conversion rules consumed at render time.
    pub conversions: Vec<ConversionRule>,
    /// Surface raw updates on the broadcast side channel.
    pub broadcast: bool,
    /// Exclude from presentation.
    pub hidden: bool,

    /// Current resolved value; overwritten by reconciliation.
    pub value: String,
    /// Timestamp of the value's source update.
    pub time: DateTime<Utc>,

    /// Audible alarm capability.
    pub audible: Option<AudibleAlert>,
    /// Visual flash capability.
    pub visual: Option<VisualAlert>,

    /// Audible-class edge detector: condition was true on the most recent
    /// pass.
    pub alarm_triggered: bool,
    /// Visual-class edge detector.
    pub flash_triggered: bool,
    /// User dismissed the alarm sound; reset on re-trigger.
    pub sound_dismissed: bool,
    /// User dismissed the flash; reset on re-trigger.
    pub flash_dismissed: bool,

    composite_key: String,
}

impl Subscription {
    /// Builds a subscription from its declaration.
    ///
    /// Alert declarations that are disabled or incomplete resolve to
    /// absent capabilities. The audio sink for an audible alert is opened
    /// here, once.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::EmptyTopic` when the declared topic is blank.
    pub fn from_config(
        server_key: String,
        config: SubscriptionConfig,
        sinks: &dyn AudioSinkFactory,
    ) -> Result<Self, ConfigError> {
        if config.topic.trim().is_empty() {
            return Err(ConfigError::EmptyTopic);
        }

        let transform = ValueTransform {
            jsonpointer: config.jsonpointer,
            decimal_sign: config.decimal_sign_in_message,
            multiply: config.multiply,
            divide: config.divide,
            decimals: config.decimals,
        };

        let max_age = config
            .max_age_seconds
            .map(|secs| Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX)));

        let audible = resolve_audible(&config.topic, config.play_alarm, sinks);
        let visual = resolve_visual(&config.topic, config.flash_value);

        let composite_key = format!("{}-{}", server_key, config.topic);

        Ok(Self {
            id: SubscriptionId::new(),
            server_key,
            topic: config.topic,
            label: config.label,
            suffix: config.suffix,
            transform,
            max_age,
            sort_order: config.sort_order,
            colors: config.colors,
            conversions: config.conversions,
            broadcast: config.broadcast,
            hidden: config.hidden,
            value: String::new(),
            time: Utc::now(),
            audible,
            visual,
            alarm_triggered: false,
            flash_triggered: false,
            sound_dismissed: false,
            flash_dismissed: false,
            composite_key,
        })
    }

    /// The batch lookup key: `"<server_key>-<topic>"`, derived once at
    /// construction.
    #[must_use]
    pub fn composite_key(&self) -> &str {
        &self.composite_key
    }

    /// Minimal record for state-machine tests.
    #[cfg(test)]
    pub(crate) fn bare(server_key: &str, topic: &str) -> Self {
        let composite_key = format!("{server_key}-{topic}");
        Self {
            id: SubscriptionId::new(),
            server_key: server_key.to_string(),
            topic: topic.to_string(),
            label: String::new(),
            suffix: String::new(),
            transform: ValueTransform::default(),
            max_age: None,
            sort_order: 10,
            colors: Vec::new(),
            conversions: Vec::new(),
            broadcast: false,
            hidden: false,
            value: String::new(),
            time: Utc::now(),
            audible: None,
            visual: None,
            alarm_triggered: false,
            flash_triggered: false,
            sound_dismissed: false,
            flash_dismissed: false,
            composite_key,
        }
    }
}

fn resolve_audible(
    topic: &str,
    decl: Option<AlertDecl>,
    sinks: &dyn AudioSinkFactory,
) -> Option<AudibleAlert> {
    let decl = decl?;
    if !decl.enabled {
        return None;
    }

    let (Some(operator), Some(threshold)) = (decl.operator, decl.value) else {
        warn!(topic, "playAlarm enabled without operator/value, disabling");
        return None;
    };

    let audio_path = decl
        .audio_path
        .unwrap_or_else(|| DEFAULT_ALARM_SOUND.to_string());
    let sink = sinks.open(&audio_path);

    Some(AudibleAlert {
        operator,
        threshold,
        repeat: decl.repeat,
        audio_path,
        sink,
    })
}

fn resolve_visual(topic: &str, decl: Option<AlertDecl>) -> Option<VisualAlert> {
    let decl = decl?;
    if !decl.enabled {
        return None;
    }

    let (Some(operator), Some(threshold)) = (decl.operator, decl.value) else {
        warn!(topic, "flashValue enabled without operator/value, disabling");
        return None;
    };

    Some(VisualAlert {
        operator,
        threshold,
        flash_color: decl.flash_color,
    })
}
