//! Per-subscription alert state machines.
//!
//! Each subscription runs two independent alert classes — audible alarm and
//! visual flash — over its freshly resolved value. Each class moves through
//! `Idle` → `Triggered` → (optionally) `TriggeredDismissed` and back to
//! `Idle` when its condition clears. The false→true edge of *either* class
//! is the single re-arm signal: it clears both dismissal flags together.
//!
//! Condition checks coerce both sides to f64 and fail closed — a value that
//! does not parse never triggers anything.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, warn};

use crate::subscription::Subscription;
use thiserror::Error;

/// Comparison operator for alert thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operator {
    #[serde(rename = "<")]
    Less,
    #[serde(rename = ">")]
    Greater,
    #[serde(rename = "<=")]
    LessEq,
    #[serde(rename = ">=")]
    GreaterEq,
    #[serde(rename = "==")]
    Equal,
}

impl Operator {
    /// Applies the comparison to already-coerced operands.
    #[must_use]
    pub fn compare(self, value: f64, threshold: f64) -> bool {
        match self {
            Self::Less => value < threshold,
            Self::Greater => value > threshold,
            Self::LessEq => value <= threshold,
            Self::GreaterEq => value >= threshold,
            Self::Equal => value == threshold,
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            Self::Less => "<",
            Self::Greater => ">",
            Self::LessEq => "<=",
            Self::GreaterEq => ">=",
            Self::Equal => "==",
        };
        write!(f, "{symbol}")
    }
}

/// Evaluates a threshold condition over a resolved string value.
///
/// Both value and threshold are coerced to numbers; if either coercion
/// fails the condition is false. Never panics.
#[must_use]
pub fn check_condition(value: &str, operator: Operator, threshold: f64) -> bool {
    if threshold.is_nan() {
        return false;
    }
    let Ok(numeric) = value.trim().parse::<f64>() else {
        return false;
    };
    operator.compare(numeric, threshold)
}

/// Playback errors reported by an audio backend.
///
/// These are logged and otherwise ignored: whether actual audio output
/// succeeded never alters alert state.
#[derive(Debug, Error)]
pub enum AudioError {
    #[error("Playback rejected: {message}")]
    Rejected {
        message: String,
    },

    #[error("Audio resource unavailable: {path}")]
    Unavailable {
        path: String,
    },
}

/// An owned audio playback handle.
///
/// Each audible alert owns exactly one sink for the subscription's entire
/// lifetime; `play`/`stop` calls are sequenced by the single-threaded
/// reconciliation pass and never invoked concurrently for one subscription.
/// `stop` also rewinds to the start.
pub trait AudioSink: Send + fmt::Debug {
    /// Start playback, looping until stopped when `looped` is set.
    fn play(&mut self, looped: bool) -> Result<(), AudioError>;

    /// Stop playback and rewind to the start.
    fn stop(&mut self);
}

/// Opens audio sinks for audible alert declarations at construction time.
pub trait AudioSinkFactory {
    /// Open (and preload) the sink for the given resource locator.
    fn open(&self, path: &str) -> Box<dyn AudioSink>;
}

/// A sink that discards all playback requests.
///
/// Used when no real audio backend is wired in, and in tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl AudioSink for NullSink {
    fn play(&mut self, _looped: bool) -> Result<(), AudioError> {
        Ok(())
    }

    fn stop(&mut self) {}
}

/// Factory producing `NullSink`s.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSinkFactory;

impl AudioSinkFactory for NullSinkFactory {
    fn open(&self, _path: &str) -> Box<dyn AudioSink> {
        Box::new(NullSink)
    }
}

/// Runs both alert classes over a subscription's current value.
///
/// Called once per subscription per reconciliation pass, after values have
/// been assigned. At most one transition fires per class per pass.
pub fn evaluate(sub: &mut Subscription) {
    evaluate_audible(sub);
    evaluate_visual(sub);
}

fn evaluate_audible(sub: &mut Subscription) {
    let Some(audible) = sub.audible.as_mut() else {
        return;
    };

    let met = check_condition(&sub.value, audible.operator, audible.threshold);
    if met && !sub.alarm_triggered {
        // Idle -> Triggered: start playback and re-arm both dismissals.
        sub.alarm_triggered = true;
        sub.sound_dismissed = false;
        sub.flash_dismissed = false;
        debug!(topic = %sub.topic, value = %sub.value, "audible alarm triggered");
        let looped = audible.repeat;
        if let Err(err) = audible.sink.play(looped) {
            error!(topic = %sub.topic, %err, "alarm playback failed");
        }
    } else if !met && sub.alarm_triggered {
        // Triggered -> Idle: stop and rewind. Dismissal flags persist
        // until the next false->true edge clears them.
        sub.alarm_triggered = false;
        audible.sink.stop();
        debug!(topic = %sub.topic, "audible alarm cleared");
    }
}

fn evaluate_visual(sub: &mut Subscription) {
    let Some(visual) = sub.visual.as_ref() else {
        return;
    };

    let met = check_condition(&sub.value, visual.operator, visual.threshold);
    if met && !sub.flash_triggered {
        sub.flash_triggered = true;
        sub.sound_dismissed = false;
        sub.flash_dismissed = false;
        debug!(topic = %sub.topic, value = %sub.value, "visual flash triggered");
    } else if !met && sub.flash_triggered {
        sub.flash_triggered = false;
    }
}

/// Applies the user's shared dismiss action to a subscription.
///
/// Ordering: the first invocation mutes the sound while the visual cue
/// stays; a second invocation suppresses the flash; further invocations are
/// no-ops until a condition re-arms. When only one class is active, a
/// single invocation dismisses that class. Returns true when a flag
/// changed.
pub fn dismiss(sub: &mut Subscription) -> bool {
    if sub.alarm_triggered && !sub.sound_dismissed {
        sub.sound_dismissed = true;
        if let Some(audible) = sub.audible.as_mut() {
            audible.sink.stop();
        }
        debug!(topic = %sub.topic, "alarm sound dismissed");
        return true;
    }

    if sub.flash_triggered && !sub.flash_dismissed {
        sub.flash_dismissed = true;
        debug!(topic = %sub.topic, "flash dismissed");
        return true;
    }

    warn!(topic = %sub.topic, "dismiss with no active alert");
    false
}
