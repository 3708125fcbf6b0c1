//! # Telepanel — telemetry reconciliation and alert core
//!
//! Telepanel turns streamed sensor updates from a publish/subscribe bus
//! into display-ready values for a dashboard panel. Users declare
//! *subscriptions* — how to extract, transform, and render one monitored
//! value — and the engine reconciles every delivered update batch against
//! them, running a per-subscription alert state machine for audible alarms
//! and visual flashes with idempotent dismissal.
//!
//! ## Core concepts
//!
//! - **Subscription**: one monitored value bound to a topic on one server
//!   connection, mutated in place for the process lifetime
//! - **UpdateBatch**: one delivered set of keyed updates, reconciled
//!   atomically
//! - **ValueTransform**: best-effort extraction, normalization, scaling and
//!   rounding of untrusted payload values
//! - **Alert classes**: independent audible and visual threshold alerts
//!   with a shared, ordered dismiss action
//!
//! Transport (connect/auth/reconnect) and rendering (layout/styling) are
//! external collaborators: the bus client hands in decoded payload
//! batches, and the presentation adapter pulls [`PanelRow`]s.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use telepanel::{PanelConfig, PanelEngine, PanelRuntime, PanelRuntimeConfig};
//!
//! let config = PanelConfig::from_json(config_json)?;
//! let engine = PanelEngine::with_null_audio(config)?;
//! let runtime = PanelRuntime::spawn(engine, PanelRuntimeConfig::default());
//!
//! // Bus collaborator thread:
//! runtime.deliver_payload(Some(payload_json.to_string()))?;
//!
//! // Presentation tick:
//! let rows = runtime.snapshot(std::time::Duration::from_millis(100))?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod alert;
pub mod config;
pub mod engine;
pub mod error;
pub mod present;
pub mod reconcile;
pub mod runtime;
pub mod subscription;
pub mod topic;
pub mod transform;

// Re-export primary types at crate root for convenience
pub use alert::{check_condition, AudioError, AudioSink, AudioSinkFactory, NullSink, NullSinkFactory, Operator};
pub use config::{AlertDecl, PanelConfig, ServerConfig, SubscriptionConfig};
pub use engine::PanelEngine;
pub use error::{ConfigError, DecodeError, PanelError, PanelResult, RuntimeError};
pub use present::{ColorRule, ConversionRule, PanelRow, DISABLED_SENTINEL};
pub use reconcile::{BusUpdate, Reconciler, UpdateBatch};
pub use runtime::{PanelRuntime, PanelRuntimeConfig};
pub use subscription::{AudibleAlert, Subscription, SubscriptionId, VisualAlert};
pub use topic::topics_match;
pub use transform::ValueTransform;
