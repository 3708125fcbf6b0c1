//! Panel configuration.
//!
//! Declarations arrive from the host configuration in the bus
//! collaborator's wire shape (camelCase keys) and are decoded with serde.
//! Defaulting is resolved here, once, at decode time: `sortOrder` defaults
//! to 10, alert declarations default to disabled, `repeat` defaults to
//! false. The decoded tree is also the startup message handed back to the
//! bus collaborator to establish connections and subscriptions.

use serde::{Deserialize, Serialize};

use crate::alert::Operator;
use crate::error::ConfigError;
use crate::present::{ColorRule, ConversionRule};

/// Top-level panel configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PanelConfig {
    /// Bus servers to connect to, each carrying its subscription list.
    #[serde(default)]
    pub servers: Vec<ServerConfig>,

    /// Installation-level switch enabling wildcard topic matching.
    #[serde(default)]
    pub use_wildcards: bool,
}

impl PanelConfig {
    /// Decode a configuration from its JSON wire form.
    ///
    /// Shape errors surface verbatim; semantic validation (blank topics,
    /// blank addresses) happens separately in [`PanelConfig::validate`].
    ///
    /// # Errors
    ///
    /// Returns the decode error when the payload does not match the
    /// declaration shape.
    pub fn from_json(payload: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(payload)
    }

    /// Validates the declarations that subscriptions will be built from.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for server in &self.servers {
            if server.address.trim().is_empty() {
                return Err(ConfigError::EmptyServerAddress);
            }
            for sub in &server.subscriptions {
                if sub.topic.trim().is_empty() {
                    return Err(ConfigError::EmptyTopic);
                }
            }
        }
        Ok(())
    }
}

/// One bus server connection and its declared subscriptions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    /// Server host address.
    pub address: String,

    /// Server port.
    pub port: u16,

    /// Optional credential user; part of the server key.
    #[serde(default)]
    pub user: String,

    /// Optional credential password; never part of the server key.
    #[serde(default)]
    pub password: String,

    /// Subscription declarations for this connection.
    #[serde(default)]
    pub subscriptions: Vec<SubscriptionConfig>,
}

impl ServerConfig {
    /// Stable identifier for this connection, composed from address, port
    /// and user. Updates carry the same key so subscriptions never match
    /// across servers.
    #[must_use]
    pub fn server_key(&self) -> String {
        if self.user.is_empty() {
            format!("{}:{}", self.address, self.port)
        } else {
            format!("{}:{}:{}", self.address, self.port, self.user)
        }
    }
}

fn default_sort_order() -> i64 {
    10
}

/// One declared subscription.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscriptionConfig {
    /// Topic to subscribe to; may contain wildcard segments.
    pub topic: String,

    /// Display label.
    #[serde(default)]
    pub label: String,

    /// Display suffix (unit string); empty when absent.
    #[serde(default)]
    pub suffix: String,

    /// Optional RFC 6901 pointer into JSON-encoded payload values.
    #[serde(default)]
    pub jsonpointer: Option<String>,

    /// Optional character to normalize to `.` before numeric parsing.
    #[serde(default)]
    pub decimal_sign_in_message: Option<String>,

    /// Optional multiplicative scale factor.
    #[serde(default)]
    pub multiply: Option<f64>,

    /// Optional divisive scale factor.
    #[serde(default)]
    pub divide: Option<f64>,

    /// Optional fixed decimal places for the displayed value.
    #[serde(default)]
    pub decimals: Option<u32>,

    /// Optional staleness threshold in seconds.
    #[serde(default)]
    pub max_age_seconds: Option<u64>,

    /// Display ordering, ascending; ties keep declaration order.
    #[serde(default = "default_sort_order")]
    pub sort_order: i64,

    /// Ordered color rules consumed at render time.
    #[serde(default)]
    pub colors: Vec<ColorRule>,

    /// Ordered value conversion rules consumed at render time.
    #[serde(default)]
    pub conversions: Vec<ConversionRule>,

    /// Surface raw updates on the broadcast side channel.
    #[serde(default)]
    pub broadcast: bool,

    /// Exclude this subscription from presentation.
    #[serde(default)]
    pub hidden: bool,

    /// Audible alarm declaration.
    #[serde(default)]
    pub play_alarm: Option<AlertDecl>,

    /// Visual flash declaration.
    #[serde(default)]
    pub flash_value: Option<AlertDecl>,
}

/// A raw alert declaration, shared by the audible and visual classes.
///
/// Declarations are duck-shaped on the wire; `Subscription` construction
/// resolves them into typed capabilities (or drops them when disabled or
/// incomplete).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertDecl {
    /// Whether the alert is armed at all.
    #[serde(default)]
    pub enabled: bool,

    /// Comparison operator against the resolved value.
    #[serde(default)]
    pub operator: Option<Operator>,

    /// Numeric threshold.
    #[serde(default)]
    pub value: Option<f64>,

    /// Audible only: resource locator for the alarm sound.
    #[serde(default)]
    pub audio_path: Option<String>,

    /// Audible only: loop playback while triggered.
    #[serde(default)]
    pub repeat: bool,

    /// Visual only: color override while flashing.
    #[serde(default)]
    pub flash_color: Option<String>,
}
