//! Panel engine.
//!
//! `PanelEngine` owns the subscription collection — the single writer the
//! design requires — and sequences one delivered payload at a time through
//! reconciliation and alert evaluation. Dismiss actions and snapshot
//! queries go through the same owner, so no locking is needed over the
//! collection; `PanelRuntime` adds the serialized inbox for callers on
//! other threads.

use chrono::{DateTime, Utc};
use crossbeam_channel::Receiver;
use tracing::{debug, info, warn};

use crate::alert;
use crate::alert::{AudioSinkFactory, NullSinkFactory};
use crate::config::PanelConfig;
use crate::error::PanelResult;
use crate::present::{snapshot_at, PanelRow};
use crate::reconcile::{BusUpdate, Reconciler, UpdateBatch};
use crate::subscription::{Subscription, SubscriptionId};

/// Default capacity of the broadcast side channel.
pub const DEFAULT_BROADCAST_CAPACITY: usize = 256;

/// The reconciliation and alert core behind one panel.
pub struct PanelEngine {
    config: PanelConfig,
    subscriptions: Vec<Subscription>,
    reconciler: Reconciler,
    broadcasts: Receiver<BusUpdate>,
}

impl PanelEngine {
    /// Builds the engine from configuration, constructing every
    /// subscription (and preloading its audio sink) up front.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when a declaration is invalid; no
    /// partial collection is kept.
    pub fn new(config: PanelConfig, sinks: &dyn AudioSinkFactory) -> PanelResult<Self> {
        config.validate()?;

        let mut subscriptions = Vec::new();
        for server in &config.servers {
            let key = server.server_key();
            debug!(
                address = %server.address,
                port = server.port,
                user = %server.user,
                "adding subscriptions for server"
            );
            for declaration in &server.subscriptions {
                let sub = Subscription::from_config(key.clone(), declaration.clone(), sinks)?;
                subscriptions.push(sub);
            }
        }

        info!(
            servers = config.servers.len(),
            subscriptions = subscriptions.len(),
            "panel engine ready"
        );

        let (reconciler, broadcasts) =
            Reconciler::new(config.use_wildcards, DEFAULT_BROADCAST_CAPACITY);

        Ok(Self {
            config,
            subscriptions,
            reconciler,
            broadcasts,
        })
    }

    /// Builds the engine without an audio backend; audible alerts keep
    /// their state machine but play into a null sink.
    ///
    /// # Errors
    ///
    /// Same as [`PanelEngine::new`].
    pub fn with_null_audio(config: PanelConfig) -> PanelResult<Self> {
        Self::new(config, &NullSinkFactory)
    }

    /// The startup message for the bus collaborator: the full declaration
    /// tree it needs to open connections and subscribe.
    #[must_use]
    pub const fn config_message(&self) -> &PanelConfig {
        &self.config
    }

    /// Read access to the subscription collection, in declaration order.
    #[must_use]
    pub fn subscriptions(&self) -> &[Subscription] {
        &self.subscriptions
    }

    /// Receiving end of the broadcast side channel.
    #[must_use]
    pub const fn broadcasts(&self) -> &Receiver<BusUpdate> {
        &self.broadcasts
    }

    /// Broadcast messages dropped because no listener kept up.
    #[must_use]
    pub fn dropped_broadcasts(&self) -> u64 {
        self.reconciler.dropped_broadcasts()
    }

    /// Handles one delivered bus payload.
    ///
    /// An absent payload is a logged no-op; a malformed payload is logged
    /// and treated as empty. Neither mutates any subscription.
    pub fn apply_payload(&mut self, payload: Option<&str>) {
        let Some(payload) = payload else {
            debug!("payload delivery without payload");
            return;
        };

        match UpdateBatch::from_json(payload) {
            Ok(batch) => self.apply_batch(&batch),
            Err(err) => warn!(%err, "discarding malformed payload"),
        }
    }

    /// Reconciles one batch and then evaluates both alert classes for
    /// every subscription. Runs to completion before anything else
    /// touches the collection.
    pub fn apply_batch(&mut self, batch: &UpdateBatch) {
        self.reconciler.reconcile(&mut self.subscriptions, batch);
        for sub in &mut self.subscriptions {
            alert::evaluate(sub);
        }
    }

    /// Applies the shared dismiss action for one subscription.
    ///
    /// Returns false when the id is unknown.
    pub fn dismiss(&mut self, id: SubscriptionId) -> bool {
        let Some(sub) = self.subscriptions.iter_mut().find(|s| s.id == id) else {
            warn!(%id, "dismiss for unknown subscription");
            return false;
        };
        alert::dismiss(sub);
        true
    }

    /// Display rows as of `now`.
    #[must_use]
    pub fn snapshot_at(&self, now: DateTime<Utc>) -> Vec<PanelRow> {
        snapshot_at(&self.subscriptions, now)
    }

    /// Display rows as of the current wall clock.
    #[must_use]
    pub fn snapshot(&self) -> Vec<PanelRow> {
        self.snapshot_at(Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::reconcile::BusUpdate;

    fn engine(config: &str) -> PanelEngine {
        PanelEngine::with_null_audio(PanelConfig::from_json(config).unwrap()).unwrap()
    }

    fn single_sensor_engine() -> PanelEngine {
        engine(
            r#"{
                "servers": [{
                    "address": "mqtt.local",
                    "port": 1883,
                    "subscriptions": [
                        {"topic": "sensors/temp", "label": "Temp", "decimals": 1}
                    ]
                }]
            }"#,
        )
    }

    fn batch_payload(value: &str, time: i64) -> String {
        let update = BusUpdate {
            server_key: "mqtt.local:1883".to_string(),
            topic: "sensors/temp".to_string(),
            value: value.to_string(),
            time,
        };
        format!(
            r#"{{"mqtt.local:1883-sensors/temp": {}}}"#,
            serde_json::to_string(&update).unwrap()
        )
    }

    #[test]
    fn builds_subscriptions_for_every_declaration() {
        let engine = engine(
            r#"{
                "servers": [
                    {"address": "a", "port": 1, "subscriptions": [{"topic": "x"}, {"topic": "y"}]},
                    {"address": "b", "port": 2, "subscriptions": [{"topic": "z"}]}
                ]
            }"#,
        );
        assert_eq!(engine.subscriptions().len(), 3);
        assert_eq!(engine.subscriptions()[2].server_key, "b:2");
    }

    #[test]
    fn payload_flows_through_the_pipeline_into_the_snapshot() {
        let mut engine = single_sensor_engine();
        engine.apply_payload(Some(&batch_payload("21.55", 1_700_000_000_000)));

        let rows = engine.snapshot();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].value, "21.6");
        assert_eq!(rows[0].label, "Temp");
    }

    #[test]
    fn absent_and_malformed_payloads_mutate_nothing() {
        let mut engine = single_sensor_engine();
        engine.apply_payload(None);
        engine.apply_payload(Some("not json"));

        assert_eq!(engine.subscriptions()[0].value, "");
    }

    #[test]
    fn dismiss_routes_by_subscription_identity() {
        let mut engine = engine(
            r#"{
                "servers": [{
                    "address": "mqtt.local",
                    "port": 1883,
                    "subscriptions": [{
                        "topic": "sensors/temp",
                        "playAlarm": {"enabled": true, "operator": ">", "value": 5}
                    }]
                }]
            }"#,
        );
        engine.apply_payload(Some(&batch_payload("6", 1_700_000_000_000)));
        assert!(engine.subscriptions()[0].alarm_triggered);

        let id = engine.subscriptions()[0].id;
        assert!(engine.dismiss(id));
        assert!(engine.subscriptions()[0].sound_dismissed);

        assert!(!engine.dismiss(SubscriptionId::new()));
    }

    #[test]
    fn config_message_round_trips_the_declarations() {
        let engine = single_sensor_engine();
        let message = serde_json::to_string(engine.config_message()).unwrap();
        assert!(message.contains("sensors/temp"));
        assert!(message.contains("mqtt.local"));
    }
}
