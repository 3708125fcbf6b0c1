//! Batch reconciliation.
//!
//! The bus collaborator delivers decoded payload batches: a map from
//! `"<server_key>-<topic>"` to the latest update seen for that key. The
//! reconciler walks the subscription list in declaration order, matches
//! each subscription against the batch, and writes resolved values and
//! timestamps in place. A subscription with no matching entry is left
//! untouched — its stale value persists and is dimmed later via `maxAge`.
//!
//! Subscriptions flagged `broadcast` surface the raw, untransformed update
//! on a bounded side channel before any pipeline stage runs. The send is
//! non-blocking; a slow listener drops messages, counted but never
//! stalling reconciliation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, TimeZone, Utc};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use serde::{Deserialize, Serialize};
use tracing::{trace, warn};

use crate::error::DecodeError;
use crate::subscription::Subscription;
use crate::topic::topics_match;

/// One decoded update from the bus.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BusUpdate {
    /// Identifier of the originating bus connection.
    pub server_key: String,

    /// Actual topic the update arrived on.
    pub topic: String,

    /// Raw payload value, possibly JSON-encoded.
    pub value: String,

    /// Source timestamp, epoch milliseconds.
    pub time: i64,
}

impl BusUpdate {
    /// The update's own composite key.
    #[must_use]
    pub fn composite_key(&self) -> String {
        format!("{}-{}", self.server_key, self.topic)
    }

    /// The source timestamp as a `DateTime`.
    ///
    /// # Errors
    ///
    /// Returns `DecodeError::TimestampOutOfRange` for millisecond values
    /// chrono cannot represent.
    pub fn timestamp(&self) -> Result<DateTime<Utc>, DecodeError> {
        Utc.timestamp_millis_opt(self.time)
            .single()
            .ok_or(DecodeError::TimestampOutOfRange { millis: self.time })
    }
}

/// One delivered set of keyed updates, processed atomically.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UpdateBatch {
    entries: HashMap<String, BusUpdate>,
}

impl UpdateBatch {
    /// Creates an empty batch.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Decodes a batch from the bus payload's JSON wire form.
    ///
    /// # Errors
    ///
    /// Returns `DecodeError::MalformedBatch` when the payload is not a map
    /// of updates.
    pub fn from_json(payload: &str) -> Result<Self, DecodeError> {
        let entries: HashMap<String, BusUpdate> =
            serde_json::from_str(payload).map_err(|e| DecodeError::MalformedBatch {
                message: e.to_string(),
            })?;
        Ok(Self { entries })
    }

    /// Stores an update under its own composite key (exact-topic staging).
    pub fn insert(&mut self, update: BusUpdate) {
        self.entries.insert(update.composite_key(), update);
    }

    /// Stores an update under an explicit key.
    ///
    /// With wildcard subscriptions the staging key carries the
    /// subscription's *pattern* topic while the update records the actual
    /// topic it arrived on.
    pub fn insert_keyed(&mut self, key: impl Into<String>, update: BusUpdate) {
        self.entries.insert(key.into(), update);
    }

    /// Looks up the update staged for a composite key.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&BusUpdate> {
        self.entries.get(key)
    }

    /// Number of staged updates.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the batch holds no updates.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Reconciles update batches into the subscription collection.
///
/// Owns the broadcast side channel; raw updates for `broadcast`
/// subscriptions are surfaced through it before any transform runs.
#[derive(Debug)]
pub struct Reconciler {
    use_wildcards: bool,
    broadcast_tx: Sender<BusUpdate>,
    dropped_broadcasts: AtomicU64,
}

impl Reconciler {
    /// Creates a reconciler and the receiving end of its broadcast channel.
    #[must_use]
    pub fn new(use_wildcards: bool, broadcast_capacity: usize) -> (Self, Receiver<BusUpdate>) {
        let (broadcast_tx, broadcast_rx) = bounded(broadcast_capacity.max(1));
        (
            Self {
                use_wildcards,
                broadcast_tx,
                dropped_broadcasts: AtomicU64::new(0),
            },
            broadcast_rx,
        )
    }

    /// Whether wildcard topic matching is enabled for this installation.
    #[must_use]
    pub const fn use_wildcards(&self) -> bool {
        self.use_wildcards
    }

    /// Broadcast messages dropped because the listener was slow or gone.
    #[must_use]
    pub fn dropped_broadcasts(&self) -> u64 {
        self.dropped_broadcasts.load(Ordering::Relaxed)
    }

    /// Applies one batch to the subscription collection, in place.
    ///
    /// Each subscription is updated at most once per batch. A corrupt
    /// entry only affects its own subscription; the rest of the pass
    /// continues.
    pub fn reconcile(&self, subscriptions: &mut [Subscription], batch: &UpdateBatch) {
        if batch.is_empty() {
            return;
        }

        for sub in subscriptions.iter_mut() {
            let Some(update) = batch.get(sub.composite_key()) else {
                continue;
            };

            // Topic wildcarding never crosses servers.
            if update.server_key != sub.server_key {
                continue;
            }

            let matched = if self.use_wildcards {
                topics_match(&sub.topic, &update.topic)
            } else {
                sub.topic == update.topic
            };
            if !matched {
                continue;
            }

            if sub.broadcast {
                self.send_broadcast(update.clone());
            }

            let time = match update.timestamp() {
                Ok(time) => time,
                Err(err) => {
                    warn!(topic = %sub.topic, %err, "skipping update with bad timestamp");
                    continue;
                }
            };

            sub.value = sub.transform.apply(&update.value);
            sub.time = time;
            trace!(topic = %sub.topic, value = %sub.value, "subscription reconciled");
        }
    }

    fn send_broadcast(&self, update: BusUpdate) {
        match self.broadcast_tx.try_send(update) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.dropped_broadcasts.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::transform::ValueTransform;

    fn update(server_key: &str, topic: &str, value: &str, time: i64) -> BusUpdate {
        BusUpdate {
            server_key: server_key.to_string(),
            topic: topic.to_string(),
            value: value.to_string(),
            time,
        }
    }

    fn subscription(topic: &str) -> Subscription {
        Subscription::bare("srv:1883", topic)
    }

    #[test]
    fn decodes_the_wire_batch_format() {
        let batch = UpdateBatch::from_json(
            r#"{
                "srv:1883-sensors/temp": {
                    "serverKey": "srv:1883",
                    "topic": "sensors/temp",
                    "value": "21.5",
                    "time": 1700000000000
                }
            }"#,
        )
        .unwrap();

        let staged = batch.get("srv:1883-sensors/temp").unwrap();
        assert_eq!(staged.value, "21.5");
        assert_eq!(staged.time, 1_700_000_000_000);
    }

    #[test]
    fn rejects_non_map_payloads() {
        let err = UpdateBatch::from_json("[1, 2]").unwrap_err();
        assert!(matches!(err, DecodeError::MalformedBatch { .. }));
    }

    #[test]
    fn matching_update_assigns_value_and_time() {
        let (reconciler, _rx) = Reconciler::new(false, 8);
        let mut subs = vec![subscription("sensors/temp")];
        let mut batch = UpdateBatch::new();
        batch.insert(update("srv:1883", "sensors/temp", "21.5", 1_700_000_000_000));

        reconciler.reconcile(&mut subs, &batch);

        assert_eq!(subs[0].value, "21.5");
        assert_eq!(subs[0].time.timestamp_millis(), 1_700_000_000_000);
    }

    #[test]
    fn absent_update_leaves_the_subscription_untouched() {
        let (reconciler, _rx) = Reconciler::new(false, 8);
        let mut subs = vec![subscription("sensors/temp")];
        subs[0].value = "old".to_string();
        let before = subs[0].time;

        reconciler.reconcile(&mut subs, &UpdateBatch::new());

        assert_eq!(subs[0].value, "old");
        assert_eq!(subs[0].time, before);
    }

    #[test]
    fn server_key_mismatch_never_matches() {
        let (reconciler, _rx) = Reconciler::new(false, 8);
        let mut subs = vec![subscription("sensors/temp")];
        let mut batch = UpdateBatch::new();
        // Staged under the subscription's key but claiming another server.
        batch.insert_keyed(
            subs[0].composite_key().to_string(),
            update("other:1883", "sensors/temp", "21.5", 1_700_000_000_000),
        );

        reconciler.reconcile(&mut subs, &batch);
        assert_eq!(subs[0].value, "");
    }

    #[test]
    fn wildcard_subscription_accepts_concrete_topics() {
        let (reconciler, _rx) = Reconciler::new(true, 8);
        let mut subs = vec![subscription("sensors/+/temp")];
        let mut batch = UpdateBatch::new();
        batch.insert_keyed(
            subs[0].composite_key().to_string(),
            update("srv:1883", "sensors/kitchen/temp", "19", 1_700_000_000_000),
        );

        reconciler.reconcile(&mut subs, &batch);
        assert_eq!(subs[0].value, "19");
    }

    #[test]
    fn wildcard_match_requires_the_flag() {
        let (reconciler, _rx) = Reconciler::new(false, 8);
        let mut subs = vec![subscription("sensors/+/temp")];
        let mut batch = UpdateBatch::new();
        batch.insert_keyed(
            subs[0].composite_key().to_string(),
            update("srv:1883", "sensors/kitchen/temp", "19", 1_700_000_000_000),
        );

        reconciler.reconcile(&mut subs, &batch);
        assert_eq!(subs[0].value, "");
    }

    #[test]
    fn broadcast_surfaces_the_raw_update_before_transforms() {
        let (reconciler, rx) = Reconciler::new(false, 8);
        let mut subs = vec![subscription("sensors/temp")];
        subs[0].broadcast = true;
        subs[0].transform = ValueTransform {
            multiply: Some(10.0),
            ..ValueTransform::default()
        };

        let raw = update("srv:1883", "sensors/temp", "2", 1_700_000_000_000);
        let mut batch = UpdateBatch::new();
        batch.insert(raw.clone());

        reconciler.reconcile(&mut subs, &batch);

        // The listener sees the untransformed value.
        assert_eq!(rx.try_recv().unwrap(), raw);
        assert_eq!(subs[0].value, "20");
    }

    #[test]
    fn slow_broadcast_listener_drops_instead_of_blocking() {
        let (reconciler, _rx) = Reconciler::new(false, 1);
        let mut subs = vec![subscription("a"), subscription("b")];
        subs[0].broadcast = true;
        subs[1].broadcast = true;

        let mut batch = UpdateBatch::new();
        batch.insert(update("srv:1883", "a", "1", 1_700_000_000_000));
        batch.insert(update("srv:1883", "b", "2", 1_700_000_000_000));

        reconciler.reconcile(&mut subs, &batch);
        assert_eq!(reconciler.dropped_broadcasts(), 1);
    }

    #[test]
    fn bad_timestamp_isolates_to_its_own_subscription() {
        let (reconciler, _rx) = Reconciler::new(false, 8);
        let mut subs = vec![subscription("a"), subscription("b")];
        let mut batch = UpdateBatch::new();
        batch.insert(update("srv:1883", "a", "1", i64::MAX));
        batch.insert(update("srv:1883", "b", "2", 1_700_000_000_000));

        reconciler.reconcile(&mut subs, &batch);

        assert_eq!(subs[0].value, "");
        assert_eq!(subs[1].value, "2");
    }

    #[test]
    fn reconciling_the_same_batch_twice_is_idempotent() {
        let (reconciler, _rx) = Reconciler::new(false, 8);
        let mut subs = vec![subscription("sensors/temp")];
        subs[0].transform = ValueTransform {
            multiply: Some(2.0),
            divide: Some(4.0),
            ..ValueTransform::default()
        };

        let mut batch = UpdateBatch::new();
        batch.insert(update("srv:1883", "sensors/temp", "10", 1_700_000_000_000));

        reconciler.reconcile(&mut subs, &batch);
        let (value, time) = (subs[0].value.clone(), subs[0].time);

        reconciler.reconcile(&mut subs, &batch);
        assert_eq!(subs[0].value, value);
        assert_eq!(subs[0].time, time);
    }
}
