//! Serialized panel worker.
//!
//! The bus collaborator delivers batches on its own schedule and the
//! presentation layer raises dismiss actions from user interaction. Both
//! funnel into one bounded inbox drained by a single named worker thread
//! that owns the `PanelEngine`, so a reconciliation pass and a dismiss
//! action can never observe or mutate alert state concurrently. Snapshot
//! queries ride the same queue and therefore see fully-applied state.

use std::thread::{self, JoinHandle};
use std::time::Duration;

use chrono::{DateTime, Utc};
use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use tracing::debug;

use crate::engine::PanelEngine;
use crate::error::{PanelError, PanelResult, RuntimeError};
use crate::present::PanelRow;
use crate::subscription::SubscriptionId;

/// Runtime configuration.
#[derive(Debug, Clone)]
pub struct PanelRuntimeConfig {
    /// Max queued inbox messages before submission fails fast.
    pub inbox_capacity: usize,
}

impl Default for PanelRuntimeConfig {
    fn default() -> Self {
        Self {
            inbox_capacity: 1024,
        }
    }
}

#[derive(Debug)]
enum InboxMsg {
    Payload(Option<String>),
    Dismiss {
        id: SubscriptionId,
    },
    Snapshot {
        now: DateTime<Utc>,
        reply: Sender<Vec<PanelRow>>,
    },
}

/// Handle to the panel worker thread.
///
/// Dropping the runtime closes the inbox and joins the worker after it
/// drains the queued messages.
pub struct PanelRuntime {
    tx: Sender<InboxMsg>,
    inbox_capacity: usize,
    join: Option<JoinHandle<()>>,
}

impl PanelRuntime {
    /// Moves the engine onto its worker thread and starts draining the
    /// inbox.
    #[must_use]
    pub fn spawn(engine: PanelEngine, config: PanelRuntimeConfig) -> Self {
        let inbox_capacity = config.inbox_capacity.max(1);
        let (tx, rx) = bounded::<InboxMsg>(inbox_capacity);

        let join = thread::Builder::new()
            .name("telepanel-worker".to_string())
            .spawn(move || worker_loop(engine, rx))
            .expect("failed to spawn telepanel worker");

        Self {
            tx,
            inbox_capacity,
            join: Some(join),
        }
    }

    /// Submits one delivered bus payload (or its absence) for processing.
    ///
    /// # Errors
    ///
    /// Fails fast with `RuntimeError::QueueFull` under backpressure and
    /// `RuntimeError::Disconnected` when the worker is gone.
    pub fn deliver_payload(&self, payload: Option<String>) -> PanelResult<()> {
        self.submit(InboxMsg::Payload(payload))
    }

    /// Submits a dismiss action for one subscription.
    ///
    /// # Errors
    ///
    /// Same failure modes as [`PanelRuntime::deliver_payload`].
    pub fn dismiss(&self, id: SubscriptionId) -> PanelResult<()> {
        self.submit(InboxMsg::Dismiss { id })
    }

    /// Pulls the display rows as of `now`, serialized behind any queued
    /// batches and dismissals.
    ///
    /// # Errors
    ///
    /// Queue failures as above; `RuntimeError::Timeout` when the worker
    /// does not reply within `timeout`.
    pub fn snapshot_at_timeout(
        &self,
        now: DateTime<Utc>,
        timeout: Duration,
    ) -> PanelResult<Vec<PanelRow>> {
        let (reply_tx, reply_rx) = bounded(1);
        self.submit(InboxMsg::Snapshot {
            now,
            reply: reply_tx,
        })?;

        reply_rx.recv_timeout(timeout).map_err(|err| match err {
            crossbeam_channel::RecvTimeoutError::Timeout => {
                PanelError::Runtime(RuntimeError::Timeout {
                    duration_ms: timeout.as_millis().min(u128::from(u64::MAX)) as u64,
                })
            }
            crossbeam_channel::RecvTimeoutError::Disconnected => {
                PanelError::Runtime(RuntimeError::Disconnected {
                    path: "panel_snapshot".to_string(),
                })
            }
        })
    }

    /// Pulls the display rows as of the current wall clock.
    ///
    /// # Errors
    ///
    /// Same as [`PanelRuntime::snapshot_at_timeout`].
    pub fn snapshot(&self, timeout: Duration) -> PanelResult<Vec<PanelRow>> {
        self.snapshot_at_timeout(Utc::now(), timeout)
    }

    fn submit(&self, msg: InboxMsg) -> PanelResult<()> {
        match self.tx.try_send(msg) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(PanelError::Runtime(RuntimeError::QueueFull {
                capacity: self.inbox_capacity,
            })),
            Err(TrySendError::Disconnected(_)) => {
                Err(PanelError::Runtime(RuntimeError::Disconnected {
                    path: "panel_inbox".to_string(),
                }))
            }
        }
    }
}

impl Drop for PanelRuntime {
    fn drop(&mut self) {
        // Close the inbox so the worker drains queued messages and exits,
        // then join for deterministic shutdown.
        let (dummy_tx, _) = bounded::<InboxMsg>(1);
        drop(std::mem::replace(&mut self.tx, dummy_tx));

        if let Some(handle) = self.join.take() {
            let _ = handle.join();
        }
    }
}

fn worker_loop(mut engine: PanelEngine, rx: Receiver<InboxMsg>) {
    debug!("panel worker started");
    while let Ok(msg) = rx.recv() {
        match msg {
            InboxMsg::Payload(payload) => engine.apply_payload(payload.as_deref()),
            InboxMsg::Dismiss { id } => {
                engine.dismiss(id);
            }
            InboxMsg::Snapshot { now, reply } => {
                let _ = reply.send(engine.snapshot_at(now));
            }
        }
    }
    debug!("panel worker stopped");
}
