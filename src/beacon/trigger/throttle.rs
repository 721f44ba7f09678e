// SPDX-License-Identifier: MIT

//! Throttle policies and the process-wide throttle ledger

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use super::store::ThrottleStore;

/// How often a trigger may fire
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "policy", rename_all = "snake_case")]
pub enum ThrottlePolicy {
    /// Fires on every match
    #[default]
    Unlimited,
    /// Fires once, then stays suppressed until explicitly reset. Persisted.
    Once,
    /// Fires once per engine instance. Never persisted.
    OncePerSession,
    /// Fires, then stays suppressed until `interval_secs` have elapsed. Persisted.
    OncePerInterval { interval_secs: u64 },
}

impl ThrottlePolicy {
    /// Whether state for this policy outlives the process
    pub fn is_persistent(&self) -> bool {
        matches!(
            self,
            ThrottlePolicy::Once | ThrottlePolicy::OncePerInterval { .. }
        )
    }
}

/// Fire history of one trigger id
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ThrottleState {
    pub fire_count: u64,
    pub last_fired: Option<DateTime<Utc>>,
}

/// Result of a throttle check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquire {
    /// The trigger may fire; `epoch` is its fire count including this one
    Granted { epoch: u64 },
    /// ThrottledNoOp: suppressed by policy. Not an error.
    Throttled,
}

#[derive(Default)]
struct Ledgers {
    persistent: HashMap<String, ThrottleState>,
    session: HashMap<String, ThrottleState>,
    /// Policy each trigger last fired under in this process
    policies: HashMap<String, ThrottlePolicy>,
    /// Bumped on every change to `persistent`
    generation: u64,
}

impl Ledgers {
    fn forget(&mut self, trigger_id: &str) -> bool {
        self.session.remove(trigger_id);
        self.policies.remove(trigger_id);
        self.persistent.remove(trigger_id).is_some()
    }

    fn pending_save(&mut self) -> PendingSave {
        self.generation += 1;
        PendingSave {
            generation: self.generation,
            states: self.persistent.clone(),
        }
    }
}

struct PendingSave {
    generation: u64,
    states: HashMap<String, ThrottleState>,
}

/// Process-wide throttle state keyed by trigger id.
///
/// [`try_acquire`](Self::try_acquire) checks and updates under one lock, so
/// two concurrent matches of the same trigger can never both be granted the
/// same epoch. A trigger whose policy changes between fires (after a
/// configuration reload) starts over with a fresh history.
///
/// Store writes happen after the ledger lock is released and may block on
/// I/O. A write never overwrites a newer one.
pub struct ThrottleLedger {
    ledgers: Mutex<Ledgers>,
    store: Arc<dyn ThrottleStore>,
    /// Generation of the last successful save
    saved: Mutex<u64>,
}

impl ThrottleLedger {
    /// Create a ledger seeded from the store. A store that fails to load is
    /// logged and treated as empty.
    pub fn load(store: Arc<dyn ThrottleStore>) -> Self {
        let persistent = match store.load() {
            Ok(states) => states,
            Err(e) => {
                log::warn!("Failed to load throttle state, starting empty: {}", e);
                HashMap::new()
            }
        };
        Self {
            ledgers: Mutex::new(Ledgers {
                persistent,
                ..Ledgers::default()
            }),
            store,
            saved: Mutex::new(0),
        }
    }

    /// Atomically decide whether `trigger_id` may fire now, recording the fire
    /// if granted.
    pub fn try_acquire(&self, trigger_id: &str, policy: ThrottlePolicy, now: DateTime<Utc>) -> Acquire {
        let mut ledgers = self.ledgers.lock().unwrap_or_else(PoisonError::into_inner);
        let previous = ledgers.policies.insert(trigger_id.to_string(), policy);
        let mut dirty = false;
        if previous.is_some_and(|p| p != policy) {
            log::info!(
                "Throttle policy for trigger '{}' changed to {:?}, history cleared",
                trigger_id,
                policy
            );
            ledgers.session.remove(trigger_id);
            dirty = ledgers.persistent.remove(trigger_id).is_some();
        }

        let table = if policy.is_persistent() {
            &mut ledgers.persistent
        } else {
            &mut ledgers.session
        };
        let state = table.entry(trigger_id.to_string()).or_default();

        let allowed = match policy {
            ThrottlePolicy::Unlimited => true,
            ThrottlePolicy::Once | ThrottlePolicy::OncePerSession => state.fire_count == 0,
            ThrottlePolicy::OncePerInterval { interval_secs } => match state.last_fired {
                None => true,
                // Intervals too large for chrono never elapse
                Some(last) => match i64::try_from(interval_secs)
                    .ok()
                    .and_then(ChronoDuration::try_seconds)
                {
                    Some(interval) => now.signed_duration_since(last) >= interval,
                    None => false,
                },
            },
        };

        let acquired = if allowed {
            state.fire_count += 1;
            state.last_fired = Some(now);
            dirty |= policy.is_persistent();
            Acquire::Granted {
                epoch: state.fire_count,
            }
        } else {
            Acquire::Throttled
        };

        let pending = dirty.then(|| ledgers.pending_save());
        drop(ledgers);
        if let Some(pending) = pending {
            self.persist(pending);
        }
        acquired
    }

    /// Current state for a trigger id, persistent or session
    pub fn state(&self, trigger_id: &str) -> Option<ThrottleState> {
        let ledgers = self.ledgers.lock().unwrap_or_else(PoisonError::into_inner);
        ledgers
            .persistent
            .get(trigger_id)
            .or_else(|| ledgers.session.get(trigger_id))
            .cloned()
    }

    /// Clear one trigger's history, starting a new epoch
    pub fn reset(&self, trigger_id: &str) {
        let mut ledgers = self.ledgers.lock().unwrap_or_else(PoisonError::into_inner);
        let pending = ledgers.forget(trigger_id).then(|| ledgers.pending_save());
        drop(ledgers);
        if let Some(pending) = pending {
            self.persist(pending);
        }
        log::info!("Throttle state reset for trigger '{}'", trigger_id);
    }

    pub fn reset_all(&self) {
        let mut ledgers = self.ledgers.lock().unwrap_or_else(PoisonError::into_inner);
        ledgers.session.clear();
        ledgers.policies.clear();
        ledgers.persistent.clear();
        let pending = ledgers.pending_save();
        drop(ledgers);
        self.persist(pending);
        log::info!("All throttle state reset");
    }

    fn persist(&self, pending: PendingSave) {
        let mut saved = self.saved.lock().unwrap_or_else(PoisonError::into_inner);
        if pending.generation <= *saved {
            log::debug!("Skipping stale throttle save ({})", pending.generation);
            return;
        }
        match self.store.save(&pending.states) {
            Ok(()) => *saved = pending.generation,
            Err(e) => log::error!("Failed to persist throttle state: {}", e),
        }
    }
}
