// SPDX-License-Identifier: MIT

//! Per-evaluation scope: deadline, cancellation and property cache

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;
use uuid::Uuid;

use super::property::Value;

// Stand-in deadline for budgets too large to add to the clock
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 86_400);

/// Deadline and cancellation signal passed to every provider call.
///
/// Cloning is cheap; all clones observe the same cancellation.
#[derive(Debug, Clone)]
pub struct DeadlineToken {
    deadline: Instant,
    budget: Duration,
    cancelled: watch::Receiver<bool>,
}

/// Cancels every [`DeadlineToken`] created alongside it
#[derive(Debug, Clone)]
pub struct CancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

impl DeadlineToken {
    /// Create a token expiring `timeout` from now. A timeout past the
    /// clock's range, such as `Duration::MAX`, effectively never expires.
    pub fn new(timeout: Duration) -> (Self, CancelHandle) {
        let (tx, rx) = watch::channel(false);
        let now = Instant::now();
        let deadline = now
            .checked_add(timeout)
            .or_else(|| now.checked_add(FAR_FUTURE))
            .unwrap_or(now);
        let token = Self {
            deadline,
            budget: timeout,
            cancelled: rx,
        };
        (token, CancelHandle { tx: Arc::new(tx) })
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    /// The total time this token was created with
    pub fn budget(&self) -> Duration {
        self.budget
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancelled.borrow()
    }

    /// Completes once the token is cancelled. Never completes if the
    /// [`CancelHandle`] is dropped without cancelling.
    pub async fn cancelled(&self) {
        let mut rx = self.cancelled.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

/// Scope of a single condition check.
///
/// Holds the deadline token and the values resolved so far, so a property
/// referenced twice is resolved once. Contexts are never reused across
/// checks.
#[derive(Debug)]
pub struct EvaluationContext {
    id: Uuid,
    token: DeadlineToken,
    cache: Mutex<HashMap<String, Value>>,
}

impl EvaluationContext {
    /// Create a context with its own deadline; cancellation is not exposed
    pub fn new(timeout: Duration) -> Self {
        let (token, _handle) = DeadlineToken::new(timeout);
        Self::with_token(token)
    }

    pub fn with_token(token: DeadlineToken) -> Self {
        Self {
            id: Uuid::new_v4(),
            token,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn token(&self) -> &DeadlineToken {
        &self.token
    }

    pub fn cached(&self, name: &str) -> Option<Value> {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn store(&self, name: &str, value: Value) {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), value);
    }

    /// Number of distinct properties resolved in this context
    pub fn resolved_count(&self) -> usize {
        self.cache
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
