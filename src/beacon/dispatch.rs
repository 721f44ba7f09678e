// SPDX-License-Identifier: MIT

//! Action dispatch to the host's executor
//!
//! The engine decides whether and when an action fires; the
//! [`ActionExecutor`] decides how. Trigger-driven dispatches are spawned and
//! never awaited by the publisher.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;

use crate::beacon::trigger::{CompiledAction, TriggerSnapshot};
use crate::eval::error::{EngineError, ExecutorError, ValidationError};

/// Everything the executor needs to perform one action
#[derive(Debug, Clone, PartialEq)]
pub struct ActionRequest {
    pub action_id: String,
    pub kind: String,
    pub params: serde_json::Value,
    /// The trigger that fired, or `None` for a direct perform
    pub trigger_id: Option<String>,
    /// Throttle epoch granted to the trigger
    pub epoch: Option<u64>,
}

impl ActionRequest {
    pub fn new(action: &CompiledAction) -> Self {
        Self {
            action_id: action.id.clone(),
            kind: action.definition.kind.clone(),
            params: action.definition.params.clone(),
            trigger_id: None,
            epoch: None,
        }
    }

    pub fn from_trigger(action: &CompiledAction, trigger_id: &str, epoch: u64) -> Self {
        Self {
            trigger_id: Some(trigger_id.to_string()),
            epoch: Some(epoch),
            ..Self::new(action)
        }
    }
}

/// Host collaborator that performs actions (shows banners, opens links, ...)
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn execute(&self, request: &ActionRequest) -> Result<(), ExecutorError>;
}

/// Outcome of one executor call
#[derive(Debug, Clone)]
pub struct DispatchReport {
    pub request: ActionRequest,
    pub outcome: Result<(), ExecutorError>,
    pub completed_at: DateTime<Utc>,
}

/// Hands actions to the executor
pub struct ActionDispatcher {
    executor: Arc<dyn ActionExecutor>,
    handle: Handle,
    reports: Option<mpsc::Sender<DispatchReport>>,
}

impl ActionDispatcher {
    pub fn new(
        executor: Arc<dyn ActionExecutor>,
        handle: Handle,
        reports: Option<mpsc::Sender<DispatchReport>>,
    ) -> Self {
        Self {
            executor,
            handle,
            reports,
        }
    }

    /// Find an action in the active snapshot
    pub fn lookup(
        snapshot: &TriggerSnapshot,
        action_id: &str,
    ) -> Result<Arc<CompiledAction>, ValidationError> {
        snapshot
            .action(action_id)
            .ok_or_else(|| ValidationError::UnknownAction(action_id.to_string()))
    }

    /// Spawn one executor call for a trigger's granted epoch.
    ///
    /// Unknown action ids fail before anything is spawned. Executor failures
    /// are logged and reported, but the epoch stays consumed.
    pub fn dispatch(
        &self,
        snapshot: &TriggerSnapshot,
        action_id: &str,
        trigger_id: &str,
        epoch: u64,
    ) -> Result<JoinHandle<()>, EngineError> {
        let action = Self::lookup(snapshot, action_id)?;
        let request = ActionRequest::from_trigger(&action, trigger_id, epoch);
        let executor = self.executor.clone();
        let reports = self.reports.clone();

        log::info!(
            "Dispatching action '{}' for trigger '{}' (epoch {})",
            request.action_id,
            trigger_id,
            epoch
        );
        Ok(self.handle.spawn(async move {
            let outcome = executor.execute(&request).await;
            report(reports.as_ref(), request, outcome);
        }))
    }

    /// Run the executor directly and wait for its result
    pub async fn execute_now(&self, action: &CompiledAction) -> Result<(), ExecutorError> {
        let request = ActionRequest::new(action);
        log::info!("Performing action '{}'", request.action_id);
        let outcome = self.executor.execute(&request).await;
        report(self.reports.as_ref(), request, outcome.clone());
        outcome
    }
}

// Reports are best effort: a full or closed channel never holds up dispatch
fn report(
    reports: Option<&mpsc::Sender<DispatchReport>>,
    request: ActionRequest,
    outcome: Result<(), ExecutorError>,
) {
    if let Err(e) = &outcome {
        log::error!(
            "Executor failed for action '{}' (trigger {:?}): {}",
            request.action_id,
            request.trigger_id,
            e
        );
    }

    if let Some(tx) = reports {
        let report = DispatchReport {
            request,
            outcome,
            completed_at: Utc::now(),
        };
        match tx.try_send(report) {
            Ok(()) => {}
            Err(TrySendError::Full(report)) => log::warn!(
                "Dispatch report channel full, dropping report for action '{}'",
                report.request.action_id
            ),
            Err(TrySendError::Closed(_)) => log::debug!("Dispatch report receiver dropped"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::beacon::config::{ActionDefinition, ConfigLoader};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingExecutor {
        requests: Mutex<Vec<ActionRequest>>,
    }

    #[async_trait]
    impl ActionExecutor for RecordingExecutor {
        async fn execute(&self, request: &ActionRequest) -> Result<(), ExecutorError> {
            self.requests.lock().unwrap().push(request.clone());
            if request.kind == "broken" {
                return Err(ExecutorError::Failed("renderer unavailable".into()));
            }
            Ok(())
        }
    }

    fn action(id: &str, kind: &str) -> CompiledAction {
        CompiledAction {
            id: id.to_string(),
            definition: ActionDefinition {
                kind: kind.to_string(),
                condition: None,
                params: serde_json::json!({"body": "Thanks!"}),
            },
            gate: None,
        }
    }

    fn snapshot_with(action_id: &str) -> TriggerSnapshot {
        let yaml = format!(
            "config_version: v1\nactions:\n  {}:\n    kind: banner\n    params:\n      body: Thanks!\n",
            action_id
        );
        TriggerSnapshot::build(&ConfigLoader::parse_yaml(&yaml).unwrap()).unwrap()
    }

    #[tokio::test]
    async fn test_dispatch_calls_executor_and_reports() {
        let executor = Arc::new(RecordingExecutor::default());
        let (tx, mut rx) = mpsc::channel(8);
        let dispatcher = ActionDispatcher::new(executor.clone(), Handle::current(), Some(tx));
        let snapshot = snapshot_with("thanks");

        dispatcher
            .dispatch(&snapshot, "thanks", "on_photo", 1)
            .unwrap()
            .await
            .unwrap();

        let requests = executor.requests.lock().unwrap().clone();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].trigger_id.as_deref(), Some("on_photo"));
        assert_eq!(requests[0].epoch, Some(1));
        assert_eq!(requests[0].params["body"], "Thanks!");

        let report = rx.recv().await.unwrap();
        assert!(report.outcome.is_ok());
        assert_eq!(report.request.action_id, "thanks");
    }

    #[tokio::test]
    async fn test_executor_failure_is_reported() {
        let executor = Arc::new(RecordingExecutor::default());
        let (tx, mut rx) = mpsc::channel(8);
        let dispatcher = ActionDispatcher::new(executor, Handle::current(), Some(tx));

        let result = dispatcher.execute_now(&action("bad", "broken")).await;
        assert_eq!(
            result,
            Err(ExecutorError::Failed("renderer unavailable".into()))
        );
        let report = rx.recv().await.unwrap();
        assert!(report.outcome.is_err());
        assert!(report.request.trigger_id.is_none());
    }

    #[tokio::test]
    async fn test_dispatch_unknown_action_fails_without_spawning() {
        let executor = Arc::new(RecordingExecutor::default());
        let dispatcher = ActionDispatcher::new(executor.clone(), Handle::current(), None);

        let result = dispatcher.dispatch(&TriggerSnapshot::default(), "nope", "t", 1);
        assert!(matches!(
            result,
            Err(EngineError::Validation(ValidationError::UnknownAction(_)))
        ));
        assert!(executor.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_undrained_report_channel_does_not_block() {
        let executor = Arc::new(RecordingExecutor::default());
        let (tx, _rx) = mpsc::channel(1);
        let dispatcher = ActionDispatcher::new(executor.clone(), Handle::current(), Some(tx));
        let snapshot = snapshot_with("a");

        let performs = async {
            for _ in 0..3 {
                dispatcher.execute_now(&action("a", "banner")).await.unwrap();
            }
            for epoch in 1..=3 {
                dispatcher
                    .dispatch(&snapshot, "a", "t", epoch)
                    .unwrap()
                    .await
                    .unwrap();
            }
        };
        tokio::time::timeout(std::time::Duration::from_secs(2), performs)
            .await
            .expect("dispatch blocked on a full report channel");
        assert_eq!(executor.requests.lock().unwrap().len(), 6);
    }

    #[test]
    fn test_lookup_unknown_action() {
        let snapshot = TriggerSnapshot::default();
        assert_eq!(
            ActionDispatcher::lookup(&snapshot, "nope").unwrap_err(),
            ValidationError::UnknownAction("nope".into())
        );
    }
}
