//! Tier 3: language-model fallback.
//!
//! Acknowledges the user first, then asks the [`TaskAnalyzer`] (bounded by a timeout) for a
//! task analysis. Any analyzer failure substitutes the keyword/URL heuristic. The validated
//! analysis is escalated immediately, parked until the user confirms, or declined.

use crate::analysis::{heuristic_analysis, validate, TaskAnalysis};
use crate::llm::TaskAnalyzer;
use crate::messages;
use crate::reply::{deliver, ReplyChannel};
use crate::router::{RouteOutcome, Tier, UnhandledReason};
use crate::workflow::WorkflowEngine;
use dashmap::DashMap;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;

pub struct FallbackOrchestrator {
    analyzer: Arc<dyn TaskAnalyzer>,
    workflow: Arc<dyn WorkflowEngine>,
    timeout: Duration,
    /// Last analysis awaiting confirmation, per user.
    pending: DashMap<String, TaskAnalysis>,
}

impl FallbackOrchestrator {
    pub fn new(
        analyzer: Arc<dyn TaskAnalyzer>,
        workflow: Arc<dyn WorkflowEngine>,
        timeout: Duration,
    ) -> Self {
        Self {
            analyzer,
            workflow,
            timeout,
            pending: DashMap::new(),
        }
    }

    pub async fn handle(&self, user_id: &str, text: &str, reply: &dyn ReplyChannel) -> RouteOutcome {
        deliver(reply, user_id, messages::ANALYZING).await;

        let analysis = validate(self.analyze(user_id, text).await, text);
        tracing::info!(
            target: "relay::fallback",
            user_id,
            category = ?analysis.category,
            confidence = analysis.confidence,
            can_handle = analysis.can_handle,
            "task analyzed"
        );

        if !analysis.can_handle {
            deliver(reply, user_id, &messages::unable(&analysis)).await;
            return RouteOutcome::Unhandled {
                reason: UnhandledReason::CannotAutomate,
            };
        }

        if analysis.confirmation_required {
            deliver(reply, user_id, &messages::confirmation(&analysis)).await;
            self.pending.insert(user_id.to_string(), analysis.clone());
            return RouteOutcome::AwaitingConfirmation { task: analysis };
        }

        let workflow = self.escalate(user_id, &analysis);
        deliver(reply, user_id, &messages::processing(&analysis.task_description)).await;
        RouteOutcome::Escalated { workflow }
    }

    /// Escalate the parked analysis, if any.
    pub async fn confirm(&self, user_id: &str, reply: &dyn ReplyChannel) -> RouteOutcome {
        match self.pending.remove(user_id) {
            Some((_, analysis)) => {
                let workflow = self.escalate(user_id, &analysis);
                deliver(reply, user_id, messages::TASK_CONFIRMED).await;
                RouteOutcome::Escalated { workflow }
            }
            None => {
                deliver(reply, user_id, messages::NOTHING_PENDING).await;
                RouteOutcome::Unhandled {
                    reason: UnhandledReason::NothingPending,
                }
            }
        }
    }

    /// Drop the parked analysis, if any.
    pub async fn cancel(&self, user_id: &str, reply: &dyn ReplyChannel) -> RouteOutcome {
        if self.cancel_pending(user_id) {
            deliver(reply, user_id, messages::TASK_CANCELLED).await;
            RouteOutcome::Handled {
                tier: Tier::Fallback,
            }
        } else {
            deliver(reply, user_id, messages::NOTHING_PENDING).await;
            RouteOutcome::Unhandled {
                reason: UnhandledReason::NothingPending,
            }
        }
    }

    pub fn cancel_pending(&self, user_id: &str) -> bool {
        self.pending.remove(user_id).is_some()
    }

    pub fn pending(&self, user_id: &str) -> Option<TaskAnalysis> {
        self.pending.get(user_id).map(|a| a.clone())
    }

    async fn analyze(&self, user_id: &str, text: &str) -> TaskAnalysis {
        match tokio::time::timeout(self.timeout, self.analyzer.analyze(text)).await {
            Ok(Ok(analysis)) => analysis,
            Ok(Err(e)) => {
                tracing::warn!(target: "relay::fallback", user_id, error = %e, "analyzer failed, using heuristic");
                heuristic_analysis(text)
            }
            Err(_) => {
                tracing::warn!(target: "relay::fallback", user_id, timeout = ?self.timeout, "analyzer timed out, using heuristic");
                heuristic_analysis(text)
            }
        }
    }

    fn escalate(&self, user_id: &str, analysis: &TaskAnalysis) -> String {
        let workflow = analysis.workflow_or_default().to_string();
        let mut params = Map::new();
        params.insert(
            "task_analysis".to_string(),
            serde_json::to_value(analysis).unwrap_or(Value::Null),
        );
        params.insert("user_id".to_string(), Value::from(user_id));
        self.workflow.trigger(&workflow, params);
        tracing::info!(target: "relay::fallback", user_id, workflow = %workflow, "task escalated");
        workflow
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::TaskCategory;
    use crate::error::CollaboratorError;
    use crate::llm::HeuristicAnalyzer;
    use crate::reply::CollectedReplies;
    use async_trait::async_trait;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder(Mutex<Vec<String>>);

    impl WorkflowEngine for Recorder {
        fn trigger(&self, workflow: &str, _params: Map<String, Value>) {
            self.0.lock().unwrap().push(workflow.to_string());
        }
    }

    struct Fixed(TaskAnalysis);

    #[async_trait]
    impl TaskAnalyzer for Fixed {
        async fn analyze(&self, _text: &str) -> Result<TaskAnalysis, CollaboratorError> {
            Ok(self.0.clone())
        }
    }

    struct Hanging;

    #[async_trait]
    impl TaskAnalyzer for Hanging {
        async fn analyze(&self, _text: &str) -> Result<TaskAnalysis, CollaboratorError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Err(CollaboratorError::NotConfigured)
        }
    }

    fn orchestrator(analyzer: Arc<dyn TaskAnalyzer>) -> (FallbackOrchestrator, Arc<Recorder>) {
        let wf = Arc::new(Recorder::default());
        (
            FallbackOrchestrator::new(analyzer, wf.clone(), Duration::from_millis(50)),
            wf,
        )
    }

    fn automatable() -> TaskAnalysis {
        let mut a = heuristic_analysis("幫我整理資料");
        a.category = TaskCategory::Automation;
        a.confidence = 0.9;
        a.confirmation_required = false;
        a
    }

    #[tokio::test]
    async fn acknowledges_before_answering() {
        let (orch, _) = orchestrator(Arc::new(HeuristicAnalyzer));
        let replies = CollectedReplies::new();
        orch.handle("u1", "今天天氣如何", &replies).await;
        let texts = replies.into_texts();
        assert_eq!(texts[0], messages::ANALYZING);
        assert_eq!(texts.len(), 2);
    }

    #[tokio::test]
    async fn confident_task_escalates_with_mapped_workflow() {
        let (orch, wf) = orchestrator(Arc::new(Fixed(automatable())));
        let out = orch.handle("u1", "每天自動備份", &CollectedReplies::new()).await;
        assert_eq!(
            out,
            RouteOutcome::Escalated {
                workflow: "automation_processor".into()
            }
        );
        assert_eq!(*wf.0.lock().unwrap(), vec!["automation_processor"]);
    }

    #[tokio::test]
    async fn confirmation_parks_until_confirmed() {
        let mut a = automatable();
        a.confirmation_required = true;
        let (orch, wf) = orchestrator(Arc::new(Fixed(a)));
        let replies = CollectedReplies::new();
        let out = orch.handle("u1", "每天自動備份", &replies).await;
        assert!(matches!(out, RouteOutcome::AwaitingConfirmation { .. }));
        assert!(wf.0.lock().unwrap().is_empty());
        assert!(orch.pending("u1").is_some());

        let out = orch.confirm("u1", &replies).await;
        assert!(matches!(out, RouteOutcome::Escalated { .. }));
        assert_eq!(wf.0.lock().unwrap().len(), 1);
        assert!(orch.pending("u1").is_none());
    }

    #[tokio::test]
    async fn cancel_drops_pending() {
        let mut a = automatable();
        a.confirmation_required = true;
        let (orch, wf) = orchestrator(Arc::new(Fixed(a)));
        let replies = CollectedReplies::new();
        orch.handle("u1", "x", &replies).await;
        assert!(matches!(
            orch.cancel("u1", &replies).await,
            RouteOutcome::Handled { .. }
        ));
        assert!(matches!(
            orch.confirm("u1", &replies).await,
            RouteOutcome::Unhandled {
                reason: UnhandledReason::NothingPending
            }
        ));
        assert!(wf.0.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn low_confidence_model_output_is_declined() {
        let mut a = automatable();
        a.confidence = 0.3;
        let (orch, wf) = orchestrator(Arc::new(Fixed(a)));
        let out = orch.handle("u1", "x", &CollectedReplies::new()).await;
        assert_eq!(
            out,
            RouteOutcome::Unhandled {
                reason: UnhandledReason::CannotAutomate
            }
        );
        assert!(wf.0.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn hanging_analyzer_falls_back_to_heuristic() {
        let (orch, _) = orchestrator(Arc::new(Hanging));
        let out = orch
            .handle("u1", "請看 https://example.com", &CollectedReplies::new())
            .await;
        match out {
            RouteOutcome::AwaitingConfirmation { task } => {
                assert_eq!(task.category, TaskCategory::WebScraping);
                assert_eq!(task.parameters["url"], "https://example.com");
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }
}
