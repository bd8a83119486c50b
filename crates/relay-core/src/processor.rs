//! Message processor: group admission → registration gate → intent router, plus postbacks.

use crate::config::{BotConfig, RelayConfig};
use crate::context::ContextStore;
use crate::fallback::FallbackOrchestrator;
use crate::gate::RegistrationGate;
use crate::llm::{HeuristicAnalyzer, OpenAiTaskAnalyzer, TaskAnalyzer};
use crate::messages;
use crate::nlu::{HttpNluClient, KeywordNlu, NluClient};
use crate::registry::UserRegistry;
use crate::reply::{deliver, ReplyChannel};
use crate::router::{IntentRouter, RouteOutcome};
use crate::workflow::{WebhookWorkflow, WorkflowEngine};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageSource {
    #[default]
    Direct,
    Group {
        group_id: String,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    pub user_id: String,
    pub text: String,
    #[serde(default)]
    pub source: MessageSource,
}

impl InboundMessage {
    pub fn direct(user_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            text: text.into(),
            source: MessageSource::Direct,
        }
    }
}

/// External collaborators the processor talks to.
pub struct Collaborators {
    pub nlu: Arc<dyn NluClient>,
    pub analyzer: Arc<dyn TaskAnalyzer>,
    pub workflow: Arc<dyn WorkflowEngine>,
}

impl Collaborators {
    /// HTTP clients where configured, local policies otherwise.
    pub fn from_config(config: &RelayConfig) -> Self {
        let nlu_timeout = Duration::from_secs(config.router.nlu_timeout_secs);
        let llm_timeout = Duration::from_secs(config.router.llm_timeout_secs);

        let nlu: Arc<dyn NluClient> = match config.nlu_url.as_deref().filter(|u| !u.is_empty()) {
            Some(url) => Arc::new(HttpNluClient::new(url, nlu_timeout)),
            None => {
                tracing::info!(target: "relay::processor", "no NLU endpoint configured; using keyword policy");
                Arc::new(KeywordNlu::default())
            }
        };
        let analyzer: Arc<dyn TaskAnalyzer> =
            match OpenAiTaskAnalyzer::from_config(&config.llm, llm_timeout) {
                Some(analyzer) => Arc::new(analyzer),
                None => {
                    tracing::warn!(target: "relay::processor", "no language-model key; fallback tier uses the heuristic");
                    Arc::new(HeuristicAnalyzer)
                }
            };
        let workflow = Arc::new(WebhookWorkflow::new(config.workflow_webhook_url.clone()));
        Self {
            nlu,
            analyzer,
            workflow,
        }
    }
}

pub struct MessageProcessor {
    bot: BotConfig,
    gate: RegistrationGate,
    router: IntentRouter,
    fallback: Arc<FallbackOrchestrator>,
    registry: Arc<dyn UserRegistry>,
}

impl MessageProcessor {
    pub fn new(
        config: &RelayConfig,
        registry: Arc<dyn UserRegistry>,
        collaborators: Collaborators,
    ) -> Self {
        Self::with_contexts(config, registry, Arc::new(ContextStore::new()), collaborators)
    }

    /// Like [`new`](Self::new), sharing an existing context store.
    pub fn with_contexts(
        config: &RelayConfig,
        registry: Arc<dyn UserRegistry>,
        contexts: Arc<ContextStore>,
        collaborators: Collaborators,
    ) -> Self {
        let fallback = Arc::new(FallbackOrchestrator::new(
            collaborators.analyzer,
            collaborators.workflow.clone(),
            Duration::from_secs(config.router.llm_timeout_secs),
        ));
        let router = IntentRouter::new(
            config.router.clone(),
            config.bot.clone(),
            contexts,
            collaborators.nlu,
            fallback.clone(),
            collaborators.workflow,
            registry.clone(),
        );
        Self {
            bot: config.bot.clone(),
            gate: RegistrationGate::new(registry.clone(), config.bot.clone()),
            router,
            fallback,
            registry,
        }
    }

    pub fn from_config(config: &RelayConfig, registry: Arc<dyn UserRegistry>) -> Self {
        Self::new(config, registry, Collaborators::from_config(config))
    }

    pub fn router(&self) -> &IntentRouter {
        &self.router
    }

    pub fn registry(&self) -> &Arc<dyn UserRegistry> {
        &self.registry
    }

    pub async fn handle_message(
        &self,
        message: &InboundMessage,
        reply: &dyn ReplyChannel,
    ) -> RouteOutcome {
        let user_id = message.user_id.as_str();
        let text = match &message.source {
            MessageSource::Group { group_id } => {
                if !self.bot.should_respond_in_group(&message.text) {
                    tracing::debug!(target: "relay::processor", user_id, group_id = %group_id, "group message not addressed to bot");
                    return RouteOutcome::Ignored;
                }
                self.bot.strip_mentions(&message.text)
            }
            MessageSource::Direct => message.text.trim().to_string(),
        };

        if !self.gate.admit(user_id, &text, reply).await {
            return RouteOutcome::RegistrationRequired;
        }
        let outcome = self.router.route(user_id, &text, reply).await;
        tracing::debug!(target: "relay::processor", user_id, outcome = ?outcome, "message processed");
        outcome
    }

    /// Dispatch a postback (`confirm_task` / `cancel_task`); anything else is acknowledged.
    pub async fn handle_postback(
        &self,
        user_id: &str,
        data: &str,
        reply: &dyn ReplyChannel,
    ) -> RouteOutcome {
        match data.trim() {
            "confirm_task" => self.fallback.confirm(user_id, reply).await,
            "cancel_task" => self.fallback.cancel(user_id, reply).await,
            other => {
                deliver(reply, user_id, &messages::postback_ack(other)).await;
                RouteOutcome::Ignored
            }
        }
    }
}
