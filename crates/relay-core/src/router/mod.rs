//! Tiered intent router.
//!
//! Every message runs the cascade in strict order and stops at the first tier that claims it:
//!
//! 1. **Command**: text starting with the command prefix. Known tokens dispatch to their
//!    handler; unknown tokens end the cycle with an "unknown command" notice.
//! 2. **Intent**: the user's contexts decay one turn, the survivors go to the NLU with the
//!    text, and a detection strictly above the acceptance threshold dispatches to its handler.
//! 3. **Fallback**: everything else goes to the [`FallbackOrchestrator`].
//!
//! Decay, read, and context writes for one user run under that user's lock.

mod commands;
mod intents;

pub use commands::CommandKind;
pub use intents::IntentKind;

use crate::analysis::TaskAnalysis;
use crate::config::{BotConfig, RouterConfig};
use crate::context::{ContextStore, UserLocks};
use crate::fallback::FallbackOrchestrator;
use crate::messages;
use crate::nlu::{IntentDetection, NluClient};
use crate::registry::{run_blocking, NewUser, UserRegistry};
use crate::reply::{deliver, ReplyChannel};
use crate::text::{extract_url, split_command};
use crate::workflow::WorkflowEngine;
use serde::Serialize;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Decisions and outcomes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    Command,
    Intent,
    Fallback,
}

/// What a tier decided about a message, before any handler runs.
#[derive(Debug, Clone, PartialEq)]
pub enum RoutingDecision {
    CommandMatch {
        command: String,
        args: Vec<String>,
    },
    IntentMatch {
        intent: String,
        confidence: f64,
        parameters: Map<String, Value>,
    },
    Unhandled,
}

impl RoutingDecision {
    /// Tier-1 decision: `CommandMatch` for any prefixed text, known or not.
    pub fn from_text(text: &str, prefix: &str) -> Self {
        if prefix.is_empty() || !text.starts_with(prefix) {
            return RoutingDecision::Unhandled;
        }
        let (command, args) = split_command(text);
        RoutingDecision::CommandMatch { command, args }
    }

    /// Tier-2 decision: a detection at or below `threshold` is `Unhandled`.
    pub fn from_detection(detection: IntentDetection, threshold: f64) -> Self {
        if detection.confidence > threshold {
            RoutingDecision::IntentMatch {
                intent: detection.intent,
                confidence: detection.confidence,
                parameters: detection.parameters,
            }
        } else {
            RoutingDecision::Unhandled
        }
    }
}

/// Why tier 2 did not claim a message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum NluMiss {
    /// Collaborator error or timeout.
    NluError,
    LowConfidence { intent: String, confidence: f64 },
    UnroutableIntent { intent: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnhandledReason {
    CannotAutomate,
    EmptyMessage,
    NothingPending,
}

/// Terminal result of one message-processing cycle.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RouteOutcome {
    Handled { tier: Tier },
    Escalated { workflow: String },
    AwaitingConfirmation { task: TaskAnalysis },
    UnknownCommand { command: String },
    Unhandled { reason: UnhandledReason },
    RegistrationRequired,
    Ignored,
}

impl RouteOutcome {
    pub fn is_handled(&self) -> bool {
        matches!(
            self,
            RouteOutcome::Handled { .. }
                | RouteOutcome::Escalated { .. }
                | RouteOutcome::AwaitingConfirmation { .. }
        )
    }
}

fn params<const N: usize>(pairs: [(&str, Value); N]) -> Map<String, Value> {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect()
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub struct IntentRouter {
    config: RouterConfig,
    bot: BotConfig,
    contexts: Arc<ContextStore>,
    locks: UserLocks,
    nlu: Arc<dyn NluClient>,
    fallback: Arc<FallbackOrchestrator>,
    workflow: Arc<dyn WorkflowEngine>,
    registry: Arc<dyn UserRegistry>,
}

impl IntentRouter {
    pub fn new(
        config: RouterConfig,
        bot: BotConfig,
        contexts: Arc<ContextStore>,
        nlu: Arc<dyn NluClient>,
        fallback: Arc<FallbackOrchestrator>,
        workflow: Arc<dyn WorkflowEngine>,
        registry: Arc<dyn UserRegistry>,
    ) -> Self {
        Self {
            config,
            bot,
            contexts,
            locks: UserLocks::new(),
            nlu,
            fallback,
            workflow,
            registry,
        }
    }

    pub fn contexts(&self) -> &Arc<ContextStore> {
        &self.contexts
    }

    pub fn config(&self) -> &RouterConfig {
        &self.config
    }

    /// Route one message through the cascade. Never fails: collaborator errors degrade
    /// to the next tier.
    pub async fn route(&self, user_id: &str, text: &str, reply: &dyn ReplyChannel) -> RouteOutcome {
        let _turn = self.locks.acquire(user_id).await;
        let text = text.trim();
        if text.is_empty() {
            deliver(reply, user_id, messages::EMPTY_MESSAGE).await;
            return RouteOutcome::Unhandled {
                reason: UnhandledReason::EmptyMessage,
            };
        }

        if let RoutingDecision::CommandMatch { command, args } =
            RoutingDecision::from_text(text, &self.config.command_prefix)
        {
            let Some(kind) = self.config.command(&command) else {
                tracing::info!(target: "relay::router", user_id, command = %command, "unknown command");
                deliver(reply, user_id, &messages::unknown_command(&command)).await;
                return RouteOutcome::UnknownCommand { command };
            };
            tracing::info!(target: "relay::router", user_id, command = kind.as_str(), "tier 1: command");
            return self.run_command(kind, user_id, &args, reply).await;
        }

        match self.detect(user_id, text).await {
            Ok((kind, confidence, parameters)) => {
                tracing::info!(target: "relay::router", user_id, intent = ?kind, confidence, "tier 2: intent");
                self.run_intent(kind, user_id, parameters, reply).await;
                RouteOutcome::Handled { tier: Tier::Intent }
            }
            Err(miss) => {
                tracing::info!(target: "relay::router", user_id, miss = ?miss, "tier 3: fallback");
                self.fallback.handle(user_id, text, reply).await
            }
        }
    }

    /// Tier 2: decay, read contexts, ask the NLU, apply the threshold.
    async fn detect(
        &self,
        user_id: &str,
        text: &str,
    ) -> Result<(IntentKind, f64, Map<String, Value>), NluMiss> {
        self.contexts.decay(user_id);
        let contexts = self.contexts.contexts(user_id);
        let limit = Duration::from_secs(self.config.nlu_timeout_secs);

        let detection =
            match tokio::time::timeout(limit, self.nlu.detect_intent(text, user_id, &contexts))
                .await
            {
                Ok(Ok(detection)) => detection,
                Ok(Err(e)) => {
                    tracing::warn!(target: "relay::router", user_id, error = %e, "NLU failed");
                    return Err(NluMiss::NluError);
                }
                Err(_) => {
                    tracing::warn!(target: "relay::router", user_id, timeout = ?limit, "NLU timed out");
                    return Err(NluMiss::NluError);
                }
            };

        let (intent, confidence) = (detection.intent.clone(), detection.confidence);
        match RoutingDecision::from_detection(detection, self.config.acceptance_threshold) {
            RoutingDecision::IntentMatch {
                intent,
                confidence,
                parameters,
            } => match IntentKind::from_name(&intent) {
                Some(kind) => Ok((kind, confidence, parameters)),
                None => Err(NluMiss::UnroutableIntent { intent }),
            },
            _ => Err(NluMiss::LowConfidence { intent, confidence }),
        }
    }

    async fn run_command(
        &self,
        kind: CommandKind,
        user_id: &str,
        args: &[String],
        reply: &dyn ReplyChannel,
    ) -> RouteOutcome {
        match kind {
            CommandKind::FormFilling => self.form(user_id, reply).await,
            CommandKind::ImageGeneration => {
                let prompt = args.join(" ");
                self.image(user_id, &prompt, reply).await;
            }
            CommandKind::RssAnalysis => match extract_url(&args.join(" ")) {
                Some(url) => self.rss(user_id, &url, reply).await,
                None => deliver(reply, user_id, messages::RSS_USAGE).await,
            },
            CommandKind::StatusQuery => self.status(user_id, reply).await,
            CommandKind::CancelTask => self.cancel(user_id, reply).await,
            CommandKind::Help => deliver(reply, user_id, messages::HELP).await,
            CommandKind::Health => self.health(user_id, reply).await,
            CommandKind::Register => self.register(user_id, args, reply).await,
        }
        RouteOutcome::Handled {
            tier: Tier::Command,
        }
    }

    async fn run_intent(
        &self,
        kind: IntentKind,
        user_id: &str,
        parameters: Map<String, Value>,
        reply: &dyn ReplyChannel,
    ) {
        let param = |key: &str| {
            parameters
                .get(key)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };
        match kind {
            IntentKind::FormFilling => self.form(user_id, reply).await,
            IntentKind::ImageGeneration => {
                if let Some((name, lifespan)) = kind.context_policy() {
                    self.contexts
                        .set_context(user_id, name, parameters.clone(), lifespan);
                }
                let prompt = param("prompt").unwrap_or_default();
                self.image(user_id, &prompt, reply).await;
            }
            IntentKind::RssAnalysis => match param("url") {
                Some(url) => {
                    self.contexts.clear_context(user_id, Some("rss_analysis"));
                    self.rss(user_id, &url, reply).await;
                }
                None => {
                    if let Some((name, lifespan)) = kind.context_policy() {
                        self.contexts
                            .set_context(user_id, name, parameters.clone(), lifespan);
                    }
                    deliver(reply, user_id, messages::RSS_ASK_URL).await;
                }
            },
            IntentKind::StatusQuery => self.status(user_id, reply).await,
            IntentKind::Help => deliver(reply, user_id, messages::HELP).await,
            IntentKind::Greeting => deliver(reply, user_id, messages::GREETING).await,
            IntentKind::Cancel => self.cancel(user_id, reply).await,
        }
    }

    // -- handlers ----------------------------------------------------------

    async fn form(&self, user_id: &str, reply: &dyn ReplyChannel) {
        if let Some((name, lifespan)) = IntentKind::FormFilling.context_policy() {
            self.contexts.set_context(user_id, name, Map::new(), lifespan);
        }
        let link = self.bot.form_link(user_id, "form");
        deliver(reply, user_id, &messages::form_link(&link)).await;
    }

    async fn image(&self, user_id: &str, prompt: &str, reply: &dyn ReplyChannel) {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            deliver(reply, user_id, messages::IMAGE_USAGE).await;
            return;
        }
        deliver(reply, user_id, messages::IMAGE_STARTED).await;
        self.workflow.trigger(
            "image_generation",
            params([
                ("user_id", Value::from(user_id)),
                ("prompt", Value::from(prompt)),
            ]),
        );
    }

    async fn rss(&self, user_id: &str, url: &str, reply: &dyn ReplyChannel) {
        deliver(reply, user_id, &messages::rss_started(url)).await;
        self.workflow.trigger(
            "rss_analysis",
            params([("url", Value::from(url)), ("user_id", Value::from(user_id))]),
        );
    }

    async fn status(&self, user_id: &str, reply: &dyn ReplyChannel) {
        deliver(reply, user_id, messages::STATUS_QUERY).await;
        self.workflow
            .trigger("status_query", params([("user_id", Value::from(user_id))]));
    }

    async fn cancel(&self, user_id: &str, reply: &dyn ReplyChannel) {
        self.contexts.clear_context(user_id, None);
        self.fallback.cancel_pending(user_id);
        deliver(reply, user_id, messages::CANCELLED).await;
    }

    async fn health(&self, user_id: &str, reply: &dyn ReplyChannel) {
        let text = match run_blocking(self.registry.clone(), |r| r.health_status()).await {
            Ok(h) => messages::health(h.healthy, h.total_users, h.backup_count),
            Err(e) => {
                tracing::error!(target: "relay::router", error = %e, "health check failed");
                messages::health(false, 0, 0)
            }
        };
        deliver(reply, user_id, &text).await;
    }

    async fn register(&self, user_id: &str, args: &[String], reply: &dyn ReplyChannel) {
        let (name, email) = match args {
            [name, email, ..] if email.contains('@') => (name.clone(), email.clone()),
            _ => {
                deliver(reply, user_id, messages::REGISTER_USAGE).await;
                return;
            }
        };
        let user = NewUser::new(user_id, name).email(email);
        let text = match run_blocking(self.registry.clone(), move |r| r.add(user)).await {
            Ok(record) => messages::registered(&record.name),
            Err(e) => {
                tracing::warn!(target: "relay::router", user_id, error = %e, "registration failed");
                messages::registration_failed()
            }
        };
        deliver(reply, user_id, &text).await;
    }
}
