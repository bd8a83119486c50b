//! Relay core: tiered intent routing, conversational context, and the durable user registry.
//!
//! An inbound message passes the [`RegistrationGate`], then the [`IntentRouter`] cascade
//! (command table, NLU, language-model fallback). Collaborators (NLU, language model,
//! workflow engine, reply transport) sit behind traits so the gateway can wire real
//! HTTP clients and tests can wire fakes.

pub mod analysis;
pub mod config;
pub mod context;
pub mod error;
pub mod fallback;
pub mod gate;
pub mod llm;
pub mod messages;
pub mod nlu;
pub mod processor;
pub mod registry;
pub mod reply;
pub mod router;
pub mod text;
pub mod workflow;

pub use analysis::{heuristic_analysis, TaskAnalysis, TaskCategory};
pub use config::{BotConfig, CommandEntry, LlmConfig, RegistryConfig, RelayConfig, RouterConfig};
pub use context::{ContextEntry, ContextSet, ContextStore, UserLocks, UserTurn};
pub use error::{CollaboratorError, RegistryError, RegistryResult};
pub use fallback::FallbackOrchestrator;
pub use gate::RegistrationGate;
pub use llm::{HeuristicAnalyzer, OpenAiTaskAnalyzer, TaskAnalyzer};
pub use nlu::{HttpNluClient, IntentDetection, IntentRule, KeywordNlu, NluClient};
pub use processor::{Collaborators, InboundMessage, MessageProcessor, MessageSource};
pub use registry::{
    FileUserRegistry, HealthStatus, LoadOrigin, NewUser, RegistryStatistics, UserRecord,
    UserRegistry, UserStatus, UserUpdate,
};
pub use reply::{ChannelReplies, CollectedReplies, ReplyChannel};
pub use router::{
    CommandKind, IntentKind, IntentRouter, NluMiss, RouteOutcome, RoutingDecision, Tier,
    UnhandledReason,
};
pub use workflow::{WebhookWorkflow, WorkflowEngine, WORKFLOW_SOURCE};

pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
