use serde::{Deserialize, Serialize};

/// Handler bound to a command token in the command table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    FormFilling,
    ImageGeneration,
    RssAnalysis,
    StatusQuery,
    CancelTask,
    Help,
    Health,
    Register,
}

impl CommandKind {
    pub fn as_str(self) -> &'static str {
        match self {
            CommandKind::FormFilling => "form_filling",
            CommandKind::ImageGeneration => "image_generation",
            CommandKind::RssAnalysis => "rss_analysis",
            CommandKind::StatusQuery => "status_query",
            CommandKind::CancelTask => "cancel_task",
            CommandKind::Help => "help",
            CommandKind::Health => "health",
            CommandKind::Register => "register",
        }
    }
}
