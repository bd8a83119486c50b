//! Relay configuration loaded from an optional TOML file and the environment.
//!
//! | Source | Example | Notes |
//! |--------|---------|-------|
//! | `RELAY_CONFIG` | `config/relay` | Path (without extension) of an optional config file. |
//! | `RELAY__ROUTER__ACCEPTANCE_THRESHOLD` | `0.7` | Any field, nested with `__`. |
//! | `OPENAI_API_KEY` / `RELAY_LLM_API_KEY` | `sk-...` | Language-model key when `llm.api_key` is unset. |
//!
//! Every field has a default, so an empty environment yields a working configuration
//! (keyword NLU, heuristic fallback, no workflow webhook).

use crate::router::CommandKind;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

fn default_app_name() -> String {
    "Relay".to_string()
}

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}

fn default_backup_interval_hours() -> u64 {
    24
}

fn default_backup_retention() -> usize {
    10
}

fn default_command_prefix() -> String {
    "/".to_string()
}

fn default_acceptance_threshold() -> f64 {
    0.7
}

fn default_nlu_timeout_secs() -> u64 {
    5
}

fn default_llm_timeout_secs() -> u64 {
    10
}

fn default_llm_api_url() -> String {
    "https://api.openai.com/v1/chat/completions".to_string()
}

fn default_llm_model() -> String {
    "gpt-3.5-turbo".to_string()
}

fn default_bot_name() -> String {
    "視覺設計組".to_string()
}

fn default_form_url() -> String {
    "https://form.typeform.com/to/q1Ih9jmJ".to_string()
}

fn default_extra_mentions() -> Vec<String> {
    vec!["@視覺設計組".to_string(), "@assistant".to_string()]
}

fn default_public_commands() -> Vec<String> {
    ["/health", "/健康檢查", "/註冊", "/help", "/說明"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_group_commands() -> Vec<String> {
    ["/health", "/健康檢查", "/help", "/說明"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// One row of the command table.
///
/// Stored as a list rather than a map: the `config` crate lowercases map keys, and command
/// tokens such as `/分析RSS` are matched exactly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandEntry {
    pub token: String,
    pub kind: CommandKind,
}

impl CommandEntry {
    pub fn new(token: impl Into<String>, kind: CommandKind) -> Self {
        Self {
            token: token.into(),
            kind,
        }
    }
}

/// Default command table: token → handler.
pub fn default_commands() -> Vec<CommandEntry> {
    [
        ("/填表", CommandKind::FormFilling),
        ("/填表單", CommandKind::FormFilling),
        ("/畫圖", CommandKind::ImageGeneration),
        ("/分析RSS", CommandKind::RssAnalysis),
        ("/查詢狀態", CommandKind::StatusQuery),
        ("/取消任務", CommandKind::CancelTask),
        ("/說明", CommandKind::Help),
        ("/幫助", CommandKind::Help),
        ("/help", CommandKind::Help),
        ("/health", CommandKind::Health),
        ("/健康檢查", CommandKind::Health),
        ("/註冊", CommandKind::Register),
    ]
    .into_iter()
    .map(|(token, kind)| CommandEntry::new(token, kind))
    .collect()
}

/// Top-level configuration for the core and the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default = "default_app_name")]
    pub app_name: String,
    /// Gateway listen address.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    #[serde(default)]
    pub registry: RegistryConfig,
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub bot: BotConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    /// NLU endpoint. Unset: the keyword policy answers locally.
    #[serde(default)]
    pub nlu_url: Option<String>,
    /// Workflow engine webhook. Unset: escalations are logged and dropped.
    #[serde(default)]
    pub workflow_webhook_url: Option<String>,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            app_name: default_app_name(),
            bind_addr: default_bind_addr(),
            registry: RegistryConfig::default(),
            router: RouterConfig::default(),
            bot: BotConfig::default(),
            llm: LlmConfig::default(),
            nlu_url: None,
            workflow_webhook_url: None,
        }
    }
}

impl RelayConfig {
    /// Load config from file and environment. Precedence: env `RELAY__*` > `RELAY_CONFIG` file > defaults.
    pub fn load() -> Result<Self, config::ConfigError> {
        let config_path =
            std::env::var("RELAY_CONFIG").unwrap_or_else(|_| "config/relay".to_string());
        let built = config::Config::builder()
            .add_source(config::File::with_name(&config_path).required(false))
            .add_source(
                config::Environment::with_prefix("RELAY")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        let mut cfg: RelayConfig = built.try_deserialize()?;
        if cfg.llm.api_key.is_none() {
            cfg.llm.api_key =
                env_opt_string("RELAY_LLM_API_KEY").or_else(|| env_opt_string("OPENAI_API_KEY"));
        }
        Ok(cfg)
    }
}

/// File-backed registry location and backup policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// Root data directory; the canonical document lives in `users/`, backups in `backups/`.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Minimum age of the newest backup before another is taken. 0 = back up on every write.
    #[serde(default = "default_backup_interval_hours")]
    pub backup_interval_hours: u64,
    /// Number of newest backups kept.
    #[serde(default = "default_backup_retention")]
    pub backup_retention: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            backup_interval_hours: default_backup_interval_hours(),
            backup_retention: default_backup_retention(),
        }
    }
}

impl RegistryConfig {
    pub fn in_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }
}

/// Router thresholds, timeouts, and the command table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
    #[serde(default = "default_command_prefix")]
    pub command_prefix: String,
    /// NLU confidence must be strictly greater than this to be routed in tier 2.
    #[serde(default = "default_acceptance_threshold")]
    pub acceptance_threshold: f64,
    #[serde(default = "default_nlu_timeout_secs")]
    pub nlu_timeout_secs: u64,
    #[serde(default = "default_llm_timeout_secs")]
    pub llm_timeout_secs: u64,
    #[serde(default = "default_commands")]
    pub commands: Vec<CommandEntry>,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            command_prefix: default_command_prefix(),
            acceptance_threshold: default_acceptance_threshold(),
            nlu_timeout_secs: default_nlu_timeout_secs(),
            llm_timeout_secs: default_llm_timeout_secs(),
            commands: default_commands(),
        }
    }
}

impl RouterConfig {
    /// Exact-match lookup of a command token. The first entry for a token wins.
    pub fn command(&self, token: &str) -> Option<CommandKind> {
        self.commands
            .iter()
            .find(|entry| entry.token == token)
            .map(|entry| entry.kind)
    }
}

/// Bot identity, mention handling, and the static command allow-lists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BotConfig {
    #[serde(default = "default_bot_name")]
    pub bot_name: String,
    /// Mentions accepted in addition to `@{bot_name}`.
    #[serde(default = "default_extra_mentions")]
    pub extra_mentions: Vec<String>,
    /// Commands usable without registration.
    #[serde(default = "default_public_commands")]
    pub public_commands: Vec<String>,
    /// Commands answered in group chats without a mention.
    #[serde(default = "default_group_commands")]
    pub group_commands: Vec<String>,
    /// Form link sent by the form-filling handler; the user id is appended as a fragment.
    #[serde(default = "default_form_url")]
    pub form_url: String,
}

impl Default for BotConfig {
    fn default() -> Self {
        Self {
            bot_name: default_bot_name(),
            extra_mentions: default_extra_mentions(),
            public_commands: default_public_commands(),
            group_commands: default_group_commands(),
            form_url: default_form_url(),
        }
    }
}

impl BotConfig {
    pub fn mention_patterns(&self) -> Vec<String> {
        let mut patterns = vec![format!("@{}", self.bot_name)];
        for extra in &self.extra_mentions {
            if !patterns.contains(extra) {
                patterns.push(extra.clone());
            }
        }
        patterns
    }

    pub fn is_mentioned(&self, text: &str) -> bool {
        self.mention_patterns().iter().any(|p| text.contains(p.as_str()))
    }

    pub fn strip_mentions(&self, text: &str) -> String {
        let mut out = text.to_string();
        for pattern in self.mention_patterns() {
            out = out.replace(pattern.as_str(), "");
        }
        out.trim().to_string()
    }

    pub fn is_public_command(&self, token: &str) -> bool {
        self.public_commands.iter().any(|c| c == token)
    }

    pub fn is_group_command(&self, token: &str) -> bool {
        self.group_commands.iter().any(|c| c == token)
    }

    /// Group chats: answer only when mentioned or for a group-allowed command.
    pub fn should_respond_in_group(&self, text: &str) -> bool {
        self.is_mentioned(text) || self.is_group_command(crate::text::leading_token(text))
    }

    pub fn form_link(&self, user_id: &str, category: &str) -> String {
        format!("{}#userid={}&category={}", self.form_url, user_id, category)
    }
}

/// OpenAI-compatible chat completion endpoint used by the fallback tier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    #[serde(default = "default_llm_api_url")]
    pub api_url: String,
    #[serde(default = "default_llm_model")]
    pub model: String,
    /// Never serialized back out.
    #[serde(default, skip_serializing)]
    pub api_key: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_url: default_llm_api_url(),
            model: default_llm_model(),
            api_key: None,
        }
    }
}

fn env_opt_string(name: &str) -> Option<String> {
    std::env::var(name)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_standard_router() {
        let cfg = RelayConfig::default();
        assert_eq!(cfg.router.acceptance_threshold, 0.7);
        assert_eq!(cfg.router.command_prefix, "/");
        assert_eq!(cfg.router.command("/畫圖"), Some(CommandKind::ImageGeneration));
        assert_eq!(cfg.router.command("/分析RSS"), Some(CommandKind::RssAnalysis));
        assert_eq!(cfg.router.command("/分析rss"), None);
        assert_eq!(cfg.registry.backup_retention, 10);
    }

    #[test]
    fn group_rules() {
        let bot = BotConfig::default();
        assert!(bot.should_respond_in_group("@視覺設計組 你好"));
        assert!(bot.should_respond_in_group("@assistant /健康檢查"));
        assert!(bot.should_respond_in_group("/health"));
        assert!(!bot.should_respond_in_group("/填表"));
        assert!(!bot.should_respond_in_group("@bot 你好"));
        assert!(!bot.should_respond_in_group("誰可以幫我填表？"));
        assert_eq!(bot.strip_mentions("@視覺設計組 /填表"), "/填表");
    }

    #[test]
    fn public_commands_allow_registration() {
        let bot = BotConfig::default();
        assert!(bot.is_public_command("/註冊"));
        assert!(!bot.is_public_command("/畫圖"));
    }

    #[test]
    fn config_file_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.toml");
        std::fs::write(
            &path,
            "app_name = \"Test\"\n[router]\nacceptance_threshold = 0.8\n",
        )
        .unwrap();
        let built = config::Config::builder()
            .add_source(config::File::from(path.as_path()))
            .build()
            .unwrap();
        let cfg: RelayConfig = built.try_deserialize().unwrap();
        assert_eq!(cfg.app_name, "Test");
        assert_eq!(cfg.router.acceptance_threshold, 0.8);
        assert_eq!(cfg.router.nlu_timeout_secs, 5);
        assert!(cfg.router.command("/填表").is_some());
    }

    #[test]
    fn file_command_table_keeps_token_case() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relay.toml");
        std::fs::write(
            &path,
            "[[router.commands]]\ntoken = \"/分析RSS\"\nkind = \"rss_analysis\"\n\n\
             [[router.commands]]\ntoken = \"/Help\"\nkind = \"help\"\n",
        )
        .unwrap();
        let built = config::Config::builder()
            .add_source(config::File::from(path.as_path()))
            .build()
            .unwrap();
        let cfg: RelayConfig = built.try_deserialize().unwrap();
        assert_eq!(cfg.router.commands.len(), 2);
        assert_eq!(cfg.router.command("/分析RSS"), Some(CommandKind::RssAnalysis));
        assert_eq!(cfg.router.command("/Help"), Some(CommandKind::Help));
        assert_eq!(cfg.router.command("/分析rss"), None);
    }
}
