//! NLU collaborator seam.
//!
//! [`KeywordNlu`] is an explicit rule table (keywords → intent → confidence) that answers
//! locally. [`HttpNluClient`] asks a remote NLU endpoint and degrades to the keyword table
//! when the endpoint is unreachable or returns garbage.

use crate::context::ContextSet;
use crate::error::CollaboratorError;
use crate::text::extract_url;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

pub const UNKNOWN_INTENT: &str = "unknown";

/// Result of one intent detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentDetection {
    pub intent: String,
    pub confidence: f64,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    /// Output context names reported by the NLU service.
    #[serde(default)]
    pub contexts: Vec<String>,
}

impl IntentDetection {
    pub fn unknown() -> Self {
        Self {
            intent: UNKNOWN_INTENT.to_string(),
            confidence: 0.0,
            parameters: Map::new(),
            contexts: Vec::new(),
        }
    }

    pub fn new(intent: impl Into<String>, confidence: f64) -> Self {
        Self {
            intent: intent.into(),
            confidence,
            parameters: Map::new(),
            contexts: Vec::new(),
        }
    }

    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }
}

#[async_trait]
pub trait NluClient: Send + Sync {
    /// Detect the intent of `text` for the session, given the user's live contexts.
    async fn detect_intent(
        &self,
        text: &str,
        session_id: &str,
        contexts: &ContextSet,
    ) -> Result<IntentDetection, CollaboratorError>;
}

// ---------------------------------------------------------------------------
// Keyword policy
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntentRule {
    pub intent: String,
    pub keywords: Vec<String>,
    pub confidence: f64,
}

impl IntentRule {
    pub fn new(intent: &str, keywords: &[&str], confidence: f64) -> Self {
        Self {
            intent: intent.to_string(),
            keywords: keywords.iter().map(|k| k.to_lowercase()).collect(),
            confidence,
        }
    }

    fn matches(&self, lowered: &str) -> bool {
        self.keywords.iter().any(|k| lowered.contains(k.as_str()))
    }
}

const IMAGE_TRIGGERS: [&str; 4] = ["畫圖", "畫", "繪圖", "draw"];
const RSS_CONTEXT: &str = "rss_analysis";

#[derive(Debug, Clone)]
pub struct KeywordNlu {
    rules: Vec<IntentRule>,
}

impl Default for KeywordNlu {
    fn default() -> Self {
        Self::new(vec![
            IntentRule::new("form_filling_intent", &["填表", "表單", "form", "填寫"], 0.9),
            IntentRule::new(
                "image_generation_intent",
                &["畫圖", "繪圖", "圖片", "draw", "image", "生成圖"],
                0.85,
            ),
            IntentRule::new("rss_analysis_intent", &["rss", "分析", "訂閱", "feed", "網址"], 0.8),
            IntentRule::new(
                "status_query_intent",
                &["狀態", "進度", "status", "查詢", "怎麼樣了"],
                0.9,
            ),
            IntentRule::new("help_intent", &["幫助", "說明", "help", "怎麼用", "功能"], 0.95),
            IntentRule::new(
                "greeting_intent",
                &["你好", "hello", "hi", "嗨", "早安", "晚安"],
                0.8,
            ),
            IntentRule::new("cancel_intent", &["取消", "停止", "cancel", "不要", "算了"], 0.9),
        ])
    }
}

impl KeywordNlu {
    pub fn new(rules: Vec<IntentRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[IntentRule] {
        &self.rules
    }

    /// Highest-confidence matching rule wins; ties keep the earlier rule.
    pub fn detect(&self, text: &str, contexts: &ContextSet) -> IntentDetection {
        if contexts.contains_key(RSS_CONTEXT) {
            if let Some(url) = extract_url(text) {
                return IntentDetection::new("rss_analysis_intent", 0.9).with_param("url", url);
            }
        }

        let lowered = text.to_lowercase();
        let best = self
            .rules
            .iter()
            .filter(|rule| rule.matches(&lowered))
            .fold(None::<&IntentRule>, |best, rule| match best {
                Some(b) if b.confidence >= rule.confidence => Some(b),
                _ => Some(rule),
            });

        match best {
            Some(rule) => {
                let mut detection = IntentDetection::new(rule.intent.clone(), rule.confidence);
                detection.parameters = extract_parameters(text, &rule.intent);
                detection
            }
            None => IntentDetection::unknown(),
        }
    }
}

fn extract_parameters(text: &str, intent: &str) -> Map<String, Value> {
    let mut params = Map::new();
    match intent {
        "image_generation_intent" => {
            if let Some((_, rest)) = IMAGE_TRIGGERS
                .iter()
                .find_map(|t| text.split_once(t))
            {
                let prompt = rest.trim();
                if !prompt.is_empty() {
                    params.insert("prompt".to_string(), Value::String(prompt.to_string()));
                }
            }
        }
        "rss_analysis_intent" => {
            if let Some(url) = extract_url(text) {
                params.insert("url".to_string(), Value::String(url));
            }
        }
        _ => {}
    }
    params
}

#[async_trait]
impl NluClient for KeywordNlu {
    async fn detect_intent(
        &self,
        text: &str,
        _session_id: &str,
        contexts: &ContextSet,
    ) -> Result<IntentDetection, CollaboratorError> {
        Ok(self.detect(text, contexts))
    }
}

// ---------------------------------------------------------------------------
// Remote NLU
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct DetectRequest<'a> {
    text: &'a str,
    session_id: &'a str,
    contexts: &'a ContextSet,
}

/// Remote NLU endpoint with a local keyword fallback.
pub struct HttpNluClient {
    url: String,
    client: reqwest::Client,
    fallback: KeywordNlu,
}

impl HttpNluClient {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            url: url.into(),
            client,
            fallback: KeywordNlu::default(),
        }
    }

    pub fn with_fallback(mut self, fallback: KeywordNlu) -> Self {
        self.fallback = fallback;
        self
    }

    async fn remote(
        &self,
        text: &str,
        session_id: &str,
        contexts: &ContextSet,
    ) -> Result<IntentDetection, CollaboratorError> {
        let res = self
            .client
            .post(&self.url)
            .json(&DetectRequest {
                text,
                session_id,
                contexts,
            })
            .send()
            .await?;
        if !res.status().is_success() {
            return Err(CollaboratorError::Status(res.status().as_u16()));
        }
        let detection: IntentDetection = res.json().await?;
        if !detection.confidence.is_finite() {
            return Err(CollaboratorError::Malformed("confidence is not a number".into()));
        }
        Ok(IntentDetection {
            confidence: detection.confidence.clamp(0.0, 1.0),
            ..detection
        })
    }
}

#[async_trait]
impl NluClient for HttpNluClient {
    async fn detect_intent(
        &self,
        text: &str,
        session_id: &str,
        contexts: &ContextSet,
    ) -> Result<IntentDetection, CollaboratorError> {
        match self.remote(text, session_id, contexts).await {
            Ok(detection) => Ok(detection),
            Err(e) => {
                tracing::warn!(target: "relay::nlu", error = %e, url = %self.url, "remote NLU failed, using keyword policy");
                Ok(self.fallback.detect(text, contexts))
            }
        }
    }
}
