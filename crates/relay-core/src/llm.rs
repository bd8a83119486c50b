//! Language-model collaborator for the fallback tier.
//!
//! API key: `llm.api_key`, else `RELAY_LLM_API_KEY` / `OPENAI_API_KEY`. Without a key the
//! gateway wires [`HeuristicAnalyzer`] instead.

use crate::analysis::{heuristic_analysis, parse_model_output, TaskAnalysis};
use crate::config::LlmConfig;
use crate::error::CollaboratorError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[async_trait]
pub trait TaskAnalyzer: Send + Sync {
    /// Analyze a free-form request that no command or intent matched.
    async fn analyze(&self, text: &str) -> Result<TaskAnalysis, CollaboratorError>;
}

/// Keyword/URL heuristic. Never fails.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicAnalyzer;

#[async_trait]
impl TaskAnalyzer for HeuristicAnalyzer {
    async fn analyze(&self, text: &str) -> Result<TaskAnalysis, CollaboratorError> {
        Ok(heuristic_analysis(text))
    }
}

const SYSTEM_PROMPT: &str = "你是一個專業的任務分析器，專門判斷用戶請求是否可以通過自動化流程處理。請嚴格按照JSON格式回應。";

fn analysis_prompt(text: &str) -> String {
    format!(
        r#"你是一個智能任務分析器。用戶的請求無法被預設的指令系統和對話流程處理。
請分析用戶的需求並判斷是否可以執行。

可執行的任務類型包括：
1. 資料分析和處理 (data_analysis)
2. 文檔生成和轉換 (document_processing)
3. 網頁內容抓取和分析 (web_scraping)
4. 表單填寫和資料收集 (form_processing)
5. 狀態查詢和報告生成 (status_reporting)
6. 檔案格式轉換 (file_conversion)
7. 圖片生成和處理 (image_processing)
8. RSS 訂閱源分析 (rss_analysis)
9. 自動化任務和工作流 (automation)
10. 其他合理的數據處理任務 (general_processing)

用戶請求："{text}"

請嚴格以JSON格式回應，不要包含任何其他文字：
{{
  "can_handle": true/false,
  "task_type": "從上述類型中選擇最合適的",
  "task_description": "簡潔的任務描述",
  "parameters": {{"key": "value"}},
  "workflow_suggestion": "建議的工作流類型",
  "user_confirmation_needed": true/false,
  "estimated_time": "預估處理時間",
  "confidence": 0.0-1.0,
  "reason": "分析理由"
}}

如果無法處理，請將 can_handle 設為 false 並在 reason 中說明原因。"#
    )
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Serialize)]
struct ChatMessage {
    role: &'static str,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessageResponse,
}

#[derive(Deserialize)]
struct ChatMessageResponse {
    content: String,
}

/// OpenAI-compatible chat-completions analyzer.
pub struct OpenAiTaskAnalyzer {
    api_url: String,
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl OpenAiTaskAnalyzer {
    /// `None` when no API key is configured.
    pub fn from_config(config: &LlmConfig, timeout: Duration) -> Option<Self> {
        let key = config.api_key.as_deref()?.trim();
        if key.is_empty() {
            return None;
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Some(Self {
            api_url: config.api_url.clone(),
            api_key: key.to_string(),
            model: config.model.clone(),
            client,
        })
    }
}

#[async_trait]
impl TaskAnalyzer for OpenAiTaskAnalyzer {
    async fn analyze(&self, text: &str) -> Result<TaskAnalysis, CollaboratorError> {
        let body = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: analysis_prompt(text),
                },
            ],
            temperature: 0.3,
            max_tokens: 500,
        };

        let res = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;
        if !res.status().is_success() {
            return Err(CollaboratorError::Status(res.status().as_u16()));
        }
        let parsed: ChatResponse = res.json().await?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| CollaboratorError::Malformed("no choices in response".into()))?;

        let analysis = parse_model_output(&content, text)?;
        tracing::debug!(target: "relay::llm", category = ?analysis.category, confidence = analysis.confidence, "model analysis parsed");
        Ok(analysis)
    }
}
