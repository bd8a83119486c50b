//! Task analysis: the structured output of the fallback tier.
//!
//! The schema is validated at the collaborator boundary ([`parse_model_output`]); every
//! optional field has a default so downstream code never sees a missing key. [`validate`]
//! applies the post-processing rules (confidence clamp, URL recovery, workflow mapping) and
//! is idempotent.

use crate::error::CollaboratorError;
use crate::text::extract_url;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Below this, an analysis is never considered automatable.
pub const MIN_CONFIDENCE: f64 = 0.4;

pub const DEFAULT_WORKFLOW: &str = "llm_general_processor";
pub const DEFAULT_ESTIMATED_TIME: &str = "1-3分鐘";

/// Closed set of task categories. Any unrecognized string deserializes to `Unknown`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskCategory {
    DataAnalysis,
    DocumentProcessing,
    WebScraping,
    FormProcessing,
    StatusReporting,
    FileConversion,
    ImageProcessing,
    RssAnalysis,
    Automation,
    GeneralProcessing,
    #[serde(other)]
    Unknown,
}

impl TaskCategory {
    /// Fixed workflow for the category; `None` keeps the suggested workflow.
    pub fn workflow_id(self) -> Option<&'static str> {
        match self {
            TaskCategory::DataAnalysis => Some("data_processor"),
            TaskCategory::DocumentProcessing => Some("document_processor"),
            TaskCategory::WebScraping => Some("web_content_processor"),
            TaskCategory::FormProcessing => Some("form_processor"),
            TaskCategory::RssAnalysis => Some("rss_processor"),
            TaskCategory::ImageProcessing => Some("image_processor"),
            TaskCategory::FileConversion => Some("file_converter"),
            TaskCategory::Automation => Some("automation_processor"),
            TaskCategory::StatusReporting
            | TaskCategory::GeneralProcessing
            | TaskCategory::Unknown => None,
        }
    }

    /// Parameter the category cannot run without, recoverable from the message text.
    pub fn required_parameter(self) -> Option<&'static str> {
        match self {
            TaskCategory::WebScraping | TaskCategory::RssAnalysis => Some("url"),
            _ => None,
        }
    }
}

fn default_workflow() -> Option<String> {
    Some(DEFAULT_WORKFLOW.to_string())
}

fn default_true() -> bool {
    true
}

fn default_estimated_time() -> String {
    DEFAULT_ESTIMATED_TIME.to_string()
}

fn default_confidence() -> f64 {
    0.7
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskAnalysis {
    pub can_handle: bool,
    #[serde(rename = "task_type")]
    pub category: TaskCategory,
    pub task_description: String,
    #[serde(default)]
    pub parameters: Map<String, Value>,
    #[serde(rename = "workflow_suggestion", default = "default_workflow")]
    pub workflow: Option<String>,
    #[serde(rename = "user_confirmation_needed", default = "default_true")]
    pub confirmation_required: bool,
    #[serde(default = "default_estimated_time")]
    pub estimated_time: String,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub original_message: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alternatives: Vec<String>,
}

impl TaskAnalysis {
    /// Workflow to escalate to; the general processor when none was suggested.
    pub fn workflow_or_default(&self) -> &str {
        self.workflow.as_deref().unwrap_or(DEFAULT_WORKFLOW)
    }
}

/// Parse raw model output into a [`TaskAnalysis`]. Tolerates markdown code fences;
/// a missing required field or a non-object payload is `Malformed`.
pub fn parse_model_output(raw: &str, original: &str) -> Result<TaskAnalysis, CollaboratorError> {
    let body = strip_code_fence(raw.trim());
    let mut analysis: TaskAnalysis = serde_json::from_str(body)?;
    analysis.confidence = analysis.confidence.clamp(0.0, 1.0);
    analysis.original_message = Some(original.to_string());
    Ok(analysis)
}

fn strip_code_fence(s: &str) -> &str {
    let Some(rest) = s.strip_prefix("```") else {
        return s;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.strip_suffix("```").unwrap_or(rest).trim()
}

/// Post-process an analysis. Applying it twice yields the same result.
pub fn validate(mut analysis: TaskAnalysis, text: &str) -> TaskAnalysis {
    if analysis.confidence < MIN_CONFIDENCE {
        analysis.can_handle = false;
        analysis.reason = Some("任務識別信心度過低".to_string());
    }

    if let Some(key) = analysis.category.required_parameter() {
        let present = analysis
            .parameters
            .get(key)
            .and_then(Value::as_str)
            .map(|s| !s.is_empty())
            .unwrap_or(false);
        if !present {
            match extract_url(text) {
                Some(url) => {
                    analysis.parameters.insert(key.to_string(), Value::String(url));
                }
                None => {
                    analysis.confirmation_required = true;
                    analysis.reason = Some("需要用戶提供網址".to_string());
                }
            }
        }
    }

    if let Some(workflow) = analysis.category.workflow_id() {
        analysis.workflow = Some(workflow.to_string());
    }

    if analysis.original_message.is_none() {
        analysis.original_message = Some(text.to_string());
    }
    analysis
}

const KEYWORD_CATEGORIES: &[(&str, TaskCategory)] = &[
    ("檔案", TaskCategory::FileConversion),
    ("文檔", TaskCategory::DocumentProcessing),
    ("分析", TaskCategory::DataAnalysis),
    ("轉換", TaskCategory::FileConversion),
    ("報告", TaskCategory::StatusReporting),
    ("整理", TaskCategory::DataAnalysis),
];

/// Deterministic keyword/URL analysis used whenever the language model is unavailable.
pub fn heuristic_analysis(text: &str) -> TaskAnalysis {
    if let Some(url) = extract_url(text) {
        let mut parameters = Map::new();
        parameters.insert("url".to_string(), Value::String(url));
        return TaskAnalysis {
            can_handle: true,
            category: TaskCategory::WebScraping,
            task_description: "網頁內容抓取和分析".to_string(),
            parameters,
            workflow: Some("web_content_processor".to_string()),
            confirmation_required: true,
            estimated_time: "1-2分鐘".to_string(),
            confidence: 0.6,
            reason: Some("檢測到URL，建議網頁處理".to_string()),
            original_message: Some(text.to_string()),
            alternatives: Vec::new(),
        };
    }

    if let Some((keyword, category)) = KEYWORD_CATEGORIES
        .iter()
        .find(|(keyword, _)| text.contains(keyword))
    {
        let mut parameters = Map::new();
        parameters.insert(
            "original_message".to_string(),
            Value::String(text.to_string()),
        );
        return TaskAnalysis {
            can_handle: true,
            category: *category,
            task_description: format!("基於關鍵字 '{keyword}' 的任務處理"),
            parameters,
            workflow: default_workflow(),
            confirmation_required: true,
            estimated_time: default_estimated_time(),
            confidence: 0.5,
            reason: Some(format!("檢測到關鍵字: {keyword}")),
            original_message: Some(text.to_string()),
            alternatives: Vec::new(),
        };
    }

    TaskAnalysis {
        can_handle: false,
        category: TaskCategory::Unknown,
        task_description: "無法識別的任務類型".to_string(),
        parameters: Map::new(),
        workflow: None,
        confirmation_required: false,
        estimated_time: "無法估算".to_string(),
        confidence: 0.1,
        reason: Some("無法識別任務類型，建議使用具體的指令".to_string()),
        original_message: Some(text.to_string()),
        alternatives: vec![
            "嘗試使用 /說明 查看可用功能".to_string(),
            "使用更具體的描述，例如：「分析這個網址的內容」".to_string(),
            "使用指令格式，例如：/分析RSS [網址]".to_string(),
        ],
    }
}
