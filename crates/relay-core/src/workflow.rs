//! Workflow-engine collaborator: fire-and-forget JSON envelopes over HTTP.
//!
//! Envelope: `{source, workflow, timestamp, ...params}`. Delivery outcome is logged only;
//! it never blocks or alters the reply already sent to the user.

use chrono::Utc;
use serde_json::{Map, Value};
use std::time::Duration;

pub const WORKFLOW_SOURCE: &str = "unified_processor";

pub trait WorkflowEngine: Send + Sync {
    /// Schedule `workflow` with `params`. Must return without waiting on the network.
    fn trigger(&self, workflow: &str, params: Map<String, Value>);
}

/// Build the envelope posted to the workflow engine.
pub fn envelope(workflow: &str, params: Map<String, Value>) -> Value {
    let mut body = Map::new();
    body.insert("source".to_string(), Value::String(WORKFLOW_SOURCE.to_string()));
    body.insert("workflow".to_string(), Value::String(workflow.to_string()));
    body.insert(
        "timestamp".to_string(),
        Value::String(Utc::now().to_rfc3339()),
    );
    for (key, value) in params {
        body.entry(key).or_insert(value);
    }
    Value::Object(body)
}

/// Posts envelopes to a webhook. With no URL configured, escalations are logged and dropped.
#[derive(Clone)]
pub struct WebhookWorkflow {
    url: Option<String>,
    client: reqwest::Client,
}

impl WebhookWorkflow {
    pub fn new(url: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self {
            url: url.filter(|u| !u.trim().is_empty()),
            client,
        }
    }

    async fn post(client: reqwest::Client, url: String, workflow: String, body: Value) {
        match client.post(&url).json(&body).send().await {
            Ok(res) if res.status().is_success() => {
                tracing::info!(target: "relay::workflow", workflow = %workflow, status = %res.status(), "workflow triggered");
            }
            Ok(res) => {
                tracing::warn!(target: "relay::workflow", workflow = %workflow, status = %res.status(), "workflow webhook rejected envelope");
            }
            Err(e) => {
                tracing::warn!(target: "relay::workflow", workflow = %workflow, error = %e, "workflow webhook unreachable");
            }
        }
    }
}

impl WorkflowEngine for WebhookWorkflow {
    fn trigger(&self, workflow: &str, params: Map<String, Value>) {
        let Some(url) = self.url.clone() else {
            tracing::info!(target: "relay::workflow", workflow, "no workflow webhook configured; escalation dropped");
            return;
        };
        let body = envelope(workflow, params);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(Self::post(
                    self.client.clone(),
                    url,
                    workflow.to_string(),
                    body,
                ));
            }
            Err(_) => {
                tracing::warn!(target: "relay::workflow", workflow, "no async runtime; escalation dropped");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn envelope_carries_source_and_params() {
        let mut params = Map::new();
        params.insert("user_id".into(), json!("U1"));
        params.insert("source".into(), json!("spoofed"));
        let body = envelope("rss_analysis", params);
        assert_eq!(body["source"], WORKFLOW_SOURCE);
        assert_eq!(body["workflow"], "rss_analysis");
        assert_eq!(body["user_id"], "U1");
        assert!(body["timestamp"].is_string());
    }

    #[tokio::test]
    async fn trigger_without_url_is_a_no_op() {
        WebhookWorkflow::new(None).trigger("status_query", Map::new());
        WebhookWorkflow::new(Some("  ".into())).trigger("status_query", Map::new());
    }
}
