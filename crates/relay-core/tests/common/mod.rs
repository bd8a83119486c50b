//! Recording fakes for the collaborator seams.

#![allow(dead_code)]

use async_trait::async_trait;
use relay_core::{
    CollaboratorError, ContextSet, FileUserRegistry, IntentDetection, NluClient, RegistryConfig,
    TaskAnalysis, TaskAnalyzer, WorkflowEngine,
};
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Returns the same detection every time and counts calls.
pub struct FixedNlu {
    pub detection: IntentDetection,
    pub calls: AtomicUsize,
    pub seen_contexts: Mutex<Vec<ContextSet>>,
}

impl FixedNlu {
    pub fn new(intent: &str, confidence: f64) -> Arc<Self> {
        Arc::new(Self {
            detection: IntentDetection::new(intent, confidence),
            calls: AtomicUsize::new(0),
            seen_contexts: Mutex::new(Vec::new()),
        })
    }

    pub fn with_detection(detection: IntentDetection) -> Arc<Self> {
        Arc::new(Self {
            detection,
            calls: AtomicUsize::new(0),
            seen_contexts: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NluClient for FixedNlu {
    async fn detect_intent(
        &self,
        _text: &str,
        _session_id: &str,
        contexts: &ContextSet,
    ) -> Result<IntentDetection, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen_contexts.lock().unwrap().push(contexts.clone());
        Ok(self.detection.clone())
    }
}

/// Always fails at the transport layer.
pub struct FailingNlu;

#[async_trait]
impl NluClient for FailingNlu {
    async fn detect_intent(
        &self,
        _text: &str,
        _session_id: &str,
        _contexts: &ContextSet,
    ) -> Result<IntentDetection, CollaboratorError> {
        Err(CollaboratorError::Transport("connection refused".into()))
    }
}

/// Never answers; only the router's timeout ends the call.
#[derive(Default)]
pub struct HangingNlu {
    pub calls: AtomicUsize,
}

impl HangingNlu {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NluClient for HangingNlu {
    async fn detect_intent(
        &self,
        _text: &str,
        _session_id: &str,
        _contexts: &ContextSet,
    ) -> Result<IntentDetection, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        std::future::pending().await
    }
}

/// Records every escalation.
#[derive(Default)]
pub struct RecordingWorkflow {
    pub triggered: Mutex<Vec<(String, Map<String, Value>)>>,
}

impl RecordingWorkflow {
    pub fn workflows(&self) -> Vec<String> {
        self.triggered
            .lock()
            .unwrap()
            .iter()
            .map(|(w, _)| w.clone())
            .collect()
    }
}

impl WorkflowEngine for RecordingWorkflow {
    fn trigger(&self, workflow: &str, params: Map<String, Value>) {
        self.triggered
            .lock()
            .unwrap()
            .push((workflow.to_string(), params));
    }
}

/// Fails like an unreachable model endpoint and counts calls.
#[derive(Default)]
pub struct CountingAnalyzer {
    pub calls: AtomicUsize,
}

impl CountingAnalyzer {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TaskAnalyzer for CountingAnalyzer {
    async fn analyze(&self, _text: &str) -> Result<TaskAnalysis, CollaboratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(CollaboratorError::Transport("model endpoint unreachable".into()))
    }
}

pub fn open_registry(dir: &Path) -> Arc<FileUserRegistry> {
    Arc::new(FileUserRegistry::open(&RegistryConfig::in_dir(dir)).unwrap())
}
