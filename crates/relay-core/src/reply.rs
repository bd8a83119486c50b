//! Reply transport seam. The platform-specific sender lives outside the core.

use crate::error::CollaboratorError;
use async_trait::async_trait;
use std::sync::Mutex;
use tokio::sync::mpsc;

#[async_trait]
pub trait ReplyChannel: Send + Sync {
    async fn send_text(&self, text: &str) -> Result<(), CollaboratorError>;
}

/// Send a reply, logging (not propagating) transport failures.
pub async fn deliver(channel: &dyn ReplyChannel, user_id: &str, text: &str) {
    if let Err(e) = channel.send_text(text).await {
        tracing::warn!(target: "relay::reply", user_id, error = %e, "reply not delivered");
    }
}

/// Forwards each reply over a channel the moment it is sent. The receiver sees the end of
/// the stream once the channel is dropped.
#[derive(Debug, Clone)]
pub struct ChannelReplies {
    tx: mpsc::UnboundedSender<String>,
}

impl ChannelReplies {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl ReplyChannel for ChannelReplies {
    async fn send_text(&self, text: &str) -> Result<(), CollaboratorError> {
        self.tx
            .send(text.to_string())
            .map_err(|_| CollaboratorError::Transport("reply receiver closed".into()))
    }
}

/// Buffers replies in memory; the gateway returns them in its HTTP response.
#[derive(Debug, Default)]
pub struct CollectedReplies {
    texts: Mutex<Vec<String>>,
}

impl CollectedReplies {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn texts(&self) -> Vec<String> {
        self.texts.lock().map(|t| t.clone()).unwrap_or_default()
    }

    pub fn into_texts(self) -> Vec<String> {
        self.texts.into_inner().unwrap_or_default()
    }
}

#[async_trait]
impl ReplyChannel for CollectedReplies {
    async fn send_text(&self, text: &str) -> Result<(), CollaboratorError> {
        self.texts
            .lock()
            .map_err(|_| CollaboratorError::Transport("reply buffer poisoned".into()))?
            .push(text.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn collects_in_order() {
        let replies = CollectedReplies::new();
        deliver(&replies, "u1", "one").await;
        deliver(&replies, "u1", "two").await;
        assert_eq!(replies.into_texts(), vec!["one", "two"]);
    }

    #[tokio::test]
    async fn channel_forwards_before_the_sender_finishes() {
        let (replies, mut rx) = ChannelReplies::new();
        deliver(&replies, "u1", "first").await;
        assert_eq!(rx.recv().await.as_deref(), Some("first"));
        deliver(&replies, "u1", "second").await;
        drop(replies);
        assert_eq!(rx.recv().await.as_deref(), Some("second"));
        assert!(rx.recv().await.is_none());
    }
}
