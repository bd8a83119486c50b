//! Registration gate: the only place the registry and the router meet.

use crate::config::BotConfig;
use crate::messages;
use crate::registry::{run_blocking, UserRegistry};
use crate::reply::{deliver, ReplyChannel};
use std::sync::Arc;

pub use crate::text::leading_token;

pub struct RegistrationGate {
    registry: Arc<dyn UserRegistry>,
    bot: BotConfig,
}

impl RegistrationGate {
    pub fn new(registry: Arc<dyn UserRegistry>, bot: BotConfig) -> Self {
        Self { registry, bot }
    }

    /// Registered users always pass; anyone may use an allow-listed public command.
    /// The membership check runs on the blocking pool.
    pub async fn may_proceed(&self, user_id: &str, raw_text: &str) -> bool {
        if self.bot.is_public_command(leading_token(raw_text)) {
            return true;
        }
        let id = user_id.to_string();
        match run_blocking(self.registry.clone(), move |r| r.is_registered(&id)).await {
            Ok(registered) => registered,
            Err(e) => {
                tracing::warn!(target: "relay::gate", user_id, error = %e, "registry check failed; treating as unregistered");
                false
            }
        }
    }

    /// [`may_proceed`](Self::may_proceed), sending the registration prompt on refusal.
    pub async fn admit(&self, user_id: &str, raw_text: &str, reply: &dyn ReplyChannel) -> bool {
        if self.may_proceed(user_id, raw_text).await {
            return true;
        }
        tracing::info!(target: "relay::gate", user_id, "unregistered user refused");
        deliver(reply, user_id, messages::REGISTRATION_PROMPT).await;
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RegistryConfig;
    use crate::error::RegistryResult;
    use crate::registry::{
        FileUserRegistry, HealthStatus, NewUser, RegistryStatistics, UserRecord, UserUpdate,
    };
    use crate::reply::CollectedReplies;

    fn gate(dir: &std::path::Path) -> (RegistrationGate, Arc<FileUserRegistry>) {
        let registry = Arc::new(FileUserRegistry::open(&RegistryConfig::in_dir(dir)).unwrap());
        (
            RegistrationGate::new(registry.clone(), BotConfig::default()),
            registry,
        )
    }

    #[tokio::test]
    async fn public_commands_pass_without_registration() {
        let dir = tempfile::tempdir().unwrap();
        let (gate, _) = gate(dir.path());
        assert!(gate.may_proceed("stranger", "/註冊 王小明 ming@example.com").await);
        assert!(gate.may_proceed("stranger", "/help").await);
        assert!(!gate.may_proceed("stranger", "/畫圖 龍").await);
        assert!(!gate.may_proceed("stranger", "你好").await);
    }

    #[tokio::test]
    async fn registered_users_pass() {
        let dir = tempfile::tempdir().unwrap();
        let (gate, registry) = gate(dir.path());
        registry.add(NewUser::new("U1", "Alice")).unwrap();
        assert!(gate.may_proceed("U1", "/畫圖 龍").await);
    }

    /// Holds the registry's write lock until released, like a writer stuck in `sync_all`.
    struct StalledRegistry {
        inner: Arc<FileUserRegistry>,
        release: std::sync::Mutex<std::sync::mpsc::Receiver<()>>,
    }

    impl UserRegistry for StalledRegistry {
        fn add(&self, user: NewUser) -> RegistryResult<UserRecord> {
            self.inner.add(user)
        }
        fn get_by_id(&self, user_id: &str) -> RegistryResult<Option<UserRecord>> {
            self.inner.get_by_id(user_id)
        }
        fn get_by_email(&self, email: &str) -> RegistryResult<Option<UserRecord>> {
            self.inner.get_by_email(email)
        }
        fn get_by_name(&self, name: &str) -> RegistryResult<Option<UserRecord>> {
            self.inner.get_by_name(name)
        }
        fn update(&self, user_id: &str, update: UserUpdate) -> RegistryResult<UserRecord> {
            self.inner.update(user_id, update)
        }
        fn delete(&self, user_id: &str) -> RegistryResult<UserRecord> {
            self.inner.delete(user_id)
        }
        fn search(&self, query: &str) -> RegistryResult<Vec<UserRecord>> {
            self.inner.search(query)
        }
        fn is_registered(&self, user_id: &str) -> RegistryResult<bool> {
            let _ = self.release.lock().unwrap().recv();
            self.inner.is_registered(user_id)
        }
        fn statistics(&self) -> RegistryResult<RegistryStatistics> {
            self.inner.statistics()
        }
        fn health_status(&self) -> RegistryResult<HealthStatus> {
            self.inner.health_status()
        }
        fn export_all(&self) -> RegistryResult<Vec<UserRecord>> {
            self.inner.export_all()
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn slow_membership_check_does_not_block_the_runtime() {
        let dir = tempfile::tempdir().unwrap();
        let (_, inner) = gate(dir.path());
        inner.add(NewUser::new("U1", "Alice")).unwrap();
        let (tx, rx) = std::sync::mpsc::channel();
        let registry = Arc::new(StalledRegistry {
            inner,
            release: std::sync::Mutex::new(rx),
        });
        let gate = Arc::new(RegistrationGate::new(registry, BotConfig::default()));

        let check = tokio::spawn({
            let gate = gate.clone();
            async move { gate.may_proceed("U1", "/畫圖 龍").await }
        });
        // The single runtime thread must stay free to run this task while the check waits.
        let ticked = tokio::spawn(async { tokio::task::yield_now().await }).await;
        assert!(ticked.is_ok());
        tx.send(()).unwrap();
        assert!(check.await.unwrap());
    }

    #[tokio::test]
    async fn refusal_sends_prompt() {
        let dir = tempfile::tempdir().unwrap();
        let (gate, _) = gate(dir.path());
        let replies = CollectedReplies::new();
        assert!(!gate.admit("stranger", "/畫圖 龍", &replies).await);
        assert_eq!(replies.into_texts(), vec![messages::REGISTRATION_PROMPT]);
    }
}
