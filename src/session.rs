use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use moka::future::Cache;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::info;

use crate::{choice::FieldSelection, fieldset::FieldSet};

/// Where a user currently is in the edit flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EditState {
    NoSession,
    AwaitingSelection,
    AwaitingCorrection,
    AwaitingSubmissionResult,
}

/// Per-user edit record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub field_set: Option<FieldSet>,
    pub pending: Option<FieldSelection>,
    pub submitted_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Session {
    pub fn new(field_set: FieldSet) -> Self {
        Self {
            field_set: Some(field_set),
            pending: None,
            submitted_at: None,
            updated_at: Utc::now(),
        }
    }

    pub fn state(&self) -> EditState {
        match (&self.field_set, &self.pending, &self.submitted_at) {
            (None, _, _) => EditState::NoSession,
            (Some(_), Some(_), _) => EditState::AwaitingCorrection,
            (Some(_), None, Some(_)) => EditState::AwaitingSubmissionResult,
            (Some(_), None, None) => EditState::AwaitingSelection,
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// State of a possibly missing session.
pub fn state_of(session: Option<&Session>) -> EditState {
    session.map(Session::state).unwrap_or(EditState::NoSession)
}

/// One lockable slot per user. `None` until a session is created.
pub type SessionEntry = Arc<Mutex<Option<Session>>>;

pub type SessionStore = Arc<dyn SessionStoreType>;

/// Keeps every user's [`Session`]. Implementations must hand out the same
/// [`SessionEntry`] for a user for as long as the user is retained, so that
/// locking the entry serializes all events of that user.
#[async_trait]
pub trait SessionStoreType: Send + Sync + Debug {
    /// Returns a snapshot of the user's session, if any.
    async fn get(&self, user_id: &str) -> Option<Session>;

    /// Replaces the user's session wholesale.
    async fn put(&self, user_id: &str, session: Session);

    /// The lockable slot for `user_id`, created empty on first use.
    async fn entry(&self, user_id: &str) -> SessionEntry;
}

impl dyn SessionStoreType {
    /// Runs `mutator` against a draft of the user's session while holding the
    /// user's lock. The draft is committed only when the mutator returns `Ok`;
    /// on `Err` or panic the stored session is left as it was.
    pub async fn update<F, T, E>(&self, user_id: &str, mutator: F) -> Result<T, E>
    where
        F: FnOnce(&mut Option<Session>) -> Result<T, E>,
    {
        let entry = self.entry(user_id).await;
        let mut slot = entry.lock().await;
        let mut draft = slot.clone();
        let out = mutator(&mut draft)?;
        *slot = draft;
        Ok(out)
    }

    /// Async variant of [`update`](Self::update) for mutators that must await
    /// while the user's lock is held. The mutator gets a copy of the current
    /// session and returns the one to store; on `Err` nothing is stored.
    pub async fn update_async<F, Fut, T, E>(&self, user_id: &str, mutator: F) -> Result<T, E>
    where
        F: FnOnce(Option<Session>) -> Fut,
        Fut: Future<Output = Result<(Option<Session>, T), E>>,
    {
        let entry = self.entry(user_id).await;
        let mut slot = entry.lock().await;
        let (next, out) = mutator(slot.clone()).await?;
        *slot = next;
        Ok(out)
    }
}

#[derive(Clone, Debug)]
pub struct InMemorySessionStore {
    cache: Cache<String, SessionEntry>, // user_id → session slot
}

impl InMemorySessionStore {
    /// Creates a store whose sessions expire after `ttl_secs` without activity.
    pub fn new(ttl_secs: u64) -> Arc<Self> {
        let cache = Cache::builder()
            .time_to_idle(Duration::from_secs(ttl_secs))
            .eviction_listener(|key: Arc<String>, _value: SessionEntry, cause| {
                info!("Session evicted: user={}, cause={:?}", key, cause);
            })
            .build();

        Arc::new(Self { cache })
    }
}

#[async_trait]
impl SessionStoreType for InMemorySessionStore {
    async fn get(&self, user_id: &str) -> Option<Session> {
        let entry = self.cache.get(user_id).await?;
        let slot = entry.lock().await;
        slot.clone()
    }

    async fn put(&self, user_id: &str, session: Session) {
        let entry = self.entry(user_id).await;
        *entry.lock().await = Some(session);
    }

    async fn entry(&self, user_id: &str) -> SessionEntry {
        // get_with coalesces concurrent inserts, so racing callers share one slot
        self.cache
            .get_with(user_id.to_string(), async { Arc::new(Mutex::new(None)) })
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::choice::Aspect;

    fn fields() -> FieldSet {
        [("total", Some("1200"))].into_iter().collect()
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let store: SessionStore = InMemorySessionStore::new(60);
        assert!(store.get("U1").await.is_none());

        store.put("U1", Session::new(fields())).await;
        let session = store.get("U1").await.unwrap();
        assert_eq!(session.field_set, Some(fields()));
        assert_eq!(session.state(), EditState::AwaitingSelection);
    }

    #[tokio::test]
    async fn test_update_commits_on_ok() {
        let store: SessionStore = InMemorySessionStore::new(60);
        store.put("U1", Session::new(fields())).await;

        let state = store
            .update("U1", |slot| {
                let session = slot.as_mut().ok_or("missing")?;
                session.pending = Some(FieldSelection::new("total", Aspect::Value));
                Ok::<_, &str>(session.state())
            })
            .await
            .unwrap();

        assert_eq!(state, EditState::AwaitingCorrection);
        assert_eq!(store.get("U1").await.unwrap().state(), EditState::AwaitingCorrection);
    }

    #[tokio::test]
    async fn test_update_discards_draft_on_err() {
        let store: SessionStore = InMemorySessionStore::new(60);
        store.put("U1", Session::new(fields())).await;

        let result: Result<(), &str> = store
            .update("U1", |slot| {
                if let Some(session) = slot.as_mut() {
                    session.field_set = None;
                }
                Err("abort")
            })
            .await;

        assert_eq!(result, Err("abort"));
        assert_eq!(store.get("U1").await.unwrap().field_set, Some(fields()));
    }

    #[tokio::test]
    async fn test_update_on_unknown_user_keeps_session_absent() {
        let store: SessionStore = InMemorySessionStore::new(60);
        let result: Result<(), &str> = store.update("ghost", |_| Err("no session")).await;
        assert!(result.is_err());
        assert!(store.get("ghost").await.is_none());
    }

    #[tokio::test]
    async fn test_update_async_holds_the_lock() {
        let store: SessionStore = InMemorySessionStore::new(60);
        let out = store
            .update_async("U1", |current| async move {
                assert!(current.is_none());
                tokio::task::yield_now().await;
                Ok::<_, ()>((Some(Session::new(fields())), 7))
            })
            .await
            .unwrap();
        assert_eq!(out, 7);
        assert!(store.get("U1").await.is_some());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_updates_for_same_user_do_not_lose_writes() {
        let store: SessionStore = InMemorySessionStore::new(60);
        store.put("U1", Session::new(FieldSet::new())).await;

        let mut handles = Vec::new();
        for i in 0..50 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .update("U1", |slot| {
                        let fs = slot.as_mut().and_then(|s| s.field_set.as_mut()).ok_or(())?;
                        fs.insert(format!("f{i}"), Some(i.to_string()));
                        Ok::<_, ()>(())
                    })
                    .await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }

        let fs = store.get("U1").await.unwrap().field_set.unwrap();
        assert_eq!(fs.len(), 50);
    }

    #[tokio::test]
    async fn test_update_async_discards_on_err() {
        let store: SessionStore = InMemorySessionStore::new(60);
        store.put("U1", Session::new(fields())).await;

        let result: Result<(), &str> = store
            .update_async("U1", |_current| async { Err("extraction failed") })
            .await;

        assert_eq!(result, Err("extraction failed"));
        assert_eq!(store.get("U1").await.unwrap().field_set, Some(fields()));
    }

    #[test]
    fn test_state_of_missing_session() {
        assert_eq!(state_of(None), EditState::NoSession);
    }
}
