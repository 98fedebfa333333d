//! Periodic finalisation of stale upload sessions.
//!
//! Every upload that is not `PROCESSED` is visited under a per-session lock.
//! Expired sessions are deleted (together with the importer session when a
//! client is configured); live ones are advanced from the importer's state.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::mpsc;
use uuid::Uuid;

use geonode_core::models::{Upload, UploadState};
use geonode_db::UploadRepository;

use crate::error::UploadResult;

/// Session states reported by the importer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportSessionState {
    Pending,
    Ready,
    Init,
    Running,
    Complete,
    Error,
    BadFormat,
    Canceled,
    NoCrs,
    NoBounds,
    NoFormat,
}

impl ImportSessionState {
    pub fn parse(state: &str) -> Option<Self> {
        match state.to_ascii_uppercase().as_str() {
            "PENDING" => Some(Self::Pending),
            "READY" => Some(Self::Ready),
            "INIT" => Some(Self::Init),
            "RUNNING" => Some(Self::Running),
            "COMPLETE" => Some(Self::Complete),
            "ERROR" => Some(Self::Error),
            "BAD_FORMAT" => Some(Self::BadFormat),
            "CANCELED" | "CANCELLED" => Some(Self::Canceled),
            "NO_CRS" => Some(Self::NoCrs),
            "NO_BOUNDS" => Some(Self::NoBounds),
            "NO_FORMAT" => Some(Self::NoFormat),
            _ => None,
        }
    }

    /// Upload state a session in this importer state moves to.
    pub fn upload_state(self) -> UploadState {
        match self {
            Self::Complete => UploadState::Processed,
            Self::Running => UploadState::Running,
            Self::Pending | Self::Ready | Self::Init => UploadState::Waiting,
            Self::Error
            | Self::BadFormat
            | Self::Canceled
            | Self::NoCrs
            | Self::NoBounds
            | Self::NoFormat => UploadState::Invalid,
        }
    }
}

/// Importer REST API as seen by the sweeper.
#[async_trait]
pub trait ImportSessionClient: Send + Sync {
    /// `None` when the importer no longer knows the session.
    async fn session_state(&self, import_id: i64) -> anyhow::Result<Option<ImportSessionState>>;

    async fn delete_session(&self, import_id: i64) -> anyhow::Result<()>;
}

/// Set of ids currently held. Acquisition never waits.
#[derive(Debug, Default)]
pub struct KeyedLock {
    held: Mutex<HashSet<Uuid>>,
}

pub struct KeyedLockGuard<'a> {
    lock: &'a KeyedLock,
    key: Uuid,
}

impl KeyedLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_acquire(&self, key: Uuid) -> Option<KeyedLockGuard<'_>> {
        let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        held.insert(key).then(|| KeyedLockGuard { lock: self, key })
    }

    pub fn is_held(&self, key: Uuid) -> bool {
        self.held
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(&key)
    }
}

impl Drop for KeyedLockGuard<'_> {
    fn drop(&mut self) {
        self.lock
            .held
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.key);
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub deleted: usize,
    pub updated: usize,
    pub skipped: usize,
    pub failed: usize,
}

pub struct SessionSweeper {
    uploads: Arc<dyn UploadRepository>,
    client: Option<Arc<dyn ImportSessionClient>>,
    expiry_hours: i64,
    locks: Arc<KeyedLock>,
}

impl SessionSweeper {
    pub fn new(
        uploads: Arc<dyn UploadRepository>,
        client: Option<Arc<dyn ImportSessionClient>>,
        expiry_hours: i64,
    ) -> Self {
        Self {
            uploads,
            client,
            expiry_hours,
            locks: Arc::new(KeyedLock::new()),
        }
    }

    pub fn locks(&self) -> &Arc<KeyedLock> {
        &self.locks
    }

    #[tracing::instrument(skip(self))]
    pub async fn finalize_incomplete_session_uploads(&self) -> UploadResult<SweepReport> {
        let start = std::time::Instant::now();
        let now = Utc::now();
        let mut report = SweepReport::default();

        for upload in self.uploads.list_unprocessed().await? {
            // Repositories may hand back PROCESSED rows written since the query.
            if upload.is_processed() {
                continue;
            }
            let Some(_guard) = self.locks.try_acquire(upload.id) else {
                report.skipped += 1;
                continue;
            };
            let id = upload.id;
            let result = if upload.is_expired(now, self.expiry_hours) {
                self.delete_session(upload).await.map(|_| report.deleted += 1)
            } else {
                self.refresh_session(upload).await.map(|changed| {
                    if changed {
                        report.updated += 1;
                    }
                })
            };
            if let Err(e) = result {
                report.failed += 1;
                tracing::warn!(upload_id = %id, error = %e, "Upload session finalisation failed");
            }
        }

        tracing::info!(
            deleted = report.deleted,
            updated = report.updated,
            skipped = report.skipped,
            failed = report.failed,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Upload session sweep finished"
        );
        Ok(report)
    }

    async fn delete_session(&self, upload: Upload) -> anyhow::Result<()> {
        if let (Some(client), Some(import_id)) = (&self.client, upload.import_id) {
            if let Err(e) = client.delete_session(import_id).await {
                tracing::warn!(upload_id = %upload.id, import_id, error = %e, "Importer session not deleted");
            }
        }
        self.uploads.delete(upload.id).await?;
        tracing::debug!(upload_id = %upload.id, "Expired upload session deleted");
        Ok(())
    }

    /// Returns whether the stored state changed.
    async fn refresh_session(&self, mut upload: Upload) -> anyhow::Result<bool> {
        let (Some(client), Some(import_id)) = (&self.client, upload.import_id) else {
            return Ok(false);
        };
        let state = match client.session_state(import_id).await? {
            Some(state) => state.upload_state(),
            None => UploadState::Invalid,
        };
        if state == upload.state {
            return Ok(false);
        }
        tracing::debug!(upload_id = %upload.id, from = %upload.state, to = %state, "Upload session advanced");
        upload.state = state;
        upload.complete = state == UploadState::Processed;
        self.uploads.update(upload).await?;
        Ok(true)
    }

    /// Run the sweep every `interval` until the returned sender is dropped or
    /// signalled.
    pub fn start(self: Arc<Self>, interval: Duration) -> mpsc::Sender<()> {
        let (shutdown_tx, mut shutdown_rx) = mpsc::channel::<()>(1);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        tracing::info!("Upload session sweeper stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = self.finalize_incomplete_session_uploads().await {
                            tracing::error!(error = %e, "Upload session sweep failed");
                        }
                    }
                }
            }
        });
        shutdown_tx
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geonode_db::InMemoryUploadRepository;
    use std::collections::HashMap;

    struct StaticClient {
        states: HashMap<i64, ImportSessionState>,
    }

    #[async_trait]
    impl ImportSessionClient for StaticClient {
        async fn session_state(&self, import_id: i64) -> anyhow::Result<Option<ImportSessionState>> {
            Ok(self.states.get(&import_id).copied())
        }

        async fn delete_session(&self, _import_id: i64) -> anyhow::Result<()> {
            Ok(())
        }
    }

    async fn insert(
        repo: &InMemoryUploadRepository,
        state: UploadState,
        age_hours: i64,
        import_id: Option<i64>,
    ) -> Uuid {
        let mut upload = Upload::new("alice", "roads");
        upload.state = state;
        upload.import_id = import_id;
        upload.date = Utc::now() - chrono::Duration::hours(age_hours);
        repo.create(upload).await.unwrap().id
    }

    #[test]
    fn importer_states_map_to_upload_states() {
        let cases = [
            ("COMPLETE", UploadState::Processed),
            ("RUNNING", UploadState::Running),
            ("PENDING", UploadState::Waiting),
            ("READY", UploadState::Waiting),
            ("ERROR", UploadState::Invalid),
            ("BAD_FORMAT", UploadState::Invalid),
            ("canceled", UploadState::Invalid),
            ("NO_CRS", UploadState::Invalid),
        ];
        for (raw, expected) in cases {
            assert_eq!(ImportSessionState::parse(raw).unwrap().upload_state(), expected);
        }
        assert!(ImportSessionState::parse("DONE").is_none());
    }

    #[test]
    fn keyed_lock_is_exclusive_per_key() {
        let lock = KeyedLock::new();
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());
        let guard = lock.try_acquire(a).unwrap();
        assert!(lock.try_acquire(a).is_none());
        assert!(lock.try_acquire(b).is_some());
        drop(guard);
        assert!(!lock.is_held(a));
        assert!(lock.try_acquire(a).is_some());
    }

    #[tokio::test]
    async fn expired_sessions_are_deleted_processed_ones_kept() {
        let repo = Arc::new(InMemoryUploadRepository::new());
        let stale = insert(&repo, UploadState::Waiting, 48, None).await;
        let old_processed = insert(&repo, UploadState::Processed, 48, None).await;
        let fresh = insert(&repo, UploadState::Running, 1, None).await;

        let sweeper = SessionSweeper::new(repo.clone(), None, 24);
        let report = sweeper.finalize_incomplete_session_uploads().await.unwrap();
        assert_eq!(report.deleted, 1);

        assert!(repo.get(stale).await.unwrap().is_none());
        assert!(repo.get(old_processed).await.unwrap().is_some());
        assert!(repo.get(fresh).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn live_sessions_follow_the_importer() {
        let repo = Arc::new(InMemoryUploadRepository::new());
        let done = insert(&repo, UploadState::Running, 1, Some(1)).await;
        let broken = insert(&repo, UploadState::Running, 1, Some(2)).await;
        let gone = insert(&repo, UploadState::Pending, 1, Some(3)).await;
        let client = StaticClient {
            states: HashMap::from([
                (1, ImportSessionState::Complete),
                (2, ImportSessionState::BadFormat),
            ]),
        };

        let sweeper = SessionSweeper::new(repo.clone(), Some(Arc::new(client)), 24);
        let report = sweeper.finalize_incomplete_session_uploads().await.unwrap();
        assert_eq!(report.updated, 3);

        let done = repo.get(done).await.unwrap().unwrap();
        assert_eq!(done.state, UploadState::Processed);
        assert!(done.complete);
        assert_eq!(repo.get(broken).await.unwrap().unwrap().state, UploadState::Invalid);
        assert_eq!(repo.get(gone).await.unwrap().unwrap().state, UploadState::Invalid);
    }

    #[tokio::test]
    async fn held_sessions_are_skipped() {
        let repo = Arc::new(InMemoryUploadRepository::new());
        let stale = insert(&repo, UploadState::Waiting, 48, None).await;

        let sweeper = SessionSweeper::new(repo.clone(), None, 24);
        let guard = sweeper.locks().try_acquire(stale).unwrap();
        let report = sweeper.finalize_incomplete_session_uploads().await.unwrap();
        assert_eq!(report.skipped, 1);
        assert!(repo.get(stale).await.unwrap().is_some());
        drop(guard);
    }
}
