//! JSON-file backed OAuth store.
//!
//! All five record collections live behind one mutex. Every mutation runs
//! against a working copy of the state, which is written to disk before it
//! replaces the live state, so a failed write commits nothing.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::types::{AccessToken, AuthorizationCode, Client, PendingAuthorization, RefreshToken};
use crate::error::{StoreError, StoreResult};

/// Everything the store persists, one map per record kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreState {
    pub clients: HashMap<String, Client>,
    pub pending_authorizations: HashMap<String, PendingAuthorization>,
    pub authorization_codes: HashMap<String, AuthorizationCode>,
    pub access_tokens: HashMap<String, AccessToken>,
    pub refresh_tokens: HashMap<String, RefreshToken>,
}

impl StoreState {
    /// Remove every record with `expires_at <= now`. Returns how many went.
    fn sweep(&mut self, now: DateTime<Utc>) -> usize {
        fn retain_live<R: Record>(map: &mut HashMap<String, R>, now: DateTime<Utc>) -> usize {
            let before = map.len();
            map.retain(|_, record| !record.is_expired_at(now));
            before - map.len()
        }

        retain_live(&mut self.clients, now)
            + retain_live(&mut self.pending_authorizations, now)
            + retain_live(&mut self.authorization_codes, now)
            + retain_live(&mut self.access_tokens, now)
            + retain_live(&mut self.refresh_tokens, now)
    }
}

/// A record kind stored in one of the [`StoreState`] collections.
pub trait Record: Clone + Send + Sync + 'static {
    /// Collection name, used in logs.
    const COLLECTION: &'static str;

    /// Expiry instant, `None` for records that never expire.
    fn expires_at(&self) -> Option<DateTime<Utc>>;

    fn table(state: &StoreState) -> &HashMap<String, Self>;

    fn table_mut(state: &mut StoreState) -> &mut HashMap<String, Self>;

    fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at().is_some_and(|expires_at| expires_at <= now)
    }
}

macro_rules! impl_record {
    ($ty:ty, $field:ident, |$rec:ident| $expiry:expr) => {
        impl Record for $ty {
            const COLLECTION: &'static str = stringify!($field);

            fn expires_at(&self) -> Option<DateTime<Utc>> {
                let $rec = self;
                $expiry
            }

            fn table(state: &StoreState) -> &HashMap<String, Self> {
                &state.$field
            }

            fn table_mut(state: &mut StoreState) -> &mut HashMap<String, Self> {
                &mut state.$field
            }
        }
    };
}

impl_record!(Client, clients, |_client| None);
impl_record!(PendingAuthorization, pending_authorizations, |r| Some(r.expires_at));
impl_record!(AuthorizationCode, authorization_codes, |r| Some(r.expires_at));
impl_record!(AccessToken, access_tokens, |r| Some(r.expires_at));
impl_record!(RefreshToken, refresh_tokens, |r| Some(r.expires_at));

/// A set of mutations applied atomically by [`OAuthStore::transaction`].
pub struct Transaction<'a> {
    state: &'a mut StoreState,
    now: DateTime<Utc>,
    dirty: bool,
}

impl Transaction<'_> {
    /// The instant the transaction started; expiry checks use it.
    #[must_use]
    pub const fn now(&self) -> DateTime<Utc> {
        self.now
    }

    /// Look up a live record.
    #[must_use]
    pub fn get<R: Record>(&self, id: &str) -> Option<&R> {
        R::table(&*self.state).get(id).filter(|record| !record.is_expired_at(self.now))
    }

    /// Insert or replace a record.
    pub fn insert<R: Record>(&mut self, id: impl Into<String>, record: R) {
        R::table_mut(&mut *self.state).insert(id.into(), record);
        self.dirty = true;
    }

    /// Remove a record, returning it only if it was still live.
    pub fn pop<R: Record>(&mut self, id: &str) -> Option<R> {
        let record = R::table_mut(&mut *self.state).remove(id)?;
        self.dirty = true;
        (!record.is_expired_at(self.now)).then_some(record)
    }

    /// Remove a record. Returns whether anything was removed.
    pub fn delete<R: Record>(&mut self, id: &str) -> bool {
        let removed = R::table_mut(&mut *self.state).remove(id).is_some();
        self.dirty |= removed;
        removed
    }

    /// Remove all expired records.
    pub fn sweep(&mut self) -> usize {
        let removed = self.state.sweep(self.now);
        self.dirty |= removed > 0;
        removed
    }
}

/// Record counts per collection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreCounts {
    pub clients: usize,
    pub pending_authorizations: usize,
    pub authorization_codes: usize,
    pub access_tokens: usize,
    pub refresh_tokens: usize,
}

/// Persistent OAuth state store.
pub struct OAuthStore {
    path: PathBuf,
    state: Mutex<StoreState>,
}

impl OAuthStore {
    /// Open the store at `path`.
    ///
    /// A missing file yields an empty store. A corrupt or unreadable file is
    /// logged and also yields an empty store; it is overwritten on the next
    /// mutation.
    pub async fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let state = load_state(&path).await;

        tracing::info!(
            path = %path.display(),
            clients = state.clients.len(),
            access_tokens = state.access_tokens.len(),
            refresh_tokens = state.refresh_tokens.len(),
            "OAuth store loaded"
        );

        Self { path, state: Mutex::new(state) }
    }

    /// Path of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Look up a live record by id.
    pub async fn get<R: Record>(&self, id: &str) -> Option<R> {
        let state = self.state.lock().await;
        let now = Utc::now();
        R::table(&state).get(id).filter(|record| !record.is_expired_at(now)).cloned()
    }

    /// Insert or replace a record and persist.
    pub async fn set<R: Record>(&self, id: impl Into<String>, record: R) -> StoreResult<()> {
        let id = id.into();
        self.transaction(move |tx| {
            tx.insert(id, record);
            Ok::<_, StoreError>(())
        })
        .await
    }

    /// Remove a record and persist. Unknown ids are a no-op.
    pub async fn delete<R: Record>(&self, id: &str) -> StoreResult<bool> {
        self.transaction(|tx| Ok::<_, StoreError>(tx.delete::<R>(id))).await
    }

    /// Remove and return a live record, persisting the removal.
    pub async fn pop<R: Record>(&self, id: &str) -> StoreResult<Option<R>> {
        let record = self.transaction(|tx| Ok::<_, StoreError>(tx.pop::<R>(id))).await?;
        tracing::trace!(collection = R::COLLECTION, found = record.is_some(), "Popped OAuth record");
        Ok(record)
    }

    /// Remove every expired record across all collections.
    pub async fn sweep(&self) -> StoreResult<usize> {
        let removed = self.transaction(|tx| Ok::<_, StoreError>(tx.sweep())).await?;
        if removed > 0 {
            tracing::debug!(count = removed, "Swept expired OAuth records");
        }
        Ok(removed)
    }

    /// Apply several mutations atomically.
    ///
    /// The closure works on a copy of the state. If it succeeds and changed
    /// anything, the copy is written to disk and then committed. If it fails,
    /// or the write fails, the live state and the file are untouched.
    pub async fn transaction<T, E, F>(&self, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut Transaction<'_>) -> Result<T, E>,
        E: From<StoreError>,
    {
        let mut state = self.state.lock().await;
        let mut working = state.clone();

        let mut tx = Transaction { state: &mut working, now: Utc::now(), dirty: false };
        let value = f(&mut tx)?;

        if tx.dirty {
            persist(&self.path, &working).await?;
            *state = working;
        }

        Ok(value)
    }

    /// Record counts per collection (expired records included until swept).
    pub async fn counts(&self) -> StoreCounts {
        let state = self.state.lock().await;
        StoreCounts {
            clients: state.clients.len(),
            pending_authorizations: state.pending_authorizations.len(),
            authorization_codes: state.authorization_codes.len(),
            access_tokens: state.access_tokens.len(),
            refresh_tokens: state.refresh_tokens.len(),
        }
    }

    /// Copy of the full state.
    pub async fn snapshot(&self) -> StoreState {
        self.state.lock().await.clone()
    }
}

impl std::fmt::Debug for OAuthStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OAuthStore").field("path", &self.path).finish()
    }
}

async fn load_state(path: &Path) -> StoreState {
    let bytes = match tokio::fs::read(path).await {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return StoreState::default(),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Cannot read OAuth store, starting empty");
            return StoreState::default();
        }
    };

    match serde_json::from_slice(&bytes) {
        Ok(state) => state,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "Corrupt OAuth store, starting empty");
            StoreState::default()
        }
    }
}

/// Write the full state next to `path`, then rename over it.
async fn persist(path: &Path, state: &StoreState) -> StoreResult<()> {
    let json = serde_json::to_vec_pretty(state)?;

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(|e| StoreError::io(parent, e))?;
    }

    let tmp_path = temp_path(path);
    let mut options = tokio::fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    options.mode(0o600);

    let mut file = options.open(&tmp_path).await.map_err(|e| StoreError::io(&tmp_path, e))?;
    file.write_all(&json).await.map_err(|e| StoreError::io(&tmp_path, e))?;
    file.sync_all().await.map_err(|e| StoreError::io(&tmp_path, e))?;
    drop(file);

    tokio::fs::rename(&tmp_path, path).await.map_err(|e| StoreError::io(path, e))
}

fn temp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
