//! Progress records written to the target database.
//!
//! Each request keeps one JSON record under `\xff\x02/restoreStatus/<uid>`,
//! rewritten after every batch and once more when the request ends.

use bytes::Bytes;
use chrono::{DateTime, Utc};
use fastrestore_types::{Key, RestoreRequest, Version};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::store::{Store, Transaction};
use crate::{Error, Result};

/// Prefix of the status records in the system keyspace.
pub const STATUS_PREFIX: &[u8] = b"\xff\x02/restoreStatus/";

pub fn status_key(uid: Uuid) -> Key {
    let mut key = STATUS_PREFIX.to_vec();
    key.extend_from_slice(uid.to_string().as_bytes());
    Bytes::from(key)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestoreState {
    Running,
    Completed,
    Failed,
}

/// Progress of one restore request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RestoreStatus {
    pub uid: Uuid,
    pub url: String,
    pub state: RestoreState,
    pub target_version: Option<Version>,
    pub batches_done: usize,
    pub batches_total: usize,
    pub files_done: usize,
    pub bytes_done: u64,
    /// End version of the last applied batch.
    pub applied_version: Option<Version>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub error: Option<String>,
}

impl RestoreStatus {
    pub fn new(request: &RestoreRequest, started_at: DateTime<Utc>) -> Self {
        Self {
            uid: request.uid,
            url: request.url.clone(),
            state: RestoreState::Running,
            target_version: request.target_version,
            batches_done: 0,
            batches_total: 0,
            files_done: 0,
            bytes_done: 0,
            applied_version: None,
            started_at,
            updated_at: started_at,
            error: None,
        }
    }

    /// Reads the status of request `uid`, if one was written.
    pub async fn read<S: Store>(store: &S, uid: Uuid) -> Result<Option<Self>> {
        let tx = store.begin(None);
        let Some(value) = tx.get(&status_key(uid)).await? else {
            return Ok(None);
        };
        serde_json::from_slice(&value)
            .map(Some)
            .map_err(|e| Error::Protocol(format!("unreadable restore status for {uid}: {e}")))
    }

    /// Stamps `updated_at` and writes the record, under the request's lock
    /// if it holds one.
    pub async fn write<S: Store>(&mut self, store: &S, lock_uid: Option<Uuid>) -> Result<()> {
        self.updated_at = Utc::now();
        let value = serde_json::to_vec(self)
            .map_err(|e| Error::Protocol(format!("unencodable restore status: {e}")))?;
        let mut tx = store.begin(lock_uid);
        tx.set(status_key(self.uid), Bytes::from(value));
        tx.commit().await?;
        Ok(())
    }
}
