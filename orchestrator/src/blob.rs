use std::{
    collections::HashMap,
    sync::atomic::{AtomicU32, AtomicUsize, Ordering},
};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::BlobErr;

/// Where an uploaded blob ended up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BlobReceipt {
    pub blob_id: String,
    /// The last storage epoch the blob is retained for.
    pub end_epoch: u32,
}

/// A content addressed blob store.
#[trait_variant::make(BlobStore: Send)]
pub trait LocalBlobStore: Sync {
    /// Uploads `bytes`, retaining them for `retention_epochs` storage epochs.
    async fn upload_blob(
        &self,
        bytes: Vec<u8>,
        retention_epochs: u32,
    ) -> Result<BlobReceipt, BlobErr>;

    async fn download_blob(&self, blob_id: &str) -> Result<Vec<u8>, BlobErr>;

    /// The public url a blob can be fetched from.
    fn blob_url(&self, blob_id: &str) -> String;
}

/// An in process blob store keyed by the SHA-256 of the content.
#[derive(Debug)]
pub struct MemoryBlobStore {
    base_url: String,
    epoch: AtomicU32,
    failures: AtomicUsize,
    blobs: RwLock<HashMap<String, Vec<u8>>>,
}

impl Default for MemoryBlobStore {
    fn default() -> Self {
        Self::new("memory://blobs")
    }
}

impl MemoryBlobStore {
    /// Creates a new `MemoryBlobStore`.
    ///
    /// # Arguments
    /// * `base_url` - Prefix of every url handed out by `blob_url`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            epoch: AtomicU32::new(0),
            failures: AtomicUsize::new(0),
            blobs: RwLock::default(),
        }
    }

    /// Makes the next `n` uploads fail with a network error.
    pub fn fail_next_uploads(&self, n: usize) {
        self.failures.store(n, Ordering::SeqCst);
    }

    /// Moves the store's clock to `epoch`.
    pub fn set_epoch(&self, epoch: u32) {
        self.epoch.store(epoch, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.blobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn take_failure(&self) -> bool {
        self.failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

pub fn content_id(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

impl BlobStore for MemoryBlobStore {
    async fn upload_blob(
        &self,
        bytes: Vec<u8>,
        retention_epochs: u32,
    ) -> Result<BlobReceipt, BlobErr> {
        if self.take_failure() {
            return Err(BlobErr::Network("simulated upload failure".into()));
        }

        let blob_id = content_id(&bytes);
        self.blobs.write().entry(blob_id.clone()).or_insert(bytes);

        let end_epoch = self
            .epoch
            .load(Ordering::SeqCst)
            .saturating_add(retention_epochs);

        Ok(BlobReceipt { blob_id, end_epoch })
    }

    async fn download_blob(&self, blob_id: &str) -> Result<Vec<u8>, BlobErr> {
        self.blobs
            .read()
            .get(blob_id)
            .cloned()
            .ok_or_else(|| BlobErr::NotFound(blob_id.to_string()))
    }

    fn blob_url(&self, blob_id: &str) -> String {
        format!("{}/{blob_id}", self.base_url.trim_end_matches('/'))
    }
}
