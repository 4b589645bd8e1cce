//! In-memory collaborators with fault injection, for tests.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream};
use futures::{StreamExt, TryStreamExt};

use crate::error::{NotifyError, StoreError};
use crate::model::ObjectHandle;
use crate::notify::{MailMessage, Mailer};
use crate::store::{ByteStream, DestinationStore, SourceStore};

fn body_stream(body: Bytes) -> ByteStream {
    // Two chunks so consumers exercise their streaming path.
    let split = body.len() / 2;
    let chunks = vec![Ok(body.slice(..split)), Ok(body.slice(split..))];
    stream::iter(chunks).boxed()
}

/// Source and archive containers held in memory.
pub struct MemorySource {
    name: String,
    objects: Mutex<BTreeMap<String, Bytes>>,
    archive: Mutex<BTreeMap<String, Bytes>>,
    failing_listings: Mutex<HashMap<String, usize>>,
    failing_reads: Mutex<HashSet<String>>,
    failing_archive_copies: Mutex<HashSet<String>>,
    silent_archive_copies: Mutex<HashSet<String>>,
    failing_deletes: Mutex<HashSet<String>>,
    calls: Mutex<Vec<String>>,
}

impl MemorySource {
    pub fn new(name: &str) -> Self {
        MemorySource {
            name: name.to_string(),
            objects: Mutex::new(BTreeMap::new()),
            archive: Mutex::new(BTreeMap::new()),
            failing_listings: Mutex::new(HashMap::new()),
            failing_reads: Mutex::new(HashSet::new()),
            failing_archive_copies: Mutex::new(HashSet::new()),
            silent_archive_copies: Mutex::new(HashSet::new()),
            failing_deletes: Mutex::new(HashSet::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn put(&self, path: &str, body: &[u8]) {
        self.objects
            .lock()
            .unwrap()
            .insert(path.to_string(), Bytes::copy_from_slice(body));
    }

    pub fn contains(&self, path: &str) -> bool {
        self.objects.lock().unwrap().contains_key(path)
    }

    pub fn archived(&self, path: &str) -> Option<Bytes> {
        self.archive.lock().unwrap().get(path).cloned()
    }

    /// Listing `prefix` fails before yielding anything.
    pub fn fail_listing(&self, prefix: &str) {
        self.fail_listing_after(prefix, 0);
    }

    /// Listing `prefix` yields `count` handles, then fails.
    pub fn fail_listing_after(&self, prefix: &str, count: usize) {
        self.failing_listings
            .lock()
            .unwrap()
            .insert(prefix.to_string(), count);
    }

    pub fn fail_read(&self, path: &str) {
        self.failing_reads.lock().unwrap().insert(path.to_string());
    }

    pub fn fail_archive_copy(&self, path: &str) {
        self.failing_archive_copies
            .lock()
            .unwrap()
            .insert(path.to_string());
    }

    /// The archive copy for `path` reports success but writes nothing.
    pub fn lose_archive_copy(&self, path: &str) {
        self.silent_archive_copies
            .lock()
            .unwrap()
            .insert(path.to_string());
    }

    pub fn fail_delete(&self, path: &str) {
        self.failing_deletes.lock().unwrap().insert(path.to_string());
    }

    /// Clear every injected fault.
    pub fn heal(&self) {
        self.failing_listings.lock().unwrap().clear();
        self.failing_reads.lock().unwrap().clear();
        self.failing_archive_copies.lock().unwrap().clear();
        self.silent_archive_copies.lock().unwrap().clear();
        self.failing_deletes.lock().unwrap().clear();
    }

    /// Mutating calls in the order they were made, e.g. `copy:finance/a.csv`.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn log(&self, call: String) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl SourceStore for MemorySource {
    fn container(&self) -> &str {
        &self.name
    }

    fn list(&self, prefix: &str) -> BoxStream<'_, Result<ObjectHandle, StoreError>> {
        let mut items: Vec<Result<ObjectHandle, StoreError>> = self
            .objects
            .lock()
            .unwrap()
            .iter()
            .filter(|(path, _)| path.starts_with(prefix))
            .map(|(path, body)| Ok(ObjectHandle::new(self.name.clone(), path.clone(), Some(body.len() as u64))))
            .collect();

        if let Some(&after) = self.failing_listings.lock().unwrap().get(prefix) {
            items.truncate(after);
            items.push(Err(StoreError::Other(format!("listing {} denied", prefix))));
        }
        stream::iter(items).boxed()
    }

    async fn read(&self, handle: &ObjectHandle) -> Result<ByteStream, StoreError> {
        if self.failing_reads.lock().unwrap().contains(&handle.path) {
            return Err(StoreError::Other(format!("read {} timed out", handle.path)));
        }
        let body = self
            .objects
            .lock()
            .unwrap()
            .get(&handle.path)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                path: handle.path.clone(),
            })?;
        Ok(body_stream(body))
    }

    async fn copy_to_archive(
        &self,
        handle: &ObjectHandle,
        archive_path: &str,
    ) -> Result<(), StoreError> {
        self.log(format!("copy:{}", handle.path));
        if self.failing_archive_copies.lock().unwrap().contains(&handle.path) {
            return Err(StoreError::Other("archive container unavailable".to_string()));
        }
        if self.silent_archive_copies.lock().unwrap().contains(&handle.path) {
            return Ok(());
        }
        let body = self
            .objects
            .lock()
            .unwrap()
            .get(&handle.path)
            .cloned()
            .ok_or_else(|| StoreError::NotFound {
                path: handle.path.clone(),
            })?;
        self.archive
            .lock()
            .unwrap()
            .insert(archive_path.to_string(), body);
        Ok(())
    }

    async fn head_archive(&self, archive_path: &str) -> Result<ObjectHandle, StoreError> {
        let archive = self.archive.lock().unwrap();
        let body = archive.get(archive_path).ok_or_else(|| StoreError::NotFound {
            path: archive_path.to_string(),
        })?;
        Ok(ObjectHandle::new("archive", archive_path, Some(body.len() as u64)))
    }

    async fn delete(&self, handle: &ObjectHandle) -> Result<(), StoreError> {
        self.log(format!("delete:{}", handle.path));
        if self.failing_deletes.lock().unwrap().contains(&handle.path) {
            return Err(StoreError::Other("lease held on blob".to_string()));
        }
        self.objects.lock().unwrap().remove(&handle.path);
        Ok(())
    }
}

/// Destination bucket held in memory.
pub struct MemoryDestination {
    objects: Mutex<BTreeMap<String, Bytes>>,
    writes: Mutex<HashMap<String, usize>>,
    failing_uploads: Mutex<HashSet<String>>,
    corrupting: Mutex<HashSet<String>>,
}

impl MemoryDestination {
    pub fn new() -> Self {
        MemoryDestination {
            objects: Mutex::new(BTreeMap::new()),
            writes: Mutex::new(HashMap::new()),
            failing_uploads: Mutex::new(HashSet::new()),
            corrupting: Mutex::new(HashSet::new()),
        }
    }

    pub fn get(&self, path: &str) -> Option<Bytes> {
        self.objects.lock().unwrap().get(path).cloned()
    }

    pub fn paths(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }

    pub fn write_count(&self, path: &str) -> usize {
        self.writes.lock().unwrap().get(path).copied().unwrap_or(0)
    }

    pub fn fail_upload(&self, path: &str) {
        self.failing_uploads.lock().unwrap().insert(path.to_string());
    }

    /// Writes to `path` store different bytes than were sent.
    pub fn corrupt(&self, path: &str) {
        self.corrupting.lock().unwrap().insert(path.to_string());
    }
}

#[async_trait]
impl DestinationStore for MemoryDestination {
    fn bucket(&self) -> &str {
        "memory-bucket"
    }

    async fn write(&self, path: &str, content: ByteStream) -> Result<u64, StoreError> {
        if self.failing_uploads.lock().unwrap().contains(path) {
            return Err(StoreError::Other("403 Forbidden".to_string()));
        }
        let chunks: Vec<Bytes> = content.try_collect().await?;
        let mut body: Vec<u8> = chunks.iter().flat_map(|c| c.iter().copied()).collect();
        let written = body.len() as u64;
        if self.corrupting.lock().unwrap().contains(path) {
            body.push(b'!');
        }
        self.objects
            .lock()
            .unwrap()
            .insert(path.to_string(), Bytes::from(body));
        *self.writes.lock().unwrap().entry(path.to_string()).or_insert(0) += 1;
        Ok(written)
    }

    async fn read(&self, path: &str) -> Result<ByteStream, StoreError> {
        let body = self.get(path).ok_or_else(|| StoreError::NotFound {
            path: path.to_string(),
        })?;
        Ok(body_stream(body))
    }
}

/// Mailer that records messages instead of sending them.
pub struct RecordingMailer {
    sent: Mutex<Vec<MailMessage>>,
    reject: bool,
}

impl RecordingMailer {
    pub fn new() -> Self {
        RecordingMailer {
            sent: Mutex::new(Vec::new()),
            reject: false,
        }
    }

    pub fn rejecting() -> Self {
        RecordingMailer {
            sent: Mutex::new(Vec::new()),
            reject: true,
        }
    }

    pub fn sent(&self) -> Vec<MailMessage> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, message: &MailMessage) -> Result<(), NotifyError> {
        if self.reject {
            return Err(NotifyError::Rejected("550 mailbox unavailable".to_string()));
        }
        self.sent.lock().unwrap().push(message.clone());
        Ok(())
    }
}
