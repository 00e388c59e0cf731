//! File-backed timeline store
//!
//! One zstd-compressed JSON file per subject, `<subject>.json.zst`, written
//! through a temp file and a rename so readers never see a partial write.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::StoreError;
use crate::timeline::{TimelineState, TimelineStore};
use crate::types::Subject;

const EXTENSION: &str = "json.zst";
const COMPRESSION_LEVEL: i32 = 3;

/// Per-subject lock entries are never evicted; dropping idle subjects is up
/// to whoever owns the store.
#[derive(Debug)]
pub struct FileTimelineStore {
    dir: PathBuf,
    /// Serializes read-check-write per subject within this process
    locks: Mutex<HashMap<Subject, Arc<Mutex<()>>>>,
}

impl FileTimelineStore {
    /// Open (and create if needed) a state directory
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        info!("timeline state directory: {}", dir.display());
        Ok(Self {
            dir,
            locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn path_for(&self, subject: &Subject) -> PathBuf {
        self.dir.join(format!("{}.{}", subject.storage_key(), EXTENSION))
    }

    /// Storage keys of every persisted subject, sorted
    pub fn stored_keys(&self) -> Result<Vec<String>, StoreError> {
        let suffix = format!(".{}", EXTENSION);
        let mut keys = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            let filename = entry.file_name().to_string_lossy().to_string();
            if let Some(key) = filename.strip_suffix(&suffix) {
                keys.push(key.to_string());
            }
        }
        keys.sort();
        Ok(keys)
    }

    fn lock_for(&self, subject: &Subject) -> Arc<Mutex<()>> {
        Arc::clone(self.locks.lock().entry(subject.clone()).or_default())
    }

    fn read(&self, subject: &Subject) -> Result<Option<TimelineState>, StoreError> {
        let path = self.path_for(subject);
        if !path.exists() {
            return Ok(None);
        }
        let compressed = std::fs::read(&path)?;
        let json = zstd::decode_all(&compressed[..])?;
        let state: TimelineState = serde_json::from_slice(&json)?;
        Ok(Some(state))
    }

    fn write(&self, subject: &Subject, state: &TimelineState) -> Result<(), StoreError> {
        let path = self.path_for(subject);
        let tmp = path.with_extension("zst.tmp");
        let json = serde_json::to_vec(state)?;
        let compressed = zstd::encode_all(&json[..], COMPRESSION_LEVEL)?;
        std::fs::write(&tmp, compressed)?;
        std::fs::rename(&tmp, &path)?;
        debug!("wrote {} (version {})", path.display(), state.version);
        Ok(())
    }
}

impl TimelineStore for FileTimelineStore {
    fn load(&self, subject: &Subject) -> Result<Option<TimelineState>, StoreError> {
        let lock = self.lock_for(subject);
        let _guard = lock.lock();
        self.read(subject)
    }

    fn compare_and_swap(
        &self,
        subject: &Subject,
        expected_version: Option<u64>,
        state: &TimelineState,
    ) -> Result<bool, StoreError> {
        let lock = self.lock_for(subject);
        let _guard = lock.lock();
        let current = self.read(subject)?.map(|s| s.version);
        if current != expected_version {
            return Ok(false);
        }
        self.write(subject, state)?;
        Ok(true)
    }
}
