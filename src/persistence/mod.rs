//! High-water-mark snapshot persistence.
//!
//! The only allocator state that survives a restart is the equity
//! high-water mark, stored as `{"version":1,"hwm_equity_usd":<float>}`.
//! Snapshots larger than 1 MiB are rejected on read and on write.

use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::effects::{counter, Effect, EffectSink};
use crate::error::{AllocatorError, AllocatorResult};
use crate::risk::HighWaterMark;

/// Layout version written by this build.
pub const SNAPSHOT_VERSION: u32 = 1;

/// Hard ceiling on snapshot size.
pub const MAX_SNAPSHOT_BYTES: u64 = 1_048_576;

/// Persisted allocator state.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AllocatorSnapshot {
    #[serde(default = "default_version")]
    pub version: u32,
    #[serde(default)]
    pub hwm_equity_usd: f64,
}

fn default_version() -> u32 {
    SNAPSHOT_VERSION
}

impl AllocatorSnapshot {
    /// Capture the current watermark.
    pub fn capture(hwm: &HighWaterMark) -> Self {
        Self {
            version: SNAPSHOT_VERSION,
            hwm_equity_usd: hwm.get().max(0.0),
        }
    }

    /// Write the snapshot into `hwm`, flooring negative values at zero.
    pub fn restore(&self, hwm: &HighWaterMark) -> AllocatorResult<()> {
        if self.version != SNAPSHOT_VERSION {
            return Err(AllocatorError::SnapshotVersion(self.version));
        }
        hwm.set(self.hwm_equity_usd);
        debug!(hwm = hwm.get(), "Snapshot restored");
        Ok(())
    }
}

/// File-backed snapshot store.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    path: PathBuf,
}

impl SnapshotStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read and validate the snapshot file.
    pub fn read(&self) -> AllocatorResult<AllocatorSnapshot> {
        let metadata = match fs::metadata(&self.path) {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(AllocatorError::SnapshotNotFound(self.path.clone()))
            }
            Err(e) => return Err(e.into()),
        };
        if metadata.len() > MAX_SNAPSHOT_BYTES {
            return Err(AllocatorError::SnapshotTooLarge {
                path: self.path.clone(),
                size: metadata.len(),
                limit: MAX_SNAPSHOT_BYTES,
            });
        }

        let data = fs::read_to_string(&self.path)?;
        let snapshot: AllocatorSnapshot = serde_json::from_str(&data)?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(AllocatorError::SnapshotVersion(snapshot.version));
        }
        Ok(snapshot)
    }

    /// Write the snapshot atomically (temp file, then rename).
    pub fn write(&self, snapshot: &AllocatorSnapshot) -> AllocatorResult<()> {
        let payload = serde_json::to_vec(snapshot)?;
        if payload.len() as u64 > MAX_SNAPSHOT_BYTES {
            return Err(AllocatorError::SnapshotTooLarge {
                path: self.path.clone(),
                size: payload.len() as u64,
                limit: MAX_SNAPSHOT_BYTES,
            });
        }

        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }

        let tmp = self.path.with_extension("json.tmp");
        {
            let mut file = File::create(&tmp)?;
            file.write_all(&payload)?;
            file.sync_all()?;
        }

        if let Err(err) = fs::rename(&tmp, &self.path) {
            if self.path.exists() {
                fs::remove_file(&self.path)?;
                fs::rename(&tmp, &self.path)?;
            } else {
                let _ = fs::remove_file(&tmp);
                return Err(err.into());
            }
        }
        Ok(())
    }

    /// Load the snapshot into `hwm`, reporting load counters to `sink`.
    pub fn safe_load(&self, hwm: &HighWaterMark, sink: &mut dyn EffectSink) -> AllocatorResult<()> {
        let result = self.read().and_then(|snapshot| snapshot.restore(hwm));
        match &result {
            Ok(()) => {
                info!(path = %self.path.display(), hwm = hwm.get(), "Snapshot loaded");
                sink.apply(&Effect::counter(counter::SNAPSHOT_LOADS_TOTAL, 1.0));
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Snapshot load failed");
                sink.apply(&Effect::counter(counter::SNAPSHOT_LOADS_FAILED_TOTAL, 1.0));
            }
        }
        result
    }

    /// Save the current watermark, reporting write counters to `sink`.
    pub fn save(&self, hwm: &HighWaterMark, sink: &mut dyn EffectSink) -> AllocatorResult<()> {
        let snapshot = AllocatorSnapshot::capture(hwm);
        let result = self.write(&snapshot);
        match &result {
            Ok(()) => {
                debug!(path = %self.path.display(), hwm = snapshot.hwm_equity_usd, "Snapshot saved");
                sink.apply(&Effect::counter(counter::SNAPSHOT_WRITES_TOTAL, 1.0));
            }
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "Snapshot save failed");
                sink.apply(&Effect::counter(counter::SNAPSHOT_WRITES_FAILED_TOTAL, 1.0));
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::effects::RecordingSink;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> SnapshotStore {
        SnapshotStore::new(dir.path().join("state").join("allocator_snapshot.json"))
    }

    #[test]
    fn test_save_and_load_snapshot() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let mut sink = RecordingSink::new();

        let hwm = HighWaterMark::new(12_345.5);
        store.save(&hwm, &mut sink).unwrap();

        let text = fs::read_to_string(store.path()).unwrap();
        assert_eq!(text, r#"{"version":1,"hwm_equity_usd":12345.5}"#);

        let restored = HighWaterMark::default();
        store.safe_load(&restored, &mut sink).unwrap();
        assert_eq!(restored.get(), 12_345.5);

        assert_eq!(sink.counter_total(counter::SNAPSHOT_WRITES_TOTAL), 1.0);
        assert_eq!(sink.counter_total(counter::SNAPSHOT_LOADS_TOTAL), 1.0);
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let mut sink = RecordingSink::new();

        let err = store.safe_load(&HighWaterMark::default(), &mut sink).unwrap_err();
        assert!(matches!(err, AllocatorError::SnapshotNotFound(_)));
        assert_eq!(sink.counter_total(counter::SNAPSHOT_LOADS_FAILED_TOTAL), 1.0);
    }

    #[test]
    fn test_oversized_file_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("big.json");
        let padding = " ".repeat(MAX_SNAPSHOT_BYTES as usize);
        fs::write(&path, format!("{{\"version\":1,\"hwm_equity_usd\":1.0}}{padding}")).unwrap();

        let hwm = HighWaterMark::new(5.0);
        let err = SnapshotStore::new(&path)
            .safe_load(&hwm, &mut RecordingSink::new())
            .unwrap_err();
        assert!(matches!(err, AllocatorError::SnapshotTooLarge { .. }));
        assert_eq!(hwm.get(), 5.0);
    }

    #[test]
    fn test_corrupt_and_foreign_snapshots() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("snap.json");

        fs::write(&path, "not json").unwrap();
        assert!(matches!(
            SnapshotStore::new(&path).read(),
            Err(AllocatorError::SnapshotParse(_))
        ));

        fs::write(&path, r#"{"version":2,"hwm_equity_usd":10.0}"#).unwrap();
        assert!(matches!(
            SnapshotStore::new(&path).read(),
            Err(AllocatorError::SnapshotVersion(2))
        ));
    }

    #[test]
    fn test_negative_hwm_floored() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("snap.json");
        fs::write(&path, r#"{"version":1,"hwm_equity_usd":-250.0}"#).unwrap();

        let hwm = HighWaterMark::new(100.0);
        SnapshotStore::new(&path)
            .safe_load(&hwm, &mut RecordingSink::new())
            .unwrap();
        assert_eq!(hwm.get(), 0.0);
    }

    #[test]
    fn test_overwrite_existing_snapshot() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);
        let mut sink = RecordingSink::new();

        store.save(&HighWaterMark::new(1.0), &mut sink).unwrap();
        store.save(&HighWaterMark::new(2.0), &mut sink).unwrap();
        assert_eq!(store.read().unwrap().hwm_equity_usd, 2.0);
        assert!(!store.path().with_extension("json.tmp").exists());
    }
}
