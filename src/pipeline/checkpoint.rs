//! Durable run state: where to resume after an interruption.
//!
//! A checkpoint is one small JSON file next to the output. It is replaced
//! atomically (temp file + rename) so a crash never leaves a torn write.
//! An OS advisory lock on `<checkpoint>.lock` keeps two runs from driving the
//! same checkpoint; the kernel drops it when the holding process exits, so a
//! killed run never blocks the next one.

use super::batch::{IdentifierMapping, JobHandle};
use crate::error::Pdf2CardsError;
use crate::output::Card;
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Persisted state of a run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Checkpoint {
    /// Nothing done yet.
    #[default]
    NotStarted,
    /// Direct mode: pages `[0, offset)` are done and produced `cards`.
    InProgress {
        offset: usize,
        #[serde(default)]
        cards: Vec<Card>,
    },
    /// Batch mode: `job_id` was submitted and must not be submitted again.
    AwaitingBatch {
        job_id: JobHandle,
        /// Empty when written by a version that did not store routes.
        #[serde(default)]
        routes: IdentifierMapping,
    },
}

/// On-disk forms accepted when reading.
#[derive(Deserialize)]
#[serde(untagged)]
enum StoredCheckpoint {
    Tagged(Checkpoint),
    /// `{"progress": 10, "batch_job_id": null}`
    Legacy(LegacyCheckpoint),
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct LegacyCheckpoint {
    #[serde(default)]
    progress: usize,
    #[serde(default)]
    batch_job_id: Option<String>,
}

impl From<LegacyCheckpoint> for Checkpoint {
    fn from(legacy: LegacyCheckpoint) -> Self {
        match legacy.batch_job_id {
            Some(id) if !id.is_empty() => Checkpoint::AwaitingBatch {
                job_id: JobHandle::new(id),
                routes: IdentifierMapping::new(),
            },
            _ if legacy.progress > 0 => Checkpoint::InProgress {
                offset: legacy.progress,
                cards: Vec::new(),
            },
            _ => Checkpoint::NotStarted,
        }
    }
}

/// Parse checkpoint file content, accepting the legacy two-field format.
pub fn parse_checkpoint(raw: &str) -> Result<Checkpoint, serde_json::Error> {
    Ok(match serde_json::from_str::<StoredCheckpoint>(raw)? {
        StoredCheckpoint::Tagged(checkpoint) => checkpoint,
        StoredCheckpoint::Legacy(legacy) => legacy.into(),
    })
}

/// Reject an offset that cannot have been produced with `chunk_size` over
/// `total_pages` pages.
pub fn validate_offset(
    path: &Path,
    offset: usize,
    chunk_size: usize,
    total_pages: usize,
) -> Result<(), Pdf2CardsError> {
    if chunk_size == 0 {
        return Err(Pdf2CardsError::InvalidConfig("Chunk size must be ≥ 1".into()));
    }
    if offset > total_pages {
        return Err(Pdf2CardsError::CheckpointMismatch {
            path: path.to_path_buf(),
            detail: format!("offset {} exceeds the document's {} pages", offset, total_pages),
        });
    }
    if offset != total_pages && offset % chunk_size != 0 {
        return Err(Pdf2CardsError::CheckpointMismatch {
            path: path.to_path_buf(),
            detail: format!(
                "offset {} is not a multiple of chunk size {}",
                offset, chunk_size
            ),
        });
    }
    Ok(())
}

/// Lock-holding handle on a checkpoint file.
///
/// The lock is released when the tracker is dropped or the process exits.
#[derive(Debug)]
pub struct ProgressTracker {
    path: PathBuf,
    lock_path: PathBuf,
    lock: Option<File>,
}

impl ProgressTracker {
    /// Acquire the checkpoint at `path`.
    ///
    /// A lock file left behind by a run that was killed is not held by
    /// anyone and is simply taken over. With `no_resume`, an existing
    /// checkpoint is deleted once the lock is held, so the first
    /// [`load`](Self::load) returns [`Checkpoint::NotStarted`].
    pub fn open(path: impl Into<PathBuf>, no_resume: bool) -> Result<Self, Pdf2CardsError> {
        let path = path.into();
        let lock_path = lock_path_for(&path);

        if let Some(dir) = parent_dir(&path) {
            std::fs::create_dir_all(dir).map_err(|source| Pdf2CardsError::CheckpointIo {
                path: path.clone(),
                source,
            })?;
        }

        let lock_err = |source: std::io::Error| Pdf2CardsError::CheckpointIo {
            path: lock_path.clone(),
            source,
        };

        let mut lock = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(lock_err)?;

        if let Err(e) = lock.try_lock_exclusive() {
            if e.kind() != fs2::lock_contended_error().kind() {
                return Err(lock_err(e));
            }
            let mut pid = String::new();
            let holder = match lock.read_to_string(&mut pid) {
                Ok(_) if !pid.trim().is_empty() => format!("pid {}", pid.trim()),
                _ => "unknown process".to_string(),
            };
            return Err(Pdf2CardsError::CheckpointLocked { path, holder });
        }

        // PID is informational; a stale one from a killed run is overwritten.
        lock.set_len(0).map_err(lock_err)?;
        lock.seek(SeekFrom::Start(0)).map_err(lock_err)?;
        let _ = write!(lock, "{}", std::process::id());

        let tracker = Self {
            path,
            lock_path,
            lock: Some(lock),
        };

        if no_resume && tracker.path.exists() {
            info!("Discarding checkpoint {} (--no-resume)", tracker.path.display());
            tracker.clear()?;
        }

        Ok(tracker)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the checkpoint; a missing file means [`Checkpoint::NotStarted`].
    pub fn load(&self) -> Result<Checkpoint, Pdf2CardsError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Checkpoint::NotStarted),
            Err(source) => {
                return Err(Pdf2CardsError::CheckpointIo {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        let checkpoint = parse_checkpoint(&raw).map_err(|e| Pdf2CardsError::CheckpointCorrupt {
            path: self.path.clone(),
            detail: e.to_string(),
        })?;
        debug!("Loaded checkpoint {}: {}", self.path.display(), summary(&checkpoint));
        Ok(checkpoint)
    }

    /// Atomically replace the checkpoint file.
    pub fn save(&self, checkpoint: &Checkpoint) -> Result<(), Pdf2CardsError> {
        let json = serde_json::to_vec_pretty(checkpoint)
            .map_err(|e| Pdf2CardsError::Internal(format!("serialising checkpoint: {}", e)))?;

        let dir = parent_dir(&self.path).unwrap_or_else(|| Path::new("."));
        let io_err = |source: std::io::Error| Pdf2CardsError::CheckpointIo {
            path: self.path.clone(),
            source,
        };

        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(io_err)?;
        tmp.write_all(&json).map_err(io_err)?;
        tmp.as_file().sync_all().map_err(io_err)?;
        tmp.persist(&self.path).map_err(|e| io_err(e.error))?;

        debug!("Saved checkpoint {}: {}", self.path.display(), summary(checkpoint));
        Ok(())
    }

    /// Remove the checkpoint file; a missing file is not an error.
    pub fn clear(&self) -> Result<(), Pdf2CardsError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                debug!("Cleared checkpoint {}", self.path.display());
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(source) => Err(Pdf2CardsError::CheckpointIo {
                path: self.path.clone(),
                source,
            }),
        }
    }
}

impl Drop for ProgressTracker {
    fn drop(&mut self) {
        if let Some(lock) = self.lock.take() {
            let _ = lock.unlock();
        }
        if let Err(e) = std::fs::remove_file(&self.lock_path) {
            if e.kind() != ErrorKind::NotFound {
                warn!("Could not release lock {}: {}", self.lock_path.display(), e);
            }
        }
    }
}

fn lock_path_for(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".lock");
    PathBuf::from(name)
}

fn parent_dir(path: &Path) -> Option<&Path> {
    path.parent().filter(|p| !p.as_os_str().is_empty())
}

/// Short description for logs.
fn summary(checkpoint: &Checkpoint) -> String {
    match checkpoint {
        Checkpoint::NotStarted => "not started".to_string(),
        Checkpoint::InProgress { offset, cards } => {
            format!("offset {} with {} cards", offset, cards.len())
        }
        Checkpoint::AwaitingBatch { job_id, routes } => {
            format!("awaiting {} ({} routes)", job_id, routes.len())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn card(q: &str) -> Card {
        Card::new(q, "answer").unwrap()
    }

    #[test]
    fn missing_file_is_not_started() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = ProgressTracker::open(dir.path().join("p.json"), false).unwrap();
        assert_eq!(tracker.load().unwrap(), Checkpoint::NotStarted);
    }

    #[test]
    fn save_load_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = ProgressTracker::open(dir.path().join("p.json"), false).unwrap();
        tracker
            .save(&Checkpoint::InProgress {
                offset: 20,
                cards: vec![card("Q1"), card("Q2")],
            })
            .unwrap();

        let first = tracker.load().unwrap();
        tracker.save(&first).unwrap();
        tracker.save(&tracker.load().unwrap()).unwrap();
        assert_eq!(tracker.load().unwrap(), first);
    }

    #[test]
    fn clear_resets_to_not_started() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = ProgressTracker::open(dir.path().join("p.json"), false).unwrap();
        tracker.save(&Checkpoint::InProgress { offset: 10, cards: vec![] }).unwrap();
        tracker.clear().unwrap();
        tracker.clear().unwrap();
        assert_eq!(tracker.load().unwrap(), Checkpoint::NotStarted);
    }

    #[test]
    fn no_resume_discards_existing_checkpoint() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p.json");
        {
            let tracker = ProgressTracker::open(&path, false).unwrap();
            tracker.save(&Checkpoint::InProgress { offset: 15, cards: vec![] }).unwrap();
        }
        let tracker = ProgressTracker::open(&path, true).unwrap();
        assert!(!path.exists());
        assert_eq!(tracker.load().unwrap(), Checkpoint::NotStarted);

        tracker.save(&Checkpoint::InProgress { offset: 5, cards: vec![] }).unwrap();
        assert!(matches!(
            tracker.load().unwrap(),
            Checkpoint::InProgress { offset: 5, .. }
        ));
    }

    #[test]
    fn second_tracker_is_locked_out_until_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p.json");
        let first = ProgressTracker::open(&path, false).unwrap();
        match ProgressTracker::open(&path, false) {
            Err(Pdf2CardsError::CheckpointLocked { holder, .. }) => {
                assert_eq!(holder, format!("pid {}", std::process::id()));
            }
            other => panic!("unexpected: {other:?}"),
        }
        drop(first);
        assert!(ProgressTracker::open(&path, false).is_ok());
    }

    #[test]
    fn lock_left_by_a_killed_run_is_taken_over() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p.json");
        {
            let tracker = ProgressTracker::open(&path, false).unwrap();
            tracker.save(&Checkpoint::InProgress { offset: 10, cards: vec![] }).unwrap();
        }
        // A killed process leaves its lock file behind, but no lock on it.
        std::fs::write(lock_path_for(&path), "999999").unwrap();

        let tracker = ProgressTracker::open(&path, false).unwrap();
        assert!(matches!(
            tracker.load().unwrap(),
            Checkpoint::InProgress { offset: 10, .. }
        ));
        assert_eq!(
            std::fs::read_to_string(lock_path_for(&path)).unwrap(),
            std::process::id().to_string()
        );
        drop(tracker);
        assert!(!lock_path_for(&path).exists());
    }

    #[test]
    fn corrupt_file_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("p.json");
        std::fs::write(&path, "{ half a checkpoint").unwrap();
        let tracker = ProgressTracker::open(&path, false).unwrap();
        let err = tracker.load().unwrap_err();
        assert!(matches!(err, Pdf2CardsError::CheckpointCorrupt { .. }));
        assert!(err.to_string().contains("--no-resume"));
    }

    #[test]
    fn tagged_format_on_disk() {
        let raw = serde_json::to_string(&Checkpoint::AwaitingBatch {
            job_id: JobHandle::new("batch_abc"),
            routes: IdentifierMapping::new(),
        })
        .unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["state"], "awaiting_batch");
        assert_eq!(value["job_id"], "batch_abc");
    }

    #[test]
    fn legacy_format_is_readable() {
        assert_eq!(
            parse_checkpoint(r#"{"progress": 20, "batch_job_id": null}"#).unwrap(),
            Checkpoint::InProgress { offset: 20, cards: vec![] }
        );
        assert_eq!(
            parse_checkpoint(r#"{"progress": 0, "batch_job_id": "batch_123"}"#).unwrap(),
            Checkpoint::AwaitingBatch {
                job_id: JobHandle::new("batch_123"),
                routes: IdentifierMapping::new(),
            }
        );
        assert_eq!(
            parse_checkpoint(r#"{"progress": 0, "batch_job_id": null}"#).unwrap(),
            Checkpoint::NotStarted
        );
        assert!(parse_checkpoint(r#"{"offset": 3}"#).is_err());
    }

    #[test]
    fn offsets_must_fit_the_chunking() {
        let p = Path::new("p.json");
        assert!(validate_offset(p, 0, 10, 25).is_ok());
        assert!(validate_offset(p, 20, 10, 25).is_ok());
        assert!(validate_offset(p, 25, 10, 25).is_ok());
        assert!(matches!(
            validate_offset(p, 15, 10, 25),
            Err(Pdf2CardsError::CheckpointMismatch { .. })
        ));
        assert!(validate_offset(p, 30, 10, 25).is_err());
    }

    #[test]
    fn zero_chunk_size_is_a_config_error() {
        assert!(matches!(
            validate_offset(Path::new("p.json"), 10, 0, 25),
            Err(Pdf2CardsError::InvalidConfig(_))
        ));
    }
}
