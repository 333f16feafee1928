//! Append-only checkpoints of pipeline stage output.
//!
//! Every [`CheckpointStore::save`] writes a new JSON document named after the
//! stage and the UTC time of the save. Nothing is ever overwritten, so a
//! post-mortem sees the full history of a run. Checkpoints are telemetry: a
//! failed write is logged and dropped, and the pipeline never reads them back.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::Result;

/// A snapshot of one stage's output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub stage_name: String,
    pub timestamp: DateTime<Utc>,
    pub payload: Value,
    /// File the checkpoint was read from. Not part of the document.
    #[serde(skip)]
    pub path: PathBuf,
}

/// Directory-backed checkpoint writer.
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    dir: PathBuf,
}

impl CheckpointStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Record `payload` for `stage`. Returns the written path, or `None` if
    /// the write failed.
    pub fn save<P: Serialize + ?Sized>(&self, stage: &str, payload: &P) -> Option<PathBuf> {
        match self.try_save(stage, payload) {
            Ok(path) => {
                debug!(stage, path = %path.display(), "checkpoint saved");
                Some(path)
            }
            Err(e) => {
                warn!(stage, dir = %self.dir.display(), error = %e, "failed to save checkpoint");
                None
            }
        }
    }

    fn try_save<P: Serialize + ?Sized>(&self, stage: &str, payload: &P) -> Result<PathBuf> {
        let checkpoint = Checkpoint {
            stage_name: stage.to_string(),
            timestamp: Utc::now(),
            payload: serde_json::to_value(payload)?,
            path: PathBuf::new(),
        };
        let contents = serde_json::to_vec_pretty(&checkpoint)?;
        fs::create_dir_all(&self.dir)?;

        let base = format!(
            "{}-{}",
            slug(stage),
            checkpoint.timestamp.format("%Y%m%dT%H%M%S%.9fZ")
        );
        let mut collision = 0u32;
        loop {
            let name = if collision == 0 {
                format!("{base}.json")
            } else {
                format!("{base}-{collision}.json")
            };
            let path = self.dir.join(name);
            match OpenOptions::new().write(true).create_new(true).open(&path) {
                Ok(file) => {
                    write_or_discard(&path, file, &contents)?;
                    return Ok(path);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => collision += 1,
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Every readable checkpoint in the directory, oldest first.
    pub fn list(&self) -> Result<Vec<Checkpoint>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut checkpoints = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            match read_checkpoint(&path) {
                Ok(mut checkpoint) => {
                    checkpoint.path = path;
                    checkpoints.push(checkpoint);
                }
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable checkpoint"),
            }
        }

        // Same-instant saves differ only by collision suffix: shorter name first.
        checkpoints.sort_by(|a, b| {
            let name = |c: &Checkpoint| c.path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
            a.timestamp
                .cmp(&b.timestamp)
                .then_with(|| name(a).len().cmp(&name(b).len()))
                .then_with(|| name(a).cmp(&name(b)))
        });
        Ok(checkpoints)
    }

    /// All checkpoints for one stage, oldest first.
    pub fn history(&self, stage: &str) -> Result<Vec<Checkpoint>> {
        Ok(self
            .list()?
            .into_iter()
            .filter(|c| c.stage_name == stage)
            .collect())
    }

    pub fn latest(&self, stage: &str) -> Result<Option<Checkpoint>> {
        Ok(self.history(stage)?.pop())
    }
}

/// Fill a freshly created checkpoint file. A half-written file would later
/// be skipped as unreadable, so on failure it is removed again.
fn write_or_discard(path: &Path, mut file: File, contents: &[u8]) -> std::io::Result<()> {
    let written = file.write_all(contents).and_then(|()| file.sync_all());
    if written.is_err() {
        drop(file);
        if let Err(e) = fs::remove_file(path) {
            warn!(path = %path.display(), error = %e, "failed to remove partial checkpoint");
        }
    }
    written
}

fn read_checkpoint(path: &Path) -> Result<Checkpoint> {
    let bytes = fs::read(path)?;
    Ok(serde_json::from_slice(&bytes)?)
}

fn slug(stage: &str) -> String {
    let slug: String = stage
        .trim()
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect();
    if slug.is_empty() {
        "stage".to_string()
    } else {
        slug
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn same_stage_twice_keeps_both() {
        let tmp = TempDir::new().unwrap();
        let store = CheckpointStore::new(tmp.path().join("checkpoints"));

        let first = store.save("phase4-images", &json!({"count": 5})).unwrap();
        let second = store.save("phase4-images", &json!({"count": 7})).unwrap();
        assert_ne!(first, second);

        let history = store.history("phase4-images").unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].payload, json!({"count": 5}));
        assert_eq!(history[1].payload, json!({"count": 7}));
        assert_eq!(history[0].path, first);

        let latest = store.latest("phase4-images").unwrap().unwrap();
        assert_eq!(latest.payload["count"], 7);
    }

    #[test]
    fn history_filters_by_stage() {
        let tmp = TempDir::new().unwrap();
        let store = CheckpointStore::new(tmp.path());

        store.save("scrape", &json!({"url": "https://example.com"}));
        store.save("narration", &json!({"cost": 0.3}));
        store.save("scrape", &json!({"url": "https://example.org"}));

        assert_eq!(store.list().unwrap().len(), 3);
        assert_eq!(store.history("scrape").unwrap().len(), 2);
        assert_eq!(store.history("narration").unwrap().len(), 1);
        assert!(store.latest("upload").unwrap().is_none());
    }

    #[test]
    fn file_name_is_slug_and_timestamp() {
        let tmp = TempDir::new().unwrap();
        let store = CheckpointStore::new(tmp.path());

        let path = store.save("Phase 7/Assembled", &json!(null)).unwrap();
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("phase-7-assembled-"), "{name}");
        assert!(name.ends_with("Z.json"), "{name}");
    }

    #[test]
    fn save_failure_is_swallowed() {
        let tmp = TempDir::new().unwrap();
        let blocker = tmp.path().join("not-a-dir");
        fs::write(&blocker, "file in the way").unwrap();

        let store = CheckpointStore::new(&blocker);
        assert!(store.save("scrape", &json!({"ok": true})).is_none());
    }

    #[test]
    fn failed_write_leaves_no_partial_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("scrape-20250101T000000.000000000Z.json");
        fs::write(&path, "").unwrap();
        // A read-only handle makes the write itself fail after the open.
        let file = File::open(&path).unwrap();

        assert!(write_or_discard(&path, file, b"{}").is_err());
        assert!(!path.exists());
        let store = CheckpointStore::new(tmp.path());
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn list_of_missing_dir_is_empty() {
        let tmp = TempDir::new().unwrap();
        let store = CheckpointStore::new(tmp.path().join("never-created"));
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn unreadable_files_are_skipped() {
        let tmp = TempDir::new().unwrap();
        let store = CheckpointStore::new(tmp.path());
        fs::write(tmp.path().join("garbage.json"), "{not json").unwrap();
        fs::write(tmp.path().join("notes.txt"), "ignored").unwrap();
        store.save("script", &json!({"words": 1500}));

        let all = store.list().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].stage_name, "script");
    }

    #[test]
    fn slug_handles_empty_and_symbols() {
        assert_eq!(slug(""), "stage");
        assert_eq!(slug("phase1-jsonl"), "phase1-jsonl");
        assert_eq!(slug("A b.c"), "a-b-c");
    }
}
