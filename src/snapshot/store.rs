//! Append-only directory of snapshot files.
//!
//! Files are named `save_<timestamp>.txt` where the timestamp is UTC with
//! millisecond precision and `:`/`.` replaced by `-`, e.g.
//! `save_2024-05-01T10-00-00-000Z.txt`. Names sort lexicographically in
//! creation order; the store never hands out the same stamp twice, even
//! within one millisecond or after the clock steps back.

use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDateTime, SubsecRound, TimeZone, Timelike, Utc};
use parking_lot::Mutex;
use serde::Serialize;

use crate::error::Result;

const PREFIX: &str = "save_";
const SUFFIX: &str = ".txt";

/// One persisted snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SnapshotRecord {
    pub path: PathBuf,
    pub taken_at: DateTime<Utc>,
    pub bytes: usize,
}

/// File name for a snapshot taken at `at`.
pub fn file_name(at: DateTime<Utc>) -> String {
    format!("{}{}{}", PREFIX, at.format("%Y-%m-%dT%H-%M-%S-%3fZ"), SUFFIX)
}

/// Recover the timestamp from a snapshot file name.
pub fn parse_file_name(name: &str) -> Option<DateTime<Utc>> {
    let stamp = name.strip_prefix(PREFIX)?.strip_suffix(SUFFIX)?;
    if stamp.len() != 24 || !stamp.is_char_boundary(19) {
        return None;
    }
    let (seconds, millis) = stamp.split_at(19);
    let millis: u32 = millis.strip_prefix('-')?.strip_suffix('Z')?.parse().ok()?;

    let naive = NaiveDateTime::parse_from_str(seconds, "%Y-%m-%dT%H-%M-%S").ok()?;
    let naive = naive.with_nanosecond(millis.checked_mul(1_000_000)?)?;
    Some(Utc.from_utc_datetime(&naive))
}

fn is_snapshot_name(name: &str) -> bool {
    name.starts_with(PREFIX) && name.ends_with(SUFFIX)
}

pub struct SnapshotStore {
    dir: PathBuf,
    last_stamp: Mutex<Option<DateTime<Utc>>>,
}

impl SnapshotStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            last_stamp: Mutex::new(None),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// All snapshot files, oldest first.
    pub async fn list(&self) -> Result<Vec<PathBuf>> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut names = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if let Some(name) = entry.file_name().to_str() {
                if is_snapshot_name(name) {
                    names.push(name.to_string());
                }
            }
        }
        names.sort();

        Ok(names.into_iter().map(|n| self.dir.join(n)).collect())
    }

    /// Most recent snapshot: the lexicographically greatest name.
    pub async fn latest(&self) -> Result<Option<PathBuf>> {
        Ok(self.list().await?.pop())
    }

    pub async fn load_latest(&self) -> Result<Option<(PathBuf, Vec<u8>)>> {
        match self.latest().await? {
            Some(path) => {
                let payload = tokio::fs::read(&path).await?;
                Ok(Some((path, payload)))
            }
            None => Ok(None),
        }
    }

    /// Persist `payload` under a fresh name. Never overwrites.
    pub async fn write(&self, payload: &[u8]) -> Result<SnapshotRecord> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let needs_seed = self.last_stamp.lock().is_none();
        let seed = if needs_seed {
            self.latest()
                .await?
                .and_then(|p| p.file_name()?.to_str().and_then(parse_file_name))
        } else {
            None
        };

        let taken_at = self.next_stamp(seed);
        let path = self.dir.join(file_name(taken_at));

        // Write to a hidden temp file first so readers never see a partial file
        let temp = self.dir.join(format!(".{}.tmp", file_name(taken_at)));
        tokio::fs::write(&temp, payload).await?;
        tokio::fs::rename(&temp, &path).await?;

        tracing::debug!("[snapshot] wrote {} bytes to {}", payload.len(), path.display());

        Ok(SnapshotRecord {
            path,
            taken_at,
            bytes: payload.len(),
        })
    }

    /// Current time at ms precision, strictly after every stamp handed out.
    fn next_stamp(&self, seed: Option<DateTime<Utc>>) -> DateTime<Utc> {
        let mut last = self.last_stamp.lock();
        if last.is_none() {
            *last = seed;
        }

        let now = Utc::now().trunc_subsecs(3);
        let stamp = match *last {
            Some(prev) if now <= prev => prev + chrono::Duration::milliseconds(1),
            _ => now,
        };
        *last = Some(stamp);
        stamp
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_file_name_format() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 7).unwrap()
            + chrono::Duration::milliseconds(42);
        assert_eq!(file_name(at), "save_2024-05-01T10-00-07-042Z.txt");
        assert_eq!(parse_file_name(&file_name(at)), Some(at));
    }

    #[test]
    fn test_parse_rejects_foreign_names() {
        assert_eq!(parse_file_name("notes.txt"), None);
        assert_eq!(parse_file_name("save_yesterday.txt"), None);
        assert_eq!(parse_file_name("save_2024-05-01T10-00-07-042Z.json"), None);
    }

    #[tokio::test]
    async fn test_writes_never_collide() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path());

        let mut names = Vec::new();
        for i in 0..5 {
            let record = store.write(format!("payload-{}", i).as_bytes()).await.unwrap();
            names.push(record.path.file_name().unwrap().to_owned());
        }

        let mut sorted = names.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted, names, "names must be unique and in creation order");

        let files = store.list().await.unwrap();
        assert_eq!(files.len(), 5);
        let newest = std::fs::read_to_string(files.last().unwrap()).unwrap();
        assert_eq!(newest, "payload-4");
    }

    #[tokio::test]
    async fn test_new_names_sort_after_existing_files() {
        let dir = TempDir::new().unwrap();
        let future = "save_2999-01-01T00-00-00-000Z.txt";
        std::fs::write(dir.path().join(future), "old").unwrap();

        let store = SnapshotStore::new(dir.path());
        let record = store.write(b"new").await.unwrap();
        assert!(record.path.file_name().unwrap().to_str().unwrap() > future);

        let (latest, payload) = store.load_latest().await.unwrap().unwrap();
        assert_eq!(latest, record.path);
        assert_eq!(payload, b"new");
    }

    #[tokio::test]
    async fn test_latest_ignores_other_files() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path());
        assert_eq!(store.latest().await.unwrap(), None);

        std::fs::write(dir.path().join("zzz.txt"), "x").unwrap();
        std::fs::write(dir.path().join(".save_2030.txt.tmp"), "x").unwrap();
        assert_eq!(store.latest().await.unwrap(), None);

        let record = store.write(b"state").await.unwrap();
        assert_eq!(store.latest().await.unwrap(), Some(record.path));
    }

    #[tokio::test]
    async fn test_missing_directory_lists_empty() {
        let dir = TempDir::new().unwrap();
        let store = SnapshotStore::new(dir.path().join("not-yet"));
        assert!(store.list().await.unwrap().is_empty());
        assert!(store.load_latest().await.unwrap().is_none());
    }
}
