use std::{
    fs,
    path::{Path, PathBuf},
    time::Duration,
};

use chrono::Utc;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::debug;

use tgm_core::Result;

/// Persisted feed storage: one JSON file per key under a directory, each
/// holding `{ value, timestamp, expires_at }` (Unix millis). Survives process
/// restarts until the entry's TTL lapses; expired entries are removed on
/// load and reported as a miss.
///
/// This TTL is independent of the in-memory cache's: the two sources can
/// transiently disagree on freshness, and whichever answers first wins for
/// that read.
#[derive(Clone, Debug)]
pub struct FeedStorage {
    dir: PathBuf,
    ttl: Duration,
}

#[derive(Debug, Serialize, Deserialize)]
struct PersistedEntry<T> {
    value: T,
    timestamp: i64,
    expires_at: i64,
}

impl FeedStorage {
    pub fn open(dir: impl Into<PathBuf>, ttl: Duration) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir, ttl })
    }

    pub fn load<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let path = self.key_path(key);
        let txt = fs::read_to_string(&path).ok()?;
        let entry: PersistedEntry<T> = serde_json::from_str(&txt).ok()?;
        if Utc::now().timestamp_millis() > entry.expires_at {
            debug!("persisted entry {key} expired, removing");
            let _ = fs::remove_file(&path);
            return None;
        }
        Some(entry.value)
    }

    pub fn save<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let now = Utc::now().timestamp_millis();
        let entry = PersistedEntry {
            value,
            timestamp: now,
            expires_at: now + self.ttl.as_millis() as i64,
        };
        let txt = serde_json::to_string(&entry)?;
        // Write through a temp file so a crash mid-save leaves the previous
        // entry intact.
        let path = self.key_path(key);
        let tmp = tmp_path(&path);
        fs::write(&tmp, txt)?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    pub fn remove(&self, key: &str) {
        let _ = fs::remove_file(self.key_path(key));
    }

    /// Wipe every persisted entry in this storage's directory.
    pub fn clear(&self) -> Result<()> {
        for entry in fs::read_dir(&self.dir)? {
            let entry = entry?;
            if entry.path().extension().map_or(false, |e| e == "json") {
                let _ = fs::remove_file(entry.path());
            }
        }
        Ok(())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn key_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(".tmp");
    PathBuf::from(os)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tmp_dir(prefix: &str) -> PathBuf {
        let ts = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let pid = std::process::id();
        PathBuf::from(format!("/tmp/{prefix}-{pid}-{ts}"))
    }

    #[test]
    fn save_load_round_trips() {
        let storage = FeedStorage::open(tmp_dir("tgm-feedstore"), Duration::from_secs(60)).unwrap();
        storage.save("posts-data", &vec![1u32, 2, 3]).unwrap();
        let back: Option<Vec<u32>> = storage.load("posts-data");
        assert_eq!(back, Some(vec![1, 2, 3]));
        // The staging file never outlives the save.
        assert!(!tmp_path(&storage.key_path("posts-data")).exists());
    }

    #[test]
    fn expired_entries_miss_and_are_removed() {
        let storage = FeedStorage::open(tmp_dir("tgm-feedexp"), Duration::from_millis(0)).unwrap();
        storage.save("posts-data", &"stale").unwrap();
        // TTL zero: expired as soon as the clock advances.
        std::thread::sleep(Duration::from_millis(5));
        let back: Option<String> = storage.load("posts-data");
        assert_eq!(back, None);
        assert!(!storage.key_path("posts-data").exists());
    }

    #[test]
    fn clear_wipes_all_keys() {
        let storage = FeedStorage::open(tmp_dir("tgm-feedclear"), Duration::from_secs(60)).unwrap();
        storage.save("a", &1u32).unwrap();
        storage.save("b", &2u32).unwrap();
        storage.clear().unwrap();
        assert_eq!(storage.load::<u32>("a"), None);
        assert_eq!(storage.load::<u32>("b"), None);
    }
}
