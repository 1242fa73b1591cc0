use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::{domain::Post, Result};

/// A stored post plus the update that delivered it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoredPost {
    #[serde(flatten)]
    pub post: Post,
    pub update_id: i64,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreData {
    /// Max `update_id` seen so far; the next poll offset is `cursor + 1`.
    /// This tracks long-polling progress, it is NOT a message id.
    cursor: Option<i64>,
    posts: BTreeMap<i64, StoredPost>,
}

/// Durable post store: one JSON file, posts keyed by `message_id`.
///
/// This is the source of truth; the in-memory caches in front of it are
/// disposable. Writes go through a temp file and a rename so a crash
/// mid-save leaves the previous file intact. Upsert is idempotent, so
/// concurrent syncs racing on the same offset converge (wasted work, not
/// corruption); in-process access is serialized by the owner.
#[derive(Debug)]
pub struct PostStore {
    path: PathBuf,
    data: StoreData,
}

impl PostStore {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let data = match fs::read_to_string(&path) {
            Ok(txt) => serde_json::from_str(&txt)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StoreData::default(),
            Err(e) => return Err(e.into()),
        };
        Ok(Self { path, data })
    }

    /// Insert or overwrite one post. Returns true if the id was new.
    pub fn upsert(&mut self, post: Post, update_id: i64) -> bool {
        self.data
            .posts
            .insert(post.message_id, StoredPost { post, update_id })
            .is_none()
    }

    /// Upsert a batch; returns how many posts were written (new or
    /// overwritten — re-ingesting the same batch reports the same count).
    pub fn upsert_batch(&mut self, batch: Vec<(Post, i64)>) -> usize {
        let mut saved = 0;
        for (post, update_id) in batch {
            self.upsert(post, update_id);
            saved += 1;
        }
        saved
    }

    /// Posts sorted by date descending (ties broken by message id descending).
    pub fn list(&self, limit: usize, offset: usize) -> Vec<Post> {
        let mut posts: Vec<&StoredPost> = self.data.posts.values().collect();
        posts.sort_by(|a, b| {
            b.post
                .date
                .cmp(&a.post.date)
                .then(b.post.message_id.cmp(&a.post.message_id))
        });
        posts
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|sp| sp.post.clone())
            .collect()
    }

    pub fn len(&self) -> usize {
        self.data.posts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.posts.is_empty()
    }

    pub fn cursor(&self) -> Option<i64> {
        self.data.cursor
    }

    /// Advance the cursor monotonically; a stale update id never moves it back.
    pub fn advance_cursor(&mut self, update_id: i64) {
        self.data.cursor = Some(match self.data.cursor {
            Some(c) => c.max(update_id),
            None => update_id,
        });
    }

    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let txt = serde_json::to_string(&self.data)?;
        let tmp = tmp_path(&self.path);
        fs::write(&tmp, txt)?;
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
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

    fn tmp_store(prefix: &str) -> PathBuf {
        let ts = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        let pid = std::process::id();
        PathBuf::from(format!("/tmp/{prefix}-{pid}-{ts}.json"))
    }

    fn post(message_id: i64, date: i64, text: &str) -> Post {
        Post {
            message_id,
            date,
            text: Some(text.to_string()),
            caption: None,
            media: None,
            views: None,
            forwards: None,
        }
    }

    #[test]
    fn reingesting_the_same_batch_is_idempotent() {
        let mut store = PostStore::open(tmp_store("tgm-store-idem")).unwrap();
        let batch = vec![
            (post(1, 100, "first"), 900),
            (post(2, 200, "second"), 901),
        ];

        assert_eq!(store.upsert_batch(batch.clone()), 2);
        assert_eq!(store.upsert_batch(batch), 2);
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn upsert_overwrites_counters_wholesale() {
        let mut store = PostStore::open(tmp_store("tgm-store-over")).unwrap();
        let mut p = post(1, 100, "hello");
        p.views = Some(10);
        store.upsert(p, 900);

        let mut refreshed = post(1, 100, "hello");
        refreshed.views = Some(25);
        assert!(!store.upsert(refreshed, 905));

        let listed = store.list(10, 0);
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].views, Some(25));
    }

    #[test]
    fn list_is_date_descending_and_paginates() {
        let mut store = PostStore::open(tmp_store("tgm-store-list")).unwrap();
        store.upsert(post(1, 100, "oldest"), 900);
        store.upsert(post(2, 300, "newest"), 901);
        store.upsert(post(3, 200, "middle"), 902);

        let page = store.list(2, 0);
        assert_eq!(page[0].message_id, 2);
        assert_eq!(page[1].message_id, 3);

        let rest = store.list(2, 2);
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].message_id, 1);
    }

    #[test]
    fn cursor_advances_monotonically() {
        let mut store = PostStore::open(tmp_store("tgm-store-cursor")).unwrap();
        assert_eq!(store.cursor(), None);

        store.advance_cursor(10);
        store.advance_cursor(7);
        assert_eq!(store.cursor(), Some(10));

        store.advance_cursor(12);
        assert_eq!(store.cursor(), Some(12));
    }

    #[test]
    fn save_and_reopen_round_trips() {
        let path = tmp_store("tgm-store-persist");
        {
            let mut store = PostStore::open(&path).unwrap();
            store.upsert(post(42, 1_700_000_000, "Hello"), 900);
            store.advance_cursor(900);
            store.save().unwrap();
        }

        let store = PostStore::open(&path).unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.cursor(), Some(900));
        assert_eq!(store.list(10, 0)[0].text.as_deref(), Some("Hello"));
    }
}
