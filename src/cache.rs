use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::persist;

const LOG_FILE: &str = "log.tsv";
const PAYLOAD_DIR: &str = "payloads";

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Cache payload encoding failed: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("Failed to commit payload file: {0}")]
    Persist(#[from] tempfile::PersistError),
    #[error("Cache key is not a single-line value: {0:?}")]
    InvalidKey(String),
}

/// A stored HTTP answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedResponse {
    pub status: u16,
    pub body: String,
}

/// Durable request→response cache.
///
/// Layout: an append-only `log.tsv` of `key<TAB>n` lines and one
/// `payloads/<n>.json` file per entry, numbered monotonically. A payload is
/// fully written and renamed into place before its log line is appended, so
/// readers only ever see complete entries.
pub struct ResponseCache {
    dir: PathBuf,
    state: Mutex<CacheState>,
}

struct CacheState {
    index: HashMap<String, u64>,
    next: u64,
    log: File,
}

impl ResponseCache {
    /// Open or create a cache rooted at `dir`.
    pub fn open(dir: &Path) -> Result<Self, CacheError> {
        std::fs::create_dir_all(dir.join(PAYLOAD_DIR))?;
        let log_path = dir.join(LOG_FILE);

        let mut index = HashMap::new();
        let mut next = 0u64;
        for line in persist::read_committed_lines(&log_path)? {
            let Some((key, n)) = line.rsplit_once('\t') else {
                tracing::warn!("Skipping malformed cache log line: {:?}", line);
                continue;
            };
            let Ok(n) = n.trim().parse::<u64>() else {
                tracing::warn!("Skipping cache log line with bad index: {:?}", line);
                continue;
            };
            index.insert(key.to_string(), n);
            next = next.max(n + 1);
        }
        let log = persist::open_append(&log_path)?;
        tracing::info!("Opened response cache at {} ({} entries)", dir.display(), index.len());

        Ok(Self {
            dir: dir.to_path_buf(),
            state: Mutex::new(CacheState { index, next, log }),
        })
    }

    /// Look up a request. A logged key whose payload is missing or unreadable
    /// is reported as a miss.
    pub fn get(&self, key: &str) -> Option<CachedResponse> {
        let n = {
            let state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            *state.index.get(key)?
        };
        let path = self.payload_path(n);
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!("Cache payload {} unreadable, treating as miss: {}", path.display(), e);
                return None;
            }
        };
        match serde_json::from_str(&raw) {
            Ok(resp) => {
                tracing::debug!("Cache hit: {}", key);
                Some(resp)
            }
            Err(e) => {
                tracing::warn!("Cache payload {} corrupt, treating as miss: {}", path.display(), e);
                None
            }
        }
    }

    /// Store a response under `key`, replacing any earlier entry for it.
    pub fn put(&self, key: &str, response: &CachedResponse) -> Result<(), CacheError> {
        if key.contains('\t') || key.contains('\n') {
            return Err(CacheError::InvalidKey(key.to_string()));
        }
        let encoded = serde_json::to_vec(response)?;

        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let n = state.next;

        let mut tmp = tempfile::NamedTempFile::new_in(self.dir.join(PAYLOAD_DIR))?;
        tmp.write_all(&encoded)?;
        tmp.as_file().sync_data()?;
        tmp.persist(self.payload_path(n))?;

        persist::append_line(&mut state.log, &format!("{}\t{}", key, n))?;
        state.index.insert(key.to_string(), n);
        state.next = n + 1;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .index
            .len()
    }

    fn payload_path(&self, n: u64) -> PathBuf {
        self.dir.join(PAYLOAD_DIR).join(format!("{}.json", n))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn ok(body: &str) -> CachedResponse {
        CachedResponse { status: 200, body: body.to_string() }
    }

    #[test]
    fn test_entries_survive_reopen() {
        let tmp = TempDir::new().unwrap();
        {
            let cache = ResponseCache::open(tmp.path()).unwrap();
            cache.put("https://api/paper/A?fields=title", &ok("{\"a\":1}")).unwrap();
            cache.put("https://api/paper/B?fields=title", &ok("{\"b\":2}")).unwrap();
        }
        let cache = ResponseCache::open(tmp.path()).unwrap();
        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("https://api/paper/B?fields=title"), Some(ok("{\"b\":2}")));
        assert_eq!(cache.get("https://api/paper/C?fields=title"), None);

        // numbering continues after the highest committed index
        cache.put("https://api/paper/C?fields=title", &ok("c")).unwrap();
        assert!(tmp.path().join("payloads/2.json").exists());
    }

    #[test]
    fn test_missing_or_corrupt_payload_is_a_miss() {
        let tmp = TempDir::new().unwrap();
        let cache = ResponseCache::open(tmp.path()).unwrap();
        cache.put("k0", &ok("zero")).unwrap();
        cache.put("k1", &ok("one")).unwrap();

        std::fs::remove_file(tmp.path().join("payloads/0.json")).unwrap();
        std::fs::write(tmp.path().join("payloads/1.json"), "{not json").unwrap();

        assert_eq!(cache.get("k0"), None);
        assert_eq!(cache.get("k1"), None);

        // a re-fetch repairs the entry
        cache.put("k1", &ok("one again")).unwrap();
        assert_eq!(cache.get("k1"), Some(ok("one again")));
    }

    #[test]
    fn test_interrupted_log_append_is_not_visible() {
        let tmp = TempDir::new().unwrap();
        {
            let cache = ResponseCache::open(tmp.path()).unwrap();
            cache.put("k0", &ok("zero")).unwrap();
        }
        let mut log = std::fs::OpenOptions::new()
            .append(true)
            .open(tmp.path().join(LOG_FILE))
            .unwrap();
        log.write_all(b"k1\t").unwrap();
        drop(log);

        let cache = ResponseCache::open(tmp.path()).unwrap();
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.get("k1"), None);
    }

    #[test]
    fn test_rejects_multiline_keys() {
        let tmp = TempDir::new().unwrap();
        let cache = ResponseCache::open(tmp.path()).unwrap();
        assert!(matches!(cache.put("a\tb", &ok("x")), Err(CacheError::InvalidKey(_))));
    }
}
