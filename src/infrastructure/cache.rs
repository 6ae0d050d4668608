// Key-value cache port (hash-of-fields model) and its in-process adapter

use async_trait::async_trait;
use lru::LruCache;
use regex::Regex;
use std::collections::{BTreeMap, HashMap};
use std::num::NonZeroUsize;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

use crate::error::{AppError, AppResult};

/// Hash-field cache. A hash `key` groups many `field`s, each with its own TTL.
///
/// `scan_fields` follows cursor semantics: start at 0, feed back the returned
/// cursor, and stop once it comes back as 0. `count` bounds the number of
/// fields examined per step, not the number returned.
#[async_trait]
pub trait Cache: Send + Sync + std::fmt::Debug {
    async fn get_field(&self, key: &str, field: &str) -> AppResult<Option<Vec<u8>>>;

    async fn set_field(&self, key: &str, field: &str, value: Vec<u8>, ttl: Duration)
        -> AppResult<()>;

    async fn delete_fields(&self, key: &str, fields: &[String]) -> AppResult<u64>;

    async fn scan_fields(
        &self,
        key: &str,
        cursor: u64,
        pattern: &str,
        count: usize,
    ) -> AppResult<(u64, Vec<String>)>;

    /// Delete every field of `key` matching the glob `pattern`, scanning in
    /// steps of at most `batch` fields.
    async fn delete_pattern(&self, key: &str, pattern: &str, batch: usize) -> AppResult<u64> {
        let mut cursor = 0;
        let mut deleted = 0;
        loop {
            let (next, fields) = self.scan_fields(key, cursor, pattern, batch).await?;
            if !fields.is_empty() {
                deleted += self.delete_fields(key, &fields).await?;
            }
            if next == 0 {
                return Ok(deleted);
            }
            cursor = next;
        }
    }
}

/// Translate a glob (`*`, `?`) into an anchored regex
pub fn glob_to_regex(pattern: &str) -> AppResult<Regex> {
    let mut source = String::with_capacity(pattern.len() + 8);
    source.push('^');
    for ch in pattern.chars() {
        match ch {
            '*' => source.push_str(".*"),
            '?' => source.push('.'),
            other => source.push_str(&regex::escape(&other.to_string())),
        }
    }
    source.push('$');
    Regex::new(&source).map_err(|e| AppError::Cache(format!("invalid pattern {}: {}", pattern, e)))
}

#[derive(Debug, Clone)]
struct CacheEntry {
    data: Vec<u8>,
    expires_at: Instant,
    seq: u64,
}

impl CacheEntry {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Fields of one hash key. `index` orders fields by insertion sequence so a
/// scan cursor stays valid while fields are deleted between steps.
#[derive(Debug)]
struct HashSpace {
    entries: LruCache<String, CacheEntry>,
    index: BTreeMap<u64, String>,
}

impl HashSpace {
    fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: LruCache::new(capacity),
            index: BTreeMap::new(),
        }
    }

    fn remove(&mut self, field: &str) -> bool {
        match self.entries.pop(field) {
            Some(entry) => {
                self.index.remove(&entry.seq);
                true
            }
            None => false,
        }
    }
}

#[derive(Debug)]
struct CacheState {
    spaces: HashMap<String, HashSpace>,
    next_seq: u64,
}

/// In-process cache. Each hash key holds at most `capacity` fields; the least
/// recently used field is evicted beyond that.
#[derive(Debug)]
pub struct InMemoryCache {
    state: RwLock<CacheState>,
    capacity: NonZeroUsize,
}

impl InMemoryCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: RwLock::new(CacheState {
                spaces: HashMap::new(),
                next_seq: 1,
            }),
            capacity: NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN),
        }
    }

    pub async fn len(&self, key: &str) -> usize {
        self.state
            .read()
            .await
            .spaces
            .get(key)
            .map_or(0, |space| space.entries.len())
    }
}

#[async_trait]
impl Cache for InMemoryCache {
    async fn get_field(&self, key: &str, field: &str) -> AppResult<Option<Vec<u8>>> {
        let mut state = self.state.write().await;
        let Some(space) = state.spaces.get_mut(key) else {
            return Ok(None);
        };

        let now = Instant::now();
        let expired = match space.entries.get(field) {
            Some(entry) if !entry.is_expired(now) => return Ok(Some(entry.data.clone())),
            Some(_) => true,
            None => false,
        };
        if expired {
            space.remove(field);
        }
        Ok(None)
    }

    async fn set_field(
        &self,
        key: &str,
        field: &str,
        value: Vec<u8>,
        ttl: Duration,
    ) -> AppResult<()> {
        let mut state = self.state.write().await;
        let seq = state.next_seq;
        state.next_seq += 1;

        let capacity = self.capacity;
        let space = state
            .spaces
            .entry(key.to_string())
            .or_insert_with(|| HashSpace::new(capacity));

        let entry = CacheEntry {
            data: value,
            expires_at: Instant::now() + ttl,
            seq,
        };
        if let Some((_, displaced)) = space.entries.push(field.to_string(), entry) {
            space.index.remove(&displaced.seq);
        }
        space.index.insert(seq, field.to_string());
        Ok(())
    }

    async fn delete_fields(&self, key: &str, fields: &[String]) -> AppResult<u64> {
        let mut state = self.state.write().await;
        let Some(space) = state.spaces.get_mut(key) else {
            return Ok(0);
        };
        Ok(fields.iter().filter(|field| space.remove(field)).count() as u64)
    }

    async fn scan_fields(
        &self,
        key: &str,
        cursor: u64,
        pattern: &str,
        count: usize,
    ) -> AppResult<(u64, Vec<String>)> {
        let matcher = glob_to_regex(pattern)?;
        let state = self.state.read().await;
        let Some(space) = state.spaces.get(key) else {
            return Ok((0, Vec::new()));
        };

        let now = Instant::now();
        let mut matched = Vec::new();
        let mut last_seq = None;
        for (seq, field) in space.index.range(cursor..).take(count.max(1)) {
            last_seq = Some(*seq);
            let live = space
                .entries
                .peek(field)
                .map_or(false, |entry| !entry.is_expired(now));
            if live && matcher.is_match(field) {
                matched.push(field.clone());
            }
        }

        let next = match last_seq {
            Some(seq) if space.index.range(seq + 1..).next().is_some() => seq + 1,
            _ => 0,
        };
        Ok((next, matched))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(60);

    #[tokio::test]
    async fn test_get_set_delete() {
        let cache = InMemoryCache::new(16);
        cache.set_field("ns", "a:friends", b"x".to_vec(), TTL).await.unwrap();
        assert_eq!(
            cache.get_field("ns", "a:friends").await.unwrap(),
            Some(b"x".to_vec())
        );
        assert_eq!(cache.get_field("other", "a:friends").await.unwrap(), None);

        let deleted = cache
            .delete_fields("ns", &["a:friends".to_string(), "missing".to_string()])
            .await
            .unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(cache.get_field("ns", "a:friends").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_expired_field_is_missing() {
        let cache = InMemoryCache::new(16);
        cache
            .set_field("ns", "a:blocked", b"x".to_vec(), Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(cache.get_field("ns", "a:blocked").await.unwrap(), None);
        assert_eq!(cache.len("ns").await, 0);
    }

    #[tokio::test]
    async fn test_lru_eviction() {
        let cache = InMemoryCache::new(2);
        cache.set_field("ns", "one", vec![1], TTL).await.unwrap();
        cache.set_field("ns", "two", vec![2], TTL).await.unwrap();
        cache.get_field("ns", "one").await.unwrap();
        cache.set_field("ns", "three", vec![3], TTL).await.unwrap();

        assert!(cache.get_field("ns", "one").await.unwrap().is_some());
        assert!(cache.get_field("ns", "two").await.unwrap().is_none());
        assert!(cache.get_field("ns", "three").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_scan_in_small_batches() {
        let cache = InMemoryCache::new(64);
        for i in 0..10 {
            let field = format!("user{}:friends", i);
            cache.set_field("ns", &field, vec![], TTL).await.unwrap();
        }

        let mut cursor = 0;
        let mut seen = Vec::new();
        let mut steps = 0;
        loop {
            let (next, fields) = cache.scan_fields("ns", cursor, "*", 3).await.unwrap();
            assert!(fields.len() <= 3);
            seen.extend(fields);
            steps += 1;
            if next == 0 {
                break;
            }
            cursor = next;
        }
        assert_eq!(seen.len(), 10);
        assert_eq!(steps, 4);
    }

    #[tokio::test]
    async fn test_delete_pattern_matches_only_target() {
        let cache = InMemoryCache::new(256);
        for field in ["relationships", "followers", "friends", "blocked"] {
            cache.set_field("ns", &format!("AAA:{}", field), vec![], TTL).await.unwrap();
            cache.set_field("ns", &format!("BBB:{}", field), vec![], TTL).await.unwrap();
        }
        for i in 0..150 {
            cache.set_field("ns", &format!("filler{}:friends", i), vec![], TTL).await.unwrap();
        }

        let deleted = cache.delete_pattern("ns", "*AAA*", 100).await.unwrap();
        assert_eq!(deleted, 4);
        assert!(cache.get_field("ns", "AAA:friends").await.unwrap().is_none());
        assert!(cache.get_field("ns", "BBB:friends").await.unwrap().is_some());
    }

    #[test]
    fn test_glob_escapes_metacharacters() {
        let re = glob_to_regex("*01A.B*").unwrap();
        assert!(re.is_match("x01A.Bfriends"));
        assert!(!re.is_match("x01AXBfriends"));
        assert!(glob_to_regex("user?:x").unwrap().is_match("user1:x"));
    }
}
