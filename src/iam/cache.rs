use crate::iam::entities::Decision;
use crate::iam::Error;
use indexmap::IndexMap;
use parking_lot::Mutex;
use regex::Regex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// Configuration of the permission decision cache
#[derive(Clone, Copy, Debug)]
#[non_exhaustive]
pub struct CacheConfig {
	/// Whether decisions are cached at all
	pub enabled: bool,
	/// How long a cached decision stays valid
	pub ttl: Duration,
	/// The maximum number of cached decisions
	pub max_size: usize,
	/// How often expired entries are swept
	pub cleanup_interval: Duration,
}

impl Default for CacheConfig {
	fn default() -> Self {
		Self {
			enabled: true,
			ttl: Duration::from_secs(*crate::cnf::PERMISSION_CACHE_TTL),
			max_size: *crate::cnf::PERMISSION_CACHE_SIZE,
			cleanup_interval: Duration::from_secs(60),
		}
	}
}

/// Cumulative cache statistics
#[derive(Clone, Copy, Debug, Default, Serialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct CacheStats {
	pub hits: u64,
	pub misses: u64,
	pub total_requests: u64,
	pub hit_rate: f64,
	pub size: usize,
}

#[derive(Debug)]
struct CacheEntry {
	decision: Decision,
	expires: Instant,
}

/// An LRU cache of permission decisions
///
/// Keys combine the user, the rendered resource, and the action. Entries
/// expire by TTL, evict least-recently-used once the cache is full, and
/// can be invalidated in bulk by a key pattern.
#[non_exhaustive]
pub struct PermissionCache {
	config: CacheConfig,
	// Insertion order doubles as recency order: hits reinsert at the end
	entries: Mutex<IndexMap<String, CacheEntry>>,
	hits: AtomicU64,
	misses: AtomicU64,
	last_cleanup: Mutex<Instant>,
}

impl PermissionCache {
	pub fn new(config: CacheConfig) -> Self {
		Self {
			config,
			entries: Mutex::new(IndexMap::new()),
			hits: AtomicU64::new(0),
			misses: AtomicU64::new(0),
			last_cleanup: Mutex::new(Instant::now()),
		}
	}

	/// Render the cache key of a decision
	pub fn key(user_id: &str, resource: &str, action: &str) -> String {
		format!("{user_id}:{resource}:{action}")
	}

	/// Fetch a cached decision, refreshing its recency
	pub fn get(&self, key: &str) -> Option<Decision> {
		if !self.config.enabled {
			return None;
		}
		self.maybe_cleanup();
		let mut entries = self.entries.lock();
		match entries.shift_remove(key) {
			Some(entry) if entry.expires > Instant::now() => {
				let decision = entry.decision.clone();
				entries.insert(key.to_owned(), entry);
				self.hits.fetch_add(1, Ordering::Relaxed);
				Some(decision)
			}
			_ => {
				self.misses.fetch_add(1, Ordering::Relaxed);
				None
			}
		}
	}

	/// Store a decision, evicting the least recently used entry if full
	pub fn put(&self, key: String, decision: Decision) {
		if !self.config.enabled || self.config.max_size == 0 {
			return;
		}
		let mut entries = self.entries.lock();
		entries.shift_remove(&key);
		while entries.len() >= self.config.max_size {
			entries.shift_remove_index(0);
		}
		entries.insert(
			key,
			CacheEntry {
				decision,
				expires: Instant::now() + self.config.ttl,
			},
		);
	}

	/// Remove every cached decision
	pub fn clear(&self) {
		self.entries.lock().clear();
	}

	/// Remove every entry whose key matches a pattern
	pub fn invalidate_pattern(&self, pattern: &str) -> Result<usize, Error> {
		let re = Regex::new(pattern).map_err(|e| Error::InvalidPattern(e.to_string()))?;
		let mut entries = self.entries.lock();
		let before = entries.len();
		entries.retain(|key, _| !re.is_match(key));
		Ok(before - entries.len())
	}

	/// Cumulative hit and miss statistics
	pub fn stats(&self) -> CacheStats {
		let hits = self.hits.load(Ordering::Relaxed);
		let misses = self.misses.load(Ordering::Relaxed);
		let total = hits + misses;
		CacheStats {
			hits,
			misses,
			total_requests: total,
			hit_rate: if total == 0 {
				0.0
			} else {
				hits as f64 / total as f64
			},
			size: self.entries.lock().len(),
		}
	}

	/// Sweep expired entries
	pub fn cleanup(&self) {
		let now = Instant::now();
		self.entries.lock().retain(|_, entry| entry.expires > now);
	}

	/// Sweep opportunistically once per cleanup interval
	fn maybe_cleanup(&self) {
		let mut last = self.last_cleanup.lock();
		if last.elapsed() >= self.config.cleanup_interval {
			*last = Instant::now();
			drop(last);
			self.cleanup();
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn cache(max_size: usize) -> PermissionCache {
		PermissionCache::new(CacheConfig {
			enabled: true,
			ttl: Duration::from_secs(60),
			max_size,
			cleanup_interval: Duration::from_secs(60),
		})
	}

	#[test]
	fn hit_and_miss_accounting() {
		let cache = cache(10);
		let key = PermissionCache::key("u", "collection:posts", "read");
		assert!(cache.get(&key).is_none());
		cache.put(key.clone(), Decision::allow("ok"));
		assert!(cache.get(&key).unwrap().allowed);
		let stats = cache.stats();
		assert_eq!(stats.hits, 1);
		assert_eq!(stats.misses, 1);
		assert_eq!(stats.total_requests, 2);
		assert!((stats.hit_rate - 0.5).abs() < f64::EPSILON);
		assert_eq!(stats.size, 1);
	}

	#[test]
	fn lru_eviction_drops_the_coldest_entry() {
		let cache = cache(2);
		cache.put("a".to_owned(), Decision::allow("a"));
		cache.put("b".to_owned(), Decision::allow("b"));
		// Touch `a` so `b` is now the least recently used
		assert!(cache.get("a").is_some());
		cache.put("c".to_owned(), Decision::allow("c"));
		assert!(cache.get("b").is_none());
		assert!(cache.get("a").is_some());
		assert!(cache.get("c").is_some());
	}

	#[test]
	fn expired_entries_do_not_hit() {
		let cache = PermissionCache::new(CacheConfig {
			enabled: true,
			ttl: Duration::ZERO,
			max_size: 10,
			cleanup_interval: Duration::from_secs(60),
		});
		cache.put("a".to_owned(), Decision::allow("a"));
		assert!(cache.get("a").is_none());
	}

	#[test]
	fn pattern_invalidation() {
		let cache = cache(10);
		cache.put("u1:collection:posts:read".to_owned(), Decision::allow("x"));
		cache.put("u1:collection:users:read".to_owned(), Decision::allow("x"));
		cache.put("u2:collection:posts:read".to_owned(), Decision::allow("x"));
		let removed = cache.invalidate_pattern("^u1:").unwrap();
		assert_eq!(removed, 2);
		assert_eq!(cache.stats().size, 1);
		assert!(cache.invalidate_pattern("[").is_err());
	}

	#[test]
	fn disabled_cache_stores_nothing() {
		let cache = PermissionCache::new(CacheConfig {
			enabled: false,
			..CacheConfig::default()
		});
		cache.put("a".to_owned(), Decision::allow("a"));
		assert!(cache.get("a").is_none());
		assert_eq!(cache.stats().size, 0);
	}
}
