use once_cell::sync::Lazy;

/// Specifies the branching order of the B+-tree used for secondary indexes.
///
/// Every internal node holds at most this many children, and every leaf at
/// most this many entries. Larger values flatten the tree at the cost of
/// wider node copies during savepoint snapshots.
pub static BTREE_ORDER: Lazy<usize> = lazy_env_parse!("DOCBASE_BTREE_ORDER", usize, 32);

/// Specifies the default maximum number of entries in the permission cache.
pub static PERMISSION_CACHE_SIZE: Lazy<usize> =
	lazy_env_parse!("DOCBASE_PERMISSION_CACHE_SIZE", usize, 1_000);

/// Specifies the default time-to-live for permission cache entries, in seconds.
pub static PERMISSION_CACHE_TTL: Lazy<u64> =
	lazy_env_parse!("DOCBASE_PERMISSION_CACHE_TTL", u64, 300);

/// Specifies the upper bound for a single dynamic rule evaluation, in milliseconds.
///
/// Individual rules may configure a shorter timeout, never a longer one.
pub static MAX_RULE_TIMEOUT: Lazy<u64> = lazy_env_parse!("DOCBASE_MAX_RULE_TIMEOUT", u64, 1_000);

/// Specifies the number of generated characters in an auto-assigned document id.
pub const ID_LENGTH: usize = 20;

/// The path which selects the in-memory storage engine.
pub const MEMORY_PATH: &str = ":memory:";
