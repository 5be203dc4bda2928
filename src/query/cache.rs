//! Parsed transform cache
//!
//! Clients tend to repeat the same handful of transforms, so parsed pipelines
//! are kept in a bounded moka cache keyed by their normalized source.

use moka::sync::Cache;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use super::transform::{Pipeline, TransformError};

pub struct TransformCache {
    cache: Cache<String, Arc<Pipeline>>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl TransformCache {
    pub fn new() -> Self {
        Self::with_capacity(1000)
    }

    pub fn with_capacity(max_entries: u64) -> Self {
        Self {
            cache: Cache::builder().max_capacity(max_entries).build(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Return the cached pipeline for `spec`, parsing it on a miss.
    /// Specs that fail to parse are not cached.
    pub fn get_or_parse(&self, spec: &str) -> Result<Arc<Pipeline>, TransformError> {
        let key = normalize_spec(spec);
        if let Some(pipeline) = self.cache.get(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(pipeline);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        let pipeline = Arc::new(Pipeline::parse(&key)?);
        self.cache.insert(key, Arc::clone(&pipeline));
        Ok(pipeline)
    }

    pub fn invalidate_all(&self) {
        self.cache.invalidate_all();
    }

    /// Get cache statistics
    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;

        CacheStats {
            hits,
            misses,
            hit_rate: if total > 0 {
                hits as f64 / total as f64
            } else {
                0.0
            },
            entry_count: self.cache.entry_count(),
        }
    }
}

impl Default for TransformCache {
    fn default() -> Self {
        Self::new()
    }
}

/// Cache statistics
#[derive(Debug, Clone, serde::Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    /// Hit rate (0.0 - 1.0)
    pub hit_rate: f64,
    pub entry_count: u64,
}

/// Collapse runs of whitespace outside string literals
fn normalize_spec(spec: &str) -> String {
    let mut out = String::with_capacity(spec.len());
    let mut in_string = false;
    let mut escaped = false;
    let mut pending_space = false;

    for c in spec.trim().chars() {
        if in_string {
            out.push(c);
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        if c.is_whitespace() {
            pending_space = true;
            continue;
        }
        if pending_space {
            out.push(' ');
            pending_space = false;
        }
        if c == '"' {
            in_string = true;
        }
        out.push(c);
    }
    out
}
