//! Compiled regex cache keyed by pattern string.

use crate::error::{Error, Result};
use regex::Regex;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock, PoisonError, RwLock};

/// Get-or-compile cache shared by every watch engine in the process.
///
/// Guarded by its own lock so compiling never contends with the store.
#[derive(Debug, Default)]
pub struct RegexCache {
    compiled: RwLock<HashMap<String, Arc<Regex>>>,
}

impl RegexCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process-wide cache
    pub fn shared() -> Arc<RegexCache> {
        static SHARED: OnceLock<Arc<RegexCache>> = OnceLock::new();
        Arc::clone(SHARED.get_or_init(|| Arc::new(RegexCache::new())))
    }

    /// Return the compiled pattern, compiling and caching it on first use.
    ///
    /// Patterns that fail to compile are not cached.
    pub fn get_or_compile(&self, pattern: &str) -> Result<Arc<Regex>> {
        {
            let compiled = self.compiled.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(re) = compiled.get(pattern) {
                return Ok(Arc::clone(re));
            }
        }

        let re = Regex::new(pattern).map_err(|source| Error::InvalidPattern {
            pattern: pattern.to_string(),
            source,
        })?;

        let mut compiled = self.compiled.write().unwrap_or_else(PoisonError::into_inner);
        let entry = compiled
            .entry(pattern.to_string())
            .or_insert_with(|| Arc::new(re));
        Ok(Arc::clone(entry))
    }

    pub fn len(&self) -> usize {
        self.compiled
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
