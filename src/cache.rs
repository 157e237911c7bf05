//! Last-known parameter values reported by the unit.

use crate::error::{GreeError, Result};
use std::collections::HashMap;

/// Mapping from wire parameter code to the last value seen in a `dat` or
/// `res` packet.
///
/// A missing entry means "not reported yet", which is distinct from zero.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropertyCache {
    values: HashMap<String, i64>,
}

impl PropertyCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, code: &str) -> Option<i64> {
        self.values.get(code).copied()
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn clear(&mut self) {
        self.values.clear();
    }

    /// Apply positional `(codes[i], values[i])` pairs.
    ///
    /// The arrays must have equal length; otherwise nothing is written, so a
    /// truncated packet cannot leave the cache half-updated. Returns the
    /// number of entries written.
    pub fn apply(&mut self, codes: &[String], values: &[i64]) -> Result<usize> {
        if codes.len() != values.len() {
            return Err(GreeError::Codec(format!(
                "{} parameter codes but {} values",
                codes.len(),
                values.len()
            )));
        }
        for (code, &value) in codes.iter().zip(values) {
            self.values.insert(code.clone(), value);
        }
        Ok(codes.len())
    }

    pub fn to_map(&self) -> HashMap<String, i64> {
        self.values.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(codes: &[&str]) -> Vec<String> {
        codes.iter().map(|c| c.to_string()).collect()
    }

    #[test]
    fn absent_is_not_zero() {
        let mut cache = PropertyCache::new();
        assert_eq!(cache.get("Pow"), None);
        cache.apply(&strings(&["Pow"]), &[0]).unwrap();
        assert_eq!(cache.get("Pow"), Some(0));
    }

    #[test]
    fn partial_update_keeps_other_entries() {
        let mut cache = PropertyCache::new();
        cache.apply(&strings(&["Pow", "SetTem"]), &[1, 24]).unwrap();
        cache.apply(&strings(&["Pow"]), &[0]).unwrap();
        assert_eq!(cache.get("Pow"), Some(0));
        assert_eq!(cache.get("SetTem"), Some(24));
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn mismatched_arrays_leave_cache_untouched() {
        let mut cache = PropertyCache::new();
        cache.apply(&strings(&["Pow"]), &[1]).unwrap();
        assert!(cache.apply(&strings(&["Pow", "Mod"]), &[0]).is_err());
        assert_eq!(cache.get("Pow"), Some(1));
        assert_eq!(cache.get("Mod"), None);
    }

    #[test]
    fn clear_removes_everything() {
        let mut cache = PropertyCache::new();
        cache.apply(&strings(&["Pow", "Mod"]), &[1, 4]).unwrap();
        cache.clear();
        assert!(cache.is_empty());
    }
}
