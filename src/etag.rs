//! Aggregate ETag computation
//!
//! The validator of an aggregate response is a hash over the process-wide
//! seed, the per-generator tags in generator order and the renderer's tag.
//! Resetting the seed invalidates every tag handed out so far.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use xxhash_rust::xxh3::Xxh3;

/// Process-wide ETag seed
#[derive(Debug)]
pub struct EtagSeed {
    value: AtomicU64,
}

impl EtagSeed {
    pub fn new(initial: u64) -> Self {
        EtagSeed {
            value: AtomicU64::new(initial),
        }
    }

    /// Seed derived from the current time
    pub fn from_clock() -> Self {
        Self::new(clock_nanos())
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::Acquire)
    }

    /// Replace the seed with a fresh value and return it
    ///
    /// The new value always differs from the old one.
    pub fn reset(&self) -> u64 {
        let mut next = 0;
        // fetch_update only fails when the closure returns None
        let _ = self
            .value
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |old| {
                let mut hasher = Xxh3::with_seed(old);
                hasher.update(&clock_nanos().to_le_bytes());
                let mut candidate = hasher.digest();
                if candidate == old {
                    candidate = candidate.wrapping_add(1);
                }
                next = candidate;
                Some(candidate)
            });
        next
    }
}

impl Default for EtagSeed {
    fn default() -> Self {
        Self::from_clock()
    }
}

fn clock_nanos() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default()
}

/// Compose the aggregate ETag
///
/// # Arguments
/// * `seed` - current seed value
/// * `generator_etags` - per-generator tags in generator order
/// * `renderer_etag` - tag of the template in use, if any
///
/// # Returns
/// An unquoted 16 digit hex string. The result depends on the order of
/// `generator_etags`.
pub fn compose_etag(seed: u64, generator_etags: &[String], renderer_etag: Option<&str>) -> String {
    let mut hasher = Xxh3::with_seed(seed);
    hasher.update(&(generator_etags.len() as u64).to_le_bytes());
    for tag in generator_etags {
        hasher.update(&(tag.len() as u64).to_le_bytes());
        hasher.update(tag.as_bytes());
    }
    match renderer_etag {
        Some(tag) => {
            hasher.update(&[1]);
            hasher.update(&(tag.len() as u64).to_le_bytes());
            hasher.update(tag.as_bytes());
        }
        None => hasher.update(&[0]),
    }
    format!("{:016x}", hasher.digest())
}

/// Hash arbitrary string parts into a tag, length-prefixing each part
pub fn hash_parts<'a, I>(parts: I) -> String
where
    I: IntoIterator<Item = &'a str>,
{
    let mut hasher = Xxh3::new();
    for part in parts {
        hasher.update(&(part.len() as u64).to_le_bytes());
        hasher.update(part.as_bytes());
    }
    format!("{:016x}", hasher.digest())
}

/// Quote a tag for the `ETag` header
pub fn quote(tag: &str) -> String {
    format!("\"{}\"", tag)
}

/// Whether an `If-None-Match` header value matches `etag`
///
/// Uses the weak comparison, so `W/"x"` matches `"x"`.
pub fn if_none_match(header: &str, etag: &str) -> bool {
    let header = header.trim();
    if header == "*" {
        return true;
    }
    let wanted = strip_tag(etag);
    header
        .split(',')
        .map(strip_tag)
        .any(|candidate| !candidate.is_empty() && candidate == wanted)
}

fn strip_tag(tag: &str) -> &str {
    let tag = tag.trim();
    let tag = tag.strip_prefix("W/").unwrap_or(tag);
    tag.trim_matches('"')
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_compose_is_deterministic() {
        let a = compose_etag(7, &tags(&["x", "y"]), Some("t"));
        let b = compose_etag(7, &tags(&["x", "y"]), Some("t"));
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
    }

    #[test]
    fn test_compose_is_order_sensitive() {
        let a = compose_etag(7, &tags(&["x", "y"]), None);
        let b = compose_etag(7, &tags(&["y", "x"]), None);
        assert_ne!(a, b);
    }

    #[test]
    fn test_part_boundaries_matter() {
        let a = compose_etag(7, &tags(&["ab", "c"]), None);
        let b = compose_etag(7, &tags(&["a", "bc"]), None);
        assert_ne!(a, b);
    }

    #[test]
    fn test_renderer_tag_contributes() {
        let base = compose_etag(7, &tags(&["x"]), None);
        assert_ne!(base, compose_etag(7, &tags(&["x"]), Some("")));
        assert_ne!(base, compose_etag(7, &tags(&["x"]), Some("tpl")));
    }

    #[test]
    fn test_seed_reset_changes_value() {
        let seed = EtagSeed::new(1);
        let before = seed.get();
        let after = seed.reset();
        assert_ne!(before, after);
        assert_eq!(seed.get(), after);
    }

    #[test]
    fn test_if_none_match() {
        assert!(if_none_match("*", "abc"));
        assert!(if_none_match("\"abc\"", "abc"));
        assert!(if_none_match("\"zzz\", W/\"abc\"", "abc"));
        assert!(!if_none_match("\"zzz\"", "abc"));
        assert!(!if_none_match("", "abc"));
    }
}
