//! Gzip compression of rendered bodies

use crate::error::{Result, RouterError};
use bytes::Bytes;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use http::{header, HeaderMap};
use std::io::{Read, Write};
use tracing::trace;

/// Bodies smaller than this are sent as they are
pub const MIN_COMPRESS_SIZE: usize = 256;

/// Appended to the ETag of a gzip encoded body
pub const GZIP_ETAG_SUFFIX: &str = "-gz";

/// Whether a body of `content_type` is worth compressing
pub fn should_compress(content_type: &str) -> bool {
    content_type.starts_with("text/")
        || content_type.contains("xml")
        || content_type.contains("json")
        || content_type.contains("javascript")
}

/// Whether the client accepts gzip
///
/// An explicit `gzip` entry decides; `*` only applies when gzip is not
/// listed. A weight of zero is a refusal.
pub fn accepts_gzip(headers: &HeaderMap) -> bool {
    let Some(value) = headers
        .get(header::ACCEPT_ENCODING)
        .and_then(|v| v.to_str().ok())
    else {
        return false;
    };

    let mut wildcard = None;
    for coding in value.split(',') {
        let mut parts = coding.split(';');
        let name = parts.next().unwrap_or("").trim();
        let refused = parts.any(is_zero_weight);
        if name.eq_ignore_ascii_case("gzip") {
            return !refused;
        }
        if name == "*" && wildcard.is_none() {
            wildcard = Some(!refused);
        }
    }
    wildcard.unwrap_or(false)
}

fn is_zero_weight(param: &str) -> bool {
    let param = param.trim().replace(' ', "");
    param
        .strip_prefix("q=")
        .or_else(|| param.strip_prefix("Q="))
        .and_then(|q| q.parse::<f32>().ok())
        .is_some_and(|q| q == 0.0)
}

/// ETag of the gzip encoded variant of the body tagged `tag`
pub fn gzip_etag(tag: &str) -> String {
    format!("{}{}", tag, GZIP_ETAG_SUFFIX)
}

/// Gzip `content`
pub fn gzip(content: &[u8]) -> Result<Bytes> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder
        .write_all(content)
        .map_err(|e| RouterError::InternalError(format!("gzip failed: {}", e)))?;
    let compressed = encoder
        .finish()
        .map_err(|e| RouterError::InternalError(format!("gzip failed: {}", e)))?;

    trace!(
        original_size = content.len(),
        compressed_size = compressed.len(),
        "Compressed body"
    );
    Ok(Bytes::from(compressed))
}

/// Inverse of [`gzip`]
pub fn gunzip(content: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(content);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| RouterError::InternalError(format!("gunzip failed: {}", e)))?;
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn accept(value: &'static str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT_ENCODING, HeaderValue::from_static(value));
        headers
    }

    #[test]
    fn test_should_compress() {
        assert!(should_compress("application/xml; charset=utf-8"));
        assert!(should_compress("text/html"));
        assert!(should_compress("application/json"));
        assert!(!should_compress("image/png"));
    }

    #[test]
    fn test_accepts_gzip() {
        assert!(accepts_gzip(&accept("gzip, deflate")));
        assert!(accepts_gzip(&accept("br;q=1.0, GZIP;q=0.5")));
        assert!(accepts_gzip(&accept("*")));
        assert!(!accepts_gzip(&accept("gzip;q=0")));
        assert!(!accepts_gzip(&accept("gzip; q=0.000")));
        assert!(!accepts_gzip(&accept("gzip;q=0, *")));
        assert!(!accepts_gzip(&accept("*, gzip;q=0")));
        assert!(!accepts_gzip(&accept("*;q=0")));
        assert!(accepts_gzip(&accept("gzip;q=0.1, *;q=0")));
        assert!(!accepts_gzip(&accept("deflate")));
        assert!(!accepts_gzip(&HeaderMap::new()));
    }

    #[test]
    fn test_gzip_etag() {
        assert_eq!(gzip_etag("0123abcd"), "0123abcd-gz");
    }

    #[test]
    fn test_gzip_roundtrip() {
        let body = "<doc>".repeat(100);
        let compressed = gzip(body.as_bytes()).unwrap();
        assert!(compressed.len() < body.len());
        assert_eq!(gunzip(&compressed).unwrap(), body.as_bytes());
    }
}
