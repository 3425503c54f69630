//! Cursor pagination with opaque continuation tokens.
//!
//! Tokens carry the next offset plus a sha256 checksum so that a client
//! cannot splice a token from one collection into another or fabricate
//! offsets; a bad checksum is a 400, not a silent empty page.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub const DEFAULT_PAGE_SIZE: usize = 100;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub content: Vec<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub continuation_token: Option<String>,
}

impl<T> Page<T> {
    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            content: self.content.into_iter().map(f).collect(),
            continuation_token: self.continuation_token,
        }
    }
}

fn checksum(offset: usize, scope: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(format!("{offset}:{scope}"));
    hex::encode(&hasher.finalize()[..8])
}

/// Encode the next offset as an opaque token scoped to one collection.
pub fn encode_token(offset: usize, scope: &str) -> String {
    format!("{offset}.{}", checksum(offset, scope))
}

/// Decode and verify a continuation token. `None` input means "first page".
pub fn decode_token(token: Option<&str>, scope: &str) -> Result<usize> {
    let Some(token) = token.filter(|t| !t.is_empty()) else {
        return Ok(0);
    };

    let (offset_part, check_part) = token
        .split_once('.')
        .ok_or_else(|| Error::BadRequest("Malformed continuation token".to_string()))?;
    let offset: usize = offset_part
        .parse()
        .map_err(|_| Error::BadRequest("Malformed continuation token".to_string()))?;

    if check_part != checksum(offset, scope) {
        return Err(Error::BadRequest(
            "Continuation token does not match this collection".to_string(),
        ));
    }

    Ok(offset)
}

/// Slice one page out of an already-ordered result set and issue the token
/// for the next page, if any.
pub fn paginate<T>(items: Vec<T>, offset: usize, page_size: usize, scope: &str) -> Page<T> {
    let total = items.len();
    let content: Vec<T> = items.into_iter().skip(offset).take(page_size).collect();
    let next = offset + content.len();

    Page {
        content,
        continuation_token: (next < total).then(|| encode_token(next, scope)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_round_trip() {
        let token = encode_token(250, "points:site-a");
        assert_eq!(decode_token(Some(&token), "points:site-a").unwrap(), 250);
    }

    #[test]
    fn missing_or_empty_token_is_first_page() {
        assert_eq!(decode_token(None, "assets").unwrap(), 0);
        assert_eq!(decode_token(Some(""), "assets").unwrap(), 0);
    }

    #[test]
    fn tampered_offset_is_rejected() {
        let token = encode_token(100, "assets:site-a");
        let forged = token.replacen("100", "900", 1);
        assert!(decode_token(Some(&forged), "assets:site-a").is_err());
    }

    #[test]
    fn token_is_scoped_to_its_collection() {
        let token = encode_token(100, "assets:site-a");
        assert!(decode_token(Some(&token), "assets:site-b").is_err());
    }

    #[test]
    fn paginates_in_stable_order() {
        let items: Vec<i32> = (0..7).collect();
        let first = paginate(items.clone(), 0, 3, "nums");
        assert_eq!(first.content, vec![0, 1, 2]);
        let offset = decode_token(first.continuation_token.as_deref(), "nums").unwrap();
        let second = paginate(items.clone(), offset, 3, "nums");
        assert_eq!(second.content, vec![3, 4, 5]);
        let offset = decode_token(second.continuation_token.as_deref(), "nums").unwrap();
        let last = paginate(items, offset, 3, "nums");
        assert_eq!(last.content, vec![6]);
        assert!(last.continuation_token.is_none());
    }
}
