//! Request identity: which stored entry a request maps to.

use reqwest::header::{HeaderMap, VARY};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;

use crate::http::Request;

/// Stable identity of a cacheable request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestKey {
  /// Fixed-length hex digest used as the storage key
  pub hash: String,
  /// Normalized URL, kept for listings
  pub url: String,
}

impl RequestKey {
  /// Identity for `request`, or `None` if the method can never be cached.
  pub fn for_request(request: &Request) -> Option<Self> {
    if request.method != Method::GET {
      return None;
    }
    Some(Self::for_url(&request.url))
  }

  pub fn for_url(url: &Url) -> Self {
    let mut url = url.clone();
    url.set_fragment(None);
    let url = url.to_string();

    // SHA256 hash for stable, fixed-length keys
    let mut hasher = Sha256::new();
    hasher.update(b"GET ");
    hasher.update(url.as_bytes());

    Self {
      hash: hex::encode(hasher.finalize()),
      url,
    }
  }
}

/// Request header values a stored response was selected on, per its `Vary` header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VaryKey {
  /// `Vary: *`, never matches a later request
  Any,
  /// Lowercased header name and the request's value for it at store time
  Headers(Vec<(String, Option<String>)>),
}

impl VaryKey {
  /// Capture the request header values named by the response's `Vary` header.
  pub fn capture(response_headers: &HeaderMap, request_headers: &HeaderMap) -> Self {
    let mut names = Vec::new();
    for value in response_headers.get_all(VARY) {
      let Ok(value) = value.to_str() else {
        continue;
      };
      for name in value.split(',').map(str::trim).filter(|n| !n.is_empty()) {
        if name == "*" {
          return Self::Any;
        }
        names.push(name.to_ascii_lowercase());
      }
    }
    names.sort();
    names.dedup();

    Self::Headers(
      names
        .into_iter()
        .map(|name| {
          let value = header_value(request_headers, &name);
          (name, value)
        })
        .collect(),
    )
  }

  pub fn matches(&self, request_headers: &HeaderMap) -> bool {
    match self {
      Self::Any => false,
      Self::Headers(pairs) => pairs
        .iter()
        .all(|(name, value)| header_value(request_headers, name) == *value),
    }
  }
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
  headers
    .get(name)
    .and_then(|v| v.to_str().ok())
    .map(String::from)
}
