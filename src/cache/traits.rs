//! Core traits and types for the cache store.

use chrono::{DateTime, Utc};
use color_eyre::Result;

use crate::http::{Request, Response};

/// Named caches mapping request identity to a stored response.
///
/// Every operation is atomic on its own. Only GET requests can be stored or matched;
/// a later put for the same identity in the same cache replaces the earlier one.
pub trait CacheStore: Send + Sync {
  /// Create the named cache if it does not exist yet.
  fn open(&self, name: &str) -> Result<()>;

  fn has(&self, name: &str) -> Result<bool>;

  /// All cache names, in creation order.
  fn keys(&self) -> Result<Vec<String>>;

  /// Delete a cache and all its entries. Returns whether it existed.
  fn delete(&self, name: &str) -> Result<bool>;

  /// Look up `request` in one cache. A missing cache is a miss.
  fn match_in(&self, cache: &str, request: &Request) -> Result<Option<Response>>;

  /// Store `response` under the identity of `request`, creating the cache if needed.
  /// The response body is consumed.
  fn put(&self, cache: &str, request: &Request, response: Response) -> Result<()>;

  /// Store every entry or none of them.
  fn put_all(&self, cache: &str, entries: Vec<(Request, Response)>) -> Result<()>;

  /// Summaries of the entries in a cache, oldest first.
  fn entries(&self, cache: &str) -> Result<Vec<EntrySummary>>;

  /// Look up `request` in each cache in order, returning the first hit.
  fn match_first(&self, caches: &[&str], request: &Request) -> Result<Option<Response>> {
    for cache in caches {
      if let Some(response) = self.match_in(cache, request)? {
        return Ok(Some(response));
      }
    }
    Ok(None)
  }
}

/// Listing information for one stored entry.
#[derive(Debug, Clone)]
pub struct EntrySummary {
  pub url: String,
  pub status: u16,
  pub size: usize,
  pub cached_at: DateTime<Utc>,
}

/// Indicates where a delivered response came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
  /// Served from the current generation's caches
  Cache,
  /// Fetched from the network by the router
  Network,
  /// Network unavailable, serving the cached offline page
  Offline,
  /// Not intercepted; the host fetched it directly
  Direct,
}

impl ResponseSource {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Cache => "cache",
      Self::Network => "network",
      Self::Offline => "offline",
      Self::Direct => "direct",
    }
  }
}
