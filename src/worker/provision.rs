//! Populating a generation's static cache and sweeping stale generations.

use color_eyre::{eyre::eyre, Report, Result};
use futures::future::try_join_all;
use std::sync::Arc;
use tracing::{info, warn};

use crate::cache::CacheStore;
use crate::config::WorkerConfig;
use crate::http::Request;
use crate::network::Network;

/// Outcome of an eviction sweep.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct EvictionReport {
  /// Stale caches that were deleted
  pub deleted: Vec<String>,
  /// Stale caches whose deletion failed
  pub failed: Vec<String>,
}

pub struct Provisioner<S, N> {
  config: Arc<WorkerConfig>,
  store: Arc<S>,
  network: Arc<N>,
}

impl<S: CacheStore, N: Network> Provisioner<S, N> {
  pub fn new(config: Arc<WorkerConfig>, store: Arc<S>, network: Arc<N>) -> Self {
    Self {
      config,
      store,
      network,
    }
  }

  /// Fetch every manifest entry and store them all in the static cache.
  ///
  /// All or nothing: if any entry fails to fetch or is not a 2xx response,
  /// nothing from this attempt is stored and the error is returned.
  pub async fn provision(&self) -> Result<usize> {
    let cache = &self.config.generation.static_cache;
    self.store.open(cache)?;

    info!(
      cache = %cache,
      assets = self.config.manifest.len(),
      "caching static assets"
    );

    let fetches = self.config.manifest.iter().map(|url| async move {
      let request = Request::get(url.clone());
      let response = self
        .network
        .fetch(&request)
        .await
        .map_err(|e| eyre!("Failed to fetch manifest entry {}: {}", url, e))?;

      if !response.ok() {
        return Err(eyre!(
          "Manifest entry {} returned status {}",
          url,
          response.status()
        ));
      }

      Ok::<_, Report>((request, response))
    });

    let entries = try_join_all(fetches).await?;
    let stored = entries.len();
    self.store.put_all(cache, entries)?;

    Ok(stored)
  }

  /// Whether every manifest entry is present in the static cache.
  pub fn is_provisioned(&self) -> Result<bool> {
    let cache = &self.config.generation.static_cache;
    if !self.store.has(cache)? {
      return Ok(false);
    }

    for url in &self.config.manifest {
      if self.store.match_in(cache, &Request::get(url.clone()))?.is_none() {
        return Ok(false);
      }
    }
    Ok(true)
  }

  /// Delete every cache that does not belong to the current generation.
  ///
  /// Deletions are independent: one failure is logged and the sweep goes on.
  pub fn evict(&self) -> Result<EvictionReport> {
    let mut report = EvictionReport::default();

    for name in self.store.keys()? {
      if self.config.generation.contains(&name) {
        continue;
      }

      info!(cache = %name, "deleting stale cache");
      match self.store.delete(&name) {
        Ok(_) => report.deleted.push(name),
        Err(e) => {
          warn!(cache = %name, error = %e, "failed to delete stale cache");
          report.failed.push(name);
        }
      }
    }

    Ok(report)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::SqliteStore;
  use crate::http::Response;
  use crate::testing::{stored_body, url, worker_config, FakeNetwork, FlakyStore};

  fn provisioner<S: CacheStore>(store: Arc<S>, network: FakeNetwork) -> Provisioner<S, FakeNetwork> {
    Provisioner::new(Arc::new(worker_config()), store, Arc::new(network))
  }

  #[tokio::test]
  async fn test_provision_stores_whole_manifest() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let provisioner = provisioner(Arc::clone(&store), FakeNetwork::with_manifest());

    assert_eq!(provisioner.provision().await.unwrap(), 3);
    assert!(provisioner.is_provisioned().unwrap());
    assert_eq!(
      stored_body(&*store, "primal-checker-v1", "/static/icons/icon-512x512.png").as_deref(),
      Some("png-512")
    );
    assert_eq!(
      stored_body(&*store, "primal-checker-v1", "/").as_deref(),
      Some("<html>primal checker</html>")
    );
  }

  #[tokio::test]
  async fn test_provision_fails_on_missing_asset() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let network = FakeNetwork::new()
      .with("/", 200, "<html></html>")
      .with("/static/icons/icon-192x192.png", 200, "png-192");
    let provisioner = provisioner(Arc::clone(&store), network);

    let err = provisioner.provision().await.unwrap_err();
    assert!(err.to_string().contains("404"));
    assert!(!provisioner.is_provisioned().unwrap());
    assert!(store.entries("primal-checker-v1").unwrap().is_empty());
  }

  #[tokio::test]
  async fn test_provision_fails_offline() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let network = FakeNetwork::with_manifest();
    network.set_offline(true);
    let provisioner = provisioner(Arc::clone(&store), network);

    assert!(provisioner.provision().await.is_err());
    assert!(stored_body(&*store, "primal-checker-v1", "/").is_none());
  }

  #[tokio::test]
  async fn test_provision_accepts_any_2xx() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let network = FakeNetwork::with_manifest().with("/", 203, "<html>proxied</html>");
    let provisioner = provisioner(Arc::clone(&store), network);

    assert_eq!(provisioner.provision().await.unwrap(), 3);
  }

  #[test]
  fn test_evict_deletes_only_stale_caches() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    let home = Request::get(url("/"));
    for name in ["primal-checker-v1", "primal-runtime-v1", "primal-checker-v0", "primal-runtime-v0"] {
      store.put(name, &home, Response::new(200, name)).unwrap();
    }
    let provisioner = provisioner(Arc::clone(&store), FakeNetwork::new());

    let report = provisioner.evict().unwrap();

    assert_eq!(report.deleted, vec!["primal-checker-v0", "primal-runtime-v0"]);
    assert!(report.failed.is_empty());
    assert_eq!(
      store.keys().unwrap(),
      vec!["primal-checker-v1", "primal-runtime-v1"]
    );
    assert_eq!(
      stored_body(&*store, "primal-checker-v1", "/").as_deref(),
      Some("primal-checker-v1")
    );
    assert_eq!(
      stored_body(&*store, "primal-runtime-v1", "/").as_deref(),
      Some("primal-runtime-v1")
    );
  }

  #[test]
  fn test_evict_continues_past_failed_delete() {
    let store = Arc::new(FlakyStore::new());
    for name in ["primal-checker-v1", "old-a", "old-b", "old-c"] {
      store.open(name).unwrap();
    }
    store.fail_delete_of("old-b");
    let provisioner = provisioner(Arc::clone(&store), FakeNetwork::new());

    let report = provisioner.evict().unwrap();

    assert_eq!(report.deleted, vec!["old-a", "old-c"]);
    assert_eq!(report.failed, vec!["old-b"]);
    assert_eq!(store.keys().unwrap(), vec!["primal-checker-v1", "old-b"]);
  }

  #[test]
  fn test_evict_with_nothing_stale() {
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    store.open("primal-checker-v1").unwrap();
    let provisioner = provisioner(Arc::clone(&store), FakeNetwork::new());

    assert_eq!(provisioner.evict().unwrap(), EvictionReport::default());
  }
}
