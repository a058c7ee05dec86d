//! Per-request routing: pass-through, cache-first, network fallback, offline page.

use color_eyre::Report;
use reqwest::Method;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::{CacheStore, ResponseSource};
use crate::config::WorkerConfig;
use crate::http::{Request, Response};
use crate::network::Network;

/// What the router decided for one request.
#[derive(Debug)]
pub enum Routed {
  /// Not intercepted; the host should perform the request itself
  PassThrough,
  /// A response for the caller
  Respond {
    response: Response,
    source: ResponseSource,
  },
  /// The fetch failed and there is nothing to fall back to
  Failed(Report),
}

/// Cache-first router with network fallback for one generation.
pub struct Router<S, N> {
  config: Arc<WorkerConfig>,
  store: Arc<S>,
  network: Arc<N>,
  /// Detached runtime-cache writes that have not been drained yet
  writes: Mutex<Vec<JoinHandle<()>>>,
}

impl<S, N> Router<S, N>
where
  S: CacheStore + 'static,
  N: Network,
{
  pub fn new(config: Arc<WorkerConfig>, store: Arc<S>, network: Arc<N>) -> Self {
    Self {
      config,
      store,
      network,
      writes: Mutex::new(Vec::new()),
    }
  }

  /// Decide how to answer `request`.
  ///
  /// 1. Non-GET requests and live-data paths pass through untouched
  /// 2. A hit in the static or runtime cache is returned without touching the network
  /// 3. On a miss the network answers; cacheable responses are copied into the
  ///    runtime cache in the background
  /// 4. If the network fails, navigations get the offline page, everything else fails
  pub async fn route(&self, request: Request) -> Routed {
    if request.method != Method::GET {
      debug!(method = %request.method, url = %request.url, "passing through non-GET request");
      return Routed::PassThrough;
    }

    if self.config.is_live(request.path()) {
      debug!(url = %request.url, "passing through live-data request");
      return Routed::PassThrough;
    }

    if let Some(response) = self.lookup(&request) {
      debug!(url = %request.url, "serving from cache");
      return Routed::Respond {
        response,
        source: ResponseSource::Cache,
      };
    }

    match self.network.fetch(&request).await {
      Ok(response) => {
        if response.is_cacheable() {
          self.store_in_background(request, &response);
        } else {
          debug!(
            url = %request.url,
            status = response.status(),
            kind = response.kind().as_str(),
            "not caching response"
          );
        }
        Routed::Respond {
          response,
          source: ResponseSource::Network,
        }
      }
      Err(error) => self.offline(request, error),
    }
  }

  /// Search the current generation's caches, static first.
  ///
  /// Lookup errors are treated as a miss.
  fn lookup(&self, request: &Request) -> Option<Response> {
    match self
      .store
      .match_first(&self.config.generation.names(), request)
    {
      Ok(hit) => hit,
      Err(e) => {
        warn!(url = %request.url, error = %e, "cache lookup failed");
        None
      }
    }
  }

  fn offline(&self, request: Request, error: Report) -> Routed {
    if request.is_navigation() {
      let fallback = Request::get(self.config.offline_fallback.clone());
      if let Some(response) = self.lookup(&fallback) {
        info!(url = %request.url, error = %error, "network unavailable, serving offline page");
        return Routed::Respond {
          response,
          source: ResponseSource::Offline,
        };
      }
    }

    debug!(url = %request.url, error = %error, "fetch failed with no fallback");
    Routed::Failed(error)
  }

  /// Copy `response` into the runtime cache without holding up the caller.
  fn store_in_background(&self, request: Request, response: &Response) {
    let copy = match response.duplicate() {
      Ok(copy) => copy,
      Err(e) => {
        debug!(url = %request.url, error = %e, "could not copy response for caching");
        return;
      }
    };

    let store = Arc::clone(&self.store);
    let cache = self.config.generation.runtime_cache.clone();
    let handle = tokio::task::spawn_blocking(move || {
      if let Err(e) = store.put(&cache, &request, copy) {
        debug!(cache = %cache, url = %request.url, error = %e, "runtime cache write failed");
      }
    });

    let mut writes = self.writes.lock().unwrap_or_else(PoisonError::into_inner);
    writes.retain(|write| !write.is_finished());
    writes.push(handle);
  }

  /// Wait for every background cache write issued so far.
  pub async fn drain(&self) {
    let pending = std::mem::take(&mut *self.writes.lock().unwrap_or_else(PoisonError::into_inner));
    for write in pending {
      if let Err(e) = write.await {
        debug!(error = %e, "runtime cache write did not complete");
      }
    }
  }
}
