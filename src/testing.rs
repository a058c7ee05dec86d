//! Shared fakes for unit tests.

use color_eyre::{eyre::eyre, Result};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use url::Url;

use crate::cache::{CacheStore, EntrySummary, SqliteStore};
use crate::config::{Config, WorkerConfig};
use crate::http::{Request, Response, ResponseKind};
use crate::network::Network;

pub fn worker_config() -> WorkerConfig {
  Config::default().worker_config().unwrap()
}

/// Worker config for another generation of the same app.
pub fn worker_config_v2() -> WorkerConfig {
  Config {
    static_cache: "primal-checker-v2".to_string(),
    runtime_cache: "primal-runtime-v2".to_string(),
    ..Config::default()
  }
  .worker_config()
  .unwrap()
}

pub fn url(path: &str) -> Url {
  worker_config().origin.join(path).unwrap()
}

/// A scripted network keyed by URL path. Unknown paths answer 404.
#[derive(Default)]
pub struct FakeNetwork {
  routes: Mutex<HashMap<String, (u16, ResponseKind, Vec<u8>)>>,
  offline: AtomicBool,
  calls: Mutex<Vec<String>>,
}

impl FakeNetwork {
  pub fn new() -> Self {
    Self::default()
  }

  /// Network serving the default manifest.
  pub fn with_manifest() -> Self {
    Self::new()
      .with("/", 200, "<html>primal checker</html>")
      .with("/static/icons/icon-192x192.png", 200, "png-192")
      .with("/static/icons/icon-512x512.png", 200, "png-512")
  }

  pub fn with(self, path: &str, status: u16, body: &str) -> Self {
    self.with_kind(path, status, ResponseKind::Basic, body)
  }

  pub fn with_kind(self, path: &str, status: u16, kind: ResponseKind, body: &str) -> Self {
    self
      .routes
      .lock()
      .unwrap()
      .insert(path.to_string(), (status, kind, body.as_bytes().to_vec()));
    self
  }

  pub fn set_offline(&self, offline: bool) {
    self.offline.store(offline, Ordering::SeqCst);
  }

  /// Paths fetched so far, in order.
  pub fn calls(&self) -> Vec<String> {
    self.calls.lock().unwrap().clone()
  }
}

impl Network for FakeNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    let path = request.url.path().to_string();
    self.calls.lock().unwrap().push(path.clone());

    if self.offline.load(Ordering::SeqCst) {
      return Err(eyre!("Failed to fetch {}: network is offline", request.url));
    }

    let route = self.routes.lock().unwrap().get(&path).cloned();
    let response = match route {
      Some((_, ResponseKind::Opaque, _)) => Response::opaque(request.url.clone()),
      Some((status, kind, body)) => Response::new(status, body)
        .with_kind(kind)
        .with_url(request.url.clone()),
      None => Response::new(404, "not found").with_url(request.url.clone()),
    };
    Ok(response)
  }
}

/// In-memory SQLite store that counts calls and can be told to fail.
pub struct FlakyStore {
  inner: SqliteStore,
  calls: AtomicUsize,
  failing_deletes: Mutex<HashSet<String>>,
  failing_puts: AtomicBool,
  panicking_puts: AtomicBool,
}

impl FlakyStore {
  pub fn new() -> Self {
    Self {
      inner: SqliteStore::open_in_memory().unwrap(),
      calls: AtomicUsize::new(0),
      failing_deletes: Mutex::new(HashSet::new()),
      failing_puts: AtomicBool::new(false),
      panicking_puts: AtomicBool::new(false),
    }
  }

  pub fn fail_delete_of(&self, name: &str) {
    self.failing_deletes.lock().unwrap().insert(name.to_string());
  }

  pub fn fail_puts(&self) {
    self.failing_puts.store(true, Ordering::SeqCst);
  }

  pub fn panic_on_put(&self) {
    self.panicking_puts.store(true, Ordering::SeqCst);
  }

  pub fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }

  fn count(&self) {
    self.calls.fetch_add(1, Ordering::SeqCst);
  }
}

impl CacheStore for FlakyStore {
  fn open(&self, name: &str) -> Result<()> {
    self.count();
    self.inner.open(name)
  }

  fn has(&self, name: &str) -> Result<bool> {
    self.count();
    self.inner.has(name)
  }

  fn keys(&self) -> Result<Vec<String>> {
    self.count();
    self.inner.keys()
  }

  fn delete(&self, name: &str) -> Result<bool> {
    self.count();
    if self.failing_deletes.lock().unwrap().contains(name) {
      return Err(eyre!("Failed to delete cache {}: disk I/O error", name));
    }
    self.inner.delete(name)
  }

  fn match_in(&self, cache: &str, request: &Request) -> Result<Option<Response>> {
    self.count();
    self.inner.match_in(cache, request)
  }

  fn put(&self, cache: &str, request: &Request, response: Response) -> Result<()> {
    self.count();
    if self.failing_puts.load(Ordering::SeqCst) {
      return Err(eyre!("Failed to store entry: quota exceeded"));
    }
    if self.panicking_puts.load(Ordering::SeqCst) {
      panic!("store poisoned while writing {}", request.url);
    }
    self.inner.put(cache, request, response)
  }

  fn put_all(&self, cache: &str, entries: Vec<(Request, Response)>) -> Result<()> {
    self.count();
    self.inner.put_all(cache, entries)
  }

  fn entries(&self, cache: &str) -> Result<Vec<EntrySummary>> {
    self.count();
    self.inner.entries(cache)
  }
}

/// Read the body of the entry stored for `path` in `cache`, if any.
pub fn stored_body(store: &impl CacheStore, cache: &str, path: &str) -> Option<String> {
  store
    .match_in(cache, &Request::get(url(path)))
    .unwrap()
    .map(|mut response| response.text().unwrap())
}
