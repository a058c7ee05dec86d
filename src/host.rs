//! In-process host: registers generations and delivers fetches to the active worker.

use color_eyre::Result;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::info;

use crate::cache::{CacheStore, ResponseSource};
use crate::config::WorkerConfig;
use crate::http::{Request, Response};
use crate::network::Network;
use crate::worker::{Clients, Routed, ServiceWorker, Worker};

/// Records the lifecycle signals a worker sends to the host.
#[derive(Debug, Default)]
pub struct HostSignals {
  skipped_waiting: AtomicBool,
  claimed: AtomicBool,
}

impl HostSignals {
  pub fn skipped_waiting(&self) -> bool {
    self.skipped_waiting.load(Ordering::SeqCst)
  }

  pub fn claimed(&self) -> bool {
    self.claimed.load(Ordering::SeqCst)
  }
}

impl Clients for HostSignals {
  fn skip_waiting(&self) {
    info!("skip waiting");
    self.skipped_waiting.store(true, Ordering::SeqCst);
  }

  fn claim(&self) {
    info!("claiming clients");
    self.claimed.store(true, Ordering::SeqCst);
  }
}

/// How a generation came to be in control.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
  /// Freshly installed and activated
  Installed,
  /// Already installed earlier; resumed without reinstalling
  Resumed,
}

pub type HostWorker<S, N> = Worker<S, N, HostSignals>;

/// Drives workers the way a browser drives service workers.
pub struct LocalHost<S, N> {
  store: Arc<S>,
  network: Arc<N>,
  controller: Option<Arc<HostWorker<S, N>>>,
}

impl<S, N> LocalHost<S, N>
where
  S: CacheStore + 'static,
  N: Network,
{
  pub fn new(store: Arc<S>, network: Arc<N>) -> Self {
    Self {
      store,
      network,
      controller: None,
    }
  }

  pub fn controller(&self) -> Option<&Arc<HostWorker<S, N>>> {
    self.controller.as_ref()
  }

  /// Bring the generation described by `config` into control.
  ///
  /// An already-installed generation is resumed unless `force` is set.
  /// Otherwise it is installed and then activated straight away (the worker
  /// skips waiting), superseding the previous controller. Install failure is
  /// returned as-is and leaves the current controller in place.
  pub async fn register(&mut self, config: WorkerConfig, force: bool) -> Result<Registration> {
    let worker = Arc::new(Worker::new(
      Arc::new(config),
      Arc::clone(&self.store),
      Arc::clone(&self.network),
      Arc::new(HostSignals::default()),
    ));

    if !force && self.controller.is_none() && worker.is_installed()? {
      worker.resume()?;
      info!(cache = %worker.config().generation.static_cache, "resumed installed generation");
      self.controller = Some(worker);
      return Ok(Registration::Resumed);
    }

    worker.on_install().await?;
    worker.on_activate().await?;
    info!(
      cache = %worker.config().generation.static_cache,
      skipped_waiting = worker.clients().skipped_waiting(),
      claimed = worker.clients().claimed(),
      "generation in control"
    );

    if let Some(previous) = self.controller.replace(worker) {
      previous.supersede();
    }
    Ok(Registration::Installed)
  }

  /// Deliver a request to the controller, or straight to the network when
  /// nothing intercepts it. An `Err` is a failed fetch.
  pub async fn fetch(&self, request: Request) -> Result<(Response, ResponseSource)> {
    let routed = match &self.controller {
      Some(worker) => worker.on_fetch(request.clone()).await,
      None => Routed::PassThrough,
    };

    match routed {
      Routed::PassThrough => {
        let response = self.network.fetch(&request).await?;
        Ok((response, ResponseSource::Direct))
      }
      Routed::Respond { response, source } => Ok((response, source)),
      Routed::Failed(error) => Err(error),
    }
  }

  /// Wait for the controller's background cache writes.
  pub async fn drain(&self) {
    if let Some(worker) = &self.controller {
      worker.drain().await;
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::cache::SqliteStore;
  use crate::testing::{url, worker_config, worker_config_v2, FakeNetwork};
  use crate::worker::WorkerState;
  use reqwest::Method;

  fn host(network: FakeNetwork) -> (LocalHost<SqliteStore, FakeNetwork>, Arc<FakeNetwork>) {
    let network = Arc::new(network);
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());
    (LocalHost::new(store, Arc::clone(&network)), network)
  }

  #[tokio::test]
  async fn test_first_registration_installs_and_claims() {
    let (mut host, _) = host(FakeNetwork::with_manifest());

    let registration = host.register(worker_config(), false).await.unwrap();

    assert_eq!(registration, Registration::Installed);
    let controller = host.controller().unwrap();
    assert_eq!(controller.state(), WorkerState::Active);
    assert!(controller.clients().skipped_waiting());
    assert!(controller.clients().claimed());
  }

  #[tokio::test]
  async fn test_failed_install_leaves_no_controller() {
    let (mut host, _) = host(FakeNetwork::new().with("/", 200, "<html></html>"));

    assert!(host.register(worker_config(), false).await.is_err());
    assert!(host.controller().is_none());
  }

  #[tokio::test]
  async fn test_installed_generation_is_resumed() {
    let network = Arc::new(FakeNetwork::with_manifest());
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());

    let mut first = LocalHost::new(Arc::clone(&store), Arc::clone(&network));
    first.register(worker_config(), false).await.unwrap();
    let fetched = network.calls().len();

    let mut second = LocalHost::new(store, Arc::clone(&network));
    let registration = second.register(worker_config(), false).await.unwrap();

    assert_eq!(registration, Registration::Resumed);
    assert_eq!(network.calls().len(), fetched);
  }

  #[tokio::test]
  async fn test_resumed_generation_sweeps_stale_caches() {
    let network = Arc::new(FakeNetwork::with_manifest());
    let store = Arc::new(SqliteStore::open_in_memory().unwrap());

    let mut first = LocalHost::new(Arc::clone(&store), Arc::clone(&network));
    first.register(worker_config(), false).await.unwrap();
    store
      .put("primal-runtime-v1", &Request::get(url("/app.js")), Response::new(200, "js"))
      .unwrap();

    // v2 installed by a process that exited before activating it
    let interrupted: HostWorker<SqliteStore, FakeNetwork> = Worker::new(
      Arc::new(worker_config_v2()),
      Arc::clone(&store),
      Arc::clone(&network),
      Arc::new(HostSignals::default()),
    );
    interrupted.on_install().await.unwrap();
    assert!(store.has("primal-checker-v1").unwrap());

    let mut second = LocalHost::new(Arc::clone(&store), network);
    let registration = second.register(worker_config_v2(), false).await.unwrap();

    assert_eq!(registration, Registration::Resumed);
    assert_eq!(store.keys().unwrap(), vec!["primal-checker-v2"]);
    assert!(second.controller().unwrap().clients().claimed());
  }

  #[tokio::test]
  async fn test_new_generation_supersedes_controller() {
    let (mut host, _) = host(FakeNetwork::with_manifest());
    host.register(worker_config(), false).await.unwrap();
    let v1 = Arc::clone(host.controller().unwrap());

    host.register(worker_config_v2(), false).await.unwrap();

    assert_eq!(v1.state(), WorkerState::Superseded);
    assert_eq!(
      host.controller().unwrap().config().generation.static_cache,
      "primal-checker-v2"
    );
  }

  #[tokio::test]
  async fn test_live_path_always_reaches_network() {
    let (mut host, network) = host(FakeNetwork::with_manifest().with("/check", 200, "{\"ok\":true}"));
    host.register(worker_config(), false).await.unwrap();

    for _ in 0..2 {
      let (mut response, source) = host.fetch(Request::get(url("/check"))).await.unwrap();
      assert_eq!(source, ResponseSource::Direct);
      assert_eq!(response.text().unwrap(), "{\"ok\":true}");
    }
    host.drain().await;

    let checks = network.calls().iter().filter(|p| *p == "/check").count();
    assert_eq!(checks, 2);
  }

  #[tokio::test]
  async fn test_post_is_sent_directly() {
    let (mut host, network) = host(FakeNetwork::with_manifest().with("/check", 200, "prime"));
    host.register(worker_config(), false).await.unwrap();

    let request = Request::get(url("/check"))
      .with_method(Method::POST)
      .with_body("{\"number\":\"7\"}");
    let (_, source) = host.fetch(request).await.unwrap();

    assert_eq!(source, ResponseSource::Direct);
    assert_eq!(network.calls().last().map(String::as_str), Some("/check"));
  }

  #[tokio::test]
  async fn test_offline_fetches_through_host() {
    let (mut host, network) = host(FakeNetwork::with_manifest());
    host.register(worker_config(), false).await.unwrap();
    network.set_offline(true);

    let (_, source) = host.fetch(Request::navigate(url("/history"))).await.unwrap();
    assert_eq!(source, ResponseSource::Offline);

    assert!(host.fetch(Request::get(url("/static/app.js"))).await.is_err());
  }

  #[tokio::test]
  async fn test_no_controller_goes_direct() {
    let (host, _) = host(FakeNetwork::with_manifest());

    let (_, source) = host.fetch(Request::get(url("/"))).await.unwrap();
    assert_eq!(source, ResponseSource::Direct);
  }
}
