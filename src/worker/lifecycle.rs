//! The worker's three entry points and its install/activate state machine.

use color_eyre::{eyre::eyre, eyre::WrapErr, Result};
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use tracing::{info, warn};

use super::provision::{EvictionReport, Provisioner};
use super::router::{Routed, Router};
use crate::cache::CacheStore;
use crate::config::WorkerConfig;
use crate::http::Request;
use crate::network::Network;

/// Signals the worker sends back to its host.
pub trait Clients: Send + Sync {
  /// Installation succeeded; activate without waiting for old clients to go away.
  fn skip_waiting(&self);

  /// Activation finished; route already-open clients through this worker.
  fn claim(&self);
}

/// Lifecycle events delivered by the host.
pub trait ServiceWorker {
  fn on_install(&self) -> impl Future<Output = Result<()>> + Send;

  fn on_activate(&self) -> impl Future<Output = Result<()>> + Send;

  fn on_fetch(&self, request: Request) -> impl Future<Output = Routed> + Send;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
  /// Not yet installed, or installation failed
  Inactive,
  /// Static cache provisioned, waiting for activation
  Installed,
  /// Routing requests
  Active,
  /// A newer generation has taken over
  Superseded,
}

/// One generation of the worker.
pub struct Worker<S, N, C> {
  config: Arc<WorkerConfig>,
  provisioner: Provisioner<S, N>,
  router: Router<S, N>,
  clients: Arc<C>,
  state: Mutex<WorkerState>,
}

impl<S, N, C> Worker<S, N, C>
where
  S: CacheStore + 'static,
  N: Network,
  C: Clients,
{
  pub fn new(config: Arc<WorkerConfig>, store: Arc<S>, network: Arc<N>, clients: Arc<C>) -> Self {
    Self {
      provisioner: Provisioner::new(Arc::clone(&config), Arc::clone(&store), Arc::clone(&network)),
      router: Router::new(Arc::clone(&config), store, network),
      config,
      clients,
      state: Mutex::new(WorkerState::Inactive),
    }
  }

  pub fn state(&self) -> WorkerState {
    *self.state.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn set_state(&self, state: WorkerState) {
    *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
  }

  pub fn config(&self) -> &WorkerConfig {
    &self.config
  }

  pub fn clients(&self) -> &C {
    &self.clients
  }

  /// Whether this generation's static cache is already fully provisioned.
  pub fn is_installed(&self) -> Result<bool> {
    self.provisioner.is_provisioned()
  }

  /// Start routing for a generation whose static cache was provisioned by an
  /// earlier process. Activation may not have finished back then, so stale
  /// caches are swept and clients claimed again.
  pub fn resume(&self) -> Result<()> {
    if self.state() != WorkerState::Inactive {
      return Err(eyre!("Cannot resume a worker in state {:?}", self.state()));
    }
    if !self.is_installed()? {
      return Err(eyre!(
        "Generation {} is not installed",
        self.config.generation.static_cache
      ));
    }

    info!(cache = %self.config.generation.static_cache, "resuming");
    self.activate();
    Ok(())
  }

  fn activate(&self) {
    match self.provisioner.evict() {
      Ok(report) => self.log_eviction(&report),
      Err(e) => warn!(error = %e, "could not list caches for eviction"),
    }

    self.set_state(WorkerState::Active);
    self.clients.claim();
  }

  /// Stop routing; a newer generation is in control.
  pub fn supersede(&self) {
    info!(cache = %self.config.generation.static_cache, "worker superseded");
    self.set_state(WorkerState::Superseded);
  }

  /// Wait for background cache writes to finish.
  pub async fn drain(&self) {
    self.router.drain().await;
  }

  fn log_eviction(&self, report: &EvictionReport) {
    if !report.failed.is_empty() {
      warn!(failed = ?report.failed, "some stale caches could not be deleted");
    }
  }
}

impl<S, N, C> ServiceWorker for Worker<S, N, C>
where
  S: CacheStore + 'static,
  N: Network,
  C: Clients,
{
  async fn on_install(&self) -> Result<()> {
    let state = self.state();
    if state != WorkerState::Inactive {
      return Err(eyre!("Cannot install a worker in state {:?}", state));
    }

    info!(cache = %self.config.generation.static_cache, "installing");
    let stored = self
      .provisioner
      .provision()
      .await
      .wrap_err_with(|| format!("Failed to install {}", self.config.generation.static_cache))?;
    info!(assets = stored, "installed");

    self.set_state(WorkerState::Installed);
    self.clients.skip_waiting();
    Ok(())
  }

  async fn on_activate(&self) -> Result<()> {
    let state = self.state();
    if state != WorkerState::Installed {
      return Err(eyre!("Cannot activate a worker in state {:?}", state));
    }

    info!(cache = %self.config.generation.static_cache, "activating");
    self.activate();
    Ok(())
  }

  async fn on_fetch(&self, request: Request) -> Routed {
    if self.state() != WorkerState::Active {
      return Routed::PassThrough;
    }
    self.router.route(request).await
  }
}
