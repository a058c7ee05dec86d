//! The cache-first worker.
//!
//! One `Worker` serves one generation: it provisions the static cache on install,
//! sweeps older generations on activate, and routes fetches from then on.

mod lifecycle;
mod provision;
mod router;

pub use lifecycle::{Clients, ServiceWorker, Worker, WorkerState};
pub use provision::{EvictionReport, Provisioner};
pub use router::{Routed, Router};
