//! Cache-first request routing with offline fallback for the primal checker web app.
//!
//! The policy lives in [`worker`]; it talks to storage through [`cache::CacheStore`]
//! and to the network through [`network::Network`]. [`host::LocalHost`] drives
//! workers through install, activate and fetch the way a browser would.

pub mod cache;
pub mod config;
pub mod host;
pub mod http;
pub mod logging;
pub mod network;
pub mod worker;

#[cfg(test)]
mod testing;
