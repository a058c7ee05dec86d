//! The network side of the worker: plain fetches with no caching.

use color_eyre::{eyre::eyre, Result};
use std::future::Future;
use url::Url;

use crate::http::{Request, RequestMode, Response, ResponseKind};

/// Something that can perform a request over the network.
///
/// An `Err` means the fetch itself failed (offline, connection refused, ...).
/// Any HTTP status, including errors, is an `Ok` response.
pub trait Network: Send + Sync {
  fn fetch(&self, request: &Request) -> impl Future<Output = Result<Response>> + Send;
}

/// reqwest-backed network for a single origin.
#[derive(Clone)]
pub struct HttpNetwork {
  client: reqwest::Client,
  origin: Url,
}

impl HttpNetwork {
  pub fn new(origin: Url) -> Result<Self> {
    let client = reqwest::Client::builder()
      .user_agent(concat!("primal-cache/", env!("CARGO_PKG_VERSION")))
      .build()
      .map_err(|e| eyre!("Failed to create HTTP client: {}", e))?;

    Ok(Self { client, origin })
  }
}

impl Network for HttpNetwork {
  async fn fetch(&self, request: &Request) -> Result<Response> {
    let cross_origin = request.url.origin() != self.origin.origin();

    let mut builder = self
      .client
      .request(request.method.clone(), request.url.clone())
      .headers(request.headers.clone());
    if let Some(body) = &request.body {
      builder = builder.body(body.clone());
    }

    let response = builder
      .send()
      .await
      .map_err(|e| eyre!("Failed to fetch {}: {}", request.url, e))?;

    let final_url = response.url().clone();
    let mut requested = request.url.clone();
    requested.set_fragment(None);
    let redirected = final_url != requested;

    if cross_origin && request.mode == RequestMode::NoCors {
      return Ok(Response::opaque(final_url));
    }

    let kind = if !cross_origin && final_url.origin() == self.origin.origin() {
      ResponseKind::Basic
    } else {
      ResponseKind::Cors
    };
    let status = response.status().as_u16();
    let headers = response.headers().clone();
    let body = response
      .bytes()
      .await
      .map_err(|e| eyre!("Failed to read body of {}: {}", request.url, e))?;

    Ok(
      Response::new(status, body)
        .with_kind(kind)
        .with_url(final_url)
        .with_redirected(redirected)
        .with_headers(headers),
    )
  }
}
