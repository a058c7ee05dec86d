//! Request and response values exchanged between the host, the worker and the network.

use bytes::Bytes;
use color_eyre::{eyre::eyre, Result};
use reqwest::header::HeaderMap;
use reqwest::Method;
use url::Url;

/// How the request was initiated by the page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RequestMode {
  /// Top-level page load
  Navigate,
  #[default]
  SameOrigin,
  Cors,
  NoCors,
}

/// An outgoing request as seen by the worker.
#[derive(Debug, Clone)]
pub struct Request {
  pub method: Method,
  pub url: Url,
  pub mode: RequestMode,
  pub headers: HeaderMap,
  pub body: Option<Bytes>,
}

impl Request {
  /// A same-origin GET sub-resource request.
  pub fn get(url: Url) -> Self {
    Self {
      method: Method::GET,
      url,
      mode: RequestMode::SameOrigin,
      headers: HeaderMap::new(),
      body: None,
    }
  }

  /// A top-level navigation to `url`.
  pub fn navigate(url: Url) -> Self {
    Self {
      mode: RequestMode::Navigate,
      ..Self::get(url)
    }
  }

  pub fn with_method(mut self, method: Method) -> Self {
    self.method = method;
    self
  }

  pub fn with_mode(mut self, mode: RequestMode) -> Self {
    self.mode = mode;
    self
  }

  pub fn with_headers(mut self, headers: HeaderMap) -> Self {
    self.headers = headers;
    self
  }

  pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
    self.body = Some(body.into());
    self
  }

  pub fn is_navigation(&self) -> bool {
    self.mode == RequestMode::Navigate
  }

  pub fn path(&self) -> &str {
    self.url.path()
  }
}

/// Response type as classified by the fetching side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
  /// Same-origin response with readable headers and body
  Basic,
  /// Cross-origin response allowed by CORS
  Cors,
  /// Cross-origin no-cors response; status and body are hidden
  Opaque,
}

impl ResponseKind {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Basic => "basic",
      Self::Cors => "cors",
      Self::Opaque => "opaque",
    }
  }

  pub fn parse(s: &str) -> Result<Self> {
    match s {
      "basic" => Ok(Self::Basic),
      "cors" => Ok(Self::Cors),
      "opaque" => Ok(Self::Opaque),
      other => Err(eyre!("Unknown response kind '{}'", other)),
    }
  }
}

#[derive(Debug)]
enum Body {
  Unread(Bytes),
  Consumed,
}

/// A response whose body can be read exactly once.
///
/// A response that must reach two consumers (the caller and the cache) has to be
/// [`duplicate`](Response::duplicate)d before either of them reads the body.
#[derive(Debug)]
pub struct Response {
  status: u16,
  kind: ResponseKind,
  url: Option<Url>,
  redirected: bool,
  headers: HeaderMap,
  body: Body,
}

impl Response {
  pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
    Self {
      status,
      kind: ResponseKind::Basic,
      url: None,
      redirected: false,
      headers: HeaderMap::new(),
      body: Body::Unread(body.into()),
    }
  }

  /// An opaque response: status 0, no headers, empty body.
  pub fn opaque(url: Url) -> Self {
    Self {
      kind: ResponseKind::Opaque,
      url: Some(url),
      ..Self::new(0, Bytes::new())
    }
  }

  pub fn with_kind(mut self, kind: ResponseKind) -> Self {
    self.kind = kind;
    self
  }

  pub fn with_url(mut self, url: Url) -> Self {
    self.url = Some(url);
    self
  }

  pub fn with_redirected(mut self, redirected: bool) -> Self {
    self.redirected = redirected;
    self
  }

  pub fn with_headers(mut self, headers: HeaderMap) -> Self {
    self.headers = headers;
    self
  }

  pub fn status(&self) -> u16 {
    self.status
  }

  pub fn kind(&self) -> ResponseKind {
    self.kind
  }

  pub fn url(&self) -> Option<&Url> {
    self.url.as_ref()
  }

  pub fn is_redirected(&self) -> bool {
    self.redirected
  }

  pub fn headers(&self) -> &HeaderMap {
    &self.headers
  }

  pub fn body_used(&self) -> bool {
    matches!(self.body, Body::Consumed)
  }

  /// Status in the 200-299 range.
  pub fn ok(&self) -> bool {
    (200..300).contains(&self.status)
  }

  /// Exactly 200, same-origin basic, and not the result of a redirect.
  pub fn is_cacheable(&self) -> bool {
    self.status == 200 && self.kind == ResponseKind::Basic && !self.redirected
  }

  /// Produce an independent copy with its own unread body.
  ///
  /// Fails if the body has already been consumed.
  pub fn duplicate(&self) -> Result<Response> {
    let body = match &self.body {
      Body::Unread(bytes) => bytes.clone(),
      Body::Consumed => return Err(eyre!("Cannot duplicate a response whose body was already read")),
    };

    Ok(Self {
      status: self.status,
      kind: self.kind,
      url: self.url.clone(),
      redirected: self.redirected,
      headers: self.headers.clone(),
      body: Body::Unread(body),
    })
  }

  /// Read the whole body. A second read fails.
  pub fn bytes(&mut self) -> Result<Bytes> {
    match std::mem::replace(&mut self.body, Body::Consumed) {
      Body::Unread(bytes) => Ok(bytes),
      Body::Consumed => Err(eyre!("Response body already read")),
    }
  }

  pub fn text(&mut self) -> Result<String> {
    let bytes = self.bytes()?;
    String::from_utf8(bytes.to_vec()).map_err(|e| eyre!("Response body is not UTF-8: {}", e))
  }
}
