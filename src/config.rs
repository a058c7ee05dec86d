use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use url::Url;

/// Environment variable overriding the origin from the config file.
pub const ORIGIN_ENV: &str = "PRIMAL_CACHE_ORIGIN";

const DEFAULT_ORIGIN: &str = "http://127.0.0.1:5000/";

/// User-facing configuration, as read from YAML.
///
/// Every field has a compiled-in default, so a config file is optional.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
  /// Origin the worker is installed for; manifest and live paths resolve against it
  pub origin: Url,
  /// Name of the current generation's static manifest cache
  pub static_cache: String,
  /// Name of the current generation's runtime cache
  pub runtime_cache: String,
  /// Paths to pre-populate into the static cache
  pub manifest: Vec<String>,
  /// Paths that always go to the network (exact match)
  #[serde(deserialize_with = "deserialize_path_set")]
  pub live_paths: BTreeSet<String>,
  /// Page served to navigations when the network is down
  pub offline_fallback: String,
  /// Cache database location (defaults to the user data directory)
  pub database: Option<PathBuf>,
}

impl Default for Config {
  fn default() -> Self {
    Self {
      origin: Url::parse(DEFAULT_ORIGIN).expect("default origin is a valid URL"),
      static_cache: "primal-checker-v1".to_string(),
      runtime_cache: "primal-runtime-v1".to_string(),
      manifest: vec![
        "/".to_string(),
        "/static/icons/icon-192x192.png".to_string(),
        "/static/icons/icon-512x512.png".to_string(),
      ],
      live_paths: BTreeSet::from(["/check".to_string()]),
      offline_fallback: "/".to_string(),
      database: None,
    }
  }
}

fn deserialize_path_set<'de, D>(deserializer: D) -> Result<BTreeSet<String>, D::Error>
where
  D: serde::Deserializer<'de>,
{
  let v: Vec<String> = Vec::deserialize(deserializer)?;
  Ok(v.into_iter().map(|s| s.trim().to_string()).collect())
}

/// The pair of caches that make up one generation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Generation {
  pub static_cache: String,
  pub runtime_cache: String,
}

impl Generation {
  /// Lookup order: static manifest cache first, then runtime cache.
  pub fn names(&self) -> [&str; 2] {
    [&self.static_cache, &self.runtime_cache]
  }

  pub fn contains(&self, name: &str) -> bool {
    self.static_cache == name || self.runtime_cache == name
  }
}

/// Validated, immutable settings handed to the worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
  pub origin: Url,
  pub generation: Generation,
  pub manifest: Vec<Url>,
  pub live_paths: BTreeSet<String>,
  pub offline_fallback: Url,
}

impl WorkerConfig {
  /// Whether `path` is a live-data endpoint that must never be served from cache.
  pub fn is_live(&self, path: &str) -> bool {
    self.live_paths.contains(path)
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided (must exist)
  /// 2. ./primal-cache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/primal-cache/config.yaml
  /// 4. Built-in defaults
  ///
  /// `PRIMAL_CACHE_ORIGIN` overrides the origin in every case.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    let config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Self::default(),
    };

    match std::env::var(ORIGIN_ENV) {
      Ok(origin) => config.with_origin(&origin),
      Err(_) => Ok(config),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("primal-cache.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("primal-cache").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    let config: Config = serde_yaml::from_str(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))?;

    Ok(config)
  }

  fn with_origin(self, origin: &str) -> Result<Self> {
    let origin =
      Url::parse(origin).map_err(|e| eyre!("Invalid {} '{}': {}", ORIGIN_ENV, origin, e))?;
    Ok(Self { origin, ..self })
  }

  /// Validate and resolve into the settings the worker runs with.
  pub fn worker_config(&self) -> Result<WorkerConfig> {
    if !matches!(self.origin.scheme(), "http" | "https") {
      return Err(eyre!("Origin must be http or https, got {}", self.origin));
    }
    if self.static_cache.trim().is_empty() || self.runtime_cache.trim().is_empty() {
      return Err(eyre!("Cache names must not be empty"));
    }
    if self.static_cache == self.runtime_cache {
      return Err(eyre!(
        "Static and runtime caches must have different names, both are '{}'",
        self.static_cache
      ));
    }
    if let Some(path) = self.live_paths.iter().find(|p| !p.starts_with('/')) {
      return Err(eyre!("Live path '{}' must start with '/'", path));
    }

    let manifest = self
      .manifest
      .iter()
      .map(|path| self.resolve(path))
      .collect::<Result<Vec<_>>>()?;

    Ok(WorkerConfig {
      origin: self.origin.clone(),
      generation: Generation {
        static_cache: self.static_cache.clone(),
        runtime_cache: self.runtime_cache.clone(),
      },
      manifest,
      live_paths: self.live_paths.clone(),
      offline_fallback: self.resolve(&self.offline_fallback)?,
    })
  }

  /// Resolve a path or URL against the origin.
  pub fn resolve(&self, target: &str) -> Result<Url> {
    self
      .origin
      .join(target)
      .map_err(|e| eyre!("Invalid path '{}': {}", target, e))
  }

  /// Where the cache database lives.
  pub fn database_path(&self) -> Result<PathBuf> {
    match &self.database {
      Some(path) => Ok(path.clone()),
      None => crate::cache::SqliteStore::default_path(),
    }
  }
}
