use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::{eyre::eyre, Result};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Method;
use std::path::PathBuf;
use std::sync::Arc;

use primal_cache::cache::{CacheStore, SqliteStore};
use primal_cache::config::Config;
use primal_cache::host::{LocalHost, Registration};
use primal_cache::http::{Request, RequestMode};
use primal_cache::logging;
use primal_cache::network::HttpNetwork;

#[derive(Parser, Debug)]
#[command(name = "primal-cache")]
#[command(about = "Offline-first, cache-first request router for the primal checker")]
#[command(version)]
struct Args {
  /// Path to config file (default: ./primal-cache.yaml or $XDG_CONFIG_HOME/primal-cache/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  /// Cache database (default: $XDG_DATA_HOME/primal-cache/cache.db)
  #[arg(long, global = true)]
  database: Option<PathBuf>,

  /// Write logs to this file instead of stderr
  #[arg(long, global = true)]
  log_file: Option<PathBuf>,

  /// Debug logging
  #[arg(short, long, global = true)]
  verbose: bool,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Route requests through the worker, installing it first if needed
  Fetch {
    /// Paths or URLs, resolved against the origin
    #[arg(required = true)]
    targets: Vec<String>,

    /// Request mode; `navigate` makes the offline page available as a fallback
    #[arg(short, long, value_enum, default_value_t = Mode::SameOrigin)]
    mode: Mode,

    /// HTTP method
    #[arg(short = 'X', long, default_value = "GET")]
    method: String,

    /// Extra request header, as "Name: value" (repeatable)
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,

    /// Request body
    #[arg(short, long)]
    data: Option<String>,

    /// Print response bodies
    #[arg(long)]
    show_body: bool,
  },
  /// Install and activate the configured generation
  Install {
    /// Reinstall even if the generation is already installed
    #[arg(long)]
    force: bool,
  },
  /// List caches and their entries
  Caches,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum Mode {
  Navigate,
  SameOrigin,
  Cors,
  NoCors,
}

impl From<Mode> for RequestMode {
  fn from(mode: Mode) -> Self {
    match mode {
      Mode::Navigate => RequestMode::Navigate,
      Mode::SameOrigin => RequestMode::SameOrigin,
      Mode::Cors => RequestMode::Cors,
      Mode::NoCors => RequestMode::NoCors,
    }
  }
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();
  let _log_guard = logging::init(args.verbose, args.log_file.as_deref())?;

  // Load configuration
  let config = Config::load(args.config.as_deref())?;

  // Override database if specified on command line
  let config = if let Some(database) = args.database {
    Config {
      database: Some(database),
      ..config
    }
  } else {
    config
  };

  let store = Arc::new(SqliteStore::open(&config.database_path()?)?);

  match args.command {
    Command::Caches => list_caches(&*store),
    Command::Install { force } => {
      let mut host = connect(&config, store)?;
      let registration = host.register(config.worker_config()?, force).await?;
      match registration {
        Registration::Installed => println!("installed {}", config.static_cache),
        Registration::Resumed => println!("{} already installed", config.static_cache),
      }
      Ok(())
    }
    Command::Fetch {
      targets,
      mode,
      method,
      headers,
      data,
      show_body,
    } => {
      let method = Method::from_bytes(method.to_ascii_uppercase().as_bytes())
        .map_err(|e| eyre!("Invalid method '{}': {}", method, e))?;
      let headers = parse_headers(&headers)?;

      let mut requests = Vec::with_capacity(targets.len());
      for target in &targets {
        let mut request = Request::get(config.resolve(target)?)
          .with_mode(mode.into())
          .with_method(method.clone())
          .with_headers(headers.clone());
        if let Some(data) = &data {
          request = request.with_body(data.clone());
        }
        requests.push(request);
      }

      let mut host = connect(&config, store)?;
      host.register(config.worker_config()?, false).await?;

      let results =
        futures::future::join_all(requests.iter().map(|request| host.fetch(request.clone()))).await;
      host.drain().await;

      let mut failed = 0;
      for (request, result) in requests.iter().zip(results) {
        match result {
          Ok((mut response, source)) => {
            let body = response.bytes()?;
            println!(
              "{:<3} {:<7} {} ({} bytes)",
              response.status(),
              source.as_str(),
              request.url,
              body.len()
            );
            if show_body {
              println!("{}", String::from_utf8_lossy(&body));
            }
          }
          Err(e) => {
            failed += 1;
            println!("--- failed  {} ({})", request.url, e);
          }
        }
      }

      if failed > 0 {
        return Err(eyre!("{} of {} requests failed", failed, requests.len()));
      }
      Ok(())
    }
  }
}

fn connect(config: &Config, store: Arc<SqliteStore>) -> Result<LocalHost<SqliteStore, HttpNetwork>> {
  let network = Arc::new(HttpNetwork::new(config.origin.clone())?);
  Ok(LocalHost::new(store, network))
}

fn parse_headers(raw: &[String]) -> Result<HeaderMap> {
  let mut headers = HeaderMap::new();
  for header in raw {
    let (name, value) = header
      .split_once(':')
      .ok_or_else(|| eyre!("Invalid header '{}', expected \"Name: value\"", header))?;
    let name = HeaderName::from_bytes(name.trim().as_bytes())
      .map_err(|e| eyre!("Invalid header name '{}': {}", name, e))?;
    let value = HeaderValue::from_str(value.trim())
      .map_err(|e| eyre!("Invalid header value '{}': {}", value, e))?;
    headers.append(name, value);
  }
  Ok(headers)
}

fn list_caches(store: &impl CacheStore) -> Result<()> {
  let names = store.keys()?;
  if names.is_empty() {
    println!("no caches");
    return Ok(());
  }

  for name in names {
    let entries = store.entries(&name)?;
    println!("{} ({} entries)", name, entries.len());
    for entry in entries {
      println!(
        "  {:<3} {:>8}  {}  {}",
        entry.status,
        entry.size,
        entry.cached_at.format("%Y-%m-%d %H:%M:%S"),
        entry.url
      );
    }
  }
  Ok(())
}
