//! SQLite implementation of the cache store.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, MutexGuard};
use url::Url;

use super::identity::{RequestKey, VaryKey};
use super::traits::{CacheStore, EntrySummary};
use crate::http::{Request, Response, ResponseKind};

/// SQLite-based cache store.
pub struct SqliteStore {
  conn: Mutex<Connection>,
}

impl SqliteStore {
  /// Open (or create) a store backed by the database file at `path`.
  pub fn open(path: &Path) -> Result<Self> {
    // Ensure parent directory exists
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent)
        .map_err(|e| eyre!("Failed to create cache directory: {}", e))?;
    }

    let conn = Connection::open(path)
      .map_err(|e| eyre!("Failed to open cache database at {}: {}", path.display(), e))?;

    Self::with_connection(conn)
  }

  /// A store that lives only as long as this value.
  pub fn open_in_memory() -> Result<Self> {
    let conn = Connection::open_in_memory()
      .map_err(|e| eyre!("Failed to open in-memory cache database: {}", e))?;
    Self::with_connection(conn)
  }

  fn with_connection(conn: Connection) -> Result<Self> {
    let storage = Self {
      conn: Mutex::new(conn),
    };
    storage.run_migrations()?;
    Ok(storage)
  }

  /// Get the default database path.
  pub fn default_path() -> Result<PathBuf> {
    let data_dir = dirs::data_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
      .ok_or_else(|| eyre!("Could not determine data directory"))?;

    Ok(data_dir.join("primal-cache").join("cache.db"))
  }

  fn run_migrations(&self) -> Result<()> {
    self
      .conn()?
      .execute_batch(CACHE_SCHEMA)
      .map_err(|e| eyre!("Failed to run cache migrations: {}", e))
  }

  fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
    self.conn.lock().map_err(|e| eyre!("Lock poisoned: {}", e))
  }
}

/// Schema for cache tables.
const CACHE_SCHEMA: &str = r#"
PRAGMA foreign_keys = ON;

-- Named caches, in creation order
CREATE TABLE IF NOT EXISTS caches (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE,
    created_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- One stored response per request identity per cache
CREATE TABLE IF NOT EXISTS entries (
    cache_id INTEGER NOT NULL,
    request_key TEXT NOT NULL,
    url TEXT NOT NULL,
    vary TEXT NOT NULL,
    status INTEGER NOT NULL,
    kind TEXT NOT NULL,
    response_url TEXT,
    redirected INTEGER NOT NULL,
    headers TEXT NOT NULL,
    body BLOB NOT NULL,
    cached_at TEXT NOT NULL DEFAULT (datetime('now')),
    PRIMARY KEY (cache_id, request_key),
    FOREIGN KEY (cache_id) REFERENCES caches(id) ON DELETE CASCADE
);
"#;

/// A response flattened for storage.
struct EntryRow {
  key: RequestKey,
  vary: String,
  status: u16,
  kind: ResponseKind,
  response_url: Option<String>,
  redirected: bool,
  headers: String,
  body: Vec<u8>,
}

impl EntryRow {
  fn new(request: &Request, mut response: Response) -> Result<Self> {
    let key = RequestKey::for_request(request)
      .ok_or_else(|| eyre!("Request method '{}' is unsupported", request.method))?;

    let vary = VaryKey::capture(response.headers(), &request.headers);
    if vary == VaryKey::Any {
      return Err(eyre!("Vary header contains *"));
    }
    let vary = serde_json::to_string(&vary).map_err(|e| eyre!("Failed to serialize vary: {}", e))?;

    // Values are kept as raw bytes; they need not be UTF-8
    let headers: Vec<(&str, &[u8])> = response
      .headers()
      .iter()
      .map(|(name, value)| (name.as_str(), value.as_bytes()))
      .collect();
    let headers =
      serde_json::to_string(&headers).map_err(|e| eyre!("Failed to serialize headers: {}", e))?;

    let body = response.bytes()?.to_vec();

    Ok(Self {
      key,
      vary,
      status: response.status(),
      kind: response.kind(),
      response_url: response.url().map(Url::to_string),
      redirected: response.is_redirected(),
      headers,
      body,
    })
  }

  fn insert(&self, conn: &Connection, cache_id: i64) -> Result<()> {
    conn
      .execute(
        "INSERT OR REPLACE INTO entries
           (cache_id, request_key, url, vary, status, kind, response_url, redirected, headers, body, cached_at)
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, datetime('now'))",
        params![
          cache_id,
          self.key.hash,
          self.key.url,
          self.vary,
          self.status,
          self.kind.as_str(),
          self.response_url,
          self.redirected,
          self.headers,
          self.body,
        ],
      )
      .map_err(|e| eyre!("Failed to store entry for {}: {}", self.key.url, e))?;
    Ok(())
  }
}

/// Create the cache if needed and return its id.
fn ensure_cache(conn: &Connection, name: &str) -> Result<i64> {
  conn
    .execute("INSERT OR IGNORE INTO caches (name) VALUES (?)", params![name])
    .map_err(|e| eyre!("Failed to create cache {}: {}", name, e))?;

  conn
    .query_row("SELECT id FROM caches WHERE name = ?", params![name], |row| {
      row.get(0)
    })
    .map_err(|e| eyre!("Failed to look up cache {}: {}", name, e))
}

impl CacheStore for SqliteStore {
  fn open(&self, name: &str) -> Result<()> {
    let conn = self.conn()?;
    ensure_cache(&conn, name).map(|_| ())
  }

  fn has(&self, name: &str) -> Result<bool> {
    let found: Option<i64> = self
      .conn()?
      .query_row("SELECT id FROM caches WHERE name = ?", params![name], |row| {
        row.get(0)
      })
      .optional()
      .map_err(|e| eyre!("Failed to look up cache {}: {}", name, e))?;
    Ok(found.is_some())
  }

  fn keys(&self) -> Result<Vec<String>> {
    let conn = self.conn()?;
    let mut stmt = conn
      .prepare("SELECT name FROM caches ORDER BY id")
      .map_err(|e| eyre!("Failed to prepare query: {}", e))?;

    let names = stmt
      .query_map([], |row| row.get(0))
      .map_err(|e| eyre!("Failed to list caches: {}", e))?
      .collect::<rusqlite::Result<Vec<String>>>()
      .map_err(|e| eyre!("Failed to read cache name: {}", e))?;

    Ok(names)
  }

  fn delete(&self, name: &str) -> Result<bool> {
    let mut conn = self.conn()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    tx.execute(
      "DELETE FROM entries WHERE cache_id IN (SELECT id FROM caches WHERE name = ?)",
      params![name],
    )
    .map_err(|e| eyre!("Failed to delete entries of cache {}: {}", name, e))?;
    let removed = tx
      .execute("DELETE FROM caches WHERE name = ?", params![name])
      .map_err(|e| eyre!("Failed to delete cache {}: {}", name, e))?;

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(removed > 0)
  }

  fn match_in(&self, cache: &str, request: &Request) -> Result<Option<Response>> {
    let Some(key) = RequestKey::for_request(request) else {
      return Ok(None);
    };

    let conn = self.conn()?;
    let row = conn
      .query_row(
        "SELECT e.vary, e.status, e.kind, e.response_url, e.redirected, e.headers, e.body
         FROM entries e
         INNER JOIN caches c ON c.id = e.cache_id
         WHERE c.name = ? AND e.request_key = ?",
        params![cache, key.hash],
        |row| {
          Ok((
            row.get::<_, String>(0)?,
            row.get::<_, u16>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, Option<String>>(3)?,
            row.get::<_, bool>(4)?,
            row.get::<_, String>(5)?,
            row.get::<_, Vec<u8>>(6)?,
          ))
        },
      )
      .optional()
      .map_err(|e| eyre!("Failed to look up {} in {}: {}", key.url, cache, e))?;

    let Some((vary, status, kind, response_url, redirected, headers, body)) = row else {
      return Ok(None);
    };

    let vary: VaryKey =
      serde_json::from_str(&vary).map_err(|e| eyre!("Failed to deserialize vary: {}", e))?;
    if !vary.matches(&request.headers) {
      return Ok(None);
    }

    let mut response = Response::new(status, body)
      .with_kind(ResponseKind::parse(&kind)?)
      .with_redirected(redirected)
      .with_headers(restore_headers(&headers)?);
    if let Some(url) = response_url {
      let url = Url::parse(&url).map_err(|e| eyre!("Invalid stored URL '{}': {}", url, e))?;
      response = response.with_url(url);
    }

    Ok(Some(response))
  }

  fn put(&self, cache: &str, request: &Request, response: Response) -> Result<()> {
    let row = EntryRow::new(request, response)?;
    let conn = self.conn()?;
    let cache_id = ensure_cache(&conn, cache)?;
    row.insert(&conn, cache_id)
  }

  fn put_all(&self, cache: &str, entries: Vec<(Request, Response)>) -> Result<()> {
    // Flatten everything first so a bad entry fails before anything is written
    let rows = entries
      .into_iter()
      .map(|(request, response)| EntryRow::new(&request, response))
      .collect::<Result<Vec<_>>>()?;

    let mut conn = self.conn()?;
    let tx = conn
      .transaction()
      .map_err(|e| eyre!("Failed to begin transaction: {}", e))?;

    let cache_id = ensure_cache(&tx, cache)?;
    for row in &rows {
      row.insert(&tx, cache_id)?;
    }

    tx.commit()
      .map_err(|e| eyre!("Failed to commit transaction: {}", e))?;

    Ok(())
  }

  fn entries(&self, cache: &str) -> Result<Vec<EntrySummary>> {
    let conn = self.conn()?;
    let mut stmt = conn
      .prepare(
        "SELECT e.url, e.status, length(e.body), e.cached_at
         FROM entries e
         INNER JOIN caches c ON c.id = e.cache_id
         WHERE c.name = ?
         ORDER BY e.rowid",
      )
      .map_err(|e| eyre!("Failed to prepare entry query: {}", e))?;

    let rows = stmt
      .query_map(params![cache], |row| {
        Ok((
          row.get::<_, String>(0)?,
          row.get::<_, u16>(1)?,
          row.get::<_, i64>(2)? as usize,
          row.get::<_, String>(3)?,
        ))
      })
      .map_err(|e| eyre!("Failed to query entries: {}", e))?
      .collect::<rusqlite::Result<Vec<_>>>()
      .map_err(|e| eyre!("Failed to read entry: {}", e))?;

    rows
      .into_iter()
      .map(|(url, status, size, cached_at)| {
        Ok(EntrySummary {
          url,
          status,
          size,
          cached_at: parse_datetime(&cached_at)?,
        })
      })
      .collect()
  }
}

fn restore_headers(json: &str) -> Result<HeaderMap> {
  let pairs: Vec<(String, Vec<u8>)> =
    serde_json::from_str(json).map_err(|e| eyre!("Failed to deserialize headers: {}", e))?;

  let mut headers = HeaderMap::new();
  for (name, value) in pairs {
    let name = HeaderName::from_bytes(name.as_bytes())
      .map_err(|e| eyre!("Invalid stored header name '{}': {}", name, e))?;
    let value = HeaderValue::from_bytes(&value)
      .map_err(|e| eyre!("Invalid stored value for header {}: {}", name, e))?;
    headers.append(name, value);
  }
  Ok(headers)
}

/// Parse a datetime string from SQLite format.
fn parse_datetime(s: &str) -> Result<DateTime<Utc>> {
  // SQLite stores as "YYYY-MM-DD HH:MM:SS"
  chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
    .map(|dt| dt.and_utc())
    .map_err(|e| eyre!("Failed to parse datetime '{}': {}", s, e))
}
