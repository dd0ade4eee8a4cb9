use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::path::Path;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use regex::Regex;
use rusqlite::functions::FunctionFlags;
use rusqlite::{params, Connection, ErrorCode, OpenFlags};
use serde::Deserialize;
use tracing::warn;

use crate::config::Settings;
use crate::parser::charts::{ChartSlugIndex, ChartTarget};
use crate::parser::classify::{SiteRules, SourceKind};
use crate::parser::PostLinks;

const SCHEMA_JSON: &str = include_str!("schema.json");

#[derive(Deserialize)]
struct Schema {
    tables: Vec<TableDef>,
    indexes: Vec<(String, String, String)>,
}

#[derive(Deserialize)]
struct TableDef {
    name: String,
    columns: Vec<String>,
}

// ── Connection ──

/// Open an existing content database. Missing files are an error rather than
/// silently creating an empty database.
pub fn connect(path: &Path, settings: &Settings) -> Result<Connection> {
    let conn = Connection::open_with_flags(
        path,
        OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_URI | OpenFlags::SQLITE_OPEN_NO_MUTEX,
    )
    .with_context(|| format!("Failed to open {:?}", path))?;
    configure(&conn, settings)?;
    Ok(conn)
}

pub fn configure(conn: &Connection, settings: &Settings) -> Result<()> {
    let fk = if settings.foreign_keys { "ON" } else { "OFF" };
    conn.execute_batch(&format!("PRAGMA foreign_keys={};", fk))?;
    register_regexp(conn)?;
    Ok(())
}

/// Install `REGEXP` on this connection. Compiled patterns are cached in a map
/// owned by the function itself, so each connection has its own cache.
pub fn register_regexp(conn: &Connection) -> Result<()> {
    let mut cache: HashMap<String, Regex> = HashMap::new();
    conn.create_scalar_function(
        "regexp",
        2,
        FunctionFlags::SQLITE_UTF8 | FunctionFlags::SQLITE_DETERMINISTIC,
        move |ctx| {
            let pattern: String = ctx.get(0)?;
            let text: Option<String> = ctx.get(1)?;
            let Some(text) = text else {
                return Ok(false);
            };
            let re = match cache.entry(pattern) {
                Entry::Occupied(e) => e.into_mut(),
                Entry::Vacant(e) => {
                    let re = Regex::new(e.key())
                        .map_err(|err| rusqlite::Error::UserFunctionError(Box::new(err)))?;
                    e.insert(re)
                }
            };
            Ok(re.is_match(&text))
        },
    )?;
    Ok(())
}

// ── Schema ──

/// Create the link tables and their indexes if they are not there yet.
pub fn ensure_schema(conn: &Connection) -> Result<()> {
    let schema: Schema = serde_json::from_str(SCHEMA_JSON)?;
    for table in &schema.tables {
        let sql = format!(
            "CREATE TABLE IF NOT EXISTS {} ({})",
            table.name,
            table.columns.join(", ")
        );
        conn.execute(&sql, [])
            .with_context(|| format!("Failed to create table {}", table.name))?;
    }
    for (idx, table, cols) in &schema.indexes {
        let sql = format!("CREATE INDEX IF NOT EXISTS {} ON {} ({})", idx, table, cols);
        conn.execute(&sql, [])
            .with_context(|| format!("Failed to create index {}", idx))?;
    }
    Ok(())
}

// ── Retries ──

fn is_busy(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(e, _)
            if matches!(e.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
    )
}

/// `retry_backoff_ms * 2^attempt`, saturating instead of overflowing.
fn backoff(settings: &Settings, attempt: u32) -> Duration {
    let factor = 2u64.checked_pow(attempt).unwrap_or(u64::MAX);
    Duration::from_millis(settings.retry_backoff_ms.saturating_mul(factor))
}

/// Run `op`, retrying with exponential backoff while SQLite reports the
/// database as busy or locked. Any other error is returned immediately.
fn with_retry<T>(
    settings: &Settings,
    what: &str,
    mut op: impl FnMut() -> rusqlite::Result<T>,
) -> Result<T> {
    let mut attempt = 0;
    loop {
        match op() {
            Ok(v) => return Ok(v),
            Err(e) if is_busy(&e) && attempt < settings.max_retries => {
                let backoff = backoff(settings, attempt);
                warn!(
                    "Database busy during {} (attempt {}/{}), backing off {:.1}s",
                    what,
                    attempt + 1,
                    settings.max_retries,
                    backoff.as_secs_f64()
                );
                thread::sleep(backoff);
                attempt += 1;
            }
            Err(e) => return Err(e).with_context(|| format!("Failed to {}", what)),
        }
    }
}

// ── Inputs ──

pub struct Post {
    pub id: i64,
    pub slug: String,
    pub title: String,
    pub content: String,
}

/// Live chart slugs unioned with historical redirects.
pub fn load_chart_slug_index(conn: &Connection, settings: &Settings) -> Result<ChartSlugIndex> {
    let rows: Vec<(i64, Option<String>, bool)> = with_retry(settings, "load chart slugs", || {
        let mut stmt = conn.prepare(
            "SELECT chart_id, slug, 1 AS is_redirect FROM chart_slug_redirects
             UNION
             SELECT id, CAST(JSON_EXTRACT(config, '$.slug') AS TEXT), 0 FROM charts",
        )?;
        let rows = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    })?;

    let mut index = ChartSlugIndex::new();
    for (chart_id, slug, is_redirect) in rows {
        if let Some(slug) = slug {
            index.insert(&slug, ChartTarget { chart_id, is_redirect });
        }
    }
    Ok(index)
}

pub fn fetch_posts(conn: &Connection, settings: &Settings) -> Result<Vec<Post>> {
    with_retry(settings, "fetch posts", || {
        let mut stmt = conn.prepare(
            "SELECT id, COALESCE(slug, ''), COALESCE(title, ''), content FROM posts ORDER BY id",
        )?;
        let rows = stmt
            .query_map([], |row| {
                let content: Option<String> = row.get(3)?;
                Ok(Post {
                    id: row.get(0)?,
                    slug: row.get(1)?,
                    title: row.get(2)?,
                    content: content.unwrap_or_default(),
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    })
}

// ── Outputs ──

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkRow {
    pub post_id: i64,
    pub link: String,
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChartRefRow {
    pub post_id: i64,
    pub chart_id: i64,
    pub kind: SourceKind,
    pub through_redirect: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BrokenChartRow {
    pub post_id: i64,
    pub chart_slug: String,
    pub kind: SourceKind,
}

/// Insert one post's rows. Tables with nothing to insert are not touched.
pub fn save_post_links(conn: &Connection, post: &PostLinks, settings: &Settings) -> Result<()> {
    if !post.links.is_empty() {
        let mut stmt =
            conn.prepare_cached("INSERT INTO post_links (postId, link, kind) VALUES (?1, ?2, ?3)")?;
        for l in &post.links {
            with_retry(settings, "insert post link", || {
                stmt.execute(params![l.post_id, l.link, l.kind])
            })?;
        }
    }

    if !post.charts.is_empty() {
        let mut stmt = conn.prepare_cached(
            "INSERT INTO post_charts (postId, chartId, kind, through_redirect)
             VALUES (?1, ?2, ?3, ?4)",
        )?;
        for c in &post.charts {
            with_retry(settings, "insert chart reference", || {
                stmt.execute(params![c.post_id, c.chart_id, c.kind.as_str(), c.through_redirect])
            })?;
        }
    }

    if !post.broken.is_empty() {
        let mut stmt = conn.prepare_cached(
            "INSERT INTO post_broken_chart_links (postId, chartSlug, kind) VALUES (?1, ?2, ?3)",
        )?;
        for b in &post.broken {
            with_retry(settings, "insert broken chart reference", || {
                stmt.execute(params![b.post_id, b.chart_slug, b.kind.as_str()])
            })?;
        }
    }

    Ok(())
}

// ── Summary ──

pub struct Summary {
    pub links: usize,
    pub chart_links: usize,
    pub charts: usize,
    pub redirected: usize,
    pub broken: usize,
}

pub fn get_summary(conn: &Connection, rules: &SiteRules) -> Result<Summary> {
    let links: usize = conn.query_row("SELECT COUNT(*) FROM post_links", [], |r| r.get(0))?;
    let chart_links: usize = conn.query_row(
        "SELECT COUNT(*) FROM post_links WHERE link REGEXP ?1",
        params![rules.grapher_pattern()],
        |r| r.get(0),
    )?;
    let charts: usize = conn.query_row("SELECT COUNT(*) FROM post_charts", [], |r| r.get(0))?;
    let redirected: usize = conn.query_row(
        "SELECT COUNT(*) FROM post_charts WHERE through_redirect = 1",
        [],
        |r| r.get(0),
    )?;
    let broken: usize =
        conn.query_row("SELECT COUNT(*) FROM post_broken_chart_links", [], |r| r.get(0))?;
    Ok(Summary {
        links,
        chart_links,
        charts,
        redirected,
        broken,
    })
}

// ── Tests ──

#[cfg(test)]
pub mod test_db {
    use rusqlite::Connection;

    use crate::config::Settings;

    /// In-memory content database with the source tables the tool reads.
    pub fn source_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        super::configure(&conn, &Settings::default()).unwrap();
        conn.execute_batch(
            r#"
            CREATE TABLE posts (id INTEGER PRIMARY KEY, slug TEXT, title TEXT, content TEXT);
            CREATE TABLE charts (id INTEGER PRIMARY KEY, config TEXT);
            CREATE TABLE chart_slug_redirects (id INTEGER PRIMARY KEY, chart_id INTEGER, slug TEXT);

            INSERT INTO charts (id, config) VALUES
                (42, '{"slug":"population","title":"Population"}'),
                (9,  '{"slug":"old-name"}'),
                (11, '{"title":"no slug here"}');
            INSERT INTO chart_slug_redirects (chart_id, slug) VALUES
                (7,  'old-name'),
                (42, 'World-Population');
            "#,
        )
        .unwrap();
        conn
    }

    pub fn insert_post(conn: &Connection, id: i64, slug: &str, content: Option<&str>) {
        conn.execute(
            "INSERT INTO posts (id, slug, title, content) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![id, slug, format!("Title of {slug}"), content],
        )
        .unwrap();
    }

    pub fn count(conn: &Connection, table: &str) -> usize {
        conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))
            .unwrap()
    }
}
