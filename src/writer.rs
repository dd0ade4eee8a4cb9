use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use rayon::prelude::*;
use rusqlite::Connection;
use tracing::{debug, info, warn};

use crate::config::Settings;
use crate::db;
use crate::parser::{self, classify::SiteRules, PostLinks};

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RunCounts {
    pub posts: usize,
    pub without_refs: usize,
    pub links: usize,
    pub charts: usize,
    pub broken: usize,
    pub warnings: usize,
}

impl RunCounts {
    fn add(&mut self, post: &PostLinks) {
        self.posts += 1;
        if post.row_count() == 0 {
            self.without_refs += 1;
        }
        self.links += post.links.len();
        self.charts += post.charts.len();
        self.broken += post.broken.len();
        self.warnings += post.warnings.len();
    }

    pub fn print(&self) {
        println!(
            "Processed {} posts ({} without references): {} links, {} chart references, {} broken chart references, {} warnings.",
            self.posts, self.without_refs, self.links, self.charts, self.broken, self.warnings,
        );
    }
}

/// Build the link graph for every post and commit it in one transaction.
///
/// Posts are scanned in parallel, chunk by chunk; all inserts happen on this
/// thread. Nothing is committed if any step fails.
pub fn run(conn: &Connection, settings: &Settings, rules: &SiteRules) -> Result<RunCounts> {
    let pb = ProgressBar::new(0);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({per_sec})")?
            .progress_chars("#>-"),
    );
    run_with_progress(conn, settings, rules, &pb)
}

/// The bar is cleared whether the run succeeds or not.
fn run_with_progress(
    conn: &Connection,
    settings: &Settings,
    rules: &SiteRules,
    pb: &ProgressBar,
) -> Result<RunCounts> {
    let result = write_link_graph(conn, settings, rules, pb);
    pb.finish_and_clear();
    result
}

fn write_link_graph(
    conn: &Connection,
    settings: &Settings,
    rules: &SiteRules,
    pb: &ProgressBar,
) -> Result<RunCounts> {
    info!("Creating link tables");
    db::ensure_schema(conn)?;

    info!("Fetching chart slugs and redirects");
    let index = db::load_chart_slug_index(conn, settings)?;
    debug!(slugs = index.len(), "Chart slug index loaded");
    if index.is_empty() {
        warn!("No chart slugs found, every chart reference will be recorded as broken");
    }

    let posts = db::fetch_posts(conn, settings)?;
    info!("Processing {} posts", posts.len());
    pb.set_length(posts.len() as u64);

    let mut counts = RunCounts::default();
    let tx = conn.unchecked_transaction()?;

    for chunk in posts.chunks(settings.chunk_size) {
        let results: Vec<PostLinks> = chunk
            .par_iter()
            .map(|post| parser::process_post(post, rules, &index))
            .collect();

        for post in &results {
            report(pb, post);
            db::save_post_links(&tx, post, settings)
                .with_context(|| format!("Failed to save links of post {}", post.post_slug))?;
            counts.add(post);
        }
        pb.inc(chunk.len() as u64);
    }

    tx.commit().context("Failed to commit link tables")?;
    Ok(counts)
}

fn report(pb: &ProgressBar, post: &PostLinks) {
    if post.warnings.is_empty() && post.broken.is_empty() {
        return;
    }
    pb.suspend(|| {
        for w in &post.warnings {
            warn!(post = %post.post_slug, "{}", w);
        }
        for (kind, slugs) in post.unresolved_by_kind() {
            warn!(
                "The following slugs could not be resolved for chart references in post {} of kind {}: {}",
                post.post_slug,
                kind,
                slugs.join(", ")
            );
        }
    });
}

// ── Tests ──
