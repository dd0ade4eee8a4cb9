mod config;
mod db;
mod error;
mod parser;
mod writer;

use std::path::PathBuf;
use std::time::Instant;

use anyhow::Context;
use clap::Parser;
use tracing::info;

use parser::classify::SiteRules;

#[derive(Parser)]
#[command(
    name = "extract_links",
    about = "Extract post links, images and chart references into the content database"
)]
struct Cli {
    /// Path to the SQLite content database
    db: PathBuf,
    /// Publishing domain, overrides OWID_BASE_DOMAIN
    #[arg(long)]
    base_domain: Option<String>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let t0 = Instant::now();
    let cli = Cli::parse();
    let settings = config::load(cli.base_domain)?;
    info!(?settings, "Starting link extraction");

    let rules = SiteRules::new(&settings.base_domain)
        .with_context(|| format!("Invalid base domain {:?}", settings.base_domain))?;

    let conn = db::connect(&cli.db, &settings)?;
    let counts = writer::run(&conn, &settings, &rules)?;
    counts.print();

    let s = db::get_summary(&conn, &rules)?;
    println!("post_links:              {} ({} to charts)", s.links, s.chart_links);
    println!("post_charts:             {} ({} through redirects)", s.charts, s.redirected);
    println!("post_broken_chart_links: {}", s.broken);

    println!("\nAll done in {}", format_duration(t0.elapsed()));
    Ok(())
}

fn format_duration(d: std::time::Duration) -> String {
    let secs = d.as_secs();
    if secs < 60 {
        format!("{:.1}s", d.as_secs_f64())
    } else if secs < 3600 {
        format!("{}m {}s", secs / 60, secs % 60)
    } else {
        format!("{}h {}m {}s", secs / 3600, (secs % 3600) / 60, secs % 60)
    }
}
