use std::collections::{HashMap, HashSet};

use super::classify::{SiteRules, SourceKind};
use crate::db::{BrokenChartRow, ChartRefRow};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChartTarget {
    pub chart_id: i64,
    pub is_redirect: bool,
}

/// Lower-cased slug → every chart it may refer to. A slug can be both a live
/// chart slug and a redirect to another chart; both targets are kept.
#[derive(Debug, Default)]
pub struct ChartSlugIndex {
    slugs: HashMap<String, Vec<ChartTarget>>,
}

impl ChartSlugIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, slug: &str, target: ChartTarget) {
        let targets = self.slugs.entry(normalize_slug(slug)).or_default();
        if !targets.contains(&target) {
            targets.push(target);
        }
    }

    pub fn lookup(&self, slug: &str) -> &[ChartTarget] {
        self.slugs
            .get(&normalize_slug(slug))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn len(&self) -> usize {
        self.slugs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slugs.is_empty()
    }
}

pub fn normalize_slug(slug: &str) -> String {
    slug.trim().to_lowercase()
}

#[derive(Debug, Default)]
pub struct ChartRefs {
    pub charts: Vec<ChartRefRow>,
    pub broken: Vec<BrokenChartRow>,
}

/// Resolve the grapher URLs among `urls` against the index.
///
/// Non-grapher URLs are ignored. Every index entry matching a slug yields one
/// edge, with no deduplication across repeated occurrences. Unknown slugs are
/// recorded once per call.
pub fn resolve(
    rules: &SiteRules,
    index: &ChartSlugIndex,
    post_id: i64,
    urls: &[String],
    kind: SourceKind,
) -> ChartRefs {
    let mut refs = ChartRefs::default();
    let mut seen_broken = HashSet::new();

    for slug in urls.iter().filter_map(|url| rules.chart_slug(url)) {
        let targets = index.lookup(&slug);
        if targets.is_empty() {
            if seen_broken.insert(slug.clone()) {
                refs.broken.push(BrokenChartRow {
                    post_id,
                    chart_slug: slug,
                    kind,
                });
            }
            continue;
        }
        refs.charts.extend(targets.iter().map(|t| ChartRefRow {
            post_id,
            chart_id: t.chart_id,
            kind,
            through_redirect: t.is_redirect,
        }));
    }

    refs
}

// ── Tests ──
