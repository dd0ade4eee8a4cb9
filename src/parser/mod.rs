pub mod charts;
pub mod classify;
pub mod markup;

use tracing::debug;

use charts::ChartSlugIndex;
use classify::{SiteRules, SourceKind};

use crate::db::{BrokenChartRow, ChartRefRow, LinkRow, Post};
use crate::error::ScanWarning;

/// All rows extracted from one post.
#[derive(Debug)]
pub struct PostLinks {
    pub post_id: i64,
    pub post_slug: String,
    pub links: Vec<LinkRow>,
    pub charts: Vec<ChartRefRow>,
    pub broken: Vec<BrokenChartRow>,
    pub warnings: Vec<ScanWarning>,
}

impl PostLinks {
    pub fn row_count(&self) -> usize {
        self.links.len() + self.charts.len() + self.broken.len()
    }

    /// Unresolved chart slugs grouped by the kind of reference they came from.
    pub fn unresolved_by_kind(&self) -> Vec<(SourceKind, Vec<&str>)> {
        let mut groups: Vec<(SourceKind, Vec<&str>)> = Vec::new();
        for b in &self.broken {
            match groups.iter_mut().find(|(kind, _)| *kind == b.kind) {
                Some((_, slugs)) => slugs.push(b.chart_slug.as_str()),
                None => groups.push((b.kind, vec![b.chart_slug.as_str()])),
            }
        }
        groups
    }
}

/// Scan → classify → resolve for a single post. Pure, safe to run in parallel.
pub fn process_post(post: &Post, rules: &SiteRules, index: &ChartSlugIndex) -> PostLinks {
    let scanned = markup::scan(&post.content);
    if scanned.is_empty() && scanned.warnings.is_empty() {
        debug!(post = %post.slug, title = %post.title, "No references");
        return PostLinks {
            post_id: post.id,
            post_slug: post.slug.clone(),
            links: Vec::new(),
            charts: Vec::new(),
            broken: Vec::new(),
            warnings: Vec::new(),
        };
    }

    let mut links = Vec::new();
    let mut charts = Vec::new();
    let mut broken = Vec::new();

    let referencing = [
        (&scanned.anchors, SourceKind::Link),
        (&scanned.prominent_links, SourceKind::ProminentLink),
    ];
    for (urls, kind) in referencing {
        links.extend(classify::classify_links(rules, post.id, urls, kind));
        let refs = charts::resolve(rules, index, post.id, urls, kind);
        charts.extend(refs.charts);
        broken.extend(refs.broken);
    }

    links.extend(classify::image_links(post.id, &scanned.images));

    let embeds = charts::resolve(rules, index, post.id, &scanned.iframes, SourceKind::Embed);
    charts.extend(embeds.charts);
    broken.extend(embeds.broken);

    PostLinks {
        post_id: post.id,
        post_slug: post.slug.clone(),
        links,
        charts,
        broken,
        warnings: scanned.warnings,
    }
}

// ── Tests ──

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::charts::ChartTarget;

    fn post(id: i64, content: &str) -> Post {
        Post {
            id,
            slug: format!("post-{id}"),
            title: "Test post".into(),
            content: content.into(),
        }
    }

    fn fixture_index() -> ChartSlugIndex {
        let mut idx = ChartSlugIndex::new();
        for (slug, chart_id, is_redirect) in [
            ("population", 42, false),
            ("life-expectancy", 10, false),
            ("life-expectancy", 4, true),
            ("life-expectancy-vs-gdp", 11, false),
        ] {
            idx.insert(slug, ChartTarget { chart_id, is_redirect });
        }
        idx
    }

    fn rules() -> SiteRules {
        SiteRules::new("ourworldindata.org").unwrap()
    }

    #[test]
    fn post_without_references_yields_nothing() {
        let out = process_post(&post(1, "<p>Plain prose only.</p>"), &rules(), &fixture_index());
        assert_eq!(out.row_count(), 0);
        assert!(out.warnings.is_empty());
    }

    #[test]
    fn embedded_population_chart() {
        let html = r#"<iframe src="https://ourworldindata.org/grapher/Population?tab=map"></iframe>"#;
        let out = process_post(&post(9, html), &rules(), &fixture_index());
        assert!(out.links.is_empty());
        assert!(out.broken.is_empty());
        assert_eq!(out.charts.len(), 1);
        let c = &out.charts[0];
        assert_eq!((c.post_id, c.chart_id, c.kind, c.through_redirect), (9, 42, SourceKind::Embed, false));
    }

    #[test]
    fn embedded_unknown_chart() {
        let html = r#"<iframe src="https://ourworldindata.org/grapher/unknown-slug"></iframe>"#;
        let out = process_post(&post(9, html), &rules(), &fixture_index());
        assert!(out.charts.is_empty());
        assert_eq!(out.broken.len(), 1);
        assert_eq!(out.broken[0].chart_slug, "unknown-slug");
        assert_eq!(out.broken[0].kind, SourceKind::Embed);
    }

    #[test]
    fn anchor_to_chart_is_link_and_chart_ref() {
        let html = r#"<a href="https://ourworldindata.org/grapher/population">chart</a>"#;
        let out = process_post(&post(2, html), &rules(), &fixture_index());
        assert_eq!(out.links.len(), 1);
        assert_eq!(out.links[0].kind, "internal-link");
        assert_eq!(out.charts.len(), 1);
        assert_eq!(out.charts[0].kind, SourceKind::Link);
    }

    #[test]
    fn prominent_link_resolved_as_chart() {
        let html = r#"<!-- wp:owid/prominent-link {"linkUrl":"https://ourworldindata.org/grapher/population"} /-->"#;
        let out = process_post(&post(2, html), &rules(), &fixture_index());
        assert_eq!(out.links[0].kind, "internal-prominent-link");
        assert_eq!(out.charts.len(), 1);
        assert_eq!(out.charts[0].kind, SourceKind::ProminentLink);
    }

    #[test]
    fn article_fixture() {
        let html = std::fs::read_to_string("tests/fixtures/article.html").unwrap();
        let out = process_post(&post(3, &html), &rules(), &fixture_index());

        let kinds: Vec<&str> = out.links.iter().map(|l| l.kind.as_str()).collect();
        assert_eq!(kinds.iter().filter(|k| **k == "internal-link").count(), 2);
        assert_eq!(kinds.iter().filter(|k| **k == "external-link").count(), 2);
        assert_eq!(kinds.iter().filter(|k| **k == "internal-prominent-link").count(), 1);
        assert_eq!(kinds.iter().filter(|k| **k == "image").count(), 2);

        // anchor + prominent link hit both life-expectancy entries, the iframe one chart
        assert_eq!(out.charts.len(), 5);
        assert_eq!(out.charts.iter().filter(|c| c.through_redirect).count(), 2);
        assert!(out
            .charts
            .iter()
            .any(|c| c.chart_id == 11 && c.kind == SourceKind::Embed));

        assert!(out.broken.is_empty());
        assert_eq!(out.warnings.len(), 1);
    }

    #[test]
    fn unresolved_grouped_by_kind() {
        let html = r#"<a href="https://ourworldindata.org/grapher/a">a</a>
<a href="https://ourworldindata.org/grapher/b">b</a>
<iframe src="https://ourworldindata.org/grapher/c"></iframe>"#;
        let out = process_post(&post(4, html), &rules(), &ChartSlugIndex::new());
        let groups = out.unresolved_by_kind();
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0], (SourceKind::Link, vec!["a", "b"]));
        assert_eq!(groups[1], (SourceKind::Embed, vec!["c"]));
    }
}
