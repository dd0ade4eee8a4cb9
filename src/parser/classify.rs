use std::fmt;

use regex::Regex;

use crate::db::LinkRow;

/// Where in a post a reference was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceKind {
    Link,
    ProminentLink,
    Image,
    Embed,
}

impl SourceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            SourceKind::Link => "link",
            SourceKind::ProminentLink => "prominent-link",
            SourceKind::Image => "image",
            SourceKind::Embed => "embed",
        }
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Internal,
    External,
}

impl Scope {
    pub fn as_str(self) -> &'static str {
        match self {
            Scope::Internal => "internal",
            Scope::External => "external",
        }
    }
}

/// URL patterns derived from the publishing domain.
#[derive(Debug, Clone)]
pub struct SiteRules {
    internal: Regex,
    grapher: Regex,
}

impl SiteRules {
    pub fn new(base_domain: &str) -> Result<Self, regex::Error> {
        let host = regex::escape(base_domain.trim().trim_start_matches("www."));
        let internal = Regex::new(&format!(r"(?i)^https?://(?:www\.)?{host}(?:[/?#]|$)"))?;
        let grapher = Regex::new(&format!(
            r#"(?i)^https?://(?:www\.)?{host}/grapher/(?P<slug>[^?\s"']+)"#
        ))?;
        Ok(SiteRules { internal, grapher })
    }

    pub fn scope(&self, url: &str) -> Scope {
        if self.internal.is_match(url.trim_start()) {
            Scope::Internal
        } else {
            Scope::External
        }
    }

    /// Normalized chart slug of a grapher URL; `None` for anything else.
    pub fn chart_slug(&self, url: &str) -> Option<String> {
        let caps = self.grapher.captures(url.trim_start())?;
        Some(caps["slug"].trim().to_lowercase())
    }

    pub fn grapher_pattern(&self) -> &str {
        self.grapher.as_str()
    }
}

/// Split `urls` into internal and external edges labelled `{scope}-{kind}`.
/// Internal edges come first, each group keeps document order.
pub fn classify_links(
    rules: &SiteRules,
    post_id: i64,
    urls: &[String],
    kind: SourceKind,
) -> Vec<LinkRow> {
    let (internal, external): (Vec<&String>, Vec<&String>) = urls
        .iter()
        .partition(|url| rules.scope(url) == Scope::Internal);

    let edge = |url: &String, scope: Scope| LinkRow {
        post_id,
        link: url.clone(),
        kind: format!("{}-{}", scope.as_str(), kind),
    };

    internal
        .into_iter()
        .map(|u| edge(u, Scope::Internal))
        .chain(external.into_iter().map(|u| edge(u, Scope::External)))
        .collect()
}

/// Images are never split by scope; every edge is plain `image`.
pub fn image_links(post_id: i64, urls: &[String]) -> Vec<LinkRow> {
    urls.iter()
        .map(|url| LinkRow {
            post_id,
            link: url.clone(),
            kind: SourceKind::Image.to_string(),
        })
        .collect()
}

// ── Tests ──
