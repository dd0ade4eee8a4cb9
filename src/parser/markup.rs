use std::sync::LazyLock;

use html5ever::tendril::StrTendril;
use html5ever::tokenizer::states::RawKind;
use html5ever::tokenizer::{
    BufferQueue, Tag, TagKind, Token, TokenSink, TokenSinkResult, Tokenizer, TokenizerOpts,
};
use regex::Regex;
use serde::Deserialize;

use crate::error::ScanWarning;

static JSON_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?s)\{.*\}").unwrap());

const PROMINENT_LINK_MARKER: &str = "wp:owid/prominent-link";

/// Everything referenced from one post's markup, in document order.
#[derive(Debug, Default)]
pub struct ScannedMarkup {
    pub anchors: Vec<String>,
    pub images: Vec<String>,
    pub iframes: Vec<String>,
    pub prominent_links: Vec<String>,
    pub warnings: Vec<ScanWarning>,
}

impl ScannedMarkup {
    pub fn is_empty(&self) -> bool {
        self.anchors.is_empty()
            && self.images.is_empty()
            && self.iframes.is_empty()
            && self.prominent_links.is_empty()
    }
}

#[derive(Deserialize)]
struct ProminentLinkAttrs {
    #[serde(rename = "linkUrl")]
    link_url: Option<String>,
}

/// Collects references straight from the token stream. No tree is built, so
/// misnested or unclosed tags are never duplicated.
impl TokenSink for ScannedMarkup {
    type Handle = ();

    fn process_token(&mut self, token: Token, _line_number: u64) -> TokenSinkResult<()> {
        match token {
            Token::TagToken(tag) if tag.kind == TagKind::StartTag => return self.start_tag(tag),
            Token::CommentToken(body) => self.comment(&body),
            _ => {}
        }
        TokenSinkResult::Continue
    }
}

impl ScannedMarkup {
    fn start_tag(&mut self, tag: Tag) -> TokenSinkResult<()> {
        match &*tag.name {
            "a" => self.anchors.extend(attr(&tag, "href")),
            "img" => self.images.extend(attr(&tag, "src")),
            "iframe" => self
                .iframes
                .extend(attr(&tag, "src").filter(|src| !src.is_empty())),
            // script and style bodies are text, not markup
            "script" => return TokenSinkResult::RawData(RawKind::ScriptData),
            "style" => return TokenSinkResult::RawData(RawKind::Rawtext),
            _ => {}
        }
        TokenSinkResult::Continue
    }

    fn comment(&mut self, body: &str) {
        if !body.trim().starts_with(PROMINENT_LINK_MARKER) {
            return;
        }
        match parse_prominent_link(body) {
            Some(Ok(url)) => self.prominent_links.push(url),
            Some(Err(w)) => self.warnings.push(w),
            None => {}
        }
    }
}

fn attr(tag: &Tag, name: &str) -> Option<String> {
    tag.attrs
        .iter()
        .find(|a| &*a.name.local == name)
        .map(|a| a.value.to_string())
}

/// Scan raw post markup. Never fails: broken HTML is tokenized leniently and
/// unusable prominent-link blocks end up in `warnings`.
pub fn scan(markup: &str) -> ScannedMarkup {
    let mut input = BufferQueue::default();
    input.push_back(StrTendril::from_slice(markup));

    let mut tokenizer = Tokenizer::new(ScannedMarkup::default(), TokenizerOpts::default());
    let _ = tokenizer.feed(&mut input);
    tokenizer.end();
    tokenizer.sink
}

/// `None` when the block carries no JSON at all.
fn parse_prominent_link(block: &str) -> Option<Result<String, ScanWarning>> {
    let json = JSON_RE.find(block)?.as_str();
    let parsed = match serde_json::from_str::<ProminentLinkAttrs>(json) {
        Ok(attrs) => attrs,
        Err(source) => {
            return Some(Err(ScanWarning::MalformedProminentLink {
                json: json.to_string(),
                source,
            }))
        }
    };
    match parsed.link_url.filter(|u| !u.is_empty()) {
        Some(url) => Some(Ok(url)),
        None => Some(Err(ScanWarning::MissingLinkUrl {
            json: json.to_string(),
        })),
    }
}

// ── Tests ──
