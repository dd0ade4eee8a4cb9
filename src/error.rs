use thiserror::Error;

/// Non-fatal problems found while scanning one post's markup.
#[derive(Debug, Error)]
pub enum ScanWarning {
    #[error("could not parse prominent link JSON {json}: {source}")]
    MalformedProminentLink {
        json: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("could not find linkUrl in prominent link JSON {json}")]
    MissingLinkUrl { json: String },
}
