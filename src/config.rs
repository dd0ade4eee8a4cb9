use anyhow::{bail, Context, Result};
use config::{Config, Environment};
use serde::Deserialize;

pub const DEFAULT_BASE_DOMAIN: &str = "ourworldindata.org";
pub const MAX_RETRIES_LIMIT: u32 = 10;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Publishing domain, without scheme or `www.`.
    pub base_domain: String,
    /// Posts handed to the worker pool at a time.
    pub chunk_size: usize,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    pub foreign_keys: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            base_domain: DEFAULT_BASE_DOMAIN.to_string(),
            chunk_size: 500,
            max_retries: 3,
            retry_backoff_ms: 200,
            foreign_keys: false,
        }
    }
}

/// Load settings from `OWID_*` environment variables, with an optional
/// command-line override for the base domain.
pub fn load(base_domain: Option<String>) -> Result<Settings> {
    let settings: Settings = Config::builder()
        .add_source(Environment::with_prefix("OWID").try_parsing(true))
        .set_override_option("base_domain", base_domain)?
        .build()
        .context("Failed to read OWID_* settings")?
        .try_deserialize()
        .context("Invalid OWID_* settings")?;
    settings.validate()?;
    Ok(settings)
}

impl Settings {
    fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            bail!("chunk_size must be at least 1");
        }
        if self.max_retries > MAX_RETRIES_LIMIT {
            bail!(
                "max_retries must be at most {}, got {}",
                MAX_RETRIES_LIMIT,
                self.max_retries
            );
        }
        let domain = self.base_domain.trim();
        if domain.is_empty() || domain.contains("://") || domain.contains('/') {
            bail!("base_domain must be a bare host name, got {:?}", self.base_domain);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let s = Settings::default();
        assert_eq!(s.base_domain, "ourworldindata.org");
        assert_eq!(s.chunk_size, 500);
        assert!(s.validate().is_ok());
    }

    #[test]
    fn rejects_zero_chunk() {
        let s = Settings {
            chunk_size: 0,
            ..Settings::default()
        };
        assert!(s.validate().is_err());
    }

    #[test]
    fn rejects_url_as_domain() {
        let s = Settings {
            base_domain: "https://ourworldindata.org/".into(),
            ..Settings::default()
        };
        assert!(s.validate().is_err());
    }

    #[test]
    fn rejects_excessive_retries() {
        let s = Settings {
            max_retries: 1000,
            ..Settings::default()
        };
        assert!(s.validate().is_err());
        let s = Settings {
            max_retries: MAX_RETRIES_LIMIT,
            ..Settings::default()
        };
        assert!(s.validate().is_ok());
    }

    #[test]
    fn cli_override_wins() {
        let s = load(Some("example.org".into())).unwrap();
        assert_eq!(s.base_domain, "example.org");
    }
}
