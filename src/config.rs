use std::collections::BTreeMap;
use std::time::Duration;

use crate::models::DataSource;
use crate::sources::findandtrace::FINDANDTRACE_BASE_URL;
use crate::sources::http::{
    ABSTRACTAPI_BASE_URL, NEUTRINO_BASE_URL, NUMVERIFY_BASE_URL, TELNYX_BASE_URL,
    VERIPHONE_BASE_URL,
};
use crate::sources::whois::WHOIS_BASE_URL;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NeutrinoCredentials {
    pub user_id: String,
    pub api_key: String,
}

#[derive(Clone, PartialEq)]
pub struct Config {
    pub port: u16,
    pub default_region: String,
    pub abstractapi_key: Option<String>,
    pub abstractapi_base_url: String,
    pub neutrino: Option<NeutrinoCredentials>,
    pub neutrino_base_url: String,
    pub telnyx_api_key: Option<String>,
    pub telnyx_base_url: String,
    pub numverify_key: Option<String>,
    pub numverify_base_url: String,
    pub veriphone_key: Option<String>,
    pub veriphone_base_url: String,
    pub findandtrace_enabled: bool,
    pub findandtrace_base_url: String,
    pub whois_api_key: Option<String>,
    pub whois_base_url: String,
    /// Per-source overrides of the default query timeout.
    pub source_timeouts: BTreeMap<DataSource, Duration>,
}

// Keys stay out of Debug output so the config can be logged.
impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let redact = |key: &Option<String>| key.as_ref().map(|_| "[REDACTED]");
        f.debug_struct("Config")
            .field("port", &self.port)
            .field("default_region", &self.default_region)
            .field("abstractapi_key", &redact(&self.abstractapi_key))
            .field("neutrino", &self.neutrino.as_ref().map(|_| "[REDACTED]"))
            .field("telnyx_api_key", &redact(&self.telnyx_api_key))
            .field("numverify_key", &redact(&self.numverify_key))
            .field("veriphone_key", &redact(&self.veriphone_key))
            .field("findandtrace_enabled", &self.findandtrace_enabled)
            .field("whois_api_key", &redact(&self.whois_api_key))
            .field("source_timeouts", &self.source_timeouts)
            .finish()
    }
}

impl Default for Config {
    /// Local sources only, default endpoints.
    fn default() -> Self {
        Self {
            port: 3000,
            default_region: "IN".to_string(),
            abstractapi_key: None,
            abstractapi_base_url: ABSTRACTAPI_BASE_URL.to_string(),
            neutrino: None,
            neutrino_base_url: NEUTRINO_BASE_URL.to_string(),
            telnyx_api_key: None,
            telnyx_base_url: TELNYX_BASE_URL.to_string(),
            numverify_key: None,
            numverify_base_url: NUMVERIFY_BASE_URL.to_string(),
            veriphone_key: None,
            veriphone_base_url: VERIPHONE_BASE_URL.to_string(),
            findandtrace_enabled: false,
            findandtrace_base_url: FINDANDTRACE_BASE_URL.to_string(),
            whois_api_key: None,
            whois_base_url: WHOIS_BASE_URL.to_string(),
            source_timeouts: BTreeMap::new(),
        }
    }
}

/// Optional secret: unset is `None`, set-but-blank is an error.
fn optional_key(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
) -> anyhow::Result<Option<String>> {
    match lookup(name) {
        None => Ok(None),
        Some(key) if key.trim().is_empty() => anyhow::bail!("{} cannot be empty", name),
        Some(key) => Ok(Some(key.trim().to_string())),
    }
}

fn base_url(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    default: &str,
) -> anyhow::Result<String> {
    let url = lookup(name)
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| default.to_string());
    if !url.starts_with("http://") && !url.starts_with("https://") {
        anyhow::bail!("{} must start with http:// or https://", name);
    }
    Ok(url)
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from any variable source.
    ///
    /// # Arguments
    ///
    /// * `lookup` - Returns the raw value of a variable, `None` when unset.
    ///
    /// # Returns
    ///
    /// * `Ok(Config)` - Validated configuration.
    /// * `Err` - Blank keys, non-http URLs, bad port or non-positive timeouts.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let port = lookup("PORT")
            .unwrap_or_else(|| "3000".to_string())
            .parse()
            .map_err(|_| anyhow::anyhow!("PORT must be a valid number between 1-65535"))?;

        let default_region = lookup("DEFAULT_REGION")
            .unwrap_or_else(|| "IN".to_string())
            .trim()
            .to_ascii_uppercase();
        if crate::phone::parse_region(&default_region).is_err() {
            anyhow::bail!("DEFAULT_REGION '{}' is not a known region code", default_region);
        }

        let neutrino = match (
            optional_key(&lookup, "NEUTRINO_USER_ID")?,
            optional_key(&lookup, "NEUTRINO_API_KEY")?,
        ) {
            (Some(user_id), Some(api_key)) => Some(NeutrinoCredentials { user_id, api_key }),
            (None, None) => None,
            _ => anyhow::bail!("NEUTRINO_USER_ID and NEUTRINO_API_KEY must be set together"),
        };

        let findandtrace_enabled = match lookup("FINDANDTRACE_ENABLED") {
            None => false,
            Some(flag) => match flag.trim().to_ascii_lowercase().as_str() {
                "1" | "true" | "yes" | "on" => true,
                "0" | "false" | "no" | "off" | "" => false,
                other => anyhow::bail!("FINDANDTRACE_ENABLED must be true or false, got '{}'", other),
            },
        };

        let mut source_timeouts = BTreeMap::new();
        for source in DataSource::ALL {
            let name = format!("SOURCE_TIMEOUT_{}", source.as_str().to_ascii_uppercase());
            if let Some(raw) = lookup(&name) {
                let secs: f64 = raw
                    .trim()
                    .parse()
                    .map_err(|_| anyhow::anyhow!("{} must be a number of seconds", name))?;
                if !secs.is_finite() || secs <= 0.0 {
                    anyhow::bail!("{} must be greater than zero", name);
                }
                let timeout = Duration::try_from_secs_f64(secs)
                    .map_err(|e| anyhow::anyhow!("{} is out of range: {}", name, e))?;
                source_timeouts.insert(source, timeout);
            }
        }

        let config = Self {
            port,
            default_region,
            abstractapi_key: optional_key(&lookup, "ABSTRACTAPI_KEY")?,
            abstractapi_base_url: base_url(&lookup, "ABSTRACTAPI_BASE_URL", ABSTRACTAPI_BASE_URL)?,
            neutrino,
            neutrino_base_url: base_url(&lookup, "NEUTRINO_BASE_URL", NEUTRINO_BASE_URL)?,
            telnyx_api_key: optional_key(&lookup, "TELNYX_API_KEY")?,
            telnyx_base_url: base_url(&lookup, "TELNYX_BASE_URL", TELNYX_BASE_URL)?,
            numverify_key: optional_key(&lookup, "NUMVERIFY_KEY")?,
            numverify_base_url: base_url(&lookup, "NUMVERIFY_BASE_URL", NUMVERIFY_BASE_URL)?,
            veriphone_key: optional_key(&lookup, "VERIPHONE_KEY")?,
            veriphone_base_url: base_url(&lookup, "VERIPHONE_BASE_URL", VERIPHONE_BASE_URL)?,
            findandtrace_enabled,
            findandtrace_base_url: base_url(
                &lookup,
                "FINDANDTRACE_BASE_URL",
                FINDANDTRACE_BASE_URL,
            )?,
            whois_api_key: optional_key(&lookup, "WHOIS_API_KEY")?,
            whois_base_url: base_url(&lookup, "WHOIS_BASE_URL", WHOIS_BASE_URL)?,
            source_timeouts,
        };

        // Log successful configuration load (without sensitive values)
        tracing::info!("Configuration loaded successfully");
        tracing::debug!("Default region: {}", config.default_region);
        tracing::debug!("Server Port: {}", config.port);
        tracing::debug!("Timeout overrides: {:?}", config.source_timeouts);

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(vars: &[(&str, &str)]) -> anyhow::Result<Config> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(move |name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults_enable_only_local_sources() {
        let config = config_from(&[]).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_blank_key_is_rejected() {
        let err = config_from(&[("TELNYX_API_KEY", "  ")]).unwrap_err();
        assert!(err.to_string().contains("TELNYX_API_KEY"));
    }

    #[test]
    fn test_neutrino_requires_both_parts() {
        assert!(config_from(&[("NEUTRINO_USER_ID", "me")]).is_err());
        let config = config_from(&[("NEUTRINO_USER_ID", "me"), ("NEUTRINO_API_KEY", "k")]).unwrap();
        assert_eq!(config.neutrino.unwrap().user_id, "me");
    }

    #[test]
    fn test_timeout_overrides() {
        let config = config_from(&[("SOURCE_TIMEOUT_WHOIS", "2.5")]).unwrap();
        assert_eq!(
            config.source_timeouts.get(&DataSource::Whois),
            Some(&Duration::from_millis(2500))
        );
        assert!(config_from(&[("SOURCE_TIMEOUT_TELNYX", "0")]).is_err());
        assert!(config_from(&[("SOURCE_TIMEOUT_TELNYX", "soon")]).is_err());
    }

    #[test]
    fn test_oversized_timeout_is_an_error() {
        let err = config_from(&[("SOURCE_TIMEOUT_WHOIS", "1e30")]).unwrap_err();
        assert!(err.to_string().contains("SOURCE_TIMEOUT_WHOIS"));
    }

    #[test]
    fn test_base_url_must_be_http() {
        assert!(config_from(&[("NUMVERIFY_BASE_URL", "ftp://example.com")]).is_err());
    }

    #[test]
    fn test_debug_redacts_keys() {
        let config = config_from(&[("ABSTRACTAPI_KEY", "super-secret")]).unwrap();
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("[REDACTED]"));
    }

    #[test]
    fn test_invalid_region_and_port() {
        assert!(config_from(&[("DEFAULT_REGION", "XX1")]).is_err());
        assert!(config_from(&[("PORT", "99999")]).is_err());
    }
}
