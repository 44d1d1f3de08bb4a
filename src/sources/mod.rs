//! Intelligence source adapters.
//!
//! Every provider, local or remote, implements [`SourceAdapter`]. The
//! aggregator never knows which provider it is talking to beyond its
//! [`DataSource`] tag.

pub mod findandtrace;
pub mod http;
pub mod local;
pub mod whois;

use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::errors::AdapterError;
use crate::models::{DataSource, FieldMap};
use crate::pattern_analysis::PatternAnalysisEngine;
use crate::phone::NumberFormatter;

pub use findandtrace::FindAndTraceSource;
pub use http::{AbstractApiSource, NeutrinoSource, NumverifySource, TelnyxSource, VeriphoneSource};
pub use local::{LibPhoneNumberSource, PatternAnalysisSource};
pub use whois::WhoisSource;

/// Normalized payload returned by an adapter.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceReport {
    pub data: FieldMap,
    /// Self-reported confidence, expected in `[0, 100]`. The aggregator turns
    /// anything else into a failed result.
    pub confidence: f64,
}

impl SourceReport {
    pub fn new(data: FieldMap, confidence: f64) -> Self {
        Self { data, confidence }
    }
}

/// One intelligence provider.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn source(&self) -> DataSource;

    /// Look up one number.
    ///
    /// # Arguments
    ///
    /// * `number` - Raw phone number as supplied by the caller.
    /// * `region` - ISO alpha-2 region for numbers without a `+` prefix.
    /// * `timeout` - Budget for the call; the aggregator enforces it too.
    ///
    /// Implementations must not block the async worker. CPU-bound or
    /// blocking work belongs on [`tokio::task::spawn_blocking`].
    async fn query(
        &self,
        number: &str,
        region: &str,
        timeout: Duration,
    ) -> Result<SourceReport, AdapterError>;
}

/// Builds every adapter whose credentials are present in `config`.
///
/// Local sources are always included.
pub fn default_adapters(
    config: &Config,
    formatter: &NumberFormatter,
    engine: &PatternAnalysisEngine,
) -> Vec<Arc<dyn SourceAdapter>> {
    let mut adapters: Vec<Arc<dyn SourceAdapter>> = vec![
        Arc::new(LibPhoneNumberSource::new(formatter.clone())),
        Arc::new(PatternAnalysisSource::new(engine.clone())),
    ];

    if let Some(key) = &config.abstractapi_key {
        adapters.push(Arc::new(AbstractApiSource::new(
            &config.abstractapi_base_url,
            key,
            formatter.clone(),
        )));
    }
    if let Some(creds) = &config.neutrino {
        adapters.push(Arc::new(NeutrinoSource::new(
            &config.neutrino_base_url,
            &creds.user_id,
            &creds.api_key,
            formatter.clone(),
        )));
    }
    if let Some(key) = &config.telnyx_api_key {
        adapters.push(Arc::new(TelnyxSource::new(
            &config.telnyx_base_url,
            key,
            formatter.clone(),
        )));
    }
    if let Some(key) = &config.numverify_key {
        adapters.push(Arc::new(NumverifySource::new(
            &config.numverify_base_url,
            key,
            formatter.clone(),
        )));
    }
    if let Some(key) = &config.veriphone_key {
        adapters.push(Arc::new(VeriphoneSource::new(
            &config.veriphone_base_url,
            key,
            formatter.clone(),
        )));
    }
    if config.findandtrace_enabled {
        adapters.push(Arc::new(FindAndTraceSource::new(
            &config.findandtrace_base_url,
            formatter.clone(),
        )));
    }
    if let Some(key) = &config.whois_api_key {
        adapters.push(Arc::new(WhoisSource::new(
            &config.whois_base_url,
            key,
            formatter.clone(),
        )));
    }

    let names: Vec<&str> = adapters.iter().map(|a| a.source().as_str()).collect();
    tracing::info!("✓ Enabled intelligence sources: {}", names.join(", "));
    adapters
}

// ============ Payload Helpers ============

/// Non-empty string at `key`, ignoring provider placeholders like `"Unknown"`.
pub(crate) fn str_field(data: &Value, key: &str) -> Option<String> {
    data.get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty() && !s.eq_ignore_ascii_case("unknown"))
        .map(str::to_string)
}

pub(crate) fn bool_field(data: &Value, key: &str) -> Option<bool> {
    data.get(key).and_then(|v| v.as_bool())
}

/// Insert `value` under `key` when present.
pub(crate) fn put<T: Into<Value>>(fields: &mut FieldMap, key: &str, value: Option<T>) {
    if let Some(value) = value {
        fields.insert(key.to_string(), value.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_str_field_skips_placeholders() {
        let data = json!({"carrier": "Unknown", "country": " India ", "empty": "", "n": 3});
        assert_eq!(str_field(&data, "carrier"), None);
        assert_eq!(str_field(&data, "country"), Some("India".to_string()));
        assert_eq!(str_field(&data, "empty"), None);
        assert_eq!(str_field(&data, "n"), None);
        assert_eq!(str_field(&data, "missing"), None);
    }

    #[test]
    fn test_put_only_inserts_present_values() {
        let mut fields = FieldMap::new();
        put(&mut fields, "a", Some("x"));
        put::<bool>(&mut fields, "b", None);
        assert_eq!(fields.len(), 1);
        assert_eq!(fields["a"], json!("x"));
    }
}
