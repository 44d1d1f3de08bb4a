//! Reverse-WHOIS search for domains registered with the phone number.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::collections::BTreeMap;
use std::time::Duration;

use super::{SourceAdapter, SourceReport};
use crate::circuit_breaker::{call_guarded, create_source_circuit_breaker, SourceCircuitBreaker};
use crate::errors::AdapterError;
use crate::models::{DataSource, FieldMap};
use crate::phone::NumberFormatter;

pub const WHOIS_BASE_URL: &str = "https://reverse-whois.whoisxmlapi.com";

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReverseWhoisResponse {
    #[serde(default)]
    pub domains_count: Option<u64>,
    #[serde(default)]
    pub domains_list: Vec<String>,
}

/// Brand names registered under more than one TLD, with their domains.
pub fn business_connections(domains: &[String]) -> BTreeMap<String, Vec<String>> {
    let mut by_label: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for domain in domains {
        let domain = domain.trim().to_lowercase();
        if let Some(label) = domain.split('.').next().filter(|l| !l.is_empty()) {
            by_label.entry(label.to_string()).or_default().push(domain.clone());
        }
    }
    by_label.retain(|_, group| group.len() > 1);
    by_label
}

pub fn normalize_whois(response: &ReverseWhoisResponse) -> Result<SourceReport, AdapterError> {
    let domains: Vec<String> = response
        .domains_list
        .iter()
        .map(|d| d.trim().to_lowercase())
        .filter(|d| !d.is_empty())
        .collect();
    if domains.is_empty() {
        return Err(AdapterError::NoData("No domains found".to_string()));
    }
    let total = response.domains_count.unwrap_or(domains.len() as u64);
    let connections = business_connections(&domains);

    let mut data = FieldMap::new();
    data.insert("domains".into(), json!(domains));
    data.insert("domain_count".into(), json!(total));
    data.insert(
        "business_connections".into(),
        json!(connections
            .iter()
            .map(|(organization, domains)| json!({
                "organization": organization,
                "domains": domains,
            }))
            .collect::<Vec<_>>()),
    );

    let mut confidence = f64::min(50.0 + 5.0 * total as f64, 90.0);
    if !connections.is_empty() {
        confidence = f64::min(confidence + 5.0, 95.0);
    }
    Ok(SourceReport::new(data, confidence))
}

pub struct WhoisSource {
    client: Client,
    base_url: String,
    api_key: String,
    breaker: SourceCircuitBreaker,
    formatter: NumberFormatter,
}

impl WhoisSource {
    pub fn new(base_url: &str, api_key: &str, formatter: NumberFormatter) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            breaker: create_source_circuit_breaker(),
            formatter,
        }
    }
}

#[async_trait]
impl SourceAdapter for WhoisSource {
    fn source(&self) -> DataSource {
        DataSource::Whois
    }

    async fn query(
        &self,
        number: &str,
        region: &str,
        timeout: Duration,
    ) -> Result<SourceReport, AdapterError> {
        let parsed = self.formatter.parse(number, region)?;
        let search_terms = vec![
            parsed.e164().to_string(),
            parsed.e164().trim_start_matches('+').to_string(),
        ];
        tracing::info!("Querying reverse WHOIS for {}", parsed.e164());

        let request = self
            .client
            .post(format!("{}/api/v2", self.base_url))
            .timeout(timeout)
            .json(&json!({
                "apiKey": self.api_key,
                "searchType": "current",
                "mode": "purchase",
                "basicSearchTerms": { "include": search_terms },
            }));

        let response: ReverseWhoisResponse =
            call_guarded(&self.breaker, DataSource::Whois, async move {
                let response = request.send().await?;
                if !response.status().is_success() {
                    let status = response.status();
                    let error_text = response
                        .text()
                        .await
                        .unwrap_or_else(|_| "Unknown error".to_string());
                    tracing::error!("Reverse WHOIS returned error {}: {}", status, error_text);
                    return Err(AdapterError::Status {
                        status: status.as_u16(),
                        body: error_text,
                    });
                }
                response
                    .json()
                    .await
                    .map_err(|e| AdapterError::Decode(format!("reverse WHOIS response: {}", e)))
            })
            .await?;

        normalize_whois(&response)
    }
}
