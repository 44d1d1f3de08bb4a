//! findandtrace.com lookup for Indian mobile numbers.
//!
//! The site renders its answer as an HTML table; rows are scraped with a regex
//! and anything the page leaves out is filled from the public number-series
//! allocation tables.

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use serde_json::json;
use std::collections::BTreeMap;
use std::sync::OnceLock;
use std::time::Duration;

use super::{put, SourceAdapter, SourceReport};
use crate::circuit_breaker::{call_guarded, create_source_circuit_breaker, SourceCircuitBreaker};
use crate::errors::AdapterError;
use crate::models::{DataSource, FieldMap};
use crate::phone::NumberFormatter;

pub const FINDANDTRACE_BASE_URL: &str = "https://www.findandtrace.com";

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 \
                          (KHTML, like Gecko) Chrome/120.0 Safari/537.36";

fn row_pattern() -> Result<&'static Regex, AdapterError> {
    static ROW: OnceLock<Result<Regex, regex::Error>> = OnceLock::new();
    ROW.get_or_init(|| {
        Regex::new(r"(?is)<t[hd][^>]*>\s*([A-Za-z /]+?)\s*:?\s*</t[hd]>\s*<td[^>]*>\s*(?:<[^>]+>\s*)*([^<]+?)\s*<")
    })
    .as_ref()
    .map_err(|e| AdapterError::Decode(format!("row pattern: {}", e)))
}

/// Label/value pairs from every two-cell table row in the page.
pub fn scrape_rows(html: &str) -> Result<BTreeMap<String, String>, AdapterError> {
    let rows = row_pattern()?
        .captures_iter(html)
        .filter_map(|caps| {
            let label = caps.get(1)?.as_str().trim().to_lowercase();
            let value = caps.get(2)?.as_str().trim().to_string();
            (!value.is_empty()).then_some((label, value))
        })
        .collect();
    Ok(rows)
}

/// Operator by the leading digits of the national number.
fn series_operator(digits: &str) -> Option<&'static str> {
    let operator = match digits.get(..2)? {
        "60" | "61" | "62" | "63" | "64" | "65" | "66" | "67" | "68" | "69" | "70" | "81" => {
            "Jio (Reliance Jio)"
        }
        "72" | "80" | "88" | "93" | "99" => "Airtel",
        "73" | "84" | "90" => "Vi (Vodafone Idea)",
        "74" | "94" => "BSNL",
        _ => return None,
    };
    Some(operator)
}

/// `(circle, state)` for the well-known four-digit series.
fn series_circle(digits: &str) -> Option<(&'static str, &'static str)> {
    let circle = match digits.get(..4)? {
        "9810" | "9811" | "9999" => ("Delhi", "Delhi"),
        "9820" | "9821" | "9822" => ("Mumbai", "Maharashtra"),
        "9830" | "9831" | "9832" => ("Kolkata", "West Bengal"),
        "9840" | "9841" | "9842" => ("Tamil Nadu", "Tamil Nadu"),
        "9880" | "9881" | "9900" => ("Karnataka", "Karnataka"),
        _ => return None,
    };
    Some(circle)
}

/// Merge scraped rows with series fallbacks into canonical fields.
pub fn normalize_findandtrace(digits: &str, rows: &BTreeMap<String, String>) -> SourceReport {
    let lookup = |labels: &[&str]| {
        labels
            .iter()
            .find_map(|label| rows.get(*label))
            .cloned()
    };
    let operator = lookup(&["mobile operator", "operator", "service provider"])
        .or_else(|| series_operator(digits).map(str::to_string));
    let fallback = series_circle(digits);
    let circle = lookup(&["telecom circle", "circle"])
        .or_else(|| fallback.map(|(c, _)| c.to_string()));
    let state = lookup(&["state", "region"]).or_else(|| fallback.map(|(_, s)| s.to_string()));

    let mut data = FieldMap::new();
    data.insert("country".into(), json!("India"));
    data.insert("country_code".into(), json!("+91"));
    data.insert("line_type".into(), json!("mobile"));
    data.insert(
        "number_series".into(),
        json!(format!("{}XXXXXX", &digits[..digits.len().min(4)])),
    );
    put(&mut data, "location", lookup(&["location", "city"]).or_else(|| {
        state.as_ref().map(|s| format!("{}, India", s))
    }));
    put(&mut data, "state", state);
    put(&mut data, "telecom_circle", circle.clone());
    put(&mut data, "circle", circle.clone());
    put(&mut data, "carrier", operator.clone());

    let mut confidence: f64 = 70.0;
    if operator.is_some() {
        confidence += 10.0;
    }
    if circle.is_some() {
        confidence += 10.0;
    }
    put(&mut data, "operator", operator);
    SourceReport::new(data, confidence.min(85.0))
}

pub struct FindAndTraceSource {
    client: Client,
    base_url: String,
    breaker: SourceCircuitBreaker,
    formatter: NumberFormatter,
}

impl FindAndTraceSource {
    pub fn new(base_url: &str, formatter: NumberFormatter) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            breaker: create_source_circuit_breaker(),
            formatter,
        }
    }

    async fn fetch_page(&self, digits: &str, timeout: Duration) -> Result<String, AdapterError> {
        let request = self
            .client
            .get(format!("{}/trace-mobile-number-location", self.base_url))
            .header("User-Agent", USER_AGENT)
            .header("Accept", "text/html,application/xhtml+xml")
            .query(&[("mobilenumber", digits)])
            .timeout(timeout);

        call_guarded(&self.breaker, DataSource::FindAndTrace, async move {
            let response = request.send().await?;
            if !response.status().is_success() {
                let status = response.status();
                tracing::warn!("Find and Trace returned {}", status);
                return Err(AdapterError::Status {
                    status: status.as_u16(),
                    body: "Could not access Find and Trace".to_string(),
                });
            }
            Ok(response.text().await?)
        })
        .await
    }
}

#[async_trait]
impl SourceAdapter for FindAndTraceSource {
    fn source(&self) -> DataSource {
        DataSource::FindAndTrace
    }

    async fn query(
        &self,
        number: &str,
        region: &str,
        timeout: Duration,
    ) -> Result<SourceReport, AdapterError> {
        let parsed = self.formatter.parse(number, region)?;
        let digits = parsed.national_digits();
        let indian_mobile = parsed.country_code() == 91
            && digits.len() == 10
            && matches!(digits.as_bytes()[0], b'6'..=b'9');
        if !indian_mobile {
            return Err(AdapterError::NotApplicable(
                "Not an Indian mobile number".to_string(),
            ));
        }

        tracing::info!("Querying Find and Trace for {}", parsed.e164());
        let html = self.fetch_page(digits, timeout).await?;
        let rows = scrape_rows(&html)?;
        tracing::debug!("Find and Trace page yielded {} rows", rows.len());

        let report = normalize_findandtrace(digits, &rows);
        if !report.data.contains_key("operator") && !report.data.contains_key("circle") {
            return Err(AdapterError::NoData(format!(
                "no operator or circle known for {}",
                parsed.e164()
            )));
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGE: &str = r#"
        <table class="shop_table">
          <tr><th>Mobile Operator</th><td>Vodafone</td></tr>
          <tr><th>Telecom Circle :</th><td><b>Delhi</b></td></tr>
          <tr><td>State</td><td> Delhi NCR </td></tr>
        </table>"#;

    #[test]
    fn test_scrape_rows() {
        let rows = scrape_rows(PAGE).unwrap();
        assert_eq!(rows.get("mobile operator").map(String::as_str), Some("Vodafone"));
        assert_eq!(rows.get("telecom circle").map(String::as_str), Some("Delhi"));
        assert_eq!(rows.get("state").map(String::as_str), Some("Delhi NCR"));
    }

    #[test]
    fn test_normalize_prefers_scraped_values() {
        let rows = scrape_rows(PAGE).unwrap();
        let report = normalize_findandtrace("9876543210", &rows);
        assert_eq!(report.confidence, 85.0);
        assert_eq!(report.data["operator"], json!("Vodafone"));
        assert_eq!(report.data["location"], json!("Delhi NCR, India"));
    }

    #[test]
    fn test_normalize_falls_back_to_series_tables() {
        let report = normalize_findandtrace("9810012345", &BTreeMap::new());
        assert_eq!(report.data["circle"], json!("Delhi"));
        assert!(!report.data.contains_key("operator"));
        assert_eq!(report.confidence, 80.0);

        let report = normalize_findandtrace("9412345678", &BTreeMap::new());
        assert_eq!(report.data["operator"], json!("BSNL"));
    }

    #[tokio::test]
    async fn test_non_indian_number_not_applicable() {
        let source = FindAndTraceSource::new("http://127.0.0.1:9", NumberFormatter::new());
        let err = source
            .query("+14155552671", "US", Duration::from_millis(100))
            .await
            .unwrap_err();
        assert!(matches!(err, AdapterError::NotApplicable(_)));
    }
}
