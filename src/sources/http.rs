//! JSON phone-validation providers.

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde_json::Value;
use std::time::Duration;

use super::{bool_field, put, str_field, SourceAdapter, SourceReport};
use crate::circuit_breaker::{call_guarded, create_source_circuit_breaker, SourceCircuitBreaker};
use crate::errors::AdapterError;
use crate::models::{DataSource, FieldMap};
use crate::phone::NumberFormatter;

pub const ABSTRACTAPI_BASE_URL: &str = "https://phonevalidation.abstractapi.com";
pub const NEUTRINO_BASE_URL: &str = "https://neutrinoapi.net";
pub const TELNYX_BASE_URL: &str = "https://api.telnyx.com";
pub const NUMVERIFY_BASE_URL: &str = "http://apilayer.net";
pub const VERIPHONE_BASE_URL: &str = "https://api.veriphone.io";

// ============ Shared Client ============

/// Transport shared by the JSON providers: client, base URL and breaker.
struct ProviderClient {
    source: DataSource,
    client: Client,
    base_url: String,
    breaker: SourceCircuitBreaker,
}

impl ProviderClient {
    fn new(source: DataSource, base_url: &str) -> Self {
        Self {
            source,
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            breaker: create_source_circuit_breaker(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Send through the breaker and decode a JSON body.
    async fn send_json(&self, request: RequestBuilder, timeout: Duration) -> Result<Value, AdapterError> {
        let source = self.source;
        call_guarded(&self.breaker, source, async move {
            let response = request.timeout(timeout).send().await?;

            if !response.status().is_success() {
                let status = response.status();
                let error_text = response
                    .text()
                    .await
                    .unwrap_or_else(|_| "Unknown error".to_string());
                tracing::error!("{} returned error {}: {}", source, status, error_text);
                return Err(AdapterError::Status {
                    status: status.as_u16(),
                    body: error_text,
                });
            }

            let body: Value = response
                .json()
                .await
                .map_err(|e| AdapterError::Decode(format!("{} response: {}", source, e)))?;
            Ok(body)
        })
        .await
    }
}

fn e164(formatter: &NumberFormatter, number: &str, region: &str) -> Result<String, AdapterError> {
    Ok(formatter.parse(number, region)?.e164().to_string())
}

/// Fails when a provider answers 200 with an embedded error object.
fn check_embedded_error(source: DataSource, body: &Value) -> Result<(), AdapterError> {
    if body.get("success").and_then(|v| v.as_bool()) == Some(false) {
        let info = body
            .get("error")
            .and_then(|e| e.get("info").or_else(|| e.get("message")))
            .and_then(|v| v.as_str())
            .unwrap_or("request rejected");
        tracing::warn!("{} rejected the request: {}", source, info);
        return Err(AdapterError::Unavailable(info.to_string()));
    }
    Ok(())
}

// ============ AbstractAPI ============

pub struct AbstractApiSource {
    http: ProviderClient,
    api_key: String,
    formatter: NumberFormatter,
}

impl AbstractApiSource {
    pub fn new(base_url: &str, api_key: &str, formatter: NumberFormatter) -> Self {
        Self {
            http: ProviderClient::new(DataSource::AbstractApi, base_url),
            api_key: api_key.to_string(),
            formatter,
        }
    }
}

/// Maps an AbstractAPI payload onto canonical fields and scores it.
pub fn normalize_abstractapi(body: &Value) -> SourceReport {
    let mut data = FieldMap::new();
    let valid = bool_field(body, "valid").unwrap_or(false);
    let carrier = str_field(body, "carrier");
    let country = body.get("country").unwrap_or(&Value::Null);

    data.insert("is_valid".into(), Value::Bool(valid));
    put(&mut data, "country", str_field(country, "name"));
    put(&mut data, "region_code", str_field(country, "code"));
    put(&mut data, "country_code", str_field(country, "prefix"));
    put(&mut data, "location", str_field(body, "location"));
    put(&mut data, "line_type", str_field(body, "type").map(|t| t.to_lowercase()));
    put(
        &mut data,
        "international_format",
        body.get("format").and_then(|f| str_field(f, "international")),
    );
    put(&mut data, "operator", carrier.clone());

    let mut confidence: f64 = if valid { 85.0 } else { 40.0 };
    if carrier.is_some() {
        confidence += 10.0;
    }
    put(&mut data, "carrier", carrier);
    SourceReport::new(data, confidence.min(95.0))
}

#[async_trait]
impl SourceAdapter for AbstractApiSource {
    fn source(&self) -> DataSource {
        DataSource::AbstractApi
    }

    async fn query(
        &self,
        number: &str,
        region: &str,
        timeout: Duration,
    ) -> Result<SourceReport, AdapterError> {
        let phone = e164(&self.formatter, number, region)?;
        tracing::info!("Querying AbstractAPI for {}", phone);

        let request = self.http.client.get(self.http.url("/v1/")).query(&[
            ("api_key", self.api_key.as_str()),
            ("phone", phone.trim_start_matches('+')),
        ]);
        let body = self.http.send_json(request, timeout).await?;
        check_embedded_error(self.source(), &body)?;
        Ok(normalize_abstractapi(&body))
    }
}

// ============ Neutrino ============

pub struct NeutrinoSource {
    http: ProviderClient,
    user_id: String,
    api_key: String,
    formatter: NumberFormatter,
}

impl NeutrinoSource {
    pub fn new(base_url: &str, user_id: &str, api_key: &str, formatter: NumberFormatter) -> Self {
        Self {
            http: ProviderClient::new(DataSource::Neutrino, base_url),
            user_id: user_id.to_string(),
            api_key: api_key.to_string(),
            formatter,
        }
    }
}

pub fn normalize_neutrino(body: &Value) -> SourceReport {
    let mut data = FieldMap::new();
    let valid = bool_field(body, "valid").unwrap_or(false);
    let network = str_field(body, "prefix-network");

    data.insert("is_valid".into(), Value::Bool(valid));
    put(&mut data, "country", str_field(body, "country"));
    put(&mut data, "region_code", str_field(body, "country-code"));
    put(
        &mut data,
        "country_code",
        str_field(body, "international-calling-code").map(|c| format!("+{}", c)),
    );
    put(&mut data, "location", str_field(body, "location"));
    put(&mut data, "line_type", str_field(body, "type"));
    put(&mut data, "international_format", str_field(body, "international-number"));
    put(&mut data, "is_mobile", bool_field(body, "is-mobile"));
    put(&mut data, "operator", network.clone());

    let mut confidence: f64 = if valid { 80.0 } else { 30.0 };
    if network.is_some() {
        confidence += 10.0;
    }
    put(&mut data, "carrier", network);
    SourceReport::new(data, confidence.min(90.0))
}

#[async_trait]
impl SourceAdapter for NeutrinoSource {
    fn source(&self) -> DataSource {
        DataSource::Neutrino
    }

    async fn query(
        &self,
        number: &str,
        region: &str,
        timeout: Duration,
    ) -> Result<SourceReport, AdapterError> {
        let phone = e164(&self.formatter, number, region)?;
        tracing::info!("Querying Neutrino for {}", phone);

        let request = self.http.client.post(self.http.url("/phone-validate")).form(&[
            ("user-id", self.user_id.as_str()),
            ("api-key", self.api_key.as_str()),
            ("number", phone.as_str()),
            ("country-code", region),
        ]);
        let body = self.http.send_json(request, timeout).await?;
        Ok(normalize_neutrino(&body))
    }
}

// ============ Telnyx ============

pub struct TelnyxSource {
    http: ProviderClient,
    api_key: String,
    formatter: NumberFormatter,
}

impl TelnyxSource {
    pub fn new(base_url: &str, api_key: &str, formatter: NumberFormatter) -> Self {
        Self {
            http: ProviderClient::new(DataSource::Telnyx, base_url),
            api_key: api_key.to_string(),
            formatter,
        }
    }
}

pub fn normalize_telnyx(body: &Value) -> SourceReport {
    let mut data = FieldMap::new();
    let Some(record) = body.get("data").filter(|d| d.is_object()) else {
        return SourceReport::new(data, 40.0);
    };
    let carrier = record.get("carrier").unwrap_or(&Value::Null);
    let portability = record.get("portability").unwrap_or(&Value::Null);

    data.insert(
        "is_valid".into(),
        Value::Bool(bool_field(record, "valid_number").unwrap_or(true)),
    );
    put(&mut data, "region_code", str_field(record, "country_code"));
    put(&mut data, "international_format", str_field(record, "phone_number"));
    put(&mut data, "national_format", str_field(record, "national_format"));
    put(&mut data, "carrier", str_field(carrier, "name"));
    put(
        &mut data,
        "line_type",
        str_field(carrier, "type").or_else(|| str_field(portability, "line_type")),
    );
    put(&mut data, "ported_status", str_field(portability, "ported_status"));
    put(&mut data, "city", str_field(portability, "city"));
    put(&mut data, "state", str_field(portability, "state"));

    SourceReport::new(data, 85.0)
}

#[async_trait]
impl SourceAdapter for TelnyxSource {
    fn source(&self) -> DataSource {
        DataSource::Telnyx
    }

    async fn query(
        &self,
        number: &str,
        region: &str,
        timeout: Duration,
    ) -> Result<SourceReport, AdapterError> {
        let phone = e164(&self.formatter, number, region)?;
        tracing::info!("Querying Telnyx for {}", phone);

        let request = self
            .http
            .client
            .get(self.http.url(&format!("/v2/number_lookup/{}", phone)))
            .bearer_auth(&self.api_key)
            .query(&[("type", "carrier")]);
        let body = self.http.send_json(request, timeout).await?;
        Ok(normalize_telnyx(&body))
    }
}

// ============ Numverify ============

pub struct NumverifySource {
    http: ProviderClient,
    access_key: String,
    formatter: NumberFormatter,
}

impl NumverifySource {
    pub fn new(base_url: &str, access_key: &str, formatter: NumberFormatter) -> Self {
        Self {
            http: ProviderClient::new(DataSource::Numverify, base_url),
            access_key: access_key.to_string(),
            formatter,
        }
    }
}

pub fn normalize_numverify(body: &Value) -> SourceReport {
    let mut data = FieldMap::new();
    let valid = bool_field(body, "valid").unwrap_or(false);

    data.insert("is_valid".into(), Value::Bool(valid));
    put(&mut data, "country", str_field(body, "country_name"));
    put(&mut data, "region_code", str_field(body, "country_code"));
    put(&mut data, "country_code", str_field(body, "country_prefix"));
    put(&mut data, "location", str_field(body, "location"));
    put(&mut data, "carrier", str_field(body, "carrier"));
    put(&mut data, "line_type", str_field(body, "line_type"));
    put(&mut data, "international_format", str_field(body, "international_format"));
    put(&mut data, "national_format", str_field(body, "local_format"));

    SourceReport::new(data, if valid { 75.0 } else { 35.0 })
}

#[async_trait]
impl SourceAdapter for NumverifySource {
    fn source(&self) -> DataSource {
        DataSource::Numverify
    }

    async fn query(
        &self,
        number: &str,
        region: &str,
        timeout: Duration,
    ) -> Result<SourceReport, AdapterError> {
        let phone = e164(&self.formatter, number, region)?;
        tracing::info!("Querying Numverify for {}", phone);

        let request = self.http.client.get(self.http.url("/api/validate")).query(&[
            ("access_key", self.access_key.as_str()),
            ("number", phone.trim_start_matches('+')),
        ]);
        let body = self.http.send_json(request, timeout).await?;
        check_embedded_error(self.source(), &body)?;
        Ok(normalize_numverify(&body))
    }
}

// ============ Veriphone ============

pub struct VeriphoneSource {
    http: ProviderClient,
    api_key: String,
    formatter: NumberFormatter,
}

impl VeriphoneSource {
    pub fn new(base_url: &str, api_key: &str, formatter: NumberFormatter) -> Self {
        Self {
            http: ProviderClient::new(DataSource::Veriphone, base_url),
            api_key: api_key.to_string(),
            formatter,
        }
    }
}

pub fn normalize_veriphone(body: &Value) -> SourceReport {
    let mut data = FieldMap::new();
    let valid = bool_field(body, "phone_valid").unwrap_or(false);

    data.insert("is_valid".into(), Value::Bool(valid));
    put(&mut data, "country", str_field(body, "country"));
    put(&mut data, "region_code", str_field(body, "country_code"));
    put(
        &mut data,
        "country_code",
        str_field(body, "country_prefix").map(|p| format!("+{}", p.trim_start_matches('+'))),
    );
    put(&mut data, "location", str_field(body, "phone_region"));
    put(&mut data, "carrier", str_field(body, "carrier"));
    put(&mut data, "line_type", str_field(body, "phone_type"));
    put(&mut data, "international_format", str_field(body, "international_number"));
    put(&mut data, "national_format", str_field(body, "local_number"));

    SourceReport::new(data, if valid { 75.0 } else { 35.0 })
}

#[async_trait]
impl SourceAdapter for VeriphoneSource {
    fn source(&self) -> DataSource {
        DataSource::Veriphone
    }

    async fn query(
        &self,
        number: &str,
        region: &str,
        timeout: Duration,
    ) -> Result<SourceReport, AdapterError> {
        let phone = e164(&self.formatter, number, region)?;
        tracing::info!("Querying Veriphone for {}", phone);

        let request = self.http.client.get(self.http.url("/v2/verify")).query(&[
            ("phone", phone.as_str()),
            ("key", self.api_key.as_str()),
        ]);
        let body = self.http.send_json(request, timeout).await?;
        if body.get("status").and_then(|s| s.as_str()) == Some("error") {
            return Err(AdapterError::Unavailable(
                str_field(&body, "message").unwrap_or_else(|| "request rejected".to_string()),
            ));
        }
        Ok(normalize_veriphone(&body))
    }
}
