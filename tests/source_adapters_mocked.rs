/// Integration tests with mocked provider APIs
/// Covers request shape, payload normalization and failure mapping for every network source
use phone_intel::aggregator::{AggregatorConfig, IntelligenceAggregator};
use phone_intel::config::Config;
use phone_intel::errors::AdapterError;
use phone_intel::models::DataSource;
use phone_intel::pattern_analysis::PatternAnalysisEngine;
use phone_intel::phone::NumberFormatter;
use phone_intel::sources::{
    default_adapters, AbstractApiSource, FindAndTraceSource, NeutrinoSource, NumverifySource,
    SourceAdapter, TelnyxSource, VeriphoneSource, WhoisSource,
};
use serde_json::json;
use std::time::Duration;
use wiremock::matchers::{body_string_contains, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const US_NUMBER: &str = "+14155552671";
const TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn test_abstractapi_successful_response() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/"))
        .and(query_param("api_key", "test_key"))
        .and(query_param("phone", "14155552671"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "phone": "14155552671",
            "valid": true,
            "format": {"international": "+1 415-555-2671", "local": "(415) 555-2671"},
            "country": {"code": "US", "name": "United States", "prefix": "+1"},
            "location": "California",
            "type": "Mobile",
            "carrier": "T-Mobile USA, Inc."
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let source = AbstractApiSource::new(&mock_server.uri(), "test_key", NumberFormatter::new());
    let report = source.query(US_NUMBER, "US", TIMEOUT).await.unwrap();

    assert_eq!(report.confidence, 95.0);
    assert_eq!(report.data["is_valid"], json!(true));
    assert_eq!(report.data["carrier"], json!("T-Mobile USA, Inc."));
    assert_eq!(report.data["country"], json!("United States"));
    assert_eq!(report.data["line_type"], json!("mobile"));
}

#[tokio::test]
async fn test_abstractapi_embedded_error_is_unavailable() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v1/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "success": false,
            "error": {"code": 101, "info": "You have not supplied a valid API Access Key."}
        })))
        .mount(&mock_server)
        .await;

    let source = AbstractApiSource::new(&mock_server.uri(), "bad", NumberFormatter::new());
    let err = source.query(US_NUMBER, "US", TIMEOUT).await.unwrap_err();
    assert!(matches!(err, AdapterError::Unavailable(ref info) if info.contains("API Access Key")));
}

#[tokio::test]
async fn test_neutrino_posts_form_credentials() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/phone-validate"))
        .and(body_string_contains("user-id=me"))
        .and(body_string_contains("api-key=secret"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "valid": true,
            "country": "United States",
            "country-code": "US",
            "international-calling-code": "1",
            "location": "San Francisco",
            "type": "mobile",
            "is-mobile": true,
            "prefix-network": "T-Mobile"
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let source = NeutrinoSource::new(&mock_server.uri(), "me", "secret", NumberFormatter::new());
    let report = source.query(US_NUMBER, "US", TIMEOUT).await.unwrap();

    assert_eq!(report.confidence, 90.0);
    assert_eq!(report.data["carrier"], json!("T-Mobile"));
    assert_eq!(report.data["country_code"], json!("+1"));
    assert_eq!(report.data["is_mobile"], json!(true));
}

#[tokio::test]
async fn test_telnyx_uses_bearer_auth() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v2/number_lookup/+14155552671"))
        .and(header("authorization", "Bearer telnyx_key"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {
                "phone_number": "+14155552671",
                "country_code": "US",
                "national_format": "(415) 555-2671",
                "carrier": {"name": "T-Mobile USA, Inc.", "type": "mobile"},
                "portability": {"ported_status": "Y", "city": "San Francisco", "state": "California"}
            }
        })))
        .expect(1)
        .mount(&mock_server)
        .await;

    let source = TelnyxSource::new(&mock_server.uri(), "telnyx_key", NumberFormatter::new());
    let report = source.query(US_NUMBER, "US", TIMEOUT).await.unwrap();

    assert_eq!(report.confidence, 85.0);
    assert_eq!(report.data["carrier"], json!("T-Mobile USA, Inc."));
    assert_eq!(report.data["ported_status"], json!("Y"));
    assert_eq!(report.data["state"], json!("California"));
}

#[tokio::test]
async fn test_telnyx_unauthorized_maps_to_status() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(401).set_body_string("Authentication failed"))
        .mount(&mock_server)
        .await;

    let source = TelnyxSource::new(&mock_server.uri(), "wrong", NumberFormatter::new());
    let err = source.query(US_NUMBER, "US", TIMEOUT).await.unwrap_err();
    assert!(matches!(
        err,
        AdapterError::Status { status: 401, ref body } if body == "Authentication failed"
    ));
}

#[tokio::test]
async fn test_numverify_and_veriphone_normalize() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/validate"))
        .and(query_param("access_key", "nv"))
        .and(query_param("number", "14155552671"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "valid": true,
            "country_name": "United States of America",
            "country_code": "US",
            "country_prefix": "+1",
            "location": "Novato",
            "carrier": "AT&T Mobility LLC",
            "line_type": "mobile"
        })))
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path("/v2/verify"))
        .and(query_param("phone", "+14155552671"))
        .and(query_param("key", "vp"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "status": "success",
            "phone_valid": false,
            "country_prefix": "1"
        })))
        .mount(&mock_server)
        .await;

    let numverify = NumverifySource::new(&mock_server.uri(), "nv", NumberFormatter::new());
    let report = numverify.query(US_NUMBER, "US", TIMEOUT).await.unwrap();
    assert_eq!(report.confidence, 75.0);
    assert_eq!(report.data["carrier"], json!("AT&T Mobility LLC"));

    let veriphone = VeriphoneSource::new(&mock_server.uri(), "vp", NumberFormatter::new());
    let report = veriphone.query(US_NUMBER, "US", TIMEOUT).await.unwrap();
    assert_eq!(report.confidence, 35.0);
    assert_eq!(report.data["is_valid"], json!(false));
    assert_eq!(report.data["country_code"], json!("+1"));
}

#[tokio::test]
async fn test_malformed_json_is_decode_error() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/api/validate"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>maintenance</html>"))
        .mount(&mock_server)
        .await;

    let source = NumverifySource::new(&mock_server.uri(), "nv", NumberFormatter::new());
    let err = source.query(US_NUMBER, "US", TIMEOUT).await.unwrap_err();
    assert!(matches!(err, AdapterError::Decode(_)));
}

#[tokio::test]
async fn test_circuit_opens_after_consecutive_failures() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(503))
        .expect(5)
        .mount(&mock_server)
        .await;

    let source = NumverifySource::new(&mock_server.uri(), "nv", NumberFormatter::new());
    for _ in 0..5 {
        let err = source.query(US_NUMBER, "US", TIMEOUT).await.unwrap_err();
        assert!(matches!(err, AdapterError::Status { status: 503, .. }));
    }
    let err = source.query(US_NUMBER, "US", TIMEOUT).await.unwrap_err();
    assert!(matches!(err, AdapterError::CircuitOpen));
}

#[tokio::test]
async fn test_findandtrace_scrapes_html() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/trace-mobile-number-location"))
        .and(query_param("mobilenumber", "9876543210"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            r#"<html><body><table>
                <tr><th>Mobile Operator</th><td>Vodafone</td></tr>
                <tr><th>Telecom Circle</th><td>Maharashtra</td></tr>
                <tr><th>State</th><td>Maharashtra</td></tr>
            </table></body></html>"#,
        ))
        .expect(1)
        .mount(&mock_server)
        .await;

    let source = FindAndTraceSource::new(&mock_server.uri(), NumberFormatter::new());
    let report = source.query("9876543210", "IN", TIMEOUT).await.unwrap();

    assert_eq!(report.confidence, 85.0);
    assert_eq!(report.data["operator"], json!("Vodafone"));
    assert_eq!(report.data["circle"], json!("Maharashtra"));
    assert_eq!(report.data["location"], json!("Maharashtra, India"));
}

#[tokio::test]
async fn test_whois_reports_domains() {
    let mock_server = MockServer::start().await;

    Mock::given(method("POST"))
        .and(path("/api/v2"))
        .and(body_string_contains("\"apiKey\":\"wk\""))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "domainsCount": 3,
            "domainsList": ["acme.com", "acme.in", "other.org"]
        })))
        .mount(&mock_server)
        .await;

    let source = WhoisSource::new(&mock_server.uri(), "wk", NumberFormatter::new());
    let report = source.query(US_NUMBER, "US", TIMEOUT).await.unwrap();

    assert_eq!(report.confidence, 70.0);
    assert_eq!(report.data["domain_count"], json!(3));
    assert_eq!(
        report.data["business_connections"][0]["organization"],
        json!("acme")
    );
}

#[tokio::test]
async fn test_configured_sources_merge_with_local_ones() {
    let mock_server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/v2/number_lookup/+14155552671"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "data": {"carrier": {"name": "T-Mobile USA, Inc.", "type": "mobile"}}
        })))
        .mount(&mock_server)
        .await;

    let config = Config {
        telnyx_api_key: Some("telnyx_key".to_string()),
        telnyx_base_url: mock_server.uri(),
        ..Config::default()
    };
    let engine = PatternAnalysisEngine::default();
    let formatter = engine.formatter().clone();
    let adapters = default_adapters(&config, &formatter, &engine);
    let aggregator =
        IntelligenceAggregator::new(AggregatorConfig::from_config(&config).unwrap(), adapters)
            .unwrap();

    assert!(aggregator.registered_sources().contains(&DataSource::Telnyx));
    let intel = aggregator
        .aggregate_intelligence(US_NUMBER, "US", None)
        .await
        .unwrap();

    assert_eq!(intel.successful_sources, 3);
    let carrier = &intel.merged_data["carrier"];
    assert_eq!(carrier.source, DataSource::Telnyx);
    assert_eq!(carrier.value, json!("T-Mobile USA, Inc."));
    assert!(intel.sources_used.contains(&"telnyx".to_string()));
}
