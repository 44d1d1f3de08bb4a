use async_trait::async_trait;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{spawn_blocking, JoinError};

use super::{put, SourceAdapter, SourceReport};
use crate::errors::AdapterError;
use crate::models::{DataSource, FieldMap};
use crate::pattern_analysis::PatternAnalysisEngine;
use crate::phone::NumberFormatter;

/// Re-raise a panic from blocking work; anything else means the runtime is going away.
fn blocking_failed(err: JoinError) -> AdapterError {
    match err.try_into_panic() {
        Ok(payload) => std::panic::resume_unwind(payload),
        Err(err) => AdapterError::Unavailable(format!("analysis task cancelled: {}", err)),
    }
}

// ============ Local Parser ============

/// Offline parse through the numbering-plan metadata.
pub struct LibPhoneNumberSource {
    formatter: NumberFormatter,
}

impl LibPhoneNumberSource {
    pub fn new(formatter: NumberFormatter) -> Self {
        Self { formatter }
    }
}

#[async_trait]
impl SourceAdapter for LibPhoneNumberSource {
    fn source(&self) -> DataSource {
        DataSource::LibPhoneNumber
    }

    async fn query(
        &self,
        number: &str,
        region: &str,
        _timeout: Duration,
    ) -> Result<SourceReport, AdapterError> {
        let formatter = self.formatter.clone();
        let (number, region) = (number.to_string(), region.to_string());
        spawn_blocking(move || libphonenumber_report(&formatter, &number, &region))
            .await
            .map_err(blocking_failed)?
    }
}

fn libphonenumber_report(
    formatter: &NumberFormatter,
    number: &str,
    region: &str,
) -> Result<SourceReport, AdapterError> {
    let parsed = formatter.parse(number, region)?;

    let mut data = FieldMap::new();
    data.insert("is_valid".into(), json!(parsed.is_valid()));
    data.insert("is_possible".into(), json!(parsed.is_possible()));
    data.insert("country".into(), json!(parsed.country_name()));
    data.insert("region_code".into(), json!(parsed.region_code()));
    data.insert("country_code".into(), json!(format!("+{}", parsed.country_code())));
    data.insert("line_type".into(), json!(parsed.number_type()));
    data.insert("e164_format".into(), json!(parsed.e164()));
    data.insert("international_format".into(), json!(parsed.international()));
    data.insert("national_format".into(), json!(parsed.national()));
    data.insert(
        "formatter_confidence".into(),
        json!(parsed.formatter_confidence()),
    );
    put(&mut data, "carrier", parsed.carrier());
    put(&mut data, "location", parsed.geo_description());

    let confidence = if parsed.is_valid() { 95.0 } else { 20.0 };
    Ok(SourceReport::new(data, confidence))
}

// ============ Pattern Analysis ============

/// Runs the structural pattern engine as if it were one more provider.
pub struct PatternAnalysisSource {
    engine: Arc<PatternAnalysisEngine>,
}

impl PatternAnalysisSource {
    pub fn new(engine: PatternAnalysisEngine) -> Self {
        Self {
            engine: Arc::new(engine),
        }
    }
}

fn to_value<T: serde::Serialize>(value: &T) -> Result<Value, AdapterError> {
    serde_json::to_value(value).map_err(|e| AdapterError::Decode(e.to_string()))
}

#[async_trait]
impl SourceAdapter for PatternAnalysisSource {
    fn source(&self) -> DataSource {
        DataSource::PatternAnalysis
    }

    async fn query(
        &self,
        number: &str,
        region: &str,
        _timeout: Duration,
    ) -> Result<SourceReport, AdapterError> {
        let engine = Arc::clone(&self.engine);
        let (number, region) = (number.to_string(), region.to_string());
        spawn_blocking(move || pattern_report(&engine, &number, &region))
            .await
            .map_err(blocking_failed)?
    }
}

fn pattern_report(
    engine: &PatternAnalysisEngine,
    number: &str,
    region: &str,
) -> Result<SourceReport, AdapterError> {
    let parsed = engine.formatter().parse(number, region)?;
    let analysis = engine.analyze(parsed.e164(), region);
    let priorities = engine.suggest_investigation_priorities(&analysis);
    let medium_threshold = engine.config().medium_confidence_related;

    let mut data = FieldMap::new();
    data.insert("related_numbers".into(), to_value(&analysis.related_numbers)?);
    data.insert("bulk_registration".into(), to_value(&analysis.bulk_registration)?);
    data.insert("sequential_patterns".into(), to_value(&analysis.sequential_patterns)?);
    data.insert("carrier_block".into(), to_value(&analysis.carrier_block)?);
    data.insert(
        "total_related_numbers".into(),
        json!(analysis.related_numbers.len()),
    );
    data.insert(
        "high_confidence_related".into(),
        json!(analysis
            .related_numbers
            .iter()
            .filter(|r| r.confidence_score() >= medium_threshold)
            .count()),
    );
    data.insert("investigation_priorities".into(), to_value(&priorities)?);
    data.insert(
        "pattern_intelligence".into(),
        json!({
            "bulk_risk": analysis.bulk_registration.risk_assessment,
            "sequential_priority": analysis.sequential_patterns.investigation_priority,
            "top_priority": priorities.first().map(|p| p.priority),
        }),
    );
    let carrier = analysis
        .carrier_block
        .block
        .as_ref()
        .map(|b| b.carrier_name())
        .filter(|name| *name != "Unknown");
    put(&mut data, "carrier", carrier);

    Ok(SourceReport::new(data, analysis.source_confidence()))
}
