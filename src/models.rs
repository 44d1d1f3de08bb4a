use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use crate::errors::ModelError;

/// Open-ended field map reported by a source.
pub type FieldMap = BTreeMap<String, Value>;

// ============ Data Sources ============

/// Closed set of intelligence providers known to the aggregator.
///
/// Declaration order doubles as the final tie-breaker during merging, so new
/// variants go at the end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DataSource {
    /// Local parsing and formatting via the phone-numbering library.
    LibPhoneNumber,
    /// AbstractAPI phone validation.
    AbstractApi,
    /// Neutrino phone-validate.
    Neutrino,
    /// findandtrace.com scrape (Indian mobiles only).
    FindAndTrace,
    /// Telnyx number lookup.
    Telnyx,
    /// Numverify validation.
    Numverify,
    /// Veriphone verification.
    Veriphone,
    /// Reverse WHOIS search for domains registered with the number.
    Whois,
    /// Local structural pattern analysis.
    #[serde(rename = "pattern_analysis")]
    PatternAnalysis,
}

impl DataSource {
    pub const ALL: [DataSource; 9] = [
        DataSource::LibPhoneNumber,
        DataSource::AbstractApi,
        DataSource::Neutrino,
        DataSource::FindAndTrace,
        DataSource::Telnyx,
        DataSource::Numverify,
        DataSource::Veriphone,
        DataSource::Whois,
        DataSource::PatternAnalysis,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DataSource::LibPhoneNumber => "libphonenumber",
            DataSource::AbstractApi => "abstractapi",
            DataSource::Neutrino => "neutrino",
            DataSource::FindAndTrace => "findandtrace",
            DataSource::Telnyx => "telnyx",
            DataSource::Numverify => "numverify",
            DataSource::Veriphone => "veriphone",
            DataSource::Whois => "whois",
            DataSource::PatternAnalysis => "pattern_analysis",
        }
    }

    /// Reliability weight applied to the source's self-reported confidence.
    ///
    /// Local computation is directly verifiable and outranks third-party lookups.
    pub fn default_weight(&self) -> f64 {
        match self {
            DataSource::LibPhoneNumber => 0.95,
            DataSource::AbstractApi => 0.85,
            DataSource::Neutrino => 0.80,
            DataSource::Telnyx => 0.85,
            DataSource::FindAndTrace => 0.70,
            DataSource::Numverify => 0.75,
            DataSource::Veriphone => 0.75,
            DataSource::Whois => 0.80,
            DataSource::PatternAnalysis => 0.85,
        }
    }

    /// Budget for a single query against the source.
    pub fn default_timeout(&self) -> Duration {
        match self {
            DataSource::LibPhoneNumber => Duration::from_secs(1),
            DataSource::PatternAnalysis => Duration::from_secs(5),
            DataSource::AbstractApi
            | DataSource::Neutrino
            | DataSource::Telnyx
            | DataSource::Numverify
            | DataSource::Veriphone => Duration::from_secs(10),
            DataSource::FindAndTrace => Duration::from_secs(15),
            DataSource::Whois => Duration::from_secs(30),
        }
    }

    /// Whether the source runs without network access.
    pub fn is_local(&self) -> bool {
        matches!(self, DataSource::LibPhoneNumber | DataSource::PatternAnalysis)
    }
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase().replace(['-', ' '], "_");
        DataSource::ALL
            .iter()
            .copied()
            .find(|source| source.as_str() == wanted || source.as_str().replace('_', "") == wanted)
            .ok_or_else(|| format!("unknown data source '{}'", s))
    }
}

// ============ Confidence Levels ============

/// Qualitative band for a 0-100 confidence score. Ordered from least to most
/// reliable so that comparisons follow the score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConfidenceLevel {
    Unreliable,
    VeryLow,
    Low,
    Medium,
    High,
    Critical,
}

impl ConfidenceLevel {
    /// Classify a score. Lower bounds are inclusive; NaN is `Unreliable`.
    pub fn from_score(score: f64) -> Self {
        if score >= 95.0 {
            ConfidenceLevel::Critical
        } else if score >= 80.0 {
            ConfidenceLevel::High
        } else if score >= 60.0 {
            ConfidenceLevel::Medium
        } else if score >= 40.0 {
            ConfidenceLevel::Low
        } else if score >= 20.0 {
            ConfidenceLevel::VeryLow
        } else {
            ConfidenceLevel::Unreliable
        }
    }

    /// Inclusive lower bound of the band.
    pub fn min_score(&self) -> f64 {
        match self {
            ConfidenceLevel::Critical => 95.0,
            ConfidenceLevel::High => 80.0,
            ConfidenceLevel::Medium => 60.0,
            ConfidenceLevel::Low => 40.0,
            ConfidenceLevel::VeryLow => 20.0,
            ConfidenceLevel::Unreliable => 0.0,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ConfidenceLevel::Critical => "CRITICAL",
            ConfidenceLevel::High => "HIGH",
            ConfidenceLevel::Medium => "MEDIUM",
            ConfidenceLevel::Low => "LOW",
            ConfidenceLevel::VeryLow => "VERY_LOW",
            ConfidenceLevel::Unreliable => "UNRELIABLE",
        }
    }
}

impl fmt::Display for ConfidenceLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============ Source Results ============

/// Why a source produced no usable data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceErrorKind {
    Timeout,
    Parse,
    NotApplicable,
    Unavailable,
    Http,
    Status,
    Decode,
    CircuitOpen,
    NoData,
    InvalidConfidence,
    Panicked,
    Aborted,
}

impl SourceErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceErrorKind::Timeout => "timeout",
            SourceErrorKind::Parse => "parse_error",
            SourceErrorKind::NotApplicable => "not_applicable",
            SourceErrorKind::Unavailable => "unavailable",
            SourceErrorKind::Http => "http_error",
            SourceErrorKind::Status => "bad_status",
            SourceErrorKind::Decode => "decode_error",
            SourceErrorKind::CircuitOpen => "circuit_open",
            SourceErrorKind::NoData => "no_data",
            SourceErrorKind::InvalidConfidence => "invalid_confidence",
            SourceErrorKind::Panicked => "panicked",
            SourceErrorKind::Aborted => "aborted",
        }
    }
}

/// Typed failure attached to an unsuccessful `IntelligenceResult`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceError {
    pub kind: SourceErrorKind,
    pub message: String,
}

impl SourceError {
    pub fn new(kind: SourceErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for SourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.kind.as_str(), self.message)
    }
}

/// One source's outcome for one aggregation run.
///
/// Fields are private so the invariants hold after construction: confidence
/// stays in `[0, 100]` and `error` is present exactly when `success` is false.
#[derive(Debug, Clone, Serialize)]
pub struct IntelligenceResult {
    source: DataSource,
    data: FieldMap,
    confidence: f64,
    timestamp: DateTime<Utc>,
    success: bool,
    error: Option<SourceError>,
    #[serde(with = "duration_secs")]
    response_time: Duration,
}

impl IntelligenceResult {
    /// Successful outcome. Rejects confidence outside `[0, 100]`.
    pub fn success(
        source: DataSource,
        data: FieldMap,
        confidence: f64,
        response_time: Duration,
    ) -> Result<Self, ModelError> {
        let confidence = ModelError::check_range("confidence", confidence, 0.0, 100.0)?;
        Ok(Self {
            source,
            data,
            confidence,
            timestamp: Utc::now(),
            success: true,
            error: None,
            response_time,
        })
    }

    /// Failed outcome; confidence is always zero and data empty.
    pub fn failure(source: DataSource, error: SourceError, response_time: Duration) -> Self {
        Self {
            source,
            data: FieldMap::new(),
            confidence: 0.0,
            timestamp: Utc::now(),
            success: false,
            error: Some(error),
            response_time,
        }
    }

    pub fn source(&self) -> DataSource {
        self.source
    }

    pub fn data(&self) -> &FieldMap {
        &self.data
    }

    pub fn confidence(&self) -> f64 {
        self.confidence
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn is_success(&self) -> bool {
        self.success
    }

    pub fn error(&self) -> Option<&SourceError> {
        self.error.as_ref()
    }

    pub fn response_time(&self) -> Duration {
        self.response_time
    }
}

// ============ Merged Intelligence ============

/// A losing candidate value kept for transparency on critical fields.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldAlternative {
    pub value: Value,
    pub source: DataSource,
    /// Weighted confidence (`confidence * source_weight`).
    pub confidence: f64,
}

/// The winning value for one field plus its provenance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergedField {
    pub value: Value,
    pub source: DataSource,
    /// Weighted confidence (`confidence * source_weight`) of the winner.
    pub confidence: f64,
    /// Other sources' values, best first. Only filled for critical fields.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub alternatives: Vec<FieldAlternative>,
}

/// Merged outcome for one phone number across every dispatched source.
#[derive(Debug, Clone, Serialize)]
pub struct AggregatedIntelligence {
    /// Phone number as supplied by the caller.
    pub phone_number: String,
    /// Region context used for parsing.
    pub country_code: String,
    /// One entry per dispatched source, in completion order.
    pub results: Vec<IntelligenceResult>,
    /// Field name to winning value.
    pub merged_data: BTreeMap<String, MergedField>,
    /// Overall confidence in `[0, 100]`.
    pub overall_confidence: f64,
    /// Sources whose result contributed any data.
    pub sources_used: Vec<String>,
    pub total_sources: usize,
    pub successful_sources: usize,
    /// Wall-clock span from dispatch to merge.
    #[serde(with = "duration_secs")]
    pub processing_time: Duration,
    /// `"<source>: <error>"` for every failed source.
    pub errors: Vec<String>,
}

impl AggregatedIntelligence {
    /// Look a source's result up by tag; position in `results` is meaningless.
    pub fn result_for(&self, source: DataSource) -> Option<&IntelligenceResult> {
        self.results.iter().find(|r| r.source() == source)
    }

    pub fn merged_value(&self, field: &str) -> Option<&Value> {
        self.merged_data.get(field).map(|f| &f.value)
    }

    pub fn confidence_level(&self) -> ConfidenceLevel {
        ConfidenceLevel::from_score(self.overall_confidence)
    }

    /// Percentage of dispatched sources that succeeded.
    pub fn success_rate(&self) -> f64 {
        if self.total_sources == 0 {
            return 0.0;
        }
        self.successful_sources as f64 / self.total_sources as f64 * 100.0
    }
}

// ============ Pattern Analysis Models ============

/// Investigation urgency. Ordered so that `High` compares greatest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Priority {
    Low,
    Medium,
    High,
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Priority::Low => "Low",
            Priority::Medium => "Medium",
            Priority::High => "High",
        };
        f.write_str(name)
    }
}

/// How a candidate number relates to the investigated one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationshipType {
    /// Numeric neighbour within the sequential window.
    Sequential,
    /// Same-length digit rearrangement of the trailing group.
    PatternVariation,
}

/// Candidate neighbour number.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelatedNumber {
    number: String,
    relationship_type: RelationshipType,
    confidence_score: f64,
    evidence: Vec<String>,
    investigation_priority: Priority,
}

impl RelatedNumber {
    pub fn new(
        number: impl Into<String>,
        relationship_type: RelationshipType,
        confidence_score: f64,
        evidence: Vec<String>,
        investigation_priority: Priority,
    ) -> Result<Self, ModelError> {
        let confidence_score =
            ModelError::check_range("confidence_score", confidence_score, 0.0, 1.0)?;
        Ok(Self {
            number: number.into(),
            relationship_type,
            confidence_score,
            evidence,
            investigation_priority,
        })
    }

    pub fn number(&self) -> &str {
        &self.number
    }

    pub fn relationship_type(&self) -> RelationshipType {
        self.relationship_type
    }

    pub fn confidence_score(&self) -> f64 {
        self.confidence_score
    }

    pub fn evidence(&self) -> &[String] {
        &self.evidence
    }

    pub fn investigation_priority(&self) -> Priority {
        self.investigation_priority
    }
}

/// Qualitative risk attached to a bulk-registration finding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub fn from_score(score: f64) -> Self {
        if score >= 0.7 {
            RiskLevel::Critical
        } else if score >= 0.5 {
            RiskLevel::High
        } else if score >= 0.3 {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }
}

/// Suspected block of numbers allocated together.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BulkRegistrationBlock {
    block_start: String,
    block_end: String,
    block_size: u64,
    confidence_score: f64,
    indicators: Vec<String>,
    risk_assessment: RiskLevel,
}

impl BulkRegistrationBlock {
    pub fn new(
        block_start: impl Into<String>,
        block_end: impl Into<String>,
        block_size: u64,
        confidence_score: f64,
        indicators: Vec<String>,
        risk_assessment: RiskLevel,
    ) -> Result<Self, ModelError> {
        let confidence_score =
            ModelError::check_range("confidence_score", confidence_score, 0.0, 1.0)?;
        Ok(Self {
            block_start: block_start.into(),
            block_end: block_end.into(),
            block_size,
            confidence_score,
            indicators,
            risk_assessment,
        })
    }

    pub fn block_start(&self) -> &str {
        &self.block_start
    }

    pub fn block_end(&self) -> &str {
        &self.block_end
    }

    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    pub fn confidence_score(&self) -> f64 {
        self.confidence_score
    }

    pub fn indicators(&self) -> &[String] {
        &self.indicators
    }

    pub fn risk_assessment(&self) -> RiskLevel {
        self.risk_assessment
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SequenceType {
    Consecutive,
    IncrementPattern,
    Alternating,
}

/// Numeric relationship between a base number and its neighbours.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SequentialPattern {
    base_number: String,
    sequence_type: SequenceType,
    pattern_numbers: Vec<String>,
    confidence_score: f64,
    business_likelihood: f64,
}

impl SequentialPattern {
    /// Builds a pattern. `pattern_numbers` must contain `base_number`.
    pub fn new(
        base_number: impl Into<String>,
        sequence_type: SequenceType,
        pattern_numbers: Vec<String>,
        confidence_score: f64,
        business_likelihood: f64,
    ) -> Result<Self, ModelError> {
        let base_number = base_number.into();
        let confidence_score =
            ModelError::check_range("confidence_score", confidence_score, 0.0, 1.0)?;
        let business_likelihood =
            ModelError::check_range("business_likelihood", business_likelihood, 0.0, 1.0)?;
        if !pattern_numbers.contains(&base_number) {
            return Err(ModelError::BaseNotInPattern(base_number));
        }
        Ok(Self {
            base_number,
            sequence_type,
            pattern_numbers,
            confidence_score,
            business_likelihood,
        })
    }

    pub fn base_number(&self) -> &str {
        &self.base_number
    }

    pub fn sequence_type(&self) -> SequenceType {
        self.sequence_type
    }

    pub fn pattern_numbers(&self) -> &[String] {
        &self.pattern_numbers
    }

    pub fn confidence_score(&self) -> f64 {
        self.confidence_score
    }

    pub fn business_likelihood(&self) -> f64 {
        self.business_likelihood
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllocationType {
    Standard,
    TollFree,
    Premium,
    Voip,
    SharedCost,
}

impl AllocationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AllocationType::Standard => "standard",
            AllocationType::TollFree => "toll_free",
            AllocationType::Premium => "premium",
            AllocationType::Voip => "voip",
            AllocationType::SharedCost => "shared_cost",
        }
    }
}

/// Carrier allocation block a number belongs to.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CarrierBlock {
    carrier_name: String,
    block_prefix: String,
    allocation_type: AllocationType,
    block_characteristics: BTreeMap<String, String>,
    confidence_score: f64,
}

impl CarrierBlock {
    pub fn new(
        carrier_name: impl Into<String>,
        block_prefix: impl Into<String>,
        allocation_type: AllocationType,
        block_characteristics: BTreeMap<String, String>,
        confidence_score: f64,
    ) -> Result<Self, ModelError> {
        let confidence_score =
            ModelError::check_range("confidence_score", confidence_score, 0.0, 1.0)?;
        Ok(Self {
            carrier_name: carrier_name.into(),
            block_prefix: block_prefix.into(),
            allocation_type,
            block_characteristics,
            confidence_score,
        })
    }

    pub fn carrier_name(&self) -> &str {
        &self.carrier_name
    }

    pub fn block_prefix(&self) -> &str {
        &self.block_prefix
    }

    pub fn allocation_type(&self) -> AllocationType {
        self.allocation_type
    }

    pub fn block_characteristics(&self) -> &BTreeMap<String, String> {
        &self.block_characteristics
    }

    pub fn confidence_score(&self) -> f64 {
        self.confidence_score
    }
}

// ============ Serde Helpers ============

/// Serializes a `Duration` as fractional seconds.
pub(crate) mod duration_secs {
    use serde::Serializer;
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }
}
