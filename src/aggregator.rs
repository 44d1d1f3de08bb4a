//! Concurrent multi-source lookup and field-level merge.

use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;

use crate::config::Config;
use crate::errors::{AggregatorError, ModelError};
use crate::models::{
    AggregatedIntelligence, ConfidenceLevel, DataSource, FieldAlternative, IntelligenceResult,
    MergedField, SourceError, SourceErrorKind,
};
use crate::sources::SourceAdapter;

/// Fields shown first in reports, in this order.
const KEY_FIELDS: [&str; 8] = [
    "is_valid",
    "country",
    "carrier",
    "line_type",
    "location",
    "operator",
    "circle",
    "state",
];

// ============ Configuration ============

/// Immutable weights, priorities, timeouts and scoring constants.
#[derive(Debug, Clone, PartialEq)]
pub struct AggregatorConfig {
    source_weights: BTreeMap<DataSource, f64>,
    field_priorities: BTreeMap<String, Vec<DataSource>>,
    source_timeouts: BTreeMap<DataSource, Duration>,
    critical_fields: BTreeSet<String>,
    single_source_factor: f64,
    corroboration_step: f64,
    max_corroboration_bonus: f64,
    failure_penalty: f64,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        use DataSource::*;

        let source_weights = DataSource::ALL
            .iter()
            .map(|s| (*s, s.default_weight()))
            .collect();
        let source_timeouts = DataSource::ALL
            .iter()
            .map(|s| (*s, s.default_timeout()))
            .collect();

        let priorities: [(&str, Vec<DataSource>); 16] = [
            ("is_valid", vec![LibPhoneNumber, AbstractApi, Telnyx]),
            ("country", vec![LibPhoneNumber, AbstractApi, Neutrino]),
            (
                "carrier",
                vec![Neutrino, Telnyx, FindAndTrace, LibPhoneNumber, PatternAnalysis],
            ),
            ("line_type", vec![LibPhoneNumber, AbstractApi, Neutrino]),
            ("location", vec![FindAndTrace, Neutrino, AbstractApi]),
            ("operator", vec![FindAndTrace, Neutrino, AbstractApi]),
            ("circle", vec![FindAndTrace, LibPhoneNumber]),
            ("state", vec![FindAndTrace, Neutrino]),
            ("domains", vec![Whois]),
            ("business_connections", vec![Whois]),
            ("domain_count", vec![Whois]),
            ("related_numbers", vec![PatternAnalysis]),
            ("bulk_registration", vec![PatternAnalysis]),
            ("sequential_patterns", vec![PatternAnalysis]),
            ("carrier_block", vec![PatternAnalysis]),
            ("pattern_intelligence", vec![PatternAnalysis]),
        ];
        let field_priorities = priorities
            .into_iter()
            .map(|(field, sources)| (field.to_string(), sources))
            .collect();

        Self {
            source_weights,
            field_priorities,
            source_timeouts,
            critical_fields: ["is_valid", "country", "carrier"]
                .iter()
                .map(|f| f.to_string())
                .collect(),
            single_source_factor: 0.85,
            corroboration_step: 7.5,
            max_corroboration_bonus: 20.0,
            failure_penalty: 15.0,
        }
    }
}

impl AggregatorConfig {
    /// Defaults with the timeout overrides from the environment applied.
    pub fn from_config(config: &Config) -> Result<Self, AggregatorError> {
        config
            .source_timeouts
            .iter()
            .try_fold(Self::default(), |acc, (source, timeout)| {
                acc.with_timeout(*source, *timeout)
            })
    }

    pub fn with_weight(mut self, source: DataSource, weight: f64) -> Result<Self, AggregatorError> {
        if weight.is_nan() || weight <= 0.0 || weight > 1.0 {
            return Err(AggregatorError::InvalidWeight {
                data_source: source,
                weight,
            });
        }
        self.source_weights.insert(source, weight);
        Ok(self)
    }

    pub fn with_timeout(
        mut self,
        source: DataSource,
        timeout: Duration,
    ) -> Result<Self, AggregatorError> {
        if timeout.is_zero() {
            return Err(AggregatorError::InvalidTimeout(source));
        }
        self.source_timeouts.insert(source, timeout);
        Ok(self)
    }

    pub fn with_field_priority(mut self, field: &str, sources: Vec<DataSource>) -> Self {
        self.field_priorities.insert(field.to_string(), sources);
        self
    }

    pub fn with_critical_field(mut self, field: &str) -> Self {
        self.critical_fields.insert(field.to_string());
        self
    }

    /// Replace the overall-confidence constants.
    ///
    /// # Arguments
    ///
    /// * `single_source_factor` - Multiplier for a lone success, in `[0, 1)`.
    /// * `corroboration_step` - Bonus per additional agreeing source, in `[0, 100]`.
    /// * `max_corroboration_bonus` - Cap on the total bonus, in `[0, 100]`.
    /// * `failure_penalty` - Points removed, scaled by the failed share, in `[0, 100]`.
    pub fn with_scoring(
        mut self,
        single_source_factor: f64,
        corroboration_step: f64,
        max_corroboration_bonus: f64,
        failure_penalty: f64,
    ) -> Result<Self, AggregatorError> {
        self.single_source_factor =
            ModelError::check_range("single_source_factor", single_source_factor, 0.0, 0.999_999)?;
        self.corroboration_step =
            ModelError::check_range("corroboration_step", corroboration_step, 0.0, 100.0)?;
        self.max_corroboration_bonus = ModelError::check_range(
            "max_corroboration_bonus",
            max_corroboration_bonus,
            0.0,
            100.0,
        )?;
        self.failure_penalty =
            ModelError::check_range("failure_penalty", failure_penalty, 0.0, 100.0)?;
        Ok(self)
    }

    pub fn weight(&self, source: DataSource) -> Option<f64> {
        self.source_weights.get(&source).copied()
    }

    pub fn timeout(&self, source: DataSource) -> Option<Duration> {
        self.source_timeouts.get(&source).copied()
    }

    pub fn priorities(&self, field: &str) -> &[DataSource] {
        self.field_priorities
            .get(field)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn is_critical(&self, field: &str) -> bool {
        self.critical_fields.contains(field)
    }
}

/// Maps a 0-100 score onto its qualitative band.
pub fn get_confidence_level(score: f64) -> ConfidenceLevel {
    ConfidenceLevel::from_score(score)
}

/// Reputation of a number in `[0, 1]` from its merged fields.
///
/// Starts neutral at 0.5. Validity, a known carrier, business connections and
/// active domains raise it; an invalid or unverified number lowers it.
pub fn reputation_score(merged: &BTreeMap<String, MergedField>) -> f64 {
    let value = |field: &str| merged.get(field).map(|m| &m.value);
    let mut score = 0.5;

    if value("is_valid").and_then(Value::as_bool) == Some(true) {
        score += 0.2;
    } else {
        score -= 0.3;
    }

    if value("carrier")
        .and_then(Value::as_str)
        .is_some_and(|c| !c.trim().is_empty())
    {
        score += 0.1;
    }

    let connections = value("business_connections")
        .and_then(Value::as_array)
        .map_or(0, Vec::len);
    score += f64::min(connections as f64 * 0.05, 0.2);

    // Reverse-WHOIS names carry no status and count as active.
    let active_domains = value("domains")
        .and_then(Value::as_array)
        .map_or(0, |domains| {
            domains
                .iter()
                .filter(|d| match d {
                    Value::String(name) => !name.is_empty(),
                    Value::Object(entry) => entry.get("status") == Some(&Value::from("active")),
                    _ => false,
                })
                .count()
        });
    score += f64::min(active_domains as f64 * 0.03, 0.15);

    score.clamp(0.0, 1.0)
}

// ============ Aggregator ============

struct Candidate<'a> {
    source: DataSource,
    value: &'a Value,
    weighted: f64,
}

/// Runs every registered source concurrently and merges what comes back.
#[derive(Clone)]
pub struct IntelligenceAggregator {
    config: Arc<AggregatorConfig>,
    adapters: BTreeMap<DataSource, Arc<dyn SourceAdapter>>,
}

impl std::fmt::Debug for IntelligenceAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IntelligenceAggregator")
            .field("config", &self.config)
            .field("sources", &self.adapters.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl IntelligenceAggregator {
    /// Register adapters. Each must have a weight and timeout in `config`.
    pub fn new(
        config: AggregatorConfig,
        adapters: Vec<Arc<dyn SourceAdapter>>,
    ) -> Result<Self, AggregatorError> {
        let mut registered = BTreeMap::new();
        for adapter in adapters {
            let source = adapter.source();
            if config.weight(source).is_none() || config.timeout(source).is_none() {
                return Err(AggregatorError::UnknownSource(source));
            }
            registered.insert(source, adapter);
        }
        Ok(Self {
            config: Arc::new(config),
            adapters: registered,
        })
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    pub fn registered_sources(&self) -> Vec<DataSource> {
        self.adapters.keys().copied().collect()
    }

    /// Query the requested sources for one number and merge the outcome.
    ///
    /// # Arguments
    ///
    /// * `phone_number` - Raw number as supplied by the caller.
    /// * `country_code` - ISO region used to parse numbers without `+`.
    /// * `sources` - Subset to query; `None` queries every registered source.
    ///
    /// # Returns
    ///
    /// * `Ok(AggregatedIntelligence)` - Always, once every source finished or timed out.
    /// * `Err(AggregatorError::UnknownSource)` - A requested source is not registered.
    pub async fn aggregate_intelligence(
        &self,
        phone_number: &str,
        country_code: &str,
        sources: Option<&[DataSource]>,
    ) -> Result<AggregatedIntelligence, AggregatorError> {
        let requested: Vec<DataSource> = match sources {
            Some(list) => {
                let mut seen = BTreeSet::new();
                list.iter().copied().filter(|s| seen.insert(*s)).collect()
            }
            None => self.registered_sources(),
        };

        let mut plan = Vec::with_capacity(requested.len());
        for source in &requested {
            let adapter = self
                .adapters
                .get(source)
                .ok_or(AggregatorError::UnknownSource(*source))?;
            let timeout = self
                .config
                .timeout(*source)
                .ok_or(AggregatorError::UnknownSource(*source))?;
            self.config
                .weight(*source)
                .ok_or(AggregatorError::UnknownSource(*source))?;
            plan.push((*source, adapter.clone(), timeout));
        }

        tracing::info!(
            "🔍 Aggregating intelligence for {} ({}) across {} sources",
            phone_number,
            country_code,
            plan.len()
        );
        let started = Instant::now();
        let results = dispatch(plan, phone_number, country_code).await;

        let merged_data = self.merge_intelligence_data(&results);
        let overall_confidence = self.calculate_overall_confidence(&results);

        let mut contributing: Vec<DataSource> = results
            .iter()
            .filter(|r| !r.data().is_empty())
            .map(|r| r.source())
            .collect();
        contributing.sort();
        let sources_used = contributing.iter().map(|s| s.as_str().to_string()).collect();

        let mut failed: Vec<&IntelligenceResult> =
            results.iter().filter(|r| !r.is_success()).collect();
        failed.sort_by_key(|r| r.source());
        let errors = failed
            .iter()
            .filter_map(|r| r.error().map(|e| format!("{}: {}", r.source(), e.message)))
            .collect();

        let successful_sources = results.iter().filter(|r| r.is_success()).count();
        let processing_time = started.elapsed();

        tracing::info!(
            "✓ Aggregation finished: {}/{} sources succeeded, confidence {:.1} ({}) in {:?}",
            successful_sources,
            results.len(),
            overall_confidence,
            get_confidence_level(overall_confidence),
            processing_time
        );

        Ok(AggregatedIntelligence {
            phone_number: phone_number.to_string(),
            country_code: country_code.to_string(),
            total_sources: results.len(),
            successful_sources,
            results,
            merged_data,
            overall_confidence,
            sources_used,
            processing_time,
            errors,
        })
    }

    /// Pick one winner per field across the successful results.
    ///
    /// Sources named in the field's priority list win in list order; the rest
    /// rank by `confidence * weight`, then by source declaration order. The
    /// outcome never depends on the order of `results`.
    pub fn merge_intelligence_data(
        &self,
        results: &[IntelligenceResult],
    ) -> BTreeMap<String, MergedField> {
        let mut candidates: BTreeMap<&str, Vec<Candidate<'_>>> = BTreeMap::new();
        for result in results.iter().filter(|r| r.is_success()) {
            let weight = self
                .config
                .weight(result.source())
                .unwrap_or_else(|| result.source().default_weight());
            for (field, value) in result.data() {
                if value.is_null() || field == "error" {
                    continue;
                }
                candidates.entry(field.as_str()).or_default().push(Candidate {
                    source: result.source(),
                    value,
                    weighted: result.confidence() * weight,
                });
            }
        }

        let mut merged = BTreeMap::new();
        for (field, mut group) in candidates {
            let priorities = self.config.priorities(field);
            let rank = |source: DataSource| {
                priorities
                    .iter()
                    .position(|p| *p == source)
                    .unwrap_or(usize::MAX)
            };
            group.sort_by(|a, b| {
                rank(a.source)
                    .cmp(&rank(b.source))
                    .then_with(|| b.weighted.total_cmp(&a.weighted))
                    .then_with(|| a.source.cmp(&b.source))
                    .then_with(|| a.value.to_string().cmp(&b.value.to_string()))
            });

            let mut ranked = group.into_iter();
            let Some(winner) = ranked.next() else {
                continue;
            };
            let alternatives = if self.config.is_critical(field) {
                ranked
                    .map(|c| FieldAlternative {
                        value: c.value.clone(),
                        source: c.source,
                        confidence: c.weighted,
                    })
                    .collect()
            } else {
                Vec::new()
            };
            tracing::debug!("Merged {} from {} ({:.1})", field, winner.source, winner.weighted);
            merged.insert(
                field.to_string(),
                MergedField {
                    value: winner.value.clone(),
                    source: winner.source,
                    confidence: winner.weighted,
                    alternatives,
                },
            );
        }
        merged
    }

    /// Overall confidence in `[0, 100]`.
    ///
    /// A lone success is discounted by `single_source_factor`; several successes
    /// earn a corroboration bonus scaled by how much they agree. Failed sources
    /// subtract `failure_penalty` in proportion to their share.
    pub fn calculate_overall_confidence(&self, results: &[IntelligenceResult]) -> f64 {
        let successes: Vec<&IntelligenceResult> =
            results.iter().filter(|r| r.is_success()).collect();
        if successes.is_empty() {
            return 0.0;
        }
        let failed = results.len() - successes.len();
        let penalty = self.config.failure_penalty * failed as f64 / results.len() as f64;

        let score = if let [only] = successes.as_slice() {
            only.confidence() * self.config.single_source_factor - penalty
        } else {
            let (weighted_sum, weight_total) =
                successes.iter().fold((0.0, 0.0), |(sum, total), r| {
                    let weight = self
                        .config
                        .weight(r.source())
                        .unwrap_or_else(|| r.source().default_weight());
                    (sum + r.confidence() * weight, total + weight)
                });
            if weight_total <= 0.0 {
                return 0.0;
            }
            let mean = weighted_sum / weight_total;
            let bonus = f64::min(
                self.config.corroboration_step
                    * (successes.len() - 1) as f64
                    * field_agreement(&successes),
                self.config.max_corroboration_bonus,
            );
            mean + bonus - penalty
        };
        score.clamp(0.0, 100.0)
    }

    /// Deterministic audit text for an aggregation.
    pub fn generate_intelligence_report(&self, intel: &AggregatedIntelligence) -> String {
        let mut report = String::new();
        let level = get_confidence_level(intel.overall_confidence);

        let _ = writeln!(report, "MULTI-SOURCE INTELLIGENCE REPORT");
        let _ = writeln!(report, "{}", "=".repeat(50));
        let _ = writeln!(report, "Phone Number: {}", intel.phone_number);
        let _ = writeln!(report, "Country Context: {}", intel.country_code);
        let _ = writeln!(
            report,
            "Processing Time: {:.2}s",
            intel.processing_time.as_secs_f64()
        );
        let _ = writeln!(
            report,
            "Overall Confidence: {:.1}% ({})",
            intel.overall_confidence, level
        );
        let _ = writeln!(report);

        let _ = writeln!(report, "SOURCE SUMMARY");
        let _ = writeln!(report, "{}", "-".repeat(30));
        let _ = writeln!(report, "Total Sources: {}", intel.total_sources);
        let _ = writeln!(report, "Successful Sources: {}", intel.successful_sources);
        let _ = writeln!(report, "Success Rate: {:.1}%", intel.success_rate());
        let _ = writeln!(report, "Sources Used: {}", intel.sources_used.join(", "));
        let _ = writeln!(report);

        if !intel.merged_data.is_empty() {
            let _ = writeln!(report, "INTELLIGENCE DATA");
            let _ = writeln!(report, "{}", "-".repeat(30));
            for field in KEY_FIELDS {
                if let Some(merged) = intel.merged_data.get(field) {
                    let _ = writeln!(
                        report,
                        "  {}: {} (Confidence: {:.1}%, Source: {})",
                        title_case(field),
                        display_value(&merged.value),
                        merged.confidence,
                        merged.source
                    );
                }
            }
            let _ = writeln!(report);
        }

        let _ = writeln!(report, "INDIVIDUAL SOURCE RESULTS");
        let _ = writeln!(report, "{}", "-".repeat(40));
        let mut results: Vec<&IntelligenceResult> = intel.results.iter().collect();
        results.sort_by_key(|r| r.source());
        for result in results {
            let status = if result.is_success() { "SUCCESS" } else { "FAILED" };
            let _ = writeln!(
                report,
                "{}: {} (Confidence: {:.1}%, Time: {:.2}s)",
                result.source(),
                status,
                result.confidence(),
                result.response_time().as_secs_f64()
            );
            if let Some(error) = result.error() {
                let _ = writeln!(report, "  Error: {}", error);
            }
        }
        let _ = writeln!(report);

        if !intel.errors.is_empty() {
            let _ = writeln!(report, "ERRORS ENCOUNTERED");
            let _ = writeln!(report, "{}", "-".repeat(30));
            for error in &intel.errors {
                let _ = writeln!(report, "  - {}", error);
            }
            let _ = writeln!(report);
        }

        let _ = writeln!(report, "RECOMMENDATIONS");
        let _ = writeln!(report, "{}", "-".repeat(25));
        let advice = match level {
            ConfidenceLevel::Critical => "Data is highly reliable - proceed with confidence",
            ConfidenceLevel::High => "Data is reliable - good for most use cases",
            ConfidenceLevel::Medium => "Data is moderately reliable - verify critical information",
            ConfidenceLevel::Low => "Data reliability is low - use with caution",
            ConfidenceLevel::VeryLow | ConfidenceLevel::Unreliable => {
                "Data reliability is very low - manual verification recommended"
            }
        };
        let _ = writeln!(report, "  - {}", advice);
        if intel.successful_sources < 2 {
            let _ = writeln!(
                report,
                "  - Consider adding more data sources for better reliability"
            );
        }
        if !intel.errors.is_empty() {
            let _ = writeln!(
                report,
                "  - Some sources failed - check API keys and network connectivity"
            );
        }
        report
    }
}

/// Run each planned source on its own task under its timeout.
///
/// The adapter call runs on a task of its own, separate from the task that
/// watches its deadline, so an adapter that blocks its worker still times out
/// on a multi-threaded runtime. Results come back in completion order. A task
/// that panics still yields a failed result for its source.
async fn dispatch(
    plan: Vec<(DataSource, Arc<dyn SourceAdapter>, Duration)>,
    phone_number: &str,
    country_code: &str,
) -> Vec<IntelligenceResult> {
    let mut pending: BTreeSet<DataSource> = plan.iter().map(|(s, _, _)| *s).collect();
    let mut tasks = JoinSet::new();
    let dispatched = Instant::now();

    for (source, adapter, timeout) in plan {
        let number = phone_number.to_string();
        let region = country_code.to_string();
        tasks.spawn(async move {
            let started = Instant::now();
            let mut query =
                tokio::spawn(async move { adapter.query(&number, &region, timeout).await });
            let outcome = tokio::time::timeout(timeout, &mut query).await;
            if outcome.is_err() {
                query.abort();
            }
            (source, timeout, outcome, started.elapsed())
        });
    }

    let mut results = Vec::with_capacity(pending.len());
    let mut panicked = false;
    while let Some(joined) = tasks.join_next().await {
        let (source, timeout, outcome, elapsed) = match joined {
            Ok(done) => done,
            Err(e) => {
                tracing::error!("❌ Source task failed: {}", e);
                panicked |= e.is_panic();
                continue;
            }
        };
        pending.remove(&source);

        let result = match outcome {
            Ok(Ok(Ok(report))) => {
                match IntelligenceResult::success(source, report.data, report.confidence, elapsed)
                {
                    Ok(result) => result,
                    Err(e) => {
                        tracing::error!("❌ {} reported an invalid confidence: {}", source, e);
                        IntelligenceResult::failure(
                            source,
                            SourceError::new(SourceErrorKind::InvalidConfidence, e.to_string()),
                            elapsed,
                        )
                    }
                }
            }
            Ok(Ok(Err(e))) => {
                tracing::warn!("⚠️ {} failed: {}", source, e);
                IntelligenceResult::failure(source, SourceError::new(e.kind(), e.to_string()), elapsed)
            }
            Ok(Err(e)) => {
                tracing::error!("❌ {} query task failed: {}", source, e);
                let kind = if e.is_panic() {
                    SourceErrorKind::Panicked
                } else {
                    SourceErrorKind::Aborted
                };
                IntelligenceResult::failure(
                    source,
                    SourceError::new(kind, "source task did not complete"),
                    elapsed,
                )
            }
            Err(_) => {
                tracing::warn!("⏱️ {} timed out after {:?}", source, timeout);
                IntelligenceResult::failure(
                    source,
                    SourceError::new(
                        SourceErrorKind::Timeout,
                        format!("source exceeded its {:.1}s timeout", timeout.as_secs_f64()),
                    ),
                    elapsed,
                )
            }
        };
        results.push(result);
    }

    let kind = if panicked {
        SourceErrorKind::Panicked
    } else {
        SourceErrorKind::Aborted
    };
    for source in pending {
        results.push(IntelligenceResult::failure(
            source,
            SourceError::new(kind, "source task did not complete"),
            dispatched.elapsed(),
        ));
    }
    results
}

fn normalized(value: &Value) -> Value {
    match value {
        Value::String(s) => Value::String(s.trim().to_lowercase()),
        other => other.clone(),
    }
}

/// Mean share of the most common value over fields reported by two or more
/// sources. `1.0` when no field overlaps.
fn field_agreement(successes: &[&IntelligenceResult]) -> f64 {
    let mut by_field: BTreeMap<&str, Vec<Value>> = BTreeMap::new();
    for result in successes {
        for (field, value) in result.data() {
            if !value.is_null() && field != "error" {
                by_field.entry(field.as_str()).or_default().push(normalized(value));
            }
        }
    }

    let shares: Vec<f64> = by_field
        .values()
        .filter(|values| values.len() >= 2)
        .map(|values| {
            let most_common = values
                .iter()
                .map(|v| values.iter().filter(|other| *other == v).count())
                .max()
                .unwrap_or(0);
            most_common as f64 / values.len() as f64
        })
        .collect();

    if shares.is_empty() {
        1.0
    } else {
        shares.iter().sum::<f64>() / shares.len() as f64
    }
}

fn title_case(field: &str) -> String {
    field
        .split('_')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
