//! Append-only, in-memory record of past observations per number.
//!
//! Numbers are stored under the SHA-256 hex digest of their E.164 form, so the
//! store never holds the raw number.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::aggregator::reputation_score;
use crate::models::AggregatedIntelligence;

/// Confidence that a porting event reflects a real carrier move.
const PORTING_CONFIDENCE: f64 = 0.8;

/// Reputation swing across the history that hints at a new owner.
const REPUTATION_SWING: f64 = 0.5;

/// Mean indicator confidence above which an ownership change is reported.
const OWNERSHIP_THRESHOLD: f64 = 0.6;

/// Fields describing messaging or social presence.
const SOCIAL_FIELDS: [&str; 3] = ["whatsapp_presence", "telegram_presence", "social_media_presence"];

/// One snapshot of the merged values seen for a number.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Observation {
    pub id: Uuid,
    pub recorded_at: DateTime<Utc>,
    pub values: BTreeMap<String, Value>,
    pub overall_confidence: f64,
    /// Set when the snapshot came from a full aggregation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reputation_score: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub investigation_id: Option<String>,
    /// SHA-256 hex of the canonical JSON of `values`.
    pub fingerprint: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldChange {
    pub field: String,
    pub previous: Option<Value>,
    pub current: Option<Value>,
    pub confidence: f64,
    pub detected_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PortingEvent {
    pub from_carrier: String,
    pub to_carrier: String,
    pub detected_at: DateTime<Utc>,
    pub confidence: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OwnershipIndicatorKind {
    ReputationChange,
    SocialMediaChanges,
    DomainAssociationChanges,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OwnershipIndicator {
    pub kind: OwnershipIndicatorKind,
    pub description: String,
    pub confidence: f64,
}

/// Signs that a number changed hands, for example after recycling.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OwnershipAnalysis {
    pub detected: bool,
    /// Mean confidence of the indicators, `0.0` without any.
    pub confidence_score: f64,
    pub indicators: Vec<OwnershipIndicator>,
    pub observations_analyzed: usize,
    pub recommendation: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeRisk {
    Minimal,
    Low,
    Medium,
    High,
}

impl ChangeRisk {
    fn from_parts(stability: f64, change_frequency: f64, ownership_confidence: f64) -> Self {
        let risk = (1.0 - stability) + change_frequency + ownership_confidence;
        if risk > 2.0 {
            ChangeRisk::High
        } else if risk > 1.0 {
            ChangeRisk::Medium
        } else if risk > 0.5 {
            ChangeRisk::Low
        } else {
            ChangeRisk::Minimal
        }
    }
}

/// How settled a number's record is across its whole history.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChangeScoring {
    /// `1 - 2 * change_frequency`, floored at zero.
    pub stability_score: f64,
    /// Field changes per observation.
    pub change_frequency: f64,
    pub total_observations: usize,
    pub total_changes: usize,
    /// Highest porting confidence seen, `0.0` without porting.
    pub porting_confidence: f64,
    pub ownership_change_confidence: f64,
    pub overall_confidence: f64,
    pub risk_level: ChangeRisk,
    pub recommendations: Vec<String>,
}

pub fn number_key(e164: &str) -> String {
    hex::encode(Sha256::digest(e164.trim().as_bytes()))
}

fn fingerprint(values: &BTreeMap<String, Value>) -> String {
    // BTreeMap serializes in key order, so equal maps hash equally.
    let canonical = serde_json::to_string(values).unwrap_or_default();
    hex::encode(Sha256::digest(canonical.as_bytes()))
}

/// How much a change in `field` is worth believing.
fn change_confidence(field: &str) -> f64 {
    match field {
        "carrier" => 0.9,
        "number_type" | "line_type" => 0.8,
        "location" => 0.7,
        "is_valid" => 0.6,
        _ => 0.5,
    }
}

fn carrier_of(observation: &Observation) -> Option<String> {
    observation
        .values
        .get("carrier")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(str::to_string)
}

fn diff(previous: &Observation, current: &Observation) -> Vec<FieldChange> {
    if previous.fingerprint == current.fingerprint {
        return Vec::new();
    }

    let fields: BTreeSet<&String> = previous.values.keys().chain(current.values.keys()).collect();
    fields
        .into_iter()
        .filter_map(|field| {
            let before = previous.values.get(field);
            let after = current.values.get(field);
            (before != after).then(|| FieldChange {
                field: field.clone(),
                previous: before.cloned(),
                current: after.cloned(),
                confidence: change_confidence(field),
                detected_at: current.recorded_at,
            })
        })
        .collect()
}

fn porting_events(entries: &[Observation]) -> Vec<PortingEvent> {
    let mut events = Vec::new();
    let mut last_carrier: Option<String> = None;
    for observation in entries {
        let Some(carrier) = carrier_of(observation) else {
            continue;
        };
        if let Some(previous) = &last_carrier {
            if !previous.eq_ignore_ascii_case(&carrier) {
                events.push(PortingEvent {
                    from_carrier: previous.clone(),
                    to_carrier: carrier.clone(),
                    detected_at: observation.recorded_at,
                    confidence: PORTING_CONFIDENCE,
                });
            }
        }
        last_carrier = Some(carrier);
    }
    events
}

/// Consecutive pairs whose `extract` differs.
fn transitions<T: PartialEq>(entries: &[Observation], extract: impl Fn(&Observation) -> T) -> usize {
    entries
        .windows(2)
        .filter(|pair| extract(&pair[0]) != extract(&pair[1]))
        .count()
}

fn domain_set(observation: &Observation) -> BTreeSet<String> {
    observation
        .values
        .get("domains")
        .and_then(Value::as_array)
        .map(|domains| {
            domains
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_lowercase)
                .collect()
        })
        .unwrap_or_default()
}

fn ownership_analysis(entries: &[Observation]) -> OwnershipAnalysis {
    if entries.len() < 2 {
        return OwnershipAnalysis {
            detected: false,
            confidence_score: 0.0,
            indicators: Vec::new(),
            observations_analyzed: entries.len(),
            recommendation: "Insufficient history for ownership analysis".to_string(),
        };
    }

    let mut indicators = Vec::new();

    let reputations: Vec<f64> = entries.iter().filter_map(|o| o.reputation_score).collect();
    if reputations.len() > 1 {
        let high = reputations.iter().copied().fold(f64::MIN, f64::max);
        let low = reputations.iter().copied().fold(f64::MAX, f64::min);
        if high - low > REPUTATION_SWING {
            indicators.push(OwnershipIndicator {
                kind: OwnershipIndicatorKind::ReputationChange,
                description: format!("Reputation score swung by {:.2}", high - low),
                confidence: 0.7,
            });
        }
    }

    let social_changes = transitions(entries, |o| {
        SOCIAL_FIELDS.map(|field| o.values.get(field).cloned())
    });
    if social_changes > 0 {
        indicators.push(OwnershipIndicator {
            kind: OwnershipIndicatorKind::SocialMediaChanges,
            description: format!("Social presence changed {} times", social_changes),
            confidence: 0.6,
        });
    }

    let domain_changes = transitions(entries, domain_set);
    if domain_changes > 0 {
        indicators.push(OwnershipIndicator {
            kind: OwnershipIndicatorKind::DomainAssociationChanges,
            description: format!("Domain associations changed {} times", domain_changes),
            confidence: 0.8,
        });
    }

    let confidence_score = if indicators.is_empty() {
        0.0
    } else {
        indicators.iter().map(|i| i.confidence).sum::<f64>() / indicators.len() as f64
    };
    let recommendation = if confidence_score > 0.8 {
        "High likelihood of ownership change - recommend manual verification"
    } else if confidence_score > 0.6 {
        "Moderate likelihood of ownership change - monitor for additional indicators"
    } else if confidence_score > 0.3 {
        "Low likelihood of ownership change - continue normal monitoring"
    } else {
        "No significant ownership change indicators detected"
    };

    OwnershipAnalysis {
        detected: confidence_score > OWNERSHIP_THRESHOLD,
        confidence_score,
        indicators,
        observations_analyzed: entries.len(),
        recommendation: recommendation.to_string(),
    }
}

#[derive(Debug, Default)]
pub struct HistoryStore {
    observations: RwLock<HashMap<String, Vec<Observation>>>,
}

impl HistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a snapshot and return it.
    pub async fn record(
        &self,
        e164: &str,
        values: BTreeMap<String, Value>,
        overall_confidence: f64,
        investigation_id: Option<String>,
    ) -> Observation {
        let observation = Observation {
            id: Uuid::new_v4(),
            recorded_at: Utc::now(),
            fingerprint: fingerprint(&values),
            values,
            overall_confidence,
            reputation_score: None,
            investigation_id,
        };
        self.insert(e164, observation).await
    }

    async fn insert(&self, e164: &str, observation: Observation) -> Observation {
        let key = number_key(e164);
        let mut observations = self.observations.write().await;
        let entries = observations.entry(key).or_default();
        entries.push(observation.clone());
        tracing::debug!(
            "Recorded observation {} ({} total for this number)",
            observation.id,
            entries.len()
        );
        observation
    }

    /// Snapshot the winning merged values of an aggregation.
    pub async fn record_intelligence(
        &self,
        e164: &str,
        intel: &AggregatedIntelligence,
        investigation_id: Option<String>,
    ) -> Observation {
        let values: BTreeMap<String, Value> = intel
            .merged_data
            .iter()
            .map(|(field, merged)| (field.clone(), merged.value.clone()))
            .collect();
        let observation = Observation {
            id: Uuid::new_v4(),
            recorded_at: Utc::now(),
            fingerprint: fingerprint(&values),
            values,
            overall_confidence: intel.overall_confidence,
            reputation_score: Some(reputation_score(&intel.merged_data)),
            investigation_id,
        };
        self.insert(e164, observation).await
    }

    /// Every observation for the number, oldest first.
    pub async fn history(&self, e164: &str) -> Vec<Observation> {
        self.observations
            .read()
            .await
            .get(&number_key(e164))
            .cloned()
            .unwrap_or_default()
    }

    pub async fn latest(&self, e164: &str) -> Option<Observation> {
        self.observations
            .read()
            .await
            .get(&number_key(e164))
            .and_then(|entries| entries.last().cloned())
    }

    /// Field-level diff between the two most recent observations.
    pub async fn detect_changes(&self, e164: &str) -> Vec<FieldChange> {
        let observations = self.observations.read().await;
        let Some([previous, current]) = observations
            .get(&number_key(e164))
            .and_then(|entries| entries.len().checked_sub(2).map(|start| &entries[start..]))
        else {
            return Vec::new();
        };
        diff(previous, current)
    }

    /// Carrier transitions across the whole history, oldest first.
    pub async fn detect_porting(&self, e164: &str) -> Vec<PortingEvent> {
        let observations = self.observations.read().await;
        observations
            .get(&number_key(e164))
            .map(|entries| porting_events(entries))
            .unwrap_or_default()
    }

    /// Indicators that the number changed owner across its history.
    pub async fn detect_ownership_changes(&self, e164: &str) -> OwnershipAnalysis {
        let observations = self.observations.read().await;
        let entries = observations
            .get(&number_key(e164))
            .map(Vec::as_slice)
            .unwrap_or(&[]);
        ownership_analysis(entries)
    }

    /// Stability and risk over the whole history of the number.
    pub async fn change_confidence_scoring(&self, e164: &str) -> ChangeScoring {
        let observations = self.observations.read().await;
        let entries = observations
            .get(&number_key(e164))
            .map(Vec::as_slice)
            .unwrap_or(&[]);

        let total_changes: usize = entries.windows(2).map(|pair| diff(&pair[0], &pair[1]).len()).sum();
        let (change_frequency, stability_score) = if entries.is_empty() {
            (0.0, 1.0)
        } else {
            let frequency = total_changes as f64 / entries.len() as f64;
            (frequency, f64::max(0.0, 1.0 - frequency * 2.0))
        };
        let porting = porting_events(entries);
        let ownership = ownership_analysis(entries);

        let mut recommendations = Vec::new();
        if !porting.is_empty() {
            recommendations.push("Verify current carrier through direct API calls".to_string());
        }
        if ownership.detected {
            recommendations.push(
                "Manual verification recommended due to ownership change indicators".to_string(),
            );
        }
        if change_frequency > 0.5 {
            recommendations.push("High change frequency detected - monitor closely".to_string());
        }
        if recommendations.is_empty() {
            recommendations.push("No special verification requirements detected".to_string());
        }

        ChangeScoring {
            stability_score,
            change_frequency,
            total_observations: entries.len(),
            total_changes,
            porting_confidence: porting.iter().map(|e| e.confidence).fold(0.0, f64::max),
            ownership_change_confidence: ownership.confidence_score,
            overall_confidence: ((stability_score + (1.0 - change_frequency)) / 2.0).clamp(0.0, 1.0),
            risk_level: ChangeRisk::from_parts(
                stability_score,
                change_frequency,
                ownership.confidence_score,
            ),
            recommendations,
        }
    }

    /// Observations recorded under an investigation, across all numbers.
    pub async fn investigation_history(&self, investigation_id: &str) -> Vec<Observation> {
        let observations = self.observations.read().await;
        let mut matching: Vec<Observation> = observations
            .values()
            .flatten()
            .filter(|o| o.investigation_id.as_deref() == Some(investigation_id))
            .cloned()
            .collect();
        matching.sort_by_key(|o| o.recorded_at);
        matching
    }

    /// Drop observations recorded before `cutoff`. Returns how many went.
    pub async fn prune_older_than(&self, cutoff: DateTime<Utc>) -> usize {
        let mut observations = self.observations.write().await;
        let mut removed = 0;
        observations.retain(|_, entries| {
            let before = entries.len();
            entries.retain(|o| o.recorded_at >= cutoff);
            removed += before - entries.len();
            !entries.is_empty()
        });
        if removed > 0 {
            tracing::info!("Pruned {} observations older than {}", removed, cutoff);
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn values(pairs: &[(&str, Value)]) -> BTreeMap<String, Value> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
    }

    #[test]
    fn test_number_key_is_sha256_hex() {
        let key = number_key("+919876543210");
        assert_eq!(key.len(), 64);
        assert_eq!(key, number_key(" +919876543210 "));
        assert_ne!(key, number_key("+919876543211"));
    }

    #[tokio::test]
    async fn test_record_and_latest() {
        let store = HistoryStore::new();
        assert!(store.latest("+919876543210").await.is_none());

        let first = store
            .record("+919876543210", values(&[("carrier", json!("Jio"))]), 70.0, None)
            .await;
        let second = store
            .record(
                "+919876543210",
                values(&[("carrier", json!("Jio"))]),
                72.0,
                Some("case-7".into()),
            )
            .await;

        assert_ne!(first.id, second.id);
        assert_eq!(first.fingerprint, second.fingerprint);
        assert_eq!(store.history("+919876543210").await.len(), 2);
        assert_eq!(store.latest("+919876543210").await, Some(second));
        assert_eq!(store.investigation_history("case-7").await.len(), 1);
    }

    #[tokio::test]
    async fn test_detect_changes_between_last_two() {
        let store = HistoryStore::new();
        let number = "+919876543210";
        store
            .record(number, values(&[("carrier", json!("Jio")), ("location", json!("Delhi"))]), 70.0, None)
            .await;
        assert!(store.detect_changes(number).await.is_empty());

        store
            .record(
                number,
                values(&[("carrier", json!("Airtel")), ("location", json!("Delhi")), ("state", json!("Delhi"))]),
                70.0,
                None,
            )
            .await;
        let changes = store.detect_changes(number).await;
        assert_eq!(changes.len(), 2);
        assert_eq!(changes[0].field, "carrier");
        assert_eq!(changes[0].confidence, 0.9);
        assert_eq!(changes[1].field, "state");
        assert_eq!(changes[1].previous, None);
        assert_eq!(changes[1].confidence, 0.5);
    }

    #[tokio::test]
    async fn test_detect_porting_ignores_case_and_gaps() {
        let store = HistoryStore::new();
        let number = "+919876543210";
        for carrier in [json!("Jio"), json!("jio"), Value::Null, json!("Airtel"), json!("Vi")] {
            store.record(number, values(&[("carrier", carrier)]), 60.0, None).await;
        }
        let events = store.detect_porting(number).await;
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].from_carrier, "jio");
        assert_eq!(events[0].to_carrier, "Airtel");
        assert_eq!(events[1].to_carrier, "Vi");
        assert!(events.iter().all(|e| e.confidence == 0.8));
    }

    async fn record_with_reputation(
        store: &HistoryStore,
        number: &str,
        fields: &[(&str, Value)],
        reputation: f64,
    ) {
        let values = values(fields);
        let observation = Observation {
            id: Uuid::new_v4(),
            recorded_at: Utc::now(),
            fingerprint: fingerprint(&values),
            values,
            overall_confidence: 70.0,
            reputation_score: Some(reputation),
            investigation_id: None,
        };
        store.insert(number, observation).await;
    }

    #[tokio::test]
    async fn test_ownership_needs_two_observations() {
        let store = HistoryStore::new();
        let number = "+919876543210";
        store.record(number, values(&[("carrier", json!("Jio"))]), 70.0, None).await;

        let analysis = store.detect_ownership_changes(number).await;
        assert!(!analysis.detected);
        assert_eq!(analysis.confidence_score, 0.0);
        assert_eq!(analysis.observations_analyzed, 1);
    }

    #[tokio::test]
    async fn test_ownership_change_from_reputation_and_domains() {
        let store = HistoryStore::new();
        let number = "+919876543210";
        record_with_reputation(&store, number, &[("domains", json!(["acme.com"]))], 0.9).await;
        record_with_reputation(&store, number, &[("domains", json!(["ACME.com"]))], 0.85).await;
        record_with_reputation(&store, number, &[("domains", json!(["shady.biz"]))], 0.2).await;

        let analysis = store.detect_ownership_changes(number).await;
        let kinds: Vec<_> = analysis.indicators.iter().map(|i| i.kind).collect();
        assert_eq!(
            kinds,
            vec![
                OwnershipIndicatorKind::ReputationChange,
                OwnershipIndicatorKind::DomainAssociationChanges
            ]
        );
        assert!((analysis.confidence_score - 0.75).abs() < 1e-9);
        assert!(analysis.detected);
        assert!(analysis.recommendation.starts_with("Moderate"));
    }

    #[tokio::test]
    async fn test_social_changes_alone_stay_below_threshold() {
        let store = HistoryStore::new();
        let number = "+14155552671";
        for present in [false, true] {
            store
                .record(number, values(&[("whatsapp_presence", json!(present))]), 60.0, None)
                .await;
        }
        let analysis = store.detect_ownership_changes(number).await;
        assert_eq!(analysis.indicators.len(), 1);
        assert_eq!(analysis.indicators[0].kind, OwnershipIndicatorKind::SocialMediaChanges);
        assert!(!analysis.detected);
    }

    #[tokio::test]
    async fn test_change_scoring_for_stable_and_ported_numbers() {
        let store = HistoryStore::new();
        let scoring = store.change_confidence_scoring("+919876543210").await;
        assert_eq!(scoring.total_observations, 0);
        assert_eq!(scoring.stability_score, 1.0);
        assert_eq!(scoring.risk_level, ChangeRisk::Minimal);

        let number = "+919876543210";
        for carrier in ["Jio", "Jio", "Airtel", "Vi"] {
            store.record(number, values(&[("carrier", json!(carrier))]), 70.0, None).await;
        }
        let scoring = store.change_confidence_scoring(number).await;
        assert_eq!(scoring.total_observations, 4);
        assert_eq!(scoring.total_changes, 2);
        assert!((scoring.change_frequency - 0.5).abs() < 1e-9);
        assert_eq!(scoring.stability_score, 0.0);
        assert_eq!(scoring.porting_confidence, 0.8);
        assert_eq!(scoring.risk_level, ChangeRisk::Medium);
        assert_eq!(
            scoring.recommendations,
            vec!["Verify current carrier through direct API calls".to_string()]
        );
    }

    #[tokio::test]
    async fn test_prune_older_than() {
        let store = HistoryStore::new();
        store.record("+14155552671", BTreeMap::new(), 10.0, None).await;
        assert_eq!(store.prune_older_than(Utc::now() - chrono::Duration::hours(1)).await, 0);
        assert_eq!(store.prune_older_than(Utc::now() + chrono::Duration::seconds(1)).await, 1);
        assert!(store.history("+14155552671").await.is_empty());
    }
}
