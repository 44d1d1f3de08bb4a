//! Structural analysis of a phone number against its numeric neighbourhood.
//!
//! Everything here is deterministic and offline: the engine only parses and
//! compares digits, so the same input always yields the same findings.

use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use crate::errors::ModelError;
use crate::models::{
    AllocationType, BulkRegistrationBlock, CarrierBlock, Priority, RelatedNumber,
    RelationshipType, RiskLevel, SequenceType, SequentialPattern,
};
use crate::phone::{default_carrier_table, CarrierTable, NumberFormatter, ParsedNumber};

// ============ Configuration ============

/// Every heuristic constant used by the engine.
#[derive(Debug, Clone)]
pub struct PatternConfig {
    /// Numeric neighbours checked on each side of the number.
    pub sequential_window: u64,
    /// Upper bound on the offset of any related candidate, variations included.
    pub related_window: u64,
    pub max_related: usize,
    /// Distance below which numeric closeness contributes to relationship confidence.
    pub sequential_threshold: u64,
    /// Minimum positional digit similarity for a pattern variation.
    pub min_variation_similarity: f64,
    /// Score a bulk finding must reach to count as detected.
    pub bulk_detection_threshold: f64,
    pub high_priority_bulk_confidence: f64,
    pub high_confidence_related: f64,
    /// Related-number score that still merits a follow-up.
    pub medium_confidence_related: f64,
    /// Leading national digits known to be handed out in bulk, per region.
    /// Only numbers with a resolved carrier are checked.
    pub bulk_prefixes: BTreeMap<String, Vec<String>>,
    pub carrier_prefixes: CarrierTable,
    /// National prefixes that imply a special allocation, checked in order.
    pub allocation_prefixes: Vec<(AllocationType, Vec<String>)>,
}

impl Default for PatternConfig {
    fn default() -> Self {
        let strings = |items: &[&str]| items.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        Self {
            sequential_window: 5,
            related_window: 10,
            max_related: 20,
            sequential_threshold: 10,
            min_variation_similarity: 0.5,
            bulk_detection_threshold: 0.2,
            high_priority_bulk_confidence: 0.7,
            high_confidence_related: 0.9,
            medium_confidence_related: 0.7,
            bulk_prefixes: BTreeMap::from([(
                "IN".to_string(),
                strings(&["9000", "9001", "9002", "8000", "8001", "7000"]),
            )]),
            carrier_prefixes: default_carrier_table(),
            allocation_prefixes: vec![
                (AllocationType::TollFree, strings(&["1800", "1860"])),
                (AllocationType::Premium, strings(&["900"])),
                (AllocationType::Voip, strings(&["560", "561", "562"])),
            ],
        }
    }
}

impl PatternConfig {
    /// Rejects thresholds outside `[0, 1]` and a zero sequential threshold.
    pub fn validate(&self) -> Result<(), ModelError> {
        ModelError::check_range("min_variation_similarity", self.min_variation_similarity, 0.0, 1.0)?;
        ModelError::check_range("bulk_detection_threshold", self.bulk_detection_threshold, 0.0, 1.0)?;
        ModelError::check_range(
            "high_priority_bulk_confidence",
            self.high_priority_bulk_confidence,
            0.0,
            1.0,
        )?;
        ModelError::check_range("high_confidence_related", self.high_confidence_related, 0.0, 1.0)?;
        ModelError::check_range(
            "medium_confidence_related",
            self.medium_confidence_related,
            0.0,
            1.0,
        )?;
        ModelError::check_range(
            "sequential_threshold",
            self.sequential_threshold as f64,
            1.0,
            f64::MAX,
        )?;
        Ok(())
    }
}

// ============ Analysis Results ============

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BulkRegistrationAnalysis {
    pub detected: bool,
    pub confidence_score: f64,
    pub indicators: Vec<String>,
    pub risk_assessment: RiskLevel,
    pub block: Option<BulkRegistrationBlock>,
    pub investigation_notes: Vec<String>,
}

impl BulkRegistrationAnalysis {
    fn baseline(note: &str) -> Self {
        Self {
            detected: false,
            confidence_score: 0.0,
            indicators: Vec::new(),
            risk_assessment: RiskLevel::Low,
            block: None,
            investigation_notes: vec![note.to_string()],
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SequentialAnalysis {
    pub found: bool,
    pub patterns: Vec<SequentialPattern>,
    pub confidence_score: f64,
    pub business_likelihood: f64,
    pub investigation_priority: Priority,
}

impl SequentialAnalysis {
    fn empty() -> Self {
        Self {
            found: false,
            patterns: Vec::new(),
            confidence_score: 0.0,
            business_likelihood: 0.0,
            investigation_priority: Priority::Low,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CarrierBlockAnalysis {
    pub detected: bool,
    pub block: Option<CarrierBlock>,
    pub confidence_score: f64,
}

impl CarrierBlockAnalysis {
    fn empty() -> Self {
        Self {
            detected: false,
            block: None,
            confidence_score: 0.0,
        }
    }
}

/// A follow-up suggestion derived from the analyses.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InvestigationPriority {
    pub priority: Priority,
    pub category: String,
    pub description: String,
    pub recommended_actions: Vec<String>,
}

/// All four analyses for one number.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PatternAnalysis {
    pub phone_number: String,
    pub region: String,
    pub related_numbers: Vec<RelatedNumber>,
    pub bulk_registration: BulkRegistrationAnalysis,
    pub sequential_patterns: SequentialAnalysis,
    pub carrier_block: CarrierBlockAnalysis,
}

impl PatternAnalysis {
    /// Overall confidence in `[0, 95]` for reporting as a source result.
    pub fn source_confidence(&self) -> f64 {
        let mut confidence = 50.0;
        if self.bulk_registration.detected {
            confidence += self.bulk_registration.confidence_score * 30.0;
        }
        if self.sequential_patterns.found {
            confidence += self.sequential_patterns.confidence_score * 20.0;
        }
        if self.carrier_block.detected {
            confidence += self.carrier_block.confidence_score * 20.0;
        }
        if !self.related_numbers.is_empty() {
            let avg = self
                .related_numbers
                .iter()
                .map(|r| r.confidence_score())
                .sum::<f64>()
                / self.related_numbers.len() as f64;
            confidence += avg * 30.0;
        }
        f64::min(confidence, 95.0)
    }
}

// ============ Engine ============

/// Deterministic pattern detector. Cheap to clone; the formatter cache is shared.
#[derive(Debug, Clone)]
pub struct PatternAnalysisEngine {
    config: Arc<PatternConfig>,
    formatter: NumberFormatter,
}

impl Default for PatternAnalysisEngine {
    fn default() -> Self {
        let config = PatternConfig::default();
        let formatter = NumberFormatter::with_carrier_table(config.carrier_prefixes.clone());
        Self {
            config: Arc::new(config),
            formatter,
        }
    }
}

impl PatternAnalysisEngine {
    pub fn new(config: PatternConfig) -> Result<Self, ModelError> {
        config.validate()?;
        let formatter = NumberFormatter::with_carrier_table(config.carrier_prefixes.clone());
        Ok(Self {
            config: Arc::new(config),
            formatter,
        })
    }

    pub fn config(&self) -> &PatternConfig {
        &self.config
    }

    /// Formatter loaded with this engine's carrier tables.
    pub fn formatter(&self) -> &NumberFormatter {
        &self.formatter
    }

    fn parse(&self, number: &str, region: &str) -> Option<Arc<ParsedNumber>> {
        match self.formatter.parse(number, region) {
            Ok(parsed) => Some(parsed),
            Err(e) => {
                tracing::debug!("Pattern analysis skipped for '{}': {}", number, e);
                None
            }
        }
    }

    /// Run every analysis on one number.
    pub fn analyze(&self, number: &str, region: &str) -> PatternAnalysis {
        PatternAnalysis {
            phone_number: number.to_string(),
            region: region.to_string(),
            related_numbers: self.find_related_numbers(number, region),
            bulk_registration: self.detect_bulk_registration(number, region),
            sequential_patterns: self.analyze_sequential_patterns(number, region),
            carrier_block: self.analyze_carrier_block(number, region),
        }
    }

    // ============ Related Numbers ============

    /// Find numbers likely allocated alongside `number`.
    ///
    /// Sequential neighbours within `sequential_window` come first, then digit
    /// rearrangements of the trailing group whose offset stays inside
    /// `related_window`. The result is sorted by confidence (stable) and capped
    /// at `max_related`.
    pub fn find_related_numbers(&self, number: &str, region: &str) -> Vec<RelatedNumber> {
        let Some(base) = self.parse(number, region) else {
            tracing::warn!("Could not parse '{}' for related-number search", number);
            return Vec::new();
        };
        let digits = base.national_digits();
        let value = base.national_number();
        let mut seen: HashSet<String> = HashSet::new();
        let mut related = Vec::new();

        let window = self.config.sequential_window as i128;
        for offset in (-window..=window).filter(|o| *o != 0) {
            let Some(candidate) = offset_digits(value, offset, digits.len()) else {
                continue;
            };
            seen.insert(candidate.clone());
            let e164 = format!("+{}{}", base.country_code(), candidate);
            let confidence = self.calculate_relationship_confidence(base.e164(), &e164, region);
            let mut evidence = vec![format!("Sequential offset: {}", offset)];
            evidence.extend(self.shared_evidence(&base, &e164, region));
            self.push_related(&mut related, e164, RelationshipType::Sequential, confidence, evidence);
        }

        for variant in digit_variations(digits) {
            if variant == digits || seen.contains(&variant) {
                continue;
            }
            let Ok(variant_value) = variant.parse::<u64>() else {
                continue;
            };
            let offset = variant_value as i128 - value as i128;
            if offset.unsigned_abs() > self.config.related_window as u128 {
                continue;
            }
            let similarity = digit_similarity(digits, &variant);
            if similarity < self.config.min_variation_similarity {
                continue;
            }
            seen.insert(variant.clone());
            let e164 = format!("+{}{}", base.country_code(), variant);
            let confidence = self.calculate_relationship_confidence(base.e164(), &e164, region);
            let evidence = vec![
                format!("Digit pattern variation (offset {})", offset),
                format!("Digit similarity: {:.2}", similarity),
            ];
            self.push_related(
                &mut related,
                e164,
                RelationshipType::PatternVariation,
                confidence,
                evidence,
            );
        }

        related.sort_by(|a, b| b.confidence_score().total_cmp(&a.confidence_score()));
        related.truncate(self.config.max_related);
        tracing::debug!("Found {} related numbers for {}", related.len(), base.e164());
        related
    }

    fn push_related(
        &self,
        related: &mut Vec<RelatedNumber>,
        number: String,
        relationship: RelationshipType,
        confidence: f64,
        evidence: Vec<String>,
    ) {
        let priority = if confidence >= self.config.high_confidence_related {
            Priority::High
        } else if confidence >= self.config.medium_confidence_related {
            Priority::Medium
        } else {
            Priority::Low
        };
        match RelatedNumber::new(number, relationship, confidence, evidence, priority) {
            Ok(candidate) => related.push(candidate),
            Err(e) => tracing::error!("Discarding related candidate: {}", e),
        }
    }

    fn shared_evidence(&self, base: &ParsedNumber, other: &str, region: &str) -> Vec<String> {
        let Some(other) = self.parse(other, region) else {
            return Vec::new();
        };
        let mut evidence = Vec::new();
        if let (Some(a), Some(b)) = (base.carrier(), other.carrier()) {
            if a == b {
                evidence.push(format!("Same carrier: {}", a));
            }
        }
        if let (Some(a), Some(b)) = (base.geo_description(), other.geo_description()) {
            if a == b {
                evidence.push(format!("Same location: {}", a));
            }
        }
        evidence
    }

    /// Score in `[0, 1]` for how likely two numbers belong together.
    ///
    /// Returns exactly `0.0` when either side fails to parse.
    pub fn calculate_relationship_confidence(&self, a: &str, b: &str, region: &str) -> f64 {
        let (Some(pa), Some(pb)) = (self.parse(a, region), self.parse(b, region)) else {
            return 0.0;
        };
        let mut confidence = 0.0;

        if pa.country_code() == pb.country_code() {
            let distance = pa.national_number().abs_diff(pb.national_number());
            let threshold = self.config.sequential_threshold;
            if distance == 0 {
                confidence += 0.4;
            } else if distance <= threshold {
                confidence += 0.4 * (1.0 - (distance - 1) as f64 / threshold as f64);
            }
        }

        if let (Some(ca), Some(cb)) = (pa.carrier(), pb.carrier()) {
            if ca == cb {
                confidence += 0.2;
            }
        }
        if let (Some(ga), Some(gb)) = (pa.geo_description(), pb.geo_description()) {
            if ga == gb {
                confidence += 0.15;
            }
        }
        confidence += digit_similarity(pa.national_digits(), pb.national_digits()) * 0.25;

        f64::min(confidence, 1.0)
    }

    // ============ Bulk Registration ============

    pub fn detect_bulk_registration(&self, number: &str, region: &str) -> BulkRegistrationAnalysis {
        let Some(parsed) = self.parse(number, region) else {
            return BulkRegistrationAnalysis::baseline("Number could not be parsed");
        };
        let digits = parsed.national_digits();
        let mut score: f64 = 0.0;
        let mut indicators = Vec::new();
        let mut notes = Vec::new();
        let mut block_exponent: Option<u32> = None;

        let zeros = digits.chars().rev().take_while(|c| *c == '0').count() as u32;
        if zeros >= 2 {
            score += f64::min(0.2 * zeros as f64, 0.6);
            indicators.push("round_number_ending".to_string());
            notes.push(format!("Number ends in {} zeros", zeros));
            block_exponent = Some(zeros.min(6));
        }

        if let Some(tail) = trailing_value(digits, 3) {
            if tail < 100 && tail % 10 == 0 {
                score += 0.3;
                indicators.push("consecutive_pattern".to_string());
                notes.push("Number sits at the start of an aligned 1000-number block".to_string());
                block_exponent = Some(block_exponent.map_or(3, |e| e.max(3)));
            }
        }

        let bulk_prefix = parsed.carrier().and_then(|carrier| {
            self.config
                .bulk_prefixes
                .get(parsed.region_code())?
                .iter()
                .find(|p| digits.starts_with(p.as_str()))
                .map(|prefix| (carrier, prefix))
        });
        if let Some((carrier, prefix)) = bulk_prefix {
            score += 0.25;
            indicators.push("carrier_bulk_pattern".to_string());
            notes.push(format!("Prefix {} is a {} bulk allocation", prefix, carrier));
        }

        if has_range_pattern(digits) {
            score += 0.2;
            indicators.push("range_pattern".to_string());
            notes.push("Trailing digits form a repeated or monotone run".to_string());
        }

        let score = f64::min(score, 1.0);
        let risk = RiskLevel::from_score(score);
        // A repeated or monotone run alone is common in ordinary numbers.
        let detected = indicators.iter().any(|i| i != "range_pattern")
            && score >= self.config.bulk_detection_threshold;

        let block = block_exponent.filter(|_| detected).and_then(|exp| {
            let span = digits.len().min(exp as usize);
            let head = &digits[..digits.len() - span];
            let start = format!("+{}{}{}", parsed.country_code(), head, "0".repeat(span));
            let end = format!("+{}{}{}", parsed.country_code(), head, "9".repeat(span));
            notes.push(format!("Check for other numbers in range {} to {}", start, end));
            BulkRegistrationBlock::new(
                start,
                end,
                10u64.pow(span as u32),
                score,
                indicators.clone(),
                risk,
            )
            .map_err(|e| tracing::error!("Discarding bulk block: {}", e))
            .ok()
        });

        if detected {
            tracing::info!(
                "Bulk registration indicators for {}: {:?} (score {:.2})",
                parsed.e164(),
                indicators,
                score
            );
        }

        BulkRegistrationAnalysis {
            detected,
            confidence_score: score,
            indicators,
            risk_assessment: risk,
            block,
            investigation_notes: notes,
        }
    }

    // ============ Sequential Patterns ============

    pub fn analyze_sequential_patterns(&self, number: &str, region: &str) -> SequentialAnalysis {
        let Some(parsed) = self.parse(number, region) else {
            return SequentialAnalysis::empty();
        };
        let digits = parsed.national_digits();
        let finders: [(f64, Option<SequentialPattern>); 3] = [
            (0.4, self.find_consecutive(&parsed)),
            (0.3, self.find_increment(&parsed)),
            (0.2, self.find_alternating(&parsed)),
        ];

        let mut confidence: f64 = 0.0;
        let mut business: f64 = 0.0;
        let mut patterns = Vec::new();
        for (weight, pattern) in finders {
            if let Some(pattern) = pattern {
                confidence += weight * pattern.confidence_score();
                match pattern.sequence_type() {
                    SequenceType::Consecutive => business += 0.3,
                    SequenceType::IncrementPattern => business += 0.4,
                    SequenceType::Alternating => {}
                }
                patterns.push(pattern);
            }
        }
        if patterns.is_empty() {
            return SequentialAnalysis::empty();
        }
        confidence += 0.1 * (patterns.len() - 1) as f64;

        if digits.ends_with("00") {
            business += 0.2;
        }
        let mut counts: BTreeMap<char, usize> = BTreeMap::new();
        for c in digits.chars() {
            *counts.entry(c).or_default() += 1;
        }
        if counts.values().any(|n| *n >= 4) {
            business += 0.1;
        }

        let confidence = f64::min(confidence, 1.0);
        let business = f64::min(business, 1.0);
        let priority = if confidence >= 0.6 && business >= 0.7 {
            Priority::High
        } else if confidence >= 0.4 {
            Priority::Medium
        } else {
            Priority::Low
        };

        SequentialAnalysis {
            found: true,
            patterns,
            confidence_score: confidence,
            business_likelihood: business,
            investigation_priority: priority,
        }
    }

    fn e164_of(&self, parsed: &ParsedNumber, digits: &str) -> String {
        format!("+{}{}", parsed.country_code(), digits)
    }

    fn find_consecutive(&self, parsed: &ParsedNumber) -> Option<SequentialPattern> {
        if monotone_tail_len(parsed.national_digits()) < 3 {
            return None;
        }
        let width = parsed.national_digits().len();
        let window = self.config.sequential_window as i128;
        let numbers: Vec<String> = (-window..=window)
            .filter_map(|o| offset_digits(parsed.national_number(), o, width))
            .map(|d| self.e164_of(parsed, &d))
            .collect();
        SequentialPattern::new(parsed.e164(), SequenceType::Consecutive, numbers, 0.8, 0.6).ok()
    }

    fn find_increment(&self, parsed: &ParsedNumber) -> Option<SequentialPattern> {
        let value = parsed.national_number();
        let step = [1000u64, 100, 10].into_iter().find(|s| value % s == 0)?;
        let width = parsed.national_digits().len();
        let numbers: Vec<String> = (-2i128..=2)
            .filter_map(|i| offset_digits(value, i * step as i128, width))
            .map(|d| self.e164_of(parsed, &d))
            .collect();
        SequentialPattern::new(parsed.e164(), SequenceType::IncrementPattern, numbers, 0.6, 0.7)
            .ok()
    }

    fn find_alternating(&self, parsed: &ParsedNumber) -> Option<SequentialPattern> {
        let digits: Vec<char> = parsed.national_digits().chars().collect();
        let n = digits.len();
        if n < 5 {
            return None;
        }
        let abab = digits[n - 4] == digits[n - 2]
            && digits[n - 3] == digits[n - 1]
            && digits[n - 4] != digits[n - 3];
        let tail = &digits[n - 5..];
        let palindrome = tail.iter().eq(tail.iter().rev()) && tail.iter().any(|c| *c != tail[0]);
        if !abab && !palindrome {
            return None;
        }
        let mut numbers = vec![parsed.e164().to_string()];
        if abab {
            let mut swapped = digits.clone();
            swapped.swap(n - 2, n - 1);
            swapped.swap(n - 4, n - 3);
            let swapped: String = swapped.into_iter().collect();
            numbers.push(self.e164_of(parsed, &swapped));
        }
        SequentialPattern::new(parsed.e164(), SequenceType::Alternating, numbers, 0.5, 0.3).ok()
    }

    // ============ Carrier Block ============

    pub fn analyze_carrier_block(&self, number: &str, region: &str) -> CarrierBlockAnalysis {
        let Some(parsed) = self.parse(number, region) else {
            return CarrierBlockAnalysis::empty();
        };
        let digits = parsed.national_digits();
        let carrier = self.formatter.lookup_carrier(parsed.region_code(), digits);

        let prefix_allocation = self.config.allocation_prefixes.iter().find_map(|(kind, prefixes)| {
            prefixes
                .iter()
                .find(|p| digits.starts_with(p.as_str()))
                .map(|p| (*kind, p.clone()))
        });
        let allocation = match &prefix_allocation {
            Some((kind, _)) => *kind,
            None => match parsed.number_type() {
                "toll_free" => AllocationType::TollFree,
                "premium_rate" => AllocationType::Premium,
                "voip" => AllocationType::Voip,
                "shared_cost" => AllocationType::SharedCost,
                _ => AllocationType::Standard,
            },
        };

        if carrier.is_none() && allocation == AllocationType::Standard {
            return CarrierBlockAnalysis::empty();
        }

        let mut confidence = match &carrier {
            Some((_, prefix)) => f64::min(0.5 + 0.1 * prefix.len() as f64, 0.9),
            None => 0.3,
        };
        if allocation != AllocationType::Standard {
            confidence += 0.3;
        }
        let confidence = f64::min(confidence, 1.0);

        let block_prefix = carrier
            .as_ref()
            .map(|(_, p)| p.clone())
            .or_else(|| prefix_allocation.as_ref().map(|(_, p)| p.clone()))
            .unwrap_or_else(|| digits.chars().take(4).collect());
        let carrier_name = carrier
            .as_ref()
            .map(|(c, _)| c.clone())
            .unwrap_or_else(|| "Unknown".to_string());

        let mut characteristics = BTreeMap::new();
        characteristics.insert("region".to_string(), parsed.region_code().to_string());
        characteristics.insert("number_type".to_string(), parsed.number_type().to_string());
        characteristics.insert("prefix_length".to_string(), block_prefix.len().to_string());
        characteristics.insert("allocation".to_string(), allocation.as_str().to_string());

        match CarrierBlock::new(carrier_name, block_prefix, allocation, characteristics, confidence) {
            Ok(block) => CarrierBlockAnalysis {
                detected: true,
                block: Some(block),
                confidence_score: confidence,
            },
            Err(e) => {
                tracing::error!("Discarding carrier block: {}", e);
                CarrierBlockAnalysis::empty()
            }
        }
    }

    // ============ Priorities ============

    /// Follow-up suggestions, highest priority first and stable among equals.
    pub fn suggest_investigation_priorities(
        &self,
        analysis: &PatternAnalysis,
    ) -> Vec<InvestigationPriority> {
        let mut priorities = Vec::new();
        let actions = |items: &[&str]| items.iter().map(|s| s.to_string()).collect::<Vec<_>>();

        let bulk = &analysis.bulk_registration;
        if bulk.detected && bulk.confidence_score >= self.config.high_priority_bulk_confidence {
            priorities.push(InvestigationPriority {
                priority: Priority::High,
                category: "Bulk Registration Investigation".to_string(),
                description: "Number appears to be part of a bulk registration block".to_string(),
                recommended_actions: actions(&[
                    "Investigate other numbers in the same block",
                    "Check for coordinated activity",
                    "Analyze registration timing",
                ]),
            });
        }

        let strongest = analysis
            .related_numbers
            .iter()
            .filter(|r| r.confidence_score() >= self.config.high_confidence_related)
            .count();
        if strongest > 0 {
            priorities.push(InvestigationPriority {
                priority: Priority::High,
                category: "Related Number Investigation".to_string(),
                description: format!("Found {} very closely related numbers", strongest),
                recommended_actions: actions(&[
                    "Investigate each related number individually",
                    "Look for shared registration details",
                ]),
            });
        }

        let sequential = &analysis.sequential_patterns;
        if sequential.found && sequential.business_likelihood >= 0.6 {
            priorities.push(InvestigationPriority {
                priority: Priority::Medium,
                category: "Business Connection Investigation".to_string(),
                description: "Sequential patterns suggest an organizational allocation".to_string(),
                recommended_actions: actions(&[
                    "Investigate related sequential numbers",
                    "Check business registration records",
                ]),
            });
        }

        if analysis.carrier_block.detected {
            priorities.push(InvestigationPriority {
                priority: Priority::Low,
                category: "Carrier Block Analysis".to_string(),
                description: "Number belongs to an identifiable carrier allocation block".to_string(),
                recommended_actions: actions(&[
                    "Research carrier allocation policies",
                    "Check other numbers in the same block",
                ]),
            });
        }

        priorities.sort_by(|a, b| b.priority.cmp(&a.priority));
        priorities
    }
}

// ============ Digit Helpers ============

/// `value + offset` zero-padded to `width`, or `None` if it leaves the range.
fn offset_digits(value: u64, offset: i128, width: usize) -> Option<String> {
    let candidate = value as i128 + offset;
    if candidate < 0 {
        return None;
    }
    let digits = format!("{:0width$}", candidate, width = width);
    (digits.len() == width).then_some(digits)
}

/// Fraction of aligned positions with equal digits, over the longer length.
pub(crate) fn digit_similarity(a: &str, b: &str) -> f64 {
    let longest = a.len().max(b.len());
    if longest == 0 {
        return 0.0;
    }
    let matches = a.chars().zip(b.chars()).filter(|(x, y)| x == y).count();
    matches as f64 / longest as f64
}

/// Adjacent swaps and rotations of the trailing three digits.
fn digit_variations(digits: &str) -> Vec<String> {
    let chars: Vec<char> = digits.chars().collect();
    let n = chars.len();
    if n < 3 {
        return Vec::new();
    }
    let mut variants = Vec::new();
    for i in [n - 2, n - 3] {
        let mut swapped = chars.clone();
        swapped.swap(i, i + 1);
        variants.push(swapped.into_iter().collect());
    }
    let mut left = chars.clone();
    left[n - 3..].rotate_left(1);
    variants.push(left.into_iter().collect());
    let mut right = chars;
    right[n - 3..].rotate_right(1);
    variants.push(right.into_iter().collect());
    variants
}

fn trailing_value(digits: &str, count: usize) -> Option<u64> {
    digits
        .len()
        .checked_sub(count)
        .and_then(|start| digits[start..].parse().ok())
}

/// Length of the trailing run whose digits step by a constant +1 or -1.
fn monotone_tail_len(digits: &str) -> usize {
    let values: Vec<i32> = digits.chars().filter_map(|c| c.to_digit(10)).map(|d| d as i32).collect();
    if values.len() < 2 {
        return values.len();
    }
    let n = values.len();
    let step = values[n - 1] - values[n - 2];
    if step.abs() != 1 {
        return 1;
    }
    let mut run = 2;
    while run < n && values[n - run] - values[n - run - 1] == step {
        run += 1;
    }
    run
}

/// Last four digits all equal or stepping monotonically.
fn has_range_pattern(digits: &str) -> bool {
    if digits.len() < 4 {
        return false;
    }
    let tail = &digits[digits.len() - 4..];
    let first = tail.chars().next();
    tail.chars().all(|c| Some(c) == first) || monotone_tail_len(tail) >= 4
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> PatternAnalysisEngine {
        PatternAnalysisEngine::default()
    }

    #[test]
    fn test_related_numbers_stay_within_window() {
        let engine = engine();
        let base = 9_876_543_210i128;
        let related = engine.find_related_numbers("9876543210", "IN");

        assert!(!related.is_empty());
        assert!(related.len() <= engine.config().max_related);
        for candidate in &related {
            let national: i128 = candidate.number()["+91".len()..].parse().unwrap();
            assert!((national - base).unsigned_abs() <= engine.config().related_window as u128);
            assert_ne!(candidate.number(), "+919876543210");
        }
        for pair in related.windows(2) {
            assert!(pair[0].confidence_score() >= pair[1].confidence_score());
        }
    }

    #[test]
    fn test_related_numbers_include_swap_variation() {
        let related = engine().find_related_numbers("9876543210", "IN");
        let swap = related
            .iter()
            .find(|r| r.number() == "+919876543201")
            .expect("adjacent swap within window");
        assert_eq!(swap.relationship_type(), RelationshipType::PatternVariation);
    }

    #[test]
    fn test_related_numbers_evidence_names_offset() {
        let related = engine().find_related_numbers("9876543210", "IN");
        let neighbour = related
            .iter()
            .find(|r| r.number() == "+919876543211")
            .unwrap();
        assert_eq!(neighbour.relationship_type(), RelationshipType::Sequential);
        assert!(neighbour.evidence().contains(&"Sequential offset: 1".to_string()));
    }

    #[test]
    fn test_unparseable_number_yields_nothing() {
        let engine = engine();
        assert!(engine.find_related_numbers("hello", "IN").is_empty());
        let bulk = engine.detect_bulk_registration("hello", "IN");
        assert!(!bulk.detected);
        assert_eq!(bulk.confidence_score, 0.0);
        assert!(!engine.analyze_sequential_patterns("hello", "IN").found);
        assert!(!engine.analyze_carrier_block("hello", "IN").detected);
    }

    #[test]
    fn test_bulk_detection_on_round_number() {
        let bulk = engine().detect_bulk_registration("9876543000", "IN");
        assert!(bulk.detected);
        assert!(bulk.confidence_score >= 0.3);
        assert!(bulk.indicators.contains(&"round_number_ending".to_string()));
        assert!(bulk.indicators.contains(&"consecutive_pattern".to_string()));
        assert_eq!(bulk.risk_assessment, RiskLevel::Critical);
        let block = bulk.block.unwrap();
        assert_eq!(block.block_start(), "+919876543000");
        assert_eq!(block.block_end(), "+919876543999");
        assert_eq!(block.block_size(), 1000);
    }

    #[test]
    fn test_no_bulk_detection_on_irregular_number() {
        let bulk = engine().detect_bulk_registration("9876543217", "IN");
        assert!(!bulk.detected);
        assert!(bulk.indicators.is_empty());
        assert!(bulk.confidence_score < 0.3);
        assert!(bulk.block.is_none());
    }

    #[test]
    fn test_bulk_prefix_indicator() {
        let bulk = engine().detect_bulk_registration("9000123457", "IN");
        assert!(bulk.indicators.contains(&"carrier_bulk_pattern".to_string()));
        assert!(bulk.detected);
        assert!(bulk
            .investigation_notes
            .iter()
            .any(|note| note.contains("Idea")));
    }

    #[test]
    fn test_bulk_prefixes_are_region_scoped() {
        let bulk = engine().detect_bulk_registration("+18001234567", "US");
        assert!(!bulk.indicators.contains(&"carrier_bulk_pattern".to_string()));
        assert!(!bulk.detected);
        assert!(bulk.block.is_none());
    }

    #[test]
    fn test_range_pattern_alone_is_not_bulk() {
        let bulk = engine().detect_bulk_registration("9876543210", "IN");
        assert_eq!(bulk.indicators, vec!["range_pattern".to_string()]);
        assert!(!bulk.detected);
        assert!(bulk.block.is_none());
    }

    #[test]
    fn test_relationship_confidence_orders_by_closeness() {
        let engine = engine();
        let adjacent = engine.calculate_relationship_confidence("9876543210", "9876543211", "IN");
        let distant = engine.calculate_relationship_confidence("9876543210", "1234567890", "IN");
        assert!(adjacent > 0.8, "adjacent = {}", adjacent);
        assert!(distant < 0.1, "distant = {}", distant);
    }

    #[test]
    fn test_relationship_confidence_zero_on_parse_failure() {
        let engine = engine();
        assert_eq!(engine.calculate_relationship_confidence("9876543210", "abc", "IN"), 0.0);
        assert_eq!(engine.calculate_relationship_confidence("", "9876543210", "IN"), 0.0);
    }

    #[test]
    fn test_sequential_analysis_finds_consecutive_digits() {
        let analysis = engine().analyze_sequential_patterns("9876543210", "IN");
        assert!(analysis.found);
        assert!(analysis
            .patterns
            .iter()
            .any(|p| p.sequence_type() == SequenceType::Consecutive));
        for pattern in &analysis.patterns {
            assert!(pattern.pattern_numbers().contains(&"+919876543210".to_string()));
        }
        assert!(analysis.confidence_score > 0.0 && analysis.confidence_score <= 1.0);
        assert!(analysis.business_likelihood <= 1.0);
    }

    #[test]
    fn test_sequential_analysis_alternating_motif() {
        let analysis = engine().analyze_sequential_patterns("9876541212", "IN");
        assert!(analysis
            .patterns
            .iter()
            .any(|p| p.sequence_type() == SequenceType::Alternating));
    }

    #[test]
    fn test_carrier_block_for_known_prefix() {
        let analysis = engine().analyze_carrier_block("9876543210", "IN");
        assert!(analysis.detected);
        let block = analysis.block.unwrap();
        assert_eq!(block.carrier_name(), "Vodafone");
        assert_eq!(block.block_prefix(), "98");
        assert!((block.confidence_score() - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_priorities_are_sorted_high_first() {
        let engine = engine();
        let analysis = engine.analyze("9876543000", "IN");
        let priorities = engine.suggest_investigation_priorities(&analysis);
        assert!(!priorities.is_empty());
        assert_eq!(priorities[0].priority, Priority::High);
        for pair in priorities.windows(2) {
            assert!(pair[0].priority >= pair[1].priority);
        }
    }

    #[test]
    fn test_source_confidence_is_capped() {
        let analysis = engine().analyze("9876543000", "IN");
        let confidence = analysis.source_confidence();
        assert!((50.0..=95.0).contains(&confidence));
    }

    #[test]
    fn test_config_validation() {
        let config = PatternConfig {
            high_confidence_related: 1.5,
            ..PatternConfig::default()
        };
        assert!(PatternAnalysisEngine::new(config).is_err());
        let config = PatternConfig {
            sequential_threshold: 0,
            ..PatternConfig::default()
        };
        assert!(PatternAnalysisEngine::new(config).is_err());
    }

    #[test]
    fn test_digit_helpers() {
        assert_eq!(monotone_tail_len("9876543210"), 10);
        assert_eq!(monotone_tail_len("1357"), 1);
        assert!(has_range_pattern("55551111"));
        assert!(!has_range_pattern("3217"));
        assert_eq!(offset_digits(5, -6, 3), None);
        assert_eq!(offset_digits(999, 1, 3), None);
        assert_eq!(offset_digits(9, 1, 3), Some("010".to_string()));
        assert_eq!(digit_similarity("1234", "1243"), 0.5);
    }
}
