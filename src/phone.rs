use moka::sync::Cache;
use phonenumber::country::Id as CountryId;
use phonenumber::metadata::DATABASE;
use phonenumber::{Mode, Type};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::errors::PhoneError;

const CACHE_TTL: Duration = Duration::from_secs(3600);
const CACHE_CAPACITY: u64 = 10_000;

// ============ Carrier Prefix Tables ============

/// Prefixes of the national number assigned to one carrier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CarrierPrefixes {
    pub carrier: String,
    pub prefixes: Vec<String>,
}

impl CarrierPrefixes {
    fn new(carrier: &str, prefixes: impl IntoIterator<Item = u32>) -> Self {
        Self {
            carrier: carrier.to_string(),
            prefixes: prefixes.into_iter().map(|p| p.to_string()).collect(),
        }
    }
}

/// Region code to carriers, in lookup order. The first carrier with a
/// matching prefix wins, so overlapping ranges resolve to the earlier entry.
pub type CarrierTable = BTreeMap<String, Vec<CarrierPrefixes>>;

pub fn default_carrier_table() -> CarrierTable {
    let mut table = CarrierTable::new();
    table.insert(
        "IN".to_string(),
        vec![
            CarrierPrefixes::new("Airtel", std::iter::once(70).chain(80..=89)),
            CarrierPrefixes::new("Jio", 60..=69),
            CarrierPrefixes::new("Vodafone", 97..=99),
            CarrierPrefixes::new("BSNL", 94..=96),
            CarrierPrefixes::new("Idea", 90..=93),
        ],
    );
    table.insert(
        "US".to_string(),
        vec![
            CarrierPrefixes::new("Verizon", [201, 202, 203, 212, 213, 214, 215, 216]),
            CarrierPrefixes::new("AT&T", [214, 469, 972, 903, 430, 432, 409, 361]),
            CarrierPrefixes::new("T-Mobile", [206, 253, 360, 425, 509, 564]),
        ],
    );
    table
}

fn region_name(code: &str) -> &str {
    match code {
        "IN" => "India",
        "US" => "United States",
        "CA" => "Canada",
        "GB" => "United Kingdom",
        "AU" => "Australia",
        "BR" => "Brazil",
        "DE" => "Germany",
        "FR" => "France",
        "ES" => "Spain",
        "IT" => "Italy",
        "JP" => "Japan",
        "CN" => "China",
        "RU" => "Russia",
        "MX" => "Mexico",
        "ZA" => "South Africa",
        "AE" => "United Arab Emirates",
        "SG" => "Singapore",
        "PK" => "Pakistan",
        "BD" => "Bangladesh",
        "NG" => "Nigeria",
        other => other,
    }
}

/// Parse an ISO 3166 alpha-2 region code.
pub fn parse_region(region: &str) -> Result<CountryId, PhoneError> {
    region
        .trim()
        .to_ascii_uppercase()
        .parse::<CountryId>()
        .map_err(|_| PhoneError::UnknownRegion(region.to_string()))
}

// ============ Parsed Number ============

/// Immutable parse of one raw phone number in a region context.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedNumber {
    raw: String,
    country_code: u16,
    national_number: u64,
    national_digits: String,
    region_code: String,
    is_valid: bool,
    is_possible: bool,
    number_type: &'static str,
    e164: String,
    international: String,
    national: String,
    carrier: Option<String>,
    carrier_prefix: Option<String>,
    geo_description: Option<String>,
}

impl ParsedNumber {
    pub fn raw(&self) -> &str {
        &self.raw
    }

    pub fn country_code(&self) -> u16 {
        self.country_code
    }

    /// National significant number as an integer; leading zeros are lost.
    pub fn national_number(&self) -> u64 {
        self.national_number
    }

    /// National significant number with any leading zeros kept.
    pub fn national_digits(&self) -> &str {
        &self.national_digits
    }

    pub fn region_code(&self) -> &str {
        &self.region_code
    }

    pub fn is_valid(&self) -> bool {
        self.is_valid
    }

    pub fn is_possible(&self) -> bool {
        self.is_possible
    }

    /// Metadata line type in snake case (`mobile`, `fixed_line`, `toll_free`...).
    pub fn number_type(&self) -> &'static str {
        self.number_type
    }

    pub fn e164(&self) -> &str {
        &self.e164
    }

    pub fn international(&self) -> &str {
        &self.international
    }

    pub fn national(&self) -> &str {
        &self.national
    }

    pub fn carrier(&self) -> Option<&str> {
        self.carrier.as_deref()
    }

    /// The table prefix that identified the carrier.
    pub fn carrier_prefix(&self) -> Option<&str> {
        self.carrier_prefix.as_deref()
    }

    pub fn geo_description(&self) -> Option<&str> {
        self.geo_description.as_deref()
    }

    pub fn country_name(&self) -> &str {
        region_name(&self.region_code)
    }

    /// Completeness score in [0, 100] for the local parse.
    pub fn formatter_confidence(&self) -> f64 {
        let mut confidence: f64 = 15.0;
        if self.is_valid {
            confidence += 40.0;
        } else if self.is_possible {
            confidence += 20.0;
        }
        if self.carrier.is_some() {
            confidence += 25.0;
        }
        if self.geo_description.is_some() {
            confidence += 20.0;
        }
        confidence.min(100.0)
    }
}

fn type_name(kind: Type) -> &'static str {
    match kind {
        Type::FixedLine => "fixed_line",
        Type::Mobile => "mobile",
        Type::FixedLineOrMobile => "fixed_line_or_mobile",
        Type::TollFree => "toll_free",
        Type::PremiumRate => "premium_rate",
        Type::SharedCost => "shared_cost",
        Type::PersonalNumber => "personal_number",
        Type::Voip => "voip",
        Type::Pager => "pager",
        Type::Uan => "uan",
        _ => "unknown",
    }
}

// ============ Formatter ============

/// Cached wrapper around the `phonenumber` crate.
///
/// Successful parses are memoized per `(region, input)` for an hour; failures
/// are cheap to recompute and never cached.
#[derive(Clone)]
pub struct NumberFormatter {
    cache: Cache<String, Arc<ParsedNumber>>,
    carriers: Arc<CarrierTable>,
    hits: Arc<AtomicU64>,
    misses: Arc<AtomicU64>,
}

impl Default for NumberFormatter {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for NumberFormatter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NumberFormatter")
            .field("cached_entries", &self.cache.entry_count())
            .field("regions_with_carriers", &self.carriers.len())
            .finish()
    }
}

impl NumberFormatter {
    pub fn new() -> Self {
        Self::with_carrier_table(default_carrier_table())
    }

    pub fn with_carrier_table(carriers: CarrierTable) -> Self {
        Self {
            cache: Cache::builder()
                .max_capacity(CACHE_CAPACITY)
                .time_to_live(CACHE_TTL)
                .build(),
            carriers: Arc::new(carriers),
            hits: Arc::new(AtomicU64::new(0)),
            misses: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Parse and format a raw number.
    ///
    /// # Arguments
    ///
    /// * `raw` - Phone number in any common notation (`+91 98765 43210`, `9876543210`).
    /// * `region` - ISO alpha-2 region used when the input carries no `+` prefix.
    ///
    /// # Returns
    ///
    /// * `Ok(Arc<ParsedNumber>)` - Canonical formats, validity and lookups.
    /// * `Err(PhoneError)` - Empty input, unknown region or unparseable digits.
    pub fn parse(&self, raw: &str, region: &str) -> Result<Arc<ParsedNumber>, PhoneError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(PhoneError::Empty);
        }
        let key = format!("{}|{}", region.trim().to_ascii_uppercase(), trimmed);
        if let Some(hit) = self.cache.get(&key) {
            self.hits.fetch_add(1, Ordering::Relaxed);
            return Ok(hit);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        let parsed = Arc::new(self.parse_uncached(trimmed, region)?);
        self.cache.insert(key, parsed.clone());
        Ok(parsed)
    }

    fn parse_uncached(&self, raw: &str, region: &str) -> Result<ParsedNumber, PhoneError> {
        let region_id = parse_region(region)?;
        let number = phonenumber::parse(Some(region_id), raw).map_err(|e| {
            tracing::debug!("❌ Failed to parse '{}' for {}: {:?}", raw, region, e);
            PhoneError::Unparseable {
                input: raw.to_string(),
                reason: format!("{:?}", e),
            }
        })?;

        let is_valid = phonenumber::is_valid(&number);
        let national_number = number.national().value();
        let national_digits = format!(
            "{}{}",
            "0".repeat(number.national().zeros() as usize),
            national_number
        );
        let is_possible = (4..=15).contains(&national_digits.len());
        let region_code = number
            .country()
            .id()
            .map(|id| format!("{:?}", id))
            .unwrap_or_else(|| format!("{:?}", region_id));
        let number_type = type_name(number.number_type(&DATABASE));

        let (carrier, carrier_prefix) = if is_valid {
            self.lookup_carrier(&region_code, &national_digits)
                .map(|(c, p)| (Some(c), Some(p)))
                .unwrap_or((None, None))
        } else {
            (None, None)
        };

        let geo_description = if is_valid {
            Some(describe_location(&region_code, number_type, &national_digits))
        } else {
            None
        };

        tracing::debug!(
            "✓ Parsed {} → {} (valid: {}, type: {})",
            raw,
            number.format().mode(Mode::E164),
            is_valid,
            number_type
        );

        Ok(ParsedNumber {
            raw: raw.to_string(),
            country_code: number.code().value(),
            national_number,
            national_digits,
            region_code,
            is_valid,
            is_possible,
            number_type,
            e164: number.format().mode(Mode::E164).to_string(),
            international: number.format().mode(Mode::International).to_string(),
            national: number.format().mode(Mode::National).to_string(),
            carrier,
            carrier_prefix,
            geo_description,
        })
    }

    /// Carrier name and matching prefix for a national number, if the region has a table.
    pub fn lookup_carrier(&self, region: &str, national_digits: &str) -> Option<(String, String)> {
        self.carriers.get(region).and_then(|carriers| {
            carriers.iter().find_map(|entry| {
                entry
                    .prefixes
                    .iter()
                    .find(|p| national_digits.starts_with(p.as_str()))
                    .map(|p| (entry.carrier.clone(), p.clone()))
            })
        })
    }

    /// Carrier name for a raw number, `None` when unknown or unparseable.
    pub fn carrier_name(&self, raw: &str, region: &str) -> Option<String> {
        self.parse(raw, region)
            .ok()
            .and_then(|p| p.carrier().map(str::to_string))
    }

    /// Coarse location for a raw number, `None` when unknown or unparseable.
    pub fn geo_description(&self, raw: &str, region: &str) -> Option<String> {
        self.parse(raw, region)
            .ok()
            .and_then(|p| p.geo_description().map(str::to_string))
    }

    /// `(hits, misses)` since construction.
    pub fn cache_stats(&self) -> (u64, u64) {
        (
            self.hits.load(Ordering::Relaxed),
            self.misses.load(Ordering::Relaxed),
        )
    }
}

fn describe_location(region_code: &str, number_type: &str, national_digits: &str) -> String {
    let country = region_name(region_code);
    match number_type {
        "fixed_line" | "fixed_line_or_mobile" if national_digits.len() > 3 => {
            format!("{}, area {}", country, &national_digits[..3])
        }
        _ => country.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_indian_mobile() {
        let formatter = NumberFormatter::new();
        let parsed = formatter.parse("9876543210", "IN").unwrap();

        assert!(parsed.is_valid());
        assert_eq!(parsed.country_code(), 91);
        assert_eq!(parsed.national_number(), 9_876_543_210);
        assert_eq!(parsed.e164(), "+919876543210");
        assert_eq!(parsed.region_code(), "IN");
        assert_eq!(parsed.carrier(), Some("Vodafone"));
        assert_eq!(parsed.carrier_prefix(), Some("98"));
        assert_eq!(parsed.geo_description(), Some("India"));
        assert_eq!(parsed.formatter_confidence(), 100.0);
    }

    #[test]
    fn test_parse_rejects_garbage_and_unknown_region() {
        let formatter = NumberFormatter::new();
        assert_eq!(formatter.parse("   ", "IN").unwrap_err(), PhoneError::Empty);
        assert!(matches!(
            formatter.parse("9876543210", "ZZZ"),
            Err(PhoneError::UnknownRegion(_))
        ));
        assert!(formatter.parse("not-a-number", "IN").is_err());
    }

    #[test]
    fn test_cache_hits_on_repeat() {
        let formatter = NumberFormatter::new();
        formatter.parse("9876543210", "IN").unwrap();
        formatter.parse("9876543210", "in").unwrap();
        assert_eq!(formatter.cache_stats(), (1, 1));
    }

    #[test]
    fn test_carrier_prefix_lookup() {
        let formatter = NumberFormatter::new();
        for (national, carrier) in [
            ("9812345678", "Vodafone"),
            ("9612345678", "BSNL"),
            ("9012345678", "Idea"),
            ("7012345678", "Airtel"),
            ("6312345678", "Jio"),
        ] {
            assert_eq!(
                formatter.lookup_carrier("IN", national).map(|(c, _)| c),
                Some(carrier.to_string())
            );
        }
        // 214 is listed under two US carriers; the earlier entry wins.
        assert_eq!(
            formatter.lookup_carrier("US", "2145550100").map(|(c, _)| c),
            Some("Verizon".to_string())
        );
        assert_eq!(formatter.lookup_carrier("GB", "7700900123"), None);
    }

    #[test]
    fn test_formatter_confidence_for_invalid_number() {
        let formatter = NumberFormatter::new();
        // Short inputs may be rejected outright; when they parse they stay invalid.
        if let Ok(parsed) = formatter.parse("12345", "IN") {
            assert!(!parsed.is_valid());
            assert!(parsed.carrier().is_none());
            assert!(parsed.formatter_confidence() <= 35.0);
        }
    }
}
