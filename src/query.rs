//! Search queries: validation, route classification, and the search-URL
//! contract for travel.interpark.com.

use chrono::NaiveDate;
use once_cell::sync::Lazy;
use std::collections::{HashMap, HashSet};
use url::Url;

use crate::error::{Result, ScrapeError};

const SEARCH_BASE: &str = "https://travel.interpark.com/air/search";

/// Airport code -> city code used by the site's URL scheme. Codes present
/// here are encoded with a `c:` prefix, everything else with `a:`.
pub static CITY_CODES: Lazy<HashMap<&'static str, &'static str>> = Lazy::new(|| {
    HashMap::from([
        ("ICN", "SEL"),
        ("GMP", "SEL"),
        ("NRT", "TYO"),
        ("HND", "TYO"),
        ("KIX", "OSA"),
        ("FUK", "FUK"),
        ("CJU", "CJU"),
        ("PUS", "PUS"),
        ("BKK", "BKK"),
        ("SIN", "SIN"),
        ("HKG", "HKG"),
        ("SGN", "SGN"),
        ("DAD", "DAD"),
        ("DPS", "DPS"),
    ])
});

/// In-country airport/city set. A route is domestic when both endpoints
/// resolve into this set, which selects the button-list extraction
/// strategy and the two-step round-trip flow.
static DOMESTIC_AIRPORTS: Lazy<HashSet<&'static str>> =
    Lazy::new(|| HashSet::from(["ICN", "GMP", "CJU", "PUS", "TAE", "SEL"]));

/// Cabin class query parameter values accepted by the site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CabinClass {
    #[default]
    Economy,
    Business,
    First,
}

impl CabinClass {
    /// Parse loosely, falling back to economy for anything unrecognized.
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_uppercase().as_str() {
            "BUSINESS" => CabinClass::Business,
            "FIRST" => CabinClass::First,
            _ => CabinClass::Economy,
        }
    }

    /// The `cabin=` query parameter value.
    pub fn as_param(&self) -> &'static str {
        match self {
            CabinClass::Economy => "ECONOMY",
            CabinClass::Business => "BUSINESS",
            CabinClass::First => "FIRST",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            CabinClass::Economy => "economy",
            CabinClass::Business => "business",
            CabinClass::First => "first",
        }
    }
}

/// Validated, normalized search parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub origin: String,
    pub destination: String,
    /// `YYYYMMDD`
    pub departure_date: String,
    /// `YYYYMMDD`, present for round trips
    pub return_date: Option<String>,
    pub adults: u32,
    pub cabin: CabinClass,
    pub max_results: usize,
}

impl SearchQuery {
    pub fn new(
        origin: &str,
        destination: &str,
        departure_date: &str,
        return_date: Option<&str>,
        adults: u32,
        cabin: CabinClass,
        max_results: usize,
    ) -> Result<Self> {
        let origin = normalize_code(origin)?;
        let destination = normalize_code(destination)?;
        validate_date(departure_date)?;
        if let Some(ret) = return_date {
            validate_date(ret)?;
        }
        if adults == 0 {
            return Err(ScrapeError::InvalidQuery("adult count must be at least 1".into()));
        }
        if max_results == 0 {
            return Err(ScrapeError::InvalidQuery("result cap must be positive".into()));
        }
        Ok(Self {
            origin,
            destination,
            departure_date: departure_date.to_string(),
            return_date: return_date.map(str::to_string),
            adults,
            cabin,
            max_results,
        })
    }

    /// Same query against another destination (multi-destination fan-out).
    pub fn with_destination(&self, destination: &str) -> Result<Self> {
        Self::new(
            &self.origin,
            destination,
            &self.departure_date,
            self.return_date.as_deref(),
            self.adults,
            self.cabin,
            self.max_results,
        )
    }

    /// Same query on different dates (date-range fan-out).
    pub fn with_dates(&self, departure_date: &str, return_date: Option<&str>) -> Result<Self> {
        Self::new(
            &self.origin,
            &self.destination,
            departure_date,
            return_date,
            self.adults,
            self.cabin,
            self.max_results,
        )
    }

    pub fn is_round_trip(&self) -> bool {
        self.return_date.is_some()
    }

    /// Both endpoints inside the fixed domestic set (directly or through
    /// the city-code mapping).
    pub fn is_domestic(&self) -> bool {
        is_domestic_code(&self.origin) && is_domestic_code(&self.destination)
    }

    /// Build the site search URL. Path legs encode each endpoint as
    /// `c:CITY` when the code maps to a city code, `a:CODE` otherwise;
    /// round trips append the reversed leg.
    pub fn build_search_url(&self) -> String {
        let (origin_prefix, origin_code) = leg_code(&self.origin);
        let (dest_prefix, dest_code) = leg_code(&self.destination);

        let mut path = format!(
            "{SEARCH_BASE}/{origin_prefix}:{origin_code}-{dest_prefix}:{dest_code}-{}",
            self.departure_date
        );
        if let Some(ret) = &self.return_date {
            path.push_str(&format!(
                "/{dest_prefix}:{dest_code}-{origin_prefix}:{origin_code}-{ret}"
            ));
        }

        let mut url = Url::parse(&path).expect("search path is well-formed");
        url.query_pairs_mut()
            .append_pair("cabin", self.cabin.as_param())
            .append_pair("infant", "0")
            .append_pair("child", "0")
            .append_pair("adult", &self.adults.to_string());
        url.to_string()
    }
}

fn is_domestic_code(code: &str) -> bool {
    DOMESTIC_AIRPORTS.contains(code)
        || CITY_CODES
            .get(code)
            .is_some_and(|city| DOMESTIC_AIRPORTS.contains(city))
}

fn leg_code(code: &str) -> (&'static str, &str) {
    match CITY_CODES.get(code) {
        Some(&city) => ("c", city),
        None => ("a", code),
    }
}

/// Airport/city codes are exactly three ASCII letters.
pub fn validate_airport_code(code: &str) -> bool {
    let trimmed = code.trim();
    trimmed.len() == 3 && trimmed.chars().all(|c| c.is_ascii_alphabetic())
}

fn normalize_code(code: &str) -> Result<String> {
    if !validate_airport_code(code) {
        return Err(ScrapeError::InvalidQuery(format!(
            "airport code must be three letters: {code:?}"
        )));
    }
    Ok(code.trim().to_ascii_uppercase())
}

fn validate_date(date: &str) -> Result<()> {
    NaiveDate::parse_from_str(date, "%Y%m%d").map_err(|_| {
        ScrapeError::InvalidQuery(format!("date must be YYYYMMDD: {date:?}"))
    })?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn query(origin: &str, dest: &str, ret: Option<&str>) -> SearchQuery {
        SearchQuery::new(origin, dest, "20260901", ret, 1, CabinClass::Economy, 100).unwrap()
    }

    #[test]
    fn test_code_validation() {
        assert!(validate_airport_code("ICN"));
        assert!(validate_airport_code(" cju "));
        assert!(!validate_airport_code("IC"));
        assert!(!validate_airport_code("ICNX"));
        assert!(!validate_airport_code("12A"));
        assert!(!validate_airport_code(""));
    }

    #[test]
    fn test_query_normalizes_codes() {
        let q = query("icn", "nrt", None);
        assert_eq!(q.origin, "ICN");
        assert_eq!(q.destination, "NRT");
    }

    #[test]
    fn test_rejects_bad_inputs() {
        assert!(SearchQuery::new("ICN", "NRT", "2026-09-01", None, 1, CabinClass::Economy, 10).is_err());
        assert!(SearchQuery::new("ICN", "NRT", "20261301", None, 1, CabinClass::Economy, 10).is_err());
        assert!(SearchQuery::new("ICN", "NRT", "20260901", None, 0, CabinClass::Economy, 10).is_err());
        assert!(SearchQuery::new("ICN", "NRT", "20260901", None, 1, CabinClass::Economy, 0).is_err());
    }

    #[test]
    fn test_domestic_classification() {
        assert!(query("ICN", "CJU", None).is_domestic());
        assert!(query("GMP", "PUS", None).is_domestic());
        assert!(!query("ICN", "NRT", None).is_domestic());
        assert!(!query("NRT", "KIX", None).is_domestic());
    }

    #[test]
    fn test_one_way_url_uses_city_prefix_for_mapped_codes() {
        let url = query("ICN", "NRT", None).build_search_url();
        assert_eq!(
            url,
            "https://travel.interpark.com/air/search/c:SEL-c:TYO-20260901?cabin=ECONOMY&infant=0&child=0&adult=1"
        );
    }

    #[test]
    fn test_unmapped_code_uses_airport_prefix() {
        let url = query("ICN", "CDG", None).build_search_url();
        assert!(url.contains("/c:SEL-a:CDG-20260901?"));
    }

    #[test]
    fn test_round_trip_url_has_reversed_second_leg() {
        let url = query("ICN", "CJU", Some("20260905")).build_search_url();
        assert!(url.contains("/c:SEL-c:CJU-20260901/c:CJU-c:SEL-20260905?"));
    }

    #[test]
    fn test_cabin_parse_falls_back_to_economy() {
        assert_eq!(CabinClass::parse("business"), CabinClass::Business);
        assert_eq!(CabinClass::parse("FIRST"), CabinClass::First);
        assert_eq!(CabinClass::parse("premium"), CabinClass::Economy);
    }
}
