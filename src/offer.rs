//! Flight offer value records.
//!
//! `FlightOffer` is the shape consumed by callers and by the persistence
//! collaborator that restores last-search results across restarts, so the
//! field set (including the round-trip/outbound-price/return-price split)
//! must stay serde-stable.

use serde::{Deserialize, Serialize};

use crate::progress::Progress;

/// A single priced itinerary candidate extracted from the page.
///
/// Prices are KRW won (no minor unit). Times are `HH:MM` strings as
/// rendered by the site. Round-trip offers carry the inbound leg in the
/// `return_*` fields and split prices in `outbound_price`/`return_price`;
/// `price` is always the total.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlightOffer {
    pub airline: String,
    pub price: u64,
    #[serde(default = "default_currency")]
    pub currency: String,
    #[serde(default)]
    pub departure_time: String,
    #[serde(default)]
    pub arrival_time: String,
    #[serde(default)]
    pub duration: String,
    #[serde(default)]
    pub stops: u32,
    #[serde(default)]
    pub flight_number: String,
    #[serde(default = "default_source")]
    pub source: String,
    #[serde(default)]
    pub return_departure_time: String,
    #[serde(default)]
    pub return_arrival_time: String,
    #[serde(default)]
    pub return_duration: String,
    #[serde(default)]
    pub return_stops: u32,
    #[serde(default)]
    pub is_round_trip: bool,
    #[serde(default)]
    pub outbound_price: u64,
    #[serde(default)]
    pub return_price: u64,
    /// Inbound-leg carrier when a domestic combination crosses airlines.
    #[serde(default)]
    pub return_airline: String,
}

fn default_currency() -> String {
    "KRW".to_string()
}

fn default_source() -> String {
    "Interpark".to_string()
}

impl Default for FlightOffer {
    fn default() -> Self {
        Self {
            airline: String::new(),
            price: 0,
            currency: default_currency(),
            departure_time: String::new(),
            arrival_time: String::new(),
            duration: String::new(),
            stops: 0,
            flight_number: String::new(),
            source: default_source(),
            return_departure_time: String::new(),
            return_arrival_time: String::new(),
            return_duration: String::new(),
            return_stops: 0,
            is_round_trip: false,
            outbound_price: 0,
            return_price: 0,
            return_airline: String::new(),
        }
    }
}

impl FlightOffer {
    /// Sort key: price ascending, with unknown (zero) prices last.
    pub(crate) fn price_key(&self) -> u64 {
        if self.price > 0 { self.price } else { u64::MAX }
    }

    /// Round-trip price consistency: total equals the sum of the legs
    /// whenever both leg prices are known.
    pub fn price_consistent(&self) -> bool {
        if self.is_round_trip && self.outbound_price > 0 && self.return_price > 0 {
            self.price == self.outbound_price + self.return_price
        } else {
            true
        }
    }
}

/// Sort offers by price ascending (stable, so discovery order breaks ties)
/// and truncate to `max_results` (0 means no cap). Truncation is reported
/// through the progress sink rather than dropped silently.
pub fn sort_and_limit(
    mut offers: Vec<FlightOffer>,
    max_results: usize,
    progress: &Progress,
) -> Vec<FlightOffer> {
    if offers.is_empty() {
        return offers;
    }
    offers.sort_by_key(FlightOffer::price_key);
    if max_results > 0 && offers.len() > max_results {
        progress.emit(&format!(
            "keeping the {} cheapest of {} results",
            max_results,
            offers.len()
        ));
        offers.truncate(max_results);
    }
    offers
}
