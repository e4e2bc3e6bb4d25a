//! Extraction engine: turns rendered page content into offer candidates.
//!
//! In-page scripts return JSON arrays that are treated as untrusted
//! payloads: each record passes through `RawOffer::from_value`, which
//! rejects anything without a positive price and both leg times. A bad
//! record is skipped, never aborts a batch.
//!
//! Two progressive collectors scroll for more content: the international
//! one converges on page height, the domestic one watches three
//! independent stall conditions (the domestic panel paginates far more
//! items per scroll).

use chromiumoxide::page::Page;
use serde::Deserialize;
use serde_json::Value;
use std::collections::HashSet;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ScraperConfig;
use crate::error::{Result, ScrapeError};
use crate::offer::FlightOffer;
use crate::scripts;

/// Validated offer candidate as scraped from one element.
///
/// International cards may carry both legs (`is_round_trip`); domestic
/// buttons are always single-leg.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawOffer {
    pub airline: String,
    pub price: u64,
    pub dep_time: String,
    pub arr_time: String,
    pub stops: u32,
    pub ret_dep_time: String,
    pub ret_arr_time: String,
    pub ret_stops: u32,
    pub is_round_trip: bool,
}

impl RawOffer {
    /// Strict parse-or-reject boundary for script payloads. Required:
    /// positive integer price and non-empty departure/arrival times.
    pub fn from_value(value: &Value) -> Option<Self> {
        let obj = value.as_object()?;
        let price = read_u64(obj.get("price")?)?;
        if price == 0 {
            return None;
        }
        let dep_time = read_string(obj.get("depTime"))?;
        let arr_time = read_string(obj.get("arrTime"))?;
        if dep_time.is_empty() || arr_time.is_empty() {
            return None;
        }
        Some(Self {
            airline: obj
                .get("airline")
                .and_then(Value::as_str)
                .filter(|s| !s.is_empty())
                .unwrap_or("기타")
                .to_string(),
            price,
            dep_time,
            arr_time,
            stops: obj.get("stops").and_then(read_u64).unwrap_or(0) as u32,
            ret_dep_time: obj
                .get("retDepTime")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string(),
            ret_arr_time: obj
                .get("retArrTime")
                .and_then(Value::as_str)
                .unwrap_or("")
                .to_string(),
            ret_stops: obj.get("retStops").and_then(read_u64).unwrap_or(0) as u32,
            is_round_trip: obj
                .get("isRoundTrip")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        })
    }

    /// Dedup key for domestic button lists.
    pub fn domestic_key(&self) -> String {
        format!(
            "{}_{}_{}_{}",
            self.airline, self.dep_time, self.arr_time, self.price
        )
    }

    /// Dedup key for international cards. Includes the return leg so two
    /// itineraries sharing a price are not collapsed together.
    pub fn itinerary_key(&self) -> String {
        format!(
            "{}|{}|{}|{}|{}|{}|{}|{}",
            self.airline,
            self.price,
            self.dep_time,
            self.arr_time,
            self.stops,
            self.ret_dep_time,
            self.ret_arr_time,
            self.ret_stops
        )
    }

    /// One-leg offer (domestic lists, outbound-only degradations).
    pub fn into_one_way_offer(self, source: &str) -> FlightOffer {
        FlightOffer {
            airline: self.airline,
            price: self.price,
            departure_time: self.dep_time,
            arrival_time: self.arr_time,
            stops: self.stops,
            source: source.to_string(),
            ..FlightOffer::default()
        }
    }

    /// Full itinerary offer as shown on an international card.
    pub fn into_itinerary_offer(self, source: &str) -> FlightOffer {
        FlightOffer {
            airline: self.airline,
            price: self.price,
            departure_time: self.dep_time,
            arrival_time: self.arr_time,
            stops: self.stops,
            return_departure_time: self.ret_dep_time,
            return_arrival_time: self.ret_arr_time,
            return_stops: self.ret_stops,
            is_round_trip: self.is_round_trip,
            source: source.to_string(),
            ..FlightOffer::default()
        }
    }
}

fn read_u64(value: &Value) -> Option<u64> {
    value
        .as_u64()
        .or_else(|| value.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
}

fn read_string(value: Option<&Value>) -> Option<String> {
    value.and_then(Value::as_str).map(str::to_string)
}

/// Parse a script payload, skipping malformed candidates.
pub fn parse_batch(payload: Value) -> Vec<RawOffer> {
    match payload {
        Value::Array(items) => items.iter().filter_map(RawOffer::from_value).collect(),
        _ => Vec::new(),
    }
}

/// Merge a batch into the accumulator, preserving discovery order.
/// Returns how many previously unseen offers were added.
fn merge_batch<K>(
    seen: &mut HashSet<String>,
    collected: &mut Vec<RawOffer>,
    batch: Vec<RawOffer>,
    key: K,
) -> usize
where
    K: Fn(&RawOffer) -> String,
{
    let mut added = 0;
    for offer in batch {
        if seen.insert(key(&offer)) {
            collected.push(offer);
            added += 1;
        }
    }
    added
}

async fn evaluate_batch(page: &Page, script: &str) -> Result<Vec<RawOffer>> {
    let payload: Value = page
        .evaluate(script)
        .await
        .map_err(|e| ScrapeError::DataExtraction(format!("script evaluation failed: {e}")))?
        .into_value()
        .map_err(|e| ScrapeError::DataExtraction(format!("script payload not JSON: {e}")))?;
    Ok(parse_batch(payload))
}

pub(crate) async fn evaluate_bool(page: &Page, script: &str) -> bool {
    match page.evaluate(script).await {
        Ok(result) => result.into_value::<bool>().unwrap_or(false),
        Err(e) => {
            debug!("boolean probe failed: {e}");
            false
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ScrollStatus {
    #[serde(default)]
    can_scroll: bool,
    #[serde(default)]
    reached_bottom: bool,
}

/// Single-pass domestic scan: one-way searches and manual re-extraction.
pub async fn extract_domestic_once(page: &Page) -> Result<Vec<RawOffer>> {
    let batch = evaluate_batch(page, &scripts::domestic_prices()).await?;
    let mut seen = HashSet::new();
    let mut collected = Vec::new();
    merge_batch(&mut seen, &mut collected, batch, RawOffer::domestic_key);
    info!(count = collected.len(), "domestic extraction complete");
    Ok(collected)
}

/// Scroll-driven domestic collection for the two-step round-trip flow.
///
/// Stops at whichever comes first: the scroll container reports bottom
/// with no new items for `bottom_stall_threshold` consecutive checks, the
/// page stops scrolling for `scroll_stall_threshold` checks, or
/// `no_new_threshold` consecutive iterations add nothing (lazy-loading
/// stall).
pub async fn collect_domestic(
    page: &Page,
    config: &ScraperConfig,
    cancel: &CancellationToken,
) -> Vec<RawOffer> {
    let mut seen = HashSet::new();
    let mut collected: Vec<RawOffer> = Vec::new();
    let mut bottom_stall = 0u32;
    let mut scroll_stall = 0u32;
    let mut no_new = 0u32;
    let list_script = scripts::domestic_list();
    let check_script = scripts::scroll_check();

    for iteration in 0..config.domestic_max_scrolls {
        if cancel.is_cancelled() {
            debug!("domestic collection cancelled at iteration {iteration}");
            break;
        }

        let batch = match evaluate_batch(page, &list_script).await {
            Ok(batch) => batch,
            Err(e) => {
                warn!("domestic collection stopped: {e}");
                break;
            }
        };
        let added = merge_batch(&mut seen, &mut collected, batch, RawOffer::domestic_key);

        let status: ScrollStatus = match page.evaluate(check_script.as_str()).await {
            Ok(result) => result.into_value().unwrap_or_default(),
            Err(e) => {
                warn!("scroll check failed: {e}");
                break;
            }
        };

        tokio::time::sleep(Duration::from_millis(config.domestic_scroll_pause_ms)).await;

        if status.reached_bottom && added == 0 {
            bottom_stall += 1;
            debug!(
                "bottom reached with no new items ({bottom_stall}/{})",
                config.bottom_stall_threshold
            );
            if bottom_stall >= config.bottom_stall_threshold {
                break;
            }
            tokio::time::sleep(Duration::from_millis(config.domestic_bottom_pause_ms)).await;
            continue;
        }
        bottom_stall = 0;

        if !status.can_scroll {
            scroll_stall += 1;
            if scroll_stall >= config.scroll_stall_threshold {
                debug!("scroll position stopped moving, {} collected", collected.len());
                break;
            }
        } else {
            scroll_stall = 0;
        }

        if added == 0 {
            no_new += 1;
            if no_new >= config.no_new_threshold {
                debug!(
                    "{no_new} consecutive iterations without new items, {} collected",
                    collected.len()
                );
                break;
            }
        } else {
            no_new = 0;
        }
    }

    info!(count = collected.len(), "domestic scroll collection finished");
    collected
}

/// Scroll-driven international collection with height-based convergence.
pub async fn collect_international(
    page: &Page,
    config: &ScraperConfig,
    cancel: &CancellationToken,
) -> Vec<RawOffer> {
    let mut seen = HashSet::new();
    let mut collected: Vec<RawOffer> = Vec::new();
    let mut previous_height = 0u64;
    let primary = scripts::international_prices();

    for iteration in 0..config.international_max_scrolls {
        if cancel.is_cancelled() {
            debug!("international collection cancelled at iteration {iteration}");
            break;
        }

        let mut batch = match evaluate_batch(page, &primary).await {
            Ok(batch) => batch,
            Err(e) => {
                warn!("international collection stopped: {e}");
                break;
            }
        };
        if batch.is_empty() && iteration == 0 {
            // Primary selector found no cards at all; try the looser sweep
            // once before scrolling (minor markup drift).
            batch = evaluate_batch(page, &scripts::international_prices_fallback())
                .await
                .unwrap_or_default();
            if !batch.is_empty() {
                info!("primary card selector empty, fallback sweep matched");
            }
        }

        let added = merge_batch(&mut seen, &mut collected, batch, RawOffer::itinerary_key);
        debug!(
            "scroll {}: {added} new offers ({} total)",
            iteration + 1,
            collected.len()
        );

        if let Err(e) = page.evaluate(scripts::scroll_to_bottom()).await {
            warn!("scroll failed: {e}");
            break;
        }
        tokio::time::sleep(Duration::from_millis(config.scroll_pause_ms)).await;

        let new_height = match page.evaluate(scripts::body_scroll_height()).await {
            Ok(result) => result.into_value::<u64>().unwrap_or(previous_height),
            Err(_) => previous_height,
        };
        if new_height == previous_height && iteration > 2 {
            debug!("page height converged, no more content loading");
            break;
        }
        previous_height = new_height;
    }

    if collected.is_empty() {
        // Nothing at all: one last looser sweep against the final DOM.
        if let Ok(batch) = evaluate_batch(page, &scripts::international_prices_fallback()).await {
            merge_batch(&mut seen, &mut collected, batch, RawOffer::itinerary_key);
        }
    }

    collected
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn card(airline: &str, price: u64, ret_dep: &str, ret_arr: &str) -> Value {
        json!({
            "airline": airline,
            "price": price,
            "depTime": "10:00",
            "arrTime": "12:10",
            "stops": 0,
            "retDepTime": ret_dep,
            "retArrTime": ret_arr,
            "retStops": 0,
            "isRoundTrip": !ret_dep.is_empty(),
        })
    }

    #[test]
    fn test_rejects_missing_required_fields() {
        assert!(RawOffer::from_value(&json!({"airline": "x", "price": 0, "depTime": "10:00", "arrTime": "11:00"})).is_none());
        assert!(RawOffer::from_value(&json!({"airline": "x", "price": 1000, "arrTime": "11:00"})).is_none());
        assert!(RawOffer::from_value(&json!({"airline": "x", "price": 1000, "depTime": "", "arrTime": "11:00"})).is_none());
        assert!(RawOffer::from_value(&json!("not an object")).is_none());
    }

    #[test]
    fn test_missing_airline_defaults_to_other() {
        let raw = RawOffer::from_value(&json!({"price": 42000, "depTime": "10:00", "arrTime": "11:00"})).unwrap();
        assert_eq!(raw.airline, "기타");
        assert_eq!(raw.stops, 0);
        assert!(!raw.is_round_trip);
    }

    #[test]
    fn test_float_price_is_accepted() {
        let raw = RawOffer::from_value(&json!({"price": 42000.0, "depTime": "10:00", "arrTime": "11:00"})).unwrap();
        assert_eq!(raw.price, 42000);
    }

    #[test]
    fn test_parse_batch_skips_bad_candidates() {
        let batch = parse_batch(json!([
            {"airline": "대한항공", "price": 50000, "depTime": "10:00", "arrTime": "12:00"},
            {"airline": "broken", "price": 0, "depTime": "10:00", "arrTime": "12:00"},
            {"garbage": true},
        ]));
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].airline, "대한항공");
    }

    #[test]
    fn test_dedup_key_includes_return_leg() {
        // Same airline/price/outbound, different return legs: must stay
        // two distinct offers.
        let a = RawOffer::from_value(&card("대한항공", 520000, "18:00", "20:10")).unwrap();
        let b = RawOffer::from_value(&card("대한항공", 520000, "21:00", "23:10")).unwrap();
        let mut seen = HashSet::new();
        let mut collected = Vec::new();
        let added = merge_batch(
            &mut seen,
            &mut collected,
            vec![a.clone(), b],
            RawOffer::itinerary_key,
        );
        assert_eq!(added, 2);

        // The identical card seen again on a later scroll is merged away.
        let added = merge_batch(&mut seen, &mut collected, vec![a], RawOffer::itinerary_key);
        assert_eq!(added, 0);
        assert_eq!(collected.len(), 2);
    }

    #[test]
    fn test_merge_preserves_discovery_order() {
        let mut seen = HashSet::new();
        let mut collected = Vec::new();
        let first = RawOffer::from_value(&card("진에어", 80000, "", "")).unwrap();
        let second = RawOffer::from_value(&card("티웨이", 50000, "", "")).unwrap();
        merge_batch(
            &mut seen,
            &mut collected,
            vec![first, second],
            RawOffer::itinerary_key,
        );
        assert_eq!(collected[0].airline, "진에어");
        assert_eq!(collected[1].airline, "티웨이");
    }

    #[test]
    fn test_itinerary_offer_conversion() {
        let raw = RawOffer::from_value(&card("아시아나", 610000, "18:30", "21:00")).unwrap();
        let offer = raw.into_itinerary_offer("Interpark (Auto)");
        assert!(offer.is_round_trip);
        assert_eq!(offer.return_departure_time, "18:30");
        assert_eq!(offer.source, "Interpark (Auto)");
        assert_eq!(offer.currency, "KRW");
    }

    #[test]
    fn test_one_way_offer_conversion() {
        let raw = RawOffer::from_value(&card("제주항공", 31000, "", "")).unwrap();
        let offer = raw.into_one_way_offer("Interpark (Domestic)");
        assert!(!offer.is_round_trip);
        assert_eq!(offer.price, 31000);
        assert!(offer.return_departure_time.is_empty());
    }
}
