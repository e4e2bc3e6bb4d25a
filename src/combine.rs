//! Round-trip combination for the domestic two-step flow.
//!
//! Outbound and inbound lists are truncated to their cheapest N before
//! pairing, and a bounded max-heap keeps only the `max_results` cheapest
//! combinations, so memory stays bounded even when N x N is large. The
//! output is exactly what a full cross-product, sort and truncate would
//! produce.

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};

use crate::extract::RawOffer;
use crate::offer::FlightOffer;

const COMBINED_SOURCE: &str = "Interpark (Domestic)";

/// Heap entry ordered by `(price, seq)`: the heap root is the worst kept
/// combination, and earlier-discovered combinations win price ties.
struct HeapEntry {
    price: u64,
    seq: u64,
    offer: FlightOffer,
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.price == other.price && self.seq == other.seq
    }
}

impl Eq for HeapEntry {}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.price, self.seq).cmp(&(other.price, other.seq))
    }
}

fn valid_leg(offer: &RawOffer) -> bool {
    offer.price > 0 && !offer.dep_time.is_empty() && !offer.arr_time.is_empty()
}

fn cheapest_n(mut legs: Vec<RawOffer>, top_n: usize) -> Vec<RawOffer> {
    legs.sort_by_key(|leg| leg.price);
    if top_n > 0 && legs.len() > top_n {
        legs.truncate(top_n);
    }
    legs
}

/// Combine outbound and inbound legs into the cheapest round-trip
/// combinations, ascending by total price (discovery order breaks ties).
///
/// `top_n` truncates each side before pairing; `max_results` bounds the
/// output (0 means unbounded). Returns an empty list when either side
/// has no valid legs, letting the caller degrade to one-way results.
pub fn combine_round_trip(
    outbound: &[RawOffer],
    inbound: &[RawOffer],
    top_n: usize,
    max_results: usize,
) -> Vec<FlightOffer> {
    let outbound: Vec<RawOffer> = outbound.iter().filter(|o| valid_leg(o)).cloned().collect();
    let inbound: Vec<RawOffer> = inbound.iter().filter(|o| valid_leg(o)).cloned().collect();
    if outbound.is_empty() || inbound.is_empty() {
        return Vec::new();
    }

    let top_outbound = cheapest_n(outbound, top_n);
    let top_inbound = cheapest_n(inbound, top_n);

    let max_keep = if max_results > 0 {
        max_results
    } else {
        top_outbound.len() * top_inbound.len()
    };

    let mut heap: BinaryHeap<HeapEntry> = BinaryHeap::with_capacity(max_keep + 1);
    let mut seen: HashSet<(String, String, u64, String, String)> = HashSet::new();
    let mut seq = 0u64;

    for ob in &top_outbound {
        for ret in &top_inbound {
            let total = ob.price + ret.price;
            let dedup_key = (
                ob.airline.clone(),
                ret.airline.clone(),
                total,
                ob.dep_time.clone(),
                ret.dep_time.clone(),
            );
            if !seen.insert(dedup_key) {
                continue;
            }
            seq += 1;

            if heap.len() == max_keep {
                // Worst kept combination is at the root; skip candidates
                // that would not improve on it.
                if let Some(worst) = heap.peek() {
                    if (total, seq) >= (worst.price, worst.seq) {
                        continue;
                    }
                }
                heap.pop();
            }

            heap.push(HeapEntry {
                price: total,
                seq,
                offer: FlightOffer {
                    airline: ob.airline.clone(),
                    price: total,
                    departure_time: ob.dep_time.clone(),
                    arrival_time: ob.arr_time.clone(),
                    stops: ob.stops,
                    source: COMBINED_SOURCE.to_string(),
                    return_departure_time: ret.dep_time.clone(),
                    return_arrival_time: ret.arr_time.clone(),
                    return_stops: ret.stops,
                    is_round_trip: true,
                    outbound_price: ob.price,
                    return_price: ret.price,
                    return_airline: ret.airline.clone(),
                    ..FlightOffer::default()
                },
            });
        }
    }

    heap.into_sorted_vec()
        .into_iter()
        .map(|entry| entry.offer)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn leg(airline: &str, price: u64, dep: &str, arr: &str) -> RawOffer {
        RawOffer::from_value(&json!({
            "airline": airline,
            "price": price,
            "depTime": dep,
            "arrTime": arr,
            "stops": 0,
        }))
        .unwrap()
    }

    #[test]
    fn test_example_scenario_icn_cju() {
        let outbound = vec![
            leg("대한항공", 30000, "08:00", "09:05"),
            leg("제주항공", 35000, "09:00", "10:05"),
        ];
        let inbound = vec![
            leg("진에어", 28000, "18:00", "19:05"),
            leg("대한항공", 31000, "19:00", "20:05"),
        ];
        let combos = combine_round_trip(&outbound, &inbound, 150, 3);
        assert_eq!(combos.len(), 3);
        assert_eq!(combos[0].price, 58000);
        assert!(combos.windows(2).all(|w| w[0].price <= w[1].price));
        for combo in &combos {
            assert!(combo.is_round_trip);
            assert!(combo.price_consistent());
        }
        // Cross-airline combination keeps the inbound carrier.
        assert_eq!(combos[0].airline, "대한항공");
        assert_eq!(combos[0].return_airline, "진에어");
    }

    #[test]
    fn test_empty_side_yields_no_combinations() {
        let outbound = vec![leg("대한항공", 30000, "08:00", "09:05")];
        assert!(combine_round_trip(&outbound, &[], 150, 10).is_empty());
        assert!(combine_round_trip(&[], &outbound, 150, 10).is_empty());
    }

    #[test]
    fn test_duplicate_pairs_are_collapsed() {
        let outbound = vec![
            leg("대한항공", 30000, "08:00", "09:05"),
            leg("대한항공", 30000, "08:00", "09:35"),
        ];
        let inbound = vec![leg("진에어", 28000, "18:00", "19:05")];
        // Both pairs share (airline, airline, total, dep, dep): one kept.
        let combos = combine_round_trip(&outbound, &inbound, 150, 10);
        assert_eq!(combos.len(), 1);
        assert_eq!(combos[0].arrival_time, "09:05");
    }

    #[test]
    fn test_ties_kept_in_discovery_order() {
        let outbound = vec![
            leg("대한항공", 30000, "08:00", "09:05"),
            leg("진에어", 30000, "10:00", "11:05"),
            leg("티웨이", 30000, "12:00", "13:05"),
        ];
        let inbound = vec![leg("에어부산", 28000, "18:00", "19:05")];
        let combos = combine_round_trip(&outbound, &inbound, 150, 2);
        assert_eq!(combos.len(), 2);
        assert_eq!(combos[0].airline, "대한항공");
        assert_eq!(combos[1].airline, "진에어");
    }

    /// Naive reference: full cross product, dedup, sort, truncate.
    fn naive(
        outbound: &[RawOffer],
        inbound: &[RawOffer],
        top_n: usize,
        max_results: usize,
    ) -> Vec<(String, String, u64, String, String)> {
        let ob: Vec<RawOffer> = outbound.iter().filter(|o| valid_leg(o)).cloned().collect();
        let ib: Vec<RawOffer> = inbound.iter().filter(|o| valid_leg(o)).cloned().collect();
        if ob.is_empty() || ib.is_empty() {
            return Vec::new();
        }
        let ob = cheapest_n(ob, top_n);
        let ib = cheapest_n(ib, top_n);
        let mut seen = HashSet::new();
        let mut pairs = Vec::new();
        for o in &ob {
            for r in &ib {
                let key = (
                    o.airline.clone(),
                    r.airline.clone(),
                    o.price + r.price,
                    o.dep_time.clone(),
                    r.dep_time.clone(),
                );
                if seen.insert(key.clone()) {
                    pairs.push(key);
                }
            }
        }
        pairs.sort_by_key(|pair| pair.2);
        if max_results > 0 && pairs.len() > max_results {
            pairs.truncate(max_results);
        }
        pairs
    }

    #[test]
    fn test_matches_naive_cross_product() {
        use rand::Rng;
        let mut rng = rand::rng();
        let airlines = ["대한항공", "진에어", "티웨이", "에어부산", "제주항공"];

        for _ in 0..50 {
            let gen_legs = |rng: &mut rand::rngs::ThreadRng| {
                let count = rng.random_range(0..12);
                (0..count)
                    .map(|_| {
                        leg(
                            airlines[rng.random_range(0..airlines.len())],
                            rng.random_range(1..8u64) * 10000,
                            &format!("{:02}:00", rng.random_range(6..23)),
                            &format!("{:02}:55", rng.random_range(6..23)),
                        )
                    })
                    .collect::<Vec<_>>()
            };
            let outbound = gen_legs(&mut rng);
            let inbound = gen_legs(&mut rng);
            let top_n = rng.random_range(1..6);
            let max_results = rng.random_range(0..10);

            let expected = naive(&outbound, &inbound, top_n, max_results);
            let actual: Vec<_> = combine_round_trip(&outbound, &inbound, top_n, max_results)
                .into_iter()
                .map(|offer| {
                    (
                        offer.airline.clone(),
                        offer.return_airline.clone(),
                        offer.price,
                        offer.departure_time.clone(),
                        offer.return_departure_time.clone(),
                    )
                })
                .collect();
            assert_eq!(actual, expected);
        }
    }

    #[test]
    fn test_unbounded_when_cap_is_zero() {
        let outbound = vec![
            leg("대한항공", 30000, "08:00", "09:05"),
            leg("진에어", 40000, "10:00", "11:05"),
        ];
        let inbound = vec![
            leg("티웨이", 28000, "18:00", "19:05"),
            leg("에어부산", 35000, "20:00", "21:05"),
        ];
        let combos = combine_round_trip(&outbound, &inbound, 150, 0);
        assert_eq!(combos.len(), 4);
    }
}
