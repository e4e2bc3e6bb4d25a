// Demo CLI: run one search and print the cheapest offers.
//
// Usage: farebot [ORIGIN] [DEST] [DEPDATE] [RETDATE]
// Dates are YYYYMMDD; defaults search ICN -> NRT about a month out.

use anyhow::Result;
use chrono::{Duration, Local};
use std::sync::Arc;

use farebot::{CabinClass, FlightSearcher, ProgressSink, SearchQuery, load_yaml_config};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let origin = args.first().map(String::as_str).unwrap_or("ICN");
    let destination = args.get(1).map(String::as_str).unwrap_or("NRT");
    let default_dep = (Local::now() + Duration::days(30)).format("%Y%m%d").to_string();
    let default_ret = (Local::now() + Duration::days(35)).format("%Y%m%d").to_string();
    let departure = args.get(2).map(String::as_str).unwrap_or(&default_dep);
    let ret = args.get(3).map(String::as_str).or(if args.len() > 2 {
        None
    } else {
        Some(default_ret.as_str())
    });

    let config = Arc::new(load_yaml_config()?);
    let query = SearchQuery::new(origin, destination, departure, ret, 1, CabinClass::Economy, 100)?;

    let progress: ProgressSink = Arc::new(|msg: &str| println!("  {msg}"));
    let searcher = FlightSearcher::with_config(config);
    let results = searcher.search(&query, Some(progress), false).await?;

    if results.is_empty() {
        if searcher.is_manual_mode() {
            println!("no automated results; a visible browser is open for manual extraction");
        } else {
            println!("no results");
        }
    } else {
        println!("\n{} offers:", results.len());
        for (i, offer) in results.iter().take(5).enumerate() {
            let stops = if offer.stops == 0 {
                "direct".to_string()
            } else {
                format!("{} stops", offer.stops)
            };
            println!(
                "{}. {} - {}원 | {} -> {} ({stops})",
                i + 1,
                offer.airline,
                offer.price,
                offer.departure_time,
                offer.arrival_time
            );
        }
    }

    searcher.close().await;
    Ok(())
}
