// src/bin/search_entity.rs
//
// Ad-hoc single-entity lookup against the configured watchlist. Prints every
// match above the interactive thresholds, sorted by final score.

use anyhow::{Context, Result};
use log::info;

use screener_lib::config::ScreeningConfig;
use screener_lib::sanctions::store::SanctionStore;
use screener_lib::screening::evaluate::Thresholds;
use screener_lib::screening::search::{
    search_single_entity, EntityQuery, SINGLE_SEARCH_FINAL_THRESHOLD, SINGLE_SEARCH_LIMIT,
    SINGLE_SEARCH_NAME_THRESHOLD,
};

const USAGE: &str = "Usage: search_entity <name> [dob] [citizenship]";

fn main() -> Result<()> {
    env_logger::init_from_env(env_logger::Env::default().default_filter_or("info"));

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some(name) = args.first() else {
        println!("{USAGE}");
        return Ok(());
    };

    let config = ScreeningConfig::from_env()?;
    let store = SanctionStore::from_env();
    let records = store
        .for_matcher(None)
        .context("Failed to load the watchlist corpus")?;
    info!("Searching {} unique sanction records", records.len());

    let query = EntityQuery {
        id: None,
        name: name.clone(),
        dob: args.get(1).cloned(),
        citizenship: args.get(2).cloned(),
    };
    let thresholds = Thresholds {
        name: SINGLE_SEARCH_NAME_THRESHOLD,
        final_score: SINGLE_SEARCH_FINAL_THRESHOLD,
    };

    let matches = search_single_entity(
        &records,
        &query,
        &thresholds,
        SINGLE_SEARCH_LIMIT,
        config.backend,
    )?;

    if matches.is_empty() {
        println!("No matches above threshold.");
        return Ok(());
    }
    for m in &matches {
        println!("{}", serde_json::to_string(m)?);
    }
    Ok(())
}
