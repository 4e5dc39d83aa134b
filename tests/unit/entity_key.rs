//! Unit tests for entity keys and granularities

use ohlc_backfill::identifier::{normalize_entity_id, EntityKey};
use ohlc_backfill::{Granularity, DAY_MS};
use std::str::FromStr;

#[test]
fn test_key_round_trips_through_display() {
    let key = EntityKey::new("Wrapped-Bitcoin", Granularity::Hourly).unwrap();
    assert_eq!(key.to_string(), "wrapped-bitcoin:hourly");
    assert_eq!(EntityKey::from_str(&key.to_string()).unwrap(), key);
}

#[test]
fn test_ids_with_dots_and_underscores_are_valid() {
    assert_eq!(normalize_entity_id("ether.fi_staked").unwrap(), "ether.fi_staked");
}

#[test]
fn test_unsafe_ids_rejected() {
    for bad in ["", "  ", "..", ".env", "a b", "a\\b", "btc/usd", "bitcoin:daily"] {
        assert!(normalize_entity_id(bad).is_err(), "{bad:?} should be rejected");
    }
}

#[test]
fn test_granularity_names_and_window_sizes() {
    assert_eq!(Granularity::from_str("daily").unwrap(), Granularity::Daily);
    assert_eq!(Granularity::from_str("Hourly").unwrap(), Granularity::Hourly);
    assert!(Granularity::from_str("weekly").is_err());

    assert_eq!(Granularity::Daily.default_chunk_ms(), 180 * DAY_MS);
    assert_eq!(Granularity::Hourly.default_chunk_ms(), 31 * DAY_MS);
    assert_eq!(Granularity::all(), [Granularity::Daily, Granularity::Hourly]);
}

#[test]
fn test_keys_order_by_entity_then_granularity() {
    let mut keys = vec![
        EntityKey::parse("ethereum:daily").unwrap(),
        EntityKey::parse("bitcoin:hourly").unwrap(),
        EntityKey::parse("bitcoin:daily").unwrap(),
    ];
    keys.sort();
    let names: Vec<String> = keys.iter().map(ToString::to_string).collect();
    assert_eq!(names, ["bitcoin:daily", "bitcoin:hourly", "ethereum:daily"]);
}
