//! Unit tests for CoinGecko response parsing

use ohlc_backfill::fetcher::coingecko_parser::CoinGeckoParser;
use ohlc_backfill::fetcher::FetchError;
use rust_decimal::Decimal;
use serde_json::json;
use std::str::FromStr;

#[test]
fn test_parse_daily_rows() {
    let payload = json!([
        [1518220800000i64, 8566.35, 8690.12, 8400.0, 8621.9],
        [1518307200000i64, 8621.9, 8700.0, 8300.25, 8450.1]
    ]);

    let candles = CoinGeckoParser::parse_ohlc(payload).unwrap();

    assert_eq!(candles.len(), 2);
    assert_eq!(candles[0].timestamp, 1518220800000);
    assert_eq!(candles[0].open, Decimal::from_str("8566.35").unwrap());
    assert_eq!(candles[1].low, Decimal::from_str("8300.25").unwrap());
}

#[test]
fn test_micro_cap_prices_keep_precision() {
    let payload: serde_json::Value =
        serde_json::from_str("[[1518220800000, 2.5e-9, 3E-9, 1.05e-9, 2.75e-9]]").unwrap();

    let candle = &CoinGeckoParser::parse_ohlc(payload).unwrap()[0];
    assert_eq!(candle.open, Decimal::from_str("0.0000000025").unwrap());
    assert_eq!(candle.high, Decimal::from_str("0.000000003").unwrap());
    assert_eq!(candle.low, Decimal::from_str("0.00000000105").unwrap());
}

#[test]
fn test_float_timestamp_accepted() {
    let payload: serde_json::Value =
        serde_json::from_str("[[1518220800000.0, 1, 1, 1, 1]]").unwrap();
    assert_eq!(
        CoinGeckoParser::parse_ohlc(payload).unwrap()[0].timestamp,
        1518220800000
    );
}

#[test]
fn test_error_object_is_decode_error() {
    let err = CoinGeckoParser::parse_ohlc(json!({"error": "coin not found"})).unwrap_err();
    assert!(err.is_decode());
    assert!(err.to_string().contains("coin not found"));
}

#[test]
fn test_malformed_rows_are_decode_errors() {
    let cases = [
        json!([[1518220800000i64, 1, 1, 1]]),
        json!([[1518220800000i64, 1, 1, 1, 1, 1]]),
        json!([[1518220800000i64, "abc", 1, 1, 1]]),
        json!([[1518220800000i64, null, 1, 1, 1]]),
        json!([["yesterday", 1, 1, 1, 1]]),
        json!(["not a row"]),
        json!("nope"),
    ];

    for payload in cases {
        let result = CoinGeckoParser::parse_ohlc(payload.clone());
        assert!(
            matches!(result, Err(FetchError::ParseError(_))),
            "expected decode error for {payload}"
        );
    }
}

#[test]
fn test_empty_payload_is_no_data() {
    assert!(CoinGeckoParser::parse_ohlc(json!([])).unwrap().is_empty());
}
