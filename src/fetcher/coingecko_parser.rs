//! CoinGecko response parser
//!
//! Stateless conversion of CoinGecko JSON payloads into typed records. Prices come
//! back as JSON numbers, sometimes in scientific notation for micro-cap assets, so
//! they are parsed from their textual form straight into `Decimal` without passing
//! through `f64`.

use crate::fetcher::{FetchError, FetcherResult};
use crate::Candle;
use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;

/// Stateless parser for CoinGecko API responses
pub struct CoinGeckoParser;

impl CoinGeckoParser {
    /// Parse an OHLC response into candles
    ///
    /// # Format
    /// `[[timestamp_ms, open, high, low, close], ...]`
    ///
    /// # Errors
    /// Returns [`FetchError::ParseError`] if the payload is not an array of 5-element
    /// numeric rows.
    pub fn parse_ohlc(payload: Value) -> FetcherResult<Vec<Candle>> {
        let rows = match payload {
            Value::Array(rows) => rows,
            Value::Object(obj) => {
                // Error bodies sometimes arrive with a 200 status
                let detail = obj
                    .get("error")
                    .or_else(|| obj.get("status"))
                    .map(Value::to_string)
                    .unwrap_or_else(|| "object".to_string());
                return Err(FetchError::ParseError(format!(
                    "Expected OHLC array, got {detail}"
                )));
            }
            other => {
                return Err(FetchError::ParseError(format!(
                    "Expected OHLC array, got {other}"
                )))
            }
        };

        let mut candles = Vec::with_capacity(rows.len());
        for row in rows {
            let arr = row
                .as_array()
                .ok_or_else(|| FetchError::ParseError("OHLC row is not an array".to_string()))?;

            if arr.len() != 5 {
                return Err(FetchError::ParseError(format!(
                    "Expected 5 elements in OHLC row, got {}",
                    arr.len()
                )));
            }

            candles.push(Candle {
                timestamp: Self::parse_timestamp(&arr[0])?,
                open: Self::parse_decimal(&arr[1], "open")?,
                high: Self::parse_decimal(&arr[2], "high")?,
                low: Self::parse_decimal(&arr[3], "low")?,
                close: Self::parse_decimal(&arr[4], "close")?,
            });
        }

        Ok(candles)
    }

    /// Parse a millisecond timestamp (integer, or float with no fractional part)
    fn parse_timestamp(value: &Value) -> FetcherResult<i64> {
        if let Some(ts) = value.as_i64() {
            return Ok(ts);
        }

        match value.as_f64() {
            Some(ts) if ts.fract() == 0.0 && ts.abs() < i64::MAX as f64 => Ok(ts as i64),
            _ => Err(FetchError::ParseError(format!("Invalid timestamp: {value}"))),
        }
    }

    /// Parse a decimal from a JSON number or numeric string
    fn parse_decimal(value: &Value, field_name: &str) -> FetcherResult<Decimal> {
        let text = match value {
            Value::Number(n) => n.to_string(),
            Value::String(s) => s.clone(),
            other => {
                return Err(FetchError::ParseError(format!(
                    "{field_name} is not numeric: {other}"
                )))
            }
        };

        let parsed = if text.contains(['e', 'E']) {
            Decimal::from_scientific(&text)
        } else {
            Decimal::from_str(&text)
        };

        parsed.map_err(|e| FetchError::ParseError(format!("Failed to parse {field_name}: {e}")))
    }
}
