//! Live telemetry extraction from classified log lines
//!
//! One compiled pattern per field. Each matcher updates exactly its own
//! field of [`LiveState`]; unrecognized lines are a no-op, so applying
//! the same line twice is idempotent.

use crate::models::{LiveState, TradeSignal};
use regex::Regex;

pub struct TelemetryPatterns {
    price: Regex,
    prediction: Regex,
    profit: Regex,
}

impl TelemetryPatterns {
    pub fn new() -> Self {
        // Hard-coded patterns; compilation cannot fail
        Self {
            price: Regex::new(r"Price: \$([0-9][0-9,]*(?:\.[0-9]+)?)").expect("price pattern"),
            prediction: Regex::new(r"AI Prediction: ([0-9]+(?:\.[0-9]+)?)%")
                .expect("prediction pattern"),
            profit: Regex::new(r"Profit: \$(-?[0-9][0-9,]*(?:\.[0-9]+)?)")
                .expect("profit pattern"),
        }
    }

    /// Current asset price, e.g. `BTC Price: $64,123.50`
    pub fn price(&self, line: &str) -> Option<f64> {
        self.price
            .captures(line)
            .and_then(|c| parse_thousands(c.get(1)?.as_str()))
    }

    /// Model probability, e.g. `AI Prediction: 61.40%` -> 0.614
    pub fn prediction(&self, line: &str) -> Option<f64> {
        self.prediction
            .captures(line)
            .and_then(|c| c.get(1)?.as_str().parse::<f64>().ok())
            .map(|pct| pct / 100.0)
    }

    /// Trade signal keyword
    pub fn signal(&self, line: &str) -> Option<TradeSignal> {
        if line.contains("STRONG BUY SIGNAL") {
            Some(TradeSignal::Buy)
        } else if line.contains("STRONG SELL SIGNAL") {
            Some(TradeSignal::Sell)
        } else if line.contains("HOLD") {
            Some(TradeSignal::Hold)
        } else {
            None
        }
    }

    /// Running profit, e.g. `Profit: $-12.34`
    pub fn profit(&self, line: &str) -> Option<f64> {
        self.profit
            .captures(line)
            .and_then(|c| parse_thousands(c.get(1)?.as_str()))
    }

    /// Apply all matchers to one line. Recognized fields are replaced
    /// with the newest value; everything else is left untouched.
    pub fn apply(&self, line: &str, state: &mut LiveState) {
        if let Some(price) = self.price(line) {
            state.current_price = Some(price);
        }
        if let Some(prediction) = self.prediction(line) {
            state.prediction = Some(prediction);
        }
        if let Some(signal) = self.signal(line) {
            state.last_signal = Some(signal);
        }
        if let Some(profit) = self.profit(line) {
            state.profit = Some(profit);
        }
    }
}

impl Default for TelemetryPatterns {
    fn default() -> Self {
        Self::new()
    }
}

/// Numeric parse tolerating thousands separators
fn parse_thousands(raw: &str) -> Option<f64> {
    raw.replace(',', "").parse().ok()
}
