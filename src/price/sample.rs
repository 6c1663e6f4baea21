//! Price samples, per-token series and the SMA cache

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// One observed spot price
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceSample {
    pub timestamp: DateTime<Utc>,
    /// Base currency per token
    pub price: f64,
    /// Quote source that produced it
    pub source: String,
}

impl PriceSample {
    pub fn new(price: f64, source: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            price,
            source: source.into(),
        }
    }

    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.timestamp
    }
}

/// Named moving-average windows
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SmaWindow {
    #[serde(rename = "5min")]
    FiveMinutes,
    #[serde(rename = "1hour")]
    OneHour,
    #[serde(rename = "6hour")]
    SixHours,
    #[serde(rename = "24hour", alias = "1day")]
    OneDay,
    #[serde(rename = "7day")]
    SevenDays,
}

impl SmaWindow {
    pub const ALL: [SmaWindow; 5] = [
        SmaWindow::FiveMinutes,
        SmaWindow::OneHour,
        SmaWindow::SixHours,
        SmaWindow::OneDay,
        SmaWindow::SevenDays,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            SmaWindow::FiveMinutes => "5min",
            SmaWindow::OneHour => "1hour",
            SmaWindow::SixHours => "6hour",
            SmaWindow::OneDay => "24hour",
            SmaWindow::SevenDays => "7day",
        }
    }

    pub fn duration(&self) -> Duration {
        match self {
            SmaWindow::FiveMinutes => Duration::minutes(5),
            SmaWindow::OneHour => Duration::hours(1),
            SmaWindow::SixHours => Duration::hours(6),
            SmaWindow::OneDay => Duration::hours(24),
            SmaWindow::SevenDays => Duration::days(7),
        }
    }
}

impl fmt::Display for SmaWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for SmaWindow {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "5min" | "5m" => Ok(SmaWindow::FiveMinutes),
            "1hour" | "1h" => Ok(SmaWindow::OneHour),
            "6hour" | "6h" => Ok(SmaWindow::SixHours),
            "24hour" | "24h" | "1day" | "1d" => Ok(SmaWindow::OneDay),
            "7day" | "7d" => Ok(SmaWindow::SevenDays),
            other => Err(Error::Config(format!("Unknown SMA window: {}", other))),
        }
    }
}

/// Ordered samples for one token plus derived values
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceSeries {
    pub token: String,
    #[serde(default)]
    pub symbol: String,
    pub samples: Vec<PriceSample>,
    /// Window label -> last published average
    #[serde(default)]
    pub smas: BTreeMap<String, f64>,
    /// Timestamp of the newest sample the SMA cache was derived from
    #[serde(default)]
    pub sma_as_of: Option<DateTime<Utc>>,
    #[serde(default)]
    pub change_24h: Option<f64>,
    pub added_at: DateTime<Utc>,
}

impl PriceSeries {
    pub fn new(token: impl Into<String>, symbol: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            symbol: symbol.into(),
            samples: Vec::new(),
            smas: BTreeMap::new(),
            sma_as_of: None,
            change_24h: None,
            added_at: Utc::now(),
        }
    }

    /// Append a sample, keeping timestamp order
    pub fn push(&mut self, sample: PriceSample) {
        let in_order = self
            .samples
            .last()
            .map(|last| last.timestamp <= sample.timestamp)
            .unwrap_or(true);

        if in_order {
            self.samples.push(sample);
        } else {
            let idx = self
                .samples
                .partition_point(|s| s.timestamp <= sample.timestamp);
            self.samples.insert(idx, sample);
        }

        if let Some(latest) = self.latest() {
            let now = latest.timestamp;
            self.change_24h = self.change_pct(now, Duration::hours(24));
        }
    }

    /// Drop samples older than `cutoff`; returns how many were removed
    pub fn prune(&mut self, cutoff: DateTime<Utc>) -> usize {
        let before = self.samples.len();
        self.samples.retain(|s| s.timestamp >= cutoff);
        before - self.samples.len()
    }

    /// Refresh the SMA cache. A window with fewer than `min_samples` keeps
    /// its previous value.
    pub fn recompute_smas(&mut self, now: DateTime<Utc>, min_samples: usize) {
        for window in SmaWindow::ALL {
            let since = now - window.duration();
            let in_window: Vec<f64> = self
                .samples
                .iter()
                .filter(|s| s.timestamp >= since && s.timestamp <= now)
                .map(|s| s.price)
                .collect();

            if in_window.len() >= min_samples.max(1) {
                let avg = in_window.iter().sum::<f64>() / in_window.len() as f64;
                self.smas.insert(window.label().to_string(), avg);
            }
        }
        self.sma_as_of = self
            .samples
            .iter()
            .rev()
            .find(|s| s.timestamp <= now)
            .map(|s| s.timestamp);
    }

    pub fn sma(&self, window: SmaWindow) -> Option<f64> {
        self.smas.get(window.label()).copied()
    }

    pub fn latest(&self) -> Option<&PriceSample> {
        self.samples.last()
    }

    pub fn current_price(&self) -> Option<f64> {
        self.latest().map(|s| s.price)
    }

    /// Highest price at or after `since`
    pub fn highest_since(&self, since: DateTime<Utc>) -> Option<f64> {
        self.samples
            .iter()
            .filter(|s| s.timestamp >= since)
            .map(|s| s.price)
            .reduce(f64::max)
    }

    /// Number of samples at or after `since`
    pub fn count_since(&self, since: DateTime<Utc>) -> usize {
        self.samples.iter().filter(|s| s.timestamp >= since).count()
    }

    /// Price of the sample closest to `at`
    pub fn price_at(&self, at: DateTime<Utc>) -> Option<f64> {
        self.samples
            .iter()
            .min_by_key(|s| (s.timestamp - at).num_milliseconds().abs())
            .map(|s| s.price)
    }

    /// Percentage change from `now - window` to the latest sample
    pub fn change_pct(&self, now: DateTime<Utc>, window: Duration) -> Option<f64> {
        let current = self.current_price()?;
        let past = self.price_at(now - window)?;
        if past <= 0.0 {
            return None;
        }
        Some((current - past) / past * 100.0)
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_at(now: DateTime<Utc>, secs_ago: i64, price: f64) -> PriceSample {
        PriceSample {
            timestamp: now - Duration::seconds(secs_ago),
            price,
            source: "test".into(),
        }
    }

    #[test]
    fn test_sma_is_mean_of_window() {
        let now = Utc::now();
        let mut series = PriceSeries::new("0xtoken", "TKN");
        series.push(sample_at(now, 600, 10.0)); // outside 5min
        series.push(sample_at(now, 240, 1.0));
        series.push(sample_at(now, 120, 2.0));
        series.push(sample_at(now, 0, 3.0));

        series.recompute_smas(now, 3);

        assert_eq!(series.sma(SmaWindow::FiveMinutes), Some(2.0));
        assert_eq!(series.sma(SmaWindow::OneHour), Some(4.0));
        assert_eq!(series.sma_as_of, Some(now));
    }

    #[test]
    fn test_sma_keeps_previous_value_below_min_samples() {
        let now = Utc::now();
        let mut series = PriceSeries::new("0xtoken", "TKN");
        series.smas.insert("5min".into(), 7.0);
        series.push(sample_at(now, 60, 1.0));
        series.push(sample_at(now, 0, 2.0));

        series.recompute_smas(now, 3);
        assert_eq!(series.sma(SmaWindow::FiveMinutes), Some(7.0));
        assert_eq!(series.sma(SmaWindow::SevenDays), None);
    }

    #[test]
    fn test_prune_and_order() {
        let now = Utc::now();
        let mut series = PriceSeries::new("0xtoken", "TKN");
        series.push(sample_at(now, 10, 1.0));
        series.push(sample_at(now, 30, 2.0)); // out of order
        series.push(sample_at(now, 0, 3.0));

        let prices: Vec<f64> = series.samples.iter().map(|s| s.price).collect();
        assert_eq!(prices, vec![2.0, 1.0, 3.0]);

        let removed = series.prune(now - Duration::seconds(20));
        assert_eq!(removed, 1);
        assert_eq!(series.len(), 2);
    }

    #[test]
    fn test_highest_and_price_at() {
        let now = Utc::now();
        let mut series = PriceSeries::new("0xtoken", "TKN");
        series.push(sample_at(now, 400, 5.0));
        series.push(sample_at(now, 200, 2.0));
        series.push(sample_at(now, 100, 1.7));

        assert_eq!(series.highest_since(now - Duration::seconds(300)), Some(2.0));
        assert_eq!(series.highest_since(now - Duration::seconds(500)), Some(5.0));
        assert_eq!(series.price_at(now - Duration::seconds(390)), Some(5.0));

        let change = series.change_pct(now, Duration::seconds(200)).unwrap();
        assert!((change - (-15.0)).abs() < 1e-9);
    }

    #[test]
    fn test_window_parse_and_serde() {
        assert_eq!("1day".parse::<SmaWindow>().unwrap(), SmaWindow::OneDay);
        assert!("3week".parse::<SmaWindow>().is_err());
        let json = serde_json::to_string(&SmaWindow::SixHours).unwrap();
        assert_eq!(json, "\"6hour\"");
    }
}
