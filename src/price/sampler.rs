//! Quote-based spot price sampling
//!
//! A sample is the quoted output of a fixed notional of the token swapped
//! into the base currency. Failed fetches fall back to the last good sample
//! while it is younger than the staleness ceiling.

use chrono::Utc;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::SamplerConfig;
use crate::error::{Error, Result};
use crate::execution::{QuoteRequest, QuoteSource};
use crate::price::sample::PriceSample;

pub struct PriceSampler {
    source: Arc<dyn QuoteSource>,
    base_token: String,
    notional: f64,
    timeout: Duration,
    staleness_ceiling: chrono::Duration,
    max_failures: u32,
    /// Last good sample per token
    cache: DashMap<String, PriceSample>,
    /// Consecutive failed fetches per token
    failures: DashMap<String, u32>,
}

impl PriceSampler {
    pub fn new(source: Arc<dyn QuoteSource>, base_token: impl Into<String>, config: &SamplerConfig) -> Self {
        Self {
            source,
            base_token: base_token.into().to_lowercase(),
            notional: config.quote_notional,
            timeout: Duration::from_millis(config.quote_timeout_ms),
            staleness_ceiling: chrono::Duration::seconds(config.staleness_ceiling_secs as i64),
            max_failures: config.max_consecutive_failures,
            cache: DashMap::new(),
            failures: DashMap::new(),
        }
    }

    /// Fetch the current spot price of `token` in base currency
    pub async fn sample(&self, token: &str) -> Result<PriceSample> {
        let token = token.to_lowercase();

        if token == self.base_token {
            return Ok(PriceSample::new(1.0, "identity"));
        }

        match self.fetch(&token).await {
            Ok(sample) => {
                self.failures.remove(&token);
                self.cache.insert(token.clone(), sample.clone());
                debug!("Sampled {}: {:.8} via {}", token, sample.price, sample.source);
                Ok(sample)
            }
            Err(e) => {
                let count = {
                    let mut entry = self.failures.entry(token.clone()).or_insert(0);
                    *entry += 1;
                    *entry
                };
                warn!("Price fetch failed for {} ({} in a row): {}", token, count, e);

                match self.cache.get(&token).map(|s| s.clone()) {
                    Some(cached) => {
                        let age = cached.age(Utc::now());
                        if age < self.staleness_ceiling {
                            debug!("Serving cached price for {} ({}s old)", token, age.num_seconds());
                            Ok(cached)
                        } else {
                            Err(Error::StaleData {
                                age_secs: age.num_seconds(),
                            })
                        }
                    }
                    None => Err(e),
                }
            }
        }
    }

    async fn fetch(&self, token: &str) -> Result<PriceSample> {
        let request = QuoteRequest::new(token, &self.base_token, self.notional);

        let quote = tokio::time::timeout(self.timeout, self.source.quote(&request))
            .await
            .map_err(|_| Error::QuoteTimeout(self.timeout.as_millis() as u64))??;

        if quote.expected_output <= 0.0 || !quote.expected_output.is_finite() {
            return Err(Error::NoLiquidity {
                token_in: token.to_string(),
                token_out: self.base_token.clone(),
            });
        }

        Ok(PriceSample::new(
            quote.expected_output / self.notional,
            quote.route.to_string(),
        ))
    }

    pub fn failure_count(&self, token: &str) -> u32 {
        self.failures
            .get(&token.to_lowercase())
            .map(|c| *c)
            .unwrap_or(0)
    }

    /// Tokens whose consecutive failures reached the limit
    pub fn flagged_for_removal(&self) -> Vec<String> {
        self.failures
            .iter()
            .filter(|e| *e.value() >= self.max_failures)
            .map(|e| e.key().clone())
            .collect()
    }

    /// Forget cached state for a token
    pub fn forget(&self, token: &str) {
        let token = token.to_lowercase();
        self.cache.remove(&token);
        self.failures.remove(&token);
    }

    pub fn cached(&self, token: &str) -> Option<PriceSample> {
        self.cache.get(&token.to_lowercase()).map(|s| s.clone())
    }

    /// Seed the cache, e.g. from persisted history
    pub fn seed(&self, token: &str, sample: PriceSample) {
        self.cache.insert(token.to_lowercase(), sample);
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::execution::{Route, SwapQuote};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Quote source returning scripted rates per token_in
    #[derive(Default)]
    pub struct ScriptedQuotes {
        pub rates: Mutex<std::collections::HashMap<String, Result<f64>>>,
    }

    impl ScriptedQuotes {
        pub fn set(&self, token: &str, rate: Result<f64>) {
            self.rates.lock().unwrap().insert(token.to_lowercase(), rate);
        }
    }

    #[async_trait]
    impl QuoteSource for ScriptedQuotes {
        async fn quote(&self, request: &QuoteRequest) -> Result<SwapQuote> {
            let rates = self.rates.lock().unwrap();
            let rate = match rates.get(&request.token_in.to_lowercase()) {
                Some(Ok(rate)) => *rate,
                Some(Err(_)) | None => return Err(Error::NoRoute(request.token_in.clone())),
            };
            Ok(SwapQuote {
                token_in: request.token_in.clone(),
                token_out: request.token_out.clone(),
                amount_in: request.amount_in,
                expected_output: request.amount_in * rate,
                min_output: request.amount_in * rate * (1.0 - request.slippage_pct / 100.0),
                to: String::new(),
                data: String::new(),
                value: "0".into(),
                gas_estimate: None,
                route: Route::Aggregator,
            })
        }
    }

    fn sampler(quotes: Arc<ScriptedQuotes>, max_failures: u32) -> PriceSampler {
        let config = SamplerConfig {
            max_consecutive_failures: max_failures,
            ..SamplerConfig::default()
        };
        PriceSampler::new(quotes, "0xbase", &config)
    }

    #[tokio::test]
    async fn test_sample_uses_quoted_output() {
        let quotes = Arc::new(ScriptedQuotes::default());
        quotes.set("0xaaa", Ok(2.5));
        let sampler = sampler(quotes, 10);

        let sample = sampler.sample("0xAAA").await.unwrap();
        assert!((sample.price - 2.5).abs() < 1e-12);
        assert_eq!(sample.source, "aggregator");
        assert_eq!(sampler.failure_count("0xaaa"), 0);
    }

    #[tokio::test]
    async fn test_failure_serves_cache_then_resets() {
        let quotes = Arc::new(ScriptedQuotes::default());
        quotes.set("0xaaa", Ok(1.0));
        let sampler = sampler(quotes.clone(), 10);
        sampler.sample("0xaaa").await.unwrap();

        quotes.set("0xaaa", Err(Error::NoRoute("x".into())));
        let cached = sampler.sample("0xaaa").await.unwrap();
        assert_eq!(cached.price, 1.0);
        assert_eq!(sampler.failure_count("0xaaa"), 1);

        quotes.set("0xaaa", Ok(1.2));
        sampler.sample("0xaaa").await.unwrap();
        assert_eq!(sampler.failure_count("0xaaa"), 0);
    }

    #[tokio::test]
    async fn test_stale_cache_is_rejected() {
        let quotes = Arc::new(ScriptedQuotes::default());
        let sampler = sampler(quotes, 10);
        sampler.seed(
            "0xaaa",
            PriceSample {
                timestamp: Utc::now() - chrono::Duration::hours(25),
                price: 1.0,
                source: "old".into(),
            },
        );

        let err = sampler.sample("0xaaa").await.unwrap_err();
        assert!(matches!(err, Error::StaleData { .. }));
        assert!(err.is_skip_tick());
    }

    #[tokio::test]
    async fn test_flagged_after_consecutive_failures() {
        let quotes = Arc::new(ScriptedQuotes::default());
        let sampler = sampler(quotes, 3);

        for _ in 0..3 {
            assert!(sampler.sample("0xdead").await.is_err());
        }
        assert_eq!(sampler.flagged_for_removal(), vec!["0xdead".to_string()]);

        sampler.forget("0xdead");
        assert!(sampler.flagged_for_removal().is_empty());
    }

    #[tokio::test]
    async fn test_base_token_is_identity() {
        let sampler = sampler(Arc::new(ScriptedQuotes::default()), 3);
        assert_eq!(sampler.sample("0xBASE").await.unwrap().price, 1.0);
    }
}
