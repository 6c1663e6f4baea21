//! HoldStation-style aggregator quote client
//!
//! Request: `{ tokenIn, tokenOut, amountIn, slippage, fee, receiver }`.
//! Response: `{ to, data, value, expectedOutput, gasEstimate }`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::{AggregatorConfig, PARTNER_CODE_ENV};
use crate::error::{Error, Result};
use crate::execution::types::{QuoteRequest, Route, SwapQuote};
use crate::execution::QuoteSource;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AggregatorQuoteRequest<'a> {
    token_in: &'a str,
    token_out: &'a str,
    amount_in: String,
    slippage: String,
    fee: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    receiver: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    partner_code: Option<String>,
}

/// Numbers arrive either as JSON numbers or decimal strings
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum Numeric {
    Number(f64),
    Text(String),
}

impl Numeric {
    fn as_f64(&self) -> Option<f64> {
        match self {
            Numeric::Number(n) => Some(*n),
            Numeric::Text(s) => s.trim().parse().ok(),
        }
    }

    fn as_string(&self) -> String {
        match self {
            Numeric::Number(n) => format!("{}", n),
            Numeric::Text(s) => s.clone(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AggregatorQuoteResponse {
    #[serde(default)]
    to: Option<String>,
    #[serde(default)]
    data: Option<String>,
    #[serde(default)]
    value: Option<Numeric>,
    #[serde(default)]
    expected_output: Option<Numeric>,
    #[serde(default)]
    gas_estimate: Option<Numeric>,
    #[serde(default)]
    error: Option<String>,
}

pub struct AggregatorClient {
    client: reqwest::Client,
    quote_url: String,
    router: String,
    fee_pct: f64,
    timeout_ms: u64,
    partner_code: Option<String>,
}

impl AggregatorClient {
    pub fn new(config: &AggregatorConfig) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_millis(config.timeout_ms))
                .build()
                .unwrap_or_default(),
            quote_url: config.quote_url.clone(),
            router: config.router.to_lowercase(),
            fee_pct: config.fee_pct,
            timeout_ms: config.timeout_ms,
            partner_code: std::env::var(PARTNER_CODE_ENV).ok().filter(|c| !c.is_empty()),
        }
    }

    fn interpret(&self, request: &QuoteRequest, response: AggregatorQuoteResponse) -> Result<SwapQuote> {
        if let Some(error) = response.error {
            return Err(Error::NoRoute(error));
        }

        let expected_output = response
            .expected_output
            .as_ref()
            .and_then(Numeric::as_f64)
            .unwrap_or(0.0);
        if expected_output <= 0.0 {
            return Err(Error::NoLiquidity {
                token_in: request.token_in.clone(),
                token_out: request.token_out.clone(),
            });
        }

        let to = response.to.unwrap_or_default().to_lowercase();
        let data = response.data.unwrap_or_default();
        if !data.is_empty() && to != self.router {
            warn!("Aggregator routed through {} instead of {}", to, self.router);
            return Err(Error::NoRoute(format!("unexpected router {}", to)));
        }

        Ok(SwapQuote {
            token_in: request.token_in.clone(),
            token_out: request.token_out.clone(),
            amount_in: request.amount_in,
            expected_output,
            min_output: expected_output * (1.0 - request.slippage_pct / 100.0),
            to,
            data,
            value: response
                .value
                .as_ref()
                .map(Numeric::as_string)
                .unwrap_or_else(|| "0".to_string()),
            gas_estimate: response
                .gas_estimate
                .as_ref()
                .and_then(Numeric::as_f64)
                .map(|g| g as u64),
            route: Route::Aggregator,
        })
    }
}

#[async_trait]
impl QuoteSource for AggregatorClient {
    async fn quote(&self, request: &QuoteRequest) -> Result<SwapQuote> {
        let body = AggregatorQuoteRequest {
            token_in: &request.token_in,
            token_out: &request.token_out,
            amount_in: request.amount_in.to_string(),
            slippage: request.slippage_pct.to_string(),
            fee: self.fee_pct.to_string(),
            receiver: request.receiver.as_deref(),
            partner_code: self.partner_code.clone(),
        };

        debug!(
            "Aggregator quote {} {} -> {}",
            request.amount_in, request.token_in, request.token_out
        );

        let resp = self
            .client
            .post(&self.quote_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::QuoteTimeout(self.timeout_ms)
                } else {
                    Error::Http(e.to_string())
                }
            })?;

        if !resp.status().is_success() {
            return Err(Error::NoRoute(format!("aggregator returned {}", resp.status())));
        }

        let parsed: AggregatorQuoteResponse = resp
            .json()
            .await
            .map_err(|e| Error::Http(format!("Failed to parse quote: {}", e)))?;

        self.interpret(request, parsed)
    }
}
