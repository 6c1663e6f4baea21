//! Uniswap V3 quoting and router calldata
//!
//! Quotes every configured fee tier and keeps the best output. With a
//! receiver, the quote carries `exactInputSingle` calldata whose minimum
//! output is the quoted amount less slippage.

use async_trait::async_trait;
use ethers::prelude::*;
use futures::future::join_all;
use std::sync::Arc;
use tracing::debug;

use crate::config::UniswapConfig;
use crate::error::{Error, Result};
use crate::execution::chain::{parse_address, ChainClient};
use crate::execution::types::{QuoteRequest, Route, SwapQuote};
use crate::execution::QuoteSource;

abigen!(
    UniswapQuoter,
    r#"[
        function quoteExactInputSingle(address tokenIn, address tokenOut, uint24 fee, uint256 amountIn, uint160 sqrtPriceLimitX96) external returns (uint256 amountOut)
    ]"#
);

// Tuple parameters need the JSON form; the human-readable parser rejects them
abigen!(
    UniswapRouter,
    r#"[
        {
            "type": "function",
            "name": "exactInputSingle",
            "stateMutability": "payable",
            "inputs": [
                {
                    "name": "params",
                    "type": "tuple",
                    "components": [
                        { "name": "tokenIn", "type": "address" },
                        { "name": "tokenOut", "type": "address" },
                        { "name": "fee", "type": "uint24" },
                        { "name": "recipient", "type": "address" },
                        { "name": "deadline", "type": "uint256" },
                        { "name": "amountIn", "type": "uint256" },
                        { "name": "amountOutMinimum", "type": "uint256" },
                        { "name": "sqrtPriceLimitX96", "type": "uint160" }
                    ]
                }
            ],
            "outputs": [{ "name": "amountOut", "type": "uint256" }]
        }
    ]"#
);

pub struct UniswapV3 {
    chain: Arc<ChainClient>,
    quoter: Address,
    router: Address,
    fee_tiers: Vec<u32>,
    deadline_secs: u64,
}

impl UniswapV3 {
    pub fn new(chain: Arc<ChainClient>, config: &UniswapConfig) -> Result<Self> {
        Ok(Self {
            chain,
            quoter: parse_address(&config.quoter)?,
            router: parse_address(&config.router)?,
            fee_tiers: config.fee_tiers.clone(),
            deadline_secs: config.deadline_secs,
        })
    }

    async fn quote_tier(&self, token_in: Address, token_out: Address, fee: u32, amount_in: U256) -> Option<U256> {
        let quoter = UniswapQuoter::new(self.quoter, self.chain.provider());
        match quoter
            .quote_exact_input_single(token_in, token_out, fee, amount_in, U256::zero())
            .call()
            .await
        {
            Ok(out) if !out.is_zero() => Some(out),
            Ok(_) => None,
            Err(e) => {
                debug!("No pool at fee tier {}: {}", fee, e);
                None
            }
        }
    }
}

/// Apply slippage in basis points to a raw amount
pub fn min_output(amount_out: U256, slippage_pct: f64) -> U256 {
    let bps = ((100.0 - slippage_pct.clamp(0.0, 100.0)) * 100.0).round() as u64;
    amount_out * U256::from(bps) / U256::from(10_000u64)
}

#[async_trait]
impl QuoteSource for UniswapV3 {
    async fn quote(&self, request: &QuoteRequest) -> Result<SwapQuote> {
        let token_in = parse_address(&request.token_in)?;
        let token_out = parse_address(&request.token_out)?;
        let amount_in = self.chain.to_units(token_in, request.amount_in).await?;
        if amount_in.is_zero() {
            return Err(Error::InvalidAmount(request.amount_in.to_string()));
        }

        let quotes = join_all(
            self.fee_tiers
                .iter()
                .map(|fee| async move { (*fee, self.quote_tier(token_in, token_out, *fee, amount_in).await) }),
        )
        .await;

        let (fee, amount_out) = quotes
            .into_iter()
            .filter_map(|(fee, out)| out.map(|o| (fee, o)))
            .max_by_key(|(_, out)| *out)
            .ok_or_else(|| Error::NoLiquidity {
                token_in: request.token_in.clone(),
                token_out: request.token_out.clone(),
            })?;

        let expected_output = self.chain.from_units(token_out, amount_out).await?;
        let min_out = min_output(amount_out, request.slippage_pct);

        let data = match &request.receiver {
            Some(receiver) => {
                let recipient = parse_address(receiver)?;
                let deadline = U256::from(chrono::Utc::now().timestamp() as u64 + self.deadline_secs);
                let router = UniswapRouter::new(self.router, self.chain.provider());
                router
                    .exact_input_single((
                        token_in,
                        token_out,
                        fee,
                        recipient,
                        deadline,
                        amount_in,
                        min_out,
                        U256::zero(),
                    ))
                    .calldata()
                    .map(|b| b.to_string())
                    .unwrap_or_default()
            }
            None => String::new(),
        };

        debug!("Uniswap best tier {} -> {} out", fee, expected_output);

        Ok(SwapQuote {
            token_in: request.token_in.clone(),
            token_out: request.token_out.clone(),
            amount_in: request.amount_in,
            expected_output,
            min_output: self.chain.from_units(token_out, min_out).await?,
            to: format!("{:?}", self.router),
            data,
            value: "0".to_string(),
            gas_estimate: None,
            route: Route::UniswapV3 { fee },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_router_calldata_selector() {
        let provider = Provider::<Http>::try_from("http://localhost:8545").unwrap();
        let router = UniswapRouter::new(Address::zero(), Arc::new(provider));
        let calldata = router
            .exact_input_single((
                Address::repeat_byte(1),
                Address::repeat_byte(2),
                3000,
                Address::repeat_byte(3),
                U256::from(1_700_000_000u64),
                U256::from(10u64).pow(18.into()),
                U256::from(995u64),
                U256::zero(),
            ))
            .calldata()
            .unwrap();

        // exactInputSingle((address,address,uint24,address,uint256,uint256,uint256,uint160))
        assert_eq!(&calldata[..4], &[0x41, 0x4b, 0xf3, 0x89]);
        assert_eq!(calldata.len(), 4 + 8 * 32);
    }

    #[test]
    fn test_min_output() {
        let out = U256::from(1_000_000u64);
        assert_eq!(min_output(out, 0.5), U256::from(995_000u64));
        assert_eq!(min_output(out, 0.0), out);
        assert_eq!(min_output(out, 150.0), U256::zero());
    }
}
