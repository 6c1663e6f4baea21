//! Interactive menus

use anyhow::Result;
use dialoguer::{Confirm, Input, Select};
use std::sync::Arc;

use crate::cli::commands::{self, report, StrategyOptions, TriggerOptions};
use crate::cli::{console, Amount};
use crate::context::AppContext;
use crate::execution::TradeSide;
use crate::price::SmaWindow;
use crate::strategy::StepDistribution;
use crate::trigger::TriggerCondition;

const MAIN_ITEMS: [&str; 11] = [
    "Buy",
    "Sell",
    "Quote",
    "Balance",
    "Status",
    "Strategies",
    "Price triggers",
    "Tracked tokens",
    "Wallets",
    "Console",
    "Exit",
];

fn select(prompt: &str, items: &[&str]) -> Result<usize> {
    Ok(Select::new()
        .with_prompt(prompt)
        .items(items)
        .default(0)
        .interact()?)
}

fn input(prompt: &str) -> Result<String> {
    Ok(Input::<String>::new().with_prompt(prompt).interact_text()?)
}

fn input_or(prompt: &str, default: String) -> Result<String> {
    Ok(Input::<String>::new()
        .with_prompt(prompt)
        .default(default)
        .interact_text()?)
}

fn optional_f64(prompt: &str) -> Result<Option<f64>> {
    let raw: String = Input::new()
        .with_prompt(format!("{} (blank to skip)", prompt))
        .allow_empty(true)
        .interact_text()?;
    if raw.trim().is_empty() {
        return Ok(None);
    }
    Ok(Some(raw.trim().parse()?))
}

fn token_prompt(ctx: &AppContext) -> Result<String> {
    let mut symbols: Vec<&String> = ctx.config.tokens.symbols.keys().collect();
    symbols.sort();
    let hint = symbols
        .iter()
        .map(|s| s.as_str())
        .collect::<Vec<_>>()
        .join(", ");
    input(&format!("Token symbol or address [{}]", hint))
}

fn amount_prompt(prompt: &str) -> Result<Amount> {
    let raw = input(prompt)?;
    raw.parse().map_err(anyhow::Error::msg)
}

/// Top-level menu loop
pub async fn run(ctx: Arc<AppContext>) -> Result<()> {
    loop {
        println!();
        match select("Worldchain trader", &MAIN_ITEMS)? {
            0 => {
                let token = token_prompt(&ctx)?;
                let amount = amount_prompt(&format!("Amount of {} (or all, N%)", ctx.base_symbol()))?;
                report(commands::buy(&ctx, &token, amount, None, None, false).await);
            }
            1 => {
                let token = token_prompt(&ctx)?;
                let amount = amount_prompt("Amount (or all, N%)")?;
                report(commands::sell(&ctx, &token, amount, None, None, false).await);
            }
            2 => {
                let from = input_or("From", ctx.base_symbol().to_string())?;
                let to = token_prompt(&ctx)?;
                let amount: f64 = Input::new().with_prompt("Amount").interact_text()?;
                report(commands::quote(&ctx, &from, &to, amount).await);
            }
            3 => {
                let wallet = input_or("Wallet", ctx.config.wallet.default_wallet.clone())?;
                report(commands::balance(&ctx, Some(&wallet)).await);
            }
            4 => report(commands::status(&ctx).await),
            5 => strategies_menu(&ctx).await?,
            6 => triggers_menu(&ctx).await?,
            7 => track_menu(&ctx).await?,
            8 => wallets_menu(&ctx).await?,
            9 => return console::run(ctx).await,
            _ => break,
        }
    }

    ctx.save_all().await?;
    Ok(())
}

async fn strategies_menu(ctx: &Arc<AppContext>) -> Result<()> {
    let items = ["List", "Create", "Start", "Stop", "Delete", "Statistics", "Back"];
    match select("Strategies", &items)? {
        0 => report(commands::strategy_list(ctx).await),
        1 => {
            let options = strategy_wizard(ctx)?;
            let activate = Confirm::new()
                .with_prompt("Mark active now?")
                .default(true)
                .interact()?;
            report(commands::strategy_create(ctx, options, activate).await.map(|_| ()));
        }
        2 => {
            let key = input("Strategy id")?;
            report(commands::strategy_start(ctx, &key).await);
        }
        3 => {
            let key = input("Strategy id")?;
            report(commands::strategy_stop(ctx, &key).await);
        }
        4 => {
            let key = input("Strategy id")?;
            report(commands::strategy_delete(ctx, &key, false).await);
        }
        5 => report(commands::strategy_stats(ctx).await),
        _ => {}
    }
    Ok(())
}

fn strategy_wizard(ctx: &AppContext) -> Result<StrategyOptions> {
    let defaults = &ctx.config.strategy_defaults;
    let token = token_prompt(ctx)?;

    let dip: f64 = Input::new()
        .with_prompt("Dip threshold %")
        .default(defaults.dip_threshold_pct)
        .interact_text()?;
    let amount: f64 = Input::new()
        .with_prompt(format!("Amount per buy ({})", ctx.base_symbol()))
        .default(defaults.trade_amount)
        .interact_text()?;

    let mut options = StrategyOptions {
        token,
        dip: Some(dip),
        amount: Some(amount),
        ..Default::default()
    };

    match select("Profit taking", &["Single target", "Range (sell in steps)"])? {
        0 => {
            let target: f64 = Input::new()
                .with_prompt("Profit target %")
                .default(defaults.profit_target_pct)
                .interact_text()?;
            options.profit = Some(target);
        }
        _ => {
            options.profit_min = Some(Input::new().with_prompt("Lowest target %").interact_text()?);
            options.profit_max = Some(Input::new().with_prompt("Highest target %").interact_text()?);
            options.steps = Some(Input::new().with_prompt("Steps").default(3u32).interact_text()?);
            let distributions = [
                StepDistribution::Linear,
                StepDistribution::Aggressive,
                StepDistribution::Conservative,
            ];
            let labels: Vec<String> = distributions.iter().map(|d| d.to_string()).collect();
            let labels: Vec<&str> = labels.iter().map(String::as_str).collect();
            options.distribution = Some(distributions[select("Distribution", &labels)?]);
        }
    }

    options.stop_loss = optional_f64("Stop loss %")?;
    options.max_entries = Some(
        Input::new()
            .with_prompt("Max open entries")
            .default(defaults.max_entries)
            .interact_text()?,
    );
    Ok(options)
}

async fn triggers_menu(ctx: &Arc<AppContext>) -> Result<()> {
    match select("Price triggers", &["List", "Create", "Delete", "Back"])? {
        0 => report(commands::trigger_list(ctx).await),
        1 => {
            let token = token_prompt(ctx)?;
            let action = match select("Action", &["Buy", "Sell"])? {
                0 => TradeSide::Buy,
                _ => TradeSide::Sell,
            };
            let conditions = [
                TriggerCondition::PriceDrop,
                TriggerCondition::PriceRise,
                TriggerCondition::BelowSma,
                TriggerCondition::AboveSma,
            ];
            let labels: Vec<String> = conditions.iter().map(|c| c.to_string()).collect();
            let labels: Vec<&str> = labels.iter().map(String::as_str).collect();
            let condition = conditions[select("Condition", &labels)?];

            let threshold: f64 = Input::new().with_prompt("Threshold %").interact_text()?;
            let (timeframe_ms, sma_window) = match condition {
                TriggerCondition::PriceDrop | TriggerCondition::PriceRise => {
                    let minutes: u64 = Input::new()
                        .with_prompt("Timeframe (minutes)")
                        .default(60)
                        .interact_text()?;
                    (minutes * 60_000, SmaWindow::OneHour)
                }
                _ => {
                    let windows: Vec<&str> = SmaWindow::ALL.iter().map(|w| w.label()).collect();
                    (0, SmaWindow::ALL[select("SMA window", &windows)?])
                }
            };
            let amount: f64 = Input::new().with_prompt("Trade amount").interact_text()?;
            let max_triggers: u32 = Input::new()
                .with_prompt("Fire at most")
                .default(1)
                .interact_text()?;

            report(
                commands::trigger_create(
                    ctx,
                    TriggerOptions {
                        token,
                        name: None,
                        wallet: None,
                        action,
                        condition,
                        threshold,
                        timeframe_ms,
                        sma_window,
                        amount,
                        slippage: None,
                        max_triggers,
                    },
                )
                .await,
            );
        }
        2 => {
            let id = input("Trigger id")?;
            report(commands::trigger_delete(ctx, &id).await);
        }
        _ => {}
    }
    Ok(())
}

async fn track_menu(ctx: &Arc<AppContext>) -> Result<()> {
    match select("Tracked tokens", &["List", "Add", "Remove", "Stats", "Back"])? {
        0 => report(commands::track_list(ctx).await),
        1 => {
            let token = token_prompt(ctx)?;
            report(commands::track_add(ctx, &token).await);
        }
        2 => {
            let token = token_prompt(ctx)?;
            report(commands::track_remove(ctx, &token).await);
        }
        3 => {
            let token = token_prompt(ctx)?;
            report(commands::track_stats(ctx, &token).await);
        }
        _ => {}
    }
    Ok(())
}

async fn wallets_menu(ctx: &Arc<AppContext>) -> Result<()> {
    match select("Wallets", &["List", "Add", "Remove", "Back"])? {
        0 => report(commands::wallet_list(&ctx.config).await),
        1 => {
            let name = input("Name (lowercase)")?;
            let address = input("Address (0x...)")?;
            let watch_only = Confirm::new()
                .with_prompt("Watch-only (never signs)?")
                .default(false)
                .interact()?;
            report(commands::wallet_add(&ctx.config, &name, &address, None, watch_only, None).await);
        }
        2 => {
            let name = input("Name")?;
            report(commands::wallet_remove(&ctx.config, &name, false).await);
        }
        _ => {}
    }
    Ok(())
}
