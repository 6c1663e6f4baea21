//! Worldchain Trader - dip-buy and profit-target bots for World Chain tokens
//!
//! # WARNING
//! - This tool signs and submits real transactions. Only use funds you can afford to lose.
//! - Thin pools move a lot on small orders; keep slippage limits tight.

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use worldchain_trader::cli::commands::{self, StrategyOptions, TriggerOptions};
use worldchain_trader::cli::{console, menu, Amount};
use worldchain_trader::config::Config;
use worldchain_trader::context::AppContext;
use worldchain_trader::execution::TradeSide;
use worldchain_trader::price::SmaWindow;
use worldchain_trader::strategy::StepDistribution;
use worldchain_trader::trigger::TriggerCondition;

/// Worldchain Trader - dip-buy and profit-target bots
#[derive(Parser)]
#[command(name = "wtrade")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, env = "WTRADE_CONFIG", default_value = "wtrade.toml")]
    config: String,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run active strategies and price triggers until Ctrl-C
    Start,

    /// Buy a token with the base currency
    Buy {
        /// Token symbol or address
        token: String,

        /// Base amount to spend: a number, "N%" or "all"
        amount: Amount,

        /// Wallet name (default from config)
        #[arg(short, long)]
        wallet: Option<String>,

        /// Slippage tolerance in percent
        #[arg(short, long)]
        slippage: Option<f64>,

        /// Skip confirmation prompt
        #[arg(long)]
        force: bool,
    },

    /// Sell a token for the base currency
    Sell {
        /// Token symbol or address
        token: String,

        /// Tokens to sell: a number, "N%" or "all"
        #[arg(default_value = "all")]
        amount: Amount,

        #[arg(short, long)]
        wallet: Option<String>,

        #[arg(short, long)]
        slippage: Option<f64>,

        /// Skip confirmation prompt
        #[arg(long)]
        force: bool,
    },

    /// Quote a swap without executing it
    Quote {
        from: String,
        to: String,
        amount: f64,
    },

    /// Show open positions, P&L and strategy summary
    Status,

    /// Show wallet balances
    Balance {
        /// Wallet name (default from config)
        wallet: Option<String>,
    },

    /// Show current configuration (secrets masked)
    Config,

    /// Check RPC, quote source, wallets and storage
    Health,

    /// Strategy management
    Strategy {
        #[command(subcommand)]
        action: StrategyAction,
    },

    /// Standalone price triggers
    Trigger {
        #[command(subcommand)]
        action: TriggerAction,
    },

    /// Price tracking
    Track {
        #[command(subcommand)]
        action: TrackAction,
    },

    /// Wallet registry
    Wallet {
        #[command(subcommand)]
        action: WalletAction,
    },

    /// Interactive trading console
    Console,

    /// Interactive menus
    Menu,
}

#[derive(Subcommand)]
enum StrategyAction {
    /// Create a dip-buy strategy
    Create {
        /// Token symbol or address
        token: String,

        #[arg(long)]
        name: Option<String>,

        #[arg(short, long)]
        wallet: Option<String>,

        /// Dip threshold in percent
        #[arg(short, long)]
        dip: Option<f64>,

        /// Single profit target in percent
        #[arg(short, long, conflicts_with_all = ["profit_min", "profit_max"])]
        profit: Option<f64>,

        /// Lowest profit-range target in percent
        #[arg(long, requires = "profit_max")]
        profit_min: Option<f64>,

        /// Highest profit-range target in percent
        #[arg(long, requires = "profit_min")]
        profit_max: Option<f64>,

        /// Number of profit-range steps
        #[arg(long)]
        steps: Option<u32>,

        /// Profit-range split: linear, aggressive, conservative
        #[arg(long)]
        distribution: Option<StepDistribution>,

        /// Stop loss in percent below the average cost
        #[arg(long)]
        stop_loss: Option<f64>,

        /// Base amount spent per dip buy
        #[arg(short, long)]
        amount: Option<f64>,

        #[arg(short, long)]
        slippage: Option<f64>,

        /// Check interval in milliseconds
        #[arg(long)]
        interval_ms: Option<u64>,

        /// Dip lookback window in milliseconds
        #[arg(long)]
        timeframe_ms: Option<u64>,

        /// Maximum open dip entries
        #[arg(long)]
        max_entries: Option<u32>,

        /// Mark the strategy active right away
        #[arg(long)]
        activate: bool,
    },

    /// List strategies
    List,

    /// Mark a strategy active
    Start { id: String },

    /// Stop a strategy
    Stop { id: String },

    /// Delete a strategy
    Delete {
        id: String,

        /// Skip confirmation prompt
        #[arg(long)]
        force: bool,
    },

    /// Per-strategy statistics
    Stats,
}

#[derive(Clone, Copy, ValueEnum)]
enum Side {
    Buy,
    Sell,
}

impl From<Side> for TradeSide {
    fn from(side: Side) -> Self {
        match side {
            Side::Buy => TradeSide::Buy,
            Side::Sell => TradeSide::Sell,
        }
    }
}

#[derive(Subcommand)]
enum TriggerAction {
    /// Create a price trigger
    Create {
        /// Token symbol or address
        token: String,

        /// buy or sell when the trigger fires
        #[arg(value_enum)]
        action: Side,

        /// price_drop, price_rise, below_sma, above_sma
        condition: TriggerCondition,

        /// Threshold in percent
        threshold: f64,

        /// Amount traded when fired (base for buys, tokens for sells)
        #[arg(short, long)]
        amount: f64,

        /// Lookback for price_drop / price_rise, in minutes
        #[arg(long, default_value_t = 60)]
        timeframe_min: u64,

        /// SMA window for below_sma / above_sma: 5min, 1hour, 6hour, 24hour, 7day
        #[arg(long, default_value = "1hour")]
        sma: SmaWindow,

        #[arg(long)]
        name: Option<String>,

        #[arg(short, long)]
        wallet: Option<String>,

        #[arg(short, long)]
        slippage: Option<f64>,

        /// Deactivate after firing this many times
        #[arg(long, default_value_t = 1)]
        max_triggers: u32,
    },

    /// List triggers
    List,

    /// Delete a trigger
    Delete { id: String },
}

#[derive(Subcommand)]
enum TrackAction {
    /// Start tracking a token
    Add { token: String },

    /// Stop tracking a token
    Remove { token: String },

    /// List tracked tokens
    List,

    /// Price changes and moving averages
    Stats { token: String },
}

#[derive(Subcommand)]
enum WalletAction {
    /// List all configured wallets
    List,

    /// Register a wallet address
    Add {
        /// Wallet name (lowercase, no spaces)
        name: String,

        /// 0x address
        address: String,

        /// Human-readable alias
        #[arg(long)]
        alias: Option<String>,

        /// Never sign with this wallet
        #[arg(long)]
        watch_only: bool,

        #[arg(long)]
        notes: Option<String>,
    },

    /// Remove a wallet from the registry
    Remove {
        name: String,

        /// Skip confirmation prompt
        #[arg(long)]
        force: bool,
    },
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("worldchain_trader=info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(true)
        .with_line_number(true);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(cli.json_logs);

    let config = match Config::load(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("Failed to load configuration: {:#}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = run(cli.command, config).await {
        error!("Command failed: {:#}", e);
        std::process::exit(1);
    }

    Ok(())
}

async fn run(command: Commands, config: Config) -> Result<()> {
    // Commands that never touch the chain or the stores
    match &command {
        Commands::Config => return commands::show_config(&config),
        Commands::Health => return commands::health(&config).await,
        Commands::Wallet { action } => {
            return match action {
                WalletAction::List => commands::wallet_list(&config).await,
                WalletAction::Add {
                    name,
                    address,
                    alias,
                    watch_only,
                    notes,
                } => {
                    commands::wallet_add(&config, name, address, alias.clone(), *watch_only, notes.clone())
                        .await
                }
                WalletAction::Remove { name, force } => commands::wallet_remove(&config, name, *force).await,
            };
        }
        _ => {}
    }

    let ctx = Arc::new(AppContext::build(config).await?);
    info!("Using wallet {}", ctx.wallet_name(None));

    let result = match command {
        Commands::Start => commands::start(ctx.clone()).await,
        Commands::Buy {
            token,
            amount,
            wallet,
            slippage,
            force,
        } => commands::buy(&ctx, &token, amount, wallet.as_deref(), slippage, force).await,
        Commands::Sell {
            token,
            amount,
            wallet,
            slippage,
            force,
        } => commands::sell(&ctx, &token, amount, wallet.as_deref(), slippage, force).await,
        Commands::Quote { from, to, amount } => commands::quote(&ctx, &from, &to, amount).await,
        Commands::Status => commands::status(&ctx).await,
        Commands::Balance { wallet } => commands::balance(&ctx, wallet.as_deref()).await,
        Commands::Strategy { action } => match action {
            StrategyAction::Create {
                token,
                name,
                wallet,
                dip,
                profit,
                profit_min,
                profit_max,
                steps,
                distribution,
                stop_loss,
                amount,
                slippage,
                interval_ms,
                timeframe_ms,
                max_entries,
                activate,
            } => {
                let options = StrategyOptions {
                    token,
                    name,
                    wallet,
                    dip,
                    profit,
                    profit_min,
                    profit_max,
                    steps,
                    distribution,
                    stop_loss,
                    amount,
                    slippage,
                    interval_ms,
                    timeframe_ms,
                    max_entries,
                };
                commands::strategy_create(&ctx, options, activate).await.map(|_| ())
            }
            StrategyAction::List => commands::strategy_list(&ctx).await,
            StrategyAction::Start { id } => commands::strategy_start(&ctx, &id).await,
            StrategyAction::Stop { id } => commands::strategy_stop(&ctx, &id).await,
            StrategyAction::Delete { id, force } => commands::strategy_delete(&ctx, &id, force).await,
            StrategyAction::Stats => commands::strategy_stats(&ctx).await,
        },
        Commands::Trigger { action } => match action {
            TriggerAction::Create {
                token,
                action,
                condition,
                threshold,
                amount,
                timeframe_min,
                sma,
                name,
                wallet,
                slippage,
                max_triggers,
            } => {
                commands::trigger_create(
                    &ctx,
                    TriggerOptions {
                        token,
                        name,
                        wallet,
                        action: action.into(),
                        condition,
                        threshold,
                        timeframe_ms: timeframe_min * 60_000,
                        sma_window: sma,
                        amount,
                        slippage,
                        max_triggers,
                    },
                )
                .await
            }
            TriggerAction::List => commands::trigger_list(&ctx).await,
            TriggerAction::Delete { id } => commands::trigger_delete(&ctx, &id).await,
        },
        Commands::Track { action } => match action {
            TrackAction::Add { token } => commands::track_add(&ctx, &token).await,
            TrackAction::Remove { token } => commands::track_remove(&ctx, &token).await,
            TrackAction::List => commands::track_list(&ctx).await,
            TrackAction::Stats { token } => commands::track_stats(&ctx, &token).await,
        },
        Commands::Console => console::run(ctx.clone()).await,
        Commands::Menu => menu::run(ctx.clone()).await,
        Commands::Config | Commands::Health | Commands::Wallet { .. } => Ok(()),
    };

    // One-shot commands persist what they changed
    ctx.save_all().await?;
    result
}
