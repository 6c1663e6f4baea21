//! Line-oriented trading console
//!
//! ```text
//! buy WLD 0.5            buy immediately
//! buy WLD 0.5 d5 p10     start a dip strategy (5% dip, 10% profit)
//! sell WLD all           sell the whole balance
//! quote WETH WLD 0.1
//! ```

use anyhow::Result;
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::cli::commands::{self, report, StrategyOptions};
use crate::cli::Amount;
use crate::context::AppContext;

#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    Buy {
        token: String,
        amount: Amount,
    },
    /// `buy` with a dip and/or profit flag
    Strategy {
        token: String,
        amount: f64,
        dip: Option<f64>,
        profit: Option<f64>,
    },
    Sell {
        token: String,
        amount: Amount,
    },
    Quote {
        from: String,
        to: String,
        amount: f64,
    },
    Status,
    Balance(Option<String>),
    Strategies,
    Start(String),
    Stop(String),
    Triggers,
    Help,
    Exit,
    Empty,
}

const HELP: &str = "\
Commands:
  buy <token> <amount|all|N%>            buy now with base currency
  buy <token> <amount> [d<dip>] [p<pct>] start a dip-buy strategy
  sell <token> <amount|all|N%>           sell now
  quote <from> <to> <amount>             price a swap
  balance [wallet]                       wallet balances
  status                                 positions and P&L
  strategies                             list strategies
  start <id> | stop <id>                 run or stop a strategy
  triggers                               list price triggers
  help | exit";

fn flag(arg: &str, prefix: char) -> Result<Option<f64>, String> {
    let Some(rest) = arg.strip_prefix(prefix) else {
        return Ok(None);
    };
    let value: f64 = rest
        .parse()
        .map_err(|_| format!("Invalid value in {}", arg))?;
    if value <= 0.0 {
        return Err(format!("{} must be positive", arg));
    }
    Ok(Some(value))
}

/// Parse one console line
pub fn parse_line(line: &str) -> Result<ConsoleCommand, String> {
    let parts: Vec<&str> = line.split_whitespace().collect();
    let Some((cmd, args)) = parts.split_first() else {
        return Ok(ConsoleCommand::Empty);
    };

    match cmd.to_lowercase().as_str() {
        "buy" => {
            let [token, amount, rest @ ..] = args else {
                return Err("Usage: buy <token> <amount> [d<dip>] [p<profit>]".into());
            };
            let amount: Amount = amount.parse()?;

            let (mut dip, mut profit) = (None, None);
            for arg in rest {
                let lower = arg.to_lowercase();
                if let Some(d) = flag(&lower, 'd')? {
                    dip = Some(d);
                } else if let Some(p) = flag(&lower, 'p')? {
                    profit = Some(p);
                } else {
                    return Err(format!("Unknown option: {}", arg));
                }
            }

            if dip.is_none() && profit.is_none() {
                return Ok(ConsoleCommand::Buy {
                    token: token.to_string(),
                    amount,
                });
            }
            match amount {
                Amount::Exact(amount) => Ok(ConsoleCommand::Strategy {
                    token: token.to_string(),
                    amount,
                    dip,
                    profit,
                }),
                _ => Err("Strategies need a fixed trade amount".into()),
            }
        }
        "sell" => match args {
            [token] => Ok(ConsoleCommand::Sell {
                token: token.to_string(),
                amount: Amount::All,
            }),
            [token, amount] => Ok(ConsoleCommand::Sell {
                token: token.to_string(),
                amount: amount.parse()?,
            }),
            _ => Err("Usage: sell <token> <amount|all>".into()),
        },
        "quote" => match args {
            [from, to, amount] => {
                let amount: f64 = amount
                    .parse()
                    .map_err(|_| format!("Invalid amount: {}", amount))?;
                if amount <= 0.0 {
                    return Err("Amount must be positive".into());
                }
                Ok(ConsoleCommand::Quote {
                    from: from.to_string(),
                    to: to.to_string(),
                    amount,
                })
            }
            _ => Err("Usage: quote <from> <to> <amount>".into()),
        },
        "status" => Ok(ConsoleCommand::Status),
        "balance" | "bal" => Ok(ConsoleCommand::Balance(args.first().map(|w| w.to_string()))),
        "strategies" | "list" => Ok(ConsoleCommand::Strategies),
        "start" => match args {
            [id] => Ok(ConsoleCommand::Start(id.to_string())),
            _ => Err("Usage: start <strategy id>".into()),
        },
        "stop" => match args {
            [id] => Ok(ConsoleCommand::Stop(id.to_string())),
            _ => Err("Usage: stop <strategy id>".into()),
        },
        "triggers" => Ok(ConsoleCommand::Triggers),
        "help" | "?" => Ok(ConsoleCommand::Help),
        "exit" | "quit" | "q" => Ok(ConsoleCommand::Exit),
        other => Err(format!("Unknown command: {} (try `help`)", other)),
    }
}

/// Run one parsed command; returns false on exit
async fn dispatch(ctx: &Arc<AppContext>, command: ConsoleCommand) -> bool {
    match command {
        ConsoleCommand::Buy { token, amount } => {
            report(commands::buy(ctx, &token, amount, None, None, false).await)
        }
        ConsoleCommand::Strategy {
            token,
            amount,
            dip,
            profit,
        } => {
            let options = StrategyOptions {
                token,
                dip,
                profit,
                amount: Some(amount),
                ..Default::default()
            };
            let result = async {
                let id = commands::strategy_create(ctx, options, false).await?;
                ctx.runner.start(&id).await?;
                println!("Strategy {} running.", id);
                Ok::<(), anyhow::Error>(())
            }
            .await;
            report(result)
        }
        ConsoleCommand::Sell { token, amount } => {
            report(commands::sell(ctx, &token, amount, None, None, false).await)
        }
        ConsoleCommand::Quote { from, to, amount } => {
            report(commands::quote(ctx, &from, &to, amount).await)
        }
        ConsoleCommand::Status => report(commands::status(ctx).await),
        ConsoleCommand::Balance(wallet) => report(commands::balance(ctx, wallet.as_deref()).await),
        ConsoleCommand::Strategies => report(commands::strategy_list(ctx).await),
        ConsoleCommand::Start(key) => {
            let result = async {
                let id = ctx.store.resolve(&key).await?;
                let config = ctx.runner.start(&id).await?;
                println!("Strategy {} running.", config.name);
                Ok::<(), anyhow::Error>(())
            }
            .await;
            report(result)
        }
        ConsoleCommand::Stop(key) => report(commands::strategy_stop(ctx, &key).await),
        ConsoleCommand::Triggers => report(commands::trigger_list(ctx).await),
        ConsoleCommand::Help => println!("{}", HELP),
        ConsoleCommand::Exit => return false,
        ConsoleCommand::Empty => {}
    }
    true
}

/// Read commands from stdin until `exit`, EOF or Ctrl-C. Strategies and
/// triggers keep running in the background while the console is open.
pub async fn run(ctx: Arc<AppContext>) -> Result<()> {
    let (fired_tx, mut fired_rx) = mpsc::channel(64);
    ctx.prices.start(fired_tx).await?;
    let resumed = ctx.runner.resume_active().await;
    info!("Console ready ({} strategies resumed)", resumed);

    println!("Worldchain trader console. Type `help` for commands.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match parse_line(&line) {
                    Ok(command) => {
                        if !dispatch(&ctx, command).await {
                            break;
                        }
                    }
                    Err(e) => println!("{}", e),
                }
            }
            Some(fire) = fired_rx.recv() => {
                if let Err(e) = ctx.runner.execute_trigger(&fire).await {
                    warn!("Trigger {} not executed: {}", fire.trigger.name, e);
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    ctx.runner.stop_all().await;
    ctx.prices.stop();
    ctx.save_all().await?;
    println!("Bye.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_buy_now() {
        assert_eq!(
            parse_line("buy WLD 0.5").unwrap(),
            ConsoleCommand::Buy {
                token: "WLD".into(),
                amount: Amount::Exact(0.5)
            }
        );
        assert_eq!(
            parse_line("BUY wld all").unwrap(),
            ConsoleCommand::Buy {
                token: "wld".into(),
                amount: Amount::All
            }
        );
    }

    #[test]
    fn test_parse_buy_strategy() {
        assert_eq!(
            parse_line("buy WLD 0.5 d5 p10").unwrap(),
            ConsoleCommand::Strategy {
                token: "WLD".into(),
                amount: 0.5,
                dip: Some(5.0),
                profit: Some(10.0)
            }
        );
        assert_eq!(
            parse_line("buy WLD 1 P2.5").unwrap(),
            ConsoleCommand::Strategy {
                token: "WLD".into(),
                amount: 1.0,
                dip: None,
                profit: Some(2.5)
            }
        );
        assert!(parse_line("buy WLD all d5").is_err());
        assert!(parse_line("buy WLD 1 x5").is_err());
        assert!(parse_line("buy WLD 1 d0").is_err());
        assert!(parse_line("buy WLD").is_err());
    }

    #[test]
    fn test_parse_sell() {
        assert_eq!(
            parse_line("sell WLD").unwrap(),
            ConsoleCommand::Sell {
                token: "WLD".into(),
                amount: Amount::All
            }
        );
        assert_eq!(
            parse_line("sell WLD 25%").unwrap(),
            ConsoleCommand::Sell {
                token: "WLD".into(),
                amount: Amount::Percent(25.0)
            }
        );
        assert!(parse_line("sell WLD -1").is_err());
    }

    #[test]
    fn test_parse_misc() {
        assert_eq!(parse_line("   ").unwrap(), ConsoleCommand::Empty);
        assert_eq!(parse_line("quit").unwrap(), ConsoleCommand::Exit);
        assert_eq!(parse_line("balance").unwrap(), ConsoleCommand::Balance(None));
        assert_eq!(
            parse_line("balance alt").unwrap(),
            ConsoleCommand::Balance(Some("alt".into()))
        );
        assert_eq!(
            parse_line("quote WETH WLD 0.1").unwrap(),
            ConsoleCommand::Quote {
                from: "WETH".into(),
                to: "WLD".into(),
                amount: 0.1
            }
        );
        assert!(parse_line("quote WETH WLD").is_err());
        assert!(parse_line("frobnicate").is_err());
    }
}
