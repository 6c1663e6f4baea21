//! Outbound chat notifications
//!
//! Fire-and-forget: delivery failures are logged and never reach callers.

use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::{NotificationConfig, TELEGRAM_TOKEN_ENV};
use crate::execution::TradeSide;
use crate::position::DailyStats;

const TELEGRAM_API: &str = "https://api.telegram.org";

/// Events worth telling the operator about
#[derive(Debug, Clone)]
pub enum Notification {
    TradeExecuted {
        side: TradeSide,
        symbol: String,
        amount_in: f64,
        amount_out: f64,
        price: f64,
        tx_hash: String,
        strategy: Option<String>,
    },
    ProfitAlert {
        symbol: String,
        pnl_pct: f64,
        pnl_base: f64,
    },
    LossAlert {
        symbol: String,
        pnl_pct: f64,
        pnl_base: f64,
    },
    StrategyStarted {
        name: String,
        symbol: String,
    },
    StrategyStopped {
        name: String,
        symbol: String,
        reason: String,
    },
    TriggerFired {
        name: String,
        symbol: String,
        details: String,
    },
    DailyReport(DailyStats),
}

impl Notification {
    /// Telegram HTML body
    pub fn render_html(&self, base_symbol: &str) -> String {
        match self {
            Notification::TradeExecuted {
                side,
                symbol,
                amount_in,
                amount_out,
                price,
                tx_hash,
                strategy,
            } => {
                let (emoji, spent, got) = match side {
                    TradeSide::Buy => ("🟢", base_symbol, symbol.as_str()),
                    TradeSide::Sell => ("🔴", symbol.as_str(), base_symbol),
                };
                let mut msg = format!("{} <b>TRADE EXECUTED</b>\n\n", emoji);
                msg.push_str(&format!("💹 <b>{} {}</b>\n", side, escape(symbol)));
                msg.push_str(&format!("Spent: {:.6} {}\n", amount_in, escape(spent)));
                msg.push_str(&format!("Received: {:.6} {}\n", amount_out, escape(got)));
                msg.push_str(&format!("Price: {:.8} {}\n", price, escape(base_symbol)));
                if let Some(name) = strategy {
                    msg.push_str(&format!("Strategy: {}\n", escape(name)));
                }
                msg.push_str(&format!("Tx: <code>{}</code>", escape(tx_hash)));
                msg
            }
            Notification::ProfitAlert {
                symbol,
                pnl_pct,
                pnl_base,
            } => format!(
                "🚀 <b>PROFIT ALERT</b>\n\n🪙 <b>{}</b>\nProfit: <b>+{:.2}%</b> ({:+.6} {})",
                escape(symbol),
                pnl_pct,
                pnl_base,
                escape(base_symbol)
            ),
            Notification::LossAlert {
                symbol,
                pnl_pct,
                pnl_base,
            } => format!(
                "⚠️ <b>LOSS ALERT</b>\n\n🪙 <b>{}</b>\nLoss: <b>{:.2}%</b> ({:+.6} {})",
                escape(symbol),
                pnl_pct,
                pnl_base,
                escape(base_symbol)
            ),
            Notification::StrategyStarted { name, symbol } => format!(
                "▶️ <b>STRATEGY STARTED</b>\n\n🎯 <b>{}</b> on {}",
                escape(name),
                escape(symbol)
            ),
            Notification::StrategyStopped {
                name,
                symbol,
                reason,
            } => format!(
                "⏹️ <b>STRATEGY STOPPED</b>\n\n🎯 <b>{}</b> on {}\nReason: {}",
                escape(name),
                escape(symbol),
                escape(reason)
            ),
            Notification::TriggerFired {
                name,
                symbol,
                details,
            } => format!(
                "🎯 <b>TRIGGER FIRED</b>\n\n<b>{}</b> ({})\n{}",
                escape(name),
                escape(symbol),
                escape(details)
            ),
            Notification::DailyReport(stats) => format!(
                "📊 <b>DAILY TRADING REPORT</b> {}\n\nTrades: {}\nWins: {}  Losses: {}\nWin rate: {:.1}%\nNet P&amp;L: <b>{:+.6} {}</b>",
                stats.date,
                stats.total_trades,
                stats.winning_trades,
                stats.losing_trades,
                stats.win_rate(),
                stats.net_pnl,
                escape(base_symbol)
            ),
        }
    }
}

fn escape(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &Notification);
}

/// Drops everything
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify(&self, notification: &Notification) {
        debug!("Notification suppressed: {:?}", notification);
    }
}

#[derive(Serialize)]
struct SendMessage<'a> {
    chat_id: &'a str,
    text: String,
    parse_mode: &'static str,
    disable_web_page_preview: bool,
}

/// Telegram Bot API sender
pub struct TelegramNotifier {
    client: reqwest::Client,
    token: String,
    chat_id: String,
    base_symbol: String,
}

impl TelegramNotifier {
    pub fn new(token: String, chat_id: String, base_symbol: String) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            token,
            chat_id,
            base_symbol,
        }
    }

    async fn send(&self, text: String) -> crate::error::Result<()> {
        let url = format!("{}/bot{}/sendMessage", TELEGRAM_API, self.token);
        let body = SendMessage {
            chat_id: &self.chat_id,
            text,
            parse_mode: "HTML",
            disable_web_page_preview: true,
        };

        let resp = self.client.post(&url).json(&body).send().await?;
        if !resp.status().is_success() {
            return Err(crate::error::Error::Http(format!(
                "Telegram returned {}",
                resp.status()
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn notify(&self, notification: &Notification) {
        let text = notification.render_html(&self.base_symbol);
        if let Err(e) = self.send(text).await {
            warn!("Notification delivery failed: {}", e);
        }
    }
}

/// Telegram when enabled and both token and chat id are present, else no-op
pub fn from_config(config: &NotificationConfig, base_symbol: &str) -> Box<dyn Notifier> {
    if !config.enabled {
        return Box::new(NoopNotifier);
    }

    match std::env::var(TELEGRAM_TOKEN_ENV) {
        Ok(token) if !token.is_empty() && !config.chat_id.is_empty() => Box::new(
            TelegramNotifier::new(token, config.chat_id.clone(), base_symbol.to_string()),
        ),
        _ => {
            warn!(
                "Notifications enabled but {} or chat_id is missing; disabled",
                TELEGRAM_TOKEN_ENV
            );
            Box::new(NoopNotifier)
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Captures notifications for assertions
    #[derive(Default)]
    pub struct RecordingNotifier {
        pub sent: Mutex<Vec<Notification>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, notification: &Notification) {
            self.sent.lock().unwrap().push(notification.clone());
        }
    }

    #[test]
    fn test_trade_message_escapes_html() {
        let n = Notification::TradeExecuted {
            side: TradeSide::Buy,
            symbol: "A<B".into(),
            amount_in: 1.0,
            amount_out: 10.0,
            price: 0.1,
            tx_hash: "0xabc".into(),
            strategy: Some("dip & rip".into()),
        };
        let html = n.render_html("WLD");
        assert!(html.contains("<b>BUY A&lt;B</b>"));
        assert!(html.contains("dip &amp; rip"));
        assert!(html.contains("Spent: 1.000000 WLD"));
    }

    #[test]
    fn test_daily_report() {
        let mut stats = DailyStats::new();
        stats.record_trade(0.5);
        let html = Notification::DailyReport(stats).render_html("WLD");
        assert!(html.contains("Trades: 1"));
        assert!(html.contains("+0.500000 WLD"));
    }

    #[test]
    fn test_disabled_config_is_noop() {
        let config = NotificationConfig::default();
        // No panic, no network
        let _ = from_config(&config, "WLD");
    }
}
