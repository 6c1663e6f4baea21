//! Command-line interface
//!
//! - `commands` - subcommand implementations
//! - `console` - line-oriented trading console
//! - `menu` - interactive menus

pub mod commands;
pub mod console;
pub mod menu;

use std::fmt;
use std::str::FromStr;

/// Trade size as typed by the user: `all`, `50%` or a number
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Amount {
    All,
    Percent(f64),
    Exact(f64),
}

impl Amount {
    /// Concrete amount given the available balance
    pub fn resolve(&self, available: f64) -> f64 {
        match self {
            Amount::All => available,
            Amount::Percent(pct) => available * pct / 100.0,
            Amount::Exact(value) => *value,
        }
    }

    pub fn needs_balance(&self) -> bool {
        !matches!(self, Amount::Exact(_))
    }
}

impl FromStr for Amount {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("all") || s.eq_ignore_ascii_case("max") {
            return Ok(Amount::All);
        }

        if let Some(pct) = s.strip_suffix('%') {
            let value: f64 = pct
                .parse()
                .map_err(|_| format!("Invalid percentage: {}", s))?;
            if value <= 0.0 || value > 100.0 {
                return Err("Percentage must be between 0 and 100".to_string());
            }
            return Ok(Amount::Percent(value));
        }

        let value: f64 = s.parse().map_err(|_| format!("Invalid amount: {}", s))?;
        if !value.is_finite() || value <= 0.0 {
            return Err(format!("Amount must be positive: {}", s));
        }
        Ok(Amount::Exact(value))
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Amount::All => write!(f, "all"),
            Amount::Percent(p) => write!(f, "{}%", p),
            Amount::Exact(v) => write!(f, "{}", v),
        }
    }
}

/// Signed percentage for tables
pub(crate) fn fmt_pct(value: Option<f64>) -> String {
    match value {
        Some(v) => format!("{:+.2}%", v),
        None => "-".to_string(),
    }
}
