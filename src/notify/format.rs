//! Telegram message text. Markdown (legacy) with `*bold*` and backtick code.

use std::fmt::Write;

use crate::core::classifier::Signal;
use crate::core::options::OptionsInsight;
use crate::models::{Ledger, Position, SignalDirection, TradeDirection};
use crate::trading::{ClosedPosition, PerformanceSummary};

const RULE: &str = "━━━━━━━━━━━━━━━━━━━━";
const REASONS_SHOWN: usize = 4;

pub fn strength_label(score: u32) -> (&'static str, &'static str) {
    if score >= 80 {
        ("🔥 VERY STRONG", "⭐⭐⭐⭐⭐")
    } else if score >= 75 {
        ("💪 STRONG", "⭐⭐⭐⭐")
    } else if score >= 70 {
        ("⚡ GOOD", "⭐⭐⭐")
    } else {
        ("📊 MODERATE", "⭐⭐")
    }
}

fn money(v: f64) -> String {
    let sign = if v < 0.0 { "-" } else { "+" };
    format!("{sign}${:.2}", v.abs())
}

/// Alert body for a signal. `alert_id` is the bot-ledger row id when the
/// signal was tracked.
pub fn signal_message(signal: &Signal, alert_id: Option<&str>) -> String {
    if signal.direction == SignalDirection::Neutral {
        let reason = signal.reasons.first().map(String::as_str).unwrap_or("");
        return format!(
            "⚖️ *{} NEUTRAL*\nScore: {}\n{}",
            signal.ticker, signal.score, reason
        );
    }

    let bull = signal.direction == SignalDirection::Bull;
    let (strength, stars) = strength_label(signal.score);
    let (icon, color) = if bull { ("🚀", "🟢") } else { ("🐻", "🔴") };

    let mut out = String::new();
    let _ = writeln!(out, "{icon} *{strength} {}* {color}", signal.direction);
    let _ = writeln!(out, "*{}* @ ${:.2}", signal.ticker, signal.price);
    let _ = writeln!(out, "Score: {}/100 {stars}", signal.score);
    let _ = writeln!(out, "ADX: {:.0} | RSI: {:.0}", signal.adx, signal.rsi);
    if let Some(id) = alert_id {
        let _ = writeln!(out, "Alert ID: `{id}`");
    }
    let _ = writeln!(out, "{RULE}");
    let _ = writeln!(out, "*Why:*");
    for r in signal.reasons.iter().take(REASONS_SHOWN) {
        let _ = writeln!(out, "• {r}");
    }

    if let Some(plan) = &signal.plan {
        let action = if bull { "BUY" } else { "SHORT" };
        let rr = if plan.risk_pct > 0.0 {
            plan.reward_pct / plan.risk_pct
        } else {
            0.0
        };
        let _ = writeln!(out, "{RULE}");
        let _ = writeln!(out, "📈 *SHARES TRADE*");
        let _ = writeln!(
            out,
            "  {action}: {} shares @ ${:.2}",
            plan.quantity, signal.price
        );
        let _ = writeln!(out, "  💰 Capital: ${:.0}", plan.capital);
        let _ = writeln!(out, "  🛑 Stop: ${:.2} (-{:.1}%)", plan.stop, plan.risk_pct);
        let _ = writeln!(out, "  🎯 Target: ${:.2} (+{:.1}%)", plan.target, plan.reward_pct);
        let _ = writeln!(out, "  📊 Risk/Reward: 1:{rr:.1}");
    }

    let _ = writeln!(out, "{RULE}");
    match &signal.options_insight {
        Some(opt) => out.push_str(&options_section(opt)),
        None => {
            out.push_str("⚠️ *OPTIONS*: not available\n  • No liquid contract in the 30-60 day window");
        }
    }

    if let Some(id) = alert_id {
        let _ = write!(out, "\n\nEntered? `/entered {id} shares PRICE`");
    }
    out
}

fn options_section(opt: &OptionsInsight) -> String {
    let dte_note = if opt.dte > 50 {
        "⚠️ Long DTE (slower theta)".to_string()
    } else if opt.dte < 35 {
        "⏰ Short DTE (faster theta)".to_string()
    } else {
        format!("✅ {} days", opt.dte)
    };
    let liquidity = if opt.volume > 500 && opt.open_interest > 1000 {
        "✅ High liquidity"
    } else if opt.volume > 100 && opt.open_interest > 500 {
        "⚠️ Moderate liquidity"
    } else {
        "🚨 Low liquidity"
    };
    let cost = |n: u32| n as f64 * opt.last * 100.0;

    format!(
        "⚡ *OPTIONS* (alternative)\n\
         \x20 {} ${} exp {}\n\
         \x20 💰 Premium: ${:.2} (bid ${:.2} / ask ${:.2})\n\
         \x20 📊 Vol: {} | OI: {}\n\
         \x20 📈 Spread: {:.1}% {}\n\
         \x20 🕐 {}\n\
         \x20 💵 Suggested: {}-{} contracts (${:.0}-${:.0})",
        opt.kind,
        opt.strike,
        opt.expiry,
        opt.last,
        opt.bid,
        opt.ask,
        opt.volume,
        opt.open_interest,
        opt.spread_pct,
        liquidity,
        dte_note,
        opt.contracts_small,
        opt.contracts_large,
        cost(opt.contracts_small),
        cost(opt.contracts_large),
    )
}

pub fn exit_message(closed: &ClosedPosition) -> String {
    let p = &closed.position;
    let (icon, verdict) = if closed.pnl.dollar > 0.0 {
        ("🟢", "PROFIT")
    } else {
        ("🔴", "LOSS")
    };
    let (reason, exit_price, days) = match &p.exit {
        Some(e) => (e.reason.as_str(), e.exit_price, e.days_held),
        None => ("?", 0.0, 0),
    };
    format!(
        "{icon} *{} {} EXIT: {reason}*\n\
         {} {} x{}\n\
         Entry ${:.2} → Exit ${:.2}\n\
         💰 P&L: {} ({:+.2}%) {verdict}\n\
         Held {days}d | {}",
        p.ticker,
        p.direction,
        p.instrument_type(),
        p.id,
        p.quantity,
        p.entry_price,
        exit_price,
        money(closed.pnl.dollar),
        closed.pnl.percent,
        p.ledger,
    )
}

pub fn entry_message(p: &Position) -> String {
    format!(
        "✅ *Position tracked* `{}`\n\
         *{}* {} {}\n\
         Entry: ${:.2} x{}\n\
         Stop: ${:.2}\n\
         Target: ${:.2}\n\
         Ledger: {}",
        p.id,
        p.ticker,
        p.direction,
        p.instrument_type(),
        p.entry_price,
        p.quantity,
        p.stop,
        p.target,
        p.ledger,
    )
}

pub fn positions_message(open: &[Position]) -> String {
    if open.is_empty() {
        return "📭 No open positions".to_string();
    }
    let mut out = format!("📂 *Open positions* ({})\n", open.len());
    for ledger in Ledger::ALL {
        let rows: Vec<&Position> = open.iter().filter(|p| p.ledger == ledger).collect();
        if rows.is_empty() {
            continue;
        }
        let _ = writeln!(out, "{RULE}\n*{ledger}*");
        for p in rows {
            let arrow = match p.direction {
                TradeDirection::Bull => "🟢",
                TradeDirection::Bear => "🔴",
            };
            let _ = writeln!(
                out,
                "{arrow} `{}` {} {} x{} @ ${:.2} (stop ${:.2} / target ${:.2})",
                p.id,
                p.ticker,
                p.instrument_type(),
                p.quantity,
                p.entry_price,
                p.stop,
                p.target
            );
        }
    }
    out.trim_end().to_string()
}

pub fn performance_message(rows: &[(Ledger, Option<PerformanceSummary>)]) -> String {
    if rows.iter().all(|(_, s)| s.is_none()) {
        return "📊 No performance data yet".to_string();
    }
    let mut out = String::from("📊 *Performance*\n");
    for (ledger, summary) in rows {
        let title = match ledger {
            Ledger::BotAlerts => "🤖 Bot (all alerts)",
            Ledger::MyTrades => "👤 You (declared trades)",
        };
        let _ = writeln!(out, "{RULE}\n*{title}*");
        match summary {
            Some(s) => {
                let _ = writeln!(out, "  {}: {} trades, {}W / {}L", s.date, s.total_trades, s.wins, s.losses);
                let _ = writeln!(out, "  Win rate: {:.1}%", s.win_rate_pct);
                let _ = writeln!(out, "  Net P&L: {}", money(s.net_pnl));
            }
            None => {
                let _ = writeln!(out, "  N/A");
            }
        }
    }
    out.trim_end().to_string()
}

pub fn help_text() -> &'static str {
    "🤖 *Commands*\n\
     /check TICKER - analyze one ticker (not tracked)\n\
     /scan - force-scan the first 20 tickers\n\
     /entered ID shares PRICE - you entered a bot alert with shares\n\
     /entered ID options CONTRACTS PREMIUM - you entered with options\n\
     /buy TICKER shares PRICE stop STOP target TARGET - your own trade\n\
     /close TICKER|ID PRICE - close one of your positions\n\
     /positions - open positions\n\
     /performance - bot vs you\n\
     /help - this message"
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::classifier::TradePlan;
    use crate::models::{ExitReason, ExitRecord, InstrumentType};
    use crate::test_helpers::make_position;
    use crate::trading::Pnl;
    use chrono::NaiveDate;

    fn signal(direction: SignalDirection, score: u32) -> Signal {
        Signal {
            ticker: "NVDA".into(),
            price: 905.0,
            direction,
            score,
            reasons: (1..=6).map(|i| format!("reason {i}")).collect(),
            atr: 20.0,
            adx: 31.4,
            rsi: 44.6,
            plan: Some(TradePlan {
                stop: 855.0,
                target: 975.0,
                quantity: 2,
                capital: 1810.0,
                risk_pct: 5.52,
                reward_pct: 7.73,
            }),
            options_insight: None,
        }
    }

    #[test]
    fn strength_tiers() {
        assert_eq!(strength_label(80).0, "🔥 VERY STRONG");
        assert_eq!(strength_label(79).0, "💪 STRONG");
        assert_eq!(strength_label(70).0, "⚡ GOOD");
        assert_eq!(strength_label(69).0, "📊 MODERATE");
    }

    #[test]
    fn alert_shows_top_four_reasons_and_plan() {
        let text = signal_message(&signal(SignalDirection::Bull, 76), Some("ab12cd34"));
        assert!(text.contains("💪 STRONG BULL"));
        assert!(text.contains("reason 4"));
        assert!(!text.contains("reason 5"));
        assert!(text.contains("BUY: 2 shares @ $905.00"));
        assert!(text.contains("OPTIONS*: not available"));
        assert!(text.contains("/entered ab12cd34 shares PRICE"));
    }

    #[test]
    fn bear_alert_uses_short_and_options_block() {
        let mut s = signal(SignalDirection::Bear, 82);
        s.options_insight = Some(OptionsInsight {
            kind: InstrumentType::Put,
            strike: 875.0,
            expiry: NaiveDate::from_ymd_opt(2024, 4, 19).unwrap(),
            dte: 45,
            last: 12.5,
            bid: 12.0,
            ask: 13.0,
            volume: 800,
            open_interest: 4000,
            spread_pct: 8.0,
            contracts_small: 0,
            contracts_large: 2,
        });
        let text = signal_message(&s, None);
        assert!(text.contains("SHORT: 2 shares"));
        assert!(text.contains("PUT $875 exp 2024-04-19"));
        assert!(text.contains("✅ High liquidity"));
        assert!(text.contains("0-2 contracts ($0-$2500)"));
        assert!(!text.contains("Alert ID"));
    }

    #[test]
    fn neutral_is_short() {
        let mut s = signal(SignalDirection::Neutral, 55);
        s.reasons = vec!["No setup found".into()];
        s.plan = None;
        assert_eq!(signal_message(&s, None), "⚖️ *NVDA NEUTRAL*\nScore: 55\nNo setup found");
    }

    #[test]
    fn exit_and_listing_text() {
        let mut pos = make_position(Ledger::BotAlerts, "AAPL", TradeDirection::Bull, 100.0, 95.0, 110.0);
        pos.close(ExitRecord {
            exit_price: 95.0,
            exit_date: pos.entry_date,
            reason: ExitReason::Stop,
            pnl_dollar: -52.0,
            pnl_percent: -5.0,
            days_held: 0,
        });
        let closed = ClosedPosition {
            position: pos,
            pnl: Pnl {
                dollar: -52.0,
                percent: -5.0,
            },
        };
        let text = exit_message(&closed);
        assert!(text.contains("AAPL BULL EXIT: STOP"));
        assert!(text.contains("P&L: -$52.00 (-5.00%) LOSS"));

        assert_eq!(positions_message(&[]), "📭 No open positions");
        let open = make_position(Ledger::MyTrades, "TSLA", TradeDirection::Bear, 250.0, 260.0, 230.0);
        let listing = positions_message(&[open]);
        assert!(listing.contains("*My_Trades*"));
        assert!(!listing.contains("Bot_Alerts"));
    }

    #[test]
    fn performance_text_handles_missing_rows() {
        assert_eq!(
            performance_message(&[(Ledger::BotAlerts, None), (Ledger::MyTrades, None)]),
            "📊 No performance data yet"
        );
        let row = PerformanceSummary {
            date: NaiveDate::from_ymd_opt(2024, 3, 5).unwrap(),
            total_trades: 3,
            wins: 2,
            losses: 1,
            win_rate_pct: 66.7,
            gross_profit: 200.0,
            gross_loss: -52.0,
            net_pnl: 148.0,
        };
        let text = performance_message(&[(Ledger::BotAlerts, Some(row)), (Ledger::MyTrades, None)]);
        assert!(text.contains("Win rate: 66.7%"));
        assert!(text.contains("Net P&L: +$148.00"));
        assert!(text.contains("N/A"));
    }
}
