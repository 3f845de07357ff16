//! Textual command surface. Each command maps to one direct call on the
//! agent or tracker; the Telegram worker only parses and replies.

use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::agent::ScanAgent;
use crate::core::classifier::Signal;
use crate::error::{AgentError, Result};
use crate::models::{Ledger, Position};
use crate::notify::{format, Notifier, TelegramClient};
use crate::trading::{ClosedPosition, EntryFill, ManualEntry, PerformanceSummary};

const POLL_ERROR_BACKOFF: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Check(String),
    Scan,
    Entered { alert_id: String, fill: EntryFill },
    Buy(ManualEntry),
    Close { reference: String, price: f64, ledger: Ledger },
    Positions,
    Performance,
    Help,
}

fn malformed(usage: &str) -> AgentError {
    AgentError::MalformedCommand(format!("Usage: {usage}"))
}

fn number<T: std::str::FromStr>(raw: Option<&&str>, usage: &str) -> Result<T> {
    raw.and_then(|s| s.trim_start_matches('$').parse::<T>().ok())
        .ok_or_else(|| malformed(usage))
}

/// Value following `key` in `parts`, e.g. `stop 180`.
fn keyed<'a>(parts: &'a [&'a str], key: &str) -> Option<&'a &'a str> {
    let idx = parts.iter().position(|p| p.eq_ignore_ascii_case(key))?;
    parts.get(idx + 1)
}

impl Command {
    /// `Ok(None)` for text that is not a command at all.
    pub fn parse(text: &str) -> Result<Option<Command>> {
        let parts: Vec<&str> = text.split_whitespace().collect();
        let Some(head) = parts.first() else {
            return Ok(None);
        };
        if !head.starts_with('/') {
            return Ok(None);
        }
        // "/check@SomeBot" in group chats
        let name = head[1..].split('@').next().unwrap_or("").to_ascii_lowercase();
        let args = &parts[1..];

        let cmd = match name.as_str() {
            "check" => {
                let ticker = args.first().ok_or_else(|| malformed("/check TICKER"))?;
                Command::Check(ticker.to_uppercase())
            }
            "scan" => Command::Scan,
            "entered" => {
                const USAGE: &str =
                    "/entered ALERT_ID shares PRICE or /entered ALERT_ID options CONTRACTS PREMIUM";
                let alert_id = args.first().ok_or_else(|| malformed(USAGE))?.to_string();
                let kind = args.get(1).map(|s| s.to_ascii_lowercase());
                let fill = match kind.as_deref() {
                    Some("shares") => EntryFill::Shares {
                        price: number(args.get(2), USAGE)?,
                    },
                    Some("options") => EntryFill::Options {
                        contracts: number(args.get(2), USAGE)?,
                        premium: number(args.get(3), USAGE)?,
                    },
                    _ => return Err(malformed(USAGE)),
                };
                Command::Entered { alert_id, fill }
            }
            "buy" => {
                const USAGE: &str = "/buy TICKER shares PRICE stop STOP target TARGET [qty N]";
                let ticker = args.first().ok_or_else(|| malformed(USAGE))?;
                if !args.get(1).is_some_and(|k| k.eq_ignore_ascii_case("shares")) {
                    return Err(malformed(USAGE));
                }
                let quantity = match keyed(args, "qty") {
                    Some(_) => Some(number(keyed(args, "qty"), USAGE)?),
                    None => None,
                };
                Command::Buy(ManualEntry {
                    ticker: ticker.to_uppercase(),
                    price: number(args.get(2), USAGE)?,
                    stop: number(keyed(args, "stop"), USAGE)?,
                    target: number(keyed(args, "target"), USAGE)?,
                    quantity,
                })
            }
            "close" => {
                const USAGE: &str = "/close TICKER|ID PRICE [bot]";
                let reference = args.first().ok_or_else(|| malformed(USAGE))?.to_string();
                let price = number(args.get(1), USAGE)?;
                let ledger = match args.get(2).map(|s| s.to_ascii_lowercase()).as_deref() {
                    None | Some("my") => Ledger::MyTrades,
                    Some("bot") => Ledger::BotAlerts,
                    Some(_) => return Err(malformed(USAGE)),
                };
                Command::Close {
                    reference,
                    price,
                    ledger,
                }
            }
            "positions" => Command::Positions,
            "performance" => Command::Performance,
            "help" | "start" | "commands" => Command::Help,
            other => {
                return Err(AgentError::MalformedCommand(format!(
                    "Unknown command /{other}. Try /help"
                )))
            }
        };
        Ok(Some(cmd))
    }
}

/// Direct functions per core operation, plus text dispatch for chat.
pub struct CommandService {
    agent: Arc<ScanAgent>,
}

impl CommandService {
    pub fn new(agent: Arc<ScanAgent>) -> Self {
        Self { agent }
    }

    pub async fn inspect(&self, ticker: &str) -> Result<Signal> {
        let ticker = ticker.trim().to_uppercase();
        self.agent
            .analyze(&ticker, false)
            .await?
            .ok_or_else(|| AgentError::data_unavailable(&ticker, "no result"))
    }

    pub async fn force_scan(&self) -> Vec<Signal> {
        self.agent.force_scan().await
    }

    pub async fn declare_entry_from_alert(&self, alert_id: &str, fill: EntryFill) -> Result<Position> {
        self.agent
            .tracker()
            .declare_entry_from_alert(alert_id, fill)
            .await
    }

    pub async fn declare_manual_entry(&self, entry: ManualEntry) -> Result<Position> {
        self.agent.tracker().declare_manual_entry(entry).await
    }

    pub async fn declare_close(&self, reference: &str, price: f64, ledger: Ledger) -> Result<ClosedPosition> {
        self.agent.tracker().close_manual(reference, price, ledger).await
    }

    pub async fn list_open_positions(&self) -> Result<Vec<Position>> {
        self.agent.tracker().list_open().await
    }

    pub async fn show_performance(&self) -> Result<Vec<(Ledger, Option<PerformanceSummary>)>> {
        self.agent.tracker().performance().await
    }

    /// Replies for one chat message. Every command gets at least one reply;
    /// failures come back as a rejection line.
    pub async fn handle(&self, text: &str) -> Vec<String> {
        let cmd = match Command::parse(text) {
            Ok(Some(cmd)) => cmd,
            Ok(None) => return Vec::new(),
            Err(e) => return vec![format!("❌ {e}")],
        };
        debug!("Command: {:?}", cmd);

        match self.execute(cmd).await {
            Ok(replies) => replies,
            Err(e) => {
                warn!("Command rejected: {}", e);
                vec![format!("❌ {e}")]
            }
        }
    }

    async fn execute(&self, cmd: Command) -> Result<Vec<String>> {
        let replies = match cmd {
            Command::Check(ticker) => match self.inspect(&ticker).await {
                Ok(signal) => vec![format::signal_message(&signal, None)],
                Err(e) => vec![format!("❌ Could not analyze {ticker}: {e}")],
            },
            Command::Scan => {
                let found = self.force_scan().await;
                if found.is_empty() {
                    vec!["😴 No setups found".to_string()]
                } else {
                    found.iter().map(|s| format::signal_message(s, None)).collect()
                }
            }
            Command::Entered { alert_id, fill } => {
                let pos = self.declare_entry_from_alert(&alert_id, fill).await?;
                vec![format::entry_message(&pos)]
            }
            Command::Buy(entry) => {
                let pos = self.declare_manual_entry(entry).await?;
                vec![format::entry_message(&pos)]
            }
            Command::Close {
                reference,
                price,
                ledger,
            } => {
                let closed = self.declare_close(&reference, price, ledger).await?;
                vec![format::exit_message(&closed)]
            }
            Command::Positions => vec![format::positions_message(&self.list_open_positions().await?)],
            Command::Performance => vec![format::performance_message(&self.show_performance().await?)],
            Command::Help => vec![format::help_text().to_string()],
        };
        Ok(replies)
    }
}

/// Long-polls Telegram for commands from the configured chat and answers them.
pub async fn serve(service: Arc<CommandService>, telegram: Arc<TelegramClient>) {
    info!("Command worker listening");
    let mut offset = 0i64;
    loop {
        let updates = match telegram.get_updates(offset).await {
            Ok(u) => u,
            Err(e) => {
                warn!("getUpdates failed: {}", e);
                tokio::time::sleep(POLL_ERROR_BACKOFF).await;
                continue;
            }
        };

        for update in updates {
            offset = offset.max(update.update_id + 1);
            let Some(message) = update.message else {
                continue;
            };
            if message.chat.id.to_string() != telegram.chat_id() {
                debug!("Ignoring message from chat {}", message.chat.id);
                continue;
            }
            let Some(text) = message.text else {
                continue;
            };

            let service = service.clone();
            let telegram = telegram.clone();
            // long commands (/scan) must not stall polling
            tokio::spawn(async move {
                for reply in service.handle(&text).await {
                    if let Err(e) = telegram.send(&reply).await {
                        error!("Reply failed: {}", e);
                    }
                }
            });
        }
    }
}
