//! Scan cycle, exit pass and the run loop that schedules them.

use chrono::{DateTime, NaiveDate, Utc};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::config::SharedConfig;
use crate::core::classifier::{self, Signal};
use crate::core::dedup::{AlertDecision, AlertMemory};
use crate::core::options;
use crate::core::schedule::{ScanSchedule, IDLE_POLL};
use crate::error::{AgentError, Result};
use crate::market::{MarketData, MarketDataError};
use crate::models::{contract_key, InstrumentType, Position, PriceBand};
use crate::notify::{format, Notifier};
use crate::trading::{ClosedPosition, PositionTracker};

const LOOP_SLEEP: Duration = Duration::from_secs(30);
/// Tickers covered by a forced scan.
pub const FORCE_SCAN_LIMIT: usize = 20;

/// Waits the scan loop inserts between provider-facing steps.
#[derive(Debug, Clone, Copy)]
pub struct Pacing {
    /// After each delivered alert.
    pub alert_pause: Duration,
    /// After the provider signals a rate limit.
    pub cooldown: Duration,
}

impl Pacing {
    pub fn immediate() -> Self {
        Self {
            alert_pause: Duration::ZERO,
            cooldown: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AlertOutcome {
    pub signal: Signal,
    pub decision: AlertDecision,
    /// Bot-ledger row id; `None` when tracking failed.
    pub alert_id: Option<String>,
    pub delivered: bool,
}

#[derive(Debug, Clone, Default)]
pub struct ScanReport {
    pub scanned: usize,
    pub alerts: Vec<AlertOutcome>,
    pub suppressed: Vec<(String, AlertDecision)>,
    pub skipped: Vec<String>,
    pub rate_limited: usize,
}

/// Marks a scan or exit pass in flight; cleared on drop.
struct PassGuard<'a>(&'a AtomicBool);

impl Drop for PassGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

struct LoopState {
    next_scan: Option<Instant>,
    next_exit_check: Option<Instant>,
}

pub struct ScanAgent {
    config: SharedConfig,
    market: Arc<dyn MarketData>,
    tracker: Arc<PositionTracker>,
    notifier: Arc<dyn Notifier>,
    memory: Mutex<AlertMemory>,
    schedule: ScanSchedule,
    pacing: Pacing,
    exit_interval: Duration,
    busy: AtomicBool,
}

impl ScanAgent {
    pub async fn new(
        config: SharedConfig,
        market: Arc<dyn MarketData>,
        tracker: Arc<PositionTracker>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let cfg = config.read().await;

        info!("{}", "=".repeat(60));
        info!("Stock alert agent starting up");
        info!("Universe: {} tickers", cfg.tickers.len());
        info!("Market data: {}", market.name());
        info!("Store: {}", tracker.store().name());
        info!("Notifier: {}", notifier.name());
        info!(
            "Active {}:00-{}:00 {}, capital ${:.0}/position",
            cfg.active_start_hour, cfg.active_end_hour, cfg.timezone, cfg.position_capital
        );
        info!("{}", "=".repeat(60));

        let memory = AlertMemory::new(cfg.timezone, tracker.now());
        let schedule = ScanSchedule::from_config(&cfg);
        let pacing = Pacing {
            alert_pause: Duration::from_millis(cfg.alert_pause_ms),
            cooldown: Duration::from_secs(cfg.rate_limit_cooldown),
        };
        let exit_interval = Duration::from_secs(cfg.exit_check_interval);
        drop(cfg);

        Self {
            config,
            market,
            tracker,
            notifier,
            memory: Mutex::new(memory),
            schedule,
            pacing,
            exit_interval,
            busy: AtomicBool::new(false),
        }
    }

    pub fn with_pacing(mut self, pacing: Pacing) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn tracker(&self) -> &Arc<PositionTracker> {
        &self.tracker
    }

    pub fn notifier(&self) -> &Arc<dyn Notifier> {
        &self.notifier
    }

    /// The tracker's clock, so replay and tests move both together.
    pub fn now(&self) -> DateTime<Utc> {
        self.tracker.now()
    }

    pub async fn memory_len(&self) -> usize {
        self.memory.lock().await.len()
    }

    fn begin_pass(&self) -> Option<PassGuard<'_>> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| PassGuard(&self.busy))
    }

    // ── Analysis ────────────────────────────────────────────────────────

    /// Full evaluation of one ticker, with an options suggestion for
    /// directional results. Non-strict evaluation yields NEUTRAL instead of `None`.
    pub async fn analyze(&self, ticker: &str, strict: bool) -> Result<Option<Signal>> {
        let (range, capital, tz) = {
            let cfg = self.config.read().await;
            (cfg.history_range.clone(), cfg.position_capital, cfg.timezone)
        };

        let series = self
            .market
            .get_history(ticker, &range)
            .await
            .map_err(|e| match e {
                MarketDataError::RateLimited { .. } => AgentError::ProviderRateLimited {
                    cooldown_secs: self.pacing.cooldown.as_secs(),
                },
                other => AgentError::data_unavailable(ticker, other.to_string()),
            })?;

        let signal = classifier::evaluate(ticker, &series, capital, strict)
            .map_err(|e| AgentError::data_unavailable(ticker, e.to_string()))?;
        let Some(mut signal) = signal else {
            return Ok(None);
        };

        if let Some(direction) = signal.direction.to_trade() {
            let local_now = self.now().with_timezone(&tz).naive_local();
            match options::suggest(
                self.market.as_ref(),
                ticker,
                direction,
                signal.price,
                signal.atr,
                local_now,
            )
            .await
            {
                Ok(insight) => signal.options_insight = Some(insight),
                Err(e) => debug!("{}", e),
            }
        }
        Ok(Some(signal))
    }

    /// `analyze`, retried once after a rate-limit cooldown.
    async fn analyze_with_backoff(&self, ticker: &str, report: &mut ScanReport) -> Result<Option<Signal>> {
        match self.analyze(ticker, true).await {
            Err(AgentError::ProviderRateLimited { cooldown_secs }) => {
                report.rate_limited += 1;
                warn!("Rate limited on {}, cooling down {}s", ticker, cooldown_secs);
                tokio::time::sleep(self.pacing.cooldown).await;
                self.analyze(ticker, true).await
            }
            other => other,
        }
    }

    // ── Scan ────────────────────────────────────────────────────────────

    /// Configured tickers followed by today's most active symbols, without repeats.
    pub async fn universe(&self) -> Vec<String> {
        let (mut tickers, movers) = {
            let cfg = self.config.read().await;
            (cfg.tickers.clone(), cfg.scan_movers.then_some(cfg.movers_count))
        };
        let Some(count) = movers else {
            return tickers;
        };
        match self.market.get_top_movers(count).await {
            Ok(movers) => {
                let configured = tickers.len();
                for m in movers {
                    if !tickers.contains(&m) {
                        tickers.push(m);
                    }
                }
                debug!("Universe: {} configured + {} movers", configured, tickers.len() - configured);
            }
            Err(e) => warn!("Top movers unavailable, scanning configured list: {}", e),
        }
        tickers
    }

    /// One pass over `tickers`. `None` when another pass is already running.
    pub async fn scan_cycle(&self, tickers: &[String]) -> Option<ScanReport> {
        let Some(_guard) = self.begin_pass() else {
            info!("Scan already in progress, skipping");
            return None;
        };

        let started = Instant::now();
        info!("Scan started: {} tickers", tickers.len());
        let mut report = ScanReport::default();

        for ticker in tickers {
            report.scanned += 1;
            let signal = match self.analyze_with_backoff(ticker, &mut report).await {
                Ok(Some(s)) => s,
                Ok(None) => continue,
                Err(e) => {
                    if e.is_silent() {
                        debug!("Skip {}: {}", ticker, e);
                    } else {
                        warn!("Skip {}: {}", ticker, e);
                    }
                    report.skipped.push(ticker.clone());
                    continue;
                }
            };

            let decision = {
                let mut memory = self.memory.lock().await;
                memory.check_and_record(ticker, signal.direction, signal.score, self.now())
            };
            if !decision.alert {
                debug!("{} {} {} suppressed: {}", ticker, signal.direction, signal.score, decision.reason);
                report.suppressed.push((ticker.clone(), decision));
                continue;
            }

            let outcome = self.deliver(signal, decision).await;
            if outcome.delivered && !self.pacing.alert_pause.is_zero() {
                tokio::time::sleep(self.pacing.alert_pause).await;
            }
            report.alerts.push(outcome);
        }

        info!(
            "Scan complete in {:.1}s: {} scanned, {} alerts, {} suppressed, {} skipped",
            started.elapsed().as_secs_f64(),
            report.scanned,
            report.alerts.len(),
            report.suppressed.len(),
            report.skipped.len()
        );
        Some(report)
    }

    async fn deliver(&self, signal: Signal, decision: AlertDecision) -> AlertOutcome {
        info!(
            "ALERT {} {} score {} @ {:.2} ({})",
            signal.ticker, signal.direction, signal.score, signal.price, decision.reason
        );

        let alert_id = match self.tracker.open_from_signal(&signal).await {
            Ok(pos) => Some(pos.id),
            Err(e) => {
                error!("Failed to track alert for {}: {}", signal.ticker, e);
                None
            }
        };

        let text = format::signal_message(&signal, alert_id.as_deref());
        let delivered = match self.notifier.send(&text).await {
            Ok(()) => true,
            Err(e) => {
                error!("Alert delivery for {} failed: {}", signal.ticker, e);
                false
            }
        };

        AlertOutcome {
            signal,
            decision,
            alert_id,
            delivered,
        }
    }

    /// The day's most active symbols, or the head of the configured list when
    /// movers are off or the provider has none.
    async fn force_scan_tickers(&self) -> Vec<String> {
        let (configured, movers) = {
            let cfg = self.config.read().await;
            let head: Vec<String> = cfg.tickers.iter().take(FORCE_SCAN_LIMIT).cloned().collect();
            (head, cfg.scan_movers)
        };
        if movers {
            match self.market.get_top_movers(FORCE_SCAN_LIMIT).await {
                Ok(m) if !m.is_empty() => return m,
                Ok(_) => debug!("No movers listed, force-scanning configured tickers"),
                Err(e) => warn!("Top movers unavailable, force-scanning configured tickers: {}", e),
            }
        }
        configured
    }

    /// Strict analysis of up to 20 tickers, bypassing the deduplicator and the ledgers.
    pub async fn force_scan(&self) -> Vec<Signal> {
        let tickers = self.force_scan_tickers().await;
        let mut found = Vec::new();
        let mut report = ScanReport::default();
        for ticker in &tickers {
            match self.analyze_with_backoff(ticker, &mut report).await {
                Ok(Some(s)) => found.push(s),
                Ok(None) => {}
                Err(e) => debug!("Force scan skip {}: {}", ticker, e),
            }
        }
        info!("Force scan: {} setups in {} tickers", found.len(), tickers.len());
        found
    }

    // ── Exits ───────────────────────────────────────────────────────────

    /// Latest bands for every open position, then closes whatever hit its
    /// stop or target. Skipped while a scan runs.
    pub async fn exit_pass(&self) -> Result<Vec<ClosedPosition>> {
        let Some(_guard) = self.begin_pass() else {
            debug!("Exit pass deferred: scan in progress");
            return Ok(Vec::new());
        };

        let open = self.tracker.list_open().await?;
        let bands = self.fetch_bands(&open).await;

        let closed = self.tracker.process_exits(&bands).await?;
        for c in &closed {
            if let Err(e) = self.notifier.send(&format::exit_message(c)).await {
                error!("Exit notice for {} failed: {}", c.position.ticker, e);
            }
        }
        if !closed.is_empty() {
            info!("Exit pass closed {} positions", closed.len());
        }
        Ok(closed)
    }

    /// Session band of each underlying held as shares, and the last premium
    /// of each held option contract, keyed by `Position::band_key`. A rate
    /// limit ends fetching; whatever was gathered is still used.
    async fn fetch_bands(&self, open: &[Position]) -> HashMap<String, PriceBand> {
        let mut tickers: BTreeSet<&str> = BTreeSet::new();
        let mut contracts: BTreeMap<(&str, NaiveDate), Vec<(InstrumentType, f64)>> = BTreeMap::new();
        for p in open {
            match p.contract() {
                Some((kind, expiry, strike)) => contracts
                    .entry((p.ticker.as_str(), expiry))
                    .or_default()
                    .push((kind, strike)),
                None if p.instrument_type() == InstrumentType::Shares => {
                    tickers.insert(p.ticker.as_str());
                }
                None => {}
            }
        }

        let mut bands = HashMap::new();
        for ticker in tickers {
            match self.market.get_band(ticker).await {
                Ok(band) => {
                    bands.insert(ticker.to_string(), band);
                }
                Err(e) if e.is_rate_limit() => {
                    self.exit_check_cooldown(bands.len()).await;
                    return bands;
                }
                Err(e) => debug!("No band for {}: {}", ticker, e),
            }
        }

        for ((ticker, expiry), held) in contracts {
            let chain = match self.market.get_option_chain(ticker, expiry).await {
                Ok(chain) => chain,
                Err(e) if e.is_rate_limit() => {
                    self.exit_check_cooldown(bands.len()).await;
                    return bands;
                }
                Err(e) => {
                    debug!("No chain for {} {}: {}", ticker, expiry, e);
                    continue;
                }
            };
            for (kind, strike) in held {
                match chain.quote(kind, strike).and_then(|q| q.premium_band()) {
                    Some(band) => {
                        bands.insert(contract_key(ticker, kind, expiry, strike), band);
                    }
                    None => debug!("No premium for {} {} {} {:.2}", ticker, expiry, kind, strike),
                }
            }
        }
        bands
    }

    async fn exit_check_cooldown(&self, fetched: usize) {
        warn!("Rate limited during exit check; using {} bands", fetched);
        tokio::time::sleep(self.pacing.cooldown).await;
    }

    // ── Loop ────────────────────────────────────────────────────────────

    pub async fn run(&self) -> anyhow::Result<()> {
        info!("Agent is now running. Press Ctrl+C to stop.");
        let tickers = self.config.read().await.tickers.len();
        if let Err(e) = self
            .notifier
            .send(&format!("🟢 Scanner online: {tickers} tickers"))
            .await
        {
            warn!("Startup notice failed: {}", e);
        }

        let mut state = LoopState {
            next_scan: None,
            next_exit_check: None,
        };
        loop {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("Shutting down");
                    return Ok(());
                }
                _ = self.tick(&mut state) => {}
            }
        }
    }

    async fn tick(&self, state: &mut LoopState) {
        let now = self.now();
        self.memory.lock().await.roll_day(now);

        if !self.schedule.is_active(now) {
            state.next_scan = None;
            debug!("Outside scan window, idling");
            tokio::time::sleep(IDLE_POLL).await;
            return;
        }

        let due = |at: Option<Instant>| at.map_or(true, |t| Instant::now() >= t);

        if due(state.next_scan) {
            let tickers = self.universe().await;
            if self.scan_cycle(&tickers).await.is_some() {
                state.next_scan = Some(Instant::now() + self.schedule.interval(self.now()));
            }
            // exits right after every scan
            state.next_exit_check = None;
        }

        if due(state.next_exit_check) {
            match self.exit_pass().await {
                Ok(_) => state.next_exit_check = Some(Instant::now() + self.exit_interval),
                Err(e) => error!("Exit pass failed: {}", e),
            }
        }

        tokio::time::sleep(LOOP_SLEEP).await;
    }
}
