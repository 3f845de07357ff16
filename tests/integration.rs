mod common;

use chrono::{Duration, NaiveDate, TimeZone, Utc};
use std::collections::HashMap;
use std::sync::Arc;

use stock_alert_bot::agent::{Pacing, ScanAgent};
use stock_alert_bot::commands::CommandService;
use stock_alert_bot::core::dedup::AlertReason;
use stock_alert_bot::error::AgentError;
use stock_alert_bot::market::{MarketData, ReplayMarket};
use stock_alert_bot::models::{
    ExitReason, InstrumentType, Ledger, OptionChain, OptionQuote, PositionStatus, PriceBand,
    PriceBar, PriceSeries, SignalDirection, TradeDirection,
};
use stock_alert_bot::store::{JsonStore, PositionStore};
use stock_alert_bot::trading::{ManualEntry, PositionTracker};

use common::{make_bars, make_zigzag_uptrend, test_config, FlakyStore, RecordingNotifier};

/// 300 zigzag bars, then one bar that gaps down through every stop.
fn zigzag_with_breakdown() -> PriceSeries {
    let base = make_zigzag_uptrend(300);
    let last_date = base.last().unwrap().date;
    let mut bars = base.as_slice().to_vec();
    bars.push(PriceBar {
        date: last_date + Duration::days(1),
        open: 401.0,
        high: 402.0,
        low: 390.0,
        close: 391.0,
        volume: 1_000_000.0,
    });
    PriceSeries::new(bars)
}

struct Harness {
    market: Arc<ReplayMarket>,
    agent: Arc<ScanAgent>,
    notifier: Arc<RecordingNotifier>,
    tracker: Arc<PositionTracker>,
}

async fn harness(market: ReplayMarket, store: Arc<dyn PositionStore>) -> Harness {
    let cfg = test_config();
    let tracker = Arc::new(PositionTracker::new(&cfg, store));
    tracker.set_time(Some(Utc.with_ymd_and_hms(2024, 3, 5, 15, 0, 0).unwrap()));
    let notifier = Arc::new(RecordingNotifier::default());
    let market = Arc::new(market);
    let dyn_market: Arc<dyn MarketData> = market.clone();
    let agent = ScanAgent::new(cfg.shared(), dyn_market, tracker.clone(), notifier.clone())
        .await
        .with_pacing(Pacing::immediate());
    Harness {
        market,
        agent: Arc::new(agent),
        notifier,
        tracker,
    }
}

fn universe() -> Vec<String> {
    vec!["ZIG".into(), "FLAT".into(), "GONE".into()]
}

#[tokio::test]
async fn full_pipeline_alert_entry_and_exit() {
    let mut market = ReplayMarket::new();
    let series = zigzag_with_breakdown();
    let signal_day = series[299].date;
    market.load("ZIG", series);
    market.load("FLAT", make_bars(&vec![(50.0, 50.0, 50.0, 50.0); 300]));
    market.set_date(Some(signal_day));

    let h = harness(market, Arc::new(JsonStore::in_memory())).await;

    // 1. Scan: one BULL alert, flat and unknown tickers skipped quietly
    let report = h.agent.scan_cycle(&universe()).await.unwrap();
    assert_eq!(report.scanned, 3);
    assert_eq!(report.alerts.len(), 1);
    assert_eq!(report.skipped.len(), 2);

    let alert = &report.alerts[0];
    assert_eq!(alert.signal.direction, SignalDirection::Bull);
    assert_eq!(alert.signal.price, 401.0);
    assert_eq!(alert.decision.reason, AlertReason::New);
    assert!(alert.signal.reasons.iter().any(|r| r == "Strong Uptrend"));
    assert!(alert.signal.reasons.iter().any(|r| r.starts_with("ADX Strong")));
    let plan = alert.signal.plan.as_ref().unwrap();
    assert_eq!((plan.stop, plan.target, plan.quantity), (393.5, 411.5, 6));

    let alert_id = alert.alert_id.clone().unwrap();
    let sent = h.notifier.messages();
    assert_eq!(sent.len(), 1);
    assert!(sent[0].contains(&alert_id));

    // 2. The human confirms a fill through the command surface
    let service = CommandService::new(h.agent.clone());
    let replies = service.handle(&format!("/entered {alert_id} shares 402")).await;
    assert_eq!(replies.len(), 1);
    assert!(replies[0].contains("Position tracked"), "{}", replies[0]);

    let open = service.list_open_positions().await.unwrap();
    assert_eq!(open.len(), 2);
    let mine = open.iter().find(|p| p.ledger == Ledger::MyTrades).unwrap();
    assert_eq!((mine.entry_price, mine.stop, mine.target, mine.quantity), (402.0, 394.5, 412.5, 6));

    // 3. Next bar breaks down through both stops
    h.market.set_date(None);
    let closed = h.agent.exit_pass().await.unwrap();
    assert_eq!(closed.len(), 2);
    for c in &closed {
        assert_eq!(c.reason(), Some(ExitReason::Stop));
        assert_eq!(c.position.status, PositionStatus::ClosedLoss);
        assert_eq!(c.pnl.dollar, -47.0);
    }
    let exits: Vec<String> = h
        .notifier
        .messages()
        .into_iter()
        .filter(|m| m.contains("EXIT: STOP"))
        .collect();
    assert_eq!(exits.len(), 2);

    let perf = service.show_performance().await.unwrap();
    for (_, summary) in perf {
        let s = summary.unwrap();
        assert_eq!(s.total_trades, 1);
        assert_eq!(s.net_pnl, -47.0);
    }
    assert!(service.list_open_positions().await.unwrap().is_empty());
}

fn one_call(strike: f64, last: f64) -> OptionChain {
    OptionChain {
        calls: vec![OptionQuote {
            strike,
            bid: last - 0.1,
            ask: last + 0.1,
            last_price: last,
            volume: 120,
            open_interest: 800,
        }],
        puts: vec![],
    }
}

#[tokio::test]
async fn alerted_call_closes_on_premium_target() {
    let expiry = NaiveDate::from_ymd_opt(2024, 4, 19).unwrap();
    let mut market = ReplayMarket::new();
    market.load("ZIG", make_zigzag_uptrend(300));
    market.load_chain("ZIG", expiry, one_call(410.0, 5.0));
    let h = harness(market, Arc::new(JsonStore::in_memory())).await;

    let report = h.agent.scan_cycle(&["ZIG".to_string()]).await.unwrap();
    let alert = &report.alerts[0];
    let insight = alert.signal.options_insight.as_ref().unwrap();
    assert_eq!((insight.kind, insight.strike, insight.expiry), (InstrumentType::Call, 410.0, expiry));

    let service = CommandService::new(h.agent.clone());
    let alert_id = alert.alert_id.clone().unwrap();
    let replies = service.handle(&format!("/entered {alert_id} options 2 5.00")).await;
    assert!(replies[0].contains("Position tracked"), "{}", replies[0]);

    // premium unchanged, underlying inside its levels
    assert!(h.agent.exit_pass().await.unwrap().is_empty());

    h.market.update_chain("ZIG", expiry, one_call(410.0, 7.8));
    let closed = h.agent.exit_pass().await.unwrap();
    assert_eq!(closed.len(), 1);
    let call = &closed[0];
    assert_eq!(call.position.ledger, Ledger::MyTrades);
    assert_eq!(call.position.instrument_type(), InstrumentType::Call);
    assert_eq!(call.reason(), Some(ExitReason::Target));
    assert_eq!(call.position.status, PositionStatus::ClosedProfit);
    // (7.50 - 5.00) * 100 * 2 - 2
    assert_eq!(call.pnl.dollar, 498.0);
    assert!(h.notifier.messages().iter().any(|m| m.contains("EXIT: TARGET")));

    // the bot's share entry on the same alert is still open
    let open = service.list_open_positions().await.unwrap();
    assert_eq!(open.len(), 1);
    assert_eq!(open[0].ledger, Ledger::BotAlerts);
}

#[tokio::test]
async fn repeated_cycle_is_duplicate_until_next_day() {
    let mut market = ReplayMarket::new();
    market.load("ZIG", make_zigzag_uptrend(300));
    let h = harness(market, Arc::new(JsonStore::in_memory())).await;
    let tickers = vec!["ZIG".to_string()];

    let first = h.agent.scan_cycle(&tickers).await.unwrap();
    assert_eq!(first.alerts.len(), 1);

    let second = h.agent.scan_cycle(&tickers).await.unwrap();
    assert!(second.alerts.is_empty());
    let (ticker, decision) = &second.suppressed[0];
    assert_eq!(ticker, "ZIG");
    assert!(!decision.alert);
    assert_eq!(decision.reason, AlertReason::Duplicate);
    assert_eq!(decision.reason.to_string(), "duplicate");

    // past midnight in New York the memory starts over
    h.tracker
        .set_time(Some(Utc.with_ymd_and_hms(2024, 3, 6, 12, 0, 0).unwrap()));
    let third = h.agent.scan_cycle(&tickers).await.unwrap();
    assert_eq!(third.alerts.len(), 1);
    assert_eq!(third.alerts[0].decision.reason, AlertReason::New);
    assert_eq!(h.agent.memory_len().await, 1);
}

#[tokio::test]
async fn stop_is_checked_before_target() {
    let h = harness(ReplayMarket::new(), Arc::new(JsonStore::in_memory())).await;
    let pos = h
        .tracker
        .declare_manual_entry(ManualEntry {
            ticker: "AAPL".into(),
            price: 100.0,
            stop: 95.0,
            target: 110.0,
            quantity: Some(10),
        })
        .await
        .unwrap();
    assert_eq!(pos.direction, TradeDirection::Bull);

    let bands = HashMap::from([(
        "AAPL".to_string(),
        PriceBand {
            last: 100.0,
            high: 108.0,
            low: 94.0,
        },
    )]);
    let closed = h.tracker.process_exits(&bands).await.unwrap();
    assert_eq!(closed.len(), 1);
    let exit = closed[0].position.exit.as_ref().unwrap();
    assert_eq!(exit.reason, ExitReason::Stop);
    assert_eq!(exit.exit_price, 95.0);
    assert_eq!(closed[0].pnl.dollar, -52.0);
    assert_eq!(closed[0].position.status, PositionStatus::ClosedLoss);
}

#[tokio::test]
async fn manual_close_without_position_is_rejected() {
    let store: Arc<dyn PositionStore> = Arc::new(JsonStore::in_memory());
    let h = harness(ReplayMarket::new(), store.clone()).await;
    let service = CommandService::new(h.agent.clone());

    let err = service
        .declare_close("TSLA", 250.0, Ledger::MyTrades)
        .await
        .unwrap_err();
    assert!(matches!(err, AgentError::UnknownReference(_)));

    let replies = service.handle("/close TSLA 250").await;
    assert_eq!(replies, vec!["❌ No open My_Trades position found for TSLA".to_string()]);

    // a bot-ledger row for the ticker does not satisfy a close aimed at the human ledger
    let pos = h
        .tracker
        .declare_manual_entry(ManualEntry {
            ticker: "NVDA".into(),
            price: 900.0,
            stop: 880.0,
            target: 950.0,
            quantity: None,
        })
        .await
        .unwrap();
    assert!(service.declare_close("NVDA", 910.0, Ledger::BotAlerts).await.is_err());
    assert!(store.list_all(Ledger::BotAlerts).await.unwrap().is_empty());
    assert!(store.find_by_id(Ledger::MyTrades, &pos.id).await.unwrap().unwrap().is_open());
}

#[tokio::test]
async fn failed_exit_write_is_retried() {
    let flaky = Arc::new(FlakyStore::new(Arc::new(JsonStore::in_memory())));
    let h = harness(ReplayMarket::new(), flaky.clone()).await;
    h.tracker
        .declare_manual_entry(ManualEntry {
            ticker: "AMD".into(),
            price: 100.0,
            stop: 95.0,
            target: 110.0,
            quantity: Some(10),
        })
        .await
        .unwrap();

    flaky.fail_next_exits(1);
    let bands = HashMap::from([(
        "AMD".to_string(),
        PriceBand {
            last: 111.0,
            high: 112.0,
            low: 99.0,
        },
    )]);
    assert!(h.tracker.process_exits(&bands).await.unwrap().is_empty());
    assert_eq!(h.tracker.pending_exit_count(), 1);
    assert_eq!(h.tracker.list_open().await.unwrap().len(), 1);

    // no fresh band needed: the parked decision is replayed as-is
    let closed = h.tracker.process_exits(&HashMap::new()).await.unwrap();
    assert_eq!(closed.len(), 1);
    assert_eq!(closed[0].reason(), Some(ExitReason::Target));
    assert_eq!(closed[0].pnl.dollar, 98.0);
    assert_eq!(h.tracker.pending_exit_count(), 0);
    assert!(h.tracker.list_open().await.unwrap().is_empty());
}

#[tokio::test]
async fn chat_commands_round_trip() {
    let h = harness(ReplayMarket::new(), Arc::new(JsonStore::in_memory())).await;
    let service = CommandService::new(h.agent.clone());

    assert!(service.handle("just chatting").await.is_empty());
    assert!(service.handle("/buy AAPL shares 185 stop 180").await[0].starts_with("❌ Usage:"));

    let replies = service.handle("/buy aapl shares 185 stop 180 target 195").await;
    assert!(replies[0].contains("*AAPL* BULL SHARES"), "{}", replies[0]);

    let listing = service.handle("/positions").await;
    assert!(listing[0].contains("AAPL"));

    let closed = service.handle("/close AAPL 190").await;
    // floor(2500 / 185) = 13 shares, (190 - 185) * 13 - 2
    assert!(closed[0].contains("+$63.00"), "{}", closed[0]);

    let perf = service.handle("/performance").await;
    assert!(perf[0].contains("Net P&L: +$63.00"), "{}", perf[0]);
    assert!(service.handle("/help").await[0].contains("/entered"));
}
