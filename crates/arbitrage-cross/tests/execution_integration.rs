//! Integration tests for hedged execution end to end.
//!
//! These tests drive the engine, resolver, reconciler and recovery against
//! paper venues and a real ledger file:
//! - Single-leg safety (venue B untouched unless venue A fills)
//! - Settlement determinism and directional correctness
//! - Partial hedges resolved immediately
//! - Reconciliation idempotence and legacy data handling
//! - Recovery of an interrupted execution after restart
//! - Ledger durability across reopen and torn writes

use std::io::Write;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tempfile::TempDir;

use sportsarb_core::{
    AppConfig, Direction, FeeConfig, GameMapping, MarketResult, Opportunity, PriceLevel, Quote,
    Venue, VenueError,
};
use sportsarb_cross::{
    CircuitBreaker, ExecutionEngine, ExecutionOutcome, FeeCalculator, FillBehavior, IntegrityKind,
    LedgerEntry, LedgerError, LegId, PaperQuoteBook, PaperVenue, Reconciler, Recovery,
    ResolveOutcome, Resolver, SessionStore, SkipReason, StaticMappingService, Tier, TradeLedger,
    TradeStatus, UnwindRecord, VenuePair, Writer,
};

// =============================================================================
// Helper Functions
// =============================================================================

fn create_opportunity(direction: Direction) -> Opportunity {
    Opportunity {
        sport: "nba".to_string(),
        game_id: "LAL-BOS-20261019".to_string(),
        team: "LAL".to_string(),
        opponent: "BOS".to_string(),
        direction,
        venue_a_bid: dec!(44),
        venue_a_ask: dec!(45),
        venue_b_bid: dec!(50),
        venue_b_ask: dec!(51),
        max_size: 10,
        venue_a_market: "pm-lal-bos-lal".to_string(),
        venue_b_market: "KXNBA-LALBOS-LAL".to_string(),
        venue_b_is_opponent: false,
        quoted_at: Utc::now(),
        venue_a_depth: Some(vec![PriceLevel::new(dec!(45), 25), PriceLevel::new(dec!(46), 25)]),
        venue_b_depth: Some(vec![PriceLevel::new(dec!(50), 25), PriceLevel::new(dec!(51), 25)]),
    }
}

fn create_mapping(opp: &Opportunity) -> GameMapping {
    GameMapping {
        sport: opp.sport.clone(),
        game_id: opp.game_id.clone(),
        team: opp.team.clone(),
        venue_a_market: opp.venue_a_market.clone(),
        venue_b_market: opp.venue_b_market.clone(),
        venue_b_is_opponent: opp.venue_b_is_opponent,
    }
}

/// Everything wired together against paper venues.
struct TestSystem {
    dir: TempDir,
    venue_a: Arc<PaperVenue>,
    venue_b: Arc<PaperVenue>,
    quotes: Arc<PaperQuoteBook>,
    ledger: Arc<TradeLedger>,
    store: Arc<SessionStore>,
    engine: ExecutionEngine,
    resolver: Arc<Resolver>,
    reconciler: Reconciler,
}

impl TestSystem {
    fn new(fees: FeeConfig) -> Self {
        let dir = TempDir::new().unwrap();
        let ledger = Arc::new(TradeLedger::open(dir.path().join("trades.jsonl")).unwrap());
        let venue_a = Arc::new(PaperVenue::new(Venue::Polymarket).with_fees(fees.clone()));
        let venue_b = Arc::new(PaperVenue::new(Venue::Kalshi).with_fees(fees.clone()));
        Self::wire(dir, ledger, venue_a, venue_b, fees)
    }

    fn wire(
        dir: TempDir,
        ledger: Arc<TradeLedger>,
        venue_a: Arc<PaperVenue>,
        venue_b: Arc<PaperVenue>,
        fees: FeeConfig,
    ) -> Self {
        let mut config = AppConfig::default();
        config.fees = fees;
        config.engine = config
            .engine
            .with_timeouts(Duration::from_secs(1), Duration::from_millis(1));
        config.resolver.order_timeout = Duration::from_secs(1);
        config.resolver.order_poll_interval = Duration::from_millis(1);

        let venues = VenuePair::new(venue_a.clone(), venue_b.clone());
        let opp = create_opportunity(Direction::BuyPmSellK);
        let mapping = Arc::new(StaticMappingService::from_mappings([create_mapping(&opp)]));
        let quotes = Arc::new(PaperQuoteBook::new());
        let store = Arc::new(SessionStore::new());
        let breaker = Arc::new(CircuitBreaker::new(config.circuit_breaker.clone()));

        let resolver = Arc::new(Resolver::new(
            venues.clone(),
            quotes.clone(),
            ledger.clone(),
            breaker.clone(),
            store.clone(),
            FeeCalculator::with_config(config.fees.clone()),
            config.resolver.clone(),
        ));
        let engine = ExecutionEngine::new(venues.clone(), mapping, ledger.clone(), store.clone(), breaker, &config)
            .with_resolver(resolver.clone());
        let reconciler = Reconciler::new(venues, ledger.clone(), config.reconciler.clone());

        Self {
            dir,
            venue_a,
            venue_b,
            quotes,
            ledger,
            store,
            engine,
            resolver,
            reconciler,
        }
    }

    /// Reopens the ledger from disk, keeping venue state, as after a process restart.
    fn restart(self) -> Self {
        let path = self.ledger.path().to_path_buf();
        let Self {
            dir,
            venue_a,
            venue_b,
            ledger,
            engine,
            resolver,
            reconciler,
            ..
        } = self;
        drop((engine, resolver, reconciler, ledger));
        let ledger = Arc::new(TradeLedger::open(path).unwrap());
        let fees = FeeConfig::zero();
        Self::wire(dir, ledger, venue_a, venue_b, fees)
    }
}

// =============================================================================
// Single-Leg Safety
// =============================================================================

#[tokio::test]
async fn test_venue_b_untouched_when_venue_a_does_not_fill() {
    let behaviors = [
        FillBehavior::None,
        FillBehavior::Partial(3),
        FillBehavior::Error(VenueError::rejected("FOK not filled")),
    ];
    for behavior in behaviors {
        let system = TestSystem::new(FeeConfig::zero());
        system.venue_a.script([behavior.clone()]);

        let report = system.engine.execute(&create_opportunity(Direction::BuyPmSellK)).await.unwrap();

        assert_eq!(report.outcome, ExecutionOutcome::NoFill, "behavior {behavior:?}");
        assert_eq!(report.trade.status, TradeStatus::NoFill);
        assert_eq!(report.trade.settlement_pnl, Some(Decimal::ZERO));
        assert_eq!(system.venue_b.total_calls(), 0, "behavior {behavior:?}");
        assert!(!system.store.is_traded(&report.trade.game_id));
    }
}

#[tokio::test(start_paused = true)]
async fn test_hung_venue_a_confirmed_before_hedging() {
    let system = TestSystem::new(FeeConfig::zero());
    system.venue_a.script([FillBehavior::Hang]);

    let report = system.engine.execute(&create_opportunity(Direction::BuyPmSellK)).await.unwrap();

    // The fill behind the hung response is found by client id, then hedged.
    assert_eq!(report.outcome, ExecutionOutcome::Hedged { contracts: 10 });
    assert_eq!(system.venue_b.place_calls(), 1);
}

#[tokio::test]
async fn test_phantom_spread_rejected_without_venue_calls() {
    let system = TestSystem::new(FeeConfig::zero());
    let mut opp = create_opportunity(Direction::BuyPmSellK);
    opp.venue_a_ask = dec!(5);
    opp.venue_b_bid = dec!(95);

    let report = system.engine.execute(&opp).await.unwrap();

    assert_eq!(report.outcome, ExecutionOutcome::Skipped { reason: SkipReason::PhantomSpread });
    assert_eq!(system.venue_a.total_calls(), 0);
    assert_eq!(system.venue_b.total_calls(), 0);
}

#[tokio::test]
async fn test_sizing_never_exceeds_depth_or_caps() {
    let system = TestSystem::new(FeeConfig::zero());
    let mut opp = create_opportunity(Direction::BuyPmSellK);
    opp.max_size = 500;
    opp.venue_b_depth = Some(vec![PriceLevel::new(dec!(50), 7), PriceLevel::new(dec!(60), 500)]);

    let report = system.engine.execute(&opp).await.unwrap();

    assert_eq!(report.outcome, ExecutionOutcome::Hedged { contracts: 7 });
    assert_eq!(report.trade.contracts_intended, 7);
}

// =============================================================================
// Settlement Correctness
// =============================================================================

#[tokio::test]
async fn test_hedged_pnl_identical_for_either_result() {
    for direction in [Direction::BuyPmSellK, Direction::BuyKSellPm] {
        let mut settled = Vec::new();
        for result in [MarketResult::Yes, MarketResult::No] {
            let system = TestSystem::new(FeeConfig::default());
            let mut opp = create_opportunity(direction);
            if direction == Direction::BuyKSellPm {
                // Leg A buys NO at 100 - 55 = 45c, leg B buys YES at 50c.
                opp.venue_a_bid = dec!(55);
                opp.venue_a_ask = dec!(56);
                opp.venue_b_bid = dec!(49);
                opp.venue_b_ask = dec!(50);
                opp.venue_a_depth = Some(vec![PriceLevel::new(dec!(45), 25)]);
                opp.venue_b_depth = Some(vec![PriceLevel::new(dec!(50), 25)]);
            }
            let report = system.engine.execute(&opp).await.unwrap();
            assert_eq!(report.outcome, ExecutionOutcome::Hedged { contracts: 10 });

            system.venue_b.settle(&opp.venue_b_market, result);
            let pass = system.reconciler.run_once().await.unwrap();
            assert_eq!(pass.settled.len(), 1);
            assert!(pass.drifts.is_empty());

            let trade = system.ledger.get(&report.trade.trade_id).unwrap();
            assert_eq!(
                trade.settlement_pnl,
                Some(dec!(0.50) - trade.fees.total()),
                "{direction} settled {result}"
            );
            settled.push(trade.settlement_pnl);
        }
        assert_eq!(settled[0], settled[1], "{direction}");
    }
}

#[tokio::test]
async fn test_directional_settlement() {
    for (result, expected) in [(MarketResult::Yes, dec!(2.00)), (MarketResult::No, dec!(-3.00))] {
        let system = TestSystem::new(FeeConfig::zero());
        system.venue_b.script([FillBehavior::None]);
        let mut opp = create_opportunity(Direction::BuyPmSellK);
        opp.max_size = 5;
        opp.venue_a_ask = dec!(60);
        opp.venue_b_bid = dec!(62);
        opp.venue_a_depth = Some(vec![PriceLevel::new(dec!(60), 5)]);
        opp.venue_b_depth = Some(vec![PriceLevel::new(dec!(38), 5)]);

        let report = system.engine.execute(&opp).await.unwrap();
        assert_eq!(report.outcome, ExecutionOutcome::Unhedged { contracts: 5 });
        assert_eq!(report.trade.tier, Some(Tier::Tier3aHold));
        assert_eq!(system.ledger.position(&opp.game_id, &opp.team), 5);

        system.venue_a.settle(&opp.venue_a_market, result);
        system.reconciler.run_once().await.unwrap();

        let trade = system.ledger.get(&report.trade.trade_id).unwrap();
        assert_eq!(trade.settlement_pnl, Some(expected), "settled {result}");
        assert_eq!(trade.settlement_source.as_deref(), Some("BINARY_OUTCOME"));
        assert_eq!(system.ledger.position(&opp.game_id, &opp.team), 0);
    }
}

#[tokio::test]
async fn test_partial_hedge_residual_unwound_immediately() {
    let system = TestSystem::new(FeeConfig::zero());
    system.venue_b.script([FillBehavior::Partial(6)]);
    let opp = create_opportunity(Direction::BuyPmSellK);
    system.quotes.set(Venue::Polymarket, &opp.venue_a_market, Quote::new(dec!(50), dec!(51)));
    system.quotes.set(Venue::Kalshi, &opp.venue_b_market, Quote::new(dec!(49), dec!(50)));

    let report = system.engine.execute(&opp).await.unwrap();

    match &report.outcome {
        ExecutionOutcome::PartialHedge {
            venue_a,
            venue_b,
            residual,
        } => {
            assert_eq!((*venue_a, *venue_b), (10, 6));
            assert_eq!(
                residual,
                &Some(ResolveOutcome::Unwound {
                    venue_a_contracts: 4,
                    venue_b_contracts: 0,
                    pnl_cents: dec!(20),
                })
            );
        }
        other => panic!("expected partial hedge, got {other:?}"),
    }
    assert_eq!(report.trade.status, TradeStatus::PartialHedge);
    assert_eq!(report.trade.tier, Some(Tier::Tier3Unwind));
    assert_eq!(report.trade.held(LegId::A), 6);

    system.venue_b.settle(&opp.venue_b_market, MarketResult::Yes);
    system.reconciler.run_once().await.unwrap();
    let trade = system.ledger.get(&report.trade.trade_id).unwrap();
    // 20c realized plus 6 hedged contracts at 5c.
    assert_eq!(trade.settlement_pnl, Some(dec!(0.50)));
    assert_eq!(trade.settlement_source.as_deref(), Some("SIGNED_UNWIND+LOCKED_SPREAD"));
}

#[tokio::test]
async fn test_resolver_exit_settles_without_market_result() {
    let system = TestSystem::new(FeeConfig::zero());
    let opp = create_opportunity(Direction::BuyPmSellK);
    let report = system.engine.execute(&opp).await.unwrap();
    assert_eq!(report.outcome, ExecutionOutcome::Hedged { contracts: 10 });

    // Exit values: YES bid 52 + NO at 100 - 49 = 103c against 95c paid.
    system.quotes.set(Venue::Polymarket, &opp.venue_a_market, Quote::new(dec!(52), dec!(53)));
    system.quotes.set(Venue::Kalshi, &opp.venue_b_market, Quote::new(dec!(48), dec!(49)));
    let pass = system.resolver.run_once().await;
    assert_eq!(pass.unwound, 1);

    let trade = system.ledger.get(&report.trade.trade_id).unwrap();
    assert_eq!(trade.status, TradeStatus::Exited);
    assert_eq!(trade.tier, Some(Tier::Tier2Exit));
    assert_eq!(trade.unwind_pnl_cents, Some(dec!(80)));

    let pass = system.reconciler.run_once().await.unwrap();
    assert_eq!(pass.settled, vec![trade.trade_id.clone()]);
    assert!(pass.drifts.is_empty());
    let trade = system.ledger.get(&trade.trade_id).unwrap();
    assert_eq!(trade.settlement_pnl, Some(dec!(0.80)));
}

// =============================================================================
// Reconciliation
// =============================================================================

#[tokio::test]
async fn test_reconciliation_is_idempotent() {
    let system = TestSystem::new(FeeConfig::default());
    let opp = create_opportunity(Direction::BuyPmSellK);
    system.engine.execute(&opp).await.unwrap();
    system.venue_b.settle(&opp.venue_b_market, MarketResult::No);

    let first = system.reconciler.run_once().await.unwrap();
    let after_first = system.ledger.snapshot();
    let second = system.reconciler.run_once().await.unwrap();
    let after_second = system.ledger.snapshot();

    assert_eq!(first.settled.len(), 1);
    assert!(second.settled.is_empty());
    assert_eq!(after_first, after_second);

    let verified = system.reconciler.verify().await;
    assert!(verified.is_clean(), "{verified:?}");
}

#[tokio::test]
async fn test_legacy_unsigned_loss_is_flagged_not_settled() {
    let system = TestSystem::new(FeeConfig::zero());
    let opp = create_opportunity(Direction::BuyPmSellK);
    let report = system.engine.execute(&opp).await.unwrap();

    // An older writer recorded only an unsigned loss and no exit prices.
    let mut legacy = system.ledger.get(&report.trade.trade_id).unwrap();
    legacy.unwind = Some(UnwindRecord {
        venue_a_contracts: 10,
        venue_b_contracts: 10,
        ..UnwindRecord::default()
    });
    legacy.unwind_loss_cents = Some(dec!(30));
    legacy.status = TradeStatus::Exited;
    legacy.tier = Some(Tier::Tier2Exit);
    let entry = LedgerEntry {
        seq: 1_000,
        written_at: Utc::now(),
        writer: Writer::Resolver,
        trade: legacy,
    };
    let path = system.ledger.path().to_path_buf();
    let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
    writeln!(file, "{}", serde_json::to_string(&entry).unwrap()).unwrap();
    drop(file);

    let system = system.restart();
    let pass = system.reconciler.run_once().await.unwrap();

    assert!(pass.settled.is_empty());
    assert_eq!(pass.flagged.len(), 1);
    assert_eq!(pass.flagged[0].kind, IntegrityKind::IncompleteUnwind);
    let trade = system.ledger.get(&report.trade.trade_id).unwrap();
    assert!(trade.settlement_pnl.is_none());
}

// =============================================================================
// Recovery
// =============================================================================

#[tokio::test]
async fn test_recovery_after_unconfirmed_hedge() {
    let system = TestSystem::new(FeeConfig::zero());
    system.venue_b.script([FillBehavior::FillThenError]);
    system.venue_b.set_lookups_failing(true);
    let opp = create_opportunity(Direction::BuyPmSellK);

    let report = system.engine.execute(&opp).await.unwrap();
    assert!(matches!(report.outcome, ExecutionOutcome::Unresolved { .. }));
    assert_eq!(report.trade.status, TradeStatus::PmFilled);

    // Process restarts with venue B reachable again.
    system.venue_b.set_lookups_failing(false);
    let system = system.restart();
    assert_eq!(system.ledger.executing().len(), 1);

    let recovery = Recovery::new(
        VenuePair::new(system.venue_a.clone(), system.venue_b.clone()),
        system.ledger.clone(),
        system.store.clone(),
    );
    let recovered = recovery.run().await.unwrap();

    assert_eq!(recovered.resolved, vec![(report.trade.trade_id.clone(), TradeStatus::Success)]);
    assert!(system.ledger.executing().is_empty());
    // Nothing was placed during recovery.
    assert_eq!(system.venue_a.place_calls(), 1);
    assert_eq!(system.venue_b.place_calls(), 1);
    // The recovered game is not traded again this session.
    let again = system.engine.execute(&opp).await.unwrap();
    assert_eq!(again.outcome, ExecutionOutcome::Skipped { reason: SkipReason::Duplicate });
}

// =============================================================================
// Ledger Durability
// =============================================================================

#[tokio::test]
async fn test_ledger_survives_torn_write() {
    let system = TestSystem::new(FeeConfig::zero());
    let opp = create_opportunity(Direction::BuyPmSellK);
    let report = system.engine.execute(&opp).await.unwrap();
    let before = system.ledger.snapshot();

    let path = system.ledger.path().to_path_buf();
    let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
    file.write_all(b"{\"seq\":77,\"written_at\":\"2026-").unwrap();
    drop(file);

    let system = system.restart();
    assert_eq!(system.ledger.snapshot(), before);
    let trade = system.ledger.get(&report.trade.trade_id).unwrap();
    assert_eq!(trade.status, TradeStatus::Success);
    assert_eq!(system.ledger.positions().len(), 1);
    assert_eq!(system.dir.path().join("trades.jsonl"), path);
}

#[tokio::test]
async fn test_ledger_refuses_invalid_write() {
    let system = TestSystem::new(FeeConfig::zero());
    let mut opp = create_opportunity(Direction::BuyPmSellK);
    opp.quoted_at = Utc::now() - chrono::Duration::seconds(60);
    // Stale opportunity, recorded and skipped.
    let report = system.engine.execute(&opp).await.unwrap();
    assert_eq!(report.outcome, ExecutionOutcome::Skipped { reason: SkipReason::StaleQuote });

    let mut attempt = report.trade.clone();
    attempt.trade_id = "manual-1".to_string();
    attempt.status = TradeStatus::Pending;
    attempt.settlement_pnl = None;
    attempt.settlement_source = None;
    attempt.skip_reason = None;
    attempt.contracts_filled = 3;
    attempt.venue_b_contracts_filled = 5;
    let result = system.ledger.insert_attempt(&attempt);

    assert!(matches!(result, Err(LedgerError::Invariant { .. })));
    assert!(system.ledger.get("manual-1").is_none());
}
