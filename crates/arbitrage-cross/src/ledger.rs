//! Append-only trade ledger.
//!
//! The ledger is the single source of truth for every trade. Each write
//! appends one complete trade version as a JSON line:
//!
//! ```text
//! {"seq":12,"written_at":"...","writer":"engine","trade":{...}}
//! ```
//!
//! A line is written with a single `write_all`, flushed and `sync_data`'d
//! before the in-memory view changes, so a crash leaves at most one torn
//! trailing line. Loading replays the file and keeps the latest version of
//! each trade; a torn trailing line is dropped with a warning.
//!
//! Writes go through typed methods, one per owning component:
//!
//! | method               | writer     | allowed phase            |
//! |----------------------|------------|--------------------------|
//! | `insert_attempt`     | engine     | new trade                |
//! | `update_execution`   | engine     | executing                |
//! | `record_unwind`      | resolver   | open                     |
//! | `record_settlement`  | reconciler | open                     |
//! | `apply_correction`   | reconciler | settled                  |
//!
//! Every write stamps a strictly increasing `updated_at`. Resolver and
//! reconciler writes name the version they were computed from and are
//! refused with [`LedgerError::Stale`] once another write has landed.

use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::trade::{Correction, InvariantViolation, LegId, Phase, Trade};

/// Errors from ledger operations.
#[derive(Error, Debug)]
pub enum LedgerError {
    /// IO error reading/writing the file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A line other than the last one could not be parsed.
    #[error("Corrupt ledger line {line}: {reason}")]
    Corrupt { line: usize, reason: String },

    /// The trade would violate a record invariant.
    #[error("Invariant violated for trade {trade_id}: {violation}")]
    Invariant {
        trade_id: String,
        violation: InvariantViolation,
    },

    /// The writer does not own the trade in its current phase.
    #[error("{writer} may not write trade {trade_id} in phase {phase:?}")]
    WrongPhase {
        writer: Writer,
        trade_id: String,
        phase: Phase,
    },

    #[error("Trade {0} already exists")]
    Duplicate(String),

    #[error("Trade {0} not found")]
    NotFound(String),

    /// The write was built from a version that is no longer the latest.
    #[error("Stale write to trade {trade_id}: based on {based_on}, latest is {latest}")]
    Stale {
        trade_id: String,
        based_on: DateTime<Utc>,
        latest: DateTime<Utc>,
    },
}

/// Component that wrote a ledger line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Writer {
    Engine,
    Resolver,
    Reconciler,
}

impl std::fmt::Display for Writer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Engine => "engine",
            Self::Resolver => "resolver",
            Self::Reconciler => "reconciler",
        };
        write!(f, "{s}")
    }
}

/// One persisted line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub seq: u64,
    pub written_at: DateTime<Utc>,
    pub writer: Writer,
    pub trade: Trade,
}

/// Net exposure derived from unsettled trades.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Position {
    pub game_id: String,
    pub team: String,
    /// Venue A contracts still held.
    pub venue_a_contracts: u32,
    /// Venue B contracts still held.
    pub venue_b_contracts: u32,
    /// Trades contributing to the position.
    pub trade_ids: Vec<String>,
}

struct LedgerInner {
    file: File,
    trades: BTreeMap<String, Trade>,
    next_seq: u64,
}

/// Durable, append-only trade ledger.
pub struct TradeLedger {
    path: PathBuf,
    inner: Mutex<LedgerInner>,
}

impl std::fmt::Debug for TradeLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TradeLedger")
            .field("path", &self.path)
            .field("trades", &self.inner.lock().trades.len())
            .finish()
    }
}

impl TradeLedger {
    /// Opens (or creates) the ledger at `path` and replays it.
    ///
    /// Creates parent directories if they don't exist.
    ///
    /// # Errors
    /// Returns an error if the file cannot be opened or a non-trailing line is corrupt.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, LedgerError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent)?;
            }
        }

        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&path)?;

        let mut raw = Vec::new();
        file.read_to_end(&mut raw)?;
        let (trades, next_seq, valid_len) = replay(&raw)?;

        if valid_len < raw.len() {
            warn!(
                path = %path.display(),
                dropped_bytes = raw.len() - valid_len,
                "Dropping torn trailing ledger line"
            );
            file.set_len(valid_len as u64)?;
            file.sync_data()?;
        }

        info!(
            path = %path.display(),
            trades = trades.len(),
            next_seq = next_seq,
            "Trade ledger loaded"
        );

        Ok(Self {
            path,
            inner: Mutex::new(LedgerInner {
                file,
                trades,
                next_seq,
            }),
        })
    }

    /// Returns the ledger path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    // =========================================================================
    // Writers
    // =========================================================================

    /// Records a new `PENDING` attempt.
    ///
    /// # Errors
    /// Fails if the trade id exists, the trade is not executing, or an invariant breaks.
    pub fn insert_attempt(&self, trade: &Trade) -> Result<(), LedgerError> {
        let mut inner = self.inner.lock();
        if inner.trades.contains_key(&trade.trade_id) {
            return Err(LedgerError::Duplicate(trade.trade_id.clone()));
        }
        if trade.phase() != Phase::Executing {
            return Err(LedgerError::WrongPhase {
                writer: Writer::Engine,
                trade_id: trade.trade_id.clone(),
                phase: trade.phase(),
            });
        }
        Self::append(&mut inner, Writer::Engine, trade.clone())
    }

    /// Records execution progress for a trade the engine still owns.
    ///
    /// # Errors
    /// Fails if the stored trade has left the executing phase or an invariant breaks.
    pub fn update_execution(&self, trade: &Trade) -> Result<(), LedgerError> {
        let mut inner = self.inner.lock();
        Self::require_phase(&inner, &trade.trade_id, Writer::Engine, &[Phase::Executing])?;
        Self::append(&mut inner, Writer::Engine, trade.clone())
    }

    /// Records unwind progress on an open trade.
    ///
    /// Only unwind-owned fields (unwind record, signed unwind P&L, status, tier)
    /// are taken from `trade`; everything else comes from the stored version.
    /// `trade.updated_at` must still match the stored version.
    ///
    /// # Errors
    /// Fails if the trade is not open, `trade` is stale, or an invariant breaks.
    pub fn record_unwind(&self, trade: &Trade) -> Result<Trade, LedgerError> {
        let mut inner = self.inner.lock();
        let mut stored =
            Self::require_phase(&inner, &trade.trade_id, Writer::Resolver, &[Phase::Open])?;
        Self::require_current(&stored, trade.updated_at)?;
        stored.unwind = trade.unwind.clone();
        stored.unwind_pnl_cents = trade.unwind_pnl_cents;
        stored.status = trade.status;
        stored.tier = trade.tier;
        stored.last_error = trade.last_error.clone();
        Self::append(&mut inner, Writer::Resolver, stored.clone())?;
        Ok(stored)
    }

    /// Assigns the final P&L to an open trade.
    ///
    /// `based_on` is the `updated_at` of the version the P&L was computed from.
    ///
    /// # Errors
    /// Fails if the trade is executing, already settled, or changed since `based_on`.
    pub fn record_settlement(
        &self,
        trade_id: &str,
        based_on: DateTime<Utc>,
        pnl: Decimal,
        source: &str,
        result: Option<String>,
    ) -> Result<Trade, LedgerError> {
        let mut inner = self.inner.lock();
        let mut stored = Self::require_phase(&inner, trade_id, Writer::Reconciler, &[Phase::Open])?;
        Self::require_current(&stored, based_on)?;
        stored.settlement_pnl = Some(pnl);
        stored.settlement_source = Some(source.to_string());
        stored.settlement_result = result;
        stored.settled_at = Some(Utc::now());
        Self::append(&mut inner, Writer::Reconciler, stored.clone())?;
        Ok(stored)
    }

    /// Replaces an assigned P&L, keeping an audit entry. Never called implicitly.
    ///
    /// # Errors
    /// Fails if the trade is not settled.
    pub fn apply_correction(
        &self,
        trade_id: &str,
        corrected: Decimal,
        reason: &str,
    ) -> Result<Trade, LedgerError> {
        let mut inner = self.inner.lock();
        let mut stored =
            Self::require_phase(&inner, trade_id, Writer::Reconciler, &[Phase::Settled])?;
        let previous = stored.settlement_pnl.unwrap_or(Decimal::ZERO);
        stored.corrections.push(Correction {
            at: Utc::now(),
            previous,
            corrected,
            reason: reason.to_string(),
        });
        stored.settlement_pnl = Some(corrected);
        Self::append(&mut inner, Writer::Reconciler, stored.clone())?;
        Ok(stored)
    }

    fn require_phase(
        inner: &LedgerInner,
        trade_id: &str,
        writer: Writer,
        allowed: &[Phase],
    ) -> Result<Trade, LedgerError> {
        let stored = inner
            .trades
            .get(trade_id)
            .ok_or_else(|| LedgerError::NotFound(trade_id.to_string()))?;
        let phase = stored.phase();
        if !allowed.contains(&phase) {
            return Err(LedgerError::WrongPhase {
                writer,
                trade_id: trade_id.to_string(),
                phase,
            });
        }
        Ok(stored.clone())
    }

    fn require_current(stored: &Trade, based_on: DateTime<Utc>) -> Result<(), LedgerError> {
        if stored.updated_at != based_on {
            return Err(LedgerError::Stale {
                trade_id: stored.trade_id.clone(),
                based_on,
                latest: stored.updated_at,
            });
        }
        Ok(())
    }

    fn append(inner: &mut LedgerInner, writer: Writer, mut trade: Trade) -> Result<(), LedgerError> {
        trade
            .validate()
            .map_err(|violation| LedgerError::Invariant {
                trade_id: trade.trade_id.clone(),
                violation,
            })?;
        // Versions must be distinct for the staleness check, even within one clock tick.
        let now = Utc::now();
        trade.updated_at = match inner.trades.get(&trade.trade_id) {
            Some(prev) if now <= prev.updated_at => prev.updated_at + chrono::Duration::nanoseconds(1),
            _ => now,
        };

        let entry = LedgerEntry {
            seq: inner.next_seq,
            written_at: trade.updated_at,
            writer,
            trade,
        };
        let mut line = serde_json::to_vec(&entry)?;
        line.push(b'\n');

        inner.file.write_all(&line)?;
        inner.file.flush()?;
        inner.file.sync_data()?;

        debug!(
            seq = entry.seq,
            writer = %writer,
            trade_id = %entry.trade.trade_id,
            status = %entry.trade.status,
            "Ledger write"
        );

        inner.next_seq += 1;
        inner
            .trades
            .insert(entry.trade.trade_id.clone(), entry.trade);
        Ok(())
    }

    // =========================================================================
    // Readers
    // =========================================================================

    /// Returns the latest version of a trade.
    #[must_use]
    pub fn get(&self, trade_id: &str) -> Option<Trade> {
        self.inner.lock().trades.get(trade_id).cloned()
    }

    /// Returns a copy of every trade, ordered by trade id.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Trade> {
        self.inner.lock().trades.values().cloned().collect()
    }

    /// Returns every trade for a game.
    #[must_use]
    pub fn trades_for_game(&self, game_id: &str) -> Vec<Trade> {
        self.inner
            .lock()
            .trades
            .values()
            .filter(|t| t.game_id == game_id)
            .cloned()
            .collect()
    }

    /// Returns trades the engine still owns.
    #[must_use]
    pub fn executing(&self) -> Vec<Trade> {
        self.trades_in_phase(Phase::Executing)
    }

    /// Returns trades awaiting resolution or settlement.
    #[must_use]
    pub fn open_trades(&self) -> Vec<Trade> {
        self.trades_in_phase(Phase::Open)
    }

    fn trades_in_phase(&self, phase: Phase) -> Vec<Trade> {
        self.inner
            .lock()
            .trades
            .values()
            .filter(|t| t.phase() == phase)
            .cloned()
            .collect()
    }

    /// Returns net exposure per (game, team) from unsettled trades.
    #[must_use]
    pub fn positions(&self) -> Vec<Position> {
        let inner = self.inner.lock();
        let mut positions: BTreeMap<(String, String), Position> = BTreeMap::new();
        for trade in inner.trades.values() {
            if trade.phase() == Phase::Settled {
                continue;
            }
            let a = trade.held(LegId::A);
            let b = trade.held(LegId::B);
            if a == 0 && b == 0 {
                continue;
            }
            let entry = positions
                .entry((trade.game_id.clone(), trade.team.clone()))
                .or_insert_with(|| Position {
                    game_id: trade.game_id.clone(),
                    team: trade.team.clone(),
                    venue_a_contracts: 0,
                    venue_b_contracts: 0,
                    trade_ids: Vec::new(),
                });
            entry.venue_a_contracts += a;
            entry.venue_b_contracts += b;
            entry.trade_ids.push(trade.trade_id.clone());
        }
        positions.into_values().collect()
    }

    /// Returns venue A contracts held for a (game, team).
    #[must_use]
    pub fn position(&self, game_id: &str, team: &str) -> u32 {
        self.inner
            .lock()
            .trades
            .values()
            .filter(|t| t.game_id == game_id && t.team == team && t.phase() != Phase::Settled)
            .map(|t| t.held(LegId::A))
            .sum()
    }

    /// Number of trades in the ledger.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().trades.len()
    }

    /// Returns true if the ledger holds no trades.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Rewrites the file with only the latest version of each trade.
    ///
    /// Writes to a temporary file and renames it over the ledger.
    ///
    /// # Errors
    /// Returns an error if the temporary file cannot be written or renamed.
    pub fn compact(&self) -> Result<usize, LedgerError> {
        let mut inner = self.inner.lock();
        let tmp_path = self.path.with_extension("jsonl.tmp");
        {
            let mut tmp = File::create(&tmp_path)?;
            let mut buf = Vec::new();
            for (seq, trade) in inner.trades.values().enumerate() {
                let entry = LedgerEntry {
                    seq: seq as u64,
                    written_at: trade.updated_at,
                    writer: writer_for(trade),
                    trade: trade.clone(),
                };
                serde_json::to_writer(&mut buf, &entry)?;
                buf.push(b'\n');
            }
            tmp.write_all(&buf)?;
            tmp.sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;

        inner.file = OpenOptions::new().read(true).append(true).open(&self.path)?;
        inner.next_seq = inner.trades.len() as u64;
        info!(
            path = %self.path.display(),
            trades = inner.trades.len(),
            "Trade ledger compacted"
        );
        Ok(inner.trades.len())
    }
}

fn writer_for(trade: &Trade) -> Writer {
    match trade.phase() {
        Phase::Executing => Writer::Engine,
        Phase::Open if trade.unwind.is_some() => Writer::Resolver,
        Phase::Open => Writer::Engine,
        Phase::Settled => Writer::Reconciler,
    }
}

/// Replays raw ledger bytes into the latest version per trade.
///
/// Returns the trades, the next sequence number and the length of the valid prefix.
fn replay(raw: &[u8]) -> Result<(BTreeMap<String, Trade>, u64, usize), LedgerError> {
    let mut trades = BTreeMap::new();
    let mut next_seq = 0;
    let mut offset = 0;
    let mut line_no = 0;

    while offset < raw.len() {
        line_no += 1;
        let rest = &raw[offset..];
        let (line, consumed, terminated) = match rest.iter().position(|b| *b == b'\n') {
            Some(pos) => (&rest[..pos], pos + 1, true),
            None => (rest, rest.len(), false),
        };
        let is_last = offset + consumed >= raw.len();

        if line.iter().all(u8::is_ascii_whitespace) {
            offset += consumed;
            continue;
        }

        match (serde_json::from_slice::<LedgerEntry>(line), terminated) {
            (Ok(entry), true) => {
                next_seq = next_seq.max(entry.seq + 1);
                trades.insert(entry.trade.trade_id.clone(), entry.trade);
            }
            (Err(e), true) if !is_last => {
                return Err(LedgerError::Corrupt {
                    line: line_no,
                    reason: e.to_string(),
                });
            }
            // Unterminated or unparseable final line: a write that never completed.
            _ => return Ok((trades, next_seq, offset)),
        }
        offset += consumed;
    }

    Ok((trades, next_seq, offset))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trade::tests::create_test_trade;
    use crate::trade::{Tier, TradeStatus, UnwindRecord};
    use rust_decimal_macros::dec;
    use tempfile::TempDir;

    fn create_test_ledger() -> (TempDir, TradeLedger) {
        let dir = TempDir::new().unwrap();
        let ledger = TradeLedger::open(dir.path().join("ledger/trades.jsonl")).unwrap();
        (dir, ledger)
    }

    fn hedged(mut trade: Trade) -> Trade {
        trade.contracts_filled = 10;
        trade.venue_b_contracts_filled = 10;
        trade.venue_a_fill_price = Some(dec!(45));
        trade.venue_b_fill_price = Some(dec!(50));
        trade.venue_a_ticket_ref = Some("pm-1".into());
        trade.venue_b_ticket_ref = Some("k-1".into());
        trade.classify_fills();
        trade
    }

    // ==================== Roundtrip Tests ====================

    #[test]
    fn test_reload_keeps_latest_version() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("trades.jsonl");
        let trade = create_test_trade();
        {
            let ledger = TradeLedger::open(&path).unwrap();
            ledger.insert_attempt(&trade).unwrap();
            ledger.update_execution(&hedged(trade.clone())).unwrap();
        }

        let reloaded = TradeLedger::open(&path).unwrap();
        let stored = reloaded.get(&trade.trade_id).unwrap();
        assert_eq!(stored.status, TradeStatus::Success);
        assert_eq!(stored.tier, Some(Tier::Tier1Hedge));
        assert_eq!(reloaded.len(), 1);

        // Sequence continues after reload.
        let other = create_test_trade();
        reloaded.insert_attempt(&other).unwrap();
        let raw = std::fs::read_to_string(&path).unwrap();
        let last: LedgerEntry = serde_json::from_str(raw.lines().last().unwrap()).unwrap();
        assert_eq!(last.seq, 2);
    }

    #[test]
    fn test_torn_trailing_line_is_dropped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("trades.jsonl");
        let trade = create_test_trade();
        {
            let ledger = TradeLedger::open(&path).unwrap();
            ledger.insert_attempt(&trade).unwrap();
        }
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"{\"seq\":1,\"written_at\":\"2026-").unwrap();
        drop(file);

        let ledger = TradeLedger::open(&path).unwrap();
        assert_eq!(ledger.len(), 1);
        ledger.update_execution(&hedged(trade.clone())).unwrap();

        let reloaded = TradeLedger::open(&path).unwrap();
        assert_eq!(reloaded.get(&trade.trade_id).unwrap().status, TradeStatus::Success);
    }

    #[test]
    fn test_corrupt_middle_line_is_an_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("trades.jsonl");
        {
            let ledger = TradeLedger::open(&path).unwrap();
            ledger.insert_attempt(&create_test_trade()).unwrap();
        }
        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"not json\n").unwrap();
        drop(file);
        {
            let raw = std::fs::read_to_string(&path).unwrap();
            let first = raw.lines().next().unwrap().to_string();
            std::fs::write(&path, format!("{raw}{first}\n")).unwrap();
        }

        assert!(matches!(
            TradeLedger::open(&path),
            Err(LedgerError::Corrupt { line: 2, .. })
        ));
    }

    // ==================== Ownership Tests ====================

    #[test]
    fn test_rejects_invariant_violation() {
        let (_dir, ledger) = create_test_ledger();
        let mut trade = create_test_trade();
        ledger.insert_attempt(&trade).unwrap();

        trade.contracts_filled = trade.contracts_intended + 1;
        let err = ledger.update_execution(&trade).unwrap_err();
        assert!(matches!(err, LedgerError::Invariant { .. }));
        // Nothing changed in memory.
        assert_eq!(ledger.get(&trade.trade_id).unwrap().contracts_filled, 0);
    }

    #[test]
    fn test_engine_cannot_write_open_trade() {
        let (_dir, ledger) = create_test_ledger();
        let trade = create_test_trade();
        ledger.insert_attempt(&trade).unwrap();
        let trade = hedged(trade);
        ledger.update_execution(&trade).unwrap();

        let err = ledger.update_execution(&trade).unwrap_err();
        assert!(matches!(err, LedgerError::WrongPhase { writer: Writer::Engine, .. }));
    }

    #[test]
    fn test_resolver_cannot_write_executing_trade() {
        let (_dir, ledger) = create_test_ledger();
        let trade = create_test_trade();
        ledger.insert_attempt(&trade).unwrap();
        let err = ledger.record_unwind(&trade).unwrap_err();
        assert!(matches!(err, LedgerError::WrongPhase { writer: Writer::Resolver, .. }));
    }

    #[test]
    fn test_settlement_then_correction() {
        let (_dir, ledger) = create_test_ledger();
        let trade = create_test_trade();
        ledger.insert_attempt(&trade).unwrap();
        ledger.update_execution(&hedged(trade.clone())).unwrap();

        // Corrections require a settled trade.
        assert!(ledger.apply_correction(&trade.trade_id, dec!(1), "drift").is_err());

        let based_on = ledger.get(&trade.trade_id).unwrap().updated_at;
        ledger
            .record_settlement(&trade.trade_id, based_on, dec!(0.32), "LOCKED_SPREAD", Some("yes".into()))
            .unwrap();
        let based_on = ledger.get(&trade.trade_id).unwrap().updated_at;
        assert!(matches!(
            ledger.record_settlement(&trade.trade_id, based_on, dec!(0.50), "LOCKED_SPREAD", None),
            Err(LedgerError::WrongPhase { .. })
        ));

        let corrected = ledger
            .apply_correction(&trade.trade_id, dec!(0.30), "venue drift")
            .unwrap();
        assert_eq!(corrected.settlement_pnl, Some(dec!(0.30)));
        assert_eq!(corrected.corrections.len(), 1);
        assert_eq!(corrected.corrections[0].previous, dec!(0.32));
    }

    #[test]
    fn test_record_unwind_only_touches_unwind_fields() {
        let (_dir, ledger) = create_test_ledger();
        let trade = create_test_trade();
        ledger.insert_attempt(&trade).unwrap();
        let trade = hedged(trade);
        ledger.update_execution(&trade).unwrap();

        let mut update = ledger.get(&trade.trade_id).unwrap();
        let mut unwind = UnwindRecord::default();
        unwind.add_exit(LegId::A, 10, dec!(48), Decimal::ZERO);
        unwind.add_exit(LegId::B, 10, dec!(53), dec!(0.17));
        update.unwind = Some(unwind);
        update.unwind_pnl_cents = Some(dec!(43));
        update.status = TradeStatus::Exited;
        update.tier = Some(Tier::Tier2Exit);
        update.venue_a_fill_price = Some(dec!(1));

        let stored = ledger.record_unwind(&update).unwrap();
        assert_eq!(stored.status, TradeStatus::Exited);
        assert_eq!(stored.venue_a_fill_price, Some(dec!(45)));
    }

    #[test]
    fn test_stale_unwind_is_rejected() {
        let (_dir, ledger) = create_test_ledger();
        let trade = create_test_trade();
        ledger.insert_attempt(&trade).unwrap();
        ledger.update_execution(&hedged(trade.clone())).unwrap();
        let snapshot = ledger.get(&trade.trade_id).unwrap();

        let mut first = snapshot.clone();
        let mut unwind = UnwindRecord::default();
        unwind.add_exit(LegId::A, 3, dec!(50), Decimal::ZERO);
        unwind.add_exit(LegId::B, 3, dec!(51), Decimal::ZERO);
        unwind.ticket_refs = vec!["pm-u1".into(), "k-u1".into()];
        first.unwind = Some(unwind);
        first.unwind_pnl_cents = Some(dec!(18));
        ledger.record_unwind(&first).unwrap();

        // A second unwind built from the same snapshot would drop the first one.
        let mut second = snapshot;
        let mut unwind = UnwindRecord::default();
        unwind.add_exit(LegId::A, 10, dec!(50), Decimal::ZERO);
        unwind.add_exit(LegId::B, 10, dec!(51), Decimal::ZERO);
        second.unwind = Some(unwind);
        second.unwind_pnl_cents = Some(dec!(60));
        second.status = TradeStatus::Exited;
        second.tier = Some(Tier::Tier2Exit);
        let err = ledger.record_unwind(&second).unwrap_err();
        assert!(matches!(err, LedgerError::Stale { .. }));

        let stored = ledger.get(&trade.trade_id).unwrap();
        assert_eq!(stored.status, TradeStatus::Success);
        assert_eq!(stored.unwind_pnl_cents, Some(dec!(18)));
        assert_eq!(stored.unwind.unwrap().ticket_refs.len(), 2);
    }

    #[test]
    fn test_stale_settlement_is_rejected() {
        let (_dir, ledger) = create_test_ledger();
        let trade = create_test_trade();
        ledger.insert_attempt(&trade).unwrap();
        ledger.update_execution(&hedged(trade.clone())).unwrap();
        let snapshot = ledger.get(&trade.trade_id).unwrap();

        let mut update = snapshot.clone();
        let mut unwind = UnwindRecord::default();
        unwind.add_exit(LegId::A, 10, dec!(50), Decimal::ZERO);
        unwind.add_exit(LegId::B, 10, dec!(51), Decimal::ZERO);
        update.unwind = Some(unwind);
        update.unwind_pnl_cents = Some(dec!(60));
        update.status = TradeStatus::Exited;
        update.tier = Some(Tier::Tier2Exit);
        ledger.record_unwind(&update).unwrap();

        // Settlement priced from the pre-unwind version.
        let err = ledger
            .record_settlement(&trade.trade_id, snapshot.updated_at, dec!(0.32), "LOCKED_SPREAD", None)
            .unwrap_err();
        assert!(matches!(err, LedgerError::Stale { .. }));
        assert!(ledger.get(&trade.trade_id).unwrap().settlement_pnl.is_none());
    }

    #[test]
    fn test_versions_are_strictly_increasing() {
        let (_dir, ledger) = create_test_ledger();
        let trade = create_test_trade();
        ledger.insert_attempt(&trade).unwrap();
        let first = ledger.get(&trade.trade_id).unwrap().updated_at;
        ledger.update_execution(&trade).unwrap();
        let second = ledger.get(&trade.trade_id).unwrap().updated_at;
        assert!(second > first);
    }

    // ==================== Position Tests ====================

    #[test]
    fn test_positions_exclude_settled_and_unwound() {
        let (_dir, ledger) = create_test_ledger();
        let first = create_test_trade();
        ledger.insert_attempt(&first).unwrap();
        ledger.update_execution(&hedged(first.clone())).unwrap();

        let mut skipped = create_test_trade();
        ledger.insert_attempt(&skipped).unwrap();
        skipped.mark_skipped(crate::trade::SkipReason::Duplicate, "dup");
        ledger.update_execution(&skipped).unwrap();

        assert_eq!(ledger.position("LAL-BOS-20261019", "LAL"), 10);
        let positions = ledger.positions();
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].venue_b_contracts, 10);

        let based_on = ledger.get(&first.trade_id).unwrap().updated_at;
        ledger
            .record_settlement(&first.trade_id, based_on, dec!(0.5), "LOCKED_SPREAD", None)
            .unwrap();
        assert_eq!(ledger.position("LAL-BOS-20261019", "LAL"), 0);
        assert!(ledger.positions().is_empty());
    }

    // ==================== Compaction Tests ====================

    #[test]
    fn test_compact_keeps_latest() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("trades.jsonl");
        let ledger = TradeLedger::open(&path).unwrap();
        let trade = create_test_trade();
        ledger.insert_attempt(&trade).unwrap();
        ledger.update_execution(&hedged(trade.clone())).unwrap();

        assert_eq!(ledger.compact().unwrap(), 1);
        let raw = std::fs::read_to_string(&path).unwrap();
        assert_eq!(raw.lines().count(), 1);

        let based_on = ledger.get(&trade.trade_id).unwrap().updated_at;
        ledger
            .record_settlement(&trade.trade_id, based_on, dec!(0.5), "LOCKED_SPREAD", None)
            .unwrap();
        let reloaded = TradeLedger::open(&path).unwrap();
        assert_eq!(reloaded.get(&trade.trade_id).unwrap().settlement_pnl, Some(dec!(0.5)));
    }
}
