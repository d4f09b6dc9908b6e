//! Run records and global rankings.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cell::RefCell;
use std::cmp::Reverse;
use std::collections::{BTreeSet, HashMap};
use std::convert::Infallible;
use std::rc::Rc;

use crate::constants::{
    DEFAULT_THEME, FINAL_LEVEL, LEADERBOARD_MAX_LIMIT, MAX_HANDLE_CHARS, MAX_OUTCOME_CHARS,
    MAX_THEME_CHARS, SOLO_CLAN,
};
use crate::postmortem::PostMortemReport;
use crate::session::{Outcome, Session};

pub const NOTICE_MISSING_HANDLE: &str = "Add a Player Handle to submit this run to the leaderboard.";
pub const NOTICE_SUBMITTED: &str = "Run submitted to global rankings.";
pub const NOTICE_SAVE_FAILED: &str = "Could not save run to the database.";

/// One completed run as persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub player_handle: String,
    pub clan_name: Option<String>,
    pub outcome: String,
    pub theme: String,
    pub valuation_usd: i64,
    pub hp_remaining: i32,
    pub level_reached: u8,
    pub post_mortem: Value,
    pub transcript: Value,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerRow {
    pub player_handle: String,
    pub clan_name: String,
    pub run_count: u32,
    pub total_valuation_usd: i64,
    pub best_run_valuation_usd: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClanRow {
    pub clan_name: String,
    pub member_count: u32,
    pub run_count: u32,
    pub total_valuation_usd: i64,
    pub best_run_valuation_usd: i64,
}

/// Persistence for players, clans and runs.
/// Platform-specific implementations should provide this
pub trait RunStore {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Insert the clan if new and return its id.
    ///
    /// # Errors
    ///
    /// Returns an error if the store rejects the write.
    fn upsert_clan(&self, name: &str) -> Result<u64, Self::Error>;

    /// Insert or update a player, moving them to `clan_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store rejects the write.
    fn upsert_player(&self, handle: &str, clan_id: Option<u64>) -> Result<u64, Self::Error>;

    /// Append a run for an existing player and return the run id.
    ///
    /// # Errors
    ///
    /// Returns an error if the store rejects the write.
    fn insert_run(&self, player_id: u64, record: &RunRecord) -> Result<u64, Self::Error>;

    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn player_leaderboard(&self, limit: usize) -> Result<Vec<PlayerRow>, Self::Error>;

    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn clan_leaderboard(&self, limit: usize) -> Result<Vec<ClanRow>, Self::Error>;
}

/// Clamp a requested row count into `1..=100`.
#[must_use]
pub fn clamp_limit(limit: usize) -> usize {
    limit.clamp(1, LEADERBOARD_MAX_LIMIT)
}

/// Collapse whitespace and cap at `max_chars`.
#[must_use]
pub fn clean_text(value: &str, max_chars: usize) -> String {
    value
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .chars()
        .take(max_chars)
        .collect::<String>()
        .trim_end()
        .to_string()
}

impl RunRecord {
    /// Build the record for a finished session.
    #[must_use]
    pub fn from_session(session: &Session, report: Option<&PostMortemReport>) -> Self {
        let outcome = session.terminal().outcome();
        let level_reached = if outcome == Some(Outcome::Victory) {
            FINAL_LEVEL
        } else {
            session.level()
        };
        let valuation_usd = if outcome == Some(Outcome::Victory) {
            session.final_valuation_usd().max(0)
        } else {
            0
        };
        let clan = clean_text(session.clan_name(), MAX_HANDLE_CHARS);
        Self {
            player_handle: clean_text(session.player_handle(), MAX_HANDLE_CHARS),
            clan_name: (!clan.is_empty()).then_some(clan),
            outcome: outcome.map_or("unknown", Outcome::as_str).to_string(),
            theme: session.theme().to_string(),
            valuation_usd,
            hp_remaining: session.health(),
            level_reached,
            post_mortem: report
                .and_then(|r| serde_json::to_value(r).ok())
                .unwrap_or_else(|| Value::Object(serde_json::Map::new())),
            transcript: serde_json::to_value(session.transcript())
                .unwrap_or_else(|_| Value::Array(Vec::new())),
        }
    }

    /// Apply the storage limits to every text column.
    #[must_use]
    pub fn sanitized(mut self) -> Self {
        self.player_handle = clean_text(&self.player_handle, MAX_HANDLE_CHARS);
        self.clan_name = self
            .clan_name
            .map(|c| clean_text(&c, MAX_HANDLE_CHARS))
            .filter(|c| !c.is_empty());
        self.outcome = match clean_text(&self.outcome, MAX_OUTCOME_CHARS) {
            o if o.is_empty() => "unknown".to_string(),
            o => o,
        };
        self.theme = match clean_text(&self.theme, MAX_THEME_CHARS) {
            t if t.is_empty() => DEFAULT_THEME.to_string(),
            t => t,
        };
        self.valuation_usd = self.valuation_usd.max(0);
        self
    }
}

/// Persist a run. Returns the run id, or `None` when there is no handle.
///
/// # Errors
///
/// Propagates the store error.
pub fn save_run<S: RunStore>(store: &S, record: RunRecord) -> Result<Option<u64>, S::Error> {
    let record = record.sanitized();
    if record.player_handle.is_empty() {
        return Ok(None);
    }
    let clan_id = record
        .clan_name
        .as_deref()
        .map(|name| store.upsert_clan(name))
        .transpose()?;
    let player_id = store.upsert_player(&record.player_handle, clan_id)?;
    store.insert_run(player_id, &record).map(Some)
}

/// Submit a finished session once. Returns the notice to show, if any.
pub fn submit_session<S: RunStore>(store: &S, session: &mut Session) -> Option<&'static str> {
    if session.result_persisted() || !session.is_terminal() {
        return None;
    }
    if clean_text(session.player_handle(), MAX_HANDLE_CHARS).is_empty() {
        return Some(NOTICE_MISSING_HANDLE);
    }
    let outcome = session.terminal().outcome()?;
    let record = RunRecord::from_session(session, session.cached_report(outcome));
    match save_run(store, record) {
        Ok(Some(run_id)) => {
            log::info!("Run {run_id} saved for {}", session.player_handle());
            session.mark_result_persisted();
            Some(NOTICE_SUBMITTED)
        }
        Ok(None) => Some(NOTICE_MISSING_HANDLE),
        Err(err) => {
            log::warn!("Run save failed: {err}");
            Some(NOTICE_SAVE_FAILED)
        }
    }
}

#[derive(Debug, Clone)]
struct PlayerEntry {
    handle: String,
    clan_id: Option<u64>,
}

#[derive(Debug, Default)]
struct Tables {
    clans: Vec<String>,
    players: Vec<PlayerEntry>,
    runs: Vec<(u64, RunRecord)>,
}

/// In-process store applying the leaderboard ranking rules.
#[derive(Debug, Clone, Default)]
pub struct MemoryRunStore {
    tables: Rc<RefCell<Tables>>,
}

impl MemoryRunStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn run_count(&self) -> usize {
        self.tables.borrow().runs.len()
    }

    #[must_use]
    pub fn runs(&self) -> Vec<RunRecord> {
        self.tables
            .borrow()
            .runs
            .iter()
            .map(|(_, record)| record.clone())
            .collect()
    }
}

fn id_of(index: usize) -> u64 {
    u64::try_from(index).unwrap_or(u64::MAX).saturating_add(1)
}

fn slot(id: u64) -> Option<usize> {
    usize::try_from(id.checked_sub(1)?).ok()
}

fn count(n: usize) -> u32 {
    u32::try_from(n).unwrap_or(u32::MAX)
}

impl RunStore for MemoryRunStore {
    type Error = Infallible;

    fn upsert_clan(&self, name: &str) -> Result<u64, Self::Error> {
        let mut tables = self.tables.borrow_mut();
        if let Some(idx) = tables.clans.iter().position(|c| c == name) {
            return Ok(id_of(idx));
        }
        tables.clans.push(name.to_string());
        Ok(id_of(tables.clans.len() - 1))
    }

    fn upsert_player(&self, handle: &str, clan_id: Option<u64>) -> Result<u64, Self::Error> {
        let mut tables = self.tables.borrow_mut();
        if let Some(idx) = tables.players.iter().position(|p| p.handle == handle) {
            tables.players[idx].clan_id = clan_id;
            return Ok(id_of(idx));
        }
        tables.players.push(PlayerEntry {
            handle: handle.to_string(),
            clan_id,
        });
        Ok(id_of(tables.players.len() - 1))
    }

    fn insert_run(&self, player_id: u64, record: &RunRecord) -> Result<u64, Self::Error> {
        let mut tables = self.tables.borrow_mut();
        tables.runs.push((player_id, record.clone()));
        Ok(id_of(tables.runs.len() - 1))
    }

    fn player_leaderboard(&self, limit: usize) -> Result<Vec<PlayerRow>, Self::Error> {
        let tables = self.tables.borrow();
        let mut rows: HashMap<u64, PlayerRow> = HashMap::new();
        for (player_id, run) in &tables.runs {
            let Some(player) = slot(*player_id).and_then(|idx| tables.players.get(idx)) else {
                continue;
            };
            let row = rows.entry(*player_id).or_insert_with(|| PlayerRow {
                player_handle: player.handle.clone(),
                clan_name: clan_label(&tables, player.clan_id),
                run_count: 0,
                total_valuation_usd: 0,
                best_run_valuation_usd: 0,
            });
            row.run_count += 1;
            row.total_valuation_usd = row.total_valuation_usd.saturating_add(run.valuation_usd);
            row.best_run_valuation_usd = row.best_run_valuation_usd.max(run.valuation_usd);
        }

        let mut rows: Vec<PlayerRow> = rows.into_values().collect();
        rows.sort_by(|a, b| {
            (
                Reverse(a.total_valuation_usd),
                Reverse(a.best_run_valuation_usd),
                Reverse(a.run_count),
            )
                .cmp(&(
                    Reverse(b.total_valuation_usd),
                    Reverse(b.best_run_valuation_usd),
                    Reverse(b.run_count),
                ))
                .then_with(|| a.player_handle.cmp(&b.player_handle))
        });
        rows.truncate(clamp_limit(limit));
        Ok(rows)
    }

    fn clan_leaderboard(&self, limit: usize) -> Result<Vec<ClanRow>, Self::Error> {
        let tables = self.tables.borrow();
        // Grouped by clan id; clanless players share the `None` group.
        let mut rows: HashMap<Option<u64>, (BTreeSet<u64>, ClanRow)> = HashMap::new();
        for (player_id, run) in &tables.runs {
            let Some(player) = slot(*player_id).and_then(|idx| tables.players.get(idx)) else {
                continue;
            };
            let (members, row) = rows.entry(player.clan_id).or_insert_with(|| {
                (
                    BTreeSet::new(),
                    ClanRow {
                        clan_name: clan_label(&tables, player.clan_id),
                        member_count: 0,
                        run_count: 0,
                        total_valuation_usd: 0,
                        best_run_valuation_usd: 0,
                    },
                )
            });
            members.insert(*player_id);
            row.member_count = count(members.len());
            row.run_count += 1;
            row.total_valuation_usd = row.total_valuation_usd.saturating_add(run.valuation_usd);
            row.best_run_valuation_usd = row.best_run_valuation_usd.max(run.valuation_usd);
        }

        let mut rows: Vec<(Option<u64>, ClanRow)> = rows
            .into_iter()
            .map(|(clan_id, (_, row))| (clan_id, row))
            .collect();
        rows.sort_by(|(a_id, a), (b_id, b)| {
            (
                Reverse(a.total_valuation_usd),
                Reverse(a.best_run_valuation_usd),
                Reverse(a.member_count),
            )
                .cmp(&(
                    Reverse(b.total_valuation_usd),
                    Reverse(b.best_run_valuation_usd),
                    Reverse(b.member_count),
                ))
                .then_with(|| a.clan_name.cmp(&b.clan_name))
                .then_with(|| a_id.cmp(b_id))
        });
        rows.truncate(clamp_limit(limit));
        Ok(rows.into_iter().map(|(_, row)| row).collect())
    }
}

fn clan_label(tables: &Tables, clan_id: Option<u64>) -> String {
    clan_id
        .and_then(slot)
        .and_then(|idx| tables.clans.get(idx))
        .map_or_else(|| SOLO_CLAN.to_string(), Clone::clone)
}
