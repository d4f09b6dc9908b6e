//! End-of-run results: valuation, currency display and the shareable summary.

use crate::constants::{
    BASE_VALUATION_USD, BUSINESS_WEIGHT_USD, CONFIDENCE_WEIGHT_USD, DECK_BONUS_USD, DEFAULT_APP_URL,
    HP_WEIGHT_USD, MAX_HEALTH, MIN_HEALTH, PERK_DEPTH_BONUS_USD, RESILIENCE_WEIGHT_USD,
    TECHNICAL_WEIGHT_USD, VALUATION_AUDIO_THRESHOLD_USD, VALUATION_ROUNDING_USD,
};
use crate::numbers::round_to_step;
use crate::postmortem::PostMortemReport;
use crate::session::{Outcome, Session, TurnLogEntry};

const ANONYMOUS_FOUNDER: &str = "Anonymous Founder";

fn percent(score: i32) -> i64 {
    i64::from(score.clamp(0, 100))
}

/// Deterministic valuation used for rankings.
#[must_use]
pub fn compute_valuation(
    report: &PostMortemReport,
    hp: i32,
    has_document: bool,
    perk_count: usize,
) -> i64 {
    let scores = &report.scores;
    let score_component = percent(scores.confidence) * CONFIDENCE_WEIGHT_USD
        + percent(scores.technical_clarity) * TECHNICAL_WEIGHT_USD
        + percent(scores.business_viability) * BUSINESS_WEIGHT_USD
        + percent(scores.resilience_under_pressure) * RESILIENCE_WEIGHT_USD;
    let hp_component = i64::from(hp.clamp(MIN_HEALTH, MAX_HEALTH)) * HP_WEIGHT_USD;
    let deck_bonus = if has_document { DECK_BONUS_USD } else { 0 };
    let perks = i64::try_from(perk_count).unwrap_or(i64::MAX);
    let perk_bonus = perks.saturating_mul(PERK_DEPTH_BONUS_USD);

    let valuation = BASE_VALUATION_USD
        .saturating_add(score_component)
        .saturating_add(hp_component)
        .saturating_add(deck_bonus)
        .saturating_add(perk_bonus);
    round_to_step(valuation, VALUATION_ROUNDING_USD)
}

/// Valuation for a finished session: the model on victory, zero otherwise.
#[must_use]
pub fn session_valuation(session: &Session, report: &PostMortemReport) -> i64 {
    match session.terminal().outcome() {
        Some(Outcome::Victory) => compute_valuation(
            report,
            session.health(),
            session.has_document(),
            session.perk_history().len(),
        ),
        _ => 0,
    }
}

/// Big victories get the celebration cue.
#[must_use]
pub const fn is_headline_valuation(valuation_usd: i64) -> bool {
    valuation_usd >= VALUATION_AUDIO_THRESHOLD_USD
}

/// `$1,234,567` style dollars.
#[must_use]
pub fn format_currency(amount: i64) -> String {
    let digits = amount.unsigned_abs().to_string();
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3 + 2);
    if amount < 0 {
        grouped.push('-');
    }
    grouped.push('$');
    for (idx, ch) in digits.chars().enumerate() {
        if idx > 0 && (digits.len() - idx) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    grouped
}

const fn damage_tile(entry: &TurnLogEntry) -> char {
    match entry.effective_damage.unsigned_abs() {
        0 => '🟩',
        1..=10 => '🟨',
        _ => '🟥',
    }
}

/// One tile per turn; a single blank tile when no turn was played.
#[must_use]
pub fn damage_track(turns: &[TurnLogEntry]) -> String {
    if turns.is_empty() {
        return "⬜".to_string();
    }
    turns.iter().map(damage_tile).collect()
}

/// Three-line summary players paste into chat.
#[must_use]
pub fn build_share_text(session: &Session, valuation_usd: i64, app_url: &str) -> String {
    let run_tag = if session.terminal().outcome() == Some(Outcome::Victory) {
        "🚀"
    } else {
        "💥"
    };
    let founder = match session.player_handle().trim() {
        "" => ANONYMOUS_FOUNDER,
        handle => handle,
    };
    let app_url = match app_url.trim() {
        "" => DEFAULT_APP_URL,
        url => url,
    };
    format!(
        "Founder's Gauntlet {track} {run_tag}\n\
         {founder} | {theme} | Reached L{level} | HP {hp}/{MAX_HEALTH} | Valuation {valuation}\n\
         Play: {app_url}",
        track = damage_track(session.turn_log()),
        theme = session.theme(),
        level = session.max_level_reached(),
        hp = session.health(),
        valuation = format_currency(valuation_usd),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::postmortem::ReportScores;

    fn report(score: i32) -> PostMortemReport {
        PostMortemReport {
            scores: ReportScores {
                confidence: score,
                technical_clarity: score,
                business_viability: score,
                resilience_under_pressure: score,
            },
            ..PostMortemReport::default()
        }
    }

    #[test]
    fn valuation_follows_weighted_model() {
        // 2.5M + 50 * 260k + 100 * 65k = 22M, already on a 50k step.
        assert_eq!(compute_valuation(&report(50), 100, false, 0), 22_000_000);
        assert_eq!(
            compute_valuation(&report(50), 100, true, 4),
            22_000_000 + 500_000 + 700_000
        );
    }

    #[test]
    fn valuation_clamps_inputs_and_rounds() {
        assert_eq!(
            compute_valuation(&report(250), -30, false, 0),
            compute_valuation(&report(100), 0, false, 0)
        );
        // 2.5M + 1 * 260k + 1 * 65k = 2.825M, rounds to 2.8M (tie to even step).
        assert_eq!(compute_valuation(&report(1), 1, false, 0), 2_800_000);
        assert_eq!(compute_valuation(&report(0), 0, false, 0) % 50_000, 0);
    }

    #[test]
    fn currency_groups_thousands() {
        assert_eq!(format_currency(0), "$0");
        assert_eq!(format_currency(999), "$999");
        assert_eq!(format_currency(1_000), "$1,000");
        assert_eq!(format_currency(22_450_000), "$22,450,000");
        assert_eq!(format_currency(-5_000), "-$5,000");
    }

    #[test]
    fn damage_track_tiles() {
        let entry = |effective_damage| TurnLogEntry {
            turn: 1,
            level: 1,
            raw_damage: effective_damage,
            effective_damage,
            hp_after: 100,
        };
        assert_eq!(damage_track(&[]), "⬜");
        assert_eq!(
            damage_track(&[entry(0), entry(-5), entry(-10), entry(-20)]),
            "🟩🟨🟨🟥"
        );
    }

    #[test]
    fn headline_threshold() {
        assert!(is_headline_valuation(3_500_000));
        assert!(!is_headline_valuation(3_450_000));
    }
}
