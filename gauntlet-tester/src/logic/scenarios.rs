use anyhow::{Result, bail, ensure};
use gauntlet_game::constants::{FINAL_LEVEL, MAX_HEALTH, MIN_HEALTH};
use gauntlet_game::judgment::OVERLOAD_FEEDBACK;
use gauntlet_game::leaderboard::NOTICE_MISSING_HANDLE;
use gauntlet_game::stream::INTERRUPTION_NOTICE;
use gauntlet_game::{RestoreOutcome, Speaker, TerminalState};

use super::scripted::BackendProfile;
use super::simulation::{PerkStrategy, SimulationPlan, SimulationSummary};

/// Named simulation scenario.
#[derive(Debug, Clone)]
pub struct TestScenario {
    pub key: &'static str,
    pub description: &'static str,
    pub plan: SimulationPlan,
}

impl TestScenario {
    fn new(key: &'static str, description: &'static str, plan: SimulationPlan) -> Self {
        Self {
            key,
            description,
            plan: plan.with_expectation(core_invariants),
        }
    }
}

#[must_use]
pub fn catalog() -> Vec<TestScenario> {
    vec![
        TestScenario::new(
            "smoke",
            "Mixed verdicts with random perks; every run must stay within the rules",
            SimulationPlan::new(BackendProfile::default(), PerkStrategy::Random),
        ),
        TestScenario::new(
            "victory-lap",
            "Every answer passes; the run scores, submits and clears its snapshot",
            SimulationPlan::new(BackendProfile::flawless(), PerkStrategy::Rotate)
                .with_theme("FinTech")
                .with_identity("sim-founder", "North Star")
                .with_document()
                .with_expectation(victory_expectation),
        ),
        TestScenario::new(
            "flameout",
            "Every answer is a major failure; the run ends in five turns",
            SimulationPlan::new(BackendProfile::hostile(), PerkStrategy::Skip)
                .with_identity("", "")
                .with_expectation(flameout_expectation),
        ),
        TestScenario::new(
            "shield-wall",
            "Shield perks in a damaging game; blocked turns take no damage",
            SimulationPlan::new(
                BackendProfile {
                    pass_rate: 0.5,
                    minor_rate: 0.1,
                    major_rate: 0.4,
                    ..BackendProfile::default()
                },
                PerkStrategy::Shield,
            )
            .with_expectation(shield_expectation),
        ),
        TestScenario::new(
            "flaky-network",
            "Half of all reply streams break; every reply is still completed",
            SimulationPlan::new(
                BackendProfile::default().with_stream_breaks(0.5),
                PerkStrategy::Charisma,
            )
            .with_expectation(flaky_network_expectation),
        ),
        TestScenario::new(
            "quota-storm",
            "Every judgment is rate limited; the panel reports overload and deals no damage",
            SimulationPlan::new(BackendProfile::default().with_quota(1.0), PerkStrategy::Skip)
                .with_max_turns(4)
                .with_expectation(quota_storm_expectation),
        ),
        TestScenario::new(
            "crash-recovery",
            "The engine is dropped mid-run and restored from its snapshot",
            SimulationPlan::new(BackendProfile::flawless(), PerkStrategy::Charisma)
                .with_crash_after(3)
                .with_expectation(crash_recovery_expectation),
        ),
        TestScenario::new(
            "bad-coach",
            "The first post-mortem draft is malformed; the report is repaired",
            SimulationPlan::new(
                BackendProfile::hostile().with_malformed_reports(1.0),
                PerkStrategy::Skip,
            )
            .with_expectation(report_repair_expectation),
        ),
    ]
}

#[must_use]
pub fn list_scenarios() -> Vec<(&'static str, &'static str)> {
    catalog()
        .into_iter()
        .map(|scenario| (scenario.key, scenario.description))
        .collect()
}

#[must_use]
pub fn get_scenario(key: &str) -> Option<TestScenario> {
    catalog().into_iter().find(|scenario| scenario.key == key)
}

/// Scenario names with `all` expanded to the full catalog.
#[must_use]
pub fn expand_scenarios(requested: &[String]) -> Vec<String> {
    let mut scenarios: Vec<String> = requested
        .iter()
        .filter(|s| s.as_str() != "all")
        .cloned()
        .collect();
    if requested.iter().any(|s| s == "all") {
        for (key, _) in list_scenarios() {
            if !scenarios.iter().any(|s| s == key) {
                scenarios.push(key.to_string());
            }
        }
    }
    scenarios
}

fn core_invariants(summary: &SimulationSummary) -> Result<()> {
    ensure!(
        (MIN_HEALTH..=MAX_HEALTH).contains(&summary.health),
        "health {} out of range",
        summary.health
    );
    ensure!(
        summary.level >= 1 && summary.level <= FINAL_LEVEL,
        "level {} out of range",
        summary.level
    );
    ensure!(
        summary.max_level >= summary.level,
        "max level {} below current level {}",
        summary.max_level,
        summary.level
    );

    let mut hp = MAX_HEALTH;
    for entry in &summary.turn_log {
        ensure!(
            entry.effective_damage <= 0 && entry.effective_damage >= entry.raw_damage,
            "turn {}: effective damage {} exceeds raw damage {}",
            entry.turn,
            entry.effective_damage,
            entry.raw_damage
        );
        hp = (hp + entry.effective_damage).clamp(MIN_HEALTH, MAX_HEALTH);
        ensure!(
            entry.hp_after == hp,
            "turn {}: hp_after {} does not follow from the damage log ({hp})",
            entry.turn,
            entry.hp_after
        );
    }
    ensure!(
        summary.turn_log.is_empty() || hp == summary.health,
        "damage log ends at {hp} but health is {}",
        summary.health
    );

    match summary.terminal {
        TerminalState::Victorious => {
            ensure!(summary.health > 0, "victory with no health left");
            ensure!(summary.level == FINAL_LEVEL, "victory before the final level");
        }
        TerminalState::Defeated => {
            ensure!(summary.health == 0, "defeat with {} health", summary.health);
            ensure!(summary.valuation == 0, "defeated run carries a valuation");
        }
        TerminalState::InProgress => {
            ensure!(summary.halted, "unfinished run was not flagged as halted");
        }
    }

    if summary.game_ended() {
        ensure!(summary.report.is_some(), "finished run has no post-mortem");
        ensure!(summary.share_text.is_some(), "finished run has no share text");
        ensure!(!summary.snapshot_left, "finished run left a snapshot behind");
    }
    Ok(())
}

fn victory_expectation(summary: &SimulationSummary) -> Result<()> {
    ensure!(
        summary.terminal == TerminalState::Victorious,
        "expected victory, got {:?}",
        summary.terminal
    );
    ensure!(summary.turns == 5, "victory took {} turns", summary.turns);
    ensure!(summary.valuation > 0, "victory without a valuation");
    ensure!(summary.runs_saved == 1, "run was saved {} times", summary.runs_saved);
    ensure!(summary.player_rows == 1, "leaderboard has {} rows", summary.player_rows);
    let share = summary.share_text.as_deref().unwrap_or_default();
    ensure!(share.contains("🚀"), "share text lacks the victory marker");
    ensure!(share.contains("sim-founder"), "share text lacks the handle");
    Ok(())
}

fn flameout_expectation(summary: &SimulationSummary) -> Result<()> {
    ensure!(
        summary.terminal == TerminalState::Defeated,
        "expected defeat, got {:?}",
        summary.terminal
    );
    ensure!(summary.turns == 5, "defeat took {} turns", summary.turns);
    ensure!(summary.runs_saved == 0, "anonymous run reached the leaderboard");
    ensure!(
        summary.notices.iter().any(|n| n == NOTICE_MISSING_HANDLE),
        "missing-handle notice not shown"
    );
    let share = summary.share_text.as_deref().unwrap_or_default();
    ensure!(share.contains("💥"), "share text lacks the defeat marker");
    Ok(())
}

fn shield_expectation(summary: &SimulationSummary) -> Result<()> {
    // One charge per passed level; each absorbs one damaging turn.
    let mut level = 1;
    let mut charges = 0;
    for entry in &summary.turn_log {
        charges += entry.level.saturating_sub(level);
        level = entry.level;
        if entry.raw_damage >= 0 {
            continue;
        }
        if charges > 0 {
            charges -= 1;
            ensure!(
                entry.effective_damage == 0,
                "turn {}: shield charge did not block {} damage",
                entry.turn,
                entry.raw_damage
            );
        } else {
            ensure!(
                entry.effective_damage == entry.raw_damage,
                "turn {}: damage reduced to {} with no perk armed",
                entry.turn,
                entry.effective_damage
            );
        }
    }
    Ok(())
}

fn flaky_network_expectation(summary: &SimulationSummary) -> Result<()> {
    let blank = summary
        .transcript
        .iter()
        .filter(|turn| turn.speaker == Speaker::Ai)
        .any(|turn| turn.text.trim().is_empty());
    ensure!(!blank, "an investor reply was empty");
    let broken = summary.backend.streams_broken;
    let stitched = summary
        .replies
        .iter()
        .filter(|reply| reply.contains(INTERRUPTION_NOTICE.trim()))
        .count();
    ensure!(
        broken == 0 || stitched > 0 || summary.backend.continuations > 0,
        "{broken} broken streams but no continuation was requested"
    );
    Ok(())
}

fn quota_storm_expectation(summary: &SimulationSummary) -> Result<()> {
    ensure!(summary.health == MAX_HEALTH, "quota errors dealt damage");
    ensure!(summary.level == 1, "quota errors advanced the level");
    ensure!(summary.halted, "run should not finish under a quota storm");
    ensure!(
        summary
            .judgments
            .iter()
            .all(|j| j.feedback == OVERLOAD_FEEDBACK),
        "a judgment escaped the overload fallback"
    );
    ensure!(
        summary.backend.judgment_calls == summary.judgments.len() * 3,
        "expected three attempts per judgment, saw {} calls for {} judgments",
        summary.backend.judgment_calls,
        summary.judgments.len()
    );
    Ok(())
}

fn crash_recovery_expectation(summary: &SimulationSummary) -> Result<()> {
    let Some(crash) = &summary.crash else {
        bail!("no crash was simulated");
    };
    ensure!(
        crash.outcome == RestoreOutcome::Restored,
        "restore outcome was {}",
        crash.outcome
    );
    ensure!(
        crash.before == crash.after,
        "restored state {:?} differs from {:?}",
        crash.after,
        crash.before
    );
    ensure!(
        summary.terminal == TerminalState::Victorious,
        "restored run did not finish"
    );
    Ok(())
}

fn report_repair_expectation(summary: &SimulationSummary) -> Result<()> {
    let Some(report) = &summary.report else {
        bail!("no post-mortem produced");
    };
    ensure!(summary.backend.repair_calls >= 1, "no repair was attempted");
    ensure!(
        report.strengths.len() == 3
            && report.weaknesses.len() == 3
            && report.next_actions.len() == 3,
        "report lists are not three items long"
    );
    let scores = report.scores;
    for score in [
        scores.confidence,
        scores.technical_clarity,
        scores.business_viability,
        scores.resilience_under_pressure,
    ] {
        ensure!((0..=100).contains(&score), "score {score} out of range");
    }
    Ok(())
}
