//! Interactive terminal client against the live Gemini backend.
use anyhow::{Context, Result};
use colored::Colorize;
use gauntlet_game::constants::MAX_HEALTH;
use gauntlet_game::{
    AudioOutcome, EngineConfig, GameContent, GauntletEngine, MemoryRunStore, PerkKind,
    PostMortemReport, RestoreOutcome, RunStore, SnapshotRecovery, SnapshotStore, Speaker,
    TextBackend, TurnReport, format_currency,
};
use std::io::{BufRead, Lines, StdinLock, Write, stdin, stdout};
use std::path::Path;

use crate::config::{ConfigError, PlayConfig};
use crate::gemini::GeminiBackend;
use crate::storage::FileSnapshotStore;

const HELP: &str = "Commands: /voice <file> to pitch from a recording, /restart, /quit";

struct Console {
    lines: Lines<StdinLock<'static>>,
}

impl Console {
    fn new() -> Self {
        Self {
            lines: stdin().lock().lines(),
        }
    }

    /// Next trimmed line, or `None` at end of input.
    fn prompt(&mut self, label: &str) -> Result<Option<String>> {
        print!("{label}");
        stdout().flush()?;
        match self.lines.next() {
            Some(line) => Ok(Some(line?.trim().to_string())),
            None => Ok(None),
        }
    }
}

/// # Errors
///
/// Fails on missing configuration, unreadable documents or console I/O errors.
pub fn run(play: &PlayConfig) -> Result<()> {
    let api_key = play.api_key()?;
    let content = GameContent::bundled().context("bundled game content is invalid")?;
    if content.theme(&play.theme).is_none() {
        return Err(ConfigError::UnknownTheme(play.theme.clone()).into());
    }
    let backend = GeminiBackend::new(api_key, &play.model)?;

    let mut config = EngineConfig::default();
    if !play.app_url.trim().is_empty() {
        config.app_url = play.app_url.trim().to_string();
    }
    let runs = Some(MemoryRunStore::new());

    if play.disable_local_recovery {
        let engine = GauntletEngine::new(
            content,
            backend,
            SnapshotRecovery::<FileSnapshotStore>::disabled(),
            runs,
            config,
        );
        play_loop(engine, play)
    } else {
        let store = FileSnapshotStore::new(&play.snapshot_path);
        log::debug!("Snapshot file: {}", store.path().display());
        let engine = GauntletEngine::new(content, backend, SnapshotRecovery::new(store), runs, config);
        play_loop(engine, play)
    }
}

fn play_loop<B, S, R>(mut engine: GauntletEngine<B, S, R>, play: &PlayConfig) -> Result<()>
where
    B: TextBackend,
    S: SnapshotStore,
    R: RunStore,
{
    if engine.restore() == RestoreOutcome::Restored {
        println!("{}", "♻️  Resumed your interrupted run.".bright_green());
    } else {
        engine.set_identity(&play.handle, &play.clan);
        engine.set_theme(&play.theme)?;
    }
    if let Some(path) = &play.document {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        engine.set_document(&text);
        println!("📄 Loaded {} for the investors to cross-reference.", path.display());
    }

    let mut console = Console::new();
    println!("{}", HELP.dimmed());
    print_status(&engine);
    print_last_investor_line(&engine);

    loop {
        if engine.session().is_terminal() {
            finish(&mut engine);
            match console.prompt("\nType /restart to play again or /quit to leave: ")? {
                Some(cmd) if cmd == "/restart" => {
                    engine.restart()?;
                    print_status(&engine);
                    print_last_investor_line(&engine);
                    continue;
                }
                _ => return Ok(()),
            }
        }

        if engine.session().awaiting_perk_selection() {
            let Some(perk) = choose_perk(&mut console, &engine)? else {
                return Ok(());
            };
            let report = engine.choose_perk(perk)?;
            print_notices(&report);
            print_status(&engine);
            print_last_investor_line(&engine);
            continue;
        }

        let Some(line) = console.prompt("\n🎤 You: ")? else {
            return Ok(());
        };
        match line.as_str() {
            "" => continue,
            "/quit" => return Ok(()),
            "/restart" => {
                engine.restart()?;
                print_status(&engine);
                print_last_investor_line(&engine);
                continue;
            }
            _ => {}
        }

        let report = if let Some(path) = line.strip_prefix("/voice ") {
            let Some(report) = pitch_by_voice(&mut console, &mut engine, Path::new(path.trim()))?
            else {
                continue;
            };
            report
        } else {
            print!("{} ", "💼 Investor:".bright_cyan());
            let report = engine.play_turn(&line, print_fragment)?;
            println!();
            report
        };
        print_judgment(&report);
        print_notices(&report);
        print_status(&engine);
    }
}

fn print_fragment(fragment: &str) {
    print!("{fragment}");
    let _ = stdout().flush();
}

fn pitch_by_voice<B, S, R>(
    console: &mut Console,
    engine: &mut GauntletEngine<B, S, R>,
    path: &Path,
) -> Result<Option<TurnReport>>
where
    B: TextBackend,
    S: SnapshotStore,
    R: RunStore,
{
    let audio = std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))?;
    match engine.accept_audio(&audio, mime_for(path)) {
        AudioOutcome::Drafted(draft) => {
            println!("📝 Draft: {draft}");
            let edited = console
                .prompt("Press Enter to send, or type a corrected version: ")?
                .unwrap_or_default();
            let edited = (!edited.is_empty()).then_some(edited);
            print!("{} ", "💼 Investor:".bright_cyan());
            let report = engine.submit_voice_draft(edited.as_deref(), print_fragment)?;
            println!();
            Ok(Some(report))
        }
        AudioOutcome::Ignored => {
            println!("{}", "That recording was empty or already used.".yellow());
            Ok(None)
        }
        AudioOutcome::Failed => {
            println!("{}", "Transcription failed. Try again or type your answer.".red());
            Ok(None)
        }
    }
}

fn mime_for(path: &Path) -> &'static str {
    match path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .as_deref()
    {
        Some("wav") => "audio/wav",
        Some("mp3") => "audio/mpeg",
        Some("ogg" | "oga") => "audio/ogg",
        Some("m4a" | "mp4") => "audio/mp4",
        Some("flac") => "audio/flac",
        _ => "audio/webm",
    }
}

fn choose_perk<B, S, R>(
    console: &mut Console,
    engine: &GauntletEngine<B, S, R>,
) -> Result<Option<PerkKind>>
where
    B: TextBackend,
    S: SnapshotStore,
    R: RunStore,
{
    let perks: Vec<_> = engine.content().perks().collect();
    println!("\n{}", "🎁 Choose a perk for the next level:".bright_yellow().bold());
    for (idx, perk) in perks.iter().enumerate() {
        println!("  {}. {} - {}", idx + 1, perk.name.bold(), perk.description);
    }
    loop {
        let Some(answer) = console.prompt("Perk number: ")? else {
            return Ok(None);
        };
        let picked = answer
            .parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(|idx| perks.get(idx));
        if let Some(perk) = picked {
            return Ok(Some(perk.kind));
        }
        println!("Pick a number between 1 and {}.", perks.len());
    }
}

fn print_status<B, S, R>(engine: &GauntletEngine<B, S, R>)
where
    B: TextBackend,
    S: SnapshotStore,
    R: RunStore,
{
    let session = engine.session();
    let persona = engine
        .content()
        .persona(session.level())
        .map_or("Unknown investor", |p| p.title.as_str());
    println!(
        "\n{} Level {} - {} | HP {}/{} | {}",
        "🏛️".bold(),
        session.level(),
        persona.bright_white().bold(),
        session.health(),
        MAX_HEALTH,
        session.theme()
    );
    for line in session.active_perks().describe() {
        println!("   {}", line.bright_magenta());
    }
}

fn print_last_investor_line<B, S, R>(engine: &GauntletEngine<B, S, R>)
where
    B: TextBackend,
    S: SnapshotStore,
    R: RunStore,
{
    if let Some(turn) = engine
        .session()
        .history()
        .iter()
        .rev()
        .find(|turn| turn.speaker == Speaker::Ai)
    {
        println!("{} {}", "💼 Investor:".bright_cyan(), turn.text);
    }
}

fn print_judgment(report: &TurnReport) {
    if let Some(judgment) = &report.judgment {
        let line = format!("⚖️  {}", judgment.feedback);
        if judgment.damage < 0 {
            println!("{}", line.red());
        } else if judgment.level_passed {
            println!("{}", line.green());
        } else {
            println!("{}", line.dimmed());
        }
    }
}

fn print_notices(report: &TurnReport) {
    for notice in &report.notices {
        println!("   {}", notice.yellow());
    }
    if report.celebrate {
        println!("{}", "🎉 Headline valuation! The room erupts.".bright_green().bold());
    }
}

fn finish<B, S, R>(engine: &mut GauntletEngine<B, S, R>)
where
    B: TextBackend,
    S: SnapshotStore,
    R: RunStore,
{
    if let Some(report) = engine.post_mortem() {
        print_post_mortem(&report);
    }
    let valuation = engine.session().final_valuation_usd();
    if valuation > 0 {
        println!("\n💰 Valuation: {}", format_currency(valuation).bright_green().bold());
    }
    if let Some(share) = engine.share_text() {
        println!("\n{}\n{share}", "Share your run:".bold());
    }

    let players = engine.player_leaderboard(10);
    if !players.is_empty() {
        println!("\n{}", "🏆 Top Founders".bright_yellow().bold());
        for (rank, row) in players.iter().enumerate() {
            println!(
                "  {:>2}. {:<20} {:>14} ({} runs)",
                rank + 1,
                row.player_handle,
                format_currency(row.total_valuation_usd),
                row.run_count
            );
        }
    }
    let clans = engine.clan_leaderboard(10);
    if !clans.is_empty() {
        println!("\n{}", "🛡️  Top Syndicates".bright_yellow().bold());
        for (rank, row) in clans.iter().enumerate() {
            println!(
                "  {:>2}. {:<20} {:>14} ({} members)",
                rank + 1,
                row.clan_name,
                format_currency(row.total_valuation_usd),
                row.member_count
            );
        }
    }
}

fn print_post_mortem(report: &PostMortemReport) {
    println!("\n{}", "📋 Post-Mortem".bright_cyan().bold());
    let scores = report.scores;
    println!(
        "   Confidence {} | Technical clarity {} | Business viability {} | Resilience {}",
        scores.confidence,
        scores.technical_clarity,
        scores.business_viability,
        scores.resilience_under_pressure
    );
    for (title, items) in [
        ("Strengths", &report.strengths),
        ("Weaknesses", &report.weaknesses),
        ("Next actions", &report.next_actions),
    ] {
        println!("   {}:", title.bold());
        for item in items {
            println!("     • {item}");
        }
    }
    println!("   {}", report.summary.italic());
}
