mod config;
mod gemini;
mod logic;
mod play;
mod storage;

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use colored::Colorize;
use gauntlet_game::GameContent;
use std::fs::File;
use std::io::{BufWriter, Write, stdout};
use std::path::PathBuf;
use std::time::Instant;

use config::{PlayConfig, split_csv};
use logic::{
    LogicTester, ScenarioResult, Simulator, expand_scenarios, get_scenario, list_scenarios,
    resolve_seed_inputs,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RunMode {
    /// Scripted simulations against a deterministic backend (fast, offline)
    Simulate,
    /// Play a live run in the terminal against Gemini
    Play,
}

#[derive(Debug, Parser)]
#[command(name = "gauntlet-tester", version)]
#[command(about = "Scripted simulations and a terminal client for the Founder's Gauntlet engine")]
struct Args {
    /// Run mode: simulate (offline) or play (live)
    #[arg(long, value_enum, default_value_t = RunMode::Simulate)]
    mode: RunMode,

    /// Scenarios to run (comma-separated, or `all`)
    #[arg(long, default_value = "smoke")]
    scenarios: String,

    /// List all available scenarios and exit
    #[arg(long)]
    list_scenarios: bool,

    /// Seeds to run (comma-separated; integers, 0x hex, today, random, default)
    #[arg(long, default_value = "1337")]
    seeds: String,

    /// Number of iterations per scenario and seed
    #[arg(long, default_value_t = 10)]
    iterations: usize,

    /// Output report format
    #[arg(long, default_value = "console")]
    #[arg(value_parser = ["json", "markdown", "console"])]
    report: String,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Optional path to write the report output instead of stdout
    #[arg(long)]
    output: Option<PathBuf>,

    #[command(flatten)]
    play: PlayConfig,
}

fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    env_logger::init();
    let args = Args::parse();

    if maybe_list_scenarios(&args)? {
        return Ok(());
    }

    announce_banner();

    if args.mode == RunMode::Play {
        return play::run(&args.play);
    }

    let start_time = Instant::now();
    let scenarios = expand_scenarios(&split_csv(&args.scenarios));
    let seeds = resolve_seed_inputs(&split_csv(&args.seeds))?;
    let content = GameContent::bundled().context("bundled game content is invalid")?;
    let tester = LogicTester::new(Simulator::new(content, args.verbose), args.verbose);

    let results = run_simulations(&args, &scenarios, &seeds, &tester);
    write_reports(&args, &results, start_time)?;

    if results.iter().any(|r| !r.passed) {
        std::process::exit(1);
    }

    Ok(())
}

fn maybe_list_scenarios(args: &Args) -> Result<bool> {
    if !args.list_scenarios {
        return Ok(false);
    }
    let mut output_target = OutputTarget::new(args.output.clone())?;
    writeln!(output_target.writer(), "Available scenarios:")?;
    for (key, description) in list_scenarios() {
        writeln!(output_target.writer(), "  {key:18} - {description}")?;
    }
    output_target.flush_inner()?;
    Ok(true)
}

fn announce_banner() {
    println!("{}", "🎮 Founder's Gauntlet Tester".bright_cyan().bold());
    println!("{}", "================================".cyan());
}

fn run_simulations(
    args: &Args,
    scenarios: &[String],
    seeds: &[u64],
    tester: &LogicTester,
) -> Vec<ScenarioResult> {
    println!("{}", "🧠 Running Simulations".bright_yellow().bold());
    println!("{}", "-".repeat(30).yellow());

    let mut results = Vec::new();
    for scenario_name in scenarios {
        if let Some(scenario) = get_scenario(scenario_name) {
            results.extend(tester.run_scenario(&scenario, seeds, args.iterations));
        } else {
            eprintln!("⚠️  Unknown scenario: {}", scenario_name.yellow());
        }
    }
    results
}

fn write_reports(args: &Args, results: &[ScenarioResult], start_time: Instant) -> Result<()> {
    let mut output_target = OutputTarget::new(args.output.clone())?;

    match args.report.as_str() {
        "json" => {
            if results.is_empty() {
                writeln!(&mut output_target, "[]")?;
            } else {
                logic::reports::generate_json_report(&mut output_target, results)?;
            }
        }
        "markdown" => {
            if results.is_empty() {
                writeln!(
                    &mut output_target,
                    "# Founder's Gauntlet Simulation Results\n\n_No scenarios executed._"
                )?;
            } else {
                logic::reports::generate_markdown_report(&mut output_target, results)?;
            }
        }
        _ => {
            if results.is_empty() {
                writeln!(&mut output_target, "No scenarios executed.")?;
            } else {
                logic::reports::generate_console_report(
                    &mut output_target,
                    results,
                    start_time.elapsed(),
                )?;
            }
            writeln!(&mut output_target)?;
            writeln!(
                &mut output_target,
                "🏁 Total time: {:?}",
                start_time.elapsed()
            )?;
        }
    }

    output_target.flush_inner()?;
    Ok(())
}

enum OutputTarget {
    Stdout(BufWriter<std::io::Stdout>),
    File(BufWriter<File>),
}

impl OutputTarget {
    fn new(path: Option<PathBuf>) -> Result<Self> {
        if let Some(path) = path {
            let file = File::create(&path)
                .with_context(|| format!("failed to create {}", path.display()))?;
            Ok(Self::File(BufWriter::new(file)))
        } else {
            Ok(Self::Stdout(BufWriter::new(stdout())))
        }
    }

    fn writer(&mut self) -> &mut dyn Write {
        match self {
            Self::Stdout(w) => w,
            Self::File(w) => w,
        }
    }

    fn flush_inner(&mut self) -> std::io::Result<()> {
        match self {
            Self::Stdout(w) => w.flush(),
            Self::File(w) => w.flush(),
        }
    }
}

impl Write for OutputTarget {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.writer().write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.flush_inner()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn base_args(output: PathBuf, report: &str) -> Args {
        Args::parse_from([
            "gauntlet-tester",
            "--report",
            report,
            "--output",
            output.to_str().unwrap(),
        ])
    }

    fn temp_path(label: &str) -> PathBuf {
        std::env::temp_dir().join(format!(
            "gauntlet-main-{label}-{}",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_nanos()
        ))
    }

    fn sample_result() -> ScenarioResult {
        ScenarioResult {
            scenario_name: "smoke".to_string(),
            seed: 1337,
            passed: true,
            iterations_run: 1,
            successful_iterations: 1,
            victories: 0,
            defeats: 1,
            failures: Vec::new(),
            average_duration: Duration::from_millis(1),
            performance_data: vec![Duration::from_millis(1)],
        }
    }

    #[test]
    fn json_report_writes_to_file() {
        let path = temp_path("json");
        let args = base_args(path.clone(), "json");
        write_reports(&args, &[sample_result()], Instant::now()).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("\"scenario_name\": \"smoke\""));
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn empty_markdown_report_says_so() {
        let path = temp_path("md");
        let args = base_args(path.clone(), "markdown");
        write_reports(&args, &[], Instant::now()).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.contains("_No scenarios executed._"));
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn mode_defaults_to_simulation() {
        let args = Args::parse_from(["gauntlet-tester"]);
        assert_eq!(args.mode, RunMode::Simulate);
        assert_eq!(args.iterations, 10);
    }
}
