//! Command-line interface for bookforge.
//!
//! A thin shell over [`Engine`]: argument parsing, tracing setup, and the
//! dispatch from subcommands to facade calls. Run behavior lives in the
//! engine crates; this module only renders it.

use anyhow::{Context, Result, bail};
use bookforge_engine::{Engine, EngineConfig, LogEvent, Report, RunInput, RunState, RunStatus};
use camino::Utf8PathBuf;
use clap::{Args, Parser, Subcommand};
use std::io::Write as _;
use std::path::PathBuf;
use tokio::sync::broadcast;
use tracing::debug;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// bookforge - book drafting pipeline with rule-gated revision loops
#[derive(Parser)]
#[command(name = "bookforge")]
#[command(about = "Drafts a book from an idea through outline, chapters, validation, and revision")]
#[command(long_about = r#"
bookforge drives a manuscript from a one-line idea to a converged draft:
outline, chapter drafts, deterministic validation, and revision passes until
the issue list settles or the iteration budget runs out.

EXAMPLES:
  # Draft a book end to end with the offline mock backend
  bookforge run --idea "a field guide to habit change"

  # Create a run now, start it later
  bookforge new --idea "a field guide to habit change" --chapters 6
  bookforge start <run_id>

  # Ask an active draft to stop at the next stage boundary, then pick it up
  bookforge stop <run_id>
  bookforge continue <run_id>

  # Inspect progress and results
  bookforge status <run_id> --json
  bookforge report <run_id>
  bookforge tail <run_id>

CONFIGURATION:
  Settings load from ~/.config/bookforge/config.toml when present, then
  BOOKFORGE_* environment variables, then CLI flags, highest last.
  Use --backend gemini with GEMINI_API_KEY set for real generation.
"#)]
#[command(version)]
pub struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Directory holding run artifacts
    #[arg(long, global = true)]
    pub data_dir: Option<Utf8PathBuf>,

    /// Text backend ("mock" or "gemini")
    #[arg(long, global = true)]
    pub backend: Option<String>,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Inputs shared by `new` and `run`.
#[derive(Args)]
pub struct DraftArgs {
    /// One-line idea the book grows from
    #[arg(long)]
    pub idea: String,

    /// Target manuscript length in words
    #[arg(long, default_value_t = 20_000)]
    pub words: u32,

    /// Style guide; "No <phrase>." clauses become banned phrases
    #[arg(long, default_value = "Tone: calm and practical. No buzzwords. No fluff.")]
    pub style: String,

    /// Manuscript revision budget
    #[arg(long, default_value_t = 5)]
    pub iterations: u32,

    /// Fixed chapter count (defaults to the outline length)
    #[arg(long)]
    pub chapters: Option<u32>,

    /// File with source material; enables the citations validator
    #[arg(long)]
    pub sources_file: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create a run and print its id without starting it
    New(DraftArgs),
    /// Start a created or stopped run and wait for it to finish
    Start {
        run_id: String,
    },
    /// Create a run, drive it to the end, and print the report
    Run(DraftArgs),
    /// Ask an active run to stop at the next stage boundary
    Stop {
        run_id: String,
    },
    /// Resume a stopped run and wait for it to finish
    Continue {
        run_id: String,
    },
    /// Show the persisted run state
    Status {
        run_id: String,
        /// Print raw JSON instead of a summary
        #[arg(long)]
        json: bool,
    },
    /// Show the final report of a completed run
    Report {
        run_id: String,
        /// Print raw JSON instead of a summary
        #[arg(long)]
        json: bool,
    },
    /// Print the event history, then follow live events while the run is active
    Tail {
        run_id: String,
    },
    /// List known runs
    List,
}

/// Parse arguments, set up tracing, and dispatch. All output happens here;
/// `main` only maps the result to an exit code.
pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let mut config = EngineConfig::load(cli.config.as_deref())?;
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }
    if let Some(backend) = cli.backend {
        config.backend.provider = Some(backend);
    }

    let engine = Engine::new(config)?;
    debug!(
        backend = engine.backend_name(),
        data_dir = %engine.config().data_dir,
        "engine ready"
    );

    match cli.command {
        Commands::New(args) => {
            let run_id = engine.create_run(&build_input(&args)?)?;
            println!("{run_id}");
        }
        Commands::Run(args) => {
            let run_id = engine.create_run(&build_input(&args)?)?;
            println!("run {run_id} ({} backend)", engine.backend_name());
            engine.start(&run_id)?;
            follow(&engine, &run_id).await;
            engine.wait(&run_id).await;
            print_outcome(&engine, &run_id)?;
        }
        Commands::Start { run_id } => {
            if engine.start(&run_id)? {
                follow(&engine, &run_id).await;
                engine.wait(&run_id).await;
                print_outcome(&engine, &run_id)?;
            } else {
                println!("run {run_id} is already active or finished");
            }
        }
        Commands::Stop { run_id } => {
            engine.stop(&run_id)?;
            println!("stop requested for {run_id}");
        }
        Commands::Continue { run_id } => {
            if engine.resume(&run_id)? {
                follow(&engine, &run_id).await;
                engine.wait(&run_id).await;
                print_outcome(&engine, &run_id)?;
            } else {
                println!("run {run_id} is already finished");
            }
        }
        Commands::Status { run_id, json } => {
            let state = engine.status(&run_id)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&state)?);
            } else {
                print_state(&state);
            }
        }
        Commands::Report { run_id, json } => match engine.report(&run_id)? {
            Some(report) if json => println!("{}", serde_json::to_string_pretty(&report)?),
            Some(report) => print_report(&report),
            None => {
                let status = engine.status(&run_id)?.status;
                println!("run {run_id} has no report yet (status: {status})");
            }
        },
        Commands::Tail { run_id } => {
            for event in engine.read_log(&run_id)? {
                // Replayed token events would dump whole drafts; the text
                // already lives in the chapter artifacts.
                if !matches!(event, LogEvent::Token { .. }) {
                    print_event(&event);
                }
            }
            follow(&engine, &run_id).await;
        }
        Commands::List => {
            for run_id in engine.list_runs()? {
                println!("{run_id}");
            }
        }
    }

    Ok(())
}

fn build_input(args: &DraftArgs) -> Result<RunInput> {
    let sources = match &args.sources_file {
        Some(path) => Some(
            std::fs::read_to_string(path)
                .with_context(|| format!("reading sources file {}", path.display()))?,
        ),
        None => None,
    };

    Ok(RunInput {
        idea: args.idea.clone(),
        target_words: args.words,
        style_guide: args.style.clone(),
        iterations: args.iterations,
        chapter_count: args.chapters,
        sources,
    })
}

/// Print live events until the run's channel closes. Quietly returns when
/// the run is no longer active.
async fn follow(engine: &Engine, run_id: &str) {
    let Ok(mut events) = engine.subscribe(run_id) else {
        return;
    };
    loop {
        match events.recv().await {
            Ok(event) => print_event(&event),
            Err(broadcast::error::RecvError::Lagged(_)) => continue,
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

fn print_event(event: &LogEvent) {
    let clock = event.at().format("%H:%M:%S");
    match event {
        LogEvent::StageStart { stage, .. } => println!("{clock} >> {stage}"),
        LogEvent::StageEnd { stage, .. } => println!("{clock} << {stage}"),
        LogEvent::Token { text, .. } => {
            print!("{text}");
            let _ = std::io::stdout().flush();
        }
        LogEvent::IssueBatch {
            iteration, issues, ..
        } => {
            println!(
                "{clock} iteration {iteration}: {} open issue(s)",
                issues.len()
            );
            for issue in issues {
                println!(
                    "    [{}] {} {}",
                    issue.severity.as_str(),
                    issue.id,
                    issue.message
                );
            }
        }
        LogEvent::Error { message, .. } => println!("{clock} error: {message}"),
    }
}

fn print_state(state: &RunState) {
    println!("run:       {}", state.run_id);
    println!("status:    {}", state.status);
    println!("iteration: {}", state.iteration);
    println!(
        "chapters:  {} approved, next index {}",
        state.approved_chapters.len(),
        state.chapter_index
    );
    if !state.last_diff.is_empty() {
        println!("last revision:");
        for note in &state.last_diff {
            println!("  - {note}");
        }
    }
}

fn print_report(report: &Report) {
    let hash = report
        .manuscript_blake3
        .get(..16)
        .unwrap_or(&report.manuscript_blake3);
    let history = report
        .history
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ");

    println!("run:           {}", report.run_id);
    println!("status:        {}", report.status);
    println!("iterations:    {}", report.iterations);
    println!("words:         {}", report.word_count);
    println!("manuscript:    blake3:{hash}");
    println!("open issues:   {}", report.final_issues.len());
    println!("issue history: {history}");
}

fn print_outcome(engine: &Engine, run_id: &str) -> Result<()> {
    let state = engine.status(run_id)?;
    println!("run {run_id} finished: {}", state.status);
    if let Some(report) = engine.report(run_id)? {
        print_report(&report);
    }
    if state.status == RunStatus::Error {
        bail!("run {run_id} failed on a backend fault");
    }
    Ok(())
}

fn init_tracing(verbose: bool) {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| {
            if verbose {
                EnvFilter::try_new(
                    "bookforge=debug,bookforge_engine=debug,bookforge_llm=debug,info",
                )
            } else {
                EnvFilter::try_new("bookforge=info,bookforge_engine=info,bookforge_llm=info,warn")
            }
        })
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(verbose)
                .with_writer(std::io::stderr)
                .compact(),
        )
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn draft_args_have_usable_defaults() {
        let cli = Cli::try_parse_from(["bookforge", "new", "--idea", "a book about tides"])
            .expect("parse");
        let Commands::New(args) = cli.command else {
            panic!("expected the new subcommand");
        };

        assert_eq!(args.idea, "a book about tides");
        assert_eq!(args.words, 20_000);
        assert_eq!(args.iterations, 5);
        assert!(args.chapters.is_none());
        assert!(args.sources_file.is_none());
        assert!(args.style.contains("No buzzwords"));
    }

    #[test]
    fn continue_parses_as_a_subcommand() {
        let cli = Cli::try_parse_from(["bookforge", "continue", "run-1"]).expect("parse");
        assert!(matches!(cli.command, Commands::Continue { run_id } if run_id == "run-1"));
    }

    #[test]
    fn global_flags_ride_along_with_subcommands() {
        let cli = Cli::try_parse_from([
            "bookforge",
            "status",
            "run-1",
            "--json",
            "--data-dir",
            "/tmp/books",
            "--backend",
            "mock",
        ])
        .expect("parse");

        assert_eq!(
            cli.data_dir.as_deref(),
            Some(camino::Utf8Path::new("/tmp/books"))
        );
        assert_eq!(cli.backend.as_deref(), Some("mock"));
        assert!(matches!(cli.command, Commands::Status { json: true, .. }));
    }

    #[test]
    fn idea_is_required() {
        assert!(Cli::try_parse_from(["bookforge", "new"]).is_err());
    }

    #[test]
    fn sources_file_contents_become_run_sources() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("notes.md");
        std::fs::write(&path, "cohort study, 14 days\n").expect("write");

        let args = DraftArgs {
            idea: "a book about tides".to_string(),
            words: 1_000,
            style: "Tone: calm.".to_string(),
            iterations: 2,
            chapters: Some(1),
            sources_file: Some(path),
        };

        let input = build_input(&args).expect("build");
        assert_eq!(input.sources.as_deref(), Some("cohort study, 14 days\n"));

        let missing = DraftArgs {
            sources_file: Some(dir.path().join("absent.md")),
            ..args
        };
        assert!(build_input(&missing).is_err());
    }
}
