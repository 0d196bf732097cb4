//! novax-admin - operator CLI for the novax tutoring backend
//!
//! This tool provides commands for:
//! - Inspecting the level schedule and a user's experience
//! - Listing a user's completed sessions
//! - Reconciling stuck sessions (cleanup, abandon, status)
//! - Dry-run scoring of a saved transcript
//!
//! Uses XDG Base Directory specification for file locations:
//! - Database: $XDG_DATA_HOME/novax/ledger.db (~/.local/share/novax/ledger.db)
//! - Config: $XDG_CONFIG_HOME/novax/config.toml (~/.config/novax/config.toml)

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use novax_core::transcript::{create_transcript_buffer, render_transcript};
use novax_core::{
    create_scoring_gateway, Config, Database, Error, LevelSchedule, Role, Score, ScoringGateway,
    SessionId, SessionLifecycle, TranscriptEntry, UserId,
};
use serde_json::json;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "novax-admin")]
#[command(about = "Inspect and reconcile novax tutoring sessions")]
#[command(version)]
struct Args {
    /// Output format
    #[arg(short, long, value_enum, default_value = "text", global = true)]
    format: OutputFormat,

    /// Write logs to the XDG state directory
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Show the experience needed for each level
    Levels {
        /// Number of levels to show
        #[arg(short, long, default_value_t = 10)]
        count: u32,
    },

    /// Show a user's experience totals and level progress
    Dashboard {
        #[arg(short, long)]
        user: UserId,
    },

    /// List a user's completed sessions with their score breakdown
    History {
        #[arg(short, long)]
        user: UserId,
    },

    /// Discard every in-progress session of a user
    Cleanup {
        #[arg(short, long)]
        user: UserId,
    },

    /// Discard one in-progress session
    Abandon {
        #[arg(short, long)]
        session: SessionId,
    },

    /// Show a session's durable status and buffered transcript
    Status {
        #[arg(short, long)]
        session: SessionId,
    },

    /// Score a transcript file without storing anything
    Assess {
        /// One entry per line, as JSON `{"role": .., "content": ..}` or `role: content`
        #[arg(long)]
        file: PathBuf,
    },
}

/// Gateway for commands that never score.
struct ScoringDisabled;

impl ScoringGateway for ScoringDisabled {
    fn assess(&self, _transcript: &str) -> novax_core::Result<Vec<Score>> {
        Err(Error::Config(
            "scoring is not available from this command".to_string(),
        ))
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let config = Config::load().context("failed to load configuration")?;

    // Initialize logging if verbose
    let _log_guard = if args.verbose {
        Some(novax_core::logging::init(&config.logging).context("failed to initialize logging")?)
    } else {
        None
    };

    let schedule =
        LevelSchedule::from_config(&config.leveling).context("invalid leveling configuration")?;

    let format = args.format;
    match args.command {
        Command::Levels { count } => cmd_levels(&schedule, count, format),
        Command::Assess { file } => cmd_assess(&config, &schedule, &file, format),
        Command::Dashboard { user } => {
            cmd_dashboard(&open_lifecycle(&config, schedule)?, user, format)
        }
        Command::History { user } => cmd_history(&open_lifecycle(&config, schedule)?, user, format),
        Command::Cleanup { user } => cmd_cleanup(&open_lifecycle(&config, schedule)?, user, format),
        Command::Abandon { session } => {
            cmd_abandon(&open_lifecycle(&config, schedule)?, session, format)
        }
        Command::Status { session } => {
            cmd_status(&open_lifecycle(&config, schedule)?, session, format)
        }
    }
}

fn open_lifecycle(config: &Config, schedule: LevelSchedule) -> Result<SessionLifecycle> {
    let db_path = Config::database_path();
    let db = Database::open(&db_path).context("failed to open database")?;
    db.migrate().context("failed to run database migrations")?;

    let buffer =
        create_transcript_buffer(&config.transcript).context("failed to open transcript buffer")?;

    Ok(SessionLifecycle::new(
        Arc::new(db),
        buffer,
        Arc::new(ScoringDisabled),
        schedule,
    ))
}

fn print_json(value: &impl serde::Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn cmd_levels(schedule: &LevelSchedule, count: u32, format: OutputFormat) -> Result<()> {
    let rows: Vec<_> = (1..=count.max(1))
        .map(|level| (level, schedule.level_to_exp(level), schedule.threshold(level)))
        .collect();

    if format == OutputFormat::Json {
        let rows: Vec<_> = rows
            .iter()
            .map(|(level, reach, clear)| {
                json!({ "level": level, "exp_to_reach": reach, "exp_to_clear": clear })
            })
            .collect();
        return print_json(&json!({
            "base_exp": schedule.base_exp(),
            "step_exp": schedule.step_exp(),
            "levels": rows,
        }));
    }

    println!(
        "Level schedule (base {}, step {})",
        schedule.base_exp(),
        schedule.step_exp()
    );
    println!("{:>6}  {:>12}  {:>12}", "Level", "Reach at", "To clear");
    for (level, reach, clear) in rows {
        println!("{:>6}  {:>12}  {:>12}", level, reach, clear);
    }
    Ok(())
}

fn cmd_dashboard(lifecycle: &SessionLifecycle, user: UserId, format: OutputFormat) -> Result<()> {
    let report = lifecycle
        .experience(user)
        .context("failed to load experience")?;

    if format == OutputFormat::Json {
        return print_json(&report);
    }

    let progress = &report.progress;
    println!("User {}", report.user_id);
    println!("  Level:       {}", progress.level);
    println!("  Total EXP:   {}", progress.total_exp);
    println!(
        "  Progress:    {} / {} ({} to next level)",
        progress.exp_into_level,
        progress.next_level_exp - progress.level_floor_exp,
        progress.exp_to_next_level
    );

    if report.by_dimension.is_empty() {
        println!();
        println!("No completed sessions yet.");
        return Ok(());
    }

    println!();
    println!("  By dimension:");
    for (dimension, exp) in &report.by_dimension {
        println!("    {:<14} {:>8}", dimension, exp);
    }
    Ok(())
}

fn cmd_history(lifecycle: &SessionLifecycle, user: UserId, format: OutputFormat) -> Result<()> {
    let sessions = lifecycle
        .completed_sessions(user)
        .context("failed to load completed sessions")?;

    if format == OutputFormat::Json {
        return print_json(&sessions);
    }

    if sessions.is_empty() {
        println!("No completed sessions for user {}.", user);
        return Ok(());
    }

    println!("Completed sessions for user {}:", user);
    for session in &sessions {
        let completed = session
            .completed_at
            .map(|at| at.format("%Y-%m-%d %H:%M").to_string())
            .unwrap_or_else(|| "-".to_string());
        println!(
            "  #{:<6} topic {:<6} {}  {} exp",
            session.id, session.topic_id, completed, session.total_exp
        );
        let breakdown = session
            .breakdown
            .iter()
            .map(|(dimension, exp)| format!("{dimension}={exp}"))
            .collect::<Vec<_>>()
            .join(" ");
        println!("          {}", breakdown);
    }
    Ok(())
}

fn cmd_cleanup(lifecycle: &SessionLifecycle, user: UserId, format: OutputFormat) -> Result<()> {
    let evicted = lifecycle
        .cleanup_stale(user)
        .context("failed to clean up sessions")?;

    if format == OutputFormat::Json {
        return print_json(&json!({ "user_id": user, "evicted": evicted }));
    }
    println!("Evicted {} in-progress session(s) for user {}.", evicted, user);
    Ok(())
}

fn cmd_abandon(lifecycle: &SessionLifecycle, session: SessionId, format: OutputFormat) -> Result<()> {
    let before = lifecycle.durable_status(session)?;
    lifecycle
        .abandon(session)
        .context("failed to abandon session")?;
    let after = lifecycle.durable_status(session)?;
    let discarded = before.is_some() && after.is_none();

    if format == OutputFormat::Json {
        return print_json(&json!({ "session_id": session, "discarded": discarded }));
    }
    if discarded {
        println!("Session {} abandoned.", session);
    } else if let Some(status) = after {
        println!("Session {} is {} and was kept.", session, status.as_str());
    } else {
        println!("Session {} does not exist; nothing to do.", session);
    }
    Ok(())
}

fn cmd_status(lifecycle: &SessionLifecycle, session: SessionId, format: OutputFormat) -> Result<()> {
    let durable = lifecycle.durable_status(session)?;
    let buffered = lifecycle.status(session)?;
    let summary = lifecycle.session_summary(session)?;

    if format == OutputFormat::Json {
        return print_json(&json!({
            "session_id": session,
            "status": durable.map(|s| s.as_str()),
            "buffered": buffered,
            "summary": summary,
        }));
    }

    println!("Session {}", session);
    println!(
        "  Ledger:      {}",
        durable.map(|s| s.as_str()).unwrap_or("(none)")
    );
    println!("  Buffered:    {}", buffered);
    if let Some(summary) = summary {
        println!("  Messages:    {}", summary.message_count);
        for line in &summary.preview {
            println!("    {}", line);
        }
    }
    Ok(())
}

fn cmd_assess(
    config: &Config,
    schedule: &LevelSchedule,
    file: &Path,
    format: OutputFormat,
) -> Result<()> {
    let raw = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read transcript {}", file.display()))?;
    let entries = parse_transcript_file(&raw)?;
    if entries.is_empty() {
        anyhow::bail!("transcript {} has no entries", file.display());
    }

    let gateway = create_scoring_gateway(config).context("failed to set up scoring")?;
    let scores = gateway
        .assess(&render_transcript(&entries))
        .context("assessment failed")?;
    let session_exp: u64 = scores.iter().map(|s| u64::from(s.value)).sum();

    if format == OutputFormat::Json {
        return print_json(&json!({
            "message_count": entries.len(),
            "scores": scores,
            "session_exp": session_exp,
            "level_if_first": schedule.exp_to_level(session_exp),
        }));
    }

    println!("Assessed {} message(s):", entries.len());
    for score in &scores {
        println!("  {:<14} {:>3}", score.dimension, score.value);
    }
    println!("  {:<14} {:>3}", "Total", session_exp);
    Ok(())
}

fn parse_transcript_file(raw: &str) -> Result<Vec<TranscriptEntry>> {
    raw.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            if let Ok(entry) = serde_json::from_str::<TranscriptEntry>(line) {
                return Ok(entry);
            }
            let (role, content) = line
                .split_once(':')
                .with_context(|| format!("line {}: expected `role: content`", idx + 1))?;
            let role: Role = role
                .trim()
                .parse()
                .map_err(|e| anyhow::anyhow!("line {}: {}", idx + 1, e))?;
            Ok(TranscriptEntry::new(role, content.trim_start()))
        })
        .collect()
}
