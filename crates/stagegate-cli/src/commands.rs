use crate::config::TrackerConfig;
use crate::roster::{load_roster, recording_at};
use anyhow::{bail, Context, Result};
use clap::{Args, Subcommand};
use serde_json::json;
use stagegate_core::{GateVerdict, StageStatus, Tracker, VideoSummary};
use stagegate_storage::SqliteStore;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::info;

/// Exit status for a gate that is not (yet) satisfied. Distinct from the
/// status 1 that errors returned from `main` produce.
const EXIT_NOT_COMPLETE: u8 = 3;

#[derive(Subcommand, Debug)]
#[command(rename_all = "kebab-case")]
pub enum Command {
    /// Create the store and register every recording in the roster
    Init(InitArgs),
    /// Record one stage event and re-project the recording
    Record(RecordArgs),
    /// Check whether a single stage is complete
    Check(CheckArgs),
    /// Check every prerequisite of a stage against the dependency table
    Gate(GateArgs),
    /// Show per-stage completion summaries
    Status(StatusArgs),
    /// Show the event log of one recording
    History(HistoryArgs),
    /// Re-derive summaries from the event log
    Reproject(ReprojectArgs),
}

#[derive(Args, Debug)]
pub struct VideoArgs {
    /// Recording name; repeatable
    #[arg(long = "recording", value_name = "NAME")]
    pub recordings: Vec<String>,
    /// Zero-based roster index; repeatable
    #[arg(long = "id", value_name = "INDEX")]
    pub ids: Vec<usize>,
    /// Roster used to resolve --id (defaults to the configured roster)
    #[arg(long)]
    pub roster: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct InitArgs {
    #[arg(long)]
    pub roster: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct RecordArgs {
    #[command(flatten)]
    pub videos: VideoArgs,
    /// Stage as step_<n>, <n> or stage name
    #[arg(long)]
    pub step: String,
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u8).range(0..=1))]
    pub status: u8,
}

#[derive(Args, Debug)]
pub struct CheckArgs {
    #[command(flatten)]
    pub videos: VideoArgs,
    #[arg(long)]
    pub step: String,
}

#[derive(Args, Debug)]
pub struct GateArgs {
    #[command(flatten)]
    pub videos: VideoArgs,
    #[arg(long)]
    pub step: String,
    /// Activate a conditional prerequisite set (e.g. mono_depth); repeatable
    #[arg(long = "when", value_name = "CONDITION")]
    pub conditions: Vec<String>,
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct StatusArgs {
    #[arg(long)]
    pub recording: Option<String>,
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct HistoryArgs {
    #[arg(long)]
    pub recording: String,
    #[arg(long)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct ReprojectArgs {
    #[arg(long)]
    pub recording: Option<String>,
}

pub struct CommandContext {
    pub config: TrackerConfig,
    pub store_path: PathBuf,
}

impl CommandContext {
    fn open(&self) -> Result<Tracker<SqliteStore>> {
        let store = SqliteStore::open_with_timeout(
            &self.store_path,
            self.config.catalog()?,
            self.config.busy_timeout(),
        )
        .with_context(|| {
            format!(
                "failed to open tracker store at {}",
                self.store_path.display()
            )
        })?;
        Ok(Tracker::new(store))
    }

    fn roster_path(&self, explicit: Option<&Path>) -> Result<PathBuf> {
        explicit
            .map(Path::to_path_buf)
            .or_else(|| self.config.roster.path.clone())
            .context("no roster given: pass --roster or set [roster] path in the config")
    }

    fn resolve_videos(&self, args: &VideoArgs) -> Result<Vec<String>> {
        let mut videos = args.recordings.clone();
        if !args.ids.is_empty() {
            let path = self.roster_path(args.roster.as_deref())?;
            let roster = load_roster(&path, &self.config.roster.column)?;
            for index in &args.ids {
                videos.push(recording_at(&roster, *index)?.to_string());
            }
        }
        if videos.is_empty() {
            bail!("no recording given: pass --recording or --id");
        }
        Ok(videos)
    }
}

pub fn handle_command(command: Command, ctx: &CommandContext) -> Result<ExitCode> {
    match command {
        Command::Init(args) => handle_init(args, ctx),
        Command::Record(args) => handle_record(args, ctx),
        Command::Check(args) => handle_check(args, ctx),
        Command::Gate(args) => handle_gate(args, ctx),
        Command::Status(args) => handle_status(args, ctx),
        Command::History(args) => handle_history(args, ctx),
        Command::Reproject(args) => handle_reproject(args, ctx),
    }
}

fn handle_init(args: InitArgs, ctx: &CommandContext) -> Result<ExitCode> {
    let path = ctx.roster_path(args.roster.as_deref())?;
    let roster = load_roster(&path, &ctx.config.roster.column)?;
    let tracker = ctx.open()?;
    let report = tracker.initialize(&roster)?;
    info!(
        event = "store_initialized",
        store = %ctx.store_path.display(),
        roster = %path.display(),
        inserted = report.inserted
    );
    println!(
        "Initialized {}: {} recordings ({} new, {} already present).",
        ctx.store_path.display(),
        report.requested,
        report.inserted,
        report.already_present()
    );
    Ok(ExitCode::SUCCESS)
}

fn handle_record(args: RecordArgs, ctx: &CommandContext) -> Result<ExitCode> {
    let videos = ctx.resolve_videos(&args.videos)?;
    let [video] = videos.as_slice() else {
        bail!("record takes exactly one recording, got {}", videos.len());
    };
    let status = StageStatus::from(args.status == 1);
    let tracker = ctx.open()?;
    let stage = tracker.catalog().parse(&args.step)?;
    let flags = tracker.record_and_project(video, stage, status)?;
    println!(
        "Updated {stage} status to {} for recording {video} ({}/{} stages complete).",
        status.as_i64(),
        flags.completed_count(),
        flags.len()
    );
    if !status.is_complete() && flags.get(stage) {
        println!("Note: {stage} stays complete; earlier completion events are not undone.");
    }
    Ok(ExitCode::SUCCESS)
}

fn handle_check(args: CheckArgs, ctx: &CommandContext) -> Result<ExitCode> {
    let videos = ctx.resolve_videos(&args.videos)?;
    let tracker = ctx.open()?;
    let stage = tracker.catalog().parse(&args.step)?;
    match tracker.first_incomplete(stage, &videos)? {
        None => {
            println!("{stage} is complete for {} recording(s).", videos.len());
            Ok(ExitCode::SUCCESS)
        }
        Some(video) => {
            eprintln!("{stage} is not done yet for video {video}. Check the stage log.");
            Ok(ExitCode::from(EXIT_NOT_COMPLETE))
        }
    }
}

fn handle_gate(args: GateArgs, ctx: &CommandContext) -> Result<ExitCode> {
    let videos = ctx.resolve_videos(&args.videos)?;
    let table = ctx.config.dependency_table()?;
    let tracker = ctx.open()?;
    let stage = tracker.catalog().parse(&args.step)?;
    let conditions: BTreeSet<String> = args
        .conditions
        .iter()
        .map(|condition| condition.trim().to_string())
        .collect();
    let verdict = tracker.evaluate(&table, stage, &videos, &conditions)?;

    if args.json {
        let payload = json!({ "stage": stage, "videos": videos, "result": verdict });
        println!("{}", serde_json::to_string_pretty(&payload)?);
    }
    match verdict {
        GateVerdict::Admitted => {
            if !args.json {
                println!("{stage} may run for {} recording(s).", videos.len());
            }
            Ok(ExitCode::SUCCESS)
        }
        GateVerdict::Blocked { unmet } => {
            for missing in &unmet {
                eprintln!("{stage} blocked: {missing}");
            }
            Ok(ExitCode::from(EXIT_NOT_COMPLETE))
        }
    }
}

fn handle_status(args: StatusArgs, ctx: &CommandContext) -> Result<ExitCode> {
    let tracker = ctx.open()?;
    let summaries = match args.recording.as_deref() {
        Some(video) => vec![tracker.summary(video)?],
        None => tracker.summaries()?,
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summaries)?);
        return Ok(ExitCode::SUCCESS);
    }
    if summaries.is_empty() {
        println!("No recordings registered in {}.", ctx.store_path.display());
        return Ok(ExitCode::SUCCESS);
    }
    let header = tracker
        .catalog()
        .iter()
        .map(|stage| stage.column())
        .collect::<Vec<String>>()
        .join(" ");
    println!("{:<32} {header} total", "recording");
    for summary in &summaries {
        println!("{}", status_line(summary));
    }
    Ok(ExitCode::SUCCESS)
}

fn status_line(summary: &VideoSummary) -> String {
    let cells = summary
        .flags
        .as_slice()
        .iter()
        .map(|done| format!("{:<6}", if *done { "x" } else { "." }))
        .collect::<Vec<String>>()
        .join(" ");
    format!(
        "{:<32} {cells} {}",
        summary.video,
        summary.completed_count()
    )
}

fn handle_history(args: HistoryArgs, ctx: &CommandContext) -> Result<ExitCode> {
    let tracker = ctx.open()?;
    let history = tracker.history(&args.recording)?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&history)?);
        return Ok(ExitCode::SUCCESS);
    }
    if history.is_empty() {
        println!("No events recorded for {}.", args.recording);
        return Ok(ExitCode::SUCCESS);
    }
    for event in &history {
        println!(
            "#{:<6} {} {:<8} {:<10} {}",
            event.id,
            event.changed_at.to_rfc3339(),
            event.stage.to_string(),
            event.status.to_string(),
            tracker.catalog().name(event.stage)
        );
    }
    Ok(ExitCode::SUCCESS)
}

fn handle_reproject(args: ReprojectArgs, ctx: &CommandContext) -> Result<ExitCode> {
    let tracker = ctx.open()?;
    match args.recording.as_deref() {
        Some(video) => {
            let flags = tracker.project(video)?;
            println!(
                "Re-projected {video}: {}/{} stages complete.",
                flags.completed_count(),
                flags.len()
            );
        }
        None => {
            let count = tracker.reproject_all()?;
            println!("Re-projected {count} recording(s).");
        }
    }
    Ok(ExitCode::SUCCESS)
}
