use std::fs;
use std::process::ExitCode;

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use clap::{Args, Parser, Subcommand};
use miette::IntoDiagnostic;
use serde_json::{Map, Value};
use tracing_subscriber::EnvFilter;

use kira_sample_manager::app::{Annotation, App, LoadRequest, ProgressSink};
use kira_sample_manager::config::{ConfigLoader, ResolvedConfig};
use kira_sample_manager::document::SampleDocument;
use kira_sample_manager::domain::{now_millis, parse_timestamp};
use kira_sample_manager::error::KiraError;
use kira_sample_manager::output::{JsonOutput, OutputMode, TextOutput};
use kira_sample_manager::scanner::CancelFlag;
use kira_sample_manager::timeline::ReassignDirection;

#[derive(Parser)]
#[command(name = "kira-sm")]
#[command(about = "NMR sample lifecycle tracking and acquisition timeline reconciliation")]
#[command(version, author)]
struct Cli {
    #[arg(long, global = true)]
    non_interactive: bool,

    #[arg(long, global = true)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(about = "Manage sample records of a dataset directory")]
    Sample(SampleArgs),
    #[command(about = "Sample and experiment timeline of a dataset directory")]
    Timeline(TimelineArgs),
    #[command(about = "Find sample records under the search roots")]
    Scan(ScanArgs),
    #[command(about = "Upgrade a sample record to the latest schema")]
    Migrate(MigrateArgs),
    #[command(about = "Manage configured search roots")]
    Roots(RootsArgs),
}

#[derive(Args)]
struct SampleArgs {
    #[command(subcommand)]
    command: SampleCommand,
}

#[derive(Subcommand)]
enum SampleCommand {
    #[command(about = "List sample records with their status")]
    List { directory: Utf8PathBuf },
    #[command(about = "Show one sample record")]
    Show { path: Utf8PathBuf },
    #[command(about = "Show the active sample")]
    Active { directory: Utf8PathBuf },
    #[command(about = "Create a sample record from a JSON payload")]
    New(NewArgs),
    #[command(about = "Create a copy of the most recent sample")]
    Duplicate {
        directory: Utf8PathBuf,
        #[arg(long)]
        at: Option<String>,
    },
    #[command(about = "Mark a sample as ejected")]
    Eject { path: Utf8PathBuf },
    #[command(about = "Eject whichever sample is active")]
    EjectActive { directory: Utf8PathBuf },
    #[command(about = "Delete an ejected sample record")]
    Delete { path: Utf8PathBuf },
    #[command(about = "Eject the active sample and record a newly loaded one")]
    Load(LoadArgs),
}

#[derive(Args)]
struct NewArgs {
    directory: Utf8PathBuf,

    #[arg(long = "from")]
    payload: Utf8PathBuf,

    #[arg(long)]
    at: Option<String>,
}

#[derive(Args)]
struct LoadArgs {
    directory: Utf8PathBuf,

    #[arg(long)]
    position: Option<String>,

    #[arg(long = "new", conflicts_with = "duplicate")]
    payload: Option<Utf8PathBuf>,

    #[arg(long)]
    duplicate: bool,
}

#[derive(Args)]
struct TimelineArgs {
    #[command(subcommand)]
    command: TimelineCommand,
}

#[derive(Subcommand)]
enum TimelineCommand {
    #[command(about = "Print the merged timeline")]
    Show { directory: Utf8PathBuf },
    #[command(about = "Print experiments not covered by any sample")]
    Orphans { directory: Utf8PathBuf },
    #[command(about = "Absorb orphaned experiments into a neighbouring sample (lists candidates without --previous/--next)")]
    Reassign(ReassignArgs),
}

#[derive(Args)]
struct ReassignArgs {
    directory: Utf8PathBuf,

    #[arg(required = true)]
    experiments: Vec<u32>,

    #[arg(long, conflicts_with = "next")]
    previous: bool,

    #[arg(long)]
    next: bool,
}

#[derive(Args)]
struct ScanArgs {
    roots: Vec<Utf8PathBuf>,
}

#[derive(Args)]
struct MigrateArgs {
    path: Utf8PathBuf,

    #[arg(long)]
    write: bool,
}

#[derive(Args)]
struct RootsArgs {
    #[command(subcommand)]
    command: RootsCommand,
}

#[derive(Subcommand)]
enum RootsCommand {
    List,
    Add { path: String },
    Remove { path: String },
}

fn main() -> ExitCode {
    if let Err(report) = run() {
        eprintln!("{report:?}");
        if let Some(kira) = report.downcast_ref::<KiraError>() {
            return ExitCode::from(map_exit_code(kira));
        }
        return ExitCode::from(1);
    }
    ExitCode::SUCCESS
}

fn map_exit_code(error: &KiraError) -> u8 {
    match error {
        KiraError::DocumentNotFound(_)
        | KiraError::InvalidFilename(_)
        | KiraError::InvalidTimestamp(_)
        | KiraError::InvalidSelection(_)
        | KiraError::NoReassignTarget(_)
        | KiraError::SampleActive(_) => 2,
        _ => 1,
    }
}

fn run() -> miette::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let output_mode = if cli.non_interactive {
        OutputMode::NonInteractive
    } else {
        OutputMode::Interactive
    };

    let mut config = ConfigLoader::resolve(cli.config.as_deref())?;
    let app = App::new(config.store()?);

    match cli.command {
        Commands::Sample(args) => run_sample(args.command, &app, output_mode),
        Commands::Timeline(args) => run_timeline(args.command, &app, output_mode),
        Commands::Scan(args) => run_scan(args, &app, &config, output_mode),
        Commands::Migrate(args) => {
            let result = app.migrate_document(&args.path, args.write)?;
            emit(output_mode, &result, TextOutput::migrate(&result))
        }
        Commands::Roots(args) => run_roots(args.command, &mut config, output_mode),
    }
}

fn run_sample(command: SampleCommand, app: &App, output_mode: OutputMode) -> miette::Result<()> {
    match command {
        SampleCommand::List { directory } => {
            let result = app.list(&directory, sink(output_mode))?;
            emit(output_mode, &result, TextOutput::list(&result))
        }
        SampleCommand::Show { path } => {
            let result = app.show(&path)?;
            let lines = TextOutput::show(&result).into_diagnostic()?;
            emit(output_mode, &result, lines)
        }
        SampleCommand::Active { directory } => {
            let result = app.active(&directory)?;
            emit(output_mode, &result, TextOutput::active(&result))
        }
        SampleCommand::New(args) => {
            let payload = read_payload(&args.payload)?;
            let at = parse_at(args.at.as_deref())?;
            let result = app.create(&args.directory, payload, at)?;
            emit(output_mode, &result, TextOutput::sample(&result))
        }
        SampleCommand::Duplicate { directory, at } => {
            let at = parse_at(at.as_deref())?;
            let result = app.duplicate_last(&directory, at)?;
            emit(output_mode, &result, TextOutput::sample(&result))
        }
        SampleCommand::Eject { path } => {
            let result = app.eject(&path)?;
            emit(output_mode, &result, TextOutput::sample(&result))
        }
        SampleCommand::EjectActive { directory } => {
            let result = app.eject_active(&directory)?;
            emit(output_mode, &result, TextOutput::sample(&result))
        }
        SampleCommand::Delete { path } => {
            let result = app.delete(&path)?;
            emit(output_mode, &result, TextOutput::sample(&result))
        }
        SampleCommand::Load(args) => {
            let injected_at = now_millis();
            let annotation = match (args.payload, args.duplicate) {
                (Some(path), _) => {
                    Annotation::New(SampleDocument::from_payload(read_payload(&path)?))
                }
                (None, true) => Annotation::DuplicateLast,
                (None, false) => Annotation::Skip,
            };
            let request = LoadRequest {
                annotation,
                injected_at,
                position: args.position,
            };
            let result = app.load_sample(&args.directory, request)?;
            emit(output_mode, &result, TextOutput::load(&result))
        }
    }
}

fn run_timeline(command: TimelineCommand, app: &App, output_mode: OutputMode) -> miette::Result<()> {
    match command {
        TimelineCommand::Show { directory } => {
            let timeline = app.timeline(&directory, sink(output_mode))?;
            emit(output_mode, &timeline, TextOutput::timeline(&timeline))
        }
        TimelineCommand::Orphans { directory } => {
            let orphans = app.orphans(&directory)?;
            emit(output_mode, &orphans, TextOutput::events(&orphans))
        }
        TimelineCommand::Reassign(args) => {
            let direction = match (args.previous, args.next) {
                (true, _) => ReassignDirection::Previous,
                (false, true) => ReassignDirection::Next,
                (false, false) => {
                    let options = app.reassign_options(&args.directory, &args.experiments)?;
                    return emit(output_mode, &options, TextOutput::options(&options));
                }
            };
            let result = app.reassign(&args.directory, &args.experiments, direction)?;
            emit(output_mode, &result, TextOutput::reassignment(&result))
        }
    }
}

fn run_scan(
    args: ScanArgs,
    app: &App,
    config: &ResolvedConfig,
    output_mode: OutputMode,
) -> miette::Result<()> {
    let roots = if args.roots.is_empty() {
        config.search_roots.clone()
    } else {
        args.roots
    };
    if roots.is_empty() {
        return Err(miette::Report::msg(
            "no search roots (pass directories or use `kira-sm roots add`)",
        ));
    }
    let report = app.scan(&roots, CancelFlag::new(), sink(output_mode));
    emit(output_mode, &report, TextOutput::scan(&report))
}

fn run_roots(
    command: RootsCommand,
    config: &mut ResolvedConfig,
    output_mode: OutputMode,
) -> miette::Result<()> {
    match command {
        RootsCommand::List => {}
        RootsCommand::Add { path } => {
            config.add_search_root(&path)?;
        }
        RootsCommand::Remove { path } => {
            config.remove_search_root(&path)?;
        }
    }
    let lines = config
        .search_roots
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>();
    emit(output_mode, &config.search_roots, lines)
}

fn sink(output_mode: OutputMode) -> &'static dyn ProgressSink {
    match output_mode {
        OutputMode::Interactive => &TextOutput,
        OutputMode::NonInteractive => &JsonOutput,
    }
}

fn emit<T: serde::Serialize>(
    output_mode: OutputMode,
    value: &T,
    lines: Vec<String>,
) -> miette::Result<()> {
    match output_mode {
        OutputMode::NonInteractive => JsonOutput::print(value).into_diagnostic(),
        OutputMode::Interactive => TextOutput::print(&lines).into_diagnostic(),
    }
}

fn read_payload(path: &Utf8Path) -> miette::Result<Map<String, Value>> {
    let content = fs::read_to_string(path.as_std_path()).into_diagnostic()?;
    match serde_json::from_str::<Value>(&content).into_diagnostic()? {
        Value::Object(map) => Ok(map),
        _ => Err(miette::Report::msg(format!(
            "{path}: sample payload must be a JSON object"
        ))),
    }
}

fn parse_at(value: Option<&str>) -> miette::Result<Option<DateTime<Utc>>> {
    Ok(value.map(parse_timestamp).transpose()?)
}
