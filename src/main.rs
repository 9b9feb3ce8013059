use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use labflow::auth::Actor;
use labflow::config::{Settings, DEFAULT_CONFIG_PATH};
use labflow::model::{DesignId, RoutineId, RunId, StageId, StationId, UserId};
use labflow::reconcile::SpreadsheetFormat;
use labflow::registry::StationSpec;
use labflow::station::{MonitorEvent, MonitorKind, ReqwestTransport, StopReason};
use labflow::store::Store;
use labflow::{logging, LabService};

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(name = "labflow")]
#[command(about = "Experiment designs, station routine sync and run dispatch", long_about = None)]
struct Cli {
    /// Configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_PATH)]
    config: PathBuf,
    /// Acting user id
    #[arg(long, default_value_t = 1)]
    user: u64,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Manage stations
    #[command(subcommand)]
    Station(StationCommands),
    /// Manage routines
    #[command(subcommand)]
    Routines(RoutineCommands),
    /// Create a design for a station
    Design {
        /// Design name
        name: String,
        /// Station id
        station: u64,
    },
    /// Add a stage to a design
    Stage {
        design: u64,
        /// Stage name
        name: String,
        /// Routine id, must be available on the design's station
        routine: u64,
    },
    /// Write a stage's runs to a spreadsheet
    Export {
        stage: u64,
        #[command(flatten)]
        scope: ScopeArgs,
        /// Output file, .xlsx or .csv (defaults to the generated .xlsx name)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Create or update runs of a stage from a .xlsx or .csv file
    Import {
        stage: u64,
        file: PathBuf,
        #[command(flatten)]
        scope: ScopeArgs,
    },
    /// Send runs of a stage to its station
    Push {
        stage: u64,
        /// Run ids to send (defaults to every run of the stage)
        #[arg(long, value_delimiter = ',')]
        runs: Vec<u64>,
    },
    /// Show the status of one or all stations
    Overview { station: Option<u64> },
    /// Stream live station data as server-sent events
    Monitor {
        station: u64,
        /// Poll the run tables instead of the status updates
        #[arg(long)]
        run_tables: bool,
        /// Stop after this many events
        #[arg(long)]
        count: Option<usize>,
    },
}

#[derive(Subcommand)]
enum StationCommands {
    /// Register a station
    Add {
        #[arg(long)]
        name: String,
        /// host:port
        #[arg(long)]
        address: String,
        #[arg(long)]
        api_key: Option<String>,
        #[arg(long)]
        location: Option<String>,
    },
    /// List registered stations and their routines
    List,
}

#[derive(Subcommand)]
enum RoutineCommands {
    /// Import the station's experiment types
    Sync { station: u64 },
}

#[derive(Args)]
struct ScopeArgs {
    /// Include static parameters
    #[arg(long)]
    all: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let settings = Settings::load_from(&cli.config)
        .with_context(|| format!("loading {}", cli.config.display()))?;
    logging::init(&settings.application);

    let snapshot = settings.store.snapshot_path.clone();
    let store = Arc::new(Store::load_snapshot(&snapshot)?);
    let transport = Arc::new(ReqwestTransport::new(settings.station.request_timeout())?);
    let service = LabService::new(store.clone(), transport, &settings);
    // Local operator: owns what they create and administers the catalog.
    let actor = Actor::admin(UserId(cli.user));

    let mutated = run(cli.command, &service, &actor).await?;
    if mutated {
        store.save_snapshot(&snapshot)?;
    }
    Ok(())
}

async fn run(command: Commands, service: &LabService, actor: &Actor) -> Result<bool> {
    match command {
        Commands::Station(StationCommands::Add {
            name,
            address,
            api_key,
            location,
        }) => {
            let station = service.add_station(
                actor,
                StationSpec {
                    name,
                    address,
                    api_key,
                    location,
                },
            )?;
            println!("station {} added ({})", station.id, station.address);
            Ok(true)
        }
        Commands::Station(StationCommands::List) => {
            for station in service.registry().stations()? {
                let routines = service.registry().routine_names(station.id)?;
                println!(
                    "{:>4}  {:<20} {:<22} {}",
                    station.id,
                    station.name,
                    station.address,
                    routines.join(", ")
                );
            }
            Ok(false)
        }
        Commands::Routines(RoutineCommands::Sync { station }) => {
            let report = service.sync_routines(actor, StationId(station)).await?;
            for (id, name) in &report.created {
                println!("created routine {id}: {name}");
            }
            for name in &report.skipped {
                println!("skipped existing routine: {name}");
            }
            Ok(!report.created.is_empty())
        }
        Commands::Design { name, station } => {
            let design = service
                .designs()
                .add_design(actor, &name, StationId(station))?;
            println!("design {} created", design.id);
            Ok(true)
        }
        Commands::Stage {
            design,
            name,
            routine,
        } => {
            let stage = service.designs().add_stage(
                actor,
                DesignId(design),
                &name,
                RoutineId(routine),
            )?;
            println!("stage {} created", stage.id);
            Ok(true)
        }
        Commands::Export {
            stage,
            scope,
            output,
        } => {
            let format = output
                .as_deref()
                .and_then(|p| p.to_str())
                .and_then(SpreadsheetFormat::from_filename)
                .unwrap_or_default();
            let export =
                service.download_stage_as(actor, StageId(stage), !scope.all, format)?;
            let path = output.unwrap_or_else(|| PathBuf::from(&export.filename));
            std::fs::write(&path, &export.bytes)
                .with_context(|| format!("writing {}", path.display()))?;
            println!("wrote {}", path.display());
            Ok(false)
        }
        Commands::Import { stage, file, scope } => {
            let bytes =
                std::fs::read(&file).with_context(|| format!("reading {}", file.display()))?;
            let filename = file
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let summary =
                service.upload_stage(actor, StageId(stage), &filename, &bytes, !scope.all)?;
            println!(
                "{} runs created, {} runs updated",
                summary.created.len(),
                summary.updated.len()
            );
            Ok(true)
        }
        Commands::Push { stage, runs } => {
            let report = if runs.is_empty() {
                service.send_stage(actor, StageId(stage)).await?
            } else {
                let ids: Vec<RunId> = runs.into_iter().map(RunId).collect();
                service.send_runs(actor, StageId(stage), &ids).await?
            };
            println!(
                "{} sent, {} failed, {} ignored",
                report.sent.len(),
                report.failed.len(),
                report.ignored.len()
            );
            for (run, reason) in &report.failed {
                eprintln!("run {run}: {reason}");
            }
            Ok(!report.sent.is_empty())
        }
        Commands::Overview { station } => {
            let overviews = match station {
                Some(id) => {
                    let station = service.registry().station(StationId(id))?;
                    let overview = service.client().station_overview(station.id).await?;
                    vec![(station, overview)]
                }
                None => service.client().overview_all().await?,
            };
            for (station, overview) in overviews {
                println!(
                    "{:>4}  {:<20} {}",
                    station.id,
                    station.name,
                    serde_json::to_string(&overview)?
                );
            }
            Ok(false)
        }
        Commands::Monitor {
            station,
            run_tables,
            count,
        } => {
            let kind = if run_tables {
                MonitorKind::RunTables
            } else {
                MonitorKind::Updates
            };
            let mut handle = service.client().monitor(StationId(station), kind)?;
            let mut seen = 0usize;
            loop {
                tokio::select! {
                    event = handle.next() => match event {
                        Some(event @ MonitorEvent::Payload(_)) => {
                            if let Some(frame) = event.to_sse() {
                                print!("{frame}");
                            }
                            seen += 1;
                            if count.is_some_and(|limit| seen >= limit) {
                                break;
                            }
                        }
                        Some(MonitorEvent::Stopped(StopReason::TooManyFailures { failures, last_error })) => {
                            anyhow::bail!("monitor stopped after {failures} failures: {last_error}");
                        }
                        Some(MonitorEvent::Stopped(StopReason::Cancelled)) | None => break,
                    },
                    _ = tokio::signal::ctrl_c() => break,
                }
            }
            handle.shutdown().await;
            Ok(false)
        }
    }
}
