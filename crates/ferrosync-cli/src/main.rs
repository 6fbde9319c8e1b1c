//! FerroSync - scheduled FTP and local file synchronization
//!
//! Thin command-line front end over the scheduler: run the daemon, trigger schedules by
//! hand, manage schedule definitions and inspect run history.

mod display;
mod json_output;
mod progress;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use console::style;
use ferrosync_config::{Config, ConfigLoader, LoggingConfig};
use ferrosync_engine::{next_run, NextRunCalculator, Scheduler, TimeBasis};
use ferrosync_filter::{MatchOptions, Pattern};
use ferrosync_store::{MemoryStore, Retention};
use ferrosync_transport::{FtpTransportFactory, MemoryRemote, TransportOptions};
use ferrosync_types::{
    Connection, Endpoint, Frequency, HistoryQuery, RunRecord, Schedule, ScheduleOptions,
    ScheduleTime, TransportFactory,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_appender::non_blocking::WorkerGuard;

use display::{display_error, display_info, display_success, display_warning};
use json_output::{JsonOutput, MatchJson, MatchResultJson, NextRunJson, RunSummaryJson};

/// State file used when the configuration names none
const DEFAULT_STATE_FILE: &str = "ferrosync-state.json";

/// FerroSync - scheduled FTP and local file synchronization
#[derive(Parser)]
#[command(
    name = "ferrosync",
    version = env!("CARGO_PKG_VERSION"),
    about = "Scheduled FTP and local file synchronization",
    long_about = "FerroSync runs named sync jobs between FTP servers and local directories\n\
                  on hourly, daily, weekly or monthly schedules, retries transient failures\n\
                  and keeps an auditable history of every run."
)]
struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,

    /// Quiet mode - minimal output
    #[arg(short, long, global = true)]
    quiet: bool,

    /// Verbose mode - detailed output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Print machine-readable JSON
    #[arg(long, global = true)]
    json: bool,

    /// Use an empty in-memory server instead of real FTP connections
    #[arg(long, global = true)]
    dry_transport: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the scheduler until interrupted
    Daemon {
        /// Override the check interval in milliseconds
        #[arg(long)]
        interval_ms: Option<u64>,
    },
    /// Run a schedule now and wait for its outcome
    Run {
        /// Connection id
        connection: String,
        /// Schedule name
        name: String,
    },
    /// List schedules
    List {
        /// Only schedules of this connection
        #[arg(long)]
        connection: Option<String>,
    },
    /// Show run history, newest first
    History {
        /// Connection id
        connection: String,
        /// Only runs of this schedule
        name: Option<String>,
        /// Records per page
        #[arg(long, default_value = "20")]
        limit: usize,
        /// Records to skip
        #[arg(long, default_value = "0")]
        offset: usize,
    },
    /// Register or replace a connection
    AddConnection {
        /// Connection id
        id: String,
        /// Server host name
        host: String,
        /// Server port
        #[arg(long, default_value = "21")]
        port: u16,
        /// Login user
        #[arg(long, default_value = "anonymous")]
        user: String,
        /// Login password
        #[arg(long, default_value = "")]
        password: String,
        /// Use explicit FTPS
        #[arg(long)]
        secure: bool,
        /// Directory relative remote paths start from
        #[arg(long, default_value = "/")]
        default_path: String,
    },
    /// Create a schedule
    Add {
        /// Connection id
        connection: String,
        /// Schedule name
        name: String,
        /// Source, as ftp:<path> or local:<path>
        #[arg(long)]
        source: Endpoint,
        /// Destination, as ftp:<path> or local:<path>
        #[arg(long)]
        destination: Endpoint,
        /// manual, hourly, daily, weekly or monthly
        #[arg(long, default_value = "manual")]
        frequency: Frequency,
        /// Trigger time (HH:MM)
        #[arg(long)]
        time: Option<ScheduleTime>,
        /// Weekday for weekly schedules (0 = Sunday)
        #[arg(long)]
        day_of_week: Option<u8>,
        /// Day for monthly schedules (1-31)
        #[arg(long)]
        day_of_month: Option<u8>,
        /// File pattern; prefix with ! to exclude
        #[arg(long = "pattern")]
        patterns: Vec<String>,
        /// Replace existing destination files
        #[arg(long)]
        overwrite: bool,
        /// Delete source files after a successful transfer
        #[arg(long)]
        delete_after_sync: bool,
        /// Descend into subdirectories
        #[arg(long)]
        subfolders: bool,
        /// Create the schedule disabled
        #[arg(long)]
        disabled: bool,
    },
    /// Delete a schedule
    Remove {
        /// Connection id
        connection: String,
        /// Schedule name
        name: String,
        /// Do not ask for confirmation
        #[arg(short, long)]
        yes: bool,
    },
    /// Enable automatic runs of a schedule
    Enable {
        /// Connection id
        connection: String,
        /// Schedule name
        name: String,
    },
    /// Disable automatic runs of a schedule
    Disable {
        /// Connection id
        connection: String,
        /// Schedule name
        name: String,
    },
    /// Show upcoming trigger times for a frequency
    NextRun {
        /// manual, hourly, daily, weekly or monthly
        frequency: Frequency,
        /// Trigger time (HH:MM)
        #[arg(long)]
        time: Option<ScheduleTime>,
        /// Weekday (0 = Sunday)
        #[arg(long)]
        day_of_week: Option<u8>,
        /// Day of month (1-31)
        #[arg(long)]
        day_of_month: Option<u8>,
        /// Reference instant (RFC 3339), defaults to now
        #[arg(long)]
        from: Option<DateTime<Utc>>,
        /// Number of occurrences to show
        #[arg(long, default_value = "1")]
        count: usize,
    },
    /// Test file names against a pattern
    Match {
        /// Pattern to test
        pattern: String,
        /// Candidate file names or relative paths
        #[arg(required = true)]
        files: Vec<String>,
        /// Compare case-sensitively
        #[arg(long)]
        case_sensitive: bool,
        /// Do not let patterns match hidden files
        #[arg(long)]
        no_dot: bool,
    },
    /// Show configuration
    Config {
        /// Show default configuration
        #[arg(long)]
        default: bool,
        /// Write the default configuration to this file
        #[arg(long)]
        init: Option<PathBuf>,
    },
}

/// Store and scheduler opened for one command
struct App {
    config: Config,
    store: Arc<MemoryStore>,
    scheduler: Scheduler,
}

impl App {
    async fn open(config: Config, dry_transport: bool) -> Result<Self> {
        let state_file = config
            .storage
            .state_file
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_STATE_FILE));
        let store = Arc::new(
            MemoryStore::open(&state_file)
                .await
                .with_context(|| format!("Failed to open state file {}", state_file.display()))?
                .with_retention(Retention {
                    max_history: config.storage.max_history,
                    max_audit_events: config.storage.max_audit_events,
                }),
        );

        let transports: Arc<dyn TransportFactory> = if dry_transport {
            Arc::new(MemoryRemote::new())
        } else {
            Arc::new(FtpTransportFactory::new(TransportOptions::from(
                &config.transport,
            )))
        };
        let scheduler = Scheduler::from_config(&config, store.clone(), transports);

        Ok(Self {
            config,
            store,
            scheduler,
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = ConfigLoader::load(cli.config.as_deref()).context("Failed to load configuration")?;
    let _log_guard = init_logging(&cli, &config.logging)?;

    info!("FerroSync v{} starting", env!("CARGO_PKG_VERSION"));

    match cli.command {
        Commands::Daemon { interval_ms } => {
            let app = App::open(config, cli.dry_transport).await?;
            daemon_command(app, interval_ms, cli.quiet, cli.json).await?;
        }
        Commands::Run { connection, name } => {
            let app = App::open(config, cli.dry_transport).await?;
            run_command(&app, &connection, &name, cli.quiet, cli.json).await?;
        }
        Commands::List { connection } => {
            let app = App::open(config, cli.dry_transport).await?;
            let schedules = app.scheduler.list_schedules(connection.as_deref()).await?;
            if cli.json {
                JsonOutput::new("list", schedules).print()?;
            } else {
                display::display_schedules(&schedules);
            }
        }
        Commands::History {
            connection,
            name,
            limit,
            offset,
        } => {
            let app = App::open(config, cli.dry_transport).await?;
            let query = match name {
                Some(name) => {
                    let schedule = app.scheduler.get_schedule(&connection, &name).await?;
                    HistoryQuery::for_schedule(schedule.id)
                }
                None => HistoryQuery::for_connection(connection),
            }
            .page(limit, offset);
            let records = app.scheduler.history(&query).await?;
            if cli.json {
                JsonOutput::new("history", records).print()?;
            } else {
                display::display_history(&records);
            }
        }
        Commands::AddConnection {
            id,
            host,
            port,
            user,
            password,
            secure,
            default_path,
        } => {
            let app = App::open(config, cli.dry_transport).await?;
            let mut connection = Connection::new(id, host, user, password);
            connection.port = port;
            connection.secure = secure;
            connection.default_path = default_path;
            let address = connection.address();
            app.store.add_connection(connection).await?;
            display_success(&format!("Connection to {address} saved"));
        }
        Commands::Add {
            connection,
            name,
            source,
            destination,
            frequency,
            time,
            day_of_week,
            day_of_month,
            patterns,
            overwrite,
            delete_after_sync,
            subfolders,
            disabled,
        } => {
            let app = App::open(config, cli.dry_transport).await?;
            let mut schedule = Schedule::new(connection, name, source, destination, frequency)
                .with_options(ScheduleOptions {
                    delete_after_sync,
                    overwrite_existing: overwrite,
                    include_subfolders: subfolders,
                    file_patterns: patterns,
                });
            schedule.time = time;
            schedule.day_of_week = day_of_week;
            schedule.day_of_month = day_of_month;
            schedule.enabled = !disabled;

            let created = app.scheduler.create_schedule(schedule).await?;
            display_success(&format!("Schedule {} created", created.key()));
            if created.enabled && created.frequency != Frequency::Manual {
                display_info(&format!(
                    "Next run: {}",
                    display::format_time(created.next_run)
                ));
            }
        }
        Commands::Remove {
            connection,
            name,
            yes,
        } => {
            let app = App::open(config, cli.dry_transport).await?;
            let confirmed = yes
                || dialoguer::Confirm::new()
                    .with_prompt(format!("Delete schedule {connection}/{name}?"))
                    .default(false)
                    .interact()?;
            if confirmed {
                app.scheduler.delete_schedule(&connection, &name).await?;
                display_success(&format!("Schedule {connection}/{name} deleted"));
            } else {
                display_warning("Nothing deleted");
            }
        }
        Commands::Enable { connection, name } => {
            let app = App::open(config, cli.dry_transport).await?;
            let schedule = app.scheduler.set_enabled(&connection, &name, true).await?;
            display_success(&format!(
                "Schedule {} enabled, next run {}",
                schedule.key(),
                display::format_time(schedule.next_run)
            ));
        }
        Commands::Disable { connection, name } => {
            let app = App::open(config, cli.dry_transport).await?;
            let schedule = app.scheduler.set_enabled(&connection, &name, false).await?;
            display_success(&format!("Schedule {} disabled", schedule.key()));
        }
        Commands::NextRun {
            frequency,
            time,
            day_of_week,
            day_of_month,
            from,
            count,
        } => {
            next_run_command(
                &config,
                frequency,
                time,
                day_of_week,
                day_of_month,
                from,
                count,
                cli.json,
            )?;
        }
        Commands::Match {
            pattern,
            files,
            case_sensitive,
            no_dot,
        } => {
            let options = MatchOptions {
                case_sensitive,
                dot: !no_dot,
                debug: cli.debug,
                ..MatchOptions::default()
            };
            match_command(&pattern, &files, options, cli.json)?;
        }
        Commands::Config { default, init } => {
            config_command(&config, cli.config.as_deref(), default, init)?;
        }
    }

    Ok(())
}

fn init_logging(cli: &Cli, logging: &LoggingConfig) -> Result<Option<WorkerGuard>> {
    use tracing_subscriber::{fmt, EnvFilter};

    let level = if cli.debug {
        "debug"
    } else if cli.verbose {
        "info"
    } else if cli.quiet {
        "error"
    } else {
        logging.level.as_str()
    };

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .context("Invalid log filter")?;
    let builder = fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false);

    match &logging.log_file {
        Some(path) => {
            let directory = path
                .parent()
                .filter(|dir| !dir.as_os_str().is_empty())
                .map_or_else(|| PathBuf::from("."), PathBuf::from);
            let file_name = path
                .file_name()
                .context("Log file path has no file name")?;
            let (writer, guard) =
                tracing_appender::non_blocking(tracing_appender::rolling::never(directory, file_name));
            if logging.json_format {
                builder.json().with_writer(writer).init();
            } else {
                builder.with_ansi(false).with_writer(writer).init();
            }
            Ok(Some(guard))
        }
        None => {
            if logging.json_format {
                builder.json().with_writer(std::io::stderr).init();
            } else {
                builder.with_writer(std::io::stderr).init();
            }
            Ok(None)
        }
    }
}

async fn daemon_command(app: App, interval_ms: Option<u64>, quiet: bool, json: bool) -> Result<()> {
    let interval = interval_ms.map_or_else(|| app.config.scheduler.check_interval(), Duration::from_millis);
    let printer = tokio::spawn(progress::log_runs(app.scheduler.events().subscribe(), quiet || json));

    info!(
        state_file = ?app.store.snapshot_path(),
        max_concurrent_runs = app.config.scheduler.max_concurrent_runs,
        "Starting scheduler daemon"
    );
    app.scheduler.start(interval).await;
    if !quiet && !json {
        println!(
            "{} Scheduler running, checking every {}s (Ctrl-C to stop)",
            style("⟲").blue().bold(),
            interval.as_secs_f64()
        );
    }

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    app.scheduler.stop().await;

    let in_flight = app.scheduler.status().in_flight.len();
    if in_flight > 0 {
        if !quiet && !json {
            display_info(&format!("Waiting for {in_flight} in-flight runs"));
        }
        while !app.scheduler.status().in_flight.is_empty() {
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
    }
    printer.abort();

    app.store.flush().await?;
    let status = app.scheduler.status();
    if json {
        JsonOutput::new("daemon", status).print()?;
    } else if !quiet {
        display::display_status(&status);
    }
    Ok(())
}

async fn run_command(app: &App, connection: &str, name: &str, quiet: bool, json: bool) -> Result<()> {
    let mut events = app.scheduler.events().subscribe();
    let handle = app.scheduler.run_now(connection, name).await?;
    if !quiet && !json {
        println!(
            "{} Run of {} initiated",
            style("→").green().bold(),
            style(handle.key()).cyan()
        );
    }

    let mut progress = progress::RunProgress::new(handle.key().clone(), quiet || json);
    let wait = handle.wait();
    tokio::pin!(wait);
    let result = loop {
        tokio::select! {
            result = &mut wait => break result,
            event = events.recv() => {
                if let Ok(event) = event {
                    progress.observe(&event);
                }
            }
        }
    };
    progress.finish(result.is_ok());

    match result {
        Ok(record) => {
            if json {
                JsonOutput::new("run", RunSummaryJson::from(&record)).print()?;
            } else if !quiet {
                display::display_run_summary(&record);
            }
            Ok(())
        }
        Err(e) => {
            if json {
                if let Some(record) = latest_run(app, connection, name).await {
                    JsonOutput::new("run", RunSummaryJson::from(&record)).print()?;
                }
            } else {
                display_error(&format!("Run of {connection}/{name} failed"));
            }
            Err(e.into())
        }
    }
}

async fn latest_run(app: &App, connection: &str, name: &str) -> Option<RunRecord> {
    let schedule = app.scheduler.get_schedule(connection, name).await.ok()?;
    app.scheduler
        .history(&HistoryQuery::for_schedule(schedule.id).page(1, 0))
        .await
        .ok()?
        .into_iter()
        .next()
}

#[allow(clippy::too_many_arguments)]
fn next_run_command(
    config: &Config,
    frequency: Frequency,
    time: Option<ScheduleTime>,
    day_of_week: Option<u8>,
    day_of_month: Option<u8>,
    from: Option<DateTime<Utc>>,
    count: usize,
    json: bool,
) -> Result<()> {
    let from = from.unwrap_or_else(Utc::now);
    let calculator = NextRunCalculator::from_settings(&config.scheduler);

    let mut runs = Vec::with_capacity(count);
    let mut cursor = from;
    for _ in 0..count.max(1) {
        cursor = match calculator.basis() {
            TimeBasis::Utc => next_run(&cursor, frequency, time, day_of_week, day_of_month),
            TimeBasis::Local => next_run(
                &cursor.with_timezone(&chrono::Local),
                frequency,
                time,
                day_of_week,
                day_of_month,
            )
            .with_timezone(&Utc),
        };
        runs.push(cursor);
        if frequency == Frequency::Manual {
            break;
        }
    }

    if json {
        JsonOutput::new(
            "next-run",
            NextRunJson {
                frequency,
                from,
                manual: frequency == Frequency::Manual,
                runs,
            },
        )
        .print()?;
    } else {
        display::display_next_runs(frequency, &runs);
    }
    Ok(())
}

fn match_command(pattern: &str, files: &[String], options: MatchOptions, json: bool) -> Result<()> {
    let compiled = Pattern::new(pattern, options)?;
    let verdicts: Vec<_> = files
        .iter()
        .map(|file| (file.as_str(), compiled.explain(file)))
        .collect();

    if json {
        JsonOutput::new(
            "match",
            MatchJson {
                pattern: pattern.to_string(),
                results: verdicts
                    .iter()
                    .map(|(file, strategy)| MatchResultJson::new(file, *strategy))
                    .collect(),
            },
        )
        .print()?;
    } else {
        for (file, strategy) in verdicts {
            display::display_match(file, strategy);
        }
    }
    Ok(())
}

fn config_command(
    config: &Config,
    path: Option<&std::path::Path>,
    default: bool,
    init: Option<PathBuf>,
) -> Result<()> {
    if let Some(target) = init {
        if target.exists() {
            anyhow::bail!("{} already exists", target.display());
        }
        ConfigLoader::generate_default_config(&target)?;
        display_success(&format!("Default configuration written to {}", target.display()));
        return Ok(());
    }

    if default {
        println!("{} Default configuration:", style("⚙").blue().bold());
        print!("{}", serde_yaml::to_string(&Config::default())?);
    } else {
        let source = path
            .map(std::path::Path::to_path_buf)
            .or_else(ConfigLoader::config_exists);
        match source {
            Some(source) => println!(
                "{} Current configuration ({}):",
                style("⚙").blue().bold(),
                source.display()
            ),
            None => println!(
                "{} Current configuration (defaults, no file found):",
                style("⚙").blue().bold()
            ),
        }
        print!("{}", serde_yaml::to_string(config)?);
    }
    Ok(())
}
