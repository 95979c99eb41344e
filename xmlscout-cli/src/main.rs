use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use tracing::debug;
use tracing_subscriber::EnvFilter;
use xmlscout::{
    ConnectionConfig, FileSource, LayoutConfig, LocalTree, ProgressSnapshot, RemoteCatalog,
    SearchConfig, SearchCoordinator, SearchMode, SearchReport, StreamConfig,
};

#[derive(Parser)]
#[command(author, version, about = "Search date-partitioned XML archives", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Search an FTP archive or a local directory tree
    Search(Box<SearchArgs>),

    /// Verify that an FTP session can be established
    Check {
        /// Configuration file
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// FTP host
        #[arg(long)]
        host: Option<String>,

        /// FTP port
        #[arg(long, default_value = "21")]
        port: u16,

        /// FTP username
        #[arg(short, long)]
        username: Option<String>,

        /// FTP password
        #[arg(short = 'w', long)]
        password: Option<String>,
    },
}

#[derive(Parser)]
struct SearchArgs {
    /// Pattern to search for (can be specified multiple times)
    #[arg(short = 'p', long = "pattern")]
    patterns: Vec<String>,

    /// How patterns are interpreted
    #[arg(short = 'm', long, value_enum, default_value_t = CliMode::Text)]
    mode: CliMode,

    /// Match content case-sensitively
    #[arg(short = 'c', long)]
    case_sensitive: bool,

    /// Filename glob applied during discovery (e.g. "TCO_*.xml")
    #[arg(short = 'f', long)]
    file_pattern: Option<String>,

    /// First date directory, YYYYMMDD or YYYY-MM-DD
    #[arg(short = 's', long, value_parser = parse_date)]
    start_date: NaiveDate,

    /// Last date directory, YYYYMMDD or YYYY-MM-DD
    #[arg(short = 'e', long, value_parser = parse_date)]
    end_date: NaiveDate,

    /// Search this local directory instead of the FTP server
    #[arg(short = 'l', long)]
    local_root: Option<PathBuf>,

    /// Number of worker threads
    #[arg(short = 'j', long)]
    threads: Option<NonZeroUsize>,

    /// Report per-keyword occurrence counts instead of stopping at the
    /// first hit
    #[arg(short = 'a', long)]
    find_all: bool,

    /// Configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// FTP host
    #[arg(long)]
    host: Option<String>,

    /// FTP port
    #[arg(long, default_value = "21")]
    port: u16,

    /// FTP username
    #[arg(short, long)]
    username: Option<String>,

    /// FTP password
    #[arg(short = 'w', long)]
    password: Option<String>,

    /// Remote root directory holding the date directories
    #[arg(long)]
    source_directory: Option<String>,

    /// Emit results as JSON instead of a table
    #[arg(long)]
    json: bool,

    /// Disable the progress bar
    #[arg(short = 'q', long)]
    no_progress: bool,
}

#[derive(Clone, Copy, ValueEnum)]
enum CliMode {
    Text,
    Regex,
    Xpath,
    Filename,
}

impl From<CliMode> for SearchMode {
    fn from(mode: CliMode) -> Self {
        match mode {
            CliMode::Text => SearchMode::Text,
            CliMode::Regex => SearchMode::Regex,
            CliMode::Xpath => SearchMode::Xpath,
            CliMode::Filename => SearchMode::Filename,
        }
    }
}

fn parse_date(value: &str) -> Result<NaiveDate, String> {
    NaiveDate::parse_from_str(value, "%Y%m%d")
        .or_else(|_| NaiveDate::parse_from_str(value, "%Y-%m-%d"))
        .map_err(|_| format!("invalid date {:?}, expected YYYYMMDD or YYYY-MM-DD", value))
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Search(args) => run_search(*args),
        Commands::Check {
            config,
            host,
            port,
            username,
            password,
        } => run_check(config, host, port, username, password),
    }
}

fn init_logging(level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn build_config(args: &SearchArgs) -> Result<SearchConfig> {
    let mut connection = ConnectionConfig::default();
    if let Some(host) = &args.host {
        connection.host = host.clone();
    }
    connection.port = args.port;
    if let Some(username) = &args.username {
        connection.username = username.clone();
    }
    if let Some(password) = &args.password {
        connection.password = password.clone();
    }

    let mut layout = LayoutConfig::default();
    if let Some(source_directory) = &args.source_directory {
        layout.source_directory = source_directory.clone();
    }

    let cli_config = SearchConfig {
        patterns: args.patterns.clone(),
        mode: args.mode.into(),
        case_sensitive: args.case_sensitive,
        file_pattern: args.file_pattern.clone(),
        start_date: args.start_date,
        end_date: args.end_date,
        local_root: args.local_root.clone(),
        thread_count: args
            .threads
            .unwrap_or_else(|| NonZeroUsize::new(8).unwrap()),
        find_all: args.find_all,
        log_level: "warn".to_string(),
        connection,
        stream: StreamConfig::default(),
        layout,
    };

    let merged = if args.config.is_some() {
        SearchConfig::load_from(args.config.as_deref())
            .context("failed to load configuration file")?
            .merge_with_cli(cli_config)
    } else {
        match SearchConfig::load() {
            Ok(file_config) => file_config.merge_with_cli(cli_config),
            Err(e) => {
                debug!("no usable configuration file: {}", e);
                cli_config
            }
        }
    };
    Ok(merged)
}

fn run_search(args: SearchArgs) -> Result<()> {
    let show_progress = !args.no_progress && !args.json;
    let config = build_config(&args)?;
    init_logging(&config.log_level);

    let coordinator = SearchCoordinator::new(config.clone());
    let report = match &config.local_root {
        Some(root) => {
            let tree = LocalTree::new(
                root,
                config.start_date,
                config.end_date,
                config.file_pattern.clone(),
            )?;
            execute(&coordinator, &tree, show_progress)?
        }
        None => {
            if config.connection.host.is_empty() {
                bail!("no FTP host configured; pass --host or use --local-root");
            }
            let catalog = RemoteCatalog::new(
                config.connection.clone(),
                config.layout.clone(),
                config.start_date,
                config.end_date,
                config.file_pattern.clone(),
            );
            catalog
                .check_connection()
                .context("FTP connection check failed")?;
            execute(&coordinator, &catalog, show_progress)?
        }
    };

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report.matches)?);
    } else {
        print_report(&report);
    }
    Ok(())
}

fn execute(
    coordinator: &SearchCoordinator,
    source: &dyn FileSource,
    show_progress: bool,
) -> Result<SearchReport> {
    let bar = if show_progress {
        let bar = ProgressBar::new(0);
        bar.set_style(
            ProgressStyle::with_template(
                "{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} files {msg}",
            )?
            .progress_chars("=>-"),
        );
        bar.enable_steady_tick(Duration::from_millis(120));
        Some(bar)
    } else {
        None
    };

    let report = coordinator.run(source, |snapshot: &ProgressSnapshot| {
        if let Some(bar) = &bar {
            bar.set_length(snapshot.files_total as u64);
            bar.set_position(snapshot.files_processed as u64);
            bar.set_message(format!(
                "{}/{}",
                snapshot.current_directory, snapshot.current_file
            ));
        }
    })?;
    if let Some(bar) = &bar {
        bar.finish_and_clear();
    }
    Ok(report)
}

fn print_report(report: &SearchReport) {
    for record in &report.matches {
        println!("\n{}", record.file_path.blue());
        if record.occurrences > 0 {
            println!(
                "  {} {} ({} occurrences, first on line {})",
                record.kind.to_string().green(),
                record.matched,
                record.occurrences,
                record.line_number
            );
        } else if record.line_number > 0 {
            println!(
                "  {} line {}: {}",
                record.kind.to_string().green(),
                record.line_number,
                record.matched
            );
        } else {
            println!(
                "  {} {}",
                record.kind.to_string().green(),
                record.matched
            );
        }
    }

    let progress = &report.progress;
    for error in &progress.errors {
        eprintln!("{} {}", "warning:".yellow(), error);
    }
    if report.stopped {
        println!("\n{}", "Search stopped before completion".yellow());
    }
    println!(
        "\nFound {} matches in {} files ({} directories, {})",
        report.matches.len(),
        progress.files_processed,
        progress.directories_processed,
        humantime::format_duration(Duration::from_secs(progress.elapsed.as_secs()))
    );
}

fn run_check(
    config_path: Option<PathBuf>,
    host: Option<String>,
    port: u16,
    username: Option<String>,
    password: Option<String>,
) -> Result<()> {
    init_logging("warn");
    let mut connection = match SearchConfig::load_from(config_path.as_deref()) {
        Ok(config) => config.connection,
        Err(_) => ConnectionConfig::default(),
    };
    if let Some(host) = host {
        connection.host = host;
    }
    connection.port = port;
    if let Some(username) = username {
        connection.username = username;
    }
    if let Some(password) = password {
        connection.password = password;
    }
    if connection.host.is_empty() {
        bail!("no FTP host configured; pass --host or a configuration file");
    }

    let today = chrono::Local::now().date_naive();
    let catalog = RemoteCatalog::new(
        connection.clone(),
        LayoutConfig::default(),
        today,
        today,
        None,
    );
    match catalog.check_connection() {
        Ok(()) => {
            println!(
                "{} connected to {}:{}",
                "ok:".green(),
                connection.host,
                connection.port
            );
            Ok(())
        }
        Err(e) => bail!("connection to {}:{} failed: {}", connection.host, connection.port, e),
    }
}
