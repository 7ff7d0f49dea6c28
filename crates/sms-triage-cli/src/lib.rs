//! CLI commands for SMS Triage
//!
//! Every command opens the file-backed engine at `TRIAGE_STORAGE_ROOT`,
//! performs one operation, and exits. `relay serve` is the only long-running
//! command.

#![forbid(unsafe_code)]

use std::io::Read;
use std::str::FromStr;
use std::sync::Arc;

use clap::{Args, Parser, Subcommand};
use serde::Serialize;
use sms_triage_core::config::{TriageConfig, triage_env_snapshot};
use sms_triage_core::models::{Priority, RecordId, TriageRecord};
use sms_triage_core::TriageError;
use sms_triage_engine::relay::{RelayClient, RelayReply, RelayServer, RelayServerConfig};
use sms_triage_engine::{
    AlertSummary, Engine, Outcome, ReadFilter, SortOrder, TriageView, group_by_source,
};
use tracing_subscriber::EnvFilter;

#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("exit code {0}")]
    ExitCode(i32),
    #[error(transparent)]
    Triage(#[from] TriageError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Other(String),
}

pub type CliResult<T> = Result<T, CliError>;

impl CliError {
    /// Stable error code for `--json` error output.
    #[must_use]
    pub const fn error_type(&self) -> &'static str {
        match self {
            Self::InvalidArgument(_) => "INVALID_ARGUMENT",
            Self::ExitCode(_) => "EXIT",
            Self::Triage(err) => err.error_type(),
            Self::Io(_) => "OS_ERROR",
            Self::Other(_) => "UNHANDLED_EXCEPTION",
        }
    }

    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        match self {
            Self::InvalidArgument(_) => true,
            Self::Triage(err) => err.is_recoverable(),
            _ => false,
        }
    }
}

#[derive(Parser, Debug)]
#[command(name = "triage", version, about = "SMS notification triage")]
pub struct Cli {
    /// Log at debug level (overrides `RUST_LOG`).
    #[arg(long, short = 'v', global = true)]
    pub verbose: bool,
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Ingest one message (from TEXT, or stdin when TEXT is omitted or `-`).
    Ingest(IngestArgs),
    /// List stored records, newest first.
    List(ListArgs),
    /// Show one record.
    Show {
        id: String,
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Record counts per source.
    Groups {
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Totals by read state, source, and priority.
    Stats {
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    /// Mark one record read.
    Read { id: String },
    /// Mark every record read.
    #[command(name = "read-all")]
    ReadAll,
    /// Delete one record.
    Delete { id: String },
    /// Delete every record.
    Clear {
        #[arg(long, short = 'f')]
        force: bool,
    },
    /// Manage the origin allow-list.
    Allow {
        #[command(subcommand)]
        action: AllowCommand,
    },
    /// Run or talk to the TCP relay.
    Relay {
        #[command(subcommand)]
        action: RelayCommand,
    },
    /// Show the effective configuration.
    Config {
        #[arg(long, default_value_t = false)]
        json: bool,
    },
}

impl Commands {
    /// Whether the command asked for JSON output (errors then follow suit).
    #[must_use]
    pub const fn wants_json(&self) -> bool {
        match self {
            Self::Ingest(args) => args.json,
            Self::List(args) => args.json,
            Self::Show { json, .. }
            | Self::Groups { json }
            | Self::Stats { json }
            | Self::Config { json }
            | Self::Allow {
                action: AllowCommand::List { json },
            } => *json,
            _ => false,
        }
    }
}

#[derive(Args, Debug)]
pub struct IngestArgs {
    pub text: Option<String>,
    /// Sender identifier checked against the allow-list.
    #[arg(long, default_value = "")]
    pub origin: String,
    /// Source label used when the message does not name an app.
    #[arg(long)]
    pub hint: Option<String>,
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Args, Debug)]
pub struct ListArgs {
    #[arg(long, default_value_t = false)]
    pub unread: bool,
    #[arg(long, value_parser = parse_priority)]
    pub priority: Option<Priority>,
    #[arg(long)]
    pub source: Option<String>,
    /// Most severe first instead of newest first.
    #[arg(long, default_value_t = false)]
    pub severity: bool,
    #[arg(long)]
    pub limit: Option<usize>,
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

#[derive(Subcommand, Debug)]
pub enum AllowCommand {
    Add { origin: String },
    Remove { origin: String },
    List {
        #[arg(long, default_value_t = false)]
        json: bool,
    },
    Clear,
}

#[derive(Subcommand, Debug)]
pub enum RelayCommand {
    /// Serve the relay until killed.
    Serve {
        #[arg(long)]
        host: Option<String>,
        #[arg(long)]
        port: Option<u16>,
    },
    /// Send one raw request line and print the reply.
    Send { line: String },
}

fn parse_priority(value: &str) -> Result<Priority, String> {
    Priority::from_str(value).map_err(|e| e.to_string())
}

pub fn run() -> i32 {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    let json = cli.command.wants_json();
    match execute(cli) {
        Ok(()) => 0,
        Err(err) => {
            emit_error(&err, json);
            err_exit_code(&err)
        }
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

const fn err_exit_code(err: &CliError) -> i32 {
    match err {
        CliError::ExitCode(code) => *code,
        _ => 1,
    }
}

fn emit_error(err: &CliError, json: bool) {
    if matches!(err, CliError::ExitCode(_)) {
        return;
    }
    if json {
        eprintln!("{}", error_json(err));
    } else {
        eprintln!("error: {err}");
    }
}

fn error_json(err: &CliError) -> serde_json::Value {
    serde_json::json!({
        "error": {
            "type": err.error_type(),
            "message": err.to_string(),
            "recoverable": err.is_recoverable(),
        }
    })
}

pub fn execute(cli: Cli) -> CliResult<()> {
    let config = TriageConfig::from_env();
    match cli.command {
        Commands::Ingest(args) => handle_ingest(&config, args),
        Commands::List(args) => handle_list(&config, &args),
        Commands::Show { id, json } => handle_show(&config, &id, json),
        Commands::Groups { json } => handle_groups(&config, json),
        Commands::Stats { json } => handle_stats(&config, json),
        Commands::Read { id } => handle_read(&config, &id),
        Commands::ReadAll => handle_read_all(&config),
        Commands::Delete { id } => handle_delete(&config, &id),
        Commands::Clear { force } => handle_clear(&config, force),
        Commands::Allow { action } => handle_allow(&config, action),
        Commands::Relay { action } => handle_relay(config, action),
        Commands::Config { json } => handle_config(&config, json),
    }
}

// =============================================================================
// Records
// =============================================================================

fn handle_ingest(config: &TriageConfig, args: IngestArgs) -> CliResult<()> {
    let text = match args.text {
        Some(text) if text != "-" => text,
        _ => {
            let mut buf = String::new();
            std::io::stdin().read_to_string(&mut buf)?;
            buf.trim_end_matches(['\n', '\r']).to_string()
        }
    };
    let hint = args
        .hint
        .unwrap_or_else(|| config.default_source_label.clone());
    let engine = Engine::open(config)?;
    let outcome = engine.pipeline.ingest(&text, &hint, &args.origin)?;

    match (&outcome, args.json) {
        (Outcome::Stored(record), true) => print_json(&serde_json::json!({
            "outcome": "stored",
            "record": record,
            "alert": AlertSummary::from(record),
        })),
        (Outcome::Dropped(reason), true) => print_json(&serde_json::json!({
            "outcome": "dropped",
            "reason": reason.to_string(),
        })),
        (Outcome::Stored(record), false) => {
            println!("stored {} [{}] {}", record.id, record.priority, record.title);
            Ok(())
        }
        (Outcome::Dropped(reason), false) => {
            println!("dropped: {reason}");
            Ok(())
        }
    }
}

fn handle_list(config: &TriageConfig, args: &ListArgs) -> CliResult<()> {
    let engine = Engine::open(config)?;
    let view = TriageView {
        read: if args.unread {
            ReadFilter::UnreadOnly
        } else {
            ReadFilter::All
        },
        priority: args.priority,
        source_label: args.source.clone(),
        order: if args.severity {
            SortOrder::Severity
        } else {
            SortOrder::Recency
        },
    };
    let mut records = view.apply(&engine.store.query());
    if let Some(limit) = args.limit {
        records.truncate(limit);
    }

    if args.json {
        return print_json(&records);
    }
    if records.is_empty() {
        println!("No records found.");
        return Ok(());
    }
    for record in &records {
        println!("{}", format_record_line(record));
    }
    Ok(())
}

fn handle_show(config: &TriageConfig, id: &str, json: bool) -> CliResult<()> {
    let engine = Engine::open(config)?;
    let record = engine
        .store
        .get(&RecordId::from(id))
        .ok_or_else(|| TriageError::RecordNotFound(id.to_string()))?;
    if json {
        return print_json(&record);
    }
    println!("id:       {}", record.id);
    println!("source:   {}", record.source_label);
    println!("priority: {} ({})", record.priority, record.priority.display_name());
    println!("received: {}", format_timestamp(&record));
    println!("origin:   {}", record.origin_identifier);
    println!("read:     {}", if record.is_read { "yes" } else { "no" });
    println!("title:    {}", record.title);
    if !record.body.is_empty() {
        println!();
        println!("{}", record.body);
    }
    Ok(())
}

fn handle_groups(config: &TriageConfig, json: bool) -> CliResult<()> {
    let engine = Engine::open(config)?;
    let groups = group_by_source(&engine.store.query());
    if json {
        return print_json(&groups);
    }
    if groups.is_empty() {
        println!("No records found.");
        return Ok(());
    }
    for group in &groups {
        println!("{:<20} {:>5} total {:>5} unread", group.source_label, group.total, group.unread);
    }
    Ok(())
}

fn handle_stats(config: &TriageConfig, json: bool) -> CliResult<()> {
    let engine = Engine::open(config)?;
    let stats = engine.store.statistics();
    if json {
        return print_json(&stats);
    }
    println!("total:  {}", stats.total);
    println!("unread: {}", stats.unread);
    println!("by priority:");
    for priority in Priority::ALL.iter().rev() {
        let count = stats.by_priority.get(priority).copied().unwrap_or(0);
        println!("  {:<8} {count}", priority.as_str());
    }
    println!("by source:");
    for (label, count) in &stats.by_source {
        println!("  {label:<20} {count}");
    }
    Ok(())
}

fn handle_read(config: &TriageConfig, id: &str) -> CliResult<()> {
    let engine = Engine::open(config)?;
    if !engine.store.mark_read(&RecordId::from(id))? {
        return Err(TriageError::RecordNotFound(id.to_string()).into());
    }
    println!("marked read: {id}");
    Ok(())
}

fn handle_read_all(config: &TriageConfig) -> CliResult<()> {
    let engine = Engine::open(config)?;
    let changed = engine.store.mark_all_read()?;
    println!("marked {changed} record(s) read");
    Ok(())
}

fn handle_delete(config: &TriageConfig, id: &str) -> CliResult<()> {
    let engine = Engine::open(config)?;
    if !engine.store.delete(&RecordId::from(id))? {
        return Err(TriageError::RecordNotFound(id.to_string()).into());
    }
    println!("deleted: {id}");
    Ok(())
}

fn handle_clear(config: &TriageConfig, force: bool) -> CliResult<()> {
    if !force {
        eprintln!("This will delete every stored record. Pass --force / -f to confirm.");
        return Err(CliError::ExitCode(1));
    }
    let engine = Engine::open(config)?;
    let count = engine.store.len();
    engine.store.clear_all()?;
    println!("cleared {count} record(s)");
    Ok(())
}

// =============================================================================
// Allow-list
// =============================================================================

fn handle_allow(config: &TriageConfig, action: AllowCommand) -> CliResult<()> {
    let engine = Engine::open(config)?;
    match action {
        AllowCommand::Add { origin } => {
            if engine.allow_list.add_entry(&origin)? {
                println!("added: {origin}");
            } else {
                println!("already present: {origin}");
            }
        }
        AllowCommand::Remove { origin } => {
            if engine.allow_list.remove_entry(&origin)? {
                println!("removed: {origin}");
            } else {
                println!("not present: {origin}");
            }
        }
        AllowCommand::List { json } => {
            let entries = engine.allow_list.entries();
            if json {
                return print_json(&entries);
            }
            if entries.is_empty() {
                println!("Allow-list is empty (all origins allowed).");
            }
            for entry in &entries {
                println!("{entry}");
            }
        }
        AllowCommand::Clear => {
            engine.allow_list.clear()?;
            println!("allow-list cleared (all origins allowed)");
        }
    }
    Ok(())
}

// =============================================================================
// Relay
// =============================================================================

fn handle_relay(mut config: TriageConfig, action: RelayCommand) -> CliResult<()> {
    match action {
        RelayCommand::Serve { host, port } => {
            if let Some(host) = host {
                config.relay_host = host;
            }
            if let Some(port) = port {
                config.relay_port = port;
            }
            let engine = Engine::open(&config)?;
            let relay_config = RelayServerConfig::from(&config);
            let server = RelayServer::start(&relay_config, Arc::clone(&engine.pipeline))?;
            eprintln!("relay listening on {}", server.local_addr());
            server.wait();
            Ok(())
        }
        RelayCommand::Send { line } => {
            if line.trim().is_empty() {
                return Err(CliError::InvalidArgument(
                    "relay send needs a request line".to_string(),
                ));
            }
            let reply = RelayClient::from(&config).send_line(&line)?;
            println!("{reply}");
            match reply {
                RelayReply::Error(_) => Err(CliError::ExitCode(1)),
                _ => Ok(()),
            }
        }
    }
}

// =============================================================================
// Config
// =============================================================================

#[derive(Serialize)]
struct ConfigView<'a> {
    storage_root: String,
    max_records: usize,
    title_max_chars: usize,
    unstructured_title_chars: usize,
    default_source_label: &'a str,
    relay_addr: String,
    relay_workers: usize,
    relay_queue_depth: usize,
    relay_timeout_ms: u64,
    relay_max_line_bytes: usize,
    environment: std::collections::BTreeMap<String, String>,
}

fn handle_config(config: &TriageConfig, json: bool) -> CliResult<()> {
    let view = ConfigView {
        storage_root: config.storage_root.display().to_string(),
        max_records: config.max_records,
        title_max_chars: config.title_max_chars,
        unstructured_title_chars: config.unstructured_title_chars,
        default_source_label: &config.default_source_label,
        relay_addr: config.relay_addr(),
        relay_workers: config.relay_workers,
        relay_queue_depth: config.relay_queue_depth,
        relay_timeout_ms: config.relay_timeout_ms,
        relay_max_line_bytes: config.relay_max_line_bytes,
        environment: triage_env_snapshot().into_iter().collect(),
    };
    if json {
        return print_json(&view);
    }
    println!("storage_root             {}", view.storage_root);
    println!("max_records              {}", view.max_records);
    println!("title_max_chars          {}", view.title_max_chars);
    println!("unstructured_title_chars {}", view.unstructured_title_chars);
    println!("default_source_label     {}", view.default_source_label);
    println!("relay_addr               {}", view.relay_addr);
    println!("relay_workers            {}", view.relay_workers);
    println!("relay_queue_depth        {}", view.relay_queue_depth);
    println!("relay_timeout_ms         {}", view.relay_timeout_ms);
    println!("relay_max_line_bytes     {}", view.relay_max_line_bytes);
    Ok(())
}

// =============================================================================
// Output helpers
// =============================================================================

fn print_json<T: Serialize + ?Sized>(value: &T) -> CliResult<()> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| CliError::Other(format!("failed to encode JSON: {e}")))?;
    println!("{text}");
    Ok(())
}

fn format_timestamp(record: &TriageRecord) -> String {
    record.created_at_utc().map_or_else(
        || record.created_at.to_string(),
        |ts| ts.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
    )
}

fn format_record_line(record: &TriageRecord) -> String {
    let marker = if record.is_read { ' ' } else { '*' };
    format!(
        "{marker} {id}  {ts}  {priority:<6}  {source:<12}  {title}",
        id = record.id,
        ts = format_timestamp(record),
        priority = record.priority.as_str(),
        source = record.source_label,
        title = record.title,
    )
}
