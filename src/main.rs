//! CLI entry point for `threadstore`.

use std::collections::HashSet;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use chrono::{SecondsFormat, Utc};
use clap::{CommandFactory, Parser, Subcommand};

use threadstore::config::{self, Config};
use threadstore::{
    CcEntry, DraftUpdate, IndexSummary, LocalId, MessageHeader, MessageSelection, StoreError,
    SubHeader, ThreadStore,
};

/// Exit status when storage failed and the process must not continue.
const EXIT_FATAL: u8 = 3;

#[derive(Parser)]
#[command(
    name = "threadstore",
    version,
    about = "Crash-safe thread storage for a peer-to-peer messaging client"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Service directory (overrides the configured data dir and service)
    #[arg(short, long, global = true, value_name = "DIR", env = "THREADSTORE_DIR")]
    dir: Option<PathBuf>,

    /// Verbose logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Commands {
    /// Finish transactions left by an interrupted process
    Recover,
    /// Store a message received from the network
    Receive {
        /// Message id
        #[arg(long)]
        id: String,
        /// Sender uid
        #[arg(long)]
        from: String,
        /// Thread id; omit for the first message of a thread
        #[arg(long, default_value = "")]
        thread: String,
        #[arg(long, default_value = "")]
        subject: String,
        #[arg(long, default_value = "")]
        alias: String,
        /// Post time (RFC 3339); defaults to now
        #[arg(long)]
        posted: Option<String>,
        /// Recipient as `uid=alias`, for the first message of a thread
        #[arg(long = "cc", value_name = "UID=ALIAS")]
        cc: Vec<String>,
        /// Body file; reads stdin when omitted
        body: Option<PathBuf>,
    },
    /// Record that a draft was sent
    Send {
        /// Local id of the draft
        draft: String,
        /// Message id assigned on send
        msg_id: String,
        /// Post time (RFC 3339); defaults to now
        #[arg(long)]
        posted: Option<String>,
    },
    /// Mark a message seen
    Seen { thread: String, msg_id: String },
    /// Save a draft and print its local id
    Draft {
        /// Local id of an existing draft to replace
        #[arg(long, conflicts_with = "thread")]
        id: Option<String>,
        /// Thread to reply in; omit to start a new thread
        #[arg(long, default_value = "")]
        thread: String,
        #[arg(long, default_value = "")]
        subject: String,
        /// Recipient as `uid=alias`, for a new thread
        #[arg(long = "cc", value_name = "UID=ALIAS")]
        cc: Vec<String>,
        /// Check that the draft can be sent after saving
        #[arg(long)]
        validate: bool,
        /// Body file; reads stdin when omitted
        body: Option<PathBuf>,
    },
    /// Delete a draft
    Discard {
        /// Local id of the draft
        draft: String,
    },
    /// Set the pending forward list of a thread
    Forward {
        thread: String,
        /// Recipient as `uid=alias`
        #[arg(long = "cc", value_name = "UID=ALIAS")]
        cc: Vec<String>,
    },
    /// List the messages of a thread
    Index {
        thread: String,
        #[arg(long)]
        json: bool,
    },
    /// List the CC of a thread and its forward batches
    Cc {
        thread: String,
        #[arg(long)]
        json: bool,
    },
    /// Write stored records of a thread to stdout
    Cat {
        thread: String,
        /// Message ids; defaults to the message shown on open
        ids: Vec<String>,
    },
    /// Generate shell completions
    Completions {
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
    /// Generate a man page
    Manpage,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let config = config::load_config();

    let log_level = match cli.verbose {
        0 => config.general.log_level.as_str(),
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    setup_logging(log_level, &config);

    match run(cli, &config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            let fatal = e
                .downcast_ref::<StoreError>()
                .is_some_and(StoreError::is_fatal);
            if fatal {
                tracing::error!(error = %e, "Storage failure, stopping");
                ExitCode::from(EXIT_FATAL)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}

fn run(cli: Cli, config: &Config) -> anyhow::Result<()> {
    match cli.command {
        Commands::Completions { shell } => return cmd_completions(shell),
        Commands::Manpage => return cmd_manpage(),
        _ => {}
    }

    let mut opts = config.store_options();
    if let Some(dir) = cli.dir {
        opts.root = dir;
    }
    let store = ThreadStore::open(opts)?;

    match cli.command {
        Commands::Recover => cmd_recover(&store),
        Commands::Receive {
            id,
            from,
            thread,
            subject,
            alias,
            posted,
            cc,
            body,
        } => {
            let data = read_body(body.as_deref())?;
            let head = MessageHeader {
                id,
                from,
                posted: posted.unwrap_or_else(now),
                data_len: data.len() as u64,
                sub_head: SubHeader {
                    thread_id: thread,
                    subject,
                    alias,
                    attach: Vec::new(),
                    cc: (!cc.is_empty()).then(|| parse_cc_list(&cc)).transpose()?,
                },
            };
            store.store_received(&head, &mut data.as_slice())?;
            Ok(())
        }
        Commands::Send {
            draft,
            msg_id,
            posted,
        } => {
            let id = LocalId::parse(&draft)?;
            store.store_sent(&id, &msg_id, &posted.unwrap_or_else(now))?;
            Ok(())
        }
        Commands::Seen { thread, msg_id } => {
            store.mark_seen(&thread, &msg_id)?;
            Ok(())
        }
        Commands::Draft {
            id,
            thread,
            subject,
            cc,
            validate,
            body,
        } => {
            let id = match id {
                Some(id) => LocalId::parse(&id)?,
                None => store.mint_local_id(&thread)?,
            };
            let data = String::from_utf8(read_body(body.as_deref())?)?;
            let mut update = DraftUpdate::new(id.clone(), subject, data);
            update.cc = parse_cc_list(&cc)?;
            store.store_draft(update)?;
            if validate {
                store.validate_draft(&id)?;
            }
            println!("{id}");
            Ok(())
        }
        Commands::Discard { draft } => {
            store.delete_draft(&LocalId::parse(&draft)?)?;
            Ok(())
        }
        Commands::Forward { thread, cc } => {
            store.store_forward(&thread, parse_cc_list(&cc)?)?;
            Ok(())
        }
        Commands::Index { thread, json } => cmd_index(&store, &thread, json),
        Commands::Cc { thread, json } => cmd_cc(&store, &thread, json),
        Commands::Cat { thread, ids } => cmd_cat(&store, &thread, ids),
        Commands::Completions { .. } | Commands::Manpage => Ok(()),
    }
}

/// Set up tracing with stderr output and optional file logging.
fn setup_logging(level: &str, config: &Config) {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let stderr_layer = tracing_subscriber::fmt::layer().with_writer(std::io::stderr);

    let log_dir = config::log_dir(config);
    if std::fs::create_dir_all(&log_dir).is_ok() {
        let file_appender = tracing_appender::rolling::never(&log_dir, "threadstore.log");
        let file_layer = tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_writer(file_appender);

        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .with(file_layer)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(stderr_layer)
            .init();
    }
}

/// Generate shell completions and print to stdout.
fn cmd_completions(shell: clap_complete::Shell) -> anyhow::Result<()> {
    let mut cmd = Cli::command();
    clap_complete::generate(shell, &mut cmd, "threadstore", &mut std::io::stdout());
    Ok(())
}

/// Generate a man page and print to stdout.
fn cmd_manpage() -> anyhow::Result<()> {
    let cmd = Cli::command();
    let man = clap_mangen::Man::new(cmd);
    let mut buf = Vec::new();
    man.render(&mut buf)?;
    std::io::stdout().write_all(&buf)?;
    Ok(())
}

fn cmd_recover(store: &ThreadStore) -> anyhow::Result<()> {
    let report = store.last_recovery();
    println!();
    println!("  {:<20} {}", "Store", store.layout().root().display());
    println!("  {:<20} {}", "Discarded", report.discarded);
    println!("  {:<20} {}", "Applied", report.applied);
    println!("  {:<20} {}", "Skipped", report.skipped);
    println!();
    Ok(())
}

fn cmd_index(store: &ThreadStore, thread: &str, json: bool) -> anyhow::Result<()> {
    let index = store.thread_index(thread)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&index)?);
    } else {
        print_index_table(&index);
    }
    Ok(())
}

fn cmd_cc(store: &ThreadStore, thread: &str, json: bool) -> anyhow::Result<()> {
    let listing = store.thread_cc(thread)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&listing)?);
        return Ok(());
    }

    println!();
    println!("  {:<24} {:<24} {:<22} {}", "Who", "By", "Date", "Note");
    println!("  {}", "-".repeat(80));
    for view in &listing.set {
        let e = &view.entry;
        let queued = if view.queued { " (queued)" } else { "" };
        println!("  {:<24} {:<24} {:<22} {}{}", e.who, e.by, e.date, e.note, queued);
    }
    if !listing.draft.is_empty() {
        println!();
        println!("  Pending forward:");
        for view in &listing.draft {
            println!("    {:<24} {}", view.entry.who, view.batch_id.as_deref().unwrap_or(""));
        }
    }
    println!();
    Ok(())
}

fn cmd_cat(store: &ThreadStore, thread: &str, ids: Vec<String>) -> anyhow::Result<()> {
    let mut out = std::io::stdout().lock();
    if ids.is_empty() {
        let Some(id) = store.load_thread(thread)? else {
            anyhow::bail!("Thread '{thread}' is empty or missing");
        };
        store.write_messages(thread, MessageSelection::One(&id), &mut out)?;
    } else {
        let open: HashSet<String> = ids.into_iter().collect();
        store.write_messages(thread, MessageSelection::Open(&open), &mut out)?;
    }
    out.flush()?;
    Ok(())
}

/// Print a thread index as a human-readable table.
fn print_index_table(index: &[IndexSummary]) {
    use humansize::{format_size, BINARY};

    println!();
    println!("  {} message(s)", index.len());
    println!();
    if index.is_empty() {
        return;
    }

    println!(
        "  {:<24} {:<22} {:<20} {:<30} {:>9} {}",
        "Id", "Date", "From", "Subject", "Size", "State"
    );
    println!("  {}", "-".repeat(112));
    for row in index {
        let from = if row.alias.is_empty() { &row.from } else { &row.alias };
        let from_trunc: String = from.chars().take(19).collect();
        let subj_trunc: String = row.subject.chars().take(29).collect();
        let state = match (row.draft, row.queued, row.seen.is_set()) {
            (true, true, _) => "queued",
            (true, false, _) => "draft",
            (false, _, true) => "seen",
            (false, _, false) => "",
        };
        println!(
            "  {:<24} {:<22} {:<20} {:<30} {:>9} {}",
            row.id,
            row.date,
            from_trunc,
            subj_trunc,
            format_size(row.size, BINARY),
            state
        );
    }
    println!();
}

/// Read a message body from a file, or stdin when no path is given.
fn read_body(path: Option<&Path>) -> anyhow::Result<Vec<u8>> {
    match path {
        Some(p) => std::fs::read(p)
            .map_err(|e| anyhow::anyhow!("Failed to read {}: {e}", p.display())),
        None => {
            let mut buf = Vec::new();
            std::io::stdin().read_to_end(&mut buf)?;
            Ok(buf)
        }
    }
}

/// Parse `uid=alias` arguments into new CC entries.
fn parse_cc_list(args: &[String]) -> anyhow::Result<Vec<CcEntry>> {
    args.iter()
        .map(|arg| {
            let (uid, alias) = arg
                .split_once('=')
                .ok_or_else(|| anyhow::anyhow!("Expected UID=ALIAS, got '{arg}'"))?;
            if uid.is_empty() {
                anyhow::bail!("Empty uid in '{arg}'");
            }
            Ok(CcEntry {
                who: alias.to_string(),
                who_uid: uid.to_string(),
                ..Default::default()
            })
        })
        .collect()
}

fn now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}
