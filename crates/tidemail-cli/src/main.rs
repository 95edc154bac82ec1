//! Tidemail - headless mbox viewer
//!
//! Loads an mbox file into an in-memory backend and prints the folder
//! listing the message store produces for it.

mod mbox;
mod memory;

use anyhow::{Context, Result};
use clap::Parser;
use memory::MemoryBackend;
use std::path::PathBuf;
use tidemail_core::{MessageStore, StoreConfig};
use tidemail_worker::{
    channel, run_backend, Action, Backend, Message, MessageReceiver, Response, SearchCriteria,
};
use tokio::sync::mpsc;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const DIRECTORY: &str = "INBOX";

/// Print the listing of an mbox folder
#[derive(Debug, PartialEq, Parser)]
#[command(name = "tidemail", version, about)]
struct Cli {
    /// Mbox file to open
    mbox: PathBuf,

    /// Show the listing as threads
    #[arg(long)]
    threads: bool,

    /// Sort criteria such as "-r date"; may be repeated
    #[arg(long, value_name = "CRITERIA", allow_hyphen_values = true)]
    sort: Vec<String>,

    /// Mark messages matching this term
    #[arg(long, value_name = "TERM")]
    search: Option<String>,
}

/// Feed responses to the store until no action or thread rebuild is pending
async fn settle(store: &mut MessageStore, rx: &mut MessageReceiver, rebuilds: &mut mpsc::UnboundedReceiver<()>) {
    while store.worker().pending_callbacks() > 0 || store.is_rebuild_pending() {
        tokio::select! {
            Some(message) = rx.recv() => store.process_message(&message),
            Some(()) = rebuilds.recv() => store.threads_rebuilt(),
            else => break,
        }
    }
}

fn print_listing(store: &MessageStore) {
    let forest = if store.threaded_view() {
        store.threads().ok()
    } else {
        None
    };
    let uids = store.uids();
    for &uid in store.iter_factory().iter(&uids) {
        let Some(info) = store.message(uid) else {
            println!("{:>5}  (headers not loaded)", uid);
            continue;
        };
        let depth = forest.as_ref().and_then(|f| f.depth(uid)).unwrap_or(0);
        let (date, from, subject) = match &info.envelope {
            Some(envelope) => (
                envelope
                    .date
                    .map(|d| d.format("%Y-%m-%d %H:%M").to_string())
                    .unwrap_or_default(),
                envelope
                    .from
                    .first()
                    .map(|a| a.name.clone().unwrap_or_else(|| a.address.clone()))
                    .unwrap_or_default(),
                envelope.subject.clone(),
            ),
            None => Default::default(),
        };
        let marker = if store.is_result(uid) { '*' } else { ' ' };
        println!(
            "{}{:>4}  {:<16}  {:<24.24}  {}{}",
            marker,
            uid,
            date,
            from,
            "  ".repeat(depth),
            subject
        );
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env().add_directive("tidemail=debug".parse()?))
        .init();

    let cli = Cli::parse();
    tracing::info!("Opening {}", cli.mbox.display());

    let messages = mbox::read_mbox(&cli.mbox)?;
    let backend = MemoryBackend::new(DIRECTORY, messages);
    let total = backend.len();

    let (worker, mut rx, endpoint) = channel::<MessageStore>(backend.capabilities());
    let backend_task = tokio::spawn(run_backend(backend, endpoint));

    let config = StoreConfig {
        threaded: cli.threads,
        default_sort: cli.sort,
        scroll_len: total.max(1),
        ..Default::default()
    };
    let mut store = MessageStore::new(worker, &config).context("Invalid store configuration")?;
    let mut rebuilds = store
        .take_rebuild_events()
        .context("Rebuild events already taken")?;

    store.worker_mut().post_action(
        Action::OpenDirectory {
            directory: DIRECTORY.to_string(),
        },
        Some(Box::new(|_store: &mut MessageStore, message: &Message<Response>| {
            if let Response::Error(e) = &message.body {
                tracing::error!("Failed to open {}: {}", DIRECTORY, e);
            }
        })),
    );
    settle(&mut store, &mut rx, &mut rebuilds).await;

    if let Some(term) = cli.search {
        store.search(
            SearchCriteria::terms([term]),
            Box::new(|store: &mut MessageStore, results: Vec<u32>| {
                tracing::info!("{} matching messages", results.len());
                store.apply_search(results);
            }),
        );
        settle(&mut store, &mut rx, &mut rebuilds).await;
    }

    print_listing(&store);

    drop(store);
    backend_task.await.context("Backend task failed")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_args() {
        let cli = Cli::try_parse_from(["tidemail", "mail.mbox", "--threads", "--sort", "-r date", "--search", "lunch"]).unwrap();
        assert_eq!(
            cli,
            Cli {
                mbox: PathBuf::from("mail.mbox"),
                threads: true,
                sort: vec!["-r date".to_string()],
                search: Some("lunch".to_string()),
            }
        );
    }

    #[test]
    fn test_parse_args_errors() {
        assert!(Cli::try_parse_from(["tidemail"]).is_err());
        assert!(Cli::try_parse_from(["tidemail", "a.mbox", "b.mbox"]).is_err());
        assert!(Cli::try_parse_from(["tidemail", "a.mbox", "--sort"]).is_err());
        assert!(Cli::try_parse_from(["tidemail", "a.mbox", "--verbose"]).is_err());
    }
}
