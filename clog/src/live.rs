//! Live mode: one consumer loop fed by the index worker, the file watcher
//! and Ctrl+C.

use crate::output;
use crate::watcher;
use anyhow::{Context, Result};
use clog_core::ingest::{IndexCoordinator, IndexEvent, IndexRequest, IndexWorker};
use clog_core::{Config, Database, WatchEngine};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

/// Newest matches shown per subscription after a pass
const MATCHES_SHOWN: usize = 3;

/// Everything the loop reacts to
enum LiveMessage {
    FilesChanged,
    Index(IndexEvent),
    Shutdown,
}

pub fn run(config: &Config, db: Arc<Database>) -> Result<()> {
    let (tx, rx) = mpsc::channel();

    let ctrlc_tx = tx.clone();
    ctrlc::set_handler(move || {
        let _ = ctrlc_tx.send(LiveMessage::Shutdown);
    })
    .context("failed to set Ctrl+C handler")?;

    let watch = WatchEngine::new(Arc::clone(&db));
    let coordinator = Arc::new(IndexCoordinator::with_watch(
        Arc::clone(&db),
        watch.clone(),
        config.project_roots(),
    ));

    let index_tx = tx.clone();
    let worker = IndexWorker::spawn(coordinator, move |event| {
        let _ = index_tx.send(LiveMessage::Index(event));
    })
    .context("failed to start index worker")?;

    let change_tx = tx.clone();
    let roots = config.project_roots();
    let root_watcher = watcher::watch_roots(
        &roots,
        Duration::from_millis(config.watch.debounce_ms),
        move || {
            let _ = change_tx.send(LiveMessage::FilesChanged);
        },
    )?;
    drop(tx);

    println!(
        "Watching {} of {} project roots. Press Ctrl+C to stop.",
        root_watcher.watched().len(),
        roots.len()
    );
    worker.request(IndexRequest::Incremental);

    for message in rx {
        match message {
            LiveMessage::FilesChanged => {
                if !worker.request(IndexRequest::Incremental) {
                    tracing::error!("Index worker is gone");
                    break;
                }
            }
            LiveMessage::Index(IndexEvent::Progress(p)) => {
                tracing::trace!(current = p.current, total = p.total, "Index progress");
            }
            LiveMessage::Index(IndexEvent::Finished { summary, .. }) => {
                if summary.changed() {
                    let now = chrono::Local::now().format("%H:%M:%S");
                    println!(
                        "[{}] Indexed {} files, {} messages",
                        now, summary.files_indexed, summary.messages_inserted
                    );
                }
                for (path, err) in &summary.failures {
                    eprintln!("  skipped {}: {}", path.display(), err);
                }
                if summary.new_matches > 0 {
                    report_matches(&watch)?;
                }
            }
            LiveMessage::Index(IndexEvent::Failed { error, .. }) => {
                eprintln!("Indexing failed: {}", error);
            }
            LiveMessage::Shutdown => {
                println!("\nShutting down...");
                break;
            }
        }
    }

    drop(root_watcher);
    worker.shutdown();
    tracing::info!("Live mode stopped");
    Ok(())
}

/// Print the newest unseen matches of every subscription that has some.
fn report_matches(watch: &WatchEngine) -> Result<()> {
    for sub in watch.list_subscriptions()? {
        if !sub.enabled || sub.unseen_count == 0 {
            continue;
        }
        let fresh: Vec<_> = watch
            .matches_for(sub.id, MATCHES_SHOWN)?
            .into_iter()
            .filter(|m| !m.seen)
            .collect();
        println!("  {} ({} unseen)", sub.name, sub.unseen_count);
        for m in fresh {
            println!("    {}: {}", m.project, output::excerpt(&m.snippet));
        }
    }
    Ok(())
}
