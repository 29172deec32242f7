//! Background indexing thread.
//!
//! Callers post [`IndexRequest`]s and receive [`IndexEvent`]s through a
//! callback; nothing is shared with the consumer besides those messages.

use super::{IndexCoordinator, IndexProgress, IndexSummary};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

/// Work the indexing thread can be asked to do, weakest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum IndexRequest {
    /// Re-index only files whose metadata changed
    Incremental,
    /// Re-index every file
    Full,
    /// Empty the store, then re-index every file
    Reset,
}

/// Messages posted back to the consumer.
#[derive(Debug, Clone)]
pub enum IndexEvent {
    Progress(IndexProgress),
    Finished {
        request: IndexRequest,
        summary: IndexSummary,
    },
    Failed {
        request: IndexRequest,
        error: String,
    },
}

/// Owns the indexing thread. Dropping the worker stops it after the
/// current pass.
pub struct IndexWorker {
    tx: Option<Sender<IndexRequest>>,
    handle: Option<JoinHandle<()>>,
}

impl IndexWorker {
    /// Start the thread. `on_event` runs on the worker thread.
    pub fn spawn<F>(coordinator: Arc<IndexCoordinator>, on_event: F) -> std::io::Result<Self>
    where
        F: Fn(IndexEvent) + Send + 'static,
    {
        let (tx, rx) = mpsc::channel();
        let handle = thread::Builder::new()
            .name("clog-index".to_string())
            .spawn(move || run(coordinator, rx, on_event))?;

        Ok(Self {
            tx: Some(tx),
            handle: Some(handle),
        })
    }

    /// Queue a request. Returns false if the thread has stopped.
    pub fn request(&self, request: IndexRequest) -> bool {
        self.tx
            .as_ref()
            .is_some_and(|tx| tx.send(request).is_ok())
    }

    /// Stop accepting requests and wait for the thread to finish.
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("Index worker panicked");
            }
        }
    }
}

impl Drop for IndexWorker {
    fn drop(&mut self) {
        self.stop();
    }
}

fn run<F>(coordinator: Arc<IndexCoordinator>, rx: Receiver<IndexRequest>, on_event: F)
where
    F: Fn(IndexEvent),
{
    tracing::debug!("Index worker started");

    while let Ok(first) = rx.recv() {
        let request = coalesce(first, &rx);
        let progress = |p: &IndexProgress| on_event(IndexEvent::Progress(p.clone()));

        let result = match request {
            IndexRequest::Incremental => coordinator.index_changed_with_progress(progress),
            IndexRequest::Full => coordinator.index_all_with_progress(progress),
            IndexRequest::Reset => coordinator.reset_and_index_with_progress(progress),
        };

        match result {
            Ok(summary) => on_event(IndexEvent::Finished { request, summary }),
            Err(e) => {
                tracing::error!(?request, error = %e, "Index pass failed");
                on_event(IndexEvent::Failed {
                    request,
                    error: e.to_string(),
                });
            }
        }
    }

    tracing::debug!("Index worker stopped");
}

/// Fold every request already queued into one. The strongest request wins,
/// so a burst of incremental requests becomes a single pass.
fn coalesce(first: IndexRequest, rx: &Receiver<IndexRequest>) -> IndexRequest {
    let mut request = first;
    loop {
        match rx.try_recv() {
            Ok(next) => request = request.max(next),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => return request,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use std::fs;
    use std::time::Duration;
    use tempfile::TempDir;

    #[test]
    fn test_coalesce_keeps_strongest() {
        let (tx, rx) = mpsc::channel();
        tx.send(IndexRequest::Incremental).unwrap();
        tx.send(IndexRequest::Full).unwrap();
        tx.send(IndexRequest::Incremental).unwrap();
        assert_eq!(coalesce(IndexRequest::Incremental, &rx), IndexRequest::Full);
        assert!(rx.try_recv().is_err());

        tx.send(IndexRequest::Incremental).unwrap();
        assert_eq!(
            coalesce(IndexRequest::Incremental, &rx),
            IndexRequest::Incremental
        );
    }

    #[test]
    fn test_worker_posts_finished() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join("-tmp-app");
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join("s1.jsonl"),
            r#"{"type":"user","uuid":"u1","timestamp":"2025-01-01T00:00:00Z","message":{"content":"hello"}}"#,
        )
        .unwrap();

        let db = Arc::new(Database::open_in_memory().unwrap());
        db.migrate().unwrap();
        let coordinator = Arc::new(IndexCoordinator::new(
            Arc::clone(&db),
            vec![temp.path().to_path_buf()],
        ));

        let (event_tx, event_rx) = mpsc::channel();
        let worker = IndexWorker::spawn(coordinator, move |event| {
            let _ = event_tx.send(event);
        })
        .unwrap();
        assert!(worker.request(IndexRequest::Incremental));

        let summary = loop {
            match event_rx.recv_timeout(Duration::from_secs(10)).unwrap() {
                IndexEvent::Finished { summary, .. } => break summary,
                IndexEvent::Failed { error, .. } => panic!("index failed: {}", error),
                IndexEvent::Progress(_) => {}
            }
        };
        assert_eq!(summary.files_indexed, 1);
        assert_eq!(db.message_count().unwrap(), 1);

        worker.shutdown();
    }

    #[test]
    fn test_failed_pass_is_reported() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        db.migrate().unwrap();
        let coordinator = Arc::new(IndexCoordinator::new(db, Vec::new()));

        let (event_tx, event_rx) = mpsc::channel();
        let worker = IndexWorker::spawn(coordinator, move |event| {
            let _ = event_tx.send(event);
        })
        .unwrap();
        worker.request(IndexRequest::Full);

        let failed = loop {
            match event_rx.recv_timeout(Duration::from_secs(10)).unwrap() {
                IndexEvent::Failed { request, .. } => break request,
                IndexEvent::Finished { .. } => panic!("expected failure"),
                IndexEvent::Progress(_) => {}
            }
        };
        assert_eq!(failed, IndexRequest::Full);
    }
}
