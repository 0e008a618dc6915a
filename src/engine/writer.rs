use std::io;

use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};

use crate::model::Event;
use crate::observability;
use crate::wal::Wal;

use super::EngineError;

type Ack = oneshot::Sender<io::Result<()>>;

enum Request {
    Append(Event, Ack),
    Compact(Vec<Event>, Ack),
    AppendsSinceCompact(oneshot::Sender<u64>),
}

/// Handle to the task that owns the log. Cheap to clone.
#[derive(Clone)]
pub(crate) struct WalHandle {
    tx: mpsc::Sender<Request>,
}

impl WalHandle {
    pub(crate) fn spawn(wal: Wal) -> Self {
        let (tx, rx) = mpsc::channel(4096);
        tokio::spawn(run(wal, rx));
        Self { tx }
    }

    /// Resolves once the record is on disk.
    pub(crate) async fn append(&self, event: Event) -> Result<(), EngineError> {
        self.call(|ack| Request::Append(event, ack)).await
    }

    /// Replace the log with `events`.
    pub(crate) async fn compact(&self, events: Vec<Event>) -> Result<(), EngineError> {
        self.call(|ack| Request::Compact(events, ack)).await
    }

    pub(crate) async fn appends_since_compact(&self) -> u64 {
        let (reply, count) = oneshot::channel();
        if self.tx.send(Request::AppendsSinceCompact(reply)).await.is_err() {
            return 0;
        }
        count.await.unwrap_or(0)
    }

    async fn call(&self, request: impl FnOnce(Ack) -> Request) -> Result<(), EngineError> {
        let (ack, done) = oneshot::channel();
        self.tx
            .send(request(ack))
            .await
            .map_err(|_| EngineError::WalError("WAL writer shut down".into()))?;
        done.await
            .map_err(|_| EngineError::WalError("WAL writer dropped response".into()))?
            .map_err(|e| EngineError::WalError(e.to_string()))
    }
}

/// Group commit: appends already queued when one is picked up share its
/// fsync. A non-append request ends the batch and runs right after it.
async fn run(mut wal: Wal, mut rx: mpsc::Receiver<Request>) {
    let mut held_back = None;
    loop {
        let request = match held_back.take() {
            Some(request) => request,
            None => match rx.recv().await {
                Some(request) => request,
                None => break,
            },
        };
        match request {
            Request::Append(event, ack) => {
                let mut batch = vec![(event, ack)];
                while let Ok(queued) = rx.try_recv() {
                    match queued {
                        Request::Append(event, ack) => batch.push((event, ack)),
                        other => {
                            held_back = Some(other);
                            break;
                        }
                    }
                }
                commit(&mut wal, batch);
            }
            Request::Compact(events, ack) => {
                let result = Wal::write_compact_file(wal.path(), &events)
                    .and_then(|()| wal.swap_compact_file());
                let _ = ack.send(result);
            }
            Request::AppendsSinceCompact(reply) => {
                let _ = reply.send(wal.appends_since_compact());
            }
        }
    }
    debug!("WAL writer stopped");
}

fn commit(wal: &mut Wal, batch: Vec<(Event, Ack)>) {
    metrics::histogram!(observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = std::time::Instant::now();

    let written = batch
        .iter()
        .try_for_each(|(event, _)| wal.append_buffered(event));
    // Flush even after a failed write so its bytes don't ride along with the next batch.
    let flushed = wal.flush_sync();
    let result = written.and(flushed);

    metrics::histogram!(observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());
    if let Err(e) = &result {
        error!("WAL flush of {} records failed: {e}", batch.len());
    }
    for (_, ack) in batch {
        let _ = ack.send(match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        });
    }
}
