//! Transfer orchestration.
//!
//! [`Uploader`] owns at most one live transfer. `start` spawns a drive task
//! that creates the remote session and then sends chunks with a single
//! network operation in flight at a time. Pause, resume, and cancel are
//! signals observed at the loop's suspension points: session creation, each
//! chunk send, each offset query, and each backoff wait.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use hoist_protocol::{ProtocolClient, ProtocolError, SessionLocation};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::plan::ChunkPlan;
use crate::rate::{RateEstimate, RateEstimator};
use crate::retry::RetryState;
use crate::source::ChunkSource;
use crate::types::{
    TransferEvent, TransferOutcome, TransferProgress, TransferSession, TransferStatus, UploadConfig,
};
use crate::TransferError;

/// Capacity of the event channel handed to the caller.
const EVENT_BUFFER: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Gate {
    Run,
    Pause,
}

/// Why the drive loop stopped early.
enum End {
    Cancelled,
    Failed(TransferError),
}

enum BackoffWait {
    Elapsed,
    Paused,
}

// ------------------------------------------------------------------- //
// Caller surface
// ------------------------------------------------------------------- //

/// Resumable upload controller.
///
/// Holds the client used to reach the server and the state of the current
/// transfer. All lifecycle calls are non-blocking; the transfer itself runs
/// on a spawned task and reports through the event receiver returned by
/// [`start`](Self::start).
pub struct Uploader {
    client: Arc<dyn ProtocolClient>,
    session: Arc<TransferSession>,
    cancel: CancellationToken,
    gate: watch::Sender<Gate>,
}

impl Uploader {
    pub fn new(client: Arc<dyn ProtocolClient>) -> Self {
        let (gate, _) = watch::channel(Gate::Run);
        Self {
            client,
            session: Arc::new(TransferSession::idle()),
            cancel: CancellationToken::new(),
            gate,
        }
    }

    /// Starts uploading the file at `path` and returns the event stream for
    /// the new transfer. Must be called within a Tokio runtime.
    ///
    /// Fails with [`TransferError::AlreadyRunning`] while a previous
    /// transfer is still active, and with [`TransferError::Io`] if the file
    /// cannot be opened; neither failure changes the controller's state.
    pub fn start(
        &mut self,
        path: &Path,
        config: UploadConfig,
    ) -> Result<mpsc::Receiver<TransferEvent>, TransferError> {
        if self.session.is_active() {
            return Err(TransferError::AlreadyRunning);
        }
        let source = ChunkSource::open(path)?;

        let session = Arc::new(TransferSession::new(
            Uuid::new_v4().to_string(),
            source.len(),
        ));
        let cancel = CancellationToken::new();
        let (gate, gate_rx) = watch::channel(Gate::Run);
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);

        self.session = session.clone();
        self.cancel = cancel.clone();
        self.gate = gate;

        info!(transfer = %session.id(), file = %path.display(), total = source.len(), "starting upload");
        let driver = Driver {
            id: session.id(),
            client: self.client.clone(),
            session,
            config,
            events: events_tx,
            cancel,
            gate: gate_rx,
        };
        tokio::spawn(driver.run(source));
        Ok(events_rx)
    }

    /// Requests a pause. Takes effect at the next suspension point; a chunk
    /// already in flight finishes and commits first. Ignored unless the
    /// transfer is uploading.
    pub fn pause(&self) {
        if self.session.status() == TransferStatus::Uploading {
            let _ = self.gate.send(Gate::Pause);
        }
    }

    /// Lifts a pause. The drive task reconciles its offset with the server
    /// before sending again. Ignored when no pause is pending.
    pub fn resume(&self) {
        if self.session.is_active() && *self.gate.borrow() == Gate::Pause {
            let _ = self.gate.send(Gate::Run);
        }
    }

    /// Cancels the transfer, aborting any in-flight network operation.
    /// Chunks the server has already accepted are not rolled back. No-op
    /// once the transfer is terminal.
    pub fn cancel(&self) {
        let status = self.session.status();
        if status.is_terminal() {
            return;
        }
        if status == TransferStatus::Idle {
            self.session.cancel();
            return;
        }
        self.cancel.cancel();
    }

    /// Discards the current transfer and returns to idle, cancelling the
    /// drive task if one is still running. The only way out of a failed
    /// transfer.
    pub fn reset(&mut self) {
        self.cancel.cancel();
        self.session = Arc::new(TransferSession::idle());
        self.cancel = CancellationToken::new();
        let (gate, _) = watch::channel(Gate::Run);
        self.gate = gate;
    }

    pub fn status(&self) -> TransferStatus {
        self.session.status()
    }

    pub fn progress(&self) -> TransferProgress {
        self.session.progress()
    }

    /// Where the upload landed, why it failed, or that it was cancelled.
    /// `None` while the transfer has not finished.
    pub fn outcome(&self) -> Option<TransferOutcome> {
        self.session.outcome()
    }

    pub fn location(&self) -> Option<SessionLocation> {
        self.session.location()
    }
}

impl Drop for Uploader {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// ------------------------------------------------------------------- //
// Drive task
// ------------------------------------------------------------------- //

struct Driver {
    id: String,
    client: Arc<dyn ProtocolClient>,
    session: Arc<TransferSession>,
    config: UploadConfig,
    events: mpsc::Sender<TransferEvent>,
    cancel: CancellationToken,
    gate: watch::Receiver<Gate>,
}

impl Driver {
    async fn run(mut self, source: ChunkSource) {
        let total = source.len();
        self.set_status(TransferStatus::Creating).await;

        let location = match self.create_session(total).await {
            Ok(location) => location,
            Err(end) => return self.finish(end).await,
        };
        self.session.set_location(location.clone());
        self.set_status(TransferStatus::Uploading).await;

        match self.upload_chunks(&location, source).await {
            Ok(()) => self.finish_completed(location).await,
            Err(end) => self.finish(end).await,
        }
    }

    async fn create_session(&mut self, total: u64) -> Result<SessionLocation, End> {
        let mut retry = RetryState::new(&self.config.backoff);
        let mut last: Option<ProtocolError> = None;
        loop {
            let Some((attempt, delay)) = retry.next_attempt() else {
                return Err(End::Failed(exhausted(last.take())));
            };
            if attempt > 1 {
                self.emit(TransferEvent::Retrying {
                    attempt,
                    delay_secs: delay.as_secs_f64(),
                })
                .await;
                self.sleep_cancellable(delay).await?;
            }
            let request = self.client.create(total, &self.config.metadata);
            match self.timed(self.config.request_timeout, request).await? {
                Ok(location) => {
                    info!(transfer = %self.id, location = %location, "upload session created");
                    return Ok(location);
                }
                Err(err) if err.is_transient() => {
                    warn!(transfer = %self.id, error = %err, attempt, "session create failed");
                    last = Some(err);
                }
                Err(err) => return Err(End::Failed(err.into())),
            }
        }
    }

    async fn upload_chunks(
        &mut self,
        location: &SessionLocation,
        mut source: ChunkSource,
    ) -> Result<(), End> {
        let total = source.len();
        let plan = ChunkPlan::new(total, self.config.chunk_size);
        let mut estimator = RateEstimator::new();
        estimator.record(Instant::now(), 0, total);

        let mut offset = 0u64;
        let mut retry = RetryState::new(&self.config.backoff);
        let mut last: Option<ProtocolError> = None;
        let mut needs_reconcile = false;

        loop {
            if self.park_if_paused().await? {
                // Resume path: the local offset may be stale, so reconcile
                // once with a fresh budget before sending anything.
                retry = RetryState::new(&self.config.backoff);
                last = None;
                let mut resume_retry = RetryState::new(&self.config.backoff);
                offset = self
                    .reconcile(location, total, offset, &mut resume_retry, &mut last, &mut estimator)
                    .await?;
                needs_reconcile = false;
            }

            if needs_reconcile {
                // Conflict path: shares the chunk's retry budget so a server
                // that keeps disagreeing cannot loop forever.
                offset = self
                    .reconcile(location, total, offset, &mut retry, &mut last, &mut estimator)
                    .await?;
                needs_reconcile = false;
            }

            let Some(range) = plan.range_at(offset) else {
                return Ok(());
            };

            let (returned, read) = match tokio::task::spawn_blocking(move || {
                let bytes = source.read_range(range);
                (source, bytes)
            })
            .await
            {
                Ok(pair) => pair,
                Err(err) => return Err(End::Failed(TransferError::Join(err.to_string()))),
            };
            source = returned;
            let bytes = match read {
                Ok(bytes) => bytes,
                Err(err) => return Err(End::Failed(TransferError::Io(err))),
            };

            let Some((attempt, delay)) = retry.next_attempt() else {
                return Err(End::Failed(exhausted(last.take())));
            };
            if attempt > 1 {
                self.emit(TransferEvent::Retrying {
                    attempt,
                    delay_secs: delay.as_secs_f64(),
                })
                .await;
                match self.wait_backoff(delay).await? {
                    BackoffWait::Elapsed => {}
                    BackoffWait::Paused => continue,
                }
            }

            let request = self.client.send_chunk(location, offset, &bytes);
            match self.timed(self.config.chunk_timeout, request).await? {
                Ok(acked) if acked == range.end => {
                    offset = acked;
                    let rate = estimator.record(Instant::now(), offset, total);
                    self.session.set_offset(offset, rate);
                    retry = RetryState::new(&self.config.backoff);
                    last = None;
                    debug!(transfer = %self.id, offset, total, "chunk accepted");
                    self.emit(TransferEvent::Progress(self.session.progress()))
                        .await;
                }
                Ok(acked) => {
                    // The server accepted something other than what was
                    // sent; trust only its queried offset from here.
                    warn!(transfer = %self.id, sent = range.end, acked, "unexpected acknowledged offset");
                    last = Some(ProtocolError::OffsetConflict {
                        expected: range.end,
                        actual: acked,
                    });
                    needs_reconcile = true;
                }
                Err(err @ ProtocolError::OffsetConflict { .. }) => {
                    warn!(transfer = %self.id, error = %err, "offset conflict, reconciling");
                    last = Some(err);
                    needs_reconcile = true;
                }
                Err(err) if err.is_transient() => {
                    warn!(transfer = %self.id, error = %err, attempt, "chunk send failed");
                    last = Some(err);
                }
                Err(err) => return Err(End::Failed(err.into())),
            }
        }
    }

    /// Queries the server's committed offset and adopts it, in either
    /// direction. An offset beyond the declared length means the server and
    /// client no longer agree on what is being uploaded.
    async fn reconcile(
        &mut self,
        location: &SessionLocation,
        total: u64,
        offset: u64,
        retry: &mut RetryState,
        last: &mut Option<ProtocolError>,
        estimator: &mut RateEstimator,
    ) -> Result<u64, End> {
        let server = self.query_committed(location, retry, last).await?;
        if server > total {
            return Err(End::Failed(TransferError::Protocol(
                ProtocolError::ServerError {
                    status: 0,
                    message: format!("server offset {server} exceeds declared length {total}"),
                },
            )));
        }
        if server != offset {
            info!(transfer = %self.id, local = offset, server, "offset reconciled with server");
        }
        estimator.reset();
        estimator.record(Instant::now(), server, total);
        self.session.set_offset(server, RateEstimate::UNKNOWN);
        Ok(server)
    }

    async fn query_committed(
        &mut self,
        location: &SessionLocation,
        retry: &mut RetryState,
        last: &mut Option<ProtocolError>,
    ) -> Result<u64, End> {
        loop {
            let Some((attempt, delay)) = retry.next_attempt() else {
                return Err(End::Failed(exhausted(last.take())));
            };
            if attempt > 1 {
                self.emit(TransferEvent::Retrying {
                    attempt,
                    delay_secs: delay.as_secs_f64(),
                })
                .await;
                self.sleep_cancellable(delay).await?;
            }
            let request = self.client.query_offset(location);
            match self.timed(self.config.request_timeout, request).await? {
                Ok(server) => return Ok(server),
                Err(err) if err.is_transient() => {
                    warn!(transfer = %self.id, error = %err, attempt, "offset query failed");
                    *last = Some(err);
                }
                Err(err) => return Err(End::Failed(err.into())),
            }
        }
    }

    /// Parks while the gate reads `Pause`. Returns whether the task actually
    /// parked, which is what obliges a reconcile.
    async fn park_if_paused(&mut self) -> Result<bool, End> {
        if *self.gate.borrow() != Gate::Pause {
            return Ok(false);
        }
        self.set_status(TransferStatus::Paused).await;
        info!(transfer = %self.id, "transfer paused");
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return Err(End::Cancelled),
                changed = self.gate.changed() => {
                    if changed.is_err() {
                        return Err(End::Cancelled);
                    }
                    if *self.gate.borrow() == Gate::Run {
                        break;
                    }
                }
            }
        }
        self.set_status(TransferStatus::Uploading).await;
        info!(transfer = %self.id, "transfer resumed");
        Ok(true)
    }

    /// Backoff wait in the send path; a pause request interrupts the wait
    /// and hands control back to the loop head.
    async fn wait_backoff(&mut self, delay: Duration) -> Result<BackoffWait, End> {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return Err(End::Cancelled),
                _ = &mut sleep => return Ok(BackoffWait::Elapsed),
                changed = self.gate.changed() => {
                    if changed.is_err() {
                        return Err(End::Cancelled);
                    }
                    if *self.gate.borrow() == Gate::Pause {
                        return Ok(BackoffWait::Paused);
                    }
                }
            }
        }
    }

    async fn sleep_cancellable(&self, delay: Duration) -> Result<(), End> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(End::Cancelled),
            _ = tokio::time::sleep(delay) => Ok(()),
        }
    }

    /// Races a network request against cancellation and the given time
    /// limit. Timeouts come back as [`ProtocolError::EndpointUnavailable`]
    /// so the retry policy treats them like any other transient failure.
    async fn timed<T>(
        &self,
        limit: Duration,
        request: impl Future<Output = Result<T, ProtocolError>>,
    ) -> Result<Result<T, ProtocolError>, End> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(End::Cancelled),
            outcome = tokio::time::timeout(limit, request) => Ok(match outcome {
                Ok(result) => result,
                Err(_) => Err(ProtocolError::EndpointUnavailable("request timed out".into())),
            }),
        }
    }

    async fn set_status(&self, status: TransferStatus) {
        self.session.set_status(status);
        self.emit(TransferEvent::StateChanged { status }).await;
    }

    async fn emit(&self, event: TransferEvent) {
        let _ = self.events.send(event).await;
    }

    async fn finish(self, end: End) {
        match end {
            End::Cancelled => self.finish_cancelled().await,
            End::Failed(err) => self.finish_failed(err).await,
        }
    }

    async fn finish_completed(self, location: SessionLocation) {
        self.session.complete();
        info!(transfer = %self.id, location = %location, "upload completed");
        self.emit(TransferEvent::StateChanged {
            status: TransferStatus::Completed,
        })
        .await;
        self.emit(TransferEvent::Completed { location }).await;
    }

    async fn finish_failed(self, err: TransferError) {
        let kind = err.failure_kind();
        let message = err.to_string();
        self.session.fail(kind, &message);
        warn!(transfer = %self.id, error = %message, "upload failed");
        self.emit(TransferEvent::StateChanged {
            status: TransferStatus::Failed,
        })
        .await;
        self.emit(TransferEvent::Failed { kind, message }).await;
    }

    async fn finish_cancelled(self) {
        self.session.cancel();
        info!(transfer = %self.id, "upload cancelled");
        self.emit(TransferEvent::StateChanged {
            status: TransferStatus::Cancelled,
        })
        .await;
    }
}

fn exhausted(last: Option<ProtocolError>) -> TransferError {
    let err = last
        .unwrap_or_else(|| ProtocolError::EndpointUnavailable("retry budget exhausted".into()));
    TransferError::Protocol(err)
}
