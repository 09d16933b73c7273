use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use one_access::AccessManager;
use one_common::{PersonId, Timestamp};
use one_objects::{Committed, ObjectStore};
use one_storage::StorageBackend;
use parking_lot::Mutex;
use tokio::sync::{Notify, oneshot};

use crate::{
    CancelFlag, ChumErrorRecord, ChumRequest, ChumResponse, ChumTransport, Exporter, Frame,
    FrameBody, Importer, OneChumError, TransferLedger, chum_record,
};

/// The parameters of one sync session.
#[derive(Debug, Clone)]
pub struct ChumConfig {
    /// A name for the session, part of the `Chum` record's identity.
    pub name: String,
    /// This instance's name.
    pub local_instance: String,
    /// The peer instance's name.
    pub remote_instance: String,
    /// The locally authenticated person.
    pub local_person: PersonId,
    /// The mutually authenticated remote person.
    pub remote_person: PersonId,
    /// Per-request deadline in milliseconds.
    pub request_timeout_ms: u64,
    /// Only identities whose newest version is at or before this time are
    /// pulled.
    pub cutoff: Timestamp,
}

impl ChumConfig {
    /// A config with the default request deadline and a cutoff of now.
    pub fn new(
        name: impl Into<String>,
        local_instance: impl Into<String>,
        remote_instance: impl Into<String>,
        local_person: PersonId,
        remote_person: PersonId,
    ) -> Self {
        Self {
            name: name.into(),
            local_instance: local_instance.into(),
            remote_instance: remote_instance.into(),
            local_person,
            remote_person,
            request_timeout_ms: 30_000,
            cutoff: Timestamp::now(),
        }
    }
}

/// The result of a finished session.
#[derive(Debug)]
pub struct ChumOutcome {
    /// The committed `Chum` record.
    pub record: Committed,
    /// What this side imported.
    pub imported: TransferLedger,
    /// What this side served.
    pub exported: TransferLedger,
    /// How many offered records already existed locally.
    pub already_existed: u64,
    /// Every error observed, import and export side.
    pub errors: Vec<ChumErrorRecord>,
}

struct SessionState {
    transport: Arc<dyn ChumTransport>,
    pending: Mutex<HashMap<u64, oneshot::Sender<ChumResponse>>>,
    next_id: AtomicU64,
    timeout_ms: u64,
}

/// A handle with which the importer issues requests and awaits their
/// responses.
#[derive(Clone)]
pub struct RequestSender {
    state: Arc<SessionState>,
}

impl RequestSender {
    /// Sends a request and waits for the correlated response, bounded by
    /// the session's per-request deadline.
    pub async fn send(&self, request: ChumRequest) -> Result<ChumResponse, OneChumError> {
        let id = self.state.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = oneshot::channel();
        self.state.pending.lock().insert(id, sender);

        self.state
            .transport
            .send(&Frame {
                id,
                body: FrameBody::Request(request),
            })
            .await?;

        let deadline = std::time::Duration::from_millis(self.state.timeout_ms);
        match tokio::time::timeout(deadline, receiver).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(_)) => Err(OneChumError::TransportClosed),
            Err(_) => {
                self.state.pending.lock().remove(&id);
                Err(OneChumError::Timeout {
                    request_id: id,
                    millis: self.state.timeout_ms,
                })
            }
        }
    }
}

/// Runs one symmetric sync session to completion: serves the peer while
/// importing everything accessible locally, then writes the final `Chum`
/// record.
///
/// The session ends when both importers have said goodbye or the transport
/// closes; either way the store is left consistent and the `Chum` record
/// reflects what actually happened.
#[tracing::instrument(level = "info", skip_all, fields(name = %config.name))]
pub async fn run_chum<B: StorageBackend>(
    objects: Arc<ObjectStore<B>>,
    access: Arc<AccessManager<B>>,
    config: ChumConfig,
    transport: Arc<dyn ChumTransport>,
    cancel: CancelFlag,
) -> Result<ChumOutcome, OneChumError> {
    let started = Timestamp::now();
    let state = Arc::new(SessionState {
        transport: Arc::clone(&transport),
        pending: Mutex::new(HashMap::new()),
        next_id: AtomicU64::new(1),
        timeout_ms: config.request_timeout_ms,
    });
    let exporter = Arc::new(tokio::sync::Mutex::new(Exporter::new(
        Arc::clone(&objects),
        Arc::clone(&access),
        config.remote_person,
    )));
    let remote_done = Arc::new(Notify::new());

    let receive_loop = tokio::spawn(receive_loop(
        Arc::clone(&state),
        Arc::clone(&exporter),
        Arc::clone(&remote_done),
    ));

    let importer = Importer::new(
        Arc::clone(&objects),
        RequestSender {
            state: Arc::clone(&state),
        },
        config.local_person,
        cancel,
    );
    let import_result = importer.run(config.cutoff).await;

    // Tell the peer we are done pulling, then keep serving until it is too
    // (the receive loop also notifies when the transport goes away).
    let _ = transport.send(&Frame {
        id: 0,
        body: FrameBody::Goodbye,
    })
    .await;
    let linger = std::time::Duration::from_millis(config.request_timeout_ms);
    let _ = tokio::time::timeout(linger, remote_done.notified()).await;
    transport.close().await;
    let _ = receive_loop.await;

    let (exported, mut errors) = {
        let exporter = exporter.lock().await;
        (exporter.served(), exporter.errors().to_vec())
    };
    errors.extend(importer.errors());
    let imported = importer.ledger();
    let already_existed = importer.already_existed();

    let record = chum_record(
        &config.name,
        &config.local_instance,
        &config.remote_instance,
        config.local_person,
        config.remote_person,
        exported,
        imported,
        already_existed,
        &errors,
        started,
        Timestamp::now(),
    );
    let record = objects.commit_object(&record).await?;
    tracing::info!(
        imported = imported.total(),
        exported = exported.total(),
        errors = errors.len(),
        "chum session finished"
    );

    import_result?;
    Ok(ChumOutcome {
        record,
        imported,
        exported,
        already_existed,
        errors,
    })
}

async fn receive_loop<B: StorageBackend>(
    state: Arc<SessionState>,
    exporter: Arc<tokio::sync::Mutex<Exporter<B>>>,
    remote_done: Arc<Notify>,
) {
    loop {
        let frame = match state.transport.recv().await {
            Ok(Some(frame)) => frame,
            Ok(None) => break,
            Err(error) => {
                tracing::debug!(code = error.code(), "receive loop stopping");
                break;
            }
        };
        match frame.body {
            FrameBody::Request(request) => {
                let response = exporter.lock().await.handle(request).await;
                let reply = Frame {
                    id: frame.id,
                    body: FrameBody::Response(response),
                };
                if state.transport.send(&reply).await.is_err() {
                    break;
                }
            }
            FrameBody::Response(response) => {
                if let Some(sender) = state.pending.lock().remove(&frame.id) {
                    let _ = sender.send(response);
                }
            }
            FrameBody::Goodbye => {
                remote_done.notify_waiters();
                remote_done.notify_one();
            }
        }
    }
    // Fail anything still waiting; the transport is gone.
    state.pending.lock().clear();
    remote_done.notify_waiters();
    remote_done.notify_one();
}
