use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use futures_util::future::BoxFuture;
use futures_util::stream::{self, StreamExt, TryStreamExt};
use one_common::{Hash, IdHash, PersonId, Timestamp};
use one_objects::ObjectStore;
use one_storage::{Namespace, StorageBackend};
use parking_lot::Mutex;
use tokio::sync::{OnceCell, Semaphore};

use crate::{
    ChumErrorRecord, ChumRequest, ChumResponse, OneChumError, RequestSender, TransferLedger,
    WireReference,
};

/// How many requests may be in flight at once.
const IMPORT_WINDOW: usize = 8;

/// Record types that must never arrive from a peer.
const FORBIDDEN_TYPES: [&str; 2] = ["Access", "IdAccess"];

/// A cooperative cancellation flag for a running session.
#[derive(Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// Creates an unset flag.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation: no further requests are scheduled; in-flight
    /// requests settle.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Whether cancellation was requested.
    pub fn is_canceled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// The fetching half of a session: walks the closure of the accessible
/// roots, dependencies first, and commits verified records locally.
///
/// Sibling roots and sibling references are fetched concurrently; the
/// window semaphore caps how many requests are on the wire at once, which
/// is also the session's backpressure. Each record gets a one-shot
/// completion cell, so a record shared by several parents is fetched once
/// and every dependent waits for it before committing.
pub struct Importer<B: StorageBackend> {
    objects: Arc<ObjectStore<B>>,
    requests: RequestSender,
    local_person: PersonId,
    window: Arc<Semaphore>,
    imports: Mutex<HashMap<String, Arc<OnceCell<()>>>>,
    claimed_ids: Mutex<HashSet<IdHash>>,
    ledger: Mutex<TransferLedger>,
    already_existed: AtomicU64,
    errors: Mutex<Vec<ChumErrorRecord>>,
    cancel: CancelFlag,
}

impl<B: StorageBackend> Importer<B> {
    /// Creates the importer for one session.
    pub fn new(
        objects: Arc<ObjectStore<B>>,
        requests: RequestSender,
        local_person: PersonId,
        cancel: CancelFlag,
    ) -> Self {
        Self {
            objects,
            requests,
            local_person,
            window: Arc::new(Semaphore::new(IMPORT_WINDOW)),
            imports: Mutex::new(HashMap::new()),
            claimed_ids: Mutex::new(HashSet::new()),
            ledger: Mutex::new(TransferLedger::default()),
            already_existed: AtomicU64::new(0),
            errors: Mutex::new(Vec::new()),
            cancel,
        }
    }

    /// What this importer has fetched, per namespace.
    pub fn ledger(&self) -> TransferLedger {
        *self.ledger.lock()
    }

    /// How many offered records the local store already held.
    pub fn already_existed(&self) -> u64 {
        self.already_existed.load(Ordering::Relaxed)
    }

    /// The per-record failures seen this session.
    pub fn errors(&self) -> Vec<ChumErrorRecord> {
        self.errors.lock().clone()
    }

    /// Runs the import: lists the accessible roots and walks their
    /// closures, up to [`IMPORT_WINDOW`] requests in flight. Per-record
    /// failures are recorded and skipped; only transport-level failures
    /// abort the run.
    #[tracing::instrument(level = "debug", skip_all)]
    pub async fn run(&self, cutoff: Timestamp) -> Result<(), OneChumError> {
        let response = self
            .request(ChumRequest::ListAccessible {
                person: self.local_person,
                until: cutoff,
            })
            .await?;
        let roots = match response {
            ChumResponse::Accessible { roots } => roots,
            other => return Err(unexpected(other)),
        };
        tracing::debug!(roots = roots.len(), "importing accessible roots");

        stream::iter(roots.into_iter().map(|root| self.import_identity(root)))
            .buffer_unordered(IMPORT_WINDOW)
            .try_collect::<Vec<()>>()
            .await?;
        Ok(())
    }

    /// Imports one identity: its current version and that version's
    /// closure.
    ///
    /// The first caller claims the identity and later callers skip it
    /// instead of waiting — identity references are allowed to cycle, and
    /// nothing orders a commit after an identity's closure (identity
    /// references are never dependency-checked).
    pub fn import_identity(&self, id_hash: IdHash) -> BoxFuture<'_, Result<(), OneChumError>> {
        Box::pin(async move {
            if self.cancel.is_canceled() || !self.claimed_ids.lock().insert(id_hash) {
                return Ok(());
            }
            self.fetch_identity(id_hash).await
        })
    }

    async fn fetch_identity(&self, id_hash: IdHash) -> Result<(), OneChumError> {
        let response = self.request(ChumRequest::GetIdObject { id_hash }).await?;
        let (text, current) = match response {
            ChumResponse::IdObject { text, current } => (text, current),
            ChumResponse::Error { code, target } => {
                self.record_error(code, target);
                return Ok(());
            }
            other => return Err(unexpected(other)),
        };

        let actual = IdHash::digest(&text);
        if actual != id_hash || !one_microdata::is_id_object(&text) {
            self.record_error("IdHashMismatch".to_owned(), id_hash.to_hex());
            return Ok(());
        }
        self.ledger.lock().id_objects += 1;
        self.import_object(current).await
    }

    /// Imports one object and, before it, everything it references.
    /// Concurrent callers for the same object share one fetch and all wait
    /// for the commit.
    pub fn import_object(&self, hash: Hash) -> BoxFuture<'_, Result<(), OneChumError>> {
        Box::pin(async move {
            if self.cancel.is_canceled() {
                return Ok(());
            }
            let cell = self.import_cell("object", &hash.to_hex());
            cell.get_or_try_init(|| self.fetch_object(hash)).await?;
            Ok(())
        })
    }

    async fn fetch_object(&self, hash: Hash) -> Result<(), OneChumError> {
        if self
            .objects
            .store()
            .exists(Namespace::Objects, &hash.to_hex())
            .await
            .map_err(one_objects::OneObjectError::from)?
        {
            self.already_existed.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }

        let response = self.request(ChumRequest::GetObject { hash }).await?;
        let text = match response {
            ChumResponse::Object { text } => text,
            ChumResponse::Error { code, target } => {
                self.record_error(code, target);
                return Ok(());
            }
            other => return Err(unexpected(other)),
        };

        let actual = Hash::digest(&text);
        if actual != hash {
            tracing::warn!(expected = %hash, %actual, "rejecting mis-hashed object");
            self.record_error("HashMismatch".to_owned(), hash.to_hex());
            return Ok(());
        }
        match one_microdata::type_name_of(&text) {
            Ok(type_name) if FORBIDDEN_TYPES.contains(&type_name.as_str()) => {
                self.record_error("ForbiddenType".to_owned(), hash.to_hex());
                return Ok(());
            }
            Ok(_) => {}
            Err(error) => {
                self.record_error(error.code().to_owned(), hash.to_hex());
                return Ok(());
            }
        }

        // Ask the exporter for the child list even though the canonical
        // text already names the children; the request is what authorizes
        // them on the far side.
        let response = self.request(ChumRequest::GetChildren { hash }).await?;
        let references = match response {
            ChumResponse::Children { references } => references,
            ChumResponse::Error { code, target } => {
                self.record_error(code, target);
                return Ok(());
            }
            other => return Err(unexpected(other)),
        };
        let imports = references.into_iter().map(|reference| async move {
            match reference {
                WireReference::Object(target) => self.import_object(target).await,
                WireReference::Id(target) => self.import_identity(target).await,
                WireReference::Blob(target) => self.import_blob(target).await,
                WireReference::Clob(target) => self.import_clob(target).await,
            }
        });
        stream::iter(imports)
            .buffer_unordered(IMPORT_WINDOW)
            .try_collect::<Vec<()>>()
            .await?;

        match self.objects.commit_remote_text(&text).await {
            Ok(_) => {
                self.ledger.lock().objects += 1;
            }
            Err(error) => {
                self.record_error(error.code().to_owned(), hash.to_hex());
            }
        }
        Ok(())
    }

    async fn import_blob(&self, hash: Hash) -> Result<(), OneChumError> {
        if self.cancel.is_canceled() {
            return Ok(());
        }
        let cell = self.import_cell("blob", &hash.to_hex());
        cell.get_or_try_init(|| self.fetch_blob(hash)).await?;
        Ok(())
    }

    async fn fetch_blob(&self, hash: Hash) -> Result<(), OneChumError> {
        let store = self.objects.store();
        if store
            .exists(Namespace::Blobs, &hash.to_hex())
            .await
            .map_err(one_objects::OneObjectError::from)?
        {
            self.already_existed.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }
        let response = self.request(ChumRequest::GetBlob { hash }).await?;
        let base64 = match response {
            ChumResponse::Blob { base64 } => base64,
            ChumResponse::Error { code, target } => {
                self.record_error(code, target);
                return Ok(());
            }
            other => return Err(unexpected(other)),
        };
        let Ok(bytes) = STANDARD.decode(base64.as_bytes()) else {
            self.record_error("HashMismatch".to_owned(), hash.to_hex());
            return Ok(());
        };
        if Hash::digest(&bytes) != hash {
            self.record_error("HashMismatch".to_owned(), hash.to_hex());
            return Ok(());
        }
        store
            .write_blob(&bytes)
            .await
            .map_err(one_objects::OneObjectError::from)?;
        self.ledger.lock().blobs += 1;
        Ok(())
    }

    async fn import_clob(&self, hash: Hash) -> Result<(), OneChumError> {
        if self.cancel.is_canceled() {
            return Ok(());
        }
        let cell = self.import_cell("clob", &hash.to_hex());
        cell.get_or_try_init(|| self.fetch_clob(hash)).await?;
        Ok(())
    }

    async fn fetch_clob(&self, hash: Hash) -> Result<(), OneChumError> {
        let store = self.objects.store();
        if store
            .exists(Namespace::Clobs, &hash.to_hex())
            .await
            .map_err(one_objects::OneObjectError::from)?
        {
            self.already_existed.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }
        let response = self.request(ChumRequest::GetClob { hash }).await?;
        let text = match response {
            ChumResponse::Clob { text } => text,
            ChumResponse::Error { code, target } => {
                self.record_error(code, target);
                return Ok(());
            }
            other => return Err(unexpected(other)),
        };
        if Hash::digest(&text) != hash {
            self.record_error("HashMismatch".to_owned(), hash.to_hex());
            return Ok(());
        }
        store
            .write_clob(&text)
            .await
            .map_err(one_objects::OneObjectError::from)?;
        self.ledger.lock().clobs += 1;
        Ok(())
    }

    /// Sends one request through the bounded in-flight window. The permit
    /// is held only for the round trip, so waiting dependents never starve
    /// the window.
    async fn request(&self, request: ChumRequest) -> Result<ChumResponse, OneChumError> {
        let _permit = self
            .window
            .acquire()
            .await
            .expect("the window semaphore is never closed");
        self.requests.send(request).await
    }

    /// The completion cell of one record, shared by every path that reaches
    /// it. The first caller runs the fetch; the rest wait for it to finish.
    fn import_cell(&self, kind: &str, hex: &str) -> Arc<OnceCell<()>> {
        Arc::clone(
            self.imports
                .lock()
                .entry(format!("{kind}:{hex}"))
                .or_default(),
        )
    }

    fn record_error(&self, code: String, target: String) {
        tracing::debug!(%code, %target, "import skipped a record");
        self.errors.lock().push(ChumErrorRecord { code, target });
    }
}

fn unexpected(response: ChumResponse) -> OneChumError {
    tracing::warn!(?response, "response of the wrong kind");
    OneChumError::InvalidRequest {
        reason: "response kind does not match the request",
    }
}
