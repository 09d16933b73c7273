use std::collections::HashSet;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use one_access::{AccessManager, AccessTarget};
use one_common::{Hash, IdHash, PersonId};
use one_microdata::Reference;
use one_objects::ObjectStore;
use one_storage::{Namespace, StorageBackend};

use crate::{ChumErrorRecord, ChumRequest, ChumResponse, TransferLedger, WireReference};

/// The serving half of a session: answers the peer's requests, gated by the
/// access layer.
///
/// Authorization follows the closure the importer walks: the roots listed
/// for the peer and every child target handed out through `GetChildren`
/// become requestable, so a well-behaved importer never sees
/// `Unauthorized`, and a misbehaved one cannot reach past what its grants
/// span.
pub struct Exporter<B: StorageBackend> {
    objects: Arc<ObjectStore<B>>,
    access: Arc<AccessManager<B>>,
    remote_person: PersonId,
    authorized_ids: HashSet<IdHash>,
    authorized_hashes: HashSet<Hash>,
    errors: Vec<ChumErrorRecord>,
    served: TransferLedger,
}

impl<B: StorageBackend> Exporter<B> {
    /// Creates the exporter for one authenticated peer.
    pub fn new(
        objects: Arc<ObjectStore<B>>,
        access: Arc<AccessManager<B>>,
        remote_person: PersonId,
    ) -> Self {
        Self {
            objects,
            access,
            remote_person,
            authorized_ids: HashSet::new(),
            authorized_hashes: HashSet::new(),
            errors: Vec::new(),
            served: TransferLedger::default(),
        }
    }

    /// The unauthorized (and otherwise failed) requests seen this session.
    pub fn errors(&self) -> &[ChumErrorRecord] {
        &self.errors
    }

    /// What this exporter has served, per namespace.
    pub fn served(&self) -> TransferLedger {
        self.served
    }

    /// Serves one request. Failures come back as error responses, never as
    /// session failures.
    pub async fn handle(&mut self, request: ChumRequest) -> ChumResponse {
        match self.dispatch(request).await {
            Ok(response) => response,
            Err((code, target)) => {
                if code == "Unauthorized" {
                    self.errors.push(ChumErrorRecord {
                        code: code.clone(),
                        target: target.clone(),
                    });
                }
                ChumResponse::Error { code, target }
            }
        }
    }

    async fn dispatch(&mut self, request: ChumRequest) -> Result<ChumResponse, (String, String)> {
        match request {
            ChumRequest::ListAccessible { person, until } => {
                if person != self.remote_person {
                    return Err(("InvalidRequest".into(), person.to_hex()));
                }
                let roots = self
                    .access
                    .accessible_roots(person, until)
                    .await
                    .map_err(|error| (error.code().to_owned(), person.to_hex()))?;
                self.authorized_ids.extend(roots.iter().copied());
                Ok(ChumResponse::Accessible { roots })
            }
            ChumRequest::GetIdObject { id_hash } => {
                self.ensure_id_allowed(id_hash).await?;
                let text = self
                    .objects
                    .id_object_text(id_hash)
                    .await
                    .map_err(|error| (error.code().to_owned(), id_hash.to_hex()))?
                    .ok_or_else(|| ("FileNotFound".to_owned(), id_hash.to_hex()))?;
                let current = self
                    .objects
                    .current_version(id_hash)
                    .await
                    .map_err(|error| (error.code().to_owned(), id_hash.to_hex()))?
                    .expect("identity with an id object has a current version");
                self.authorized_hashes.insert(current.data);
                self.served.id_objects += 1;
                Ok(ChumResponse::IdObject {
                    text,
                    current: current.data,
                })
            }
            ChumRequest::GetObject { hash } => {
                self.ensure_allowed(hash).await?;
                let text = self
                    .objects
                    .read_object_text(hash)
                    .await
                    .map_err(|error| (error.code().to_owned(), hash.to_hex()))?;
                self.served.objects += 1;
                Ok(ChumResponse::Object { text })
            }
            ChumRequest::GetChildren { hash } => {
                self.ensure_allowed(hash).await?;
                let children = self
                    .objects
                    .children(hash)
                    .await
                    .map_err(|error| (error.code().to_owned(), hash.to_hex()))?;
                let references: Vec<WireReference> = children
                    .into_iter()
                    .map(|(_, reference)| {
                        match reference {
                            Reference::Object(target)
                            | Reference::Blob(target)
                            | Reference::Clob(target) => {
                                self.authorized_hashes.insert(target);
                            }
                            Reference::Id(target) => {
                                self.authorized_ids.insert(target);
                            }
                        }
                        reference.into()
                    })
                    .collect();
                Ok(ChumResponse::Children { references })
            }
            ChumRequest::GetMetadata { hash } => {
                self.ensure_allowed(hash).await?;
                let text = self
                    .objects
                    .read_object_text(hash)
                    .await
                    .map_err(|error| (error.code().to_owned(), hash.to_hex()))?;
                let type_name = one_microdata::type_name_of(&text)
                    .map_err(|error| (error.code().to_owned(), hash.to_hex()))?;
                let id_hash = one_microdata::id_hash_of(&text, self.objects.registry())
                    .map_err(|error| (error.code().to_owned(), hash.to_hex()))?;
                Ok(ChumResponse::Metadata { type_name, id_hash })
            }
            ChumRequest::GetBlob { hash } => {
                self.ensure_allowed(hash).await?;
                let bytes = self
                    .objects
                    .store()
                    .read(Namespace::Blobs, &hash.to_hex())
                    .await
                    .map_err(|error| (error.code().to_owned(), hash.to_hex()))?;
                self.served.blobs += 1;
                Ok(ChumResponse::Blob {
                    base64: STANDARD.encode(bytes),
                })
            }
            ChumRequest::GetClob { hash } => {
                self.ensure_allowed(hash).await?;
                let text = self
                    .objects
                    .store()
                    .read_text(Namespace::Clobs, &hash.to_hex())
                    .await
                    .map_err(|error| (error.code().to_owned(), hash.to_hex()))?;
                self.served.clobs += 1;
                Ok(ChumResponse::Clob { text })
            }
        }
    }

    /// A concrete record is requestable when an earlier response authorized
    /// it, or a grant covers it directly.
    async fn ensure_allowed(&mut self, hash: Hash) -> Result<(), (String, String)> {
        if self.authorized_hashes.contains(&hash) {
            return Ok(());
        }
        let allowed = match self
            .access
            .may_access(self.remote_person, &AccessTarget::Object(hash))
            .await
        {
            Ok(allowed) => allowed,
            // Non-object records (blobs, clobs) are only reachable through
            // the closure.
            Err(error) if error.code() == "FileNotFound" => false,
            Err(error) => return Err((error.code().to_owned(), hash.to_hex())),
        };
        if allowed {
            self.authorized_hashes.insert(hash);
            Ok(())
        } else {
            Err(("Unauthorized".to_owned(), hash.to_hex()))
        }
    }

    async fn ensure_id_allowed(&mut self, id_hash: IdHash) -> Result<(), (String, String)> {
        if self.authorized_ids.contains(&id_hash) {
            return Ok(());
        }
        let allowed = self
            .access
            .may_access(self.remote_person, &AccessTarget::Id(id_hash))
            .await
            .map_err(|error| (error.code().to_owned(), id_hash.to_hex()))?;
        if allowed {
            self.authorized_ids.insert(id_hash);
            Ok(())
        } else {
            Err(("Unauthorized".to_owned(), id_hash.to_hex()))
        }
    }
}
