use std::path::{Path, PathBuf};
use std::sync::Arc;

use one_access::{AccessManager, access_recipes, enable_access_reverse_maps};
use one_channels::{ChannelManager, Ed25519Signer, channel_recipes};
use one_chum::chum_recipes;
use one_common::{IdHash, PersonId};
use one_events::Dispatcher;
use one_microdata::{DataValue, OneObject};
use one_objects::{ObjectStore, ReverseMapConfig, version_recipes};
use one_recipes::{Recipe, RecipeRegistry, RecipeRule, RuleValue};
use one_storage::{
    FileSystemStorageBackend, HashedStore, change_storage_password, init_keys,
};

use crate::OneInstanceError;

/// Everything [`init_instance`] needs to boot.
pub struct InstanceConfig {
    /// The instance name; with `email` it forms the instance identity.
    pub name: String,
    /// The owning person's email.
    pub email: String,
    /// The secret the storage keys are wrapped with.
    pub secret: String,
    /// A display name for the owner's Person record.
    pub owner_name: Option<String>,
    /// The base path; the instance lives at `<base>#<instanceIdHash>`.
    pub directory: PathBuf,
    /// Application recipes registered after the bootstrap set.
    pub initial_recipes: Vec<Recipe>,
    /// Extra `(referrer type, field)` pairs indexed in reverse maps.
    pub enabled_reverse_maps: Vec<(String, String)>,
    /// Extra `(referrer type, field)` pairs indexed for identity
    /// references.
    pub enabled_reverse_maps_for_id_objects: Vec<(String, String)>,
    /// Deadline for storage initialization, in milliseconds.
    pub storage_init_timeout_ms: u64,
    /// Seal every namespace, not just the private one.
    pub encrypt_storage: bool,
    /// Secret key bytes for the owner's signing capability, when posts
    /// should carry author metadata.
    pub person_sign_key: Option<[u8; 32]>,
    /// Fail with `InstanceExists` instead of opening an existing instance.
    pub expect_new: bool,
}

impl InstanceConfig {
    /// A config with defaults matching an embedded single-user setup.
    pub fn new(
        name: impl Into<String>,
        email: impl Into<String>,
        secret: impl Into<String>,
        directory: impl Into<PathBuf>,
    ) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
            secret: secret.into(),
            owner_name: None,
            directory: directory.into(),
            initial_recipes: Vec::new(),
            enabled_reverse_maps: Vec::new(),
            enabled_reverse_maps_for_id_objects: Vec::new(),
            storage_init_timeout_ms: 1_000,
            encrypt_storage: true,
            person_sign_key: None,
            expect_new: false,
        }
    }
}

/// A running instance: the context handle everything else hangs off.
pub struct Instance {
    /// The instance's identity hash.
    pub id_hash: IdHash,
    /// The owner's person identity.
    pub owner: PersonId,
    /// The typed object layer.
    pub objects: Arc<ObjectStore<FileSystemStorageBackend>>,
    /// The access layer.
    pub access: Arc<AccessManager<FileSystemStorageBackend>>,
    /// The channel manager.
    pub channels: Arc<ChannelManager<FileSystemStorageBackend>>,
    /// The event dispatcher.
    pub events: Arc<Dispatcher>,
    /// The recipe registry in effect.
    pub registry: Arc<RecipeRegistry>,
    root: PathBuf,
    update_pump: tokio::task::JoinHandle<()>,
}

impl std::fmt::Debug for Instance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Instance")
            .field("id_hash", &self.id_hash)
            .field("owner", &self.owner)
            .field("root", &self.root)
            .finish_non_exhaustive()
    }
}

impl Instance {
    /// The directory this instance persists under.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Shuts the instance down. Dropping the handle has the same effect.
    pub fn close(self) {
        drop(self);
    }
}

impl Drop for Instance {
    fn drop(&mut self) {
        self.update_pump.abort();
    }
}

/// The bootstrap recipes every instance registers before user recipes.
pub fn core_recipes() -> Vec<Recipe> {
    let mut recipes = vec![Recipe {
        name: "Instance".into(),
        rules: vec![
            RecipeRule::new("name", RuleValue::String { regex: None }).id(),
            RecipeRule::new("email", RuleValue::String { regex: None }).id(),
        ],
    }];
    recipes.extend(access_recipes());
    recipes.extend(version_recipes());
    recipes.extend(channel_recipes());
    recipes.extend(chum_recipes());
    recipes
}

/// The identity hash of an instance named by `(name, email)`.
pub fn instance_id(name: &str, email: &str) -> Result<IdHash, OneInstanceError> {
    let registry = RecipeRegistry::new();
    registry.register_all(core_recipes())?;
    let record = OneObject::new("Instance")
        .with("name", DataValue::String(name.to_owned()))
        .with("email", DataValue::String(email.to_owned()));
    let text = one_microdata::serialize(&record, &registry)
        .map_err(one_objects::OneObjectError::from)?;
    let id_hash = one_microdata::id_hash_of(&text, &registry)
        .map_err(one_objects::OneObjectError::from)?
        .expect("Instance is a versioned type");
    Ok(id_hash)
}

/// The storage root of an instance: `<base>#<instanceIdHash>`.
pub fn instance_root(directory: &Path, name: &str, email: &str) -> Result<PathBuf, OneInstanceError> {
    let id_hash = instance_id(name, email)?;
    Ok(PathBuf::from(format!(
        "{}#{}",
        directory.display(),
        id_hash.to_hex()
    )))
}

/// Whether an instance with this identity exists under the base path.
pub async fn instance_exists(
    directory: &Path,
    name: &str,
    email: &str,
) -> Result<bool, OneInstanceError> {
    let root = instance_root(directory, name, email)?;
    Ok(tokio::fs::try_exists(&root).await.unwrap_or(false))
}

/// Boots an instance: opens (or creates) its store, unwraps keys with the
/// secret, registers recipes, commits the instance and owner records and
/// wires the components together.
///
/// Fails with `AuthFailed` when the store exists but the secret does not
/// unwrap its keys, with `InstanceExists` when `expect_new` is set and the
/// store is already there, and with `Timeout` when storage initialization
/// exceeds its deadline.
#[tracing::instrument(level = "info", skip_all, fields(name = %config.name))]
pub async fn init_instance(config: InstanceConfig) -> Result<Instance, OneInstanceError> {
    let id_hash = instance_id(&config.name, &config.email)?;
    let root = instance_root(&config.directory, &config.name, &config.email)?;
    let exists = tokio::fs::try_exists(&root).await.unwrap_or(false);
    if exists && config.expect_new {
        return Err(OneInstanceError::InstanceExists {
            name: config.name,
            email: config.email,
        });
    }

    let deadline = std::time::Duration::from_millis(config.storage_init_timeout_ms);
    let backend = tokio::time::timeout(deadline, async {
        if exists {
            FileSystemStorageBackend::open(&root).await
        } else {
            FileSystemStorageBackend::create(&root).await
        }
    })
    .await
    .map_err(|_| OneInstanceError::Timeout {
        millis: config.storage_init_timeout_ms,
    })??;
    let crypto = init_keys(&backend, &config.secret).await?;
    let store = HashedStore::with_encryption(backend, crypto, config.encrypt_storage);

    let registry = Arc::new(RecipeRegistry::new());
    registry.register_all(core_recipes())?;
    if !config.initial_recipes.is_empty() {
        registry.register_all(config.initial_recipes)?;
    }

    let mut reverse_maps = enable_access_reverse_maps(ReverseMapConfig::new());
    for (referrer_type, field) in config.enabled_reverse_maps {
        reverse_maps = reverse_maps.enable(referrer_type, field);
    }
    for (referrer_type, field) in config.enabled_reverse_maps_for_id_objects {
        reverse_maps = reverse_maps.enable_id(referrer_type, field);
    }

    let events = Arc::new(Dispatcher::new());
    let objects = Arc::new(ObjectStore::new(
        store,
        Arc::clone(&registry),
        Arc::clone(&events),
        reverse_maps,
    ));
    let access = Arc::new(AccessManager::new(Arc::clone(&objects)));
    let channels = ChannelManager::new(Arc::clone(&objects));
    let update_pump = channels.spawn_update_pump();

    let instance_record = OneObject::new("Instance")
        .with("name", DataValue::String(config.name.clone()))
        .with("email", DataValue::String(config.email.clone()));
    objects.commit_object(&instance_record).await?;

    let mut owner_record =
        OneObject::new("Person").with("email", DataValue::String(config.email.clone()));
    if let Some(owner_name) = &config.owner_name {
        owner_record = owner_record.with("name", DataValue::String(owner_name.clone()));
    }
    let owner = objects
        .commit_object(&owner_record)
        .await?
        .id_hash
        .expect("Person is a versioned type");

    if let Some(sign_key) = &config.person_sign_key {
        channels.set_author(owner, Arc::new(Ed25519Signer::from_secret(sign_key)));
    }

    tracing::info!(instance = %id_hash, %owner, "instance ready");
    Ok(Instance {
        id_hash,
        owner,
        objects,
        access,
        channels,
        events,
        registry,
        root,
        update_pump,
    })
}

/// Removes an instance's storage entirely. The identity's records are gone
/// afterwards; this is the only way anything is ever deleted.
pub async fn delete_instance(
    directory: &Path,
    name: &str,
    email: &str,
) -> Result<(), OneInstanceError> {
    let root = instance_root(directory, name, email)?;
    if !tokio::fs::try_exists(&root).await.unwrap_or(false) {
        return Err(OneInstanceError::InstanceNotFound {
            name: name.to_owned(),
            email: email.to_owned(),
        });
    }
    tokio::fs::remove_dir_all(&root)
        .await
        .map_err(one_storage::OneStorageError::from)?;
    Ok(())
}

/// Rewraps an instance's storage keys under a new secret. The instance must
/// not be open.
pub async fn change_instance_secret(
    directory: &Path,
    name: &str,
    email: &str,
    old_secret: &str,
    new_secret: &str,
) -> Result<(), OneInstanceError> {
    let root = instance_root(directory, name, email)?;
    if !tokio::fs::try_exists(&root).await.unwrap_or(false) {
        return Err(OneInstanceError::InstanceNotFound {
            name: name.to_owned(),
            email: email.to_owned(),
        });
    }
    let backend = FileSystemStorageBackend::open(&root).await?;
    change_storage_password(&backend, old_secret, new_secret).await?;
    Ok(())
}
