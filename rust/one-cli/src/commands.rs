use std::path::{Path, PathBuf};

use one_channels::ChannelId;
use one_common::{Hash, IdHash};
use one_instance::{Instance, InstanceConfig, init_instance, instance_exists};
use one_microdata::{DataValue, OneObject};
use one_recipes::{Recipe, RecipeRule, RuleValue};
use one_storage::Namespace;
use serde::{Deserialize, Serialize};

use crate::session::{self, Session};

/// A command failure carrying the exit code of §"Exit codes" in the help.
pub struct CliError {
    pub exit_code: u8,
    pub message: String,
}

impl CliError {
    pub fn not_found(message: impl Into<String>) -> Self {
        Self {
            exit_code: 4,
            message: message.into(),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self {
            exit_code: 2,
            message: message.into(),
        }
    }

    pub fn io(error: std::io::Error) -> Self {
        Self {
            exit_code: 1,
            message: error.to_string(),
        }
    }

    fn from_code(code: &str, message: String) -> Self {
        let exit_code = match code {
            "AuthFailed" => 3,
            "FileNotFound" | "InstanceNotFound" | "RuleNotFound" => 4,
            "Timeout" | "TransportClosed" | "ProtocolMismatch" => 5,
            _ => 1,
        };
        Self { exit_code, message }
    }
}

impl From<one_instance::OneInstanceError> for CliError {
    fn from(error: one_instance::OneInstanceError) -> Self {
        Self::from_code(error.code(), error.to_string())
    }
}

impl From<one_channels::OneChannelError> for CliError {
    fn from(error: one_channels::OneChannelError) -> Self {
        Self::from_code(error.code(), error.to_string())
    }
}

impl From<one_storage::OneStorageError> for CliError {
    fn from(error: one_storage::OneStorageError) -> Self {
        Self::from_code(error.code(), error.to_string())
    }
}

/// The known instances under a base directory, keyed by email.
#[derive(Default, Serialize, Deserialize)]
struct InstanceIndex {
    names: std::collections::BTreeMap<String, String>,
}

fn index_path(directory: &Path) -> PathBuf {
    directory.join("instances.json")
}

async fn load_index(directory: &Path) -> InstanceIndex {
    match tokio::fs::read(index_path(directory)).await {
        Ok(bytes) => serde_json::from_slice(&bytes).unwrap_or_default(),
        Err(_) => InstanceIndex::default(),
    }
}

async fn save_index(directory: &Path, index: &InstanceIndex) -> Result<(), CliError> {
    tokio::fs::create_dir_all(directory)
        .await
        .map_err(CliError::io)?;
    let bytes = serde_json::to_vec_pretty(index).expect("index serializes");
    tokio::fs::write(index_path(directory), bytes)
        .await
        .map_err(CliError::io)
}

/// The recipe the CLI posts payload files under.
fn payload_recipe() -> Recipe {
    Recipe {
        name: "JsonPayload".into(),
        rules: vec![RecipeRule::new("data", RuleValue::Stringifiable)],
    }
}

async fn open_instance(
    directory: &Path,
    session: &Session,
    secret: &str,
) -> Result<Instance, CliError> {
    let mut config = InstanceConfig::new(
        session.name.clone(),
        session.email.clone(),
        secret,
        directory,
    );
    config.initial_recipes = vec![payload_recipe()];
    Ok(init_instance(config).await?)
}

pub async fn init(
    directory: &Path,
    name: &str,
    email: &str,
    secret: &str,
) -> Result<(), CliError> {
    let mut config = InstanceConfig::new(name, email, secret, directory);
    config.initial_recipes = vec![payload_recipe()];
    config.expect_new = true;
    let instance = init_instance(config).await?;
    println!("{}", instance.id_hash);
    instance.close();

    let mut index = load_index(directory).await;
    index.names.insert(email.to_owned(), name.to_owned());
    save_index(directory, &index).await?;
    session::save(
        directory,
        &Session {
            name: name.to_owned(),
            email: email.to_owned(),
        },
    )
    .await
}

pub async fn login(directory: &Path, email: &str, secret: &str) -> Result<(), CliError> {
    let index = load_index(directory).await;
    let name = index
        .names
        .get(email)
        .ok_or_else(|| CliError::not_found(format!("no instance known for {email}")))?
        .clone();
    if !instance_exists(directory, &name, email).await? {
        return Err(CliError::not_found(format!("no instance named {name}")));
    }

    // Opening verifies the secret; a wrong one fails with AuthFailed. Only
    // the instance identity is persisted.
    let session = Session {
        name,
        email: email.to_owned(),
    };
    open_instance(directory, &session, secret).await?.close();
    session::save(directory, &session).await
}

pub async fn logout(directory: &Path) -> Result<(), CliError> {
    session::clear(directory).await
}

pub async fn post(
    directory: &Path,
    secret: &str,
    channel_id: &str,
    owner: Option<&str>,
    payload_path: &Path,
) -> Result<(), CliError> {
    let session = session::load(directory).await?;
    let instance = open_instance(directory, &session, secret).await?;

    let owner = match owner {
        None => None,
        Some("me") => Some(instance.owner),
        Some(hex) => Some(
            IdHash::from_hex(hex)
                .map_err(|_| CliError::invalid(format!("{hex:?} is not a person id")))?,
        ),
    };
    let bytes = tokio::fs::read(payload_path)
        .await
        .map_err(|_| CliError::not_found(format!("cannot read {}", payload_path.display())))?;
    let json: serde_json::Value = serde_json::from_slice(&bytes)
        .map_err(|error| CliError::invalid(format!("payload is not JSON: {error}")))?;

    let channel = ChannelId::new(channel_id, owner);
    instance.channels.create_channel(&channel).await?;
    let payload = OneObject::new("JsonPayload").with("data", DataValue::Stringifiable(json));
    let posted = instance.channels.post(&channel, &payload).await?;
    println!("{}", posted.entry);
    Ok(())
}

pub async fn channels(directory: &Path, secret: &str) -> Result<(), CliError> {
    let session = session::load(directory).await?;
    let instance = open_instance(directory, &session, secret).await?;
    for channel in instance.channels.channels().await? {
        let owner = channel
            .owner
            .map(|owner| owner.to_hex())
            .unwrap_or_else(|| "-".to_owned());
        println!("{}\t{owner}", channel.id);
    }
    Ok(())
}

pub async fn cat(directory: &Path, secret: &str, hash: &str) -> Result<(), CliError> {
    let hash = Hash::from_hex(hash)
        .map_err(|_| CliError::invalid(format!("{hash:?} is not a content address")))?;
    let session = session::load(directory).await?;
    let instance = open_instance(directory, &session, secret).await?;

    let store = instance.objects.store();
    for namespace in [Namespace::Objects, Namespace::Clobs] {
        if store.exists(namespace, &hash.to_hex()).await? {
            println!("{}", store.read_text(namespace, &hash.to_hex()).await?);
            return Ok(());
        }
    }
    Err(CliError::not_found(format!("{hash} is not stored here")))
}
