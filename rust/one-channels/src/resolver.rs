use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use one_common::{Hash, IdHash};
use one_objects::{CrdtResolver, ObjectStore, OneObjectError};
use one_storage::StorageBackend;
use parking_lot::RwLock;

use crate::{
    ChannelInfo, MergeOptions, MergeOutcome, OneChannelError, merge_chains, write_entry,
};

/// Per-channel tuning, keyed by the channel's identity hash.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChannelSettings {
    /// Truncate the chain to this many entries during merges.
    pub max_size: Option<usize>,
    /// Attach an affirmation signature and the author's profile version to
    /// every posted entry.
    pub author_metadata: bool,
}

/// The shared settings table of a channel manager.
pub type SettingsTable = Arc<RwLock<HashMap<String, ChannelSettings>>>;

/// The merge algorithm registered for `ChannelInfo`.
///
/// Given concurrent `ChannelInfo` versions it interleaves their chains into
/// one, rebuilds the prefix above the common history, and writes the merged
/// `ChannelInfo` record. It writes records only by content address — the
/// caller (the version layer) wraps the result in the `Merge` node and
/// publishes it.
pub struct ChannelMergeResolver {
    settings: SettingsTable,
}

impl ChannelMergeResolver {
    /// Creates the resolver over a settings table shared with the manager.
    pub fn new(settings: SettingsTable) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl<B: StorageBackend> CrdtResolver<B> for ChannelMergeResolver {
    async fn merge(
        &self,
        objects: &ObjectStore<B>,
        id_hash: IdHash,
        heads: &[Hash],
    ) -> Result<Hash, OneObjectError> {
        merge_channel_versions(objects, id_hash, heads, &self.settings)
            .await
            .map_err(|error| match error {
                OneChannelError::Object(inner) => inner,
                other => OneObjectError::Microdata(one_microdata::OneMicrodataError::MicrodataMalformed {
                    at: 0,
                    reason: match other {
                        OneChannelError::ChainOrderViolation { .. } => "chain order",
                        _ => "channel record",
                    },
                }),
            })
    }
}

/// Merges concurrent `ChannelInfo` versions into a single merged record and
/// returns its content address.
pub async fn merge_channel_versions<B: StorageBackend>(
    objects: &ObjectStore<B>,
    id_hash: IdHash,
    heads: &[Hash],
    settings: &SettingsTable,
) -> Result<Hash, OneChannelError> {
    let mut infos = Vec::with_capacity(heads.len());
    for head in heads {
        let object = objects.read_object(*head).await?;
        infos.push(ChannelInfo::from_object(&object, *head)?);
    }
    let channel = infos[0].channel.clone();
    let chain_heads: Vec<Option<Hash>> = infos.iter().map(|info| info.head).collect();
    let max_size = settings
        .read()
        .get(&id_hash.to_hex())
        .and_then(|settings| settings.max_size);

    // Truncation needs the full sequence; otherwise the shared tail can be
    // reused verbatim.
    let options = MergeOptions {
        stop_when_single: max_size.is_none(),
        ..MergeOptions::default()
    };
    let outcome = merge_chains(objects, &chain_heads, options).await?;
    let head = rebuild_chain(objects, &outcome, max_size).await?;

    let merged = channel.info_object(head);
    let text = one_microdata::serialize(&merged, objects.registry())
        .map_err(OneObjectError::from)?;
    let (hash, _) = objects
        .store()
        .write_object_text(&text)
        .await
        .map_err(OneObjectError::from)?;
    tracing::debug!(channel = %channel.id, merged = %hash, "merged channel versions");
    Ok(hash)
}

/// Rebuilds a chain bottom-up from a merged sequence.
///
/// Entries are re-written with recomputed `previous` links; entries whose
/// content is unchanged resolve to their existing hashes, which is what
/// makes re-merging idempotent. With `max_size`, only the newest entries
/// survive.
pub async fn rebuild_chain<B: StorageBackend>(
    objects: &ObjectStore<B>,
    outcome: &MergeOutcome,
    max_size: Option<usize>,
) -> Result<Option<Hash>, OneChannelError> {
    let mut descending: Vec<_> = outcome
        .entries
        .iter()
        .filter(|merged| !merged.common_history)
        .collect();
    let mut previous = outcome.common_tail.as_ref().map(|entry| entry.entry_hash);

    if let Some(limit) = max_size {
        if descending.len() >= limit {
            descending.truncate(limit);
            previous = None;
        }
    }

    for merged in descending.iter().rev() {
        let entry = &merged.entry;
        previous = Some(
            write_entry(objects, entry.creation_time_hash, &entry.metadata, previous).await?,
        );
    }
    Ok(previous)
}
