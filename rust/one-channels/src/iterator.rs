use one_common::{Hash, Timestamp};
use one_objects::ObjectStore;
use one_storage::StorageBackend;

use crate::{ChannelEntry, OneChannelError, read_entry};

/// A descending walk along one chain, verifying the order invariant as it
/// goes.
pub struct ChainCursor<'a, B: StorageBackend> {
    objects: &'a ObjectStore<B>,
    next: Option<Hash>,
    last_key: Option<(Timestamp, Hash)>,
}

impl<'a, B: StorageBackend> ChainCursor<'a, B> {
    /// Starts a walk at the given head (`None` walks the empty chain).
    pub fn new(objects: &'a ObjectStore<B>, head: Option<Hash>) -> Self {
        Self {
            objects,
            next: head,
            last_key: None,
        }
    }

    /// The next entry toward the tail, or `None` at the end.
    pub async fn advance(&mut self) -> Result<Option<ChannelEntry>, OneChannelError> {
        let Some(entry_hash) = self.next else {
            return Ok(None);
        };
        let entry = read_entry(self.objects, entry_hash).await?;
        if let Some(last_key) = self.last_key
            && entry.key() >= last_key
        {
            return Err(OneChannelError::ChainOrderViolation { entry: entry_hash });
        }
        self.last_key = Some(entry.key());
        self.next = entry.previous;
        Ok(Some(entry))
    }
}

/// How the merge iterator runs and stops.
#[derive(Debug, Clone, Copy, Default)]
pub struct MergeOptions {
    /// Stop as soon as a single chain remains (or all chains sit on the
    /// same entry); everything below is one chain and can be reused
    /// verbatim. Leave unset to exhaust every chain.
    pub stop_when_single: bool,
    /// When stopping early, also yield the boundary element, flagged as
    /// common history.
    pub yield_common_history_element: bool,
    /// Diff mode: yield only elements that are absent from at least one
    /// chain.
    pub only_different_elements: bool,
}

/// One element of a merged sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedEntry {
    /// The element, represented by the duplicate with the largest entry
    /// hash when several chains carry it.
    pub entry: ChannelEntry,
    /// The cursor indices that carried this element.
    pub sources: Vec<usize>,
    /// Whether this is the boundary element where the chains become one.
    pub common_history: bool,
}

/// The result of a merge iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeOutcome {
    /// The interleaved elements, in strictly descending key order.
    pub entries: Vec<MergedEntry>,
    /// The entry below which every remaining element belongs to a single
    /// chain, when the iteration stopped early.
    pub common_tail: Option<ChannelEntry>,
}

/// Interleaves the given chains into one descending sequence.
///
/// Elements are ordered by `(creationTime, creationTimeHash)` descending.
/// Chains carrying the same `creationTimeHash` at the front are advanced
/// together and the element is yielded once, so the outcome depends only on
/// the multiset of chains, never on their order.
pub async fn merge_chains<B: StorageBackend>(
    objects: &ObjectStore<B>,
    heads: &[Option<Hash>],
    options: MergeOptions,
) -> Result<MergeOutcome, OneChannelError> {
    let mut cursors = Vec::with_capacity(heads.len());
    let mut currents: Vec<Option<ChannelEntry>> = Vec::with_capacity(heads.len());
    for head in heads {
        let mut cursor = ChainCursor::new(objects, *head);
        currents.push(cursor.advance().await?);
        cursors.push(cursor);
    }

    let mut entries = Vec::new();
    let common_tail = loop {
        let live: Vec<usize> = (0..cursors.len())
            .filter(|index| currents[*index].is_some())
            .collect();
        if live.is_empty() {
            break None;
        }

        // All chains sitting on the very same entry: the rest is shared.
        let all_equal = cursors.len() > 1
            && live.len() == cursors.len()
            && live.iter().all(|index| {
                currents[*index].as_ref().map(|entry| entry.entry_hash)
                    == currents[live[0]].as_ref().map(|entry| entry.entry_hash)
            });
        let single_left = cursors.len() > 1 && live.len() == 1;
        // Diff mode must drain a lone remaining chain (its elements are by
        // definition different), but may still stop at a shared entry since
        // everything below it would be skipped anyway.
        let stop = if options.only_different_elements {
            all_equal
        } else {
            options.stop_when_single && (all_equal || single_left)
        };
        if stop {
            let boundary = currents[live[0]].clone().expect("live cursor has an entry");
            if options.yield_common_history_element {
                entries.push(MergedEntry {
                    entry: boundary.clone(),
                    sources: live,
                    common_history: true,
                });
            }
            break Some(boundary);
        }

        let max_key = live
            .iter()
            .filter_map(|index| currents[*index].as_ref())
            .map(ChannelEntry::key)
            .max()
            .expect("at least one live cursor");
        let winners: Vec<usize> = live
            .iter()
            .copied()
            .filter(|index| {
                currents[*index]
                    .as_ref()
                    .is_some_and(|entry| entry.key() == max_key)
            })
            .collect();

        // Several chains may carry the element with differing ancestry;
        // take the duplicate with the largest entry hash so the choice does
        // not depend on cursor order.
        let representative = winners
            .iter()
            .filter_map(|index| currents[*index].clone())
            .max_by_key(|entry| entry.entry_hash)
            .expect("winners are live");

        let in_every_chain = winners.len() == cursors.len();
        if !(options.only_different_elements && in_every_chain) {
            entries.push(MergedEntry {
                entry: representative,
                sources: winners.clone(),
                common_history: false,
            });
        }
        for index in winners {
            currents[index] = cursors[index].advance().await?;
        }
    };

    Ok(MergeOutcome {
        entries,
        common_tail,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use anyhow::Result;
    use one_events::Dispatcher;
    use one_microdata::{DataValue, OneObject};
    use one_objects::{ReverseMapConfig, version_recipes};
    use one_recipes::{Recipe, RecipeRegistry, RecipeRule, RuleValue};
    use one_storage::{HashedStore, MemoryStorageBackend};

    use super::*;
    use crate::{channel_recipes, write_creation_time, write_entry};

    fn objects() -> ObjectStore<MemoryStorageBackend> {
        let registry = Arc::new(RecipeRegistry::new());
        registry
            .register(Recipe {
                name: "Person".into(),
                rules: vec![RecipeRule::new("email", RuleValue::String { regex: None }).id()],
            })
            .unwrap();
        registry.register_all(version_recipes()).unwrap();
        registry.register_all(channel_recipes()).unwrap();
        registry
            .register(Recipe {
                name: "Ping".into(),
                rules: vec![RecipeRule::new(
                    "n",
                    RuleValue::Integer {
                        min: None,
                        max: None,
                    },
                )],
            })
            .unwrap();
        ObjectStore::new(
            HashedStore::new(MemoryStorageBackend::new()),
            registry,
            Arc::new(Dispatcher::new()),
            ReverseMapConfig::new(),
        )
    }

    async fn entry_at(
        objects: &ObjectStore<MemoryStorageBackend>,
        n: i64,
        millis: u64,
        previous: Option<Hash>,
    ) -> Result<Hash> {
        let payload = OneObject::new("Ping").with("n", DataValue::Integer(n));
        let payload_hash = objects.commit_object(&payload).await?.hash;
        let creation_time =
            write_creation_time(objects, Timestamp::from_millis(millis), payload_hash).await?;
        Ok(write_entry(objects, creation_time, &[], previous).await?)
    }

    #[tokio::test]
    async fn it_interleaves_disjoint_chains_by_key() -> Result<()> {
        let objects = objects();
        let a1 = entry_at(&objects, 1, 1000, None).await?;
        let a3 = entry_at(&objects, 3, 3000, Some(a1)).await?;
        let b2 = entry_at(&objects, 2, 2000, None).await?;

        let outcome = merge_chains(
            &objects,
            &[Some(a3), Some(b2)],
            MergeOptions::default(),
        )
        .await?;
        let times: Vec<u64> = outcome
            .entries
            .iter()
            .map(|merged| merged.entry.creation_time.as_millis())
            .collect();
        assert_eq!(times, vec![3000, 2000, 1000]);
        assert_eq!(outcome.common_tail, None);
        Ok(())
    }

    #[tokio::test]
    async fn it_deduplicates_shared_elements_with_different_ancestry() -> Result<()> {
        let objects = objects();
        // Both chains carry the t=2000 element, above different tails.
        let z = entry_at(&objects, 1, 1000, None).await?;
        let x_over_z = entry_at(&objects, 2, 2000, Some(z)).await?;
        let y = entry_at(&objects, 3, 3000, Some(x_over_z)).await?;
        let w = entry_at(&objects, 0, 500, None).await?;
        let x_over_w = entry_at(&objects, 2, 2000, Some(w)).await?;
        assert_ne!(x_over_z, x_over_w);

        let outcome = merge_chains(
            &objects,
            &[Some(y), Some(x_over_w)],
            MergeOptions::default(),
        )
        .await?;
        let times: Vec<u64> = outcome
            .entries
            .iter()
            .map(|merged| merged.entry.creation_time.as_millis())
            .collect();
        assert_eq!(times, vec![3000, 2000, 1000, 500]);
        let shared = &outcome.entries[1];
        assert_eq!(shared.sources, vec![0, 1]);
        Ok(())
    }

    #[tokio::test]
    async fn it_is_independent_of_chain_order() -> Result<()> {
        let objects = objects();
        let a = entry_at(&objects, 1, 5000, None).await?;
        let b = entry_at(&objects, 2, 5000, None).await?;

        let forward = merge_chains(&objects, &[Some(a), Some(b)], MergeOptions::default()).await?;
        let backward = merge_chains(&objects, &[Some(b), Some(a)], MergeOptions::default()).await?;
        let keys = |outcome: &MergeOutcome| -> Vec<(Timestamp, Hash)> {
            outcome.entries.iter().map(|merged| merged.entry.key()).collect()
        };
        assert_eq!(keys(&forward), keys(&backward));
        Ok(())
    }

    #[tokio::test]
    async fn it_diffs_against_an_empty_chain() -> Result<()> {
        let objects = objects();
        let e1 = entry_at(&objects, 1, 1000, None).await?;
        let e2 = entry_at(&objects, 2, 2000, Some(e1)).await?;

        let outcome = merge_chains(
            &objects,
            &[Some(e2), None],
            MergeOptions {
                only_different_elements: true,
                ..MergeOptions::default()
            },
        )
        .await?;
        assert_eq!(outcome.entries.len(), 2);
        assert!(outcome.entries.iter().all(|merged| merged.sources == vec![0]));
        Ok(())
    }

    #[tokio::test]
    async fn it_yields_common_history_after_diff_elements() -> Result<()> {
        let objects = objects();
        let shared = entry_at(&objects, 1, 1000, None).await?;
        let left = entry_at(&objects, 2, 2000, Some(shared)).await?;
        let right = entry_at(&objects, 3, 3000, Some(shared)).await?;

        let outcome = merge_chains(
            &objects,
            &[Some(left), Some(right)],
            MergeOptions {
                only_different_elements: true,
                yield_common_history_element: true,
                ..MergeOptions::default()
            },
        )
        .await?;

        // Differing elements first (3000 then 2000), the shared boundary
        // once at the end, flagged.
        let times: Vec<u64> = outcome
            .entries
            .iter()
            .map(|merged| merged.entry.creation_time.as_millis())
            .collect();
        assert_eq!(times, vec![3000, 2000, 1000]);
        assert!(!outcome.entries[0].common_history);
        assert!(!outcome.entries[1].common_history);
        assert!(outcome.entries[2].common_history);
        assert_eq!(
            outcome.common_tail.as_ref().map(|entry| entry.entry_hash),
            Some(shared)
        );
        Ok(())
    }

    #[tokio::test]
    async fn it_reports_chain_order_violations() -> Result<()> {
        let objects = objects();
        // previous points at a newer entry, which a well-formed chain never
        // does.
        let newer = entry_at(&objects, 1, 2000, None).await?;
        let older = entry_at(&objects, 2, 1000, Some(newer)).await?;

        let mut cursor = ChainCursor::new(&objects, Some(older));
        cursor.advance().await?;
        let error = cursor.advance().await.unwrap_err();
        assert_eq!(error.code(), "MicrodataMalformed");
        Ok(())
    }
}
