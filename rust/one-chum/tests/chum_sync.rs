//! End-to-end sync sessions between two in-process instances.

use std::sync::Arc;

use anyhow::Result;
use one_access::{AccessManager, enable_access_reverse_maps};
use one_channels::{ChannelId, ChannelManager, EntrySelector, channel_recipes};
use one_chum::{
    CancelFlag, ChumConfig, ChumRequest, ChumResponse, ChumTransport, Exporter, Frame,
    FrameBody, chum_recipes, duplex_transport_pair, run_chum,
};
use one_common::{PersonId, Timestamp};
use one_events::Dispatcher;
use one_microdata::{DataValue, OneObject};
use one_objects::{ObjectStore, ReverseMapConfig, version_recipes};
use one_recipes::{Recipe, RecipeRegistry, RecipeRule, RuleValue};
use one_storage::{HashedStore, MemoryStorageBackend};

struct Instance {
    objects: Arc<ObjectStore<MemoryStorageBackend>>,
    access: Arc<AccessManager<MemoryStorageBackend>>,
    channels: Arc<ChannelManager<MemoryStorageBackend>>,
}

fn instance() -> Instance {
    let registry = Arc::new(RecipeRegistry::new());
    registry.register_all(one_access::access_recipes()).unwrap();
    registry.register_all(version_recipes()).unwrap();
    registry.register_all(channel_recipes()).unwrap();
    registry.register_all(chum_recipes()).unwrap();
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

    let objects = Arc::new(ObjectStore::new(
        HashedStore::new(MemoryStorageBackend::new()),
        registry,
        Arc::new(Dispatcher::new()),
        enable_access_reverse_maps(ReverseMapConfig::new()),
    ));
    Instance {
        access: Arc::new(AccessManager::new(Arc::clone(&objects))),
        channels: ChannelManager::new(Arc::clone(&objects)),
        objects,
    }
}

async fn commit_person(instance: &Instance, email: &str) -> Result<PersonId> {
    let person = OneObject::new("Person").with("email", DataValue::String(email.into()));
    Ok(instance
        .objects
        .commit_object(&person)
        .await?
        .id_hash
        .unwrap())
}

fn ping(n: i64) -> OneObject {
    OneObject::new("Ping").with("n", DataValue::Integer(n))
}

#[tokio::test]
async fn it_syncs_channels_bidirectionally_to_identical_heads() -> Result<()> {
    let a = instance();
    let b = instance();
    let alice_on_a = commit_person(&a, "alice@x").await?;
    let bob_on_a = commit_person(&a, "bob@x").await?;
    let bob_on_b = commit_person(&b, "bob@x").await?;
    let alice_on_b = commit_person(&b, "alice@x").await?;
    assert_eq!(alice_on_a, alice_on_b);
    assert_eq!(bob_on_a, bob_on_b);

    let channel = ChannelId::new("shared", None);
    let id_hash = a.channels.create_channel(&channel).await?;
    b.channels.create_channel(&channel).await?;
    a.channels
        .post_at(&channel, &ping(1), Timestamp::from_millis(1))
        .await?;
    b.channels
        .post_at(&channel, &ping(2), Timestamp::from_millis(2))
        .await?;

    a.access.grant_id(id_hash, &[bob_on_a], &[]).await?;
    b.access.grant_id(id_hash, &[alice_on_b], &[]).await?;

    let (transport_a, transport_b) = duplex_transport_pair();
    let session_a = run_chum(
        Arc::clone(&a.objects),
        Arc::clone(&a.access),
        ChumConfig::new("s", "a", "b", alice_on_a, bob_on_a),
        Arc::new(transport_a),
        CancelFlag::new(),
    );
    let session_b = run_chum(
        Arc::clone(&b.objects),
        Arc::clone(&b.access),
        ChumConfig::new("s", "b", "a", bob_on_b, alice_on_b),
        Arc::new(transport_b),
        CancelFlag::new(),
    );
    let (outcome_a, outcome_b) = tokio::join!(session_a, session_b);
    let (outcome_a, outcome_b) = (outcome_a?, outcome_b?);
    assert!(outcome_a.errors.is_empty(), "{:?}", outcome_a.errors);
    assert!(outcome_b.errors.is_empty(), "{:?}", outcome_b.errors);
    assert!(outcome_a.imported.objects > 0);
    assert!(outcome_b.imported.objects > 0);

    // Both replicas converge to byte-identical merged heads.
    let info_a = a.channels.channel_info(id_hash).await?.unwrap();
    let info_b = b.channels.channel_info(id_hash).await?.unwrap();
    assert_eq!(info_a.head, info_b.head);

    let entries_a = a.channels.entries(&channel, EntrySelector::default()).await?;
    let times: Vec<u64> = entries_a
        .iter()
        .map(|entry| entry.creation_time.as_millis())
        .collect();
    assert_eq!(times, vec![2, 1]);
    Ok(())
}

#[tokio::test]
async fn it_reruns_a_session_idempotently() -> Result<()> {
    let a = instance();
    let b = instance();
    let alice = commit_person(&a, "alice@x").await?;
    commit_person(&b, "alice@x").await?;
    let bob = commit_person(&a, "bob@x").await?;
    commit_person(&b, "bob@x").await?;

    let channel = ChannelId::new("c", None);
    let id_hash = a.channels.create_channel(&channel).await?;
    a.channels
        .post_at(&channel, &ping(1), Timestamp::from_millis(100))
        .await?;
    a.access.grant_id(id_hash, &[bob], &[]).await?;

    for round in 0..2 {
        let (transport_a, transport_b) = duplex_transport_pair();
        let session_a = run_chum(
            Arc::clone(&a.objects),
            Arc::clone(&a.access),
            ChumConfig::new("s", "a", "b", alice, bob),
            Arc::new(transport_a),
            CancelFlag::new(),
        );
        let session_b = run_chum(
            Arc::clone(&b.objects),
            Arc::clone(&b.access),
            ChumConfig::new("s", "b", "a", bob, alice),
            Arc::new(transport_b),
            CancelFlag::new(),
        );
        let (outcome_a, outcome_b) = tokio::join!(session_a, session_b);
        let (_, outcome_b) = (outcome_a?, outcome_b?);
        if round == 1 {
            // The second round finds everything already present.
            assert_eq!(outcome_b.imported.objects, 0);
            assert!(outcome_b.already_existed > 0);
        }
    }

    let info_a = a.channels.channel_info(id_hash).await?.unwrap();
    let info_b = b.channels.channel_info(id_hash).await?.unwrap();
    assert_eq!(info_a.head, info_b.head);
    Ok(())
}

#[tokio::test]
async fn it_refuses_unauthorized_requests_and_records_them() -> Result<()> {
    let a = instance();
    let bob = commit_person(&a, "bob@x").await?;

    let secret = OneObject::new("Ping").with("n", DataValue::Integer(42));
    let secret_hash = a.objects.commit_object(&secret).await?.hash;

    let mut exporter = Exporter::new(Arc::clone(&a.objects), Arc::clone(&a.access), bob);
    let response = exporter
        .handle(ChumRequest::GetObject { hash: secret_hash })
        .await;
    assert_eq!(
        response,
        ChumResponse::Error {
            code: "Unauthorized".into(),
            target: secret_hash.to_hex(),
        }
    );
    assert_eq!(exporter.errors().len(), 1);
    assert_eq!(exporter.errors()[0].code, "Unauthorized");
    assert_eq!(exporter.errors()[0].target, secret_hash.to_hex());
    Ok(())
}

#[tokio::test]
async fn it_rejects_mis_hashed_responses_and_continues() -> Result<()> {
    let a = instance();
    let b = instance();
    let alice = commit_person(&a, "alice@x").await?;
    commit_person(&b, "alice@x").await?;
    let bob = commit_person(&a, "bob@x").await?;
    let bob_on_b = commit_person(&b, "bob@x").await?;

    let channel = ChannelId::new("c", None);
    let id_hash = a.channels.create_channel(&channel).await?;
    a.channels
        .post_at(&channel, &ping(5), Timestamp::from_millis(500))
        .await?;
    a.access.grant_id(id_hash, &[bob], &[]).await?;

    // A hand-rolled peer that serves A's records but corrupts every object
    // body.
    let (transport_peer, transport_b) = duplex_transport_pair();
    let objects_a = Arc::clone(&a.objects);
    let access_a = Arc::clone(&a.access);
    let peer = tokio::spawn(async move {
        let _ = transport_peer
            .send(&Frame {
                id: 0,
                body: FrameBody::Goodbye,
            })
            .await;
        let mut exporter = Exporter::new(objects_a, access_a, bob);
        while let Ok(Some(frame)) = transport_peer.recv().await {
            let FrameBody::Request(request) = frame.body else {
                continue;
            };
            let mut response = exporter.handle(request).await;
            if let ChumResponse::Object { text } = &mut response {
                text.push(' ');
            }
            if transport_peer
                .send(&Frame {
                    id: frame.id,
                    body: FrameBody::Response(response),
                })
                .await
                .is_err()
            {
                break;
            }
        }
    });

    let mut config = ChumConfig::new("s", "b", "a", bob_on_b, alice);
    config.request_timeout_ms = 2_000;
    let outcome = run_chum(
        Arc::clone(&b.objects),
        Arc::clone(&b.access),
        config,
        Arc::new(transport_b),
        CancelFlag::new(),
    )
    .await?;
    peer.abort();

    assert!(
        outcome
            .errors
            .iter()
            .any(|error| error.code == "HashMismatch"),
        "{:?}",
        outcome.errors
    );
    // Nothing mis-hashed was stored.
    assert!(b.channels.channel_info(id_hash).await?.is_none());
    Ok(())
}
