//! Whole-session tests against the in-memory backend.

use std::sync::Arc;
use std::time::{Duration, Instant};

use folio_client::{
    ClientConfig, DocumentUpdated, MemoryBackend, RemoteUpdate, SessionState, SyncClient,
    SyncError, UpdateEvent,
};
use folio_crdt::EditCommand;
use folio_types::{
    Action, Block, BlockId, BlockKind, BlockPatch, ClientId, Delta, DocId, DocumentSnapshot,
    InsertPayload, ListId, TextId,
};
use tokio::sync::broadcast::error::TryRecvError;

fn doc() -> DocId {
    DocId::from("doc-1")
}

fn b(id: &str) -> BlockId {
    BlockId::from(id)
}

fn push_block(snap: &mut DocumentSnapshot, id: &str, parent: Option<&str>, kind: BlockKind, text: Option<&str>) {
    let block = Block {
        id: b(id),
        kind,
        parent_id: parent.map(b),
        child_list_id: ListId::from(format!("{id}-list")),
        data: Default::default(),
        external_text_id: text.map(|_| TextId::from(format!("{id}-text"))),
    };
    if let Some(text) = text {
        snap.deltas_by_text_id
            .insert(TextId::from(format!("{id}-text")), Delta::plain(text));
    }
    snap.children_by_list.insert(block.child_list_id.clone(), Vec::new());
    if let Some(parent) = parent {
        let list = snap.blocks[&b(parent)].child_list_id.clone();
        snap.children_by_list.get_mut(&list).unwrap().push(b(id));
    }
    snap.blocks.insert(b(id), block);
}

/// root → [P1("Hello"), P2("")]
fn hello_snapshot() -> DocumentSnapshot {
    let mut snap = DocumentSnapshot {
        root_id: b("root"),
        blocks: Default::default(),
        children_by_list: Default::default(),
        deltas_by_text_id: Default::default(),
    };
    push_block(&mut snap, "root", None, BlockKind::Page, None);
    push_block(&mut snap, "p1", Some("root"), BlockKind::Paragraph, Some("Hello"));
    push_block(&mut snap, "p2", Some("root"), BlockKind::Paragraph, Some(""));
    snap
}

async fn setup(config: ClientConfig) -> (MemoryBackend, SyncClient) {
    let backend = MemoryBackend::new();
    backend.insert_document(doc(), hello_snapshot()).unwrap();
    let mut client = SyncClient::new(Arc::new(backend.clone()), config)
        .with_client_id(ClientId::from("me"));
    client.open(doc()).await.unwrap();
    (backend, client)
}

fn children(client: &SyncClient, id: &str) -> Vec<String> {
    client
        .with_tree(|t| t.get_children(&b(id)).iter().map(|c| c.to_string()).collect())
        .unwrap()
}

fn text_of(client: &SyncClient, id: &str) -> String {
    client
        .with_tree(|t| t.delta_of(&b(id)).map(|d| d.to_plain_text()).unwrap_or_default())
        .unwrap()
}

fn insert(id: &str, parent: &str, prev: Option<&str>) -> Action {
    Action::Insert {
        block_id: b(id),
        parent_id: b(parent),
        prev_id: prev.map(b),
        payload: InsertPayload::new(BlockKind::Paragraph).with_delta(Delta::plain(id)),
    }
}

// ============================================================================
// Open / close
// ============================================================================

#[tokio::test]
async fn test_open_builds_tree_and_subscribes() {
    let (backend, client) = setup(ClientConfig::default()).await;

    assert_eq!(client.state(), SessionState::Open);
    assert_eq!(children(&client, "root"), vec!["p1", "p2"]);
    assert_eq!(backend.subscriber_count(&doc()), 1);

    let editable = client.editable_tree(true).unwrap();
    assert_eq!(editable.len(), 1);
    assert_eq!(editable[0].child_blocks().count(), 2);
}

#[tokio::test]
async fn test_open_failure_leaves_no_session() {
    let backend = MemoryBackend::new();
    backend.insert_document(doc(), hello_snapshot()).unwrap();
    backend.fail_next_opens(1);

    let mut client = SyncClient::new(Arc::new(backend.clone()), ClientConfig::default());
    assert!(matches!(client.open(doc()).await, Err(SyncError::Open(_))));
    assert_eq!(client.state(), SessionState::Closed);
    assert!(client.doc_id().is_none());
    assert_eq!(backend.subscriber_count(&doc()), 0);

    // The next attempt goes through.
    client.open(doc()).await.unwrap();
    assert_eq!(client.state(), SessionState::Open);
}

#[tokio::test]
async fn test_close_disposes_subscription_and_ignores_late_notifications() {
    let (backend, mut client) = setup(ClientConfig::default()).await;

    client.close().await;
    assert_eq!(client.state(), SessionState::Closed);
    assert_eq!(backend.subscriber_count(&doc()), 0);
    assert_eq!(backend.closed_documents(), vec![doc()]);

    let late = DocumentUpdated::new(doc(), None, vec![RemoteUpdate::Reset]);
    assert_eq!(backend.publish(late), 0);
    assert!(matches!(client.snapshot(), Err(SyncError::NotOpen)));

    // Closing twice is harmless.
    client.close().await;
    assert_eq!(backend.closed_documents().len(), 1);
}

#[tokio::test]
async fn test_drop_runs_teardown() {
    let (backend, client) = setup(ClientConfig::default()).await;
    drop(client);

    assert_eq!(backend.subscriber_count(&doc()), 0);
    for _ in 0..100 {
        if !backend.closed_documents().is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(backend.closed_documents(), vec![doc()]);
}

#[tokio::test]
async fn test_close_abandons_inflight_refetch() {
    let (backend, mut client) = setup(ClientConfig::default()).await;
    let mut updates = client.subscribe_updates();
    backend.set_open_delay(Some(Duration::from_secs(30)));

    let peer = Some(ClientId::from("peer"));
    backend.publish(DocumentUpdated::new(doc(), peer, vec![RemoteUpdate::Reset]));
    let queued = client.schedule_resync().unwrap();
    for _ in 0..100 {
        if backend.open_calls() == 2 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    assert_eq!(backend.open_calls(), 2, "reset re-fetch should be in flight");

    let started = Instant::now();
    client.close().await;
    assert!(started.elapsed() < Duration::from_secs(5));
    assert_eq!(client.state(), SessionState::Closed);

    assert!(matches!(queued.await, Err(SyncError::Cancelled)));
    // The queued re-fetch never started and the abandoned one never landed.
    assert_eq!(backend.open_calls(), 2);
    assert!(matches!(updates.try_recv(), Err(TryRecvError::Empty)));
}

// ============================================================================
// Editing
// ============================================================================

#[tokio::test]
async fn test_merge_empty_paragraph_into_previous() {
    let (backend, client) = setup(ClientConfig::default()).await;
    let mut updates = client.subscribe_updates();

    let actions = client
        .edit(&EditCommand::MergeIntoPrevious { block_id: b("p2") })
        .await
        .unwrap();

    assert_eq!(
        actions,
        vec![
            Action::Update {
                block_id: b("p1"),
                payload: BlockPatch::delta(Delta::plain("Hello")),
            },
            Action::Delete {
                block_id: b("p2"),
                parent_id: Some(b("root")),
            },
        ]
    );
    assert_eq!(children(&client, "root"), vec!["p1"]);
    assert_eq!(text_of(&client, "p1"), "Hello");
    assert_eq!(backend.applied_batches(&doc()), vec![actions]);

    // The backend echoes the batch; only the local announcement arrives.
    client.drain_inbound().await.unwrap();
    assert!(matches!(updates.try_recv(), Ok(UpdateEvent::Applied { .. })));
    assert!(matches!(updates.try_recv(), Err(TryRecvError::Empty)));

    let server = backend.snapshot(&doc()).unwrap();
    assert_eq!(server, client.snapshot().unwrap());
}

#[tokio::test]
async fn test_flushes_sent_in_call_order() {
    let (backend, client) = setup(ClientConfig::default()).await;
    backend.set_apply_delay(Some(Duration::from_millis(5)));

    let batches: Vec<Vec<Action>> = (0..5)
        .map(|n| {
            vec![Action::Update {
                block_id: b("p1"),
                payload: BlockPatch::delta(Delta::plain(format!("v{n}"))),
            }]
        })
        .collect();
    let results = futures::future::join_all(batches.iter().cloned().map(|batch| client.flush(batch))).await;

    assert!(results.iter().all(Result::is_ok));
    assert_eq!(backend.applied_batches(&doc()), batches);
    assert!(client.flush(Vec::new()).await.is_ok());
    assert_eq!(backend.applied_batches(&doc()).len(), 5);
}

#[tokio::test]
async fn test_rejected_flush_resyncs_from_server() {
    let (backend, client) = setup(ClientConfig::default()).await;
    backend.fail_next_applies(1);

    let err = client
        .edit(&EditCommand::Indent { block_id: b("p2") })
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::Flush(_)));

    // The resync was queued before the error came back.
    client.drain_inbound().await.unwrap();
    assert!(!client.is_stale());
    assert_eq!(children(&client, "root"), vec!["p1", "p2"]);
    assert!(backend.applied_batches(&doc()).is_empty());
}

#[tokio::test]
async fn test_rejected_flush_without_resync_stays_stale() {
    let config = ClientConfig {
        resync_on_flush_failure: false,
        ..ClientConfig::default()
    };
    let (backend, client) = setup(config).await;
    backend.fail_next_applies(1);

    assert!(client.edit(&EditCommand::Indent { block_id: b("p2") }).await.is_err());
    client.drain_inbound().await.unwrap();
    assert!(client.is_stale());
    assert_eq!(children(&client, "p1"), vec!["p2"]);

    client.resync().await.unwrap();
    assert!(!client.is_stale());
    assert_eq!(children(&client, "root"), vec!["p1", "p2"]);
}

#[tokio::test]
async fn test_accepted_batch_survives_resync_after_rejection() {
    let (backend, client) = setup(ClientConfig::default()).await;
    backend.set_apply_delay(Some(Duration::from_millis(20)));
    backend.fail_next_applies(1);

    // The first batch is rejected and triggers a re-fetch while the second
    // is still on its way to the server.
    let indent = EditCommand::Indent { block_id: b("p2") };
    let insert_break = EditCommand::InsertBreak {
        block_id: b("p1"),
        offset: 5,
    };
    let (first, second) = tokio::join!(client.edit(&indent), client.edit(&insert_break),);
    assert!(matches!(first, Err(SyncError::Flush(_))));
    let second = second.unwrap();
    client.drain_inbound().await.unwrap();

    assert!(!client.is_stale());
    assert_eq!(backend.applied_batches(&doc()), vec![second]);
    assert_eq!(children(&client, "root").len(), 3);
    assert_eq!(backend.snapshot(&doc()).unwrap(), client.snapshot().unwrap());
}

// ============================================================================
// Inbound
// ============================================================================

#[tokio::test]
async fn test_remote_updates_apply_in_arrival_order() {
    let (backend, client) = setup(ClientConfig::default()).await;
    let mut changes = client.subscribe_changes();
    let peer = ClientId::from("peer");

    for n in 0..20 {
        let update = DocumentUpdated::new(
            doc(),
            Some(peer.clone()),
            vec![RemoteUpdate::Text {
                text_id: TextId::from("p1-text"),
                delta: Delta::plain(format!("rev {n}")),
            }],
        );
        assert_eq!(backend.publish(update), 1);
    }
    client.drain_inbound().await.unwrap();

    assert_eq!(text_of(&client, "p1"), "rev 19");
    for n in 0..20 {
        let event = changes.recv().await.unwrap();
        assert_eq!(event.delta.to_plain_text(), format!("rev {n}"));
        assert_eq!(event.origin.as_ref(), Some(&peer));
    }
}

#[tokio::test]
async fn test_reset_completes_before_later_updates() {
    let (backend, client) = setup(ClientConfig::default()).await;
    let peer = Some(ClientId::from("peer"));
    backend.publish(DocumentUpdated::new(doc(), peer.clone(), vec![RemoteUpdate::Reset]));
    backend.publish(DocumentUpdated::new(
        doc(),
        peer,
        vec![RemoteUpdate::Block {
            actions: vec![insert("p3", "root", Some("p2"))],
        }],
    ));
    client.drain_inbound().await.unwrap();

    // Had the insert run before the reset, the fresh snapshot would have wiped it.
    assert_eq!(children(&client, "root"), vec!["p1", "p2", "p3"]);
}

#[tokio::test]
async fn test_out_of_order_remote_inserts_are_buffered() {
    let (backend, client) = setup(ClientConfig::default()).await;
    let mut updates = client.subscribe_updates();
    let peer = ClientId::from("peer");

    backend.publish(DocumentUpdated::new(
        doc(),
        Some(peer.clone()),
        vec![RemoteUpdate::Block {
            actions: vec![insert("child", "parent", None)],
        }],
    ));
    backend.publish(DocumentUpdated::new(
        doc(),
        Some(peer),
        vec![RemoteUpdate::Block {
            actions: vec![insert("parent", "root", Some("p2"))],
        }],
    ));
    client.drain_inbound().await.unwrap();

    assert_eq!(children(&client, "parent"), vec!["child"]);
    match updates.recv().await.unwrap() {
        UpdateEvent::Applied { report, .. } => assert_eq!(report.buffered, 1),
        other => panic!("unexpected event: {other:?}"),
    }
    match updates.recv().await.unwrap() {
        UpdateEvent::Applied { report, .. } => {
            assert_eq!(report.applied, 1);
            assert_eq!(report.replayed, 1);
        }
        other => panic!("unexpected event: {other:?}"),
    }
    client.with_tree(|t| t.check_invariants()).unwrap().unwrap();
}

#[tokio::test]
async fn test_other_clients_edits_flow_through() {
    let backend = MemoryBackend::new();
    backend.insert_document(doc(), hello_snapshot()).unwrap();
    let mut alice = SyncClient::new(Arc::new(backend.clone()), ClientConfig::default());
    let mut bob = SyncClient::new(Arc::new(backend.clone()), ClientConfig::default());
    alice.open(doc()).await.unwrap();
    bob.open(doc()).await.unwrap();

    alice
        .edit(&EditCommand::InsertBreak {
            block_id: b("p1"),
            offset: 2,
        })
        .await
        .unwrap();
    bob.drain_inbound().await.unwrap();

    assert_eq!(alice.snapshot().unwrap(), bob.snapshot().unwrap());
    assert_eq!(text_of(&bob, "p1"), "He");
    assert_eq!(bob.with_tree(|t| t.get_children(t.root_id()).len()).unwrap(), 3);
}
