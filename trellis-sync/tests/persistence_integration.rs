//! Persistence integration tests.
//!
//! Verifies:
//! - Committed boards survive a server restart
//! - Recovery resumes the version counter
//! - Rejected and no-op intents leave the stored snapshot alone
//! - Direct snapshot store round-trips

use tempfile::tempdir;
use tokio::time::{timeout, Duration};

use trellis_core::{BoardList, CardId, Intent, ListId};
use trellis_sync::{ServerConfig, SnapshotStore, StateStore, StoreConfig, SyncClient, SyncEvent, SyncServer};

fn persistent_config(path: &std::path::Path) -> ServerConfig {
    ServerConfig {
        storage_path: Some(path.join("db")),
        ..ServerConfig::ephemeral()
    }
}

async fn joined(url: &str) -> (SyncClient, tokio::sync::mpsc::Receiver<SyncEvent>, u64) {
    let mut client = SyncClient::new("Alice", url);
    let mut events = client.take_event_rx().unwrap();
    client.connect().await.unwrap();
    let version = timeout(Duration::from_secs(2), async {
        loop {
            if let Some(SyncEvent::Joined { version, .. }) = events.recv().await {
                return version;
            }
        }
    })
    .await
    .expect("join timed out");
    (client, events, version)
}

async fn acked(events: &mut tokio::sync::mpsc::Receiver<SyncEvent>) -> SyncEvent {
    timeout(Duration::from_secs(2), async {
        loop {
            match events.recv().await {
                Some(e @ SyncEvent::Acked { .. }) | Some(e @ SyncEvent::Rejected { .. }) => return e,
                Some(_) => continue,
                None => panic!("event stream ended"),
            }
        }
    })
    .await
    .expect("no reply to intent")
}

#[tokio::test]
async fn test_board_survives_restart() {
    let dir = tempdir().unwrap();
    let config = persistent_config(dir.path());

    {
        let server = SyncServer::new(config.clone()).await.unwrap();
        let handle = server.start().await.unwrap();
        let (client, mut events, version) = joined(&handle.ws_url()).await;
        assert_eq!(version, 0);

        client
            .submit(Intent::InsertList { list_id: Some(ListId(1)), title: "Todo".into() })
            .await
            .unwrap();
        acked(&mut events).await;
        client
            .submit(Intent::InsertCard {
                list_id: ListId(1),
                card_id: Some(CardId(9)),
                title: "Persist me".into(),
                description: Some("across restarts".into()),
            })
            .await
            .unwrap();
        acked(&mut events).await;

        handle.shutdown().await;
    }

    let server = SyncServer::new(config).await.unwrap();
    let snapshot = server.engine().snapshot().await;
    assert_eq!(snapshot.version, 2);
    let card = &snapshot.board.list(ListId(1)).unwrap().cards[0];
    assert_eq!(card.id, CardId(9));
    assert_eq!(card.description.as_deref(), Some("across restarts"));

    // Clients joining the restarted server see the recovered board.
    let handle = server.start().await.unwrap();
    let (client, _events, version) = joined(&handle.ws_url()).await;
    assert_eq!(version, 2);
    assert!(client.board().await.contains_card(CardId(9)));
    handle.shutdown().await;
}

#[tokio::test]
async fn test_versions_continue_after_recovery() {
    let dir = tempdir().unwrap();
    let config = persistent_config(dir.path());

    {
        let server = SyncServer::new(config.clone()).await.unwrap();
        let intent = Intent::InsertList { list_id: Some(ListId(1)), title: "A".into() };
        server.engine().submit(None, intent).await.unwrap();
        server.engine().shutdown();
    }

    let server = SyncServer::new(config).await.unwrap();
    let commit = server
        .engine()
        .submit(None, Intent::InsertList { list_id: Some(ListId(2)), title: "B".into() })
        .await
        .unwrap();
    assert_eq!(commit.version(), 2);
    assert_eq!(server.engine().snapshot().await.board.lists.len(), 2);
}

#[tokio::test]
async fn test_failed_and_noop_intents_not_persisted() {
    let dir = tempdir().unwrap();
    let config = persistent_config(dir.path());
    let server = SyncServer::new(config).await.unwrap();
    let engine = server.engine();

    engine
        .submit(None, Intent::InsertList { list_id: Some(ListId(1)), title: "Only".into() })
        .await
        .unwrap();
    assert!(engine.submit(None, Intent::RemoveList { list_id: ListId(5) }).await.is_err());
    let unchanged = engine.submit(None, Intent::reorder_lists(0, 0)).await.unwrap();
    assert!(!unchanged.is_applied());

    let snapshots = engine.snapshots().unwrap();
    let meta = snapshots.load_metadata(engine.board_key()).unwrap();
    assert_eq!(meta.version, 1);
    let stored = StateStore::load(&snapshots.load_snapshot(engine.board_key()).unwrap()).unwrap();
    assert_eq!(stored, engine.snapshot().await.board);
}

#[test]
fn test_snapshot_store_roundtrip() {
    let dir = tempdir().unwrap();
    let store = SnapshotStore::open(StoreConfig::for_testing(dir.path().join("db"))).unwrap();

    let mut list = BoardList::new(ListId(3), "Review");
    list.cards.push(trellis_core::Card::new(CardId(30), "PR #12"));
    let board = trellis_core::Board::from_lists(vec![list]).unwrap();
    let bytes = StateStore::dump(&board).unwrap();

    store.save_snapshot("team-a", 4, &bytes).unwrap();
    store.save_snapshot("team-b", 1, &StateStore::dump(&trellis_core::Board::new()).unwrap()).unwrap();

    assert_eq!(StateStore::load(&store.load_snapshot("team-a").unwrap()).unwrap(), board);
    assert!(StateStore::load(&store.load_snapshot("team-b").unwrap()).unwrap().lists.is_empty());
    let meta = store.load_metadata("team-a").unwrap();
    assert_eq!(meta.version, 4);
    assert_eq!(meta.snapshot_size as usize, bytes.len());

    assert_eq!(store.load_metadata("team-b").unwrap().version, 1);
}
