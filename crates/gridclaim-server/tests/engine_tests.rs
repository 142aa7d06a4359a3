use std::sync::{Arc, Barrier};
use std::time::Duration;

use chrono::Utc;
use gridclaim_core::{
    palette, Cell, ClientMessage, Coord, DurableSnapshot, DurableStore, GridDimensions,
    MemoryStore, ServerMessage, UserRecord,
};
use gridclaim_server::{
    BridgeWorker, ClaimEngine, ClaimRejection, Outbound, PersistenceBridge, ProfileError,
    RetryPolicy,
};
use tokio::sync::mpsc::Receiver;

fn setup(store: Arc<MemoryStore>) -> (Arc<ClaimEngine>, BridgeWorker) {
    let policy = RetryPolicy {
        max_retries: 2,
        base_delay: Duration::from_millis(1),
    };
    let (bridge, worker) = PersistenceBridge::spawn(store, policy);
    let engine = Arc::new(ClaimEngine::new(GridDimensions::default(), bridge, 1024));
    (engine, worker)
}

fn drain(rx: &mut Receiver<Outbound>) -> Vec<ServerMessage> {
    let mut out = Vec::new();
    while let Ok(payload) = rx.try_recv() {
        out.push(serde_json::from_str(&payload).unwrap());
    }
    out
}

fn stored_cell(x: u32, y: u32, owner: &str) -> Cell {
    Cell {
        x,
        y,
        owner_id: owner.to_string(),
        owner_color: "#4ECDC4".to_string(),
        owner_name: Some("Ann".to_string()),
        claimed_at: Utc::now(),
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_claims_have_one_winner() {
    let (engine, worker) = setup(Arc::new(MemoryStore::new()));

    let leases: Vec<_> = (0..16).map(|_| engine.connect()).collect();
    let barrier = Arc::new(Barrier::new(leases.len()));

    let handles: Vec<_> = leases
        .iter()
        .map(|(lease, _)| {
            let engine = Arc::clone(&engine);
            let barrier = Arc::clone(&barrier);
            let id = lease.id().to_string();
            std::thread::spawn(move || {
                barrier.wait();
                engine.claim(&id, 7, 3)
            })
        })
        .collect();

    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    let winners: Vec<&Cell> = results.iter().filter_map(|r| r.as_ref().ok()).collect();
    assert_eq!(winners.len(), 1);
    for result in &results {
        if let Err(rejection) = result {
            assert_eq!(*rejection, ClaimRejection::AlreadyOwned { x: 7, y: 3 });
        }
    }

    // The grid and the winner's counter agree
    let winner = engine.user(&winners[0].owner_id).unwrap();
    assert_eq!(winner.blocks_claimed, 1);
    assert_eq!(engine.stats().total_blocks_claimed, 1);
    assert_eq!(engine.cell(Coord::new(7, 3)).unwrap().owner_id, winner.id);

    drop(leases);
    worker.drain().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_every_session_sees_claims_in_commit_order() {
    let (engine, worker) = setup(Arc::new(MemoryStore::new()));
    let (a, mut rx_a) = engine.connect();
    let (b, mut rx_b) = engine.connect();

    let tasks: Vec<_> = [a.id().to_string(), b.id().to_string()]
        .into_iter()
        .enumerate()
        .map(|(row, id)| {
            let engine = Arc::clone(&engine);
            tokio::spawn(async move {
                for x in 0..20 {
                    let _ = engine.claim(&id, x, row as i64);
                }
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap();
    }

    let claimed = |msgs: Vec<ServerMessage>| -> Vec<Coord> {
        msgs.into_iter()
            .filter_map(|m| match m {
                ServerMessage::BlockClaimed { block } => Some(block.coord()),
                _ => None,
            })
            .collect()
    };
    let seen_a = claimed(drain(&mut rx_a));
    let seen_b = claimed(drain(&mut rx_b));
    assert_eq!(seen_a.len(), 40);
    assert_eq!(seen_a, seen_b);

    drop((a, b));
    worker.drain().await;
}

#[tokio::test]
async fn test_out_of_bounds_claim_is_an_error_reply() {
    let (engine, worker) = setup(Arc::new(MemoryStore::new()));
    let (lease, mut rx) = engine.connect();
    let (_other, mut rx_other) = engine.connect();
    drain(&mut rx);
    drain(&mut rx_other);

    lease.handle(ClientMessage::ClaimBlock { x: 40, y: 0 });
    lease.handle(ClientMessage::ClaimBlock { x: -1, y: 5 });

    assert_eq!(
        drain(&mut rx),
        vec![
            ServerMessage::error("Invalid coordinates"),
            ServerMessage::error("Invalid coordinates"),
        ]
    );
    assert!(drain(&mut rx_other).is_empty());
    assert!(engine.snapshot().is_empty());
    worker.drain().await;
}

#[tokio::test]
async fn test_conflicting_claim_reports_claim_failed() {
    let (engine, worker) = setup(Arc::new(MemoryStore::new()));
    let (a, _rx_a) = engine.connect();
    let (b, mut rx_b) = engine.connect();

    a.handle(ClientMessage::ClaimBlock { x: 5, y: 5 });
    drain(&mut rx_b);
    b.handle(ClientMessage::ClaimBlock { x: 5, y: 5 });

    assert_eq!(
        drain(&mut rx_b),
        vec![ServerMessage::ClaimFailed {
            x: 5,
            y: 5,
            message: "Block already claimed".to_string(),
        }]
    );
    assert_eq!(engine.cell(Coord::new(5, 5)).unwrap().owner_id, a.id());
    worker.drain().await;
}

#[tokio::test]
async fn test_disconnect_releases_all_cells() {
    let store = Arc::new(MemoryStore::new());
    let (engine, worker) = setup(Arc::clone(&store));
    let (a, _rx_a) = engine.connect();
    let (_b, mut rx_b) = engine.connect();

    for (x, y) in [(1, 1), (2, 2), (3, 3)] {
        engine.claim(a.id(), x, y).unwrap();
    }
    let before = engine.stats().total_blocks_claimed;
    engine.persisted().await;
    assert_eq!(store.cell_count(), 3);
    drain(&mut rx_b);

    let a_id = a.id().to_string();
    drop(a);

    assert_eq!(engine.stats().total_blocks_claimed, before - 3);
    for (x, y) in [(1, 1), (2, 2), (3, 3)] {
        assert!(engine.cell(Coord::new(x, y)).is_none());
    }
    let events = drain(&mut rx_b);
    match &events[0] {
        ServerMessage::BlocksCleared { blocks } => {
            let mut blocks = blocks.clone();
            blocks.sort();
            assert_eq!(
                blocks,
                vec![Coord::new(1, 1), Coord::new(2, 2), Coord::new(3, 3)]
            );
        }
        other => panic!("expected blocks-cleared, got {other:?}"),
    }
    assert!(events.contains(&ServerMessage::UserCount { count: 1 }));

    // A later session's init no longer mentions the departed one
    let (c, mut rx_c) = engine.connect();
    match &drain(&mut rx_c)[0] {
        ServerMessage::Init { blocks, stats, .. } => {
            assert!(blocks.is_empty());
            assert_eq!(stats.total_blocks_claimed, 0);
            assert!(stats.leaderboard.iter().all(|entry| entry.id != a_id));
        }
        other => panic!("expected init, got {other:?}"),
    }

    // The released cells are claimable again
    assert!(engine.claim(c.id(), 2, 2).is_ok());

    engine.persisted().await;
    assert!(store.user(&a_id).is_none());
    assert_eq!(store.cell_count(), 1);
    worker.drain().await;
}

#[tokio::test]
async fn test_name_is_trimmed_and_propagated() {
    let (engine, worker) = setup(Arc::new(MemoryStore::new()));
    let (lease, mut rx) = engine.connect();
    let (_other, mut rx_other) = engine.connect();
    engine.claim(lease.id(), 0, 0).unwrap();
    drain(&mut rx);
    drain(&mut rx_other);

    lease.handle(ClientMessage::UpdateName {
        name: "  Bob  ".to_string(),
    });

    let mine = drain(&mut rx);
    assert_eq!(
        mine[0],
        ServerMessage::NameUpdated {
            name: "Bob".to_string()
        }
    );
    let theirs = drain(&mut rx_other);
    match &theirs[..] {
        [ServerMessage::StatsUpdate { stats }] => {
            assert_eq!(stats.leaderboard[0].name.as_deref(), Some("Bob"));
        }
        other => panic!("expected a stats-update, got {other:?}"),
    }
    assert_eq!(
        engine.cell(Coord::new(0, 0)).unwrap().owner_name.as_deref(),
        Some("Bob")
    );

    let long = "x".repeat(40);
    assert_eq!(engine.update_name(lease.id(), &long).unwrap().len(), 20);
    assert_eq!(
        engine.update_name(lease.id(), "   "),
        Err(ProfileError::EmptyName)
    );
    worker.drain().await;
}

#[tokio::test]
async fn test_invalid_color_changes_nothing() {
    let (engine, worker) = setup(Arc::new(MemoryStore::new()));
    let (lease, mut rx) = engine.connect();
    let (_other, mut rx_other) = engine.connect();
    engine.claim(lease.id(), 4, 4).unwrap();
    let color = engine.user(lease.id()).unwrap().color;
    drain(&mut rx);
    drain(&mut rx_other);

    lease.handle(ClientMessage::UpdateColor {
        color: "#000000".to_string(),
    });

    assert_eq!(
        drain(&mut rx),
        vec![ServerMessage::error("Color is not in the palette")]
    );
    assert!(drain(&mut rx_other).is_empty());
    assert_eq!(engine.user(lease.id()).unwrap().color, color);
    assert_eq!(engine.cell(Coord::new(4, 4)).unwrap().owner_color, color);
    worker.drain().await;
}

#[tokio::test]
async fn test_color_change_rewrites_owned_cells() {
    let store = Arc::new(MemoryStore::new());
    let (engine, worker) = setup(Arc::clone(&store));
    let (lease, _rx) = engine.connect();
    let (_other, mut rx_other) = engine.connect();
    engine.claim(lease.id(), 1, 2).unwrap();
    drain(&mut rx_other);

    let new_color = palette::PALETTE[7];
    lease.handle(ClientMessage::UpdateColor {
        color: new_color.to_string(),
    });

    let events = drain(&mut rx_other);
    assert_eq!(
        events[0],
        ServerMessage::UserColorUpdated {
            session_id: lease.id().to_string(),
            color: new_color.to_string(),
        }
    );
    assert!(matches!(events[1], ServerMessage::StatsUpdate { .. }));
    assert_eq!(
        engine.cell(Coord::new(1, 2)).unwrap().owner_color,
        new_color
    );

    engine.persisted().await;
    assert_eq!(store.cell(Coord::new(1, 2)).unwrap().owner_color, new_color);
    assert_eq!(store.user(lease.id()).unwrap().color, new_color);
    worker.drain().await;
}

#[tokio::test]
async fn test_restore_rebuilds_grid_and_counts() {
    let mut ann = UserRecord::new("ann", "#4ECDC4");
    ann.name = Some("Ann".to_string());
    ann.blocks_claimed = 99;
    let snapshot = DurableSnapshot {
        cells: vec![
            stored_cell(0, 0, "ann"),
            stored_cell(1, 0, "ann"),
            stored_cell(2, 0, "orphan"),
            stored_cell(500, 0, "ann"),
        ],
        users: vec![ann],
    };
    let (engine, worker) = setup(Arc::new(MemoryStore::new()));

    let summary = engine.restore(snapshot);
    assert_eq!(summary.cells, 3);
    assert_eq!(summary.users, 2);
    assert_eq!(summary.skipped_cells, 1);

    // Counters are recomputed from the cells, not trusted from storage
    assert_eq!(engine.user("ann").unwrap().blocks_claimed, 2);
    assert_eq!(engine.user("orphan").unwrap().blocks_claimed, 1);
    assert_eq!(engine.live_sessions(), 0);

    let stats = engine.stats();
    assert_eq!(stats.total_blocks_claimed, 3);
    assert_eq!(stats.total_users, 2);
    assert_eq!(stats.leaderboard[0].id, "ann");

    // Restored cells are owned; a new session cannot take them
    let (lease, mut rx) = engine.connect();
    match &drain(&mut rx)[0] {
        ServerMessage::Init {
            blocks,
            connected_sessions,
            ..
        } => {
            assert_eq!(blocks.len(), 3);
            assert_eq!(*connected_sessions, 1);
        }
        other => panic!("expected init, got {other:?}"),
    }
    assert!(engine.claim(lease.id(), 0, 0).is_err());
    worker.drain().await;
}

#[tokio::test]
async fn test_persistence_failure_does_not_roll_back() {
    let store = Arc::new(MemoryStore::new());
    store.inject_failures(100);
    let (engine, worker) = setup(Arc::clone(&store));
    let (lease, _rx) = engine.connect();

    engine.claim(lease.id(), 9, 9).unwrap();
    engine.persisted().await;

    assert!(engine.cell(Coord::new(9, 9)).is_some());
    assert!(store.cell(Coord::new(9, 9)).is_none());
    let metrics = engine.persistence();
    assert_eq!(metrics.failed, 2);
    assert_eq!(metrics.pending, 0);
    worker.drain().await;
}

#[tokio::test]
async fn test_shutdown_releases_open_sessions_before_drain() {
    let store = Arc::new(MemoryStore::new());
    let (engine, worker) = setup(Arc::clone(&store));
    let (lease, _rx) = engine.connect();
    engine.claim(lease.id(), 1, 1).unwrap();
    engine.claim(lease.id(), 2, 2).unwrap();

    // The connection is still open when the server stops
    assert_eq!(engine.disconnect_all(), 1);
    worker.drain().await;
    drop(lease);
    assert_eq!(engine.persistence().failed, 0);
    assert_eq!(store.cell_count(), 0);

    // A restart finds nothing owned
    let snapshot = store.load().await.unwrap();
    assert!(snapshot.cells.is_empty());
    assert!(snapshot.users.is_empty());

    let (restarted, worker) = setup(Arc::new(MemoryStore::new()));
    let summary = restarted.restore(snapshot);
    assert_eq!(summary.cells, 0);
    assert_eq!(summary.users, 0);
    let (lease, _rx) = restarted.connect();
    assert!(restarted.claim(lease.id(), 1, 1).is_ok());
    worker.drain().await;
}
