//! Performance benchmarks for the production hot path

use server::event_bus::LocalEventBus;
use server::groups::MemoryGroupRegistry;
use server::locator::SessionLocator;
use server::notifier::RemoteNotifier;
use server::peer::PeerLink;
use server::progression::{MemoryPersistence, ProgressionStore};
use server::session_manager::SessionManager;
use server::sync_engine::CollectionSyncEngine;
use shared::{
    CollectionUpdateNotification, Packet, PlayerId, ProgressionCounter, ResourceType,
};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::RwLock;

/// Builds an engine with no peers, hosting `players` locally
async fn local_engine(
    players: &[PlayerId],
    groups: Arc<MemoryGroupRegistry>,
) -> CollectionSyncEngine {
    let addr: SocketAddr = "127.0.0.1:40000".parse().unwrap();
    let mut manager = SessionManager::new(players.len());
    for player in players {
        manager.add_session(*player, addr);
    }
    let sessions = Arc::new(RwLock::new(manager));

    let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
    let peers = Arc::new(PeerLink::new(socket, HashMap::new(), Duration::from_millis(100)));

    let engine = CollectionSyncEngine::new(
        Arc::new(ProgressionStore::new()),
        Arc::new(MemoryPersistence::new()),
        Arc::new(LocalEventBus::new()),
        groups,
        Arc::new(SessionLocator::new(
            sessions,
            peers.clone(),
            Duration::from_millis(100),
        )),
        Arc::new(RemoteNotifier::new(peers, Duration::from_millis(100))),
    );

    for player in players {
        engine.load_player(*player).await.unwrap();
    }
    engine
}

/// Benchmarks counter updates across every resource
#[test]
fn benchmark_counter_add() {
    let mut counter = ProgressionCounter::new();

    let iterations = 100_000;
    let start = Instant::now();

    for i in 0..iterations {
        let resource = ResourceType::ALL[i % ResourceType::ALL.len()];
        counter.add(resource, 1);
    }

    let duration = start.elapsed();
    println!(
        "Counter add: {} iterations in {:?} ({:.2} ns/iter)",
        iterations,
        duration,
        duration.as_nanos() as f64 / iterations as f64
    );

    assert_eq!(counter.total(), iterations as u64);
    // Should complete in under 500ms for 100k iterations
    assert!(duration.as_millis() < 500);
}

/// Benchmarks wire encoding of collection updates
#[test]
fn benchmark_packet_serialization() {
    let packet = Packet::CollectionUpdate {
        notification: CollectionUpdateNotification::new(
            Some(PlayerId::random()),
            ResourceType::Diamond,
            1_000,
        ),
    };

    let iterations = 10_000;
    let start = Instant::now();

    for _ in 0..iterations {
        let bytes = packet.encode().unwrap();
        let decoded = Packet::decode(&bytes).unwrap();
        assert_eq!(decoded, packet);
    }

    let duration = start.elapsed();
    println!(
        "Packet encode/decode: {} iterations in {:?} ({:.2} μs/iter)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    // Should complete in under 1 second
    assert!(duration.as_millis() < 1000);
}

/// Benchmarks solo productions through the engine
#[tokio::test]
async fn benchmark_solo_production() {
    let player = PlayerId::random();
    let engine = local_engine(&[player], Arc::new(MemoryGroupRegistry::new())).await;

    let iterations = 10_000;
    let start = Instant::now();

    for _ in 0..iterations {
        engine
            .record_production(player, ResourceType::Wheat, 1)
            .await
            .unwrap();
    }

    let duration = start.elapsed();
    println!(
        "Solo production: {} iterations in {:?} ({:.2} μs/iter)",
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    assert_eq!(
        engine.progression().amount(&player, ResourceType::Wheat).await,
        Some(iterations)
    );
    // Should complete in under 2 seconds
    assert!(duration.as_millis() < 2000);
}

/// Benchmarks productions fanned out to a coop hosted on one node
#[tokio::test]
async fn benchmark_local_coop_fan_out() {
    let players: Vec<PlayerId> = (0..8).map(|_| PlayerId::random()).collect();
    let groups = Arc::new(MemoryGroupRegistry::new());
    groups.create_group(players.iter().copied()).await;
    let engine = local_engine(&players, groups).await;

    let mut teammate = engine.bus().subscribe_for(players[1]);

    let iterations = 1_000;
    let start = Instant::now();

    for _ in 0..iterations {
        engine
            .record_production(players[0], ResourceType::Coal, 1)
            .await
            .unwrap();
    }
    engine.settle().await;

    let duration = start.elapsed();
    println!(
        "Local coop fan-out ({} members): {} iterations in {:?} ({:.2} μs/iter)",
        players.len(),
        iterations,
        duration,
        duration.as_micros() as f64 / iterations as f64
    );

    // The bus may have lagged, so only the addressing is checked
    let update = teammate.try_recv().expect("Teammate heard nothing");
    assert_eq!(update.subject, Some(players[1]));
    assert_eq!(update.resource, ResourceType::Coal);
    // Should complete in under 2 seconds
    assert!(duration.as_millis() < 2000);
}
