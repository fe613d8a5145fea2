//! End-to-end: a TCP graph peer streams a session into a running engine.

use std::sync::Arc;
use std::time::Duration;

use canopy_layout::Vec2;
use canopy_transfer::{Channel, ConnectionManager, ReconnectPolicy, TcpChannel, TcpTransport};
use canopy_vis::{BroadcastRenderer, Engine, EngineHandle, EngineOptions, EngineStatus};
use serde_json::json;
use tokio::net::TcpListener;

const WAIT: Duration = Duration::from_secs(10);

async fn wait_status(handle: &EngineHandle, what: &str, pred: impl FnMut(&EngineStatus) -> bool) {
    let mut status = handle.watch_status();
    tokio::time::timeout(WAIT, status.wait_for(pred))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for {what}: {:?}", handle.status()))
        .unwrap();
}

fn node(id: &str, name: &str) -> serde_json::Value {
    json!({"id": id, "name": name, "kind": "function", "file": "src/lib.rs", "start_line": 1, "end_line": 5})
}

async fn stream_graph(peer: &mut TcpChannel, nodes: &[(&str, &str)], edges: &[(&str, &str)]) {
    let nodes: Vec<_> = nodes.iter().map(|(id, name)| node(id, name)).collect();
    let edges: Vec<_> = edges
        .iter()
        .map(|(s, t)| json!({"source": s, "target": t, "kind": "calls"}))
        .collect();
    let (first, rest) = nodes.split_at(nodes.len().min(2));

    for frame in [
        json!({"type": "graph_begin", "payload": {}}),
        json!({"type": "node_batch", "payload": {"nodes": first}}),
        json!({"type": "node_batch", "payload": {"nodes": rest}}),
        json!({"type": "edge_batch", "payload": {"edges": edges}}),
        json!({"type": "graph_end", "payload": {}}),
    ] {
        peer.send(&frame.to_string()).await.unwrap();
    }
}

#[tokio::test]
async fn streams_lays_out_and_reacts_to_commands() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let manager = ConnectionManager::new(Arc::new(TcpTransport), ReconnectPolicy::default());
    manager.connect(addr.to_string()).unwrap();
    let renderer = BroadcastRenderer::new();
    let feed = renderer.frames();
    let options = EngineOptions {
        tick: Duration::from_millis(1),
        ..Default::default()
    };
    let (engine, handle) = Engine::new(manager, options, renderer).unwrap();
    let mut focus = handle.subscribe("focus");
    let running = tokio::spawn(engine.run());

    let (stream, _) = listener.accept().await.unwrap();
    let mut peer = TcpChannel::new(stream).unwrap();
    wait_status(&handle, "connection", |s| s.connected).await;

    // Handshake: hello is acknowledged once.
    peer.send(&json!({"type": "hello", "payload": {"version": "1", "node_count": 3, "edge_count": 1}}).to_string())
        .await
        .unwrap();
    let ack = peer.recv().await.unwrap().unwrap();
    assert_eq!(ack, r#"{"type":"ready_for_graph","payload":{}}"#);

    stream_graph(
        &mut peer,
        &[("n1", "parse"), ("n2", "render"), ("n3", "Parser")],
        &[("n1", "n3"), ("n1", "ghost")],
    )
    .await;
    wait_status(&handle, "first snapshot", |s| s.snapshots == 1).await;
    let status = handle.status();
    assert_eq!(status.node_count, 3);
    assert_eq!(status.edge_count, 1, "dangling edge must not be sprung");
    assert!(!status.loading);

    // Opaque frames reach their subscribers.
    peer.send(r#"{"type":"focus","payload":{"node":"n2"}}"#).await.unwrap();
    let message = tokio::time::timeout(WAIT, focus.recv()).await.unwrap().unwrap();
    assert_eq!(message.payload["node"], "n2");

    let hits = handle.search("PARSE", 10).await.unwrap();
    let ids: Vec<_> = hits.iter().map(|h| h.id.as_str()).collect();
    assert_eq!(ids, ["n1", "n3"]);

    wait_status(&handle, "settle", |s| s.settled).await;

    // Recenter lands the bounding box center on the view center.
    let mut frames = feed.subscribe();
    handle.recenter().await.unwrap();
    let frame = tokio::time::timeout(WAIT, frames.recv()).await.unwrap().unwrap();
    let (min_x, max_x) = frame.nodes.iter().fold((f64::MAX, f64::MIN), |(lo, hi), n| (lo.min(n.x), hi.max(n.x)));
    let (min_y, max_y) = frame.nodes.iter().fold((f64::MAX, f64::MIN), |(lo, hi), n| (lo.min(n.y), hi.max(n.y)));
    assert!(((min_x + max_x) / 2.0).abs() < 1e-6);
    assert!(((min_y + max_y) / 2.0).abs() < 1e-6);

    // A drag is applied between ticks and wakes the layout.
    handle.drag("n1", Vec2::new(500.0, -250.0)).await.unwrap();
    let frame = tokio::time::timeout(WAIT, frames.recv()).await.unwrap().unwrap();
    let dragged = frame.nodes.iter().find(|n| n.id == "n1").unwrap();
    assert_eq!((dragged.x, dragged.y), (500.0, -250.0));
    assert!(!frame.settled);

    handle.select(Some("n2".into())).await.unwrap();
    wait_status(&handle, "selection", |s| s.selection.as_deref() == Some("n2")).await;

    // A replacement snapshot without the selected node clears the selection.
    stream_graph(&mut peer, &[("n1", "parse"), ("n3", "Parser")], &[("n1", "n3")]).await;
    wait_status(&handle, "second snapshot", |s| s.snapshots == 2).await;
    let status = handle.status();
    assert_eq!(status.node_count, 2);
    assert_eq!(status.selection, None);

    handle.shutdown().await.unwrap();
    tokio::time::timeout(WAIT, running).await.unwrap().unwrap().unwrap();
    assert_eq!(peer.recv().await.unwrap(), None);
}

#[tokio::test]
async fn malformed_frames_do_not_break_the_session() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let manager = ConnectionManager::new(Arc::new(TcpTransport), ReconnectPolicy::default());
    manager.connect(addr.to_string()).unwrap();
    let (engine, handle) = Engine::new(manager, EngineOptions::default(), BroadcastRenderer::new()).unwrap();
    let running = tokio::spawn(engine.run());

    let (stream, _) = listener.accept().await.unwrap();
    let mut peer = TcpChannel::new(stream).unwrap();

    peer.send(r#"{"type":"graph_begin","payload":{}}"#).await.unwrap();
    wait_status(&handle, "loading", |s| s.loading).await;
    peer.send(&json!({"type": "node_batch", "payload": {"nodes": [node("a", "main")]}}).to_string())
        .await
        .unwrap();
    peer.send("{ this is not json").await.unwrap();
    peer.send(r#"{"type":"edge_batch","payload":{"edges":[{"source":"a"}]}}"#).await.unwrap();
    peer.send(r#"{"type":"graph_end","payload":{}}"#).await.unwrap();

    wait_status(&handle, "snapshot", |s| s.snapshots == 1).await;
    let status = handle.status();
    assert_eq!(status.node_count, 1);
    assert_eq!(status.discarded_frames, 2);
    assert_eq!(status.aborted_sessions, 0);
    assert!(!status.loading);
    assert!(status.connected);

    handle.shutdown().await.unwrap();
    running.await.unwrap().unwrap();
}
