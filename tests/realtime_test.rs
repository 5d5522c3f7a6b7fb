//! Realtime channel behavior against a scripted envelope server.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::time::timeout;

use axon_client::config::RealtimeConfig;
use axon_client::realtime::RealtimeChannel;

fn config(addr: &str) -> RealtimeConfig {
    RealtimeConfig {
        addr: addr.to_string(),
        reconnect_delay_secs: 0,
        heartbeat_interval_secs: 1,
    }
}

#[tokio::test]
async fn dispatches_envelopes_by_type_tag() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        socket
            .write_all(
                b"{\"type\":\"new_task\",\"task_id\":\"t1\"}\n{\"type\":\"mystery\"}\n{\"type\":\"reward_update\",\"amount\":1.5}\n",
            )
            .await
            .unwrap();
        // Hold the connection open so the channel does not reconnect.
        tokio::time::sleep(Duration::from_secs(30)).await;
    });

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut channel = RealtimeChannel::new(&config(&addr), Arc::new(AtomicBool::new(false)));
    let task_tx = tx.clone();
    channel.on("new_task", move |envelope| {
        let id = envelope["task_id"].as_str().unwrap_or_default().to_string();
        let _ = task_tx.send(("new_task", id));
    });
    let reward_tx = tx;
    channel.on("reward_update", move |envelope| {
        let amount = envelope["amount"].to_string();
        let _ = reward_tx.send(("reward_update", amount));
    });
    let runner = tokio::spawn(channel.run());

    let first = timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
    assert_eq!(first, ("new_task", "t1".to_string()));
    // The unknown type is skipped, not an error: the next delivery is the
    // reward update.
    let second = timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
    assert_eq!(second, ("reward_update", "1.5".to_string()));

    runner.abort();
}

#[tokio::test]
async fn reconnects_after_the_server_drops() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    tokio::spawn(async move {
        let (mut first, _) = listener.accept().await.unwrap();
        first
            .write_all(b"{\"type\":\"new_task\",\"task_id\":\"t1\"}\n")
            .await
            .unwrap();
        drop(first);

        let (mut second, _) = listener.accept().await.unwrap();
        second
            .write_all(b"{\"type\":\"new_task\",\"task_id\":\"t2\"}\n")
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(30)).await;
    });

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut channel = RealtimeChannel::new(&config(&addr), Arc::new(AtomicBool::new(false)));
    channel.on("new_task", move |envelope| {
        let id = envelope["task_id"].as_str().unwrap_or_default().to_string();
        let _ = tx.send(id);
    });
    let runner = tokio::spawn(channel.run());

    let first = timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
    assert_eq!(first, "t1");
    let second = timeout(Duration::from_secs(10), rx.recv()).await.unwrap().unwrap();
    assert_eq!(second, "t2");

    runner.abort();
}

#[tokio::test]
async fn heartbeat_pings_while_online() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let (tx, mut rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let mut lines = BufReader::new(socket).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            let envelope: serde_json::Value = serde_json::from_str(&line).unwrap();
            let _ = tx.send(envelope);
        }
    });

    let channel = RealtimeChannel::new(&config(&addr), Arc::new(AtomicBool::new(false)));
    let runner = tokio::spawn(channel.run());

    let ping = timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
    assert_eq!(ping["type"], "ping");
    assert!(ping["timestamp"].as_i64().unwrap() > 0);

    runner.abort();
}

#[tokio::test]
async fn heartbeat_goes_quiet_in_offline_mode() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap().to_string();
    let (tx, mut rx) = mpsc::unbounded_channel();
    tokio::spawn(async move {
        let (socket, _) = listener.accept().await.unwrap();
        let mut lines = BufReader::new(socket).lines();
        // Anything at all from the client during the outage is a failure.
        let heard = timeout(Duration::from_millis(2500), lines.next_line()).await;
        let _ = tx.send(heard.is_err());
    });

    let offline = Arc::new(AtomicBool::new(true));
    let channel = RealtimeChannel::new(&config(&addr), offline.clone());
    let runner = tokio::spawn(channel.run());

    let silent = timeout(Duration::from_secs(5), rx.recv()).await.unwrap().unwrap();
    assert!(silent, "heartbeat fired while offline");
    assert!(offline.load(Ordering::Relaxed));

    runner.abort();
}
