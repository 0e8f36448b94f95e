// tests/integration/subscription_test.rs

//! Integration tests for change subscriptions
//! Tests: OPEN/CLOSE bookkeeping, CHG dispatch, failure handling

use super::test_helpers::{MockDevice, Reply, assert_no_change, channel_callback, next_change};
use mprotocol_client::{Client, ClientError, ConnectionState};

#[tokio::test]
async fn test_open_and_close_are_sent_once_per_node() {
    let device = MockDevice::acknowledging().await;
    let client = Client::open(device.config()).await.unwrap();
    let (speed_cb, _speed_rx) = channel_callback();
    let (mode_cb, _mode_rx) = channel_callback();

    client
        .add_subscription(speed_cb.clone(), "/motor", Some("speed"))
        .await
        .unwrap();
    client
        .add_subscription(mode_cb.clone(), "/motor", Some("mode"))
        .await
        .unwrap();
    assert_eq!(device.count("OPEN /motor"), 1);

    assert!(
        client
            .remove_subscription(&speed_cb, "/motor", Some("speed"))
            .await
            .unwrap()
    );
    assert_eq!(device.count("CLOSE /motor"), 0);

    assert!(
        client
            .remove_subscription(&mode_cb, "/motor", Some("mode"))
            .await
            .unwrap()
    );
    assert_eq!(device.count("CLOSE /motor"), 1);
    assert!(!client.subscriptions().is_subscribed("/motor"));
}

#[tokio::test]
async fn test_change_reaches_property_and_whole_node_callbacks() {
    let device = MockDevice::acknowledging().await;
    let client = Client::open(device.config()).await.unwrap();
    let (prop_cb, mut prop_rx) = channel_callback();
    let (node_cb, mut node_rx) = channel_callback();
    let (other_cb, mut other_rx) = channel_callback();

    client
        .add_subscription(prop_cb, "/a/b", Some("c"))
        .await
        .unwrap();
    client.add_subscription(node_cb, "/a/b", None).await.unwrap();
    client
        .add_subscription(other_cb, "/a/b", Some("d"))
        .await
        .unwrap();

    device.send_line("CHG /a/b.c=5");

    let change = next_change(&mut prop_rx).await.expect("property callback");
    assert_eq!(change.node_path, "/a/b");
    assert_eq!(change.property, "c");
    assert_eq!(change.value, "5");

    let change = next_change(&mut node_rx).await.expect("whole-node callback");
    assert_eq!(change.property, "c");
    assert_eq!(change.value, "5");

    assert_no_change(&mut other_rx).await;
}

#[tokio::test]
async fn test_change_for_unknown_node_is_dropped() {
    let device = MockDevice::acknowledging().await;
    let client = Client::open(device.config()).await.unwrap();
    let (cb, mut rx) = channel_callback();
    client.add_subscription(cb, "/a", None).await.unwrap();

    device.send_line("CHG /elsewhere.x=1");
    assert_no_change(&mut rx).await;

    // The receive loop is still healthy.
    assert!(client.send_sync("SET /a.x=1").await.unwrap().is_ok());
    assert_eq!(client.state(), ConnectionState::Connected);
}

#[tokio::test]
async fn test_change_interleaved_with_reply() {
    let device = MockDevice::start(|command| {
        if command.starts_with("GET") {
            Reply::Lines(vec![
                "CHG /sensor.level=7".to_string(),
                "P_int level=7".to_string(),
            ])
        } else {
            Reply::ok()
        }
    })
    .await;
    let client = Client::open(device.config()).await.unwrap();
    let (cb, mut rx) = channel_callback();
    client
        .add_subscription(cb, "/sensor", Some("level"))
        .await
        .unwrap();

    let result = client.send_sync("GET /sensor.level").await.unwrap();
    assert_eq!(result.value(), Some("7"));
    assert_eq!(next_change(&mut rx).await.unwrap().value, "7");
}

#[tokio::test]
async fn test_rejected_open_leaves_no_subscription() {
    let device = MockDevice::start(|command| {
        if command.starts_with("OPEN") {
            Reply::line("E2:No such node")
        } else {
            Reply::ok()
        }
    })
    .await;
    let client = Client::open(device.config()).await.unwrap();
    let (cb, mut rx) = channel_callback();

    let err = client
        .add_subscription(cb, "/missing", None)
        .await
        .unwrap_err();

    assert_eq!(
        err,
        ClientError::CommandRejected {
            command: "OPEN /missing".to_string(),
            code: 2,
            message: "No such node".to_string(),
        }
    );
    assert!(!client.subscriptions().is_subscribed("/missing"));

    device.send_line("CHG /missing.x=1");
    assert_no_change(&mut rx).await;
}

#[tokio::test]
async fn test_rejected_close_restores_subscription() {
    let device = MockDevice::start(|command| {
        if command.starts_with("CLOSE") {
            Reply::line("E1:Denied")
        } else {
            Reply::ok()
        }
    })
    .await;
    let client = Client::open(device.config()).await.unwrap();
    let (cb, mut rx) = channel_callback();
    client
        .add_subscription(cb.clone(), "/a", Some("x"))
        .await
        .unwrap();

    let err = client
        .remove_subscription(&cb, "/a", Some("x"))
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::CommandRejected { code: 1, .. }));
    assert_eq!(client.subscriptions().callback_count("/a"), 1);

    device.send_line("CHG /a.x=9");
    assert_eq!(next_change(&mut rx).await.unwrap().value, "9");
}

#[tokio::test]
async fn test_reconnect_forgets_subscriptions() {
    let device = MockDevice::acknowledging().await;
    let client = Client::open(device.config()).await.unwrap();
    let (cb, _rx) = channel_callback();
    client.add_subscription(cb, "/a", None).await.unwrap();

    client.close();
    client.connect().await.unwrap();

    assert!(client.subscriptions().nodes().is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_subscribers_share_one_open_and_close() {
    let device = MockDevice::acknowledging().await;
    let client = Client::open(device.config()).await.unwrap();
    let callbacks: Vec<_> = (0..8).map(|_| channel_callback().0).collect();

    let adds: Vec<_> = callbacks
        .iter()
        .enumerate()
        .map(|(i, cb)| {
            let (client, cb) = (client.clone(), cb.clone());
            tokio::spawn(async move {
                let property = format!("p{i}");
                client.add_subscription(cb, "/x", Some(&property)).await
            })
        })
        .collect();
    for add in adds {
        add.await.unwrap().unwrap();
    }

    assert_eq!(device.count("OPEN /x"), 1);
    assert_eq!(client.subscriptions().callback_count("/x"), 8);

    let removes: Vec<_> = callbacks
        .iter()
        .enumerate()
        .map(|(i, cb)| {
            let (client, cb) = (client.clone(), cb.clone());
            tokio::spawn(async move {
                let property = format!("p{i}");
                client.remove_subscription(&cb, "/x", Some(&property)).await
            })
        })
        .collect();
    for remove in removes {
        assert!(remove.await.unwrap().unwrap());
    }

    assert_eq!(device.count("CLOSE /x"), 1);
    assert!(!client.subscriptions().is_subscribed("/x"));
    assert_eq!(client.state(), ConnectionState::Connected);
}
