// tests/integration.rs
// Broker-dependent scenarios from the listener's scenario table (S5/S6).
// Requires a real MQTT broker on localhost:1883; skipped by default, run
// with `cargo test -- --ignored`.

use malaria_listener::{ListenerOptions, TrackingListener};
use rumqttc::QoS;

#[tokio::test]
#[ignore]
async fn observes_expected_count_from_two_clients() {
    let listener = TrackingListener::new(
        "localhost",
        1883,
        "malaria-listener-test",
        ListenerOptions::new(5, 2),
    )
    .await
    .expect("connect to local broker");

    // Two TrackingSenders publishing cids "a" and "b" with msg_count=5 are
    // expected to be running concurrently against the same broker for this
    // test to observe 10 messages.
    let test_complete = listener
        .run("mqtt-malaria/#", QoS::AtLeastOnce)
        .await
        .expect("run should complete");

    assert!(test_complete);
    let stats = listener.stats(test_complete).await;
    assert_eq!(stats.msg_count, 10);
    assert_eq!(stats.client_count, 2);
}
