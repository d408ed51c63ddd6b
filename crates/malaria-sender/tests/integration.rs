// tests/integration.rs
// Broker-dependent properties from the sender's scenario table. These need a
// real MQTT broker listening on localhost:1883 and are skipped by default;
// run with `cargo test -- --ignored` against a local mosquitto instance.

use malaria_core::generator::GaussianSize;
use malaria_sender::TrackingSender;
use rumqttc::QoS;

#[tokio::test]
#[ignore]
async fn publishes_and_acknowledges_every_message() {
    let sender = TrackingSender::new("localhost", 1883, "malaria-sender-test", None)
        .await
        .expect("connect to local broker");

    let generator = Box::new(GaussianSize::new("test-client", 50, 64));
    sender
        .run(generator, QoS::AtLeastOnce)
        .await
        .expect("run should complete");

    let stats = sender.stats().await;
    assert_eq!(stats.count_total, 50);
    assert_eq!(stats.count_ok, 50);
    assert_eq!(stats.rate_ok, 1.0);

    sender.stop().await.expect("disconnect cleanly");
}

#[tokio::test]
#[ignore]
async fn qos0_messages_are_tracked_via_send_confirmation() {
    let sender = TrackingSender::new("localhost", 1883, "malaria-sender-qos0-test", None)
        .await
        .expect("connect to local broker");

    let generator = Box::new(GaussianSize::new("test-client", 20, 32));
    sender
        .run(generator, QoS::AtMostOnce)
        .await
        .expect("run should complete");

    let stats = sender.stats().await;
    assert_eq!(stats.count_total, 20);
    assert_eq!(stats.count_ok, 20);

    sender.stop().await.expect("disconnect cleanly");
}
