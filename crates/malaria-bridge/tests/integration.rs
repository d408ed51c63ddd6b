// tests/integration.rs
// Requires a real `mosquitto` binary on PATH and a target broker on
// localhost:1883 for the relay to bridge to. Skipped by default.

use malaria_bridge::BridgingSender;
use malaria_core::generator::GaussianSize;
use rumqttc::QoS;

#[tokio::test]
#[ignore]
async fn bridged_publish_reaches_the_target_broker() {
    let mut bridge = BridgingSender::new("mosquitto", "localhost", 1883, "bridge-test", None)
        .await
        .expect("relay broker should start and accept a connection");

    let generator = Box::new(GaussianSize::new("bridge-test", 10, 32));
    bridge
        .run(generator, QoS::AtLeastOnce)
        .await
        .expect("run should complete");

    let stats = bridge.stats().await;
    assert_eq!(stats.count_total, 10);
    assert_eq!(stats.count_ok, 10);
}
