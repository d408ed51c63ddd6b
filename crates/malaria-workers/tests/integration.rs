// tests/integration.rs
// End-to-end worker pool test. Requires a real MQTT broker on
// localhost:1883 and the malaria-cli binary built alongside this crate (it
// is the re-exec target for WORKER_INTERNAL_FLAG); skipped by default.

use malaria_workers::{PoolArgs, run_worker_pool};

#[tokio::test]
#[ignore]
async fn pool_of_three_workers_aggregates_cleanly() {
    let pool = PoolArgs {
        worker_count: 3,
        label: "pool-test".into(),
        host: "localhost".into(),
        port: 1883,
        qos: 1,
        msg_count: 20,
        msg_size: 32,
        timing: false,
        msgs_per_second: 0.0,
        jitter: 0.0,
        psk_keyfile: None,
    };

    let aggregate = run_worker_pool(&pool).await.expect("pool should succeed");
    assert_eq!(aggregate.count_total, 60);
    assert_eq!(aggregate.count_ok, 60);
}
