#[path = "support/mod.rs"]
mod support;

use httpmock::Method::GET;
use httpmock::MockServer;
use nodeward::config::LivenessConfig;
use nodeward::liveness::{HttpProgressProbe, LivenessMonitor, MetricSource, ProgressProbe};
use proptest::prelude::*;
use std::time::Duration;
use support::ScriptedProbe;

#[tokio::test(flavor = "multi_thread")]
async fn repeated_height_is_a_stall() {
    let probe = ScriptedProbe::new([Some(10), Some(10), Some(15), Some(15)]);
    let mut monitor = LivenessMonitor::new(probe.boxed());

    let mut verdicts = Vec::new();
    for _ in 0..4 {
        verdicts.push(monitor.check().await);
    }
    assert_eq!(verdicts, vec![true, false, true, false]);
    assert_eq!(monitor.last(), 15);
    assert_eq!(probe.calls(), 4);
}

#[tokio::test(flavor = "multi_thread")]
async fn unobservable_counter_keeps_the_baseline() {
    let probe = ScriptedProbe::new([Some(5), None, Some(5), Some(6)]);
    let mut monitor = LivenessMonitor::new(probe.boxed());

    assert!(monitor.check().await);
    assert!(!monitor.check().await, "missing observation counts as stalled");
    assert_eq!(monitor.last(), 5);
    assert!(!monitor.check().await);
    assert!(monitor.check().await);
}

#[tokio::test(flavor = "multi_thread")]
async fn counter_at_zero_never_looks_alive() {
    let mut monitor = LivenessMonitor::new(ScriptedProbe::new([Some(0)]).boxed());
    assert!(!monitor.check().await);
}

#[tokio::test(flavor = "multi_thread")]
async fn regressing_counter_resets_the_baseline() {
    let probe = ScriptedProbe::new([Some(100), Some(3), Some(4)]);
    let mut monitor = LivenessMonitor::new(probe.boxed());

    assert!(monitor.check().await);
    assert!(!monitor.check().await);
    assert_eq!(monitor.last(), 3);
    assert!(monitor.check().await);
}

#[tokio::test(flavor = "multi_thread")]
async fn http_probe_reads_prometheus_exposition() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/metrics");
            then.status(200).body(
                "# TYPE substrate_block_height gauge\n\
                 substrate_block_height{status=\"best\"} 2048\n\
                 substrate_block_height{status=\"finalized\"} 2046\n",
            );
        })
        .await;

    let probe = HttpProgressProbe::new(&LivenessConfig {
        url: server.url("/metrics"),
        source: MetricSource::Prometheus {
            metric: "substrate_block_height".to_string(),
        },
        timeout: Duration::from_secs(1),
    })
    .expect("probe");
    assert_eq!(probe.observe().await, Some(2048));
}

#[tokio::test(flavor = "multi_thread")]
async fn http_probe_reads_json_pointer() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/header");
            then.status(200)
                .json_body(serde_json::json!({ "result": { "number": "0x2a" } }));
        })
        .await;

    let probe = HttpProgressProbe::new(&LivenessConfig {
        url: server.url("/header"),
        source: MetricSource::Json {
            pointer: "/result/number".to_string(),
        },
        timeout: Duration::from_secs(1),
    })
    .expect("probe");
    assert_eq!(probe.observe().await, Some(42));
}

#[tokio::test(flavor = "multi_thread")]
async fn http_probe_failures_are_unobservable() {
    let server = MockServer::start_async().await;
    server
        .mock_async(|when, then| {
            when.method(GET).path("/metrics");
            then.status(503);
        })
        .await;

    let rejected = HttpProgressProbe::new(&LivenessConfig {
        url: server.url("/metrics"),
        source: MetricSource::Prometheus {
            metric: "substrate_block_height".to_string(),
        },
        timeout: Duration::from_secs(1),
    })
    .expect("probe");
    assert_eq!(rejected.observe().await, None);

    let unreachable = HttpProgressProbe::new(&LivenessConfig {
        url: "http://127.0.0.1:1/metrics".to_string(),
        source: MetricSource::Prometheus {
            metric: "substrate_block_height".to_string(),
        },
        timeout: Duration::from_millis(200),
    })
    .expect("probe");
    assert_eq!(unreachable.observe().await, None);
}

proptest! {
    #[test]
    fn alive_exactly_when_counter_grows(heights in proptest::collection::vec(0u64..50, 1..20)) {
        let runtime = tokio::runtime::Runtime::new().expect("runtime");
        runtime.block_on(async {
            let script: Vec<Option<u64>> = heights.iter().copied().map(Some).collect();
            let mut monitor = LivenessMonitor::new(ScriptedProbe::new(script).boxed());

            let mut previous = 0;
            for height in &heights {
                let alive = monitor.check().await;
                assert_eq!(alive, *height > previous, "height {height} after {previous}");
                assert_eq!(monitor.last(), *height);
                previous = *height;
            }
        });
    }
}
