mod common;

use common::unique_channel;
use serial_test::serial;
use std::collections::HashMap;
use std::fs;
use std::time::Duration;
use webhook_recorder::config::{ApplicationConfig, Environment};
use webhook_recorder::transport::MemoryPublisher;
use webhook_recorder::webhook::{body_contains, ConsumptionPolicy, EventRecording, PubSubEnvelope, WebhookHarness};

fn write_config(dir: &std::path::Path, env: Environment, content: &str) {
    fs::write(dir.join(env.as_filename()), content).unwrap();
}

#[tokio::test]
#[serial]
async fn test_harness_from_config_file_records_events() {
    let dir = tempfile::tempdir().unwrap();
    let channel = unique_channel("harness");
    write_config(
        dir.path(),
        Environment::Test,
        &format!(
            r#"
[webhook.matching]
consumption = "shared"
default_timeout_ms = 1500

[webhook.transport]
type = "memory"
url = "{}"
webhook_id = "suite"
"#,
            channel
        ),
    );

    let config = ApplicationConfig::load_from(dir.path(), Environment::Test).unwrap();
    assert_eq!(config.webhook.matching.consumption, ConsumptionPolicy::Shared);

    let harness = WebhookHarness::from_config(&config.webhook);
    assert!(harness.is_enabled());
    harness.ready().await.unwrap();

    let recording = harness.start_recording();
    recording.add_matcher(body_contains("created"));
    recording.add_matcher(body_contains("order"));

    MemoryPublisher::new(&channel)
        .publish(&PubSubEnvelope::encode("suite-1", b"order created", HashMap::new()))
        .unwrap();

    assert_eq!(recording.are_all_matched(harness.default_timeout()).await, Ok(true));

    recording.stop();
    harness.finalize().await;
}

#[tokio::test]
#[serial]
async fn test_harness_without_transport_is_null() {
    let dir = tempfile::tempdir().unwrap();
    write_config(dir.path(), Environment::Production, "[log]\nlevel = \"warn\"\n");

    let config = ApplicationConfig::load_from(dir.path(), Environment::Production).unwrap();
    let harness = WebhookHarness::from_config(&config.webhook);
    assert!(!harness.is_enabled());
    harness.ready().await.unwrap();

    let recording = harness.start_recording();
    recording.add_matcher(body_contains("never arrives"));
    assert_eq!(recording.are_all_matched(Duration::from_millis(1)).await, Ok(true));

    harness.finalize().await;
}

#[tokio::test]
#[serial]
async fn test_unsupported_type_fails_ready_not_load() {
    let dir = tempfile::tempdir().unwrap();
    write_config(
        dir.path(),
        Environment::Development,
        "[webhook.transport]\ntype = \"carrier-pigeon\"\nurl = \"coop://roof\"\n",
    );

    let config = ApplicationConfig::load_from(dir.path(), Environment::Development).unwrap();
    let harness = WebhookHarness::from_config(&config.webhook);

    let err = harness.ready().await.unwrap_err();
    assert_eq!(err.to_string(), "Unsupported or misconfigured transport type: carrier-pigeon");

    harness.finalize().await;
}

#[test]
fn test_disabled_harness_defaults() {
    let harness = WebhookHarness::disabled();
    assert!(!harness.is_enabled());
    assert_eq!(harness.default_timeout(), Duration::from_secs(10));
}
