use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use dropwatch_config::{FilterConfig, HandlerConfig, IngestConfig, PostProcessorConfig};
use dropwatch_core::{CancelAction, ProcessorKind, SuccessAction};
use tempfile::tempdir;

const FULL_TOML: &str = r#"
[[endpoints]]
name = "invoices"
drop_path = "/srv/drop/invoices"
in_progress_path = "/srv/work/invoices"
success_path = "/srv/archive/%filepath%"
failure_path = "/srv/failed/%filepath%"
filter = "*.xml"
monitor_subdirectories = true
processor = "polling_v2"
poll_interval_ms = 250
workers = 4
scavenge_interval_secs = 15
recovery_interval_secs = 600
restart_interval_secs = 0
on_success = "move_to_success"
on_cancel = "return_to_drop"
retry_attempts = 3
retry_delay_ms = 50
fault_cooldown_secs = 5
handler = { type = "command", program = "/usr/local/bin/import-invoice", args = ["--strict"] }
post_processor = { type = "log" }
additional_filter = { type = "exclude_segments", segments = ["tmp", ".staging"], case_insensitive = true }

[[endpoints]]
name = "drain"
drop_path = "/srv/drop/drain"
in_progress_path = "/srv/work/drain"
failure_path = "/srv/failed/drain"
handler = { type = "accept" }
"#;

#[test]
fn toml_file_round_trips_into_descriptors() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("dropwatch.toml");
    fs::write(&path, FULL_TOML).unwrap();

    let config = IngestConfig::load_from_file(&path).unwrap();
    assert_eq!(config.endpoints.len(), 2);

    let invoices = &config.endpoints[0];
    assert_eq!(
        invoices.handler,
        HandlerConfig::Command {
            program: "/usr/local/bin/import-invoice".into(),
            args: vec!["--strict".into()],
        }
    );
    assert_eq!(invoices.post_processor, Some(PostProcessorConfig::Log));
    assert_eq!(
        invoices.additional_filter,
        Some(FilterConfig::ExcludeSegments {
            segments: vec!["tmp".into(), ".staging".into()],
            case_insensitive: true,
        })
    );

    let descriptors = config.descriptors().unwrap();
    let d = &descriptors[0];
    assert_eq!(d.name, "invoices");
    assert_eq!(d.processor, ProcessorKind::PollingV2);
    assert_eq!(d.poll_interval, Duration::from_millis(250));
    assert_eq!(d.worker_count, 4);
    assert_eq!(d.include_pattern, "*.xml");
    assert_eq!(d.success_path, Some(PathBuf::from("/srv/archive/%filepath%")));
    assert_eq!(d.on_success, SuccessAction::MoveToSuccess);
    assert_eq!(d.on_cancel, CancelAction::ReturnToDrop);
    assert_eq!(d.retry.attempts, 3);
    assert_eq!(d.fault_cooldown, Duration::from_secs(5));
    assert!(!d.watchdog_enabled());

    let drain = &descriptors[1];
    assert_eq!(drain.worker_count, 1);
    assert_eq!(drain.processor, ProcessorKind::Event);
    assert_eq!(drain.recovery_interval, Duration::from_secs(60));
}

#[test]
fn json_file_is_parsed_by_extension() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("dropwatch.json");
    fs::write(
        &path,
        r#"{
            "endpoints": [{
                "name": "json",
                "drop_path": "/d",
                "in_progress_path": "/i",
                "failure_path": "/f",
                "processor": "polling",
                "handler": { "type": "accept" }
            }]
        }"#,
    )
    .unwrap();

    let config = IngestConfig::load_from_file(&path).unwrap();
    assert_eq!(config.descriptors().unwrap()[0].processor, ProcessorKind::Polling);
}

#[test]
fn unknown_extension_tries_both_formats() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("dropwatch.conf");
    fs::write(&path, FULL_TOML).unwrap();
    assert_eq!(IngestConfig::load_from_file(&path).unwrap().endpoints.len(), 2);
}

#[test]
fn invalid_endpoint_is_reported_with_its_name() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("dropwatch.toml");
    fs::write(
        &path,
        r#"
        [[endpoints]]
        name = "broken"
        drop_path = "/d"
        in_progress_path = "/i"
        failure_path = "/f"
        on_success = "move_to_success"
        handler = { type = "accept" }
        "#,
    )
    .unwrap();

    let config = IngestConfig::load_from_file(&path).unwrap();
    let err = config.descriptors().unwrap_err();
    let message = format!("{err:#}");
    assert!(message.contains("broken"));
    assert!(message.contains("success path"));
}

#[test]
fn missing_file_is_an_error() {
    let tmp = tempdir().unwrap();
    assert!(IngestConfig::load_from_file(&tmp.path().join("nope.toml")).is_err());
}

#[test]
fn broken_endpoint_is_named_in_parse_errors() {
    let tmp = tempdir().unwrap();
    let path = tmp.path().join("dropwatch.toml");
    fs::write(
        &path,
        r#"
        [[endpoints]]
        name = "ledger"
        drop_path = "/d"
        in_progress_path = "/i"
        failure_path = "/f"
        processor = "telepathy"
        handler = { type = "accept" }
        "#,
    )
    .unwrap();

    let err = IngestConfig::load_from_file(&path).unwrap_err();
    let message = format!("{err:#}");
    assert!(message.contains("dropwatch.toml"), "{message}");
    assert!(message.contains(r#"endpoint #1 ("ledger")"#), "{message}");
}
