mod common;

use common::{quiet_policy, read_lines, wait_until};
use linesink::{Channel, FlushPolicy, LineSink};
use std::time::Duration;
use tempfile::tempdir;

#[test]
fn test_emitted_lines_persist_in_order() {
    let dir = tempdir().unwrap();
    let sink = LineSink::builder(dir.path())
        .flush_policy(quiet_policy())
        .open()
        .unwrap();

    for i in 0..20 {
        sink.emit(Channel::Normal, format!("line {i}"), false);
    }
    sink.shutdown(Duration::from_secs(5));

    let lines = read_lines(&sink.channel_path(Channel::Normal));
    let expected: Vec<String> = (0..20).map(|i| format!("line {i}")).collect();
    assert_eq!(lines, expected);
}

#[test]
fn test_error_lines_flush_without_shutdown() {
    let dir = tempdir().unwrap();
    let sink = LineSink::builder(dir.path()).open().unwrap();

    sink.emit(Channel::Error, "disk on fire", true);

    let path = sink.channel_path(Channel::Error);
    assert!(
        wait_until(Duration::from_secs(5), || {
            read_lines(&path) == vec!["disk on fire".to_string()]
        }),
        "error line should become durable without an explicit shutdown"
    );
    sink.shutdown(Duration::from_secs(5));
}

#[test]
fn test_channels_write_to_independent_files() {
    let dir = tempdir().unwrap();
    let sink = LineSink::builder(dir.path())
        .flush_policy(quiet_policy())
        .open()
        .unwrap();

    sink.emit(Channel::Normal, "normal 0", false);
    sink.emit(Channel::Error, "error 0", true);
    sink.emit(Channel::Normal, "normal 1", false);
    sink.shutdown(Duration::from_secs(5));

    assert_eq!(
        read_lines(&sink.channel_path(Channel::Normal)),
        vec!["normal 0".to_string(), "normal 1".to_string()]
    );
    assert_eq!(
        read_lines(&sink.channel_path(Channel::Error)),
        vec!["error 0".to_string()]
    );
}

#[test]
fn test_burst_of_250_lines_with_threshold_100() {
    let dir = tempdir().unwrap();
    let sink = LineSink::builder(dir.path())
        .flush_policy(FlushPolicy {
            idle: Duration::from_secs(3600),
            buffer_line_threshold: 100,
            error_immediate: true,
        })
        .idle_tick(None)
        .open()
        .unwrap();

    for i in 0..250 {
        sink.emit(Channel::Normal, format!("line {i}"), false);
    }
    sink.shutdown(Duration::from_secs(5));

    let lines = read_lines(&sink.channel_path(Channel::Normal));
    let expected: Vec<String> = (0..250).map(|i| format!("line {i}")).collect();
    assert_eq!(lines, expected);

    let snap = sink.telemetry();
    assert_eq!(snap.dropped_lines, 0);
    assert_eq!(snap.lines_written, 250);
}

#[test]
fn test_reconfigured_policy_takes_effect() {
    let dir = tempdir().unwrap();
    let sink = LineSink::builder(dir.path())
        .flush_policy(quiet_policy())
        .idle_tick(None)
        .open()
        .unwrap();

    sink.emit(Channel::Normal, "buffered", false);
    sink.configure_flush_policy(FlushPolicy {
        idle: Duration::from_secs(3600),
        buffer_line_threshold: 2,
        error_immediate: true,
    });
    sink.emit(Channel::Normal, "triggers", false);

    let path = sink.channel_path(Channel::Normal);
    assert!(
        wait_until(Duration::from_secs(5), || read_lines(&path).len() == 2),
        "threshold from the swapped policy should flush both lines"
    );
    sink.shutdown(Duration::from_secs(5));
}
