mod common;

use common::quiet_policy;
use linesink::{Channel, LineSink, SinkMode};
use std::fs;
use std::time::Duration;
use tempfile::tempdir;

fn report_lines(sink: &LineSink) -> Vec<String> {
    let content = fs::read_to_string(sink.channel_path(Channel::Error)).unwrap();
    let doc: serde_json::Value = serde_json::from_str(&content).unwrap();
    doc["lines"]
        .as_array()
        .unwrap()
        .iter()
        .map(|v| v.as_str().unwrap().to_string())
        .collect()
}

#[test]
fn test_report_contains_the_full_buffer() {
    let dir = tempdir().unwrap();
    let sink = LineSink::builder(dir.path())
        .error_sink_mode(SinkMode::FullRewrite)
        .flush_policy(quiet_policy())
        .open()
        .unwrap();

    for i in 0..3 {
        sink.emit(Channel::Error, format!("finding {i}"), true);
    }
    sink.shutdown(Duration::from_secs(5));

    let expected: Vec<String> = (0..3).map(|i| format!("finding {i}")).collect();
    assert_eq!(report_lines(&sink), expected);

    let path = sink.channel_path(Channel::Error);
    assert_eq!(path.extension().unwrap(), "json");
    assert!(!path.with_extension("json.tmp").exists());
}

#[test]
fn test_report_grows_across_flushes() {
    let dir = tempdir().unwrap();
    let sink = LineSink::builder(dir.path())
        .error_sink_mode(SinkMode::FullRewrite)
        .open()
        .unwrap();

    sink.emit(Channel::Error, "first", true);
    sink.emit(Channel::Error, "second", true);
    sink.shutdown(Duration::from_secs(5));

    // Each flush rewrote the whole document; the final one holds everything.
    assert_eq!(
        report_lines(&sink),
        vec!["first".to_string(), "second".to_string()]
    );
}

#[test]
fn test_normal_channel_stays_append_only() {
    let dir = tempdir().unwrap();
    let sink = LineSink::builder(dir.path())
        .error_sink_mode(SinkMode::FullRewrite)
        .flush_policy(quiet_policy())
        .open()
        .unwrap();

    sink.emit(Channel::Normal, "plain line", false);
    sink.shutdown(Duration::from_secs(5));

    let path = sink.channel_path(Channel::Normal);
    assert_eq!(path.extension().unwrap(), "txt");
    assert_eq!(fs::read_to_string(path).unwrap(), "plain line\n");
}
