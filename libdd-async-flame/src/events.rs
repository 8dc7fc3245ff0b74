// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Append-only invocation event buffer and its chrome-trace rendering.

use crate::host::ThreadId;
use anyhow::Context;
use serde::Serialize;
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;

pub const CAT_FUTURE_POLL: &str = "future_poll";
pub const CAT_FUTURE_POLL_UNWIND: &str = "future_poll_unwind";
pub const CAT_FUTURE_POLL_EXIT: &str = "future_poll_exit";

/// Chrome-trace phases. `B`/`E` pair per poll frame, `i` marks plugin
/// probes; the async correlation phases are carried for viewers that emit
/// them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Phase {
    #[serde(rename = "B")]
    Begin,
    #[serde(rename = "E")]
    End,
    #[serde(rename = "i")]
    Instant,
    #[serde(rename = "b")]
    AsyncBegin,
    #[serde(rename = "n")]
    AsyncStep,
    #[serde(rename = "e")]
    AsyncEnd,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TraceEvent {
    pub phase: Phase,
    pub timestamp_ns: u64,
    pub thread_id: ThreadId,
    pub name: String,
    pub category: String,
    pub args: Option<serde_json::Map<String, serde_json::Value>>,
    pub correlation_id: Option<u64>,
}

impl TraceEvent {
    pub fn new(
        phase: Phase,
        timestamp_ns: u64,
        thread_id: ThreadId,
        name: impl Into<String>,
        category: impl Into<String>,
    ) -> Self {
        TraceEvent {
            phase,
            timestamp_ns,
            thread_id,
            name: name.into(),
            category: category.into(),
            args: None,
            correlation_id: None,
        }
    }

    pub fn with_args(mut self, args: serde_json::Map<String, serde_json::Value>) -> Self {
        if !args.is_empty() {
            self.args = Some(args);
        }
        self
    }
}

#[derive(Serialize)]
struct ChromeEvent<'a> {
    ph: Phase,
    /// Microseconds; the buffer stores nanoseconds.
    ts: f64,
    pid: u32,
    tid: String,
    name: &'a str,
    cat: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    args: Option<&'a serde_json::Map<String, serde_json::Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<u64>,
}

#[derive(Serialize)]
struct ChromeDocument<'a> {
    #[serde(rename = "displayTimeUnit")]
    display_time_unit: &'static str,
    #[serde(rename = "traceEvents")]
    trace_events: Vec<ChromeEvent<'a>>,
}

/// Owned by the sequencer for the lifetime of the debugger session. Events
/// only accumulate; ties in timestamp keep insertion order.
#[derive(Debug, Default)]
pub struct EventBuffer {
    events: Vec<TraceEvent>,
}

impl EventBuffer {
    pub fn emit(&mut self, event: TraceEvent) {
        self.events.push(event);
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TraceEvent> {
        self.events.iter()
    }

    fn chrome_document(&self) -> ChromeDocument<'_> {
        ChromeDocument {
            display_time_unit: "us",
            trace_events: self
                .events
                .iter()
                .map(|event| ChromeEvent {
                    ph: event.phase,
                    ts: event.timestamp_ns as f64 / 1000.0,
                    pid: 1,
                    tid: event.thread_id.to_string(),
                    name: &event.name,
                    cat: &event.category,
                    args: event.args.as_ref(),
                    id: event.correlation_id,
                })
                .collect(),
        }
    }

    pub fn to_chrome_json(&self) -> anyhow::Result<serde_json::Value> {
        serde_json::to_value(self.chrome_document()).context("serializing trace events")
    }

    pub fn write_chrome_trace(&self, path: &Path) -> anyhow::Result<()> {
        let file = File::create(path)
            .with_context(|| format!("creating trace file at {}", path.display()))?;
        serde_json::to_writer_pretty(BufWriter::new(file), &self.chrome_document())
            .with_context(|| format!("writing trace file to {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_convert_to_microseconds() {
        let mut buffer = EventBuffer::default();
        buffer.emit(TraceEvent::new(Phase::Begin, 1_500, 7, "poll", CAT_FUTURE_POLL));
        let json = buffer.to_chrome_json().expect("serializes");
        assert_eq!(json["displayTimeUnit"], "us");
        let event = &json["traceEvents"][0];
        assert_eq!(event["ph"], "B");
        assert_eq!(event["ts"], 1.5);
        assert_eq!(event["pid"], 1);
        assert_eq!(event["tid"], "7");
        assert_eq!(event["cat"], "future_poll");
    }

    #[test]
    fn args_and_id_are_omitted_when_absent() {
        let mut buffer = EventBuffer::default();
        buffer.emit(TraceEvent::new(Phase::Instant, 0, 1, "probe", "plugin_tokio"));
        let json = buffer.to_chrome_json().expect("serializes");
        let event = &json["traceEvents"][0];
        assert!(event.get("args").is_none());
        assert!(event.get("id").is_none());
    }

    #[test]
    fn empty_args_are_dropped_by_with_args() {
        let event = TraceEvent::new(Phase::Instant, 0, 1, "probe", "plugin_tokio")
            .with_args(serde_json::Map::new());
        assert!(event.args.is_none());

        let mut args = serde_json::Map::new();
        args.insert("tokio_evt".to_string(), "poll".into());
        let event = TraceEvent::new(Phase::Instant, 0, 1, "probe", "plugin_tokio").with_args(args);
        assert!(event.args.is_some());
    }

    #[test]
    fn async_phases_serialize_to_single_letters() {
        for (phase, expected) in [
            (Phase::AsyncBegin, "b"),
            (Phase::AsyncStep, "n"),
            (Phase::AsyncEnd, "e"),
        ] {
            assert_eq!(
                serde_json::to_value(phase).expect("serializes"),
                serde_json::Value::String(expected.to_string())
            );
        }
    }
}
