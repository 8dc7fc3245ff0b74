// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Instrumentation for the Tokio runtime. Symbol names follow the Tokio 1.x
//! default scheduler internals.

use super::{InstrumentPoint, RuntimePlugin, TracedData};
use crate::host::DebugHost;
use crate::tracers::TracerSpec;
use std::fmt::Write;

const RAW_TASK_NEW: &str = "tokio::runtime::task::raw::RawTask::new";
const RAW_TASK_POLL: &str = "tokio::runtime::task::raw::RawTask::poll";
const RAW_TASK_SHUTDOWN: &str = "tokio::runtime::task::raw::RawTask::shutdown";
const RAW_TASK_DEALLOC: &str = "tokio::runtime::task::raw::RawTask::dealloc";

/// Raw u64 inside the `tokio::task::Id` newtype.
fn task_id_tracer() -> TracerSpec {
    TracerSpec::local("id.__0")
}

/// Raw pointer inside the `RawTask` struct; identifies the task across its
/// lifecycle events.
fn raw_task_self_tracer() -> TracerSpec {
    TracerSpec::local("self.ptr.pointer")
}

pub struct TokioPlugin;

impl RuntimePlugin for TokioPlugin {
    fn name(&self) -> &'static str {
        "tokio"
    }

    fn instrument_points(&self) -> Vec<InstrumentPoint> {
        vec![
            InstrumentPoint {
                symbol: RAW_TASK_NEW.to_string(),
                // The backtrace finds the spawn location of the new task.
                entry_tracers: vec![task_id_tracer(), TracerSpec::Backtrace],
                exit_tracers: vec![],
            },
            InstrumentPoint {
                symbol: RAW_TASK_POLL.to_string(),
                entry_tracers: vec![raw_task_self_tracer()],
                exit_tracers: vec![],
            },
            InstrumentPoint {
                symbol: RAW_TASK_SHUTDOWN.to_string(),
                entry_tracers: vec![raw_task_self_tracer()],
                exit_tracers: vec![],
            },
            InstrumentPoint {
                symbol: RAW_TASK_DEALLOC.to_string(),
                entry_tracers: vec![raw_task_self_tracer()],
                exit_tracers: vec![],
            },
        ]
    }

    fn extra_breakpoints(&self) -> Vec<String> {
        vec![
            "tokio::runtime::task::raw::poll".to_string(),
            "tokio::runtime::task::raw::schedule".to_string(),
        ]
    }

    fn on_breakpoint(
        &self,
        symbol: &str,
        _host: &mut dyn DebugHost,
    ) -> serde_json::Map<String, serde_json::Value> {
        let mut args = serde_json::Map::new();
        args.insert("tokio_evt".to_string(), symbol.into());
        args
    }

    fn process_data(&self, data: &TracedData) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "\n[async-flame] ----- Tokio Runtime Data Report -----");
        for (symbol, invocations) in data {
            let _ = writeln!(out, "\n  Symbol: {symbol} ({} calls)", invocations.len());
            for (n, invocation) in invocations.iter().enumerate() {
                let _ = writeln!(
                    out,
                    "    Invocation {} (Thread {}):",
                    n + 1,
                    invocation.thread_id
                );
                if !invocation.entry_tracers.is_empty() {
                    let _ = writeln!(out, "      Entry Traces:");
                    for (label, datum) in &invocation.entry_tracers {
                        let rendered: String = datum.to_string().chars().take(200).collect();
                        let _ = writeln!(out, "        - {label}: {rendered}");
                    }
                }
                if !invocation.exit_tracers.is_empty() {
                    let _ = writeln!(out, "      Exit Traces:");
                    for (label, datum) in &invocation.exit_tracers {
                        let rendered: String = datum.to_string().chars().take(200).collect();
                        let _ = writeln!(out, "        - {label}: {rendered}");
                    }
                }
            }
        }
        let _ = writeln!(out, "\n[async-flame] -------------------------------------\n");
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugins::Invocation;
    use crate::tracers::TracerDatum;

    #[test]
    fn instruments_the_task_lifecycle() {
        let points = TokioPlugin.instrument_points();
        let symbols: Vec<&str> = points.iter().map(|p| p.symbol.as_str()).collect();
        assert_eq!(
            symbols,
            vec![RAW_TASK_NEW, RAW_TASK_POLL, RAW_TASK_SHUTDOWN, RAW_TASK_DEALLOC]
        );
        assert_eq!(points[0].entry_tracers.len(), 2);
        assert!(points.iter().all(|p| p.exit_tracers.is_empty()));
    }

    #[test]
    fn report_includes_symbols_and_threads() {
        let mut data = TracedData::new();
        data.insert(
            RAW_TASK_POLL.to_string(),
            vec![Invocation {
                thread_id: 7,
                entry_tracers: vec![(
                    "VariableTracer(self.ptr.pointer)".to_string(),
                    TracerDatum::Word(0xdead_beef),
                )],
                exit_tracers: vec![],
            }],
        );
        let report = TokioPlugin.process_data(&data);
        assert!(report.contains("Tokio Runtime Data Report"));
        assert!(report.contains("Symbol: tokio::runtime::task::raw::RawTask::poll (1 calls)"));
        assert!(report.contains("Invocation 1 (Thread 7):"));
        assert!(report.contains("VariableTracer(self.ptr.pointer)"));
    }
}
