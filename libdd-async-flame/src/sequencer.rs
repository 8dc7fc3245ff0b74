// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The trace sequencer: installs breakpoints for every poll symbol in the
//! future map, drives the two-stage entry protocol, and accumulates the
//! invocation events the flame viewer renders.
//!
//! Native breakpoints set by symbol resolve to the function's first
//! instruction, before the prologue has established locals, so argument
//! reads there are unreliable. On the native hit the sequencer plants a
//! one-shot breakpoint at the same PC and continues; the one-shot re-fires
//! after the host's prologue-skipping heuristics have resolved scope, and
//! only then do the tracers run. The one-shot's command list continues the
//! inferior, so the user never interacts with either stop.

use crate::clock::SessionClock;
use crate::config::SequencerConfig;
use crate::events::{
    EventBuffer, Phase, TraceEvent, CAT_FUTURE_POLL, CAT_FUTURE_POLL_EXIT, CAT_FUTURE_POLL_UNWIND,
};
use crate::host::{BreakpointId, DebugHost, ThreadId};
use crate::plugins::{Invocation, PluginRegistry, RuntimePlugin, TracedData};
use crate::tracers::{TracerDatum, TracerSpec};
use indexmap::IndexMap;
use libdd_future_map::FutureMap;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{debug, error, info, warn};

pub const CMD_START: &str = "start-async-debug";
pub const CMD_DUMP_DATA: &str = "dump-async-data";
pub const CMD_DUMP_FLAME: &str = "dump_async_flame";
pub const DEFAULT_TRACE_FILE: &str = "traceEvents.json";

/// Per-invocation lifecycle. `Idle` is the absence of a frame record;
/// `Completed` frames are dropped from the books.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollFrameState {
    EntryFired,
    TracersRan,
    ExitPending,
    Completed,
}

/// What the host observed when it stopped the inferior on our behalf.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopEvent {
    /// A symbol or one-shot address breakpoint fired.
    Breakpoint(BreakpointId),
    /// A finish breakpoint's frame returned normally.
    FrameReturn(BreakpointId),
    /// A finish breakpoint's frame was unwound without returning.
    FrameUnwound(BreakpointId),
}

#[derive(Debug, Clone)]
struct EntrySite {
    symbol: String,
    /// Present for future polls; such sites emit paired B/E events.
    display_name: Option<String>,
    /// True when the plugin listed the symbol in its instrument points;
    /// such sites record invocations for `dump-async-data`.
    instrumented: bool,
    entry_tracers: Vec<TracerSpec>,
    exit_tracers: Vec<TracerSpec>,
}

#[derive(Debug)]
struct PendingFrame {
    site_index: usize,
    state: PollFrameState,
}

#[derive(Debug)]
struct OpenFrame {
    site: EntrySite,
    thread_id: ThreadId,
    /// Where in the traced-data store the exit tracers should land.
    invocation: Option<(String, usize)>,
    state: PollFrameState,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InstallSummary {
    pub poll_breakpoints: usize,
    pub instrument_breakpoints: usize,
    pub probe_breakpoints: usize,
    pub failures: usize,
}

/// Owned sequencer object; the debugger host embeds one per session and
/// forwards every stop to [`Sequencer::handle_stop`].
pub struct Sequencer {
    config: SequencerConfig,
    plugin: Box<dyn RuntimePlugin>,
    future_map: FutureMap,
    clock: SessionClock,
    events: EventBuffer,
    traced: TracedData,
    sites: Vec<EntrySite>,
    entry_breakpoints: HashMap<BreakpointId, usize>,
    probe_breakpoints: HashMap<BreakpointId, String>,
    pending: HashMap<BreakpointId, PendingFrame>,
    open: HashMap<BreakpointId, OpenFrame>,
    summary: Option<InstallSummary>,
}

impl std::fmt::Debug for Sequencer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Sequencer")
            .field("plugin", &self.plugin.name())
            .field("sites", &self.sites.len())
            .field("pending", &self.pending.len())
            .field("open", &self.open.len())
            .finish()
    }
}

impl Sequencer {
    /// Fails when the future map is missing (with the command that builds
    /// it) or when the configured plugin is unknown.
    pub fn new(config: SequencerConfig, registry: &PluginRegistry) -> anyhow::Result<Self> {
        let map_path = config.map_path();
        if !map_path.exists() {
            anyhow::bail!(
                "future map not found at {path}; generate it first:\n  \
                 future-map-export <binary> {path}",
                path = map_path.display()
            );
        }
        let future_map = libdd_future_map::load_future_map(map_path)?;
        let plugin = registry.load(config.plugin())?;
        Ok(Sequencer {
            config,
            plugin,
            future_map,
            clock: SessionClock::default(),
            events: EventBuffer::default(),
            traced: TracedData::new(),
            sites: Vec::new(),
            entry_breakpoints: HashMap::new(),
            probe_breakpoints: HashMap::new(),
            pending: HashMap::new(),
            open: HashMap::new(),
            summary: None,
        })
    }

    /// Installs every breakpoint: one poll entry per future-map entry with a
    /// nonempty symbol, the plugin's instrument points, and its extra
    /// probes. Per-symbol failures are logged and skipped.
    pub fn install(&mut self, host: &mut dyn DebugHost) -> InstallSummary {
        if let Some(summary) = self.summary {
            warn!("breakpoints already installed");
            return summary;
        }

        let mut points: IndexMap<String, (Vec<TracerSpec>, Vec<TracerSpec>)> = self
            .plugin
            .instrument_points()
            .into_iter()
            .map(|p| (p.symbol, (p.entry_tracers, p.exit_tracers)))
            .collect();

        let mut summary = InstallSummary::default();
        let mut sites = Vec::new();
        for entry in self.future_map.values() {
            if entry.poll_symbol.is_empty() {
                continue;
            }
            // A plugin may instrument a mapped poll symbol; the site then
            // both emits B/E events and records tracer data.
            let absorbed = points.shift_remove(&entry.poll_symbol);
            let instrumented = absorbed.is_some();
            let (entry_tracers, exit_tracers) = absorbed.unwrap_or_default();
            sites.push(EntrySite {
                symbol: entry.poll_symbol.clone(),
                display_name: Some(entry.name.clone()),
                instrumented,
                entry_tracers,
                exit_tracers,
            });
        }
        for (symbol, (entry_tracers, exit_tracers)) in points {
            sites.push(EntrySite {
                symbol,
                display_name: None,
                instrumented: true,
                entry_tracers,
                exit_tracers,
            });
        }

        for site in sites {
            match host.breakpoint_at_symbol(&site.symbol) {
                Ok(bp) => {
                    debug!(symbol = %site.symbol, "entry breakpoint set");
                    if site.display_name.is_some() {
                        summary.poll_breakpoints += 1;
                    } else {
                        summary.instrument_breakpoints += 1;
                    }
                    self.sites.push(site);
                    self.entry_breakpoints.insert(bp, self.sites.len() - 1);
                }
                Err(err) => {
                    warn!(symbol = %site.symbol, %err, "failed to set entry breakpoint");
                    summary.failures += 1;
                }
            }
        }

        for symbol in self.plugin.extra_breakpoints() {
            match host.breakpoint_at_symbol(&symbol) {
                Ok(bp) => {
                    summary.probe_breakpoints += 1;
                    self.probe_breakpoints.insert(bp, symbol);
                }
                Err(err) => {
                    warn!(%symbol, %err, "failed to set probe breakpoint");
                    summary.failures += 1;
                }
            }
        }

        info!(
            polls = summary.poll_breakpoints,
            instrument = summary.instrument_breakpoints,
            probes = summary.probe_breakpoints,
            failures = summary.failures,
            plugin = self.plugin.name(),
            "instrumentation installed"
        );
        self.summary = Some(summary);
        summary
    }

    /// Entry point for every stop the host reports. Never propagates: a
    /// failing handler is logged and the inferior continues.
    pub fn handle_stop(&mut self, host: &mut dyn DebugHost, stop: StopEvent) {
        if let Err(err) = self.dispatch_stop(host, stop) {
            error!(%err, "stop handler failed; continuing");
        }
    }

    fn dispatch_stop(&mut self, host: &mut dyn DebugHost, stop: StopEvent) -> anyhow::Result<()> {
        match stop {
            StopEvent::Breakpoint(bp) => {
                if let Some(&site_index) = self.entry_breakpoints.get(&bp) {
                    self.on_entry(host, site_index)
                } else if let Some(pending) = self.pending.remove(&bp) {
                    self.on_post_prologue(host, pending);
                    Ok(())
                } else if let Some(symbol) = self.probe_breakpoints.get(&bp).cloned() {
                    self.on_probe(host, &symbol);
                    Ok(())
                } else {
                    warn!(?bp, "stop for unknown breakpoint");
                    Ok(())
                }
            }
            StopEvent::FrameReturn(bp) => {
                self.on_frame_return(host, bp);
                Ok(())
            }
            StopEvent::FrameUnwound(bp) => {
                self.on_frame_unwound(host, bp);
                Ok(())
            }
        }
    }

    /// Stage one: the native breakpoint fired on the raw function entry.
    /// Plant the one-shot at the same PC and continue immediately.
    fn on_entry(&mut self, host: &mut dyn DebugHost, site_index: usize) -> anyhow::Result<()> {
        let pc = host.current_pc()?;
        let temp = host.one_shot_at_address(pc)?;
        self.pending.insert(
            temp,
            PendingFrame {
                site_index,
                state: PollFrameState::EntryFired,
            },
        );
        Ok(())
    }

    /// Stage two: the one-shot re-fired with scope resolved. Run the entry
    /// tracers, emit the begin event, and arm the frame's finish breakpoint.
    fn on_post_prologue(&mut self, host: &mut dyn DebugHost, mut pending: PendingFrame) {
        debug_assert_eq!(pending.state, PollFrameState::EntryFired);
        let site = self.sites[pending.site_index].clone();
        let thread_id = host.selected_thread();
        let timestamp_ns = self.clock.now_ns(host);

        let entry_data: Vec<(String, TracerDatum)> = site
            .entry_tracers
            .iter()
            .map(|spec| (spec.label(), spec.run(host)))
            .collect();
        pending.state = PollFrameState::TracersRan;

        let mut invocation = None;
        if site.instrumented {
            let list = self.traced.entry(site.symbol.clone()).or_default();
            list.push(Invocation {
                thread_id,
                entry_tracers: entry_data,
                exit_tracers: Vec::new(),
            });
            invocation = Some((site.symbol.clone(), list.len() - 1));
        }

        if let Some(name) = &site.display_name {
            self.events.emit(TraceEvent::new(
                Phase::Begin,
                timestamp_ns,
                thread_id,
                name.clone(),
                CAT_FUTURE_POLL,
            ));
        }

        // Future polls always pair their begin with an end; instrument-only
        // sites need the frame return only for their exit tracers.
        let needs_finish = site.display_name.is_some() || !site.exit_tracers.is_empty();
        if !needs_finish {
            return;
        }
        match host
            .newest_frame()
            .and_then(|frame| host.finish_breakpoint(frame))
        {
            Ok(finish) => {
                self.open.insert(
                    finish,
                    OpenFrame {
                        site,
                        thread_id,
                        invocation,
                        state: PollFrameState::ExitPending,
                    },
                );
            }
            Err(err) => {
                warn!(symbol = %site.symbol, %err, "failed to arm finish breakpoint");
            }
        }
    }

    fn on_frame_return(&mut self, host: &mut dyn DebugHost, bp: BreakpointId) {
        let Some(mut frame) = self.open.remove(&bp) else {
            warn!(?bp, "frame return for unknown finish breakpoint");
            return;
        };
        debug_assert_eq!(frame.state, PollFrameState::ExitPending);
        let exit_data: Vec<(String, TracerDatum)> = frame
            .site
            .exit_tracers
            .iter()
            .map(|spec| (spec.label(), spec.run(host)))
            .collect();
        self.store_exit_data(&frame, exit_data);

        if let Some(name) = &frame.site.display_name {
            let timestamp_ns = self.clock.now_ns(host);
            self.events.emit(TraceEvent::new(
                Phase::End,
                timestamp_ns,
                frame.thread_id,
                name.clone(),
                CAT_FUTURE_POLL,
            ));
        }
        frame.state = PollFrameState::Completed;
    }

    /// The frame went out of scope without returning, e.g. through an
    /// unwind. The begin event still gets its paired end, annotated.
    fn on_frame_unwound(&mut self, host: &mut dyn DebugHost, bp: BreakpointId) {
        let Some(mut frame) = self.open.remove(&bp) else {
            warn!(?bp, "unwind for unknown finish breakpoint");
            return;
        };
        debug_assert_eq!(frame.state, PollFrameState::ExitPending);
        self.store_exit_data(
            &frame,
            vec![(
                "error".to_string(),
                TracerDatum::Text("out_of_scope (e.g. exception)".to_string()),
            )],
        );

        if let Some(name) = &frame.site.display_name {
            let timestamp_ns = self.clock.now_ns(host);
            self.events.emit(TraceEvent::new(
                Phase::End,
                timestamp_ns,
                frame.thread_id,
                format!("{name} (unwound)"),
                CAT_FUTURE_POLL_UNWIND,
            ));
        }
        frame.state = PollFrameState::Completed;
    }

    fn store_exit_data(&mut self, frame: &OpenFrame, exit_data: Vec<(String, TracerDatum)>) {
        let Some((symbol, index)) = &frame.invocation else {
            return;
        };
        if let Some(invocation) = self
            .traced
            .get_mut(symbol)
            .and_then(|list| list.get_mut(*index))
        {
            invocation.exit_tracers = exit_data;
        }
    }

    fn on_probe(&mut self, host: &mut dyn DebugHost, symbol: &str) {
        let thread_id = host.selected_thread();
        let timestamp_ns = self.clock.now_ns(host);
        let args = self.plugin.on_breakpoint(symbol, host);
        self.events.emit(
            TraceEvent::new(
                Phase::Instant,
                timestamp_ns,
                thread_id,
                symbol,
                format!("plugin_{}", self.plugin.name()),
            )
            .with_args(args),
        );
    }

    /// Writes the chrome trace. Begin events still open when the inferior is
    /// gone are closed with `(prog_exit)` ends so the stream stays paired.
    pub fn dump_flame(
        &mut self,
        host: &mut dyn DebugHost,
        file_name: Option<&str>,
    ) -> anyhow::Result<PathBuf> {
        if !host.inferior_alive() && !self.open.is_empty() {
            let timestamp_ns = self.clock.now_ns(host);
            for (_, frame) in self.open.drain() {
                if let Some(name) = &frame.site.display_name {
                    self.events.emit(TraceEvent::new(
                        Phase::End,
                        timestamp_ns,
                        frame.thread_id,
                        format!("{name} (prog_exit)"),
                        CAT_FUTURE_POLL_EXIT,
                    ));
                }
            }
        }

        std::fs::create_dir_all(self.config.output_dir())?;
        let path = self
            .config
            .output_dir()
            .join(file_name.unwrap_or(DEFAULT_TRACE_FILE));
        self.events.write_chrome_trace(&path)?;
        info!(events = self.events.len(), path = %path.display(), "trace written");
        Ok(path)
    }

    /// Hands everything the tracers collected to the plugin's report.
    pub fn dump_data(&self) -> String {
        self.plugin.process_data(&self.traced)
    }

    pub fn events(&self) -> &EventBuffer {
        &self.events
    }

    pub fn traced_data(&self) -> &TracedData {
        &self.traced
    }

    pub fn plugin_name(&self) -> &str {
        self.plugin.name()
    }

    /// Frames with an armed finish breakpoint that has not fired yet.
    pub fn open_frames(&self) -> usize {
        self.open.len()
    }

    /// Shell entry point for the debugger's user commands.
    pub fn dispatch_command(
        &mut self,
        host: &mut dyn DebugHost,
        line: &str,
    ) -> anyhow::Result<String> {
        let mut parts = line.split_whitespace();
        match parts.next() {
            Some(CMD_START) => {
                let summary = self.install(host);
                Ok(format!(
                    "[async-flame] Breakpoints set: {} future polls, {} instrument points, \
                     {} runtime events from plugin '{}'.",
                    summary.poll_breakpoints,
                    summary.instrument_breakpoints,
                    summary.probe_breakpoints,
                    self.plugin.name()
                ))
            }
            Some(CMD_DUMP_DATA) => Ok(self.dump_data()),
            Some(CMD_DUMP_FLAME) => {
                let path = self.dump_flame(host, parts.next())?;
                Ok(format!(
                    "[async-flame] {} written (events={})",
                    path.display(),
                    self.events.len()
                ))
            }
            Some(other) => anyhow::bail!("unknown command: {other}"),
            None => anyhow::bail!("empty command"),
        }
    }
}
