// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Debugger-hosted trace sequencer for async runtimes.
//!
//! Consumes the future map produced by `libdd-future-map`, traps every poll
//! symbol inside a debugger host, and serializes the resulting begin/end
//! invocation events as a chrome-trace document a flame-graph viewer can
//! render. Runtime-specific probe points come from a pluggable adapter
//! selected through the environment.

pub mod clock;
pub mod config;
pub mod events;
pub mod host;
pub mod plugins;
pub mod sequencer;
pub mod tracers;

pub use clock::{ClockSource, SessionClock};
pub use config::SequencerConfig;
pub use events::{EventBuffer, Phase, TraceEvent};
pub use host::{BreakpointId, ClockId, DebugHost, FrameId, FrameInfo, HostValue, ThreadId};
pub use plugins::{InstrumentPoint, PluginRegistry, RuntimePlugin, TokioPlugin, TracedData};
pub use sequencer::{InstallSummary, PollFrameState, Sequencer, StopEvent};
pub use tracers::{TracerDatum, TracerSpec};
