// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Abstraction over the debugger host the sequencer runs inside.
//!
//! The sequencer never drives the inferior itself: the host owns the
//! stop/continue protocol and calls back into the sequencer while the
//! inferior is stopped. All callbacks therefore run serially.

/// Identity of the inferior thread that triggered a stop.
pub type ThreadId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BreakpointId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FrameId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockId {
    MonotonicRaw,
    Monotonic,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FrameInfo {
    pub pc: u64,
    /// Function symbol, when the host can resolve one.
    pub name: Option<String>,
}

/// Result of parse-and-evaluate on a symbolic expression. A value that only
/// lives in a register has no address; reading it requires the evaluating
/// path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostValue {
    pub address: Option<u64>,
    pub byte_size: u64,
}

pub trait DebugHost {
    /// Installs a breakpoint at the first instruction of `symbol`.
    fn breakpoint_at_symbol(&mut self, symbol: &str) -> anyhow::Result<BreakpointId>;

    /// Installs a one-shot breakpoint at an exact address. The host attaches
    /// a command list that re-enters the sequencer on the hit and then
    /// continues the inferior, so the user never sees the stop.
    fn one_shot_at_address(&mut self, pc: u64) -> anyhow::Result<BreakpointId>;

    /// Installs a finish breakpoint on `frame`. The host reports the frame's
    /// return as a [`StopEvent::FrameReturn`] and an unwind as
    /// [`StopEvent::FrameUnwound`].
    ///
    /// [`StopEvent::FrameReturn`]: crate::sequencer::StopEvent::FrameReturn
    /// [`StopEvent::FrameUnwound`]: crate::sequencer::StopEvent::FrameUnwound
    fn finish_breakpoint(&mut self, frame: FrameId) -> anyhow::Result<BreakpointId>;

    fn selected_thread(&self) -> ThreadId;

    fn current_pc(&self) -> anyhow::Result<u64>;

    fn newest_frame(&self) -> anyhow::Result<FrameId>;

    /// The next frame toward the outermost caller, or `None` at the oldest.
    fn older_frame(&self, frame: FrameId) -> anyhow::Result<Option<FrameId>>;

    fn frame_info(&self, frame: FrameId) -> anyhow::Result<FrameInfo>;

    /// Parse-and-evaluate without reading the value.
    fn evaluate(&self, expression: &str) -> anyhow::Result<HostValue>;

    /// Evaluating read; works for register-resident values but may disturb
    /// the inferior more than a plain memory read.
    fn evaluate_int(&self, expression: &str) -> anyhow::Result<i64>;

    fn read_memory(&self, address: u64, len: u64) -> anyhow::Result<Vec<u8>>;

    /// Calls `clock_gettime` inside the inferior, returning nanoseconds.
    fn call_clock_gettime(&mut self, clock: ClockId) -> anyhow::Result<u64>;

    fn inferior_alive(&self) -> bool;
}
