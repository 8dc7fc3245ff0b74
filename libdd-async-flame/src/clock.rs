// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::host::{ClockId, DebugHost};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockSource {
    InferiorMonotonicRaw,
    InferiorMonotonic,
    HostWall,
}

/// Session-global timestamp source. The first successful `clock_gettime`
/// call in the inferior pins the source for the rest of the session;
/// until one succeeds, host wall time fills in.
#[derive(Debug, Default)]
pub struct SessionClock {
    source: Option<ClockSource>,
}

impl SessionClock {
    pub fn source(&self) -> Option<ClockSource> {
        self.source
    }

    pub fn now_ns(&mut self, host: &mut dyn DebugHost) -> u64 {
        match self.source {
            Some(ClockSource::InferiorMonotonicRaw) => host
                .call_clock_gettime(ClockId::MonotonicRaw)
                .unwrap_or_else(|_| host_wall_ns()),
            Some(ClockSource::InferiorMonotonic) => host
                .call_clock_gettime(ClockId::Monotonic)
                .unwrap_or_else(|_| host_wall_ns()),
            Some(ClockSource::HostWall) => host_wall_ns(),
            None => self.pin(host),
        }
    }

    fn pin(&mut self, host: &mut dyn DebugHost) -> u64 {
        if let Ok(ns) = host.call_clock_gettime(ClockId::MonotonicRaw) {
            debug!("timestamp source pinned to inferior CLOCK_MONOTONIC_RAW");
            self.source = Some(ClockSource::InferiorMonotonicRaw);
            return ns;
        }
        if let Ok(ns) = host.call_clock_gettime(ClockId::Monotonic) {
            debug!("timestamp source pinned to inferior CLOCK_MONOTONIC");
            self.source = Some(ClockSource::InferiorMonotonic);
            return ns;
        }
        host_wall_ns()
    }
}

fn host_wall_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or(0)
}
