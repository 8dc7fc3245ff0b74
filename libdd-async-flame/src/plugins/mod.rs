// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Runtime plugins adapt the sequencer to a specific async runtime: which
//! internals to instrument, which extra probes feed the flame graph, and
//! how to render the collected data.

mod tokio;

pub use tokio::TokioPlugin;

use crate::host::{DebugHost, ThreadId};
use crate::tracers::{TracerDatum, TracerSpec};
use indexmap::IndexMap;
use tracing::debug;

/// Selects the plugin for the flame-graph surface.
pub const PROFILER_PLUGIN_ENV: &str = "PROFILER_PLUGIN";
/// Selects the plugin for the instrumentation surface.
pub const DEBUGGER_PLUGIN_ENV: &str = "DEBUGGER_PLUGIN";
pub const DEFAULT_PLUGIN: &str = "tokio";

/// One symbol to instrument, with the tracers to run at entry and exit.
#[derive(Debug, Clone)]
pub struct InstrumentPoint {
    pub symbol: String,
    pub entry_tracers: Vec<TracerSpec>,
    pub exit_tracers: Vec<TracerSpec>,
}

/// One recorded invocation of an instrumented symbol, keyed by tracer label.
#[derive(Debug, Clone, Default)]
pub struct Invocation {
    pub thread_id: ThreadId,
    pub entry_tracers: Vec<(String, TracerDatum)>,
    pub exit_tracers: Vec<(String, TracerDatum)>,
}

/// Everything the tracers collected, per instrumented symbol, in
/// installation order.
pub type TracedData = IndexMap<String, Vec<Invocation>>;

pub trait RuntimePlugin {
    fn name(&self) -> &'static str;

    /// Symbols to trap with entry/exit tracers.
    fn instrument_points(&self) -> Vec<InstrumentPoint>;

    /// Additional probe symbols that emit instant events into the flame
    /// trace.
    fn extra_breakpoints(&self) -> Vec<String>;

    /// Called on each extra probe hit; the returned map lands in the
    /// event's `args`.
    fn on_breakpoint(
        &self,
        symbol: &str,
        host: &mut dyn DebugHost,
    ) -> serde_json::Map<String, serde_json::Value>;

    /// Renders a report over everything the tracers collected.
    fn process_data(&self, data: &TracedData) -> String;
}

impl std::fmt::Debug for dyn RuntimePlugin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "RuntimePlugin({})", self.name())
    }
}

type PluginFactory = Box<dyn Fn() -> Box<dyn RuntimePlugin>>;

/// Registry mapping a short identifier to a plugin factory. The environment
/// selects the key; an unknown key aborts the sequencer.
pub struct PluginRegistry {
    factories: IndexMap<String, PluginFactory>,
}

impl PluginRegistry {
    pub fn empty() -> Self {
        PluginRegistry {
            factories: IndexMap::new(),
        }
    }

    /// Registry with the built-in plugins.
    pub fn builtin() -> Self {
        let mut registry = Self::empty();
        registry.register(DEFAULT_PLUGIN, || Box::new(TokioPlugin));
        registry
    }

    pub fn register(
        &mut self,
        name: impl Into<String>,
        factory: impl Fn() -> Box<dyn RuntimePlugin> + 'static,
    ) {
        self.factories.insert(name.into(), Box::new(factory));
    }

    pub fn load(&self, name: &str) -> anyhow::Result<Box<dyn RuntimePlugin>> {
        let factory = self.factories.get(name).ok_or_else(|| {
            anyhow::anyhow!(
                "unknown runtime plugin '{name}' (known: {})",
                self.factories
                    .keys()
                    .map(String::as_str)
                    .collect::<Vec<_>>()
                    .join(", ")
            )
        })?;
        let plugin = factory();
        debug!(plugin = plugin.name(), "loaded runtime plugin");
        Ok(plugin)
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Plugin name from the environment, with the `tokio` default.
pub fn plugin_name_from_env(var: &str) -> String {
    std::env::var(var).unwrap_or_else(|_| DEFAULT_PLUGIN.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_registry_loads_tokio() {
        let registry = PluginRegistry::builtin();
        let plugin = registry.load("tokio").expect("tokio is built in");
        assert_eq!(plugin.name(), "tokio");
    }

    #[test]
    fn unknown_plugin_is_an_error() {
        let registry = PluginRegistry::builtin();
        let err = registry.load("fantasy").expect_err("must fail");
        assert!(err.to_string().contains("fantasy"));
        assert!(err.to_string().contains("tokio"));
    }

    #[test]
    fn custom_plugins_can_be_registered() {
        struct Quiet;
        impl RuntimePlugin for Quiet {
            fn name(&self) -> &'static str {
                "quiet"
            }
            fn instrument_points(&self) -> Vec<InstrumentPoint> {
                vec![]
            }
            fn extra_breakpoints(&self) -> Vec<String> {
                vec![]
            }
            fn on_breakpoint(
                &self,
                _symbol: &str,
                _host: &mut dyn DebugHost,
            ) -> serde_json::Map<String, serde_json::Value> {
                serde_json::Map::new()
            }
            fn process_data(&self, _data: &TracedData) -> String {
                String::new()
            }
        }

        let mut registry = PluginRegistry::builtin();
        registry.register("quiet", || Box::new(Quiet));
        assert_eq!(registry.load("quiet").expect("registered").name(), "quiet");
    }
}
