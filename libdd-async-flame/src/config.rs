// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::plugins::{plugin_name_from_env, DEBUGGER_PLUGIN_ENV, PROFILER_PLUGIN_ENV};
use std::path::{Path, PathBuf};

pub const DEFAULT_RESULTS_DIR: &str = "results";

/// Session configuration for the sequencer. The runtime plugin is picked
/// from the environment at construction and fixed for the session.
#[derive(Debug, Clone, PartialEq)]
pub struct SequencerConfig {
    map_path: PathBuf,
    output_dir: PathBuf,
    plugin: String,
}

impl SequencerConfig {
    /// Configuration for the flame-graph surface; the plugin comes from
    /// `PROFILER_PLUGIN`, defaulting to `tokio`.
    pub fn new(map_path: impl Into<PathBuf>) -> Self {
        SequencerConfig {
            map_path: map_path.into(),
            output_dir: PathBuf::from(DEFAULT_RESULTS_DIR),
            plugin: plugin_name_from_env(PROFILER_PLUGIN_ENV),
        }
    }

    /// Configuration for the instrumentation surface; the plugin comes from
    /// `DEBUGGER_PLUGIN` instead.
    pub fn for_instrumentation(map_path: impl Into<PathBuf>) -> Self {
        Self::new(map_path).with_plugin(plugin_name_from_env(DEBUGGER_PLUGIN_ENV))
    }

    pub fn with_output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = dir.into();
        self
    }

    pub fn with_plugin(mut self, plugin: impl Into<String>) -> Self {
        self.plugin = plugin.into();
        self
    }

    pub fn map_path(&self) -> &Path {
        &self.map_path
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    pub fn plugin(&self) -> &str {
        &self.plugin
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builders_override_defaults() {
        let config = SequencerConfig::new("results/future_map.json")
            .with_output_dir("/tmp/traces")
            .with_plugin("quiet");
        assert_eq!(config.map_path(), Path::new("results/future_map.json"));
        assert_eq!(config.output_dir(), Path::new("/tmp/traces"));
        assert_eq!(config.plugin(), "quiet");
    }
}
