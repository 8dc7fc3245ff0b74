// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Pairs each state-machine type with the mangled symbol of its `poll`
//! implementation, matching against the demangled symbol table.

use crate::tools;
use anyhow::Context;
use std::cell::OnceCell;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const FUTURE_POLL_SUFFIX: &str = " as core::future::future::Future>::poll";
const ASYNC_ENV_MARKERS: [&str; 2] = ["{async_fn_env#", "{async_block_env#"];

#[derive(Debug, Clone)]
pub struct SymbolPair {
    pub mangled: String,
    pub demangled: String,
}

#[derive(Debug, Default)]
pub struct SymbolTable {
    pairs: Vec<SymbolPair>,
}

impl SymbolTable {
    /// Loads and demangles the function symbols of `binary`. A missing
    /// demangler degrades to matching against mangled names; a missing
    /// symbol dumper is fatal.
    pub fn load(binary: &Path) -> anyhow::Result<Self> {
        let raw = tools::dump_symbols(binary)
            .with_context(|| format!("dumping symbol table of {}", binary.display()))?;
        let demangled = match tools::demangle(&raw) {
            Ok(text) => Some(text),
            Err(err) => {
                warn!(%err, "demangler unavailable, matching against mangled names; expect reduced match quality");
                None
            }
        };
        Self::from_listings(&raw, demangled.as_deref())
    }

    /// Builds the table from an already-captured symbol listing and its
    /// demangled twin. The two listings must be line-aligned.
    pub fn from_listings(raw: &str, demangled: Option<&str>) -> anyhow::Result<Self> {
        let raw_lines: Vec<&str> = raw.lines().collect();
        let dem_lines: Vec<&str> = match demangled {
            Some(text) => {
                let lines: Vec<&str> = text.lines().collect();
                anyhow::ensure!(
                    lines.len() == raw_lines.len(),
                    "demangler broke line alignment: {} raw lines vs {} demangled",
                    raw_lines.len(),
                    lines.len()
                );
                lines
            }
            None => raw_lines.clone(),
        };

        let mut pairs = Vec::new();
        for (raw_line, dem_line) in raw_lines.iter().zip(dem_lines.iter()) {
            // Function symbols in the executable code section only.
            if !raw_line.contains(" .text") {
                continue;
            }
            let parts: Vec<&str> = raw_line.split_whitespace().collect();
            if parts.len() < 6 {
                continue;
            }
            let Some(mangled) = parts.last() else {
                continue;
            };
            let Some(column) = raw_line.find(mangled) else {
                continue;
            };
            let demangled = dem_line.get(column..).map(str::trim).unwrap_or("");
            pairs.push(SymbolPair {
                mangled: (*mangled).to_string(),
                demangled: demangled.to_string(),
            });
        }
        debug!(symbols = pairs.len(), "loaded .text symbol table");
        Ok(SymbolTable { pairs })
    }

    /// The mangled `poll` symbol implementing the future trait for
    /// `struct_name`, or `None` when no candidate matches.
    ///
    /// `ends_with` avoids false positives where the state machine appears as
    /// a generic parameter of another future; the marker-bearing branch
    /// handles compiler-generated environment types whose demangled names
    /// are path-suffix-identical to the type name.
    pub fn find_poll_symbol(&self, struct_name: &str) -> Option<&str> {
        let base = base_name(struct_name);
        let has_marker = ASYNC_ENV_MARKERS.iter().any(|m| base.contains(m));

        for pair in &self.pairs {
            if !pair.demangled.contains("::poll") {
                continue;
            }
            let type_prefix = match pair.demangled.split_once(FUTURE_POLL_SUFFIX) {
                Some((prefix, _)) => prefix,
                None => match pair.demangled.split_once("::poll") {
                    Some((prefix, _)) => prefix,
                    None => continue,
                },
            };
            let accepted = if has_marker {
                type_prefix.contains(base)
            } else {
                type_prefix.ends_with(base)
            };
            if accepted {
                return Some(&pair.mangled);
            }
        }
        None
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}

/// Reduces a DWARF type name to its base name: any generic-argument suffix
/// is stripped at the first `<`, then the last `::` path segment is kept.
pub fn base_name(struct_name: &str) -> &str {
    let without_generics = struct_name.split('<').next().unwrap_or(struct_name);
    without_generics
        .rsplit("::")
        .next()
        .unwrap_or(without_generics)
}

/// Session-scoped resolver: the symbol table is loaded lazily on the first
/// query and reused for every following one.
#[derive(Debug)]
pub struct SymbolResolver {
    binary: PathBuf,
    table: OnceCell<anyhow::Result<SymbolTable>>,
}

impl SymbolResolver {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        SymbolResolver {
            binary: binary.into(),
            table: OnceCell::new(),
        }
    }

    pub fn preloaded(table: SymbolTable) -> Self {
        let cell = OnceCell::new();
        let _ = cell.set(Ok(table));
        SymbolResolver {
            binary: PathBuf::new(),
            table: cell,
        }
    }

    /// The mangled poll symbol for `struct_name`, or the empty string when
    /// nothing matches. The first call loads the table; a load failure is
    /// fatal once and then reported as empty matches.
    pub fn poll_symbol_for(&self, struct_name: &str) -> anyhow::Result<String> {
        let table = self
            .table
            .get_or_init(|| SymbolTable::load(&self.binary));
        match table {
            Ok(table) => Ok(table
                .find_poll_symbol(struct_name)
                .unwrap_or_default()
                .to_string()),
            Err(err) => anyhow::bail!("symbol table unavailable: {err:#}"),
        }
    }
}
