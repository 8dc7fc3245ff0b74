// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Persists the artifacts of the offline pipeline: the future map consumed
//! by the trace sequencer and the analysis document consumed by viewers.

use crate::symbols::SymbolResolver;
use crate::type_graph::{MemberRecord, SourceLocation, TypeIndex, TypeRecord};
use anyhow::Context;
use indexmap::IndexMap;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use tracing::debug;

/// One surviving state machine, keyed in the map by `0x{type_id}` or, when
/// the DIE had no usable offset, by the type name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct FutureMapEntry {
    pub name: String,
    /// Mangled symbol of the future's `poll` implementation; empty when no
    /// symbol matched.
    pub poll_symbol: String,
}

pub type FutureMap = IndexMap<String, FutureMapEntry>;

pub fn future_map_key(record: &TypeRecord) -> String {
    match &record.type_id {
        Some(id) => format!("0x{id}"),
        None => record.name.clone(),
    }
}

/// Joins the type index with the symbol table. Entries whose symbol lookup
/// finds nothing keep an empty `poll_symbol` so they stay visible for
/// introspection.
pub fn build_future_map(index: &TypeIndex, resolver: &SymbolResolver) -> anyhow::Result<FutureMap> {
    let mut map = FutureMap::new();
    for record in index.state_machines() {
        let poll_symbol = resolver.poll_symbol_for(&record.name)?;
        if poll_symbol.is_empty() {
            debug!(name = %record.name, "no poll symbol matched");
        }
        map.insert(
            future_map_key(record),
            FutureMapEntry {
                name: record.name.clone(),
                poll_symbol,
            },
        );
    }
    Ok(map)
}

pub fn write_future_map(path: &Path, map: &FutureMap) -> anyhow::Result<()> {
    let file = File::create(path)
        .with_context(|| format!("creating future map at {}", path.display()))?;
    serde_json::to_writer_pretty(BufWriter::new(file), map)
        .with_context(|| format!("writing future map to {}", path.display()))
}

pub fn load_future_map(path: &Path) -> anyhow::Result<FutureMap> {
    let file = File::open(path)
        .with_context(|| format!("opening future map at {}", path.display()))?;
    serde_json::from_reader(std::io::BufReader::new(file))
        .with_context(|| format!("parsing future map at {}", path.display()))
}

/// Whole pipeline: dump debug info, build the type graph, pair poll symbols
/// and persist the map. Returns the number of exported futures.
pub fn export_future_map(binary: &Path, out: &Path) -> anyhow::Result<usize> {
    let dump = crate::tools::dump_dwarf(binary)
        .with_context(|| format!("dumping debug info of {}", binary.display()))?;
    let index = crate::type_graph::build_index(&dump)?;
    let resolver = SymbolResolver::new(binary);
    let map = build_future_map(&index, &resolver)?;
    write_future_map(out, &map)?;
    Ok(map.len())
}

/// JSON rendering of a [`TypeRecord`], keeping the artifact's historical
/// field names.
#[derive(Debug, Serialize)]
pub struct TypeRecordRepr<'a> {
    pub name: &'a str,
    pub size: u64,
    pub alignment: u64,
    pub is_async_fn: bool,
    pub state_machine: bool,
    pub locations: Vec<SourceLocation>,
    pub members: &'a [MemberRecord],
    pub type_id: Option<&'a str>,
}

impl<'a> From<&'a TypeRecord> for TypeRecordRepr<'a> {
    fn from(record: &'a TypeRecord) -> Self {
        TypeRecordRepr {
            name: &record.name,
            size: record.size,
            alignment: record.alignment,
            is_async_fn: record.classification.is_async_env(),
            state_machine: record.classification.is_state_machine(),
            locations: record.locations(),
            members: &record.members,
            type_id: record.type_id.as_deref(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct Analysis<'a> {
    pub async_functions: Vec<TypeRecordRepr<'a>>,
    pub state_machines: Vec<TypeRecordRepr<'a>>,
    pub dependency_tree: IndexMap<String, Vec<String>>,
}

pub fn build_analysis(index: &TypeIndex) -> Analysis<'_> {
    Analysis {
        async_functions: index.async_envs().map(TypeRecordRepr::from).collect(),
        state_machines: index.state_machines().map(TypeRecordRepr::from).collect(),
        dependency_tree: index.dependency_tree().into_iter().collect(),
    }
}
