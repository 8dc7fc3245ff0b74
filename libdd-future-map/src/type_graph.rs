// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Materializes structure records from the flat DIE stream and classifies
//! the compiler-generated future state machines among them.

use crate::die_reader::{DieAttr, DieRecord, DieStream, DieTag};
use anyhow::Context;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tracing::debug;

/// Sentinel stored when a member DIE carries no resolvable type reference.
pub const UNKNOWN_TYPE_REF: &str = "unknown";

const ASYNC_ENV_MARKERS: [&str; 2] = ["async_fn_env", "async_block_env"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    Plain,
    StateMachine,
    /// A state machine whose name carries a compiler-generated
    /// async-environment marker. Implies `StateMachine`.
    AsyncEnv,
}

impl Classification {
    pub fn classify(name: &str) -> Self {
        if ASYNC_ENV_MARKERS.iter().any(|m| name.contains(m)) {
            Classification::AsyncEnv
        } else if name.to_lowercase().contains("future") {
            Classification::StateMachine
        } else {
            Classification::Plain
        }
    }

    pub fn is_state_machine(self) -> bool {
        !matches!(self, Classification::Plain)
    }

    pub fn is_async_env(self) -> bool {
        matches!(self, Classification::AsyncEnv)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MemberRecord {
    pub name: String,
    /// Hex type-id of the member's declared type, or [`UNKNOWN_TYPE_REF`].
    #[serde(rename = "type")]
    pub type_ref: String,
    pub offset: u64,
    /// The dumper does not report member sizes; kept for artifact
    /// compatibility.
    pub size: u64,
    pub alignment: u64,
    pub is_artificial: bool,
    pub decl_file: Option<String>,
    pub decl_line: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceLocation {
    pub file: String,
    pub line: u64,
}

#[derive(Debug, Clone)]
pub struct TypeRecord {
    /// Unique name; the second occurrence of a duplicated name is re-keyed
    /// as `name<0x{type_id}>` to keep monomorphized instantiations distinct.
    pub name: String,
    pub size: u64,
    pub alignment: u64,
    pub members: Vec<MemberRecord>,
    pub classification: Classification,
    pub type_id: Option<String>,
}

impl TypeRecord {
    /// Display-only set of (file, line) pairs from members' declaration
    /// sites.
    pub fn locations(&self) -> Vec<SourceLocation> {
        self.members
            .iter()
            .filter_map(|m| match (&m.decl_file, m.decl_line) {
                (Some(file), Some(line)) => Some(SourceLocation {
                    file: file.clone(),
                    line,
                }),
                _ => None,
            })
            .collect()
    }
}

/// Per-compilation-unit file table: 1-based index to fully qualified path.
#[derive(Debug, Default)]
struct FileTable {
    files: Vec<String>,
}

impl FileTable {
    /// The unit's own source file is the first name attribute in the unit and
    /// is skipped; every following name indexes the table from 1. Relative
    /// names are joined to the compilation directory, absolute names kept
    /// verbatim.
    fn from_unit(records: &[DieRecord]) -> Self {
        let comp_dir = records
            .iter()
            .find_map(|r| r.attr(DieAttr::CompDir))
            .unwrap_or("");

        let mut files = Vec::new();
        let mut seen_unit_name = false;
        for record in records {
            let Some(name) = record.attr(DieAttr::Name) else {
                continue;
            };
            if !seen_unit_name {
                seen_unit_name = true;
                continue;
            }
            let path = if comp_dir.is_empty() || name.starts_with('/') {
                name.to_string()
            } else {
                format!("{}/{}", comp_dir.trim_end_matches('/'), name)
            };
            files.push(path);
        }
        FileTable { files }
    }

    fn resolve(&self, index: u64) -> String {
        usize::try_from(index)
            .ok()
            .and_then(|i| i.checked_sub(1))
            .and_then(|i| self.files.get(i))
            .cloned()
            .unwrap_or_else(|| format!("file_index_{index}"))
    }
}

/// Append-only arena of [`TypeRecord`]s with side maps for name uniqueness
/// and `type_id → record` resolution. Built in one pass over the DIE stream
/// and immutable afterwards.
#[derive(Debug, Default)]
pub struct TypeIndex {
    records: Vec<TypeRecord>,
    by_name: HashMap<String, usize>,
    by_type_id: HashMap<String, usize>,
}

impl TypeIndex {
    pub fn from_dies(stream: &DieStream) -> anyhow::Result<Self> {
        anyhow::ensure!(
            stream.has_compile_unit(),
            "debug-info dump contains no compile_unit record; \
             was the binary built without debug info?"
        );
        if stream.skipped_lines > 0 {
            debug!(
                skipped = stream.skipped_lines,
                "skipped malformed dumper lines"
            );
        }

        let mut index = TypeIndex::default();
        for unit in compile_unit_ranges(&stream.records) {
            let file_table = FileTable::from_unit(unit);
            index.scan_unit(unit, &file_table);
        }
        debug!(types = index.records.len(), "type graph built");
        Ok(index)
    }

    /// Walks one compilation unit, collecting each structure DIE's block
    /// (all following records of strictly greater depth).
    fn scan_unit(&mut self, unit: &[DieRecord], file_table: &FileTable) {
        let mut i = 0;
        while i < unit.len() {
            let record = &unit[i];
            if record.tag != DieTag::StructureType {
                i += 1;
                continue;
            }
            let depth = record.depth;
            let mut end = i + 1;
            while end < unit.len() && unit[end].depth > depth {
                end += 1;
            }
            self.register_structure(record, &unit[i + 1..end], file_table);
            // Nested structure DIEs belong to the enclosing block and are not
            // registered separately.
            i = end;
        }
    }

    fn register_structure(
        &mut self,
        header: &DieRecord,
        block: &[DieRecord],
        file_table: &FileTable,
    ) {
        let Some(name) = header.attr(DieAttr::Name) else {
            return;
        };
        let size = header.decimal_attr(DieAttr::ByteSize).unwrap_or(0);
        let alignment = header.decimal_attr(DieAttr::Alignment).unwrap_or(0);
        let type_id = Some(header.offset.clone());

        let members = block
            .iter()
            .filter(|r| r.tag == DieTag::Member)
            .filter_map(|r| member_from_record(r, file_table))
            .collect();

        let mut unique_name = name.to_string();
        if self.by_name.contains_key(&unique_name) {
            if let Some(id) = &type_id {
                unique_name = format!("{name}<0x{id}>");
            }
        }

        let record = TypeRecord {
            name: unique_name.clone(),
            size,
            alignment,
            members,
            classification: Classification::classify(name),
            type_id: type_id.clone(),
        };

        let slot = match self.by_name.get(&unique_name) {
            Some(&existing) => {
                self.records[existing] = record;
                existing
            }
            None => {
                self.records.push(record);
                self.records.len() - 1
            }
        };
        self.by_name.insert(unique_name, slot);
        if let Some(id) = type_id {
            self.by_type_id.insert(id, slot);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = &TypeRecord> {
        self.records.iter()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<&TypeRecord> {
        self.by_name.get(name).map(|&i| &self.records[i])
    }

    pub fn by_type_id(&self, type_id: &str) -> Option<&TypeRecord> {
        self.by_type_id.get(type_id).map(|&i| &self.records[i])
    }

    pub fn state_machines(&self) -> impl Iterator<Item = &TypeRecord> {
        self.iter().filter(|r| r.classification.is_state_machine())
    }

    pub fn async_envs(&self) -> impl Iterator<Item = &TypeRecord> {
        self.iter().filter(|r| r.classification.is_async_env())
    }

    /// State machines reachable from `record`'s members, walking through
    /// non-state wrappers to find futures nested behind them. Re-entry on an
    /// already-seen name terminates the branch, which keeps the walk
    /// well-founded even on malformed debug info.
    pub fn state_machine_deps(&self, record: &TypeRecord) -> Vec<String> {
        let mut seen = HashSet::new();
        seen.insert(record.name.clone());
        let mut deps = Vec::new();
        self.walk_deps(record, &mut seen, &mut deps);
        deps
    }

    fn walk_deps(&self, record: &TypeRecord, seen: &mut HashSet<String>, deps: &mut Vec<String>) {
        for member in &record.members {
            let Some(child) = self.by_type_id(&member.type_ref) else {
                continue;
            };
            if !seen.insert(child.name.clone()) {
                continue;
            }
            if child.classification.is_state_machine() {
                deps.push(child.name.clone());
            }
            self.walk_deps(child, seen, deps);
        }
    }

    /// Adjacency listing of every state machine with its dependencies, in
    /// arena insertion order.
    pub fn dependency_tree(&self) -> Vec<(String, Vec<String>)> {
        self.state_machines()
            .map(|r| (r.name.clone(), self.state_machine_deps(r)))
            .collect()
    }
}

/// State machines that appear in no other state machine's dependency list.
pub fn roots(tree: &[(String, Vec<String>)]) -> Vec<&str> {
    let contained: HashSet<&str> = tree
        .iter()
        .flat_map(|(_, deps)| deps.iter().map(String::as_str))
        .collect();
    tree.iter()
        .map(|(name, _)| name.as_str())
        .filter(|name| !contained.contains(name))
        .collect()
}

fn compile_unit_ranges(records: &[DieRecord]) -> impl Iterator<Item = &[DieRecord]> {
    let starts: Vec<usize> = records
        .iter()
        .enumerate()
        .filter(|(_, r)| r.tag == DieTag::CompileUnit)
        .map(|(i, _)| i)
        .collect();
    let mut ranges = Vec::with_capacity(starts.len());
    for (n, &start) in starts.iter().enumerate() {
        let end = starts.get(n + 1).copied().unwrap_or(records.len());
        ranges.push(&records[start..end]);
    }
    ranges.into_iter()
}

fn member_from_record(record: &DieRecord, file_table: &FileTable) -> Option<MemberRecord> {
    let name = record.attr(DieAttr::Name)?.to_string();
    let decl_file = record
        .decimal_attr(DieAttr::DeclFile)
        .map(|i| file_table.resolve(i));
    Some(MemberRecord {
        name,
        type_ref: record
            .type_ref()
            .unwrap_or_else(|| UNKNOWN_TYPE_REF.to_string()),
        offset: record.decimal_attr(DieAttr::DataMemberLocation).unwrap_or(0),
        size: 0,
        alignment: record.decimal_attr(DieAttr::Alignment).unwrap_or(0),
        is_artificial: record.has_attr(DieAttr::Artificial),
        decl_file,
        decl_line: record.decimal_attr(DieAttr::DeclLine),
    })
}

/// Convenience entry point: parse dumper text and build the index, failing
/// when the stream has no compile unit.
pub fn build_index(dumper_output: &str) -> anyhow::Result<TypeIndex> {
    let stream = crate::die_reader::parse(dumper_output);
    TypeIndex::from_dies(&stream).context("building type index from debug-info dump")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::die_reader;

    fn cu_header(offset: &str) -> String {
        format!(" <0><{offset}>: Abbrev Number: 1 (DW_TAG_compile_unit)\n")
    }

    fn structure(depth: u32, offset: &str, name: &str, size: u64, align: u64) -> String {
        format!(
            " <{depth}><{offset}>: Abbrev Number: 2 (DW_TAG_structure_type)\n    \
             <1>   DW_AT_name : {name}\n    \
             <1>   DW_AT_byte_size : {size}\n    \
             <1>   DW_AT_alignment : {align}\n"
        )
    }

    fn member(depth: u32, offset: &str, name: &str, type_ref: &str, at: u64) -> String {
        format!(
            " <{depth}><{offset}>: Abbrev Number: 3 (DW_TAG_member)\n    \
             <1>   DW_AT_name : {name}\n    \
             <1>   DW_AT_type : <0x{type_ref}>\n    \
             <1>   DW_AT_data_member_location : {at}\n"
        )
    }

    fn index_of(text: &str) -> TypeIndex {
        build_index(text).expect("index builds")
    }

    #[test]
    fn minimal_async_env() {
        let mut text = cu_header("b");
        text.push_str("    <1>   DW_AT_name : src/main.rs\n");
        text.push_str(&structure(1, "2a", "my_task::{async_fn_env#0}", 24, 8));
        text.push_str(&member(2, "31", "__state", "99", 0));

        let index = index_of(&text);
        let record = index.get("my_task::{async_fn_env#0}").expect("registered");
        assert_eq!(record.size, 24);
        assert_eq!(record.alignment, 8);
        assert_eq!(record.classification, Classification::AsyncEnv);
        assert!(record.classification.is_state_machine());
        assert_eq!(record.members.len(), 1);
        assert_eq!(record.members[0].name, "__state");
        assert_eq!(record.members[0].offset, 0);
        assert_eq!(record.type_id.as_deref(), Some("2a"));
    }

    #[test]
    fn classification_covers_future_names() {
        assert_eq!(
            Classification::classify("tokio::time::Sleep"),
            Classification::Plain
        );
        assert_eq!(
            Classification::classify("hyper::client::ResponseFuture"),
            Classification::StateMachine
        );
        assert_eq!(
            Classification::classify("combinators::MapFuture<F>"),
            Classification::StateMachine
        );
        assert_eq!(
            Classification::classify("job::{async_block_env#0}"),
            Classification::AsyncEnv
        );
        assert!(Classification::classify("x::{async_fn_env#1}").is_state_machine());
    }

    #[test]
    fn zero_member_struct_classifies_on_name_alone() {
        let mut text = cu_header("b");
        text.push_str(&structure(1, "20", "poller::PollFuture", 8, 8));
        let index = index_of(&text);
        let record = index.get("poller::PollFuture").expect("registered");
        assert!(record.members.is_empty());
        assert_eq!(record.classification, Classification::StateMachine);
    }

    #[test]
    fn duplicate_names_are_rekeyed_by_type_id() {
        let mut text = cu_header("b");
        text.push_str(&structure(1, "10", "pair::DualFuture", 8, 8));
        text.push_str(&cu_header("100"));
        text.push_str(&structure(1, "110", "pair::DualFuture", 16, 8));

        let index = index_of(&text);
        assert_eq!(index.len(), 2);
        assert_eq!(index.get("pair::DualFuture").map(|r| r.size), Some(8));
        assert_eq!(
            index.get("pair::DualFuture<0x110>").map(|r| r.size),
            Some(16)
        );
        assert_eq!(
            index.by_type_id("110").map(|r| r.name.as_str()),
            Some("pair::DualFuture<0x110>")
        );
    }

    #[test]
    fn unknown_type_ref_is_kept_and_skipped_by_resolution() {
        let mut text = cu_header("b");
        text.push_str(&structure(1, "10", "lone::{async_fn_env#0}", 8, 8));
        text.push_str(
            " <2><11>: Abbrev Number: 3 (DW_TAG_member)\n    \
             <1>   DW_AT_name : inner\n",
        );

        let index = index_of(&text);
        let record = index.get("lone::{async_fn_env#0}").expect("registered");
        assert_eq!(record.members[0].type_ref, UNKNOWN_TYPE_REF);
        assert!(index.state_machine_deps(record).is_empty());
    }

    #[test]
    fn dependency_nesting_walks_through_members() {
        // A contains B (by id), B contains C; C leaf.
        let mut text = cu_header("b");
        text.push_str(&structure(1, "a0", "A::{async_fn_env#0}", 24, 8));
        text.push_str(&member(2, "a1", "child", "b0", 0));
        text.push_str(&structure(1, "b0", "B::{async_fn_env#0}", 24, 8));
        text.push_str(&member(2, "b1", "child", "c0", 0));
        text.push_str(&structure(1, "c0", "C::{async_fn_env#0}", 8, 8));

        let index = index_of(&text);
        let tree = index.dependency_tree();
        let lookup = |name: &str| {
            tree.iter()
                .find(|(n, _)| n == name)
                .map(|(_, deps)| deps.clone())
                .expect("node present")
        };
        assert_eq!(
            lookup("A::{async_fn_env#0}"),
            vec!["B::{async_fn_env#0}", "C::{async_fn_env#0}"]
        );
        assert_eq!(lookup("B::{async_fn_env#0}"), vec!["C::{async_fn_env#0}"]);
        assert!(lookup("C::{async_fn_env#0}").is_empty());
        assert_eq!(roots(&tree), vec!["A::{async_fn_env#0}"]);
    }

    #[test]
    fn deps_see_through_non_state_wrappers() {
        let mut text = cu_header("b");
        text.push_str(&structure(1, "a0", "outer::{async_fn_env#0}", 24, 8));
        text.push_str(&member(2, "a1", "wrapped", "d0", 0));
        text.push_str(&structure(1, "d0", "core::mem::ManuallyDrop<T>", 8, 8));
        text.push_str(&member(2, "d1", "value", "c0", 0));
        text.push_str(&structure(1, "c0", "inner::{async_fn_env#0}", 8, 8));

        let index = index_of(&text);
        let outer = index.get("outer::{async_fn_env#0}").expect("registered");
        assert_eq!(
            index.state_machine_deps(outer),
            vec!["inner::{async_fn_env#0}"]
        );
    }

    #[test]
    fn dependency_walk_terminates_on_mutual_references() {
        let mut text = cu_header("b");
        text.push_str(&structure(1, "a0", "ping::{async_fn_env#0}", 8, 8));
        text.push_str(&member(2, "a1", "peer", "b0", 0));
        text.push_str(&structure(1, "b0", "pong::{async_fn_env#0}", 8, 8));
        text.push_str(&member(2, "b1", "peer", "a0", 0));

        let index = index_of(&text);
        let ping = index.get("ping::{async_fn_env#0}").expect("registered");
        let deps = index.state_machine_deps(ping);
        assert_eq!(deps, vec!["pong::{async_fn_env#0}"]);
        // No self-containment, no cycle.
        assert!(!deps.contains(&"ping::{async_fn_env#0}".to_string()));
    }

    #[test]
    fn file_table_resolves_member_declarations() {
        let mut text = cu_header("b");
        text.push_str("    <1>   DW_AT_comp_dir : /work/project\n");
        text.push_str("    <1>   DW_AT_name : src/lib.rs\n");
        // Names after the unit's own file populate the table from index 1.
        text.push_str(
            " <1><8>: Abbrev Number: 9 (DW_TAG_variable)\n    \
             <1>   DW_AT_name : src/lib.rs\n",
        );
        text.push_str(
            " <1><9>: Abbrev Number: 9 (DW_TAG_variable)\n    \
             <1>   DW_AT_name : /abs/other.rs\n",
        );
        text.push_str(&structure(1, "20", "demo::{async_fn_env#0}", 8, 8));
        text.push_str(
            " <2><21>: Abbrev Number: 3 (DW_TAG_member)\n    \
             <1>   DW_AT_name : first\n    \
             <1>   DW_AT_decl_file : 1\n    \
             <1>   DW_AT_decl_line : 10\n",
        );
        text.push_str(
            " <2><22>: Abbrev Number: 3 (DW_TAG_member)\n    \
             <1>   DW_AT_name : second\n    \
             <1>   DW_AT_decl_file : 2\n",
        );
        text.push_str(
            " <2><23>: Abbrev Number: 3 (DW_TAG_member)\n    \
             <1>   DW_AT_name : third\n    \
             <1>   DW_AT_decl_file : 9\n",
        );

        let index = index_of(&text);
        let record = index.get("demo::{async_fn_env#0}").expect("registered");
        assert_eq!(
            record.members[0].decl_file.as_deref(),
            Some("/work/project/src/lib.rs")
        );
        assert_eq!(record.members[1].decl_file.as_deref(), Some("/abs/other.rs"));
        assert_eq!(record.members[2].decl_file.as_deref(), Some("file_index_9"));
        assert_eq!(
            record.locations(),
            vec![SourceLocation {
                file: "/work/project/src/lib.rs".to_string(),
                line: 10
            }]
        );
    }

    #[test]
    fn missing_compile_unit_is_fatal() {
        let err = build_index(" <1><10>: Abbrev Number: 2 (DW_TAG_structure_type)\n")
            .expect_err("must fail");
        assert!(err.to_string().contains("compile_unit"));
    }

    #[test]
    fn nested_structures_stay_inside_the_enclosing_block() {
        let mut text = cu_header("b");
        text.push_str(&structure(1, "10", "outer::PollFuture", 16, 8));
        text.push_str(&structure(2, "11", "outer::Hidden", 8, 8));
        text.push_str(&structure(1, "30", "next::OtherFuture", 8, 8));

        let index = index_of(&text);
        assert!(index.get("outer::PollFuture").is_some());
        assert!(index.get("outer::Hidden").is_none());
        assert!(index.get("next::OtherFuture").is_some());
    }
}
