// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Human-readable rendering of the analysis, for the CLI's non-JSON mode.

use crate::type_graph::{roots, TypeIndex, TypeRecord};
use std::collections::HashSet;
use std::fmt::Write;

fn write_record(out: &mut String, record: &TypeRecord) {
    let _ = writeln!(out, "\n{}:", record.name);
    let _ = writeln!(out, "  Size: {} bytes", record.size);
    let _ = writeln!(out, "  Alignment: {} bytes", record.alignment);
    let _ = writeln!(out, "  Members:");
    for member in &record.members {
        let _ = writeln!(out, "    {}:", member.name);
        let _ = writeln!(out, "      Type: {}", member.type_ref);
        let _ = writeln!(out, "      Offset: {}", member.offset);
        let _ = writeln!(out, "      Size: {}", member.size);
        let _ = writeln!(out, "      Alignment: {}", member.alignment);
        if member.is_artificial {
            let _ = writeln!(out, "      Artificial: Yes");
        }
    }
}

pub fn render_analysis(index: &TypeIndex) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "=== Future Analysis ===\n");

    let _ = writeln!(out, "Async Functions:");
    for record in index.async_envs() {
        write_record(&mut out, record);
    }

    let _ = writeln!(out, "\nState Machines:");
    for record in index.state_machines() {
        write_record(&mut out, record);
    }
    out
}

fn write_tree_node(
    out: &mut String,
    tree: &[(String, Vec<String>)],
    name: &str,
    level: usize,
    visited: &mut HashSet<String>,
) {
    let _ = writeln!(out, "{}- {name}", "  ".repeat(level));
    visited.insert(name.to_string());
    let deps = tree
        .iter()
        .find(|(n, _)| n == name)
        .map(|(_, deps)| deps.as_slice())
        .unwrap_or(&[]);
    for dep in deps {
        if !visited.contains(dep) {
            write_tree_node(out, tree, dep, level + 1, visited);
        }
    }
}

/// Indented dependency tree, printed from the roots (state machines not
/// contained by any other).
pub fn render_dependency_tree(index: &TypeIndex) -> String {
    let tree = index.dependency_tree();
    let mut out = String::new();
    let _ = writeln!(out, "\nFuture Dependency Tree:");
    for root in roots(&tree) {
        let mut visited = HashSet::new();
        write_tree_node(&mut out, &tree, root, 0, &mut visited);
    }
    out
}
