// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! DOT rendering of the future dependency graph.

use crate::type_graph::TypeIndex;
use std::fmt::Write;

/// Converts a type name to a valid DOT node name: special characters become
/// underscores, runs collapse, and a leading non-letter is prefixed with `n`.
pub fn sanitize_node_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut prev_underscore = false;
    for c in name.chars() {
        let mapped = match c {
            '<' | '>' | '(' | ')' | ',' | ':' | ' ' | '+' | '[' | ']' => '_',
            other => other,
        };
        if mapped == '_' {
            if prev_underscore {
                continue;
            }
            prev_underscore = true;
        } else {
            prev_underscore = false;
        }
        out.push(mapped);
    }
    let mut sanitized = out.trim_matches('_').to_string();
    let starts_with_letter = sanitized
        .chars()
        .next()
        .is_some_and(|c| c.is_alphabetic());
    if !starts_with_letter {
        sanitized.insert(0, 'n');
    }
    sanitized
}

fn escape_label(name: &str) -> String {
    name.replace('\\', "\\\\").replace('"', "\\\"")
}

/// Renders the state-machine dependency graph. Node labels carry the
/// unescaped type name plus one representative `(file:line)` location.
pub fn dot_graph(index: &TypeIndex) -> String {
    let tree = index.dependency_tree();
    let mut dot = String::new();
    dot.push_str("digraph FutureDependencies {\n");
    dot.push_str("    rankdir=LR;\n");
    dot.push_str(
        "    node [shape=box, style=filled, fillcolor=lightblue, fontname=\"monospace\"];\n",
    );
    dot.push_str("    edge [fontname=\"monospace\"];\n");
    dot.push_str("    // Node definitions\n");

    for (name, _) in &tree {
        let node_name = sanitize_node_name(name);
        let loc_str = index
            .get(name)
            .and_then(|record| record.locations().into_iter().next())
            .map(|loc| format!("\\n({}:{})", loc.file, loc.line))
            .unwrap_or_default();
        let _ = writeln!(
            dot,
            "    \"{node_name}\" [label=\"{}{loc_str}\"];",
            escape_label(name)
        );
    }

    dot.push_str("    // Edges\n");
    for (name, deps) in &tree {
        let source = sanitize_node_name(name);
        for dep in deps {
            let _ = writeln!(dot, "    \"{source}\" -> \"{}\";", sanitize_node_name(dep));
        }
    }
    dot.push('}');
    dot
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::type_graph::build_index;

    #[test]
    fn sanitizes_special_characters_and_collapses_runs() {
        assert_eq!(
            sanitize_node_name("a::b::MyFuture<u8, [u8; 4]>"),
            "a_b_MyFuture_u8_u8;_4"
        );
        assert_eq!(sanitize_node_name("task::{async_fn_env#0}"), "task_{async_fn_env#0}");
    }

    #[test]
    fn leading_non_letter_is_prefixed() {
        assert_eq!(sanitize_node_name("0day::Future"), "n0day_Future");
        assert_eq!(sanitize_node_name("<<>>"), "n");
    }

    #[test]
    fn two_node_graph_has_labels_and_one_edge() {
        let text = " <0><b>: Abbrev Number: 1 (DW_TAG_compile_unit)\n    \
                    <1>   DW_AT_name : src/lib.rs\n    \
                    <1>   DW_AT_comp_dir : /work\n \
                    <1><a0>: Abbrev Number: 2 (DW_TAG_structure_type)\n    \
                    <1>   DW_AT_name : demo::AlphaFuture\n    \
                    <1>   DW_AT_byte_size : 24\n \
                    <2><a1>: Abbrev Number: 3 (DW_TAG_member)\n    \
                    <1>   DW_AT_name : inner\n    \
                    <1>   DW_AT_type : <0xb0>\n    \
                    <1>   DW_AT_decl_file : 1\n    \
                    <1>   DW_AT_decl_line : 10\n \
                    <1><b0>: Abbrev Number: 2 (DW_TAG_structure_type)\n    \
                    <1>   DW_AT_name : demo::BetaFuture\n    \
                    <1>   DW_AT_byte_size : 8\n";
        let index = build_index(text).expect("index builds");
        let dot = dot_graph(&index);

        assert!(dot.starts_with("digraph FutureDependencies {"));
        assert!(dot.contains("rankdir=LR;"));
        // The file table picks up the first post-unit name; what matters here
        // is the \n(file:line) decoration on the node label.
        assert!(dot.contains("\"demo_AlphaFuture\" [label=\"demo::AlphaFuture\\n("));
        assert!(dot.contains(":10)\"];"));
        assert!(dot.contains("\"demo_BetaFuture\" [label=\"demo::BetaFuture\"];"));
        assert_eq!(dot.matches(" -> ").count(), 1);
        assert!(dot.contains("\"demo_AlphaFuture\" -> \"demo_BetaFuture\";"));
    }
}
