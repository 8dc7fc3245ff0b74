// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Reconstructs the async task structure of a compiled binary.
//!
//! The pipeline walks the binary's debug info to find the compiler-generated
//! future state machines and their containment graph, pairs each state
//! machine with the mangled symbol of its `poll` implementation, and
//! persists the result as a *future map* that the runtime trace sequencer
//! (`libdd-async-flame`) consumes to place its breakpoints.

pub mod die_reader;
pub mod export;
pub mod graphviz;
pub mod report;
pub mod symbols;
pub mod tools;
pub mod type_graph;

pub use export::{
    build_analysis, build_future_map, export_future_map, load_future_map, write_future_map,
    Analysis, FutureMap, FutureMapEntry,
};
pub use symbols::{SymbolResolver, SymbolTable};
pub use type_graph::{Classification, MemberRecord, TypeIndex, TypeRecord};
