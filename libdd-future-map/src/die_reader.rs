// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Reader for the textual DIE listing produced by the external debug-info
//! dumper (`objdump --dwarf=info`).
//!
//! The dumper emits one header line per DIE,
//! `<depth><hex_offset>: Abbrev Number: N (DW_TAG_xxx)`, followed by zero or
//! more attribute lines, `DW_AT_xxx : value`. This module flattens that text
//! into a linear sequence of [`DieRecord`]s; attribute lines attach to the
//! most recently opened record. Only the attributes the type-graph builder
//! consumes are retained, every other line is ignored.

use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashMap;

lazy_static! {
    static ref DIE_HEADER: Regex =
        Regex::new(r"^\s*<(\d+)><([0-9a-f]+)>:\s*Abbrev Number:\s*(\d+)(?:\s*\((DW_TAG_[0-9A-Za-z_]+)\))?")
            .expect("invalid regex");
    static ref DIE_ATTR: Regex =
        Regex::new(r"^\s*(?:<[0-9a-f]+>\s+)?(DW_AT_[0-9A-Za-z_]+)\s*:\s*(.*)$").expect("invalid regex");
    static ref INDIRECT_STRING: Regex =
        Regex::new(r"^\(indirect string, offset: 0x[0-9a-f]+\):\s*").expect("invalid regex");
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DieTag {
    CompileUnit,
    StructureType,
    Member,
    /// Any tag the pipeline does not consume, including the tag-less
    /// `Abbrev Number: 0` null entries that close sibling chains.
    Other,
}

impl DieTag {
    fn from_raw(raw: Option<&str>) -> Self {
        match raw {
            Some("DW_TAG_compile_unit") => DieTag::CompileUnit,
            Some("DW_TAG_structure_type") => DieTag::StructureType,
            Some("DW_TAG_member") => DieTag::Member,
            _ => DieTag::Other,
        }
    }
}

/// The attribute names consumed by the pipeline. Everything else in the
/// dumper output is skipped without being recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DieAttr {
    Name,
    ByteSize,
    Alignment,
    Type,
    DataMemberLocation,
    DeclFile,
    DeclLine,
    Artificial,
    CompDir,
}

impl DieAttr {
    fn from_raw(raw: &str) -> Option<Self> {
        Some(match raw {
            "DW_AT_name" => DieAttr::Name,
            "DW_AT_byte_size" => DieAttr::ByteSize,
            "DW_AT_alignment" => DieAttr::Alignment,
            "DW_AT_type" => DieAttr::Type,
            "DW_AT_data_member_location" => DieAttr::DataMemberLocation,
            "DW_AT_decl_file" => DieAttr::DeclFile,
            "DW_AT_decl_line" => DieAttr::DeclLine,
            "DW_AT_artificial" => DieAttr::Artificial,
            "DW_AT_comp_dir" => DieAttr::CompDir,
            _ => return None,
        })
    }
}

/// One DIE with its depth, section offset, tag and the raw values of the
/// consumed attributes.
#[derive(Debug, Clone)]
pub struct DieRecord {
    pub depth: u32,
    /// Hex offset of the DIE within the debug-info section, without `0x`.
    pub offset: String,
    pub tag: DieTag,
    attrs: HashMap<DieAttr, String>,
}

impl DieRecord {
    pub fn attr(&self, attr: DieAttr) -> Option<&str> {
        self.attrs.get(&attr).map(String::as_str)
    }

    pub fn has_attr(&self, attr: DieAttr) -> bool {
        self.attrs.contains_key(&attr)
    }

    /// Value of a decimal attribute. The dumper sometimes trails extra
    /// decoration, so only the first run of digits is read.
    pub fn decimal_attr(&self, attr: DieAttr) -> Option<u64> {
        let raw = self.attr(attr)?;
        let start = raw.find(|c: char| c.is_ascii_digit())?;
        let rest = &raw[start..];
        let end = rest
            .find(|c: char| !c.is_ascii_digit())
            .unwrap_or(rest.len());
        rest[..end].parse().ok()
    }

    /// Hex reference carried by `AT_type`, read from inside the `<0x…>` pair.
    pub fn type_ref(&self) -> Option<String> {
        let raw = self.attr(DieAttr::Type)?;
        let start = raw.find("<0x")? + 3;
        let rest = &raw[start..];
        let end = rest.find('>')?;
        let hex = &rest[..end];
        if hex.is_empty() || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
            return None;
        }
        Some(hex.to_ascii_lowercase())
    }
}

/// Flat DIE sequence plus a count of single lines that looked like records
/// or attributes but could not be parsed.
#[derive(Debug, Default)]
pub struct DieStream {
    pub records: Vec<DieRecord>,
    pub skipped_lines: usize,
}

impl DieStream {
    pub fn has_compile_unit(&self) -> bool {
        self.records.iter().any(|r| r.tag == DieTag::CompileUnit)
    }
}

/// Strips the `(indirect string, offset: 0x…):` decoration and surrounding
/// whitespace/quotes from a string-valued attribute.
fn clean_string_value(raw: &str) -> String {
    let stripped = INDIRECT_STRING.replace(raw, "");
    stripped.trim().trim_matches('"').to_string()
}

pub fn parse(text: &str) -> DieStream {
    let mut stream = DieStream::default();

    for line in text.lines() {
        if let Some(caps) = DIE_HEADER.captures(line) {
            let depth = caps.get(1).and_then(|m| m.as_str().parse::<u32>().ok());
            let offset = caps.get(2).map(|m| m.as_str().to_string());
            let (Some(depth), Some(offset)) = (depth, offset) else {
                stream.skipped_lines += 1;
                continue;
            };
            let tag = DieTag::from_raw(caps.get(4).map(|m| m.as_str()));
            stream.records.push(DieRecord {
                depth,
                offset,
                tag,
                attrs: HashMap::new(),
            });
            continue;
        }
        if line.contains("Abbrev Number:") {
            // Header-shaped but unparseable.
            stream.skipped_lines += 1;
            continue;
        }

        if let Some(caps) = DIE_ATTR.captures(line) {
            let Some(attr) = DieAttr::from_raw(&caps[1]) else {
                continue;
            };
            let Some(current) = stream.records.last_mut() else {
                // Attribute before any DIE header.
                stream.skipped_lines += 1;
                continue;
            };
            let value = match attr {
                DieAttr::Name | DieAttr::CompDir => clean_string_value(&caps[2]),
                _ => caps[2].trim().to_string(),
            };
            current.attrs.entry(attr).or_insert(value);
        } else if line.contains("DW_AT_") {
            stream.skipped_lines += 1;
        }
    }

    stream
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#" Compilation Unit @ offset 0x0:
  Length:        0x1b4 (32-bit)
  Version:       4
 <0><b>: Abbrev Number: 1 (DW_TAG_compile_unit)
    <c>   DW_AT_producer    : (indirect string, offset: 0x0): clang LLVM (rustc version 1.84.1)
    <10>   DW_AT_name        : (indirect string, offset: 0x53): src/main.rs
    <14>   DW_AT_comp_dir    : (indirect string, offset: 0x5f): /home/user/project
 <1><2a>: Abbrev Number: 2 (DW_TAG_structure_type)
    <2b>   DW_AT_name        : (indirect string, offset: 0x72): my_task::{async_fn_env#0}
    <2f>   DW_AT_byte_size   : 24
    <30>   DW_AT_alignment   : 8
 <2><31>: Abbrev Number: 3 (DW_TAG_member)
    <32>   DW_AT_name        : __state
    <36>   DW_AT_type        : <0x99>
    <3a>   DW_AT_data_member_location: 0
    <3b>   DW_AT_decl_file   : 1
    <3c>   DW_AT_decl_line   : 3
 <2><40>: Abbrev Number: 0
 <1><99>: Abbrev Number: 4 (DW_TAG_base_type)
    <9a>   DW_AT_name        : u8
"#;

    #[test]
    fn parses_headers_and_attributes() {
        let stream = parse(SAMPLE);
        assert_eq!(stream.skipped_lines, 0);
        assert_eq!(stream.records.len(), 5);

        let cu = &stream.records[0];
        assert_eq!(cu.tag, DieTag::CompileUnit);
        assert_eq!(cu.depth, 0);
        assert_eq!(cu.offset, "b");
        assert_eq!(cu.attr(DieAttr::Name), Some("src/main.rs"));
        assert_eq!(cu.attr(DieAttr::CompDir), Some("/home/user/project"));

        let st = &stream.records[1];
        assert_eq!(st.tag, DieTag::StructureType);
        assert_eq!(st.attr(DieAttr::Name), Some("my_task::{async_fn_env#0}"));
        assert_eq!(st.decimal_attr(DieAttr::ByteSize), Some(24));
        assert_eq!(st.decimal_attr(DieAttr::Alignment), Some(8));

        let member = &stream.records[2];
        assert_eq!(member.tag, DieTag::Member);
        assert_eq!(member.attr(DieAttr::Name), Some("__state"));
        assert_eq!(member.type_ref().as_deref(), Some("99"));
        assert_eq!(member.decimal_attr(DieAttr::DataMemberLocation), Some(0));
        assert_eq!(member.decimal_attr(DieAttr::DeclFile), Some(1));
        assert_eq!(member.decimal_attr(DieAttr::DeclLine), Some(3));
    }

    #[test]
    fn null_entries_keep_their_depth() {
        let stream = parse(SAMPLE);
        let null = &stream.records[3];
        assert_eq!(null.tag, DieTag::Other);
        assert_eq!(null.depth, 2);
        assert_eq!(null.offset, "40");
    }

    #[test]
    fn unknown_tags_become_other() {
        let stream = parse(SAMPLE);
        assert_eq!(stream.records[4].tag, DieTag::Other);
        assert_eq!(stream.records[4].attr(DieAttr::Name), Some("u8"));
    }

    #[test]
    fn artificial_is_presence_only() {
        let text = " <1><10>: Abbrev Number: 2 (DW_TAG_structure_type)\n \
                    <2><11>: Abbrev Number: 3 (DW_TAG_member)\n    \
                    <12>   DW_AT_artificial  : 1\n";
        let stream = parse(text);
        assert!(stream.records[1].has_attr(DieAttr::Artificial));
    }

    #[test]
    fn malformed_lines_are_counted_not_fatal() {
        let text = " <0><b>: Abbrev Number: 1 (DW_TAG_compile_unit)\n\
                    garbage Abbrev Number: not-a-die\n\
                    DW_AT_name broken line without colon\n";
        let stream = parse(text);
        assert_eq!(stream.records.len(), 1);
        assert_eq!(stream.skipped_lines, 2);
    }

    #[test]
    fn attribute_before_any_header_is_skipped() {
        let stream = parse("    <10>   DW_AT_name : floating\n");
        assert!(stream.records.is_empty());
        assert_eq!(stream.skipped_lines, 1);
    }

    #[test]
    fn compile_unit_detection() {
        assert!(parse(SAMPLE).has_compile_unit());
        assert!(!parse(" <1><10>: Abbrev Number: 2 (DW_TAG_structure_type)\n").has_compile_unit());
    }

    #[test]
    fn type_ref_rejects_malformed_references() {
        let text = " <1><10>: Abbrev Number: 2 (DW_TAG_structure_type)\n \
                    <2><11>: Abbrev Number: 3 (DW_TAG_member)\n    \
                    <12>   DW_AT_type        : <0x>\n";
        let stream = parse(text);
        assert_eq!(stream.records[1].type_ref(), None);
    }
}
