// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

#![deny(unsafe_code)]

//! A parser for [Type Language] schema files: the `.tl` documents that
//! describe every constructor and method of an MTProto layer.
//!
//! Besides parsing individual definitions (see [`tl::Definition`]), this
//! crate understands the two pieces of file-level structure real schema
//! dumps carry: `---types---` / `---functions---` section markers, which
//! flip [`tl::Category`] for every definition that follows, and a
//! `// LAYER n` comment recording which protocol layer the file describes.
//!
//! [Type Language]: https://core.telegram.org/mtproto/TL

mod errors;
pub mod tl;
mod utils;

pub use errors::{ParamParseError, ParseError};

use std::str::FromStr;
use tl::{Category, Definition};

/// The result of parsing a whole `.tl` file: every definition it contains,
/// tagged with the section it was declared under, plus the layer number if
/// the file declared one.
#[derive(Debug)]
pub struct ParsedFile {
    /// The layer number found in a `// LAYER n` comment, if any.
    pub layer: Option<u32>,

    /// Every definition found in the file, in declaration order. Parse
    /// failures are kept in place rather than dropped so callers can report
    /// them against the source file.
    pub definitions: Vec<Result<Definition, ParseError>>,
}

/// Finds the layer number declared in a `// LAYER n` comment, if any.
fn find_layer(contents: &str) -> Option<u32> {
    contents.lines().find_map(|line| {
        let line = line.trim_start();
        if !line.starts_with("//") || !line.contains("LAYER") {
            return None;
        }
        line.rsplit(char::is_whitespace).next()?.parse().ok()
    })
}

/// Finds the next `---name---` section marker in `s`, returning its start
/// offset, its total byte length, and the name between the dashes.
fn find_next_marker(s: &str) -> Option<(usize, usize, &str)> {
    let start = s.find("---")?;
    let after = start + 3;
    let rel_end = s[after..].find("---")?;
    let name = &s[after..after + rel_end];
    if name.is_empty() || name.contains(char::is_whitespace) {
        return None;
    }
    let end = after + rel_end + 3;
    Some((start, end - start, name))
}

/// Parses every definition in `chunk`, tagging each with `category`.
fn parse_chunk(chunk: &str, category: Category) -> Vec<Result<Definition, ParseError>> {
    chunk
        .split(';')
        .map(str::trim)
        .filter(|d| !d.is_empty())
        .map(|d| {
            Definition::from_str(d).map(|mut def| {
                def.category = category;
                def
            })
        })
        .collect()
}

/// Parses a file full of [Type Language] definitions, honouring
/// `---types---` / `---functions---` section markers and an optional
/// `// LAYER n` comment.
///
/// [Type Language]: https://core.telegram.org/mtproto/TL
pub fn parse_tl_file(contents: &str) -> ParsedFile {
    let layer = find_layer(contents);
    let cleaned = utils::remove_tl_comments(contents);

    let mut definitions = Vec::new();
    let mut category = Category::Types;
    let mut remaining = cleaned.as_str();

    while let Some((pos, marker_len, name)) = find_next_marker(remaining) {
        definitions.extend(parse_chunk(&remaining[..pos], category));
        match name {
            "types" => category = Category::Types,
            "functions" => category = Category::Functions,
            other => definitions.push(Err(ParseError::UnknownSeparator {
                name: other.to_string(),
            })),
        }
        remaining = &remaining[pos + marker_len..];
    }
    definitions.extend(parse_chunk(remaining, category));

    ParsedFile { layer, definitions }
}
