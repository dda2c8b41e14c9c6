// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Reads one or more `.tl` files (one per historical layer, typically) and
//! writes a single merged `mtmitm-schema` JSON document. If a file is "-",
//! it is read from standard input instead.
//!
//! Usage: `mtmitm-tlc [-o out.json] file.tl [file2.tl ...]`

use std::env;
use std::fs::File;
use std::io::{self, BufWriter, Read};

use mtmitm_schema::{Definition, FlagRef, Param, ParamType, ResolvedType, Schema};
use mtmitm_tl_parser::{parse_tl_file, tl};

const STDIN_NAME: &str = "-";
const DEFAULT_OUTPUT: &str = "schema.json";

fn full_name(ns: &[String], name: &str) -> String {
    let mut result = String::new();
    for part in ns {
        result.push_str(part);
        result.push('.');
    }
    result.push_str(name);
    result
}

fn resolve_type(ty: &tl::Type) -> ResolvedType {
    ResolvedType {
        name: full_name(&ty.namespace, &ty.name),
        bare: ty.bare,
        generic_arg: ty.generic_arg.as_deref().map(|t| Box::new(resolve_type(t))),
    }
}

/// Flag names are `flags`, `flags2`, `flags3`, ... with the unnumbered form
/// meaning word index 1.
fn flag_word_index(name: &str) -> usize {
    name.strip_prefix("flags")
        .map(|rest| if rest.is_empty() { 1 } else { rest.parse().unwrap_or(1) })
        .unwrap_or(1)
}

fn adapt_param(param: &tl::Parameter) -> Param {
    let ty = match &param.ty {
        tl::ParameterType::Flags => ParamType::Flags,
        tl::ParameterType::Normal { ty, flag } => ParamType::Normal {
            ty: resolve_type(ty),
            flag: flag.as_ref().map(|f| FlagRef {
                word: flag_word_index(&f.name),
                bit: f.index,
            }),
        },
    };
    Param {
        name: param.name.clone(),
        ty,
    }
}

fn adapt_definition(def: &tl::Definition) -> Definition {
    Definition {
        id: def.id,
        name: full_name(&def.namespace, &def.name),
        params: def.params.iter().map(adapt_param).collect(),
        ty: def.ty.to_string(),
    }
}

fn compile_one(contents: &str) -> Schema {
    let parsed = parse_tl_file(contents);
    let mut schema = Schema {
        layer: parsed.layer,
        constructors: Vec::new(),
        methods: Vec::new(),
    };
    for def in parsed.definitions.into_iter().filter_map(Result::ok) {
        match def.category {
            tl::Category::Types => schema.constructors.push(adapt_definition(&def)),
            tl::Category::Functions => schema.methods.push(adapt_definition(&def)),
        }
    }
    schema
}

fn main() -> io::Result<()> {
    let mut args = env::args().skip(1).peekable();
    let output = if args.peek().map(String::as_str) == Some("-o") {
        args.next();
        args.next().unwrap_or_else(|| DEFAULT_OUTPUT.into())
    } else {
        DEFAULT_OUTPUT.into()
    };

    let mut schemas = Vec::new();
    for fin in args {
        let mut tl = String::new();
        if fin == STDIN_NAME {
            io::stdin().read_to_string(&mut tl)?;
        } else {
            File::open(&fin)?.read_to_string(&mut tl)?;
        }
        schemas.push(compile_one(&tl));
    }

    let merged = mtmitm_schema::merge(schemas);
    serde_json::to_writer(BufWriter::new(File::create(&output)?), &merged)?;
    Ok(())
}
