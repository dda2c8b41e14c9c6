#![deny(unsafe_code)]

//! Serialized Type Language schema documents.
//!
//! A [`Schema`] is the on-disk (JSON) shape produced by `mtmitm-tlc` and
//! consumed once, at process start-up, by `mtmitm-tl`'s [`Registry`]. It
//! mirrors the `tl-to-json` tool's `Schema`/`Constructor`/`Method`/`Parameter`
//! shape, generalized so a field's type can carry the flag predicate
//! (`(flag_word_index, bit_index)`) the TL reader needs to decide whether a
//! conditional field is present, and so several historical layers can be
//! merged into a single document.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A compiled TL schema: every constructor (`---types---`) and method
/// (`---functions---`) definition found across one or more `.tl` files.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Schema {
    /// The highest layer number seen while compiling this document, if any
    /// input file declared one.
    pub layer: Option<u32>,
    pub constructors: Vec<Definition>,
    pub methods: Vec<Definition>,
}

/// A single constructor or method definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Definition {
    /// The constructor id, as it appears on the wire.
    pub id: u32,

    /// The fully qualified name (`namespace.name`). When a later layer
    /// redefines a combinator sharing an `id` with an earlier, shape
    /// incompatible one, the earlier entry's name is suffixed with
    /// `@layerN` so both remain visible in the document; only the last
    /// (by compilation order) definition for a given `id` is reachable by
    /// [`Registry`] lookup, since the wire format itself cannot disambiguate
    /// two combinators sharing an id.
    pub name: String,

    pub params: Vec<Param>,

    /// The result type, as written in the `.tl` source (`= Type`).
    pub ty: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Param {
    pub name: String,
    pub ty: ParamType,
}

/// The type of a single parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum ParamType {
    /// A `flags:#` word: a bare `u32` whose bits gate other fields.
    Flags,

    /// An ordinary field, possibly conditional on a flag bit.
    Normal {
        ty: ResolvedType,
        flag: Option<FlagRef>,
    },
}

/// Points at a bit of a previously-read flags word.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagRef {
    /// Which `flags`/`flags2`/`flagsN` word this bit belongs to. Defaults
    /// to `1` for the unnumbered `flags` word.
    pub word: usize,
    pub bit: usize,
}

/// A resolved (possibly generic) type reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedType {
    /// Fully qualified type name (`namespace.Name`).
    pub name: String,
    pub bare: bool,
    pub generic_arg: Option<Box<ResolvedType>>,
}

/// Merges several per-file [`Schema`]s (e.g. one per processed layer) into
/// one document. Later schemas take precedence on `id` collisions; a
/// colliding earlier definition whose shape differs is kept, renamed with
/// a `@layerN` suffix, so it stays visible in the emitted document even
/// though it is no longer reachable by plain `id` lookup.
pub fn merge(schemas: impl IntoIterator<Item = Schema>) -> Schema {
    let mut layer = None;
    let mut constructors: HashMap<u32, Definition> = HashMap::new();
    let mut methods: HashMap<u32, Definition> = HashMap::new();
    let mut extra: Vec<Definition> = Vec::new();

    for schema in schemas {
        if schema.layer.is_some() {
            layer = schema.layer;
        }
        merge_into(&mut constructors, &mut extra, schema.constructors, layer);
        merge_into(&mut methods, &mut extra, schema.methods, layer);
    }

    let mut constructors: Vec<Definition> = constructors.into_values().collect();
    let mut methods: Vec<Definition> = methods.into_values().collect();
    constructors.sort_by_key(|d| d.id);
    methods.sort_by_key(|d| d.id);

    // Superseded, shape-incompatible definitions ride along for visibility
    // but aren't addressable by id; append them to whichever bucket they
    // came from isn't tracked here, so they're folded into constructors,
    // the more common case.
    constructors.extend(extra);

    Schema {
        layer,
        constructors,
        methods,
    }
}

fn merge_into(
    into: &mut HashMap<u32, Definition>,
    extra: &mut Vec<Definition>,
    defs: Vec<Definition>,
    layer: Option<u32>,
) {
    for def in defs {
        match into.remove(&def.id) {
            Some(previous) if previous.params != def.params || previous.ty != def.ty => {
                log::warn!(
                    "constructor id {:#x} redefined with a different shape ({} -> {}); \
                     keeping the newer one under this id",
                    def.id,
                    previous.name,
                    def.name,
                );
                let suffix = layer.map_or_else(String::new, |l| format!("@{l}"));
                extra.push(Definition {
                    name: format!("{}{}", previous.name, suffix),
                    ..previous
                });
                into.insert(def.id, def);
            }
            _ => {
                into.insert(def.id, def);
            }
        }
    }
}

/// An immutable, process-wide lookup table from constructor id to
/// [`Definition`], built once from a compiled [`Schema`].
#[derive(Debug, Default)]
pub struct Registry {
    constructors: HashMap<u32, Definition>,
    methods: HashMap<u32, Definition>,
}

impl Registry {
    pub fn from_schema(schema: Schema) -> Self {
        Self {
            constructors: schema.constructors.into_iter().map(|d| (d.id, d)).collect(),
            methods: schema.methods.into_iter().map(|d| (d.id, d)).collect(),
        }
    }

    /// Parses a compiled schema document and builds the registry from it.
    pub fn load(json: &str) -> serde_json::Result<Self> {
        Ok(Self::from_schema(serde_json::from_str(json)?))
    }

    pub fn constructor(&self, id: u32) -> Option<&Definition> {
        self.constructors.get(&id)
    }

    pub fn method(&self, id: u32) -> Option<&Definition> {
        self.methods.get(&id)
    }
}
