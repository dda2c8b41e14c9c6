// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Schema-driven TL object deserialization.

use std::collections::HashMap;
use std::io::Read;

use flate2::read::GzDecoder;
use mtmitm_schema::{Definition, ParamType, Registry, ResolvedType};

use crate::cursor::Cursor;
use crate::errors::{Error, Result};
use crate::value::{Object, Value};

const MESSAGE_ID: u32 = 0x5bb8_e511;
const MSG_CONTAINER_ID: u32 = 0x73f1_f8dc;
const RPC_RESULT_ID: u32 = 0xf35c_6d01;
const GZIP_PACKED_ID: u32 = 0x3072_cfa1;
const VECTOR_ID: u32 = 0x1cb5_c415;

/// Reads a boxed TL object, recognising the built-in container
/// constructors (`Message`, `MsgContainer`, `RpcResult`, `GzipPacked`)
/// before consulting the schema registry.
pub fn read_object(buf: &mut Cursor, registry: &Registry) -> Result<Value> {
    let id = buf.read_u32()?;
    read_object_with_id(buf, registry, id)
}

fn read_object_with_id(buf: &mut Cursor, registry: &Registry, id: u32) -> Result<Value> {
    match id {
        MESSAGE_ID => read_message_body(buf, registry, "Message"),
        MSG_CONTAINER_ID => {
            let count = buf.read_i32()?;
            let mut messages = Vec::with_capacity(count.max(0) as usize);
            for _ in 0..count {
                messages.push(read_message_body(buf, registry, "Message")?);
            }
            Ok(Value::Object(Object {
                id,
                name: "MsgContainer".into(),
                fields: vec![
                    ("count".into(), Value::Int(count)),
                    ("messages".into(), Value::Vector(messages)),
                ],
            }))
        }
        RPC_RESULT_ID => {
            let req_msg_id = buf.read_i64()?;
            let result = read_object(buf, registry)?;
            Ok(Value::Object(Object {
                id,
                name: "RpcResult".into(),
                fields: vec![
                    ("req_msg_id".into(), Value::Long(req_msg_id)),
                    ("result".into(), result),
                ],
            }))
        }
        GZIP_PACKED_ID => {
            let packed = buf.read_bytes()?;
            let mut inflated = Vec::new();
            GzDecoder::new(&packed[..])
                .read_to_end(&mut inflated)
                .map_err(|e| Error::Gzip(e.to_string()))?;
            // Transparent: the decoded object replaces GzipPacked entirely.
            read_object(&mut Cursor::from_slice(&inflated), registry)
        }
        _ => match registry.constructor(id) {
            Some(def) => read_definition_fields(buf, registry, def).map(Value::Object),
            None => Err(Error::UnknownConstructor { id }),
        },
    }
}

/// Reads the `{message_id, seq_no, length, body}` triple embedded directly
/// (without its own leading id) inside a `Message` or `MsgContainer` entry.
fn read_message_body(buf: &mut Cursor, registry: &Registry, name: &str) -> Result<Value> {
    let message_id = buf.read_i64()?;
    let seq_no = buf.read_i32()?;
    let length = buf.read_i32()?;
    let mut sub = buf.read_sub_cursor(length.max(0) as usize)?;
    let body = read_object(&mut sub, registry)?;
    Ok(Value::Object(Object {
        id: MESSAGE_ID,
        name: name.into(),
        fields: vec![
            ("message_id".into(), Value::Long(message_id)),
            ("seq_no".into(), Value::Int(seq_no)),
            ("length".into(), Value::Int(length)),
            ("body".into(), body),
        ],
    }))
}

fn read_definition_fields(buf: &mut Cursor, registry: &Registry, def: &Definition) -> Result<Object> {
    let mut flags: HashMap<usize, i32> = HashMap::new();
    let mut fields = Vec::with_capacity(def.params.len());

    for param in &def.params {
        match &param.ty {
            ParamType::Flags => {
                let word = buf.read_i32()?;
                flags.insert(flag_word_index(&param.name), word);
                fields.push((param.name.clone(), Value::Int(word)));
            }
            ParamType::Normal { ty, flag } => {
                if ty.name == "true" {
                    // Pure presence marker: never on the wire, value is
                    // just whether the bit was set.
                    let present = flag
                        .as_ref()
                        .map(|f| bit_set(&flags, f.word, f.bit))
                        .unwrap_or(false);
                    fields.push((param.name.clone(), Value::Bool(present)));
                    continue;
                }

                if let Some(f) = flag {
                    if !bit_set(&flags, f.word, f.bit) {
                        continue; // omitted entirely, no bytes on the wire
                    }
                }

                let value = read_value_of_type(buf, registry, ty)?;
                fields.push((param.name.clone(), value));
            }
        }
    }

    Ok(Object {
        id: def.id,
        name: def.name.clone(),
        fields,
    })
}

fn bit_set(flags: &HashMap<usize, i32>, word: usize, bit: usize) -> bool {
    flags.get(&word).map_or(false, |w| (w >> bit) & 1 == 1)
}

/// `flags`, `flags2`, ... name the word they belong to; the unnumbered
/// form is word 1.
fn flag_word_index(name: &str) -> usize {
    name.strip_prefix("flags")
        .map(|rest| if rest.is_empty() { 1 } else { rest.parse().unwrap_or(1) })
        .unwrap_or(1)
}

fn read_value_of_type(buf: &mut Cursor, registry: &Registry, ty: &ResolvedType) -> Result<Value> {
    match ty.name.as_str() {
        "int" => Ok(Value::Int(buf.read_i32()?)),
        "long" => Ok(Value::Long(buf.read_i64()?)),
        "int128" => Ok(Value::Int128(buf.read_int128()?)),
        "int256" => Ok(Value::Int256(buf.read_int256()?)),
        "double" => Ok(Value::Double(buf.read_f64()?)),
        "string" => Ok(Value::Str(buf.read_string()?)),
        "bytes" => Ok(Value::Bytes(buf.read_bytes()?)),
        "Bool" | "bool" => Ok(Value::Bool(buf.read_bool()?)),
        "Vector" | "vector" => read_vector(buf, registry, ty),
        _ if !ty.bare => {
            // Boxed object: its own id on the wire tells us what it is,
            // regardless of the name the schema declared for this field.
            read_object(buf, registry)
        }
        _ => Err(Error::UnsupportedType {
            name: ty.name.clone(),
        }),
    }
}

fn read_vector(buf: &mut Cursor, registry: &Registry, ty: &ResolvedType) -> Result<Value> {
    if !ty.bare {
        let id = buf.read_u32()?;
        if id != VECTOR_ID {
            return Err(Error::UnexpectedConstructor { id });
        }
    }

    let item_ty = ty.generic_arg.as_deref().ok_or_else(|| Error::UnsupportedType {
        name: "Vector<?>".into(),
    })?;

    let count = buf.read_i32()?;
    let mut items = Vec::with_capacity(count.max(0) as usize);
    for _ in 0..count {
        items.push(read_value_of_type(buf, registry, item_ty)?);
    }
    Ok(Value::Vector(items))
}

#[cfg(test)]
mod tests {
    use super::*;
    use mtmitm_schema::{FlagRef, Param, Schema};
    use std::io::Write;

    fn registry_with(constructors: Vec<Definition>) -> Registry {
        Registry::from_schema(Schema {
            layer: None,
            constructors,
            methods: vec![],
        })
    }

    fn prim(name: &str) -> ResolvedType {
        ResolvedType {
            name: name.into(),
            bare: true,
            generic_arg: None,
        }
    }

    #[test]
    fn reads_simple_object() {
        // a#1 x:int = A;
        let def = Definition {
            id: 1,
            name: "a".into(),
            params: vec![Param {
                name: "x".into(),
                ty: ParamType::Normal { ty: prim("int"), flag: None },
            }],
            ty: "A".into(),
        };
        let registry = registry_with(vec![def]);

        let mut bytes = 1u32.to_le_bytes().to_vec();
        bytes.extend(7i32.to_le_bytes());
        let value = read_object(&mut Cursor::from_slice(&bytes), &registry).unwrap();

        match value {
            Value::Object(obj) => {
                assert_eq!(obj.name, "a");
                assert_eq!(obj.field("x"), Some(&Value::Int(7)));
            }
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn skips_field_when_flag_bit_clear_and_reads_when_set() {
        // a#1 flags:# x:flags.0?int = A;
        let def = Definition {
            id: 1,
            name: "a".into(),
            params: vec![
                Param { name: "flags".into(), ty: ParamType::Flags },
                Param {
                    name: "x".into(),
                    ty: ParamType::Normal {
                        ty: prim("int"),
                        flag: Some(FlagRef { word: 1, bit: 0 }),
                    },
                },
            ],
            ty: "A".into(),
        };
        let registry = registry_with(vec![def]);

        // Bit clear: no bytes for x.
        let mut bytes = 1u32.to_le_bytes().to_vec();
        bytes.extend(0i32.to_le_bytes());
        let value = read_object(&mut Cursor::from_slice(&bytes), &registry).unwrap();
        let Value::Object(obj) = value else { panic!() };
        assert_eq!(obj.field("x"), None);

        // Bit set: x follows.
        let mut bytes = 1u32.to_le_bytes().to_vec();
        bytes.extend(1i32.to_le_bytes());
        bytes.extend(42i32.to_le_bytes());
        let value = read_object(&mut Cursor::from_slice(&bytes), &registry).unwrap();
        let Value::Object(obj) = value else { panic!() };
        assert_eq!(obj.field("x"), Some(&Value::Int(42)));
    }

    #[test]
    fn true_flag_never_consumes_bytes() {
        // a#1 flags:# missed:flags.0?true = A;
        let def = Definition {
            id: 1,
            name: "a".into(),
            params: vec![
                Param { name: "flags".into(), ty: ParamType::Flags },
                Param {
                    name: "missed".into(),
                    ty: ParamType::Normal {
                        ty: prim("true"),
                        flag: Some(FlagRef { word: 1, bit: 0 }),
                    },
                },
            ],
            ty: "A".into(),
        };
        let registry = registry_with(vec![def]);

        let mut bytes = 1u32.to_le_bytes().to_vec();
        bytes.extend(1i32.to_le_bytes()); // bit 0 set, no trailing bytes at all
        let value = read_object(&mut Cursor::from_slice(&bytes), &registry).unwrap();
        let Value::Object(obj) = value else { panic!() };
        assert_eq!(obj.field("missed"), Some(&Value::Bool(true)));
    }

    #[test]
    fn unknown_constructor_is_reported() {
        let registry = registry_with(vec![]);
        let bytes = 0xdeadbeefu32.to_le_bytes();
        let err = read_object(&mut Cursor::from_slice(&bytes), &registry).unwrap_err();
        assert_eq!(err, Error::UnknownConstructor { id: 0xdeadbeef });
    }

    #[test]
    fn reads_boxed_vector_of_ints() {
        let registry = registry_with(vec![]);
        let ty = ResolvedType {
            name: "Vector".into(),
            bare: false,
            generic_arg: Some(Box::new(prim("int"))),
        };
        let mut bytes = VECTOR_ID.to_le_bytes().to_vec();
        bytes.extend(2i32.to_le_bytes());
        bytes.extend(1i32.to_le_bytes());
        bytes.extend(2i32.to_le_bytes());
        let value = read_value_of_type(&mut Cursor::from_slice(&bytes), &registry, &ty).unwrap();
        assert_eq!(value, Value::Vector(vec![Value::Int(1), Value::Int(2)]));
    }

    #[test]
    fn unwraps_gzip_packed_transparently() {
        // a#1 = A; compressed and wrapped in GzipPacked.
        let def = Definition {
            id: 1,
            name: "a".into(),
            params: vec![],
            ty: "A".into(),
        };
        let registry = registry_with(vec![def]);

        let inner = 1u32.to_le_bytes();
        let mut encoder = flate2::write::GzEncoder::new(Vec::new(), flate2::Compression::default());
        encoder.write_all(&inner).unwrap();
        let compressed = encoder.finish().unwrap();

        let mut bytes = GZIP_PACKED_ID.to_le_bytes().to_vec();
        // TL bytes encoding for the compressed payload.
        let len = compressed.len();
        assert!(len < 254);
        bytes.push(len as u8);
        bytes.extend(&compressed);
        let padding = (len + 1) % 4;
        if padding > 0 {
            bytes.extend(std::iter::repeat(0u8).take(4 - padding));
        }

        let value = read_object(&mut Cursor::from_slice(&bytes), &registry).unwrap();
        let Value::Object(obj) = value else { panic!() };
        assert_eq!(obj.name, "a");
    }

    #[test]
    fn reads_message_and_msg_container() {
        let def = Definition {
            id: 1,
            name: "a".into(),
            params: vec![],
            ty: "A".into(),
        };
        let registry = registry_with(vec![def]);

        let mut inner_message = 123i64.to_le_bytes().to_vec(); // message_id
        inner_message.extend(0i32.to_le_bytes()); // seq_no
        inner_message.extend(4i32.to_le_bytes()); // length
        inner_message.extend(1u32.to_le_bytes()); // body: constructor `a`

        let mut bytes = MSG_CONTAINER_ID.to_le_bytes().to_vec();
        bytes.extend(1i32.to_le_bytes()); // count
        bytes.extend(inner_message);

        let value = read_object(&mut Cursor::from_slice(&bytes), &registry).unwrap();
        let Value::Object(container) = value else { panic!() };
        assert_eq!(container.name, "MsgContainer");
        let Some(Value::Vector(messages)) = container.field("messages") else { panic!() };
        assert_eq!(messages.len(), 1);
        let Value::Object(message) = &messages[0] else { panic!() };
        assert_eq!(message.field("message_id"), Some(&Value::Long(123)));
        let Some(Value::Object(body)) = message.field("body") else { panic!() };
        assert_eq!(body.name, "a");
    }
}
