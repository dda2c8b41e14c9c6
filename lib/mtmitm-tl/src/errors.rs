// Copyright 2020 - developers of the `grammers` project.
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

use std::fmt;

/// Errors that can occur while reading a TL object. None of these are
/// fatal to the caller: a message whose body fails to parse is recorded
/// with its raw bytes and `decrypted = false` / `object = null` instead
/// (see the envelope codec's error policy).
#[derive(Clone, Debug, PartialEq)]
pub enum Error {
    /// The end of the buffer was reached earlier than anticipated.
    UnexpectedEof,

    /// A boxed primitive (bool, boxed vector) carried a constructor id
    /// that doesn't match any of its known forms.
    UnexpectedConstructor { id: u32 },

    /// A boxed object's constructor id has no entry in the schema
    /// registry.
    UnknownConstructor { id: u32 },

    /// A field's declared type isn't one this reader knows how to parse
    /// without a constructor id to dispatch on (a bare reference to a
    /// generic or user-defined type other than `vector`).
    UnsupportedType { name: String },

    /// A `GzipPacked` body failed to inflate.
    Gzip(String),
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnexpectedEof => write!(f, "unexpected eof"),
            Self::UnexpectedConstructor { id } => {
                write!(f, "unexpected constructor: {id:#010x}")
            }
            Self::UnknownConstructor { id } => write!(f, "unknown constructor: {id:#010x}"),
            Self::UnsupportedType { name } => write!(f, "unsupported bare type: {name}"),
            Self::Gzip(e) => write!(f, "gzip inflate failed: {e}"),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
