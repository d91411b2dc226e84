//! Serialization primitives shared by all pool crates: the `Serializer` and
//! `Deserializer` traits and the varint number codecs used in every wire and
//! on-disk format.

#![warn(missing_docs)]
#![warn(unused_crate_dependencies)]

use std::fmt::Display;
use std::ops::{Bound, RangeBounds};

use displaydoc::Display as DisplayDoc;
use nom::error::{ContextError, ErrorKind, ParseError};
use nom::IResult;
use thiserror::Error;

/// Serialize error
#[derive(Clone, DisplayDoc, Error, Debug)]
pub enum SerializeError {
    /// Number {0} is too big to be serialized
    NumberTooBig(String),
    /// General error {0}
    GeneralError(String),
}

/// Default deserialization error type: keeps the nom context trace so that
/// failures name the field that could not be decoded.
pub struct DeserializeError<'a> {
    errors: Vec<(&'a [u8], String)>,
}

impl<'a> ParseError<&'a [u8]> for DeserializeError<'a> {
    fn from_error_kind(input: &'a [u8], kind: ErrorKind) -> Self {
        Self {
            errors: vec![(input, format!("{:?}", kind))],
        }
    }

    fn append(input: &'a [u8], kind: ErrorKind, mut other: Self) -> Self {
        other.errors.push((input, format!("{:?}", kind)));
        other
    }
}

impl<'a> ContextError<&'a [u8]> for DeserializeError<'a> {
    fn add_context(input: &'a [u8], ctx: &'static str, mut other: Self) -> Self {
        other.errors.push((input, ctx.to_string()));
        other
    }
}

impl<'a> Display for DeserializeError<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (input, ctx) in self.errors.iter().rev() {
            writeln!(f, "{} at input len {}", ctx, input.len())?;
        }
        Ok(())
    }
}

impl<'a> std::fmt::Debug for DeserializeError<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        Display::fmt(self, f)
    }
}

/// Trait for types that can be serialized to a byte buffer.
pub trait Serializer<T> {
    /// Serialize `value` by appending its encoding to `buffer`.
    fn serialize(&self, value: &T, buffer: &mut Vec<u8>) -> Result<(), SerializeError>;
}

/// Trait for types that can be deserialized from a byte buffer.
pub trait Deserializer<T> {
    /// Deserialize one value from the start of `buffer`,
    /// returning the remaining bytes and the value.
    fn deserialize<'a, E: ParseError<&'a [u8]> + ContextError<&'a [u8]>>(
        &self,
        buffer: &'a [u8],
    ) -> IResult<&'a [u8], T, E>;
}

macro_rules! gen_varint {
    ($($type:ident, $encode_buffer:ident, $ser:ident, $deser:ident, $doc:expr);*) => {
        $(
            #[doc = "Serializer for "]
            #[doc = $doc]
            #[doc = " in unsigned varint form"]
            #[derive(Clone, Default)]
            pub struct $ser;

            impl $ser {
                /// Creates a new varint serializer
                pub const fn new() -> Self {
                    Self
                }
            }

            impl Serializer<$type> for $ser {
                fn serialize(&self, value: &$type, buffer: &mut Vec<u8>) -> Result<(), SerializeError> {
                    buffer.extend_from_slice(unsigned_varint::encode::$type(
                        *value,
                        &mut unsigned_varint::encode::$encode_buffer(),
                    ));
                    Ok(())
                }
            }

            #[doc = "Deserializer for "]
            #[doc = $doc]
            #[doc = " in unsigned varint form, restricted to a range of accepted values"]
            #[derive(Clone)]
            pub struct $deser {
                range: (Bound<$type>, Bound<$type>),
            }

            impl $deser {
                /// Creates a new varint deserializer accepting only values in the given range
                pub const fn new(min: Bound<$type>, max: Bound<$type>) -> Self {
                    Self { range: (min, max) }
                }
            }

            impl Deserializer<$type> for $deser {
                fn deserialize<'a, E: ParseError<&'a [u8]> + ContextError<&'a [u8]>>(
                    &self,
                    buffer: &'a [u8],
                ) -> IResult<&'a [u8], $type, E> {
                    let (rest, value) = unsigned_varint::nom::$type(buffer)
                        .map_err(|_: nom::Err<(&'a [u8], ErrorKind)>| {
                            nom::Err::Error(E::from_error_kind(buffer, ErrorKind::Fail))
                        })?;
                    if !self.range.contains(&value) {
                        return Err(nom::Err::Error(E::from_error_kind(
                            buffer,
                            ErrorKind::Verify,
                        )));
                    }
                    Ok((rest, value))
                }
            }
        )*
    };
}

gen_varint!(
    u32, u32_buffer, U32VarIntSerializer, U32VarIntDeserializer, "`u32`";
    u64, u64_buffer, U64VarIntSerializer, U64VarIntDeserializer, "`u64`"
);
