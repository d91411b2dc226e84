use std::ops::Bound::Included;

use nom::bytes::complete::take;
use nom::error::{context, ContextError, ParseError};
use nom::IResult;
use nom::Parser;

use mempool_serialization::{
    Deserializer, SerializeError, Serializer, U64VarIntDeserializer, U64VarIntSerializer,
};

use crate::reference::{FRef, FRefDeserializer, FRefSerializer};

/// The reply of an owner to a dereference request from a peer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchReply {
    /// the payload was in memory on the owner and is shipped directly
    Payload(Vec<u8>),
    /// the payload is spilled on the owner's disk; the caller fetches
    /// the file contents itself through the locality resolver
    Spilled(FRef),
}

/// Serializer for the payload envelope: a single length-prefixed byte
/// string whose decoding yields the original payload. Spilled files and
/// shipped payloads both use this framing.
pub struct PayloadSerializer {
    u64_serializer: U64VarIntSerializer,
}

impl PayloadSerializer {
    /// Creates a new `PayloadSerializer`
    pub const fn new() -> Self {
        Self {
            u64_serializer: U64VarIntSerializer::new(),
        }
    }
}

impl Default for PayloadSerializer {
    fn default() -> Self {
        Self::new()
    }
}

impl Serializer<Vec<u8>> for PayloadSerializer {
    fn serialize(&self, value: &Vec<u8>, buffer: &mut Vec<u8>) -> Result<(), SerializeError> {
        self.u64_serializer
            .serialize(&(value.len() as u64), buffer)?;
        buffer.extend(value);
        Ok(())
    }
}

/// Deserializer for the payload envelope
pub struct PayloadDeserializer {
    u64_deserializer: U64VarIntDeserializer,
}

impl PayloadDeserializer {
    /// Creates a new `PayloadDeserializer`
    pub const fn new() -> Self {
        Self {
            u64_deserializer: U64VarIntDeserializer::new(Included(u64::MIN), Included(u64::MAX)),
        }
    }
}

impl Default for PayloadDeserializer {
    fn default() -> Self {
        Self::new()
    }
}

impl Deserializer<Vec<u8>> for PayloadDeserializer {
    fn deserialize<'a, E: ParseError<&'a [u8]> + ContextError<&'a [u8]>>(
        &self,
        buffer: &'a [u8],
    ) -> IResult<&'a [u8], Vec<u8>, E> {
        let (rest, len) = context("Failed payload length deserialization", |input| {
            self.u64_deserializer.deserialize(input)
        })
        .parse(buffer)?;
        let (rest, bytes) =
            context("Failed payload deserialization", take(len as usize)).parse(rest)?;
        Ok((rest, bytes.to_vec()))
    }
}

/// Serializer for `FetchReply`
pub struct FetchReplySerializer {
    payload_serializer: PayloadSerializer,
    fref_serializer: FRefSerializer,
}

impl FetchReplySerializer {
    /// Creates a new `FetchReplySerializer`
    pub const fn new() -> Self {
        Self {
            payload_serializer: PayloadSerializer::new(),
            fref_serializer: FRefSerializer::new(),
        }
    }
}

impl Default for FetchReplySerializer {
    fn default() -> Self {
        Self::new()
    }
}

impl Serializer<FetchReply> for FetchReplySerializer {
    fn serialize(&self, value: &FetchReply, buffer: &mut Vec<u8>) -> Result<(), SerializeError> {
        match value {
            FetchReply::Payload(payload) => {
                buffer.push(0);
                self.payload_serializer.serialize(payload, buffer)
            }
            FetchReply::Spilled(fref) => {
                buffer.push(1);
                self.fref_serializer.serialize(fref, buffer)
            }
        }
    }
}

/// Deserializer for `FetchReply`
pub struct FetchReplyDeserializer {
    payload_deserializer: PayloadDeserializer,
    fref_deserializer: FRefDeserializer,
}

impl FetchReplyDeserializer {
    /// Creates a new `FetchReplyDeserializer`
    pub const fn new() -> Self {
        Self {
            payload_deserializer: PayloadDeserializer::new(),
            fref_deserializer: FRefDeserializer::new(),
        }
    }
}

impl Default for FetchReplyDeserializer {
    fn default() -> Self {
        Self::new()
    }
}

impl Deserializer<FetchReply> for FetchReplyDeserializer {
    fn deserialize<'a, E: ParseError<&'a [u8]> + ContextError<&'a [u8]>>(
        &self,
        buffer: &'a [u8],
    ) -> IResult<&'a [u8], FetchReply, E> {
        let (rest, tag) = context("Failed tag deserialization", take(1usize)).parse(buffer)?;
        match tag[0] {
            0 => context("Failed shipped payload deserialization", |input| {
                self.payload_deserializer.deserialize(input)
            })
            .map(FetchReply::Payload)
            .parse(rest),
            1 => context("Failed spilled ref deserialization", |input| {
                self.fref_deserializer.deserialize(input)
            })
            .map(FetchReply::Spilled)
            .parse(rest),
            _ => Err(nom::Err::Error(E::from_error_kind(
                buffer,
                nom::error::ErrorKind::Switch,
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mempool_serialization::DeserializeError;
    use std::net::Ipv4Addr;
    use std::path::PathBuf;

    #[test]
    fn test_fetch_reply_ser_deser() {
        let replies = [
            FetchReply::Payload(b"opaque payload bytes".to_vec()),
            FetchReply::Spilled(FRef::new(
                Ipv4Addr::LOCALHOST,
                PathBuf::from(".mempool/s-1/7"),
                20,
            )),
        ];
        for reply in replies {
            let mut buffer = Vec::new();
            FetchReplySerializer::new()
                .serialize(&reply, &mut buffer)
                .unwrap();
            let (rest, out) = FetchReplyDeserializer::new()
                .deserialize::<DeserializeError>(&buffer)
                .unwrap();
            assert!(rest.is_empty());
            assert_eq!(out, reply);
        }
    }
}
