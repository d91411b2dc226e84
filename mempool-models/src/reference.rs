use std::fmt::{Display, Formatter};
use std::net::Ipv4Addr;
use std::ops::Bound::Included;
use std::path::PathBuf;

use nom::bytes::complete::take;
use nom::error::{context, ContextError, ParseError};
use nom::sequence::tuple;
use nom::IResult;
use nom::Parser;
use serde::{Deserialize, Serialize};

use mempool_serialization::{
    Deserializer, SerializeError, Serializer, U64VarIntDeserializer, U64VarIntSerializer,
};

use crate::worker::{LocalId, WorkerId};

/// A distributed reference to an object held by its owning worker.
///
/// Identity is `(owner, id)`. The same `DRef` value may be materialized on
/// any number of workers at once; materializations are what the pool counts,
/// the `DRef` itself is a plain value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DRef {
    /// worker owning the object; never changes
    pub owner: WorkerId,
    /// owner-local identifier; never changes
    pub id: LocalId,
    /// approximate byte footprint of the payload, advisory
    pub size: u64,
}

impl DRef {
    /// The `(owner, id)` pair that identifies this reference.
    pub fn key(&self) -> (WorkerId, LocalId) {
        (self.owner, self.id)
    }
}

impl Display for DRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "DRef({}, {})", self.owner, self.id)
    }
}

/// A reference to a value materialized in a file on some worker's disk.
///
/// `FRef`s are pure values: the pool does not count them and the file lives
/// until it is explicitly deleted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FRef {
    /// IP of a worker with access to the file
    pub host: Ipv4Addr,
    /// path of the file on that host
    pub file: PathBuf,
    /// approximate byte footprint of the decoded payload
    pub size: u64,
}

impl FRef {
    /// Creates an `FRef` for `file` on the worker bound to `host`.
    pub fn new(host: Ipv4Addr, file: PathBuf, size: u64) -> Self {
        Self { host, file, size }
    }
}

impl Display for FRef {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "FRef({}, {})", self.host, self.file.display())
    }
}

/// Serializer for `DRef`
pub struct DRefSerializer {
    u64_serializer: U64VarIntSerializer,
}

impl DRefSerializer {
    /// Creates a new `DRefSerializer`
    pub const fn new() -> Self {
        Self {
            u64_serializer: U64VarIntSerializer::new(),
        }
    }
}

impl Default for DRefSerializer {
    fn default() -> Self {
        Self::new()
    }
}

impl Serializer<DRef> for DRefSerializer {
    fn serialize(&self, value: &DRef, buffer: &mut Vec<u8>) -> Result<(), SerializeError> {
        self.u64_serializer.serialize(&value.owner.0, buffer)?;
        self.u64_serializer.serialize(&value.id.0, buffer)?;
        self.u64_serializer.serialize(&value.size, buffer)?;
        Ok(())
    }
}

/// Deserializer for `DRef`.
///
/// A transport that materializes a `DRef` from bytes holds a bare value: it
/// must hand it to the local pool (`PoolController::adopt`) so the
/// reference is registered at its new site before use.
pub struct DRefDeserializer {
    u64_deserializer: U64VarIntDeserializer,
}

impl DRefDeserializer {
    /// Creates a new `DRefDeserializer`
    pub const fn new() -> Self {
        Self {
            u64_deserializer: U64VarIntDeserializer::new(Included(u64::MIN), Included(u64::MAX)),
        }
    }
}

impl Default for DRefDeserializer {
    fn default() -> Self {
        Self::new()
    }
}

impl Deserializer<DRef> for DRefDeserializer {
    fn deserialize<'a, E: ParseError<&'a [u8]> + ContextError<&'a [u8]>>(
        &self,
        buffer: &'a [u8],
    ) -> IResult<&'a [u8], DRef, E> {
        context(
            "Failed DRef deserialization",
            tuple((
                context("Failed owner deserialization", |input| {
                    self.u64_deserializer.deserialize(input)
                }),
                context("Failed id deserialization", |input| {
                    self.u64_deserializer.deserialize(input)
                }),
                context("Failed size deserialization", |input| {
                    self.u64_deserializer.deserialize(input)
                }),
            )),
        )
        .map(|(owner, id, size)| DRef {
            owner: WorkerId(owner),
            id: LocalId(id),
            size,
        })
        .parse(buffer)
    }
}

/// Serializer for `FRef`
pub struct FRefSerializer {
    u64_serializer: U64VarIntSerializer,
}

impl FRefSerializer {
    /// Creates a new `FRefSerializer`
    pub const fn new() -> Self {
        Self {
            u64_serializer: U64VarIntSerializer::new(),
        }
    }
}

impl Default for FRefSerializer {
    fn default() -> Self {
        Self::new()
    }
}

impl Serializer<FRef> for FRefSerializer {
    fn serialize(&self, value: &FRef, buffer: &mut Vec<u8>) -> Result<(), SerializeError> {
        buffer.extend(value.host.octets());
        let path = value.file.to_str().ok_or_else(|| {
            SerializeError::GeneralError(format!(
                "file path is not valid UTF-8: {}",
                value.file.display()
            ))
        })?;
        self.u64_serializer
            .serialize(&(path.len() as u64), buffer)?;
        buffer.extend(path.as_bytes());
        self.u64_serializer.serialize(&value.size, buffer)?;
        Ok(())
    }
}

/// Deserializer for `FRef`
pub struct FRefDeserializer {
    u64_deserializer: U64VarIntDeserializer,
}

impl FRefDeserializer {
    /// Creates a new `FRefDeserializer`
    pub const fn new() -> Self {
        Self {
            u64_deserializer: U64VarIntDeserializer::new(Included(u64::MIN), Included(u64::MAX)),
        }
    }
}

impl Default for FRefDeserializer {
    fn default() -> Self {
        Self::new()
    }
}

impl Deserializer<FRef> for FRefDeserializer {
    fn deserialize<'a, E: ParseError<&'a [u8]> + ContextError<&'a [u8]>>(
        &self,
        buffer: &'a [u8],
    ) -> IResult<&'a [u8], FRef, E> {
        let (rest, octets) = context("Failed host deserialization", take(4usize)).parse(buffer)?;
        let host = Ipv4Addr::new(octets[0], octets[1], octets[2], octets[3]);
        let (rest, path_len) = context("Failed path length deserialization", |input| {
            self.u64_deserializer.deserialize(input)
        })
        .parse(rest)?;
        let (rest, path_bytes) =
            context("Failed path deserialization", take(path_len as usize)).parse(rest)?;
        let path = std::str::from_utf8(path_bytes).map_err(|_| {
            nom::Err::Error(E::from_error_kind(rest, nom::error::ErrorKind::Verify))
        })?;
        let (rest, size) = context("Failed size deserialization", |input| {
            self.u64_deserializer.deserialize(input)
        })
        .parse(rest)?;
        Ok((
            rest,
            FRef {
                host,
                file: PathBuf::from(path),
                size,
            },
        ))
    }
}
