//! Tagged work units exchanged between ranks.
//!
//! Every message kind is a variant of [`Work`], the set is closed and both
//! sides of a connection share it by construction.

mod messages;

use std::fmt::Write as _;

use thiserror::Error;

use crate::{
    serial::{SerialBuffer, SerialError},
    tile::TileColor,
};

pub use messages::{MasterPayload, MasterTileMessage, WriteTileMessage};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum WorkError {
    #[error("unknown message tag {0}")]
    UnknownMessageTag(u64),
    #[error("malformed payload: {0}")]
    Serial(#[from] SerialError),
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}

/// Wire identifiers of the message kinds
#[repr(u64)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandTag {
    WriteTile = 13,
    MasterWriteTileI8 = 14,
    MasterWriteTileF32 = 15,
    MasterWriteTileNone = 16,
}

impl TryFrom<u64> for CommandTag {
    type Error = WorkError;

    fn try_from(value: u64) -> Result<Self, Self::Error> {
        match value {
            13 => Ok(CommandTag::WriteTile),
            14 => Ok(CommandTag::MasterWriteTileI8),
            15 => Ok(CommandTag::MasterWriteTileF32),
            16 => Ok(CommandTag::MasterWriteTileNone),
            _ => Err(WorkError::UnknownMessageTag(value)),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Work {
    /// Partial tile travelling to the rank that owns its region
    WriteTile(WriteTileMessage),
    /// Finished tile travelling to the master
    MasterWriteTile(MasterTileMessage),
}

impl Work {
    pub fn tag(&self) -> CommandTag {
        match self {
            Work::WriteTile(_) => CommandTag::WriteTile,
            Work::MasterWriteTile(msg) => match &msg.color {
                TileColor::None => CommandTag::MasterWriteTileNone,
                TileColor::Rgba8(_) => CommandTag::MasterWriteTileI8,
                TileColor::Rgba32F(_) => CommandTag::MasterWriteTileF32,
            },
        }
    }

    pub fn serialize(&self, buf: &mut SerialBuffer) {
        match self {
            Work::WriteTile(msg) => msg.serialize(buf),
            Work::MasterWriteTile(msg) => msg.serialize(buf),
        }
    }

    pub fn deserialize(tag: CommandTag, buf: &mut SerialBuffer) -> Result<Work, WorkError> {
        let work = match tag {
            CommandTag::WriteTile => Work::WriteTile(WriteTileMessage::deserialize(buf)?),
            CommandTag::MasterWriteTileI8 => {
                Work::MasterWriteTile(MasterTileMessage::deserialize(buf, MasterPayload::Rgba8)?)
            }
            CommandTag::MasterWriteTileF32 => Work::MasterWriteTile(
                MasterTileMessage::deserialize(buf, MasterPayload::Rgba32F)?,
            ),
            CommandTag::MasterWriteTileNone => {
                Work::MasterWriteTile(MasterTileMessage::deserialize(buf, MasterPayload::None)?)
            }
        };
        Ok(work)
    }
}

/// Append one `(tag, payload)` pair at the cursor
pub fn encode(buf: &mut SerialBuffer, work: &Work) {
    buf.put(&(work.tag() as u64));
    work.serialize(buf);
}

/// Read `count` `(tag, payload)` pairs starting at the cursor
pub fn decode_buffer(buf: &mut SerialBuffer, count: usize) -> Result<Vec<Work>, WorkError> {
    let mut works = Vec::with_capacity(count);
    for _ in 0..count {
        let tag = CommandTag::try_from(buf.get::<u64>()?)?;
        works.push(Work::deserialize(tag, buf)?);
    }
    Ok(works)
}

/// Human readable listing of the units in a buffer, for debug logs.
/// Cursor is restored afterwards.
pub fn describe_buffer(buf: &mut SerialBuffer, count: usize) -> String {
    let start = buf.index();
    let mut out = String::new();
    for i in 0..count {
        let at = buf.index();
        let described = buf
            .get::<u64>()
            .map_err(WorkError::from)
            .and_then(CommandTag::try_from)
            .and_then(|tag| Work::deserialize(tag, buf).map(|_| tag));
        match described {
            Ok(tag) => {
                let _ = writeln!(out, "#{i} {tag:?} ({} bytes)", buf.index() - at);
            }
            Err(e) => {
                let _ = writeln!(out, "#{i} unreadable: {e}");
                break;
            }
        }
    }
    buf.set_index(start);
    out
}
