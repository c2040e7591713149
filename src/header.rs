#![allow(non_upper_case_globals)]

use bitflags::bitflags;
use byteorder::{ByteOrder, LE};
use fehler::{throw, throws};
use thiserror::Error;

bitflags! {
    /// The FLG byte of a frame descriptor, minus the version bits.
    pub struct Flags: u8 {
        const IndependentBlocks = 0b00100000;
        const BlockChecksums    = 0b00010000;
        const ContentSize       = 0b00001000;
        const ContentChecksum   = 0b00000100;
        const DictionaryId      = 0b00000001;
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseError {
    #[error("block size value {0} is reserved by the frame format")]
    UnimplementedBlocksize(u8),
    #[error("file version {0} not supported")]
    UnsupportedVersion(u8),
    #[error("reserved bits in flags set")]
    ReservedFlagBitsSet,
    #[error("reserved bits in bd set")]
    ReservedBdBitsSet,
}

impl Flags {
    #[throws(ParseError)]
    pub fn parse(i: u8) -> Self {
        let version = i >> 6;
        if version != 1 {
            throw!(ParseError::UnsupportedVersion(version));
        }
        if (i & 0b10) != 0 {
            throw!(ParseError::ReservedFlagBitsSet);
        }

        Flags::from_bits_truncate(i)
    }

    pub fn independent_blocks(&self) -> bool { self.contains(Flags::IndependentBlocks) }
    pub fn block_checksums(&self)    -> bool { self.contains(Flags::BlockChecksums) }
    pub fn content_size(&self)       -> bool { self.contains(Flags::ContentSize) }
    pub fn content_checksum(&self)   -> bool { self.contains(Flags::ContentChecksum) }
    pub fn dictionary_id(&self)      -> bool { self.contains(Flags::DictionaryId) }
}

pub struct BlockDescriptor(pub u8); // ??? or what else could "BD" stand for ???
impl BlockDescriptor {
    #[throws(ParseError)]
    pub fn parse(i: u8) -> Self {
        if (i & 0b10001111) != 0 {
            throw!(ParseError::ReservedBdBitsSet);
        }
        BlockDescriptor(i)
    }

    #[throws(ParseError)]
    pub fn block_maxsize(&self) -> usize {
        let size = (self.0 >> 4) & 0b111;
        if (4..8).contains(&size) {
            1 << (size * 2 + 8)
        } else {
            throw!(ParseError::UnimplementedBlocksize(size))
        }
    }
}

/// What the descriptor of a frame says about it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FrameInfo {
    pub flags: Flags,
    /// Upper bound for the decoded size of every block in the frame.
    pub block_maxsize: usize,
    /// Total decoded size, if the encoder wrote it down.
    pub content_size: Option<u64>,
    /// Id of the dictionary the frame was compressed against, if the encoder wrote it down.
    pub dictionary_id: Option<u32>,
}

impl FrameInfo {
    /// Length of the whole descriptor (FLG up to and including the header checksum).
    /// The FLG byte alone determines it.
    #[throws(ParseError)]
    pub fn descriptor_len(flg: u8) -> usize {
        let flags = Flags::parse(flg)?;
        let mut len = 3;
        if flags.content_size() {
            len += 8;
        }
        if flags.dictionary_id() {
            len += 4;
        }
        len
    }

    /// Parse a descriptor without its trailing checksum byte.
    /// The caller has already made sure `descriptor` is exactly as long as FLG asks for.
    #[throws(ParseError)]
    pub fn parse(descriptor: &[u8]) -> Self {
        let flags = Flags::parse(descriptor[0])?;
        let bd = BlockDescriptor::parse(descriptor[1])?;

        let mut rest = &descriptor[2..];
        let content_size = if flags.content_size() {
            let size = LE::read_u64(rest);
            rest = &rest[8..];
            Some(size)
        } else {
            None
        };
        let dictionary_id = if flags.dictionary_id() {
            Some(LE::read_u32(rest))
        } else {
            None
        };

        FrameInfo {
            flags,
            block_maxsize: bd.block_maxsize()?,
            content_size,
            dictionary_id,
        }
    }
}
