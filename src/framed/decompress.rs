use byteorder::{ByteOrder, LE};
use fehler::{throw, throws};
use log::{debug, trace};
use std::cmp;
use std::hash::Hasher;
use std::mem;
use thiserror::Error;
use twox_hash::XxHash32;

use super::{FIELD_SIZE, INCOMPRESSIBLE, MAGIC, SKIPPABLE_MAGIC, SKIPPABLE_MASK, WINDOW_SIZE};
use crate::dictionary::Dictionary;
use crate::header::{self, FrameInfo};
use crate::raw;

/// Errors when decompressing an LZ4 frame.
#[derive(Error, Debug)]
pub enum FrameError {
    #[error("the raw LZ4 decompression failed (data corruption?)")]
    CodecError(#[from] raw::DecodeError),
    #[error("invalid header")]
    HeaderParseError(#[from] header::ParseError),
    #[error("wrong magic number in file header: {0:08x}")]
    WrongMagic(u32),
    #[error("the header checksum was invalid")]
    HeaderChecksumFail,
    #[error("a block checksum was invalid")]
    BlockChecksumFail,
    #[error("the frame checksum was invalid")]
    FrameChecksumFail,
    #[error("a block is larger than the block size in the frame header allows")]
    BlockSizeOverflow,
    #[error("the frame header promised {declared} bytes of content but there were {actual}")]
    ContentSizeMismatch { declared: u64, actual: u64 },
    #[error("the frame needs dictionary {expected:08x} but was given {found:08x?}")]
    DictionaryMismatch { expected: u32, found: Option<u32> },
}
type Error = FrameError; // do it this way for better docs

/// What a single [`FrameDecoder::decode`] call did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Decoded {
    /// Bytes taken from the input.
    pub consumed: usize,
    /// Bytes written to the output.
    pub written: usize,
    /// The frame is over and every byte of its content has been written.
    pub frame_ended: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Magic,
    /// Waiting for FLG, which tells us how long the descriptor is.
    DescriptorStart,
    Descriptor(usize),
    SkippableLength,
    Skipping(u64),
    BlockLength,
    Block { len: usize, compressed: bool },
    ContentChecksum,
    Finished,
}

/// The decompression context for LZ4 frames.
///
/// Feed it compressed bytes in pieces of any size, it keeps whatever it cannot use yet.
/// It decodes a single frame and then reports `frame_ended` until [`reset`](Self::reset) is
/// called. Skippable frames in front of a frame are swallowed without a trace.
///
/// The dictionary and whether frames carry a magic number are fixed for the lifetime of the
/// decoder.
pub struct FrameDecoder {
    magicless: bool,
    dictionary: Option<Dictionary>,
    phase: Phase,
    /// Bytes of a field or block that arrived in pieces.
    staging: Vec<u8>,
    info: Option<FrameInfo>,
    content_hasher: Option<XxHash32>,
    carryover_window: Option<Vec<u8>>,
    decoded: u64,
    block: Vec<u8>,
    block_taken: usize,
}

impl FrameDecoder {
    pub fn new(magicless: bool, dictionary: Option<Dictionary>) -> Self {
        FrameDecoder {
            magicless,
            dictionary,
            phase: if magicless { Phase::DescriptorStart } else { Phase::Magic },
            staging: Vec::new(),
            info: None,
            content_hasher: None,
            carryover_window: None,
            decoded: 0,
            block: Vec::new(),
            block_taken: 0,
        }
    }

    fn start_phase(&self) -> Phase {
        if self.magicless {
            Phase::DescriptorStart
        } else {
            Phase::Magic
        }
    }

    /// Forget the current frame and get ready for the next one.
    pub fn reset(&mut self) {
        self.phase = self.start_phase();
        self.staging.clear();
        self.info = None;
        self.content_hasher = None;
        self.carryover_window = None;
        self.decoded = 0;
        self.block.clear();
        self.block_taken = 0;
    }

    /// Descriptor of the current frame, once it has been read.
    pub fn frame_info(&self) -> Option<&FrameInfo> { self.info.as_ref() }

    /// Whether part of a frame has been consumed but the frame is not over yet.
    pub fn in_frame(&self) -> bool {
        match self.phase {
            Phase::Finished => false,
            phase if phase == self.start_phase() => !self.staging.is_empty(),
            _ => true,
        }
    }

    /// Decoded bytes that did not fit into the output yet.
    pub fn pending(&self) -> usize { self.block.len() - self.block_taken }

    /// Decompress as much of `input` into `output` as possible.
    ///
    /// Stops when the output is full, the input is used up or the frame is over.
    /// No progress at all (nothing consumed, nothing written, frame not over) means
    /// the decoder needs more input.
    #[throws]
    pub fn decode(&mut self, input: &[u8], output: &mut [u8]) -> Decoded {
        let mut consumed = 0;
        let mut written = 0;
        let frame_ended = loop {
            if self.block_taken < self.block.len() {
                let n = cmp::min(self.block.len() - self.block_taken, output.len() - written);
                if n == 0 {
                    break false;
                }
                output[written..][..n].copy_from_slice(&self.block[self.block_taken..][..n]);
                self.block_taken += n;
                written += n;
                continue;
            }

            let progressed = match self.phase {
                Phase::Finished => break true,
                Phase::Magic => self.gather(input, &mut consumed, FIELD_SIZE, |me, bytes| {
                    me.on_magic(LE::read_u32(bytes))
                })?,
                Phase::DescriptorStart => match input.get(consumed) {
                    Some(&flg) => {
                        self.phase = Phase::Descriptor(FrameInfo::descriptor_len(flg)?);
                        true
                    }
                    None => false,
                },
                Phase::Descriptor(len) => self.gather(input, &mut consumed, len, Self::on_descriptor)?,
                Phase::SkippableLength => self.gather(input, &mut consumed, FIELD_SIZE, |me, bytes| {
                    me.phase = Phase::Skipping(LE::read_u32(bytes).into());
                    Ok(())
                })?,
                Phase::Skipping(remaining) => {
                    let take = cmp::min(remaining, (input.len() - consumed) as u64);
                    consumed += take as usize;
                    if take == remaining {
                        trace!("skippable frame done");
                        self.phase = self.start_phase();
                        true
                    } else {
                        self.phase = Phase::Skipping(remaining - take);
                        false
                    }
                }
                Phase::BlockLength => self.gather(input, &mut consumed, FIELD_SIZE, |me, bytes| {
                    me.on_block_length(LE::read_u32(bytes))
                })?,
                Phase::Block { len, compressed } => {
                    let needed = len + if self.block_checksums() { FIELD_SIZE } else { 0 };
                    self.gather(input, &mut consumed, needed, |me, bytes| me.on_block(bytes, compressed))?
                }
                Phase::ContentChecksum => self.gather(input, &mut consumed, FIELD_SIZE, |me, bytes| {
                    me.on_content_checksum(LE::read_u32(bytes))
                })?,
            };
            if !progressed {
                break false;
            }
        };

        Decoded { consumed, written, frame_ended }
    }

    /// Hand the next `needed` bytes to `f` as soon as all of them have arrived.
    /// Bytes are only copied aside if they come in pieces. Returns whether `f` ran.
    fn gather<F>(&mut self, input: &[u8], consumed: &mut usize, needed: usize, f: F) -> Result<bool, Error>
    where
        F: FnOnce(&mut Self, &[u8]) -> Result<(), Error>,
    {
        let mut staging = mem::take(&mut self.staging);
        let available = &input[*consumed..];
        let result = if staging.is_empty() && available.len() >= needed {
            *consumed += needed;
            Some(f(self, &available[..needed]))
        } else {
            let take = cmp::min(needed - staging.len(), available.len());
            staging.extend_from_slice(&available[..take]);
            *consumed += take;
            if staging.len() == needed {
                let result = f(self, &staging[..]);
                staging.clear();
                Some(result)
            } else {
                None
            }
        };
        self.staging = staging;

        match result {
            Some(result) => result.map(|()| true),
            None => Ok(false),
        }
    }

    fn block_maxsize(&self) -> usize {
        self.info.as_ref().map_or(0, |info| info.block_maxsize)
    }

    fn block_checksums(&self) -> bool {
        self.info.as_ref().map_or(false, |info| info.flags.block_checksums())
    }

    #[throws]
    fn on_magic(&mut self, magic: u32) {
        if magic == MAGIC {
            self.phase = Phase::DescriptorStart;
        } else if magic & SKIPPABLE_MASK == SKIPPABLE_MAGIC {
            trace!("skipping frame with magic {:08x}", magic);
            self.phase = Phase::SkippableLength;
        } else {
            throw!(Error::WrongMagic(magic));
        }
    }

    #[throws]
    fn on_descriptor(&mut self, descriptor: &[u8]) {
        let (fields, checksum) = descriptor.split_at(descriptor.len() - 1);
        let mut hasher = XxHash32::with_seed(0);
        hasher.write(fields);
        if checksum[0] != (hasher.finish() >> 8) as u8 {
            throw!(Error::HeaderChecksumFail);
        }
        let info = FrameInfo::parse(fields)?;

        // frames without an id take whatever dictionary they are given
        if let Some(expected) = info.dictionary_id {
            match &self.dictionary {
                Some(dictionary) if dictionary.id() == expected => {}
                other => throw!(Error::DictionaryMismatch {
                    expected,
                    found: other.as_ref().map(Dictionary::id),
                }),
            }
        }

        self.carryover_window = if info.flags.independent_blocks() {
            None
        } else {
            let mut window = Vec::with_capacity(WINDOW_SIZE);
            window.extend_from_slice(self.dictionary.as_ref().map_or(&[][..], Dictionary::window));
            Some(window)
        };
        self.content_hasher = if info.flags.content_checksum() {
            Some(XxHash32::with_seed(0))
        } else {
            None
        };
        self.decoded = 0;

        debug!(
            "frame start: {} byte blocks ({}), content size {:?}, dictionary {:?}",
            info.block_maxsize,
            if info.flags.independent_blocks() { "independent" } else { "linked" },
            info.content_size,
            info.dictionary_id,
        );
        self.info = Some(info);
        self.phase = Phase::BlockLength;
    }

    #[throws]
    fn on_block_length(&mut self, block_length: u32) {
        if block_length == 0 {
            if self.content_hasher.is_some() {
                self.phase = Phase::ContentChecksum;
            } else {
                self.finish_frame()?;
            }
            return;
        }

        let compressed = block_length & INCOMPRESSIBLE == 0;
        let len = (block_length & !INCOMPRESSIBLE) as usize;
        if len > self.block_maxsize() {
            throw!(Error::BlockSizeOverflow);
        }
        self.phase = Phase::Block { len, compressed };
    }

    #[throws]
    fn on_block(&mut self, bytes: &[u8], compressed: bool) {
        let checksummed = self.block_checksums();
        let (payload, checksum) = bytes.split_at(bytes.len() - if checksummed { FIELD_SIZE } else { 0 });
        if checksummed {
            let mut hasher = XxHash32::with_seed(0);
            hasher.write(payload);
            if hasher.finish() as u32 != LE::read_u32(checksum) {
                throw!(Error::BlockChecksumFail);
            }
        }

        let block_maxsize = self.block_maxsize();
        self.block.clear();
        self.block_taken = 0;
        if compressed {
            match self.carryover_window.as_ref() {
                Some(window) => raw::decompress_raw(payload, window, &mut self.block, block_maxsize)?,
                None => {
                    let prefix = self.dictionary.as_ref().map_or(&[][..], Dictionary::window);
                    raw::decompress_raw(payload, prefix, &mut self.block, block_maxsize)?
                }
            }
        } else {
            self.block.extend_from_slice(payload);
        }

        if let Some(window) = self.carryover_window.as_mut() {
            slide_window(window, &self.block);
        }
        if let Some(hasher) = self.content_hasher.as_mut() {
            hasher.write(&self.block);
        }
        self.decoded += self.block.len() as u64;
        trace!("block: {} -> {} bytes", payload.len(), self.block.len());

        self.phase = Phase::BlockLength;
    }

    #[throws]
    fn on_content_checksum(&mut self, checksum: u32) {
        if let Some(hasher) = self.content_hasher.take() {
            if hasher.finish() as u32 != checksum {
                throw!(Error::FrameChecksumFail);
            }
        }
        self.finish_frame()?;
    }

    #[throws]
    fn finish_frame(&mut self) {
        if let Some(declared) = self.info.as_ref().and_then(|info| info.content_size) {
            if declared != self.decoded {
                throw!(Error::ContentSizeMismatch { declared, actual: self.decoded });
            }
        }
        debug!("frame end: {} bytes", self.decoded);
        self.phase = Phase::Finished;
    }
}

/// Keep the last 64 KiB of everything decoded so far for the next linked block.
fn slide_window(window: &mut Vec<u8>, output: &[u8]) {
    let outlen = output.len();
    if outlen < WINDOW_SIZE {
        let available_bytes = window.len() + outlen;
        if let Some(surplus_bytes) = available_bytes.checked_sub(WINDOW_SIZE) {
            // remove as many bytes from front as we are replacing
            window.drain(..surplus_bytes);
        }
        window.extend_from_slice(output);
    } else {
        window.clear();
        window.extend_from_slice(&output[outlen - WINDOW_SIZE..]);
    }

    debug_assert!(window.len() <= WINDOW_SIZE);
}

#[cfg(test)]
mod test {
    use super::*;

    fn frame_header(flg: u8, extra: &[u8]) -> Vec<u8> {
        let mut descriptor = vec![flg, 0x40];
        descriptor.extend_from_slice(extra);
        let mut hasher = XxHash32::with_seed(0);
        hasher.write(&descriptor);
        descriptor.push((hasher.finish() >> 8) as u8);

        let mut frame = MAGIC.to_le_bytes().to_vec();
        frame.extend_from_slice(&descriptor);
        frame
    }

    fn stored_block(frame: &mut Vec<u8>, data: &[u8]) {
        frame.extend_from_slice(&(data.len() as u32 | INCOMPRESSIBLE).to_le_bytes());
        frame.extend_from_slice(data);
    }

    fn compressed_block(frame: &mut Vec<u8>, data: &[u8]) {
        frame.extend_from_slice(&(data.len() as u32).to_le_bytes());
        frame.extend_from_slice(data);
    }

    fn end_mark(frame: &mut Vec<u8>) {
        frame.extend_from_slice(&0u32.to_le_bytes());
    }

    fn xxh32(data: &[u8]) -> u32 {
        let mut hasher = XxHash32::with_seed(0);
        hasher.write(data);
        hasher.finish() as u32
    }

    /// Feed `input` in `step` byte pieces through an output buffer of `out_len` bytes.
    fn run(decoder: &mut FrameDecoder, input: &[u8], step: usize, out_len: usize) -> Result<(Vec<u8>, usize), FrameError> {
        let mut decoded = Vec::new();
        let mut out = vec![0; out_len];
        let mut pos = 0;
        loop {
            let end = cmp::min(pos + step, input.len());
            let d = decoder.decode(&input[pos..end], &mut out)?;
            pos += d.consumed;
            decoded.extend_from_slice(&out[..d.written]);
            if d.frame_ended {
                return Ok((decoded, pos));
            }
            assert!(d.consumed + d.written > 0 || pos < input.len(), "frame incomplete");
        }
    }

    fn hello_frame() -> Vec<u8> {
        let mut frame = frame_header(0x60, &[]);
        stored_block(&mut frame, b"hello ");
        stored_block(&mut frame, b"world");
        end_mark(&mut frame);
        frame
    }

    #[test]
    fn byte_by_byte() {
        let frame = hello_frame();
        let mut decoder = FrameDecoder::new(false, None);
        let (decoded, consumed) = run(&mut decoder, &frame, 1, 3).unwrap();
        assert_eq!(decoded, b"hello world");
        assert_eq!(consumed, frame.len());
        assert!(!decoder.in_frame());
        assert_eq!(decoder.frame_info().unwrap().block_maxsize, 64 * 1024);
    }

    #[test]
    fn all_at_once() {
        let mut input = hello_frame();
        input.extend_from_slice(b"trailing garbage");
        let mut decoder = FrameDecoder::new(false, None);
        let (decoded, consumed) = run(&mut decoder, &input, input.len(), 1024).unwrap();
        assert_eq!(decoded, b"hello world");
        assert_eq!(consumed, hello_frame().len());
    }

    #[test]
    fn keeps_reporting_the_end_until_reset() {
        let frame = hello_frame();
        let mut decoder = FrameDecoder::new(false, None);
        run(&mut decoder, &frame, 7, 64).unwrap();
        let again = decoder.decode(b"more", &mut [0; 8]).unwrap();
        assert_eq!(again, Decoded { consumed: 0, written: 0, frame_ended: true });

        decoder.reset();
        assert!(decoder.frame_info().is_none());
        let (decoded, _) = run(&mut decoder, &frame, 5, 64).unwrap();
        assert_eq!(decoded, b"hello world");
    }

    #[test]
    fn pending_output() {
        let frame = hello_frame();
        let mut decoder = FrameDecoder::new(false, None);
        let d = decoder.decode(&frame, &mut [0; 2]).unwrap();
        assert_eq!(d.written, 2);
        assert_eq!(decoder.pending(), 4);
        assert!(decoder.in_frame());
    }

    #[test]
    fn linked_blocks_see_previous_blocks() {
        let mut linked = frame_header(0x40, &[]);
        stored_block(&mut linked, b"abcd");
        compressed_block(&mut linked, &[0x00, 4, 0]);
        end_mark(&mut linked);
        let (decoded, _) = run(&mut FrameDecoder::new(false, None), &linked, 3, 16).unwrap();
        assert_eq!(decoded, b"abcdabcd");

        let mut independent = frame_header(0x60, &[]);
        stored_block(&mut independent, b"abcd");
        compressed_block(&mut independent, &[0x00, 4, 0]);
        end_mark(&mut independent);
        assert!(matches!(
            run(&mut FrameDecoder::new(false, None), &independent, 3, 16),
            Err(FrameError::CodecError(raw::DecodeError::InvalidDeduplicationOffset))
        ));
    }

    #[test]
    fn content_checksum() {
        let mut frame = frame_header(0x64, &[]);
        stored_block(&mut frame, b"checked");
        end_mark(&mut frame);
        let mut broken = frame.clone();
        frame.extend_from_slice(&xxh32(b"checked").to_le_bytes());
        broken.extend_from_slice(&xxh32(b"checkee").to_le_bytes());

        assert_eq!(run(&mut FrameDecoder::new(false, None), &frame, 2, 4).unwrap().0, b"checked");
        assert!(matches!(
            run(&mut FrameDecoder::new(false, None), &broken, 2, 4),
            Err(FrameError::FrameChecksumFail)
        ));
    }

    #[test]
    fn block_checksum() {
        let mut frame = frame_header(0x70, &[]);
        stored_block(&mut frame, b"block");
        frame.extend_from_slice(&xxh32(b"blocc").to_le_bytes());
        end_mark(&mut frame);
        assert!(matches!(
            run(&mut FrameDecoder::new(false, None), &frame, 64, 64),
            Err(FrameError::BlockChecksumFail)
        ));
    }

    #[test]
    fn header_checksum() {
        let mut frame = hello_frame();
        frame[6] ^= 1;
        assert!(matches!(
            run(&mut FrameDecoder::new(false, None), &frame, 64, 64),
            Err(FrameError::HeaderChecksumFail)
        ));
    }

    #[test]
    fn wrong_magic() {
        assert!(matches!(
            FrameDecoder::new(false, None).decode(b"PK\x03\x04", &mut [0; 4]),
            Err(FrameError::WrongMagic(0x04034b50))
        ));
    }

    #[test]
    fn skippable_frames_vanish() {
        let mut input = vec![0x5A, 0x2A, 0x4D, 0x18, 3, 0, 0, 0, b'x', b'y', b'z'];
        input.extend_from_slice(&hello_frame());
        let mut decoder = FrameDecoder::new(false, None);
        let (decoded, consumed) = run(&mut decoder, &input, 2, 64).unwrap();
        assert_eq!(decoded, b"hello world");
        assert_eq!(consumed, input.len());
    }

    #[test]
    fn content_size_is_verified() {
        let mut frame = frame_header(0x68, &5u64.to_le_bytes());
        stored_block(&mut frame, b"abc");
        end_mark(&mut frame);
        assert!(matches!(
            run(&mut FrameDecoder::new(false, None), &frame, 64, 64),
            Err(FrameError::ContentSizeMismatch { declared: 5, actual: 3 })
        ));
    }

    #[test]
    fn oversized_block() {
        let mut frame = frame_header(0x60, &[]);
        frame.extend_from_slice(&(70_000u32 | INCOMPRESSIBLE).to_le_bytes());
        assert!(matches!(
            run(&mut FrameDecoder::new(false, None), &frame, 64, 64),
            Err(FrameError::BlockSizeOverflow)
        ));
    }

    #[test]
    fn dictionary_ids() {
        let dictionary = Dictionary::with_id(0x1234, b"0123456789abcdef");
        let mut frame = frame_header(0x61, &0x1234u32.to_le_bytes());
        compressed_block(&mut frame, &[0x0C, 16, 0, 0x10, b'!']);
        end_mark(&mut frame);

        let (decoded, _) = run(&mut FrameDecoder::new(false, Some(dictionary)), &frame, 5, 64).unwrap();
        assert_eq!(decoded, b"0123456789abcdef!");

        assert!(matches!(
            run(&mut FrameDecoder::new(false, None), &frame, 5, 64),
            Err(FrameError::DictionaryMismatch { expected: 0x1234, found: None })
        ));
        let other = Dictionary::with_id(0x4321, b"0123456789abcdef");
        assert!(matches!(
            run(&mut FrameDecoder::new(false, Some(other)), &frame, 5, 64),
            Err(FrameError::DictionaryMismatch { expected: 0x1234, found: Some(0x4321) })
        ));
    }

    #[test]
    fn magicless() {
        let frame = hello_frame();
        let mut decoder = FrameDecoder::new(true, None);
        assert!(!decoder.in_frame());
        let (decoded, consumed) = run(&mut decoder, &frame[4..], 1, 64).unwrap();
        assert_eq!(decoded, b"hello world");
        assert_eq!(consumed, frame.len() - 4);

        // the first magic byte is not a valid FLG
        assert!(matches!(
            run(&mut FrameDecoder::new(true, None), &frame, 64, 64),
            Err(FrameError::HeaderParseError(header::ParseError::UnsupportedVersion(0)))
        ));
    }

    #[test]
    fn window_slides() {
        let mut window = vec![1u8; WINDOW_SIZE - 2];
        slide_window(&mut window, &[2, 2, 2, 2]);
        assert_eq!(window.len(), WINDOW_SIZE);
        assert_eq!(&window[WINDOW_SIZE - 4..], &[2, 2, 2, 2]);
        assert_eq!(window[0], 1);

        slide_window(&mut window, &vec![3u8; WINDOW_SIZE + 10]);
        assert!(window.iter().all(|&b| b == 3));
        assert_eq!(window.len(), WINDOW_SIZE);
    }
}
