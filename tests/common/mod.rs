#![allow(dead_code)]

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::cmp;
use std::hash::Hasher;
use std::io::{self, ErrorKind, Read, Write};
use twox_hash::XxHash32;

pub fn xxh32(data: &[u8]) -> u32 {
    let mut hasher = XxHash32::with_seed(0);
    hasher.write(data);
    hasher.finish() as u32
}

/// Mostly words with some noise in between, so it compresses but not too well.
pub fn sample_data(len: usize, seed: u64) -> Vec<u8> {
    let words: [&[u8]; 6] = [b"frame ", b"block ", b"stream ", b"window ", b"dictionary ", b"lz4 "];
    let mut rng = StdRng::seed_from_u64(seed);
    let mut data = Vec::with_capacity(len + 16);
    while data.len() < len {
        if rng.gen_bool(0.1) {
            data.push(rng.gen());
        } else {
            data.extend_from_slice(words[rng.gen_range(0, words.len())]);
        }
    }
    data.truncate(len);
    data
}

// compress data using the reference lz4 implementation
pub fn reference_compress(data: &[u8], linked: bool, checksum: bool) -> Vec<u8> {
    let mut encoder = lz4::EncoderBuilder::new()
        .level(4)
        .block_size(lz4::BlockSize::Max64KB)
        .block_mode(if linked { lz4::BlockMode::Linked } else { lz4::BlockMode::Independent })
        .checksum(if checksum { lz4::ContentChecksum::ChecksumEnabled } else { lz4::ContentChecksum::NoChecksum })
        .build(Vec::new())
        .expect("could not create reference encoder");
    encoder.write_all(data).expect("reference encoder failed");
    let (compressed, result) = encoder.finish();
    result.expect("reference encoder failed");
    compressed
}

/// Writes frames by hand, for everything the reference encoder cannot do.
pub struct FrameBuilder {
    flg: u8,
    content_size: Option<u64>,
    dictionary_id: Option<u32>,
    magicless: bool,
    blocks: Vec<(u32, Vec<u8>)>,
    content: Vec<u8>,
}

impl FrameBuilder {
    /// Independent 64 KiB blocks, no checksums.
    pub fn new() -> Self {
        FrameBuilder {
            flg: 0x60,
            content_size: None,
            dictionary_id: None,
            magicless: false,
            blocks: Vec::new(),
            content: Vec::new(),
        }
    }

    pub fn linked(mut self) -> Self {
        self.flg &= !0x20;
        self
    }

    pub fn block_checksums(mut self) -> Self {
        self.flg |= 0x10;
        self
    }

    pub fn content_checksum(mut self) -> Self {
        self.flg |= 0x04;
        self
    }

    pub fn content_size(mut self, size: u64) -> Self {
        self.flg |= 0x08;
        self.content_size = Some(size);
        self
    }

    pub fn dictionary_id(mut self, id: u32) -> Self {
        self.flg |= 0x01;
        self.dictionary_id = Some(id);
        self
    }

    pub fn magicless(mut self) -> Self {
        self.magicless = true;
        self
    }

    pub fn stored(mut self, data: &[u8]) -> Self {
        self.blocks.push((data.len() as u32 | 1 << 31, data.to_vec()));
        self.content.extend_from_slice(data);
        self
    }

    /// `decoded` is only needed for the content checksum.
    pub fn compressed(mut self, block: &[u8], decoded: &[u8]) -> Self {
        self.blocks.push((block.len() as u32, block.to_vec()));
        self.content.extend_from_slice(decoded);
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut descriptor = vec![self.flg, 0x40];
        if let Some(size) = self.content_size {
            descriptor.extend_from_slice(&size.to_le_bytes());
        }
        if let Some(id) = self.dictionary_id {
            descriptor.extend_from_slice(&id.to_le_bytes());
        }

        let mut frame = if self.magicless { Vec::new() } else { 0x184D2204u32.to_le_bytes().to_vec() };
        frame.extend_from_slice(&descriptor);
        frame.push((xxh32(&descriptor) >> 8) as u8);
        for (length, payload) in &self.blocks {
            frame.extend_from_slice(&length.to_le_bytes());
            frame.extend_from_slice(payload);
            if self.flg & 0x10 != 0 {
                frame.extend_from_slice(&xxh32(payload).to_le_bytes());
            }
        }
        frame.extend_from_slice(&0u32.to_le_bytes());
        if self.flg & 0x04 != 0 {
            frame.extend_from_slice(&xxh32(&self.content).to_le_bytes());
        }
        frame
    }
}

/// A raw block that copies `len` bytes from `offset` bytes back and then appends `tail` as literals.
pub fn back_reference(offset: u16, len: usize, tail: &[u8]) -> Vec<u8> {
    assert!(len >= 4 && tail.len() < 15);
    let extra = len - 4;
    let mut block = vec![cmp::min(extra, 15) as u8];
    block.extend_from_slice(&offset.to_le_bytes());
    if extra >= 15 {
        let mut rest = extra - 15;
        while rest >= 255 {
            block.push(255);
            rest -= 255;
        }
        block.push(rest as u8);
    }
    block.push((tail.len() as u8) << 4);
    block.extend_from_slice(tail);
    block
}

pub fn skippable_frame(payload: &[u8]) -> Vec<u8> {
    let mut frame = 0x184D2A53u32.to_le_bytes().to_vec();
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(payload);
    frame
}

/// Hands out at most `chunk` bytes per read.
pub struct Trickle<R> {
    pub inner: R,
    pub chunk: usize,
}

impl<R: Read> Read for Trickle<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = cmp::min(buf.len(), self.chunk);
        self.inner.read(&mut buf[..n])
    }
}

/// Fails every other read with `kind`, like a non-blocking socket that is written to slowly.
pub struct Hesitant<R> {
    inner: R,
    kind: ErrorKind,
    ready: bool,
    pub refusals: usize,
}

impl<R> Hesitant<R> {
    pub fn new(inner: R, kind: ErrorKind) -> Self {
        Hesitant { inner, kind, ready: false, refusals: 0 }
    }
}

impl<R: Read> Read for Hesitant<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if !self.ready {
            self.ready = true;
            self.refusals += 1;
            return Err(self.kind.into());
        }
        self.ready = false;
        self.inner.read(buf)
    }
}
