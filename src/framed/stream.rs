use fehler::{throw, throws};
use log::{debug, trace, warn};
use std::cmp;
use std::io::{self, BufRead, ErrorKind, Read};
use std::thread;
use thiserror::Error;

use super::{recommended_input_size, recommended_output_size, FrameDecoder, FrameError};
use crate::header::FrameInfo;
use crate::pool::{BufferKind, BufferPool, PoolError, StagingBuffer, Unpooled};
use crate::settings::DecompressionSettings;

/// Errors when reading from a [`FrameStream`].
#[derive(Error, Debug)]
pub enum StreamError {
    #[error("error reading from the input you gave me")]
    Source(#[from] io::Error),
    #[error("the compressed data is corrupt")]
    CorruptFrame(#[source] FrameError),
    #[error("the frame needs dictionary {expected:08x} but was given {found:08x?}")]
    DictionaryMismatch { expected: u32, found: Option<u32> },
    #[error("the input ended in the middle of a frame")]
    TruncatedInput,
    #[error("cannot read {len} bytes at offset {offset} into a buffer of {capacity} bytes")]
    InvalidArgument { offset: usize, len: usize, capacity: usize },
    #[error("could not get a staging buffer")]
    Pool(#[from] PoolError),
    #[error("the stream is closed")]
    Closed,
    #[error("an earlier read failed, all you can do now is close the stream")]
    Poisoned,
    #[error("the settings are frozen once the stream has consumed input")]
    ConfigurationFrozen,
}
type Error = StreamError; // do it this way for better docs

impl StreamError {
    /// Whether the stream is unusable after this error.
    /// Bad arguments and source errors leave it intact, so the call may simply be repeated.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            StreamError::CorruptFrame(_)
                | StreamError::DictionaryMismatch { .. }
                | StreamError::TruncatedInput
                | StreamError::Pool(_)
        )
    }
}

impl From<FrameError> for StreamError {
    fn from(e: FrameError) -> Self {
        match e {
            FrameError::DictionaryMismatch { expected, found } => StreamError::DictionaryMismatch { expected, found },
            e => StreamError::CorruptFrame(e),
        }
    }
}

impl From<StreamError> for io::Error {
    fn from(e: StreamError) -> io::Error {
        let kind = match e {
            StreamError::Source(inner) => return inner,
            StreamError::CorruptFrame(_) | StreamError::DictionaryMismatch { .. } => ErrorKind::InvalidData,
            StreamError::TruncatedInput => ErrorKind::UnexpectedEof,
            StreamError::InvalidArgument { .. } => ErrorKind::InvalidInput,
            _ => ErrorKind::Other,
        };
        io::Error::new(kind, e)
    }
}

/// Where a [`FrameStream`] is in the sequence of frames.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StreamState {
    /// Between frames, or before the first one.
    Idle,
    /// Part of a frame has been consumed.
    InFrame,
    /// A frame was decoded completely. Continuous streams go back to `Idle` from here.
    FrameComplete,
    /// The source ran dry between frames. Final unless the stream is continuous.
    Exhausted,
    /// Buffers are returned, every read fails.
    Closed,
}

struct Buffers {
    input: StagingBuffer,
    output: StagingBuffer,
}

/// The pool together with whatever is checked out of it.
/// Dropping it gives the buffers back, so they return to the pool on every path.
struct Staging<P: BufferPool> {
    pool: P,
    buffers: Option<Buffers>,
}

impl<P: BufferPool> Staging<P> {
    fn buffers(&mut self) -> Result<&mut Buffers, PoolError> {
        let buffers = match self.buffers.take() {
            Some(buffers) => buffers,
            None => {
                let input = StagingBuffer::checkout(&self.pool, BufferKind::Input, recommended_input_size())?;
                let output = match StagingBuffer::checkout(&self.pool, BufferKind::Output, recommended_output_size()) {
                    Ok(output) => output,
                    Err(e) => {
                        if let Err(release) = self.pool.release(BufferKind::Input, input.into_inner()) {
                            warn!("could not return a buffer to the pool: {}", release);
                        }
                        return Err(e);
                    }
                };
                Buffers { input, output }
            }
        };
        Ok(self.buffers.insert(buffers))
    }

    fn release(&mut self) -> Result<(), PoolError> {
        let buffers = match self.buffers.take() {
            Some(buffers) => buffers,
            None => return Ok(()),
        };
        let input = self.pool.release(BufferKind::Input, buffers.input.into_inner());
        let output = self.pool.release(BufferKind::Output, buffers.output.into_inner());
        for result in &[&input, &output] {
            if let Err(e) = result {
                warn!("could not return a buffer to the pool: {}", e);
            }
        }
        input.and(output)
    }
}

impl<P: BufferPool> Drop for Staging<P> {
    fn drop(&mut self) {
        let _ = self.release();
    }
}

/// Decompresses a sequence of LZ4 frames read from `R`.
///
/// Reading is pull-based: every read decodes just enough to hand out some bytes, pulling
/// compressed input from the source as needed. Use the methods here, or treat the stream as any
/// other [`Read`]/[`BufRead`].
///
/// # Sources
///
/// `R` is read sequentially and never seeked. `Ok(0)` from the source means there is no more
/// data, for good unless the stream is continuous. [`ErrorKind::WouldBlock`] means "nothing
/// right now": continuous streams wait ([`poll_interval`](DecompressionSettings::poll_interval))
/// and ask again, other streams pass the error on without any harm done. `Interrupted` reads
/// are retried.
///
/// A source that ends in the middle of a frame yields [`StreamError::TruncatedInput`].
/// A continuous stream reports the end of the data instead and keeps the partial frame: a file
/// that is still being written can be read up to where the writer is, and reading again later
/// picks up what was appended since.
///
/// Pass `&mut source` if you want the source back, or use [`into_inner`](Self::into_inner).
///
/// # Frames
///
/// A stream decodes a single frame and then reports the end of the stream, ignoring whatever
/// follows, unless it is [continuous](DecompressionSettings::continuous): then it decodes frame
/// after frame until the source runs dry.
///
/// # Resources
///
/// The staging buffers are checked out of the pool on the first read and given back exactly once,
/// by [`close`](Self::close) or when the stream is dropped, whichever comes first.
///
/// Every operation takes `&mut self`: a stream belongs to one reader at a time.
pub struct FrameStream<R, P: BufferPool = Unpooled> {
    source: R,
    settings: DecompressionSettings,
    decoder: Option<FrameDecoder>,
    staging: Staging<P>,
    state: StreamState,
    started: bool,
    poisoned: bool,
    frames: u64,
    total_out: u64,
}

impl<R: Read> FrameStream<R> {
    /// A stream with default settings: a single frame, no dictionary.
    pub fn new(source: R) -> Self {
        Self::with_settings(source, DecompressionSettings::default())
    }

    pub fn with_settings(source: R, settings: DecompressionSettings) -> Self {
        Self::with_pool(source, settings, Unpooled)
    }
}

impl<R: Read, P: BufferPool> FrameStream<R, P> {
    pub fn with_pool(source: R, settings: DecompressionSettings, pool: P) -> Self {
        FrameStream {
            source,
            settings,
            decoder: None,
            staging: Staging { pool, buffers: None },
            state: StreamState::Idle,
            started: false,
            poisoned: false,
            frames: 0,
            total_out: 0,
        }
    }

    pub fn state(&self) -> StreamState { self.state }
    pub fn settings(&self) -> &DecompressionSettings { &self.settings }

    /// Replace the settings. Only possible until the first byte has been taken from the source.
    #[throws]
    pub fn reconfigure(&mut self, settings: DecompressionSettings) {
        self.check_open()?;
        if self.started {
            throw!(Error::ConfigurationFrozen);
        }
        self.settings = settings;
        self.decoder = None;
    }

    /// Descriptor of the frame being decoded, once its header has been read.
    pub fn frame_info(&self) -> Option<&FrameInfo> {
        self.decoder.as_ref().and_then(FrameDecoder::frame_info)
    }

    /// Number of frames decoded completely so far.
    pub fn frames_completed(&self) -> u64 { self.frames }

    /// Number of decoded bytes handed out (or skipped) so far.
    pub fn total_out(&self) -> u64 { self.total_out }

    pub fn get_ref(&self) -> &R { &self.source }

    /// Reading from the source directly is a bad idea: the stream will not notice.
    pub fn get_mut(&mut self) -> &mut R { &mut self.source }

    /// Give up on the stream and get the source back. Buffers go back to the pool.
    /// Compressed bytes that were read ahead are lost.
    pub fn into_inner(self) -> R {
        let FrameStream { source, .. } = self;
        source
    }

    /// Read one decoded byte. `None` means the stream is over.
    #[throws]
    pub fn read_byte(&mut self) -> Option<u8> {
        let mut byte = [0u8];
        match self.read_block(&mut byte, 0, 1)? {
            0 => None,
            _ => Some(byte[0]),
        }
    }

    /// Read up to `len` decoded bytes into `dst[offset..offset + len]`.
    ///
    /// Blocks until at least one byte is there, so `0` means the stream is over
    /// (or `len` is zero). Never returns more than the stream has decoded already
    /// plus what a single decode step produces.
    #[throws]
    pub fn read_block(&mut self, dst: &mut [u8], offset: usize, len: usize) -> usize {
        self.check_open()?;
        let end = match offset.checked_add(len) {
            Some(end) if end <= dst.len() => end,
            _ => throw!(Error::InvalidArgument { offset, len, capacity: dst.len() }),
        };
        if len == 0 || !self.fill()? {
            return 0;
        }
        self.take(&mut dst[offset..end])
    }

    /// Decoded bytes that can be read without decoding anything else.
    /// This says nothing about how much the stream will produce in total.
    #[throws]
    pub fn available(&self) -> usize {
        self.check_open()?;
        let buffered = self.staging.buffers.as_ref().map_or(0, |buffers| buffers.output.len());
        let pending = self.decoder.as_ref().map_or(0, FrameDecoder::pending);
        buffered + pending
    }

    /// Decode and throw away up to `n` bytes. Compressed data cannot be seeked.
    /// Skips fewer bytes only if the stream ends first.
    #[throws]
    pub fn skip(&mut self, n: u64) -> u64 {
        self.check_open()?;
        let mut skipped = 0;
        while skipped < n && self.fill()? {
            if let Some(buffers) = self.staging.buffers.as_mut() {
                let take = cmp::min(buffers.output.len() as u64, n - skipped) as usize;
                buffers.output.consume(take);
                skipped += take as u64;
            }
        }
        self.total_out += skipped;
        skipped
    }

    /// Decoding only goes forward, so there is no mark/reset.
    pub fn mark_supported(&self) -> bool {
        false
    }

    /// Release the decompression context and give the buffers back.
    ///
    /// Closing twice is fine, the second time does nothing. Closing works after failed reads too.
    /// If the pool refuses a buffer, the error is returned but the stream is closed regardless.
    #[throws]
    pub fn close(&mut self) {
        if self.state == StreamState::Closed {
            return;
        }
        self.state = StreamState::Closed;
        self.decoder = None;
        debug!("closing stream after {} frames, {} bytes", self.frames, self.total_out);
        self.staging.release()?;
    }

    #[throws]
    fn check_open(&self) {
        if self.state == StreamState::Closed {
            throw!(Error::Closed);
        }
        if self.poisoned {
            throw!(Error::Poisoned);
        }
    }

    fn take(&mut self, dst: &mut [u8]) -> usize {
        let n = match self.staging.buffers.as_mut() {
            Some(buffers) => {
                let n = cmp::min(dst.len(), buffers.output.len());
                dst[..n].copy_from_slice(&buffers.output.filled()[..n]);
                buffers.output.consume(n);
                n
            }
            None => 0,
        };
        self.total_out += n as u64;
        n
    }

    /// Make sure there are decoded bytes in the output buffer.
    /// `false` means there won't be any more.
    #[throws]
    fn fill(&mut self) -> bool {
        self.check_open()?;
        match self.advance() {
            Ok(ready) => ready,
            Err(e) => {
                if e.is_fatal() {
                    debug!("stream failed: {}", e);
                    self.poisoned = true;
                }
                throw!(e);
            }
        }
    }

    #[throws]
    fn advance(&mut self) -> bool {
        let settings = &self.settings;
        let decoder = self
            .decoder
            .get_or_insert_with(|| FrameDecoder::new(settings.magicless, settings.dictionary.clone()));
        let buffers = self.staging.buffers()?;

        loop {
            if !buffers.output.is_empty() {
                break true;
            }

            match self.state {
                StreamState::Closed => throw!(Error::Closed),
                // a continuous source may have grown since
                StreamState::Exhausted if !settings.continuous => break false,
                StreamState::FrameComplete => {
                    if !settings.continuous {
                        debug!("frame done, ignoring whatever follows it");
                        self.state = StreamState::Exhausted;
                        break false;
                    }
                    decoder.reset();
                    self.state = StreamState::Idle;
                }
                StreamState::Idle | StreamState::InFrame | StreamState::Exhausted => {}
            }

            let step = decoder.decode(buffers.input.filled(), buffers.output.spare())?;
            buffers.input.consume(step.consumed);
            buffers.output.commit(step.written);
            if step.frame_ended {
                self.frames += 1;
                self.state = StreamState::FrameComplete;
                continue;
            }
            self.state = if decoder.in_frame() { StreamState::InFrame } else { StreamState::Idle };
            if step.consumed > 0 || step.written > 0 {
                continue;
            }

            // the decoder is starving
            if !pull(&mut self.source, &mut buffers.input, settings, &mut self.started)? {
                if decoder.in_frame() {
                    if !settings.continuous {
                        throw!(Error::TruncatedInput);
                    }
                    // keep the partial frame, the next read asks the source again
                    trace!("source caught up in the middle of a frame");
                    break false;
                }
                debug!("source closed after {} frames", self.frames);
                self.state = StreamState::Exhausted;
                break false;
            }
        }
    }
}

/// Read more compressed bytes into `input`. `false` means the source is closed for good.
#[throws]
fn pull<R: Read>(source: &mut R, input: &mut StagingBuffer, settings: &DecompressionSettings, started: &mut bool) -> bool {
    input.compact();
    debug_assert!(!input.spare().is_empty());
    loop {
        match source.read(input.spare()) {
            Ok(0) => break false,
            Ok(n) => {
                trace!("pulled {} compressed bytes", n);
                input.commit(n);
                *started = true;
                break true;
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) if e.kind() == ErrorKind::WouldBlock && settings.continuous => {
                trace!("source has nothing yet, waiting {:?}", settings.poll_interval);
                if settings.poll_interval.is_zero() {
                    thread::yield_now();
                } else {
                    thread::sleep(settings.poll_interval);
                }
            }
            Err(e) => throw!(e),
        }
    }
}

impl<R: Read, P: BufferPool> Read for FrameStream<R, P> {
    #[throws(io::Error)]
    fn read(&mut self, buf: &mut [u8]) -> usize {
        let len = buf.len();
        self.read_block(buf, 0, len)?
    }
}

impl<R: Read, P: BufferPool> BufRead for FrameStream<R, P> {
    #[throws(io::Error)]
    fn fill_buf(&mut self) -> &[u8] {
        if !self.fill()? {
            return &[][..];
        }
        match self.staging.buffers.as_ref() {
            Some(buffers) => buffers.output.filled(),
            None => &[][..],
        }
    }

    fn consume(&mut self, amt: usize) {
        if let Some(buffers) = self.staging.buffers.as_mut() {
            let amt = cmp::min(amt, buffers.output.len());
            buffers.output.consume(amt);
            self.total_out += amt as u64;
        }
    }
}

/// Convenience wrapper around [`FrameStream`] that decodes every frame in `reader` into a vector.
#[throws]
pub fn decompress_all<R: Read>(reader: R) -> Vec<u8> {
    let mut stream = DecompressionSettings::default().continuous(true).reader(reader);
    let mut plaintext = Vec::new();
    let mut chunk = vec![0; recommended_output_size()];
    loop {
        let len = chunk.len();
        let n = stream.read_block(&mut chunk, 0, len)?;
        if n == 0 {
            break;
        }
        plaintext.extend_from_slice(&chunk[..n]);
    }
    // continuous streams wait for the rest of a frame, but this source is done
    if stream.state() == StreamState::InFrame {
        throw!(Error::TruncatedInput);
    }
    stream.close()?;
    plaintext
}
