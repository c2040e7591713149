//! The LZ4 frame format, read as a stream of frames.
//!
//! [`FrameDecoder`] is the decompression context: it eats compressed bytes in whatever pieces
//! they arrive and spits out decoded bytes, one frame at a time.
//! [`FrameStream`] is what you normally want: it pulls from a [`Read`](std::io::Read) source,
//! decides what happens at frame boundaries and implements `Read` and `BufRead` itself.

mod decompress;
mod stream;

/// The four magic bytes at the start of every LZ4 frame.
const MAGIC: u32 = 0x184D2204;
/// Skippable frames use sixteen magic numbers, `0x184D2A50` to `0x184D2A5F`.
const SKIPPABLE_MAGIC: u32 = 0x184D2A50;
const SKIPPABLE_MASK: u32 = 0xFFFFFFF0;
/// The frame format sets the high bit of every length field to indicate that the data was not compressed.
const INCOMPRESSIBLE: u32 = 1 << 31;
/// The LZ4 raw format maintains a lookback window of exactly 64KiB.
pub(crate) const WINDOW_SIZE: usize = 64 * 1024;
/// Block length fields and all checksums are four bytes wide.
const FIELD_SIZE: usize = 4;
const DEFAULT_BLOCK_SIZE: usize = 64 * 1024;

pub use decompress::*;
pub use stream::*;

/// How many bytes a stream asks the source for at a time.
///
/// Enough for one block of the default 64 KiB block size together with its length and
/// checksum, so a typical block arrives in one read. Tune your own buffers with this, it
/// is advisory only.
pub fn recommended_input_size() -> usize {
    FIELD_SIZE + DEFAULT_BLOCK_SIZE + FIELD_SIZE
}

/// How many decoded bytes a stream keeps ready for the reader.
pub fn recommended_output_size() -> usize {
    WINDOW_SIZE
}
