//! The raw LZ4 block format.
//!
//! This is the codec underneath the frame format: one call turns one compressed block plus the
//! history that precedes it into decoded bytes. It knows nothing about frames, checksums or
//! where the bytes came from. Everything in [`framed`](crate::framed) treats it as a black box.

mod decompress;

pub use decompress::*;
