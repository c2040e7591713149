//! Streaming decompression of LZ4 frames.
//!
//! Wrap any [`Read`](std::io::Read) that produces LZ4 frames in a [`FrameStream`] and read the
//! decoded bytes back out of it, a byte or a block at a time, without ever holding a whole frame
//! in memory:
//!
//! ```no_run
//! use lz4_stream::DecompressionSettings;
//! use std::fs::File;
//! use std::io::Read;
//!
//! let mut stream = DecompressionSettings::default()
//!     .continuous(true)
//!     .reader(File::open("log.lz4")?);
//! let mut text = String::new();
//! stream.read_to_string(&mut text)?;
//! stream.close()?;
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! What happens at frame boundaries, dictionaries and magicless frames are configured with
//! [`DecompressionSettings`]. Staging buffers can come from a shared [`pool`].

#![forbid(unsafe_code)]

pub mod raw;
pub mod framed;
pub mod pool;
mod header;
mod dictionary;
mod settings;

pub use dictionary::Dictionary;
pub use framed::{decompress_all, FrameStream, StreamError, StreamState};
pub use header::{Flags, FrameInfo, ParseError};
pub use settings::DecompressionSettings;
