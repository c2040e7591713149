use std::io::Read;
use std::time::Duration;

use crate::dictionary::Dictionary;
use crate::framed::FrameStream;
use crate::pool::{BufferPool, Unpooled};

/// A builder-style struct that configures decompression settings.
/// This is how you open a stream of LZ4 frames.
///
/// Create it using `Default::default()`, then turn it into a stream with [`reader`](Self::reader)
/// or [`reader_with_pool`](Self::reader_with_pool). A stream keeps its own copy of the settings,
/// and they cannot change anymore once the stream has consumed its first byte.
#[derive(Clone, Debug)]
pub struct DecompressionSettings {
    pub(crate) continuous: bool,
    pub(crate) magicless: bool,
    pub(crate) dictionary: Option<Dictionary>,
    pub(crate) poll_interval: Duration,
}

impl Default for DecompressionSettings {
    fn default() -> Self {
        Self {
            continuous: false,
            magicless: false,
            dictionary: None,
            poll_interval: Duration::from_millis(10),
        }
    }
}

impl DecompressionSettings {
    /// In continuous mode a stream keeps going after a frame ends and decodes whatever frames
    /// follow. It also tolerates sources that are still being written to: a source that reports
    /// [`WouldBlock`](std::io::ErrorKind::WouldBlock) is simply asked again later, and running
    /// out of data in the middle of a frame ends the current read instead of failing. The next
    /// read continues the frame once the source has more.
    ///
    /// Without it, the stream ends with the first frame and ignores anything behind it.
    ///
    /// Continuous mode is disabled by default.
    pub fn continuous(&mut self, v: bool) -> &mut Self {
        self.continuous = v;
        self
    }

    /// Magicless frames lack the four magic bytes, usually because an outer format already
    /// says what follows. A magicless stream cannot read regular frames and vice versa,
    /// and it cannot recognize skippable frames.
    ///
    /// Frames have a magic number by default.
    pub fn magicless(&mut self, v: bool) -> &mut Self {
        self.magicless = v;
        self
    }

    /// Decompress with a prepared dictionary. Streams share the dictionary, they don't copy it.
    ///
    /// Frames that name a dictionary id must name this dictionary's id. Frames without an id
    /// (the LZ4 CLI never writes one) are decoded with this dictionary regardless.
    ///
    /// By default, no dictionary is used.
    pub fn dictionary(&mut self, dictionary: &Dictionary) -> &mut Self {
        self.dictionary = Some(dictionary.clone());
        self
    }

    /// Like [`dictionary`](Self::dictionary), but from raw bytes. The id is derived from the
    /// content, see [`Dictionary::new`].
    pub fn dictionary_bytes(&mut self, content: &[u8]) -> &mut Self {
        self.dictionary = Some(Dictionary::new(content));
        self
    }

    /// How long a continuous stream waits before asking a source that had nothing to offer again.
    /// Zero means it only yields its time slice.
    ///
    /// The default is 10ms.
    pub fn poll_interval(&mut self, v: Duration) -> &mut Self {
        self.poll_interval = v;
        self
    }

    pub fn is_continuous(&self) -> bool { self.continuous }
    pub fn is_magicless(&self) -> bool { self.magicless }

    /// Id of the dictionary these settings decompress with, if any.
    pub fn dictionary_id(&self) -> Option<u32> {
        self.dictionary.as_ref().map(Dictionary::id)
    }

    /// Open a stream that allocates its own buffers.
    pub fn reader<R: Read>(&self, source: R) -> FrameStream<R> {
        FrameStream::with_pool(source, self.clone(), Unpooled)
    }

    /// Open a stream that takes its buffers from `pool` and gives them back when it is closed.
    pub fn reader_with_pool<R: Read, P: BufferPool>(&self, source: R, pool: P) -> FrameStream<R, P> {
        FrameStream::with_pool(source, self.clone(), pool)
    }
}
