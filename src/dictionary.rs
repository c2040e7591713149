use std::fmt;
use std::hash::Hasher;
use std::sync::Arc;
use twox_hash::XxHash32;

use crate::framed::WINDOW_SIZE;

/// Preset content shared by the compressing and the decompressing party.
///
/// A dictionary is immutable and cheap to clone: every clone refers to the same bytes, so one
/// dictionary can serve any number of streams at once.
///
/// Only the trailing 64 KiB are kept because LZ4 cannot reference anything further back.
/// The id is what frames carry in their descriptor to say which dictionary they need.
/// [`Dictionary::new`] derives it from the content, [`Dictionary::with_id`] lets you pick it.
#[derive(Clone, PartialEq, Eq)]
pub struct Dictionary {
    id: u32,
    window: Arc<[u8]>,
}

impl Dictionary {
    /// The id is the xxHash32 (seed 0) of the full `content`.
    pub fn new(content: &[u8]) -> Self {
        let mut hasher = XxHash32::with_seed(0);
        hasher.write(content);
        Self::with_id(hasher.finish() as u32, content)
    }

    pub fn with_id(id: u32, content: &[u8]) -> Self {
        let start = content.len().saturating_sub(WINDOW_SIZE);
        Dictionary {
            id,
            window: Arc::from(&content[start..]),
        }
    }

    pub fn id(&self) -> u32 { self.id }

    /// The bytes that precede the first decoded byte of a frame.
    pub fn window(&self) -> &[u8] { &self.window }
}

impl fmt::Debug for Dictionary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dictionary")
            .field("id", &format_args!("{:08x}", self.id))
            .field("len", &self.window.len())
            .finish()
    }
}
