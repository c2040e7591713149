use byteorder::{ReadBytesExt, LE};
use fehler::{throw, throws};
use std::io::{Cursor, Read};
use thiserror::Error;

/// Errors when decoding a raw LZ4 block.
#[derive(Error, Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum DecodeError {
    /// Expected more bytes, but found none.
    /// Either your input was truncated or you're trying to decompress garbage.
    #[error("the block ended in the middle of a sequence")]
    UnexpectedEnd,
    /// The offset for a deduplication is out of bounds.
    /// This may be caused by a missing or incomplete dictionary.
    #[error("a match points before the start of the available history")]
    InvalidDeduplicationOffset,
    /// Offset zero is not a thing in LZ4, so this is garbage.
    #[error("a match has offset zero")]
    ZeroOffset,
    #[error("the block decompresses to more than {0} bytes")]
    OutputTooLarge(usize),
}
type Error = DecodeError;

/// This is how LZ4 encodes varints.
/// Just keep reading and adding while it's all F
#[throws]
fn read_lsic(initial: u8, cursor: &mut Cursor<&[u8]>) -> usize {
    let mut value = initial as usize;
    if value == 0xF {
        loop {
            let more = cursor.read_u8().or(Err(Error::UnexpectedEnd))?;
            value += more as usize;
            if more != 0xff {
                break;
            }
        }
    }
    value
}

/// Decompress an LZ4-compressed block.
///
/// LZ4 heavily relies on a lookback mechanism where bytes earlier in the output stream are referenced.
/// `prefix` is the data that logically precedes `output`: the tail of the previous blocks of a frame
/// with linked blocks, or the dictionary. It never shows up in `output` itself.
///
/// `output_limit` bounds `output.len()`. A block that would grow beyond it is rejected before
/// anything is allocated for it.
#[throws]
pub fn decompress_raw(input: &[u8], prefix: &[u8], output: &mut Vec<u8>, output_limit: usize) {
    let mut reader = Cursor::new(input);
    loop {
        let token = match reader.read_u8() {
            Ok(x) => x,
            _ => break,
        };

        // read literals
        let literal_length = read_lsic(token >> 4, &mut reader)?;
        let output_pos_pre_literal = output.len();
        if output_pos_pre_literal + literal_length > output_limit {
            throw!(Error::OutputTooLarge(output_limit));
        }
        output.resize(output_pos_pre_literal + literal_length, 0);
        reader.read_exact(&mut output[output_pos_pre_literal..]).or(Err(Error::UnexpectedEnd))?;

        // the last sequence of a block consists of literals only
        if reader.position() as usize == input.len() {
            break;
        }

        // read duplicates
        let offset = reader.read_u16::<LE>().or(Err(Error::UnexpectedEnd))? as usize;
        let match_len = 4 + read_lsic(token & 0xf, &mut reader)?;
        if output.len() + match_len > output_limit {
            throw!(Error::OutputTooLarge(output_limit));
        }
        copy_overlapping(offset, match_len, prefix, output)?;
    }
}

#[throws]
fn copy_overlapping(offset: usize, match_len: usize, prefix: &[u8], output: &mut Vec<u8>) {
    let old_len = output.len();
    match offset {
        0 => throw!(Error::ZeroOffset),
        i if i > old_len => {
            // need prefix for this
            let prefix_needed = i - old_len;
            if prefix_needed > prefix.len() {
                throw!(Error::InvalidDeduplicationOffset);
            }
            let how_many_bytes_from_prefix = std::cmp::min(prefix_needed, match_len);
            output.extend_from_slice(&prefix[prefix.len() - prefix_needed..][..how_many_bytes_from_prefix]);
            let remaining_len = match_len - how_many_bytes_from_prefix;
            if remaining_len != 0 {
                // offset stays the same because our cursor moved forward by the amount of bytes we took from prefix
                copy_overlapping(offset, remaining_len, &[], output)?;
            }
        }

        // fastpath: memset if we repeat the same byte forever
        1 => output.resize(old_len + match_len, output[old_len - 1]),

        o if match_len <= o => {
            // fastpath: nonoverlapping
            // for borrowck reasons we have to extend with zeroes first and then memcpy
            // instead of simply using extend_from_slice
            output.resize(old_len + match_len, 0);
            let (head, tail) = output.split_at_mut(old_len);
            tail.copy_from_slice(&head[old_len - offset..][..match_len]);
        }
        2 | 4 | 8 => {
            // fastpath: overlapping but small
            // build a 16 byte pattern so we can handle 16 bytes per iteration instead of one
            let mut buf = [0u8; 16];
            for chunk in buf.chunks_mut(offset) {
                chunk.copy_from_slice(&output[old_len - offset..][..offset]);
            }
            output.resize(old_len + match_len, 0);
            for target in output[old_len..].chunks_mut(buf.len()) {
                target.copy_from_slice(&buf[..target.len()]);
            }
        }
        _ => {
            // slowest path: copy single bytes
            output.reserve(match_len);
            for i in 0..match_len {
                let b = output[old_len - offset + i];
                output.push(b);
            }
        }
    }
}

/// Decompress all bytes of `input` as a single block without any history.
#[throws]
pub fn decompress(input: &[u8]) -> Vec<u8> {
    let mut vec = Vec::new();
    decompress_raw(input, &[], &mut vec, usize::MAX)?;
    vec
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn aaaaaaaaaaa_lots_of_aaaaaaaaa() {
        assert_eq!(decompress(&[0x11, b'a', 1, 0]).unwrap(), b"aaaaaa");
    }

    #[test]
    fn multiple_repeated_blocks() {
        assert_eq!(
            decompress(&[0x11, b'a', 1, 0, 0x22, b'b', b'c', 2, 0]).unwrap(),
            b"aaaaaabcbcbcbc"
        );
    }

    #[test]
    fn all_literal() {
        assert_eq!(decompress(&[0x30, b'a', b'4', b'9']).unwrap(), b"a49");
    }

    #[test]
    fn offset_oob() {
        assert_eq!(decompress(&[0x10, b'a', 2, 0]), Err(DecodeError::InvalidDeduplicationOffset));
        assert_eq!(decompress(&[0x40, b'a', 1, 0]), Err(DecodeError::UnexpectedEnd));
    }

    #[test]
    fn zero_offset_is_garbage() {
        assert_eq!(decompress(&[0x10, b'a', 0, 0]), Err(DecodeError::ZeroOffset));
    }

    #[test]
    fn half_an_offset() {
        assert_eq!(decompress(&[0x10, b'a', 1]), Err(DecodeError::UnexpectedEnd));
    }

    #[test]
    fn unterminated_length() {
        assert_eq!(decompress(&[0xF0, 0xff]), Err(DecodeError::UnexpectedEnd));
    }

    #[test]
    fn matches_reach_into_prefix() {
        let mut out = Vec::new();
        // no literals, copy 6 bytes starting 4 bytes before the output
        decompress_raw(&[0x02, 4, 0], b"xxwxyz", &mut out, 64).unwrap();
        assert_eq!(out, b"wxyzwx");
    }

    #[test]
    fn output_limit() {
        let mut out = Vec::new();
        assert_eq!(
            decompress_raw(&[0x1F, b'a', 1, 0, 200], &[], &mut out, 100),
            Err(DecodeError::OutputTooLarge(100))
        );
        assert_eq!(
            decompress_raw(&[0x50, 1, 2, 3, 4, 5], &[], &mut out, 4),
            Err(DecodeError::OutputTooLarge(4))
        );
    }
}
