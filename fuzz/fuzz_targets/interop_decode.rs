#![no_main]
use libfuzzer_sys::fuzz_target;
use lz4_stream::{decompress_all, FrameStream};
use std::io::{Cursor, Read};

fuzz_target!(|data: &[u8]| {
    let compression_result = reference_compress(data);
    if let Ok(compressed) = compression_result {
        let mut decompressed = Vec::new();
        let mut lz4_reader = FrameStream::new(Cursor::new(&compressed));
        lz4_reader.read_to_end(&mut decompressed).expect("Failed to decompress data compressed by C implementation");
        assert!(data == decompressed.as_slice(), "Decompression result did not match the original input");

        // the same frame twice in a row
        let mut twice = compressed.clone();
        twice.extend_from_slice(&compressed);
        let both = decompress_all(Cursor::new(twice)).expect("Failed to decompress concatenated frames");
        assert!(both.len() == 2 * data.len() && &both[..data.len()] == data && &both[data.len()..] == data);
    }
});

// compress data using the reference lz4 implementation
fn reference_compress(data: &[u8]) -> Result<Vec<u8>, ()> {
    let mut input = std::io::Cursor::new(data);
    let output = std::io::Cursor::new(Vec::new());
    let mut encoder = lz4::EncoderBuilder::new()
        .level(4)
        .build(output).unwrap();
    std::io::copy(&mut input, &mut encoder).unwrap();
    let (output, result) = encoder.finish();
    if result.is_ok() {
        Ok(output.into_inner())
    } else {
        Err(())
    }
}
