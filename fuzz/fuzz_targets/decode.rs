#![no_main]
use libfuzzer_sys::fuzz_target;
use lz4_stream::{DecompressionSettings, StreamState};
use std::io::{Cursor, Read};

fuzz_target!(|data: &[u8]| {
    // first byte picks the settings, the rest is the "compressed" input
    let (mode, input) = match data.split_first() {
        Some((&mode, input)) => (mode, input),
        None => return,
    };
    let mut settings = DecompressionSettings::default();
    settings.continuous(mode & 1 != 0).magicless(mode & 2 != 0);
    if mode & 4 != 0 {
        settings.dictionary_bytes(b"fuzzing dictionary content");
    }

    let mut stream = settings.reader(Cursor::new(input));
    let mut output = Vec::new();
    // we deliberately ignore errors here because random bytes from fuzzer
    // are not valid LZ4 data and so are expected to trigger non-fatal errors
    let _ = stream.read_to_end(&mut output);
    assert!(output.len() as u64 == stream.total_out());
    let _ = stream.close();
    assert!(stream.state() == StreamState::Closed);
});
