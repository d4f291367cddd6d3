#![no_main]

use libfuzzer_sys::fuzz_target;
use wsflow::decoder::Decoder;

const MAX_FRAME_SIZE: usize = 64 * 1024;

// Feeds arbitrary bytes straight into the streaming decoder, one arbitrary
// chunk boundary at a time, the way a misbehaving or malicious server's TCP
// segments would arrive. The decoder must never panic and must never leave
// its internal buffer in a state where it keeps growing without bound.
fuzz_target!(|data: &[u8]| {
    let mut decoder = Decoder::new(MAX_FRAME_SIZE);

    for chunk in data.chunks(37) {
        match decoder.decode(chunk) {
            Ok(_frames) => {}
            Err(_err) => {
                // A protocol violation poisons this decoder instance; start
                // fresh rather than feeding more bytes into a decoder that's
                // meant to be torn down by its caller.
                decoder = Decoder::new(MAX_FRAME_SIZE);
            }
        }
    }
});
