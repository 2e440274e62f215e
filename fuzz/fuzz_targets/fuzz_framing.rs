#![no_main]

//! Fuzz target for splitting engine output into datagrams.

use libfuzzer_sys::fuzz_target;

use dtls_mux::read_dgrams_from_buffer;

fuzz_target!(|data: &[u8]| {
    let framed = read_dgrams_from_buffer(data);

    // Nothing is invented or lost silently.
    let total: usize = framed.datagrams.iter().map(|d| d.len()).sum();
    assert_eq!(total + framed.lost, data.len());

    let joined: Vec<u8> = framed.datagrams.concat();
    assert_eq!(&data[..joined.len()], &joined[..]);
});
