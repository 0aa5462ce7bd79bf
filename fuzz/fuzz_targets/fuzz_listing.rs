#![no_main]
#[cfg(not(windows))]
use libfuzzer_sys::fuzz_target;
#[cfg(not(windows))]
use sefile::{format, listing::DirectoryListing};

#[cfg(not(windows))]
fuzz_target!(|data: &[u8]| {
    if data.len() < 2 {
        return;
    }

    // First two bytes are the reported length; it may lie about the buffer.
    let (len_bytes, rest) = data.split_at(2);
    let reported = u16::from_le_bytes([len_bytes[0], len_bytes[1]]) as usize;
    let listing = DirectoryListing::parse(rest, reported);
    assert!(listing.len() <= reported.min(rest.len()));

    // The same bytes as an encrypted file header: must never panic.
    let mut reader = rest;
    if let Ok((header, raw)) = format::FileHeader::read_from(&mut reader) {
        assert_eq!(raw.len(), format::FILE_HEADER_FIXED_LEN + header.encrypted_name.len());
        assert_eq!(header.encode().ok().as_deref(), Some(&raw[..]));
    }
    let _ = format::Descriptor::parse(rest);
});
