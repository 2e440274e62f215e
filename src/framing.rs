use crate::message::RecordHeader;

/// Datagrams split out of an SSL engine's output stream.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct Framed {
    /// One entry per complete record, header included.
    pub datagrams: Vec<Vec<u8>>,
    /// Trailing bytes that did not form a complete record.
    pub lost: usize,
}

/// Split a byte stream of concatenated DTLS records into one datagram per
/// record.
///
/// The walk stops at the first record whose header or declared fragment
/// length runs past the end of `buf`. Those bytes are counted in
/// [`Framed::lost`] and dropped.
pub fn read_dgrams_from_buffer(buf: &[u8]) -> Framed {
    let mut framed = Framed::default();
    let mut rest = buf;

    while !rest.is_empty() {
        let Ok((fragment, header)) = RecordHeader::parse(rest) else {
            break;
        };

        let record_len = RecordHeader::LENGTH + header.length as usize;
        if fragment.len() < header.length as usize {
            break;
        }

        framed.datagrams.push(rest[..record_len].to_vec());
        rest = &rest[record_len..];
    }

    framed.lost = rest.len();
    framed
}
