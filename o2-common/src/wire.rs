//! Shared 4-byte alignment helpers for the wire codec (spec §4.1, §9 "Padding
//! and alignment" — preserved exactly, tests check byte layouts).

/// Length of a zero-terminated, zero-padded string in wire form: at least one
/// terminating zero byte, then padded up to the next 4-byte boundary.
pub fn padded_string_len(len: usize) -> usize {
    let with_terminator = len + 1;
    (with_terminator + 3) & !3
}

/// Length of a blob's data after zero-padding to a 4-byte boundary. Unlike
/// strings, a blob that is already aligned gets no padding at all.
pub fn padded_blob_len(len: usize) -> usize {
    (len + 3) & !3
}

/// Encode `s` as a zero-terminated, zero-padded wire string.
pub fn write_padded_string(buf: &mut Vec<u8>, s: &str) {
    let total = padded_string_len(s.len());
    let start = buf.len();
    buf.resize(start + total, 0);
    buf[start..start + s.len()].copy_from_slice(s.as_bytes());
}

/// Encode `data` as a zero-padded wire blob, without the length prefix.
pub fn write_padded_blob(buf: &mut Vec<u8>, data: &[u8]) {
    let total = padded_blob_len(data.len());
    let start = buf.len();
    buf.resize(start + total, 0);
    buf[start..start + data.len()].copy_from_slice(data);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_padding_always_has_room_for_terminator() {
        assert_eq!(padded_string_len(0), 4);
        assert_eq!(padded_string_len(3), 4);
        assert_eq!(padded_string_len(4), 8);
        assert_eq!(padded_string_len(7), 8);
    }

    #[test]
    fn blob_padding_can_be_exact() {
        assert_eq!(padded_blob_len(0), 0);
        assert_eq!(padded_blob_len(4), 4);
        assert_eq!(padded_blob_len(5), 8);
    }

    #[test]
    fn write_padded_string_zero_fills() {
        let mut buf = Vec::new();
        write_padded_string(&mut buf, "hi");
        assert_eq!(buf, vec![b'h', b'i', 0, 0]);
    }
}
