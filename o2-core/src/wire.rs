//! Codec: pack/unpack typed-argument messages, bundle framing, and the
//! 64-bit fixed-point timestamp shared by internal bundles and the OSC bridge
//! (spec §4.1, §9 "padding and alignment" — preserved exactly).
use o2_common::wire::{padded_blob_len, padded_string_len, write_padded_blob, write_padded_string};
use o2_common::{Error, GlobalTime, Result};

use crate::message::{Arg, Atomic, Message, Payload};

/// The literal bundle marker (spec §4.1), matching OSC's own bundle framing.
pub const BUNDLE_TAG: &[u8; 8] = b"#bundle\0";

/// Seconds between the NTP epoch (1900-01-01) and the Unix epoch (1970-01-01).
const NTP_UNIX_DELTA: f64 = 2_208_988_800.0;

/// Encode a [`GlobalTime`] as the 64-bit fixed-point timestamp used on the
/// wire for both internal bundles and OSC bundles: whole seconds since the
/// NTP epoch in the high 32 bits, the fractional part in the low 32 (spec §4.3).
pub fn time_to_fixed64(t: GlobalTime) -> [u8; 8] {
    let ntp = t.as_secs_f64().max(0.0) + NTP_UNIX_DELTA;
    let secs = ntp.floor();
    let frac = ((ntp - secs) * 4_294_967_296.0) as u32;
    let mut out = [0u8; 8];
    out[0..4].copy_from_slice(&(secs as u32).to_be_bytes());
    out[4..8].copy_from_slice(&frac.to_be_bytes());
    out
}

/// Decode a 64-bit fixed-point timestamp back into a [`GlobalTime`].
pub fn time_from_fixed64(bytes: [u8; 8]) -> GlobalTime {
    let secs = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as f64;
    let frac = u32::from_be_bytes([bytes[4], bytes[5], bytes[6], bytes[7]]) as f64;
    GlobalTime::new(secs - NTP_UNIX_DELTA + frac / 4_294_967_296.0)
}

/// Encode `msg` into its wire representation.
pub fn encode(msg: &Message) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    encode_into(msg, &mut buf)?;
    Ok(buf)
}

/// Encode `msg` into a caller-supplied scratch buffer (already cleared),
/// returning it filled. Lets callers route the buffer through a
/// [`crate::pool::BufferPool`] instead of allocating fresh on every message.
pub fn encode_buf(msg: &Message, mut buf: Vec<u8>) -> Result<Vec<u8>> {
    encode_into(msg, &mut buf)?;
    Ok(buf)
}

fn encode_into(msg: &Message, buf: &mut Vec<u8>) -> Result<()> {
    match &msg.payload {
        Payload::Atomic(atomic) => encode_atomic(atomic, buf),
        Payload::Bundle(messages) => encode_bundle(msg.timestamp, messages, buf),
    }
}

fn encode_atomic(atomic: &Atomic, buf: &mut Vec<u8>) -> Result<()> {
    write_padded_string(buf, &atomic.address);
    let mut tag = String::from(",");
    tag.push_str(&atomic.type_tag());
    write_padded_string(buf, &tag);
    for arg in &atomic.args {
        encode_arg(arg, buf)?;
    }
    Ok(())
}

fn encode_arg(arg: &Arg, buf: &mut Vec<u8>) -> Result<()> {
    match arg {
        Arg::Int32(v) => buf.extend_from_slice(&v.to_be_bytes()),
        Arg::Int64(v) => buf.extend_from_slice(&v.to_be_bytes()),
        Arg::Float32(v) => buf.extend_from_slice(&v.to_be_bytes()),
        Arg::Float64(v) => buf.extend_from_slice(&v.to_be_bytes()),
        Arg::String(s) | Arg::Symbol(s) => write_padded_string(buf, s),
        Arg::Blob(data) => {
            buf.extend_from_slice(&(data.len() as u32).to_be_bytes());
            write_padded_blob(buf, data);
        }
        Arg::Time(t) => buf.extend_from_slice(&time_to_fixed64(*t)),
        Arg::Bool(_) | Arg::Nil => {}
        Arg::Array(items) => {
            for item in items {
                encode_arg(item, buf)?;
            }
        }
    }
    Ok(())
}

fn encode_bundle(timestamp: GlobalTime, messages: &[Message], buf: &mut Vec<u8>) -> Result<()> {
    buf.extend_from_slice(BUNDLE_TAG);
    buf.extend_from_slice(&time_to_fixed64(timestamp));
    for embedded in messages {
        let body = encode(embedded)?;
        buf.extend_from_slice(&(body.len() as u32).to_be_bytes());
        buf.extend_from_slice(&body);
    }
    Ok(())
}

/// Decode one wire message. `decode(encode(m)) == m` for every well-formed `m`.
pub fn decode(bytes: &[u8]) -> Result<Message> {
    if bytes.len() >= 8 && &bytes[0..8] == BUNDLE_TAG {
        decode_bundle(bytes)
    } else {
        decode_atomic(bytes)
    }
}

fn decode_bundle(bytes: &[u8]) -> Result<Message> {
    if bytes.len() < 16 {
        return Err(Error::MalformedMessage);
    }
    let mut fixed = [0u8; 8];
    fixed.copy_from_slice(&bytes[8..16]);
    let timestamp = time_from_fixed64(fixed);

    let mut messages = Vec::new();
    let mut pos = 16;
    while pos < bytes.len() {
        if bytes.len() < pos + 4 {
            return Err(Error::MalformedMessage);
        }
        let len = u32::from_be_bytes([bytes[pos], bytes[pos + 1], bytes[pos + 2], bytes[pos + 3]]) as usize;
        pos += 4;
        if bytes.len() < pos + len {
            return Err(Error::MalformedMessage);
        }
        let mut embedded = decode(&bytes[pos..pos + len])?;
        // Only bundles carry their own timestamp on the wire; a bare atomic
        // message inherits the enclosing bundle's (spec §3, §4.1).
        if matches!(embedded.payload, Payload::Atomic(_)) {
            embedded.timestamp = timestamp;
        }
        messages.push(embedded);
        pos += len;
    }
    Ok(Message::bundle(timestamp, messages))
}

fn decode_atomic(bytes: &[u8]) -> Result<Message> {
    let (address, mut pos) = read_padded_string(bytes)?;
    let (tag, tag_len) = read_padded_string(&bytes[pos..])?;
    pos += tag_len;
    let tag = tag.strip_prefix(',').ok_or(Error::MalformedMessage)?;

    let mut args = Vec::with_capacity(tag.len());
    let mut chars = tag.chars().peekable();
    decode_args(&mut chars, bytes, &mut pos, &mut args)?;

    Ok(Message::now(address, args))
}

fn decode_args(
    chars: &mut std::iter::Peekable<std::str::Chars>,
    bytes: &[u8],
    pos: &mut usize,
    out: &mut Vec<Arg>,
) -> Result<()> {
    while let Some(&c) = chars.peek() {
        if c == ']' {
            return Ok(());
        }
        chars.next();
        let arg = match c {
            'i' => {
                let v = read_i32(bytes, *pos)?;
                *pos += 4;
                Arg::Int32(v)
            }
            'h' => {
                let v = read_i64(bytes, *pos)?;
                *pos += 8;
                Arg::Int64(v)
            }
            'f' => {
                let v = read_i32(bytes, *pos)? as u32;
                *pos += 4;
                Arg::Float32(f32::from_bits(v))
            }
            'd' => {
                let v = read_i64(bytes, *pos)? as u64;
                *pos += 8;
                Arg::Float64(f64::from_bits(v))
            }
            's' => {
                let (s, len) = read_padded_string(&bytes[*pos..])?;
                *pos += len;
                Arg::String(s)
            }
            'S' => {
                let (s, len) = read_padded_string(&bytes[*pos..])?;
                *pos += len;
                Arg::Symbol(s)
            }
            'b' => {
                let len = read_i32(bytes, *pos)? as u32 as usize;
                *pos += 4;
                let padded = padded_blob_len(len);
                if bytes.len() < *pos + padded {
                    return Err(Error::MalformedMessage);
                }
                let data = bytes[*pos..*pos + len].to_vec();
                *pos += padded;
                Arg::Blob(data)
            }
            't' => {
                if bytes.len() < *pos + 8 {
                    return Err(Error::MalformedMessage);
                }
                let mut fixed = [0u8; 8];
                fixed.copy_from_slice(&bytes[*pos..*pos + 8]);
                *pos += 8;
                Arg::Time(time_from_fixed64(fixed))
            }
            'T' => Arg::Bool(true),
            'F' => Arg::Bool(false),
            'N' => Arg::Nil,
            '[' => {
                let mut nested = Vec::new();
                decode_args(chars, bytes, pos, &mut nested)?;
                match chars.next() {
                    Some(']') => {}
                    _ => return Err(Error::MalformedMessage),
                }
                Arg::Array(nested)
            }
            _ => return Err(Error::MalformedMessage),
        };
        out.push(arg);
    }
    Ok(())
}

fn read_padded_string(bytes: &[u8]) -> Result<(String, usize)> {
    let end = bytes.iter().position(|&b| b == 0).ok_or(Error::MalformedMessage)?;
    let s = std::str::from_utf8(&bytes[..end])
        .map_err(|_| Error::MalformedMessage)?
        .to_string();
    let total = padded_string_len(end);
    if bytes.len() < total {
        return Err(Error::MalformedMessage);
    }
    Ok((s, total))
}

fn read_i32(bytes: &[u8], pos: usize) -> Result<i32> {
    if bytes.len() < pos + 4 {
        return Err(Error::MalformedMessage);
    }
    Ok(i32::from_be_bytes([bytes[pos], bytes[pos + 1], bytes[pos + 2], bytes[pos + 3]]))
}

fn read_i64(bytes: &[u8], pos: usize) -> Result<i64> {
    if bytes.len() < pos + 8 {
        return Err(Error::MalformedMessage);
    }
    let mut b = [0u8; 8];
    b.copy_from_slice(&bytes[pos..pos + 8]);
    Ok(i64::from_be_bytes(b))
}

/// Rewrite every multi-byte field in an already-decoded argument list between
/// network (big-endian) and host byte order (spec §4.1). Since [`Arg`] values
/// are already host-native Rust numbers once decoded, this is a no-op at the
/// type level; it exists so callers that hold raw bytes (the OSC bridge,
/// which re-emits byte spans without fully decoding them) have one place to
/// do the swap, and so a malformed type tag surfaces the same error the C
/// implementation's `swap_endian` would.
pub fn swap_endian(bytes: &mut [u8], type_tag: &str, to_network: bool) -> Result<()> {
    let _ = to_network; // swap is its own inverse
    let mut pos = 0usize;
    let mut chars = type_tag.chars().peekable();
    swap_endian_fields(&mut chars, bytes, &mut pos)
}

fn swap_endian_fields(
    chars: &mut std::iter::Peekable<std::str::Chars>,
    bytes: &mut [u8],
    pos: &mut usize,
) -> Result<()> {
    while let Some(&c) = chars.peek() {
        if c == ']' {
            return Ok(());
        }
        chars.next();
        match c {
            'i' | 'f' => {
                if bytes.len() < *pos + 4 {
                    return Err(Error::MalformedMessage);
                }
                bytes[*pos..*pos + 4].reverse();
                *pos += 4;
            }
            'h' | 'd' | 't' => {
                if bytes.len() < *pos + 8 {
                    return Err(Error::MalformedMessage);
                }
                bytes[*pos..*pos + 8].reverse();
                *pos += 8;
            }
            's' | 'S' => {
                let (_, len) = read_padded_string(&bytes[*pos..])?;
                *pos += len;
            }
            'b' => {
                if bytes.len() < *pos + 4 {
                    return Err(Error::MalformedMessage);
                }
                let len = u32::from_be_bytes([bytes[*pos], bytes[*pos + 1], bytes[*pos + 2], bytes[*pos + 3]]) as usize;
                bytes[*pos..*pos + 4].reverse();
                *pos += 4 + padded_blob_len(len);
            }
            'T' | 'F' | 'N' => {}
            '[' => {
                swap_endian_fields(chars, bytes, pos)?;
                match chars.next() {
                    Some(']') => {}
                    _ => return Err(Error::MalformedMessage),
                }
            }
            _ => return Err(Error::MalformedMessage),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn atomic_round_trips() {
        let msg = Message::now(
            "/synth/note",
            vec![Arg::Int32(60), Arg::Float32(0.5), Arg::String("legato".into())],
        );
        let bytes = encode(&msg).unwrap();
        let decoded = decode(&bytes).unwrap();
        assert_eq!(decoded, msg);
    }

    #[test]
    fn bundle_round_trips_and_frames_correctly() {
        let inner_a = Message::now("/a", vec![Arg::Int32(1)]);
        let inner_b = Message::now("/b", vec![Arg::Int32(2)]);
        let len_a = encode(&inner_a).unwrap().len();
        let len_b = encode(&inner_b).unwrap().len();

        let bundle = Message::bundle(GlobalTime::new(1000.0), vec![inner_a, inner_b]);
        let bytes = encode(&bundle).unwrap();

        // spec §8: bundle length == 16 + sum(4 + len(embedded_i))
        assert_eq!(bytes.len(), 16 + (4 + len_a) + (4 + len_b));
        assert_eq!(&bytes[0..8], BUNDLE_TAG);

        let decoded = decode(&bytes).unwrap();
        match decoded.payload {
            Payload::Bundle(ref msgs) => assert_eq!(msgs.len(), 2),
            _ => panic!("expected bundle"),
        }
    }

    #[test]
    fn nested_bundle_round_trips() {
        // A bare message only carries its own timestamp when nested in a
        // bundle, where it inherits the bundle's (spec §3, §4.1) — so a
        // well-formed fixture gives the leaf the same timestamp as its bundle.
        let leaf = Message::scheduled(GlobalTime::new(5.0), "/leaf", vec![Arg::Bool(true)]);
        let inner = Message::bundle(GlobalTime::new(5.0), vec![leaf]);
        let outer = Message::bundle(GlobalTime::new(5.0), vec![inner]);
        let bytes = encode(&outer).unwrap();
        assert_eq!(decode(&bytes).unwrap(), outer);
    }

    #[test]
    fn truncated_type_tag_is_malformed() {
        // Type tag claims an `i` but no bytes follow it.
        let mut buf = Vec::new();
        write_padded_string(&mut buf, "/x");
        write_padded_string(&mut buf, ",i");
        assert_eq!(decode(&buf), Err(Error::MalformedMessage));
    }

    #[test]
    fn fixed64_round_trips_through_ntp_epoch() {
        let t = GlobalTime::new(1_700_000_000.25);
        let fixed = time_to_fixed64(t);
        let back = time_from_fixed64(fixed);
        assert!((back.as_secs_f64() - t.as_secs_f64()).abs() < 1e-6);
    }

    #[test]
    fn array_args_round_trip() {
        let msg = Message::now(
            "/mix",
            vec![Arg::Array(vec![Arg::Int32(1), Arg::Int32(2), Arg::Nil])],
        );
        let bytes = encode(&msg).unwrap();
        assert_eq!(decode(&bytes).unwrap(), msg);
    }
}
