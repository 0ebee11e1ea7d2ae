//! Per-peer stream/datagram framing (spec §4.6) and the wire envelope
//! [`o2_net::StateMachine`] exchanges with its reactor.
use o2_common::Error;

/// Which socket a message prefers once handed to the dispatcher (spec §3, §4.5).
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Transport {
    /// The per-peer reliable, ordered stream socket.
    Stream,
    /// The shared unreliable datagram socket.
    Datagram,
}

/// Largest datagram payload before a send is forced onto the stream instead
/// (spec §4.5: "oversize datagrams are forced to stream"; default from spec §6).
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 32768;

/// A fully codec-encoded message, tagged with how it should leave the process.
/// This is the `M` type instantiated for [`o2_net::Io`] and
/// [`o2_net::StateMachine::Message`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Envelope {
    /// Stream or datagram.
    pub transport: Transport,
    /// Codec-encoded bytes, without any stream length prefix (the reactor
    /// adds/strips that; see [`encode_frame`]/[`FrameAccumulator`]).
    pub bytes: Vec<u8>,
}

impl Envelope {
    /// Wrap already-encoded bytes for datagram delivery.
    pub fn datagram(bytes: Vec<u8>) -> Self {
        Self {
            transport: Transport::Datagram,
            bytes,
        }
    }

    /// Wrap already-encoded bytes for stream delivery.
    pub fn stream(bytes: Vec<u8>) -> Self {
        Self {
            transport: Transport::Stream,
            bytes,
        }
    }
}

/// Big-endian 32-bit length prefix, then that many bytes (spec §6 "Stream framing").
pub fn encode_frame(body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(4 + body.len());
    out.extend_from_slice(&(body.len() as u32).to_be_bytes());
    out.extend_from_slice(body);
    out
}

/// If `buf` holds at least one complete length-prefixed frame, the number of
/// bytes it occupies (prefix included); otherwise `None` pending more data.
pub fn frame_len(buf: &[u8]) -> Option<usize> {
    if buf.len() < 4 {
        return None;
    }
    let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    let total = 4usize.checked_add(len)?;
    if buf.len() < total {
        None
    } else {
        Some(total)
    }
}

/// Incrementally reassembles length-prefixed stream frames out of raw socket
/// reads (spec §4.6: "on read-readiness, frames are reassembled and handed to
/// the codec"). A peer's connection owns one of these per direction.
#[derive(Default, Debug)]
pub struct FrameAccumulator {
    buf: Vec<u8>,
}

impl FrameAccumulator {
    /// A fresh, empty accumulator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append freshly-read bytes.
    pub fn feed(&mut self, data: &[u8]) {
        self.buf.extend_from_slice(data);
    }

    /// Pop one complete frame's body (length prefix stripped), if available.
    pub fn pop_frame(&mut self) -> Result<Option<Vec<u8>>, Error> {
        let total = match frame_len(&self.buf) {
            Some(total) => total,
            None => {
                // Spec §6 doesn't bound frame size, but an unbounded buffer on a
                // misbehaving peer is still a malformed-message condition we can
                // report rather than grow forever.
                if self.buf.len() >= 4 {
                    let claimed = u32::from_be_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]) as usize;
                    if claimed > MAX_STREAM_FRAME {
                        return Err(Error::MalformedMessage);
                    }
                }
                return Ok(None);
            }
        };
        let body = self.buf[4..total].to_vec();
        self.buf.drain(..total);
        Ok(Some(body))
    }

    /// Whether any bytes are buffered awaiting a complete frame.
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

/// Upper bound on a single stream frame, as a sanity backstop (not part of
/// spec §6, which leaves the stream "unbounded but framed" — this guards
/// against a corrupt length prefix pinning unbounded memory).
const MAX_STREAM_FRAME: usize = 64 * 1024 * 1024;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accumulator_reassembles_frames_split_across_reads() {
        let mut acc = FrameAccumulator::new();
        let frame = encode_frame(b"hello");
        acc.feed(&frame[..3]);
        assert_eq!(acc.pop_frame().unwrap(), None);
        acc.feed(&frame[3..]);
        assert_eq!(acc.pop_frame().unwrap(), Some(b"hello".to_vec()));
        assert!(acc.is_empty());
    }

    #[test]
    fn accumulator_pops_back_to_back_frames() {
        let mut acc = FrameAccumulator::new();
        acc.feed(&encode_frame(b"a"));
        acc.feed(&encode_frame(b"bb"));
        assert_eq!(acc.pop_frame().unwrap(), Some(b"a".to_vec()));
        assert_eq!(acc.pop_frame().unwrap(), Some(b"bb".to_vec()));
        assert_eq!(acc.pop_frame().unwrap(), None);
    }

    #[test]
    fn frame_len_waits_for_full_body() {
        let frame = encode_frame(b"hello world");
        assert_eq!(frame_len(&frame[..4]), None);
        assert_eq!(frame_len(&frame[..frame.len() - 1]), None);
        assert_eq!(frame_len(&frame), Some(frame.len()));
    }
}
