//! Typed message arguments and the atomic/bundle message model (spec §3, §4.1).
use o2_common::GlobalTime;

use crate::transport::Transport;

/// A single typed argument. The type-tag character each variant serializes
/// under is given by [`Arg::type_tag`].
#[derive(Clone, Debug, PartialEq)]
pub enum Arg {
    /// `i` — 32-bit integer.
    Int32(i32),
    /// `h` — 64-bit integer.
    Int64(i64),
    /// `f` — 32-bit float.
    Float32(f32),
    /// `d` — 64-bit float.
    Float64(f64),
    /// `s` — zero-terminated, zero-padded string.
    String(String),
    /// `S` — symbol; wire-identical to a string, distinguished only in the type tag.
    Symbol(String),
    /// `b` — length-prefixed, zero-padded blob.
    Blob(Vec<u8>),
    /// `t` — a timestamp argument (distinct from a message's own timestamp field).
    Time(GlobalTime),
    /// `T`/`F` — boolean; carries no payload bytes, only a type-tag character.
    Bool(bool),
    /// `N` — nil; carries no payload bytes.
    Nil,
    /// `[`...`]` — a nested array of arguments.
    Array(Vec<Arg>),
}

impl Arg {
    /// The type-tag character(s) this argument contributes to a message's tag string.
    pub fn type_tag(&self) -> String {
        match self {
            Arg::Int32(_) => "i".to_string(),
            Arg::Int64(_) => "h".to_string(),
            Arg::Float32(_) => "f".to_string(),
            Arg::Float64(_) => "d".to_string(),
            Arg::String(_) => "s".to_string(),
            Arg::Symbol(_) => "S".to_string(),
            Arg::Blob(_) => "b".to_string(),
            Arg::Time(_) => "t".to_string(),
            Arg::Bool(true) => "T".to_string(),
            Arg::Bool(false) => "F".to_string(),
            Arg::Nil => "N".to_string(),
            Arg::Array(items) => {
                let mut tag = String::from("[");
                for item in items {
                    tag.push_str(&item.type_tag());
                }
                tag.push(']');
                tag
            }
        }
    }
}

/// Build the full type-tag string for an argument list, per spec §4.1 (the
/// codec stores type-tag and argument count consistently — spec §3 invariant).
pub fn type_tag_string(args: &[Arg]) -> String {
    let mut tag = String::new();
    for arg in args {
        tag.push_str(&arg.type_tag());
    }
    tag
}

/// A non-bundle message: an address plus its typed arguments.
#[derive(Clone, Debug, PartialEq)]
pub struct Atomic {
    /// Full address, eg. `/synth/note`.
    pub address: String,
    /// Typed arguments.
    pub args: Vec<Arg>,
}

impl Atomic {
    /// Construct a new atomic message body.
    pub fn new(address: impl Into<String>, args: Vec<Arg>) -> Self {
        Self {
            address: address.into(),
            args,
        }
    }

    /// The type-tag string implied by this message's arguments (spec §3:
    /// "a message's type-tag count equals the argument count in its payload").
    pub fn type_tag(&self) -> String {
        type_tag_string(&self.args)
    }
}

/// The payload of a [`Message`]: either a single address/args pair, or a
/// bundle of embedded messages sharing one outer timestamp (spec §3, §4.1).
#[derive(Clone, Debug, PartialEq)]
pub enum Payload {
    /// A single addressed message.
    Atomic(Atomic),
    /// A bundle: each embedded message is itself a complete [`Message`],
    /// recursively bundleable.
    Bundle(Vec<Message>),
}

/// A message in flight: a global timestamp, a payload, and the transport it
/// prefers once it reaches the dispatcher (spec §3, §4.5).
#[derive(Clone, Debug, PartialEq)]
pub struct Message {
    /// `0.0` means "deliver immediately" (spec §3).
    pub timestamp: GlobalTime,
    /// Atomic or bundle payload.
    pub payload: Payload,
    /// Preferred transport once routed to a remote peer.
    pub transport: Transport,
}

impl Message {
    /// Construct an atomic message to be delivered immediately.
    pub fn now(address: impl Into<String>, args: Vec<Arg>) -> Self {
        Self {
            timestamp: GlobalTime::ZERO,
            payload: Payload::Atomic(Atomic::new(address, args)),
            transport: Transport::Datagram,
        }
    }

    /// Construct an atomic message scheduled for `timestamp`.
    pub fn scheduled(timestamp: GlobalTime, address: impl Into<String>, args: Vec<Arg>) -> Self {
        Self {
            timestamp,
            payload: Payload::Atomic(Atomic::new(address, args)),
            transport: Transport::Datagram,
        }
    }

    /// Construct a bundle of `messages`, all logically timestamped `timestamp`.
    pub fn bundle(timestamp: GlobalTime, messages: Vec<Message>) -> Self {
        Self {
            timestamp,
            payload: Payload::Bundle(messages),
            transport: Transport::Datagram,
        }
    }

    /// Request delivery over the reliable stream rather than the datagram socket.
    pub fn via_stream(mut self) -> Self {
        self.transport = Transport::Stream;
        self
    }

    /// The address this message (or, for a bundle, doesn't have one — `None`) targets.
    pub fn address(&self) -> Option<&str> {
        match &self.payload {
            Payload::Atomic(a) => Some(a.address.as_str()),
            Payload::Bundle(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_tag_matches_argument_shape() {
        let atomic = Atomic::new(
            "/synth/note",
            vec![Arg::Int32(60), Arg::Float32(0.5), Arg::Bool(true)],
        );
        assert_eq!(atomic.type_tag(), "ifT");
    }

    #[test]
    fn nested_array_tag_is_bracketed() {
        let tag = type_tag_string(&[Arg::Int32(1), Arg::Array(vec![Arg::Int32(2), Arg::Nil])]);
        assert_eq!(tag, "i[iN]");
    }
}
