//! Internal → foreign translation (spec §4.8 "Outbound").
use o2_common::{Error, Result};

use crate::clock::ClockBridge;
use crate::message::{Atomic, Message, Payload};
use crate::wire;

/// Translate an internal message dispatched to a bridged `service` into
/// foreign wire bytes: strip the leading `/service`, apply the clock
/// bridge's OSC offset to the outer timestamp, and — for a bundle — clamp
/// every embedded bundle's timestamp to be no earlier than its enclosing
/// bundle's (spec §4.8: "for compatibility with strict foreign implementations").
pub fn translate_outbound(service: &str, msg: &Message, clock: &ClockBridge) -> Result<Vec<u8>> {
    let mut foreign = strip_prefix(msg, service)?;
    foreign.timestamp = clock.apply_osc_offset(foreign.timestamp);
    clamp_embedded(&mut foreign);
    wire::encode(&foreign)
}

fn strip_prefix(msg: &Message, service: &str) -> Result<Message> {
    match &msg.payload {
        Payload::Atomic(atomic) => {
            let prefix = format!("/{}", service);
            let rest = atomic
                .address
                .strip_prefix(prefix.as_str())
                .ok_or(Error::BadAddress)?;
            let rest = if rest.is_empty() { "/" } else { rest };
            Ok(Message {
                timestamp: msg.timestamp,
                transport: msg.transport,
                payload: Payload::Atomic(Atomic::new(rest, atomic.args.clone())),
            })
        }
        Payload::Bundle(messages) => {
            let mut stripped = Vec::with_capacity(messages.len());
            for embedded in messages {
                stripped.push(strip_prefix(embedded, service)?);
            }
            Ok(Message {
                timestamp: msg.timestamp,
                transport: msg.transport,
                payload: Payload::Bundle(stripped),
            })
        }
    }
}

fn clamp_embedded(msg: &mut Message) {
    if let Payload::Bundle(messages) = &mut msg.payload {
        let floor = msg.timestamp;
        for embedded in messages.iter_mut() {
            if embedded.timestamp < floor {
                embedded.timestamp = floor;
            }
            clamp_embedded(embedded);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Arg;
    use crate::wire::decode;
    use o2_common::GlobalTime;

    #[test]
    fn atomic_strips_service_prefix() {
        let msg = Message::now("/remote/note", vec![Arg::Int32(60)]);
        let clock = ClockBridge::new();
        let bytes = translate_outbound("remote", &msg, &clock).unwrap();
        let foreign = decode(&bytes).unwrap();
        assert_eq!(foreign.address(), Some("/note"));
    }

    #[test]
    fn mismatched_service_prefix_is_rejected() {
        let msg = Message::now("/other/note", vec![]);
        let clock = ClockBridge::new();
        assert_eq!(translate_outbound("remote", &msg, &clock), Err(Error::BadAddress));
    }

    #[test]
    fn bundle_applies_offset_and_clamps_embedded_timestamps() {
        let mut clock = ClockBridge::new();
        clock.osc_time_offset(5.0);

        let a = Message::scheduled(GlobalTime::new(1.0), "/remote/a", vec![Arg::Int32(1)]);
        let b = Message::scheduled(GlobalTime::new(2.0), "/remote/b", vec![Arg::Int32(2)]);
        let bundle = Message::bundle(GlobalTime::new(100.0), vec![a, b]);

        let bytes = translate_outbound("remote", &bundle, &clock).unwrap();
        let foreign = decode(&bytes).unwrap();

        match foreign.payload {
            Payload::Bundle(ref msgs) => {
                assert_eq!(msgs.len(), 2);
                assert_eq!(msgs[0].address(), Some("/a"));
            }
            _ => panic!("expected bundle"),
        }
        assert!((foreign.timestamp.as_secs_f64() - 105.0).abs() < 1e-6);
    }
}
