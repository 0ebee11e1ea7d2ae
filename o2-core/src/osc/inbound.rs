//! Foreign → internal translation (spec §4.8 "Inbound").
use o2_common::Result;

use crate::clock::ClockBridge;
use crate::message::{Message, Payload};
use crate::wire;

/// Translate one datagram or stream frame received on a bridge port for
/// `service` into an internal message: prepend `/service` to the address(es),
/// recurse through bundle framing applying the clock bridge's OSC offset to
/// the bundle's timestamp, and schedule atomics at that timestamp (or 0.0 —
/// "immediate" — if the foreign message was not bundled).
pub fn translate_inbound(service: &str, raw: &[u8], clock: &ClockBridge) -> Result<Message> {
    let mut msg = wire::decode(raw)?;
    prefix_and_adjust(&mut msg, service, clock, true);
    Ok(msg)
}

fn prefix_and_adjust(msg: &mut Message, service: &str, clock: &ClockBridge, is_outer: bool) {
    match &mut msg.payload {
        Payload::Atomic(atomic) => {
            atomic.address = format!("/{}{}", service, atomic.address);
        }
        Payload::Bundle(messages) => {
            if is_outer {
                msg.timestamp = clock.strip_osc_offset(msg.timestamp);
            }
            for embedded in messages {
                if matches!(embedded.payload, Payload::Atomic(_)) {
                    embedded.timestamp = msg.timestamp;
                }
                prefix_and_adjust(embedded, service, clock, false);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Arg;
    use crate::wire::encode;
    use o2_common::GlobalTime;

    #[test]
    fn atomic_gets_service_prefix_and_immediate_timestamp() {
        let foreign = Message::now("/note", vec![Arg::Int32(60), Arg::Float32(0.5)]);
        let bytes = encode(&foreign).unwrap();
        let clock = ClockBridge::new();

        let internal = translate_inbound("synth", &bytes, &clock).unwrap();
        assert_eq!(internal.address(), Some("/synth/note"));
        assert!(internal.timestamp.is_immediate());
    }

    #[test]
    fn bundle_timestamps_propagate_and_strip_offset() {
        let mut clock = ClockBridge::new();
        clock.osc_time_offset(10.0);

        let a = Message::now("/a", vec![Arg::Int32(1)]);
        let b = Message::now("/b", vec![Arg::Int32(2)]);
        // The foreign sender encoded its bundle at (true_time + offset); our
        // bridge must remove that offset on the way in.
        let foreign = Message::bundle(GlobalTime::new(1010.0), vec![a, b]);
        let bytes = encode(&foreign).unwrap();

        let internal = translate_inbound("remote", &bytes, &clock).unwrap();
        match internal.payload {
            Payload::Bundle(ref msgs) => {
                assert_eq!(msgs.len(), 2);
                for m in msgs {
                    assert!((m.timestamp.as_secs_f64() - 1000.0).abs() < 1e-6);
                }
                assert_eq!(msgs[0].address(), Some("/remote/a"));
            }
            _ => panic!("expected bundle"),
        }
    }
}
