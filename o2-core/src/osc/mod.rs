//! External-protocol bridge (spec §4.8): translates between the internal
//! wire format and the foreign OSC wire, which shares the same codec but
//! applies no `/service` address prefix and no `osc_time_offset`.
pub mod inbound;
pub mod outbound;

pub use inbound::translate_inbound;
pub use outbound::translate_outbound;
