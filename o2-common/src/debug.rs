//! Debug-flags bitmap (spec §6): categories of diagnostic logging a host can enable.
use std::ops::{BitOr, BitOrAssign};

/// Bitmap of debug-logging categories. Mirrors the teacher's hand-rolled
/// `ServiceFlags`: a thin newtype over an integer with named constants and
/// bitwise combinators, rather than a derive-macro bitset.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct DebugFlags(u16);

impl DebugFlags {
    pub const NONE: DebugFlags = DebugFlags(0);
    pub const CONNECTIONS: DebugFlags = DebugFlags(1 << 0);
    pub const RECEIVE_RAW: DebugFlags = DebugFlags(1 << 1);
    pub const SEND_RAW: DebugFlags = DebugFlags(1 << 2);
    pub const DISCOVERY: DebugFlags = DebugFlags(1 << 3);
    pub const TAPS: DebugFlags = DebugFlags(1 << 4);
    pub const SCHEDULER: DebugFlags = DebugFlags(1 << 5);
    pub const MALLOC: DebugFlags = DebugFlags(1 << 6);
    pub const OSC_IN: DebugFlags = DebugFlags(1 << 7);
    pub const OSC_OUT: DebugFlags = DebugFlags(1 << 8);

    /// Every category except [`DebugFlags::MALLOC`] (spec §6: "an 'all' alias
    /// excludes malloc by default").
    pub const ALL: DebugFlags = DebugFlags(0x1FF & !Self::MALLOC.0);

    pub fn has(self, flags: DebugFlags) -> bool {
        self.0 & flags.0 == flags.0
    }

    pub fn add(&mut self, other: DebugFlags) -> DebugFlags {
        self.0 |= other.0;
        *self
    }

    pub fn remove(&mut self, other: DebugFlags) -> DebugFlags {
        self.0 &= !other.0;
        *self
    }

    /// Parse a category string, one letter per category, `a` meaning [`DebugFlags::ALL`].
    pub fn parse(s: &str) -> DebugFlags {
        let mut flags = DebugFlags::NONE;
        for c in s.chars() {
            flags = flags
                | match c {
                    'c' => DebugFlags::CONNECTIONS,
                    'r' => DebugFlags::RECEIVE_RAW,
                    's' => DebugFlags::SEND_RAW,
                    'd' => DebugFlags::DISCOVERY,
                    't' => DebugFlags::TAPS,
                    'k' => DebugFlags::SCHEDULER,
                    'm' => DebugFlags::MALLOC,
                    'o' => DebugFlags::OSC_IN,
                    'O' => DebugFlags::OSC_OUT,
                    'a' => DebugFlags::ALL,
                    _ => DebugFlags::NONE,
                };
        }
        flags
    }
}

impl BitOr for DebugFlags {
    type Output = DebugFlags;

    fn bitor(self, rhs: DebugFlags) -> DebugFlags {
        DebugFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for DebugFlags {
    fn bitor_assign(&mut self, rhs: DebugFlags) {
        self.0 |= rhs.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_excludes_malloc() {
        assert!(!DebugFlags::ALL.has(DebugFlags::MALLOC));
        assert!(DebugFlags::ALL.has(DebugFlags::DISCOVERY));
        assert!(DebugFlags::ALL.has(DebugFlags::OSC_OUT));
    }

    #[test]
    fn parses_category_letters() {
        let flags = DebugFlags::parse("ds");
        assert!(flags.has(DebugFlags::DISCOVERY));
        assert!(flags.has(DebugFlags::SEND_RAW));
        assert!(!flags.has(DebugFlags::TAPS));
    }
}
