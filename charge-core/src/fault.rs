//! Process-wide fault registry values.
//!
//! The live registry is a single atomic byte owned by the firmware; each
//! bit has exactly one detecting component. Core functions receive a
//! `Faults` view of the registry and hand back set/clear deltas so the
//! writer discipline stays visible at the API boundary.

/// Bit set of hard faults. Any set bit gates charging off entirely.
#[derive(Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Faults(u8);

impl Faults {
    /// Regulator register bus unreachable (transfer budget exceeded or
    /// identity probe mismatch).
    pub const COMMUNICATION: Faults = Faults(1 << 0);
    /// Charge-okay input reports VBUS outside the valid window.
    pub const INPUT_VOLTAGE: Faults = Faults(1 << 1);
    /// Balance connector tap pattern is non-contiguous.
    pub const CELL_CONNECTION: Faults = Faults(1 << 2);
    /// A cell is below the minimum safe voltage.
    pub const CELL_VOLTAGE: Faults = Faults(1 << 3);
    /// MCU die temperature above the operating limit.
    pub const MCU_OVER_TEMP: Faults = Faults(1 << 4);

    pub const fn none() -> Self {
        Faults(0)
    }

    pub const fn from_bits(bits: u8) -> Self {
        Faults(bits)
    }

    pub const fn bits(self) -> u8 {
        self.0
    }

    pub const fn any(self) -> bool {
        self.0 != 0
    }

    pub const fn contains(self, other: Faults) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn set(&mut self, other: Faults) {
        self.0 |= other.0;
    }

    pub fn clear(&mut self, other: Faults) {
        self.0 &= !other.0;
    }

    pub const fn union(self, other: Faults) -> Faults {
        Faults(self.0 | other.0)
    }
}

/// Set/clear delta produced by one monitor cycle. Bits not named in either
/// half are left untouched in the registry.
#[derive(Clone, Copy, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FaultDelta {
    pub set: Faults,
    pub clear: Faults,
}

impl FaultDelta {
    pub fn set(&mut self, fault: Faults) {
        self.set.set(fault);
        self.clear.clear(fault);
    }

    pub fn clear(&mut self, fault: Faults) {
        self.clear.set(fault);
        self.set.clear(fault);
    }

    /// The registry view after this delta is applied.
    pub fn apply_to(self, registry: Faults) -> Faults {
        let mut out = registry;
        out.clear(self.clear);
        out.set(self.set);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_and_clear_are_idempotent() {
        let mut f = Faults::none();
        f.set(Faults::COMMUNICATION);
        f.set(Faults::COMMUNICATION);
        assert!(f.contains(Faults::COMMUNICATION));
        assert_eq!(f.bits(), Faults::COMMUNICATION.bits());
        f.clear(Faults::COMMUNICATION);
        f.clear(Faults::COMMUNICATION);
        assert!(!f.any());
    }

    #[test]
    fn delta_last_write_wins() {
        let mut d = FaultDelta::default();
        d.set(Faults::MCU_OVER_TEMP);
        d.clear(Faults::MCU_OVER_TEMP);
        let out = d.apply_to(Faults::MCU_OVER_TEMP);
        assert!(!out.contains(Faults::MCU_OVER_TEMP));
    }

    #[test]
    fn delta_leaves_unnamed_bits_alone() {
        let mut d = FaultDelta::default();
        d.clear(Faults::CELL_VOLTAGE);
        let out = d.apply_to(Faults::COMMUNICATION.union(Faults::CELL_VOLTAGE));
        assert!(out.contains(Faults::COMMUNICATION));
        assert!(!out.contains(Faults::CELL_VOLTAGE));
    }
}
