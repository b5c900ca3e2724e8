//! Zero-page address allocator. The 8-bit target's first 256 bytes are a
//! scarce fast-access region; which of them are free to take depends on
//! how much of BASIC and the KERNAL the program intends to keep alive.

use crate::{
    options::{CompilerOptions, ZeropageType},
    value::DataType,
};

/// Scratch locations the code generator itself relies on; never handed
/// out.
pub const SCRATCH_B1: u16 = 0x02;
pub const SCRATCH_REG: u16 = 0x03;
pub const SCRATCH_W1: u16 = 0xfb;
pub const SCRATCH_W2: u16 = 0xfd;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZeropageDepletedError(pub String);

impl core::fmt::Display for ZeropageDepletedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "zero page depleted: {}", self.0)
    }
}

impl std::error::Error for ZeropageDepletedError {}

#[derive(Debug)]
pub struct Zeropage {
    free: Vec<u16>,
}

impl Zeropage {
    pub fn new(options: &CompilerOptions) -> Self {
        let mut free: Vec<u16> = match options.zeropage {
            // only locations BASIC never touches
            ZeropageType::Basicsafe => vec![
                0x04, 0x05, 0x06, 0x0a, 0x0e, 0x92, 0x96, 0x9b, 0x9c, 0x9e, 0x9f, 0xa5, 0xa6,
                0xb0, 0xb1, 0xbe, 0xbf, 0xf9,
            ],
            // BASIC is gone but the float work area stays intact
            ZeropageType::Floatsafe => {
                let mut addresses: Vec<u16> = (0x04..=0x8f).collect();
                addresses.retain(|a| !(0x61..=0x70).contains(a) && !(0x26..=0x2a).contains(a));
                addresses
            }
            // BASIC is gone, KERNAL still runs
            ZeropageType::Kernalsafe => (0x04..=0x8f).collect(),
            // interrupts off, everything usable
            ZeropageType::Full => (0x04..=0xfa).collect(),
        };

        free.retain(|a| {
            !matches!(*a, SCRATCH_B1 | SCRATCH_REG)
                && !(SCRATCH_W1..=SCRATCH_W1 + 1).contains(a)
                && !(SCRATCH_W2..=SCRATCH_W2 + 1).contains(a)
        });

        for (from, to) in &options.zp_reserved {
            free.retain(|a| a < from || a > to);
        }

        Self { free }
    }

    pub fn available(&self) -> usize {
        self.free.len()
    }

    /// Hands out an address with room for a value of the given type.
    /// Words and floats need consecutive free locations.
    pub fn allocate(
        &mut self,
        name: &str,
        datatype: DataType,
    ) -> Result<u16, ZeropageDepletedError> {
        let size: u16 = match datatype {
            DataType::UByte | DataType::Byte => 1,
            DataType::UWord | DataType::Word => 2,
            DataType::Float => 5,
            other => {
                return Err(ZeropageDepletedError(format!(
                    "cannot allocate {other} '{name}' on the zero page"
                )))
            }
        };

        let start = self.free.iter().position(|&address| {
            (0..size).all(|offset| self.free.contains(&(address + offset)))
        });

        match start {
            Some(index) => {
                let address = self.free[index];
                self.free
                    .retain(|a| *a < address || *a >= address + size);
                Ok(address)
            }
            None => Err(ZeropageDepletedError(format!(
                "no room for {} byte(s) for '{name}'",
                size
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_mode_offers_the_most_room() {
        let full = Zeropage::new(&CompilerOptions {
            zeropage: ZeropageType::Full,
            ..Default::default()
        });
        let basic = Zeropage::new(&CompilerOptions {
            zeropage: ZeropageType::Basicsafe,
            ..Default::default()
        });
        assert!(full.available() > basic.available());
    }

    #[test]
    fn scratch_locations_are_never_handed_out() {
        let mut zp = Zeropage::new(&CompilerOptions {
            zeropage: ZeropageType::Full,
            ..Default::default()
        });

        let mut allocated = Vec::new();
        while let Ok(address) = zp.allocate("v", DataType::UByte) {
            allocated.push(address);
        }

        for scratch in [SCRATCH_B1, SCRATCH_REG, SCRATCH_W1, SCRATCH_W2] {
            assert!(!allocated.contains(&scratch));
        }
    }

    #[test]
    fn words_get_consecutive_addresses() {
        let mut zp = Zeropage::new(&CompilerOptions {
            zeropage: ZeropageType::Full,
            ..Default::default()
        });

        let address = zp.allocate("w", DataType::UWord).unwrap();
        // the pair is gone now
        let next = zp.allocate("b", DataType::UByte).unwrap();
        assert!(next != address && next != address + 1);
    }

    #[test]
    fn reserved_ranges_are_excluded() {
        let mut zp = Zeropage::new(&CompilerOptions {
            zeropage: ZeropageType::Basicsafe,
            zp_reserved: vec![(0x04, 0x06)],
            ..Default::default()
        });

        while let Ok(address) = zp.allocate("v", DataType::UByte) {
            assert!(!(0x04..=0x06).contains(&address));
        }
    }

    #[test]
    fn depletion_is_an_error() {
        let mut zp = Zeropage::new(&CompilerOptions {
            zeropage: ZeropageType::Basicsafe,
            ..Default::default()
        });

        while zp.allocate("v", DataType::UByte).is_ok() {}
        assert!(zp.allocate("one_more", DataType::UByte).is_err());
    }
}
