use num_enum::{IntoPrimitive, TryFromPrimitive};

/// Supported CRC register widths.
#[derive(Clone, Copy, Debug, PartialEq, Eq, IntoPrimitive, TryFromPrimitive)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum CrcWidth {
    W8 = 8,
    W16 = 16,
    W32 = 32,
}

impl CrcWidth {
    pub const fn mask(self) -> u32 {
        match self {
            CrcWidth::W8 => 0xff,
            CrcWidth::W16 => 0xffff,
            CrcWidth::W32 => 0xffff_ffff,
        }
    }

    pub const fn msb(self) -> u32 {
        match self {
            CrcWidth::W8 => 0x80,
            CrcWidth::W16 => 0x8000,
            CrcWidth::W32 => 0x8000_0000,
        }
    }

    /// Right shift that brings the top byte of the register down to bits 0..8.
    pub const fn top_shift(self) -> u32 {
        match self {
            CrcWidth::W8 => 0,
            CrcWidth::W16 => 8,
            CrcWidth::W32 => 24,
        }
    }
}

/// Fully parameterized CRC description in Rocksoft notation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct CrcParams {
    pub width: CrcWidth,
    pub poly: u32,
    pub init: u32,
    pub xorout: u32,
    pub reflect_in: bool,
    pub reflect_out: bool,
}

/// Table-driven CRC engine, one byte per step.
///
/// Built once per session from [`CrcParams`]; [`update`](CrcEngine::update)
/// keeps the running register, [`finalize`](CrcEngine::finalize) applies the
/// output reflection and final xor without disturbing it.
#[derive(Clone, Debug)]
pub struct CrcEngine {
    params: CrcParams,
    poly_table: [u32; 256],
    reflect_table: [u8; 256],
}

impl CrcEngine {
    pub fn new(params: CrcParams) -> Self {
        let mut reflect_table = [0u8; 256];
        for (i, slot) in reflect_table.iter_mut().enumerate() {
            let mut b = i as u8;
            let mut r = 0u8;
            for _ in 0..8 {
                r = (r << 1) | (b & 1);
                b >>= 1;
            }
            *slot = r;
        }

        let mask = params.width.mask();
        let msb = params.width.msb();
        let mut poly_table = [0u32; 256];
        for (i, slot) in poly_table.iter_mut().enumerate() {
            let mut current = (i as u32) << params.width.top_shift();
            for _ in 0..8 {
                if current & msb != 0 {
                    current = ((current << 1) & mask) ^ params.poly;
                } else {
                    current = (current << 1) & mask;
                }
            }
            *slot = current & mask;
        }

        Self {
            params,
            poly_table,
            reflect_table,
        }
    }

    pub fn params(&self) -> &CrcParams {
        &self.params
    }

    pub fn init_sum(&self) -> u32 {
        self.params.init
    }

    /// Advances the running register by one input byte.
    pub fn update(&self, sum: u32, byte: u8) -> u32 {
        let b = if self.params.reflect_in {
            self.reflect_table[byte as usize]
        } else {
            byte
        };
        let idx = (((b as u32) ^ (sum >> self.params.width.top_shift())) & 0xff) as usize;
        match self.params.width {
            CrcWidth::W8 => self.poly_table[idx],
            _ => ((sum << 8) ^ self.poly_table[idx]) & self.params.width.mask(),
        }
    }

    /// Applies output reflection and the final xor to a running register.
    pub fn finalize(&self, sum: u32) -> u32 {
        let sum = if self.params.reflect_out {
            self.reflect_sum(sum)
        } else {
            sum
        };
        (sum ^ self.params.xorout) & self.params.width.mask()
    }

    // Per-byte bit reversal plus byte reordering, together a full-width
    // bit reversal of the register.
    fn reflect_sum(&self, sum: u32) -> u32 {
        let r = |b: u32| self.reflect_table[(b & 0xff) as usize] as u32;
        match self.params.width {
            CrcWidth::W8 => r(sum),
            CrcWidth::W16 => (r(sum) << 8) | r(sum >> 8),
            CrcWidth::W32 => (r(sum) << 24) | (r(sum >> 8) << 16) | (r(sum >> 16) << 8) | r(sum >> 24),
        }
    }

    /// One-shot checksum of a byte slice.
    pub fn checksum(&self, data: &[u8]) -> u32 {
        let mut sum = self.init_sum();
        for &byte in data {
            sum = self.update(sum, byte);
        }
        self.finalize(sum)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CHECK_INPUT: &[u8] = b"123456789";

    #[test]
    fn test_crc8_smbus() {
        let engine = CrcEngine::new(CrcParams {
            width: CrcWidth::W8,
            poly: 0x07,
            init: 0,
            xorout: 0,
            reflect_in: false,
            reflect_out: false,
        });
        assert_eq!(engine.checksum(CHECK_INPUT), 0xf4);
        let reference = ::crc::Crc::<u8>::new(&::crc::CRC_8_SMBUS);
        assert_eq!(engine.checksum(CHECK_INPUT), reference.checksum(CHECK_INPUT) as u32);
    }

    #[test]
    fn test_crc16_ibm_3740() {
        let engine = CrcEngine::new(CrcParams {
            width: CrcWidth::W16,
            poly: 0x1021,
            init: 0xffff,
            xorout: 0,
            reflect_in: false,
            reflect_out: false,
        });
        assert_eq!(engine.checksum(CHECK_INPUT), 0x29b1);
        let reference = ::crc::Crc::<u16>::new(&::crc::CRC_16_IBM_3740);
        assert_eq!(engine.checksum(CHECK_INPUT), reference.checksum(CHECK_INPUT) as u32);
    }

    #[test]
    fn test_crc32_iso_hdlc() {
        let engine = CrcEngine::new(CrcParams {
            width: CrcWidth::W32,
            poly: 0x04c1_1db7,
            init: 0xffff_ffff,
            xorout: 0xffff_ffff,
            reflect_in: true,
            reflect_out: true,
        });
        assert_eq!(engine.checksum(CHECK_INPUT), 0xcbf4_3926);
        let reference = ::crc::Crc::<u32>::new(&::crc::CRC_32_ISO_HDLC);
        assert_eq!(engine.checksum(CHECK_INPUT), reference.checksum(CHECK_INPUT));
    }

    #[test]
    fn test_running_updates_match_one_shot() {
        let engine = CrcEngine::new(CrcParams {
            width: CrcWidth::W16,
            poly: 0x1021,
            init: 0xffff,
            xorout: 0,
            reflect_in: false,
            reflect_out: false,
        });
        let mut sum = engine.init_sum();
        for &byte in CHECK_INPUT {
            sum = engine.update(sum, byte);
        }
        assert_eq!(engine.finalize(sum), engine.checksum(CHECK_INPUT));
    }
}
