use crc::{Crc, CRC_16_IBM_3740};

/// Polynomial 0x1021, MSB first, no final xor. The start value is supplied
/// per digest.
const CCITT: Crc<u16> = Crc::<u16>::new(&CRC_16_IBM_3740);

/// CRC-16/CCITT (polynomial 0x1021, MSB first) with a configurable start value.
///
/// Both ends of a link must agree on the start value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Crc16 {
    start: u16,
}

impl Crc16 {
    /// Start value used when none is configured.
    pub const DEFAULT_START: u16 = 0xEF4A;

    pub const fn new() -> Self {
        Self::with_start(Self::DEFAULT_START)
    }

    pub const fn with_start(start: u16) -> Self {
        Self { start }
    }

    pub const fn start(&self) -> u16 {
        self.start
    }

    pub fn compute(&self, data: &[u8]) -> u16 {
        let mut digest = CCITT.digest_with_initial(self.start);
        digest.update(data);
        digest.finalize()
    }
}

impl Default for Crc16 {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_ccitt_false_check_value() {
        let crc = Crc16::with_start(0xFFFF);
        assert_eq!(crc.compute(b"123456789"), 0x29B1);
    }

    #[test]
    fn empty_input_yields_start_value() {
        assert_eq!(Crc16::new().compute(&[]), Crc16::DEFAULT_START);
        assert_eq!(Crc16::with_start(0x1234).compute(&[]), 0x1234);
    }

    #[test]
    fn start_value_changes_the_digest() {
        let data = b"rpc";
        assert_ne!(
            Crc16::new().compute(data),
            Crc16::with_start(0).compute(data)
        );
    }

    #[test]
    fn ffff_start_matches_the_catalogue_checksum() {
        assert_eq!(
            Crc16::with_start(0xFFFF).compute(b"123456789"),
            CCITT.checksum(b"123456789")
        );
    }

    #[test]
    fn single_bit_flip_is_detected() {
        let crc = Crc16::default();
        let mut data = *b"payload bytes";
        let clean = crc.compute(&data);
        data[4] ^= 0x01;
        assert_ne!(crc.compute(&data), clean);
    }
}
