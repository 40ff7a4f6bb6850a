//! EWF rolling-sum checksum
//!
//! Every checksummed structure in the format (section descriptors, table
//! headers, table entry blocks, raw chunk trailers, hash sections) uses the
//! same 32-bit rolling sum: Adler-32 with an initial value of 1. This is
//! not the IEEE 802.3 CRC-32 despite the on-disk fields commonly being
//! called "CRC".

const ADLER_MODULO: u32 = 65521;

/// Largest number of bytes that can be summed before `b` can overflow a u32
const BLOCK: usize = 5552;

/// Compute the EWF checksum of `data`
pub fn ewf_checksum(data: &[u8]) -> u32 {
    let mut a: u32 = 1;
    let mut b: u32 = 0;

    for block in data.chunks(BLOCK) {
        for byte in block {
            a += *byte as u32;
            b += a;
        }
        a %= ADLER_MODULO;
        b %= ADLER_MODULO;
    }
    (b << 16) | a
}

/// Incremental form used by the writer when hashing streamed chunk payloads
#[derive(Debug, Clone)]
pub struct EwfChecksum {
    a: u32,
    b: u32,
}

impl EwfChecksum {
    pub fn new() -> Self {
        Self { a: 1, b: 0 }
    }

    pub fn update(&mut self, data: &[u8]) {
        for block in data.chunks(BLOCK) {
            for byte in block {
                self.a += *byte as u32;
                self.b += self.a;
            }
            self.a %= ADLER_MODULO;
            self.b %= ADLER_MODULO;
        }
    }

    pub fn finalize(&self) -> u32 {
        (self.b << 16) | self.a
    }
}

impl Default for EwfChecksum {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_input() {
        assert_eq!(ewf_checksum(&[]), 1);
    }

    #[test]
    fn test_reference_vectors() {
        // Adler-32 reference values, initial value 1
        assert_eq!(ewf_checksum(b"a"), 0x0062_0062);
        assert_eq!(ewf_checksum(b"abc"), 0x024d_0127);
        assert_eq!(ewf_checksum(b"message digest"), 0x2975_0586);
        assert_eq!(
            ewf_checksum(b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789"),
            0x8adb_150c
        );
    }

    #[test]
    fn test_long_input_no_overflow() {
        let data = vec![0xffu8; 1 << 20];
        let streamed = {
            let mut sum = EwfChecksum::new();
            for half in data.chunks(4096) {
                sum.update(half);
            }
            sum.finalize()
        };
        assert_eq!(streamed, ewf_checksum(&data));
    }

    #[test]
    fn test_incremental_matches_oneshot() {
        let data: Vec<u8> = (0..=255).cycle().take(10_000).collect();
        let mut sum = EwfChecksum::new();
        sum.update(&data[..3333]);
        sum.update(&data[3333..]);
        assert_eq!(sum.finalize(), ewf_checksum(&data));
    }
}
