//! XOR checksum used by every frame

/// XOR-fold a byte span
pub fn xor_checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0, |acc, &byte| acc ^ byte)
}

/// Running checksum for frames written in pieces
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Checksum(u8);

impl Checksum {
    pub const fn new() -> Self {
        Self(0)
    }

    pub fn update(&mut self, bytes: &[u8]) {
        self.0 ^= xor_checksum(bytes);
    }

    pub fn value(&self) -> u8 {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_span() {
        assert_eq!(xor_checksum(&[]), 0);
    }

    #[test]
    fn test_known_value() {
        // ACK with empty payload: 0x0D ^ 0x00 ^ 0x00
        assert_eq!(xor_checksum(&[0x0D, 0x00, 0x00]), 0x0D);
        assert_eq!(xor_checksum(&[0xFF, 0x0F, 0xF0]), 0x00);
    }

    #[test]
    fn test_running_matches_fold() {
        let data = [0x07, 0x05, 0x00, 0x01, 0x0A, 0x00, 0x00, 0x00];
        let mut running = Checksum::new();
        running.update(&data[..3]);
        running.update(&data[3..]);
        assert_eq!(running.value(), xor_checksum(&data));
    }
}
