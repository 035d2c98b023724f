//! CRC-16 integrity check for chat frames.
//!
//! CRC-16/CCITT-FALSE: polynomial `0x1021`, initial value `0xFFFF`, no input or
//! output reflection, no final xor. The lookup table is computed at compile
//! time.

/// Width of the checksum on the wire, in bytes
pub const CHECKSUM_SIZE: usize = 2;

const POLY: u16 = 0x1021;
const INIT: u16 = 0xFFFF;

static TABLE: [u16; 256] = build_table();

const fn build_table() -> [u16; 256] {
    let mut table = [0u16; 256];
    let mut i = 0;
    while i < 256 {
        let mut crc = (i as u16) << 8;
        let mut bit = 0;
        while bit < 8 {
            crc = if crc & 0x8000 != 0 {
                (crc << 1) ^ POLY
            } else {
                crc << 1
            };
            bit += 1;
        }
        table[i] = crc;
        i += 1;
    }
    table
}

/// Incremental CRC-16 hasher
#[derive(Debug, Clone, Copy)]
pub struct Crc16 {
    state: u16,
}

impl Crc16 {
    /// Create a hasher in its initial state
    pub fn new() -> Self {
        Self { state: INIT }
    }

    /// Feed bytes into the hasher
    pub fn update(&mut self, bytes: &[u8]) {
        let mut crc = self.state;
        for &b in bytes {
            let idx = ((crc >> 8) as u8 ^ b) as usize;
            crc = (crc << 8) ^ TABLE[idx];
        }
        self.state = crc;
    }

    /// Finish and return the checksum
    pub fn finalize(self) -> u16 {
        self.state
    }
}

impl Default for Crc16 {
    fn default() -> Self {
        Self::new()
    }
}

/// Compute the CRC-16 of a byte span
pub fn crc16(bytes: &[u8]) -> u16 {
    let mut hasher = Crc16::new();
    hasher.update(bytes);
    hasher.finalize()
}
