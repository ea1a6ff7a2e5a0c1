//! G.711 companding tables
//!
//! Two 256-entry lookup tables translate 8-bit companded samples into
//! linear amplitude normalized to [-1, 1]. The tables are computed once,
//! on first use, with the bit-unpacking reconstruction defined by G.711.

use std::sync::LazyLock;

/// RTP static payload type for µ-law (PCMU)
pub const PAYLOAD_TYPE_PCMU: u32 = 0;

/// RTP static payload type for A-law (PCMA)
pub const PAYLOAD_TYPE_PCMA: u32 = 8;

/// Full-scale divisor for 16-bit linear PCM
const FULL_SCALE: f32 = 32768.0;

/// µ-law encoder bias
const ULAW_BIAS: i16 = 0x84;

static TABLES: LazyLock<CodecTables> = LazyLock::new(CodecTables::build);

/// Companding law of an audio payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Companding {
    /// G.711 µ-law (North America, Japan)
    MuLaw,
    /// G.711 A-law (Europe, rest of world)
    ALaw,
}

impl Companding {
    /// Map an RTP payload type to its companding law
    pub fn from_payload_type(payload_type: u32) -> Option<Self> {
        match payload_type {
            PAYLOAD_TYPE_PCMU => Some(Companding::MuLaw),
            PAYLOAD_TYPE_PCMA => Some(Companding::ALaw),
            _ => None,
        }
    }

    /// RTP payload type of this law
    pub fn payload_type(self) -> u32 {
        match self {
            Companding::MuLaw => PAYLOAD_TYPE_PCMU,
            Companding::ALaw => PAYLOAD_TYPE_PCMA,
        }
    }

    /// Lookup table for this law
    pub fn table(self) -> &'static [f32; 256] {
        let tables = tables();
        match self {
            Companding::MuLaw => &tables.ulaw,
            Companding::ALaw => &tables.alaw,
        }
    }

    /// Decode one companded byte
    pub fn decode(self, byte: u8) -> f32 {
        self.table()[byte as usize]
    }

    /// Decode a payload, appending samples to `out`
    pub fn decode_into(self, payload: &[u8], out: &mut Vec<f32>) {
        let table = self.table();
        out.extend(payload.iter().map(|&b| table[b as usize]));
    }
}

/// Precomputed decode tables for both laws
#[derive(Debug)]
pub struct CodecTables {
    /// A-law byte to normalized amplitude
    pub alaw: [f32; 256],
    /// µ-law byte to normalized amplitude
    pub ulaw: [f32; 256],
}

impl CodecTables {
    fn build() -> Self {
        let mut alaw = [0.0f32; 256];
        let mut ulaw = [0.0f32; 256];
        for byte in 0..=255u8 {
            alaw[byte as usize] = alaw_to_linear(byte) as f32 / FULL_SCALE;
            ulaw[byte as usize] = ulaw_to_linear(byte) as f32 / FULL_SCALE;
        }
        Self { alaw, ulaw }
    }
}

/// Shared decode tables
pub fn tables() -> &'static CodecTables {
    &TABLES
}

/// A-law byte to 16-bit linear.
///
/// Even bits are inverted on the wire; after undoing that a set sign bit
/// means a positive sample.
pub fn alaw_to_linear(byte: u8) -> i16 {
    let a = byte ^ 0x55;
    let mantissa = ((a & 0x0F) as i16) << 4;
    let exponent = (a & 0x70) >> 4;
    let magnitude = match exponent {
        0 => mantissa + 8,
        1 => mantissa + 0x108,
        e => (mantissa + 0x108) << (e - 1),
    };
    if a & 0x80 != 0 {
        magnitude
    } else {
        -magnitude
    }
}

/// µ-law byte to 16-bit linear.
///
/// All bits are inverted on the wire; a set sign bit means negative.
pub fn ulaw_to_linear(byte: u8) -> i16 {
    let u = !byte;
    let exponent = (u & 0x70) >> 4;
    let magnitude = ((((u & 0x0F) as i16) << 3) + ULAW_BIAS) << exponent;
    if u & 0x80 != 0 {
        ULAW_BIAS - magnitude
    } else {
        magnitude - ULAW_BIAS
    }
}
