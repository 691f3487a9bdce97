// Code-block dimension limits, ISO/IEC 15444-1 A.6.1.
pub const MIN_CODE_BLOCK_DIMENSION: u32 = 4;
pub const MAX_CODE_BLOCK_DIMENSION: u32 = 1024;
pub const MAX_CODE_BLOCK_AREA: u32 = 4096;
pub const DEFAULT_CODE_BLOCK_DIMENSION: u32 = 64;

pub const MAX_DECOMPOSITION_LEVELS: u8 = 32;
pub const DEFAULT_DECOMPOSITION_LEVELS: u8 = 5;

pub const MIN_BIT_DEPTH: u8 = 1;
pub const MAX_BIT_DEPTH: u8 = 24;

// Quantization step representation: 5 bit exponent, 11 bit mantissa.
pub const QSTEP_MANTISSA_BITS: u32 = 11;
pub const QSTEP_MAX_MANTISSA: u16 = (1 << QSTEP_MANTISSA_BITS) - 1;
pub const QSTEP_MAX_EXPONENT: u8 = 31;
pub const DEFAULT_GUARD_BITS: u8 = 2;
pub const DEFAULT_BASE_STEP: f32 = 0.0078125;

pub const MAX_PRECINCT_EXPONENT: u8 = 15;

// Packet header Lblock starting value, B.10.7.1.
pub const INITIAL_LBLOCK: u32 = 3;

pub const STRIPE_HEIGHT: usize = 4;

// Bypass mode codes SPP and MRP raw from this pass index on (start of the 5th bit-plane).
pub const FIRST_BYPASS_PASS_INDEX: usize = 10;

// SOP marker segment and EPH marker sizes.
pub const SOP_MARKER_SIZE: usize = 6;
pub const EPH_MARKER_SIZE: usize = 2;
