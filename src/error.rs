use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum J2kError {
    #[error("Invalid code-block size {width}x{height}")]
    InvalidCodeBlockSize { width: u32, height: u32 },
    #[error("Invalid precinct size exponents ({0}, {1})")]
    InvalidPrecinctSize(u8, u8),
    #[error("Unsupported sample bit depth {0}")]
    UnsupportedBitDepth(u8),
    #[error("Sample value {value} outside the {bit_depth}-bit range of component {component}")]
    SampleOutOfRange {
        component: usize,
        value: i32,
        bit_depth: u8,
    },
    #[error("Invalid number of decomposition levels {0}")]
    InvalidDecompositionLevels(u8),
    #[error("Invalid quantization step (exponent {exponent}, mantissa {mantissa})")]
    InvalidQuantizationStep { exponent: u8, mantissa: u16 },
    #[error("Missing quantization step for resolution {resolution}, subband {index}")]
    MissingQuantizationStep { resolution: u8, index: u8 },
    #[error("Invalid base quantization step {0}")]
    InvalidBaseStep(f32),
    #[error("Inconsistent geometry: {0}")]
    InconsistentGeometry(String),
    #[error("Corrupt code-block data: {0}")]
    CorruptCodeBlock(&'static str),
    #[error("Codeword termination mismatch: {0}")]
    TerminationMismatch(&'static str),
    #[error("Invalid packet header")]
    InvalidPacketHeader,
    #[error("Packet out of order (layer {layer}, resolution {resolution}, component {component}, precinct {precinct})")]
    PacketOutOfOrder {
        layer: u16,
        resolution: u8,
        component: u16,
        precinct: u32,
    },
    #[error("Need more data")]
    NeedMoreData,
    #[error("Invalid tile index {0}")]
    InvalidTileIndex(usize),
    #[error("Invalid component index {0}")]
    InvalidComponentIndex(usize),
    #[error("Invalid layer configuration: {0}")]
    InvalidLayers(&'static str),
    #[error("Invalid argument: {0}")]
    InvalidArgument(&'static str),
}

pub type Result<T> = std::result::Result<T, J2kError>;
