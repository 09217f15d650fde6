use std::fmt;

#[derive(Debug)]
pub enum SplatBufError {
    UnsupportedVersion(String),
    InvalidCompressionLevel(u16),
    InvalidShDegree(u16),
    MixedShDegrees(String),
    CorruptBuffer(String),
    InvalidSplatData(String),
    InvalidCount(String),
    EmptyWrite,
}

impl fmt::Display for SplatBufError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SplatBufError::UnsupportedVersion(e) => {
                write!(f, "Unsupported container version: {}", e)
            }
            SplatBufError::InvalidCompressionLevel(level) => {
                write!(f, "Invalid compression level {} (expected 0 or 1)", level)
            }
            SplatBufError::InvalidShDegree(degree) => {
                write!(
                    f,
                    "Invalid spherical harmonics degree {} (expected 0 to 2)",
                    degree
                )
            }
            SplatBufError::MixedShDegrees(e) => {
                write!(f, "Mixed spherical harmonics degrees: {}", e)
            }
            SplatBufError::CorruptBuffer(e) => {
                write!(f, "Corrupt splat buffer: {}", e)
            }
            SplatBufError::InvalidSplatData(e) => {
                write!(f, "Invalid splat data: {}", e)
            }
            SplatBufError::InvalidCount(e) => {
                write!(f, "Invalid live count: {}", e)
            }
            SplatBufError::EmptyWrite => {
                write!(f, "No splat arrays were provided to write.")
            }
        }
    }
}

impl std::error::Error for SplatBufError {}
