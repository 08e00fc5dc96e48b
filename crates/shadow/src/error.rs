use imagery::TransformError;

use crate::terrain::TerrainError;

/// A geometry that could not be carried across to the other space.
#[derive(Debug, Clone, PartialEq)]
pub enum ConversionError {
    /// Nothing usable was left after polygonizing.
    Degenerate,
    Terrain(TerrainError),
    Transform(TransformError),
}

impl std::fmt::Display for ConversionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConversionError::Degenerate => write!(f, "degenerate geometry"),
            ConversionError::Terrain(e) => write!(f, "{e}"),
            ConversionError::Transform(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for ConversionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConversionError::Terrain(e) => Some(e),
            ConversionError::Transform(e) => Some(e),
            _ => None,
        }
    }
}

impl From<TransformError> for ConversionError {
    fn from(e: TransformError) -> Self {
        ConversionError::Transform(e)
    }
}

impl From<TerrainError> for ConversionError {
    fn from(e: TerrainError) -> Self {
        ConversionError::Terrain(e)
    }
}
