use foundation::math::Vec2;
use imagery::ObliqueImage;
use streaming::BoxFuture;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TerrainError {
    pub message: String,
}

impl std::fmt::Display for TerrainError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "terrain sampling failed: {}", self.message)
    }
}

impl std::error::Error for TerrainError {}

/// Ground heights for points in web mercator meters.
///
/// `image` is the image the points are being projected into or out of; providers without
/// elevation data may derive a height from it.
pub trait TerrainProvider: Send + Sync {
    fn sample_heights<'a>(
        &'a self,
        image: &'a ObliqueImage,
        points: &'a [Vec2],
    ) -> BoxFuture<'a, Result<Vec<f64>, TerrainError>>;
}

/// Terrain without relief: a fixed height, or the mean height of the image footprint.
#[derive(Debug, Copy, Clone, PartialEq, Default)]
pub struct FlatTerrain {
    height: Option<f64>,
}

impl FlatTerrain {
    pub fn at(height: f64) -> Self {
        Self {
            height: Some(height),
        }
    }

    pub fn image_average() -> Self {
        Self { height: None }
    }
}

impl TerrainProvider for FlatTerrain {
    fn sample_heights<'a>(
        &'a self,
        image: &'a ObliqueImage,
        points: &'a [Vec2],
    ) -> BoxFuture<'a, Result<Vec<f64>, TerrainError>> {
        let height = self.height.unwrap_or_else(|| image.average_height());
        Box::pin(async move { Ok(vec![height; points.len()]) })
    }
}
