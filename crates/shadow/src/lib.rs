//! Image-space editing of ground geometries.
//!
//! [`GeometrySync`] keeps a shadow copy of ground features, expressed in pixel coordinates of
//! the active oblique image, and carries edits back and forth between the two.

pub mod error;
pub mod geometry;
pub mod store;
pub mod sync;
pub mod terrain;

pub use error::ConversionError;
pub use geometry::Geometry;
pub use store::{Feature, FeatureId, FeatureStore, StoreEvent};
pub use sync::{ActiveImage, DEBOUNCE, GeometrySync, IN_FLIGHT, SyncOptions};
pub use terrain::{FlatTerrain, TerrainError, TerrainProvider};
