pub mod camera;
pub mod collection;
pub mod dataset;
pub mod direction;
pub mod error;
pub mod image;
pub mod metadata;
pub mod options;

pub use camera::*;
pub use collection::*;
pub use dataset::*;
pub use direction::*;
pub use error::*;
pub use image::*;
pub use options::*;
