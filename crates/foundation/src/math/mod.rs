pub mod geodesy;
pub mod matrix;
pub mod polygon;
pub mod vec;

pub use geodesy::*;
pub use matrix::*;
pub use polygon::*;
pub use vec::*;
