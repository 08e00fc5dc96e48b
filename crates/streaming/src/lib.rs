pub mod io;
pub mod state;
pub mod tile;

pub use io::*;
pub use state::*;
pub use tile::*;
