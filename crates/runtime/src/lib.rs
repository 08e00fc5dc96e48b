pub mod debounce;
pub mod metrics;
pub mod notifier;

pub use debounce::*;
pub use metrics::*;
pub use notifier::*;
