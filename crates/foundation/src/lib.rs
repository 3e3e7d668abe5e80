pub mod math;
pub mod scope;

// Foundation crate: small, well-tested primitives only.
pub use scope::*;
