pub mod binary_array;
pub mod demo;
pub mod layout;

pub use binary_array::*;
