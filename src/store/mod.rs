//! Scan state: the keyed store and the resolution layer on top of it.

pub mod hub;
pub mod keyed;
pub mod resolution;

pub use resolution::ResolutionStore;
