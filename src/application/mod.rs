// Application layer: the caller side of the fee ledger.
// Owns persistence and per-student serialization; the domain computations
// stay pure.

pub mod error;
pub mod service;

pub use error::*;
pub use service::*;
