//! Transport implementations shipped with the crate

pub mod memory;

pub use memory::{AdapterStats, MemoryRadio, MemoryRadioAdapter};
