//! CSS dependency discovery

pub mod loader;
