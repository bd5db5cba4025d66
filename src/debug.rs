//! Runtime diagnostics toggles

pub mod runtime;
