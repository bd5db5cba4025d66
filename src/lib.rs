//! gridcheck: visual checks on a remote rendering grid
//!
//! Captured page snapshots are turned into render-ready bundles (the page DOM
//! plus every resource it transitively references), rendered on many browser
//! configurations by a remote grid, and the resulting screenshots are handed
//! to a visual-diff backend in step order.
//!
//! The main entry points are [`GridClient`] and [`VisualTest`]; the pieces of
//! the pipeline are usable on their own through the [`resource`], [`dom`] and
//! [`render`] modules.

pub mod api;
pub mod check;
pub mod config;
pub mod css;
pub mod debug;
pub mod dom;
pub mod error;
pub mod render;
pub mod resource;
pub mod session;
pub mod svg;

pub use api::{GlobalState, GridClient, VisualTest};
pub use check::{CheckSettings, MatchLevel, RegionTarget, TestController};
pub use config::ClientConfig;
pub use dom::{PageSnapshot, RGridDom};
pub use error::{Error, Result};
pub use render::request::{BrowserConfig, EmulationInfo, IosDeviceInfo, Region, SizeMode};
pub use resource::{Resource, ResourceCache};
pub use session::{CheckArgs, DiffSession, MatchResult, TestResults};
