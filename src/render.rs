//! Render pipeline
//!
//! Everything between an assembled document bundle and a finished screenshot:
//! building one [`request::RenderRequest`] per browser, submitting batches to
//! the grid (including the need-more-resources upload round), and waiting for
//! each render to reach a terminal status.

pub mod batch;
pub mod grid;
pub mod request;
pub mod status;

pub use batch::BatchCoordinator;
pub use grid::{HttpRenderGrid, RenderGrid, RenderStatus, RenderStatusResult, RunningRender};
pub use request::{BrowserConfig, RenderRequest, RenderRequestBuilder, SizeMode};
pub use status::StatusPoller;
