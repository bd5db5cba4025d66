//! Check-window orchestration
//!
//! One visual test runs many steps on many browsers. Each step renders on
//! every browser concurrently while deliveries to the diff backend stay in
//! step order per browser. Steps observe the shared [`controller::TestController`]
//! at every state boundary and stop cooperatively.

pub mod controller;
pub mod settings;
pub mod throat;
pub mod window;

pub use controller::{StopProbe, TestController};
pub use settings::{CheckSettings, MatchLevel, RegionTarget, Target};
pub use throat::{GateTicket, Throat};
