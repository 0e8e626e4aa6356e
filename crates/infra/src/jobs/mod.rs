//! Background jobs run alongside the authority.

mod expiry_sweeper;

pub use expiry_sweeper::{ExpirySweeper, SweepOutcome, SweeperConfig, SweeperHandle, SweeperStats};
