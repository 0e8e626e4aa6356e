//! Infrastructure layer: configuration, component wiring and background jobs.

pub mod authority;
pub mod config;
pub mod jobs;

pub use authority::Authority;
pub use config::{AuthorityConfig, ConfigError};
pub use jobs::{ExpirySweeper, SweeperConfig, SweeperHandle};
