//! Fanout: query routing and result aggregation hub.
//!
//! The routing engine lives in [`fanout_engine`]. This crate supplies the
//! host around it: TOML configuration with environment overrides
//! ([`config`]), fixture-backed providers for offline runs ([`replay`]),
//! and the glue that assembles a router from both ([`hub`]).

pub mod config;
pub mod error;
pub mod hub;
pub mod replay;

pub use config::{HubConfig, ProviderConfig};
pub use error::{HubError, Result};
pub use hub::Hub;
pub use replay::{Fixture, FixtureFailure, ReplayProvider, load_fixtures, parse_fixtures};

pub use fanout_engine;
