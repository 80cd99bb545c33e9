//! Node and scheduler configuration.
//!
//! Parsed from `raubzug.toml`, with `RAUBZUG_*` environment variable
//! overrides applied after parsing and before validation.

mod loading;
mod types;
mod validation;

pub use loading::load_dotenv;
pub use types::{
    AlgorithmKind, BalancerConfig, NodeConfig, RaubzugConfig, StatsConfig, WaitMode,
};
