//! The waypoint fuzzing engine.
//!
//! A driver file declares the target's parameters and constraints in a
//! [`FuzzConfig`], then hands control to [`driver`]:
//!
//! ```no_run
//! use waypoint_engine::{driver, FuzzConfig};
//!
//! fn main() -> anyhow::Result<()> {
//!     let mut config = FuzzConfig::new();
//!     config.enum_arg("mode", &["nearest", "linear", "cubic"])?;
//!     let h = config.int_arg("height")?;
//!     let w = config.int_arg("width")?;
//!     config.add_hard_constraint(h.clone().ge(1));
//!     config.add_hard_constraint(w.clone().ge(1));
//!     config.add_soft_constraint(h.eq_expr(w));
//!
//!     let code = driver(config, |input| {
//!         waypoint_core::traced(|| {
//!             // call the function under test with input's values
//!         });
//!         0
//!     })?;
//!     std::process::exit(code);
//! }
//! ```

pub mod config;
pub mod corpus;
pub mod engine;
pub mod error;
pub mod options;
pub mod stats;

pub use config::FuzzConfig;
pub use engine::{driver, driver_with_options, Engine};
pub use error::{EngineError, EngineResult};
pub use options::Options;

pub use waypoint_core::{
    traced, Args, BoolExpr, Input, IntExpr, RunStatus, STATUS_EXPECTED_EXCEPTION, STATUS_PASS,
    STATUS_UNEXPECTED_EXCEPTION,
};
