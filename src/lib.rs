//! vrl-forge library crate
//!
//! Generates Vector Remap Language parsers from log samples with an LLM,
//! drives each candidate through a validate/repair loop, and ranks the
//! survivors by a hardware-normalized performance index.

pub mod config;
pub mod error;
pub mod error_code;
pub mod fixer;
pub mod generator;
pub mod llm;
pub mod logging;
pub mod repair;
pub mod sample;
pub mod scorer;
pub mod selector;
pub mod util;
pub mod validator;

pub use error::{ForgeError, ForgeResult};
pub use error_code::ErrorCode;
pub use sample::Sample;
