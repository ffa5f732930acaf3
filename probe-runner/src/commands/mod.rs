//! CLI command implementations.

pub mod fixture;
pub mod hosts;
pub mod run;
pub mod stop;
