//! Command-line interface module.
//!
//! This module handles:
//! - Argument parsing via clap
//! - Listing the registered pipeline components

mod args;
mod listing;

pub use args::{parse_duration, parse_size, Args};
pub use listing::list_components;
