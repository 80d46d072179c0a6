//! pcapflow - reassemble TCP streams from packet captures, correlate HTTP
//! exchanges and ship them through composable pipelines.
//!
//! The engine lives in [`pcapflow_core`]; this crate adds the command line.

pub mod cli;

pub use pcapflow_core::{Error, Result};
