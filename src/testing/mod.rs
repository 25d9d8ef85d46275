//! Testing utilities and mock implementations
//!
//! Lets the dispatch engine run end to end without agent CLIs installed.

pub mod mocks;

pub use mocks::*;
