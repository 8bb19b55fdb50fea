#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::return_self_not_must_use)]

//! Core library for neuropil: the package installation engine and its
//! configuration.

pub mod config;
pub mod pkg;
pub mod version;

pub use config::Config;
pub use version::VERSION;
