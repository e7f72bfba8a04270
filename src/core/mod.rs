pub mod config;
pub mod debug;
pub mod error;
pub mod log;
pub mod matrix;
pub mod metrics;
pub mod server;
pub mod utils;

pub use ::http;
pub use ::ruma;
pub use ::smallvec;
pub use ::tracing;

pub use config::Config;
pub use error::Error;
pub use matrix::{EduEvent, PduEvent, Presence, Transaction};
pub use metrics::Metrics;
pub use server::Server;
pub use utils::{result, result::Result};

pub use crate as fedsender_core;
