pub mod analyze;
pub mod config;
pub mod core;
pub mod design;
pub mod distributions;
pub mod error;
pub mod groups;
pub mod io;
pub mod ks_test;
pub mod model;
pub mod objective;
pub mod optimize;
pub mod quantify;
pub mod schedule;
pub mod scheduler;
pub mod shredder;
pub mod simulate;
pub mod state;
pub mod stats;

pub use crate::error::{Result, ShredderError};
pub use crate::objective::Objective;
pub use crate::shredder::Shredder;
