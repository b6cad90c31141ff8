pub mod config;
pub mod context;
pub mod engine;
pub mod epic;
pub mod error;
pub mod history;
pub mod io;
pub mod paths;
pub mod plan;
pub mod project;
pub mod render;
pub mod store;
pub mod task;
pub mod types;
pub mod vcs;

pub use error::{RailsError, Result};
