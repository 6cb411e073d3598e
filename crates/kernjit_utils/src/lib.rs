//! Helpers shared by the kernjit workspace: logging setup, environment flag
//! parsing and line-numbered source listings.

pub mod env;
pub mod listing;
pub mod logger;

pub use env::parse_bool_flag;
pub use listing::{line_number_width, write_numbered};
