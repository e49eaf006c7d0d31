//! Utils module - shared helpers

pub mod logging;

pub use logging::init_logging;
