pub mod config;
pub mod devices;
pub mod diagnostics;
pub mod error;
pub mod format;
pub mod frame;
pub mod state;
