pub mod blocklog;
pub mod config;
