pub mod config;
pub mod logger;
pub mod output;
pub mod session;
