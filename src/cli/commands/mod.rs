pub mod config;
pub mod init;
pub mod log;
pub mod patch;
pub mod repair;
pub mod series;
