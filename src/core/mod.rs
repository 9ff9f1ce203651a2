pub mod config;
pub mod shared;
