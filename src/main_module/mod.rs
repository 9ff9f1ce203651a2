//! Process-level pieces of the HTTP service, kept out of main.rs

mod health;
mod server;
mod shutdown;

pub use health::*;
pub use server::*;
pub use shutdown::*;
