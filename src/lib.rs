pub mod api_router;
pub mod classifier;
pub mod cli;
pub mod core;
pub mod llm;
pub mod main_module;
pub mod tasks;
pub mod tickets;

pub use crate::core::config::AppConfig;
pub use crate::core::shared::state::{open_store, AppState};
