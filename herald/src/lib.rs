//! The `herald` command: configuration loading, the CLI surface and wiring
//! of store, transport and dispatch service.

pub mod app;
pub mod cli;
pub mod config;

pub use app::Herald;
pub use cli::Cli;
pub use config::HeraldConfig;
