pub mod config;
pub mod services;

pub use config::Config;
pub use services::{Orchestrator, SagaPhase};
