pub mod filter;
pub mod orchestrator;
pub mod types;
