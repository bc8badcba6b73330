pub mod aggregate;
pub mod aggregator_stage;
pub mod config;
pub mod consistency_stage;
pub mod corrector_stage;
pub mod engine;
pub mod error;
pub mod event;
pub mod exclusion_stage;
pub mod extract;
pub mod gate_stage;
pub mod loader;
pub mod profile_stage;
pub mod rng;
pub mod sample_stage;
pub mod schema;
pub mod stage;
pub mod store;
pub mod types;
