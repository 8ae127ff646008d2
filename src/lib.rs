pub mod caselaw;
pub mod checkpoint;
pub mod citation;
pub mod config;
pub mod cost;
pub mod engine;
pub mod errors;
pub mod executor;
pub mod gateway;
pub mod logging;
pub mod phase;
pub mod protocols;
pub mod resilience;
pub mod revision;
pub mod store;
