//! Schema/data comparison and content promotion between game databases

pub mod cli;
pub mod compare;
pub mod config;
pub mod promote;
pub mod resilience;
pub mod snapshot;
pub mod types;
