// src/cli/handlers/mod.rs

pub mod activate;
pub mod cache;
pub mod commons;
pub mod dump;
pub mod env;
pub mod launch;
pub mod set_uri;
