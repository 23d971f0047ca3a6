//! Node module - network parameters, configuration, engine and service

mod config;
mod engine;
mod genesis;
mod logging;
mod params;
mod service;

pub use config::*;
pub use engine::*;
pub use genesis::*;
pub use logging::*;
pub use params::*;
pub use service::*;
