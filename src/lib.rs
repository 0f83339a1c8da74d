pub mod alerts;
pub mod broadcast;
pub mod config;
pub mod db;
pub mod engine;
pub mod probes;
pub mod scanner;

pub use config::AppConfig;
pub use engine::Engine;
