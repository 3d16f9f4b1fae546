pub mod api;
pub mod config;
mod engine;
pub mod integrations;

pub use config::Config;
pub use config::Diagnostic;
pub use config::KettleConfig;
pub use config::LogLevel;
pub use config::format_diagnostics;
pub use engine::CommandError;
pub use engine::Engine;
pub use engine::EntityState;
pub use engine::Event;
pub use engine::State;
pub use engine::TemperatureUnit;
