mod device;
// Private module - allowed by clippy.toml allow-private-module-inception
#[allow(clippy::module_inception)]
mod engine;
mod entity;
mod event;
mod integration;
mod message;
pub mod state;

pub use device::Device;
pub use device::DeviceInfo;
pub use engine::CommandError;
pub use engine::Engine;
pub use engine::EntityEntry;
pub use entity::Entity;
pub use entity::EntityDescriptor;
pub use entity::Platform;
pub use event::Event;
pub use integration::FromIntegrationSender;
pub use integration::Integration;
pub use integration::IntegrationContext;
pub use integration::IntegrationFactoryResult;
pub use integration::REGISTRY as INTEGRATION_REGISTRY;
pub use message::FromIntegrationMessage;
pub use message::ServiceCallError;
pub use message::ToIntegrationMessage;
pub use state::EntityState;
pub use state::State;
pub use state::TemperatureUnit;
