use std::error::Error;

use async_trait::async_trait;
use linkme::distributed_slice;
use tokio::sync::mpsc;

use super::message::FromIntegrationMessage;
use super::message::ToIntegrationMessage;
use crate::config::Config;

/// Integration -> engine. Bounded, so a chatty kettle waits for the engine.
pub type FromIntegrationSender = mpsc::Sender<FromIntegrationMessage>;
pub type FromIntegrationReceiver = mpsc::Receiver<FromIntegrationMessage>;

/// Engine -> integration. Unbounded; routing a command never blocks the engine.
pub type ToIntegrationSender = mpsc::UnboundedSender<ToIntegrationMessage>;

/// Result type for integration factory functions
///
/// A factory yields one integration instance per configured entry, or none.
pub type IntegrationFactoryResult = anyhow::Result<Vec<Box<dyn Integration>>>;

pub struct IntegrationContext<'a> {
    pub config: &'a Config,
}

#[distributed_slice]
pub static REGISTRY: [fn(&IntegrationContext) -> IntegrationFactoryResult];

/// One running device integration, driven by the engine from its own task
#[async_trait]
pub trait Integration: Send + Sync {
    /// Instance name; also the owner recorded for each of its entities
    fn name(&self) -> &str;

    /// Announce entities and start background work. `tx` stays valid for the
    /// lifetime of the integration.
    async fn setup(&mut self, tx: FromIntegrationSender) -> Result<(), Box<dyn Error + Send>>;

    /// Carry out a command addressed to one of this integration's entities
    async fn handle_message(
        &mut self,
        msg: ToIntegrationMessage,
    ) -> Result<(), Box<dyn Error + Send>>;

    /// Called once the engine closes the command channel
    async fn shutdown(&mut self) -> Result<(), Box<dyn Error + Send>>;
}
