use std::error::Error;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::info;

use super::binary_sensor::ConnectionSensor;
use super::client::ClientOptions;
use super::client::KettleClient;
use super::client::KettleError;
use super::climate::KettleClimate;
use super::coordinator::CoordinatorOptions;
use super::coordinator::KettleCoordinator;
use super::coordinator::KettleSnapshot;
use super::entity::EntityContext;
use super::entity::KettleCommand;
use super::entity::KettleEntity;
use super::number::TargetTemperatureNumber;
use super::sensor::KettleSensor;
use super::switch::PowerSwitch;
use super::transport::KettleConnector;
use crate::config::KettleConfig;
use crate::engine::FromIntegrationMessage;
use crate::engine::FromIntegrationSender;
use crate::engine::Integration;
use crate::engine::ToIntegrationMessage;

/// Type alias for the shared entity list
type EntityList = Arc<Vec<Box<dyn KettleEntity>>>;

#[derive(Debug, Error)]
pub enum HandleError {
    #[error("entity {0} does not belong to this kettle")]
    UnknownEntity(String),

    #[error("{0:?} is not supported by this entity")]
    Unsupported(ToIntegrationMessage),

    #[error(transparent)]
    Kettle(#[from] KettleError),
}

/// One Fellow Stagg kettle, exposed as a climate entity plus companions
pub struct StaggIntegration {
    /// Entry id
    name: String,
    coordinator: Arc<KettleCoordinator>,
    entities: EntityList,
    /// Poll loop and state publisher, started in setup()
    tasks: Vec<JoinHandle<()>>,
    /// Kept for the final unavailable state on shutdown
    to_engine: Option<FromIntegrationSender>,
}

impl StaggIntegration {
    pub fn new(entry_id: &str, config: &KettleConfig, connector: Arc<dyn KettleConnector>) -> Self {
        let client = KettleClient::new(config.address, connector, ClientOptions::from(config));
        let coordinator = KettleCoordinator::new(client, CoordinatorOptions::from(config));
        let ctx = EntityContext::new(entry_id, config.address, config.name.as_deref());
        Self::with_coordinator(&ctx, coordinator)
    }

    pub fn with_coordinator(ctx: &EntityContext, coordinator: KettleCoordinator) -> Self {
        let mut entities: Vec<Box<dyn KettleEntity>> = vec![
            Box::new(KettleClimate::new(ctx)),
            Box::new(PowerSwitch::new(ctx)),
            Box::new(TargetTemperatureNumber::new(ctx)),
            Box::new(ConnectionSensor::new(ctx)),
        ];
        for sensor in KettleSensor::all(ctx) {
            entities.push(Box::new(sensor));
        }

        Self {
            name: ctx.entry_id.clone(),
            coordinator: Arc::new(coordinator),
            entities: Arc::new(entities),
            tasks: Vec::new(),
            to_engine: None,
        }
    }

    /// Send every entity's state derived from `snapshot`. Returns false once
    /// the engine has gone away.
    async fn publish_static(
        entities: &EntityList,
        snapshot: &KettleSnapshot,
        to_engine: &FromIntegrationSender,
    ) -> bool {
        for entity in entities.iter() {
            let msg = FromIntegrationMessage::StateChanged {
                entity_id: entity.entity_id().to_string(),
                state: entity.state(snapshot),
            };
            if to_engine.send(msg).await.is_err() {
                return false;
            }
        }
        true
    }

    /// Forward every coordinator update to the engine
    async fn publish_task(
        mut updates: watch::Receiver<KettleSnapshot>,
        entities: EntityList,
        to_engine: FromIntegrationSender,
    ) {
        while updates.changed().await.is_ok() {
            let snapshot = updates.borrow_and_update().clone();
            if !Self::publish_static(&entities, &snapshot, &to_engine).await {
                debug!("Engine gone, stopping state publisher");
                break;
            }
        }
    }
}

#[async_trait]
impl Integration for StaggIntegration {
    fn name(&self) -> &str {
        &self.name
    }

    async fn setup(&mut self, tx: FromIntegrationSender) -> Result<(), Box<dyn Error + Send>> {
        info!(
            "Setting up kettle '{}' at {}",
            self.name,
            self.coordinator.address()
        );

        for entity in self.entities.iter() {
            tx.send(FromIntegrationMessage::EntityDiscovered {
                entity_id: entity.entity_id().to_string(),
                integration_name: self.name.clone(),
                descriptor: entity.descriptor(),
            })
            .await
            .map_err(|e| -> Box<dyn Error + Send> { Box::new(e) })?;
        }

        self.to_engine = Some(tx.clone());

        // Subscribe before polling starts so the first update is not missed
        let updates = self.coordinator.subscribe();

        // Unknown values until the first poll lands
        Self::publish_static(&self.entities, &self.coordinator.snapshot(), &tx).await;

        self.tasks.push(tokio::spawn(Self::publish_task(
            updates,
            self.entities.clone(),
            tx,
        )));

        let coordinator = self.coordinator.clone();
        self.tasks
            .push(tokio::spawn(async move { coordinator.run().await }));

        Ok(())
    }

    async fn handle_message(
        &mut self,
        msg: ToIntegrationMessage,
    ) -> Result<(), Box<dyn Error + Send>> {
        if let ToIntegrationMessage::UpdateEntity { .. } = msg {
            self.coordinator.request_refresh();
            return Ok(());
        }

        let entity = self
            .entities
            .iter()
            .find(|e| e.entity_id() == msg.entity_id())
            .ok_or_else(|| -> Box<dyn Error + Send> {
                Box::new(HandleError::UnknownEntity(msg.entity_id().to_string()))
            })?;

        let result = match entity.command(&msg) {
            Some(KettleCommand::SetPower(on)) => self.coordinator.set_power(on).await,
            Some(KettleCommand::SetTemperature(value)) => {
                self.coordinator.set_temperature(value).await
            }
            None => return Err(Box::new(HandleError::Unsupported(msg))),
        };

        result.map_err(|e| -> Box<dyn Error + Send> { Box::new(HandleError::from(e)) })
    }

    async fn shutdown(&mut self) -> Result<(), Box<dyn Error + Send>> {
        info!("Shutting down kettle '{}'", self.name);
        for task in self.tasks.drain(..) {
            task.abort();
        }
        self.coordinator.teardown(false);

        if let Some(tx) = self.to_engine.take() {
            Self::publish_static(&self.entities, &self.coordinator.snapshot(), &tx).await;
        }
        Ok(())
    }
}
