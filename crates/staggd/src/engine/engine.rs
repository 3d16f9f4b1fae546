use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::sync::broadcast;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use super::device::Device;
use super::entity::EntityDescriptor;
use super::entity::Platform;
use super::event::Event;
use super::integration::FromIntegrationReceiver;
use super::integration::FromIntegrationSender;
use super::integration::Integration;
use super::integration::IntegrationContext;
use super::integration::ToIntegrationSender;
use super::message::FromIntegrationMessage;
use super::message::ServiceCallError;
use super::message::ToIntegrationMessage;
use super::state::EntityState;
use super::state::State;

/// Capacity for the integration→engine message channel
/// Provides backpressure when integrations send faster than the engine can process
const FROM_INTEGRATION_CHANNEL_SIZE: usize = 1024;

/// Slow event subscribers lag (and skip) past this many events
const EVENT_CHANNEL_SIZE: usize = 256;

#[derive(Debug, Error)]
pub enum CommandError {
    #[error("no entity '{0}'")]
    UnknownEntity(String),

    #[error("entity '{entity_id}' is a {actual} entity, expected {expected}")]
    WrongPlatform {
        entity_id: String,
        expected: Platform,
        actual: Platform,
    },

    #[error("integration '{0}' is not running")]
    IntegrationUnavailable(String),

    #[error(transparent)]
    ServiceCall(#[from] ServiceCallError),
}

/// Registry record for one entity
#[derive(Debug, Clone, Serialize)]
pub struct EntityEntry {
    pub entity_id: String,
    pub integration: String,
    #[serde(flatten)]
    pub descriptor: EntityDescriptor,
    pub state: Option<EntityState>,
}

#[derive(Debug, Clone)]
struct RegisteredEntity {
    integration: String,
    descriptor: EntityDescriptor,
}

/// staggd engine
///
/// This structure handles the flow of events, sending commands to the correct
/// integration, and maintaining a view of the world with State.
pub struct Engine {
    /// Centralized state snapshot (readers load the Arc, writer stores a new one)
    state: ArcSwap<State>,

    /// Map of entity_id -> owning integration and descriptor, for routing messages
    entities: std::sync::Mutex<HashMap<String, RegisteredEntity>>,

    /// Devices keyed by device id
    devices: std::sync::Mutex<BTreeMap<String, Device>>,

    /// Communication channels to integrations (for commands)
    integration_channels: std::sync::Mutex<HashMap<String, ToIntegrationSender>>,

    /// Receive messages from integrations (events)
    message_rx: Mutex<FromIntegrationReceiver>,

    /// Sender for integrations to report events back to the engine
    message_tx: FromIntegrationSender,

    events: broadcast::Sender<Event>,

    /// Handles for integration tasks
    integration_handles: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl Engine {
    /// Create a new Engine instance
    pub fn new() -> Self {
        let (message_tx, message_rx) = mpsc::channel(FROM_INTEGRATION_CHANNEL_SIZE);
        let (events, _) = broadcast::channel(EVENT_CHANNEL_SIZE);
        Self {
            state: ArcSwap::new(Arc::default()),
            entities: std::sync::Mutex::new(HashMap::new()),
            devices: std::sync::Mutex::new(BTreeMap::new()),
            integration_channels: std::sync::Mutex::new(HashMap::new()),
            message_rx: Mutex::new(message_rx),
            message_tx,
            events,
            integration_handles: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Register integrations from configuration
    ///
    /// Runs every registered factory; a failing factory is logged and skipped.
    /// Returns the number of integration instances started.
    pub fn register_integrations_from_config(&self, cfg: &crate::config::Config) -> usize {
        let ctx = IntegrationContext { config: cfg };
        let mut count = 0;
        for constr in super::integration::REGISTRY {
            let integrations = match constr(&ctx) {
                Ok(i) => i,
                Err(e) => {
                    error!("failed to setup integration: {:#}", e);
                    continue;
                }
            };
            for integration in integrations {
                self.register_integration(integration);
                count += 1;
            }
        }

        count
    }

    /// Register an integration with the engine
    ///
    /// This spawns the integration in a background task, wires up channels,
    /// and starts its setup process.
    pub fn register_integration(&self, mut integration: Box<dyn Integration>) {
        let name = integration.name().to_string();
        let (to_integration_tx, mut to_integration_rx) = mpsc::unbounded_channel();
        let from_integration_tx = self.message_tx.clone();

        if let Ok(mut channels) = self.integration_channels.lock() {
            if channels.insert(name.clone(), to_integration_tx).is_some() {
                warn!("Integration '{}' registered twice, replacing", name);
            }
        }

        info!("Starting integration '{}'", name);

        // Spawn integration task
        let handle = tokio::spawn(async move {
            // Setup integration (gives it the sender for events)
            if let Err(e) = integration.setup(from_integration_tx).await {
                warn!("Integration '{}' setup failed: {}", name, e);
                return;
            }

            // Process commands from engine until the channel closes
            while let Some(msg) = to_integration_rx.recv().await {
                if let Err(e) = integration.handle_message(msg).await {
                    warn!("Integration '{}' failed to handle message: {}", name, e);
                }
            }

            if let Err(e) = integration.shutdown().await {
                warn!("Integration '{}' shutdown failed: {}", name, e);
            }
            debug!("Integration '{}' stopped", name);
        });

        if let Ok(mut handles) = self.integration_handles.lock() {
            handles.push(handle);
        }
    }

    /// Subscribe to engine events
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    /// Send a command to an integration
    ///
    /// Routes the command to the appropriate integration based on entity_id.
    pub fn send_command(&self, msg: ToIntegrationMessage) -> Result<(), CommandError> {
        let entity_id = msg.entity_id().to_string();

        let integration_name = {
            let entities = self
                .entities
                .lock()
                .map_err(|_| CommandError::UnknownEntity(entity_id.clone()))?;
            let entity = entities
                .get(&entity_id)
                .ok_or_else(|| CommandError::UnknownEntity(entity_id.clone()))?;

            if let Some(expected) = msg.platform() {
                if entity.descriptor.platform != expected {
                    return Err(CommandError::WrongPlatform {
                        entity_id,
                        expected,
                        actual: entity.descriptor.platform,
                    });
                }
            }
            entity.integration.clone()
        };

        let channels = self
            .integration_channels
            .lock()
            .map_err(|_| CommandError::IntegrationUnavailable(integration_name.clone()))?;
        let tx = channels
            .get(&integration_name)
            .ok_or_else(|| CommandError::IntegrationUnavailable(integration_name.clone()))?;

        debug!("Routing {:?} to '{}'", msg, integration_name);
        tx.send(msg)
            .map_err(|_| CommandError::IntegrationUnavailable(integration_name))
    }

    /// Translate a service call and route the resulting command
    pub fn call_service(&self, domain: &str, service: &str, data: &Value) -> Result<(), CommandError> {
        let msg = ToIntegrationMessage::from_service_call(domain, service, data)?;
        self.send_command(msg)
    }

    /// Run the engine's main event loop
    ///
    /// Processes incoming events from integrations and updates state.
    pub async fn run(&self) {
        info!("Engine starting");

        let mut rx = self.message_rx.lock().await;
        while let Some(msg) = rx.recv().await {
            self.handle_event(msg);
        }

        info!("Engine event loop finished");
    }

    /// Stop every integration and wait for their tasks to finish.
    ///
    /// Dropping the command channels ends each integration's command loop,
    /// after which the integration's own `shutdown` runs.
    pub async fn shutdown(&self) {
        info!("Engine shutting down");

        if let Ok(mut channels) = self.integration_channels.lock() {
            channels.clear();
        }

        let handles = match self.integration_handles.lock() {
            Ok(mut handles) => std::mem::take(&mut *handles),
            Err(_) => Vec::new(),
        };

        for handle in handles {
            if let Err(e) = handle.await {
                error!("Integration task failed: {}", e);
            }
        }
    }

    /// Get a snapshot of the current engine state.
    ///
    /// Clones the `Arc` (atomic refcount bump), essentially free.
    pub fn state_snapshot(&self) -> Arc<State> {
        self.state.load_full()
    }

    pub fn entity_state(&self, entity_id: &str) -> Option<EntityState> {
        self.state.load().get(entity_id)
    }

    /// Registry entry plus current state of one entity
    pub fn entity(&self, entity_id: &str) -> Option<EntityEntry> {
        let registered = self.entities.lock().ok()?.get(entity_id).cloned()?;
        Some(EntityEntry {
            entity_id: entity_id.to_string(),
            integration: registered.integration,
            descriptor: registered.descriptor,
            state: self.entity_state(entity_id),
        })
    }

    /// All registered entities, sorted by entity id
    pub fn entities(&self) -> Vec<EntityEntry> {
        let registered: Vec<(String, RegisteredEntity)> = match self.entities.lock() {
            Ok(entities) => entities
                .iter()
                .map(|(id, e)| (id.clone(), e.clone()))
                .collect(),
            Err(_) => return Vec::new(),
        };

        let state = self.state.load();
        let mut entries: Vec<EntityEntry> = registered
            .into_iter()
            .map(|(entity_id, e)| EntityEntry {
                state: state.get(&entity_id),
                entity_id,
                integration: e.integration,
                descriptor: e.descriptor,
            })
            .collect();
        entries.sort_by(|a, b| a.entity_id.cmp(&b.entity_id));
        entries
    }

    pub fn devices(&self) -> Vec<Device> {
        match self.devices.lock() {
            Ok(devices) => devices.values().cloned().collect(),
            Err(_) => Vec::new(),
        }
    }

    fn broadcast(&self, event: Event) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    /// Handle an event from an integration
    fn handle_event(&self, msg: FromIntegrationMessage) {
        match msg {
            FromIntegrationMessage::EntityDiscovered {
                entity_id,
                integration_name,
                descriptor,
            } => {
                info!(
                    "Entity discovered: {} (from {})",
                    entity_id, integration_name
                );

                if let Some(info) = &descriptor.device {
                    if let Ok(mut devices) = self.devices.lock() {
                        devices
                            .entry(info.device_id())
                            .or_insert_with(|| Device::new(info.clone()))
                            .add_entity(entity_id.clone());
                    }
                }

                // State is not populated until the first state-change message arrives.
                if let Ok(mut entities) = self.entities.lock() {
                    entities.insert(
                        entity_id.clone(),
                        RegisteredEntity {
                            integration: integration_name,
                            descriptor: descriptor.clone(),
                        },
                    );
                }

                self.broadcast(Event::EntityAdded {
                    entity_id,
                    descriptor,
                });
            }
            FromIntegrationMessage::EntityRemoved { entity_id } => {
                info!("Entity removed: {}", entity_id);

                {
                    let mut state = State::clone(&self.state.load());
                    state.remove(&entity_id);
                    self.state.store(Arc::new(state));
                }

                let removed = self
                    .entities
                    .lock()
                    .ok()
                    .and_then(|mut entities| entities.remove(&entity_id));

                if let Some(info) = removed.and_then(|e| e.descriptor.device) {
                    if let Ok(mut devices) = self.devices.lock() {
                        let device_id = info.device_id();
                        let empty = devices
                            .get_mut(&device_id)
                            .map(|d| d.remove_entity(&entity_id))
                            .unwrap_or(false);
                        if empty {
                            devices.remove(&device_id);
                        }
                    }
                }

                self.broadcast(Event::EntityRemoved { entity_id });
            }
            FromIntegrationMessage::StateChanged { entity_id, state } => {
                let platform = self
                    .entities
                    .lock()
                    .ok()
                    .and_then(|entities| entities.get(&entity_id).map(|e| e.descriptor.platform));

                match platform {
                    None => {
                        warn!("State update for unknown entity {}", entity_id);
                        return;
                    }
                    Some(p) if p != state.platform() => {
                        warn!(
                            "State update for {} has platform {}, expected {}",
                            entity_id,
                            state.platform(),
                            p
                        );
                        return;
                    }
                    Some(_) => {}
                }

                let old = {
                    let mut snapshot = State::clone(&self.state.load());
                    let old = snapshot.apply(entity_id.clone(), state.clone());
                    self.state.store(Arc::new(snapshot));
                    old
                };

                if old.as_ref() == Some(&state) {
                    return;
                }

                debug!("State changed: {} -> {:?}", entity_id, state);
                self.broadcast(Event::StateChanged {
                    entity_id,
                    old,
                    new: state,
                });
            }
        }
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}
