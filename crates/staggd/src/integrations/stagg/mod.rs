//! Fellow Stagg EKG+ kettles over Bluetooth LE.

mod binary_sensor;
mod client;
mod climate;
mod coordinator;
mod discovery;
mod entity;
mod number;
mod protocol;
mod sensor;
// Private module - allowed by clippy.toml allow-private-module-inception
#[allow(clippy::module_inception)]
mod stagg;
mod switch;
mod transport;

use std::sync::Arc;

use btleplug::api::BDAddr;
pub use client::ClientOptions;
pub use client::KettleClient;
pub use client::KettleError;
pub use discovery::DiscoveryError;
pub use discovery::auto_discover;
pub use discovery::discover;
pub use discovery::entry_id;
pub use discovery::entry_title;
pub use discovery::manual_entry;
pub use discovery::parse_address;
use linkme::distributed_slice;
pub use protocol::KettleReport;
use serde::Serializer;
pub use stagg::StaggIntegration;
pub use transport::Advertisement;
pub use transport::BtleplugConnector;
pub use transport::KettleConnector;
pub use transport::TransportError;

use crate::engine;

/// Serialize an address in its `AA:BB:CC:DD:EE:FF` form
pub(crate) fn serialize_address<S: Serializer>(
    address: &BDAddr,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    serializer.collect_str(address)
}

#[distributed_slice(engine::INTEGRATION_REGISTRY)]
fn init_stagg(ctx: &engine::IntegrationContext) -> engine::IntegrationFactoryResult {
    if ctx.config.kettles.is_empty() {
        return Ok(Vec::new());
    }

    // Kettles share one adapter
    let connector: Arc<dyn KettleConnector> =
        Arc::new(BtleplugConnector::new(ctx.config.bluetooth.adapter));

    Ok(ctx
        .config
        .kettles
        .iter()
        .map(|(entry_id, kettle)| {
            Box::new(StaggIntegration::new(entry_id, kettle, connector.clone()))
                as Box<dyn engine::Integration>
        })
        .collect())
}
