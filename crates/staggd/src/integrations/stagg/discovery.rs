//! Finding kettles to configure, either from advertisements or a typed-in
//! MAC address.

use std::collections::HashSet;
use std::str::FromStr;
use std::time::Duration;

use btleplug::api::BDAddr;
use thiserror::Error;
use tracing::debug;
use tracing::info;

use super::transport::Advertisement;
use super::transport::KettleConnector;
use super::transport::TransportError;
use crate::config::Config;
use crate::config::KettleConfig;

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("invalid Bluetooth address '{0}'")]
    InvalidAddress(String),

    #[error("kettle {0} is already configured")]
    AlreadyConfigured(BDAddr),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Entry id for a discovered kettle, e.g. `stagg_24dcc32d25b2`
pub fn entry_id(address: BDAddr) -> String {
    format!("stagg_{}", address.to_string().replace(':', "").to_lowercase())
}

pub fn entry_title(address: BDAddr) -> String {
    format!("Fellow Stagg ({})", address)
}

/// Accepts `AA:BB:CC:DD:EE:FF` or twelve bare hex digits
pub fn parse_address(input: &str) -> Result<BDAddr, DiscoveryError> {
    let trimmed = input.trim();
    let valid_shape = match trimmed.len() {
        17 => trimmed
            .split(':')
            .all(|octet| octet.len() == 2 && octet.chars().all(|c| c.is_ascii_hexdigit())),
        12 => trimmed.chars().all(|c| c.is_ascii_hexdigit()),
        _ => false,
    };
    if !valid_shape {
        return Err(DiscoveryError::InvalidAddress(input.to_string()));
    }

    BDAddr::from_str(trimmed).map_err(|_| DiscoveryError::InvalidAddress(input.to_string()))
}

/// Validate a manually entered address against the configured kettles
pub fn manual_entry(input: &str, configured: &HashSet<BDAddr>) -> Result<BDAddr, DiscoveryError> {
    let address = parse_address(input)?;
    if configured.contains(&address) {
        return Err(DiscoveryError::AlreadyConfigured(address));
    }
    Ok(address)
}

/// Scan for kettles that are not configured yet
pub async fn discover(
    connector: &dyn KettleConnector,
    configured: &HashSet<BDAddr>,
    duration: Duration,
) -> Result<Vec<Advertisement>, DiscoveryError> {
    let mut seen = HashSet::new();
    let found: Vec<Advertisement> = connector
        .scan(duration)
        .await?
        .into_iter()
        .filter(|ad| {
            if configured.contains(&ad.address) {
                debug!("Skipping configured kettle {}", ad.address);
                return false;
            }
            seen.insert(ad.address)
        })
        .collect();

    info!("Discovered {} new kettle(s)", found.len());
    Ok(found)
}

/// Add an entry for every newly discovered kettle to `config`.
/// Returns the ids of the added entries.
pub async fn auto_discover(
    connector: &dyn KettleConnector,
    config: &mut Config,
) -> Result<Vec<String>, DiscoveryError> {
    let configured: HashSet<BDAddr> = config.kettles.values().map(|k| k.address).collect();
    let found = discover(connector, &configured, config.bluetooth.scan_timeout).await?;

    let mut added = Vec::new();
    for ad in found {
        let id = entry_id(ad.address);
        if config.kettles.contains_key(&id) {
            continue;
        }

        info!("Adding {} as '{}'", entry_title(ad.address), id);
        config.kettles.insert(id.clone(), KettleConfig::new(ad.address));
        added.push(id);
    }

    Ok(added)
}
