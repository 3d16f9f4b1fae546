use std::time::Duration;

use btleplug::api::BDAddr;
use tokio::sync::Mutex;
use tokio::sync::mpsc;
use tokio::sync::watch;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::client::KettleClient;
use super::client::KettleError;
use super::protocol::KettleReport;
use crate::config::KettleConfig;
use crate::engine::TemperatureUnit;
use crate::engine::state::HvacAction;

#[derive(Debug, Clone)]
pub struct CoordinatorOptions {
    pub poll_interval: Duration,
    /// Wait after a command before polling, so the kettle reports the new state
    pub settle_delay: Duration,
    /// Used until the kettle reports its own unit
    pub fallback_unit: TemperatureUnit,
}

impl Default for CoordinatorOptions {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(30),
            settle_delay: Duration::from_millis(500),
            fallback_unit: TemperatureUnit::Fahrenheit,
        }
    }
}

impl From<&KettleConfig> for CoordinatorOptions {
    fn from(config: &KettleConfig) -> Self {
        Self {
            poll_interval: config.poll_interval,
            fallback_unit: config.units,
            ..Default::default()
        }
    }
}

/// What the coordinator currently knows about its kettle
#[derive(Debug, Clone, PartialEq)]
pub struct KettleSnapshot {
    /// `None` before the first successful poll and after a failed one
    pub data: Option<KettleReport>,
    pub last_update_success: bool,
    /// Unit reported by the kettle, else the configured fallback
    pub unit: TemperatureUnit,
}

impl KettleSnapshot {
    pub fn available(&self) -> bool {
        self.last_update_success && self.data.is_some()
    }

    pub fn get<T>(&self, field: impl FnOnce(&KettleReport) -> Option<T>) -> Option<T> {
        self.data.as_ref().and_then(field)
    }

    /// `Heating` only while on and below the setpoint
    pub fn hvac_action(&self) -> Option<HvacAction> {
        let data = self.data.as_ref()?;
        match data.power? {
            false => Some(HvacAction::Off),
            true => match (data.current_temperature, data.target_temperature) {
                (Some(current), Some(target)) if current < target => Some(HvacAction::Heating),
                _ => Some(HvacAction::Idle),
            },
        }
    }
}

/// Owns polling of one kettle and the latest state it reported
pub struct KettleCoordinator {
    client: KettleClient,
    options: CoordinatorOptions,
    snapshot: watch::Sender<KettleSnapshot>,
    refresh_tx: mpsc::Sender<()>,
    refresh_rx: Mutex<mpsc::Receiver<()>>,
}

impl KettleCoordinator {
    pub fn new(client: KettleClient, options: CoordinatorOptions) -> Self {
        // One pending request is enough; further requests coalesce into it
        let (refresh_tx, refresh_rx) = mpsc::channel(1);
        let (snapshot, _) = watch::channel(KettleSnapshot {
            data: None,
            last_update_success: false,
            unit: options.fallback_unit,
        });
        Self {
            client,
            options,
            snapshot,
            refresh_tx,
            refresh_rx: Mutex::new(refresh_rx),
        }
    }

    pub fn address(&self) -> BDAddr {
        self.client.address()
    }

    pub fn snapshot(&self) -> KettleSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Receive every snapshot the coordinator publishes
    pub fn subscribe(&self) -> watch::Receiver<KettleSnapshot> {
        self.snapshot.subscribe()
    }

    pub fn unit(&self) -> TemperatureUnit {
        self.snapshot.borrow().unit
    }

    /// Poll the kettle once. On failure the kettle's data is torn down.
    pub async fn refresh(&self) -> bool {
        match self.client.poll().await {
            Ok(report) => {
                let mut data = self.snapshot.borrow().data.clone().unwrap_or_default();
                data.merge(&report);
                debug!("{} reported {:?}", self.address(), data);

                self.snapshot.send_replace(KettleSnapshot {
                    unit: data.unit.unwrap_or(self.options.fallback_unit),
                    data: Some(data),
                    last_update_success: true,
                });
                true
            }
            Err(e) => {
                warn!("Failed to refresh {}: {}", self.address(), e);
                self.teardown(false);
                false
            }
        }
    }

    /// Forget the kettle's data. The last reported unit is kept so later
    /// setpoints are still interpreted in the kettle's own unit.
    pub fn teardown(&self, last_update_success: bool) {
        let unit = self.unit();
        self.snapshot.send_replace(KettleSnapshot {
            data: None,
            last_update_success,
            unit,
        });
    }

    /// Ask the poll loop to refresh now instead of waiting out the interval
    pub fn request_refresh(&self) {
        if self.refresh_tx.try_send(()).is_err() {
            debug!("Refresh of {} already pending", self.address());
        }
    }

    /// Poll loop; runs until the task is aborted
    pub async fn run(&self) {
        let mut refresh_rx = self.refresh_rx.lock().await;
        info!(
            "Polling {} every {:?}",
            self.address(),
            self.options.poll_interval
        );

        loop {
            self.refresh().await;

            tokio::select! {
                _ = tokio::time::sleep(self.options.poll_interval) => {}
                _ = refresh_rx.recv() => debug!("Refresh of {} requested", self.address()),
            }
        }
    }

    pub async fn set_power(&self, on: bool) -> Result<(), KettleError> {
        self.client.set_power(on).await?;
        self.settle_then_refresh().await;
        Ok(())
    }

    /// Interpreted in the kettle's current unit
    pub async fn set_temperature(&self, value: f64) -> Result<(), KettleError> {
        self.client.set_temperature(value, self.unit()).await?;
        self.settle_then_refresh().await;
        Ok(())
    }

    async fn settle_then_refresh(&self) {
        tokio::time::sleep(self.options.settle_delay).await;
        self.request_refresh();
    }
}
