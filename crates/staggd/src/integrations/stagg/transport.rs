use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use btleplug::api::BDAddr;
use btleplug::api::Central as _;
use btleplug::api::Characteristic;
use btleplug::api::Manager as _;
use btleplug::api::Peripheral as _;
use btleplug::api::ScanFilter;
use btleplug::api::WriteType;
use btleplug::platform::Adapter;
use btleplug::platform::Manager;
use btleplug::platform::Peripheral;
use futures_util::StreamExt;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::sync::OnceCell;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::protocol::CHAR_UUID;
use super::protocol::CUSTOM_SERVICE_UUID;
use super::protocol::SERVICE_UUID;

/// How often the adapter's peripheral list is checked while waiting for a kettle
const SCAN_POLL_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("no Bluetooth adapter at index {0}")]
    NoAdapter(usize),

    #[error("kettle {0} not found")]
    NotFound(BDAddr),

    #[error("timed out while {0}")]
    Timeout(&'static str),

    #[error("{0} has no kettle characteristic")]
    MissingCharacteristic(BDAddr),

    #[error("Bluetooth error: {0}")]
    Ble(#[from] btleplug::Error),
}

impl TransportError {
    /// Errors that may clear up on another attempt
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            TransportError::NoAdapter(_) | TransportError::MissingCharacteristic(_)
        )
    }
}

/// A kettle seen while scanning
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Advertisement {
    #[serde(serialize_with = "super::serialize_address")]
    pub address: BDAddr,
    pub name: Option<String>,
    pub rssi: Option<i16>,
}

/// Opens links to kettles
///
/// This trait allows for mocking the Bluetooth stack for testing purposes
#[async_trait]
pub trait KettleConnector: Send + Sync {
    /// Find, connect to and resolve the kettle characteristic of `address`
    async fn connect(
        &self,
        address: BDAddr,
        timeout: Duration,
    ) -> Result<Box<dyn KettleLink>, TransportError>;

    /// Scan for `duration` and list kettles that advertised themselves
    async fn scan(&self, duration: Duration) -> Result<Vec<Advertisement>, TransportError>;
}

/// A connected kettle
#[async_trait]
pub trait KettleLink: Send {
    async fn write(&mut self, frame: &[u8]) -> Result<(), TransportError>;

    /// Subscribe to notifications, write `request`, then collect every
    /// notification that arrives within `window`.
    async fn exchange(
        &mut self,
        request: &[u8],
        window: Duration,
    ) -> Result<Vec<Vec<u8>>, TransportError>;

    async fn disconnect(&mut self) -> Result<(), TransportError>;
}

/// Real connector backed by btleplug
pub struct BtleplugConnector {
    adapter_index: usize,

    /// Adapter (resolved on first use)
    adapter: OnceCell<Adapter>,

    /// Held while the adapter scans. Kettles share the adapter, so one
    /// lookup must not stop another's scan.
    scan_lock: Mutex<()>,
}

/// Run `lookup` with the scan lock held, giving up after `timeout`. `stop`
/// runs whether or not the lookup finished.
async fn exclusive_scan<T, L, S>(
    lock: &Mutex<()>,
    timeout: Duration,
    lookup: L,
    stop: S,
) -> Option<T>
where
    L: Future<Output = T>,
    S: Future<Output = ()>,
{
    let _guard = lock.lock().await;
    let result = tokio::time::timeout(timeout, lookup).await.ok();
    stop.await;
    result
}

async fn stop_scan(adapter: &Adapter) {
    if let Err(e) = adapter.stop_scan().await {
        debug!("Failed to stop scan: {}", e);
    }
}

impl BtleplugConnector {
    pub fn new(adapter_index: usize) -> Self {
        Self {
            adapter_index,
            adapter: OnceCell::new(),
            scan_lock: Mutex::new(()),
        }
    }

    async fn adapter(&self) -> Result<&Adapter, TransportError> {
        self.adapter
            .get_or_try_init(|| async {
                let manager = Manager::new().await?;
                let adapter = manager
                    .adapters()
                    .await?
                    .into_iter()
                    .nth(self.adapter_index)
                    .ok_or(TransportError::NoAdapter(self.adapter_index))?;
                info!(
                    "Using Bluetooth adapter {}: {}",
                    self.adapter_index,
                    adapter.adapter_info().await.unwrap_or_default()
                );
                Ok::<_, TransportError>(adapter)
            })
            .await
    }

    /// Scan until a peripheral with `address` shows up
    async fn find_peripheral(
        adapter: &Adapter,
        address: BDAddr,
    ) -> Result<Peripheral, TransportError> {
        adapter.start_scan(ScanFilter::default()).await?;
        loop {
            let found = adapter
                .peripherals()
                .await?
                .into_iter()
                .find(|p| p.address() == address);
            if let Some(peripheral) = found {
                return Ok(peripheral);
            }
            tokio::time::sleep(SCAN_POLL_INTERVAL).await;
        }
    }
}

#[async_trait]
impl KettleConnector for BtleplugConnector {
    async fn connect(
        &self,
        address: BDAddr,
        timeout: Duration,
    ) -> Result<Box<dyn KettleLink>, TransportError> {
        let adapter = self.adapter().await?;

        let peripheral = exclusive_scan(
            &self.scan_lock,
            timeout,
            Self::find_peripheral(adapter, address),
            stop_scan(adapter),
        )
        .await
        .ok_or(TransportError::NotFound(address))??;

        debug!("Connecting to {}", address);
        tokio::time::timeout(timeout, peripheral.connect())
            .await
            .map_err(|_| TransportError::Timeout("connecting"))??;

        let characteristic = match peripheral.discover_services().await {
            Ok(()) => peripheral
                .characteristics()
                .into_iter()
                .find(|c| c.uuid == CHAR_UUID),
            Err(e) => {
                let _ = peripheral.disconnect().await;
                return Err(e.into());
            }
        };

        match characteristic {
            Some(characteristic) => Ok(Box::new(BtleplugLink {
                peripheral,
                characteristic,
            })),
            None => {
                let _ = peripheral.disconnect().await;
                Err(TransportError::MissingCharacteristic(address))
            }
        }
    }

    async fn scan(&self, duration: Duration) -> Result<Vec<Advertisement>, TransportError> {
        let adapter = self.adapter().await?;

        info!("Scanning for kettles for {:?}", duration);
        {
            let _guard = self.scan_lock.lock().await;
            adapter.start_scan(ScanFilter::default()).await?;
            tokio::time::sleep(duration).await;
            if let Err(e) = adapter.stop_scan().await {
                warn!("Failed to stop scan: {}", e);
            }
        }

        let mut found = Vec::new();
        for peripheral in adapter.peripherals().await? {
            let Some(props) = peripheral.properties().await? else {
                continue;
            };
            let is_kettle = props
                .services
                .iter()
                .any(|s| *s == SERVICE_UUID || *s == CUSTOM_SERVICE_UUID);
            if is_kettle {
                found.push(Advertisement {
                    address: props.address,
                    name: props.local_name,
                    rssi: props.rssi,
                });
            }
        }

        Ok(found)
    }
}

struct BtleplugLink {
    peripheral: Peripheral,
    characteristic: Characteristic,
}

#[async_trait]
impl KettleLink for BtleplugLink {
    async fn write(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        debug!("Writing {}", hex::encode(frame));
        self.peripheral
            .write(&self.characteristic, frame, WriteType::WithResponse)
            .await?;
        Ok(())
    }

    async fn exchange(
        &mut self,
        request: &[u8],
        window: Duration,
    ) -> Result<Vec<Vec<u8>>, TransportError> {
        let mut stream = self.peripheral.notifications().await?;
        self.peripheral.subscribe(&self.characteristic).await?;
        self.write(request).await?;

        let deadline = tokio::time::Instant::now() + window;
        let mut frames = Vec::new();
        while let Ok(Some(notification)) = tokio::time::timeout_at(deadline, stream.next()).await {
            if notification.uuid == CHAR_UUID {
                debug!("Notification {}", hex::encode(&notification.value));
                frames.push(notification.value);
            }
        }

        if let Err(e) = self.peripheral.unsubscribe(&self.characteristic).await {
            debug!("Failed to unsubscribe: {}", e);
        }
        Ok(frames)
    }

    async fn disconnect(&mut self) -> Result<(), TransportError> {
        self.peripheral.disconnect().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::AtomicBool;
    use std::sync::atomic::AtomicU32;
    use std::sync::atomic::Ordering;

    use super::*;

    #[tokio::test]
    async fn test_scan_stopped_after_timeout() {
        let lock = Mutex::new(());
        let stopped = Arc::new(AtomicBool::new(false));

        let flag = stopped.clone();
        let result = exclusive_scan(
            &lock,
            Duration::from_millis(10),
            std::future::pending::<()>(),
            async move { flag.store(true, Ordering::SeqCst) },
        )
        .await;

        assert_eq!(result, None);
        assert!(stopped.load(Ordering::SeqCst));
        assert!(lock.try_lock().is_ok());
    }

    #[tokio::test]
    async fn test_scans_do_not_overlap() {
        let lock = Mutex::new(());
        let active = AtomicU32::new(0);
        let overlapped = AtomicBool::new(false);

        let (active, overlapped) = (&active, &overlapped);
        let lookup = move |id: u32| async move {
            if active.fetch_add(1, Ordering::SeqCst) > 0 {
                overlapped.store(true, Ordering::SeqCst);
            }
            tokio::task::yield_now().await;
            id
        };
        let stop = move || async move {
            active.fetch_sub(1, Ordering::SeqCst);
        };

        let (a, b) = tokio::join!(
            exclusive_scan(&lock, Duration::from_secs(5), lookup(1), stop()),
            exclusive_scan(&lock, Duration::from_secs(5), lookup(2), stop()),
        );

        assert_eq!((a, b), (Some(1), Some(2)));
        assert!(!overlapped.load(Ordering::SeqCst));
        assert_eq!(active.load(Ordering::SeqCst), 0);
    }
}

#[cfg(test)]
pub use mock::MockConnector;
#[cfg(test)]
pub use mock::MockKettle;

#[cfg(test)]
mod mock {
    use std::sync::Arc;
    use std::sync::Mutex;

    use super::*;

    /// Scripted kettle shared between a mock connector and its links
    #[derive(Debug, Default)]
    pub struct MockKettle {
        /// Returned from every `exchange`
        pub notifications: Vec<Vec<u8>>,
        /// Every frame written, exchange requests included
        pub written: Vec<Vec<u8>>,
        pub advertisements: Vec<Advertisement>,
        /// Fail this many connects with `NotFound` before succeeding
        pub connect_failures: u32,
        /// Fail every connect with a non-retryable error
        pub no_adapter: bool,
        pub connects: u32,
        pub disconnects: u32,
        /// `connect`/`disconnect` in the order they happened
        pub events: Vec<&'static str>,
    }

    #[derive(Debug, Clone, Default)]
    pub struct MockConnector {
        pub kettle: Arc<Mutex<MockKettle>>,
    }

    impl MockConnector {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn with_notifications(notifications: Vec<Vec<u8>>) -> Self {
            let connector = Self::new();
            connector.kettle.lock().unwrap().notifications = notifications;
            connector
        }
    }

    #[async_trait]
    impl KettleConnector for MockConnector {
        async fn connect(
            &self,
            address: BDAddr,
            _timeout: Duration,
        ) -> Result<Box<dyn KettleLink>, TransportError> {
            let mut kettle = self.kettle.lock().unwrap();
            kettle.connects += 1;
            kettle.events.push("connect");
            if kettle.no_adapter {
                return Err(TransportError::NoAdapter(0));
            }
            if kettle.connect_failures > 0 {
                kettle.connect_failures -= 1;
                return Err(TransportError::NotFound(address));
            }
            Ok(Box::new(MockLink {
                kettle: self.kettle.clone(),
            }))
        }

        async fn scan(&self, _duration: Duration) -> Result<Vec<Advertisement>, TransportError> {
            Ok(self.kettle.lock().unwrap().advertisements.clone())
        }
    }

    struct MockLink {
        kettle: Arc<Mutex<MockKettle>>,
    }

    #[async_trait]
    impl KettleLink for MockLink {
        async fn write(&mut self, frame: &[u8]) -> Result<(), TransportError> {
            self.kettle.lock().unwrap().written.push(frame.to_vec());
            tokio::task::yield_now().await;
            Ok(())
        }

        async fn exchange(
            &mut self,
            request: &[u8],
            _window: Duration,
        ) -> Result<Vec<Vec<u8>>, TransportError> {
            let notifications = {
                let mut kettle = self.kettle.lock().unwrap();
                kettle.written.push(request.to_vec());
                kettle.notifications.clone()
            };
            // Let other sessions run while notifications "arrive"
            tokio::task::yield_now().await;
            Ok(notifications)
        }

        async fn disconnect(&mut self) -> Result<(), TransportError> {
            let mut kettle = self.kettle.lock().unwrap();
            kettle.disconnects += 1;
            kettle.events.push("disconnect");
            Ok(())
        }
    }
}
