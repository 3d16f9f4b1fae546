use std::sync::Arc;
use std::time::Duration;

use btleplug::api::BDAddr;
use thiserror::Error;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;
use tracing::info;
use tracing::warn;

use super::protocol::parse_notifications;
use super::protocol::CommandEncoder;
use super::protocol::KettleReport;
use super::protocol::AUTH_SEQUENCE;
use super::transport::KettleConnector;
use super::transport::KettleLink;
use super::transport::TransportError;
use crate::config::KettleConfig;
use crate::engine::TemperatureUnit;

#[derive(Debug, Error)]
pub enum KettleError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("kettle {0} sent no notifications")]
    NoNotifications(BDAddr),
}

/// Timing and retry behaviour of a [`KettleClient`]
#[derive(Debug, Clone)]
pub struct ClientOptions {
    pub connection_timeout: Duration,
    /// How long to collect notifications after authenticating
    pub notification_window: Duration,
    pub max_attempts: u32,
    /// Wait before the second connection attempt; doubles on each further attempt
    pub backoff_base: Duration,
    /// Minimum time between two writes
    pub command_spacing: Duration,
}

impl Default for ClientOptions {
    fn default() -> Self {
        Self {
            connection_timeout: Duration::from_secs(15),
            notification_window: Duration::from_secs(2),
            max_attempts: 3,
            backoff_base: Duration::from_secs(2),
            command_spacing: Duration::from_millis(200),
        }
    }
}

impl From<&KettleConfig> for ClientOptions {
    fn from(config: &KettleConfig) -> Self {
        Self {
            connection_timeout: config.connection_timeout,
            notification_window: config.notification_window,
            max_attempts: config.max_attempts,
            ..Default::default()
        }
    }
}

#[derive(Debug, Default)]
struct Session {
    encoder: CommandEncoder,
    last_write: Option<Instant>,
}

impl Session {
    /// Sleep out whatever remains of `spacing` since the previous write
    async fn space_write(&mut self, spacing: Duration) {
        if let Some(last) = self.last_write {
            let elapsed = last.elapsed();
            if elapsed < spacing {
                tokio::time::sleep(spacing - elapsed).await;
            }
        }
        self.last_write = Some(Instant::now());
    }
}

/// Talks to one kettle in short sessions: connect, authenticate, operate,
/// disconnect. Sessions never overlap.
pub struct KettleClient {
    address: BDAddr,
    connector: Arc<dyn KettleConnector>,
    options: ClientOptions,
    /// Held for the whole of a session
    session: Mutex<Session>,
}

impl KettleClient {
    pub fn new(address: BDAddr, connector: Arc<dyn KettleConnector>, options: ClientOptions) -> Self {
        Self {
            address,
            connector,
            options,
            session: Mutex::new(Session::default()),
        }
    }

    pub fn address(&self) -> BDAddr {
        self.address
    }

    /// Authenticate and decode the state the kettle reports in response
    pub async fn poll(&self) -> Result<KettleReport, KettleError> {
        let mut session = self.session.lock().await;
        let mut link = self.connect().await?;

        session.space_write(self.options.command_spacing).await;
        let result = link
            .exchange(&AUTH_SEQUENCE, self.options.notification_window)
            .await
            .map_err(KettleError::from)
            .and_then(|frames| {
                if frames.is_empty() {
                    Err(KettleError::NoNotifications(self.address))
                } else {
                    debug!("{} sent {} notifications", self.address, frames.len());
                    Ok(parse_notifications(&frames))
                }
            });

        self.disconnect(link).await;
        result
    }

    pub async fn set_power(&self, on: bool) -> Result<(), KettleError> {
        info!("Turning {} {}", self.address, if on { "on" } else { "off" });
        self.command(|encoder| encoder.power(on)).await
    }

    /// Set the target temperature, clamped to the kettle's range for `unit`.
    /// Returns the setpoint actually written.
    pub async fn set_temperature(&self, value: f64, unit: TemperatureUnit) -> Result<u8, KettleError> {
        let degrees = unit.clamp(value);
        info!("Setting {} to {}{}", self.address, degrees, unit.symbol());
        self.command(|encoder| encoder.target_temperature(degrees))
            .await?;
        Ok(degrees)
    }

    async fn command(
        &self,
        build: impl FnOnce(&mut CommandEncoder) -> [u8; 8],
    ) -> Result<(), KettleError> {
        let mut session = self.session.lock().await;
        let mut link = self.connect().await?;

        let result = Self::authenticate_and_write(
            &mut session,
            link.as_mut(),
            self.options.command_spacing,
            build,
        )
        .await;

        self.disconnect(link).await;
        result.map_err(KettleError::from)
    }

    async fn authenticate_and_write(
        session: &mut Session,
        link: &mut dyn KettleLink,
        spacing: Duration,
        build: impl FnOnce(&mut CommandEncoder) -> [u8; 8],
    ) -> Result<(), TransportError> {
        session.space_write(spacing).await;
        link.write(&AUTH_SEQUENCE).await?;

        let frame = build(&mut session.encoder);
        session.space_write(spacing).await;
        link.write(&frame).await
    }

    /// Connect with exponential backoff between retryable failures
    async fn connect(&self) -> Result<Box<dyn KettleLink>, KettleError> {
        let mut attempt = 1;
        loop {
            match self
                .connector
                .connect(self.address, self.options.connection_timeout)
                .await
            {
                Ok(link) => return Ok(link),
                Err(e) if e.is_retryable() && attempt < self.options.max_attempts => {
                    attempt += 1;
                    let wait = self
                        .options
                        .backoff_base
                        .saturating_mul(2u32.saturating_pow(attempt - 2));
                    warn!(
                        "Connecting to {} failed: {}; attempt {} in {:?}",
                        self.address, e, attempt, wait
                    );
                    tokio::time::sleep(wait).await;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn disconnect(&self, mut link: Box<dyn KettleLink>) {
        if let Err(e) = link.disconnect().await {
            warn!("Error disconnecting from {}: {}", self.address, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::integrations::stagg::transport::MockConnector;

    fn test_address() -> BDAddr {
        BDAddr::from([0x24, 0xdc, 0xc3, 0x2d, 0x25, 0xb2])
    }

    fn instant_options() -> ClientOptions {
        ClientOptions {
            backoff_base: Duration::ZERO,
            command_spacing: Duration::ZERO,
            notification_window: Duration::ZERO,
            ..Default::default()
        }
    }

    fn client(connector: &MockConnector) -> KettleClient {
        KettleClient::new(test_address(), Arc::new(connector.clone()), instant_options())
    }

    #[tokio::test]
    async fn test_poll_authenticates_and_parses() {
        let connector = MockConnector::with_notifications(vec![
            vec![0xef, 0xdd, 0x00],
            vec![0x01],
            vec![0xef, 0xdd, 0x03],
            vec![95, 0],
        ]);

        let report = client(&connector).poll().await.unwrap();
        assert_eq!(report.power, Some(true));
        assert_eq!(report.current_temperature, Some(95));
        assert_eq!(report.unit, Some(TemperatureUnit::Celsius));

        let kettle = connector.kettle.lock().unwrap();
        assert_eq!(kettle.written, vec![AUTH_SEQUENCE.to_vec()]);
        assert_eq!(kettle.disconnects, 1);
    }

    #[tokio::test]
    async fn test_poll_without_notifications_fails() {
        let connector = MockConnector::new();
        let err = client(&connector).poll().await.unwrap_err();
        assert!(matches!(err, KettleError::NoNotifications(_)));
        assert_eq!(connector.kettle.lock().unwrap().disconnects, 1);
    }

    #[tokio::test]
    async fn test_commands_follow_auth_with_sequence() {
        let connector = MockConnector::new();
        let client = client(&connector);

        client.set_power(true).await.unwrap();
        let written = client
            .set_temperature(250.0, TemperatureUnit::Fahrenheit)
            .await
            .unwrap();
        assert_eq!(written, 212);

        let kettle = connector.kettle.lock().unwrap();
        let frames: Vec<String> = kettle.written.iter().map(hex::encode).collect();
        insta::assert_debug_snapshot!(frames, @r#"
        [
            "efdd0b3031323334353637383930313233349a6d",
            "efdd0a0000010100",
            "efdd0b3031323334353637383930313233349a6d",
            "efdd0a0101d4d501",
        ]
        "#);
        assert_eq!(kettle.connects, 2);
        assert_eq!(kettle.disconnects, 2);
    }

    #[tokio::test]
    async fn test_connect_retries_then_succeeds() {
        let connector = MockConnector::new();
        connector.kettle.lock().unwrap().connect_failures = 2;

        client(&connector).set_power(false).await.unwrap();
        assert_eq!(connector.kettle.lock().unwrap().connects, 3);
    }

    #[tokio::test]
    async fn test_connect_gives_up_after_max_attempts() {
        let connector = MockConnector::new();
        connector.kettle.lock().unwrap().connect_failures = 5;

        let err = client(&connector).set_power(false).await.unwrap_err();
        assert!(matches!(
            err,
            KettleError::Transport(TransportError::NotFound(_))
        ));
        assert_eq!(connector.kettle.lock().unwrap().connects, 3);
    }

    #[tokio::test]
    async fn test_configuration_errors_not_retried() {
        let connector = MockConnector::new();
        connector.kettle.lock().unwrap().no_adapter = true;

        assert!(client(&connector).poll().await.is_err());
        assert_eq!(connector.kettle.lock().unwrap().connects, 1);
    }

    #[tokio::test]
    async fn test_concurrent_sessions_do_not_overlap() {
        let connector = MockConnector::with_notifications(vec![vec![0xef, 0xdd, 0x00], vec![1]]);
        let client = client(&connector);

        let (polled, powered, _) = tokio::join!(
            client.poll(),
            client.set_power(true),
            client.set_temperature(200.0, TemperatureUnit::Fahrenheit),
        );
        polled.unwrap();
        powered.unwrap();

        let kettle = connector.kettle.lock().unwrap();
        let mut open = false;
        for event in &kettle.events {
            match *event {
                "connect" => {
                    assert!(!open, "connected while a session was open: {:?}", kettle.events);
                    open = true;
                }
                "disconnect" => open = false,
                other => panic!("unexpected event {other}"),
            }
        }
        assert!(!open);
        assert_eq!(kettle.events.len(), 6);
    }

    #[tokio::test]
    async fn test_writes_are_spaced() {
        let connector = MockConnector::new();
        let client = KettleClient::new(
            test_address(),
            Arc::new(connector.clone()),
            ClientOptions {
                command_spacing: Duration::from_millis(50),
                ..instant_options()
            },
        );

        let start = std::time::Instant::now();
        client.set_power(true).await.unwrap();
        // auth then command: one full spacing between them
        assert!(start.elapsed() >= Duration::from_millis(50));
    }
}
