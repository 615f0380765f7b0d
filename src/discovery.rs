//! Multicast device discovery
//!
//! Runs a time-bounded scan over the injected transport and folds every
//! well-formed response into the device registry. Device population over UDP
//! is inherently best-effort: partial results are a success, malformed
//! datagrams are discarded, and a timeout simply returns what was collected.

use anyhow::Result;
use once_cell::sync::Lazy;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::device::{Device, DeviceCapabilities, DeviceState};
use crate::protocol;
use crate::registry::DeviceRegistry;
use crate::transport::Transport;

/// Scan parameters; defaults match what the fixtures listen for
#[derive(Debug, Clone)]
pub struct DiscoveryOptions {
    pub timeout: Duration,
    pub multicast_group: Ipv4Addr,
    pub discovery_port: u16,
    pub response_port: u16,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_millis(5000),
            multicast_group: Ipv4Addr::new(239, 255, 255, 250),
            discovery_port: 4001,
            response_port: 4002,
        }
    }
}

/// Runs discovery scans and feeds the registry
pub struct DiscoveryEngine {
    transport: Arc<dyn Transport>,
    registry: DeviceRegistry,
    in_flight: AtomicBool,
}

/// Clears the in-flight flag on every exit path
struct InFlightGuard<'a>(&'a AtomicBool);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl DiscoveryEngine {
    pub fn new(transport: Arc<dyn Transport>, registry: DeviceRegistry) -> Self {
        Self {
            transport,
            registry,
            in_flight: AtomicBool::new(false),
        }
    }

    /// Run one bounded discovery scan and return the registry snapshot
    ///
    /// At most one session runs at a time: a call arriving while a scan is in
    /// flight returns the current partial snapshot instead of starting a
    /// second listener on the same sockets.
    pub async fn discover(&self, options: &DiscoveryOptions) -> Result<Vec<Device>> {
        if self.in_flight.swap(true, Ordering::SeqCst) {
            warn!("Discovery already in flight; returning current snapshot");
            return Ok(self.registry.snapshot());
        }
        let _guard = InFlightGuard(&self.in_flight);

        info!(
            "🔍 Starting discovery scan ({}:{}, {} ms window)",
            options.multicast_group,
            options.discovery_port,
            options.timeout.as_millis()
        );

        if let Err(e) = self
            .transport
            .join_multicast(options.multicast_group, options.response_port)
            .await
        {
            // Some interfaces refuse the join; broadcast still reaches devices
            warn!("Multicast join failed ({}); continuing with broadcast", e);
        }

        self.send_scan_request(options).await?;

        let deadline = Instant::now() + options.timeout;
        let mut responses = 0usize;
        let mut accepted = 0usize;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }

            match self.transport.recv_timeout(remaining).await {
                Ok(Some((payload, from))) => {
                    responses += 1;
                    match protocol::parse_device_response(&payload, from) {
                        Some(device) => {
                            debug!(
                                "Discovery response from {}: {} ({})",
                                from, device.name, device.id
                            );
                            self.registry.upsert_from_discovery(device);
                            accepted += 1;
                        }
                        None => {
                            warn!("Discarding malformed discovery response from {}", from);
                        }
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    // Receive hiccups must never abort the session
                    warn!("Receive error during discovery: {}", e);
                }
            }
        }

        info!(
            "✅ Discovery complete: {} responses, {} devices ({} known)",
            responses,
            accepted,
            self.registry.len()
        );
        Ok(self.registry.snapshot())
    }

    /// Broadcast the scan request, falling back to multicast
    ///
    /// Broadcast reaches devices on networks where multicast routing is
    /// filtered, so it is tried first; the multicast group is the fallback.
    async fn send_scan_request(&self, options: &DiscoveryOptions) -> Result<()> {
        let request = protocol::encode_scan_request();

        match self
            .transport
            .send_to(
                Ipv4Addr::BROADCAST.into(),
                options.discovery_port,
                &request,
            )
            .await
        {
            Ok(()) => {
                debug!("Scan request broadcast on port {}", options.discovery_port);
                Ok(())
            }
            Err(e) => {
                warn!("Broadcast failed ({}); trying multicast", e);
                self.transport
                    .send_to(
                        options.multicast_group.into(),
                        options.discovery_port,
                        &request,
                    )
                    .await?;
                debug!("Scan request multicast to {}", options.multicast_group);
                Ok(())
            }
        }
    }
}

/// Fixed placeholder device set for development without a transport
///
/// Clearly marked via name and model; only ever seeded through the explicit
/// placeholder constructor of the controller, never as real discovery output.
pub fn placeholder_devices() -> Vec<Device> {
    static PLACEHOLDER_DEVICES: Lazy<Vec<Device>> = Lazy::new(|| {
        vec![
            Device {
                id: "AA:BB:CC:DD:EE:01".to_string(),
                name: "Placeholder Strip".to_string(),
                model: "DEV-PLACEHOLDER".to_string(),
                ip: Ipv4Addr::LOCALHOST.into(),
                lan_enabled: true,
                online: true,
                state: DeviceState::default(),
                capabilities: DeviceCapabilities::default(),
                last_seen: 0,
            },
            Device {
                id: "AA:BB:CC:DD:EE:02".to_string(),
                name: "Placeholder Bulb".to_string(),
                model: "DEV-PLACEHOLDER".to_string(),
                ip: Ipv4Addr::LOCALHOST.into(),
                lan_enabled: true,
                online: true,
                state: DeviceState::default(),
                capabilities: DeviceCapabilities {
                    music_mode: true,
                    ..DeviceCapabilities::default()
                },
                last_seen: 0,
            },
        ]
    });
    PLACEHOLDER_DEVICES.clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::MockTransport;
    use std::net::SocketAddr;

    fn scan_response(id: &str, ip: &str) -> Vec<u8> {
        format!(
            r#"{{"msg":{{"cmd":"scan","data":{{"device":"{}","sku":"H6159","ip":"{}"}}}}}}"#,
            id, ip
        )
        .into_bytes()
    }

    fn from_addr(ip: &str) -> SocketAddr {
        format!("{}:4002", ip).parse().unwrap()
    }

    fn options() -> DiscoveryOptions {
        DiscoveryOptions {
            timeout: Duration::from_millis(500),
            ..DiscoveryOptions::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn collects_devices_and_discards_garbage() {
        let transport = Arc::new(MockTransport::new());
        transport.queue_response(
            Duration::from_millis(50),
            scan_response("AA:01", "192.168.1.10"),
            from_addr("192.168.1.10"),
        );
        transport.queue_response(
            Duration::from_millis(20),
            b"definitely not json".to_vec(),
            from_addr("192.168.1.66"),
        );
        transport.queue_response(
            Duration::from_millis(20),
            scan_response("AA:02", "192.168.1.11"),
            from_addr("192.168.1.11"),
        );

        let registry = DeviceRegistry::new();
        let engine = DiscoveryEngine::new(transport.clone(), registry.clone());

        let devices = engine.discover(&options()).await.unwrap();

        assert_eq!(devices.len(), 2);
        assert_eq!(registry.len(), 2);
        // Scan request went out exactly once (broadcast succeeded)
        assert_eq!(transport.sent_count(), 1);
        assert_eq!(transport.sent()[0].port, 4001);
        assert_eq!(
            transport.joined_groups(),
            vec![(Ipv4Addr::new(239, 255, 255, 250), 4002)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_responses_overwrite() {
        let transport = Arc::new(MockTransport::new());
        transport.queue_response(
            Duration::from_millis(10),
            scan_response("AA:01", "192.168.1.10"),
            from_addr("192.168.1.10"),
        );
        transport.queue_response(
            Duration::from_millis(10),
            scan_response("AA:01", "192.168.1.42"),
            from_addr("192.168.1.42"),
        );

        let registry = DeviceRegistry::new();
        let engine = DiscoveryEngine::new(transport, registry.clone());

        let devices = engine.discover(&options()).await.unwrap();

        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].ip.to_string(), "192.168.1.42");
    }

    #[tokio::test(start_paused = true)]
    async fn empty_network_times_out_with_empty_success() {
        let transport = Arc::new(MockTransport::new());
        let engine = DiscoveryEngine::new(transport, DeviceRegistry::new());

        let started = Instant::now();
        let devices = engine.discover(&options()).await.unwrap();

        assert!(devices.is_empty());
        // Bounded by the configured window
        assert!(started.elapsed() >= Duration::from_millis(500));
        assert!(started.elapsed() < Duration::from_millis(600));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_discover_shares_one_scan() {
        let transport = Arc::new(MockTransport::new());
        transport.queue_response(
            Duration::from_millis(400),
            scan_response("AA:01", "192.168.1.10"),
            from_addr("192.168.1.10"),
        );

        let registry = DeviceRegistry::new();
        let engine = Arc::new(DiscoveryEngine::new(transport.clone(), registry));

        let first = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.discover(&options()).await.unwrap() })
        };

        // Let the first session claim the in-flight flag
        tokio::task::yield_now().await;

        let second = engine.discover(&options()).await.unwrap();
        // Re-entrant call returned the in-flight snapshot without scanning
        assert!(second.is_empty());
        assert_eq!(transport.sent_count(), 1);

        let first = first.await.unwrap();
        assert_eq!(first.len(), 1);
    }

    #[test]
    fn placeholder_set_is_clearly_marked() {
        let devices = placeholder_devices();
        assert_eq!(devices.len(), 2);
        assert!(devices.iter().all(|d| d.model == "DEV-PLACEHOLDER"));
        assert!(devices.iter().all(|d| d.name.starts_with("Placeholder")));
    }
}
