//! Command dispatch with retry and pacing
//!
//! Turns semantic commands into wire datagrams, retries transient transport
//! failures, and paces batch sends so constrained device radios are never
//! saturated. Failures surface as booleans, not errors, so batch operations
//! proceed past individual drop-outs.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

use crate::device::Command;
use crate::protocol;
use crate::registry::DeviceRegistry;
use crate::transport::Transport;

/// Dispatch tuning; defaults match what the fixtures tolerate
#[derive(Debug, Clone)]
pub struct DispatchOptions {
    /// Attempts per command before reporting failure
    pub max_attempts: u32,
    /// Fixed delay between attempts
    pub retry_delay: Duration,
    /// Minimum spacing between sends within one batch
    pub pacing_delay: Duration,
    /// How long a status query waits for its response
    pub status_timeout: Duration,
    /// Unicast control port on the devices
    pub control_port: u16,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            retry_delay: Duration::from_millis(500),
            pacing_delay: Duration::from_millis(50),
            status_timeout: Duration::from_millis(2000),
            control_port: 4001,
        }
    }
}

/// One entry of a paced batch send
#[derive(Debug, Clone)]
pub struct BatchEntry {
    pub addr: IpAddr,
    pub id: String,
    pub command: Command,
}

/// Sends commands to devices through the injected transport
pub struct CommandDispatcher {
    transport: Arc<dyn Transport>,
    registry: DeviceRegistry,
    options: DispatchOptions,
}

impl CommandDispatcher {
    pub fn new(
        transport: Arc<dyn Transport>,
        registry: DeviceRegistry,
        options: DispatchOptions,
    ) -> Self {
        Self { transport, registry, options }
    }

    pub fn options(&self) -> &DispatchOptions {
        &self.options
    }

    /// Send one command, retrying up to the configured attempt limit
    ///
    /// Returns `true` on the first acknowledged attempt. On success the
    /// registry's cached state for the device is updated optimistically. A
    /// command is failed only after every attempt is exhausted, and the device
    /// is then marked unreachable.
    pub async fn send(&self, addr: IpAddr, device_id: &str, command: &Command) -> bool {
        let Some(payload) = protocol::encode_command(command) else {
            warn!(
                "Refusing to dispatch empty {} command to {}",
                command.name(),
                device_id
            );
            return false;
        };

        for attempt in 1..=self.options.max_attempts {
            trace!(
                "Dispatch {} to {} (attempt {}/{})",
                command.name(),
                device_id,
                attempt,
                self.options.max_attempts
            );

            match self.attempt(addr, device_id, command, &payload).await {
                Ok(()) => {
                    self.registry.apply_command(device_id, command);
                    return true;
                }
                Err(e) => {
                    debug!(
                        "Attempt {}/{} for {} to {} failed: {}",
                        attempt,
                        self.options.max_attempts,
                        command.name(),
                        device_id,
                        e
                    );
                    if attempt < self.options.max_attempts {
                        tokio::time::sleep(self.options.retry_delay).await;
                    }
                }
            }
        }

        warn!(
            "⚠️  Command {} to {} failed after {} attempts",
            command.name(),
            device_id,
            self.options.max_attempts
        );
        self.registry.mark_unreachable(device_id);
        false
    }

    /// Send a batch sequentially, pacing between dispatches
    ///
    /// Order reflects input order and the returned booleans are positional.
    /// The pacing delay is a deliberate throughput cap for device firmware,
    /// not a correctness requirement.
    pub async fn send_batch(&self, entries: &[BatchEntry]) -> Vec<bool> {
        let mut results = Vec::with_capacity(entries.len());

        for (index, entry) in entries.iter().enumerate() {
            if index > 0 {
                tokio::time::sleep(self.options.pacing_delay).await;
            }
            results.push(self.send(entry.addr, &entry.id, &entry.command).await);
        }

        results
    }

    async fn attempt(
        &self,
        addr: IpAddr,
        device_id: &str,
        command: &Command,
        payload: &[u8],
    ) -> anyhow::Result<()> {
        self.transport
            .send_to(addr, self.options.control_port, payload)
            .await?;

        if matches!(command, Command::StatusQuery) {
            // Status queries are only acknowledged by an actual response
            match self.transport.recv_timeout(self.options.status_timeout).await? {
                Some((response, from)) => {
                    match protocol::parse_device_response(&response, from) {
                        Some(device) => {
                            debug!("Status response for {} from {}", device.id, from);
                            self.registry.upsert_from_discovery(device);
                        }
                        None => {
                            // Any response keeps the command alive; a malformed
                            // one just cannot refresh the cache
                            warn!("Discarding malformed status response from {}", from);
                        }
                    }
                    Ok(())
                }
                None => anyhow::bail!("no status response from {} within timeout", device_id),
            }
        } else {
            Ok(())
        }
    }
}
