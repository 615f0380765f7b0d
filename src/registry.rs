//! DeviceRegistry - In-memory device set with subscription support
//!
//! The registry owns the canonical copy of every device the gateway has seen
//! and notifies subscribers on updates. It is the only mutable state shared
//! across components: discovery writes sightings, the dispatcher writes
//! optimistic state updates, readers take point-in-time snapshots.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::debug;

use crate::device::{clamp_brightness, clamp_kelvin, Command, Device};

type DeviceMap = HashMap<String, Device>;
type SubscriberFn = Arc<dyn Fn(&Device) + Send + Sync>;

/// Current timestamp in milliseconds since epoch
pub(crate) fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Stores every known device and notifies subscribers on updates
#[derive(Clone)]
pub struct DeviceRegistry {
    devices: Arc<RwLock<DeviceMap>>,
    subscribers: Arc<RwLock<Vec<SubscriberFn>>>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self {
            devices: Arc::new(RwLock::new(DeviceMap::new())),
            subscribers: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Register a discovery sighting and publish to subscribers
    ///
    /// First sighting creates the device; later sightings update it in place,
    /// keyed by the immutable device id (duplicates overwrite, they do not
    /// duplicate). Devices are never removed here.
    pub fn upsert_from_discovery(&self, mut device: Device) {
        device.online = true;
        device.last_seen = now_ms();

        let stored = {
            let mut devices = self.devices.write().unwrap();
            match devices.get_mut(&device.id) {
                Some(existing) => {
                    // id is immutable; everything else follows the sighting
                    existing.name = device.name;
                    existing.model = device.model;
                    existing.ip = device.ip;
                    existing.lan_enabled = device.lan_enabled;
                    existing.online = true;
                    existing.state = device.state;
                    existing.capabilities = device.capabilities;
                    existing.last_seen = device.last_seen;
                    existing.clone()
                }
                None => {
                    debug!("New device registered: {} ({})", device.name, device.id);
                    devices.insert(device.id.clone(), device.clone());
                    device
                }
            }
        };

        self.notify(&stored);
    }

    /// Apply a confirmed command to the cached state
    ///
    /// LAN devices do not reliably push state-changed notifications, so the
    /// dispatcher calls this optimistically after every acknowledged send.
    pub fn apply_command(&self, device_id: &str, command: &Command) {
        let updated = {
            let mut devices = self.devices.write().unwrap();
            let Some(device) = devices.get_mut(device_id) else {
                return;
            };

            match command {
                Command::Turn(on) => device.state.on = *on,
                Command::Brightness(level) => {
                    device.state.brightness = clamp_brightness(*level as u32)
                }
                Command::ColorAndTemp { color, kelvin } => {
                    if let Some(c) = color {
                        device.state.color = *c;
                    }
                    if let Some(k) = kelvin {
                        device.state.color_temperature = clamp_kelvin(*k as u32);
                    }
                }
                Command::StatusQuery => return,
            }
            device.online = true;
            device.last_seen = now_ms();
            device.clone()
        };

        self.notify(&updated);
    }

    /// Mark a device unreachable; it stays in the registry
    pub fn mark_unreachable(&self, device_id: &str) {
        let updated = {
            let mut devices = self.devices.write().unwrap();
            match devices.get_mut(device_id) {
                Some(device) => {
                    device.online = false;
                    device.clone()
                }
                None => return,
            }
        };
        self.notify(&updated);
    }

    /// Read view of a single device
    pub fn get(&self, device_id: &str) -> Option<Device> {
        self.devices.read().unwrap().get(device_id).cloned()
    }

    /// Point-in-time snapshot of all devices, sorted by id for stable output
    pub fn snapshot(&self) -> Vec<Device> {
        let mut devices: Vec<Device> = self.devices.read().unwrap().values().cloned().collect();
        devices.sort_by(|a, b| a.id.cmp(&b.id));
        devices
    }

    pub fn len(&self) -> usize {
        self.devices.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.read().unwrap().is_empty()
    }

    /// Drop all devices (development/testing surface)
    pub fn clear(&self) {
        self.devices.write().unwrap().clear();
    }

    /// Subscribe to device update notifications
    pub fn subscribe<F>(&self, listener: F)
    where
        F: Fn(&Device) + Send + Sync + 'static,
    {
        self.subscribers.write().unwrap().push(Arc::new(listener));
    }

    fn notify(&self, device: &Device) {
        let subscribers = self.subscribers.read().unwrap();
        for subscriber in subscribers.iter() {
            subscriber(device);
        }
    }
}

impl Default for DeviceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{DeviceCapabilities, DeviceState, RgbColor};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn make_test_device(id: &str, ip: &str) -> Device {
        Device {
            id: id.to_string(),
            name: format!("Test {}", id),
            model: "H6159".to_string(),
            ip: ip.parse().unwrap(),
            lan_enabled: true,
            online: true,
            state: DeviceState::default(),
            capabilities: DeviceCapabilities::default(),
            last_seen: 0,
        }
    }

    #[test]
    fn upsert_creates_then_updates_in_place() {
        let registry = DeviceRegistry::new();
        registry.upsert_from_discovery(make_test_device("AA:01", "192.168.1.10"));
        assert_eq!(registry.len(), 1);

        // Same id, new address: overwrite, not duplicate
        let mut updated = make_test_device("AA:01", "192.168.1.99");
        updated.name = "Renamed".to_string();
        registry.upsert_from_discovery(updated);

        assert_eq!(registry.len(), 1);
        let device = registry.get("AA:01").unwrap();
        assert_eq!(device.ip.to_string(), "192.168.1.99");
        assert_eq!(device.name, "Renamed");
        assert!(device.last_seen > 0);
    }

    #[test]
    fn apply_command_updates_cached_state() {
        let registry = DeviceRegistry::new();
        registry.upsert_from_discovery(make_test_device("AA:01", "192.168.1.10"));

        registry.apply_command("AA:01", &Command::Turn(true));
        registry.apply_command("AA:01", &Command::Brightness(80));
        registry.apply_command(
            "AA:01",
            &Command::ColorAndTemp {
                color: Some(RgbColor::new(255, 0, 0)),
                kelvin: None,
            },
        );

        let device = registry.get("AA:01").unwrap();
        assert!(device.state.on);
        assert_eq!(device.state.brightness, 80);
        assert_eq!(device.state.color, RgbColor::new(255, 0, 0));
        // colorwc without kelvin leaves the cached temperature alone
        assert_eq!(device.state.color_temperature, 5000);
    }

    #[test]
    fn apply_command_on_unknown_device_is_a_no_op() {
        let registry = DeviceRegistry::new();
        registry.apply_command("missing", &Command::Turn(true));
        assert!(registry.is_empty());
    }

    #[test]
    fn mark_unreachable_keeps_the_device() {
        let registry = DeviceRegistry::new();
        registry.upsert_from_discovery(make_test_device("AA:01", "192.168.1.10"));

        registry.mark_unreachable("AA:01");

        assert_eq!(registry.len(), 1);
        assert!(!registry.get("AA:01").unwrap().online);
    }

    #[test]
    fn subscribers_see_every_update() {
        let registry = DeviceRegistry::new();
        let counter = Arc::new(AtomicUsize::new(0));
        let counter_clone = counter.clone();

        registry.subscribe(move |_device| {
            counter_clone.fetch_add(1, Ordering::SeqCst);
        });

        registry.upsert_from_discovery(make_test_device("AA:01", "192.168.1.10"));
        registry.apply_command("AA:01", &Command::Turn(true));
        registry.mark_unreachable("AA:01");

        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn snapshot_is_sorted_and_detached() {
        let registry = DeviceRegistry::new();
        registry.upsert_from_discovery(make_test_device("BB:02", "192.168.1.11"));
        registry.upsert_from_discovery(make_test_device("AA:01", "192.168.1.10"));

        let snapshot = registry.snapshot();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].id, "AA:01");

        // Mutations after the snapshot do not bleed into it
        registry.apply_command("AA:01", &Command::Turn(true));
        assert!(!snapshot[0].state.on);
    }
}
