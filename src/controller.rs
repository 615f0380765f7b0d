//! LightController - Core orchestration of discovery, dispatch, and sync
//!
//! The controller is the management surface of the gateway. It owns the
//! device registry, discovery engine, command dispatcher, sync engine, and
//! scene player, and is a plain constructible service object: the caller
//! decides how many to create and injects the transport once at construction.

use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::color::{FeatureSource, PixelSource};
use crate::config::AppConfig;
use crate::device::{
    clamp_brightness, clamp_kelvin, Command, Device, RgbColor,
};
use crate::discovery::{placeholder_devices, DiscoveryEngine};
use crate::dispatcher::{BatchEntry, CommandDispatcher};
use crate::error::{Error, Result};
use crate::registry::DeviceRegistry;
use crate::scene::ScenePlayer;
use crate::sync::{SyncEngine, SyncOptions, SyncStats};
use crate::transport::{NullTransport, Transport};

/// Service object driving LAN lighting fixtures
pub struct LightController {
    config: AppConfig,
    registry: DeviceRegistry,
    discovery: DiscoveryEngine,
    dispatcher: Arc<CommandDispatcher>,
    sync: SyncEngine,
    scenes: ScenePlayer,
    placeholder: bool,
}

impl LightController {
    /// Create a controller over an injected transport
    pub fn new(transport: Arc<dyn Transport>, config: AppConfig) -> Self {
        let registry = DeviceRegistry::new();
        let dispatcher = Arc::new(CommandDispatcher::new(
            transport.clone(),
            registry.clone(),
            config.dispatch_options(),
        ));

        Self {
            registry: registry.clone(),
            discovery: DiscoveryEngine::new(transport, registry.clone()),
            sync: SyncEngine::new(dispatcher.clone(), registry.clone()),
            scenes: ScenePlayer::new(dispatcher.clone(), registry),
            dispatcher,
            config,
            placeholder: false,
        }
    }

    /// Create a controller with the development placeholder device set
    ///
    /// No transport is available on this path: sends go to a [`NullTransport`]
    /// and the registry is seeded with clearly-marked placeholder devices.
    /// Never use this as a stand-in for real discovery in production.
    pub fn with_placeholder(config: AppConfig) -> Self {
        warn!("⚠️  Placeholder mode: seeding development device set, no real transport");
        let controller = Self {
            placeholder: true,
            ..Self::new(Arc::new(NullTransport), config)
        };
        for device in placeholder_devices() {
            controller.registry.upsert_from_discovery(device);
        }
        controller
    }

    /// Whether this controller runs on the placeholder device set
    pub fn is_placeholder(&self) -> bool {
        self.placeholder
    }

    /// Run a discovery scan and return the known device set
    ///
    /// In placeholder mode the seeded set is returned directly, with a
    /// warning, so it can never masquerade as real scan output.
    pub async fn discover(&self) -> anyhow::Result<Vec<Device>> {
        if self.placeholder {
            warn!("Discovery skipped: placeholder device set is active");
            return Ok(self.registry.snapshot());
        }
        self.discovery.discover(&self.config.discovery_options()).await
    }

    /// Point-in-time snapshot of all known devices
    pub fn devices(&self) -> Vec<Device> {
        self.registry.snapshot()
    }

    /// Read view of one device
    pub fn device(&self, device_id: &str) -> Option<Device> {
        self.registry.get(device_id)
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    /// Turn a device on or off
    pub async fn set_power(&self, device_id: &str, on: bool) -> Result<bool> {
        self.send_to_device(device_id, Command::Turn(on)).await
    }

    /// Set brightness; the value is clamped to 0-100
    pub async fn set_brightness(&self, device_id: &str, value: u32) -> Result<bool> {
        self.send_to_device(device_id, Command::Brightness(clamp_brightness(value)))
            .await
    }

    /// Set RGB color
    pub async fn set_color(&self, device_id: &str, color: RgbColor) -> Result<bool> {
        self.send_to_device(
            device_id,
            Command::ColorAndTemp { color: Some(color), kelvin: None },
        )
        .await
    }

    /// Set color temperature; the value is clamped to the supported window
    pub async fn set_color_temperature(&self, device_id: &str, kelvin: u32) -> Result<bool> {
        self.send_to_device(
            device_id,
            Command::ColorAndTemp { color: None, kelvin: Some(clamp_kelvin(kelvin)) },
        )
        .await
    }

    /// Query a device's state, refreshing the registry cache on response
    pub async fn query_status(&self, device_id: &str) -> Result<bool> {
        self.send_to_device(device_id, Command::StatusQuery).await
    }

    /// Send one color to every online LAN device, paced
    pub async fn set_all_colors(&self, color: RgbColor) -> Vec<bool> {
        self.set_zone_colors(&[color]).await
    }

    /// Send zone colors round-robin across the online LAN devices, paced
    pub async fn set_zone_colors(&self, colors: &[RgbColor]) -> Vec<bool> {
        if colors.is_empty() {
            return Vec::new();
        }

        let entries: Vec<BatchEntry> = self
            .registry
            .snapshot()
            .into_iter()
            .filter(|d| d.lan_enabled && d.online)
            .enumerate()
            .map(|(index, device)| BatchEntry {
                addr: device.ip,
                id: device.id,
                command: Command::ColorAndTemp {
                    color: Some(colors[index % colors.len()]),
                    kelvin: None,
                },
            })
            .collect();

        if entries.is_empty() {
            debug!("set_zone_colors: no online devices");
            return Vec::new();
        }
        self.dispatcher.send_batch(&entries).await
    }

    /// Start a sync session against a pixel source
    ///
    /// Starting without a source is a configuration error; starting while a
    /// session runs is a warned no-op. Options default from the loaded config.
    pub fn start_sync(
        &self,
        source: Option<Arc<dyn PixelSource>>,
        features: Option<Arc<dyn FeatureSource>>,
        options: Option<SyncOptions>,
    ) -> Result<()> {
        let source = source.ok_or(Error::NoPixelSource)?;
        let options = options.unwrap_or_else(|| self.config.sync_options());
        self.sync.start(source, features, options)
    }

    /// Stop the sync session; always safe
    pub async fn stop_sync(&self) {
        self.sync.stop().await;
    }

    pub fn sync_stats(&self) -> SyncStats {
        self.sync.stats()
    }

    /// Play a configured scene by name
    pub fn play_scene(&self, name: &str) -> Result<()> {
        let scene = self
            .config
            .scene(name)
            .ok_or_else(|| Error::UnknownScene(name.to_string()))?;
        self.scenes.play(scene)
    }

    /// Stop scene playback; always safe
    pub async fn stop_scene(&self) {
        self.scenes.stop().await;
    }

    /// Name of the scene currently playing, if any
    pub fn playing_scene(&self) -> Option<String> {
        self.scenes.playing()
    }

    /// Shut down all running sessions
    pub async fn shutdown(&self) {
        self.stop_sync().await;
        self.stop_scene().await;
        info!("Controller shut down");
    }

    async fn send_to_device(&self, device_id: &str, command: Command) -> Result<bool> {
        let device = self
            .registry
            .get(device_id)
            .ok_or_else(|| Error::UnknownDevice(device_id.to_string()))?;

        // Devices are trusted to ignore unsupported commands; just leave a trace
        if !command.supported_by(&device.capabilities) {
            debug!(
                "Device {} does not advertise support for {}",
                device_id,
                command.name()
            );
        }

        Ok(self.dispatcher.send(device.ip, device_id, &command).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::SampleRegion;
    use crate::device::{DeviceCapabilities, DeviceState};
    use crate::transport::testing::MockTransport;
    use std::time::Duration;

    struct RedSource;

    impl PixelSource for RedSource {
        fn sample_pixels(&self, _region: SampleRegion) -> Vec<RgbColor> {
            vec![RgbColor::new(255, 0, 0); 8]
        }
    }

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

    fn make_controller(transport: Arc<MockTransport>, device_count: usize) -> LightController {
        let controller = LightController::new(transport, AppConfig::default());
        for i in 1..=device_count {
            controller.registry.upsert_from_discovery(make_test_device(
                &format!("AA:0{}", i),
                &format!("192.168.1.1{}", i),
            ));
        }
        controller
    }

    #[tokio::test(start_paused = true)]
    async fn set_all_colors_updates_both_cached_states_with_pacing() {
        let transport = Arc::new(MockTransport::new());
        let controller = make_controller(transport.clone(), 2);

        let red = RgbColor::new(255, 0, 0);
        let results = controller.set_all_colors(red).await;

        assert_eq!(results, vec![true, true]);
        for id in ["AA:01", "AA:02"] {
            assert_eq!(controller.device(id).unwrap().state.color, red);
        }

        let sent = transport.sent();
        assert_eq!(sent.len(), 2);
        assert!(sent[1].at - sent[0].at >= Duration::from_millis(50));
    }

    #[tokio::test(start_paused = true)]
    async fn zone_colors_round_robin_over_devices() {
        let transport = Arc::new(MockTransport::new());
        let controller = make_controller(transport.clone(), 3);

        let colors = [RgbColor::new(255, 0, 0), RgbColor::new(0, 0, 255)];
        let results = controller.set_zone_colors(&colors).await;
        assert_eq!(results.len(), 3);

        assert_eq!(controller.device("AA:01").unwrap().state.color, colors[0]);
        assert_eq!(controller.device("AA:02").unwrap().state.color, colors[1]);
        assert_eq!(controller.device("AA:03").unwrap().state.color, colors[0]);
    }

    #[tokio::test(start_paused = true)]
    async fn commands_on_unknown_devices_are_errors() {
        let transport = Arc::new(MockTransport::new());
        let controller = make_controller(transport, 0);

        let result = controller.set_power("GHOST", true).await;
        assert!(matches!(result, Err(Error::UnknownDevice(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn brightness_and_kelvin_inputs_are_clamped() {
        let transport = Arc::new(MockTransport::new());
        let controller = make_controller(transport.clone(), 1);

        assert!(controller.set_brightness("AA:01", 400).await.unwrap());
        assert!(controller.set_color_temperature("AA:01", 50_000).await.unwrap());

        let device = controller.device("AA:01").unwrap();
        assert_eq!(device.state.brightness, 100);
        assert_eq!(device.state.color_temperature, 9000);
    }

    #[tokio::test(start_paused = true)]
    async fn sync_requires_a_pixel_source() {
        let transport = Arc::new(MockTransport::new());
        let controller = make_controller(transport, 1);

        let result = controller.start_sync(None, None, None);
        assert!(matches!(result, Err(Error::NoPixelSource)));
        assert!(!controller.sync_stats().running);
    }

    #[tokio::test(start_paused = true)]
    async fn sync_lifecycle_through_the_controller() {
        let transport = Arc::new(MockTransport::new());
        let controller = make_controller(transport.clone(), 2);

        controller
            .start_sync(Some(Arc::new(RedSource)), None, None)
            .unwrap();
        tokio::time::sleep(Duration::from_millis(300)).await;
        controller.stop_sync().await;

        let stats = controller.sync_stats();
        assert!(!stats.running);
        assert!(stats.ticks > 0);
        assert!(stats.batches_sent > 0);
        assert_eq!(stats.last_colors, vec![RgbColor::new(255, 0, 0)]);
        assert!(!transport.sent().is_empty());

        // stop twice stays safe
        controller.stop_sync().await;
    }

    #[tokio::test(start_paused = true)]
    async fn placeholder_mode_is_explicit_and_marked() {
        let controller = LightController::with_placeholder(AppConfig::default());
        assert!(controller.is_placeholder());

        let devices = controller.discover().await.unwrap();
        assert_eq!(devices.len(), 2);
        assert!(devices.iter().all(|d| d.model == "DEV-PLACEHOLDER"));

        // Commands succeed silently against the null transport
        assert!(controller
            .set_power("AA:BB:CC:DD:EE:01", true)
            .await
            .unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn scenes_resolve_from_config() {
        let transport = Arc::new(MockTransport::new());
        let mut config = AppConfig::default();
        config.scenes = vec![crate::scene::Scene {
            name: "pulse".to_string(),
            loop_playback: true,
            keyframes: vec![
                crate::scene::Keyframe {
                    at_ms: 0,
                    color: RgbColor::new(255, 0, 0),
                    brightness: 100,
                    transition: crate::scene::Transition::Linear,
                },
                crate::scene::Keyframe {
                    at_ms: 500,
                    color: RgbColor::new(20, 0, 0),
                    brightness: 30,
                    transition: crate::scene::Transition::Linear,
                },
            ],
        }];

        let controller = LightController::new(transport.clone(), config);
        controller
            .registry
            .upsert_from_discovery(make_test_device("AA:01", "192.168.1.10"));

        assert!(matches!(
            controller.play_scene("missing"),
            Err(Error::UnknownScene(_))
        ));

        controller.play_scene("pulse").unwrap();
        assert_eq!(controller.playing_scene(), Some("pulse".to_string()));
        tokio::time::sleep(Duration::from_millis(200)).await;
        controller.stop_scene().await;

        assert!(controller.playing_scene().is_none());
        assert!(!transport.sent().is_empty());
    }
}
