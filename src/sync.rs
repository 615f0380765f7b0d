//! Color synchronization engine
//!
//! Drives the extract → transform → emit chain on a fixed cadence: a repeating
//! timer samples the pixel source, the extractor reduces and smooths the
//! colors, and emission is held for the latency-compensation window before the
//! dispatcher's paced batch send fans it out to the active devices.
//!
//! Tick-overrun policy: drop-late-tick. A single emission permit bounds
//! in-flight work; while the previous emission is still running, new ticks are
//! counted as dropped instead of queued, so the freshest colors always win.

use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::color::{ColorExtractor, ExtractionMode, FeatureSource, PixelSource};
use crate::device::{Command, Device, RgbColor};
use crate::dispatcher::{BatchEntry, CommandDispatcher};
use crate::error::{Error, Result};
use crate::registry::DeviceRegistry;

/// Sync session parameters
#[derive(Debug, Clone)]
pub struct SyncOptions {
    /// Sampling frequency of the pixel source
    pub sample_rate_hz: u32,
    pub mode: ExtractionMode,
    /// Zone count used by [`ExtractionMode::Zones`]
    pub zone_count: usize,
    /// Low-pass filter coefficient, 0 (instant) to 1 (frozen)
    pub smoothing: f32,
    /// Hold between sampling and emission, so light output does not run
    /// ahead of the visual it reacts to
    pub latency_compensation: Duration,
    /// Devices to drive; empty means every online LAN device
    pub device_ids: Vec<String>,
}

impl Default for SyncOptions {
    fn default() -> Self {
        Self {
            sample_rate_hz: 30,
            mode: ExtractionMode::Average,
            zone_count: 3,
            smoothing: 0.6,
            latency_compensation: Duration::from_millis(50),
            device_ids: Vec::new(),
        }
    }
}

/// Accumulated session diagnostics
#[derive(Debug, Clone, Default)]
pub struct SyncStats {
    pub running: bool,
    /// Timer ticks observed
    pub ticks: u64,
    /// Batches actually emitted
    pub batches_sent: u64,
    /// Individual device send failures across the session
    pub send_failures: u64,
    /// Ticks dropped because the previous emission was still in flight
    pub dropped_ticks: u64,
    /// Colors of the most recent emission
    pub last_colors: Vec<RgbColor>,
}

struct SyncSession {
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Orchestrates Extractor → transform → delayed Dispatcher emission
///
/// State machine is Idle → Running → Idle; exactly one session may be active.
pub struct SyncEngine {
    dispatcher: Arc<CommandDispatcher>,
    registry: DeviceRegistry,
    session: Mutex<Option<SyncSession>>,
    stats: Arc<RwLock<SyncStats>>,
}

impl SyncEngine {
    pub fn new(dispatcher: Arc<CommandDispatcher>, registry: DeviceRegistry) -> Self {
        Self {
            dispatcher,
            registry,
            session: Mutex::new(None),
            stats: Arc::new(RwLock::new(SyncStats::default())),
        }
    }

    /// Start a sync session
    ///
    /// A second start while one is running is a warned no-op. A zero sample
    /// rate is a configuration error.
    pub fn start(
        &self,
        source: Arc<dyn PixelSource>,
        features: Option<Arc<dyn FeatureSource>>,
        options: SyncOptions,
    ) -> Result<()> {
        if options.sample_rate_hz == 0 {
            return Err(Error::InvalidSampleRate(options.sample_rate_hz));
        }

        let mut session = self.session.lock();
        if session.is_some() {
            warn!("⚠️  Sync session already running; start ignored");
            return Ok(());
        }

        *self.stats.write() = SyncStats { running: true, ..SyncStats::default() };

        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(run_loop(
            self.dispatcher.clone(),
            self.registry.clone(),
            self.stats.clone(),
            source,
            features,
            options.clone(),
            stop_rx,
        ));

        *session = Some(SyncSession { stop_tx, task });
        info!(
            "▶️  Sync started: {} Hz, {:?} mode, {} ms latency compensation",
            options.sample_rate_hz,
            options.mode,
            options.latency_compensation.as_millis()
        );
        Ok(())
    }

    /// Stop the session; always safe to call, including when already idle
    ///
    /// Cancels the timer and any held (not-yet-emitted) delayed emission. An
    /// emission whose batch send is already in flight runs to completion.
    pub async fn stop(&self) {
        let session = { self.session.lock().take() };
        let Some(session) = session else {
            debug!("Sync stop: already idle");
            return;
        };

        let _ = session.stop_tx.send(true);
        let _ = session.task.await;
        self.stats.write().running = false;
        info!("🛑 Sync session stopped");
    }

    pub fn is_running(&self) -> bool {
        self.session.lock().is_some()
    }

    pub fn stats(&self) -> SyncStats {
        self.stats.read().clone()
    }
}

/// Devices a tick fans out to; explicit ids are honored as given, the
/// default set is every online LAN-enabled device
fn resolve_targets(registry: &DeviceRegistry, device_ids: &[String]) -> Vec<Device> {
    let snapshot = registry.snapshot();
    if device_ids.is_empty() {
        snapshot
            .into_iter()
            .filter(|d| d.lan_enabled && d.online)
            .collect()
    } else {
        snapshot
            .into_iter()
            .filter(|d| device_ids.iter().any(|id| id == &d.id))
            .collect()
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_loop(
    dispatcher: Arc<CommandDispatcher>,
    registry: DeviceRegistry,
    stats: Arc<RwLock<SyncStats>>,
    source: Arc<dyn PixelSource>,
    features: Option<Arc<dyn FeatureSource>>,
    options: SyncOptions,
    mut stop_rx: watch::Receiver<bool>,
) {
    let period = Duration::from_secs_f64(1.0 / options.sample_rate_hz as f64);
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    let mut extractor =
        ColorExtractor::new(options.mode, options.zone_count, options.smoothing);
    // One permit: the drop-late-tick guard
    let emission_permit = Arc::new(Semaphore::new(1));

    loop {
        tokio::select! {
            _ = stop_rx.changed() => break,
            _ = ticker.tick() => {}
        }
        stats.write().ticks += 1;

        let tick_features = features.as_ref().map(|f| f.latest());
        let colors = extractor.extract(source.as_ref(), tick_features.as_ref());
        if colors.is_empty() {
            continue;
        }
        stats.write().last_colors = colors.clone();

        let targets = resolve_targets(&registry, &options.device_ids);
        if targets.is_empty() {
            trace!("Sync tick with no target devices");
            continue;
        }

        // Zone colors map round-robin onto the device subset
        let entries: Vec<BatchEntry> = targets
            .iter()
            .enumerate()
            .map(|(index, device)| BatchEntry {
                addr: device.ip,
                id: device.id.clone(),
                command: Command::ColorAndTemp {
                    color: Some(colors[index % colors.len()]),
                    kelvin: None,
                },
            })
            .collect();

        match emission_permit.clone().try_acquire_owned() {
            Ok(permit) => {
                let dispatcher = dispatcher.clone();
                let stats = stats.clone();
                let mut stop_rx = stop_rx.clone();
                let latency = options.latency_compensation;

                tokio::spawn(async move {
                    tokio::select! {
                        _ = tokio::time::sleep(latency) => {
                            let results = dispatcher.send_batch(&entries).await;
                            let failures = results.iter().filter(|ok| !**ok).count() as u64;
                            let mut stats = stats.write();
                            stats.batches_sent += 1;
                            stats.send_failures += failures;
                        }
                        _ = stop_rx.changed() => {
                            debug!("Held emission cancelled by stop");
                        }
                    }
                    drop(permit);
                });
            }
            Err(_) => {
                stats.write().dropped_ticks += 1;
                trace!("Dropping late tick; previous emission still in flight");
            }
        }
    }

    debug!("Sync loop ended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::color::SampleRegion;
    use crate::device::{DeviceCapabilities, DeviceState};
    use crate::dispatcher::DispatchOptions;
    use crate::transport::testing::MockTransport;

    const ZONE_COLORS: [RgbColor; 2] = [
        RgbColor { r: 255, g: 0, b: 0 },
        RgbColor { r: 0, g: 255, b: 0 },
    ];

    struct ZoneSource;

    impl PixelSource for ZoneSource {
        fn sample_pixels(&self, region: SampleRegion) -> Vec<RgbColor> {
            match region {
                SampleRegion::Full => vec![RgbColor::new(120, 120, 120); 4],
                SampleRegion::Zone { index, .. } => {
                    vec![ZONE_COLORS[index % ZONE_COLORS.len()]; 4]
                }
            }
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

    fn make_engine(transport: Arc<MockTransport>, device_count: usize) -> SyncEngine {
        let registry = DeviceRegistry::new();
        for i in 1..=device_count {
            registry.upsert_from_discovery(make_test_device(
                &format!("AA:0{}", i),
                &format!("192.168.1.1{}", i),
            ));
        }
        let dispatcher = Arc::new(CommandDispatcher::new(
            transport,
            registry.clone(),
            DispatchOptions::default(),
        ));
        SyncEngine::new(dispatcher, registry)
    }

    fn options(latency_ms: u64) -> SyncOptions {
        SyncOptions {
            smoothing: 0.0,
            latency_compensation: Duration::from_millis(latency_ms),
            ..SyncOptions::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn first_emission_waits_for_period_plus_latency() {
        let transport = Arc::new(MockTransport::new());
        let engine = make_engine(transport.clone(), 1);

        let started = Instant::now();
        engine.start(Arc::new(ZoneSource), None, options(50)).unwrap();

        tokio::time::sleep(Duration::from_millis(200)).await;
        engine.stop().await;

        let sent = transport.sent();
        assert!(!sent.is_empty(), "expected at least one emission");
        // 1000/30 ms period + 50 ms latency compensation
        let earliest = Duration::from_secs_f64(1.0 / 30.0) + Duration::from_millis(50);
        assert!(
            sent[0].at - started >= earliest,
            "first emission arrived {:?} after start",
            sent[0].at - started
        );
    }

    #[tokio::test(start_paused = true)]
    async fn zone_colors_map_round_robin_onto_devices() {
        let transport = Arc::new(MockTransport::new());
        let engine = make_engine(transport.clone(), 3);

        engine
            .start(
                Arc::new(ZoneSource),
                None,
                SyncOptions {
                    mode: ExtractionMode::Zones,
                    zone_count: 2,
                    ..options(0)
                },
            )
            .unwrap();

        // One full tick plus the paced batch
        tokio::time::sleep(Duration::from_millis(150)).await;
        engine.stop().await;

        let sent = transport.sent();
        assert!(sent.len() >= 3);
        let reds: Vec<u64> = sent[..3]
            .iter()
            .map(|d| {
                let value: serde_json::Value = serde_json::from_slice(&d.payload).unwrap();
                value["msg"]["data"]["color"]["r"].as_u64().unwrap()
            })
            .collect();
        // Two zones across three devices: zone 0, zone 1, zone 0 again
        assert_eq!(reds, vec![255, 0, 255]);
    }

    #[tokio::test(start_paused = true)]
    async fn second_start_is_a_noop() {
        let transport = Arc::new(MockTransport::new());
        let engine = make_engine(transport, 1);

        engine.start(Arc::new(ZoneSource), None, options(50)).unwrap();
        assert!(engine.is_running());

        // Second start: no error, session unchanged
        engine.start(Arc::new(ZoneSource), None, options(50)).unwrap();
        assert!(engine.is_running());

        engine.stop().await;
        assert!(!engine.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn zero_sample_rate_is_a_configuration_error() {
        let transport = Arc::new(MockTransport::new());
        let engine = make_engine(transport, 1);

        let result = engine.start(
            Arc::new(ZoneSource),
            None,
            SyncOptions { sample_rate_hz: 0, ..SyncOptions::default() },
        );
        assert!(matches!(result, Err(Error::InvalidSampleRate(0))));
        assert!(!engine.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn stop_twice_is_safe_and_leaves_idle() {
        let transport = Arc::new(MockTransport::new());
        let engine = make_engine(transport, 1);

        engine.start(Arc::new(ZoneSource), None, options(50)).unwrap();
        engine.stop().await;
        engine.stop().await;

        assert!(!engine.is_running());
        assert!(!engine.stats().running);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_cancels_held_emission() {
        let transport = Arc::new(MockTransport::new());
        let engine = make_engine(transport.clone(), 1);

        // Long hold: the first tick schedules an emission for +500 ms
        engine.start(Arc::new(ZoneSource), None, options(500)).unwrap();
        tokio::time::sleep(Duration::from_millis(40)).await;
        engine.stop().await;

        // Give the cancelled emission task time it would have needed
        tokio::time::sleep(Duration::from_millis(1000)).await;
        assert_eq!(transport.sent_count(), 0, "held emission must not fire after stop");
    }

    #[tokio::test(start_paused = true)]
    async fn device_failures_do_not_stop_the_session() {
        let transport = Arc::new(MockTransport::new());
        transport.fail_all_sends();
        let engine = make_engine(transport, 1);

        engine.start(Arc::new(ZoneSource), None, options(0)).unwrap();

        // A failing send burns ~1.5 s in retries; ticks keep firing meanwhile
        tokio::time::sleep(Duration::from_millis(2000)).await;
        assert!(engine.is_running());

        let stats = engine.stats();
        assert!(stats.ticks > 10);
        assert!(stats.send_failures >= 1);
        // Overrun ticks were dropped, not queued
        assert!(stats.dropped_ticks > 0);

        engine.stop().await;
    }
}
