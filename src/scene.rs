//! Keyframe scenes and their player
//!
//! A scene is an ordered timeline of `{time, color, brightness, transition}`
//! keyframes with a loop flag. The player is a small interpolation state
//! machine: it samples the timeline on a fixed cadence and emits the resulting
//! frames through the dispatcher's paced batch path.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::device::{Command, RgbColor};
use crate::dispatcher::{BatchEntry, CommandDispatcher};
use crate::error::{Error, Result};
use crate::registry::DeviceRegistry;

/// How a keyframe is reached from its predecessor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transition {
    /// Hold the previous frame, then jump
    Step,
    /// Interpolate color and brightness linearly
    Linear,
}

impl Default for Transition {
    fn default() -> Self {
        Transition::Linear
    }
}

/// One point on a scene timeline
///
/// `transition` governs how this keyframe is approached from the previous one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Keyframe {
    pub at_ms: u64,
    pub color: RgbColor,
    pub brightness: u8,
    #[serde(default)]
    pub transition: Transition,
}

/// A named keyframe timeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Scene {
    pub name: String,
    #[serde(default)]
    pub loop_playback: bool,
    pub keyframes: Vec<Keyframe>,
}

/// A sampled point of the timeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SceneFrame {
    pub color: RgbColor,
    pub brightness: u8,
}

impl Scene {
    /// Keyframes sorted by time; call once after deserialization
    pub fn normalized(mut self) -> Self {
        self.keyframes.sort_by_key(|kf| kf.at_ms);
        self
    }

    pub fn duration_ms(&self) -> u64 {
        self.keyframes.last().map(|kf| kf.at_ms).unwrap_or(0)
    }

    /// Whether a non-looping playback is over at `elapsed_ms`
    pub fn finished(&self, elapsed_ms: u64) -> bool {
        !self.loop_playback && elapsed_ms >= self.duration_ms()
    }

    /// Sample the timeline at `elapsed_ms`
    ///
    /// Looping wraps the clock over the timeline length; otherwise the final
    /// frame holds. Returns `None` only for an empty timeline.
    pub fn frame_at(&self, elapsed_ms: u64) -> Option<SceneFrame> {
        let keyframes = &self.keyframes;
        if keyframes.is_empty() {
            return None;
        }

        let total = self.duration_ms();
        let t = if self.loop_playback && total > 0 {
            elapsed_ms % total
        } else {
            elapsed_ms.min(total)
        };

        if t <= keyframes[0].at_ms {
            return Some(frame_of(&keyframes[0]));
        }

        for pair in keyframes.windows(2) {
            let (prev, next) = (&pair[0], &pair[1]);
            if t >= next.at_ms {
                continue;
            }
            return Some(match next.transition {
                Transition::Step => frame_of(prev),
                Transition::Linear => {
                    let span = (next.at_ms - prev.at_ms) as f32;
                    let frac = (t - prev.at_ms) as f32 / span;
                    SceneFrame {
                        color: RgbColor::new(
                            lerp_u8(prev.color.r, next.color.r, frac),
                            lerp_u8(prev.color.g, next.color.g, frac),
                            lerp_u8(prev.color.b, next.color.b, frac),
                        ),
                        brightness: lerp_u8(prev.brightness, next.brightness, frac),
                    }
                }
            });
        }

        Some(frame_of(keyframes.last().unwrap()))
    }
}

fn frame_of(keyframe: &Keyframe) -> SceneFrame {
    SceneFrame { color: keyframe.color, brightness: keyframe.brightness }
}

fn lerp_u8(from: u8, to: u8, frac: f32) -> u8 {
    (from as f32 + (to as f32 - from as f32) * frac).round() as u8
}

/// Frame cadence of the player
const FRAME_INTERVAL: Duration = Duration::from_millis(50);

struct PlayerSession {
    name: String,
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Plays one scene at a time onto the online devices
pub struct ScenePlayer {
    dispatcher: Arc<CommandDispatcher>,
    registry: DeviceRegistry,
    session: Mutex<Option<PlayerSession>>,
}

impl ScenePlayer {
    pub fn new(dispatcher: Arc<CommandDispatcher>, registry: DeviceRegistry) -> Self {
        Self {
            dispatcher,
            registry,
            session: Mutex::new(None),
        }
    }

    /// Start playing a scene, replacing any scene already playing
    pub fn play(&self, scene: Scene) -> Result<()> {
        if scene.keyframes.is_empty() {
            return Err(Error::EmptyScene(scene.name));
        }
        let scene = scene.normalized();

        let mut session = self.session.lock();
        if let Some(previous) = session.take() {
            warn!("Scene '{}' replaced by '{}'", previous.name, scene.name);
            let _ = previous.stop_tx.send(true);
        }

        let (stop_tx, stop_rx) = watch::channel(false);
        let name = scene.name.clone();
        let task = tokio::spawn(play_loop(
            self.dispatcher.clone(),
            self.registry.clone(),
            scene,
            stop_rx,
        ));

        info!("🎬 Playing scene '{}'", name);
        *session = Some(PlayerSession { name, stop_tx, task });
        Ok(())
    }

    /// Stop playback; safe to call when nothing is playing
    pub async fn stop(&self) {
        let session = { self.session.lock().take() };
        let Some(session) = session else {
            debug!("Scene stop: nothing playing");
            return;
        };
        let _ = session.stop_tx.send(true);
        let _ = session.task.await;
        info!("🛑 Scene '{}' stopped", session.name);
    }

    /// Name of the currently playing scene, if any
    pub fn playing(&self) -> Option<String> {
        self.session.lock().as_ref().map(|s| s.name.clone())
    }
}

async fn play_loop(
    dispatcher: Arc<CommandDispatcher>,
    registry: DeviceRegistry,
    scene: Scene,
    mut stop_rx: watch::Receiver<bool>,
) {
    let start = Instant::now();
    let mut ticker = tokio::time::interval(FRAME_INTERVAL);
    let mut last_brightness: Option<u8> = None;

    loop {
        tokio::select! {
            _ = stop_rx.changed() => break,
            _ = ticker.tick() => {}
        }

        let elapsed = start.elapsed().as_millis() as u64;
        let Some(frame) = scene.frame_at(elapsed) else { break };

        let targets: Vec<_> = registry
            .snapshot()
            .into_iter()
            .filter(|d| d.lan_enabled && d.online)
            .collect();

        if !targets.is_empty() {
            let mut entries: Vec<BatchEntry> = targets
                .iter()
                .map(|device| BatchEntry {
                    addr: device.ip,
                    id: device.id.clone(),
                    command: Command::ColorAndTemp {
                        color: Some(frame.color),
                        kelvin: None,
                    },
                })
                .collect();

            // Brightness changes are much rarer than color steps; only put
            // them on the wire when the frame actually moves
            if last_brightness != Some(frame.brightness) {
                entries.extend(targets.iter().map(|device| BatchEntry {
                    addr: device.ip,
                    id: device.id.clone(),
                    command: Command::Brightness(frame.brightness),
                }));
                last_brightness = Some(frame.brightness);
            }

            dispatcher.send_batch(&entries).await;
        }

        if scene.finished(elapsed) {
            debug!("Scene '{}' finished", scene.name);
            break;
        }
    }
}
