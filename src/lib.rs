//! # Lumen GW
//!
//! Gateway for networked smart-lighting fixtures (addressable RGB/white LED
//! controllers) spoken to over a JSON-over-UDP LAN protocol, driven in
//! near-real-time from colors extracted from a running visual source.
//!
//! Data flow:
//!
//! ```text
//! DiscoveryEngine ──▶ DeviceRegistry ◀── CommandDispatcher ──▶ Transport (UDP)
//!                          ▲                    ▲
//!                          │                    │ paced batches
//!                   snapshot reads        SyncEngine ◀── ColorExtractor ◀── PixelSource
//!                                              ▲
//!                                        AudioFeatures (optional, pulled)
//! ```
//!
//! The [`controller::LightController`] service object ties the pieces together
//! and is the surface callers embed; the transport is injected once at
//! construction and the core never opens sockets itself.

pub mod cli;
pub mod color;
pub mod config;
pub mod controller;
pub mod device;
pub mod discovery;
pub mod dispatcher;
pub mod error;
pub mod protocol;
pub mod registry;
pub mod scene;
pub mod sync;
pub mod transport;

pub use color::{AudioFeatures, ColorExtractor, ExtractionMode, FeatureSource, PixelSource};
pub use config::AppConfig;
pub use controller::LightController;
pub use device::{Command, Device, DeviceState, RgbColor};
pub use discovery::{DiscoveryEngine, DiscoveryOptions};
pub use dispatcher::{BatchEntry, CommandDispatcher, DispatchOptions};
pub use error::{Error, Result};
pub use registry::DeviceRegistry;
pub use scene::{Scene, ScenePlayer};
pub use sync::{SyncEngine, SyncOptions, SyncStats};
pub use transport::{NullTransport, Transport, UdpTransport};
