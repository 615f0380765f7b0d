//! Command-line interface and REPL
//!
//! Interactive console over the controller surface: discovery, per-device
//! control, batch color pushes, sync sessions, and scene playback.

use anyhow::Result;
use colored::*;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::sync::Arc;
use std::time::Instant;

use crate::color::{hsv_to_rgb, PixelSource, SampleRegion};
use crate::controller::LightController;
use crate::device::{Device, RgbColor};

/// Animated hue sweep standing in for a real rendering surface
///
/// Lets `sync start` be exercised from the console without a host surface
/// attached; each zone is offset along the hue circle.
pub struct DemoSweepSource {
    started: Instant,
}

impl DemoSweepSource {
    pub fn new() -> Self {
        Self { started: Instant::now() }
    }
}

impl Default for DemoSweepSource {
    fn default() -> Self {
        Self::new()
    }
}

impl PixelSource for DemoSweepSource {
    fn sample_pixels(&self, region: SampleRegion) -> Vec<RgbColor> {
        let t = self.started.elapsed().as_secs_f32();
        let offset = match region {
            SampleRegion::Full => 0.0,
            SampleRegion::Zone { index, of } => index as f32 / of.max(1) as f32,
        };
        let hue = (t * 0.1 + offset).fract();
        let (r, g, b) = hsv_to_rgb(hue, 1.0, 1.0);
        vec![RgbColor::new((r * 255.0) as u8, (g * 255.0) as u8, (b * 255.0) as u8); 16]
    }
}

/// Pretty-print a device listing
pub fn print_devices(devices: &[Device]) {
    if devices.is_empty() {
        println!("{}", "No devices known. Try 'discover'.".yellow());
        return;
    }

    println!("\n{}", "Known devices:".bold());
    for device in devices {
        let status = if device.online {
            "online".green()
        } else {
            "offline".red()
        };
        let power = if device.state.on { "on".green() } else { "off".dimmed() };
        println!(
            "  {} {} [{}] {} | {} power={} brightness={} color={} temp={}K",
            device.id.bright_white(),
            device.name.cyan(),
            device.model.yellow(),
            device.ip,
            status,
            power,
            device.state.brightness,
            device.state.color.to_string().magenta(),
            device.state.color_temperature,
        );
    }
    println!();
}

fn print_help() {
    println!("\n{}", "Commands:".bold());
    println!("  {}            run a discovery scan", "discover".cyan());
    println!("  {}                list known devices", "list".cyan());
    println!("  {}          power on/off", "on|off <id>".cyan());
    println!("  {}   brightness 0-100", "brightness <id> <v>".cyan());
    println!("  {}  RGB color", "color <id> <r> <g> <b>".cyan());
    println!("  {}        color temperature in Kelvin", "temp <id> <k>".cyan());
    println!("  {}         query device state", "status <id>".cyan());
    println!("  {}        one color on every device", "all <r> <g> <b>".cyan());
    println!("  {}           start sync from the demo sweep source", "sync start".cyan());
    println!("  {}            stop the sync session", "sync stop".cyan());
    println!("  {}                sync session statistics", "stats".cyan());
    println!("  {}         play a configured scene", "scene <name>".cyan());
    println!("  {}           stop scene playback", "scene stop".cyan());
    println!("  {}           leave the console", "exit | quit".cyan());
    println!();
}

fn parse_u32(token: Option<&str>) -> Option<u32> {
    token.and_then(|t| t.parse().ok())
}

fn parse_color(parts: &[&str]) -> Option<RgbColor> {
    if parts.len() < 3 {
        return None;
    }
    Some(RgbColor::new(
        parts[0].parse().ok()?,
        parts[1].parse().ok()?,
        parts[2].parse().ok()?,
    ))
}

fn report(ok: bool) {
    if ok {
        println!("{}", "ok".green());
    } else {
        println!("{}", "failed (device unreachable)".red());
    }
}

/// Run the interactive console until `exit` or interrupt
pub async fn run_repl(controller: Arc<LightController>) -> Result<()> {
    let mut rl = DefaultEditor::new()?;
    println!(
        "{} {}",
        "Lumen GW console.".bold(),
        "Type 'help' for commands.".dimmed()
    );

    loop {
        let readline = rl.readline("lumen> ");
        let line = match readline {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => {
                eprintln!("readline error: {}", e);
                break;
            }
        };

        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let _ = rl.add_history_entry(line);

        let parts: Vec<&str> = line.split_whitespace().collect();
        match parts.as_slice() {
            ["exit"] | ["quit"] => break,
            ["help"] => print_help(),

            ["discover"] => match controller.discover().await {
                Ok(devices) => print_devices(&devices),
                Err(e) => eprintln!("{} {}", "discovery failed:".red(), e),
            },

            ["list"] => print_devices(&controller.devices()),

            ["on", id] => match controller.set_power(id, true).await {
                Ok(ok) => report(ok),
                Err(e) => eprintln!("{}", e.to_string().red()),
            },
            ["off", id] => match controller.set_power(id, false).await {
                Ok(ok) => report(ok),
                Err(e) => eprintln!("{}", e.to_string().red()),
            },

            ["brightness", id, value] => match parse_u32(Some(value)) {
                Some(v) => match controller.set_brightness(id, v).await {
                    Ok(ok) => report(ok),
                    Err(e) => eprintln!("{}", e.to_string().red()),
                },
                None => eprintln!("{}", "usage: brightness <id> <0-100>".yellow()),
            },

            ["color", id, rest @ ..] => match parse_color(rest) {
                Some(color) => match controller.set_color(id, color).await {
                    Ok(ok) => report(ok),
                    Err(e) => eprintln!("{}", e.to_string().red()),
                },
                None => eprintln!("{}", "usage: color <id> <r> <g> <b>".yellow()),
            },

            ["temp", id, kelvin] => match parse_u32(Some(kelvin)) {
                Some(k) => match controller.set_color_temperature(id, k).await {
                    Ok(ok) => report(ok),
                    Err(e) => eprintln!("{}", e.to_string().red()),
                },
                None => eprintln!("{}", "usage: temp <id> <kelvin>".yellow()),
            },

            ["status", id] => match controller.query_status(id).await {
                Ok(true) => print_devices(&controller.device(id).into_iter().collect::<Vec<_>>()),
                Ok(false) => report(false),
                Err(e) => eprintln!("{}", e.to_string().red()),
            },

            ["all", rest @ ..] => match parse_color(rest) {
                Some(color) => {
                    let results = controller.set_all_colors(color).await;
                    let ok = results.iter().filter(|r| **r).count();
                    println!("{} {}/{} devices updated", "ok".green(), ok, results.len());
                }
                None => eprintln!("{}", "usage: all <r> <g> <b>".yellow()),
            },

            ["sync", "start"] => {
                let source: Arc<dyn PixelSource> = Arc::new(DemoSweepSource::new());
                match controller.start_sync(Some(source), None, None) {
                    Ok(()) => println!("{}", "sync started (demo sweep source)".green()),
                    Err(e) => eprintln!("{}", e.to_string().red()),
                }
            }
            ["sync", "stop"] => {
                controller.stop_sync().await;
                println!("{}", "sync stopped".green());
            }

            ["stats"] => {
                let stats = controller.sync_stats();
                println!(
                    "[{}] running={} ticks={} batches={} failures={} dropped={} last={}",
                    chrono::Local::now().format("%H:%M:%S%.3f"),
                    stats.running,
                    stats.ticks,
                    stats.batches_sent,
                    stats.send_failures,
                    stats.dropped_ticks,
                    stats
                        .last_colors
                        .iter()
                        .map(|c| c.to_string())
                        .collect::<Vec<_>>()
                        .join(" "),
                );
            }

            ["scene", "stop"] => {
                controller.stop_scene().await;
                println!("{}", "scene stopped".green());
            }
            ["scene", name] => match controller.play_scene(name) {
                Ok(()) => println!("playing scene '{}'", name.cyan()),
                Err(e) => eprintln!("{}", e.to_string().red()),
            },

            _ => eprintln!("{} (try 'help')", "unknown command".yellow()),
        }
    }

    Ok(())
}
