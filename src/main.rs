use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::Parser;
use std::io::BufRead;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tokio::time::{sleep, Duration};

use geofence_guardian::alert::ANONYMOUS_NAME;
use geofence_guardian::battery::read_battery_percent;
use geofence_guardian::position::{
    acquire_home, ReplaySource, SimulatedWalk, TermuxLocationSource,
};
use geofence_guardian::{
    AlertSink, Coordinate, DetectorPolicy, GeofenceConfig, Guardian, GuardianCommand,
    GuardianSettings, HttpAlertSink, LogAlertSink, PositionSource, PositionWatch, UserProfile,
    WatchOptions,
};

#[derive(Parser, Debug)]
#[command(name = "geofence_guardian")]
#[command(about = "Watch a safety perimeter and send an SOS alert when you leave it", long_about = None)]
struct Args {
    /// Duration in seconds (0 = continuous)
    #[arg(long, default_value = "0")]
    duration: u64,

    /// Home latitude (default: first GPS fix)
    #[arg(long, allow_negative_numbers = true)]
    lat: Option<f64>,

    /// Home longitude (default: first GPS fix)
    #[arg(long, allow_negative_numbers = true)]
    lon: Option<f64>,

    /// Perimeter radius in meters (0.1 - 2000)
    #[arg(long, default_value = "100", value_parser = parse_radius)]
    radius: f64,

    /// Fraction of the radius needed to clear a breach
    #[arg(long, default_value = "0.9")]
    reentry_ratio: f64,

    /// Seconds between a breach and the alert
    #[arg(long, default_value = "10")]
    countdown: u32,

    /// Seconds between a manual `sos` and the alert (0 = send at once)
    #[arg(long, default_value = "5")]
    manual_countdown: u32,

    /// Alert service base URL; alerts are only logged without it
    #[arg(long)]
    api_url: Option<String>,

    #[arg(long)]
    user_id: Option<String>,

    #[arg(long, default_value = ANONYMOUS_NAME)]
    name: String,

    /// Replay fixes from a JSON array file
    #[arg(long, conflicts_with = "simulate")]
    replay: Option<PathBuf>,

    /// Walk out of the perimeter and back instead of reading GPS
    #[arg(long)]
    simulate: bool,

    /// Milliseconds between fix requests
    #[arg(long, default_value = "1000")]
    interval_ms: u64,

    /// Per-fix timeout in seconds
    #[arg(long, default_value = "15")]
    timeout_secs: u64,

    /// Discard fixes older than this many seconds
    #[arg(long, default_value = "5")]
    max_age_secs: u64,

    /// Write a live status JSON file here every second
    #[arg(long)]
    status_file: Option<String>,
}

fn parse_radius(s: &str) -> Result<f64, String> {
    let radius: f64 = s.parse().map_err(|e| format!("{}", e))?;
    if !(0.1..=2000.0).contains(&radius) {
        return Err(format!("radius {} outside 0.1 - 2000 m", radius));
    }
    Ok(radius)
}

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    println!("[{}] Geofence Guardian Starting", ts_now());
    println!("  Radius: {} m (re-entry below {:.0}%)", args.radius, args.reentry_ratio * 100.0);
    println!("  Countdown: {}s breach / {}s manual", args.countdown, args.manual_countdown);
    println!("  Duration: {} seconds (0=continuous)", args.duration);

    let policy = DetectorPolicy::new(args.reentry_ratio, args.countdown)?;
    let mut source = build_source(&args)?;

    let home = match (args.lat, args.lon) {
        (Some(lat), Some(lon)) => Coordinate::new(lat, lon)?,
        (None, None) => {
            println!("[{}] Getting location...", ts_now());
            let fix = acquire_home(source.as_mut(), Duration::from_secs(args.timeout_secs))
                .await
                .context("Could not get a home location fix")?;
            fix.coordinate()?
        }
        _ => bail!("Provide both --lat and --lon, or neither"),
    };
    let config = GeofenceConfig::new(home, args.radius)?;
    println!(
        "[{}] Location set: {:.6}, {:.6}",
        ts_now(),
        home.latitude(),
        home.longitude()
    );

    let sink: Box<dyn AlertSink> = match args.api_url.as_deref() {
        Some(url) => {
            let sink = HttpAlertSink::new(url);
            println!("  Alerts: {}", sink.endpoint());
            Box::new(sink)
        }
        None => {
            println!("  Alerts: demo mode (no --api-url)");
            Box::new(LogAlertSink)
        }
    };

    let battery = read_battery_percent().await;
    if let Some(percent) = battery {
        println!("  Battery: {}%", percent);
    }

    let settings = GuardianSettings {
        profile: UserProfile {
            user_id: args.user_id.clone(),
            name: args.name.clone(),
        },
        manual_countdown_secs: args.manual_countdown,
        status_path: args.status_file.clone(),
        battery_percent: battery,
        ..GuardianSettings::default()
    };
    let mut guardian = Guardian::new(config, policy, sink, settings);

    let options = WatchOptions {
        interval: Duration::from_millis(args.interval_ms.max(1)),
        timeout: Duration::from_secs(args.timeout_secs),
        maximum_age: Duration::from_secs(args.max_age_secs),
        ..WatchOptions::default()
    };
    let watch = PositionWatch::start(source, options);

    let (cmd_tx, cmd_rx) = mpsc::channel::<GuardianCommand>(16);
    // Plain thread: a blocking stdin read must not hold up runtime shutdown
    let stdin_tx = cmd_tx.clone();
    std::thread::spawn(move || read_commands(stdin_tx, home));

    if args.duration > 0 {
        let tx = cmd_tx.clone();
        let duration = args.duration;
        tokio::spawn(async move {
            sleep(Duration::from_secs(duration)).await;
            println!("[{}] Duration reached, stopping...", ts_now());
            let _ = tx.send(GuardianCommand::Stop).await;
        });
    }

    let tx = cmd_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = tx.send(GuardianCommand::Stop).await;
        }
    });
    drop(cmd_tx);

    println!(
        "[{}] Geofence active. Commands: cancel | sos | sos now | radius <m> | quit",
        ts_now()
    );
    let report = guardian.run(watch, cmd_rx).await;

    println!("\n=== Final Stats ===");
    println!("Fixes received: {}", report.fixes_received);
    println!("Alerts sent: {}", report.alerts_sent);
    println!("Alerts failed: {}", report.alerts_failed);
    println!("Final state: {:?}", report.final_state);

    Ok(())
}

fn build_source(args: &Args) -> Result<Box<dyn PositionSource>> {
    if let Some(path) = &args.replay {
        let replay = ReplaySource::from_file(path)?;
        println!("  Source: replay {} ({} fixes)", path.display(), replay.remaining());
        return Ok(Box::new(replay));
    }

    if args.simulate {
        let origin = match (args.lat, args.lon) {
            (Some(lat), Some(lon)) => Coordinate::new(lat, lon)?,
            _ => Coordinate::new(37.7749, -122.4194)?,
        };
        println!("  Source: simulated walk");
        return Ok(Box::new(SimulatedWalk::new(origin, 10.0, args.radius * 1.5)));
    }

    println!("  Source: termux-location");
    Ok(Box::new(TermuxLocationSource::default()))
}

fn read_commands(tx: mpsc::Sender<GuardianCommand>, home: Coordinate) {
    for line in std::io::stdin().lock().lines() {
        let Ok(line) = line else { break };
        let line = line.trim().to_lowercase();
        let command = match line.as_str() {
            "" => continue,
            "cancel" | "c" => GuardianCommand::CancelAlert,
            "sos" => GuardianCommand::TriggerSos,
            "sos now" => GuardianCommand::TriggerSosNow,
            "quit" | "q" | "stop" => GuardianCommand::Stop,
            other => match other.strip_prefix("radius ").map(str::trim) {
                Some(value) => match parse_radius(value)
                    .and_then(|r| GeofenceConfig::new(home, r).map_err(|e| e.to_string()))
                {
                    Ok(config) => GuardianCommand::SetPerimeter(config),
                    Err(e) => {
                        eprintln!("[{}] {}", ts_now(), e);
                        continue;
                    }
                },
                None => {
                    eprintln!(
                        "[{}] Unknown command '{}' (cancel, sos, sos now, radius <m>, quit)",
                        ts_now(),
                        other
                    );
                    continue;
                }
            },
        };

        let stop = command == GuardianCommand::Stop;
        if tx.blocking_send(command).is_err() || stop {
            break;
        }
    }
}

fn ts_now() -> String {
    Utc::now().format("%H:%M:%S").to_string()
}
