//! Composition root: loads configuration, wires the core against a real
//! serial port plus the reference SQLite/MQTT collaborators, and runs
//! until interrupted. Contains no business logic beyond wiring, CLI
//! flag handling, and signal handling.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use clap::Parser;
use log::{error, info};

use modbus_edge_core::bus::BusArbiter;
use modbus_edge_core::config::Config;
use modbus_edge_core::discovery::DiscoveryEngine;
use modbus_edge_core::events::EventBus;
use modbus_edge_core::frame::SerialTransport;
use modbus_edge_core::identity::IdentityCache;
use modbus_edge_core::model::MeasurementObserver;
use modbus_edge_core::polling::{PollingConfig, PollingScheduler};

#[cfg(feature = "sqlite")]
use modbus_edge_core::sqlite_store::SqliteStore;
#[cfg(feature = "mqtt")]
use modbus_edge_core::mqtt_uplink::MqttUplink;
use modbus_edge_core::alert::AlertEngine;
use modbus_edge_core::uplink::UplinkDispatcher;

#[derive(Debug, Parser)]
#[command(name = "modbus-edge-supervisor", about = "Modbus RTU edge supervisor")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(long, default_value = "edge.toml")]
  config: String,

  /// Overrides `serial_port` from the config file.
  #[arg(long)]
  port: Option<String>,

  #[arg(long, default_value = "info")]
  log_level: String,
}

fn main() {
  let cli = Cli::parse();
  env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(&cli.log_level)).init();

  let mut config = match Config::load(&cli.config) {
    Ok(config) => config,
    Err(e) => {
      error!("failed to load configuration: {e}");
      std::process::exit(1);
    }
  };
  if let Some(port) = cli.port {
    config.serial_port = port;
  }

  if let Err(e) = run(config) {
    error!("supervisor exited with error: {e}");
    std::process::exit(1);
  }
}

#[cfg(not(all(feature = "sqlite", feature = "mqtt")))]
fn run(_config: Config) -> Result<(), Box<dyn std::error::Error>> {
  Err("the supervisor binary requires the `sqlite` and `mqtt` features (the default) to run standalone; \
       the core library itself only depends on the PersistenceSink/IotUplinkSink traits".into())
}

#[cfg(all(feature = "sqlite", feature = "mqtt"))]
fn run(config: Config) -> Result<(), Box<dyn std::error::Error>> {
  let baseline_timeout = Duration::from_secs_f64(config.timeout_sec);
  let discovery_timeout = Duration::from_secs_f64(config.discovery_timeout_sec);
  let backoff_base = Duration::from_secs_f64(config.offline_backoff_sec);
  let backoff_cap = Duration::from_secs_f64(config.offline_backoff_max_sec);

  let transport = SerialTransport::new(&config.serial_port, config.baud, Duration::from_millis(config.inter_frame_delay_ms));
  let arbiter = Arc::new(BusArbiter::new(Box::new(transport), baseline_timeout));
  let cache = Arc::new(IdentityCache::new(baseline_timeout, backoff_base, backoff_cap));
  let events = Arc::new(EventBus::default());

  let persistence = Arc::new(SqliteStore::open("edge.sqlite3")?);
  let uplink = Arc::new(MqttUplink::connect("localhost", 1883, "modbus-edge-supervisor"));

  let alert_engine = Arc::new(AlertEngine::new(
    persistence.clone(),
    uplink.clone(),
    events.clone(),
    cache.clone(),
    Duration::from_secs_f64(config.debounce_window_sec),
    Duration::from_secs_f64(config.device_timeout_sec),
  ));
  alert_engine.rebuild_from_store();

  let dispatcher = Arc::new(UplinkDispatcher::new(persistence.clone(), uplink));

  let discovery = DiscoveryEngine::new(arbiter.clone(), cache.clone(), events.clone(), discovery_timeout);
  info!("starting discovery scan [{}, {}]", config.unit_id_scan_min, config.unit_id_scan_max);
  let found = discovery.scan(config.unit_id_scan_min, config.unit_id_scan_max)?;
  info!("discovery enrolled {} unit(s)", found.len());

  // Derive each enrolled unit's logical sensor catalog from its
  // capability set and register it with both the store and the alert
  // engine, so threshold evaluation has somewhere to look a sensor id
  // up once the poller starts producing measurements for it.
  for &unit_id in &found {
    if let Some((identity, _)) = cache.get(unit_id) {
      persistence.upsert_device(&identity, None, true);
      for sensor in modbus_edge_core::register::derive_sensors(&identity) {
        persistence.upsert_sensor(&sensor);
        alert_engine.register_sensor(&sensor);
      }
    }
  }

  let observers: Vec<Arc<dyn MeasurementObserver>> = vec![alert_engine.clone(), dispatcher];
  let polling_config = PollingConfig {
    per_device_refresh: Duration::from_secs_f64(config.per_device_refresh_sec),
    baseline_timeout,
    backoff_base,
    backoff_cap,
    max_poll_devices: config.max_poll_devices,
    ..Default::default()
  };
  let scheduler = Arc::new(PollingScheduler::new(arbiter.clone(), cache.clone(), events.clone(), observers, polling_config));
  scheduler.start(found.clone());

  let unit_ids_source = Arc::new(Mutex::new(found));
  alert_engine.start_liveness_worker(Duration::from_secs(10), unit_ids_source);

  let shutdown = Arc::new(AtomicBool::new(false));
  let shutdown_handle = shutdown.clone();
  ctrlc::set_handler(move || {
    info!("received interrupt, shutting down");
    shutdown_handle.store(true, Ordering::Release);
  })?;

  while !shutdown.load(Ordering::Acquire) {
    std::thread::sleep(Duration::from_millis(200));
  }

  scheduler.stop();
  alert_engine.stop();
  Ok(())
}
