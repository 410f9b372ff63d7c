mod dispatcher;
mod store;
mod transfer;
mod transport;

use std::sync::OnceLock;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{info, warn};

use airdry_common::{
    ConnectOptions, DeviceAction, DeviceConfig, SessionManager, Topics, UpdateOrchestrator,
};

use crate::store::ConfigStore;
use crate::transfer::HttpFirmwareTransfer;
use crate::transport::RumqttTransport;

const FIRMWARE_VERSION: &str = env!("CARGO_PKG_VERSION");
const TICK_INTERVAL: Duration = Duration::from_millis(200);

fn main() -> anyhow::Result<()> {
    run()
}

fn run() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let store = ConfigStore::new();
    let mut config = store.load().unwrap_or_else(|err| {
        warn!("failed to load config from store: {err:#}");
        DeviceConfig::default()
    });
    apply_env_overrides(&mut config);
    config.sanitize();

    info!(
        "starting airdry device {} (firmware {FIRMWARE_VERSION})",
        config.device_id
    );

    let topics = Topics::new(&config.namespace, &config.device_id);
    let options = ConnectOptions::for_device(&config, &topics);
    let mut session = SessionManager::new(
        RumqttTransport::new(),
        options,
        config.session.reconnect_backoff_ms,
    );

    // Registered before the first connect; the session manager replays them
    // on every successful (re)connect.
    for topic in topics.command_subscriptions() {
        if let Err(err) = session.subscribe(topic) {
            warn!("failed to register subscription for {topic}: {err}");
        }
    }

    let mut orchestrator = UpdateOrchestrator::new(
        FIRMWARE_VERSION,
        config.ota.enabled,
        config.ota.restart_grace_ms,
        topics.clone(),
    );
    let mut transfer = HttpFirmwareTransfer::new(store.staging_path());

    let mut was_connected = false;
    loop {
        let inbound = session.tick(monotonic_ms());

        if session.is_connected() && !was_connected {
            dispatcher::announce(&mut session, &config, FIRMWARE_VERSION, &topics);
        }
        was_connected = session.is_connected();

        for message in inbound {
            let actions = dispatcher::handle_message(
                &mut session,
                &mut orchestrator,
                &mut transfer,
                &mut config,
                &store,
                &topics,
                message,
            );
            execute_device_actions(actions);
        }

        thread::sleep(TICK_INTERVAL);
    }
}

// Mirrors the container/dev workflow: the environment wins over the stored
// config file for identity and broker endpoint.
fn apply_env_overrides(config: &mut DeviceConfig) {
    if let Ok(device_id) = std::env::var("DEVICE_ID") {
        config.device_id = device_id;
    }
    if let Ok(host) = std::env::var("MQTT_HOST") {
        config.mqtt.host = host;
    }
    if let Ok(port) = std::env::var("MQTT_PORT") {
        if let Ok(port) = port.parse::<u16>() {
            config.mqtt.port = port;
        }
    }
    if let Ok(user) = std::env::var("MQTT_USER") {
        config.mqtt.username = user;
    }
    if let Ok(pass) = std::env::var("MQTT_PASS") {
        config.mqtt.password = pass;
    }
}

fn execute_device_actions(actions: Vec<DeviceAction>) {
    for action in actions {
        match action {
            DeviceAction::Delay(ms) => thread::sleep(Duration::from_millis(ms)),
            DeviceAction::Restart => {
                // Host rendition of a device reset: exit and let the
                // supervisor bring the new image up.
                info!("restarting device");
                std::process::exit(0);
            }
        }
    }
}

fn monotonic_ms() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    START
        .get_or_init(Instant::now)
        .elapsed()
        .as_millis()
        .try_into()
        .unwrap_or(u64::MAX)
}
