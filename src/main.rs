//! PeerLink - Wi-Fi 直连点对点会话
//!
//! 入口：加载配置、初始化日志、创建模拟网关与会话编排器，运行 TUI 直到退出或收到关闭信号。

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use peerlink::{
    config::{load_config, SimulatorSection},
    core::{
        create_session, run_with_graceful_shutdown, teardown_session, Envelope, SenderRole,
        SessionSettings, ShutdownManager,
    },
    observability,
    radio::{PeerDevice, RadioError, RadioErrorKind, SimulatedPermissions, SimulatedRadio},
    ui::run_app,
};
use tokio_util::sync::CancellationToken;

const SIMULATED_NAMES: &[(&str, &str)] = &[
    ("Pixel 8", "10-0050F204-5"),
    ("Galaxy Tab S9", "10-0050F204-5"),
    ("Living Room TV", "7-0050F204-1"),
    ("Redmi Note 12", "10-0050F204-5"),
    ("Office Printer", "3-0050F204-1"),
];

fn simulated_peers(count: usize) -> Vec<PeerDevice> {
    (0..count)
        .map(|i| {
            let (name, device_type) = SIMULATED_NAMES[i % SIMULATED_NAMES.len()];
            PeerDevice::new(format!("02:00:00:00:01:{:02x}", i + 1), Some(name))
                .with_device_type(device_type)
        })
        .collect()
}

fn build_radio(sim: &SimulatorSection) -> Arc<SimulatedRadio> {
    let radio = SimulatedRadio::new()
        .with_peers(simulated_peers(sim.peer_count))
        .as_group_owner(sim.local_is_owner());
    for _ in 0..sim.connect_failures {
        radio.fail_next(
            "connect",
            RadioError::new(RadioErrorKind::Connection, "connection timed out"),
        );
    }
    Arc::new(radio)
}

/// 作为组主时，模拟客户端定期发来消息
fn spawn_chatter(radio: Arc<SimulatedRadio>, interval: Duration, token: CancellationToken) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.tick().await;
        let mut n = 0u64;
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {
                    n += 1;
                    let envelope = Envelope::new(format!("Hello from client #{n}"), SenderRole::Client);
                    match envelope.to_wire() {
                        Ok(payload) => radio.inject_message(payload),
                        Err(e) => tracing::warn!("Could not encode chatter: {}", e),
                    }
                }
            }
        }
    });
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = load_config(config_path).context("Failed to load config")?;
    observability::init(&config.logging).context("Failed to init logging")?;
    tracing::info!(
        "Starting {}",
        config.app.name.as_deref().unwrap_or("PeerLink")
    );

    let radio = build_radio(&config.simulator);
    let shutdown = Arc::new(ShutdownManager::new());
    if config.simulator.local_is_owner() && config.simulator.chatter_interval_secs > 0 {
        spawn_chatter(
            radio.clone(),
            Duration::from_secs(config.simulator.chatter_interval_secs),
            shutdown.token(),
        );
    }

    let session = create_session(
        radio,
        Arc::new(SimulatedPermissions::new()),
        SessionSettings::from_config(&config),
    );

    let filter_devices = config.session.filter_devices;
    let mut app_result: anyhow::Result<()> = Ok(());
    let chatter = shutdown.token();
    let reason = run_with_graceful_shutdown(
        Arc::clone(&shutdown),
        async {
            app_result = run_app(&session, filter_devices).await;
        },
        || async move { chatter.cancel() },
    )
    .await;
    tracing::info!("Shutting down ({})", reason);

    teardown_session(session).await;
    app_result.context("App run failed")
}
