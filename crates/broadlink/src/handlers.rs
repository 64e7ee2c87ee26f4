use std::net::Ipv4Addr;
use std::time::Duration;

use broadlink_core::{Device, Discovery, DiscoveryConfig, DiscoveryStream, PowerState, Result};
use futures::StreamExt;
use serde_json::json;
use tracing::{debug, error, info};

/// Steps of the `demo` command.
const DEMO_SEQUENCE: [(&str, fn() -> PowerState); 5] = [
    ("all off", PowerState::all_off),
    ("outlet 1 on", PowerState::pwr1_on),
    ("outlet 1 off", PowerState::pwr1_off),
    ("outlet 2 on", PowerState::pwr2_on),
    ("outlet 2 off", PowerState::pwr2_off),
];

const DEMO_STEP_DELAY: Duration = Duration::from_secs(1);

/// What to do with each authenticated plug.
#[derive(Debug, Clone, Copy)]
pub enum Action {
    GetState,
    SetState(PowerState),
    Demo,
}

pub fn discovery_config(timeout: Duration, local_addr: Option<Ipv4Addr>) -> DiscoveryConfig {
    let config = DiscoveryConfig::new().with_timeout(timeout);
    match local_addr {
        Some(addr) => config.with_local_addr(addr),
        None => config,
    }
}

async fn start_discovery(config: DiscoveryConfig) -> DiscoveryStream {
    match Discovery::new(config).start().await {
        Ok(stream) => stream,
        Err(e) => {
            error!(error = %e, "discovery failed");
            eprintln!("Error: Discovery failed: {}", e);
            std::process::exit(1);
        }
    }
}

/// Handle the discover command.
pub async fn handle_discover(config: DiscoveryConfig) {
    let stream = start_discovery(config).await;
    let devices: Vec<Device> = stream.collect().await;
    debug!(device_count = devices.len(), "discovered devices");

    let identities: Vec<_> = devices.iter().map(|d| *d.identity()).collect();
    let json = serde_json::to_value(&identities).unwrap_or_default();
    println!("{}", json);
}

/// Authenticates every discovered plug (or only `mac`) and runs `action` on it.
///
/// Exits with status 1 if no plug was reached or any plug failed.
pub async fn handle_devices(config: DiscoveryConfig, mac: Option<[u8; 6]>, action: Action) {
    if matches!(action, Action::SetState(update) if update.is_empty()) {
        eprintln!("Error: Nothing to set; pass at least one of --pwr, --pwr1, --pwr2, --maxworktime*, --idcbrightness");
        std::process::exit(1);
    }

    let mut stream = start_discovery(config).await;
    let mut handled = 0usize;
    let mut failed = 0usize;

    while let Some(mut device) = stream.recv().await {
        if mac.is_some_and(|mac| mac != device.identity().mac) {
            debug!(device = %device.identity(), "skipping device");
            continue;
        }

        handled += 1;
        if let Err(e) = run_action(&mut device, action).await {
            failed += 1;
            error!(device = %device.identity(), error = %e, "command failed");
            eprintln!("Error: {}: {}", device.identity(), e);
        }
    }

    if handled == 0 {
        eprintln!("Error: No matching device found");
        std::process::exit(1);
    }
    if failed > 0 {
        std::process::exit(1);
    }
}

async fn run_action(device: &mut Device, action: Action) -> Result<()> {
    device.authenticate().await?;

    match action {
        Action::GetState => {
            let state = device.get_state().await?;
            print_state(device, &state);
        }
        Action::SetState(update) => {
            let state = device.set_state(update).await?;
            print_state(device, &state);
        }
        Action::Demo => {
            for (i, (label, step)) in DEMO_SEQUENCE.iter().enumerate() {
                if i > 0 {
                    tokio::time::sleep(DEMO_STEP_DELAY).await;
                }
                info!(device = %device.identity(), step = *label, "demo");
                let state = device.set_state(step()).await?;
                print_state(device, &state);
            }
        }
    }
    Ok(())
}

fn print_state(device: &Device, state: &PowerState) {
    let json = json!({
        "device": device.identity(),
        "state": state,
    });
    println!("{}", json);
}
