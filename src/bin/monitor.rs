use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use ld2410_ble::ble::BleTransport;
use ld2410_ble::{DeviceConfig, LD2410, SensorSnapshot};

/// Live presence monitor for HLK-LD2410 radars over BLE.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Device MAC address. Scans for nearby radars when omitted.
    #[arg(short, long)]
    address: Option<String>,
    /// Bluetooth password, when the radar has one set.
    #[arg(short, long)]
    password: Option<String>,
    /// Scan duration in seconds.
    #[arg(short, long, default_value_t = 5)]
    scan_seconds: u64,
    /// Print every snapshot as a JSON line instead of plain text.
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let transport = Arc::new(BleTransport::new().await?);

    let Some(address) = cli.address else {
        println!("Scanning for radars ({}s)...", cli.scan_seconds);
        let found = transport.scan(Duration::from_secs(cli.scan_seconds)).await?;
        if found.is_empty() {
            println!("No radars found.");
            return Ok(());
        }
        for adv in &found {
            let name = adv.local_name.as_deref().unwrap_or("<unknown>");
            let rssi = adv
                .rssi
                .map(|r| format!("{r} dBm"))
                .unwrap_or_else(|| "?".into());
            match &adv.firmware {
                Some(fw) => println!("{}  {}  {}  firmware {}", adv.address, name, rssi, fw.version),
                None => println!("{}  {}  {}", adv.address, name, rssi),
            }
        }
        println!("Rerun with --address to connect.");
        return Ok(());
    };

    let mut config = DeviceConfig::new(&address);
    config.password = cli.password;
    let device = LD2410::new(config, transport);

    let json = cli.json;
    let token = device.subscribe(move |snapshot| print_snapshot(snapshot, json));

    device.connect_and_subscribe().await?;
    println!("Connected to {address}. Streaming, press Ctrl+C to stop.");

    tokio::signal::ctrl_c().await?;
    device.unsubscribe(token);
    device.disconnect().await;
    Ok(())
}

fn print_snapshot(snapshot: &SensorSnapshot, json: bool) {
    if json {
        if let Ok(line) = serde_json::to_string(snapshot) {
            println!("{line}");
        }
        return;
    }
    let status = snapshot
        .status
        .map(|s| s.to_string())
        .unwrap_or_else(|| "?".into());
    println!(
        "status: {status:<22} moving: {:>3} cm / {:>3}  stationary: {:>3} cm / {:>3}  detect: {:>3} cm",
        snapshot.moving_target_distance.unwrap_or(0),
        snapshot.moving_target_energy.unwrap_or(0),
        snapshot.stationary_target_distance.unwrap_or(0),
        snapshot.stationary_target_energy.unwrap_or(0),
        snapshot.detection_distance.unwrap_or(0),
    );
}
