use device_bridge::bindings::JsDeviceRuntime;
use device_bridge::config::BridgeConfig;
use device_bridge::driver::sim::SimHost;
use device_bridge::{logging, DeviceBridge};

const USAGE: &str = "usage: device_bridge <script.js> [config.toml]";

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(1);
    let script = args.next().ok_or(USAGE)?;
    let mut config = match args.next() {
        Some(path) => BridgeConfig::from_toml_file(path)?,
        None => BridgeConfig::new(),
    };
    config.apply_env_overrides();
    config.validate()?;
    logging::init(&config.logging);

    let bridge = DeviceBridge::new(Box::new(SimHost::new()), &config);
    tracing::info!(target: "bridge", "available devices:\n{}", bridge.format_device_list());

    let runtime = JsDeviceRuntime::new(bridge)?;
    runtime.eval_file(&script)?;
    while runtime.pump()? > 0 {}
    Ok(())
}

fn main() {
    if let Err(e) = run() {
        eprintln!("Device bridge failed: {}", e);
        std::process::exit(1);
    }
}
