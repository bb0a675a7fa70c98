use anyhow::Context;
use cpal::traits::{DeviceTrait, HostTrait};
use cpal::Device;

fn host() -> cpal::Host {
    cpal::default_host()
}

/// Finds the input device called `device_name`, or the host default.
pub fn get_or_default_input(device_name: Option<&str>) -> anyhow::Result<Device> {
    let host = host();
    tracing::debug!("host: {:?}", host.id());
    match device_name {
        None => host
            .default_input_device()
            .context("no default input device"),
        Some(target) => host
            .input_devices()?
            .find(|d| d.name().is_ok_and(|name| name == target))
            .with_context(|| format!("input device {target:?} not found")),
    }
}

/// Finds the output device called `device_name`, or the host default.
pub fn get_or_default_output(device_name: Option<&str>) -> anyhow::Result<Device> {
    let host = host();
    match device_name {
        None => host
            .default_output_device()
            .context("no default output device"),
        Some(target) => host
            .output_devices()?
            .find(|d| d.name().is_ok_and(|name| name == target))
            .with_context(|| format!("output device {target:?} not found")),
    }
}

/// One line per input device: ` * name(2ch, 48000hz) [default]`.
pub fn get_available_inputs() -> anyhow::Result<String> {
    let host = host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());
    let mut lines = Vec::new();
    for device in host.input_devices()? {
        let Ok(name) = device.name() else { continue };
        let Ok(cfg) = device.default_input_config() else {
            continue;
        };
        lines.push(describe(&name, cfg.channels(), cfg.sample_rate().0, &default_name));
    }
    Ok(lines.join("\n"))
}

pub fn get_available_outputs() -> anyhow::Result<String> {
    let host = host();
    let default_name = host.default_output_device().and_then(|d| d.name().ok());
    let mut lines = Vec::new();
    for device in host.output_devices()? {
        let Ok(name) = device.name() else { continue };
        let Ok(cfg) = device.default_output_config() else {
            continue;
        };
        lines.push(describe(&name, cfg.channels(), cfg.sample_rate().0, &default_name));
    }
    Ok(lines.join("\n"))
}

fn describe(name: &str, channels: u16, rate: u32, default_name: &Option<String>) -> String {
    let mut line = format!(" * {}({}ch, {}hz)", name, channels, rate);
    if default_name.as_deref() == Some(name) {
        line.push_str(" [default]");
    }
    line
}
