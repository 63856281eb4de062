//! Output device enumeration
//!
//! Devices are listed from every available cpal host, so on Linux both the
//! JACK server and the individual ALSA devices show up.

use cpal::traits::{DeviceTrait, HostTrait};
use cpal::HostId;

use super::error::{AudioError, AudioResult};

fn host_name(host_id: HostId) -> String {
    let name = format!("{:?}", host_id);
    match name.as_str() {
        "Alsa" => "ALSA".to_string(),
        "Jack" => "JACK".to_string(),
        "Wasapi" => "WASAPI".to_string(),
        _ => name,
    }
}

/// An output device as shown by `stemdeck devices`
#[derive(Debug, Clone)]
pub struct OutputDevice {
    pub name: String,
    /// Host backend name (e.g. "ALSA", "JACK")
    pub host: String,
    pub is_default: bool,
    pub max_channels: u16,
}

impl std::fmt::Display for OutputDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.host, self.name)?;
        if self.is_default {
            f.write_str(" (default)")?;
        }
        Ok(())
    }
}

/// Every output device across all hosts, defaults first
pub fn output_devices() -> AudioResult<Vec<OutputDevice>> {
    let mut devices = Vec::new();

    for host_id in cpal::available_hosts() {
        let host = match cpal::host_from_id(host_id) {
            Ok(h) => h,
            Err(e) => {
                log::debug!("Could not initialize host {:?}: {}", host_id, e);
                continue;
            }
        };
        let host_label = host_name(host_id);
        let default_name = host
            .default_output_device()
            .and_then(|d: cpal::Device| d.name().ok());

        let iter = match host.output_devices() {
            Ok(d) => d,
            Err(e) => {
                log::debug!("Could not enumerate devices for {:?}: {}", host_id, e);
                continue;
            }
        };

        for device in iter {
            let Ok(name) = device.name() else {
                continue;
            };
            let max_channels = match device.supported_output_configs() {
                Ok(configs) => configs.map(|c| c.channels()).max().unwrap_or(0),
                Err(_) => continue,
            };
            if max_channels == 0 {
                continue;
            }
            devices.push(OutputDevice {
                is_default: default_name.as_ref() == Some(&name),
                name,
                host: host_label.clone(),
                max_channels,
            });
        }
    }

    if devices.is_empty() {
        return Err(AudioError::NoDevices);
    }

    devices.sort_by(|a, b| {
        b.is_default
            .cmp(&a.is_default)
            .then_with(|| a.host.cmp(&b.host))
            .then_with(|| a.name.cmp(&b.name))
    });
    Ok(devices)
}

/// Find an output device by name across all hosts
pub(crate) fn find_device(name: &str) -> AudioResult<cpal::Device> {
    for host_id in cpal::available_hosts() {
        let Ok(host) = cpal::host_from_id(host_id) else {
            continue;
        };
        let Ok(mut devices) = host.output_devices() else {
            continue;
        };
        if let Some(device) = devices.find(|d| d.name().ok().as_deref() == Some(name)) {
            return Ok(device);
        }
    }
    Err(AudioError::DeviceNotFound(name.to_string()))
}

/// The default host's default output device
pub(crate) fn default_device() -> AudioResult<cpal::Device> {
    cpal::default_host()
        .default_output_device()
        .ok_or_else(|| AudioError::NoDefaultDevice("No default output device".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_enumeration() {
        // Depends on the machine; CI usually has no devices
        match output_devices() {
            Ok(devices) => {
                for device in &devices {
                    assert!(device.max_channels > 0, "{}", device);
                }
            }
            Err(AudioError::NoDevices) => {}
            Err(e) => println!("Error enumerating devices: {}", e),
        }
    }

    #[test]
    fn test_unknown_device_not_found() {
        let result = find_device("stemdeck-no-such-device");
        assert!(matches!(result, Err(AudioError::DeviceNotFound(_))));
    }
}
