//! Resolves a device path to the [`RpcProtocol`] it speaks. Built-in
//! defaults cover the three stock nodes; an optional TOML file can
//! override or extend the table. Parsing which servicemanager wire
//! variant lives behind a given service is out of scope here - this module
//! only ever produces an `Io`/`Protocol` pair.

use std::{collections::HashMap, env, fs, sync::OnceLock};

use serde::Deserialize;

use crate::protocol::{Aidl, Hidl, RpcProtocol};

const DEFAULT_CONFIG_PATH: &str = "/etc/binder-rust.toml";
const CONFIG_PATH_ENV: &str = "BINDER_RUST_CONFIG";

#[derive(Debug, Deserialize, Default)]
struct FileConfig {
    #[serde(default)]
    devices: HashMap<String, String>,
}

fn built_in_defaults() -> &'static HashMap<&'static str, &'static str> {
    static DEFAULTS: OnceLock<HashMap<&'static str, &'static str>> = OnceLock::new();
    DEFAULTS.get_or_init(|| {
        [("/dev/binder", "aidl"), ("/dev/hwbinder", "hidl"), ("/dev/vndbinder", "aidl")]
            .iter()
            .copied()
            .collect()
    })
}

fn file_config() -> &'static FileConfig {
    static CONFIG: OnceLock<FileConfig> = OnceLock::new();
    CONFIG.get_or_init(|| {
        let path = env::var(CONFIG_PATH_ENV).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        match fs::read_to_string(&path) {
            Ok(contents) => toml::from_str(&contents).unwrap_or_else(|err| {
                warn!("failed to parse {}: {}", path, err);
                FileConfig::default()
            }),
            Err(_) => FileConfig::default(),
        }
    })
}

/// The protocol to speak on `device_path`: an override from the config
/// file if present, otherwise the built-in default, otherwise a guess from
/// the path itself (anything with "hwbinder" in it is HIDL).
pub fn resolve_protocol(device_path: &str) -> Result<&'static dyn RpcProtocol, crate::Error> {
    let name = file_config()
        .devices
        .get(device_path)
        .cloned()
        .or_else(|| built_in_defaults().get(device_path).map(|s| s.to_string()));

    Ok(match name.as_deref() {
        Some("aidl") => &Aidl,
        Some("hidl") => &Hidl,
        Some(other) => return Err(crate::Error::ConfigError(format!("unknown protocol {:?} for {}", other, device_path))),
        None if device_path.contains("hwbinder") => &Hidl,
        None => &Aidl,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn built_in_defaults_resolve() {
        assert_eq!(resolve_protocol("/dev/binder").unwrap().name(), "aidl");
        assert_eq!(resolve_protocol("/dev/hwbinder").unwrap().name(), "hidl");
        assert_eq!(resolve_protocol("/dev/vndbinder").unwrap().name(), "aidl");
    }

    #[test]
    fn unknown_device_guesses_from_path() {
        assert_eq!(resolve_protocol("/dev/something_hwbinder_custom").unwrap().name(), "hidl");
        assert_eq!(resolve_protocol("/dev/something_else").unwrap().name(), "aidl");
    }
}
