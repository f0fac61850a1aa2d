//! The device registry: an immutable, in-memory map from device name to
//! backend endpoint, plus the FQDN resolver that sits in front of it.

use std::collections::BTreeMap;

use serde::Deserialize;
use thiserror::Error;

/// Default backend ports, applied whenever a registry entry omits (or
/// stores as `0`) the corresponding port.
pub const DEFAULT_SHELL_PORT: u16 = 22;
pub const DEFAULT_LINE_PORT: u16 = 23;
pub const DEFAULT_CONFIG_PORT: u16 = 830;
pub const DEFAULT_TELEMETRY_PORT: u16 = 57400;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("fqdn must not be empty")]
    InvalidArgument,
    #[error("no device named {0:?}")]
    NotFound(String),
}

/// One device's backend endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceEntry {
    pub hostname: String,
    pub shell_port: u16,
    pub line_port: u16,
    pub config_port: u16,
    pub telemetry_port: u16,
}

impl DeviceEntry {
    fn from_raw(raw: RawDeviceEntry) -> Self {
        DeviceEntry {
            hostname: raw.hostname,
            shell_port: default_if_zero(raw.ssh_port, DEFAULT_SHELL_PORT),
            line_port: default_if_zero(raw.telnet_port, DEFAULT_LINE_PORT),
            config_port: default_if_zero(raw.netconf_port, DEFAULT_CONFIG_PORT),
            telemetry_port: default_if_zero(raw.gnmi_port, DEFAULT_TELEMETRY_PORT),
        }
    }
}

fn default_if_zero(port: Option<u16>, default: u16) -> u16 {
    match port {
        None | Some(0) => default,
        Some(p) => p,
    }
}

/// Gateway-wide settings carried alongside the device map.
#[derive(Debug, Clone)]
pub struct Settings {
    pub domain_suffix: String,
    pub default_timeout_secs: u64,
    pub max_sessions: usize,
    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            domain_suffix: String::new(),
            default_timeout_secs: 30,
            max_sessions: 256,
            log_level: "info".to_string(),
        }
    }
}

/// The on-disk (YAML) shape of the registry document. Schema errors here
/// are the loader's concern: `Registry::from_document` only validates
/// content that the core's invariants depend on (§3).
#[derive(Debug, Deserialize)]
pub struct RegistryDocument {
    #[serde(default)]
    pub settings: RawSettings,
    pub devices: BTreeMap<String, RawDeviceEntry>,
}

#[derive(Debug, Default, Deserialize)]
pub struct RawSettings {
    #[serde(default)]
    pub domain_suffix: Option<String>,
    #[serde(default)]
    pub default_timeout_secs: Option<u64>,
    #[serde(default)]
    pub max_sessions: Option<usize>,
    #[serde(default)]
    pub log_level: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RawDeviceEntry {
    pub hostname: String,
    #[serde(default)]
    pub ssh_port: Option<u16>,
    #[serde(default)]
    pub telnet_port: Option<u16>,
    #[serde(default)]
    pub netconf_port: Option<u16>,
    #[serde(default)]
    pub gnmi_port: Option<u16>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DocumentError {
    #[error("registry document declares no devices")]
    Empty,
    #[error("device {0:?} has an empty hostname")]
    EmptyHostname(String),
}

/// Immutable, read-only device registry.
///
/// Constructed once at startup and shared behind an `Arc` (or plain value
/// clone, since it is cheap to clone a `BTreeMap` of a few hundred
/// entries); reconfiguration, if ever needed, swaps the whole handle rather
/// than mutating entries in place.
#[derive(Debug, Clone)]
pub struct Registry {
    devices: BTreeMap<String, DeviceEntry>,
    settings: Settings,
}

impl Registry {
    /// Validates and converts a parsed [`RegistryDocument`] into an
    /// immutable `Registry`.
    pub fn from_document(doc: RegistryDocument) -> Result<Registry, DocumentError> {
        if doc.devices.is_empty() {
            return Err(DocumentError::Empty);
        }
        let mut devices = BTreeMap::new();
        for (name, raw) in doc.devices {
            if raw.hostname.trim().is_empty() {
                return Err(DocumentError::EmptyHostname(name));
            }
            devices.insert(name, DeviceEntry::from_raw(raw));
        }
        let settings = Settings {
            domain_suffix: doc.settings.domain_suffix.unwrap_or_default(),
            default_timeout_secs: doc.settings.default_timeout_secs.unwrap_or(30),
            max_sessions: doc.settings.max_sessions.unwrap_or(256),
            log_level: doc.settings.log_level.unwrap_or_else(|| "info".to_string()),
        };
        Ok(Registry { devices, settings })
    }

    /// Builds a registry directly from entries, bypassing document parsing.
    /// Used by tests and by any future dynamic-reconfiguration path.
    pub fn from_entries(
        devices: impl IntoIterator<Item = (String, DeviceEntry)>,
        settings: Settings,
    ) -> Registry {
        Registry {
            devices: devices.into_iter().collect(),
            settings,
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// The device names in the registry, in sorted order — used by the
    /// bastion to print its device list banner.
    pub fn device_names(&self) -> impl Iterator<Item = &str> {
        self.devices.keys().map(String::as_str)
    }

    pub fn get(&self, device_name: &str) -> Option<&DeviceEntry> {
        self.devices.get(device_name)
    }

    /// Resolves an FQDN to its device entry.
    ///
    /// The device name is always the leftmost dot-separated label; the
    /// remainder of the FQDN is ignored.
    pub fn resolve(&self, fqdn: &str) -> Result<(&DeviceEntry, &str), RegistryError> {
        if fqdn.is_empty() {
            return Err(RegistryError::InvalidArgument);
        }
        let device_name = fqdn.split('.').next().unwrap_or(fqdn);
        if device_name.is_empty() {
            return Err(RegistryError::InvalidArgument);
        }
        match self.devices.get(device_name) {
            Some(entry) => Ok((entry, device_name)),
            None => Err(RegistryError::NotFound(device_name.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_registry() -> Registry {
        Registry::from_entries(
            [(
                "srl1".to_string(),
                DeviceEntry {
                    hostname: "10.0.0.11".to_string(),
                    shell_port: 22,
                    line_port: 23,
                    config_port: 830,
                    telemetry_port: 57400,
                },
            )],
            Settings::default(),
        )
    }

    #[test]
    fn resolves_leftmost_label() {
        let reg = test_registry();
        let (entry, name) = reg.resolve("srl1.example.net").unwrap();
        assert_eq!(name, "srl1");
        assert_eq!(entry.hostname, "10.0.0.11");
    }

    #[test]
    fn ignores_trailing_labels() {
        let reg = test_registry();
        let (_, name) = reg.resolve("srl1.anything.else.here").unwrap();
        assert_eq!(name, "srl1");
    }

    #[test]
    fn unknown_device_is_not_found() {
        let reg = test_registry();
        assert_eq!(
            reg.resolve("nope.example.net"),
            Err(RegistryError::NotFound("nope".to_string()))
        );
    }

    #[test]
    fn empty_fqdn_is_invalid_argument() {
        let reg = test_registry();
        assert_eq!(reg.resolve(""), Err(RegistryError::InvalidArgument));
    }

    #[test]
    fn zero_port_resolves_to_default() {
        let doc = RegistryDocument {
            settings: RawSettings::default(),
            devices: BTreeMap::from([(
                "srl1".to_string(),
                RawDeviceEntry {
                    hostname: "10.0.0.11".to_string(),
                    ssh_port: Some(0),
                    telnet_port: None,
                    netconf_port: None,
                    gnmi_port: None,
                },
            )]),
        };
        let reg = Registry::from_document(doc).expect("document is valid");
        let entry = reg.get("srl1").unwrap();
        assert_eq!(entry.shell_port, DEFAULT_SHELL_PORT);
        assert_eq!(entry.line_port, DEFAULT_LINE_PORT);
        assert_eq!(entry.config_port, DEFAULT_CONFIG_PORT);
        assert_eq!(entry.telemetry_port, DEFAULT_TELEMETRY_PORT);
    }

    #[test]
    fn empty_document_is_rejected() {
        let doc = RegistryDocument {
            settings: RawSettings::default(),
            devices: BTreeMap::new(),
        };
        assert_eq!(Registry::from_document(doc).unwrap_err(), DocumentError::Empty);
    }
}
