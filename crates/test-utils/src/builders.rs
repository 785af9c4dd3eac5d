#![allow(dead_code)]

use std::path::Path;

use serde_json::Value;

use anonctl::config::{ChannelSection, ConfigFile, RawConfigFile};
use anonctl::request::{Payload, keys};
use anonctl::types::{BackendKind, Channel};

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile::default(),
        }
    }

    pub fn program(mut self, program: &str) -> Self {
        self.config.worker.program = program.to_string();
        self
    }

    pub fn base_args(mut self, args: &[&str]) -> Self {
        self.config.worker.base_args = args.iter().map(|a| a.to_string()).collect();
        self
    }

    pub fn working_dir(mut self, dir: &Path) -> Self {
        self.config.worker.working_dir = Some(dir.to_path_buf());
        self
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.config
            .worker
            .env
            .insert(key.to_string(), value.to_string());
        self
    }

    pub fn service_script(mut self, script: &str) -> Self {
        self.config.service.script = script.to_string();
        self
    }

    pub fn shutdown_grace(mut self, grace: &str) -> Self {
        self.config.service.shutdown_grace = grace.to_string();
        self
    }

    pub fn channel_script(mut self, channel: Channel, script: &str) -> Self {
        self.config.channel.entry(channel).or_default().script = Some(script.to_string());
        self
    }

    pub fn channel_backend(mut self, channel: Channel, backend: BackendKind) -> Self {
        self.config.channel.entry(channel).or_default().backend = Some(backend);
        self
    }

    pub fn channel(mut self, channel: Channel, section: ChannelSection) -> Self {
        self.config.channel.insert(channel, section);
        self
    }

    pub fn raw(self) -> RawConfigFile {
        self.config
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for start-request payloads.
#[derive(Debug, Clone, Default)]
pub struct PayloadBuilder {
    payload: Payload,
}

impl PayloadBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn input(self, path: &Path) -> Self {
        self.path(keys::INPUT_PATH, path)
    }

    pub fn output(self, path: &Path) -> Self {
        self.path(keys::OUTPUT_PATH, path)
    }

    pub fn data_pack(self, path: &Path) -> Self {
        self.path(keys::DATA_PACK_PATH, path)
    }

    pub fn aes_key(self, key: &str) -> Self {
        self.set(keys::AES_KEY, key)
    }

    pub fn path(self, key: &str, path: &Path) -> Self {
        self.set(key, path.display().to_string())
    }

    pub fn set(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.payload.insert(key.to_string(), value.into());
        self
    }

    pub fn build(self) -> Payload {
        self.payload
    }
}
