// src/config/model.rs

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::types::{BackendKind, Channel};

/// Configuration as read from a TOML file, before validation.
///
/// ```toml
/// [worker]
/// program = "python3"
/// base_args = ["-u"]
///
/// [service]
/// script = "scripts/anonymize_service.py"
/// shutdown_grace = "3s"
///
/// [channel.anonymize]
/// script = "scripts/anonymize_video.py"
/// backend = "service"
///
/// [channel.restore]
/// script = "scripts/restore_video.py"
/// ```
///
/// All sections are optional and have reasonable defaults.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfigFile {
    #[serde(default)]
    pub worker: WorkerSection,

    #[serde(default)]
    pub service: ServiceSection,

    /// Per-channel overrides from `[channel.<name>]`.
    #[serde(default)]
    pub channel: BTreeMap<Channel, ChannelSection>,
}

/// `[worker]`: how to launch the worker interpreter.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkerSection {
    #[serde(default = "default_program")]
    pub program: String,

    /// Arguments placed between the program and the script path.
    #[serde(default = "default_base_args")]
    pub base_args: Vec<String>,

    /// Working directory for every worker process.
    #[serde(default)]
    pub working_dir: Option<PathBuf>,

    /// Extra environment variables for every worker process.
    #[serde(default)]
    pub env: BTreeMap<String, String>,
}

impl Default for WorkerSection {
    fn default() -> Self {
        Self {
            program: default_program(),
            base_args: default_base_args(),
            working_dir: None,
            env: BTreeMap::new(),
        }
    }
}

fn default_program() -> String {
    "python3".to_string()
}

fn default_base_args() -> Vec<String> {
    vec!["-u".to_string()]
}

/// `[service]`: the persistent multiplexing worker.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceSection {
    #[serde(default = "default_service_script")]
    pub script: String,

    /// How long to wait for a graceful exit after `shutdown` before killing.
    #[serde(default = "default_shutdown_grace")]
    pub shutdown_grace: String,
}

impl Default for ServiceSection {
    fn default() -> Self {
        Self {
            script: default_service_script(),
            shutdown_grace: default_shutdown_grace(),
        }
    }
}

fn default_service_script() -> String {
    "scripts/anonymize_service.py".to_string()
}

fn default_shutdown_grace() -> String {
    "3s".to_string()
}

/// `[channel.<name>]` overrides.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChannelSection {
    pub script: Option<String>,
    pub backend: Option<BackendKind>,
}

/// Validated, fully resolved configuration.
///
/// Only constructible through `TryFrom<RawConfigFile>` (or [`Default`]), so a
/// `ConfigFile` in hand always passed validation.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub worker: WorkerConfig,
    pub service: ServiceConfig,
    anonymize: ChannelConfig,
    restore: ChannelConfig,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    pub program: String,
    pub base_args: Vec<String>,
    pub working_dir: Option<PathBuf>,
    pub env: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    pub script: String,
    pub shutdown_grace: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    pub script: String,
    pub backend: BackendKind,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(
        worker: WorkerConfig,
        service: ServiceConfig,
        anonymize: ChannelConfig,
        restore: ChannelConfig,
    ) -> Self {
        Self {
            worker,
            service,
            anonymize,
            restore,
        }
    }

    pub fn channel(&self, channel: Channel) -> &ChannelConfig {
        match channel {
            Channel::Anonymize => &self.anonymize,
            Channel::Restore => &self.restore,
        }
    }

    pub fn backend_for(&self, channel: Channel) -> BackendKind {
        self.channel(channel).backend
    }

    /// True if any channel is routed through the persistent service.
    pub fn uses_service(&self) -> bool {
        Channel::ALL
            .iter()
            .any(|c| self.backend_for(*c) == BackendKind::Service)
    }
}

impl Default for ConfigFile {
    fn default() -> Self {
        let worker = WorkerSection::default();
        Self::new_unchecked(
            WorkerConfig {
                program: worker.program,
                base_args: worker.base_args,
                working_dir: worker.working_dir,
                env: worker.env,
            },
            ServiceConfig {
                script: default_service_script(),
                shutdown_grace: Duration::from_secs(3),
            },
            default_channel_config(Channel::Anonymize),
            default_channel_config(Channel::Restore),
        )
    }
}

/// Built-in per-channel defaults.
///
/// Anonymization goes through the persistent service so the detector model
/// stays loaded between jobs; restoration has no model and runs one process
/// per job.
pub(crate) fn default_channel_config(channel: Channel) -> ChannelConfig {
    match channel {
        Channel::Anonymize => ChannelConfig {
            script: "scripts/anonymize_video.py".to_string(),
            backend: BackendKind::Service,
        },
        Channel::Restore => ChannelConfig {
            script: "scripts/restore_video.py".to_string(),
            backend: BackendKind::Ephemeral,
        },
    }
}
