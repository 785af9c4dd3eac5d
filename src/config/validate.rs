// src/config/validate.rs

use crate::config::model::{
    ChannelConfig, ConfigFile, RawConfigFile, ServiceConfig, WorkerConfig,
    default_channel_config,
};
use crate::errors::{ControlError, Result};
use crate::types::{BackendKind, Channel, parse_duration};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = crate::errors::ControlError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_worker(&raw)?;
        let service = resolve_service(&raw)?;
        let anonymize = resolve_channel(&raw, Channel::Anonymize)?;
        let restore = resolve_channel(&raw, Channel::Restore)?;

        let worker = WorkerConfig {
            program: raw.worker.program,
            base_args: raw.worker.base_args,
            working_dir: raw.worker.working_dir,
            env: raw.worker.env,
        };

        Ok(ConfigFile::new_unchecked(worker, service, anonymize, restore))
    }
}

fn validate_worker(cfg: &RawConfigFile) -> Result<()> {
    if cfg.worker.program.trim().is_empty() {
        return Err(ControlError::ConfigError(
            "[worker].program must not be empty".to_string(),
        ));
    }
    Ok(())
}

fn resolve_service(cfg: &RawConfigFile) -> Result<ServiceConfig> {
    if cfg.service.script.trim().is_empty() {
        return Err(ControlError::ConfigError(
            "[service].script must not be empty".to_string(),
        ));
    }

    let shutdown_grace = parse_duration(&cfg.service.shutdown_grace).map_err(|e| {
        ControlError::ConfigError(format!("[service].shutdown_grace: {e}"))
    })?;

    Ok(ServiceConfig {
        script: cfg.service.script.clone(),
        shutdown_grace,
    })
}

fn resolve_channel(cfg: &RawConfigFile, channel: Channel) -> Result<ChannelConfig> {
    let mut resolved = default_channel_config(channel);

    if let Some(section) = cfg.channel.get(&channel) {
        if let Some(script) = &section.script {
            resolved.script = script.clone();
        }
        if let Some(backend) = section.backend {
            resolved.backend = backend;
        }
    }

    if resolved.script.trim().is_empty() {
        return Err(ControlError::ConfigError(format!(
            "[channel.{channel}].script must not be empty"
        )));
    }

    // The service only knows how to run anonymization jobs.
    if resolved.backend == BackendKind::Service && channel != Channel::Anonymize {
        return Err(ControlError::ConfigError(format!(
            "[channel.{channel}].backend = \"service\" is not supported; \
             only anonymize jobs can run in the persistent service"
        )));
    }

    Ok(resolved)
}
