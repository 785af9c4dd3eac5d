// src/request.rs

//! Validation of start requests before anything is spawned.
//!
//! Payloads are JSON objects using the worker's camelCase vocabulary
//! (`inputPath`, `dataPackPath`, `aesKey`, ...). Validation checks required
//! fields and referenced input files, fills in derived output paths, and
//! otherwise passes every key through untouched.

use std::path::{Path, PathBuf};

use serde_json::{Map, Value};

use crate::errors::{ControlError, Result};
use crate::types::Channel;

/// Schema-free job parameters as supplied by a surface.
pub type Payload = Map<String, Value>;

pub mod keys {
    pub const INPUT_PATH: &str = "inputPath";
    pub const OUTPUT_PATH: &str = "outputPath";
    pub const DATA_PACK_PATH: &str = "dataPackPath";
    pub const MODEL_PATH: &str = "modelPath";
    pub const DEVICE: &str = "device";
    pub const AES_KEY: &str = "aesKey";
    pub const HMAC_KEY: &str = "hmacKey";
    pub const CLASSES: &str = "classes";
    pub const MANUAL_ROIS: &str = "manualRois";
    pub const STYLE: &str = "style";
    pub const DISABLE_DETECTION: &str = "disableDetection";
    pub const WORKER_COUNT: &str = "workerCount";
    pub const EMBED_PACK: &str = "embedPack";
    pub const EMBEDDED_OUTPUT_PATH: &str = "embeddedOutputPath";
}

/// Validate and normalise a payload for `channel`.
pub fn validate_request(channel: Channel, payload: Payload) -> Result<Payload> {
    match channel {
        Channel::Anonymize => validate_anonymize(payload),
        Channel::Restore => validate_restore(payload),
    }
}

fn validate_anonymize(mut payload: Payload) -> Result<Payload> {
    let input = require_existing_file(&payload, keys::INPUT_PATH)?;

    let output = match optional_str(&payload, keys::OUTPUT_PATH)? {
        Some(p) => PathBuf::from(p),
        None => sibling_with_suffix(&input, "_anonymized.mp4"),
    };
    let data_pack = match optional_str(&payload, keys::DATA_PACK_PATH)? {
        Some(p) => PathBuf::from(p),
        None => sibling_with_suffix(&output, "_encrypted_data.pack"),
    };

    for key in [
        keys::MODEL_PATH,
        keys::DEVICE,
        keys::AES_KEY,
        keys::HMAC_KEY,
        keys::STYLE,
        keys::EMBEDDED_OUTPUT_PATH,
    ] {
        optional_str(&payload, key)?;
    }
    for key in [keys::DISABLE_DETECTION, keys::EMBED_PACK] {
        if let Some(v) = payload.get(key) {
            if !v.is_boolean() && !v.is_null() {
                return Err(invalid(format!("`{key}` must be a boolean")));
            }
        }
    }
    if let Some(v) = payload.get(keys::WORKER_COUNT) {
        if !v.is_null() && v.as_u64().is_none_or(|n| n == 0) {
            return Err(invalid(format!(
                "`{}` must be a positive integer",
                keys::WORKER_COUNT
            )));
        }
    }
    if let Some(v) = payload.get(keys::CLASSES) {
        let ok = v.is_null()
            || v.as_array()
                .is_some_and(|items| items.iter().all(Value::is_string));
        if !ok {
            return Err(invalid(format!(
                "`{}` must be an array of strings",
                keys::CLASSES
            )));
        }
    }
    manual_rois(&payload)?;

    payload.insert(
        keys::OUTPUT_PATH.to_string(),
        Value::String(output.display().to_string()),
    );
    payload.insert(
        keys::DATA_PACK_PATH.to_string(),
        Value::String(data_pack.display().to_string()),
    );
    Ok(payload)
}

fn validate_restore(payload: Payload) -> Result<Payload> {
    require_existing_file(&payload, keys::INPUT_PATH)?;
    require_existing_file(&payload, keys::DATA_PACK_PATH)?;

    match optional_str(&payload, keys::AES_KEY)? {
        Some(key) if !key.trim().is_empty() => {}
        _ => {
            return Err(invalid(format!(
                "missing required field `{}`",
                keys::AES_KEY
            )));
        }
    }
    optional_str(&payload, keys::OUTPUT_PATH)?;
    optional_str(&payload, keys::HMAC_KEY)?;

    Ok(payload)
}

/// Manual regions as `[x1, y1, x2, y2]` integer quads.
pub fn manual_rois(payload: &Payload) -> Result<Vec<[i64; 4]>> {
    let Some(value) = payload.get(keys::MANUAL_ROIS) else {
        return Ok(Vec::new());
    };
    if value.is_null() {
        return Ok(Vec::new());
    }

    let entries = value.as_array().ok_or_else(|| {
        invalid(format!("`{}` must be an array", keys::MANUAL_ROIS))
    })?;

    entries
        .iter()
        .map(|entry| {
            let coords: Option<Vec<i64>> = entry
                .as_array()
                .and_then(|items| items.iter().map(Value::as_i64).collect());
            coords
                .and_then(|c| <[i64; 4]>::try_from(c).ok())
                .ok_or_else(|| {
                    invalid(format!(
                        "`{}` entry must contain four integer coordinates",
                        keys::MANUAL_ROIS
                    ))
                })
        })
        .collect()
}

fn require_existing_file(payload: &Payload, key: &str) -> Result<PathBuf> {
    let raw = optional_str(payload, key)?
        .filter(|s| !s.trim().is_empty())
        .ok_or_else(|| invalid(format!("missing required field `{key}`")))?;

    let path = PathBuf::from(raw);
    if !path.is_file() {
        return Err(ControlError::MissingInput(format!(
            "`{key}` refers to {} which does not exist",
            path.display()
        )));
    }
    Ok(path)
}

fn optional_str<'a>(payload: &'a Payload, key: &str) -> Result<Option<&'a str>> {
    match payload.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.as_str())),
        Some(_) => Err(invalid(format!("`{key}` must be a string"))),
    }
}

/// `dir/video.mp4` + `_anonymized.mp4` -> `dir/video_anonymized.mp4`.
fn sibling_with_suffix(path: &Path, suffix: &str) -> PathBuf {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!("{stem}{suffix}"))
}

fn invalid(msg: String) -> ControlError {
    ControlError::InvalidRequest(msg)
}
