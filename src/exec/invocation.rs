// src/exec/invocation.rs

//! Serialization of a job payload into worker command-line arguments.
//!
//! The mapping is deterministic: the same payload always produces the same
//! argument vector, in a fixed flag order, regardless of key order in the
//! payload.

use serde_json::Value;

use crate::request::{Payload, keys, manual_rois};
use crate::types::Channel;

/// Arguments following the script path for an ephemeral worker.
pub fn worker_args(channel: Channel, payload: &Payload) -> Vec<String> {
    match channel {
        Channel::Anonymize => anonymize_args(payload),
        Channel::Restore => restore_args(payload),
    }
}

fn anonymize_args(payload: &Payload) -> Vec<String> {
    let mut args = Vec::new();

    if let Some(input) = str_field(payload, keys::INPUT_PATH) {
        args.push(input.to_string());
    }
    push_opt(&mut args, "--output", str_field(payload, keys::OUTPUT_PATH));
    push_opt(&mut args, "--data-pack", str_field(payload, keys::DATA_PACK_PATH));
    args.push("--json-progress".to_string());

    push_opt(&mut args, "--model", str_field(payload, keys::MODEL_PATH));
    push_opt(&mut args, "--device", str_field(payload, keys::DEVICE));
    push_opt(&mut args, "--key", str_field(payload, keys::AES_KEY));
    push_opt(&mut args, "--hmac-key", str_field(payload, keys::HMAC_KEY));

    // An empty `--classes` would select no classes at all; leave the
    // worker's default set in place instead.
    let classes: Vec<String> = payload
        .get(keys::CLASSES)
        .and_then(Value::as_array)
        .map(|classes| {
            classes
                .iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    if !classes.is_empty() {
        args.push("--classes".to_string());
        args.extend(classes);
    }

    // Validated upstream; a malformed list simply contributes nothing here.
    let rois = manual_rois(payload).unwrap_or_default();
    if !rois.is_empty() {
        args.push("--manual-roi".to_string());
        args.extend(
            rois.iter()
                .map(|[x1, y1, x2, y2]| format!("{x1},{y1},{x2},{y2}")),
        );
    }

    push_opt(&mut args, "--style", str_field(payload, keys::STYLE));
    if bool_field(payload, keys::DISABLE_DETECTION) {
        args.push("--disable-detector".to_string());
    }
    if let Some(workers) = payload.get(keys::WORKER_COUNT).and_then(Value::as_u64) {
        args.push("--workers".to_string());
        args.push(workers.to_string());
    }
    if bool_field(payload, keys::EMBED_PACK) {
        args.push("--embed-pack".to_string());
    }
    push_opt(
        &mut args,
        "--embedded-output",
        str_field(payload, keys::EMBEDDED_OUTPUT_PATH),
    );

    args
}

fn restore_args(payload: &Payload) -> Vec<String> {
    let mut args = Vec::new();

    push_opt(&mut args, "--anonymized-video", str_field(payload, keys::INPUT_PATH));
    push_opt(&mut args, "--data-pack", str_field(payload, keys::DATA_PACK_PATH));
    push_opt(&mut args, "--key", str_field(payload, keys::AES_KEY));
    args.push("--json-progress".to_string());
    push_opt(&mut args, "--output", str_field(payload, keys::OUTPUT_PATH));
    push_opt(&mut args, "--hmac-key", str_field(payload, keys::HMAC_KEY));

    args
}

fn str_field<'a>(payload: &'a Payload, key: &str) -> Option<&'a str> {
    payload
        .get(key)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

fn bool_field(payload: &Payload, key: &str) -> bool {
    payload.get(key).and_then(Value::as_bool).unwrap_or(false)
}

fn push_opt(args: &mut Vec<String>, flag: &str, value: Option<&str>) {
    if let Some(value) = value {
        args.push(flag.to_string());
        args.push(value.to_string());
    }
}
