#![allow(dead_code)]

use std::path::{Path, PathBuf};

use anonctl::engine::Subscription;
use anonctl::protocol::{Envelope, event};

pub use anonctl_test_utils::builders;
pub use anonctl_test_utils::{init_tracing, with_timeout};

/// Create an (empty) stand-in video file named `name` inside `dir`.
pub fn touch(dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    std::fs::write(&path, b"not really a video").expect("write fixture file");
    path
}

/// Collect envelopes until an `exit` or `cancelled` arrives (inclusive).
pub async fn collect_until_terminal(subscription: &mut Subscription) -> Vec<Envelope> {
    let mut seen = Vec::new();
    while let Some(envelope) = subscription.recv().await {
        let terminal = envelope.is_event(event::EXIT) || envelope.is_event(event::CANCELLED);
        seen.push(envelope);
        if terminal {
            break;
        }
    }
    seen
}

pub fn events(envelopes: &[Envelope]) -> Vec<&str> {
    envelopes.iter().map(Envelope::event).collect()
}
