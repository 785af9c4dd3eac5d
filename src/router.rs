// src/router.rs

//! Delivery of envelopes to the UI surface that created a job.
//!
//! Surfaces come and go independently of backend lifetime, so every lookup
//! failure here is silent: a job whose window closed simply keeps running
//! with nobody listening.

use std::collections::HashMap;

use tokio::sync::mpsc;
use tracing::trace;

use crate::protocol::Envelope;
use crate::types::{Channel, SurfaceId};

/// Identifies one subscription within a surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

#[derive(Debug, Default)]
struct SurfaceEntry {
    subscriptions: HashMap<Channel, Vec<(SubscriptionId, mpsc::UnboundedSender<Envelope>)>>,
}

#[derive(Debug, Default)]
pub struct EventRouter {
    surfaces: HashMap<SurfaceId, SurfaceEntry>,
    next_surface: u64,
    next_subscription: u64,
}

impl EventRouter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new addressable surface.
    pub fn open_surface(&mut self) -> SurfaceId {
        self.next_surface += 1;
        let id = SurfaceId(self.next_surface);
        self.surfaces.insert(id, SurfaceEntry::default());
        trace!(surface = %id, "surface opened");
        id
    }

    /// Forget a surface and all of its subscriptions.
    pub fn close_surface(&mut self, id: SurfaceId) -> bool {
        let existed = self.surfaces.remove(&id).is_some();
        trace!(surface = %id, existed, "surface closed");
        existed
    }

    pub fn has_surface(&self, id: SurfaceId) -> bool {
        self.surfaces.contains_key(&id)
    }

    /// Attach a subscriber for one channel. `None` if the surface is gone.
    pub fn subscribe(
        &mut self,
        surface: SurfaceId,
        channel: Channel,
        tx: mpsc::UnboundedSender<Envelope>,
    ) -> Option<SubscriptionId> {
        let entry = self.surfaces.get_mut(&surface)?;
        self.next_subscription += 1;
        let id = SubscriptionId(self.next_subscription);
        entry
            .subscriptions
            .entry(channel)
            .or_default()
            .push((id, tx));
        Some(id)
    }

    pub fn unsubscribe(&mut self, surface: SurfaceId, channel: Channel, id: SubscriptionId) {
        if let Some(subs) = self
            .surfaces
            .get_mut(&surface)
            .and_then(|entry| entry.subscriptions.get_mut(&channel))
        {
            subs.retain(|(sub_id, _)| *sub_id != id);
        }
    }

    /// Deliver to every live subscription the requester holds on `channel`.
    ///
    /// Returns how many subscribers received the envelope. Subscribers whose
    /// receiving end has been dropped are pruned on the way.
    pub fn deliver(&mut self, requester: SurfaceId, channel: Channel, envelope: Envelope) -> usize {
        let Some(subs) = self
            .surfaces
            .get_mut(&requester)
            .and_then(|entry| entry.subscriptions.get_mut(&channel))
        else {
            trace!(
                surface = %requester,
                %channel,
                event = envelope.event(),
                "no live subscriber; dropping envelope"
            );
            return 0;
        };

        subs.retain(|(_, tx)| !tx.is_closed());

        let mut delivered = 0;
        for (_, tx) in subs.iter() {
            if tx.send(envelope.clone()).is_ok() {
                delivered += 1;
            }
        }
        delivered
    }
}
