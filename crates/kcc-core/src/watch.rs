//! Toolchain-set watch keyed by connection id.
//!
//! Connections announce their toolchains out of band (a handshake frame, a metrics feed, ...).
//! The broker only consumes the [`ToolchainWatcher`] contract; [`ToolchainRegistry`] is the
//! in-process implementation transports publish into.
use std::{collections::HashMap, sync::Mutex};

use tokio::sync::watch;
use tracing::trace;

use kcc_model::{PartyId, Toolchains};

use crate::guard::lock;

/// Source of toolchain sets for connected parties.
pub trait ToolchainWatcher: Send + Sync + 'static {
    /// Subscribe to the toolchain set of `id`: the current set (once known) and every later one.
    fn watch_toolchains(&self, id: PartyId) -> ToolchainWatch;

    /// Drop any state kept for `id`. Called once its connection is gone.
    fn release(&self, _id: PartyId) {}
}

/// Subscription returned by [`ToolchainWatcher::watch_toolchains`].
///
/// Intermediate updates may be coalesced; [`ToolchainWatch::next`] always yields the newest set.
pub struct ToolchainWatch {
    rx: watch::Receiver<Option<Toolchains>>,
    primed: bool,
}

impl ToolchainWatch {
    pub fn new(rx: watch::Receiver<Option<Toolchains>>) -> Self {
        Self { rx, primed: false }
    }

    /// Wait for the next toolchain set. Returns `None` once the publisher is gone.
    pub async fn next(&mut self) -> Option<Toolchains> {
        if !self.primed {
            self.primed = true;
            if let Some(current) = self.rx.borrow_and_update().clone() {
                return Some(current);
            }
        }
        loop {
            self.rx.changed().await.ok()?;
            if let Some(set) = self.rx.borrow_and_update().clone() {
                return Some(set);
            }
        }
    }
}

/// In-process [`ToolchainWatcher`] that transports publish into.
#[derive(Default)]
pub struct ToolchainRegistry {
    channels: Mutex<HashMap<PartyId, watch::Sender<Option<Toolchains>>>>,
}

impl ToolchainRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Publish the current toolchain set of `id`, replacing the previous one.
    pub fn publish(&self, id: PartyId, toolchains: Toolchains) {
        let mut channels = lock(&self.channels);
        let tx = channels
            .entry(id)
            .or_insert_with(|| watch::channel(None).0);
        trace!(party = %id, count = toolchains.len(), "toolchains published");
        tx.send_replace(Some(toolchains));
    }

    /// Publish the first toolchain set of a new connection.
    ///
    /// Returns `false` without touching anything if `id` already has a channel, i.e. a connection
    /// with that id is live or still winding down.
    pub fn claim(&self, id: PartyId, toolchains: Toolchains) -> bool {
        let mut channels = lock(&self.channels);
        if channels.contains_key(&id) {
            trace!(party = %id, "toolchain channel already claimed");
            return false;
        }
        trace!(party = %id, count = toolchains.len(), "toolchains claimed");
        channels.insert(id, watch::channel(Some(toolchains)).0);
        true
    }

    /// Number of parties with a live channel.
    pub fn len(&self) -> usize {
        lock(&self.channels).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ToolchainWatcher for ToolchainRegistry {
    fn watch_toolchains(&self, id: PartyId) -> ToolchainWatch {
        let mut channels = lock(&self.channels);
        let tx = channels
            .entry(id)
            .or_insert_with(|| watch::channel(None).0);
        ToolchainWatch::new(tx.subscribe())
    }

    fn release(&self, id: PartyId) {
        lock(&self.channels).remove(&id);
    }
}
