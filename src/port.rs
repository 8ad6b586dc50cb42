//! Ports and the port registry
//!
//! The dataplane consumes a minimal [`Port`] surface: an id, a name, link
//! state, and `send`. Real socket drivers live outside the core; the
//! in-memory [`RecordingPort`] stands in for them in tests and loopback
//! setups.
//!
//! Two well-known virtual ports exist on every registry: the **drop** port,
//! which discards the context, and the **flood** port, which replicates the
//! committed frame to every registered port that is neither the ingress port
//! nor link-down.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::context::Context;
use crate::error::PortError;

/// Id of the well-known drop port
pub const DROP_PORT_ID: u32 = u32::MAX;

/// Id of the well-known flood port
pub const FLOOD_PORT_ID: u32 = u32::MAX - 1;

/// Mutable link state of a port
#[derive(Debug, Default)]
pub struct PortState {
    link_down: AtomicBool,
}

impl PortState {
    /// True when the link is down
    pub fn link_down(&self) -> bool {
        self.link_down.load(Ordering::Relaxed)
    }

    /// Raise or clear the link-down flag
    pub fn set_link_down(&self, down: bool) {
        self.link_down.store(down, Ordering::Relaxed);
    }
}

/// The egress surface the dataplane consumes
pub trait Port: Send + Sync {
    /// Port id
    fn id(&self) -> u32;

    /// Port name
    fn name(&self) -> &str;

    /// Link state
    fn state(&self) -> &PortState;

    /// Transmit the context's frame
    fn send(&self, ctx: &mut Context<'_>) -> std::result::Result<(), PortError>;
}

/// Registry of ports by id, with the two well-known virtual ports built in
pub struct PortTable {
    by_id: DashMap<u32, Arc<dyn Port>>,
    drop_port: Arc<DropPort>,
    flood_port: Arc<FloodPort>,
}

impl PortTable {
    /// Build a registry holding only the drop and flood ports
    pub fn new() -> Arc<Self> {
        Arc::new_cyclic(|table| Self {
            by_id: DashMap::new(),
            drop_port: Arc::new(DropPort::default()),
            flood_port: Arc::new(FloodPort {
                ports: table.clone(),
                state: PortState::default(),
            }),
        })
    }

    /// Register a port under its own id
    pub fn add(&self, port: Arc<dyn Port>) {
        debug_assert!(
            port.id() != DROP_PORT_ID && port.id() != FLOOD_PORT_ID,
            "port id {} is reserved",
            port.id()
        );
        debug!(port = port.id(), name = port.name(), "port registered");
        self.by_id.insert(port.id(), port);
    }

    /// Remove a port; no-op when absent. The well-known ports cannot be
    /// removed.
    pub fn remove(&self, id: u32) -> Option<Arc<dyn Port>> {
        self.by_id.remove(&id).map(|(_, port)| port)
    }

    /// Port by id, including the well-known ids
    pub fn get(&self, id: u32) -> Option<Arc<dyn Port>> {
        match id {
            DROP_PORT_ID => Some(self.drop_port.clone() as Arc<dyn Port>),
            FLOOD_PORT_ID => Some(self.flood_port.clone() as Arc<dyn Port>),
            _ => self.by_id.get(&id).map(|entry| Arc::clone(entry.value())),
        }
    }

    /// Port by name, including "drop" and "flood"
    pub fn find(&self, name: &str) -> Option<Arc<dyn Port>> {
        match name {
            "drop" => Some(self.drop_port.clone() as Arc<dyn Port>),
            "flood" => Some(self.flood_port.clone() as Arc<dyn Port>),
            _ => self
                .by_id
                .iter()
                .find(|entry| entry.value().name() == name)
                .map(|entry| Arc::clone(entry.value())),
        }
    }

    /// The well-known drop port
    pub fn drop_port(&self) -> Arc<dyn Port> {
        self.drop_port.clone()
    }

    /// The well-known flood port
    pub fn flood_port(&self) -> Arc<dyn Port> {
        self.flood_port.clone()
    }

    /// Number of registered ports, well-known ports excluded
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// True when no ports are registered
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

/// Discards every context sent to it
#[derive(Debug, Default)]
pub struct DropPort {
    state: PortState,
}

impl Port for DropPort {
    fn id(&self) -> u32 {
        DROP_PORT_ID
    }

    fn name(&self) -> &str {
        "drop"
    }

    fn state(&self) -> &PortState {
        &self.state
    }

    fn send(&self, ctx: &mut Context<'_>) -> std::result::Result<(), PortError> {
        trace!(buffer = ctx.buffer_id(), "sent to drop port");
        ctx.mark_dropped();
        Ok(())
    }
}

/// Replicates the frame to every non-ingress, link-up port
pub struct FloodPort {
    ports: Weak<PortTable>,
    state: PortState,
}

impl Port for FloodPort {
    fn id(&self) -> u32 {
        FLOOD_PORT_ID
    }

    fn name(&self) -> &str {
        "flood"
    }

    fn state(&self) -> &PortState {
        &self.state
    }

    fn send(&self, ctx: &mut Context<'_>) -> std::result::Result<(), PortError> {
        let Some(table) = self.ports.upgrade() else {
            return Err(PortError::Closed(FLOOD_PORT_ID));
        };
        let targets: Vec<Arc<dyn Port>> = table
            .by_id
            .iter()
            .filter(|entry| *entry.key() != ctx.input_port() && !entry.value().state().link_down())
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        let stats = ctx.dataplane().stats();
        for port in targets {
            match port.send(ctx) {
                Ok(()) => stats.record_tx(ctx.frame().len() as u64),
                Err(err) => {
                    debug!(port = port.id(), %err, "flood replica failed");
                    if matches!(err, PortError::LinkDown(_)) {
                        stats.record_link_down();
                    }
                }
            }
        }
        stats.record_flood();
        ctx.mark_sent();
        Ok(())
    }
}

/// In-memory port that keeps every transmitted frame.
///
/// Stands in for the external socket drivers in tests and loopback setups.
pub struct RecordingPort {
    id: u32,
    name: String,
    state: PortState,
    frames: Mutex<Vec<Vec<u8>>>,
}

impl RecordingPort {
    /// Build a recording port
    pub fn new(id: u32, name: impl Into<String>) -> Arc<Self> {
        Arc::new(Self {
            id,
            name: name.into(),
            state: PortState::default(),
            frames: Mutex::new(Vec::new()),
        })
    }

    /// Copies of every frame sent so far
    pub fn frames(&self) -> Vec<Vec<u8>> {
        self.frames.lock().clone()
    }

    /// Number of frames sent so far
    pub fn frame_count(&self) -> usize {
        self.frames.lock().len()
    }
}

impl Port for RecordingPort {
    fn id(&self) -> u32 {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn state(&self) -> &PortState {
        &self.state
    }

    fn send(&self, ctx: &mut Context<'_>) -> std::result::Result<(), PortError> {
        if self.state.link_down() {
            return Err(PortError::LinkDown(self.id));
        }
        self.frames.lock().push(ctx.frame().to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataplane::{Dataplane, DataplaneConfig};

    #[test]
    fn registry_lookup_by_id_and_name() {
        let ports = PortTable::new();
        let p = RecordingPort::new(3, "veth3");
        ports.add(p);

        assert_eq!(ports.get(3).unwrap().name(), "veth3");
        assert_eq!(ports.find("veth3").unwrap().id(), 3);
        assert!(ports.get(4).is_none());
        assert!(ports.find("nope").is_none());
    }

    #[test]
    fn well_known_ports_resolve() {
        let ports = PortTable::new();
        assert_eq!(ports.get(DROP_PORT_ID).unwrap().name(), "drop");
        assert_eq!(ports.find("flood").unwrap().id(), FLOOD_PORT_ID);
        // Not counted among the registered ports.
        assert!(ports.is_empty());
    }

    #[test]
    fn link_down_send_fails() {
        let ports = PortTable::new();
        let p = RecordingPort::new(1, "veth1");
        p.state().set_link_down(true);
        ports.add(p.clone());

        let dp = Dataplane::new("p", DataplaneConfig { pool_size: 1 }, ports);
        let buf = dp.pool().alloc().unwrap();
        buf.fill(&[1, 2, 3]);
        let mut ctx = Context::new(buf, &dp, 0);

        let port = dp.ports().get(1).unwrap();
        assert!(matches!(port.send(&mut ctx), Err(PortError::LinkDown(1))));
        assert_eq!(p.frame_count(), 0);
    }

    #[test]
    fn drop_port_marks_context() {
        let ports = PortTable::new();
        let dp = Dataplane::new("p", DataplaneConfig { pool_size: 1 }, ports);
        let buf = dp.pool().alloc().unwrap();
        buf.fill(&[1, 2, 3]);
        let mut ctx = Context::new(buf, &dp, 0);

        dp.ports().drop_port().send(&mut ctx).unwrap();
        assert!(ctx.is_dropped());
    }
}
