//! Match-action tables and flows
//!
//! # Design
//!
//! - Exact tables hash the raw key bytes: equal keys are equal byte strings
//!   of the declared width
//! - Lookups are total: every `find` yields a flow, falling back to the
//!   installed miss flow or a built-in drop-all miss
//! - The flow map sits behind a reader-writer lock; workers read, the control
//!   plane occasionally writes, and a reader never observes a torn flow
//! - Counters are relaxed atomics: monotone, observable to probes, not exact
//!   under contention

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use tracing::debug;

use crate::context::Context;
use crate::error::{Error, Result};
use crate::key::Key;
use crate::MAX_KEY;

bitflags::bitflags! {
    /// Per-flow modifier flags
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FlowFlags: u32 {
        /// Notify when the flow is removed
        const SEND_FLOW_REM = 1;
        /// Check for overlapping entries on insert
        const CHECK_OVERLAP = 1 << 1;
        /// Reset counters when the flow is replaced
        const RESET_COUNTS = 1 << 2;
    }
}

/// Table matching disciplines
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TableKind {
    /// Hash lookup on the raw key bytes
    Exact,
    /// Longest-prefix match; reserved, answers with the miss flow
    Prefix,
    /// Masked match; reserved, answers with the miss flow
    Wildcard,
}

impl TableKind {
    /// Decode a numeric table-type code
    pub fn from_code(code: u32) -> Result<Self> {
        match code {
            0 => Ok(TableKind::Exact),
            1 => Ok(TableKind::Prefix),
            2 => Ok(TableKind::Wildcard),
            other => Err(Error::UnknownTableType(other)),
        }
    }
}

/// Per-flow hit counters, updated relaxed
#[derive(Debug, Default)]
pub struct FlowCounters {
    packets: AtomicU64,
    bytes: AtomicU64,
    timestamp: AtomicU64,
}

impl FlowCounters {
    /// Record one matched packet of `frame_bytes` length
    #[inline(always)]
    pub fn hit(&self, frame_bytes: u64) {
        self.packets.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(frame_bytes, Ordering::Relaxed);
        self.timestamp.store(timestamp_micros(), Ordering::Relaxed);
    }

    /// Matched packet count
    pub fn packets(&self) -> u64 {
        self.packets.load(Ordering::Relaxed)
    }

    /// Matched byte count
    pub fn bytes(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    /// Microsecond timestamp of the last hit
    pub fn last_hit_micros(&self) -> u64 {
        self.timestamp.load(Ordering::Relaxed)
    }
}

/// Idle and hard timeouts carried on a flow.
///
/// Data only; expiry is a control-plane concern, the dataplane never enforces
/// these.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlowTimeouts {
    /// Seconds before unconditional removal
    pub hard: u32,
    /// Seconds of inactivity before removal
    pub idle: u32,
}

/// The callable a matched flow runs against the packet context
pub trait FlowHandler: Send + Sync {
    /// Execute the flow's instructions
    fn run(&self, table: &Table, ctx: &mut Context<'_>) -> Result<()>;
}

/// Adapter turning a plain function or closure into a [`FlowHandler`].
struct FnHandler<F>(F);

impl<F> FlowHandler for FnHandler<F>
where
    F: Fn(&Table, &mut Context<'_>) -> Result<()> + Send + Sync,
{
    fn run(&self, table: &Table, ctx: &mut Context<'_>) -> Result<()> {
        (self.0)(table, ctx)
    }
}

/// Built-in miss behavior for tables with no installed miss flow.
struct DropAll;

impl FlowHandler for DropAll {
    fn run(&self, _table: &Table, ctx: &mut Context<'_>) -> Result<()> {
        ctx.mark_dropped();
        Ok(())
    }
}

/// A key→handler binding with counters and modifiers
#[derive(Clone)]
pub struct Flow {
    priority: u16,
    counters: Arc<FlowCounters>,
    handler: Arc<dyn FlowHandler>,
    timeouts: FlowTimeouts,
    cookie: u64,
    flags: FlowFlags,
}

impl Flow {
    /// Flow with default priority, counters, timeouts, cookie, and flags
    pub fn new(handler: Arc<dyn FlowHandler>) -> Self {
        Self {
            priority: 0,
            counters: Arc::new(FlowCounters::default()),
            handler,
            timeouts: FlowTimeouts::default(),
            cookie: 0,
            flags: FlowFlags::empty(),
        }
    }

    /// Flow from a plain function or closure
    pub fn from_fn<F>(f: F) -> Self
    where
        F: Fn(&Table, &mut Context<'_>) -> Result<()> + Send + Sync + 'static,
    {
        Self::new(Arc::new(FnHandler(f)))
    }

    /// Set the priority
    pub fn with_priority(mut self, priority: u16) -> Self {
        self.priority = priority;
        self
    }

    /// Set the controller cookie
    pub fn with_cookie(mut self, cookie: u64) -> Self {
        self.cookie = cookie;
        self
    }

    /// Set the timeouts
    pub fn with_timeouts(mut self, timeouts: FlowTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Set the modifier flags
    pub fn with_flags(mut self, flags: FlowFlags) -> Self {
        self.flags = flags;
        self
    }

    /// Hit counters, shared across clones of this flow
    pub fn counters(&self) -> &FlowCounters {
        &self.counters
    }

    /// Match priority
    pub fn priority(&self) -> u16 {
        self.priority
    }

    /// Controller cookie
    pub fn cookie(&self) -> u64 {
        self.cookie
    }

    /// Timeout data
    pub fn timeouts(&self) -> FlowTimeouts {
        self.timeouts
    }

    /// Modifier flags
    pub fn flags(&self) -> FlowFlags {
        self.flags
    }

    /// Run the flow's handler
    pub fn run(&self, table: &Table, ctx: &mut Context<'_>) -> Result<()> {
        self.handler.run(table, ctx)
    }
}

/// A container of flows with a distinguished miss handler
pub struct Table {
    id: u32,
    kind: TableKind,
    key_size: u16,
    capacity: usize,
    flows: RwLock<HashMap<Key, Flow>>,
    miss: RwLock<Option<Flow>>,
    default_miss: Flow,
}

impl Table {
    /// Build a table. The key width must be between 1 and [`MAX_KEY`] bytes.
    pub fn new(id: u32, kind: TableKind, capacity: usize, key_size: u16) -> Result<Self> {
        if key_size == 0 || key_size as usize > MAX_KEY {
            return Err(Error::InvalidKeyWidth(key_size));
        }
        Ok(Self {
            id,
            kind,
            key_size,
            capacity,
            flows: RwLock::new(HashMap::with_capacity(capacity)),
            miss: RwLock::new(None),
            default_miss: Flow::new(Arc::new(DropAll)),
        })
    }

    /// Table id
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Matching discipline
    pub fn kind(&self) -> TableKind {
        self.kind
    }

    /// Declared key width in bytes
    pub fn key_size(&self) -> u16 {
        self.key_size
    }

    /// Declared capacity hint
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of installed flows, miss excluded
    pub fn len(&self) -> usize {
        self.flows.read().len()
    }

    /// True when no flows are installed
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Install a flow, replacing any entry under the same key
    pub fn insert(&self, key: Key, flow: Flow) -> Result<()> {
        if key.width() != self.key_size {
            return Err(Error::KeyWidthMismatch {
                expected: self.key_size,
                found: key.width(),
            });
        }
        self.flows.write().insert(key, flow);
        debug!(table = self.id, "flow installed");
        Ok(())
    }

    /// Install or replace the miss flow
    pub fn insert_miss(&self, flow: Flow) {
        *self.miss.write() = Some(flow);
        debug!(table = self.id, "miss flow installed");
    }

    /// Remove the flow under `key`; no-op when absent
    pub fn erase(&self, key: &Key) {
        if self.flows.write().remove(key).is_some() {
            debug!(table = self.id, "flow removed");
        }
    }

    /// Look up the flow matching `key`.
    ///
    /// Total: returns the matched flow, otherwise the installed miss flow,
    /// otherwise the built-in drop-all miss. Reserved table kinds answer with
    /// the miss flow for every key. Hit accounting happens at dispatch, where
    /// the packet length is known.
    pub fn find(&self, key: &Key) -> Flow {
        if self.kind == TableKind::Exact {
            if let Some(flow) = self.flows.read().get(key) {
                return flow.clone();
            }
        }
        self.miss
            .read()
            .as_ref()
            .cloned()
            .unwrap_or_else(|| self.default_miss.clone())
    }

    /// The flow installed under `key`, if any (probe surface)
    pub fn flow(&self, key: &Key) -> Option<Flow> {
        self.flows.read().get(key).cloned()
    }

    /// The installed miss flow, if any (probe surface)
    pub fn miss_flow(&self) -> Option<Flow> {
        self.miss.read().as_ref().cloned()
    }
}

fn timestamp_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}
