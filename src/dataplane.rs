//! The dataplane value
//!
//! A [`Dataplane`] owns its buffer pool, its ordered table list, and its
//! application slot, and holds a shared handle to the port registry. Worker
//! threads call [`Dataplane::process_packet`] with raw frames; everything
//! else flows from the application's `process` hook.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::app::{AppSlot, Application};
use crate::buffer::Pool;
use crate::context::Context;
use crate::error::{Error, PortError, Result};
use crate::port::{Port, PortTable};
use crate::stats::DataplaneStats;
use crate::table::{Table, TableKind};
use crate::{BUFFER_SIZE, DEFAULT_POOL_SIZE};

/// Dataplane construction parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataplaneConfig {
    /// Buffer pool capacity
    pub pool_size: usize,
}

impl Default for DataplaneConfig {
    fn default() -> Self {
        Self {
            pool_size: DEFAULT_POOL_SIZE,
        }
    }
}

/// A named packet-processing plane
pub struct Dataplane {
    name: String,
    pool: Pool,
    tables: RwLock<Vec<Arc<Table>>>,
    app: AppSlot,
    ports: Arc<PortTable>,
    stats: DataplaneStats,
}

impl Dataplane {
    /// Build a dataplane over a shared port registry
    pub fn new(name: impl Into<String>, config: DataplaneConfig, ports: Arc<PortTable>) -> Self {
        let name = name.into();
        info!(dataplane = %name, pool_size = config.pool_size, "dataplane created");
        Self {
            name,
            pool: Pool::new(config.pool_size),
            tables: RwLock::new(Vec::new()),
            app: AppSlot::new(),
            ports,
            stats: DataplaneStats::default(),
        }
    }

    /// Dataplane name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The buffer pool
    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    /// The shared port registry
    pub fn ports(&self) -> &PortTable {
        &self.ports
    }

    /// The dataplane counters
    pub fn stats(&self) -> &DataplaneStats {
        &self.stats
    }

    /// The application slot
    pub fn app(&self) -> &AppSlot {
        &self.app
    }

    /// Construct a table and append it to the ordered table list.
    ///
    /// Tables are appended during application start and keep their identity
    /// for the dataplane's lifetime; only their flow sets mutate afterwards.
    pub fn create_table(
        &self,
        id: u32,
        kind: TableKind,
        capacity: usize,
        key_size: u16,
    ) -> Result<Arc<Table>> {
        let table = Arc::new(Table::new(id, kind, capacity, key_size)?);
        self.tables.write().push(table.clone());
        debug!(dataplane = %self.name, table = id, ?kind, key_size, "table created");
        Ok(table)
    }

    /// The table registered under `id`
    pub fn table(&self, id: u32) -> Result<Arc<Table>> {
        self.tables
            .read()
            .iter()
            .find(|t| t.id() == id)
            .cloned()
            .ok_or(Error::UnknownTable(id))
    }

    /// All tables in creation order
    pub fn tables(&self) -> Vec<Arc<Table>> {
        self.tables.read().clone()
    }

    /// Attach an application
    pub fn load_app(&self, app: Arc<dyn Application>) -> Result<()> {
        self.app.load(app, self)
    }

    /// Detach the application
    pub fn unload_app(&self) -> Result<()> {
        self.app.unload(self)
    }

    /// Start the application
    pub fn start(&self) -> Result<()> {
        self.app.start(self)
    }

    /// Stop the application
    pub fn stop(&self) -> Result<()> {
        self.app.stop(self)
    }

    /// Run one raw frame through the loaded application.
    ///
    /// Allocates a buffer, builds the context, invokes `process`, and
    /// performs the implicit egress: the deferred action list is committed
    /// and the frame leaves on the chosen output port. The buffer returns to
    /// the pool on every path; a per-packet error terminates only this
    /// packet.
    pub fn process_packet(&self, frame: &[u8], input_port: u32) -> Result<()> {
        if frame.len() > BUFFER_SIZE {
            return Err(Error::FrameTooLarge(frame.len()));
        }
        let buffer = match self.pool.alloc() {
            Ok(buffer) => buffer,
            Err(err) => {
                self.stats.record_pool_exhausted();
                return Err(err);
            }
        };
        let id = buffer.id();
        buffer.fill(frame);
        self.stats.record_rx(frame.len() as u64);

        let mut ctx = Context::new(buffer, self, input_port);
        let result = self
            .app
            .process(&mut ctx)
            .and_then(|()| self.finalize(&mut ctx));

        let discarded = result.is_err() || (ctx.is_dropped() && !ctx.is_sent());
        drop(ctx);
        self.pool.dealloc(id);

        if let Err(ref err) = result {
            debug!(dataplane = %self.name, %err, "packet processing failed");
            self.stats.record_app_error();
        }
        if discarded {
            self.stats.record_drop();
        }
        result
    }

    /// Implicit egress after `process` returns: commit the action list and
    /// transmit on the chosen output port. A packet nothing claimed is
    /// discarded.
    fn finalize(&self, ctx: &mut Context<'_>) -> Result<()> {
        if ctx.is_sent() || ctx.is_dropped() {
            return Ok(());
        }
        ctx.commit()?;
        if ctx.is_dropped() {
            return Ok(());
        }
        let Some(port_id) = ctx.output_port() else {
            ctx.mark_dropped();
            return Ok(());
        };
        let port = self
            .ports
            .get(port_id)
            .ok_or(Error::UnknownPortId(port_id))?;
        self.transmit(ctx, port.as_ref())
    }

    /// Send the context on `port`, folding a downed link into a counted drop.
    pub(crate) fn transmit(&self, ctx: &mut Context<'_>, port: &dyn Port) -> Result<()> {
        match port.send(ctx) {
            Ok(()) => {
                if !ctx.is_dropped() && !ctx.is_sent() {
                    ctx.mark_sent();
                    self.stats.record_tx(ctx.frame().len() as u64);
                }
                Ok(())
            }
            Err(PortError::LinkDown(id)) => {
                debug!(dataplane = %self.name, port = id, "egress on downed link");
                self.stats.record_link_down();
                ctx.mark_dropped();
                Ok(())
            }
            Err(err) => Err(Error::Port(err)),
        }
    }
}
