//! flowpath — a software packet dataplane
//!
//! Packets arrive on ingress ports, bind protocol headers and fields into a
//! per-packet context, steer through a pipeline of match-action tables whose
//! flow entries a loaded application installs, accumulate a deferred action
//! list, and leave on one or more egress ports.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                          SYSTEM                              │
//! │                                                              │
//! │  ┌────────────┐        ┌──────────────────────────────────┐  │
//! │  │ Port table │◄───────┤            Dataplane             │  │
//! │  │ drop/flood │        │                                  │  │
//! │  └─────┬──────┘        │  ┌──────┐  ┌────────────────┐    │  │
//! │        │               │  │ Pool │  │  Application   │    │  │
//! │   ingress frame        │  └──┬───┘  └───────┬────────┘    │  │
//! │        │               │     │ alloc        │ process     │  │
//! │        ▼               │     ▼              ▼             │  │
//! │  ┌───────────┐         │  ┌─────────────────────────┐     │  │
//! │  │  Driver   ├────────►│  │         Context         │     │  │
//! │  └───────────┘         │  │ bytes · cursor · binds  │     │  │
//! │                        │  │ action list · metadata  │     │  │
//! │                        │  └───────────┬─────────────┘     │  │
//! │                        │              │ goto_table        │  │
//! │                        │              ▼                   │  │
//! │                        │  ┌──────┐ ┌──────┐ ┌──────┐      │  │
//! │                        │  │ T0   ├►│ T1   ├►│ Tn   │      │  │
//! │                        │  └──────┘ └──────┘ └──────┘      │  │
//! │                        │     gather key → find → flow     │  │
//! │                        └──────────────────────────────────┘  │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! A port driver allocates a buffer from the [`buffer::Pool`], fills its raw
//! bytes, and hands the packet to [`Dataplane::process_packet`]. The loaded
//! application binds the current header and its fields, then dispatches into
//! a [`table::Table`], which resolves a [`table::Flow`] by gathering a
//! [`key::Key`] from the bound fields. The matched flow's handler mutates the
//! context, immediately or through the deferred action list. At egress the
//! list is committed, the frame leaves on its output port, and the buffer
//! returns to the pool.
//!
//! # Example
//!
//! ```ignore
//! use flowpath::{dispatch, Context, DataplaneConfig, Result, System, Table, TableKind};
//!
//! fn drop_all(_table: &Table, ctx: &mut Context<'_>) -> Result<()> {
//!     dispatch::drop_packet(ctx)
//! }
//!
//! let system = System::new();
//! let dp = system.create_dataplane("dp0", DataplaneConfig::default())?;
//! let table = dp.create_table(0, TableKind::Exact, 1024, 6)?;
//! dispatch::add_miss(&table, drop_all);
//! dp.load_app(std::sync::Arc::new(MyApp { table }))?;
//! dp.start()?;
//! dp.process_packet(&frame, ingress_port)?;
//! ```

#![warn(missing_docs)]

pub mod action;
pub mod app;
pub mod buffer;
pub mod context;
pub mod dataplane;
pub mod dispatch;
pub mod error;
pub mod key;
pub mod port;
pub mod stats;
pub mod system;
pub mod table;

pub use action::{Action, AddressSpace, Field, Instruction};
pub use app::{AppState, Application};
pub use buffer::{Buffer, Pool};
pub use context::{Binding, Context};
pub use dataplane::{Dataplane, DataplaneConfig};
pub use error::{Error, PortError, Result};
pub use key::{gather, Key};
pub use port::{Port, PortState, PortTable, RecordingPort, DROP_PORT_ID, FLOOD_PORT_ID};
pub use stats::{DataplaneStats, StatsSnapshot};
pub use system::System;
pub use table::{Flow, FlowCounters, FlowFlags, FlowHandler, FlowTimeouts, Table, TableKind};

/// Raw packet region of every pool buffer, in bytes
pub const BUFFER_SIZE: usize = 2048;

/// Per-packet metadata region, in bytes
pub const METADATA_SIZE: usize = 256;

/// Default buffer pool capacity
pub const DEFAULT_POOL_SIZE: usize = 4096;

/// Maximum gathered key width, in bytes
pub const MAX_KEY: usize = 128;
