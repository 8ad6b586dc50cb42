//! The runtime call surface for loaded applications
//!
//! Every operation a flow handler or an application's `process` hook may
//! invoke against its packet context lives here. [`goto_table`] is the
//! pipeline's sole control transfer; there is no implicit fallthrough
//! between tables.

use std::sync::Arc;

use tracing::trace;

use crate::action::{Action, Instruction};
use crate::context::Context;
use crate::dataplane::Dataplane;
use crate::error::{Error, Result};
use crate::key::{gather, Key};
use crate::port::Port;
use crate::table::{Flow, Table, TableKind};

/// Send the packet through the dataplane's well-known drop port
pub fn drop_packet(ctx: &mut Context<'_>) -> Result<()> {
    let dp = ctx.dataplane();
    let port = dp.ports().drop_port();
    dp.transmit(ctx, port.as_ref())
}

/// Commit the action list and replicate the frame to all non-ingress,
/// link-up ports
pub fn flood(ctx: &mut Context<'_>) -> Result<()> {
    ctx.commit()?;
    if ctx.is_dropped() {
        return Ok(());
    }
    let dp = ctx.dataplane();
    let port = dp.ports().flood_port();
    dp.transmit(ctx, port.as_ref())
}

/// Execute an action immediately
pub fn apply(ctx: &mut Context<'_>, action: &Action) -> Result<()> {
    ctx.apply_action(action)
}

/// Append an action to the deferred list
pub fn write(ctx: &mut Context<'_>, action: Action) {
    ctx.write_action(action);
}

/// Empty the deferred list
pub fn clear(ctx: &mut Context<'_>) {
    ctx.clear_actions();
}

/// Dispatch the context into a table.
///
/// Gathers the key from the listed bound fields, looks up the flow (total;
/// the miss flow answers when nothing matches), records one hit with the
/// frame length, and runs the matched flow's handler.
pub fn goto_table(ctx: &mut Context<'_>, table: &Table, field_ids: &[u32]) -> Result<()> {
    let key = gather(ctx, table.key_size(), field_ids)?;
    let flow = table.find(&key);
    flow.counters().hit(ctx.frame().len() as u64);
    trace!(table = table.id(), "table dispatch");
    flow.run(table, ctx)
}

/// Look up a port by name
pub fn get_port(dp: &Dataplane, name: &str) -> Result<Arc<dyn Port>> {
    dp.ports()
        .find(name)
        .ok_or_else(|| Error::UnknownPort(name.to_string()))
}

/// Commit the action list and transmit immediately on `port`
pub fn output_port(ctx: &mut Context<'_>, port: &dyn Port) -> Result<()> {
    ctx.commit()?;
    if ctx.is_dropped() {
        return Ok(());
    }
    ctx.set_output_port(port.id());
    ctx.dataplane().transmit(ctx, port)
}

/// Construct a table from a numeric type code and register it
pub fn create_table(
    dp: &Dataplane,
    id: u32,
    capacity: usize,
    key_width: u16,
    kind_code: u32,
) -> Result<Arc<Table>> {
    let kind = TableKind::from_code(kind_code)?;
    dp.create_table(id, kind, capacity, key_width)
}

/// Install a flow under `key_bytes` with default counters and timeouts.
///
/// Stateful handlers implement [`crate::table::FlowHandler`] and go in
/// through [`Table::insert`] directly.
pub fn add_flow<F>(table: &Table, key_bytes: &[u8], handler: F) -> Result<()>
where
    F: Fn(&Table, &mut Context<'_>) -> Result<()> + Send + Sync + 'static,
{
    if key_bytes.len() != table.key_size() as usize {
        return Err(Error::KeyWidthMismatch {
            expected: table.key_size(),
            found: key_bytes.len() as u16,
        });
    }
    table.insert(Key::new(key_bytes)?, Flow::from_fn(handler))
}

/// Install the table's miss flow
pub fn add_miss<F>(table: &Table, handler: F)
where
    F: Fn(&Table, &mut Context<'_>) -> Result<()> + Send + Sync + 'static,
{
    table.insert_miss(Flow::from_fn(handler));
}

/// Remove the flow under `key_bytes`; no-op when absent
pub fn del_flow(table: &Table, key_bytes: &[u8]) -> Result<()> {
    if key_bytes.len() != table.key_size() as usize {
        return Err(Error::KeyWidthMismatch {
            expected: table.key_size(),
            found: key_bytes.len() as u16,
        });
    }
    table.erase(&Key::new(key_bytes)?);
    Ok(())
}

/// Advance the header cursor by `n` bytes
pub fn advance_header(ctx: &mut Context<'_>, n: u16) {
    ctx.advance(n);
}

/// Record the current cursor as header `id`
pub fn bind_header(ctx: &mut Context<'_>, id: u32) {
    ctx.bind_header(id);
}

/// Bind field `id` at `rel_offset` from the current cursor and return the
/// bound bytes
pub fn bind_field<'c>(
    ctx: &'c mut Context<'_>,
    id: u32,
    rel_offset: u16,
    length: u16,
) -> Result<&'c mut [u8]> {
    let absolute = ctx.offset().saturating_add(rel_offset);
    ctx.bind_field(id, absolute, length)
}

/// Run one instruction against the context.
///
/// `Goto` is returned as the target table id rather than executed: the
/// caller chooses which bound fields feed the next gather.
pub fn execute(ctx: &mut Context<'_>, instruction: &Instruction) -> Result<Option<u32>> {
    match instruction {
        Instruction::Apply(action) => {
            ctx.apply_action(action)?;
            Ok(None)
        }
        Instruction::Write(action) => {
            ctx.write_action(action.clone());
            Ok(None)
        }
        Instruction::Clear => {
            ctx.clear_actions();
            Ok(None)
        }
        Instruction::Goto(target) => Ok(Some(*target)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::action::Field;
    use crate::app::Application;
    use crate::dataplane::DataplaneConfig;
    use crate::port::{PortTable, RecordingPort};
    use crate::table::FlowHandler;
    use std::sync::atomic::{AtomicBool, Ordering};

    const KEY: [u8; 4] = [0xAA, 0xBB, 0xCC, 0xDD];

    /// Binds one key field at offset zero and dispatches into a table.
    struct TableApp {
        table: Arc<Table>,
        field: u32,
        width: u16,
    }

    impl Application for TableApp {
        fn process(&self, ctx: &mut Context<'_>) -> Result<()> {
            bind_header(ctx, 0);
            bind_field(ctx, self.field, 0, self.width)?;
            goto_table(ctx, &self.table, &[self.field])
        }
    }

    fn drop_handler(_table: &Table, ctx: &mut Context<'_>) -> Result<()> {
        drop_packet(ctx)
    }

    /// Dispatches the context onward into a second table.
    struct HopHandler {
        next: Arc<Table>,
        field: u32,
    }

    impl FlowHandler for HopHandler {
        fn run(&self, _table: &Table, ctx: &mut Context<'_>) -> Result<()> {
            goto_table(ctx, &self.next, &[self.field])
        }
    }

    #[test]
    fn s1_drop_by_miss() {
        let ports = PortTable::new();
        let dp = Dataplane::new("s1", DataplaneConfig { pool_size: 8 }, ports);
        let t0 = dp.create_table(0, TableKind::Exact, 16, 4).unwrap();
        add_miss(&t0, drop_handler);

        dp.load_app(Arc::new(TableApp {
            table: t0.clone(),
            field: 10,
            width: 4,
        }))
        .unwrap();
        dp.start().unwrap();

        dp.process_packet(&[0x01, 0x02, 0x03, 0x04], 0).unwrap();

        assert_eq!(dp.pool().available(), 8);
        assert_eq!(t0.miss_flow().unwrap().counters().packets(), 1);
        assert_eq!(dp.stats().snapshot().dropped, 1);
        assert_eq!(dp.stats().snapshot().tx_packets, 0);
    }

    #[test]
    fn s2_forward_via_set_field_and_output() {
        let ports = PortTable::new();
        let p3 = RecordingPort::new(3, "veth3");
        ports.add(p3.clone());

        fn rewrite_and_output(_table: &Table, ctx: &mut Context<'_>) -> Result<()> {
            apply(
                ctx,
                &Action::set_field(
                    Field::packet(14, 6),
                    &[0x11, 0x22, 0x33, 0x44, 0x55, 0x66],
                ),
            )?;
            write(ctx, Action::Output(3));
            Ok(())
        }

        let dp = Dataplane::new("s2", DataplaneConfig { pool_size: 8 }, ports);
        let t0 = dp.create_table(0, TableKind::Exact, 16, 4).unwrap();
        add_flow(&t0, &KEY, rewrite_and_output).unwrap();

        dp.load_app(Arc::new(TableApp {
            table: t0.clone(),
            field: 10,
            width: 4,
        }))
        .unwrap();
        dp.start().unwrap();

        let mut frame = vec![0u8; 20];
        frame[..4].copy_from_slice(&KEY);
        dp.process_packet(&frame, 1).unwrap();

        let sent = p3.frames();
        assert_eq!(sent.len(), 1);
        assert_eq!(&sent[0][14..20], &[0x11, 0x22, 0x33, 0x44, 0x55, 0x66]);

        let flow = t0.flow(&Key::new(&KEY).unwrap()).unwrap();
        assert_eq!(flow.counters().packets(), 1);
        assert_eq!(flow.counters().bytes(), 20);
        assert_eq!(dp.pool().available(), 8);
    }

    #[test]
    fn s3_pipeline_hop() {
        let ports = PortTable::new();
        let p5 = RecordingPort::new(5, "veth5");
        ports.add(p5.clone());

        fn output_five(_table: &Table, ctx: &mut Context<'_>) -> Result<()> {
            write(ctx, Action::Output(5));
            Ok(())
        }

        let dp = Dataplane::new("s3", DataplaneConfig { pool_size: 4 }, ports);
        let t0 = dp.create_table(0, TableKind::Exact, 16, 4).unwrap();
        let t1 = dp.create_table(1, TableKind::Exact, 16, 4).unwrap();

        t0.insert(
            Key::new(&KEY).unwrap(),
            Flow::new(Arc::new(HopHandler {
                next: t1.clone(),
                field: 10,
            })),
        )
        .unwrap();
        add_flow(&t1, &KEY, output_five).unwrap();

        dp.load_app(Arc::new(TableApp {
            table: t0.clone(),
            field: 10,
            width: 4,
        }))
        .unwrap();
        dp.start().unwrap();

        let mut frame = vec![0u8; 32];
        frame[..4].copy_from_slice(&KEY);
        dp.process_packet(&frame, 2).unwrap();

        assert_eq!(p5.frame_count(), 1);
        let k = Key::new(&KEY).unwrap();
        assert_eq!(t0.flow(&k).unwrap().counters().packets(), 1);
        assert_eq!(t1.flow(&k).unwrap().counters().packets(), 1);
        assert_eq!(dp.stats().snapshot().tx_packets, 1);
    }

    #[test]
    fn s4_clear_discards_writes_preserves_applies() {
        struct ScriptApp;
        impl Application for ScriptApp {
            fn process(&self, ctx: &mut Context<'_>) -> Result<()> {
                apply(ctx, &Action::set_field(Field::packet(0, 2), &[0x5A, 0x5A]))?;
                write(ctx, Action::set_field(Field::packet(2, 2), &[0x77, 0x77]));
                clear(ctx);
                write(ctx, Action::Output(7));
                Ok(())
            }
        }

        let ports = PortTable::new();
        let p7 = RecordingPort::new(7, "veth7");
        ports.add(p7.clone());

        let dp = Dataplane::new("s4", DataplaneConfig { pool_size: 2 }, ports);
        dp.load_app(Arc::new(ScriptApp)).unwrap();
        dp.start().unwrap();

        dp.process_packet(&[0u8; 8], 0).unwrap();

        let sent = p7.frames();
        assert_eq!(sent.len(), 1);
        assert_eq!(&sent[0][..2], &[0x5A, 0x5A]);
        assert_eq!(&sent[0][2..4], &[0x00, 0x00]);
    }

    #[test]
    fn s6_copy_field_across_address_spaces() {
        struct CopyApp {
            verified: Arc<AtomicBool>,
        }
        impl Application for CopyApp {
            fn process(&self, ctx: &mut Context<'_>) -> Result<()> {
                bind_field(ctx, 1, 20, 4)?;
                apply(
                    ctx,
                    &Action::CopyField {
                        field: Field::packet(20, 4),
                        dst_offset: 0,
                    },
                )?;
                let packet_ok = ctx.frame()[20..24] == [0xDE, 0xAD, 0xBE, 0xEF];
                let meta_ok = ctx.metadata()[..4] == [0xDE, 0xAD, 0xBE, 0xEF];
                self.verified.store(packet_ok && meta_ok, Ordering::Relaxed);
                drop_packet(ctx)
            }
        }

        let dp = Dataplane::new(
            "s6",
            DataplaneConfig { pool_size: 2 },
            PortTable::new(),
        );
        let verified = Arc::new(AtomicBool::new(false));
        dp.load_app(Arc::new(CopyApp {
            verified: verified.clone(),
        }))
        .unwrap();
        dp.start().unwrap();

        let mut frame = vec![0u8; 32];
        frame[20..24].copy_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF]);
        dp.process_packet(&frame, 0).unwrap();

        assert!(verified.load(Ordering::Relaxed));
    }

    #[test]
    fn flood_replicates_to_non_ingress_ports() {
        struct FloodApp;
        impl Application for FloodApp {
            fn process(&self, ctx: &mut Context<'_>) -> Result<()> {
                flood(ctx)
            }
        }

        let ports = PortTable::new();
        let p3 = RecordingPort::new(3, "veth3");
        let p4 = RecordingPort::new(4, "veth4");
        ports.add(p3.clone());
        ports.add(p4.clone());

        let dp = Dataplane::new("flood", DataplaneConfig { pool_size: 2 }, ports);
        dp.load_app(Arc::new(FloodApp)).unwrap();
        dp.start().unwrap();

        dp.process_packet(&[9, 9, 9], 3).unwrap();

        assert_eq!(p3.frame_count(), 0);
        assert_eq!(p4.frame_count(), 1);
        let snap = dp.stats().snapshot();
        assert_eq!(snap.flooded, 1);
        assert_eq!(snap.tx_packets, 1);
    }

    #[test]
    fn egress_on_downed_link_is_counted_drop() {
        struct OutApp;
        impl Application for OutApp {
            fn process(&self, ctx: &mut Context<'_>) -> Result<()> {
                let port = get_port(ctx.dataplane(), "veth6")?;
                output_port(ctx, port.as_ref())
            }
        }

        let ports = PortTable::new();
        let p6 = RecordingPort::new(6, "veth6");
        p6.state().set_link_down(true);
        ports.add(p6.clone());

        let dp = Dataplane::new("down", DataplaneConfig { pool_size: 2 }, ports);
        dp.load_app(Arc::new(OutApp)).unwrap();
        dp.start().unwrap();

        dp.process_packet(&[1, 2, 3, 4], 0).unwrap();

        assert_eq!(p6.frame_count(), 0);
        let snap = dp.stats().snapshot();
        assert_eq!(snap.link_down_drops, 1);
        assert_eq!(snap.dropped, 1);
        assert_eq!(snap.tx_packets, 0);
    }

    #[test]
    fn gather_width_mismatch_is_fatal_for_the_packet() {
        let dp = Dataplane::new(
            "width",
            DataplaneConfig { pool_size: 2 },
            PortTable::new(),
        );
        let t0 = dp.create_table(0, TableKind::Exact, 16, 8).unwrap();

        dp.load_app(Arc::new(TableApp {
            table: t0,
            field: 10,
            width: 4,
        }))
        .unwrap();
        dp.start().unwrap();

        let err = dp.process_packet(&[0u8; 16], 0).unwrap_err();
        assert!(matches!(
            err,
            Error::KeyWidthMismatch {
                expected: 8,
                found: 4
            }
        ));
        assert_eq!(dp.stats().snapshot().app_errors, 1);
        assert_eq!(dp.pool().available(), 2);
    }

    #[test]
    fn gather_requires_bound_fields() {
        struct NoBindApp {
            table: Arc<Table>,
        }
        impl Application for NoBindApp {
            fn process(&self, ctx: &mut Context<'_>) -> Result<()> {
                goto_table(ctx, &self.table, &[10])
            }
        }

        let dp = Dataplane::new(
            "unbound",
            DataplaneConfig { pool_size: 2 },
            PortTable::new(),
        );
        let t0 = dp.create_table(0, TableKind::Exact, 16, 4).unwrap();
        dp.load_app(Arc::new(NoBindApp { table: t0 })).unwrap();
        dp.start().unwrap();

        let err = dp.process_packet(&[0u8; 8], 0).unwrap_err();
        assert!(matches!(err, Error::UnboundField(10)));
        assert_eq!(dp.pool().available(), 2);
    }

    #[test]
    fn counters_count_each_dispatch_once() {
        let ports = PortTable::new();
        let dp = Dataplane::new("mono", DataplaneConfig { pool_size: 4 }, ports);
        let t0 = dp.create_table(0, TableKind::Exact, 16, 4).unwrap();
        add_flow(&t0, &KEY, drop_handler).unwrap();

        dp.load_app(Arc::new(TableApp {
            table: t0.clone(),
            field: 10,
            width: 4,
        }))
        .unwrap();
        dp.start().unwrap();

        let mut frame = vec![0u8; 10];
        frame[..4].copy_from_slice(&KEY);
        for _ in 0..50 {
            dp.process_packet(&frame, 0).unwrap();
        }

        let flow = t0.flow(&Key::new(&KEY).unwrap()).unwrap();
        assert_eq!(flow.counters().packets(), 50);
        assert_eq!(flow.counters().bytes(), 500);
    }

    #[test]
    fn flow_removal_falls_back_to_miss() {
        let dp = Dataplane::new(
            "del",
            DataplaneConfig { pool_size: 2 },
            PortTable::new(),
        );
        let t0 = dp.create_table(0, TableKind::Exact, 16, 4).unwrap();
        add_flow(&t0, &KEY, drop_handler).unwrap();
        t0.insert_miss(Flow::from_fn(drop_handler).with_cookie(42));
        assert_eq!(t0.len(), 1);

        del_flow(&t0, &KEY).unwrap();
        assert!(t0.is_empty());
        // Removing again stays a no-op.
        del_flow(&t0, &KEY).unwrap();

        let found = t0.find(&Key::new(&KEY).unwrap());
        assert_eq!(found.cookie(), 42);
    }

    #[test]
    fn create_table_checks_type_codes() {
        let dp = Dataplane::new(
            "codes",
            DataplaneConfig { pool_size: 1 },
            PortTable::new(),
        );
        let t = create_table(&dp, 0, 16, 4, 0).unwrap();
        assert_eq!(t.kind(), TableKind::Exact);
        assert!(matches!(
            create_table(&dp, 1, 16, 4, 9),
            Err(Error::UnknownTableType(9))
        ));
    }

    #[test]
    fn get_port_by_name() {
        let ports = PortTable::new();
        ports.add(RecordingPort::new(2, "wan0"));
        let dp = Dataplane::new("ports", DataplaneConfig { pool_size: 1 }, ports);

        assert_eq!(get_port(&dp, "wan0").unwrap().id(), 2);
        assert!(matches!(
            get_port(&dp, "lan0"),
            Err(Error::UnknownPort(_))
        ));
    }

    #[test]
    fn gather_concatenates_fields_in_argument_order() {
        let dp = Dataplane::new(
            "gather",
            DataplaneConfig { pool_size: 1 },
            PortTable::new(),
        );
        let buf = dp.pool().alloc().unwrap();
        buf.fill(&[0x11, 0x22, 0x33, 0x44, 0, 0, 0, 0]);
        let mut ctx = Context::new(buf, &dp, 0);

        ctx.bind_field(1, 2, 2).unwrap();
        ctx.bind_field(2, 0, 2).unwrap();

        let key = gather(&ctx, 4, &[1, 2]).unwrap();
        assert_eq!(key.width(), 4);
        assert_eq!(key.bytes(), &[0x33, 0x44, 0x11, 0x22]);
    }

    #[test]
    fn gather_reads_metadata_bindings() {
        let dp = Dataplane::new(
            "meta-key",
            DataplaneConfig { pool_size: 1 },
            PortTable::new(),
        );
        let buf = dp.pool().alloc().unwrap();
        buf.fill(&[0xFE, 0xED, 0, 0]);
        let mut ctx = Context::new(buf, &dp, 0);

        // Stage packet bytes into metadata, then key on them from there.
        apply(
            &mut ctx,
            &Action::CopyField {
                field: Field::packet(0, 2),
                dst_offset: 4,
            },
        )
        .unwrap();
        ctx.bind_metadata_field(3, 4, 2).unwrap();

        let key = gather(&ctx, 2, &[3]).unwrap();
        assert_eq!(key.bytes(), &[0xFE, 0xED]);
    }

    #[test]
    fn header_cursor_feeds_relative_binds() {
        let dp = Dataplane::new(
            "cursor",
            DataplaneConfig { pool_size: 1 },
            PortTable::new(),
        );
        let buf = dp.pool().alloc().unwrap();
        buf.fill(&[0u8; 64]);
        let mut ctx = Context::new(buf, &dp, 0);

        advance_header(&mut ctx, 14);
        bind_header(&mut ctx, 1);
        assert_eq!(ctx.header_binding(1), Some(14));

        // Relative offset 2 from the cursor lands at absolute 16.
        bind_field(&mut ctx, 5, 2, 4).unwrap();
        let binding = ctx.field_binding(5).unwrap();
        assert_eq!((binding.offset, binding.length), (16, 4));
    }

    #[test]
    fn execute_returns_goto_targets() {
        let dp = Dataplane::new(
            "exec",
            DataplaneConfig { pool_size: 1 },
            PortTable::new(),
        );
        dp.create_table(2, TableKind::Exact, 16, 4).unwrap();
        let buf = dp.pool().alloc().unwrap();
        buf.fill(&[0u8; 8]);
        let mut ctx = Context::new(buf, &dp, 0);

        let program = [
            Instruction::Apply(Action::set_field(Field::packet(0, 1), &[0xEE])),
            Instruction::Write(Action::Queue(3)),
            Instruction::Clear,
            Instruction::Goto(2),
        ];

        let mut target = None;
        for ins in &program {
            target = execute(&mut ctx, ins).unwrap();
        }

        assert_eq!(target, Some(2));
        assert!(dp.table(2).is_ok());
        assert_eq!(ctx.frame()[0], 0xEE);
        assert!(ctx.actions().is_empty());
    }
}
