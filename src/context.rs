//! Per-packet processing context
//!
//! A [`Context`] is the working state a loaded application sees for one
//! packet: the raw frame, the header cursor, header and field bindings, the
//! deferred action list, and the routing decisions taken so far. It borrows
//! its byte regions from the pool buffer and carries a non-owning reference
//! to the dataplane for table and port resolution, all for the duration of a
//! single `process` call.
//!
//! Written actions execute strictly after all earlier immediate applies, in
//! the order written, when [`Context::commit`] runs at egress. `clear_actions`
//! discards only the written list, never already-applied mutations.

use std::collections::HashMap;
use std::mem;

use tracing::trace;

use crate::action::{Action, AddressSpace};
use crate::dataplane::Dataplane;
use crate::buffer::Buffer;
use crate::error::{Error, Result};

/// A recorded field binding: an absolute byte range in one address space
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Binding {
    /// Which memory the field lives in
    pub space: AddressSpace,
    /// Absolute byte offset within the space
    pub offset: u16,
    /// Field length in bytes
    pub length: u16,
}

/// Per-packet state threaded through the pipeline
pub struct Context<'a> {
    packet: &'a mut [u8],
    metadata: &'a mut [u8],
    dataplane: &'a Dataplane,
    buffer_id: u32,
    len: u16,
    offset: u16,
    input_port: u32,
    output_port: Option<u32>,
    queue: u32,
    group: u32,
    dropped: bool,
    sent: bool,
    headers: HashMap<u32, u16>,
    fields: HashMap<u32, Binding>,
    actions: Vec<Action>,
}

impl<'a> Context<'a> {
    /// Build a context over a freshly filled buffer
    pub fn new(buffer: &'a mut Buffer, dataplane: &'a Dataplane, input_port: u32) -> Self {
        let buffer_id = buffer.id();
        let len = buffer.len();
        let (packet, metadata) = buffer.split_mut();
        Self {
            packet,
            metadata,
            dataplane,
            buffer_id,
            len,
            offset: 0,
            input_port,
            output_port: None,
            queue: 0,
            group: 0,
            dropped: false,
            sent: false,
            headers: HashMap::new(),
            fields: HashMap::new(),
            actions: Vec::new(),
        }
    }

    /// The owning dataplane
    #[inline(always)]
    pub fn dataplane(&self) -> &'a Dataplane {
        self.dataplane
    }

    /// Pool index of the underlying buffer
    #[inline(always)]
    pub fn buffer_id(&self) -> u32 {
        self.buffer_id
    }

    /// The raw frame as received
    #[inline(always)]
    pub fn frame(&self) -> &[u8] {
        &self.packet[..self.len as usize]
    }

    /// The metadata region
    #[inline(always)]
    pub fn metadata(&self) -> &[u8] {
        &*self.metadata
    }

    /// Current header cursor
    #[inline(always)]
    pub fn offset(&self) -> u16 {
        self.offset
    }

    /// Ingress port id
    #[inline(always)]
    pub fn input_port(&self) -> u32 {
        self.input_port
    }

    /// Egress port chosen so far, if any
    #[inline(always)]
    pub fn output_port(&self) -> Option<u32> {
        self.output_port
    }

    /// Egress queue id
    #[inline(always)]
    pub fn queue(&self) -> u32 {
        self.queue
    }

    /// Group id
    #[inline(always)]
    pub fn group(&self) -> u32 {
        self.group
    }

    /// True once the packet has been discarded
    #[inline(always)]
    pub fn is_dropped(&self) -> bool {
        self.dropped
    }

    /// True once the packet has been transmitted
    #[inline(always)]
    pub fn is_sent(&self) -> bool {
        self.sent
    }

    /// Mark the packet discarded; later egress becomes a no-op
    pub fn mark_dropped(&mut self) {
        self.dropped = true;
    }

    /// Mark the packet transmitted
    pub fn mark_sent(&mut self) {
        self.sent = true;
    }

    /// Record the egress port
    pub fn set_output_port(&mut self, port: u32) {
        self.output_port = Some(port);
    }

    /// Advance the header cursor by `n` bytes.
    ///
    /// The cursor itself is not bounds-checked; a later bind against it is.
    pub fn advance(&mut self, n: u16) {
        self.offset = self.offset.saturating_add(n);
    }

    /// Record the current cursor as the offset of header `id`
    pub fn bind_header(&mut self, id: u32) {
        self.headers.insert(id, self.offset);
    }

    /// Absolute offset recorded for header `id`
    pub fn header_binding(&self, id: u32) -> Option<u16> {
        self.headers.get(&id).copied()
    }

    /// Bind field `id` to `length` bytes of packet memory at the absolute
    /// `offset`, returning the bound range
    pub fn bind_field(&mut self, id: u32, offset: u16, length: u16) -> Result<&mut [u8]> {
        let (start, end) = span(self.packet.len(), AddressSpace::Packet, offset, length)?;
        self.fields.insert(
            id,
            Binding {
                space: AddressSpace::Packet,
                offset,
                length,
            },
        );
        Ok(&mut self.packet[start..end])
    }

    /// Bind field `id` to `length` bytes of metadata memory at `offset`.
    ///
    /// Lets a flow key on values staged into metadata with `CopyField`.
    pub fn bind_metadata_field(&mut self, id: u32, offset: u16, length: u16) -> Result<&mut [u8]> {
        let (start, end) = span(self.metadata.len(), AddressSpace::Metadata, offset, length)?;
        self.fields.insert(
            id,
            Binding {
                space: AddressSpace::Metadata,
                offset,
                length,
            },
        );
        Ok(&mut self.metadata[start..end])
    }

    /// The binding recorded for field `id`
    pub fn field_binding(&self, id: u32) -> Result<Binding> {
        self.fields
            .get(&id)
            .copied()
            .ok_or(Error::UnboundField(id))
    }

    /// View into packet memory from `offset` to the end of the region
    pub fn field(&mut self, offset: u16) -> Result<&mut [u8]> {
        let start = offset as usize;
        if start > self.packet.len() {
            return Err(Error::OutOfBounds {
                space: AddressSpace::Packet,
                offset,
                length: 0,
            });
        }
        Ok(&mut self.packet[start..])
    }

    /// Bytes covered by a binding
    pub(crate) fn read_binding(&self, binding: &Binding) -> Result<&[u8]> {
        let region: &[u8] = match binding.space {
            AddressSpace::Packet => &*self.packet,
            AddressSpace::Metadata => &*self.metadata,
        };
        let (start, end) = span(region.len(), binding.space, binding.offset, binding.length)?;
        Ok(&region[start..end])
    }

    fn range_mut(&mut self, space: AddressSpace, offset: u16, length: u16) -> Result<&mut [u8]> {
        let region: &mut [u8] = match space {
            AddressSpace::Packet => &mut *self.packet,
            AddressSpace::Metadata => &mut *self.metadata,
        };
        let (start, end) = span(region.len(), space, offset, length)?;
        Ok(&mut region[start..end])
    }

    /// Execute an action immediately against this context
    pub fn apply_action(&mut self, action: &Action) -> Result<()> {
        match action {
            Action::GetField(field) => {
                let region_len = match field.space {
                    AddressSpace::Packet => self.packet.len(),
                    AddressSpace::Metadata => self.metadata.len(),
                };
                span(region_len, field.space, field.offset, field.length)?;
                Ok(())
            }
            Action::SetField { field, value } => {
                if value.len() != field.length as usize {
                    return Err(Error::FieldValueMismatch {
                        expected: field.length,
                        found: value.len(),
                    });
                }
                let dst = self.range_mut(field.space, field.offset, field.length)?;
                dst.copy_from_slice(value);
                Ok(())
            }
            Action::CopyField { field, dst_offset } => {
                let (src_start, src_end) = match field.space {
                    AddressSpace::Packet => {
                        span(self.packet.len(), field.space, field.offset, field.length)?
                    }
                    AddressSpace::Metadata => {
                        span(self.metadata.len(), field.space, field.offset, field.length)?
                    }
                };
                let dst_space = field.space.other();
                let dst_len = match dst_space {
                    AddressSpace::Packet => self.packet.len(),
                    AddressSpace::Metadata => self.metadata.len(),
                };
                let (dst_start, dst_end) = span(dst_len, dst_space, *dst_offset, field.length)?;
                match field.space {
                    AddressSpace::Packet => {
                        self.metadata[dst_start..dst_end]
                            .copy_from_slice(&self.packet[src_start..src_end]);
                    }
                    AddressSpace::Metadata => {
                        self.packet[dst_start..dst_end]
                            .copy_from_slice(&self.metadata[src_start..src_end]);
                    }
                }
                Ok(())
            }
            Action::Output(port) => {
                self.output_port = Some(*port);
                Ok(())
            }
            Action::Queue(queue) => {
                self.queue = *queue;
                Ok(())
            }
            Action::Group(group) => {
                self.group = *group;
                Ok(())
            }
            Action::Drop => {
                trace!(buffer = self.buffer_id, "context dropped");
                self.dropped = true;
                Ok(())
            }
        }
    }

    /// Append an action to the deferred list
    pub fn write_action(&mut self, action: Action) {
        self.actions.push(action);
    }

    /// Empty the deferred list
    pub fn clear_actions(&mut self) {
        self.actions.clear();
    }

    /// The deferred actions in write order
    pub fn actions(&self) -> &[Action] {
        &self.actions
    }

    /// Apply the deferred list in FIFO order, leaving it empty.
    ///
    /// Runs implicitly at egress; calling it twice is harmless.
    pub fn commit(&mut self) -> Result<()> {
        let actions = mem::take(&mut self.actions);
        for action in &actions {
            self.apply_action(action)?;
        }
        Ok(())
    }
}

fn span(region_len: usize, space: AddressSpace, offset: u16, length: u16) -> Result<(usize, usize)> {
    let start = offset as usize;
    let end = start + length as usize;
    if end > region_len {
        return Err(Error::OutOfBounds {
            space,
            offset,
            length,
        });
    }
    Ok((start, end))
}
