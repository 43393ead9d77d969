//! Packet lifecycle framework
//!
//! Every codec in this crate is a node of an encapsulation tree and
//! implements [`Packet`]. A node keeps its typed fields plus a
//! [`PacketState`]: the raw cache (the exact bytes serialization currently
//! produces) and a [`ChecksumState`].
//!
//! The cache is filled by parsing (the input window is kept verbatim) or by
//! the first serialization, and is either dropped or patched in place by
//! setters:
//!
//! - setters for fields at a fixed offset patch the cache and mark the
//!   checksum [`ChecksumState::Skipped`]; the next serialization without
//!   [`BuildFlags::CHECKSUM_UNNECESSARY`] recomputes it in place.
//! - every other setter calls [`Packet::invalidate`].
//!
//! Children are owned by their parent. A parent drops its own cache before
//! handing out `&mut` access to a child, so it can never embed stale child
//! bytes. Layers whose checksum depends on the enclosing layer receive that
//! layer's addresses as explicit arguments instead of holding a back
//! reference.

use tracing::trace;
use vproxy_core::{ByteArray, Error, Result};

/// Whether a node's checksum field is meaningful
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChecksumState {
    /// Never computed
    #[default]
    Unset,
    /// Declared unnecessary or stale after an in-place patch
    Skipped,
    /// Computed over the current bytes
    Calculated,
}

impl ChecksumState {
    /// Combine the state of a node with the state of its child
    ///
    /// A skipped checksum anywhere in a subtree makes the subtree skipped.
    pub fn merge(self, other: ChecksumState) -> ChecksumState {
        use ChecksumState::*;
        match (self, other) {
            (Skipped, _) | (_, Skipped) => Skipped,
            (Calculated, _) | (_, Calculated) => Calculated,
            _ => Unset,
        }
    }
}

/// How much of a TCP segment a parse decodes up front
///
/// Containers parsed with `parse_partial` hand [`ParseLevel::KeyFields`]
/// down to their TCP payload and decode every other layer in full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ParseLevel {
    /// Ports and flags only; the rest waits for `init_remaining`
    KeyFields,
    #[default]
    Full,
}

/// Options for [`Packet::serialize`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct BuildFlags(u32);

impl BuildFlags {
    /// No flags set
    pub const NONE: BuildFlags = BuildFlags(0);

    /// Checksums are computed elsewhere (e.g. hardware offload)
    pub const CHECKSUM_UNNECESSARY: BuildFlags = BuildFlags(0b0000_0001);

    pub fn bits(self) -> u32 {
        self.0
    }

    pub fn contains(self, other: BuildFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn checksum_unnecessary(self) -> bool {
        self.contains(BuildFlags::CHECKSUM_UNNECESSARY)
    }
}

impl std::ops::BitOr for BuildFlags {
    type Output = BuildFlags;

    fn bitor(self, rhs: BuildFlags) -> BuildFlags {
        BuildFlags(self.0 | rhs.0)
    }
}

/// A window of bytes plus its position inside the enclosing message
///
/// Nested layers only own their window, but some of them (DNS names) must
/// resolve absolute offsets into the whole message.
#[derive(Debug, Clone)]
pub struct PacketBuffer {
    full: ByteArray,
    offset: usize,
    pkt: ByteArray,
}

impl PacketBuffer {
    /// A buffer whose window is the whole message
    pub fn new(bytes: ByteArray) -> Self {
        PacketBuffer {
            full: bytes.clone(),
            offset: 0,
            pkt: bytes,
        }
    }

    /// Bytes of this window
    pub fn bytes(&self) -> &ByteArray {
        &self.pkt
    }

    /// The whole enclosing message
    pub fn full(&self) -> &ByteArray {
        &self.full
    }

    /// Absolute offset of this window inside [`PacketBuffer::full`]
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub fn len(&self) -> usize {
        self.pkt.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pkt.is_empty()
    }

    /// Window from `offset` to the end of this window
    pub fn sub(&self, offset: usize) -> Result<PacketBuffer> {
        Ok(PacketBuffer {
            full: self.full.clone(),
            offset: self.offset + offset,
            pkt: self.pkt.sub_from(offset)?,
        })
    }

    /// Window of `len` bytes starting at `offset` of this window
    pub fn sub_len(&self, offset: usize, len: usize) -> Result<PacketBuffer> {
        Ok(PacketBuffer {
            full: self.full.clone(),
            offset: self.offset + offset,
            pkt: self.pkt.sub(offset, len)?,
        })
    }

    pub fn into_bytes(self) -> ByteArray {
        self.pkt
    }
}

impl From<ByteArray> for PacketBuffer {
    fn from(bytes: ByteArray) -> Self {
        PacketBuffer::new(bytes)
    }
}

impl From<Vec<u8>> for PacketBuffer {
    fn from(bytes: Vec<u8>) -> Self {
        PacketBuffer::new(bytes.into())
    }
}

impl From<&[u8]> for PacketBuffer {
    fn from(bytes: &[u8]) -> Self {
        PacketBuffer::new(bytes.into())
    }
}

/// Raw cache and checksum state of one node
#[derive(Debug, Clone, Default)]
pub struct PacketState {
    raw: Option<ByteArray>,
    checksum: ChecksumState,
}

impl PacketState {
    pub fn raw(&self) -> Option<&ByteArray> {
        self.raw.as_ref()
    }

    /// Mutable access to the cache for checksum rewrites
    ///
    /// Callers must leave the cache consistent with the fields.
    pub fn raw_mut(&mut self) -> Option<&mut ByteArray> {
        self.raw.as_mut()
    }

    pub fn checksum(&self) -> ChecksumState {
        self.checksum
    }

    pub fn set_checksum(&mut self, checksum: ChecksumState) {
        self.checksum = checksum;
    }

    pub fn set_raw(&mut self, mut raw: ByteArray) {
        raw.freeze();
        self.raw = Some(raw);
    }

    /// Drop the cache
    pub fn clear(&mut self) {
        self.raw = None;
    }

    /// Cheap handle to the cached bytes
    pub fn snapshot(&mut self) -> Option<ByteArray> {
        let raw = self.raw.as_mut()?;
        raw.freeze();
        Some(raw.clone())
    }

    /// Whether the cached checksum must be recomputed before the bytes leave
    pub fn is_stale(&self, flags: BuildFlags) -> bool {
        self.checksum == ChecksumState::Skipped && !flags.checksum_unnecessary()
    }

    /// Patch the cached bytes at a fixed offset
    ///
    /// Does nothing when there is no cache. A successful patch leaves the
    /// checksum stale; a failed one drops the cache.
    pub fn patch<F>(&mut self, f: F)
    where
        F: FnOnce(&mut ByteArray) -> Result<()>,
    {
        if let Some(raw) = self.raw.as_mut() {
            match f(raw) {
                Ok(()) => self.checksum = ChecksumState::Skipped,
                Err(_) => self.raw = None,
            }
        }
    }

    /// Record that a field covered by the checksum changed outside this node
    pub fn mark_checksum_stale(&mut self) {
        if self.raw.is_some() {
            self.checksum = ChecksumState::Skipped;
        }
    }
}

/// Capability interface shared by every packet codec
pub trait Packet {
    fn state(&self) -> &PacketState;

    fn state_mut(&mut self) -> &mut PacketState;

    /// Populate the typed fields from `buf`
    ///
    /// On success the window is stored verbatim as the raw cache. The error
    /// message names the field that could not be read.
    fn from_buffer(&mut self, buf: PacketBuffer) -> Result<()>;

    /// Produce the wire image from the typed fields
    ///
    /// Implementations serialize their children first and record the
    /// resulting [`ChecksumState`].
    fn build(&mut self, flags: BuildFlags) -> Result<ByteArray>;

    /// Recompute this node's checksum and its children's
    fn update_checksum(&mut self) -> Result<()>;

    /// Deep copy of the fields and nested packets, without caches
    fn copy(&self) -> Self
    where
        Self: Sized;

    /// Short diagnostic string, not wire compatible
    fn description(&self) -> String;

    /// Parse a new packet; nothing is returned on failure
    fn parse<B>(buf: B) -> Result<Self>
    where
        Self: Sized + Default,
        B: Into<PacketBuffer>,
    {
        let mut packet = Self::default();
        packet.from_buffer(buf.into())?;
        Ok(packet)
    }

    /// Wire image of the current fields
    ///
    /// Returns the cache when it is valid. A cache with a stale checksum is
    /// fixed in place first, unless `flags` declares checksums unnecessary.
    fn serialize(&mut self, flags: BuildFlags) -> Result<ByteArray> {
        if self.state().raw().is_some() && self.state().is_stale(flags) {
            trace!(packet = %self.description(), "recomputing stale checksum");
            self.update_checksum()?;
        }
        if self.state().raw().is_some() && !self.state().is_stale(flags) {
            if let Some(raw) = self.state_mut().snapshot() {
                return Ok(raw);
            }
        }
        let mut raw = self.build(flags)?;
        raw.freeze();
        self.state_mut().set_raw(raw.clone());
        Ok(raw)
    }

    /// Drop the raw cache
    fn invalidate(&mut self) {
        self.state_mut().clear();
    }

    fn raw(&self) -> Option<&ByteArray> {
        self.state().raw()
    }

    fn checksum_state(&self) -> ChecksumState {
        self.state().checksum()
    }
}

/// Error for checksum entry points that need the enclosing IP layer
pub(crate) fn requires_ip_layer(protocol: &str) -> Error {
    Error::not_implemented(format!(
        "{} checksum depends on the enclosing ip layer, use the ipv4/ipv6 entry points",
        protocol
    ))
}
