//! Fixed-size index entries.
//!
//! Every entry starts with an [`ExternalDataAddress`] pointing into a packet
//! file. An entry whose address is absent is a delete marker. The
//! [`Entry`] trait carries the binary layout and the matching rules the
//! buckets, the reader and the traversers rely on.

use std::fmt::Debug;

use bytes::{Buf, BufMut};

use crate::codec::{ensure_remaining, get_u16, get_u32, get_u8};
use crate::errors::{GeIndexError, GeIndexResult};

/// Location of a payload inside a packet file. A zero `size` means absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct ExternalDataAddress {
    pub offset: u64,
    pub file_num: u32,
    /// Record size including its trailing CRC.
    pub size: u32,
}

impl ExternalDataAddress {
    pub const PUSHED_SIZE: usize = 16;

    pub fn new(offset: u64, file_num: u32, size: u32) -> Self {
        Self {
            offset,
            file_num,
            size,
        }
    }

    pub fn absent() -> Self {
        Self::default()
    }

    pub fn is_absent(&self) -> bool {
        self.size == 0
    }

    pub fn push(&self, buf: &mut impl BufMut) {
        buf.put_u64_le(self.offset);
        buf.put_u32_le(self.file_num);
        buf.put_u32_le(self.size);
    }

    pub fn pull(buf: &mut impl Buf) -> GeIndexResult<Self> {
        ensure_remaining(&*buf, Self::PUSHED_SIZE, "external data address")?;
        Ok(Self {
            offset: buf.get_u64_le(),
            file_num: buf.get_u32_le(),
            size: buf.get_u32_le(),
        })
    }
}

/// Packet content kind carried by typed entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum TypedEntryType {
    Imagery = 0,
    Terrain = 1,
    VectorGE = 2,
    VectorMaps = 3,
    VectorMapsRaster = 4,
    QTPNode = 5,
    DbRoot = 6,
}

impl TryFrom<u8> for TypedEntryType {
    type Error = GeIndexError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(TypedEntryType::Imagery),
            1 => Ok(TypedEntryType::Terrain),
            2 => Ok(TypedEntryType::VectorGE),
            3 => Ok(TypedEntryType::VectorMaps),
            4 => Ok(TypedEntryType::VectorMapsRaster),
            5 => Ok(TypedEntryType::QTPNode),
            6 => Ok(TypedEntryType::DbRoot),
            other => Err(GeIndexError::corruption(format!(
                "unknown typed entry type {}",
                other
            ))),
        }
    }
}

/// Binary layout and matching rules of one entry kind.
pub trait Entry: Clone + Debug + PartialEq + Send + Sync + 'static {
    /// Lookup key accepted by [`read_matches`](Entry::read_matches).
    type ReadKey: Clone + Debug + Send + Sync;

    /// Serialized size in bytes.
    const PUSHED_SIZE: usize;

    /// True when a slot keeps only the entry picked by
    /// [`select_winner`](Entry::select_winner) in traversals.
    const SINGLE_WINNER: bool = false;

    fn data_address(&self) -> &ExternalDataAddress;

    fn data_address_mut(&mut self) -> &mut ExternalDataAddress;

    fn push(&self, buf: &mut impl BufMut);

    fn pull(buf: &mut impl Buf) -> GeIndexResult<Self>;

    fn read_matches(&self, key: &Self::ReadKey) -> bool;

    /// True when `other` replaces `self` in a multi-entry slot.
    fn write_matches(&self, other: &Self) -> bool;

    /// Picks the entry to report among `candidates` (stored order).
    /// `extras` holds the per-packet-file extra values of the index.
    fn select_winner<'a>(candidates: &[&'a Self], _extras: &[u32]) -> Option<&'a Self> {
        candidates.first().copied()
    }

    fn is_delete(&self) -> bool {
        self.data_address().is_absent()
    }

    /// Copy of this entry with its data address cleared.
    fn to_delete(&self) -> Self {
        let mut entry = self.clone();
        *entry.data_address_mut() = ExternalDataAddress::absent();
        entry
    }
}

/// Key for entries identified by an optional version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct VersionKey {
    /// `None` matches any version.
    pub version: Option<u16>,
}

impl VersionKey {
    pub fn any() -> Self {
        Self { version: None }
    }

    pub fn exact(version: u16) -> Self {
        Self {
            version: Some(version),
        }
    }

    fn matches(&self, version: u16) -> bool {
        self.version.map_or(true, |v| v == version)
    }
}

/// Key for channelled entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelKey {
    pub channel: u32,
    pub version: Option<u16>,
}

/// Key for typed and all-info entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypedKey {
    pub version: u32,
    pub channel: u32,
    pub entry_type: TypedEntryType,
    pub version_matters: bool,
}

impl TypedKey {
    /// Matches the newest entry of `entry_type` on `channel` regardless of
    /// its version.
    pub fn any_version(entry_type: TypedEntryType, channel: u32) -> Self {
        Self {
            version: 0,
            channel,
            entry_type,
            version_matters: false,
        }
    }

    pub fn exact(entry_type: TypedEntryType, channel: u32, version: u32) -> Self {
        Self {
            version,
            channel,
            entry_type,
            version_matters: true,
        }
    }

    fn matches(&self, entry_type: TypedEntryType, channel: u32, version: u32) -> bool {
        self.entry_type == entry_type
            && self.channel == channel
            && (!self.version_matters || self.version == version)
    }
}

/// Imagery/terrain entry of a combined terrain mesh index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SimpleInsetEntry {
    pub data_address: ExternalDataAddress,
    pub version: u16,
    pub inset_id: u16,
}

impl SimpleInsetEntry {
    pub fn new(data_address: ExternalDataAddress, version: u16, inset_id: u16) -> Self {
        Self {
            data_address,
            version,
            inset_id,
        }
    }
}

impl Entry for SimpleInsetEntry {
    type ReadKey = VersionKey;
    const PUSHED_SIZE: usize = ExternalDataAddress::PUSHED_SIZE + 4;

    fn data_address(&self) -> &ExternalDataAddress {
        &self.data_address
    }

    fn data_address_mut(&mut self) -> &mut ExternalDataAddress {
        &mut self.data_address
    }

    fn push(&self, buf: &mut impl BufMut) {
        self.data_address.push(buf);
        buf.put_u16_le(self.version);
        buf.put_u16_le(self.inset_id);
    }

    fn pull(buf: &mut impl Buf) -> GeIndexResult<Self> {
        Ok(Self {
            data_address: ExternalDataAddress::pull(buf)?,
            version: get_u16(buf, "simple inset version")?,
            inset_id: get_u16(buf, "simple inset id")?,
        })
    }

    fn read_matches(&self, key: &VersionKey) -> bool {
        key.matches(self.version)
    }

    fn write_matches(&self, _other: &Self) -> bool {
        true
    }
}

/// Entry of a blend index: one per contributing packet file, ranked by the
/// packet file's extra value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlendEntry {
    pub data_address: ExternalDataAddress,
    pub version: u16,
    pub inset_id: u16,
}

impl BlendEntry {
    pub fn new(data_address: ExternalDataAddress, version: u16, inset_id: u16) -> Self {
        Self {
            data_address,
            version,
            inset_id,
        }
    }
}

impl Entry for BlendEntry {
    type ReadKey = VersionKey;
    const PUSHED_SIZE: usize = ExternalDataAddress::PUSHED_SIZE + 4;
    const SINGLE_WINNER: bool = true;

    fn data_address(&self) -> &ExternalDataAddress {
        &self.data_address
    }

    fn data_address_mut(&mut self) -> &mut ExternalDataAddress {
        &mut self.data_address
    }

    fn push(&self, buf: &mut impl BufMut) {
        self.data_address.push(buf);
        buf.put_u16_le(self.version);
        buf.put_u16_le(self.inset_id);
    }

    fn pull(buf: &mut impl Buf) -> GeIndexResult<Self> {
        Ok(Self {
            data_address: ExternalDataAddress::pull(buf)?,
            version: get_u16(buf, "blend version")?,
            inset_id: get_u16(buf, "blend inset id")?,
        })
    }

    fn read_matches(&self, key: &VersionKey) -> bool {
        key.matches(self.version)
    }

    fn write_matches(&self, other: &Self) -> bool {
        self.data_address.file_num == other.data_address.file_num
    }

    /// The entry from the packet file with the highest extra value wins;
    /// on equal extras the earlier stored entry is kept.
    fn select_winner<'a>(candidates: &[&'a Self], extras: &[u32]) -> Option<&'a Self> {
        let extra_of = |e: &Self| extras.get(e.data_address.file_num as usize).copied().unwrap_or(0);
        candidates.iter().copied().fold(None, |best: Option<&'a Self>, e| match best {
            Some(b) if extra_of(b) >= extra_of(e) => Some(b),
            _ => Some(e),
        })
    }
}

/// Entry of a vector index, one per channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelledEntry {
    pub data_address: ExternalDataAddress,
    pub version: u16,
    pub channel: u32,
}

impl ChannelledEntry {
    pub fn new(data_address: ExternalDataAddress, version: u16, channel: u32) -> Self {
        Self {
            data_address,
            version,
            channel,
        }
    }
}

impl Entry for ChannelledEntry {
    type ReadKey = ChannelKey;
    const PUSHED_SIZE: usize = ExternalDataAddress::PUSHED_SIZE + 6;

    fn data_address(&self) -> &ExternalDataAddress {
        &self.data_address
    }

    fn data_address_mut(&mut self) -> &mut ExternalDataAddress {
        &mut self.data_address
    }

    fn push(&self, buf: &mut impl BufMut) {
        self.data_address.push(buf);
        buf.put_u16_le(self.version);
        buf.put_u32_le(self.channel);
    }

    fn pull(buf: &mut impl Buf) -> GeIndexResult<Self> {
        Ok(Self {
            data_address: ExternalDataAddress::pull(buf)?,
            version: get_u16(buf, "channelled version")?,
            channel: get_u32(buf, "channel")?,
        })
    }

    fn read_matches(&self, key: &ChannelKey) -> bool {
        self.channel == key.channel && key.version.map_or(true, |v| v == self.version)
    }

    fn write_matches(&self, other: &Self) -> bool {
        self.channel == other.channel
    }
}

/// Entry of a unified index holding several packet kinds per path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TypedEntry {
    pub data_address: ExternalDataAddress,
    pub version: u32,
    pub channel: u32,
    pub entry_type: TypedEntryType,
}

impl TypedEntry {
    pub fn new(
        data_address: ExternalDataAddress,
        version: u32,
        channel: u32,
        entry_type: TypedEntryType,
    ) -> Self {
        Self {
            data_address,
            version,
            channel,
            entry_type,
        }
    }
}

impl Entry for TypedEntry {
    type ReadKey = TypedKey;
    const PUSHED_SIZE: usize = ExternalDataAddress::PUSHED_SIZE + 9;

    fn data_address(&self) -> &ExternalDataAddress {
        &self.data_address
    }

    fn data_address_mut(&mut self) -> &mut ExternalDataAddress {
        &mut self.data_address
    }

    fn push(&self, buf: &mut impl BufMut) {
        self.data_address.push(buf);
        buf.put_u32_le(self.version);
        buf.put_u32_le(self.channel);
        buf.put_u8(self.entry_type as u8);
    }

    fn pull(buf: &mut impl Buf) -> GeIndexResult<Self> {
        Ok(Self {
            data_address: ExternalDataAddress::pull(buf)?,
            version: get_u32(buf, "typed version")?,
            channel: get_u32(buf, "typed channel")?,
            entry_type: TypedEntryType::try_from(get_u8(buf, "typed entry type")?)?,
        })
    }

    fn read_matches(&self, key: &TypedKey) -> bool {
        key.matches(self.entry_type, self.channel, self.version)
    }

    fn write_matches(&self, other: &Self) -> bool {
        self.entry_type == other.entry_type && self.channel == other.channel
    }
}

/// Flattened entry carrying everything a traversal may need to rebuild or
/// merge indexes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllInfoEntry {
    pub data_address: ExternalDataAddress,
    pub version: u32,
    pub channel: u32,
    pub entry_type: TypedEntryType,
    pub inset_id: u32,
    pub extra: u32,
}

impl Entry for AllInfoEntry {
    type ReadKey = TypedKey;
    const PUSHED_SIZE: usize = ExternalDataAddress::PUSHED_SIZE + 17;

    fn data_address(&self) -> &ExternalDataAddress {
        &self.data_address
    }

    fn data_address_mut(&mut self) -> &mut ExternalDataAddress {
        &mut self.data_address
    }

    fn push(&self, buf: &mut impl BufMut) {
        self.data_address.push(buf);
        buf.put_u32_le(self.version);
        buf.put_u32_le(self.channel);
        buf.put_u8(self.entry_type as u8);
        buf.put_u32_le(self.inset_id);
        buf.put_u32_le(self.extra);
    }

    fn pull(buf: &mut impl Buf) -> GeIndexResult<Self> {
        Ok(Self {
            data_address: ExternalDataAddress::pull(buf)?,
            version: get_u32(buf, "all-info version")?,
            channel: get_u32(buf, "all-info channel")?,
            entry_type: TypedEntryType::try_from(get_u8(buf, "all-info entry type")?)?,
            inset_id: get_u32(buf, "all-info inset id")?,
            extra: get_u32(buf, "all-info extra")?,
        })
    }

    fn read_matches(&self, key: &TypedKey) -> bool {
        key.matches(self.entry_type, self.channel, self.version)
    }

    fn write_matches(&self, other: &Self) -> bool {
        self.entry_type == other.entry_type
            && self.channel == other.channel
            && self.data_address.file_num == other.data_address.file_num
    }
}

/// What an adapted entry inherits from the index it was read from.
#[derive(Debug, Clone, Copy)]
pub struct AdaptContext<'a> {
    pub entry_type: TypedEntryType,
    pub channel: u32,
    /// Per-packet-file extra values of the source index.
    pub extras: &'a [u32],
}

impl AdaptContext<'_> {
    fn extra_of(&self, address: &ExternalDataAddress) -> u32 {
        self.extras
            .get(address.file_num as usize)
            .copied()
            .unwrap_or(0)
    }
}

/// Conversion of a concrete entry into the flattened representation.
pub trait ToAllInfo: Entry {
    fn to_all_info(&self, ctx: &AdaptContext<'_>) -> AllInfoEntry;
}

impl ToAllInfo for SimpleInsetEntry {
    fn to_all_info(&self, ctx: &AdaptContext<'_>) -> AllInfoEntry {
        AllInfoEntry {
            data_address: self.data_address,
            version: u32::from(self.version),
            channel: ctx.channel,
            entry_type: ctx.entry_type,
            inset_id: u32::from(self.inset_id),
            extra: ctx.extra_of(&self.data_address),
        }
    }
}

impl ToAllInfo for BlendEntry {
    fn to_all_info(&self, ctx: &AdaptContext<'_>) -> AllInfoEntry {
        AllInfoEntry {
            data_address: self.data_address,
            version: u32::from(self.version),
            channel: ctx.channel,
            entry_type: ctx.entry_type,
            inset_id: u32::from(self.inset_id),
            extra: ctx.extra_of(&self.data_address),
        }
    }
}

impl ToAllInfo for ChannelledEntry {
    fn to_all_info(&self, ctx: &AdaptContext<'_>) -> AllInfoEntry {
        AllInfoEntry {
            data_address: self.data_address,
            version: u32::from(self.version),
            channel: self.channel,
            entry_type: ctx.entry_type,
            inset_id: 0,
            extra: ctx.extra_of(&self.data_address),
        }
    }
}

impl ToAllInfo for TypedEntry {
    fn to_all_info(&self, ctx: &AdaptContext<'_>) -> AllInfoEntry {
        AllInfoEntry {
            data_address: self.data_address,
            version: self.version,
            channel: self.channel,
            entry_type: self.entry_type,
            inset_id: 0,
            extra: ctx.extra_of(&self.data_address),
        }
    }
}

impl ToAllInfo for AllInfoEntry {
    fn to_all_info(&self, _ctx: &AdaptContext<'_>) -> AllInfoEntry {
        *self
    }
}

/// Target side of an adapting traversal.
pub trait AdaptFrom<S>: Entry {
    fn adapt_from(source: &S, ctx: &AdaptContext<'_>) -> Self;
}

impl<S: ToAllInfo> AdaptFrom<S> for AllInfoEntry {
    fn adapt_from(source: &S, ctx: &AdaptContext<'_>) -> Self {
        source.to_all_info(ctx)
    }
}

impl<S: ToAllInfo> AdaptFrom<S> for TypedEntry {
    fn adapt_from(source: &S, ctx: &AdaptContext<'_>) -> Self {
        let all = source.to_all_info(ctx);
        TypedEntry {
            data_address: all.data_address,
            version: all.version,
            channel: all.channel,
            entry_type: all.entry_type,
        }
    }
}
