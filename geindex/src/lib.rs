//! # geindex - Segmented File Bundles and a Quadtree Tile Index
//!
//! geindex stores large, append-mostly tile databases on disk. It has two
//! layers:
//!
//! - **File bundles**: a directory of fixed-capacity segment files
//!   (`bundle.0000`, `bundle.0001`, ...) addressed by one logical 64-bit
//!   position, with CRC32-framed records, a checkpointed header and an LRU
//!   block cache for reads.
//! - **The geindex**: a quadtree-keyed index stored in a file bundle. Four
//!   quadtree levels share one bucket; entry buckets hold the entries of
//!   85 paths and child buckets point at the 256 buckets one hop below.
//!   Entries reference payload bytes kept in separate packet files.
//!
//! ## Key Features
//!
//! - **Bounded-memory writes**: the [`Writer`](writer::Writer) takes paths
//!   in preorder and keeps only the buckets on the current path open
//! - **Delta updates**: existing indexes are reopened read-only and new
//!   buckets land in fresh segments
//! - **Cached lookups**: the [`Reader`](reader::Reader) caches the upper
//!   child-bucket tiers and reads only child halves below them
//! - **Preorder traversal**: [`Traverser`](traverser::Traverser) walks an
//!   index depth-first and traversers of several indexes merge through
//!   [`Merge`](merge::Merge)
//! - **Integrity**: every stored bucket and header carries a CRC32
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use geindex::buckets::CombinedTmeshBucket;
//! use geindex::config::{FileBundleConfig, ReaderConfig, WriterConfig};
//! use geindex::entries::{SimpleInsetEntry, VersionKey};
//! use geindex::packetfile::PacketFileWriter;
//! use geindex::reader::Reader;
//! use geindex::writer::Writer;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let packets = PacketFileWriter::create("/data/tiles.pak", 0, FileBundleConfig::new())?;
//! let mut writer: Writer<CombinedTmeshBucket> =
//!     Writer::create("/data/tiles.idx", vec!["/data/tiles.pak".into()], &WriterConfig::new())?;
//!
//! let addr = packets.append(b"tile bytes")?;
//! writer.put(&"0123".parse()?, SimpleInsetEntry::new(addr, 1, 0))?;
//! writer.close()?;
//! packets.close()?;
//!
//! let reader: Reader<CombinedTmeshBucket> = Reader::open("/data/tiles.idx", &ReaderConfig::new())?;
//! let entry = reader.get_entry(&"0123".parse()?, &VersionKey::any())?;
//! let bytes = reader.load_external_data(&entry.data_address)?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Organization
//!
//! - [`filebundle`] - Segmented bundles, block cache and legacy pack import
//! - [`index`] - Index bundle, header and block storage for buckets
//! - [`buckets`] - Entry and child bucket encodings
//! - [`entries`] - Entry types, read keys and winner selection
//! - [`quadtree`] - Quadtree paths and slot addressing
//! - [`writer`], [`reader`], [`traverser`], [`merge`] - Building and querying indexes
//! - [`packetfile`] - Payload files referenced by entries
//! - [`config`] - Builders for bundle, writer and reader settings
//! - [`errors`] - Error and result types

pub mod buckets;
pub(crate) mod codec;
pub mod config;
pub mod entries;
pub mod errors;
pub mod filebundle;
pub mod index;
pub mod merge;
pub mod packetfile;
pub mod quadtree;
pub mod reader;
pub mod traverser;
pub mod writer;

pub use errors::{GeIndexError, GeIndexResult};
pub use quadtree::{BucketPath, QuadtreePath};
pub use reader::Reader;
pub use traverser::{AdaptingTraverser, Traverser, TraverserValue};
pub use writer::Writer;
