//! Explicit configuration objects for bundles, writers and readers.
//!
//! Every component receives its configuration at construction time; there
//! is no process-wide options singleton.

use std::path::{Path, PathBuf};

use crate::errors::{GeIndexError, GeIndexResult};

/// Default maximum size of a single segment file (1 GiB).
pub const DEFAULT_SEGMENT_BREAK: u64 = 1 << 30;

/// Default name of the file bundle header file.
pub const DEFAULT_BUNDLE_HEADER_NAME: &str = "bundle.hdr";

/// Default number of pooled bucket write buffers.
pub const DEFAULT_BUFFER_CACHE_CAPACITY: usize = 16;

/// Default number of child buckets kept by a reader's address cache.
pub const DEFAULT_CACHED_BUCKET_CAPACITY: usize = 4096;

/// Default number of bucket levels a reader caches.
pub const DEFAULT_CACHED_BUCKET_LEVELS: u8 = 3;

/// Configuration of a segmented file bundle.
#[derive(Debug, Clone)]
pub struct FileBundleConfig {
    segment_break: u64,
    header_name: String,
    write_buffer_size: Option<usize>,
    dir_mode: u32,
    file_mode: u32,
}

impl FileBundleConfig {
    pub fn new() -> Self {
        Self {
            segment_break: DEFAULT_SEGMENT_BREAK,
            header_name: DEFAULT_BUNDLE_HEADER_NAME.to_string(),
            write_buffer_size: None,
            dir_mode: 0o777,
            file_mode: 0o666,
        }
    }

    /// Sets the maximum size of a segment file. Fixed for the life of the
    /// bundle once it has been created.
    pub fn with_segment_break(mut self, segment_break: u64) -> Self {
        self.segment_break = segment_break;
        self
    }

    pub fn with_header_name(mut self, name: impl Into<String>) -> Self {
        self.header_name = name.into();
        self
    }

    /// Enables coalescing of small sequential writes into a buffer of
    /// `size` bytes. Buffered data is not visible to concurrent readers
    /// until it is flushed.
    pub fn with_write_buffer(mut self, size: usize) -> Self {
        self.write_buffer_size = if size == 0 { None } else { Some(size) };
        self
    }

    pub fn with_dir_mode(mut self, mode: u32) -> Self {
        self.dir_mode = mode;
        self
    }

    pub fn with_file_mode(mut self, mode: u32) -> Self {
        self.file_mode = mode;
        self
    }

    pub fn segment_break(&self) -> u64 {
        self.segment_break
    }

    pub fn header_name(&self) -> &str {
        &self.header_name
    }

    pub fn write_buffer_size(&self) -> Option<usize> {
        self.write_buffer_size
    }

    pub fn dir_mode(&self) -> u32 {
        self.dir_mode
    }

    pub fn file_mode(&self) -> u32 {
        self.file_mode
    }

    pub(crate) fn validate(&self) -> GeIndexResult<()> {
        if self.segment_break == 0 {
            return Err(GeIndexError::usage("segment_break must be greater than zero"));
        }
        if self.header_name.is_empty() || self.header_name.contains('/') {
            return Err(GeIndexError::usage(format!(
                "invalid bundle header name '{}'",
                self.header_name
            )));
        }
        Ok(())
    }
}

impl Default for FileBundleConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration of a [`CachedReadAccessor`](crate::filebundle::CachedReadAccessor).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachedReadConfig {
    pub max_blocks: usize,
    pub block_size: u64,
}

impl CachedReadConfig {
    pub fn new(max_blocks: usize, block_size: u64) -> Self {
        Self {
            max_blocks,
            block_size,
        }
    }

    pub(crate) fn validate(&self) -> GeIndexResult<()> {
        if self.max_blocks < 2 {
            return Err(GeIndexError::usage(format!(
                "cached read accessor needs at least 2 blocks, got {}",
                self.max_blocks
            )));
        }
        if self.block_size == 0 {
            return Err(GeIndexError::usage("cached read block size must be non-zero"));
        }
        Ok(())
    }
}

/// Configuration of an index [`Writer`](crate::writer::Writer).
#[derive(Debug, Clone)]
pub struct WriterConfig {
    bundle: FileBundleConfig,
    content_desc: String,
    buffer_cache_capacity: usize,
    delayed_writes: bool,
}

impl WriterConfig {
    pub fn new() -> Self {
        Self {
            bundle: FileBundleConfig::new(),
            content_desc: String::new(),
            buffer_cache_capacity: DEFAULT_BUFFER_CACHE_CAPACITY,
            delayed_writes: false,
        }
    }

    pub fn with_bundle(mut self, bundle: FileBundleConfig) -> Self {
        self.bundle = bundle;
        self
    }

    /// Free-text tag describing what the index holds, readable without a
    /// full open via [`Header::content_desc_of`](crate::index::Header::content_desc_of).
    pub fn with_content_desc(mut self, desc: impl Into<String>) -> Self {
        self.content_desc = desc.into();
        self
    }

    pub fn with_buffer_cache_capacity(mut self, capacity: usize) -> Self {
        self.buffer_cache_capacity = capacity;
        self
    }

    /// Hands bucket writes to a background worker instead of performing
    /// them inside bucket close.
    pub fn with_delayed_writes(mut self, delayed: bool) -> Self {
        self.delayed_writes = delayed;
        self
    }

    pub fn bundle(&self) -> &FileBundleConfig {
        &self.bundle
    }

    pub fn content_desc(&self) -> &str {
        &self.content_desc
    }

    pub fn buffer_cache_capacity(&self) -> usize {
        self.buffer_cache_capacity
    }

    pub fn delayed_writes(&self) -> bool {
        self.delayed_writes
    }
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration of an index [`Reader`](crate::reader::Reader) or traverser.
#[derive(Debug, Clone)]
pub struct ReaderConfig {
    bundle: FileBundleConfig,
    cached_bucket_levels: u8,
    cached_bucket_capacity: usize,
    read_cache: Option<CachedReadConfig>,
    prefix_override: Option<PathBuf>,
}

impl ReaderConfig {
    pub fn new() -> Self {
        Self {
            bundle: FileBundleConfig::new(),
            cached_bucket_levels: DEFAULT_CACHED_BUCKET_LEVELS,
            cached_bucket_capacity: DEFAULT_CACHED_BUCKET_CAPACITY,
            read_cache: None,
            prefix_override: None,
        }
    }

    /// Settings of the index's file bundle. Must name the same header file
    /// the index was written with.
    pub fn with_bundle(mut self, bundle: FileBundleConfig) -> Self {
        self.bundle = bundle;
        self
    }

    /// Number of 4-level bucket tiers (1..=3) whose child buckets are
    /// cached. Tier 1 is only the root child bucket.
    pub fn with_cached_bucket_levels(mut self, levels: u8) -> Self {
        self.cached_bucket_levels = levels;
        self
    }

    pub fn with_cached_bucket_capacity(mut self, capacity: usize) -> Self {
        self.cached_bucket_capacity = capacity;
        self
    }

    /// Routes bucket loads through a block cache.
    pub fn with_read_cache(mut self, read_cache: CachedReadConfig) -> Self {
        self.read_cache = Some(read_cache);
        self
    }

    /// Prepends `prefix` to every resolved packet-file path, for indexes
    /// that were relocated under a new root.
    pub fn with_prefix_override(mut self, prefix: impl AsRef<Path>) -> Self {
        self.prefix_override = Some(prefix.as_ref().to_path_buf());
        self
    }

    pub fn bundle(&self) -> &FileBundleConfig {
        &self.bundle
    }

    pub fn cached_bucket_levels(&self) -> u8 {
        self.cached_bucket_levels
    }

    pub fn cached_bucket_capacity(&self) -> usize {
        self.cached_bucket_capacity
    }

    pub fn read_cache(&self) -> Option<CachedReadConfig> {
        self.read_cache
    }

    pub fn prefix_override(&self) -> Option<&Path> {
        self.prefix_override.as_deref()
    }

    pub(crate) fn validate(&self) -> GeIndexResult<()> {
        self.bundle.validate()?;
        if !(1..=3).contains(&self.cached_bucket_levels) {
            return Err(GeIndexError::usage(format!(
                "cached bucket levels must be within 1..=3, got {}",
                self.cached_bucket_levels
            )));
        }
        if self.cached_bucket_capacity == 0 {
            return Err(GeIndexError::usage("cached bucket capacity must be non-zero"));
        }
        if let Some(read_cache) = &self.read_cache {
            read_cache.validate()?;
        }
        Ok(())
    }
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self::new()
    }
}
