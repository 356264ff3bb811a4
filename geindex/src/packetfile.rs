//! Packet files hold the payload bytes that index entries point at.
//!
//! A packet file is a plain file bundle whose records carry a trailing CRC.
//! The index never interprets the payload; it only stores the
//! [`ExternalDataAddress`] returned by [`PacketFileWriter::append`].

use std::path::Path;

use crate::config::FileBundleConfig;
use crate::entries::ExternalDataAddress;
use crate::errors::{GeIndexError, GeIndexResult};
use crate::filebundle::{FileBundleReader, FileBundleWriter, ManifestEntry, CRC_SIZE};

pub struct PacketFileWriter {
    bundle: FileBundleWriter,
    file_num: u32,
}

impl PacketFileWriter {
    /// Creates a packet file registered as `file_num` in the index that
    /// will reference it.
    pub fn create(dir: impl AsRef<Path>, file_num: u32, config: FileBundleConfig) -> GeIndexResult<Self> {
        Ok(Self {
            bundle: FileBundleWriter::create(dir, config)?,
            file_num,
        })
    }

    pub fn file_num(&self) -> u32 {
        self.file_num
    }

    /// Appends `payload` followed by its CRC and returns the address of the
    /// framed record.
    pub fn append(&self, payload: &[u8]) -> GeIndexResult<ExternalDataAddress> {
        let mut record = Vec::with_capacity(payload.len() + CRC_SIZE);
        record.extend_from_slice(payload);
        record.resize(payload.len() + CRC_SIZE, 0);
        let size = u32::try_from(record.len()).map_err(|_| {
            GeIndexError::Capacity(format!("packet of {} bytes is too large", payload.len()))
        })?;
        let offset = self.bundle.write_append_crc(&mut record)?;
        Ok(ExternalDataAddress::new(offset, self.file_num, size))
    }

    pub fn dir(&self) -> &Path {
        self.bundle.dir()
    }

    pub fn close(&self) -> GeIndexResult<()> {
        self.bundle.close()
    }

    pub fn append_manifest(&self, manifest: &mut Vec<ManifestEntry>) -> GeIndexResult<()> {
        self.bundle.append_manifest(manifest)
    }
}

pub struct PacketFileReader {
    bundle: FileBundleReader,
}

impl PacketFileReader {
    pub fn open(dir: impl AsRef<Path>) -> GeIndexResult<Self> {
        Ok(Self {
            bundle: FileBundleReader::open(dir)?,
        })
    }

    /// CRC-checked read of the record at `addr`; returns the payload only.
    pub fn read(&self, addr: &ExternalDataAddress) -> GeIndexResult<Vec<u8>> {
        if addr.is_absent() {
            return Err(GeIndexError::not_found("absent packet address"));
        }
        self.bundle.read_at_crc(addr.offset, addr.size as usize)
    }

    pub fn dir(&self) -> &Path {
        self.bundle.dir()
    }
}
