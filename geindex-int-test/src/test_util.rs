use geindex::config::FileBundleConfig;
use geindex::entries::ExternalDataAddress;
use geindex::errors::{GeIndexError, GeIndexResult};
use geindex::packetfile::PacketFileWriter;
use geindex::QuadtreePath;
use std::fs::OpenOptions;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tempfile::TempDir;

/// Runs `test` against the context produced by `before`, then always runs
/// `after`. Errors and panics are reported with the phase they came from.
pub fn run_test<T, B, A>(before: B, test: T, after: A)
where
    T: Fn(TestContext) -> GeIndexResult<()> + std::panic::UnwindSafe + std::panic::RefUnwindSafe,
    B: Fn() -> GeIndexResult<TestContext> + std::panic::UnwindSafe + std::panic::RefUnwindSafe,
    A: Fn(TestContext) -> GeIndexResult<()> + std::panic::UnwindSafe + std::panic::RefUnwindSafe,
{
    let start_time = Instant::now();
    let result = std::panic::catch_unwind(|| match before() {
        Ok(ctx) => match test(ctx.clone()) {
            Ok(_) => after(ctx).map_err(|e| format!("After run failed: {:?}", e)),
            Err(e) => {
                let _ = after(ctx);
                Err(format!("Test failed: {:?}", e))
            }
        },
        Err(e) => Err(format!("Before run failed: {:?}", e)),
    });

    match result {
        Ok(Ok(_)) => {}
        Ok(Err(e)) => panic!("{} (after {:?})", e, start_time.elapsed()),
        Err(panic_err) => {
            let err_msg = if let Some(s) = panic_err.downcast_ref::<&str>() {
                s.to_string()
            } else if let Some(s) = panic_err.downcast_ref::<String>() {
                s.clone()
            } else {
                "Unknown panic".to_string()
            };
            panic!("Panic: {} (after {:?})", err_msg, start_time.elapsed());
        }
    }
}

/// Scratch directory shared by one test run.
#[derive(Clone)]
pub struct TestContext {
    dir: Arc<TempDir>,
}

impl TestContext {
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn index_dir(&self) -> PathBuf {
        self.path().join("index")
    }

    pub fn packet_dir(&self, file_num: u32) -> PathBuf {
        self.path().join(format!("packets.{}", file_num))
    }

    pub fn bundle_dir(&self, name: &str) -> PathBuf {
        self.path().join(name)
    }
}

pub fn create_test_context() -> GeIndexResult<TestContext> {
    let dir = tempfile::Builder::new().prefix("geindex-").tempdir()?;
    log::debug!("Test context at {:?}", dir.path());
    Ok(TestContext { dir: Arc::new(dir) })
}

pub fn cleanup(ctx: TestContext) -> GeIndexResult<()> {
    match Arc::try_unwrap(ctx.dir) {
        Ok(dir) => dir.close().map_err(GeIndexError::from),
        // another clone still holds the directory and removes it on drop
        Err(_) => Ok(()),
    }
}

pub fn path(s: &str) -> QuadtreePath {
    s.parse().expect("valid quadtree path")
}

/// Writes `payloads` to a new packet file and returns their addresses.
pub fn write_packets(dir: &Path, file_num: u32, payloads: &[Vec<u8>]) -> GeIndexResult<Vec<ExternalDataAddress>> {
    let writer = PacketFileWriter::create(dir, file_num, FileBundleConfig::new())?;
    let addrs = payloads
        .iter()
        .map(|payload| writer.append(payload))
        .collect::<GeIndexResult<Vec<_>>>();
    writer.close()?;
    addrs
}

/// Flips bit `bit` of the byte at `offset` in `file`.
pub fn flip_bit(file: &Path, offset: u64, bit: u8) -> GeIndexResult<()> {
    let mut handle = OpenOptions::new().read(true).write(true).open(file)?;
    let mut byte = [0u8; 1];
    handle.seek(SeekFrom::Start(offset))?;
    handle.read_exact(&mut byte)?;
    byte[0] ^= 1 << bit;
    handle.seek(SeekFrom::Start(offset))?;
    handle.write_all(&byte)?;
    Ok(())
}

pub fn is_sorted<T: Ord>(iterable: impl IntoIterator<Item = T>) -> bool {
    let mut iter = iterable.into_iter();
    if let Some(mut prev) = iter.next() {
        for current in iter {
            if prev > current {
                return false;
            }
            prev = current;
        }
    }
    true
}
