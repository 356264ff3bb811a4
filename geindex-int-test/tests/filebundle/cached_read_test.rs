use geindex::config::{CachedReadConfig, FileBundleConfig};
use geindex::filebundle::{BlockAddress, CachedReadAccessor, FileBundleReader, FileBundleWriter};
use geindex_int_test::test_util::{cleanup, create_test_context, run_test};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::path::Path;

fn write_bundle(dir: &Path, len: usize) -> geindex::GeIndexResult<Vec<u8>> {
    let content: Vec<u8> = (0..len).map(|i| (i * 7 % 251) as u8).collect();
    let writer = FileBundleWriter::create(dir, FileBundleConfig::new())?;
    writer.write_append(&content)?;
    writer.close()?;
    Ok(content)
}

#[test]
fn test_cached_reads_equal_direct_reads() {
    run_test(
        || create_test_context(),
        |ctx| {
            let dir = ctx.bundle_dir("cached");
            let content = write_bundle(&dir, 5000)?;
            let reader = FileBundleReader::open(&dir)?;

            for (max_blocks, block_size) in [(2usize, 16u64), (2, 100), (3, 64), (8, 512), (4, 4096)] {
                let mut accessor = CachedReadAccessor::new(CachedReadConfig::new(max_blocks, block_size))?;
                let mut rng = StdRng::seed_from_u64(max_blocks as u64 * block_size);
                for _ in 0..300 {
                    let offset = rng.gen_range(0..content.len());
                    let len = rng.gen_range(1..=(content.len() - offset).min(700));
                    let mut cached = vec![0u8; len];
                    reader.read_at_cached(offset as u64, &mut cached, &mut accessor)?;
                    let mut direct = vec![0u8; len];
                    reader.read_at(offset as u64, &mut direct)?;
                    assert_eq!(cached, direct);
                    assert_eq!(&cached[..], &content[offset..offset + len]);
                }
                assert!(accessor.cached_blocks() <= max_blocks);
            }
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_linear_scan_reads_each_block_once() {
    run_test(
        || create_test_context(),
        |ctx| {
            let dir = ctx.bundle_dir("scan");
            let content = write_bundle(&dir, 1000)?;
            let reader = FileBundleReader::open(&dir)?;

            for block_size in [64u64, 100, 128, 1000, 1024] {
                let mut accessor = CachedReadAccessor::new(CachedReadConfig::new(2, block_size))?;
                let mut scanned = Vec::with_capacity(content.len());
                for chunk in (0..content.len()).step_by(10) {
                    let mut buf = vec![0u8; 10.min(content.len() - chunk)];
                    reader.read_at_cached(chunk as u64, &mut buf, &mut accessor)?;
                    scanned.extend_from_slice(&buf);
                }
                assert_eq!(scanned, content);
                let blocks = (content.len() as u64).div_ceil(block_size);
                assert_eq!(accessor.stats_disk_accesses(), blocks);
                assert_eq!(accessor.stats_bytes_read(), blocks * block_size);
            }
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_refreshed_block_survives_eviction() {
    run_test(
        || create_test_context(),
        |ctx| {
            let dir = ctx.bundle_dir("lru");
            write_bundle(&dir, 512)?;
            let reader = FileBundleReader::open(&dir)?;
            let mut accessor = CachedReadAccessor::new(CachedReadConfig::new(2, 64))?;
            let mut byte = [0u8; 1];

            // blocks A, B, A again, then C
            for offset in [0u64, 64, 0, 128] {
                reader.read_at_cached(offset, &mut byte, &mut accessor)?;
            }
            let block = |offset| BlockAddress { segment_id: 0, offset };
            assert!(accessor.contains(&block(0)));
            assert!(!accessor.contains(&block(64)));
            assert!(accessor.contains(&block(128)));
            assert_eq!(accessor.stats_disk_accesses(), 3);
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}
