use geindex::buckets::{should_store_singles_sparsely, CombinedTmeshBucket};
use geindex::config::{CachedReadConfig, ReaderConfig, WriterConfig};
use geindex::entries::{Entry, SimpleInsetEntry, VersionKey};
use geindex::index::Header;
use geindex::quadtree::{entry_slot_as_sub_addr, sub_addr_as_entry_slot, ENTRY_SLOTS_PER_BUCKET};
use geindex::{GeIndexResult, Reader, Traverser, Writer};
use geindex_int_test::test_util::{cleanup, create_test_context, is_sorted, path, run_test, write_packets};

const PATHS: [&str; 5] = ["", "0", "01", "012", "0123"];

#[test]
fn test_write_then_read_at_every_cache_depth() {
    run_test(
        || create_test_context(),
        |ctx| {
            let payloads: Vec<Vec<u8>> = PATHS.iter().map(|p| format!("tile[{}]", p).into_bytes()).collect();
            let addrs = write_packets(&ctx.packet_dir(0), 0, &payloads)?;

            let config = WriterConfig::new().with_content_desc("terrain");
            let mut writer: Writer<CombinedTmeshBucket> =
                Writer::create(ctx.index_dir(), vec![ctx.packet_dir(0)], &config)?;
            for (p, addr) in PATHS.iter().zip(&addrs) {
                writer.put(&path(p), SimpleInsetEntry::new(*addr, 3, 0))?;
            }
            writer.close()?;

            assert!(Header::is_geindex(&ctx.index_dir()));
            assert!(Header::is_geindex_of_type(&ctx.index_dir(), "terrain"));
            assert_eq!(Header::content_desc_of(&ctx.index_dir())?, "terrain");

            for levels in 1..=3u8 {
                let config = ReaderConfig::new()
                    .with_cached_bucket_levels(levels)
                    .with_read_cache(CachedReadConfig::new(8, 4096));
                let reader: Reader<CombinedTmeshBucket> = Reader::open(ctx.index_dir(), &config)?;
                for (i, p) in PATHS.iter().enumerate() {
                    let entry = reader.get_entry(&path(p), &VersionKey::any())?;
                    assert_eq!(entry.data_address, addrs[i]);
                    assert_eq!(reader.load_external_data(&entry.data_address)?, payloads[i]);
                }
                assert!(reader.get_entry(&path("01230"), &VersionKey::any()).unwrap_err().is_not_found());
                assert!(reader.get_entry(&path("3"), &VersionKey::any()).unwrap_err().is_not_found());
                assert!(reader.get_entry(&path("0"), &VersionKey::exact(4)).unwrap_err().is_not_found());
            }

            let traverser: Traverser<CombinedTmeshBucket> = Traverser::open(ctx.index_dir(), &ReaderConfig::new())?;
            let values = traverser.collect::<GeIndexResult<Vec<_>>>()?;
            let paths: Vec<_> = values.iter().map(|v| v.path).collect();
            assert_eq!(paths, PATHS.iter().map(|p| path(p)).collect::<Vec<_>>());
            assert!(is_sorted(paths));
            for (value, addr) in values.iter().zip(&addrs) {
                assert_eq!(value.entries.len(), 1);
                assert_eq!(value.entries[0].data_address, *addr);
            }
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_deep_index_keeps_preorder() {
    run_test(
        || create_test_context(),
        |ctx| {
            let mut paths: Vec<String> = Vec::new();
            for level in 0..=12usize {
                for branch in 0..4u8 {
                    let quadrants: String = (0..level).map(|d| char::from(b'0' + ((d as u8 + branch) % 4))).collect();
                    paths.push(quadrants);
                }
            }
            let mut sorted: Vec<_> = paths.iter().map(|p| path(p)).collect();
            sorted.sort();
            sorted.dedup();

            let payloads: Vec<Vec<u8>> = (0..sorted.len()).map(|i| vec![i as u8; 1 + i % 13]).collect();
            let addrs = write_packets(&ctx.packet_dir(0), 0, &payloads)?;
            let mut writer: Writer<CombinedTmeshBucket> =
                Writer::create(ctx.index_dir(), vec![ctx.packet_dir(0)], &WriterConfig::new().with_delayed_writes(true))?;
            for (p, addr) in sorted.iter().zip(&addrs) {
                writer.put(p, SimpleInsetEntry::new(*addr, 1, 0))?;
            }
            writer.close()?;

            let reader: Reader<CombinedTmeshBucket> =
                Reader::open(ctx.index_dir(), &ReaderConfig::new().with_cached_bucket_levels(2))?;
            for (i, p) in sorted.iter().enumerate() {
                let entry = reader.get_entry(p, &VersionKey::any())?;
                assert_eq!(reader.load_external_data(entry.data_address())?, payloads[i]);
            }

            let traverser: Traverser<CombinedTmeshBucket> = Traverser::open(ctx.index_dir(), &ReaderConfig::new())?;
            let found: Vec<_> = traverser.map(|v| v.map(|v| v.path)).collect::<GeIndexResult<_>>()?;
            assert_eq!(found, sorted);
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_entry_slots_cover_a_bucket() {
    let mut seen = vec![false; ENTRY_SLOTS_PER_BUCKET];
    for depth in 0..=3usize {
        for n in 0..4usize.pow(depth as u32) {
            let quadrants: Vec<u8> = (0..depth).map(|d| ((n >> (2 * (depth - 1 - d))) & 3) as u8).collect();
            let slot = sub_addr_as_entry_slot(&quadrants);
            assert!(!seen[slot], "slot {} used twice", slot);
            seen[slot] = true;
            assert_eq!(entry_slot_as_sub_addr(slot).as_slice(), quadrants.as_slice());
        }
    }
    assert!(seen.iter().all(|s| *s));
    assert_eq!(sub_addr_as_entry_slot(&[1]), 22);
    assert_eq!(sub_addr_as_entry_slot(&[3, 3, 3]), ENTRY_SLOTS_PER_BUCKET - 1);
}

#[test]
fn test_sparse_threshold_for_inset_entries() {
    let size = SimpleInsetEntry::PUSHED_SIZE;
    assert_eq!(size, 20);
    assert!(should_store_singles_sparsely(size, 1));
    assert!(should_store_singles_sparsely(size, 80));
    assert!(!should_store_singles_sparsely(size, 81));
    assert!(!should_store_singles_sparsely(size, ENTRY_SLOTS_PER_BUCKET));
}
