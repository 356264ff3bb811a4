use geindex::buckets::BlendBucket;
use geindex::config::{ReaderConfig, WriterConfig};
use geindex::entries::{AllInfoEntry, BlendEntry, TypedEntryType, VersionKey};
use geindex::merge::collect;
use geindex::{AdaptingTraverser, Reader, Traverser, Writer};
use geindex_int_test::test_util::{cleanup, create_test_context, path, run_test, write_packets, TestContext};

const TILES: [&str; 3] = ["2", "21", "213021"];

/// Builds a blend index over three packet files with extras 1, 5 and 3.
fn build_blend_index(ctx: &TestContext) -> geindex::GeIndexResult<()> {
    let mut packet_dirs = Vec::new();
    let mut addrs = Vec::new();
    for file_num in 0..3u32 {
        let payloads: Vec<Vec<u8>> = TILES
            .iter()
            .map(|tile| format!("{}@{}", tile, file_num).into_bytes())
            .collect();
        addrs.push(write_packets(&ctx.packet_dir(file_num), file_num, &payloads)?);
        packet_dirs.push(ctx.packet_dir(file_num));
    }

    let mut writer: Writer<BlendBucket> = Writer::create(ctx.index_dir(), packet_dirs, &WriterConfig::new())?;
    for (file_num, extra) in [(0u32, 1u32), (1, 5), (2, 3)] {
        writer.set_packet_extra(file_num, extra)?;
    }
    for (i, tile) in TILES.iter().enumerate() {
        for file_addrs in &addrs {
            writer.put(&path(tile), BlendEntry::new(file_addrs[i], 1, 4))?;
        }
    }
    writer.close()
}

#[test]
fn test_lookup_and_traversal_agree_on_winner() {
    run_test(
        || create_test_context(),
        |ctx| {
            build_blend_index(&ctx)?;
            let reader: Reader<BlendBucket> = Reader::open(ctx.index_dir(), &ReaderConfig::new())?;
            assert_eq!(reader.header().packet_extras, vec![1, 5, 3]);
            for tile in TILES {
                let entry = reader.get_entry(&path(tile), &VersionKey::any())?;
                assert_eq!(entry.data_address.file_num, 1);
                assert_eq!(reader.load_external_data(&entry.data_address)?, format!("{}@1", tile).into_bytes());
            }

            let inner: Traverser<BlendBucket> = Traverser::open(ctx.index_dir(), &ReaderConfig::new())?;
            let mut adapted: AdaptingTraverser<AllInfoEntry, BlendBucket> =
                AdaptingTraverser::new(inner, TypedEntryType::Imagery, 0);
            let values = collect(&mut adapted)?;
            assert_eq!(values.len(), TILES.len());
            for value in &values {
                assert_eq!(value.entries.len(), 1);
                assert_eq!(value.entries[0].extra, 5);
                assert_eq!(value.entries[0].data_address.file_num, 1);
            }

            // the raw traversal still carries every contributor
            let raw: Traverser<BlendBucket> = Traverser::open(ctx.index_dir(), &ReaderConfig::new())?;
            for value in raw {
                assert_eq!(value?.entries.len(), 3);
            }
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_delta_can_change_the_winner() {
    run_test(
        || create_test_context(),
        |ctx| {
            build_blend_index(&ctx)?;
            let mut delta: Writer<BlendBucket> = Writer::open_delta(ctx.index_dir(), &WriterConfig::new())?;
            delta.set_packet_extra(2, 9)?;
            assert!(delta.set_packet_extra(3, 1).is_err());
            delta.close()?;

            let reader: Reader<BlendBucket> = Reader::open(ctx.index_dir(), &ReaderConfig::new())?;
            for tile in TILES {
                let entry = reader.get_entry(&path(tile), &VersionKey::any())?;
                assert_eq!(entry.data_address.file_num, 2);
            }
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}
