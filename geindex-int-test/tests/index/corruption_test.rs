use geindex::buckets::CombinedTmeshBucket;
use geindex::config::{FileBundleConfig, ReaderConfig, WriterConfig};
use geindex::entries::{SimpleInsetEntry, VersionKey};
use geindex::filebundle::segment_file_name;
use geindex::index::{Header, INDEX_HEADER_NAME};
use geindex::{BucketPath, GeIndexResult, Reader, Traverser, Writer};
use geindex_int_test::test_util::{cleanup, create_test_context, flip_bit, path, run_test, write_packets, TestContext};

fn build_index(ctx: &TestContext) -> GeIndexResult<()> {
    let payloads = vec![b"root tile".to_vec(), b"deep tile".to_vec()];
    let addrs = write_packets(&ctx.packet_dir(0), 0, &payloads)?;
    let config = WriterConfig::new().with_content_desc("imagery");
    let mut writer: Writer<CombinedTmeshBucket> = Writer::create(ctx.index_dir(), vec![ctx.packet_dir(0)], &config)?;
    writer.put(&path(""), SimpleInsetEntry::new(addrs[0], 1, 0))?;
    writer.put(&path("0123"), SimpleInsetEntry::new(addrs[1], 1, 0))?;
    writer.close()
}

#[test]
fn test_flipped_bucket_bit_is_detected() {
    run_test(
        || create_test_context(),
        |ctx| {
            build_index(&ctx)?;
            let root_entry = Header::read(&ctx.index_dir(), None)?.root_entry_addr;
            let segment = ctx.index_dir().join(segment_file_name(0));
            flip_bit(&segment, root_entry.offset + 3, 5)?;

            let reader: Reader<CombinedTmeshBucket> = Reader::open(ctx.index_dir(), &ReaderConfig::new())?;
            assert!(reader.get_entry(&path(""), &VersionKey::any()).unwrap_err().is_corruption());
            // buckets below the root are untouched
            let deep = reader.get_entry(&path("0123"), &VersionKey::any())?;
            assert_eq!(reader.load_external_data(&deep.data_address)?, b"deep tile");

            let opened = Traverser::<CombinedTmeshBucket>::open(ctx.index_dir(), &ReaderConfig::new());
            assert!(opened.err().is_some_and(|e| e.is_corruption()));
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_traversal_stops_at_corrupt_bucket() {
    run_test(
        || create_test_context(),
        |ctx| {
            build_index(&ctx)?;
            let mut delta: Writer<CombinedTmeshBucket> = Writer::open_delta(ctx.index_dir(), &WriterConfig::new())?;
            let addrs = write_packets(&ctx.packet_dir(1), 1, &[b"late tile".to_vec()])?;
            delta.add_packet_file(ctx.packet_dir(1), 0)?;
            delta.put(&path("1230"), SimpleInsetEntry::new(addrs[0], 1, 0))?;
            delta.close()?;

            let reader: Reader<CombinedTmeshBucket> = Reader::open(ctx.index_dir(), &ReaderConfig::new())?;
            let late = reader.get_entry_bucket_addr(&BucketPath::containing(&path("1230")))?;
            assert!(!late.is_null());
            let segment = (late.offset / FileBundleConfig::new().segment_break()) as u32;
            let offset = late.offset % FileBundleConfig::new().segment_break();
            flip_bit(&ctx.index_dir().join(segment_file_name(segment)), offset + late.size as u64 - 1, 7)?;

            let traverser: Traverser<CombinedTmeshBucket> = Traverser::open(ctx.index_dir(), &ReaderConfig::new())?;
            let results: Vec<_> = traverser.collect();
            assert_eq!(results.len(), 2);
            assert_eq!(results[0].as_ref().map(|v| v.path).ok(), Some(path("")));
            assert!(results[1].as_ref().is_err_and(|e| e.is_corruption()));
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_flipped_header_bit_is_detected() {
    run_test(
        || create_test_context(),
        |ctx| {
            build_index(&ctx)?;
            assert!(Header::is_geindex_of_type(&ctx.index_dir(), "imagery"));
            assert!(!Header::is_geindex_of_type(&ctx.index_dir(), "terrain"));
            assert!(!Header::is_geindex(&ctx.packet_dir(0)));

            flip_bit(&ctx.index_dir().join(INDEX_HEADER_NAME), 20, 0)?;
            // the magic is intact, the checksum is not
            assert!(Header::is_geindex(&ctx.index_dir()));
            assert!(Header::content_desc_of(&ctx.index_dir()).unwrap_err().is_corruption());
            assert!(!Header::is_geindex_of_type(&ctx.index_dir(), "imagery"));
            let opened = Reader::<CombinedTmeshBucket>::open(ctx.index_dir(), &ReaderConfig::new());
            assert!(opened.err().is_some_and(|e| e.is_corruption()));
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_flipped_packet_bit_is_detected() {
    run_test(
        || create_test_context(),
        |ctx| {
            build_index(&ctx)?;
            let reader: Reader<CombinedTmeshBucket> = Reader::open(ctx.index_dir(), &ReaderConfig::new())?;
            let root = reader.get_entry(&path(""), &VersionKey::any())?;
            flip_bit(
                &ctx.packet_dir(0).join(segment_file_name(0)),
                root.data_address.offset + 2,
                1,
            )?;
            assert!(reader.load_external_data(&root.data_address).unwrap_err().is_corruption());
            let deep = reader.get_entry(&path("0123"), &VersionKey::any())?;
            assert_eq!(reader.load_external_data(&deep.data_address)?, b"deep tile");
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}
