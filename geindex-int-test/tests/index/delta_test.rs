use geindex::buckets::VectorBucket;
use geindex::config::{ReaderConfig, WriterConfig};
use geindex::entries::{ChannelKey, ChannelledEntry, ExternalDataAddress};
use geindex::index::INDEX_HEADER_NAME;
use geindex::{GeIndexResult, Reader, Traverser, Writer};
use geindex_int_test::test_util::{cleanup, create_test_context, path, run_test, write_packets, TestContext};

fn key(channel: u32) -> ChannelKey {
    ChannelKey { channel, version: None }
}

/// Base index: channels 1 and 2 at four paths, all in packet file 0.
fn build_base(ctx: &TestContext) -> GeIndexResult<Vec<ExternalDataAddress>> {
    let payloads: Vec<Vec<u8>> = (0..8).map(|i| format!("base {}", i).into_bytes()).collect();
    let addrs = write_packets(&ctx.packet_dir(0), 0, &payloads)?;
    let mut writer: Writer<VectorBucket> =
        Writer::create(ctx.index_dir(), vec![ctx.packet_dir(0)], &WriterConfig::new())?;
    for (i, p) in ["", "1", "1302", "13022"].iter().enumerate() {
        writer.put(&path(p), ChannelledEntry::new(addrs[2 * i], 1, 1))?;
        writer.put(&path(p), ChannelledEntry::new(addrs[2 * i + 1], 1, 2))?;
    }
    writer.close()?;
    Ok(addrs)
}

#[test]
fn test_delta_adds_replaces_and_deletes() {
    run_test(
        || create_test_context(),
        |ctx| {
            let base = build_base(&ctx)?;

            let mut delta: Writer<VectorBucket> = Writer::open_delta(ctx.index_dir(), &WriterConfig::new())?;
            let file_num = delta.add_packet_file(ctx.packet_dir(1), 0)?;
            assert_eq!(file_num, 1);
            let fresh = write_packets(
                &ctx.packet_dir(1),
                1,
                &[b"replaced".to_vec(), b"added".to_vec(), b"deep".to_vec()],
            )?;
            delta.put(&path("1"), ChannelledEntry::new(fresh[0], 2, 2))?;
            delta.put(&path("1302"), ChannelledEntry::new(fresh[1], 1, 3))?;
            delta.delete(&path("13022"), &ChannelledEntry::new(ExternalDataAddress::absent(), 0, 1))?;
            delta.delete(&path("2"), &ChannelledEntry::new(ExternalDataAddress::absent(), 0, 1))?;
            delta.put(&path("2310231"), ChannelledEntry::new(fresh[2], 1, 1))?;
            delta.close()?;

            let reader: Reader<VectorBucket> = Reader::open(ctx.index_dir(), &ReaderConfig::new())?;
            assert_eq!(reader.header().packet_files.len(), 2);
            assert!(reader.header().wasted_space > 0);

            assert_eq!(reader.get_entry(&path(""), &key(1))?.data_address, base[0]);
            assert_eq!(reader.get_entry(&path("1"), &key(1))?.data_address, base[2]);
            let replaced = reader.get_entry(&path("1"), &key(2))?;
            assert_eq!(replaced.version, 2);
            assert_eq!(reader.load_external_data(&replaced.data_address)?, b"replaced");
            assert_eq!(reader.load_external_data(&reader.get_entry(&path("1302"), &key(3))?.data_address)?, b"added");
            assert!(reader.get_entry(&path("13022"), &key(1)).unwrap_err().is_not_found());
            assert_eq!(reader.get_entry(&path("13022"), &key(2))?.data_address, base[7]);
            assert!(reader.get_entry(&path("2"), &key(1)).unwrap_err().is_not_found());
            assert_eq!(reader.load_external_data(&reader.get_entry(&path("2310231"), &key(1))?.data_address)?, b"deep");

            let mut manifest = Vec::new();
            reader.append_manifest(&mut manifest)?;
            assert!(manifest[0].current_path.ends_with(INDEX_HEADER_NAME));
            assert!(manifest.iter().any(|m| m.current_path.ends_with("bundle.0001")));
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_repeated_delete_is_a_no_op() {
    run_test(
        || create_test_context(),
        |ctx| {
            build_base(&ctx)?;
            let marker = ChannelledEntry::new(ExternalDataAddress::absent(), 0, 2);
            for _ in 0..2 {
                let mut delta: Writer<VectorBucket> = Writer::open_delta(ctx.index_dir(), &WriterConfig::new())?;
                delta.delete(&path("1302"), &marker)?;
                delta.delete(&path("1302"), &marker)?;
                delta.close()?;

                let reader: Reader<VectorBucket> = Reader::open(ctx.index_dir(), &ReaderConfig::new())?;
                assert!(reader.get_entry(&path("1302"), &key(2)).unwrap_err().is_not_found());
                assert!(reader.get_entry(&path("1302"), &key(1)).is_ok());
            }

            let traverser: Traverser<VectorBucket> = Traverser::open(ctx.index_dir(), &ReaderConfig::new())?;
            let counts: Vec<usize> = traverser.map(|v| v.map(|v| v.entries.len())).collect::<GeIndexResult<_>>()?;
            assert_eq!(counts, vec![2, 2, 1, 2]);
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_removing_every_entry_empties_the_index() {
    run_test(
        || create_test_context(),
        |ctx| {
            build_base(&ctx)?;
            let mut delta: Writer<VectorBucket> = Writer::open_delta(ctx.index_dir(), &WriterConfig::new())?;
            for p in ["", "1", "1302", "13022"] {
                for channel in [1, 2] {
                    delta.delete(&path(p), &ChannelledEntry::new(ExternalDataAddress::absent(), 0, channel))?;
                }
            }
            delta.close()?;

            let reader: Reader<VectorBucket> = Reader::open(ctx.index_dir(), &ReaderConfig::new())?;
            assert!(reader.header().root_entry_addr.is_null());
            assert!(reader.header().root_child_addr.is_null());
            let mut traverser: Traverser<VectorBucket> = Traverser::open(ctx.index_dir(), &ReaderConfig::new())?;
            assert!(traverser.next().is_none());
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}
