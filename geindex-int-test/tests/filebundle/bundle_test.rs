use geindex::config::FileBundleConfig;
use geindex::errors::GeIndexError;
use geindex::filebundle::{FileBundleReader, FileBundleUpdateWriter, FileBundleWriter, CRC_SIZE};
use geindex_int_test::test_util::{cleanup, create_test_context, flip_bit, run_test};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

fn framed(payload: &[u8]) -> Vec<u8> {
    let mut record = payload.to_vec();
    record.extend_from_slice(&[0u8; CRC_SIZE]);
    record
}

#[test]
fn test_crc_records_round_trip_across_segments() {
    run_test(
        || create_test_context(),
        |ctx| {
            let dir = ctx.bundle_dir("records");
            let config = FileBundleConfig::new().with_segment_break(1024);
            let writer = FileBundleWriter::create(&dir, config)?;

            let mut rng = StdRng::seed_from_u64(1);
            let mut records = Vec::new();
            for _ in 0..200 {
                let len = rng.gen_range(1..300);
                let payload: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
                let mut record = framed(&payload);
                let position = writer.write_append_crc(&mut record)?;
                records.push((position, payload));
            }
            assert!(writer.segment_count() > 1);
            writer.close()?;

            let reader = FileBundleReader::open(&dir)?;
            for (position, payload) in &records {
                // no record ever straddles a segment boundary
                assert!(position % 1024 + (payload.len() + CRC_SIZE) as u64 <= 1024);
                assert_eq!(&reader.read_at_crc(*position, payload.len() + CRC_SIZE)?, payload);
            }
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_single_bit_flips_are_detected() {
    run_test(
        || create_test_context(),
        |ctx| {
            let dir = ctx.bundle_dir("flips");
            let writer = FileBundleWriter::create(&dir, FileBundleConfig::new())?;
            let payload = b"quadtree node payload".to_vec();
            let position = writer.write_append_crc(&mut framed(&payload))?;
            writer.close()?;

            let segment = dir.join("bundle.0000");
            let record_len = (payload.len() + CRC_SIZE) as u64;
            let mut rng = StdRng::seed_from_u64(99);
            for _ in 0..16 {
                let offset = position + rng.gen_range(0..record_len);
                let bit = rng.gen_range(0..8u8);
                flip_bit(&segment, offset, bit)?;
                let reader = FileBundleReader::open(&dir)?;
                let err = reader.read_at_crc(position, record_len as usize).unwrap_err();
                assert!(err.is_corruption());
                flip_bit(&segment, offset, bit)?;
            }

            let reader = FileBundleReader::open(&dir)?;
            assert_eq!(reader.read_at_crc(position, record_len as usize)?, payload);
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_segment_boundaries_are_enforced() {
    run_test(
        || create_test_context(),
        |ctx| {
            let dir = ctx.bundle_dir("bounds");
            let writer = FileBundleWriter::create(&dir, FileBundleConfig::new().with_segment_break(256))?;

            assert!(matches!(writer.allocate(257), Err(GeIndexError::Capacity(_))));
            let first = writer.allocate(200)?;
            let second = writer.allocate(100)?;
            assert_eq!(first, 0);
            assert_eq!(second, 256);

            assert!(matches!(writer.write_at(250, &[0u8; 10]), Err(GeIndexError::Write(_))));
            assert!(matches!(writer.write_at(200, &[0u8; 10]), Err(GeIndexError::Write(_))));
            writer.write_at(first, &[7u8; 200])?;
            writer.write_at(second, &[8u8; 100])?;
            writer.close()?;

            let reader = FileBundleReader::open(&dir)?;
            assert_eq!(reader.segment_count(), 2);
            assert_eq!(reader.data_size(), 300);
            let mut buf = [0u8; 100];
            reader.read_at(second, &mut buf)?;
            assert_eq!(buf, [8u8; 100]);
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_update_writer_appends_into_fresh_segment() {
    run_test(
        || create_test_context(),
        |ctx| {
            let dir = ctx.bundle_dir("update");
            let config = FileBundleConfig::new().with_segment_break(4096);
            let writer = FileBundleWriter::create(&dir, config.clone())?;
            let old = writer.write_append(b"original")?;
            writer.close()?;

            let updater = FileBundleUpdateWriter::open(&dir, config)?;
            assert!(matches!(updater.write_at(old, b"replaced"), Err(GeIndexError::Write(_))));
            let new = updater.write_append(b"appended")?;
            assert_eq!(new, 4096);
            updater.close()?;

            let reader = FileBundleReader::open(&dir)?;
            let mut buf = [0u8; 8];
            reader.read_at(old, &mut buf)?;
            assert_eq!(&buf, b"original");
            reader.read_at(new, &mut buf)?;
            assert_eq!(&buf, b"appended");

            let mut manifest = Vec::new();
            reader.append_manifest(&mut manifest)?;
            let names: Vec<String> = manifest
                .iter()
                .map(|m| m.current_path.file_name().unwrap().to_string_lossy().into_owned())
                .collect();
            assert_eq!(names, vec!["bundle.hdr", "bundle.0000", "bundle.0001"]);
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}
