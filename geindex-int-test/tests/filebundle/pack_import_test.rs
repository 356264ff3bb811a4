use geindex::errors::GeIndexError;
use geindex::filebundle::FileBundlePackImport;
use geindex_int_test::test_util::{cleanup, create_test_context, run_test};

#[test]
fn test_legacy_packs_read_as_one_bundle() {
    run_test(
        || create_test_context(),
        |ctx| {
            let packs: Vec<_> = [300usize, 1000, 17]
                .iter()
                .enumerate()
                .map(|(i, len)| {
                    let path = ctx.path().join(format!("pack.{}", i));
                    std::fs::write(&path, vec![i as u8 + 1; *len]).map(|_| path)
                })
                .collect::<Result<_, std::io::Error>>()?;

            let import = FileBundlePackImport::open(&packs, None)?;
            assert_eq!(import.segment_break(), 1024);
            assert_eq!(import.segment_count(), 3);
            assert_eq!(import.pack_files().len(), 3);

            for (i, len) in [300u64, 1000, 17].iter().enumerate() {
                let position = import.position_for(i as u32, len - 1)?;
                assert_eq!(import.pack_address(position), (i as u32, len - 1));
                let mut byte = [0u8; 1];
                import.read_at(position, &mut byte)?;
                assert_eq!(byte[0], i as u8 + 1);
            }

            let beyond = import.position_for(2, 17)?;
            let mut byte = [0u8; 1];
            assert!(import.read_at(beyond, &mut byte).is_err());
            assert!(import.position_for(3, 0).unwrap_err().is_not_found());

            let wide = FileBundlePackImport::open(&packs, Some(1 << 20))?;
            assert_eq!(wide.position_for(1, 5)?, (1 << 20) + 5);
            assert!(matches!(
                FileBundlePackImport::open(&packs, Some(512)),
                Err(GeIndexError::Usage(_))
            ));
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}
