use geindex::buckets::{CombinedTmeshBucket, UnifiedBucket};
use geindex::config::{ReaderConfig, WriterConfig};
use geindex::entries::{AllInfoEntry, ExternalDataAddress, SimpleInsetEntry, TypedEntry, TypedEntryType};
use geindex::errors::GeIndexError;
use geindex::merge::{collect, Merge, MergeSource};
use geindex::{AdaptingTraverser, GeIndexResult, QuadtreePath, Traverser, TraverserValue, Writer};
use geindex_int_test::test_util::{cleanup, create_test_context, is_sorted, path, run_test};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeSet;
use std::path::Path;

fn random_paths(rng: &mut StdRng, count: usize) -> BTreeSet<QuadtreePath> {
    let mut paths = BTreeSet::new();
    while paths.len() < count {
        let level = rng.gen_range(0..=10);
        let quadrants: Vec<u8> = (0..level).map(|_| rng.gen_range(0..4)).collect();
        if let Ok(p) = QuadtreePath::from_quadrants(&quadrants) {
            paths.insert(p);
        }
    }
    paths
}

fn write_index(dir: &Path, paths: &BTreeSet<QuadtreePath>, tag: u32) -> GeIndexResult<()> {
    let mut writer: Writer<CombinedTmeshBucket> = Writer::create(dir, vec![], &WriterConfig::new())?;
    for p in paths {
        writer.put(p, SimpleInsetEntry::new(ExternalDataAddress::new(u64::from(tag), 0, 8), 1, tag as u16))?;
    }
    writer.close()
}

#[test]
fn test_merged_traversers_yield_sorted_union() {
    run_test(
        || create_test_context(),
        |ctx| {
            let mut rng = StdRng::seed_from_u64(4242);
            let mut merge: Merge<TraverserValue<SimpleInsetEntry>> = Merge::new();
            let mut expected = Vec::new();
            for tag in 0..4u32 {
                let paths = random_paths(&mut rng, 150);
                let dir = ctx.bundle_dir(&format!("index.{}", tag));
                write_index(&dir, &paths, tag)?;
                expected.extend(paths.iter().map(|p| (*p, tag)));
                merge.add_source(Box::new(Traverser::<CombinedTmeshBucket>::open(&dir, &ReaderConfig::new())?));
            }
            assert_eq!(merge.active_sources(), 4);
            expected.sort();

            let values = collect(&mut merge)?;
            let found: Vec<(QuadtreePath, u32)> = values
                .iter()
                .map(|v| (v.path, u32::from(v.entries[0].inset_id)))
                .collect();
            assert_eq!(found, expected);
            assert!(is_sorted(values.iter().map(|v| v.path)));
            assert_eq!(merge.active_sources(), 0);
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_adapted_traversers_of_different_kinds_merge() {
    run_test(
        || create_test_context(),
        |ctx| {
            let imagery = ctx.bundle_dir("imagery");
            let paths: BTreeSet<_> = ["", "03", "0312", "2"].iter().map(|p| path(p)).collect();
            write_index(&imagery, &paths, 7)?;

            let unified = ctx.bundle_dir("unified");
            let mut writer: Writer<UnifiedBucket> = Writer::create(&unified, vec![], &WriterConfig::new())?;
            for p in ["03", "1"] {
                writer.put(
                    &path(p),
                    TypedEntry::new(ExternalDataAddress::new(0, 0, 8), 2, 5, TypedEntryType::Terrain),
                )?;
            }
            writer.close()?;

            let mut merge: Merge<TraverserValue<AllInfoEntry>> = Merge::new();
            let left: Traverser<CombinedTmeshBucket> = Traverser::open(&imagery, &ReaderConfig::new())?;
            merge.add_source(Box::new(AdaptingTraverser::<AllInfoEntry, _>::new(left, TypedEntryType::Imagery, 0)));
            let right: Traverser<UnifiedBucket> = Traverser::open(&unified, &ReaderConfig::new())?;
            merge.add_source(Box::new(AdaptingTraverser::<AllInfoEntry, _>::new(right, TypedEntryType::Imagery, 0)));

            let mut kinds = Vec::new();
            while let Some(value) = merge.current() {
                kinds.push((value.path.to_string(), value.entries[0].entry_type));
                merge.advance()?;
            }
            assert_eq!(
                kinds,
                vec![
                    ("<root>".to_string(), TypedEntryType::Imagery),
                    ("03".to_string(), TypedEntryType::Imagery),
                    ("03".to_string(), TypedEntryType::Terrain),
                    ("0312".to_string(), TypedEntryType::Imagery),
                    ("1".to_string(), TypedEntryType::Terrain),
                    ("2".to_string(), TypedEntryType::Imagery),
                ]
            );
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}

#[test]
fn test_out_of_order_put_is_rejected() {
    run_test(
        || create_test_context(),
        |ctx| {
            let mut writer: Writer<CombinedTmeshBucket> =
                Writer::create(ctx.index_dir(), vec![], &WriterConfig::new())?;
            let entry = SimpleInsetEntry::new(ExternalDataAddress::new(0, 0, 8), 1, 0);
            writer.put(&path("012"), entry)?;
            writer.put(&path("012"), entry)?;
            writer.put(&path("0123"), entry)?;
            let err = writer.put(&path("01"), entry).unwrap_err();
            assert!(matches!(err, GeIndexError::OrderViolation { .. }));
            // the writer stays usable for later paths
            writer.put(&path("1"), entry)?;
            writer.close()?;

            let traverser: Traverser<CombinedTmeshBucket> = Traverser::open(ctx.index_dir(), &ReaderConfig::new())?;
            let found: Vec<String> = traverser.map(|v| v.map(|v| v.path.to_string())).collect::<GeIndexResult<_>>()?;
            assert_eq!(found, vec!["012", "0123", "1"]);
            Ok(())
        },
        |ctx| cleanup(ctx),
    )
}
