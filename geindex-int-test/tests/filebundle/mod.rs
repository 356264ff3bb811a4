//! File bundle integration tests: records, segments, block cache and pack
//! import exercised through the public API only.

mod bundle_test;
mod cached_read_test;
mod pack_import_test;
