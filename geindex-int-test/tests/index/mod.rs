//! Index integration tests covering writers, readers and traversers over
//! real bundles on disk.

mod blend_test;
mod corruption_test;
mod delta_test;
mod end_to_end_test;
mod merge_test;
