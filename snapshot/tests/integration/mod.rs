#![cfg(feature = "test-utils")]

mod concurrency_test;
mod failure_test;
mod snapshot_test;
