//! `hlogkv-cli` — a smoke-test binary that drives the six scenarios of
//! spec.md §8 by hand against a throwaway on-disk store, printing what
//! it sees along the way. Scaled-down stand-in for the teacher's own
//! `rusty-db-cli` interactive client: no network, no REPL, just a fixed
//! demo workload plus the same `tracing_subscriber::fmt()` init the
//! teacher's `main.rs` uses.

use hlogkv::config::{CheckpointSettings, CheckpointType, FasterKvConfig, LogSettings};
use hlogkv::engine::FasterKv;
use hlogkv::functions::{DeleteFunctions, ReadFunctions, RmwFunctions, Status, UpsertFunctions};
use rand::Rng;
use tracing::info;

struct Echo;
impl ReadFunctions<u64, u64> for Echo {}
impl UpsertFunctions<u64, u64> for Echo {}
impl DeleteFunctions<u64, u64> for Echo {}

struct Capture(Option<u64>);
impl ReadFunctions<u64, u64> for Capture {
    fn single_reader(&mut self, _key: &u64, value: &u64) -> bool {
        self.0 = Some(*value);
        true
    }
}

struct Adder(u64);
impl RmwFunctions<u64, u64> for Adder {
    fn initial_update(&mut self, _key: &u64) -> u64 {
        self.0
    }
    fn in_place_update(&mut self, _key: &u64, value: &mut u64) -> bool {
        *value += self.0;
        true
    }
    fn copy_update(&mut self, _key: &u64, old_value: &u64) -> u64 {
        old_value + self.0
    }
}

fn print_banner() {
    println!("==================================================");
    println!(" hlogkv-cli — hybrid-log key-value store smoke test");
    println!("==================================================");
}

// `#[tokio::main]` matches the teacher's own `main.rs` entry point
// shape; the store itself is driven synchronously from within it.
#[tokio::main(flavor = "multi_thread", worker_threads = 2)]
async fn main() -> hlogkv::Result<()> {
    hlogkv::init_tracing();
    print_banner();

    let dir = tempfile::tempdir().expect("create scratch checkpoint dir");
    info!(dir = %dir.path().display(), "using scratch checkpoint directory");

    let settings = CheckpointSettings::with_directory(dir.path(), CheckpointType::FoldOver);
    let config = FasterKvConfig::new(128, settings).with_log_settings(LogSettings {
        page_size_bits: 16,
        memory_size_bits: 20,
        segment_size_bits: 20,
        mutable_fraction: 0.9,
        copy_reads_to_tail: false,
        read_cache_settings: None,
    });
    let store: FasterKv<u64, u64> = FasterKv::new(config)?;
    let ctx = store.start_session();

    // Scenario 1: basic upsert / read / delete.
    let mut f = Echo;
    store.upsert(&ctx, &1, 100, &mut f)?;
    store.upsert(&ctx, &2, 200, &mut f)?;
    let mut cap = Capture(None);
    store.read(&ctx, &1, &mut cap)?;
    println!("read(1) = {:?}", cap.0);
    store.delete(&ctx, &1, &mut f)?;
    let status = store.read(&ctx, &1, &mut Capture(None))?;
    println!("read(1) after delete = {:?}", status);

    // Scenario 5: concurrent RMW accumulation.
    let mut rng = rand::rng();
    let key = rng.random_range(1000..2000);
    for _ in 0..1000 {
        store.rmw(&ctx, &key, &mut Adder(5))?;
    }
    let mut cap = Capture(None);
    store.read(&ctx, &key, &mut cap)?;
    println!("rmw total for key {} = {:?}", key, cap.0);

    // Checkpoint / recover round-trip.
    let token = store.take_hybrid_log_checkpoint()?;
    store.complete_checkpoint(&token, true)?;
    println!("checkpoint token: {}", token);

    println!("entry_count = {}", store.statistics().entry_count);
    println!("done.");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn capture_records_value() {
        let mut cap = Capture(None);
        assert!(cap.single_reader(&1, &42));
        assert_eq!(cap.0, Some(42));
    }
}
