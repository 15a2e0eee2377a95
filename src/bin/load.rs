//! Concurrent throughput and latency harness.
//!
//! Pre-populates the index, then hammers it with random reads and writes
//! for a fixed duration, recording per-operation latencies. Prints total
//! throughput and the read-latency percentile table.
//! Usage: `load <atomic|locked> <readers> <writers>`. The atomic variant
//! runs exactly one writer; the sequential variant is rejected.

use std::env;
use std::hint::black_box;
use std::process;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::{Duration, Instant};

use log::{info, warn};
use towermap::{LockedSkipList, SkipList, TowerError};

const INITIAL_SIZE: i64 = 100_000;
const KEY_SPACE: i64 = 1_000_000;
const HEIGHT: usize = 22;
const RUN_FOR: Duration = Duration::from_secs(10);

struct ThreadStats {
    operations: usize,
    total_latency_ns: u64,
    latencies: Vec<u64>,
}

impl ThreadStats {
    fn new() -> Self {
        ThreadStats {
            operations: 0,
            total_latency_ns: 0,
            latencies: Vec::with_capacity(1 << 20),
        }
    }

    fn record(&mut self, elapsed: Duration) {
        let nanos = elapsed.as_nanos() as u64;
        self.operations += 1;
        self.total_latency_ns += nanos;
        self.latencies.push(nanos);
    }

    fn finalize(&mut self) {
        self.latencies.sort_unstable();
    }

    fn throughput(&self, duration: Duration) -> f64 {
        self.operations as f64 / duration.as_secs_f64()
    }

    /// Requires `finalize` to have sorted the samples.
    fn percentile(&self, p: f64) -> u64 {
        if self.latencies.is_empty() {
            return 0;
        }
        let index = (p * (self.latencies.len() - 1) as f64) as usize;
        self.latencies[index]
    }
}

fn main() {
    env_logger::init();
    if let Err(err) = run() {
        eprintln!("{err}");
        process::exit(2);
    }
}

fn run() -> Result<(), TowerError> {
    let args: Vec<String> = env::args().collect();
    if args.len() != 4 {
        let program = args.first().map(String::as_str).unwrap_or("load");
        return Err(TowerError::Usage(format!(
            "usage: {program} <atomic|locked> <readers> <writers>"
        )));
    }
    let readers = parse_count(&args[2])?;
    let writers = parse_count(&args[3])?;
    match args[1].as_str() {
        "seq" => Err(TowerError::Usage(
            "the sequential variant cannot run a concurrent workload".into(),
        )),
        "atomic" => run_atomic(readers, writers),
        "locked" => run_locked(readers, writers),
        other => Err(TowerError::UnknownVariant(other.to_string())),
    }
}

fn parse_count(raw: &str) -> Result<usize, TowerError> {
    raw.parse()
        .map_err(|_| TowerError::Usage(format!("thread count {raw:?} is not a number")))
}

fn run_atomic(readers: usize, writers: usize) -> Result<(), TowerError> {
    if writers != 1 {
        warn!("the atomic variant is single-writer; running with 1 writer instead of {writers}");
    }
    let mut list = SkipList::with_height(HEIGHT)?;
    info!("initializing with {INITIAL_SIZE} keys");
    for key in 0..INITIAL_SIZE {
        list.upsert(key, key);
    }

    println!("Starting load run: 1 writer, {readers} readers, {}s", RUN_FOR.as_secs());

    let running = Arc::new(AtomicBool::new(true));
    let barrier = Arc::new(Barrier::new(readers + 1));
    let mut reader_stats = Vec::new();
    let mut writer_stats = Vec::new();

    thread::scope(|s| {
        let mut handles = Vec::new();
        for _ in 0..readers {
            let reader = list.reader();
            let running = Arc::clone(&running);
            let barrier = Arc::clone(&barrier);
            handles.push(s.spawn(move || {
                barrier.wait();
                let mut stats = ThreadStats::new();
                while running.load(Ordering::Relaxed) {
                    let key = fastrand::i64(0..KEY_SPACE);
                    let start = Instant::now();
                    black_box(reader.find(&key));
                    stats.record(start.elapsed());
                }
                stats
            }));
        }

        let writer_handle = {
            let running = Arc::clone(&running);
            let barrier = Arc::clone(&barrier);
            let mut list = list;
            s.spawn(move || {
                barrier.wait();
                let mut stats = ThreadStats::new();
                while running.load(Ordering::Relaxed) {
                    let key = fastrand::i64(0..KEY_SPACE);
                    let value = fastrand::i64(..);
                    let start = Instant::now();
                    list.upsert(key, value);
                    stats.record(start.elapsed());
                }
                stats
            })
        };

        thread::sleep(RUN_FOR);
        running.store(false, Ordering::Relaxed);

        reader_stats = handles.into_iter().map(|handle| handle.join().unwrap()).collect();
        writer_stats = vec![writer_handle.join().unwrap()];
    });

    report(&mut reader_stats, &mut writer_stats);
    Ok(())
}

fn run_locked(readers: usize, writers: usize) -> Result<(), TowerError> {
    if writers == 0 {
        return Err(TowerError::Usage("need at least one writer".into()));
    }
    let list = LockedSkipList::with_height(HEIGHT)?;
    info!("initializing with {INITIAL_SIZE} keys");
    for key in 0..INITIAL_SIZE {
        list.upsert(key, key);
    }

    println!(
        "Starting load run: {writers} writers, {readers} readers, {}s",
        RUN_FOR.as_secs()
    );

    let running = Arc::new(AtomicBool::new(true));
    let barrier = Arc::new(Barrier::new(readers + writers));
    let mut reader_stats = Vec::new();
    let mut writer_stats = Vec::new();

    thread::scope(|s| {
        let mut reader_handles = Vec::new();
        for _ in 0..readers {
            let list = &list;
            let running = Arc::clone(&running);
            let barrier = Arc::clone(&barrier);
            reader_handles.push(s.spawn(move || {
                barrier.wait();
                let mut stats = ThreadStats::new();
                while running.load(Ordering::Relaxed) {
                    let key = fastrand::i64(0..KEY_SPACE);
                    let start = Instant::now();
                    black_box(list.find(&key));
                    stats.record(start.elapsed());
                }
                stats
            }));
        }
        let mut writer_handles = Vec::new();
        for _ in 0..writers {
            let list = &list;
            let running = Arc::clone(&running);
            let barrier = Arc::clone(&barrier);
            writer_handles.push(s.spawn(move || {
                barrier.wait();
                let mut stats = ThreadStats::new();
                while running.load(Ordering::Relaxed) {
                    let key = fastrand::i64(0..KEY_SPACE);
                    let value = fastrand::i64(..);
                    let start = Instant::now();
                    list.upsert(key, value);
                    stats.record(start.elapsed());
                }
                stats
            }));
        }

        thread::sleep(RUN_FOR);
        running.store(false, Ordering::Relaxed);

        reader_stats = reader_handles.into_iter().map(|handle| handle.join().unwrap()).collect();
        writer_stats = writer_handles.into_iter().map(|handle| handle.join().unwrap()).collect();
    });

    report(&mut reader_stats, &mut writer_stats);
    Ok(())
}

fn report(reader_stats: &mut [ThreadStats], writer_stats: &mut [ThreadStats]) {
    for stats in reader_stats.iter_mut().chain(writer_stats.iter_mut()) {
        stats.finalize();
    }

    let read_throughput: f64 = reader_stats.iter().map(|s| s.throughput(RUN_FOR)).sum();
    let write_throughput: f64 = writer_stats.iter().map(|s| s.throughput(RUN_FOR)).sum();

    println!("\nOverall results");
    println!("===============");
    println!("Total read throughput:  {read_throughput:.2} ops/sec");
    println!("Total write throughput: {write_throughput:.2} ops/sec");

    let mut combined: Vec<u64> = reader_stats
        .iter()
        .flat_map(|s| s.latencies.iter().copied())
        .collect();
    combined.sort_unstable();
    let total_ops: usize = reader_stats.iter().map(|s| s.operations).sum();
    let total_ns: u64 = reader_stats.iter().map(|s| s.total_latency_ns).sum();
    let average = if total_ops > 0 { total_ns as f64 / total_ops as f64 } else { 0.0 };
    let pct = |p: f64| -> u64 {
        if combined.is_empty() {
            return 0;
        }
        combined[(p * (combined.len() - 1) as f64) as usize]
    };

    println!("\nRead latency statistics (ns)");
    println!("============================");
    println!("Average:     {average:.2}");
    println!("50th %ile:   {}", pct(0.50));
    println!("75th %ile:   {}", pct(0.75));
    println!("90th %ile:   {}", pct(0.90));
    println!("95th %ile:   {}", pct(0.95));
    println!("99th %ile:   {}", pct(0.99));
    println!("99.9th %ile: {}", pct(0.999));

    println!("\nPer-reader thread stats:");
    for (id, stats) in reader_stats.iter().enumerate() {
        println!(
            "Reader {id}: {:.2} ops/sec, p50: {} ns, p99: {} ns",
            stats.throughput(RUN_FOR),
            stats.percentile(0.50),
            stats.percentile(0.99)
        );
    }
    println!("\nPer-writer thread stats:");
    for (id, stats) in writer_stats.iter().enumerate() {
        println!(
            "Writer {id}: {:.2} ops/sec, p50: {} ns, p99: {} ns",
            stats.throughput(RUN_FOR),
            stats.percentile(0.50),
            stats.percentile(0.99)
        );
    }
}
