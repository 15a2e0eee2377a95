//! Concurrent correctness stress harness.
//!
//! Writer threads insert disjoint shuffled key streams with value = key
//! while reader threads sample the whole key range. Every non-absent read
//! must return a value equal to its key, writers re-read the key they
//! inserted one step earlier, and a final pass verifies that every key
//! landed. Usage: `correctness <atomic|locked> <readers> <writers>`.
//! The atomic variant is single-writer by construction, so its writer
//! count is clamped to one; the sequential variant is rejected outright.

use std::env;
use std::process;
use std::sync::{Arc, Barrier};
use std::thread;

use log::warn;
use towermap::{LockedSkipList, SkipList, TowerError};

const MAX_KEY: i64 = 1_000_000;
const HEIGHT: usize = 22;

#[derive(Default)]
struct ThreadStats {
    writes: usize,
    reads: usize,
    validation_failures: usize,
}

/// The slice of the operation surface both concurrent variants share.
trait Index {
    fn put(&mut self, key: i64, value: i64);
    fn get(&self, key: i64) -> Option<i64>;
}

impl Index for SkipList<i64, i64> {
    fn put(&mut self, key: i64, value: i64) {
        self.upsert(key, value);
    }

    fn get(&self, key: i64) -> Option<i64> {
        self.find(&key)
    }
}

impl Index for &LockedSkipList<i64, i64> {
    fn put(&mut self, key: i64, value: i64) {
        self.upsert(key, value);
    }

    fn get(&self, key: i64) -> Option<i64> {
        self.find(&key)
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
        let program = args.first().map(String::as_str).unwrap_or("correctness");
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
    let barrier = Arc::new(Barrier::new(readers + 1));

    println!("Starting correctness run: 1 writer, {readers} readers, {MAX_KEY} keys");

    let (writer_stats, reader_stats) = thread::scope(|s| {
        let mut handles = Vec::new();
        for id in 0..readers {
            let reader = list.reader();
            let barrier = Arc::clone(&barrier);
            handles.push(s.spawn(move || reader_pass(id, barrier, move |key| reader.find(&key))));
        }

        let stream = writer_stream(0, 1);
        barrier.wait();
        let writer_stats = writer_pass(0, &mut list, &stream);
        let reader_stats: Vec<ThreadStats> =
            handles.into_iter().map(|handle| handle.join().unwrap()).collect();
        (vec![writer_stats], reader_stats)
    });

    let missing = verify_complete(|key| list.find(&key));
    report(&writer_stats, &reader_stats, missing);
    Ok(())
}

fn run_locked(readers: usize, writers: usize) -> Result<(), TowerError> {
    if writers == 0 {
        return Err(TowerError::Usage("need at least one writer".into()));
    }
    let list = LockedSkipList::with_height(HEIGHT)?;
    let barrier = Arc::new(Barrier::new(readers + writers));

    println!("Starting correctness run: {writers} writers, {readers} readers, {MAX_KEY} keys");

    let (writer_stats, reader_stats) = thread::scope(|s| {
        let mut writer_handles = Vec::new();
        for id in 0..writers {
            let list = &list;
            let barrier = Arc::clone(&barrier);
            writer_handles.push(s.spawn(move || {
                let stream = writer_stream(id, writers);
                barrier.wait();
                let mut index = list;
                writer_pass(id, &mut index, &stream)
            }));
        }
        let mut reader_handles = Vec::new();
        for id in 0..readers {
            let list = &list;
            let barrier = Arc::clone(&barrier);
            reader_handles.push(s.spawn(move || reader_pass(id, barrier, move |key| list.find(&key))));
        }

        let writer_stats: Vec<ThreadStats> =
            writer_handles.into_iter().map(|handle| handle.join().unwrap()).collect();
        let reader_stats: Vec<ThreadStats> =
            reader_handles.into_iter().map(|handle| handle.join().unwrap()).collect();
        (writer_stats, reader_stats)
    });

    let missing = verify_complete(|key| list.find(&key));
    report(&writer_stats, &reader_stats, missing);
    Ok(())
}

/// The shuffled keys a given writer owns: `id + 1, id + 1 + stride, ...`.
fn writer_stream(id: usize, stride: usize) -> Vec<i64> {
    let mut stream: Vec<i64> = ((id as i64 + 1)..=MAX_KEY)
        .step_by(stride)
        .collect();
    fastrand::shuffle(&mut stream);
    stream
}

/// Inserts the stream, re-reading the previous key after every insert.
fn writer_pass(id: usize, index: &mut impl Index, stream: &[i64]) -> ThreadStats {
    let mut stats = ThreadStats::default();
    let mut previous: Option<i64> = None;
    for &key in stream {
        index.put(key, key);
        stats.writes += 1;
        if let Some(prev) = previous {
            stats.reads += 1;
            match index.get(prev) {
                Some(value) if value == prev => {}
                other => {
                    stats.validation_failures += 1;
                    warn!("writer {id}: key {prev} read back as {other:?}");
                }
            }
        }
        previous = Some(key);
    }
    stats
}

/// One shuffled pass over the whole key range; a hit must equal its key.
fn reader_pass(
    id: usize,
    barrier: Arc<Barrier>,
    find: impl Fn(i64) -> Option<i64>,
) -> ThreadStats {
    let mut sequence: Vec<i64> = (1..=MAX_KEY).collect();
    fastrand::shuffle(&mut sequence);
    barrier.wait();

    let mut stats = ThreadStats::default();
    for key in sequence {
        stats.reads += 1;
        if let Some(value) = find(key) {
            if value != key {
                stats.validation_failures += 1;
                warn!("reader {id}: key {key} returned {value}");
            }
        }
    }
    stats
}

/// Post-quiescence check that every key is present with its own value.
fn verify_complete(find: impl Fn(i64) -> Option<i64>) -> usize {
    (1..=MAX_KEY)
        .filter(|&key| find(key) != Some(key))
        .count()
}

fn report(writer_stats: &[ThreadStats], reader_stats: &[ThreadStats], missing: usize) {
    println!("\nTest results");
    println!("============");
    let mut total_writes = 0;
    let mut total_reads = 0;
    let mut total_failures = 0;
    for (id, stats) in writer_stats.iter().enumerate() {
        println!(
            "Writer {id}: {} writes, {} reads, {} validation failures",
            stats.writes, stats.reads, stats.validation_failures
        );
        total_writes += stats.writes;
        total_reads += stats.reads;
        total_failures += stats.validation_failures;
    }
    for (id, stats) in reader_stats.iter().enumerate() {
        println!(
            "Reader {id}: {} reads, {} validation failures",
            stats.reads, stats.validation_failures
        );
        total_reads += stats.reads;
        total_failures += stats.validation_failures;
    }

    println!("\nOverall: {total_writes} writes, {total_reads} reads, {total_failures} validation failures");
    if missing > 0 {
        println!("FAILURE: {missing} keys absent or wrong after quiescence");
    }
    if total_failures > 0 || missing > 0 {
        println!("WARNING: the run detected inconsistencies");
        process::exit(1);
    }
    println!("SUCCESS: no validation failures detected");
}
