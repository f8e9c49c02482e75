//! ShardCache Load Generator
//!
//! Drives a store with concurrent writers and readers, shuts it down, and
//! verifies that every write reached the container files.

use std::path::PathBuf;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use clap::Parser;
use crossbeam::channel::RecvTimeoutError;
use rand::Rng;
use shardcache::container::{list_container_files, read_file_records};
use shardcache::signal::ShutdownSignal;
use shardcache::{Config, Field, FieldType, InMemDataStore, Record, Schema};
use tracing_subscriber::{fmt, EnvFilter};

const ID_FIELD: &str = "id";
const TIMESTAMP_FIELD: &str = "collection_time";
const ID_PREFIX: &str = "sensor";
const METRIC_DBL_PREFIX: &str = "metricdbl";
const METRIC_STR_PREFIX: &str = "metricstr";

/// ShardCache load generator
#[derive(Parser, Debug)]
#[command(name = "shardcache-loadgen")]
#[command(about = "Concurrent write/read load against a sharded write-behind cache")]
#[command(version)]
struct Args {
    /// Directory receiving the container files (recreated on start)
    #[arg(short, long, default_value = "./shardcache_data")]
    output_dir: PathBuf,

    /// Number of cache shards
    #[arg(long, default_value = "16")]
    shards: usize,

    /// Number of persister workers
    #[arg(short, long, default_value = "16")]
    persisters: usize,

    /// Persistence queue capacity
    #[arg(short, long, default_value = "2048")]
    queue_capacity: usize,

    /// Number of writer threads
    #[arg(short, long, default_value = "40")]
    writers: usize,

    /// Writes issued by each writer
    #[arg(long, default_value = "2400")]
    writes_per_writer: usize,

    /// Number of reader threads
    #[arg(short, long, default_value = "40")]
    readers: usize,

    /// Milliseconds each reader sleeps between reads
    #[arg(long, default_value = "2")]
    reader_sleep_ms: u64,

    /// Size of the key space (sensor0..sensorN)
    #[arg(short, long, default_value = "200")]
    keys: usize,

    /// Number of metricdbl and metricstr fields per record
    #[arg(short, long, default_value = "4")]
    metric_fields: usize,
}

fn main() {
    // Initialize tracing/logging
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,shardcache=debug"));

    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(true)
        .init();

    let args = Args::parse();

    tracing::info!("ShardCache load generator v{}", shardcache::VERSION);
    tracing::info!("Output directory: {}", args.output_dir.display());

    match run(&args) {
        Ok(true) => tracing::info!("Verification passed"),
        Ok(false) => {
            tracing::error!("Verification failed");
            std::process::exit(2);
        }
        Err(e) => {
            tracing::error!("Load generator error: {}", e);
            std::process::exit(1);
        }
    }
}

fn run(args: &Args) -> shardcache::Result<bool> {
    if args.output_dir.exists() {
        std::fs::remove_dir_all(&args.output_dir)?;
    }

    let config = Config::builder()
        .num_shards(args.shards)
        .num_persisters(args.persisters)
        .queue_capacity(args.queue_capacity)
        .timestamp_field(TIMESTAMP_FIELD)
        .schema(metrics_schema(args.metric_fields)?)
        .output_dir(&args.output_dir)
        .build();

    let store = Arc::new(InMemDataStore::open(config)?);
    store.start()?;

    let key_space: Arc<Vec<String>> =
        Arc::new((0..args.keys.max(1)).map(|i| format!("{}{}", ID_PREFIX, i)).collect());
    let started = Instant::now();

    // Readers run until the writers are done
    let readers_signal = ShutdownSignal::new();
    let readers: Vec<_> = (0..args.readers)
        .map(|id| {
            let store = Arc::clone(&store);
            let keys = Arc::clone(&key_space);
            let listener = readers_signal.listener();
            let sleep = Duration::from_millis(args.reader_sleep_ms);
            thread::spawn(move || {
                let mut rng = rand::thread_rng();
                let (mut hits, mut misses) = (0u64, 0u64);
                loop {
                    match listener.receiver().recv_timeout(sleep) {
                        Err(RecvTimeoutError::Timeout) => {}
                        _ => break,
                    }
                    let key = &keys[rng.gen_range(0..keys.len())];
                    match store.get(key) {
                        Ok(Some(_)) => hits += 1,
                        Ok(None) => misses += 1,
                        Err(e) => tracing::warn!(reader_id = id, "Read failed: {}", e),
                    }
                }
                tracing::debug!(reader_id = id, hits, misses, "Reader exiting");
            })
        })
        .collect();

    let writers: Vec<_> = (0..args.writers)
        .map(|id| {
            let store = Arc::clone(&store);
            let keys = Arc::clone(&key_space);
            let writes = args.writes_per_writer;
            let metric_fields = args.metric_fields;
            thread::spawn(move || -> shardcache::Result<u64> {
                let mut rng = rand::thread_rng();
                let mut applied = 0;
                for _ in 0..writes {
                    let key = &keys[rng.gen_range(0..keys.len())];
                    let record = generate_record(&mut rng, key, metric_fields);
                    if store.put(key, record)? {
                        applied += 1;
                    }
                }
                tracing::debug!(writer_id = id, writes, applied, "Writer finished");
                Ok(applied)
            })
        })
        .collect();

    let mut applied_total = 0;
    for writer in writers {
        match writer.join() {
            Ok(result) => applied_total += result?,
            Err(_) => tracing::error!("Writer thread panicked"),
        }
    }
    readers_signal.cancel();
    for reader in readers {
        if reader.join().is_err() {
            tracing::error!("Reader thread panicked");
        }
    }

    let elapsed = started.elapsed();
    let cached = store.get_all().len();
    let expected = (args.writers * args.writes_per_writer) as u64;
    tracing::info!(
        writes = expected,
        applied = applied_total,
        cached_keys = cached,
        elapsed_ms = elapsed.as_millis() as u64,
        "Writers finished"
    );

    store.shutdown()?;

    let snapshot_file = format!("{}.rec", store.config().snapshot_name);
    let mut persisted = 0u64;
    let mut snapshot = 0u64;
    for path in list_container_files(store.output_dir())? {
        let count = read_file_records(&path)?.len() as u64;
        if path.file_name().is_some_and(|n| n == snapshot_file.as_str()) {
            snapshot = count;
        } else {
            persisted += count;
        }
    }

    tracing::info!(persisted, expected, snapshot, cached_keys = cached, "Durable record counts");
    Ok(persisted == expected && snapshot == cached as u64)
}

fn metrics_schema(metric_fields: usize) -> shardcache::Result<Schema> {
    let mut fields = vec![
        Field::new(ID_FIELD, FieldType::String),
        Field::new(TIMESTAMP_FIELD, FieldType::Long),
    ];
    for i in 1..=metric_fields {
        fields.push(Field::new(format!("{}{}", METRIC_DBL_PREFIX, i), FieldType::Double));
    }
    for i in 1..=metric_fields {
        fields.push(Field::new(format!("{}{}", METRIC_STR_PREFIX, i), FieldType::String));
    }
    Schema::new("metrics", fields)
}

fn generate_record<R: Rng>(rng: &mut R, key: &str, metric_fields: usize) -> Record {
    let mut record = Record::new()
        .with(ID_FIELD, key)
        .with(TIMESTAMP_FIELD, unix_nanos());
    for i in 1..=metric_fields {
        record.insert(format!("{}{}", METRIC_DBL_PREFIX, i), rng.gen_range(0.01..1e12));
    }
    for i in 1..=metric_fields {
        let hex: String = (0..8).map(|_| format!("{:016x}", rng.gen::<u64>())).collect();
        record.insert(format!("{}{}", METRIC_STR_PREFIX, i), hex);
    }
    record
}

fn unix_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as i64)
        .unwrap_or(0)
}
