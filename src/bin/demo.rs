use bytes::Bytes;
use clap::Parser;
use rand::{distr::Uniform, prelude::*, rngs::StdRng};
use std::time::Instant;
use tablet::storage::{self, DataPath};
use tablet::{key, Builder, Compression, Options, Sink, ValueStruct};
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Builds tables out of generated keys and writes them into a directory.
#[derive(Parser)]
struct Args {
    /// Directory the tables are written to.
    #[clap(short, long, default_value = storage::DATA_PATH)]
    dir: String,

    #[clap(short, long, default_value = "200000")]
    entries: usize,

    #[clap(short, long, default_value = "4096")]
    block_size: usize,

    #[clap(short, long, default_value = "4194304")]
    table_size: u64,

    /// none, snappy (fast) or zstd (high-ratio).
    #[clap(short, long, default_value = "snappy")]
    compression: Compression,

    #[clap(long, default_value = "1")]
    zstd_level: i32,

    /// Zero disables the filter.
    #[clap(long, default_value = "0.01")]
    false_positive: f64,
}

fn main() -> tablet::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();

    let sink = storage::new(DataPath::Is(args.dir.clone()));
    sink.bootstrap()?;

    let opts = Options {
        block_size: args.block_size,
        table_size: args.table_size,
        compression: args.compression,
        zstd_level: args.zstd_level,
        bloom_false_positive: args.false_positive,
        ..Default::default()
    };

    let key_dist = Uniform::new_inclusive(8, 64)?;
    let val_dist = Uniform::new_inclusive(1, 512)?;
    let mut rng = StdRng::from_os_rng();

    let mut user_keys: Vec<Vec<u8>> = (0..args.entries)
        .map(|_| {
            (0..key_dist.sample(&mut rng))
                .map(|_| rng.random())
                .collect()
        })
        .collect();
    user_keys.sort();

    let started = Instant::now();
    let mut tables = 0;
    let mut written = 0;
    let mut builder = Builder::new(opts.clone())?;

    for (version, user_key) in user_keys.iter().enumerate() {
        let value = ValueStruct::new(Bytes::from(
            (0..val_dist.sample(&mut rng))
                .map(|_| rng.random())
                .collect::<Vec<u8>>(),
        ));

        builder.add(&key::key_with_ts(user_key, version as u64), &value, 0);

        if builder.reached_capacity() {
            let full = std::mem::replace(&mut builder, Builder::new(opts.clone())?);
            tables += 1;
            let data = full.done();
            data.write_to(&table_name(tables), &sink)?;
            written += data.size;
        }
    }

    if !builder.is_empty() {
        tables += 1;
        let data = builder.done();
        data.write_to(&table_name(tables), &sink)?;
        written += data.size;
    }

    info!(
        "{} tables, {} entries, {} bytes written to {} in {:?}",
        tables,
        args.entries,
        written,
        args.dir,
        started.elapsed()
    );

    Ok(())
}

fn table_name(n: usize) -> String {
    format!("{:06}.sst", n)
}
