use clap::Parser;
use packscan_storage::prelude::*;
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use std::path::PathBuf;
use std::time::{Duration, Instant};

fn main() {
    env_logger::init();
    let args = Args::parse();
    let width = CodeWidth::new(args.width).expect("invalid code width");
    let mut rng = ChaCha8Rng::seed_from_u64(args.seed);
    let values: Vec<u32> = (0..args.rows)
        .map(|_| rng.random_range(0..=width.value_mask()))
        .collect();
    let col = PackedColumn::new(&values, width).unwrap();
    println!(
        "column: rows={}, width={}, bytes={}, simd={}",
        col.len(),
        width.bits(),
        col.buf().len(),
        SimdLevel::detect()
    );

    if let Some(path) = &args.config {
        let s = std::fs::read_to_string(path).expect("read config file");
        let scanner = ScanConfig::from_toml(&s).unwrap().build().unwrap();
        let start = Instant::now();
        let decoded = scanner.decode(&col).unwrap();
        assert_eq!(decoded, values);
        let res = scanner.scan(&col, values[0]).unwrap();
        let keys: Vec<u32> = (0..args.keys as u32).collect();
        let shared = scanner.shared_scan(&col, &keys).unwrap();
        println!(
            "config: {:?}, count={}, shared_counts={:?}, dur={}",
            scanner,
            res.count,
            shared.counts,
            humantime::format_duration(start.elapsed())
        );
    }

    bench_decode(&args, &col, &values);
    bench_scan(&args, &col, values[0]);
    bench_shared_scan(&args, &col);
}

fn bench_decode(args: &Args, col: &PackedColumn, values: &[u32]) {
    let mut res = vec![0u32; decoded_len(col.len())];
    for strategy in DecodeStrategy::ALL {
        if !strategy.is_supported() {
            println!("decode[{}]: skipped", strategy);
            continue;
        }
        let (iters, dur) = repeat(args.duration, || {
            strategy
                .decode(col.buf(), col.width(), col.len(), &mut res)
                .unwrap();
        });
        assert_eq!(&res[..col.len()], values, "decode[{}] mismatch", strategy);
        report("decode", strategy, col.len(), iters, dur);
    }
}

fn bench_scan(args: &Args, col: &PackedColumn, key: u32) {
    let mut expected = new_bitmap(col.len());
    let expected_count = ScanStrategy::Scalar
        .scan(key, col.buf(), col.width(), col.len(), &mut expected)
        .unwrap();
    let mut res = new_bitmap(col.len());
    for strategy in ScanStrategy::ALL {
        if !strategy.is_supported() {
            println!("scan[{}]: skipped", strategy);
            continue;
        }
        let mut count = 0;
        let (iters, dur) = repeat(args.duration, || {
            count = strategy
                .scan(key, col.buf(), col.width(), col.len(), &mut res)
                .unwrap();
        });
        assert_eq!(count, expected_count, "scan[{}] count mismatch", strategy);
        assert_eq!(res, expected, "scan[{}] bitmap mismatch", strategy);
        report("scan", strategy, col.len(), iters, dur);
    }
}

fn bench_shared_scan(args: &Args, col: &PackedColumn) {
    let keys: Vec<u32> = (0..args.keys as u32).collect();
    let scan = ScanStrategy::best(SimdLevel::detect());
    let mut expected = SharedBitmaps::new(BitmapLayout::Separate, keys.len(), col.len());
    let expected_counts = SharedScanStrategy::Sequential {
        scan: ScanStrategy::Scalar,
    }
    .scan(&keys, col.buf(), col.width(), col.len(), &mut expected)
    .unwrap();
    for strategy in SharedScanStrategy::all(scan, args.threads) {
        if !strategy.is_supported() {
            println!("shared_scan[{}]: skipped", strategy);
            continue;
        }
        if strategy == SharedScanStrategy::VerticalFixed
            && !SharedScanStrategy::FIXED_KEY_COUNTS.contains(&keys.len())
        {
            println!("shared_scan[{}]: skipped, keys={}", strategy, keys.len());
            continue;
        }
        let mut res = SharedBitmaps::new(BitmapLayout::Separate, keys.len(), col.len());
        let mut counts = vec![];
        let (iters, dur) = repeat(args.duration, || {
            counts = strategy
                .scan(&keys, col.buf(), col.width(), col.len(), &mut res)
                .unwrap();
        });
        assert_eq!(counts, expected_counts, "shared_scan[{}] mismatch", strategy);
        assert_eq!(res, expected, "shared_scan[{}] mismatch", strategy);
        report("shared_scan", strategy, col.len() * keys.len(), iters, dur);
    }
}

/// Run f until duration elapsed, returns iterations and total time.
fn repeat<F: FnMut()>(duration: Duration, mut f: F) -> (usize, Duration) {
    let start = Instant::now();
    let mut iters = 0;
    loop {
        f();
        iters += 1;
        let dur = start.elapsed();
        if dur >= duration {
            return (iters, dur);
        }
    }
}

fn report<S: std::fmt::Display>(op: &str, strategy: S, values: usize, iters: usize, dur: Duration) {
    let op_nanos = dur.as_nanos() as f64 / iters as f64;
    let value_nanos = op_nanos / values.max(1) as f64;
    println!(
        "{}[{}]: iters={}, dur={}ms, op={:.2}ns, value={:.3}ns",
        op,
        strategy,
        iters,
        dur.as_millis(),
        op_nanos,
        value_nanos
    );
}

#[derive(Parser, Debug, Clone)]
#[command(version, about, long_about = None)]
struct Args {
    /// number of values in column
    #[arg(long, default_value = "1048576")]
    rows: usize,

    /// code width in bits
    #[arg(long, default_value = "9")]
    width: usize,

    /// number of keys of shared scan
    #[arg(long, default_value = "8")]
    keys: usize,

    /// worker threads of threaded shared scan
    #[arg(long, default_value = "4")]
    threads: usize,

    /// minimum run time of each strategy
    #[arg(long, default_value = "1s", value_parser = humantime::parse_duration)]
    duration: Duration,

    /// seed of random values
    #[arg(long, default_value = "42")]
    seed: u64,

    /// scanner config in toml
    #[arg(long)]
    config: Option<PathBuf>,
}
