use std::io::Cursor;

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use cmdtrace::cmdlog::{parse_line, CommandLogReader};
use cmdtrace::lifecycle::LifecycleTracker;
use cmdtrace::rate::RateAggregator;

const START_LINE: &str =
    "[17] 2021-12-20 10:00:00.123456 INFO  Dispatcher CMD-START ID_REQ_KC_STORE session=42";
const END_LINE: &str =
    "[17] 2021-12-20 10:00:00.273456 INFO  Dispatcher CMD-ENDE ID_REQ_KC_STORE rc=0";

/// Interleaved log of `threads` threads, each running `rounds` commands.
fn synthetic_log(threads: u32, rounds: u32) -> String {
    let mut log = String::new();
    for round in 0..rounds {
        let second = round % 60;
        let minute = (round / 60) % 60;
        for tid in 0..threads {
            log.push_str(&format!(
                "[{tid}] 2021-12-20 10:{minute:02}:{second:02}.{:06} CMD-START ID_CMD_{}\n",
                tid * 10,
                tid % 8
            ));
        }
        for tid in 0..threads {
            log.push_str(&format!(
                "[{tid}] 2021-12-20 10:{minute:02}:{second:02}.{:06} CMD-ENDE ID_CMD_{}\n",
                500_000 + tid * 10,
                tid % 8
            ));
        }
    }
    log
}

fn bench_parse_line(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse_line");
    group.throughput(Throughput::Elements(1));
    group.bench_function("start", |b| b.iter(|| parse_line(black_box(START_LINE))));
    group.bench_function("end", |b| b.iter(|| parse_line(black_box(END_LINE))));
    group.bench_function("unmarked", |b| {
        b.iter(|| parse_line(black_box("[17] 2021-12-20 10:00:00.1 heartbeat")))
    });
    group.finish();
}

fn bench_track(c: &mut Criterion) {
    let log = synthetic_log(32, 600);
    let lines = log.lines().count() as u64;

    let mut group = c.benchmark_group("track");
    group.throughput(Throughput::Elements(lines));
    group.bench_function("tracker_and_rates", |b| {
        b.iter(|| {
            let mut reader = CommandLogReader::new(Cursor::new(log.as_bytes()), "bench");
            let mut tracker = LifecycleTracker::new();
            let mut rates = RateAggregator::default();
            let mut buckets = Vec::new();
            let mut completed = 0u64;

            while let Some(line) = reader.next_line().expect("read") {
                rates.ingest_line(line, &mut buckets);
                if let Ok(event) = parse_line(line) {
                    if let Ok(Some(_)) = tracker.handle(&event) {
                        completed += 1;
                    }
                }
            }
            rates.force_flush_all(&mut buckets);
            black_box((completed, buckets.len()))
        })
    });
    group.finish();
}

criterion_group!(benches, bench_parse_line, bench_track);
criterion_main!(benches);
