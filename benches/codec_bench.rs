//! Run-length codec throughput: encode and decode a synthetic pile with a
//! short-run-heavy distribution close to real BWT segments.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};

use pilebwt::codec::{open_reader, open_writer, SegmentFormat};
use pilebwt::counts::LetterCount;
use pilebwt::LetterNumber;

fn synthetic_runs(total_chars: u64) -> Vec<(u8, LetterNumber)> {
    let symbols = [b'A', b'C', b'G', b'T', b'N', b'$'];
    let mut runs = Vec::new();
    let mut produced = 0u64;
    let mut state = 0x9e3779b97f4a7c15u64;
    while produced < total_chars {
        state = state.wrapping_mul(6364136223846793005).wrapping_add(1);
        let symbol = symbols[(state >> 33) as usize % symbols.len()];
        // Mostly short runs, occasionally hundreds long.
        let len = 1 + (state >> 40) % if state & 0xFF == 0 { 500 } else { 6 };
        runs.push((symbol, len.min(total_chars - produced)));
        produced += runs.last().unwrap().1;
    }
    runs
}

fn bench_rle(c: &mut Criterion) {
    let total: u64 = 1 << 20;
    let runs = synthetic_runs(total);

    for format in [SegmentFormat::RleV1, SegmentFormat::RleV3] {
        let name = match format {
            SegmentFormat::RleV1 => "rle_v1",
            SegmentFormat::RleV3 => "rle_v3",
            SegmentFormat::Ascii => unreachable!(),
        };

        let mut group = c.benchmark_group(name);
        group.throughput(Throughput::Bytes(total));

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seg");

        group.bench_function("encode", |b| {
            b.iter(|| {
                let mut writer = open_writer(&path, format).unwrap();
                for &(symbol, len) in &runs {
                    writer.send_run(black_box(symbol), black_box(len)).unwrap();
                }
                writer.flush().unwrap();
            })
        });

        group.bench_function("read_and_count", |b| {
            b.iter(|| {
                let mut reader = open_reader(&path, false).unwrap();
                let mut counts = LetterCount::new();
                let got = reader.read_and_count(&mut counts, LetterNumber::MAX).unwrap();
                black_box((got, counts));
            })
        });

        group.finish();
    }
}

criterion_group!(benches, bench_rle);
criterion_main!(benches);
