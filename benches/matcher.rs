use criterion::{black_box, criterion_group, criterion_main, Criterion};
use serial_command_port::config::EngineConfig;
use serial_command_port::matcher::find_match;
use serial_command_port::{
    Command, CommandEngine, DeviceMessageSet, MatchSpec, MockTransport, OperationMode,
};
use std::sync::Arc;
use std::time::Duration;

/// Noise followed by a single recognisable reply at the very end.
fn noisy_buffer(len: usize) -> Vec<u8> {
    let mut buf: Vec<u8> = b"0123456789abcdef".iter().copied().cycle().take(len).collect();
    buf.extend_from_slice(b"TEMP=21.5\r\n");
    buf
}

pub fn bench_find_match(c: &mut Criterion) {
    let buffer = noisy_buffer(14_000);
    let pattern = MatchSpec::pattern(r"TEMP=\d+\.\d\r\n").unwrap();
    let expected = MatchSpec::expected_responses(["ERR\r\n", "TEMP=21.5\r\n", "OK\r\n"]).unwrap();
    let count = MatchSpec::fixed_byte_count(64).unwrap();

    c.bench_function("find_match_pattern", |b| {
        b.iter(|| black_box(find_match(black_box(&buffer), &pattern)))
    });
    c.bench_function("find_match_expected", |b| {
        b.iter(|| black_box(find_match(black_box(&buffer), &expected)))
    });
    c.bench_function("find_match_byte_count", |b| {
        b.iter(|| black_box(find_match(black_box(&buffer), &count)))
    });
}

pub fn bench_engine_round_trip(c: &mut Criterion) {
    let command = Arc::new(
        Command::new(
            "TEMP",
            "T?\n",
            OperationMode::NonBlockingWithResponse,
            Some(MatchSpec::pattern(r"TEMP=\d+\.\d\r\n").unwrap()),
        )
        .unwrap(),
    );
    let mut messages = DeviceMessageSet::new();
    messages.insert("HEARTBEAT\r\n", "Device alive");

    c.bench_function("engine_submit_and_match", |b| {
        let link = MockTransport::new("BENCH");
        let mut engine =
            CommandEngine::new(Box::new(link.clone()), &EngineConfig::default(), messages.clone());
        b.iter(|| {
            engine.submit(Arc::clone(&command), vec![]).unwrap();
            engine.bytes_received(b"HEARTBEAT\r\nTEMP=2");
            engine.bytes_received(b"1.5\r\n");
            black_box(engine.take_events());
            link.clear_write_log();
        })
    });
}

criterion_group! {
    name = benches;
    config = Criterion::default()
        .warm_up_time(Duration::from_millis(300))
        .measurement_time(Duration::from_secs(2));
    targets = bench_find_match, bench_engine_round_trip
}
criterion_main!(benches);
