use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use tone_link_core::{render, Demodulator, MessageAssembler, MessageFramer, Modulator, ProtocolConfig};

const SAMPLE_RATE: u32 = 44100;

fn benchmark_push_sample(c: &mut Criterion) {
    let protocol = ProtocolConfig::standard();
    let modulator = Modulator::new(protocol.clone()).unwrap();
    let plan = modulator
        .modulate(&protocol.alphabet().parse("0v1u2t3s4r").unwrap())
        .unwrap();
    let audio = render(&plan, SAMPLE_RATE, 0.5);

    let mut group = c.benchmark_group("receiver");
    group.throughput(Throughput::Elements(audio.len() as u64));
    group.bench_function("decode_one_packet", |b| {
        let mut demodulator = Demodulator::new(protocol.clone(), SAMPLE_RATE).unwrap();
        b.iter(|| {
            let mut decoded = 0;
            for &sample in &audio {
                if demodulator.push_sample(black_box(sample)).is_some() {
                    decoded += 1;
                }
            }
            decoded
        });
    });
    group.bench_function("idle_silence", |b| {
        let mut demodulator = Demodulator::new(protocol.clone(), SAMPLE_RATE).unwrap();
        let silence = vec![0.0f32; audio.len()];
        b.iter(|| {
            for &sample in &silence {
                black_box(demodulator.push_sample(black_box(sample)));
            }
        });
    });
    group.finish();
}

fn benchmark_framing(c: &mut Criterion) {
    let protocol = ProtocolConfig::standard();
    let framer = MessageFramer::new(protocol.clone());
    let message = vec![0x5Au8; protocol.max_message_len()];
    let payloads = framer.segment(&message).unwrap();

    c.bench_function("segment_max_message", |b| {
        b.iter(|| framer.segment(black_box(&message)))
    });

    c.bench_function("reassemble_max_message", |b| {
        let mut assembler = MessageAssembler::new(protocol.clone());
        b.iter(|| {
            let mut len = 0;
            for payload in &payloads {
                if let Some(message) = assembler.push(black_box(payload)) {
                    len = message.len();
                }
            }
            len
        });
    });
}

criterion_group!(benches, benchmark_push_sample, benchmark_framing);
criterion_main!(benches);
