use std::hint::black_box;
use std::sync::Arc;

use agora_core::aggregate::{AggregateSnapshot, OptionTally};
use agora_core::{Notice, SlideResults};
use agora_live::broadcast::{Audience, BroadcastGroup};
use agora_live::protocol::{encode_notice, ClientEvent, Frame};
use criterion::{criterion_group, criterion_main, Criterion};
use uuid::Uuid;

fn results() -> Notice {
    Notice::ResponseUpdated(SlideResults {
        slide_id: Uuid::new_v4(),
        aggregate_snapshot: AggregateSnapshot::MultipleChoice {
            votes: (0..6)
                .map(|i| OptionTally {
                    option: format!("Option {i}"),
                    count: i * 17,
                })
                .collect(),
            total_responses: 255,
        },
    })
}

fn bench_frame_encode(c: &mut Criterion) {
    let notice = results();
    c.bench_function("frame_encode_choice", |b| {
        b.iter(|| black_box(encode_notice(black_box(&notice), 7).unwrap()))
    });
}

fn bench_frame_decode(c: &mut Criterion) {
    let text = encode_notice(&results(), 7).unwrap();
    c.bench_function("frame_decode_choice", |b| {
        b.iter(|| black_box(Frame::decode(black_box(&text)).unwrap()))
    });
}

fn bench_event_decode(c: &mut Criterion) {
    let text = r#"{"event":"submit-response","data":{"slideId":"7f0c4a9e-2f7d-4c55-9a43-0f7f3f8f4b1a","answer":{"kind":"choice","value":["Option 1"]}}}"#;
    c.bench_function("client_event_decode", |b| {
        b.iter(|| black_box(ClientEvent::decode(black_box(text))))
    });
}

fn bench_broadcast_fanout(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let text = Arc::new(encode_notice(&results(), 1).unwrap());

    c.bench_function("broadcast_fanout_100", |b| {
        b.iter(|| {
            rt.block_on(async {
                let group = BroadcastGroup::new(16);
                let mut receivers: Vec<_> = (0..100).map(|_| group.subscribe()).collect();
                group.deliver(Audience::Everyone, text.clone());
                for rx in &mut receivers {
                    black_box(rx.recv().await.unwrap());
                }
            })
        })
    });
}

criterion_group!(
    benches,
    bench_frame_encode,
    bench_frame_decode,
    bench_event_decode,
    bench_broadcast_fanout,
);
criterion_main!(benches);
