use codspeed_criterion_compat::{black_box, criterion_group, criterion_main, Criterion};
use hidbus_report::gamepad::{CanonicalAxis, CanonicalButton, GamepadLayout};
use hidbus_report::{summarize, HatDirection, InputReport};

fn bench_encode_gamepad(c: &mut Criterion) {
    let (desc, layout) = GamepadLayout::descriptor(true).expect("descriptor should build");
    let mut report = InputReport::new(desc.input()).expect("report should allocate");

    c.bench_function("report_encode_gamepad_frame", |b| {
        let mut value: i32 = -32768;
        b.iter(|| {
            let bytes = report.as_mut_bytes();
            value = if value >= 32767 { -32768 } else { value + 97 };
            layout
                .set_axis(bytes, CanonicalAxis::LeftX, black_box(value))
                .expect("in range");
            layout
                .set_axis(bytes, CanonicalAxis::RightY, black_box(-value - 1))
                .expect("in range");
            layout.set_button(bytes, CanonicalButton::A, value > 0);
            layout
                .set_hat(bytes, black_box(HatDirection::UpLeft))
                .expect("hat fits");
            black_box(report.as_bytes());
        })
    });
}

fn bench_build_descriptor(c: &mut Criterion) {
    c.bench_function("report_build_gamepad_descriptor", |b| {
        b.iter(|| {
            let built = GamepadLayout::descriptor(black_box(true)).expect("descriptor should build");
            black_box(built);
        })
    });
}

fn bench_summarize(c: &mut Criterion) {
    let (desc, _) = GamepadLayout::descriptor(true).expect("descriptor should build");

    c.bench_function("report_summarize_gamepad_descriptor", |b| {
        b.iter(|| {
            let summary = summarize(black_box(desc.as_bytes())).expect("descriptor should parse");
            black_box(summary);
        })
    });
}

criterion_group!(
    benches,
    bench_encode_gamepad,
    bench_build_descriptor,
    bench_summarize
);
criterion_main!(benches);
