//! CRTC Assignment Benchmarks
//!
//! Measures the backtracking solver on layouts of growing size, including
//! the worst case where early outputs grab the only CRTC a later output can
//! use.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use lamco_display_config::multimon::{
    assign, ConfigStore, Configuration, Crtc, LayoutSynthesizer, Mode, Output, OutputIdentity, OutputSettings, Rect,
    Resources, TransformSet,
};

/// `outputs` monitors side by side, `crtcs` CRTCs usable by every output
fn side_by_side(outputs: usize, crtcs: usize) -> Resources {
    let modes = vec![
        Mode {
            id: 1,
            width: 1920,
            height: 1080,
            refresh_rate: 60.0,
        },
        Mode {
            id: 2,
            width: 1920,
            height: 1080,
            refresh_rate: 144.0,
        },
    ];

    let crtcs = (0..crtcs)
        .map(|i| Crtc {
            id: 100 + i as u32,
            rect: Rect::default(),
            current_mode: None,
            transform: Default::default(),
            all_transforms: TransformSet::ALL,
            gamma_size: 256,
        })
        .collect::<Vec<_>>();
    let crtc_ids: Vec<u32> = crtcs.iter().map(|c: &Crtc| c.id).collect();

    let outputs = (0..outputs)
        .map(|i| {
            let mut output = Output::new(i as u32 + 1, format!("DP-{}", i + 1));
            output.vendor = "ACME".into();
            output.product = "Bench".into();
            output.serial = format!("{}", i);
            output.modes = vec![1, 2];
            output.preferred_mode = Some(1);
            output.possible_crtcs = crtc_ids.clone();
            output
        })
        .collect();

    Resources { modes, crtcs, outputs }
}

/// Every output but the last can use any CRTC; the last can only use the
/// first one, which the search hands out first.
fn contended(outputs: usize) -> Resources {
    let mut resources = side_by_side(outputs, outputs);
    if let Some(last) = resources.outputs.last_mut() {
        last.possible_crtcs = vec![100];
    }
    resources
}

fn linear_layout(resources: &Resources) -> Configuration {
    let entries = resources.outputs.iter().enumerate().map(|(i, output)| {
        let rect = Rect::new(i as i32 * 1920, 0, 1920, 1080);
        (OutputIdentity::of(output), OutputSettings::enabled(rect, 60.0).primary(i == 0))
    });
    Configuration::new(entries).unwrap()
}

fn bench_assign_side_by_side(c: &mut Criterion) {
    let mut group = c.benchmark_group("assign_side_by_side");

    for outputs in [1, 2, 4, 6] {
        let resources = side_by_side(outputs, outputs);
        let config = linear_layout(&resources);

        group.bench_with_input(BenchmarkId::from_parameter(outputs), &config, |b, config| {
            b.iter(|| assign(black_box(config), black_box(&resources)).unwrap())
        });
    }

    group.finish();
}

fn bench_assign_contended(c: &mut Criterion) {
    let mut group = c.benchmark_group("assign_contended");

    for outputs in [2, 4, 6] {
        let resources = contended(outputs);
        let config = linear_layout(&resources);

        group.bench_with_input(BenchmarkId::from_parameter(outputs), &config, |b, config| {
            b.iter(|| assign(black_box(config), black_box(&resources)).unwrap())
        });
    }

    group.finish();
}

fn bench_assign_unsatisfiable(c: &mut Criterion) {
    let mut group = c.benchmark_group("assign_unsatisfiable");

    for outputs in [2, 4, 6] {
        let resources = side_by_side(outputs, outputs - 1);
        let config = linear_layout(&resources);

        group.bench_with_input(BenchmarkId::from_parameter(outputs), &config, |b, config| {
            b.iter(|| assign(black_box(config), black_box(&resources)).is_err())
        });
    }

    group.finish();
}

fn bench_synthesize(c: &mut Criterion) {
    let resources = side_by_side(4, 4);
    let store = ConfigStore::new("/nonexistent/monitors.xml");

    c.bench_function("synthesize_linear_4", |b| {
        b.iter(|| {
            LayoutSynthesizer::new(black_box(&resources), (16384, 8192))
                .synthesize(&store)
                .unwrap()
        })
    });
}

criterion_group!(
    benches,
    bench_assign_side_by_side,
    bench_assign_contended,
    bench_assign_unsatisfiable,
    bench_synthesize
);
criterion_main!(benches);
