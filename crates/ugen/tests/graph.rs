//! End-to-end tests which drive whole graphs through the public API.
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use proptest::prelude::*;

use ugen::*;

fn render_mono(ctx: &Context, graph: &mut UGen, blocks: usize) -> Vec<f32> {
    let mut out = vec![];
    for _ in 0..blocks {
        let block = ctx.next_block(ctx.block_size());
        let mut chunk = vec![0.0; block.frames()];
        graph.set_output(&block, &mut chunk);
        out.extend(chunk);
    }
    out
}

fn expected_sine(freq: f64, amplitude: f64, sr: f64, frames: usize) -> impl Iterator<Item = f32> {
    (0..frames).map(move |i| (amplitude * (std::f64::consts::TAU * freq * i as f64 / sr).sin()) as f32)
}

#[test]
fn basic_sine() -> Result<()> {
    let ctx = Context::new(Default::default())?;
    let mut graph = sine(440.0, 0.0, 0.1);
    graph.prepare(&ctx);

    let got = render_mono(&ctx, &mut graph, 20);
    for (i, (g, e)) in got
        .iter()
        .zip(expected_sine(440.0, 0.1, 44100.0, got.len()))
        .enumerate()
    {
        assert!((g - e).abs() < 1e-5, "Index {}: got {}, expected {}", i, g, e);
    }

    Ok(())
}

/// Kernel which counts how many times it ran.
struct Counter(Arc<AtomicUsize>);

impl Kernel for Counter {
    fn process(&mut self, _block: &Block, _inputs: &[Signal<'_>], output: &mut [f32]) -> KernelStatus {
        self.0.fetch_add(1, Ordering::Relaxed);
        output.fill(1.0);
        KernelStatus::Running
    }
}

#[test]
fn shared_subgraphs_run_once_per_block() -> Result<()> {
    let ctx = Context::new(Default::default())?;
    let count = Arc::new(AtomicUsize::new(0));
    let shared = UGen::from_kernels(Rate::Audio, &[], |_| Counter(count.clone()));

    let doubled = &shared + &shared;
    let mut graph = &doubled * &shared - &doubled;

    let block = ctx.next_block(128);
    let mut done = false;
    let first = graph.process_channel(&block, 0, &mut done).to_vec();
    let again = graph.process_channel(&block, 0, &mut done).to_vec();
    assert_eq!(first, again);
    assert!(first.iter().all(|x| *x == 0.0));
    assert_eq!(count.load(Ordering::Relaxed), 1);

    render_mono(&ctx, &mut graph, 3);
    assert_eq!(count.load(Ordering::Relaxed), 4);
    Ok(())
}

#[test]
fn inputs_expand_to_the_widest() -> Result<()> {
    let ctx = Context::new(Default::default())?;
    let freqs = UGen::stack([&UGen::constant(100.0), &UGen::constant(200.0)]);
    let amps = UGen::stack([
        &UGen::constant(0.1),
        &UGen::constant(0.2),
        &UGen::constant(0.3),
    ]);
    let graph = sine(&freqs, 0.0, &amps);
    assert_eq!(graph.channel_count(), 3);

    let block = ctx.next_block(128);
    let mut done = false;
    let third = graph.process_channel(&block, 2, &mut done).to_vec();
    for (g, e) in third.iter().zip(expected_sine(100.0, 0.3, 44100.0, 128)) {
        assert!((g - e).abs() < 1e-5);
    }
    Ok(())
}

#[test]
fn binary_ops_wrap_the_narrower_side() -> Result<()> {
    let ctx = Context::new(Default::default())?;
    let a = sine(500.0, 0.0, 1.0);
    let b = UGen::stack([
        &Param::new(1.0).ugen(),
        &Param::new(2.0).ugen(),
        &Param::new(3.0).ugen(),
    ]);
    let product = &a * &b;
    assert_eq!(product.channel_count(), 3);

    let block = ctx.next_block(128);
    let mut done = false;
    let base = a.process_channel(&block, 0, &mut done).to_vec();
    for c in 0..3 {
        let got = product.process_channel(&block, c, &mut done);
        for (g, x) in got.iter().zip(base.iter()) {
            assert_eq!(*g, *x * (c + 1) as f32);
        }
    }
    Ok(())
}

#[test]
fn stereo_output_interleaves() -> Result<()> {
    let ctx = Context::new(Default::default())?;
    let mut graph = UGen::stack([&sine(300.0, 0.0, 0.5), &UGen::constant(0.25)]);

    let block = ctx.next_block(64);
    let mut out = vec![0.0f32; 128];
    assert!(!graph.render_interleaved(&block, &mut out, 2));
    for (frame, e) in out.chunks(2).zip(expected_sine(300.0, 0.5, 44100.0, 64)) {
        assert!((frame[0] - e).abs() < 1e-5);
        assert_eq!(frame[1], 0.25);
    }
    Ok(())
}

#[test]
fn control_to_audio_slews() -> Result<()> {
    let ctx = Context::new(Default::default())?;
    let param = Param::new(0.0);
    let graph = param.ugen().ar();
    assert!(graph.rate().is_audio());

    let mut done = false;
    let block = ctx.next_block(128);
    assert!(graph.process_channel(&block, 0, &mut done).iter().all(|x| *x == 0.0));

    param.set(1.0);
    let block = ctx.next_block(128);
    let got = graph.process_channel(&block, 0, &mut done).to_vec();
    for (i, x) in got[..64].iter().enumerate() {
        assert!((x - (i + 1) as f32 / 64.0).abs() < 1e-6, "{} {}", i, x);
    }
    assert!(got[64..].iter().all(|x| *x == 1.0));
    Ok(())
}

#[test]
fn slewing_survives_short_blocks() -> Result<()> {
    let ctx = Context::new(Default::default())?;
    let param = Param::new(0.0);
    let graph = param.ugen().ar();
    let period = ctx.spec().control_block_size;

    let mut done = false;
    graph.process_channel(&ctx.next_block(32), 0, &mut done);

    param.set(1.0);
    let mut got = vec![];
    for _ in 0..(2 * period / 32) {
        got.extend_from_slice(&graph.process_channel(&ctx.next_block(32), 0, &mut done));
    }

    assert!(got.windows(2).all(|w| w[1] >= w[0]));
    assert!(got.windows(2).all(|w| w[1] - w[0] <= 1.0 / period as f32 + 1e-6));
    assert!((got[period - 1] - 1.0).abs() < 1e-6);
    assert!(got[period..].iter().all(|x| *x == 1.0));
    Ok(())
}

#[test]
fn mixed_voices_finish_independently() -> Result<()> {
    let ctx = Context::new(Default::default())?;
    let short = sine(440.0, 0.0, 1.0) * line(1.0, 1.0, 0.0, DoneAction::FreeWhenDone);
    let long = Param::new(0.5).ugen().ar();
    let weak = Arc::downgrade(short.node(0));
    let mut graph = mix_array(&[short, long], false);

    for b in 0..4 {
        let block = ctx.next_block(128);
        {
            let _audio = AudioThreadGuard::new();
            assert_eq!(graph.prepare_for_block(&block), b == 1);
        }
        let mut out = vec![0.0; 128];
        assert!(!graph.set_output(&block, &mut out));
        assert!(out[1..].iter().all(|x| *x == 0.5), "block {}", b);
    }

    deferred_drop::drain();
    assert!(weak.upgrade().is_none());
    Ok(())
}

#[test]
fn finished_graphs_are_pruned_next_block() -> Result<()> {
    let ctx = Context::new(Default::default())?;
    let envelope = line(1.0, 1.0, 0.0, DoneAction::FreeWhenDone);
    let weak = Arc::downgrade(envelope.node(0));
    let mut graph = sine(440.0, 0.0, 1.0) * envelope;

    let block = ctx.next_block(128);
    assert!(!graph.prepare_for_block(&block));
    let mut out = vec![0.0; 128];
    assert!(graph.set_output(&block, &mut out));
    assert!(out[1..].iter().all(|x| *x == 0.0));

    let block = ctx.next_block(128);
    {
        let _audio = AudioThreadGuard::new();
        assert!(graph.prepare_for_block(&block));
    }
    assert!(!graph.set_output(&block, &mut out));
    assert!(out.iter().all(|x| *x == 0.0));

    deferred_drop::drain();
    assert!(weak.upgrade().is_none());
    Ok(())
}

#[test]
fn proxy_channels_share_a_block() -> Result<()> {
    let ctx = Context::new(Default::default())?;
    let mags = fft_magnitude(&ctx, &sine(1000.0, 0.0, 1.0), 256, 2, 0, 8)?;

    let block = ctx.next_block(128);
    let mut done = false;
    mags.process_channel(&block, 0, &mut done);
    for c in 0..mags.channel_count() {
        assert_eq!(mags.channel(c).last_block(), Some(block.id()));
    }
    Ok(())
}

#[test]
fn plug_crossfades_between_sines() -> Result<()> {
    let ctx = Context::new(Default::default())?;
    let plug = Plug::new(2, false);
    let mut graph = plug.ugen();

    let low = UGen::stack([&sine(200.0, 0.0, 0.5), &sine(201.0, 0.0, 0.5)]);
    plug.set_source(&ctx, &low, 0.0, true);
    render_mono(&ctx, &mut graph, 2);

    plug.set_source(&ctx, &Param::new(0.5).ugen(), 0.01, true);
    // 441 samples of fade, then only the new source.
    let got = render_mono(&ctx, &mut graph, 6);
    assert!(got[500..].iter().all(|x| (*x - 0.5).abs() < 1e-6));
    Ok(())
}

#[test]
fn lag_settles_within_its_time() -> Result<()> {
    let ctx = Context::new(Default::default())?;
    let param = Param::new(0.0);
    let mut graph = lag(param.ugen(), 0.1);
    assert!(graph.rate().is_control());

    render_mono(&ctx, &mut graph, 1);
    param.set(1.0);
    let got = render_mono(&ctx, &mut graph, 40);

    assert!(got.windows(2).all(|w| w[1] >= w[0]));
    assert!(got[0] > 0.0 && got[0] < 0.5);
    assert!((1.0 - got[got.len() - 1]).abs() < 1e-3);
    Ok(())
}

#[test]
fn sah_holds_on_rising_edges() -> Result<()> {
    let ctx = Context::new(Default::default())?;
    let trig = Param::new(0.0);
    let graph = sah(line(0.0, 1.0, 1.0, DoneAction::DoNothing), trig.ugen());
    let mut done = false;

    let block = ctx.next_block(128);
    assert!(graph.process_channel(&block, 0, &mut done).iter().all(|x| *x == 0.0));

    trig.set(1.0);
    let block = ctx.next_block(128);
    let held = graph.process_channel(&block, 0, &mut done).to_vec();
    assert!((held[0] - 128.0 / 44100.0).abs() < 1e-6);
    assert!(held.iter().all(|x| *x == held[0]));

    let block = ctx.next_block(128);
    assert!(graph.process_channel(&block, 0, &mut done).iter().all(|x| *x == held[0]));
    Ok(())
}

#[test]
fn feedback_delay_echoes() -> Result<()> {
    let ctx = Context::new(Default::default())?;

    // One sample of 1, then silence.
    let impulse = line(1.0, 1.0, 0.0, DoneAction::FreeWhenDone);
    let delay = FeedbackDelay::new(1);
    let mut looped = impulse + delay.ugen() * 0.5;
    delay.set_source(&looped);

    let got = render_mono(&ctx, &mut looped, 4);
    assert_eq!(got[0], 1.0);
    assert_eq!(got[128], 0.5);
    assert_eq!(got[256], 0.25);
    assert_eq!(got[384], 0.125);
    assert_eq!(got.iter().filter(|x| **x != 0.0).count(), 4);
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn sine_ignores_block_boundaries(sizes in prop::collection::vec(1usize..=128, 1..24)) {
        let ctx = Context::new(Default::default()).unwrap();
        let mut graph = sine(1234.0, 0.0, 1.0);
        let mut got = vec![];
        for s in sizes {
            let block = ctx.next_block(s);
            let mut chunk = vec![0.0; s];
            graph.set_output(&block, &mut chunk);
            got.extend(chunk);
        }

        for (g, e) in got.iter().zip(expected_sine(1234.0, 1.0, 44100.0, got.len())) {
            prop_assert!((g - e).abs() < 1e-5);
        }
    }

    #[test]
    fn mixing_sums_channels(values in prop::collection::vec(-10.0f32..10.0, 1..60)) {
        let ctx = Context::new(Default::default()).unwrap();
        let params = values.iter().map(|v| Param::new(*v).ugen()).collect::<Vec<_>>();
        let mut graph = mix_array(&params, true).ar();

        let block = ctx.next_block(128);
        let mut out = vec![0.0; 128];
        graph.set_output(&block, &mut out);

        let expected = values.iter().map(|v| *v as f64).sum::<f64>() as f32;
        prop_assert!(out.iter().all(|x| (x - expected).abs() < 1e-3));
    }
}
