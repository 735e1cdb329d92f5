//! Convolve a wave file with an impulse response, writing the result to another wave file.
//!
//! Usage: `cargo run --example convolve_wav -- input.wav impulse.wav output.wav`
//!
//! The output has as many channels as the wider of the two files, and runs until the reverb tail has died away.
use anyhow::{bail, Context as _, Result};

use ugen::{AudioIn, Buffer, Context, ContextOptions};

/// Read a whole file as interleaved f32, whatever its sample format.
fn read_wav(path: &str) -> Result<(hound::WavSpec, Vec<f32>)> {
    let mut reader = hound::WavReader::open(path).with_context(|| format!("Opening {}", path))?;
    let spec = reader.spec();

    let samples = match spec.sample_format {
        hound::SampleFormat::Float => reader.samples::<f32>().collect::<Result<Vec<_>, _>>()?,
        hound::SampleFormat::Int => {
            let scale = (1u64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|s| s as f32 / scale))
                .collect::<Result<Vec<_>, _>>()?
        }
    };

    Ok((spec, samples))
}

fn main() -> Result<()> {
    env_logger::init();

    let args = std::env::args().collect::<Vec<_>>();
    if args.len() != 4 {
        bail!("Usage: convolve_wav <input> <impulse> <output>");
    }

    let (input_spec, input) = read_wav(&args[1])?;
    let (impulse_spec, impulse) = read_wav(&args[2])?;
    if input_spec.sample_rate != impulse_spec.sample_rate {
        log::warn!(
            "Input is at {} Hz but the impulse is at {} Hz; the result will be pitched",
            input_spec.sample_rate,
            impulse_spec.sample_rate
        );
    }

    let ctx = Context::new(ContextOptions {
        sample_rate: input_spec.sample_rate as f64,
        ..Default::default()
    })?;

    let in_channels = input_spec.channels as usize;
    let impulse = Buffer::from_interleaved(&impulse, impulse_spec.channels as usize)?;
    let (source, inputs) = AudioIn::new(in_channels)?;
    let mut graph = ugen::zero_latency_convolve(&ctx, &source, &impulse);
    graph.prepare(&ctx);

    let out_channels = graph.channel_count();
    let input_frames = input.len() / in_channels;
    let total_frames = input_frames + impulse.frames();
    log::info!(
        "Convolving {} frames of {} channel audio with a {} frame, {} channel impulse",
        input_frames,
        in_channels,
        impulse.frames(),
        impulse.channels()
    );

    let writer_spec = hound::WavSpec {
        channels: out_channels as u16,
        sample_rate: input_spec.sample_rate,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer = hound::WavWriter::create(&args[3], writer_spec)?;

    let block_size = ctx.block_size();
    let mut deinterleaved = vec![vec![0.0f32; block_size]; in_channels];
    let mut output = vec![0.0f32; block_size * out_channels];

    let mut frame = 0;
    while frame < total_frames {
        let frames = block_size.min(total_frames - frame);

        for (c, dest) in deinterleaved.iter_mut().enumerate() {
            for (i, d) in dest[..frames].iter_mut().enumerate() {
                *d = input
                    .get((frame + i) * in_channels + c)
                    .copied()
                    .unwrap_or(0.0);
            }
        }
        let slices = deinterleaved
            .iter()
            .map(|d| &d[..frames])
            .collect::<Vec<_>>();
        inputs.set_inputs(&slices);

        let block = ctx.next_block(frames);
        graph.render_interleaved(&block, &mut output, out_channels);
        for s in &output[..frames * out_channels] {
            writer.write_sample(*s)?;
        }

        ugen::logging::drain();
        frame += frames;
    }

    writer.finalize()?;
    Ok(())
}
