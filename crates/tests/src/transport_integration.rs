//! Integration tests for the lock-free transport and rate reconciliation
//!
//! Exercises the SPSC ring and the linear resampler the way the engine tick
//! uses them: device-sized writes on one side, engine-block reads plus
//! resampling on the other.

use troubadour_infra::audio::{spsc_ring, LinearResampler};

// ============================================================================
// RING ROUND-TRIP PROPERTIES
// ============================================================================

#[test]
fn ring_concatenated_reads_equal_concatenated_writes() {
    // For any write/read schedule whose total fits the capacity, the read
    // stream is the exact prefix of the write stream.
    let schedules: &[(&[usize], &[usize])] = &[
        (&[4, 4, 4], &[2, 6, 4]),
        (&[1, 1, 1, 1, 1, 1, 1], &[7]),
        (&[16], &[1, 2, 3, 4, 5, 1]),
        (&[5, 7, 3], &[15]),
    ];

    for (writes, reads) in schedules {
        let (mut producer, mut consumer) = spsc_ring(16);

        let mut written: Vec<f32> = Vec::new();
        let mut counter = 0.0f32;
        for &n in writes.iter() {
            let chunk: Vec<f32> = (0..n)
                .map(|_| {
                    counter += 1.0;
                    counter
                })
                .collect();
            assert_eq!(producer.write(&chunk), n);
            written.extend_from_slice(&chunk);
        }

        let mut read_back: Vec<f32> = Vec::new();
        for &n in reads.iter() {
            let mut buf = vec![0.0; n];
            let got = consumer.read(&mut buf);
            read_back.extend_from_slice(&buf[..got]);
        }

        assert_eq!(read_back, written[..read_back.len()]);
    }
}

#[test]
fn ring_never_blocks_on_pressure() {
    let (mut producer, mut consumer) = spsc_ring(8);

    // Overrun: short write, no blocking
    assert_eq!(producer.write(&[1.0; 32]), 8);
    // Underrun: short read, no blocking
    let mut buf = [0.0f32; 32];
    assert_eq!(consumer.read(&mut buf), 8);
    assert_eq!(consumer.read(&mut buf), 0);
}

// ============================================================================
// RESAMPLER LENGTH PROPERTIES
// ============================================================================

#[test]
fn resampler_output_length_within_one_of_ideal() {
    let rates = [44_100u32, 48_000, 88_200, 96_000, 192_000];

    for &src in &rates {
        for &dst in &rates {
            let mut resampler = LinearResampler::new(src, dst, 2);
            let mut total_out = 0usize;
            let mut total_in = 0usize;

            for n in [64usize, 512, 100, 7, 256] {
                let input = vec![0.1f32; n * 2];
                let mut out = Vec::new();
                total_out += resampler.process(&input, &mut out);
                total_in += n;

                let ideal = (total_in as f64 * dst as f64 / src as f64).round() as isize;
                assert!(
                    (total_out as isize - ideal).abs() <= 1,
                    "{} -> {}: {} produced, ideal {}",
                    src,
                    dst,
                    total_out,
                    ideal
                );
            }
        }
    }
}

#[test]
fn resampler_preserves_amplitude_bounds() {
    let mut resampler = LinearResampler::new(44_100, 96_000, 2);
    let input: Vec<f32> = (0..512).map(|i| (i as f32 * 0.13).sin()).collect();
    let mut out = Vec::new();
    resampler.process(&input, &mut out);

    // Linear interpolation never overshoots its neighbors
    for &s in &out {
        assert!(s.abs() <= 1.0 + 1e-6);
    }
}

// ============================================================================
// RING + RESAMPLER PIPELINE
// ============================================================================

#[test]
fn capture_pipeline_delivers_engine_blocks() {
    // Simulate: a 44.1 kHz stereo device feeding a 48 kHz engine through a
    // ring, tick by tick, the way the engine gathers input.
    let device_rate = 44_100u32;
    let engine_rate = 48_000u32;
    let engine_frames = 512usize;
    let block_samples = engine_frames * 2;

    let (mut producer, mut consumer) = spsc_ring(block_samples * 8);
    let mut resampler = LinearResampler::new(device_rate, engine_rate, 2);
    let mut pending: Vec<f32> = Vec::new();

    let device_block = 441usize; // frames per device callback
    let mut blocks_delivered = 0;
    let mut phase = 0.0f32;

    for _tick in 0..50 {
        // Device side: one callback block of a sine
        let chunk: Vec<f32> = (0..device_block * 2)
            .map(|i| {
                if i % 2 == 0 {
                    phase += 0.01;
                }
                (phase).sin()
            })
            .collect();
        producer.write(&chunk);

        // Engine side: drain the ring, resample, cut one exact block
        let need_dev_frames = engine_frames * device_rate as usize / engine_rate as usize + 1;
        let mut read_buf = vec![0.0f32; need_dev_frames * 2];
        let got = consumer.read(&mut read_buf);
        resampler.process(&read_buf[..got], &mut pending);

        if pending.len() >= block_samples {
            let block: Vec<f32> = pending.drain(..block_samples).collect();
            assert_eq!(block.len(), block_samples);
            assert!(block.iter().all(|s| s.abs() <= 1.0 + 1e-6));
            blocks_delivered += 1;
        }
    }

    // 50 device blocks at 441 frames resample to about 48000/44100 times as
    // many engine frames; nearly every tick must have yielded a full block.
    assert!(blocks_delivered >= 45, "only {} blocks", blocks_delivered);
}
