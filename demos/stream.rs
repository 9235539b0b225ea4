//! Stream every display as JPEG for a few seconds, then write the last frame of each.
//!
//! Usage: `cargo run --example stream -- [fps] [seconds]`

#[cfg(windows)]
fn main() -> anyhow::Result<()> {
    use std::thread;
    use std::time::{Duration, Instant};

    use anyhow::Context;
    use dxgi_screen_stream::{
        capture_display_gdi, get_displays, JpegSink, LatestEncodedSlot, StreamingPipelineBuilder,
    };

    env_logger::init();

    let mut args = std::env::args().skip(1);
    let fps: u32 = args.next().map(|a| a.parse()).transpose()?.unwrap_or(30);
    let seconds: u64 = args.next().map(|a| a.parse()).transpose()?.unwrap_or(5);

    let displays = get_displays().context("enumerating displays")?;
    for display in &displays {
        println!(
            "display {}: {} {}x{} at ({}, {}){}",
            display.index,
            display.name,
            display.width,
            display.height,
            display.x,
            display.y,
            if display.is_primary { " [primary]" } else { "" }
        );
    }

    let indices: Vec<usize> = displays.iter().map(|d| d.index).collect();
    let slots: Vec<LatestEncodedSlot> = indices.iter().map(|_| LatestEncodedSlot::new()).collect();

    // one subscriber per display, as an MJPEG client would be
    let subscribers: Vec<_> = slots
        .iter()
        .cloned()
        .map(|slot| {
            thread::spawn(move || {
                let mut seen = 0;
                let mut received = 0u64;
                loop {
                    match slot.wait_newer(seen, Duration::from_secs(1)) {
                        Some((sequence, _jpeg)) => {
                            seen = sequence;
                            received += 1;
                        }
                        None if slot.is_closed() => break received,
                        None => {}
                    }
                }
            })
        })
        .collect();

    let pipeline = StreamingPipelineBuilder::new()
        .displays(indices.iter().copied())
        .target_fps(fps)
        .acquire_timeout_ms(5)
        .build()?;

    let sink_slots = slots.clone();
    pipeline.start(move |display| {
        let position = indices.iter().position(|&i| i == display).unwrap_or(0);
        JpegSink::new(sink_slots[position].clone())
    })?;

    let started = Instant::now();
    while started.elapsed() < Duration::from_secs(seconds) {
        thread::sleep(Duration::from_secs(1));
        for (display, stats) in pipeline.stats() {
            println!(
                "display {}: {} frames, {} idle ticks, {} recoveries",
                display, stats.frames_delivered, stats.no_new_frame, stats.recoveries
            );
        }
    }

    pipeline.stop();
    let mut failed = Vec::new();
    for outcome in pipeline.join() {
        match &outcome.error {
            Some(e) => {
                eprintln!("display {} failed: {}", outcome.display_index, e);
                failed.push(outcome.display_index);
            }
            None => println!("display {} stopped cleanly", outcome.display_index),
        }
    }

    // one GDI still for every display duplication refused
    for display in failed {
        let frame = capture_display_gdi(display).context("GDI fallback")?;
        let jpeg = JpegSink::new(LatestEncodedSlot::new()).encode(&frame)?;
        let path = format!("display_{}_gdi.jpg", display);
        std::fs::write(&path, &jpeg[..]).with_context(|| format!("writing {}", path))?;
        println!("wrote {} via GDI", path);
    }

    for (display, slot) in displays.iter().zip(&slots) {
        if let Some((_, jpeg)) = slot.latest() {
            let path = format!("display_{}.jpg", display.index);
            std::fs::write(&path, &jpeg[..]).with_context(|| format!("writing {}", path))?;
            println!("wrote {} ({} bytes)", path, jpeg.len());
        }
        slot.close();
    }
    for (display, subscriber) in displays.iter().zip(subscribers) {
        let received = subscriber.join().map_err(|_| anyhow::anyhow!("subscriber panicked"))?;
        println!("display {}: subscriber saw {} frames", display.index, received);
    }

    Ok(())
}

#[cfg(not(windows))]
fn main() {
    eprintln!("Desktop Duplication is only available on Windows");
}
