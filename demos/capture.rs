use std::env;
use std::ops::ControlFlow;

use v4l_capture::{CaptureLoop, Config, Session};

fn main() -> v4l_capture::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let path = env::args()
        .nth(1)
        .unwrap_or_else(|| Config::DEFAULT_DEVICE.to_string());
    println!("Using device: {}\n", path);

    // Capture 30 frames by default
    let count = 30;

    let mut session = Session::prepare(&path, Config::default())?;
    if let Some(caps) = session.capabilities() {
        println!("{}", caps);
    }
    if let Some(format) = session.format() {
        println!("Active format:\n{}", format);
    }
    println!("Buffers: {}\n", session.buffer_count());

    session.start_streaming()?;

    let mut capture = CaptureLoop::new(session.config().timeout);
    let mut bytes = 0;
    let mut seen = 0;
    capture.run(&mut session, |frame| {
        let meta = frame.meta();
        println!("Buffer");
        println!("  index     : {}", frame.index());
        println!("  sequence  : {}", meta.sequence);
        println!("  timestamp : {}", meta.timestamp);
        println!("  flags     : {}", meta.flags);
        println!("  length    : {}", frame.len());

        bytes += frame.len();
        seen += 1;
        if seen < count {
            ControlFlow::Continue(())
        } else {
            ControlFlow::Break(())
        }
    })?;

    session.stop_streaming()?;
    session.close()?;

    println!();
    println!("Frames: {}", capture.frames());
    println!("Bytes: {}", bytes);
    if let Some(rate) = capture.rate() {
        println!("FPS: {:.2}", rate);
    }

    Ok(())
}
