// Continuous capture tests against a scripted in-memory device
//
// RUN:
//   cargo test --test capture_loop

mod common;

use std::ops::ControlFlow;
use std::time::Duration;

use common::{init_logger, Event, MockDevice};
use v4l_capture::{CaptureLoop, Error, FourCC, Ownership, Session, Timestamp};

const TIMEOUT: Duration = Duration::from_secs(2);

fn streaming(dev: &MockDevice) -> Session<MockDevice> {
    init_logger();
    let mut session = Session::new();
    session.attach(dev.clone()).unwrap();
    session.negotiate_format(FourCC::MJPG).unwrap();
    session.allocate_buffers(3).unwrap();
    session.start_streaming().unwrap();
    session
}

#[test]
fn test_run_until_consumer_breaks() {
    let dev = MockDevice::camera();
    let mut session = streaming(&dev);
    let mut capture = CaptureLoop::new(TIMEOUT);

    let mut sizes = Vec::new();
    let frames = capture
        .run(&mut session, |frame| {
            sizes.push(frame.len());
            if sizes.len() < 10 {
                ControlFlow::Continue(())
            } else {
                ControlFlow::Break(())
            }
        })
        .unwrap();

    assert_eq!(frames, 10);
    assert_eq!(capture.frames(), 10);
    assert!(sizes.iter().all(|&len| len == 4096));
    // every frame went back to the driver
    assert_eq!(session.pool().unwrap().outstanding(), 0);
    assert_eq!(dev.state().queued.len(), 3);
}

#[test]
fn test_rate_from_frame_timestamps() {
    let dev = MockDevice::camera();
    let mut session = streaming(&dev);
    let mut capture = CaptureLoop::new(TIMEOUT);

    for (index, usec) in [(0, 0), (1, 33_333), (2, 66_666)] {
        dev.push(Event::Ready {
            index,
            bytesused: 100,
            timestamp: Timestamp::new(5, usec),
        });
    }
    assert!(capture
        .step(&mut session, |_| ControlFlow::Continue(()))
        .is_ok());
    assert_eq!(capture.rate(), None);

    capture
        .step(&mut session, |_| ControlFlow::Continue(()))
        .unwrap();
    let rate = capture.rate().unwrap();
    assert!((rate - 30.0).abs() < 0.01, "{}", rate);

    capture
        .step(&mut session, |_| ControlFlow::Continue(()))
        .unwrap();
    assert_eq!(capture.frames(), 3);
}

#[test]
fn test_timeout_ends_run() {
    let dev = MockDevice::camera();
    let mut session = streaming(&dev);
    let mut capture = CaptureLoop::new(TIMEOUT);

    dev.ready(0, 100);
    dev.ready(1, 100);
    dev.push(Event::Timeout);

    let err = capture
        .run(&mut session, |_| ControlFlow::Continue(()))
        .unwrap_err();
    assert!(err.is_timeout(), "{:?}", err);
    assert_eq!(capture.frames(), 2);

    // the caller decides whether to go on
    let frames = capture
        .run(&mut session, |_| ControlFlow::Break(()))
        .unwrap();
    assert_eq!(frames, 1);
    assert_eq!(capture.frames(), 3);
}

#[test]
fn test_io_error_ends_run() {
    let dev = MockDevice::camera();
    let mut session = streaming(&dev);
    let mut capture = CaptureLoop::new(TIMEOUT);

    dev.ready(0, 100);
    dev.push(Event::WaitError(libc::EIO));

    let err = capture
        .run(&mut session, |_| ControlFlow::Continue(()))
        .unwrap_err();
    assert!(matches!(err, Error::AcquireIo(_)), "{:?}", err);
    assert_eq!(capture.frames(), 1);
}

#[test]
fn test_release_failure_does_not_end_run() {
    let dev = MockDevice::camera();
    let mut session = streaming(&dev);
    let mut capture = CaptureLoop::new(TIMEOUT);

    dev.ready(2, 100);
    dev.state().fail_queue = Some(2);

    let mut seen = Vec::new();
    capture
        .run(&mut session, |frame| {
            seen.push(frame.index());
            if seen.len() < 4 {
                ControlFlow::Continue(())
            } else {
                ControlFlow::Break(())
            }
        })
        .unwrap();

    assert_eq!(seen.len(), 4);
    assert_eq!(seen[0], 2);
    assert!(seen[1..].iter().all(|&index| index != 2));
    assert_eq!(session.pool().unwrap().owner(2), Some(Ownership::Consumer));
}
