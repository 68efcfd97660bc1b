// Device node tests
//
// Missing-node handling runs everywhere. The capture test needs a camera at /dev/video0 that
// supports MJPEG:
//   cargo test --test hardware -- --ignored --nocapture

use std::ops::ControlFlow;

use v4l_capture::device::Handle;
use v4l_capture::{CaptureLoop, Config, Error, Session, State};

fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

#[test]
fn test_missing_node_is_unavailable() {
    init_logger();
    let mut session: Session<Handle> = Session::new();
    let err = session.open("/dev/video-missing-node").unwrap_err();
    match &err {
        Error::DeviceUnavailable { path, source } => {
            assert_eq!(path.to_str(), Some("/dev/video-missing-node"));
            assert_eq!(source.kind(), std::io::ErrorKind::NotFound);
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert!(err.is_fatal());
    assert_eq!(session.state(), State::Closed);
}

#[test]
fn test_non_video_node_is_unsupported() {
    init_logger();
    let mut session: Session<Handle> = Session::new();
    let err = session.open("/dev/null").unwrap_err();
    assert!(matches!(err, Error::UnsupportedDevice(_)), "{:?}", err);
    assert_eq!(session.state(), State::Closed);
}

#[test]
#[ignore = "requires a V4L2 camera at /dev/video0"]
fn test_capture_from_default_device() {
    init_logger();
    let mut session = Session::prepare(Config::DEFAULT_DEVICE, Config::default()).unwrap();
    println!("{}", session.capabilities().unwrap());
    println!("{}", session.format().unwrap());
    assert!(session.buffer_count() >= Config::DEFAULT_BUFFER_COUNT as usize);

    session.start_streaming().unwrap();

    let mut capture = CaptureLoop::new(session.config().timeout);
    let frames = capture
        .run(&mut session, |frame| {
            assert!(!frame.is_empty());
            if frame.meta().sequence < 30 {
                ControlFlow::Continue(())
            } else {
                ControlFlow::Break(())
            }
        })
        .unwrap();
    assert!(frames > 0);
    println!("{} frames at {:?} fps", frames, capture.rate());

    session.stop_streaming().unwrap();
    session.close().unwrap();
}
