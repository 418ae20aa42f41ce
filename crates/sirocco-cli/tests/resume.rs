use sirocco::core::{Config, FrameSource};
use sirocco::io::{load_frames, FsCheckpoint, FRAMES_FILE};
use sirocco::track::Pipeline;

#[test]
fn resume_reads_frames_on_the_checkpointed_channel() {
    let dir = tempfile::tempdir().unwrap();
    // One frame of two 1x1x2 channels; only channel 1 carries signal.
    let mut bytes = Vec::new();
    bytes.extend_from_slice(b"SIRF");
    for v in [1u32, 2, 1, 1, 2] {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    for v in [0.0f32, 0.0, 0.5, 1.0] {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    std::fs::write(dir.path().join(FRAMES_FILE), bytes).unwrap();

    {
        let store = FsCheckpoint::open(dir.path()).unwrap();
        let session = Config {
            channel: Some(1),
            ..Config::default()
        };
        Pipeline::new(&store, session, false).unwrap();
    }

    // A later session supplies a fresh default config; the checkpointed one
    // wins, and the frames are sliced on the original channel.
    let store = FsCheckpoint::open(dir.path()).unwrap();
    let pipeline = Pipeline::new(&store, Config::default(), true).unwrap();
    assert_eq!(pipeline.config().channel, Some(1));
    let source = load_frames(dir.path(), pipeline.config().channel).unwrap();
    assert_eq!(source.frame(0).unwrap().as_slice(), &[0.5, 1.0]);
}
