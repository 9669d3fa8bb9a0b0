//! Speech capture and spoken-reply playback
//!
//! Both sit behind narrow provider traits so the turn logic never touches a
//! device directly.

pub mod capture;
pub mod playback;

pub use capture::{
    AudioClip, AudioRecorder, CaptureError, FileRecorder, QueuedRecognizer, RecognitionEvent,
    RecordedRecognizer, SpeechCapture, SpeechRecognizer, UtteranceQueue,
};
pub use playback::{
    clip_duration, default_provider, EndedCallback, PlaybackController, PlaybackHandle,
    PlaybackProvider, SilentPlayback,
};

#[cfg(feature = "audio-io")]
pub use playback::RodioPlayback;
