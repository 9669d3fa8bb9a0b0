//! Spoken-reply playback with at most one active clip

use crate::{ParlanceError, Result};
use std::io::Cursor;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Invoked once when a clip plays to completion; never after `stop`
pub type EndedCallback = Box<dyn FnOnce() + Send + 'static>;

/// Platform playback capability
pub trait PlaybackProvider: Send {
    fn play(&mut self, audio: Vec<u8>, on_ended: EndedCallback) -> Result<()>;

    /// Pause, rewind and release the current clip, dropping its callback
    fn stop(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PlaybackHandle(u64);

impl PlaybackHandle {
    pub fn id(&self) -> u64 {
        self.0
    }
}

pub struct PlaybackController {
    provider: Box<dyn PlaybackProvider>,
    active: Option<PlaybackHandle>,
    next_id: u64,
}

impl PlaybackController {
    pub fn new(provider: Box<dyn PlaybackProvider>) -> Self {
        Self {
            provider,
            active: None,
            next_id: 1,
        }
    }

    /// Start a clip, stopping whatever was playing
    ///
    /// `on_ended` receives the handle of the clip that finished, so the
    /// caller can tell a current clip from a superseded one.
    pub fn play<F>(&mut self, audio: Vec<u8>, on_ended: F) -> Result<PlaybackHandle>
    where
        F: FnOnce(PlaybackHandle) + Send + 'static,
    {
        if let Some(previous) = self.active.take() {
            debug!("Stopping clip {} for a new one", previous.0);
            self.provider.stop();
        }

        let handle = PlaybackHandle(self.next_id);
        self.next_id += 1;

        self.provider
            .play(audio, Box::new(move || on_ended(handle)))?;
        self.active = Some(handle);
        debug!("Playing clip {}", handle.0);
        Ok(handle)
    }

    /// Stop `handle` if it is still the active clip
    pub fn stop(&mut self, handle: PlaybackHandle) -> bool {
        if self.active == Some(handle) {
            self.provider.stop();
            self.active = None;
            true
        } else {
            false
        }
    }

    /// Stop whatever is playing
    pub fn stop_active(&mut self) -> Option<PlaybackHandle> {
        let handle = self.active.take()?;
        self.provider.stop();
        Some(handle)
    }

    /// Record that `handle` finished on its own; false if it was superseded
    pub fn finish(&mut self, handle: PlaybackHandle) -> bool {
        if self.active == Some(handle) {
            self.active = None;
            true
        } else {
            false
        }
    }

    pub fn active(&self) -> Option<PlaybackHandle> {
        self.active
    }

    pub fn is_playing(&self) -> bool {
        self.active.is_some()
    }
}

/// Headless playback: waits out the clip's duration without a device
pub struct SilentPlayback {
    timer: Option<JoinHandle<()>>,
}

impl SilentPlayback {
    pub fn new() -> Self {
        Self { timer: None }
    }
}

impl Default for SilentPlayback {
    fn default() -> Self {
        Self::new()
    }
}

impl PlaybackProvider for SilentPlayback {
    fn play(&mut self, audio: Vec<u8>, on_ended: EndedCallback) -> Result<()> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|_| ParlanceError::Playback("no async runtime for playback timer".into()))?;

        self.stop();
        let duration = clip_duration(&audio);
        debug!("Silent playback for {:?}", duration);

        self.timer = Some(runtime.spawn(async move {
            tokio::time::sleep(duration).await;
            on_ended();
        }));
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.abort();
        }
    }
}

impl Drop for SilentPlayback {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Duration of a WAV clip; zero for anything hound cannot read
pub fn clip_duration(audio: &[u8]) -> Duration {
    match hound::WavReader::new(Cursor::new(audio)) {
        Ok(reader) => {
            let spec = reader.spec();
            if spec.sample_rate == 0 {
                return Duration::ZERO;
            }
            Duration::from_secs_f64(reader.duration() as f64 / spec.sample_rate as f64)
        }
        Err(e) => {
            warn!("Cannot read clip duration: {}", e);
            Duration::ZERO
        }
    }
}

#[cfg(feature = "audio-io")]
pub use device::RodioPlayback;

#[cfg(feature = "audio-io")]
mod device {
    use super::{EndedCallback, PlaybackProvider};
    use crate::{ParlanceError, Result};
    use crossbeam_channel::{bounded, unbounded, Sender};
    use rodio::{Decoder, OutputStream, Sink};
    use std::io::Cursor;
    use std::sync::atomic::{AtomicU64, Ordering};
    use std::sync::Arc;
    use std::thread;
    use tracing::{error, info};

    enum DeviceCommand {
        Play {
            source: Decoder<Cursor<Vec<u8>>>,
            on_ended: EndedCallback,
        },
        Stop,
        Shutdown,
    }

    /// Playback on the default output device
    ///
    /// The output stream is not `Send`, so it lives on a dedicated thread
    /// driven by commands.
    pub struct RodioPlayback {
        commands: Sender<DeviceCommand>,
    }

    impl RodioPlayback {
        pub fn new() -> Result<Self> {
            let (commands, rx) = unbounded::<DeviceCommand>();
            let (ready_tx, ready_rx) = bounded::<Result<()>>(1);

            thread::Builder::new()
                .name("playback".into())
                .spawn(move || {
                    let (_stream, output) = match OutputStream::try_default() {
                        Ok(pair) => {
                            let _ = ready_tx.send(Ok(()));
                            pair
                        }
                        Err(e) => {
                            let _ = ready_tx.send(Err(ParlanceError::Playback(format!(
                                "No output device available: {}",
                                e
                            ))));
                            return;
                        }
                    };

                    let current = Arc::new(AtomicU64::new(0));
                    let mut sink: Option<Arc<Sink>> = None;

                    while let Ok(command) = rx.recv() {
                        match command {
                            DeviceCommand::Play { source, on_ended } => {
                                if let Some(previous) = sink.take() {
                                    previous.stop();
                                }
                                let clip = match Sink::try_new(&output) {
                                    Ok(clip) => Arc::new(clip),
                                    Err(e) => {
                                        error!("Failed to open playback sink: {}", e);
                                        continue;
                                    }
                                };
                                clip.append(source);

                                let id = current.fetch_add(1, Ordering::SeqCst) + 1;
                                let waiter = Arc::clone(&clip);
                                let latest = Arc::clone(&current);
                                thread::spawn(move || {
                                    waiter.sleep_until_end();
                                    if latest.load(Ordering::SeqCst) == id {
                                        on_ended();
                                    }
                                });
                                sink = Some(clip);
                            }
                            DeviceCommand::Stop => {
                                current.fetch_add(1, Ordering::SeqCst);
                                if let Some(clip) = sink.take() {
                                    clip.stop();
                                }
                            }
                            DeviceCommand::Shutdown => break,
                        }
                    }
                    info!("Playback thread finished");
                })
                .map_err(|e| ParlanceError::Playback(e.to_string()))?;

            ready_rx
                .recv()
                .map_err(|_| ParlanceError::Playback("playback thread exited".into()))??;
            info!("Audio output ready");
            Ok(Self { commands })
        }
    }

    impl PlaybackProvider for RodioPlayback {
        fn play(&mut self, audio: Vec<u8>, on_ended: EndedCallback) -> Result<()> {
            let source = Decoder::new(Cursor::new(audio))
                .map_err(|e| ParlanceError::Playback(format!("Undecodable audio: {}", e)))?;
            self.commands
                .send(DeviceCommand::Play { source, on_ended })
                .map_err(|_| ParlanceError::Playback("playback thread exited".into()))
        }

        fn stop(&mut self) {
            let _ = self.commands.send(DeviceCommand::Stop);
        }
    }

    impl Drop for RodioPlayback {
        fn drop(&mut self) {
            let _ = self.commands.send(DeviceCommand::Shutdown);
        }
    }
}

/// Pick device playback when available, falling back to silent playback
pub fn default_provider(audio: bool) -> Box<dyn PlaybackProvider> {
    if !audio {
        info!("Audio output disabled");
        return Box::new(SilentPlayback::new());
    }
    device_provider().unwrap_or_else(|| Box::new(SilentPlayback::new()))
}

#[cfg(feature = "audio-io")]
fn device_provider() -> Option<Box<dyn PlaybackProvider>> {
    match RodioPlayback::new() {
        Ok(device) => Some(Box::new(device)),
        Err(e) => {
            warn!("{}; replies will not be audible", e);
            None
        }
    }
}

#[cfg(not(feature = "audio-io"))]
fn device_provider() -> Option<Box<dyn PlaybackProvider>> {
    warn!("Built without audio-io; replies will not be audible");
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Arc;

    /// Provider that records calls and lets the test fire the callback
    #[derive(Default)]
    struct ManualPlayback {
        pending: Arc<Mutex<Option<EndedCallback>>>,
        stops: Arc<Mutex<usize>>,
        fail: bool,
    }

    impl PlaybackProvider for ManualPlayback {
        fn play(&mut self, _audio: Vec<u8>, on_ended: EndedCallback) -> Result<()> {
            if self.fail {
                return Err(ParlanceError::Playback("device gone".into()));
            }
            *self.pending.lock() = Some(on_ended);
            Ok(())
        }

        fn stop(&mut self) {
            *self.stops.lock() += 1;
            self.pending.lock().take();
        }
    }

    fn wav_bytes(samples: u32, sample_rate: u32) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for _ in 0..samples {
                writer.write_sample(0i16).unwrap();
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    #[test]
    fn test_play_replaces_active_clip() {
        let provider = ManualPlayback::default();
        let stops = Arc::clone(&provider.stops);
        let mut controller = PlaybackController::new(Box::new(provider));

        let first = controller.play(vec![1], |_| {}).unwrap();
        let second = controller.play(vec![2], |_| {}).unwrap();

        assert_ne!(first, second);
        assert_eq!(controller.active(), Some(second));
        assert_eq!(*stops.lock(), 1);
        assert!(!controller.finish(first));
        assert!(controller.finish(second));
        assert!(!controller.is_playing());
    }

    #[test]
    fn test_stop_only_affects_active_handle() {
        let mut controller = PlaybackController::new(Box::new(ManualPlayback::default()));
        let first = controller.play(vec![1], |_| {}).unwrap();
        let second = controller.play(vec![2], |_| {}).unwrap();

        assert!(!controller.stop(first));
        assert!(controller.is_playing());
        assert!(controller.stop(second));
        assert_eq!(controller.stop_active(), None);
    }

    #[test]
    fn test_callback_receives_handle() {
        let provider = ManualPlayback::default();
        let pending = Arc::clone(&provider.pending);
        let mut controller = PlaybackController::new(Box::new(provider));

        let ended = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&ended);
        let handle = controller
            .play(vec![1], move |h| *sink.lock() = Some(h))
            .unwrap();

        let callback = pending.lock().take().unwrap();
        callback();
        assert_eq!(*ended.lock(), Some(handle));
    }

    #[test]
    fn test_provider_failure_leaves_nothing_active() {
        let provider = ManualPlayback {
            fail: true,
            ..Default::default()
        };
        let mut controller = PlaybackController::new(Box::new(provider));
        assert!(controller.play(vec![1], |_| {}).is_err());
        assert_eq!(controller.active(), None);
    }

    #[test]
    fn test_clip_duration() {
        let wav = wav_bytes(8_000, 16_000);
        assert_eq!(clip_duration(&wav), Duration::from_millis(500));
        assert_eq!(clip_duration(b"not audio"), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_silent_playback_fires_once() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let mut controller = PlaybackController::new(Box::new(SilentPlayback::new()));

        let handle = controller
            .play(wav_bytes(160, 16_000), move |h| {
                let _ = tx.send(h);
            })
            .unwrap();

        let ended = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap();
        assert_eq!(ended, Some(handle));
        assert!(controller.finish(handle));
    }

    #[tokio::test]
    async fn test_silent_playback_stop_drops_callback() {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel::<PlaybackHandle>();
        let mut controller = PlaybackController::new(Box::new(SilentPlayback::new()));

        let handle = controller
            .play(wav_bytes(16_000, 16_000), move |h| {
                let _ = tx.send(h);
            })
            .unwrap();
        assert!(controller.stop(handle));

        // The aborted timer drops the sender without sending
        let ended = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .unwrap();
        assert_eq!(ended, None);
    }
}
