//! The controller facing [`PitchPlayer`].
//!
//! Each `start` spawns a dedicated "audio-play" thread that opens the
//! session, reports readiness back and then runs the playback loop. The
//! controller talks to a running loop through the stop flag in
//! [`SessionState`] and a command channel drained between iterations.

use std::sync::Arc;
use std::sync::mpsc::sync_channel;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use tokio::sync::mpsc::{self, UnboundedSender};

use super::audio_system::{AudioConfig, Backend};
use super::play::{PlaybackSession, PlayerCommand, PlayerEvent, SessionEnd, playback_rate};
use super::session::SessionState;
use crate::error::PlayerError;

/// Accepted range of the relative playback speed.
pub const MIN_RELATIVE_SPEED: f32 = 0.25;
pub const MAX_RELATIVE_SPEED: f32 = 4.0;

pub struct PitchPlayer {
    uri: String,
    config: AudioConfig,
    backend: Arc<dyn Backend>,
    state: Arc<SessionState>,
    events: Option<UnboundedSender<PlayerEvent>>,
    session: Mutex<Option<JoinHandle<SessionEnd>>>,
    /// Sender of the newest session, installed before its setup starts.
    commands: Mutex<Option<UnboundedSender<PlayerCommand>>>,
}

impl PitchPlayer {
    pub fn new(
        uri: impl Into<String>,
        config: AudioConfig,
        backend: Arc<dyn Backend>,
        events: Option<UnboundedSender<PlayerEvent>>,
    ) -> Self {
        Self {
            uri: uri.into(),
            config,
            backend,
            state: Arc::new(SessionState::default()),
            events,
            session: Mutex::new(None),
            commands: Mutex::new(None),
        }
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// Starts a session and returns once it is playing or has failed to set up.
    pub fn start(&self) -> Result<(), PlayerError> {
        let mut session = self.session.lock();
        if self.state.is_playing() {
            return Err(PlayerError::AlreadyPlaying);
        }
        if let Some(finished) = session.take() {
            let _ = finished.join();
        }
        self.state.clear_stop();

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        *self.commands.lock() = Some(command_tx);
        let (ready_tx, ready_rx) = sync_channel::<Result<(), PlayerError>>(1);
        let uri = self.uri.clone();
        let config = self.config.clone();
        let backend = self.backend.clone();
        let state = self.state.clone();
        let events = self.events.clone();

        let thread = thread::Builder::new()
            .name("audio-play".into())
            .spawn(move || {
                match PlaybackSession::open(&uri, backend.as_ref(), &config, state.clone(), events) {
                    Ok(playback) => {
                        state.set_playing(true);
                        let _ = ready_tx.send(Ok(()));
                        playback.run(command_rx)
                    }
                    Err(e) => {
                        log::error!("Playback setup failed: {}", e);
                        let reason = e.to_string();
                        let _ = ready_tx.send(Err(e));
                        SessionEnd::Failed(reason)
                    }
                }
            })?;

        match ready_rx.recv() {
            Ok(Ok(())) => {
                log::info!("Playing {}", self.uri);
                *session = Some(thread);
                Ok(())
            }
            Ok(Err(e)) => {
                let _ = thread.join();
                Err(e)
            }
            Err(_) => {
                let _ = thread.join();
                Err(PlayerError::SessionLost)
            }
        }
    }

    /// Asks the running session, or one still in setup, to stop. Returns
    /// immediately; use [`PitchPlayer::wait`] to block until resources are
    /// released. The next `start` clears the request.
    pub fn stop(&self) {
        if self.state.is_playing() {
            log::info!("Stop requested");
        }
        self.state.request_stop();
    }

    /// Joins the session thread, if any, and returns how it ended.
    pub fn wait(&self) -> Option<SessionEnd> {
        let handle = self.session.lock().take()?;
        match handle.join() {
            Ok(end) => Some(end),
            Err(_) => {
                log::error!("Playback thread panicked");
                self.state.set_playing(false);
                None
            }
        }
    }

    pub fn is_playing(&self) -> bool {
        self.state.is_playing()
    }

    /// Sets the speed factor for this and later sessions. Tempo and pitch
    /// change together. Speeds outside
    /// [`MIN_RELATIVE_SPEED`, `MAX_RELATIVE_SPEED`] are rejected.
    pub fn set_relative_playback_speed(&self, speed: f32) -> Result<(), PlayerError> {
        let in_range = (MIN_RELATIVE_SPEED..=MAX_RELATIVE_SPEED).contains(&speed);
        if !in_range || playback_rate(self.state.source_sample_rate(), speed) == 0 {
            return Err(PlayerError::InvalidParameter {
                name: "speed",
                value: speed,
            });
        }
        self.state.set_relative_speed(speed);
        self.send(PlayerCommand::SetSpeed(speed));
        Ok(())
    }

    /// Sets the volume for this and later sessions, clamped to [0, 1].
    pub fn set_volume(&self, volume: f32) -> Result<(), PlayerError> {
        if !volume.is_finite() {
            return Err(PlayerError::InvalidParameter {
                name: "volume",
                value: volume,
            });
        }
        let volume = volume.clamp(0.0, 1.0);
        self.state.set_volume(volume);
        self.send(PlayerCommand::SetVolume(volume));
        Ok(())
    }

    pub fn relative_playback_speed(&self) -> f32 {
        self.state.relative_speed()
    }

    pub fn volume(&self) -> f32 {
        self.state.volume()
    }

    /// Last rate reported by the decoder, or the nominal rate before that.
    pub fn source_sample_rate(&self) -> u32 {
        self.state.source_sample_rate()
    }

    /// Queues `command` for the newest session. A session still in setup
    /// picks it up on its first iteration; a finished one has dropped its
    /// receiver and the command goes nowhere.
    fn send(&self, command: PlayerCommand) {
        if let Some(commands) = self.commands.lock().as_ref() {
            let _ = commands.send(command);
        }
    }
}

impl Drop for PitchPlayer {
    fn drop(&mut self) {
        self.stop();
        self.wait();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::testing::FakeBackend;
    use std::time::{Duration, Instant};

    fn player(backend: &FakeBackend) -> PitchPlayer {
        let config = AudioConfig {
            dequeue_timeout: Duration::ZERO,
            ..AudioConfig::default()
        };
        PitchPlayer::new("fake://stream", config, Arc::new(backend.clone()), None)
    }

    fn endless() -> FakeBackend {
        let mut backend = FakeBackend::audio(usize::MAX, 4096);
        backend.write_delay = Some(Duration::from_millis(1));
        backend
    }

    fn wait_until(mut done: impl FnMut() -> bool) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while !done() {
            assert!(Instant::now() < deadline, "condition not reached");
            thread::sleep(Duration::from_millis(2));
        }
    }

    #[test]
    fn start_stop_releases_everything() {
        let backend = endless();
        let player = player(&backend);

        player.start().unwrap();
        assert!(player.is_playing());
        assert!(matches!(player.start(), Err(PlayerError::AlreadyPlaying)));

        player.stop();
        assert_eq!(player.wait(), Some(SessionEnd::Stopped));
        assert!(!player.is_playing());

        let log = backend.log.lock();
        assert_eq!(log.sources_opened, 1);
        assert_eq!(log.source_released, 1);
        assert_eq!(log.decoder_released, 1);
        assert_eq!(log.sink_stopped, 1);
        assert_eq!(log.sink_released, 1);
    }

    #[test]
    fn setup_failure_is_returned_from_start() {
        let mut backend = FakeBackend::audio(1, 16);
        backend.tracks.clear();
        let player = player(&backend);

        assert!(matches!(player.start(), Err(PlayerError::UnsupportedTrack(_))));
        assert!(!player.is_playing());
        assert_eq!(player.wait(), None);
    }

    #[test]
    fn finished_session_can_be_restarted() {
        let backend = FakeBackend::audio(10, 4096);
        let player = player(&backend);

        player.start().unwrap();
        assert_eq!(player.wait(), Some(SessionEnd::EndOfStream));
        player.start().unwrap();
        assert_eq!(player.wait(), Some(SessionEnd::EndOfStream));

        let log = backend.log.lock();
        assert_eq!(log.sinks_opened, 2);
        assert_eq!(log.sink_released, 2);
        assert_eq!(log.sink_bytes.len(), 2 * 10 * 4096);
    }

    #[test]
    fn natural_end_clears_playing_without_wait() {
        let backend = FakeBackend::audio(3, 4096);
        let player = player(&backend);
        player.start().unwrap();
        wait_until(|| !player.is_playing());
        player.start().unwrap();
        player.wait();
    }

    #[test]
    fn invalid_speed_is_rejected() {
        let player = player(&FakeBackend::audio(1, 16));
        for speed in [0.0, -1.0, 1e-5, 0.249, 4.01, f32::NAN, f32::INFINITY] {
            assert!(matches!(
                player.set_relative_playback_speed(speed),
                Err(PlayerError::InvalidParameter { name: "speed", .. })
            ));
        }
        player.set_relative_playback_speed(1.25).unwrap();
        assert_eq!(player.relative_playback_speed(), 1.25);
    }

    #[test]
    fn speed_range_ends_are_accepted() {
        let player = player(&FakeBackend::audio(1, 16));
        player.set_relative_playback_speed(MIN_RELATIVE_SPEED).unwrap();
        assert_eq!(
            playback_rate(player.source_sample_rate(), player.relative_playback_speed()),
            11025
        );
        player.set_relative_playback_speed(MAX_RELATIVE_SPEED).unwrap();
        assert_eq!(
            playback_rate(player.source_sample_rate(), player.relative_playback_speed()),
            176400
        );
    }

    #[test]
    fn changes_during_setup_reach_the_sink() {
        let mut backend = endless();
        backend.open_sink_delay = Some(Duration::from_millis(300));
        let player = player(&backend);

        thread::scope(|scope| {
            let starting = scope.spawn(|| player.start());
            thread::sleep(Duration::from_millis(100));
            player.set_volume(0.3).unwrap();
            player.set_relative_playback_speed(2.0).unwrap();
            starting.join().unwrap().unwrap();
        });

        wait_until(|| {
            let log = backend.log.lock();
            log.volumes.contains(&(0.3, 0.3)) && log.rates.contains(&96000)
        });
        player.stop();
        assert_eq!(player.wait(), Some(SessionEnd::Stopped));
        assert_eq!(backend.log.lock().volumes.last(), Some(&(0.3, 0.3)));
    }

    #[test]
    fn stop_during_setup_ends_the_session() {
        let mut backend = endless();
        backend.open_sink_delay = Some(Duration::from_millis(200));
        let player = player(&backend);

        thread::scope(|scope| {
            let starting = scope.spawn(|| player.start());
            thread::sleep(Duration::from_millis(50));
            player.stop();
            starting.join().unwrap().unwrap();
        });

        assert_eq!(player.wait(), Some(SessionEnd::Stopped));
        assert_eq!(backend.log.lock().sink_released, 1);
    }

    #[test]
    fn volume_is_clamped() {
        let player = player(&FakeBackend::audio(1, 16));
        player.set_volume(1.5).unwrap();
        assert_eq!(player.volume(), 1.0);
        player.set_volume(-0.2).unwrap();
        assert_eq!(player.volume(), 0.0);
        assert!(player.set_volume(f32::NAN).is_err());
        assert_eq!(player.volume(), 0.0);
    }

    #[test]
    fn settings_before_start_apply_to_the_session() {
        let backend = FakeBackend::audio(4, 4096);
        let player = player(&backend);
        player.set_relative_playback_speed(0.75).unwrap();
        player.set_volume(0.5).unwrap();

        player.start().unwrap();
        player.wait();

        let log = backend.log.lock();
        assert_eq!(log.volumes, vec![(0.5, 0.5)]);
        assert_eq!(log.rates, vec![36000]);
        assert_eq!(player.source_sample_rate(), 48000);
    }

    #[test]
    fn changes_reach_a_running_session() {
        let backend = endless();
        let player = player(&backend);
        player.start().unwrap();
        wait_until(|| backend.log.lock().rates.contains(&48000));

        player.set_relative_playback_speed(2.0).unwrap();
        player.set_volume(0.3).unwrap();
        wait_until(|| {
            let log = backend.log.lock();
            log.rates.contains(&96000) && log.volumes.contains(&(0.3, 0.3))
        });

        player.stop();
        assert_eq!(player.wait(), Some(SessionEnd::Stopped));
    }

    #[test]
    fn events_report_the_session_lifecycle() {
        let backend = FakeBackend::audio(2, 4096);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let config = AudioConfig {
            dequeue_timeout: Duration::ZERO,
            ..AudioConfig::default()
        };
        let player = PitchPlayer::new("fake://stream", config, Arc::new(backend.clone()), Some(tx));
        player.start().unwrap();
        player.wait();

        let first = rx.try_recv().unwrap();
        assert_eq!(first, PlayerEvent::Started { buffer_size: 8192 });
        let mut last = first;
        while let Ok(event) = rx.try_recv() {
            last = event;
        }
        assert_eq!(last, PlayerEvent::Finished(SessionEnd::EndOfStream));
    }

    #[test]
    fn dropping_the_player_stops_the_session() {
        let backend = endless();
        {
            let player = player(&backend);
            player.start().unwrap();
        }
        let log = backend.log.lock();
        assert_eq!(log.source_released, 1);
        assert_eq!(log.sink_released, 1);
    }
}
