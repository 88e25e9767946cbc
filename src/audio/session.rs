//! State shared between the controller and the playback thread.
//!
//! Only atomics: the stop flag is the one signal the controller writes for
//! the loop; everything else is a snapshot the loop publishes or a value the
//! controller keeps for the next session.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

pub const DEFAULT_SOURCE_SAMPLE_RATE: u32 = 44100;

#[derive(Debug)]
pub struct SessionState {
    playing: AtomicBool,
    stop_requested: AtomicBool,
    relative_speed: AtomicU32,
    volume: AtomicU32,
    source_sample_rate: AtomicU32,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            playing: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
            relative_speed: AtomicU32::new(1.0f32.to_bits()),
            volume: AtomicU32::new(1.0f32.to_bits()),
            source_sample_rate: AtomicU32::new(DEFAULT_SOURCE_SAMPLE_RATE),
        }
    }
}

impl SessionState {
    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::SeqCst)
    }

    pub fn set_playing(&self, playing: bool) {
        self.playing.store(playing, Ordering::SeqCst);
    }

    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    pub fn clear_stop(&self) {
        self.stop_requested.store(false, Ordering::SeqCst);
    }

    pub fn relative_speed(&self) -> f32 {
        f32::from_bits(self.relative_speed.load(Ordering::Relaxed))
    }

    pub fn set_relative_speed(&self, speed: f32) {
        self.relative_speed.store(speed.to_bits(), Ordering::Relaxed);
    }

    pub fn volume(&self) -> f32 {
        f32::from_bits(self.volume.load(Ordering::Relaxed))
    }

    pub fn set_volume(&self, volume: f32) {
        self.volume.store(volume.to_bits(), Ordering::Relaxed);
    }

    pub fn source_sample_rate(&self) -> u32 {
        self.source_sample_rate.load(Ordering::Relaxed)
    }

    pub fn set_source_sample_rate(&self, rate: u32) {
        self.source_sample_rate.store(rate, Ordering::Relaxed);
    }
}
