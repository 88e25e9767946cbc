use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::audio::{AudioConfig, EndOfStreamPolicy};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct Config {
    // 应用信息
    pub app_name: String,
    pub app_version: String,

    // 音频流地址，可被命令行第一个参数覆盖
    pub stream_uri: String,

    // 播放配置
    pub playback_device: String,
    pub playback_period_size: usize,
    pub buffer_multiplier: usize,
    pub nominal_sample_rate: u32,
    pub playback_channels: u16,
    pub dequeue_timeout_us: u64,
    pub input_slots: usize,
    pub output_slots: usize,
    pub flush_on_end_of_stream: bool,

    // 控制初始值
    pub initial_speed: f32,
    pub initial_volume: f32,
}

impl Config {
    /// 从编译时设置的环境变量创建配置
    /// 所有参数都在编译时从 config.toml 中读取
    pub fn new() -> Result<Self, &'static str> {
        Ok(Self {
            app_name: env!("APP_NAME").to_string(),
            app_version: env!("APP_VERSION").to_string(),

            stream_uri: env!("STREAM_URI").to_string(),

            playback_device: env!("PLAYBACK_DEVICE").to_string(),
            playback_period_size: env!("PLAYBACK_PERIOD_SIZE").parse()
                .map_err(|_| "Failed to parse PLAYBACK_PERIOD_SIZE")?,
            buffer_multiplier: env!("PLAYBACK_BUFFER_MULTIPLIER").parse()
                .map_err(|_| "Failed to parse PLAYBACK_BUFFER_MULTIPLIER")?,
            nominal_sample_rate: env!("PLAYBACK_NOMINAL_SAMPLE_RATE").parse()
                .map_err(|_| "Failed to parse PLAYBACK_NOMINAL_SAMPLE_RATE")?,
            playback_channels: env!("PLAYBACK_CHANNELS").parse()
                .map_err(|_| "Failed to parse PLAYBACK_CHANNELS")?,
            dequeue_timeout_us: env!("PLAYBACK_DEQUEUE_TIMEOUT_US").parse()
                .map_err(|_| "Failed to parse PLAYBACK_DEQUEUE_TIMEOUT_US")?,
            input_slots: env!("PLAYBACK_INPUT_SLOTS").parse()
                .map_err(|_| "Failed to parse PLAYBACK_INPUT_SLOTS")?,
            output_slots: env!("PLAYBACK_OUTPUT_SLOTS").parse()
                .map_err(|_| "Failed to parse PLAYBACK_OUTPUT_SLOTS")?,
            flush_on_end_of_stream: env!("PLAYBACK_FLUSH_ON_EOS").parse()
                .map_err(|_| "Failed to parse PLAYBACK_FLUSH_ON_EOS")?,

            initial_speed: env!("CONTROLS_INITIAL_SPEED").parse()
                .map_err(|_| "Failed to parse CONTROLS_INITIAL_SPEED")?,
            initial_volume: env!("CONTROLS_INITIAL_VOLUME").parse()
                .map_err(|_| "Failed to parse CONTROLS_INITIAL_VOLUME")?,
        })
    }

    /// Runtime parameters for the playback pipeline.
    pub fn audio_config(&self) -> AudioConfig {
        AudioConfig {
            playback_device: self.playback_device.clone(),
            playback_period_size: self.playback_period_size,
            buffer_multiplier: self.buffer_multiplier,
            nominal_sample_rate: self.nominal_sample_rate,
            channels: self.playback_channels,
            dequeue_timeout: Duration::from_micros(self.dequeue_timeout_us),
            input_slots: self.input_slots,
            output_slots: self.output_slots,
            end_of_stream: if self.flush_on_end_of_stream {
                EndOfStreamPolicy::Flush
            } else {
                EndOfStreamPolicy::Discard
            },
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new().expect("Failed to create default Config from build-time environment variables")
    }
}
