use std::fs;
use std::path::Path;
use serde::Deserialize;

#[derive(Deserialize)]
struct Config {
    application: Application,
    stream: Stream,
    playback: Playback,
    controls: Controls,
}

#[derive(Deserialize)]
struct Application {
    name: String,
    version: String,
}

#[derive(Deserialize)]
struct Stream {
    uri: String,
}

#[derive(Deserialize)]
struct Playback {
    device: String,
    period_size: usize,
    buffer_multiplier: usize,
    nominal_sample_rate: u32,
    channels: u16,
    dequeue_timeout_us: u64,
    input_slots: usize,
    output_slots: usize,
    flush_on_end_of_stream: bool,
}

#[derive(Deserialize)]
struct Controls {
    initial_speed: f32,
    initial_volume: f32,
}


// 在编译时读取 config.toml 并设置环境变量
fn main() {
    println!("cargo:rerun-if-changed=config.toml");

    let config_path = Path::new("config.toml");
    if !config_path.exists() {
        panic!("config.toml not found!");
    }

    let config_str = fs::read_to_string(config_path).expect("Failed to read config.toml");
    let config: Config = toml::from_str(&config_str).expect("Failed to parse config.toml");

    // 应用信息
    println!("cargo:rustc-env=APP_NAME={}", config.application.name);
    println!("cargo:rustc-env=APP_VERSION={}", config.application.version);

    // 音频流
    println!("cargo:rustc-env=STREAM_URI={}", config.stream.uri);

    // 播放配置
    println!("cargo:rustc-env=PLAYBACK_DEVICE={}", config.playback.device);
    println!("cargo:rustc-env=PLAYBACK_PERIOD_SIZE={}", config.playback.period_size);
    println!("cargo:rustc-env=PLAYBACK_BUFFER_MULTIPLIER={}", config.playback.buffer_multiplier);
    println!("cargo:rustc-env=PLAYBACK_NOMINAL_SAMPLE_RATE={}", config.playback.nominal_sample_rate);
    println!("cargo:rustc-env=PLAYBACK_CHANNELS={}", config.playback.channels);
    println!("cargo:rustc-env=PLAYBACK_DEQUEUE_TIMEOUT_US={}", config.playback.dequeue_timeout_us);
    println!("cargo:rustc-env=PLAYBACK_INPUT_SLOTS={}", config.playback.input_slots);
    println!("cargo:rustc-env=PLAYBACK_OUTPUT_SLOTS={}", config.playback.output_slots);
    println!("cargo:rustc-env=PLAYBACK_FLUSH_ON_EOS={}", config.playback.flush_on_end_of_stream);

    // 控制初始值
    println!("cargo:rustc-env=CONTROLS_INITIAL_SPEED={}", config.controls.initial_speed);
    println!("cargo:rustc-env=CONTROLS_INITIAL_VOLUME={}", config.controls.initial_volume);
}
