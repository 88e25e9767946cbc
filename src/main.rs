mod audio;
mod config;
mod console;
mod error;

use std::sync::Arc;

use audio::{PitchPlayer, PlayerEvent, SessionEnd, SystemBackend, playback_rate};
use config::Config;
use console::ConsoleCommand;
use tokio::io::{self, AsyncBufReadExt, BufReader};
use tokio::signal;
use tokio::sync::mpsc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 初始化日志，默认 info 级别
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // 加载配置
    let config = Config::new().unwrap_or_default();

    // 命令行第一个参数可覆盖流地址
    let uri = std::env::args()
        .nth(1)
        .unwrap_or_else(|| config.stream_uri.clone());

    let audio_config = config.audio_config();
    let backend = Arc::new(SystemBackend::new(audio_config.clone()));

    // 播放事件通道
    let (tx_player_event, mut rx_player_event) = mpsc::unbounded_channel::<PlayerEvent>();

    let player = Arc::new(PitchPlayer::new(
        uri,
        audio_config,
        backend,
        Some(tx_player_event),
    ));
    player.set_relative_playback_speed(config.initial_speed)?;
    player.set_volume(config.initial_volume)?;

    println!(
        "{} {} started. Stream: {}",
        config.app_name,
        config.app_version,
        player.uri()
    );
    println!("{}", console::HELP);

    let mut lines = BufReader::new(io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            // 监听 Ctrl+C 信号
            _ = signal::ctrl_c() => {
                println!("Received Ctrl+C, shutting down...");
                break;
            }

            // 播放线程上报的事件
            Some(event) = rx_player_event.recv() => {
                report_event(&event);
            }

            // 控制台命令
            line = lines.next_line(), if stdin_open => {
                match line {
                    Ok(Some(line)) => match ConsoleCommand::parse(&line) {
                        Ok(Some(ConsoleCommand::Quit)) => break,
                        Ok(Some(command)) => handle_command(&player, command).await,
                        Ok(None) => {}
                        Err(e) => eprintln!("{:#}", e),
                    },
                    Ok(None) => {
                        log::info!("stdin closed, waiting for Ctrl+C");
                        stdin_open = false;
                    }
                    Err(e) => {
                        log::error!("Failed to read stdin: {}", e);
                        stdin_open = false;
                    }
                }
            }
        }
    }

    stop_playback(&player).await;
    println!("Bye.");
    Ok(())
}

async fn handle_command(player: &Arc<PitchPlayer>, command: ConsoleCommand) {
    match command {
        ConsoleCommand::Play => start_playback(player).await,
        ConsoleCommand::Stop => stop_playback(player).await,
        ConsoleCommand::Toggle => {
            if player.is_playing() {
                stop_playback(player).await;
            } else {
                start_playback(player).await;
            }
        }
        ConsoleCommand::Speed(speed) => match player.set_relative_playback_speed(speed) {
            Ok(()) => println!(
                "Speed {:.2} ({} Hz)",
                speed,
                playback_rate(player.source_sample_rate(), speed)
            ),
            Err(e) => eprintln!("{}", e),
        },
        ConsoleCommand::Volume(volume) => match player.set_volume(volume) {
            Ok(()) => println!("Volume {:.2}", player.volume()),
            Err(e) => eprintln!("{}", e),
        },
        ConsoleCommand::Status => println!(
            "{} | speed {:.2} | volume {:.2} | source {} Hz | {}",
            if player.is_playing() { "playing" } else { "stopped" },
            player.relative_playback_speed(),
            player.volume(),
            player.source_sample_rate(),
            player.uri()
        ),
        ConsoleCommand::Help => println!("{}", console::HELP),
        ConsoleCommand::Quit => {}
    }
}

/// Opening the stream blocks on the network, so it runs off the runtime.
async fn start_playback(player: &Arc<PitchPlayer>) {
    let player = player.clone();
    match tokio::task::spawn_blocking(move || player.start()).await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => eprintln!("Failed to start playback: {}", e),
        Err(e) => log::error!("Start task failed: {}", e),
    }
}

async fn stop_playback(player: &Arc<PitchPlayer>) {
    let player = player.clone();
    let joined = tokio::task::spawn_blocking(move || {
        player.stop();
        player.wait()
    })
    .await;
    if let Err(e) = joined {
        log::error!("Stop task failed: {}", e);
    }
}

fn report_event(event: &PlayerEvent) {
    match event {
        PlayerEvent::Started { buffer_size } => {
            println!("Playing ({} byte write buffer)", buffer_size);
        }
        PlayerEvent::FormatChanged {
            sample_rate,
            channels,
        } => {
            println!("Stream format: {} Hz, {} channels", sample_rate, channels);
        }
        PlayerEvent::PlaybackRateChanged(hz) => {
            log::debug!("Playback rate now {} Hz", hz);
        }
        PlayerEvent::Finished(SessionEnd::Failed(reason)) => {
            eprintln!("Playback failed: {}", reason);
        }
        PlayerEvent::Finished(end) => {
            println!("Playback ended: {:?}", end);
        }
    }
}
