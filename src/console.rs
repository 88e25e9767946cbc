//! Line commands read from stdin.

use anyhow::{Context, Result, anyhow, bail};

/// Range of the speed and volume sliders.
pub const SLIDER_MAX: u32 = 100;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ConsoleCommand {
    Play,
    Stop,
    /// Play when idle, stop when playing.
    Toggle,
    Speed(f32),
    Volume(f32),
    Status,
    Help,
    Quit,
}

pub const HELP: &str = "\
commands:
  play                 start the stream
  stop                 stop playback
  toggle               play or stop
  speed <factor>       relative playback speed, 0.25 to 4
  slider <0-100>       speed slider, 0.5 + progress / 100
  volume <0-1>         output volume
  vol-slider <0-100>   volume slider, progress / 100
  status               show player state
  help                 show this text
  quit                 exit";

/// Speed for a slider position: 0.5 at the left end, 1.5 at the right.
pub fn speed_from_slider(progress: u32) -> f32 {
    0.5 + progress.min(SLIDER_MAX) as f32 / SLIDER_MAX as f32
}

pub fn volume_from_slider(progress: u32) -> f32 {
    progress.min(SLIDER_MAX) as f32 / SLIDER_MAX as f32
}

impl ConsoleCommand {
    /// Parses one input line. Blank lines yield `None`.
    pub fn parse(line: &str) -> Result<Option<Self>> {
        let mut words = line.split_whitespace();
        let Some(name) = words.next() else {
            return Ok(None);
        };
        let arg = words.next();
        if words.next().is_some() {
            bail!("too many arguments for '{}'", name);
        }

        let command = match name.to_ascii_lowercase().as_str() {
            "play" => ConsoleCommand::Play,
            "stop" => ConsoleCommand::Stop,
            "toggle" => ConsoleCommand::Toggle,
            "speed" => ConsoleCommand::Speed(float_arg(name, arg)?),
            "slider" => ConsoleCommand::Speed(speed_from_slider(progress_arg(name, arg)?)),
            "volume" => ConsoleCommand::Volume(float_arg(name, arg)?),
            "vol-slider" => ConsoleCommand::Volume(volume_from_slider(progress_arg(name, arg)?)),
            "status" => ConsoleCommand::Status,
            "help" | "?" => ConsoleCommand::Help,
            "quit" | "exit" => ConsoleCommand::Quit,
            other => bail!("unknown command '{}', try 'help'", other),
        };
        Ok(Some(command))
    }
}

fn float_arg(name: &str, arg: Option<&str>) -> Result<f32> {
    let arg = arg.ok_or_else(|| anyhow!("'{}' needs a number", name))?;
    arg.parse()
        .with_context(|| format!("'{}' is not a number", arg))
}

fn progress_arg(name: &str, arg: Option<&str>) -> Result<u32> {
    let arg = arg.ok_or_else(|| anyhow!("'{}' needs a position 0-{}", name, SLIDER_MAX))?;
    let progress: u32 = arg
        .parse()
        .with_context(|| format!("'{}' is not a slider position", arg))?;
    if progress > SLIDER_MAX {
        bail!("slider position {} is above {}", progress, SLIDER_MAX);
    }
    Ok(progress)
}
