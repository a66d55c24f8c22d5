//! Line commands read by the headless front end.

use anyhow::{anyhow, bail, Context};
use station_proto::protocol::{BotCommand, EqBand, TargetId};

use crate::dispatcher::Intent;

#[derive(Debug, Clone, PartialEq)]
pub enum LineCommand {
    Intent(Intent),
    Open(TargetId),
    Back,
    Bot(BotCommand),
    Help,
    Quit,
}

pub const HELP: &str = "\
commands:
  toggle | pause | resume | skip | stop | leave | clear
  play <query>          vol <0-100>        drag start|end
  bass on|off           autoplay on|off    eq low|mid|high <gain>
  del <n>               move <from> <to>   save <volume>
  refresh               open <id>          back
  bot start|stop        help               quit";

/// Blank lines parse to `None`.
pub fn parse_line(line: &str) -> anyhow::Result<Option<LineCommand>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }
    let (word, rest) = match line.split_once(char::is_whitespace) {
        Some((word, rest)) => (word, rest.trim()),
        None => (line, ""),
    };
    let args: Vec<&str> = rest.split_whitespace().collect();

    let intent = match word.to_ascii_lowercase().as_str() {
        "toggle" => Intent::Toggle,
        "pause" => Intent::Pause,
        "resume" => Intent::Resume,
        "skip" => Intent::Skip,
        "stop" => Intent::Stop,
        "leave" => Intent::Leave,
        "clear" => Intent::ClearQueue,
        "refresh" => Intent::Refresh,
        "play" => {
            if rest.is_empty() {
                bail!("usage: play <query>");
            }
            Intent::Play {
                query: rest.to_string(),
            }
        }
        "vol" | "volume" => Intent::SetVolume {
            level: parse_percent(single(&args, "vol <0-100>")?)?,
        },
        "drag" => match single(&args, "drag start|end")? {
            "start" => Intent::BeginVolumeDrag,
            "end" => Intent::EndVolumeDrag,
            other => bail!("drag takes start or end, not {}", other),
        },
        "bass" => Intent::SetBassBoost(parse_switch(single(&args, "bass on|off")?)?),
        "autoplay" => Intent::SetAutoPlay(parse_switch(single(&args, "autoplay on|off")?)?),
        "eq" => {
            let [band, gain] = args.as_slice() else {
                bail!("usage: eq low|mid|high <gain>");
            };
            let band = EqBand::parse(&band.to_ascii_lowercase())
                .ok_or_else(|| anyhow!("unknown band {}", band))?;
            let gain: f64 = gain
                .parse()
                .with_context(|| format!("gain must be a number, got {}", gain))?;
            if !gain.is_finite() {
                bail!("gain must be finite");
            }
            Intent::SetEqualizer { band, gain }
        }
        "del" | "delete" => Intent::DeleteQueue {
            index: parse_index(single(&args, "del <n>")?)?,
        },
        "move" => {
            let [from, to] = args.as_slice() else {
                bail!("usage: move <from> <to>");
            };
            Intent::MoveQueue {
                from: parse_index(from)?,
                to: parse_index(to)?,
            }
        }
        "save" => Intent::SaveSettings {
            volume: parse_percent(single(&args, "save <volume>")?)?,
        },
        "open" => return Ok(Some(LineCommand::Open(single(&args, "open <id>")?.to_string()))),
        "back" => return Ok(Some(LineCommand::Back)),
        "bot" => {
            let command = match single(&args, "bot start|stop")?.to_ascii_lowercase().as_str() {
                "start" => BotCommand::Start,
                "stop" => BotCommand::Stop,
                other => bail!("bot takes start or stop, not {}", other),
            };
            return Ok(Some(LineCommand::Bot(command)));
        }
        "help" | "?" => return Ok(Some(LineCommand::Help)),
        "quit" | "exit" | "q" => return Ok(Some(LineCommand::Quit)),
        other => bail!("unknown command {:?} (try help)", other),
    };
    Ok(Some(LineCommand::Intent(intent)))
}

fn single<'a>(args: &[&'a str], usage: &str) -> anyhow::Result<&'a str> {
    match args {
        [one] => Ok(*one),
        _ => bail!("usage: {}", usage),
    }
}

fn parse_percent(raw: &str) -> anyhow::Result<u8> {
    let value: u8 = raw
        .parse()
        .with_context(|| format!("expected 0-100, got {}", raw))?;
    if value > 100 {
        bail!("expected 0-100, got {}", value);
    }
    Ok(value)
}

fn parse_index(raw: &str) -> anyhow::Result<usize> {
    raw.parse()
        .with_context(|| format!("expected a queue position, got {}", raw))
}

fn parse_switch(raw: &str) -> anyhow::Result<bool> {
    match raw.to_ascii_lowercase().as_str() {
        "on" | "true" | "1" => Ok(true),
        "off" | "false" | "0" => Ok(false),
        other => bail!("expected on or off, got {}", other),
    }
}
