//! Console command definitions for Retune

use retune_analysis::{parse_root_key, Scale};
use thiserror::Error;

/// Commands typed on the console
#[derive(Debug, Clone, PartialEq)]
pub enum ControlCommand {
    // Correction parameters
    SetRootKey(u8),
    SetScale(Scale),
    SetRetuneSpeed(f32), // 0.0-1.0
    SetAmount(f32),      // 0.0-1.0
    SetHumanize(f32),    // 0.0-1.0
    SetFormantShift(f32), // -1.0-1.0, stored only

    // Routing
    SetBypass(bool),
    ToggleBypass,
    Rearm,

    // Application
    ShowStatus,
    SaveConfig,
    Help,
    Quit,
}

/// Why a console line was not understood
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CommandError {
    #[error("empty command")]
    Empty,
    #[error("unknown command '{0}' (try 'help')")]
    Unknown(String),
    #[error("'{0}' needs a value")]
    MissingArgument(&'static str),
    #[error("invalid value '{value}' for '{command}': {reason}")]
    InvalidArgument {
        command: &'static str,
        value: String,
        reason: String,
    },
}

pub const HELP_TEXT: &str = "\
commands:
  key <note>        root key (C, F#, Bb, 0-11)
  scale <name>      chromatic, major, minor, minor_harmonic, pentatonic, trap_dark
  speed <0-1>       retune speed (0 = robotic, 1 = natural)
  amount <0-1>      dry/wet blend
  humanize <0-1>    vibrato and drift
  formant <-1-1>    stored only, has no audible effect
  bypass [on|off]   toggle or set bypass
  rearm             resume correction after repeated faults
  status            print the latest status
  save              write the current settings to the config file
  help              show this text
  quit              exit";

/// Parse one console line
pub fn parse_command(line: &str) -> Result<ControlCommand, CommandError> {
    let input = line.trim();
    let mut parts = input.split_whitespace();
    let Some(name) = parts.next() else {
        return Err(CommandError::Empty);
    };
    let name = name.to_ascii_lowercase();
    let arg = parts.next();

    match name.as_str() {
        "q" | "quit" | "exit" => Ok(ControlCommand::Quit),
        "h" | "help" | "?" => Ok(ControlCommand::Help),
        "status" | "s" => Ok(ControlCommand::ShowStatus),
        "save" => Ok(ControlCommand::SaveConfig),
        "rearm" => Ok(ControlCommand::Rearm),

        "key" => {
            let value = arg.ok_or(CommandError::MissingArgument("key"))?;
            parse_root_key(value)
                .map(ControlCommand::SetRootKey)
                .map_err(|e| invalid("key", value, e))
        }
        "scale" => {
            let value = arg.ok_or(CommandError::MissingArgument("scale"))?;
            value
                .parse::<Scale>()
                .map(ControlCommand::SetScale)
                .map_err(|e| invalid("scale", value, e))
        }
        "speed" => parse_ranged("speed", arg, 0.0, 1.0).map(ControlCommand::SetRetuneSpeed),
        "amount" | "mix" => parse_ranged("amount", arg, 0.0, 1.0).map(ControlCommand::SetAmount),
        "humanize" => parse_ranged("humanize", arg, 0.0, 1.0).map(ControlCommand::SetHumanize),
        "formant" => parse_ranged("formant", arg, -1.0, 1.0).map(ControlCommand::SetFormantShift),

        "bypass" => match arg.map(|a| a.to_ascii_lowercase()) {
            None => Ok(ControlCommand::ToggleBypass),
            Some(a) => match a.as_str() {
                "on" | "true" | "1" => Ok(ControlCommand::SetBypass(true)),
                "off" | "false" | "0" => Ok(ControlCommand::SetBypass(false)),
                _ => Err(invalid("bypass", &a, "expected on or off")),
            },
        },

        _ => Err(CommandError::Unknown(name)),
    }
}

fn parse_ranged(
    command: &'static str,
    arg: Option<&str>,
    min: f32,
    max: f32,
) -> Result<f32, CommandError> {
    let value = arg.ok_or(CommandError::MissingArgument(command))?;
    let parsed: f32 = value.parse().map_err(|e| invalid(command, value, e))?;
    if !parsed.is_finite() || parsed < min || parsed > max {
        return Err(invalid(
            command,
            value,
            format!("must be between {} and {}", min, max),
        ));
    }
    Ok(parsed)
}

fn invalid(command: &'static str, value: &str, reason: impl ToString) -> CommandError {
    CommandError::InvalidArgument {
        command,
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_commands() {
        assert_eq!(parse_command("quit"), Ok(ControlCommand::Quit));
        assert_eq!(parse_command("  q "), Ok(ControlCommand::Quit));
        assert_eq!(parse_command("help"), Ok(ControlCommand::Help));
        assert_eq!(parse_command("status"), Ok(ControlCommand::ShowStatus));
        assert_eq!(parse_command("save"), Ok(ControlCommand::SaveConfig));
        assert_eq!(parse_command("REARM"), Ok(ControlCommand::Rearm));
    }

    #[test]
    fn test_key_and_scale() {
        assert_eq!(parse_command("key F#"), Ok(ControlCommand::SetRootKey(6)));
        assert_eq!(parse_command("key bb"), Ok(ControlCommand::SetRootKey(10)));
        assert_eq!(
            parse_command("scale trap-dark"),
            Ok(ControlCommand::SetScale(Scale::TrapDark))
        );
        assert!(matches!(
            parse_command("scale dorian"),
            Err(CommandError::InvalidArgument { command: "scale", .. })
        ));
        assert_eq!(
            parse_command("key"),
            Err(CommandError::MissingArgument("key"))
        );
    }

    #[test]
    fn test_ranged_values() {
        assert_eq!(parse_command("speed 0.25"), Ok(ControlCommand::SetRetuneSpeed(0.25)));
        assert_eq!(parse_command("mix 1"), Ok(ControlCommand::SetAmount(1.0)));
        assert_eq!(parse_command("formant -0.5"), Ok(ControlCommand::SetFormantShift(-0.5)));
        assert!(parse_command("speed 1.5").is_err());
        assert!(parse_command("humanize NaN").is_err());
        assert!(parse_command("amount loud").is_err());
    }

    #[test]
    fn test_bypass() {
        assert_eq!(parse_command("bypass"), Ok(ControlCommand::ToggleBypass));
        assert_eq!(parse_command("bypass on"), Ok(ControlCommand::SetBypass(true)));
        assert_eq!(parse_command("bypass OFF"), Ok(ControlCommand::SetBypass(false)));
        assert!(parse_command("bypass maybe").is_err());
    }

    #[test]
    fn test_unknown_and_empty() {
        assert_eq!(parse_command("   "), Err(CommandError::Empty));
        assert_eq!(
            parse_command("load track.wav"),
            Err(CommandError::Unknown("load".to_string()))
        );
    }
}
