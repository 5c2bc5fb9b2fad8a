//! Host → device actuator commands.
//!
//! The bin firmware accepts a handful of operator commands besides the
//! image protocol: lid servo control, the coin dispenser, buzzer sounds, a
//! status request and an on-demand capture.
//!
//! # Example
//!
//! ```
//! use smartbin_link::protocol::DeviceCommand;
//!
//! let cmd: DeviceCommand = "coin dispense 2".parse().unwrap();
//! assert_eq!(cmd.code(), "COIN0");
//! assert_eq!(cmd.payload(), "dispense --count 2");
//! ```

use std::fmt;
use std::str::FromStr;

use super::codes;
use crate::error::LinkError;

/// Lid servo actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LidAction {
    Open,
    Close,
    Status,
    Auto,
    Manual,
}

impl LidAction {
    fn as_str(self) -> &'static str {
        match self {
            LidAction::Open => "open",
            LidAction::Close => "close",
            LidAction::Status => "status",
            LidAction::Auto => "auto",
            LidAction::Manual => "manual",
        }
    }
}

/// Buzzer sounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sound {
    Startup,
    Detected,
    Complete,
    Error,
    Off,
}

impl Sound {
    fn as_str(self) -> &'static str {
        match self {
            Sound::Startup => "startup",
            Sound::Detected => "detected",
            Sound::Complete => "complete",
            Sound::Error => "error",
            Sound::Off => "off",
        }
    }
}

/// A command the host can send to the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceCommand {
    /// `LID00 <action>`
    Lid(LidAction),
    /// `COIN0 dispense [--count N]`
    Dispense { count: u32 },
    /// `COIN0 status`
    CoinStatus,
    /// `COIN0 test`
    CoinTest,
    /// `BUZZ0 <sound>`
    Buzzer(Sound),
    /// `STA01`
    Status,
    /// `IMG01`
    Capture,
}

impl DeviceCommand {
    /// Wire code.
    pub fn code(&self) -> &'static str {
        match self {
            DeviceCommand::Lid(_) => codes::LID,
            DeviceCommand::Dispense { .. } | DeviceCommand::CoinStatus | DeviceCommand::CoinTest => {
                codes::COIN
            }
            DeviceCommand::Buzzer(_) => codes::BUZZER,
            DeviceCommand::Status => codes::STATUS,
            DeviceCommand::Capture => codes::CAPTURE,
        }
    }

    /// Wire payload.
    pub fn payload(&self) -> String {
        match self {
            DeviceCommand::Lid(action) => action.as_str().to_string(),
            DeviceCommand::Dispense { count: 1 } => "dispense".to_string(),
            DeviceCommand::Dispense { count } => format!("dispense --count {}", count),
            DeviceCommand::CoinStatus => "status".to_string(),
            DeviceCommand::CoinTest => "test".to_string(),
            DeviceCommand::Buzzer(sound) => sound.as_str().to_string(),
            DeviceCommand::Status | DeviceCommand::Capture => String::new(),
        }
    }
}

impl fmt::Display for DeviceCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let payload = self.payload();
        if payload.is_empty() {
            f.write_str(self.code())
        } else {
            write!(f, "{} {}", self.code(), payload)
        }
    }
}

impl FromStr for DeviceCommand {
    type Err = LinkError;

    /// Parse operator input: `lid open`, `coin dispense 3`, `buzz error`,
    /// `status`, `capture`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let words: Vec<String> = s.split_whitespace().map(|w| w.to_ascii_lowercase()).collect();
        let words: Vec<&str> = words.iter().map(String::as_str).collect();

        let command = match words.as_slice() {
            ["lid", "open"] => DeviceCommand::Lid(LidAction::Open),
            ["lid", "close"] => DeviceCommand::Lid(LidAction::Close),
            ["lid", "status"] => DeviceCommand::Lid(LidAction::Status),
            ["lid", "auto"] => DeviceCommand::Lid(LidAction::Auto),
            ["lid", "manual"] => DeviceCommand::Lid(LidAction::Manual),
            ["coin", "dispense"] => DeviceCommand::Dispense { count: 1 },
            ["coin", "dispense", n] => DeviceCommand::Dispense {
                count: n
                    .parse()
                    .map_err(|_| LinkError::Protocol(format!("invalid coin count: {}", n)))?,
            },
            ["coin", "status"] => DeviceCommand::CoinStatus,
            ["coin", "test"] => DeviceCommand::CoinTest,
            ["buzz", "startup"] => DeviceCommand::Buzzer(Sound::Startup),
            ["buzz", "detected"] => DeviceCommand::Buzzer(Sound::Detected),
            ["buzz", "complete"] => DeviceCommand::Buzzer(Sound::Complete),
            ["buzz", "error"] => DeviceCommand::Buzzer(Sound::Error),
            ["buzz", "off"] => DeviceCommand::Buzzer(Sound::Off),
            ["status"] => DeviceCommand::Status,
            ["capture"] => DeviceCommand::Capture,
            _ => return Err(LinkError::Protocol(format!("unknown command: {}", s.trim()))),
        };

        Ok(command)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lid_commands() {
        let cmd: DeviceCommand = "lid open".parse().unwrap();
        assert_eq!(cmd, DeviceCommand::Lid(LidAction::Open));
        assert_eq!(cmd.to_string(), "LID00 open");

        let cmd: DeviceCommand = "LID Manual".parse().unwrap();
        assert_eq!(cmd.to_string(), "LID00 manual");
    }

    #[test]
    fn test_coin_commands() {
        let single: DeviceCommand = "coin dispense".parse().unwrap();
        assert_eq!(single.to_string(), "COIN0 dispense");

        let double: DeviceCommand = "coin dispense 2".parse().unwrap();
        assert_eq!(double.to_string(), "COIN0 dispense --count 2");

        assert!("coin dispense many".parse::<DeviceCommand>().is_err());
        assert_eq!(DeviceCommand::CoinTest.to_string(), "COIN0 test");
    }

    #[test]
    fn test_buzzer_and_plain_commands() {
        let cmd: DeviceCommand = "buzz detected".parse().unwrap();
        assert_eq!(cmd.code(), "BUZZ0");
        assert_eq!(cmd.payload(), "detected");

        assert_eq!(DeviceCommand::Status.to_string(), "STA01");
        assert_eq!("capture".parse::<DeviceCommand>().unwrap().to_string(), "IMG01");
    }

    #[test]
    fn test_unknown_command() {
        assert!("fly away".parse::<DeviceCommand>().is_err());
        assert!("".parse::<DeviceCommand>().is_err());
    }
}
