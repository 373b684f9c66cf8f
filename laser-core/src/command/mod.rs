//! Host line-protocol commands.
//!
//! Every inbound line is classified into one closed [`HostCommand`] variant
//! before anything is mutated, so dispatch is an exhaustive `match` instead
//! of string-keyed method lookup. Replies go back as newline-terminated
//! JSON frames tagged with `message_type`.

pub mod line;

pub use line::{LineAssembler, MAX_LINE_LEN};

use alloc::string::String;
use alloc::vec::Vec;
use core::fmt;

use serde::Serialize;
use serde_json::{Map, Value};

/// Bare token requesting a manual fire.
pub const TRIGGER_TOKEN: &str = "TRIGGER";

/// Bare token probing link liveness.
pub const PING_TOKEN: &str = "PING";

/// Top-level JSON keys that belong to a calibration request rather than to
/// a channel or trigger section.
pub const CALIBRATION_KEYS: [&str; 4] = ["calibrate", "laser2calib", "calibsteps", "calibdur"];

/// Open-loop calibration sweep request.
#[derive(Clone, Debug, PartialEq)]
pub struct CalibrationRequest {
    /// Channel whose DAC is swept.
    pub channel: String,
    /// Normalized levels to apply, in order.
    pub steps: Vec<f32>,
    /// Hold time per step, in seconds.
    pub step_duration_s: f32,
}

/// Raw per-name configuration sections awaiting channel lookup.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConfigUpdate {
    sections: Map<String, Value>,
}

impl ConfigUpdate {
    /// Looks up the section addressed to `name`; an explicit JSON `null`
    /// section is returned as `Some(&Value::Null)`.
    pub fn section(&self, name: &str) -> Option<&Value> {
        self.sections.get(name)
    }

    /// Iterates over all addressed names.
    pub fn names<'a>(&'a self) -> impl Iterator<Item = &'a str> + 'a {
        self.sections.keys().map(String::as_str)
    }
}

/// Fully classified host command.
#[derive(Clone, Debug, PartialEq)]
pub enum HostCommand {
    /// Manual fire request bypassing the trigger input.
    Trigger,
    /// Liveness probe.
    Ping,
    /// Bare `null` payload: detach every channel and stop outputs.
    Clear,
    /// Open-loop calibration sweep.
    Calibrate(CalibrationRequest),
    /// Per-channel / per-trigger configuration update.
    Configure(ConfigUpdate),
}

/// Why an inbound line could not be classified.
#[derive(Debug)]
pub enum CommandParseError {
    /// The line is not valid JSON.
    Json(serde_json::Error),
    /// The payload is JSON but neither `null` nor an object.
    UnexpectedShape,
    /// A calibration request is missing a required key.
    MissingCalibrationField(&'static str),
    /// A calibration key is present but has the wrong type.
    BadCalibrationField(&'static str),
}

impl fmt::Display for CommandParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandParseError::Json(err) => write!(f, "invalid JSON: {err}"),
            CommandParseError::UnexpectedShape => f.write_str("payload is not null or an object"),
            CommandParseError::MissingCalibrationField(key) => {
                write!(f, "calibration request is missing `{key}`")
            }
            CommandParseError::BadCalibrationField(key) => {
                write!(f, "calibration key `{key}` has the wrong type")
            }
        }
    }
}

impl From<serde_json::Error> for CommandParseError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err)
    }
}

/// Classifies one complete inbound line.
pub fn parse_line(line: &str) -> Result<HostCommand, CommandParseError> {
    let trimmed = line.trim();
    if trimmed == TRIGGER_TOKEN {
        return Ok(HostCommand::Trigger);
    }
    if trimmed == PING_TOKEN {
        return Ok(HostCommand::Ping);
    }

    let value: Value = serde_json::from_str(trimmed)?;
    match value {
        Value::Null => Ok(HostCommand::Clear),
        Value::Object(map) => {
            if map.get("calibrate").and_then(Value::as_bool).unwrap_or(false) {
                parse_calibration(&map).map(HostCommand::Calibrate)
            } else {
                Ok(HostCommand::Configure(ConfigUpdate { sections: map }))
            }
        }
        _ => Err(CommandParseError::UnexpectedShape),
    }
}

fn parse_calibration(map: &Map<String, Value>) -> Result<CalibrationRequest, CommandParseError> {
    let channel = map
        .get("laser2calib")
        .ok_or(CommandParseError::MissingCalibrationField("laser2calib"))?
        .as_str()
        .ok_or(CommandParseError::BadCalibrationField("laser2calib"))?;

    let steps = map
        .get("calibsteps")
        .ok_or(CommandParseError::MissingCalibrationField("calibsteps"))?
        .as_array()
        .ok_or(CommandParseError::BadCalibrationField("calibsteps"))?
        .iter()
        .map(|step| {
            step.as_f64()
                .map(|v| v as f32)
                .ok_or(CommandParseError::BadCalibrationField("calibsteps"))
        })
        .collect::<Result<Vec<f32>, _>>()?;

    let step_duration_s = map
        .get("calibdur")
        .ok_or(CommandParseError::MissingCalibrationField("calibdur"))?
        .as_f64()
        .ok_or(CommandParseError::BadCalibrationField("calibdur"))? as f32;

    Ok(CalibrationRequest {
        channel: String::from(channel),
        steps,
        step_duration_s,
    })
}

/// Newline-terminated JSON status frame sent back to the host.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "message_type", rename_all = "snake_case")]
pub enum HostReply {
    /// Answer to a `PING` probe.
    Pong,
    /// A manual fire was forwarded to the coordinator.
    Triggered,
    /// A configuration update was applied to the listed channels.
    ConfigApplied { channels: Vec<String> },
    /// A calibration sweep finished.
    CalibrationDone { channel: String },
}

impl HostReply {
    /// Encodes the frame with its line terminator.
    pub fn to_line(&self) -> Result<String, serde_json::Error> {
        let mut line = serde_json::to_string(self)?;
        line.push('\n');
        Ok(line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;
    use alloc::vec;

    #[test]
    fn bare_tokens_classify_without_json() {
        assert!(matches!(parse_line("TRIGGER"), Ok(HostCommand::Trigger)));
        assert!(matches!(parse_line(" PING "), Ok(HostCommand::Ping)));
    }

    #[test]
    fn null_payload_clears_the_rig() {
        assert!(matches!(parse_line("null"), Ok(HostCommand::Clear)));
    }

    #[test]
    fn config_objects_keep_their_sections() {
        let command = parse_line("{\"laser1\": {\"frequency\": 2}, \"trigger1\": null}")
            .expect("classify config");
        let HostCommand::Configure(update) = command else {
            panic!("expected a configuration command");
        };
        assert!(update.section("laser1").is_some());
        assert_eq!(update.section("trigger1"), Some(&Value::Null));
        assert_eq!(update.section("laser2"), None);
    }

    #[test]
    fn calibration_requests_decode_all_fields() {
        let command = parse_line(
            "{\"calibrate\": true, \"laser2calib\": \"laser2\", \
             \"calibsteps\": [0.1, 0.5, 1.0], \"calibdur\": 2}",
        )
        .expect("classify calibration");
        assert_eq!(
            command,
            HostCommand::Calibrate(CalibrationRequest {
                channel: "laser2".to_string(),
                steps: vec![0.1, 0.5, 1.0],
                step_duration_s: 2.0,
            })
        );
    }

    #[test]
    fn calibrate_false_is_plain_configuration() {
        let command = parse_line("{\"calibrate\": false, \"laser1\": {}}").expect("classify");
        assert!(matches!(command, HostCommand::Configure(_)));
    }

    #[test]
    fn missing_calibration_key_is_rejected() {
        let err = parse_line("{\"calibrate\": true, \"calibdur\": 1}").expect_err("must fail");
        assert!(matches!(
            err,
            CommandParseError::MissingCalibrationField("laser2calib")
        ));
    }

    #[test]
    fn broken_json_is_rejected_not_panicked() {
        assert!(matches!(
            parse_line("{\"laser1\": "),
            Err(CommandParseError::Json(_))
        ));
        assert!(matches!(
            parse_line("42"),
            Err(CommandParseError::UnexpectedShape)
        ));
    }

    #[test]
    fn replies_encode_with_message_type_tag() {
        let line = HostReply::CalibrationDone {
            channel: "laser1".to_string(),
        }
        .to_line()
        .expect("encode reply");
        assert_eq!(
            line,
            "{\"message_type\":\"calibration_done\",\"channel\":\"laser1\"}\n"
        );
    }
}
