//! Remote command wire protocol.
//!
//! # Versions
//!
//! | Version | Identifier           | stdin half-close | Resize          | Error stream  |
//! |---------|----------------------|------------------|-----------------|---------------|
//! | v1      | `channel.k8s.io`     | no               | no              | plain message |
//! | v2      | `v2.channel.k8s.io`  | yes              | no              | plain message |
//! | v3      | `v3.channel.k8s.io`  | yes              | every event     | plain message |
//! | v4      | `v4.channel.k8s.io`  | yes              | latest only     | JSON status   |
//!
//! Behavior per version lives in a [`ProtocolTable`] handed to the
//! negotiator, so sessions never branch on the version directly.
//! [`DEFAULT_HANDLERS`] is the standard table.
//!
//! # v4 Error Stream
//!
//! ```text
//! {"metadata":{},"status":"Success"}
//! {"metadata":{},"status":"Failure","message":"...","reason":"NonZeroExitCode",
//!  "details":{"causes":[{"reason":"ExitCode","message":"3"}]}}
//! ```

use crate::constants::{
    STREAM_PROTOCOL_V1, STREAM_PROTOCOL_V2, STREAM_PROTOCOL_V3, STREAM_PROTOCOL_V4,
};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};

/// Status value of a successful v4 outcome.
const STATUS_SUCCESS: &str = "Success";

/// Status value of a failed v4 outcome.
const STATUS_FAILURE: &str = "Failure";

/// Failure reason carrying an exit code cause.
const REASON_NON_ZERO_EXIT: &str = "NonZeroExitCode";

/// Failure reason for everything else.
const REASON_INTERNAL: &str = "InternalError";

/// Cause reason whose message is the exit code.
const CAUSE_EXIT_CODE: &str = "ExitCode";

// =============================================================================
// Protocol Versions
// =============================================================================

/// Remote command protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ProtocolVersion {
    V1,
    V2,
    V3,
    V4,
}

impl ProtocolVersion {
    /// Every version, most preferred first.
    pub const PREFERRED: [ProtocolVersion; 4] = [Self::V4, Self::V3, Self::V2, Self::V1];

    /// Wire identifier.
    pub fn name(self) -> &'static str {
        match self {
            Self::V1 => STREAM_PROTOCOL_V1,
            Self::V2 => STREAM_PROTOCOL_V2,
            Self::V3 => STREAM_PROTOCOL_V3,
            Self::V4 => STREAM_PROTOCOL_V4,
        }
    }

    /// Parses a wire identifier.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::PREFERRED.into_iter().find(|v| v.name() == name)
    }
}

impl std::fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

// =============================================================================
// Behavior Table
// =============================================================================

/// How terminal resize events travel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResizeMode {
    /// No resize stream.
    Unsupported,
    /// Every size is written.
    EveryEvent,
    /// Pending sizes collapse to the most recent one.
    Coalesce,
}

/// Encoding of the error stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorFormat {
    /// Raw failure message, nothing on success.
    Plain,
    /// JSON status object, always written.
    Status,
}

/// Per-version session behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProtocolBehavior {
    pub version: ProtocolVersion,
    /// Client closes its write side of stdin at end-of-input.
    pub half_close_stdin: bool,
    pub resize: ResizeMode,
    pub error_format: ErrorFormat,
}

/// Standard behavior of every protocol version.
pub static DEFAULT_HANDLERS: [ProtocolBehavior; 4] = [
    ProtocolBehavior {
        version: ProtocolVersion::V1,
        half_close_stdin: false,
        resize: ResizeMode::Unsupported,
        error_format: ErrorFormat::Plain,
    },
    ProtocolBehavior {
        version: ProtocolVersion::V2,
        half_close_stdin: true,
        resize: ResizeMode::Unsupported,
        error_format: ErrorFormat::Plain,
    },
    ProtocolBehavior {
        version: ProtocolVersion::V3,
        half_close_stdin: true,
        resize: ResizeMode::EveryEvent,
        error_format: ErrorFormat::Plain,
    },
    ProtocolBehavior {
        version: ProtocolVersion::V4,
        half_close_stdin: true,
        resize: ResizeMode::Coalesce,
        error_format: ErrorFormat::Status,
    },
];

/// Borrowed lookup table from version to behavior.
#[derive(Debug, Clone, Copy)]
pub struct ProtocolTable<'a> {
    rows: &'a [ProtocolBehavior],
}

impl<'a> ProtocolTable<'a> {
    pub const fn new(rows: &'a [ProtocolBehavior]) -> Self {
        Self { rows }
    }

    /// Behavior row for `version`, if the table has one.
    pub fn get(&self, version: ProtocolVersion) -> Option<&'a ProtocolBehavior> {
        self.rows.iter().find(|row| row.version == version)
    }

    /// Versions the table has rows for.
    pub fn versions(&self) -> impl Iterator<Item = ProtocolVersion> + 'a {
        self.rows.iter().map(|row| row.version)
    }
}

impl Default for ProtocolTable<'static> {
    fn default() -> Self {
        Self::new(&DEFAULT_HANDLERS)
    }
}

impl ProtocolBehavior {
    pub fn supports_resize(&self) -> bool {
        self.resize != ResizeMode::Unsupported
    }

    /// Encodes an exec/attach outcome for the error stream.
    ///
    /// `None` means nothing is written.
    pub fn encode_outcome(&self, outcome: &Result<()>) -> Result<Option<Vec<u8>>> {
        match (self.error_format, outcome) {
            (ErrorFormat::Plain, Ok(())) => Ok(None),
            (ErrorFormat::Plain, Err(e)) => Ok(Some(e.to_string().into_bytes())),
            (ErrorFormat::Status, outcome) => {
                Ok(Some(serde_json::to_vec(&Status::from_outcome(outcome))?))
            }
        }
    }

    /// Decodes what the remote end wrote on the error stream.
    pub fn decode_error(&self, raw: &[u8]) -> Result<()> {
        let text = String::from_utf8_lossy(raw);
        let text = text.trim();
        if text.is_empty() {
            return Ok(());
        }
        match self.error_format {
            ErrorFormat::Plain => Err(Error::RemoteCommand(text.to_string())),
            ErrorFormat::Status => {
                let status: Status = serde_json::from_str(text).map_err(|e| {
                    Error::RemoteCommand(format!("error stream protocol error: {e} in {text:?}"))
                })?;
                status.into_result()
            }
        }
    }
}

// =============================================================================
// Stream Types
// =============================================================================

/// Purpose of a sub-stream, carried in the `streamType` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamType {
    Stdin,
    Stdout,
    Stderr,
    Error,
    Resize,
    /// Port-forward payload.
    Data,
}

impl StreamType {
    pub fn header_value(self) -> &'static str {
        match self {
            Self::Stdin => "stdin",
            Self::Stdout => "stdout",
            Self::Stderr => "stderr",
            Self::Error => "error",
            Self::Resize => "resize",
            Self::Data => "data",
        }
    }

    pub fn from_header(value: &str) -> Option<Self> {
        match value {
            "stdin" => Some(Self::Stdin),
            "stdout" => Some(Self::Stdout),
            "stderr" => Some(Self::Stderr),
            "error" => Some(Self::Error),
            "resize" => Some(Self::Resize),
            "data" => Some(Self::Data),
            _ => None,
        }
    }
}

impl std::fmt::Display for StreamType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.header_value())
    }
}

// =============================================================================
// Wire Messages
// =============================================================================

/// Terminal dimensions, as sent on the resize stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalSize {
    #[serde(rename = "Width")]
    pub width: u16,
    #[serde(rename = "Height")]
    pub height: u16,
}

impl TerminalSize {
    pub fn new(width: u16, height: u16) -> Self {
        Self { width, height }
    }

    /// Both dimensions are at least 1.
    pub fn is_valid(&self) -> bool {
        self.width >= 1 && self.height >= 1
    }
}

/// v4 error stream status object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Status {
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<StatusDetails>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StatusDetails {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub causes: Vec<StatusCause>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusCause {
    #[serde(default)]
    pub reason: String,
    #[serde(default)]
    pub message: String,
}

impl Status {
    pub fn success() -> Self {
        Self {
            metadata: serde_json::Map::new(),
            status: STATUS_SUCCESS.to_string(),
            message: None,
            reason: None,
            details: None,
        }
    }

    pub fn from_outcome(outcome: &Result<()>) -> Self {
        let error = match outcome {
            Ok(()) => return Self::success(),
            Err(e) => e,
        };

        let (reason, details) = match error {
            Error::NonZeroExit { code } => (
                REASON_NON_ZERO_EXIT,
                Some(StatusDetails {
                    causes: vec![StatusCause {
                        reason: CAUSE_EXIT_CODE.to_string(),
                        message: code.to_string(),
                    }],
                }),
            ),
            _ => (REASON_INTERNAL, None),
        };
        Self {
            metadata: serde_json::Map::new(),
            status: STATUS_FAILURE.to_string(),
            message: Some(error.to_string()),
            reason: Some(reason.to_string()),
            details,
        }
    }

    /// Maps the status back to an outcome.
    pub fn into_result(self) -> Result<()> {
        if self.status == STATUS_SUCCESS {
            return Ok(());
        }
        if self.reason.as_deref() == Some(REASON_NON_ZERO_EXIT) {
            let cause = self
                .details
                .iter()
                .flat_map(|d| d.causes.iter())
                .find(|c| c.reason == CAUSE_EXIT_CODE);
            return match cause.map(|c| c.message.parse::<i32>()) {
                Some(Ok(code)) => Err(Error::NonZeroExit { code }),
                Some(Err(_)) | None => Err(Error::RemoteCommand(format!(
                    "error stream protocol error: invalid exit code in {:?}",
                    self.details
                ))),
            };
        }
        Err(Error::RemoteCommand(
            self.message.unwrap_or_else(|| self.status.clone()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn behavior(version: ProtocolVersion) -> &'static ProtocolBehavior {
        ProtocolTable::default().get(version).unwrap()
    }

    #[test]
    fn test_version_names_round_trip() {
        for version in ProtocolVersion::PREFERRED {
            assert_eq!(ProtocolVersion::from_name(version.name()), Some(version));
        }
        assert_eq!(ProtocolVersion::from_name("v5.channel.k8s.io"), None);
        assert_eq!(ProtocolVersion::V1.name(), "channel.k8s.io");
    }

    #[test]
    fn test_behavior_table() {
        let v1 = behavior(ProtocolVersion::V1);
        assert!(!v1.half_close_stdin);
        assert!(!v1.supports_resize());

        assert!(behavior(ProtocolVersion::V2).half_close_stdin);
        assert!(!behavior(ProtocolVersion::V2).supports_resize());
        assert_eq!(behavior(ProtocolVersion::V3).resize, ResizeMode::EveryEvent);

        let v4 = behavior(ProtocolVersion::V4);
        assert_eq!(v4.version, ProtocolVersion::V4);
        assert_eq!(v4.resize, ResizeMode::Coalesce);
        assert_eq!(v4.error_format, ErrorFormat::Status);
    }

    #[test]
    fn test_custom_table_lookup() {
        let rows = [ProtocolBehavior {
            version: ProtocolVersion::V2,
            half_close_stdin: false,
            resize: ResizeMode::Unsupported,
            error_format: ErrorFormat::Status,
        }];
        let table = ProtocolTable::new(&rows);
        assert_eq!(table.get(ProtocolVersion::V2).unwrap().error_format, ErrorFormat::Status);
        assert!(table.get(ProtocolVersion::V4).is_none());
        assert_eq!(table.versions().collect::<Vec<_>>(), vec![ProtocolVersion::V2]);
    }

    #[test]
    fn test_v4_exit_code_status() {
        let v4 = behavior(ProtocolVersion::V4);
        let bytes = v4
            .encode_outcome(&Err(Error::NonZeroExit { code: 3 }))
            .unwrap()
            .unwrap();
        let json = String::from_utf8(bytes.clone()).unwrap();
        assert!(json.contains("\"reason\":\"NonZeroExitCode\""));
        assert!(json.contains("\"message\":\"3\""));

        let err = v4.decode_error(&bytes).unwrap_err();
        assert_eq!(err.exit_code(), Some(3));
    }

    #[test]
    fn test_v4_success_and_failure() {
        let v4 = behavior(ProtocolVersion::V4);
        let ok = v4.encode_outcome(&Ok(())).unwrap().unwrap();
        assert_eq!(ok, br#"{"metadata":{},"status":"Success"}"#);
        assert!(v4.decode_error(&ok).is_ok());

        let raw = br#"{"metadata":{},"status":"Failure","message":"container not running"}"#;
        let err = v4.decode_error(raw).unwrap_err();
        assert!(matches!(err, Error::RemoteCommand(ref m) if m == "container not running"));
    }

    #[test]
    fn test_v4_bad_exit_code_cause() {
        let raw = br#"{"metadata":{},"status":"Failure","reason":"NonZeroExitCode","details":{"causes":[{"reason":"ExitCode","message":"x"}]}}"#;
        let err = behavior(ProtocolVersion::V4).decode_error(raw).unwrap_err();
        assert!(matches!(err, Error::RemoteCommand(_)));
    }

    #[test]
    fn test_plain_error_stream() {
        let v3 = behavior(ProtocolVersion::V3);
        assert_eq!(v3.encode_outcome(&Ok(())).unwrap(), None);
        assert!(v3.decode_error(b"").is_ok());

        let err = v3.decode_error(b"exec failed\n").unwrap_err();
        assert!(matches!(err, Error::RemoteCommand(ref m) if m == "exec failed"));
    }

    #[test]
    fn test_terminal_size_wire_names() {
        let json = serde_json::to_string(&TerminalSize::new(80, 24)).unwrap();
        assert_eq!(json, r#"{"Width":80,"Height":24}"#);
        assert!(!TerminalSize::new(0, 24).is_valid());
    }

    #[test]
    fn test_stream_type_headers() {
        assert_eq!(StreamType::from_header("resize"), Some(StreamType::Resize));
        assert_eq!(StreamType::Data.header_value(), "data");
        assert_eq!(StreamType::from_header("bogus"), None);
    }
}
