//! Command definitions.
//!
//! A [`Command`] is an immutable description of a request: the payload
//! template written to the link, the [`OperationMode`] that decides how many
//! commands may be in flight, the [`MatchSpec`] used to recognise its response
//! and an optional timeout. Binding a command to concrete arguments produces a
//! [`PendingCommand`]; once written to the link it becomes a [`SentCommand`].
//!
//! # Example
//!
//! ```
//! use serial_command_port::command::{Command, CommandArg, MatchSpec, OperationMode};
//! use std::time::Duration;
//!
//! let cmd = Command::new(
//!     "SET_SPEED",
//!     "SPD {0}\r\n",
//!     OperationMode::Blocking,
//!     Some(MatchSpec::expected_responses(["OK\r\n", "ERR\r\n"]).unwrap()),
//! )
//! .unwrap()
//! .with_timeout(Duration::from_millis(500));
//!
//! let bytes = cmd.encode(&[CommandArg::Int(1200)]).unwrap();
//! assert_eq!(bytes, b"SPD 1200\r\n");
//! ```

mod catalog;
mod error;
mod pending;

pub use catalog::CommandCatalog;
pub use error::CommandError;
pub use pending::{CommandId, PendingCommand, SentCommand};

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Matches `{0}`, `{1}`, ... placeholders inside a payload template.
static PLACEHOLDER: Lazy<regex::Regex> =
    Lazy::new(|| regex::Regex::new(r"\{(\d{1,3})\}").expect("placeholder regex is valid"));

/// How a command participates in the send queue and how long it stays
/// registered as sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationMode {
    /// At most one outstanding; the queue waits for its response or timeout.
    Blocking,
    /// Sent immediately; its response is matched whenever it arrives.
    NonBlockingWithResponse,
    /// Sent immediately; no response is ever awaited.
    NonBlockingNoResponse,
    /// Produces a continuous stream of responses until its stop command is sent.
    PushFlux,
    /// At most one response is expected, guarded by a timer.
    PullFlux,
}

impl OperationMode {
    /// Whether a command in this mode is kept in the sent registry.
    pub fn awaits_response(self) -> bool {
        !matches!(self, Self::NonBlockingNoResponse)
    }

    /// Whether a command in this mode is guarded by a response timer.
    pub fn has_timer(self) -> bool {
        matches!(self, Self::Blocking | Self::PullFlux)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Blocking => "blocking",
            Self::NonBlockingWithResponse => "non_blocking_with_response",
            Self::NonBlockingNoResponse => "non_blocking_no_response",
            Self::PushFlux => "push_flux",
            Self::PullFlux => "pull_flux",
        }
    }
}

impl fmt::Display for OperationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Strategy used to find a command's response in the accumulated bytes.
#[derive(Debug, Clone)]
pub enum MatchSpec {
    /// Leftmost match of a byte-oriented regular expression. The expression
    /// must not match the empty string.
    Pattern(regex::bytes::Regex),
    /// Earliest occurrence of any of the listed byte sequences.
    ExpectedResponses(Vec<Vec<u8>>),
    /// The first `n` bytes of the buffer, once at least `n` are available.
    FixedByteCount(usize),
}

impl MatchSpec {
    /// Build a pattern matcher from a regular expression.
    ///
    /// Unicode mode is off, so `.` and negated classes match any byte and
    /// binary frames are searched like text.
    pub fn pattern(pattern: &str) -> Result<Self, CommandError> {
        let regex = regex::bytes::RegexBuilder::new(pattern)
            .unicode(false)
            .build()?;
        let spec = Self::Pattern(regex);
        spec.validate()?;
        Ok(spec)
    }

    /// Build an expected-responses matcher. Declaration order is kept and
    /// used as the last tie-breaker.
    pub fn expected_responses<I, B>(responses: I) -> Result<Self, CommandError>
    where
        I: IntoIterator<Item = B>,
        B: Into<Vec<u8>>,
    {
        let spec = Self::ExpectedResponses(responses.into_iter().map(Into::into).collect());
        spec.validate()?;
        Ok(spec)
    }

    /// Build a fixed byte count matcher.
    pub fn fixed_byte_count(count: usize) -> Result<Self, CommandError> {
        let spec = Self::FixedByteCount(count);
        spec.validate()?;
        Ok(spec)
    }

    /// Check the invariants of a matcher that may have been built directly
    /// from its variants.
    pub fn validate(&self) -> Result<(), CommandError> {
        match self {
            Self::Pattern(regex) if regex.is_match(b"") => {
                Err(CommandError::EmptyPatternMatch(regex.as_str().to_string()))
            }
            Self::Pattern(_) => Ok(()),
            Self::ExpectedResponses(responses) => {
                if responses.is_empty() {
                    return Err(CommandError::EmptyExpectedResponses);
                }
                match responses.iter().position(|r| r.is_empty()) {
                    Some(index) => Err(CommandError::EmptyExpectedResponse(index)),
                    None => Ok(()),
                }
            }
            Self::FixedByteCount(0) => Err(CommandError::ZeroByteCount),
            Self::FixedByteCount(_) => Ok(()),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Pattern(_) => "pattern",
            Self::ExpectedResponses(_) => "expected",
            Self::FixedByteCount(_) => "bytes",
        }
    }
}

/// A value substituted into a command's payload template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum CommandArg {
    Int(i64),
    Float(f64),
    Text(String),
    /// Inserted verbatim into the payload.
    Bytes(Vec<u8>),
}

impl CommandArg {
    fn write_to(&self, out: &mut Vec<u8>) {
        match self {
            Self::Bytes(bytes) => out.extend_from_slice(bytes),
            other => out.extend_from_slice(other.to_string().as_bytes()),
        }
    }
}

impl fmt::Display for CommandArg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::Text(v) => f.write_str(v),
            Self::Bytes(v) => f.write_str(&String::from_utf8_lossy(v)),
        }
    }
}

impl From<i64> for CommandArg {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for CommandArg {
    fn from(v: i32) -> Self {
        Self::Int(v.into())
    }
}

impl From<f64> for CommandArg {
    fn from(v: f64) -> Self {
        Self::Float(v)
    }
}

impl From<&str> for CommandArg {
    fn from(v: &str) -> Self {
        Self::Text(v.to_string())
    }
}

impl From<String> for CommandArg {
    fn from(v: String) -> Self {
        Self::Text(v)
    }
}

impl From<Vec<u8>> for CommandArg {
    fn from(v: Vec<u8>) -> Self {
        Self::Bytes(v)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Literal(Vec<u8>),
    Arg(usize),
}

fn parse_template(template: &str) -> Vec<Segment> {
    let mut segments = Vec::new();
    let mut cursor = 0;
    for caps in PLACEHOLDER.captures_iter(template) {
        let (Some(whole), Some(index)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        // `\d{1,3}` always fits in a usize
        let Ok(index) = index.as_str().parse::<usize>() else {
            continue;
        };
        if whole.start() > cursor {
            segments.push(Segment::Literal(
                template[cursor..whole.start()].as_bytes().to_vec(),
            ));
        }
        segments.push(Segment::Arg(index));
        cursor = whole.end();
    }
    if cursor < template.len() {
        segments.push(Segment::Literal(template[cursor..].as_bytes().to_vec()));
    }
    segments
}

/// Immutable description of a request sent over the link.
#[derive(Debug, Clone)]
pub struct Command {
    name: String,
    template: String,
    segments: Vec<Segment>,
    mode: OperationMode,
    match_spec: Option<MatchSpec>,
    timeout: Option<Duration>,
    push_stop_command: Option<String>,
}

impl Command {
    /// Create a command, validating its matcher against its mode.
    ///
    /// Every mode except [`OperationMode::NonBlockingNoResponse`] requires a
    /// matcher.
    pub fn new(
        name: impl Into<String>,
        template: impl Into<String>,
        mode: OperationMode,
        match_spec: Option<MatchSpec>,
    ) -> Result<Self, CommandError> {
        let template = template.into();
        let command = Self {
            name: name.into(),
            segments: parse_template(&template),
            template,
            mode,
            match_spec,
            timeout: None,
            push_stop_command: None,
        };
        command.validate()?;
        Ok(command)
    }

    /// Set the response timeout. Only Blocking and PullFlux commands arm a
    /// timer; a zero duration disables it.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Name of the command whose transmission ends this command's response
    /// stream (PushFlux only).
    pub fn with_stop_command(mut self, name: impl Into<String>) -> Self {
        self.push_stop_command = Some(name.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn mode(&self) -> OperationMode {
        self.mode
    }

    pub fn match_spec(&self) -> Option<&MatchSpec> {
        self.match_spec.as_ref()
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn push_stop_command(&self) -> Option<&str> {
        self.push_stop_command.as_deref()
    }

    /// Duration of the response timer armed when this command is sent.
    pub fn timer_duration(&self) -> Option<Duration> {
        if !self.mode.has_timer() {
            return None;
        }
        self.timeout.filter(|t| !t.is_zero())
    }

    /// Number of arguments the payload template needs.
    pub fn required_args(&self) -> usize {
        self.segments
            .iter()
            .filter_map(|s| match s {
                Segment::Arg(index) => Some(index + 1),
                Segment::Literal(_) => None,
            })
            .max()
            .unwrap_or(0)
    }

    pub fn validate(&self) -> Result<(), CommandError> {
        match &self.match_spec {
            Some(spec) => spec.validate(),
            None if self.mode.awaits_response() => Err(CommandError::MissingMatcher {
                name: self.name.clone(),
                mode: self.mode,
            }),
            None => Ok(()),
        }
    }

    /// Check that `args` covers every placeholder of the template.
    pub fn check_args(&self, args: &[CommandArg]) -> Result<(), CommandError> {
        let required = self.required_args();
        if args.len() < required {
            return Err(CommandError::MissingArgument {
                name: self.name.clone(),
                required,
                provided: args.len(),
            });
        }
        Ok(())
    }

    /// Render the payload bytes with `args` substituted into the template.
    pub fn encode(&self, args: &[CommandArg]) -> Result<Vec<u8>, CommandError> {
        self.check_args(args)?;
        let mut out = Vec::with_capacity(self.template.len());
        for segment in &self.segments {
            match segment {
                Segment::Literal(bytes) => out.extend_from_slice(bytes),
                Segment::Arg(index) => args[*index].write_to(&mut out),
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok_spec() -> Option<MatchSpec> {
        Some(MatchSpec::expected_responses(["OK"]).unwrap())
    }

    #[test]
    fn test_mode_flags() {
        assert!(OperationMode::Blocking.has_timer());
        assert!(OperationMode::PullFlux.has_timer());
        assert!(!OperationMode::PushFlux.has_timer());
        assert!(!OperationMode::NonBlockingWithResponse.has_timer());
        assert!(!OperationMode::NonBlockingNoResponse.awaits_response());
        assert!(OperationMode::PushFlux.awaits_response());
    }

    #[test]
    fn test_match_spec_invariants() {
        assert!(matches!(
            MatchSpec::fixed_byte_count(0),
            Err(CommandError::ZeroByteCount)
        ));
        assert!(matches!(
            MatchSpec::expected_responses(Vec::<Vec<u8>>::new()),
            Err(CommandError::EmptyExpectedResponses)
        ));
        assert!(matches!(
            MatchSpec::expected_responses(["OK", ""]),
            Err(CommandError::EmptyExpectedResponse(1))
        ));
        assert!(matches!(
            MatchSpec::pattern("(unclosed"),
            Err(CommandError::InvalidPattern(_))
        ));
        assert!(MatchSpec::fixed_byte_count(4).is_ok());
    }

    #[test]
    fn test_directly_built_spec_is_rejected() {
        let result = Command::new(
            "RAW",
            "R\n",
            OperationMode::Blocking,
            Some(MatchSpec::FixedByteCount(0)),
        );
        assert!(matches!(result, Err(CommandError::ZeroByteCount)));
    }

    #[test]
    fn test_missing_matcher() {
        let result = Command::new("PING", "P\n", OperationMode::PullFlux, None);
        assert!(matches!(result, Err(CommandError::MissingMatcher { .. })));

        let fire = Command::new("RESET", "RST\n", OperationMode::NonBlockingNoResponse, None);
        assert!(fire.is_ok());
    }

    #[test]
    fn test_encode_substitutes_arguments() {
        let cmd = Command::new("MOVE", "MV {0},{1};{0}\r", OperationMode::Blocking, ok_spec()).unwrap();
        assert_eq!(cmd.required_args(), 2);

        let bytes = cmd
            .encode(&[CommandArg::Int(-5), CommandArg::Text("x".into())])
            .unwrap();
        assert_eq!(bytes, b"MV -5,x;-5\r");
    }

    #[test]
    fn test_encode_inserts_raw_bytes() {
        let cmd = Command::new("WR", "W{0}\n", OperationMode::Blocking, ok_spec()).unwrap();
        let bytes = cmd.encode(&[CommandArg::Bytes(vec![0x00, 0xFF])]).unwrap();
        assert_eq!(bytes, vec![b'W', 0x00, 0xFF, b'\n']);
    }

    #[test]
    fn test_encode_missing_argument() {
        let cmd = Command::new("SET", "S {1}\n", OperationMode::Blocking, ok_spec()).unwrap();
        let err = cmd.encode(&[CommandArg::Int(1)]).unwrap_err();
        assert!(matches!(
            err,
            CommandError::MissingArgument {
                required: 2,
                provided: 1,
                ..
            }
        ));
    }

    #[test]
    fn test_template_without_placeholders() {
        let cmd = Command::new("ID", "*IDN?\n", OperationMode::Blocking, ok_spec()).unwrap();
        assert_eq!(cmd.required_args(), 0);
        assert_eq!(cmd.encode(&[]).unwrap(), b"*IDN?\n");
        // Braces that are not placeholders stay literal
        let cmd = Command::new("JS", "{a}{}\n", OperationMode::Blocking, ok_spec()).unwrap();
        assert_eq!(cmd.encode(&[]).unwrap(), b"{a}{}\n");
    }

    #[test]
    fn test_timer_duration() {
        let cmd = Command::new("A", "A", OperationMode::Blocking, ok_spec())
            .unwrap()
            .with_timeout(Duration::from_millis(250));
        assert_eq!(cmd.timer_duration(), Some(Duration::from_millis(250)));

        let cmd = Command::new("B", "B", OperationMode::NonBlockingWithResponse, ok_spec())
            .unwrap()
            .with_timeout(Duration::from_millis(250));
        assert_eq!(cmd.timer_duration(), None);

        let cmd = Command::new("C", "C", OperationMode::PullFlux, ok_spec())
            .unwrap()
            .with_timeout(Duration::ZERO);
        assert_eq!(cmd.timer_duration(), None);
    }

    #[test]
    fn test_arg_display() {
        assert_eq!(CommandArg::from(3).to_string(), "3");
        assert_eq!(CommandArg::from(1.5).to_string(), "1.5");
        assert_eq!(CommandArg::from("abc").to_string(), "abc");
    }
}
