//! Construction of `tc qdisc` commands for a root `netem` queueing discipline.
//!
//! Latency and packet loss share a single `netem` qdisc, so applying one of them must carry over
//! the other one, otherwise `tc qdisc change` would silently reset it.

use std::fmt;

/// Rendering of a parameter which has not been configured.
pub const UNSET: &str = "-";

/// The handle of the root qdisc managed by this crate.
pub const ROOT_HANDLE: &str = "1:";

/// A shaping parameter as passed to `netem`, e.g. `500ms` or `10%`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub enum Param {
    #[default]
    Unset,
    Set(String),
}

impl Param {
    /// Creates a parameter from its textual form. Empty strings and [`UNSET`] map to
    /// [`Param::Unset`].
    pub fn new(value: impl Into<String>) -> Self {
        let value = value.into();
        let trimmed = value.trim();
        if trimmed.is_empty() || trimmed == UNSET {
            Self::Unset
        } else if trimmed.len() == value.len() {
            Self::Set(value)
        } else {
            Self::Set(trimmed.to_string())
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Unset => UNSET,
            Self::Set(value) => value,
        }
    }

    pub fn value(&self) -> Option<&str> {
        match self {
            Self::Unset => None,
            Self::Set(value) => Some(value),
        }
    }

    pub const fn is_set(&self) -> bool {
        matches!(self, Self::Set(_))
    }
}

impl fmt::Display for Param {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Last applied shaping parameters of a network namespace. Both dimensions are always
/// populated, with [`Param::Unset`] standing for "not configured".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShapingState {
    pub latency: Param,
    pub packet_loss: Param,
}

impl ShapingState {
    pub fn get(&self, kind: ShapingKind) -> &Param {
        match kind {
            ShapingKind::Latency => &self.latency,
            ShapingKind::PacketLoss => &self.packet_loss,
        }
    }

    pub fn set(&mut self, kind: ShapingKind, param: Param) {
        match kind {
            ShapingKind::Latency => self.latency = param,
            ShapingKind::PacketLoss => self.packet_loss = param,
        }
    }
}

impl fmt::Display for ShapingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.latency, self.packet_loss)
    }
}

/// The shaping dimensions supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShapingKind {
    Latency,
    PacketLoss,
}

impl ShapingKind {
    /// The `netem` option carrying this dimension.
    pub const fn netem_option(self) -> &'static str {
        match self {
            Self::Latency => "delay",
            Self::PacketLoss => "loss",
        }
    }

    /// The dimension that has to be preserved when this one is applied.
    pub const fn counterpart(self) -> Self {
        match self {
            Self::Latency => Self::PacketLoss,
            Self::PacketLoss => Self::Latency,
        }
    }
}

/// A single command line, program first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcCommand(Vec<String>);

impl TcCommand {
    pub fn new<I, S>(args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(args.into_iter().map(Into::into).collect())
    }

    pub fn args(&self) -> &[String] {
        &self.0
    }
}

impl fmt::Display for TcCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join(" "))
    }
}

/// Builds the command sequences applied inside a namespace.
#[derive(Debug, Clone)]
pub struct CommandBuilder {
    tc_binary: String,
    interface: String,
}

impl Default for CommandBuilder {
    fn default() -> Self {
        Self::new("eth0")
    }
}

impl CommandBuilder {
    pub fn new(interface: impl Into<String>) -> Self {
        Self { tc_binary: "tc".to_string(), interface: interface.into() }
    }

    pub fn with_tc_binary(mut self, tc_binary: impl Into<String>) -> Self {
        self.tc_binary = tc_binary.into();
        self
    }

    pub fn interface(&self) -> &str {
        &self.interface
    }

    fn qdisc(&self, verb: &str) -> Vec<String> {
        [
            self.tc_binary.as_str(),
            "qdisc",
            verb,
            "dev",
            self.interface.as_str(),
            "root",
            "handle",
            ROOT_HANDLE,
            "netem",
        ]
        .into_iter()
        .map(str::to_string)
        .collect()
    }

    /// `tc qdisc replace ... netem`: installs a parameterless `netem` whether or not one is
    /// already in place.
    pub fn replace(&self) -> TcCommand {
        TcCommand(self.qdisc("replace"))
    }

    /// The sequence applying `value` for `kind`, carrying `counterpart` over unless it is unset.
    pub fn build(&self, kind: ShapingKind, value: &str, counterpart: &Param) -> Vec<TcCommand> {
        let mut change = self.qdisc("change");
        push_option(&mut change, kind, value);
        if let Param::Set(counterpart) = counterpart {
            push_option(&mut change, kind.counterpart(), counterpart);
        }

        vec![self.replace(), TcCommand(change)]
    }

    /// The sequence resetting the namespace to a parameterless `netem`.
    pub fn clear(&self) -> Vec<TcCommand> {
        vec![self.replace()]
    }
}

fn push_option(args: &mut Vec<String>, kind: ShapingKind, value: &str) {
    args.push(kind.netem_option().to_string());
    // Values like "100ms 10ms" (delay with jitter) span several arguments.
    args.extend(value.split_whitespace().map(str::to_string));
}
