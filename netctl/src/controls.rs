//! The fixed set of controls offered on every container node.

use netctl_tc::{Pid, TrafficShaper};

/// Prefix shared by control ids and `latest` keys, so that the host renders them as one table.
pub const TABLE_PREFIX: &str = "network-control-table-";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Control {
    Slow,
    Medium,
    Fast,
    PacketDropLow,
    Clear,
}

/// Presentation of a [`Control`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlSpec {
    /// Appended to [`TABLE_PREFIX`] to form the control id.
    pub suffix: &'static str,
    pub human: &'static str,
    pub icon: &'static str,
    /// Display order. Does not affect dispatching.
    pub rank: i32,
}

impl Control {
    pub const ALL: [Self; 5] = [Self::Slow, Self::Medium, Self::Fast, Self::PacketDropLow, Self::Clear];

    pub const fn spec(self) -> ControlSpec {
        match self {
            Self::Slow => ControlSpec {
                suffix: "slow",
                human: "Traffic speed: slow",
                icon: "fa-hourglass-1",
                rank: 20,
            },
            Self::Medium => ControlSpec {
                suffix: "medium",
                human: "Traffic speed: medium",
                icon: "fa-hourglass-2",
                rank: 21,
            },
            Self::Fast => ControlSpec {
                suffix: "fast",
                human: "Traffic speed: fast",
                icon: "fa-hourglass-3",
                rank: 22,
            },
            Self::PacketDropLow => ControlSpec {
                suffix: "pkt-drop-low",
                human: "Packet drop: low",
                icon: "fa-cut",
                rank: 23,
            },
            Self::Clear => ControlSpec {
                suffix: "clear",
                human: "Clear traffic control settings",
                icon: "fa-times-circle",
                rank: 24,
            },
        }
    }

    pub fn id(self) -> String {
        format!("{TABLE_PREFIX}{}", self.spec().suffix)
    }

    pub fn from_id(id: &str) -> Option<Self> {
        let suffix = id.strip_prefix(TABLE_PREFIX)?;
        Self::ALL.into_iter().find(|control| control.spec().suffix == suffix)
    }

    /// The wire representation advertised in reports.
    pub fn to_wire(self) -> netctl_wire::report::Control {
        let spec = self.spec();
        netctl_wire::report::Control {
            id: self.id(),
            human: spec.human.to_string(),
            icon: spec.icon.to_string(),
            rank: spec.rank,
        }
    }
}

/// Performs a control against the process `pid`.
pub type Handler = fn(&TrafficShaper, Pid) -> netctl_tc::Result<()>;

const HANDLERS: [(Control, Handler); 5] = [
    (Control::Slow, slow as Handler),
    (Control::Medium, medium as Handler),
    (Control::Fast, fast as Handler),
    (Control::PacketDropLow, packet_drop_low as Handler),
    (Control::Clear, clear as Handler),
];

/// Finds the control with id `id` and its handler.
pub fn lookup(id: &str) -> Option<(Control, Handler)> {
    let control = Control::from_id(id)?;
    HANDLERS.iter().find(|(c, _)| *c == control).copied()
}

fn slow(shaper: &TrafficShaper, pid: Pid) -> netctl_tc::Result<()> {
    shaper.apply_latency(pid, "2000ms")
}

fn medium(shaper: &TrafficShaper, pid: Pid) -> netctl_tc::Result<()> {
    shaper.apply_latency(pid, "1000ms")
}

fn fast(shaper: &TrafficShaper, pid: Pid) -> netctl_tc::Result<()> {
    shaper.apply_latency(pid, "500ms")
}

fn packet_drop_low(shaper: &TrafficShaper, pid: Pid) -> netctl_tc::Result<()> {
    shaper.apply_packet_loss(pid, "10%")
}

fn clear(shaper: &TrafficShaper, pid: Pid) -> netctl_tc::Result<()> {
    shaper.clear(pid)
}
