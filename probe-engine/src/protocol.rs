use std::fmt::{Display, Formatter};

/// The protocols exercised by the round robin, in rotation order
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Protocol {
    Http,
    Mqtt,
    Udp,
    Tcp,
    Icmp,
    Smtp,
}

impl Protocol {
    pub const COUNT: usize = 6;

    pub const ALL: [Protocol; Protocol::COUNT] = [
        Protocol::Http,
        Protocol::Mqtt,
        Protocol::Udp,
        Protocol::Tcp,
        Protocol::Icmp,
        Protocol::Smtp,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    /// Returns the protocol at `index`, wrapping around the rotation
    pub fn from_index(index: usize) -> Self {
        Self::ALL[index % Self::COUNT]
    }

    pub fn next(self) -> Self {
        Self::from_index(self.index() + 1)
    }

    /// The name under which the collector files measurements for this protocol
    pub fn name(self) -> &'static str {
        match self {
            Protocol::Http => "HTTP",
            Protocol::Mqtt => "MQTT",
            Protocol::Udp => "UDP",
            Protocol::Tcp => "TCP",
            Protocol::Icmp => "ICMP",
            Protocol::Smtp => "SMTP",
        }
    }
}

impl Display for Protocol {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
