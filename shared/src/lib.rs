use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub const PROTOCOL_VERSION: u32 = 1;
pub const MAX_PACKET_SIZE: usize = 2048;

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub enum Packet {
    Join {
        player: PlayerId,
    },
    Leave {
        player: PlayerId,
    },
    Heartbeat {
        player: PlayerId,
    },
    Produce {
        player: PlayerId,
        resource: ResourceType,
        amount: u64,
    },

    CollectionUpdate {
        notification: CollectionUpdateNotification,
    },
    SessionQuery {
        request_id: u64,
        player: PlayerId,
    },
    SessionReply {
        request_id: u64,
        player: PlayerId,
        online: bool,
    },
}

impl Packet {
    /// Encodes the packet behind a `PROTOCOL_VERSION` prefix
    pub fn encode(&self) -> Result<Vec<u8>, bincode::Error> {
        bincode::serialize(&(PROTOCOL_VERSION, self))
    }

    /// Decodes a packet, rejecting any other protocol version
    pub fn decode(bytes: &[u8]) -> Result<Self, bincode::Error> {
        let (version, packet): (u32, Packet) = bincode::deserialize(bytes)?;
        if version != PROTOCOL_VERSION {
            return Err(Box::new(bincode::ErrorKind::Custom(format!(
                "protocol version {} not supported (expected {})",
                version, PROTOCOL_VERSION
            ))));
        }
        Ok(packet)
    }
}

/// Globally unique player identity, stable across every server process.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PlayerId(pub Uuid);

impl PlayerId {
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for PlayerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for PlayerId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s).map(Self)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupId(pub Uuid);

impl GroupId {
    pub fn random() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProcessId(pub u32);

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "process-{}", self.0)
    }
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceType {
    Wood,
    Ore,
    Stone,
    Coal,
    Wheat,
    Sand,
    Fish,
    Diamond,
}

impl ResourceType {
    pub const ALL: [ResourceType; 8] = [
        ResourceType::Wood,
        ResourceType::Ore,
        ResourceType::Stone,
        ResourceType::Coal,
        ResourceType::Wheat,
        ResourceType::Sand,
        ResourceType::Fish,
        ResourceType::Diamond,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ResourceType::Wood => "wood",
            ResourceType::Ore => "ore",
            ResourceType::Stone => "stone",
            ResourceType::Coal => "coal",
            ResourceType::Wheat => "wheat",
            ResourceType::Sand => "sand",
            ResourceType::Fish => "fish",
            ResourceType::Diamond => "diamond",
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for ResourceType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.to_ascii_lowercase();
        ResourceType::ALL
            .iter()
            .copied()
            .find(|resource| resource.name() == lowered)
            .ok_or_else(|| format!("unknown resource type '{}'", s))
    }
}

/// Accumulated amounts per resource for a single player.
///
/// Amounts are unsigned, so the non-negative invariant holds by construction.
/// This type only ever grows them; resets happen outside the sync subsystem.
#[derive(Debug, Serialize, Deserialize, Clone, Default, PartialEq, Eq)]
pub struct ProgressionCounter {
    amounts: BTreeMap<ResourceType, u64>,
}

impl ProgressionCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, resource: ResourceType) -> u64 {
        self.amounts.get(&resource).copied().unwrap_or(0)
    }

    /// Adds `amount` to `resource` and returns the amount held before the add.
    pub fn add(&mut self, resource: ResourceType, amount: u64) -> u64 {
        let entry = self.amounts.entry(resource).or_insert(0);
        let previous = *entry;
        *entry = previous.saturating_add(amount);
        previous
    }

    pub fn total(&self) -> u64 {
        self.amounts
            .values()
            .fold(0u64, |acc, amount| acc.saturating_add(*amount))
    }

    pub fn iter(&self) -> impl Iterator<Item = (ResourceType, u64)> + '_ {
        self.amounts.iter().map(|(resource, amount)| (*resource, *amount))
    }

    pub fn is_empty(&self) -> bool {
        self.amounts.values().all(|amount| *amount == 0)
    }
}

impl FromIterator<(ResourceType, u64)> for ProgressionCounter {
    fn from_iter<I: IntoIterator<Item = (ResourceType, u64)>>(iter: I) -> Self {
        let mut counter = ProgressionCounter::new();
        for (resource, amount) in iter {
            counter.add(resource, amount);
        }
        counter
    }
}

/// Event fired when a collection amount changes.
///
/// `subject` is the session the event is addressed to; `previous` is the amount
/// the producing player held before the change.
#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
pub struct CollectionUpdateNotification {
    pub subject: Option<PlayerId>,
    pub resource: ResourceType,
    pub previous: u64,
}

impl CollectionUpdateNotification {
    pub fn new(subject: Option<PlayerId>, resource: ResourceType, previous: u64) -> Self {
        Self {
            subject,
            resource,
            previous,
        }
    }

    /// Same update, re-addressed to another session.
    pub fn for_subject(&self, subject: PlayerId) -> Self {
        Self {
            subject: Some(subject),
            ..*self
        }
    }
}
