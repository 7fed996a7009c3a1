use std::collections::BTreeMap;
use std::fmt;

/// Identifies one indoor unit on the gateway: refrigerant system + bus address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct UnitAddress {
    pub system: u16,
    pub address: u16,
}

impl UnitAddress {
    pub const fn new(system: u16, address: u16) -> Self {
        Self { system, address }
    }

    /// Key in the `S{system}_{address}` form used for entity ids.
    pub fn key(&self) -> String {
        self.to_string()
    }

    /// Parse the `S{system}_{address}` form back into an address.
    pub fn from_key(key: &str) -> Option<Self> {
        let (system, address) = key.strip_prefix('S')?.split_once('_')?;
        Some(Self {
            system: system.parse().ok()?,
            address: address.parse().ok()?,
        })
    }
}

impl fmt::Display for UnitAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S{}_{}", self.system, self.address)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HvacMode {
    #[default]
    Cool,
    Dry,
    FanOnly,
    Heat,
}

impl HvacMode {
    pub const ALL: [HvacMode; 4] = [HvacMode::Cool, HvacMode::Dry, HvacMode::FanOnly, HvacMode::Heat];

    pub fn code(&self) -> i64 {
        match self {
            HvacMode::Cool => 2,
            HvacMode::Dry => 4,
            HvacMode::FanOnly => 8,
            HvacMode::Heat => 16,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            2 => Some(HvacMode::Cool),
            4 => Some(HvacMode::Dry),
            8 => Some(HvacMode::FanOnly),
            16 => Some(HvacMode::Heat),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HvacMode::Cool => "cool",
            HvacMode::Dry => "dry",
            HvacMode::FanOnly => "fan_only",
            HvacMode::Heat => "heat",
        }
    }

    pub fn from_name(s: &str) -> Option<Self> {
        match s {
            "cool" => Some(HvacMode::Cool),
            "dry" => Some(HvacMode::Dry),
            "fan_only" | "fan" => Some(HvacMode::FanOnly),
            "heat" => Some(HvacMode::Heat),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FanSpeed {
    Auto,
    Low,
    #[default]
    Medium,
    High,
}

impl FanSpeed {
    pub const ALL: [FanSpeed; 4] = [FanSpeed::Auto, FanSpeed::Low, FanSpeed::Medium, FanSpeed::High];

    pub fn code(&self) -> i64 {
        match self {
            FanSpeed::Auto => 1,
            FanSpeed::High => 2,
            FanSpeed::Medium => 4,
            FanSpeed::Low => 8,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(FanSpeed::Auto),
            2 => Some(FanSpeed::High),
            4 => Some(FanSpeed::Medium),
            8 => Some(FanSpeed::Low),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            FanSpeed::Auto => "auto",
            FanSpeed::Low => "low",
            FanSpeed::Medium => "medium",
            FanSpeed::High => "high",
        }
    }

    pub fn from_name(s: &str) -> Option<Self> {
        match s {
            "auto" => Some(FanSpeed::Auto),
            "low" => Some(FanSpeed::Low),
            "medium" => Some(FanSpeed::Medium),
            "high" => Some(FanSpeed::High),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnitStatus {
    On,
    #[default]
    Off,
    Alarm,
    Offline,
}

impl UnitStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UnitStatus::On => "on",
            UnitStatus::Off => "off",
            UnitStatus::Alarm => "alarm",
            UnitStatus::Offline => "offline",
        }
    }
}

/// Louver position as the gateway encodes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DamperPosition {
    Closed,
    Open,
    Position1,
    Position2,
    Position3,
    Swing,
}

impl DamperPosition {
    pub fn code(&self) -> i64 {
        match self {
            DamperPosition::Closed => 1,
            DamperPosition::Open => 2,
            DamperPosition::Position1 => 3,
            DamperPosition::Position2 => 4,
            DamperPosition::Position3 => 5,
            DamperPosition::Swing => 6,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(DamperPosition::Closed),
            2 => Some(DamperPosition::Open),
            3 => Some(DamperPosition::Position1),
            4 => Some(DamperPosition::Position2),
            5 => Some(DamperPosition::Position3),
            6 => Some(DamperPosition::Swing),
            _ => None,
        }
    }

    /// Map a cover percentage (0 closed, 100 open) onto the nearest louver step.
    /// Anything between 75 and 100 exclusive selects swing.
    pub fn from_percent(percent: u8) -> Self {
        match percent {
            0 => DamperPosition::Closed,
            p if p >= 100 => DamperPosition::Open,
            1..=25 => DamperPosition::Position1,
            26..=50 => DamperPosition::Position2,
            51..=75 => DamperPosition::Position3,
            _ => DamperPosition::Swing,
        }
    }

    pub fn percent(&self) -> u8 {
        match self {
            DamperPosition::Closed => 0,
            DamperPosition::Open => 100,
            DamperPosition::Position1 => 25,
            DamperPosition::Position2 | DamperPosition::Swing => 50,
            DamperPosition::Position3 => 75,
        }
    }
}

/// One device as reported by the gateway's topology listing.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TopologyEntry {
    pub address: UnitAddress,
    pub kind: String,
    pub name: String,
    pub code: String,
    /// `[pname, ppname, pppname]`, innermost first.
    pub parent_names: [String; 3],
    pub indoor_name: String,
    pub tenant_name: String,
}

impl TopologyEntry {
    /// Outermost non-empty parent name, usually the room or area.
    pub fn area(&self) -> Option<&str> {
        self.parent_names
            .iter()
            .rev()
            .map(String::as_str)
            .find(|n| !n.is_empty())
    }

    /// Name to show for the unit, falling back through the known name fields.
    pub fn display_name(&self) -> String {
        [&self.name, &self.indoor_name]
            .into_iter()
            .find(|n| !n.is_empty())
            .cloned()
            .unwrap_or_else(|| format!("IDU {}", self.address))
    }
}

/// Raw lock/model registers (offsets 72-75 and 77).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LockRegisters {
    pub r72: i64,
    pub r73: i64,
    pub r74: i64,
    pub r75: i64,
    pub r77: i64,
}

impl LockRegisters {
    pub fn any_set(&self) -> bool {
        [self.r72, self.r73, self.r74, self.r75, self.r77]
            .iter()
            .any(|v| *v != 0)
    }
}

/// Decoded state of one indoor unit.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitState {
    pub address: UnitAddress,
    pub power: bool,
    pub mode: HvacMode,
    pub fan_speed: FanSpeed,
    pub set_temp: i32,
    pub room_temp: Option<f64>,
    pub pipe_temp: Option<f64>,
    pub error_code: i64,
    pub locked: bool,
    pub lock_registers: LockRegisters,
    pub damper: Option<DamperPosition>,
    pub status: UnitStatus,
    /// Topology metadata, `None` when the unit was polled without a topology entry.
    pub topology: Option<TopologyEntry>,
}

impl UnitState {
    pub fn name(&self) -> String {
        match &self.topology {
            Some(entry) => entry.display_name(),
            None => format!("IDU {}", self.address),
        }
    }

    pub fn is_available(&self) -> bool {
        self.status != UnitStatus::Offline
    }

    /// Full command tuple reproducing the current state.
    pub fn to_command(&self) -> CommandPayload {
        CommandPayload {
            power: self.power,
            mode: self.mode,
            fan_speed: self.fan_speed,
            target_temp: f64::from(self.set_temp),
        }
    }
}

/// Desired state for one unit. Every write carries all four fields.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CommandPayload {
    pub power: bool,
    pub mode: HvacMode,
    pub fan_speed: FanSpeed,
    pub target_temp: f64,
}

impl Default for CommandPayload {
    fn default() -> Self {
        Self {
            power: false,
            mode: HvacMode::Cool,
            fan_speed: FanSpeed::Medium,
            target_temp: 24.0,
        }
    }
}

/// One instantaneous power meter sample.
#[derive(Debug, Clone, PartialEq)]
pub struct PowerReading {
    pub meter_id: String,
    pub watts: f64,
    pub sampled_at: Option<String>,
}

pub type UnitMap = BTreeMap<UnitAddress, UnitState>;

/// Changes between two consecutive unit polls.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    UnitDiscovered { address: UnitAddress, name: String },
    UnitLost { address: UnitAddress },
    PowerChanged { address: UnitAddress, on: bool },
    ModeChanged { address: UnitAddress, mode: HvacMode },
    FanSpeedChanged { address: UnitAddress, speed: FanSpeed },
    SetTempChanged { address: UnitAddress, celsius: i32 },
    RoomTempChanged { address: UnitAddress, celsius: Option<f64> },
    StatusChanged { address: UnitAddress, from: UnitStatus, to: UnitStatus },
    ErrorCodeChanged { address: UnitAddress, code: i64 },
    DamperChanged { address: UnitAddress, position: Option<DamperPosition> },
}

impl Event {
    pub fn address(&self) -> UnitAddress {
        match self {
            Event::UnitDiscovered { address, .. }
            | Event::UnitLost { address }
            | Event::PowerChanged { address, .. }
            | Event::ModeChanged { address, .. }
            | Event::FanSpeedChanged { address, .. }
            | Event::SetTempChanged { address, .. }
            | Event::RoomTempChanged { address, .. }
            | Event::StatusChanged { address, .. }
            | Event::ErrorCodeChanged { address, .. }
            | Event::DamperChanged { address, .. } => *address,
        }
    }
}
