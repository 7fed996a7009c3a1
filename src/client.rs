use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::codec::{decode_unit, encode_command, encode_damper, DEFAULT_DAMPER_REG_ADDR};
use crate::diff::diff_units;
use crate::logger::{MessageLogMode, MessageLogger};
use crate::poll::{LastKnownGood, PollResult, DEFAULT_MAX_STALENESS};
use crate::protocol::{
    ensure_success, idu_data_request, meter_request, parse_meter, parse_unit_data,
    set_idu_request, RegisterWrite, DEFAULT_METER_IDS, IDU_DATA_PATH, METER_PATH, SET_IDU_PATH,
};
use crate::topology::{HubRules, TopologyResolver, TopologySnapshot, DEFAULT_TOPOLOGY_TTL};
use crate::transport::Transport;
use crate::types::*;
use crate::{Error, Result};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
/// Suggested host-side scan interval for unit data.
pub const DEFAULT_UNIT_SCAN_INTERVAL: Duration = Duration::from_secs(60);
/// Suggested host-side scan interval for the power meter.
pub const DEFAULT_POWER_SCAN_INTERVAL: Duration = Duration::from_secs(30);

/// Addresses polled when the topology lists no indoor units.
const FALLBACK_SYSTEMS: std::ops::RangeInclusive<u16> = 1..=2;
const FALLBACK_ADDRESSES: std::ops::RangeInclusive<u16> = 1..=8;

type EventCallback = Box<dyn Fn(&Event) + Send + Sync>;
type SnapshotCallback = Box<dyn Fn(&UnitMap) + Send + Sync>;

pub struct HisenseClientBuilder {
    host: String,
    protocol: String,
    timeout: Duration,
    topology_ttl: Duration,
    hub_rules: HubRules,
    meter_ids: Vec<String>,
    lock_write: bool,
    damper_register: u16,
    grid_fallback: bool,
    max_staleness: Option<Duration>,
    clock: Arc<dyn Clock>,
    event_callbacks: Vec<EventCallback>,
    snapshot_callbacks: Vec<SnapshotCallback>,
    log_mode: Option<MessageLogMode>,
    log_path: Option<String>,
}

impl HisenseClientBuilder {
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            protocol: "http".to_string(),
            timeout: DEFAULT_TIMEOUT,
            topology_ttl: DEFAULT_TOPOLOGY_TTL,
            hub_rules: HubRules::default(),
            meter_ids: DEFAULT_METER_IDS.iter().map(|s| s.to_string()).collect(),
            lock_write: false,
            damper_register: DEFAULT_DAMPER_REG_ADDR,
            grid_fallback: true,
            max_staleness: Some(DEFAULT_MAX_STALENESS),
            clock: Arc::new(SystemClock),
            event_callbacks: Vec::new(),
            snapshot_callbacks: Vec::new(),
            log_mode: None,
            log_path: None,
        }
    }

    pub fn protocol(mut self, proto: &str) -> Self {
        self.protocol = proto.to_string();
        self
    }

    /// Per-request timeout. No request is retried.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn topology_ttl(mut self, ttl: Duration) -> Self {
        self.topology_ttl = ttl;
        self
    }

    pub fn hub_rules(mut self, rules: HubRules) -> Self {
        self.hub_rules = rules;
        self
    }

    pub fn meter_ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.meter_ids = ids.into_iter().map(Into::into).collect();
        self
    }

    /// Wrap every command in the lock register write some firmware expects.
    pub fn lock_write(mut self, enabled: bool) -> Self {
        self.lock_write = enabled;
        self
    }

    pub fn damper_register(mut self, reg_addr: u16) -> Self {
        self.damper_register = reg_addr;
        self
    }

    /// Poll S1-S2 x 1-8 when the topology lists no indoor units.
    /// Disabled, an empty topology yields an empty map.
    pub fn grid_fallback(mut self, enabled: bool) -> Self {
        self.grid_fallback = enabled;
        self
    }

    /// How long `poll_units` may serve the last good map after failures.
    pub fn max_staleness(mut self, max: Option<Duration>) -> Self {
        self.max_staleness = max;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn on_event(mut self, f: impl Fn(&Event) + Send + Sync + 'static) -> Self {
        self.event_callbacks.push(Box::new(f));
        self
    }

    pub fn on_snapshot(mut self, f: impl Fn(&UnitMap) + Send + Sync + 'static) -> Self {
        self.snapshot_callbacks.push(Box::new(f));
        self
    }

    pub fn message_log(mut self, mode: MessageLogMode, path: impl Into<String>) -> Self {
        self.log_mode = Some(mode);
        self.log_path = Some(path.into());
        self
    }

    pub fn build(self) -> Result<HisenseClient> {
        let http = reqwest::Client::builder().timeout(self.timeout).build()?;

        let logger = match (self.log_mode, self.log_path) {
            (Some(mode), Some(path)) => Some(MessageLogger::new(mode, &path)?),
            _ => None,
        };

        let transport = Arc::new(Transport::new(
            http,
            format!("{}://{}", self.protocol, self.host),
            logger,
        ));
        let topology = TopologyResolver::new(
            transport.clone(),
            self.hub_rules,
            self.topology_ttl,
            self.clock.clone(),
        );

        Ok(HisenseClient {
            host: self.host,
            transport,
            topology,
            meter_ids: self.meter_ids,
            lock_write: self.lock_write,
            damper_register: self.damper_register,
            grid_fallback: self.grid_fallback,
            last_good: Mutex::new(LastKnownGood::new(self.max_staleness, self.clock)),
            latest: Mutex::new(None),
            baselines: Mutex::new(HashMap::new()),
            unit_locks: Mutex::new(HashMap::new()),
            event_callbacks: self.event_callbacks,
            snapshot_callbacks: self.snapshot_callbacks,
        })
    }
}

/// Client for one Multi-IDU gateway. Every operation takes `&self`; share it
/// behind an `Arc` between the unit poll, the power poll and user actions.
pub struct HisenseClient {
    host: String,
    transport: Arc<Transport>,
    topology: TopologyResolver,
    meter_ids: Vec<String>,
    lock_write: bool,
    damper_register: u16,
    grid_fallback: bool,
    last_good: Mutex<LastKnownGood<UnitMap>>,
    latest: Mutex<Option<UnitMap>>,
    /// Command tuple each unit is believed to hold: last poll or last write.
    baselines: Mutex<HashMap<UnitAddress, CommandPayload>>,
    unit_locks: Mutex<HashMap<UnitAddress, Arc<tokio::sync::Mutex<()>>>>,
    event_callbacks: Vec<EventCallback>,
    snapshot_callbacks: Vec<SnapshotCallback>,
}

impl HisenseClient {
    pub fn builder(host: impl Into<String>) -> HisenseClientBuilder {
        HisenseClientBuilder::new(host)
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn base_url(&self) -> &str {
        self.transport.base_url()
    }

    // -- Topology --

    pub async fn get_topology(&self, force_refresh: bool) -> Result<Arc<TopologySnapshot>> {
        self.topology.get_topology(force_refresh).await
    }

    pub async fn indoor_units(&self) -> Result<Vec<TopologyEntry>> {
        let snapshot = self.get_topology(false).await?;
        Ok(snapshot.indoor_units().cloned().collect())
    }

    pub async fn hub(&self) -> Result<TopologyEntry> {
        Ok(self.get_topology(false).await?.hub().clone())
    }

    // -- Polling --

    /// Poll every indoor unit in one batched request.
    pub async fn fetch_all_units(&self) -> Result<UnitMap> {
        let snapshot = match self.topology.get_topology(false).await {
            Ok(snapshot) => snapshot,
            Err(e) => match self.topology.cached() {
                Some(cached) => {
                    warn!(error = %e, "topology refresh failed, using cached topology");
                    cached
                }
                None => return Err(e),
            },
        };

        let mut addresses = snapshot.indoor_addresses();
        if addresses.is_empty() {
            if !self.grid_fallback {
                return Ok(UnitMap::new());
            }
            debug!("no indoor units in topology, polling default address grid");
            addresses = fallback_grid();
        }

        let units = self
            .fetch_units(&addresses, &snapshot)
            .await
            .map_err(|e| Error::Fetch(Box::new(e)))?;
        self.publish(&units);
        Ok(units)
    }

    /// `fetch_all_units` behind the last-known-good policy.
    pub async fn poll_units(&self) -> PollResult<UnitMap> {
        let result = self.fetch_all_units().await;
        if let Err(e) = &result {
            warn!(error = %e, "unit poll failed");
        }
        match self.last_good.lock() {
            Ok(mut last_good) => last_good.record(result),
            Err(_) => match result {
                Ok(units) => PollResult::Fresh(units),
                Err(e) => PollResult::Unavailable(e),
            },
        }
    }

    /// Last map returned by a successful unit fetch.
    pub fn last_units(&self) -> Option<UnitMap> {
        self.latest.lock().ok().and_then(|latest| latest.clone())
    }

    async fn fetch_units(
        &self,
        addresses: &[UnitAddress],
        snapshot: &TopologySnapshot,
    ) -> Result<UnitMap> {
        let body = self
            .transport
            .post_json(IDU_DATA_PATH, &idu_data_request(addresses))
            .await?;
        let items = parse_unit_data(&body)?;

        let mut units = UnitMap::new();
        for (i, item) in items.iter().enumerate() {
            let Some(frame) = item.data.as_deref() else {
                debug!(index = i, "unit data item without register frame");
                continue;
            };
            let Some(address) = item.address().or_else(|| addresses.get(i).copied()) else {
                debug!(index = i, "unit data item beyond requested device list");
                continue;
            };
            let entry = snapshot.entry(address);
            units.insert(address, decode_unit(address, frame, entry));
        }

        // An empty answer to a non-empty request is a gateway hiccup, not
        // every unit vanishing at once.
        if units.is_empty() && !addresses.is_empty() {
            return Err(Error::GatewayStatus {
                path: IDU_DATA_PATH,
                status: "empty dats".to_string(),
            });
        }

        debug!(requested = addresses.len(), decoded = units.len(), "unit data decoded");
        Ok(units)
    }

    fn publish(&self, units: &UnitMap) {
        // A unit whose lock is held has a command in flight; that command
        // owns the baseline and this poll may predate it.
        for (address, state) in units {
            let lock = self.unit_lock(*address);
            let Ok(_guard) = lock.try_lock() else {
                debug!(unit = %address, "command in flight, keeping baseline");
                continue;
            };
            if let Ok(mut baselines) = self.baselines.lock() {
                baselines.insert(*address, state.to_command());
            }
        }

        let previous = match self.latest.lock() {
            Ok(mut latest) => latest.replace(units.clone()).unwrap_or_default(),
            Err(_) => UnitMap::new(),
        };
        let events = diff_units(&previous, units);
        for event in &events {
            for cb in &self.event_callbacks {
                cb(event);
            }
        }
        for cb in &self.snapshot_callbacks {
            cb(units);
        }
        if !events.is_empty() {
            debug!(count = events.len(), "unit changes detected");
        }
    }

    // -- Power meter --

    /// Instantaneous power in watts, `None` when no valid reading is available.
    pub async fn fetch_power(&self) -> Option<f64> {
        self.fetch_power_reading().await.map(|r| r.watts)
    }

    pub async fn fetch_power_reading(&self) -> Option<PowerReading> {
        match self.try_fetch_power().await {
            Ok(Some(reading)) => Some(reading),
            Ok(None) => {
                warn!("no valid power value in meter response");
                None
            }
            Err(e) => {
                warn!(error = %e, "power meter fetch failed");
                None
            }
        }
    }

    async fn try_fetch_power(&self) -> Result<Option<PowerReading>> {
        let body = self
            .transport
            .post_json(METER_PATH, &meter_request(&self.meter_ids, &self.host))
            .await?;
        let reading = parse_meter(&body)?.into_iter().find_map(|meter| {
            let watts = meter.watts()?;
            Some(PowerReading {
                meter_id: meter.id,
                watts,
                sampled_at: meter.sampledt,
            })
        });
        if let Some(r) = &reading {
            debug!(meter = %r.meter_id, watts = r.watts, "power reading");
        }
        Ok(reading)
    }

    // -- Commands --

    /// Write the full command tuple to one unit. Never fails loudly: any
    /// transport, decode or gateway error is logged and reported as `false`.
    pub async fn send_command(&self, address: UnitAddress, payload: CommandPayload) -> bool {
        let lock = self.unit_lock(address);
        let _guard = lock.lock().await;
        self.write_command(address, payload).await
    }

    pub async fn set_damper(&self, address: UnitAddress, position: DamperPosition) -> bool {
        let lock = self.unit_lock(address);
        let _guard = lock.lock().await;
        let writes = encode_damper(address, position, self.damper_register);
        self.report("set_damper", address, self.write_registers("set_damper", address, &writes).await)
    }

    pub async fn turn_on(&self, address: UnitAddress) -> bool {
        self.update_unit(address, |p| p.power = true).await
    }

    pub async fn turn_off(&self, address: UnitAddress) -> bool {
        self.update_unit(address, |p| p.power = false).await
    }

    /// Switch mode, powering the unit on as selecting a mode implies.
    pub async fn set_mode(&self, address: UnitAddress, mode: HvacMode) -> bool {
        self.update_unit(address, |p| {
            p.mode = mode;
            p.power = true;
        })
        .await
    }

    pub async fn set_fan_speed(&self, address: UnitAddress, speed: FanSpeed) -> bool {
        self.update_unit(address, |p| p.fan_speed = speed).await
    }

    pub async fn set_temperature(&self, address: UnitAddress, celsius: f64) -> bool {
        self.update_unit(address, |p| p.target_temp = celsius).await
    }

    /// Read the baseline, apply one change and write the whole tuple, all
    /// under the unit's lock so concurrent edits cannot drop each other.
    async fn update_unit(&self, address: UnitAddress, change: impl FnOnce(&mut CommandPayload)) -> bool {
        let lock = self.unit_lock(address);
        let _guard = lock.lock().await;

        let Some(mut payload) = self.baseline(address) else {
            warn!(unit = %address, error = %Error::UnknownUnit(address), "no baseline for command");
            return false;
        };
        change(&mut payload);
        self.write_command(address, payload).await
    }

    async fn write_command(&self, address: UnitAddress, payload: CommandPayload) -> bool {
        let writes = encode_command(address, &payload, self.lock_write);
        let result = self.write_registers("send_command", address, &writes).await;
        if result.is_ok()
            && let Ok(mut baselines) = self.baselines.lock()
        {
            baselines.insert(address, payload);
        }
        self.report("send_command", address, result)
    }

    async fn write_registers(
        &self,
        action: &str,
        address: UnitAddress,
        writes: &[RegisterWrite],
    ) -> Result<()> {
        let body = set_idu_request(writes);
        self.transport.log_command(action, &address.key(), &body);
        let response: Value = self
            .transport
            .post_form_json(SET_IDU_PATH, &body)
            .await
            .map_err(|e| Error::Command(Box::new(e)))?;
        ensure_success(SET_IDU_PATH, &response).map_err(|e| Error::Command(Box::new(e)))
    }

    fn report(&self, action: &str, address: UnitAddress, result: Result<()>) -> bool {
        match result {
            Ok(()) => {
                info!(unit = %address, action, "command accepted");
                true
            }
            Err(e) => {
                warn!(unit = %address, action, error = %e, "command rejected");
                false
            }
        }
    }

    fn baseline(&self, address: UnitAddress) -> Option<CommandPayload> {
        self.baselines.lock().ok()?.get(&address).copied()
    }

    fn unit_lock(&self, address: UnitAddress) -> Arc<tokio::sync::Mutex<()>> {
        match self.unit_locks.lock() {
            Ok(mut locks) => locks.entry(address).or_default().clone(),
            // A poisoned registry only loses cross-call serialization.
            Err(_) => Arc::default(),
        }
    }
}

fn fallback_grid() -> Vec<UnitAddress> {
    FALLBACK_SYSTEMS
        .flat_map(|s| FALLBACK_ADDRESSES.map(move |a| UnitAddress::new(s, a)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fallback_grid_covers_both_systems() {
        let grid = fallback_grid();
        assert_eq!(grid.len(), 16);
        assert_eq!(grid[0], UnitAddress::new(1, 1));
        assert_eq!(grid[15], UnitAddress::new(2, 8));
    }

    #[test]
    fn poll_does_not_overwrite_baseline_of_locked_unit() {
        let client = HisenseClient::builder("192.168.1.50").build().unwrap();
        let address = UnitAddress::new(1, 1);
        let commanded = CommandPayload {
            power: true,
            mode: HvacMode::Heat,
            fan_speed: FanSpeed::High,
            target_temp: 26.0,
        };
        client.baselines.lock().unwrap().insert(address, commanded);

        let polled: UnitMap = [(address, decode_unit(address, &[], None))].into_iter().collect();

        let lock = client.unit_lock(address);
        let guard = lock.try_lock().unwrap();
        client.publish(&polled);
        assert_eq!(client.baseline(address), Some(commanded));
        assert_eq!(client.last_units(), Some(polled.clone()));

        drop(guard);
        client.publish(&polled);
        assert_eq!(client.baseline(address), Some(CommandPayload::default()));
    }

    #[test]
    fn builder_defaults() {
        let client = HisenseClient::builder("192.168.1.50").build().unwrap();
        assert_eq!(client.base_url(), "http://192.168.1.50");
        assert_eq!(client.host(), "192.168.1.50");
        assert!(client.last_units().is_none());
    }
}
