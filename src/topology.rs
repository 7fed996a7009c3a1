use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::protocol::{parse_topology, topology_request, TOPOLOGY_PATH};
use crate::transport::Transport;
use crate::types::{TopologyEntry, UnitAddress};
use crate::{Error, Result};

pub const DEFAULT_TOPOLOGY_TTL: Duration = Duration::from_secs(300);
pub const DEFAULT_HUB_ADDRESS: UnitAddress = UnitAddress::new(100, 1);

/// Heuristics separating the gateway itself from the indoor units it manages.
/// The firmware documents none of this, so every rule is replaceable.
#[derive(Debug, Clone)]
pub struct HubRules {
    /// Lowercase substrings of name, type or code that mark the hub.
    pub keywords: Vec<String>,
    pub hub_address: Option<UnitAddress>,
    /// Lowercase type names that identify indoor units.
    pub indoor_types: Vec<String>,
}

impl Default for HubRules {
    fn default() -> Self {
        Self {
            keywords: vec!["hidom".to_string(), "gateway".to_string()],
            hub_address: Some(DEFAULT_HUB_ADDRESS),
            indoor_types: ["idu", "cassette", "duct", "compact", "fullsize", "one way", "two way"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

impl HubRules {
    pub fn is_indoor_type(&self, kind: &str) -> bool {
        let normalized = normalize_type(kind);
        self.indoor_types.iter().any(|t| *t == normalized)
    }

    pub fn is_hub(&self, entry: &TopologyEntry) -> bool {
        let matches_keyword = [&entry.name, &entry.kind, &entry.code].iter().any(|field| {
            let lower = field.to_lowercase();
            self.keywords.iter().any(|k| lower.contains(k.as_str()))
        });
        matches_keyword
            || self.hub_address == Some(entry.address)
            || !self.is_indoor_type(&entry.kind)
    }
}

fn normalize_type(kind: &str) -> String {
    kind.trim()
        .to_lowercase()
        .replace(['_', '-'], " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// The gateway's device list at one point in time, already classified.
#[derive(Debug, Clone)]
pub struct TopologySnapshot {
    entries: Vec<TopologyEntry>,
    hub: TopologyEntry,
    hub_index: Option<usize>,
    indoor: Vec<usize>,
}

impl TopologySnapshot {
    pub fn classify(entries: Vec<TopologyEntry>, rules: &HubRules) -> Self {
        let hub_index = entries.iter().position(|e| rules.is_hub(e));
        let hub = match hub_index {
            Some(i) => entries[i].clone(),
            None => TopologyEntry {
                address: rules.hub_address.unwrap_or(DEFAULT_HUB_ADDRESS),
                kind: "gateway".to_string(),
                ..Default::default()
            },
        };
        let indoor = entries
            .iter()
            .enumerate()
            .filter(|(i, e)| Some(*i) != hub_index && rules.is_indoor_type(&e.kind))
            .map(|(i, _)| i)
            .collect();
        Self {
            entries,
            hub,
            hub_index,
            indoor,
        }
    }

    pub fn entries(&self) -> &[TopologyEntry] {
        &self.entries
    }

    /// The gateway record. Synthesized when no entry looked like a hub.
    pub fn hub(&self) -> &TopologyEntry {
        &self.hub
    }

    pub fn hub_is_synthesized(&self) -> bool {
        self.hub_index.is_none()
    }

    pub fn indoor_units(&self) -> impl Iterator<Item = &TopologyEntry> {
        self.indoor.iter().map(|i| &self.entries[*i])
    }

    pub fn indoor_addresses(&self) -> Vec<UnitAddress> {
        self.indoor_units().map(|e| e.address).collect()
    }

    pub fn entry(&self, address: UnitAddress) -> Option<&TopologyEntry> {
        self.indoor_units().find(|e| e.address == address)
    }
}

#[derive(Debug, Clone)]
struct CachedTopology {
    snapshot: Arc<TopologySnapshot>,
    fetched_at: Instant,
}

/// Fetches and caches the gateway topology. Only one fetch runs at a time;
/// callers that queued behind it reuse its result.
pub(crate) struct TopologyResolver {
    transport: Arc<Transport>,
    rules: HubRules,
    ttl: Duration,
    clock: Arc<dyn Clock>,
    cache: RwLock<Option<CachedTopology>>,
    refresh_gate: Mutex<()>,
    /// Bumped after every completed fetch, successful or not.
    generation: AtomicU64,
    /// Message of the last failed fetch and the generation it completed.
    failure: RwLock<Option<(u64, String)>>,
}

impl TopologyResolver {
    pub(crate) fn new(
        transport: Arc<Transport>,
        rules: HubRules,
        ttl: Duration,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            transport,
            rules,
            ttl,
            clock,
            cache: RwLock::new(None),
            refresh_gate: Mutex::new(()),
            generation: AtomicU64::new(0),
            failure: RwLock::new(None),
        }
    }

    /// Last fetched snapshot regardless of age.
    pub fn cached(&self) -> Option<Arc<TopologySnapshot>> {
        self.read_cache().map(|c| c.snapshot)
    }

    pub async fn get_topology(&self, force_refresh: bool) -> Result<Arc<TopologySnapshot>> {
        if !force_refresh && let Some(fresh) = self.fresh_snapshot() {
            return Ok(fresh);
        }

        let seen = self.generation.load(Ordering::Acquire);
        let _gate = self.refresh_gate.lock().await;

        // Someone else completed a fetch while we waited for the gate.
        let current = self.generation.load(Ordering::Acquire);
        if current != seen {
            if let Some(message) = self.failure_at(current) {
                return Err(Error::Topology(Box::new(Error::SharedFailure(message))));
            }
            if let Some(cached) = self.cached() {
                return Ok(cached);
            }
        }
        if !force_refresh && let Some(fresh) = self.fresh_snapshot() {
            return Ok(fresh);
        }

        match self.fetch().await {
            Ok(snapshot) => {
                let snapshot = Arc::new(snapshot);
                if let Ok(mut cache) = self.cache.write() {
                    *cache = Some(CachedTopology {
                        snapshot: snapshot.clone(),
                        fetched_at: self.clock.now(),
                    });
                }
                self.generation.fetch_add(1, Ordering::AcqRel);
                Ok(snapshot)
            }
            Err(e) => {
                let completed = self.generation.fetch_add(1, Ordering::AcqRel) + 1;
                if let Ok(mut failure) = self.failure.write() {
                    *failure = Some((completed, e.to_string()));
                }
                Err(Error::Topology(Box::new(e)))
            }
        }
    }

    fn failure_at(&self, generation: u64) -> Option<String> {
        match self.failure.read().ok()?.as_ref() {
            Some((g, message)) if *g == generation => Some(message.clone()),
            _ => None,
        }
    }

    fn read_cache(&self) -> Option<CachedTopology> {
        self.cache.read().ok().and_then(|c| c.clone())
    }

    fn fresh_snapshot(&self) -> Option<Arc<TopologySnapshot>> {
        let cached = self.read_cache()?;
        let age = self.clock.now().saturating_duration_since(cached.fetched_at);
        (age < self.ttl).then_some(cached.snapshot)
    }

    async fn fetch(&self) -> Result<TopologySnapshot> {
        debug!("fetching gateway topology");
        let body = self
            .transport
            .post_json(TOPOLOGY_PATH, &topology_request())
            .await?;
        let entries = parse_topology(&body)?;
        let snapshot = TopologySnapshot::classify(entries, &self.rules);
        info!(
            entries = snapshot.entries().len(),
            indoor_units = snapshot.indoor.len(),
            hub = %snapshot.hub().address,
            hub_synthesized = snapshot.hub_is_synthesized(),
            "topology refreshed"
        );
        Ok(snapshot)
    }
}
