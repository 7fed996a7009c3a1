use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{json, Value};

use crate::types::{TopologyEntry, UnitAddress};
use crate::{Error, Result};

pub const TOPOLOGY_PATH: &str = "/cgi/get_miscdata.shtml";
pub const IDU_DATA_PATH: &str = "/cgi/get_idu_data.shtml";
pub const METER_PATH: &str = "/cgi/get_meter_pwr.shtml";
pub const SET_IDU_PATH: &str = "/cgi/set_idu.shtml";

/// The gateway wants a loopback marker here, not its real address.
pub const LOOPBACK_IP: &str = "127.0.0.1";

pub const STATUS_SUCCESS: &str = "success";

pub const DEFAULT_METER_IDS: [&str; 2] = ["1", "2"];

pub fn topology_request() -> Value {
    json!({ "ip": LOOPBACK_IP })
}

pub fn idu_data_request(units: &[UnitAddress]) -> Value {
    let devs: Vec<Value> = units
        .iter()
        .map(|u| json!({ "sys": u.system, "addr": u.address.to_string() }))
        .collect();
    json!({ "ip": LOOPBACK_IP, "devs": devs })
}

pub fn meter_request(ids: &[String], host: &str) -> Value {
    json!({ "ids": ids, "ip": host })
}

/// One `cmdList` entry of a set request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RegisterWrite {
    pub seq: u32,
    pub sys: u16,
    #[serde(rename = "iduAddr")]
    pub idu_addr: u16,
    #[serde(rename = "regAddr")]
    pub reg_addr: u16,
    #[serde(rename = "regVal")]
    pub reg_val: Vec<i64>,
}

pub fn set_idu_request(writes: &[RegisterWrite]) -> Value {
    json!({ "ip": LOOPBACK_IP, "cmdList": writes })
}

/// Fail unless the decoded body carries `"status": "success"`.
pub fn ensure_success(path: &'static str, body: &Value) -> Result<()> {
    match body.get("status").and_then(Value::as_str) {
        Some(STATUS_SUCCESS) => Ok(()),
        Some(other) => Err(Error::GatewayStatus {
            path,
            status: other.to_string(),
        }),
        None => Err(Error::GatewayStatus {
            path,
            status: body
                .get("status")
                .map(Value::to_string)
                .unwrap_or_else(|| "<missing>".to_string()),
        }),
    }
}

// -- Response schemas --

#[derive(Debug, Deserialize)]
struct RawTopologyEntry {
    #[serde(default, alias = "system", deserialize_with = "lenient_u16")]
    sys: Option<u16>,
    #[serde(default, alias = "address", alias = "iduAddr", deserialize_with = "lenient_u16")]
    addr: Option<u16>,
    #[serde(default, rename = "type", alias = "devType", deserialize_with = "lenient_string")]
    kind: String,
    #[serde(default, deserialize_with = "lenient_string")]
    name: String,
    #[serde(default, deserialize_with = "lenient_string")]
    code: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pname: String,
    #[serde(default, deserialize_with = "lenient_string")]
    ppname: String,
    #[serde(default, deserialize_with = "lenient_string")]
    pppname: String,
    #[serde(default, rename = "indoorName", alias = "iduName", deserialize_with = "lenient_string")]
    indoor_name: String,
    #[serde(default, rename = "tenantName", deserialize_with = "lenient_string")]
    tenant_name: String,
}

impl RawTopologyEntry {
    fn into_entry(self) -> Option<TopologyEntry> {
        Some(TopologyEntry {
            address: UnitAddress::new(self.sys?, self.addr?),
            kind: self.kind,
            name: self.name,
            code: self.code,
            parent_names: [self.pname, self.ppname, self.pppname],
            indoor_name: self.indoor_name,
            tenant_name: self.tenant_name,
        })
    }
}

/// Entries under `miscdata.topo`. An object is read as its values, in order;
/// entries without a usable address are dropped.
pub fn parse_topology(body: &Value) -> Result<Vec<TopologyEntry>> {
    ensure_success(TOPOLOGY_PATH, body)?;
    let items: Vec<&Value> = match body.pointer("/miscdata/topo") {
        Some(Value::Array(items)) => items.iter().collect(),
        Some(Value::Object(map)) => map.values().collect(),
        other => {
            return Err(Error::GatewayStatus {
                path: TOPOLOGY_PATH,
                status: format!("unexpected topology shape: {}", shape_of(other)),
            });
        }
    };

    Ok(items
        .into_iter()
        .filter_map(|item| {
            let entry = RawTopologyEntry::deserialize(item)
                .ok()
                .and_then(RawTopologyEntry::into_entry);
            if entry.is_none() {
                tracing::debug!(%item, "skipping topology entry without address");
            }
            entry
        })
        .collect())
}

/// One `dats` item of the unit data response.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UnitData {
    #[serde(default, deserialize_with = "lenient_u16")]
    pub sys: Option<u16>,
    #[serde(default, deserialize_with = "lenient_u16")]
    pub addr: Option<u16>,
    #[serde(default, deserialize_with = "register_frame")]
    pub data: Option<Vec<Option<i64>>>,
}

impl UnitData {
    pub fn address(&self) -> Option<UnitAddress> {
        Some(UnitAddress::new(self.sys?, self.addr?))
    }
}

pub fn parse_unit_data(body: &Value) -> Result<Vec<UnitData>> {
    ensure_success(IDU_DATA_PATH, body)?;
    match body.get("dats") {
        Some(Value::Array(items)) => Ok(items
            .iter()
            .map(|item| {
                UnitData::deserialize(item).unwrap_or(UnitData {
                    sys: None,
                    addr: None,
                    data: None,
                })
            })
            .collect()),
        None | Some(Value::Null) => Ok(Vec::new()),
        other => Err(Error::GatewayStatus {
            path: IDU_DATA_PATH,
            status: format!("unexpected dats shape: {}", shape_of(other)),
        }),
    }
}

/// One `dats` item of the meter response. `pwr` stays raw so callers can
/// discard non-numeric readings instead of failing the whole response.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct MeterData {
    #[serde(default, deserialize_with = "lenient_string")]
    pub id: String,
    #[serde(default)]
    pub pwr: Value,
    #[serde(default, deserialize_with = "lenient_opt_string")]
    pub sampledt: Option<String>,
}

impl MeterData {
    pub fn watts(&self) -> Option<f64> {
        let watts = match &self.pwr {
            Value::Number(n) => n.as_f64(),
            Value::String(s) => s.trim().parse::<f64>().ok(),
            _ => None,
        }?;
        (watts.is_finite() && watts >= 0.0).then_some(watts)
    }
}

pub fn parse_meter(body: &Value) -> Result<Vec<MeterData>> {
    ensure_success(METER_PATH, body)?;
    Ok(body
        .get("dats")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| MeterData::deserialize(item).ok())
                .collect()
        })
        .unwrap_or_default())
}

fn shape_of(value: Option<&Value>) -> &'static str {
    match value {
        None => "missing",
        Some(Value::Null) => "null",
        Some(Value::Bool(_)) => "bool",
        Some(Value::Number(_)) => "number",
        Some(Value::String(_)) => "string",
        Some(Value::Array(_)) => "array",
        Some(Value::Object(_)) => "object",
    }
}

fn value_as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn lenient_u16<'de, D: Deserializer<'de>>(de: D) -> std::result::Result<Option<u16>, D::Error> {
    let value = Value::deserialize(de)?;
    Ok(value_as_i64(&value).and_then(|v| u16::try_from(v).ok()))
}

fn lenient_string<'de, D: Deserializer<'de>>(de: D) -> std::result::Result<String, D::Error> {
    Ok(lenient_opt_string(de)?.unwrap_or_default())
}

fn lenient_opt_string<'de, D: Deserializer<'de>>(
    de: D,
) -> std::result::Result<Option<String>, D::Error> {
    Ok(match Value::deserialize(de)? {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    })
}

fn register_frame<'de, D: Deserializer<'de>>(
    de: D,
) -> std::result::Result<Option<Vec<Option<i64>>>, D::Error> {
    Ok(match Value::deserialize(de)? {
        Value::Array(items) => Some(items.iter().map(value_as_i64).collect()),
        _ => None,
    })
}
