use serde_json::Value;

use crate::types::*;

/// Structural diff of two JSON documents. Objects recurse, anything else
/// (arrays included) is compared whole. Changes are `(dotted.path, old, new)`.
pub(crate) fn diff_json(
    previous: &Value,
    current: &Value,
    path_prefix: &str,
    changes: &mut Vec<(String, Value, Value)>,
) {
    match (previous, current) {
        (Value::Object(prev_map), Value::Object(curr_map)) => {
            for (key, curr_val) in curr_map {
                let path = if path_prefix.is_empty() {
                    key.clone()
                } else {
                    format!("{path_prefix}.{key}")
                };
                match prev_map.get(key) {
                    Some(prev_val) => diff_json(prev_val, curr_val, &path, changes),
                    None => {
                        if curr_val.is_object() {
                            diff_json(&Value::Object(serde_json::Map::new()), curr_val, &path, changes);
                        } else {
                            changes.push((path, Value::Null, curr_val.clone()));
                        }
                    }
                }
            }
        }
        (prev, curr) if prev != curr => {
            changes.push((path_prefix.to_string(), prev.clone(), curr.clone()));
        }
        _ => {}
    }
}

/// Events describing how the unit map moved between two polls.
pub(crate) fn diff_units(previous: &UnitMap, current: &UnitMap) -> Vec<Event> {
    let mut events = Vec::new();

    for (address, curr) in current {
        let Some(prev) = previous.get(address) else {
            events.push(Event::UnitDiscovered {
                address: *address,
                name: curr.name(),
            });
            continue;
        };
        diff_unit(prev, curr, &mut events);
    }

    for address in previous.keys() {
        if !current.contains_key(address) {
            events.push(Event::UnitLost { address: *address });
        }
    }

    events
}

fn diff_unit(prev: &UnitState, curr: &UnitState, events: &mut Vec<Event>) {
    let address = curr.address;
    if prev.power != curr.power {
        events.push(Event::PowerChanged { address, on: curr.power });
    }
    if prev.mode != curr.mode {
        events.push(Event::ModeChanged { address, mode: curr.mode });
    }
    if prev.fan_speed != curr.fan_speed {
        events.push(Event::FanSpeedChanged { address, speed: curr.fan_speed });
    }
    if prev.set_temp != curr.set_temp {
        events.push(Event::SetTempChanged { address, celsius: curr.set_temp });
    }
    if prev.room_temp != curr.room_temp {
        events.push(Event::RoomTempChanged { address, celsius: curr.room_temp });
    }
    if prev.error_code != curr.error_code {
        events.push(Event::ErrorCodeChanged { address, code: curr.error_code });
    }
    if prev.status != curr.status {
        events.push(Event::StatusChanged {
            address,
            from: prev.status,
            to: curr.status,
        });
    }
    if prev.damper != curr.damper {
        events.push(Event::DamperChanged { address, position: curr.damper });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::decode_unit;
    use serde_json::json;

    fn unit(system: u16, address: u16) -> UnitState {
        decode_unit(UnitAddress::new(system, address), &[], None)
    }

    fn map(units: Vec<UnitState>) -> UnitMap {
        units.into_iter().map(|u| (u.address, u)).collect()
    }

    #[test]
    fn json_diff_reports_changed_leaves() {
        let mut changes = Vec::new();
        diff_json(
            &json!({"status": "success", "meter": {"pwr": 10}}),
            &json!({"status": "success", "meter": {"pwr": 12, "id": "1"}}),
            "",
            &mut changes,
        );
        assert_eq!(changes.len(), 2);
        assert!(changes.iter().any(|(p, _, n)| p == "meter.pwr" && *n == json!(12)));
        assert!(changes.iter().any(|(p, o, _)| p == "meter.id" && o.is_null()));
    }

    #[test]
    fn identical_maps_produce_no_events() {
        let m = map(vec![unit(1, 1), unit(1, 2)]);
        assert!(diff_units(&m, &m).is_empty());
    }

    #[test]
    fn discovery_and_loss() {
        let before = map(vec![unit(1, 1)]);
        let after = map(vec![unit(1, 2)]);
        let events = diff_units(&before, &after);
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], Event::UnitDiscovered { address, .. } if address == UnitAddress::new(1, 2)));
        assert_eq!(events[1], Event::UnitLost { address: UnitAddress::new(1, 1) });
    }

    #[test]
    fn field_changes() {
        let before = map(vec![unit(1, 1)]);
        let mut changed = unit(1, 1);
        changed.power = true;
        changed.status = UnitStatus::On;
        changed.mode = HvacMode::Heat;
        changed.set_temp = 20;
        let after = map(vec![changed]);

        let events = diff_units(&before, &after);
        let address = UnitAddress::new(1, 1);
        assert!(events.contains(&Event::PowerChanged { address, on: true }));
        assert!(events.contains(&Event::ModeChanged { address, mode: HvacMode::Heat }));
        assert!(events.contains(&Event::SetTempChanged { address, celsius: 20 }));
        assert!(events.contains(&Event::StatusChanged {
            address,
            from: UnitStatus::Off,
            to: UnitStatus::On,
        }));
        assert_eq!(events.len(), 4);
    }
}
