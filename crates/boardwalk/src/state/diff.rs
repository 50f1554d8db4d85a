use serde_json::{Map, Value};

/// Structural difference between `base` (what the client holds) and `live`
/// (what it should hold). Only changed fields appear, addressed through their
/// ancestor path; an unchanged input yields an empty object. Lists and
/// scalars are replaced wholesale, nested objects are recursed into, and a
/// field that disappeared from `live` is sent as an explicit `null`.
pub fn diff_value(base: &Value, live: &Value) -> Value {
    if base == live {
        return Value::Object(Map::new());
    }
    match (base, live) {
        (Value::Object(base_map), Value::Object(live_map)) => {
            Value::Object(diff_objects(base_map, live_map))
        }
        _ => live.clone(),
    }
}

fn diff_objects(base: &Map<String, Value>, live: &Map<String, Value>) -> Map<String, Value> {
    let mut out = Map::new();
    for (key, live_value) in live {
        match base.get(key) {
            Some(base_value) if base_value == live_value => {}
            Some(base_value) => {
                out.insert(key.clone(), field_diff(base_value, live_value));
            }
            None => {
                out.insert(key.clone(), live_value.clone());
            }
        }
    }
    for key in base.keys() {
        if !live.contains_key(key) {
            out.insert(key.clone(), Value::Null);
        }
    }
    out
}

fn field_diff(base: &Value, live: &Value) -> Value {
    match (base, live) {
        (Value::Object(base_map), Value::Object(live_map)) => {
            Value::Object(diff_objects(base_map, live_map))
        }
        _ => live.clone(),
    }
}
