//! Pickled episode dictionaries.
//!
//! Two shapes are understood:
//! - a dict of field name → (nested) numeric list, and
//! - a list of per-step dicts, whose fields are stacked along a leading time axis.
//!
//! Values that are not plain numbers or lists (strings, pickled numpy objects,
//! ragged lists) are dropped; pickled numpy globals decode as `None`.

use std::collections::BTreeMap;
use std::path::Path;

use bridge_rlds_shared::{BridgeRldsError, Result};
use ndarray::{ArrayD, IxDyn};
use serde_pickle::{DeOptions, HashableValue, Value};
use tracing::debug;

/// Read a pickle file into numeric fields.
pub fn read_pickle(path: &Path) -> Result<BTreeMap<String, ArrayD<f64>>> {
    let bytes = std::fs::read(path).map_err(|e| BridgeRldsError::io(path, e))?;
    let value = serde_pickle::value_from_slice(
        &bytes,
        DeOptions::new().replace_unresolved_globals(),
    )
    .map_err(|e| BridgeRldsError::decode(path, e.to_string()))?;

    Ok(fields_from_value(path, &value))
}

fn fields_from_value(path: &Path, value: &Value) -> BTreeMap<String, ArrayD<f64>> {
    match value {
        Value::Dict(map) => {
            let mut fields = BTreeMap::new();
            for (key, value) in map {
                let Some(name) = key_name(key) else { continue };
                match to_array(value) {
                    Some(array) => {
                        fields.insert(name, array);
                    }
                    None => debug!(
                        file = %path.display(),
                        field = %name,
                        "skipping non-numeric pickle field"
                    ),
                }
            }
            fields
        }
        Value::List(items) | Value::Tuple(items) => stack_steps(path, items),
        _ => {
            debug!(file = %path.display(), "pickle holds neither a dict nor a list of dicts");
            BTreeMap::new()
        }
    }
}

/// Stack a list of per-step dicts into `[T, ...]` arrays, one per key.
fn stack_steps(path: &Path, items: &[Value]) -> BTreeMap<String, ArrayD<f64>> {
    let mut fields = BTreeMap::new();
    let dicts: Vec<&BTreeMap<HashableValue, Value>> = items
        .iter()
        .filter_map(|item| match item {
            Value::Dict(map) => Some(map),
            _ => None,
        })
        .collect();

    let Some(first) = dicts.first() else {
        return fields;
    };
    if dicts.len() != items.len() {
        debug!(file = %path.display(), "pickle list mixes dicts with other values");
        return fields;
    }

    for key in first.keys() {
        let Some(name) = key_name(key) else { continue };
        let rows: Option<Vec<ArrayD<f64>>> = dicts
            .iter()
            .map(|step| step.get(key).and_then(to_array))
            .collect();

        match rows.and_then(|rows| stack(&rows)) {
            Some(array) => {
                fields.insert(name, array);
            }
            None => debug!(
                file = %path.display(),
                field = %name,
                "skipping unstackable per-step field"
            ),
        }
    }
    fields
}

fn stack(rows: &[ArrayD<f64>]) -> Option<ArrayD<f64>> {
    let row_shape = rows.first()?.shape().to_vec();
    let mut flat = Vec::with_capacity(rows.len() * rows[0].len());
    for row in rows {
        if row.shape() != row_shape.as_slice() {
            return None;
        }
        flat.extend(row.iter().copied());
    }
    let mut shape = vec![rows.len()];
    shape.extend(row_shape);
    ArrayD::from_shape_vec(IxDyn(&shape), flat).ok()
}

fn key_name(key: &HashableValue) -> Option<String> {
    match key {
        HashableValue::String(s) => Some(s.clone()),
        HashableValue::Bytes(b) => Some(String::from_utf8_lossy(b).into_owned()),
        _ => None,
    }
}

/// Convert a numeric scalar or rectangular nested list into an array.
fn to_array(value: &Value) -> Option<ArrayD<f64>> {
    let mut flat = Vec::new();
    let shape = collect(value, &mut flat)?;
    ArrayD::from_shape_vec(IxDyn(&shape), flat).ok()
}

fn collect(value: &Value, out: &mut Vec<f64>) -> Option<Vec<usize>> {
    match value {
        Value::F64(v) => {
            out.push(*v);
            Some(vec![])
        }
        Value::I64(v) => {
            out.push(*v as f64);
            Some(vec![])
        }
        Value::Bool(v) => {
            out.push(if *v { 1.0 } else { 0.0 });
            Some(vec![])
        }
        Value::List(items) | Value::Tuple(items) => {
            let mut inner: Option<Vec<usize>> = None;
            for item in items {
                let shape = collect(item, out)?;
                match &inner {
                    None => inner = Some(shape),
                    Some(prev) if *prev == shape => {}
                    Some(_) => return None,
                }
            }
            let mut shape = vec![items.len()];
            shape.extend(inner.unwrap_or_default());
            Some(shape)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_pickle::SerOptions;
    use std::path::PathBuf;

    fn temp_dir() -> PathBuf {
        let dir =
            std::env::temp_dir().join(format!("bridge-rlds-pickle-test-{}", uuid::Uuid::now_v7()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn reads_dict_of_arrays() {
        let tmp = temp_dir();
        let path = tmp.join("obs_dict.pkl");
        let mut dict: BTreeMap<String, Vec<Vec<f64>>> = BTreeMap::new();
        dict.insert("qpos".into(), vec![vec![0.0, 0.1], vec![0.2, 0.3], vec![0.4, 0.5]]);
        dict.insert("qvel".into(), vec![vec![1.0, 1.0], vec![2.0, 2.0], vec![3.0, 3.0]]);
        std::fs::write(&path, serde_pickle::to_vec(&dict, SerOptions::new()).unwrap()).unwrap();

        let fields = read_pickle(&path).unwrap();
        assert_eq!(fields.len(), 2);
        assert_eq!(fields["qpos"].shape(), &[3, 2]);
        assert_eq!(fields["qvel"][[2, 1]], 3.0);

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn stacks_list_of_step_dicts() {
        let tmp = temp_dir();
        let path = tmp.join("policy_out.pkl");
        let steps: Vec<BTreeMap<String, Vec<f64>>> = (0..4)
            .map(|i| {
                let mut step = BTreeMap::new();
                step.insert("actions".to_string(), vec![i as f64; 7]);
                step
            })
            .collect();
        std::fs::write(&path, serde_pickle::to_vec(&steps, SerOptions::new()).unwrap()).unwrap();

        let fields = read_pickle(&path).unwrap();
        assert_eq!(fields["actions"].shape(), &[4, 7]);
        assert_eq!(fields["actions"][[3, 0]], 3.0);

        let _ = std::fs::remove_dir_all(&tmp);
    }

    #[test]
    fn drops_ragged_and_non_numeric_values() {
        let mut map = BTreeMap::new();
        map.insert(
            HashableValue::String("ragged".into()),
            Value::List(vec![
                Value::List(vec![Value::F64(1.0)]),
                Value::List(vec![Value::F64(1.0), Value::F64(2.0)]),
            ]),
        );
        map.insert(
            HashableValue::String("policy_type".into()),
            Value::String("vr_teleop".into()),
        );
        map.insert(HashableValue::String("term_t".into()), Value::I64(29));

        let fields = fields_from_value(Path::new("agent_data.pkl"), &Value::Dict(map));
        assert_eq!(fields.len(), 1);
        assert_eq!(fields["term_t"].ndim(), 0);
    }

    #[test]
    fn garbage_is_a_decode_failure() {
        let tmp = temp_dir();
        let path = tmp.join("broken.pkl");
        std::fs::write(&path, b"definitely not a pickle").unwrap();

        let err = read_pickle(&path).unwrap_err();
        assert!(matches!(err, BridgeRldsError::DecodeFailure { .. }));

        let _ = std::fs::remove_dir_all(&tmp);
    }
}
