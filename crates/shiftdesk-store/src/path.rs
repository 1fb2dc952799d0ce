//! Deep, path-addressed updates on snapshot documents.

use serde_json::{Map, Value};

use crate::PathError;

/// Set `value` at `path` inside `root`, creating intermediate objects as needed.
///
/// Object segments are keys; array segments are decimal indices, where an
/// index equal to the array length appends. Missing or null intermediate
/// members become empty objects.
pub fn set_at_path<S: AsRef<str>>(root: &mut Value, path: &[S], value: Value) -> Result<(), PathError> {
    let (last, parents) = path.split_last().ok_or(PathError::Empty)?;

    let mut current = root;
    for segment in parents {
        current = descend(current, segment.as_ref())?;
    }

    let segment = last.as_ref();
    match current {
        Value::Object(map) => {
            map.insert(segment.to_string(), value);
            Ok(())
        }
        Value::Array(items) => {
            let index = parse_index(segment, items.len())?;
            if index == items.len() {
                items.push(value);
            } else {
                items[index] = value;
            }
            Ok(())
        }
        _ => Err(PathError::NotAContainer {
            segment: segment.to_string(),
        }),
    }
}

fn descend<'a>(current: &'a mut Value, segment: &str) -> Result<&'a mut Value, PathError> {
    match current {
        Value::Object(map) => {
            let child = map
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            if child.is_null() {
                *child = Value::Object(Map::new());
            }
            Ok(child)
        }
        Value::Array(items) => {
            let len = items.len();
            let index = parse_index(segment, len)?;
            items.get_mut(index).ok_or(PathError::BadIndex {
                segment: segment.to_string(),
                len,
            })
        }
        _ => Err(PathError::NotAContainer {
            segment: segment.to_string(),
        }),
    }
}

fn parse_index(segment: &str, len: usize) -> Result<usize, PathError> {
    segment
        .parse::<usize>()
        .ok()
        .filter(|i| *i <= len)
        .ok_or(PathError::BadIndex {
            segment: segment.to_string(),
            len,
        })
}
