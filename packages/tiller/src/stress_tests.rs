//! Randomized stress tests: long random operation sequences checked against
//! a plain model of what the store should contain.

use serde_json::{json, Map, Value};

use crate::engine::Store;
use crate::patch::{apply_patches, diff};

fn random_scalar() -> Value {
    match fastrand::u8(0..4) {
        0 => Value::Null,
        1 => Value::Bool(fastrand::bool()),
        2 => Value::from(fastrand::i64(-100..100)),
        _ => Value::String(format!("s{}", fastrand::u8(0..10))),
    }
}

fn random_value(depth: usize) -> Value {
    if depth == 0 {
        return random_scalar();
    }
    match fastrand::u8(0..4) {
        0 => Value::Array(
            (0..fastrand::usize(0..4))
                .map(|_| random_value(depth - 1))
                .collect(),
        ),
        1 => {
            let mut map = Map::new();
            for _ in 0..fastrand::usize(0..4) {
                map.insert(format!("k{}", fastrand::u8(0..6)), random_value(depth - 1));
            }
            Value::Object(map)
        }
        _ => random_scalar(),
    }
}

#[test]
fn test_stress_diff_round_trip() {
    fastrand::seed(0x7155e4);
    for _ in 0..200 {
        let base = random_value(3);
        let next = random_value(3);
        let (forward, inverse) = diff(&base, &next);
        assert_eq!(apply_patches(&base, &forward).unwrap(), next);
        assert_eq!(apply_patches(&next, &inverse).unwrap(), base);
    }
}

#[test]
fn test_stress_random_mutate_undo_redo() {
    fastrand::seed(0x7155e5);

    let mut store: Store<Value> = Store::builder(json!({}))
        .max_history(2000)
        .build()
        .unwrap();

    // Model: the sequence of committed states plus a cursor into it.
    let mut history = vec![json!({})];
    let mut cursor = 0usize;

    for _ in 0..500 {
        match fastrand::u8(0..10) {
            // Weighted towards mutation.
            0..=5 => {
                let key = format!("k{}", fastrand::u8(0..6));
                let value = random_scalar();
                let noop = history[cursor].get(&key) == Some(&value);

                let write = value.clone();
                let write_key = key.clone();
                let result = store
                    .mutate(None, move |draft| {
                        draft[write_key.as_str()] = write;
                        Ok(())
                    })
                    .unwrap();

                if noop {
                    assert!(result.is_none());
                } else {
                    assert!(result.is_some());
                    let mut next = history[cursor].clone();
                    next[key.as_str()] = value;
                    history.truncate(cursor + 1);
                    history.push(next);
                    cursor += 1;
                }
            }
            6 | 7 => {
                let did = store.undo().unwrap();
                assert_eq!(did, cursor > 0);
                if did {
                    cursor -= 1;
                }
            }
            _ => {
                let did = store.redo().unwrap();
                assert_eq!(did, cursor + 1 < history.len());
                if did {
                    cursor += 1;
                }
            }
        }

        assert_eq!(store.state().unwrap(), &history[cursor]);
        assert_eq!(store.can_undo().unwrap(), cursor > 0);
        assert_eq!(store.can_redo().unwrap(), cursor + 1 < history.len());
    }
}
