//! Structural patches over JSON documents.
//!
//! A [`Patch`] is a minimal edit descriptor (operation, path, optional
//! value) sufficient to replay or reverse one field-level change. A patch
//! list describes a full state transition.
//!
//! # Determinism
//!
//! ```text
//! next = apply_patches(base, forward)
//! base = apply_patches(next, inverse)
//! ```
//!
//! - `apply_patches` is a pure function; the input document is never mutated
//! - the same `(base, patches)` pair always produces the same output
//! - [`diff`] guarantees the round-trip above bit-for-bit
//!
//! # Array semantics
//!
//! `Add` at an index *inserts* before that position (index == len appends),
//! `Remove` at an index deletes that position, `Replace` overwrites in
//! place. Out-of-range indices and missing parents are errors, never
//! silently ignored.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use smallvec::SmallVec;
use thiserror::Error;

// =============================================================================
// Path
// =============================================================================

/// One step into a JSON document: an object key or an array index.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Seg {
    /// Object property key.
    Key(String),
    /// Array position.
    Index(usize),
}

/// An ordered sequence of segments addressing one location in a document.
///
/// Paths are short in practice; segments are stored inline up to four deep.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Path(SmallVec<[Seg; 4]>);

impl Path {
    /// The document root.
    pub fn root() -> Self {
        Path(SmallVec::new())
    }

    /// Extend with an object key.
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.0.push(Seg::Key(key.into()));
        self
    }

    /// Extend with an array index.
    pub fn index(mut self, index: usize) -> Self {
        self.0.push(Seg::Index(index));
        self
    }

    /// A child path one segment deeper.
    pub fn child(&self, seg: Seg) -> Self {
        let mut p = self.clone();
        p.0.push(seg);
        p
    }

    /// True for the root path.
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of segments.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when the path has no segments.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Segments as a slice.
    pub fn segments(&self) -> &[Seg] {
        &self.0
    }

    fn split_last(&self) -> Option<(&Seg, &[Seg])> {
        self.0.split_last()
    }
}

impl std::fmt::Display for Path {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.0.is_empty() {
            return f.write_str("$");
        }
        f.write_str("$")?;
        for seg in &self.0 {
            match seg {
                Seg::Key(k) => write!(f, ".{}", k)?,
                Seg::Index(i) => write!(f, "[{}]", i)?,
            }
        }
        Ok(())
    }
}

// =============================================================================
// Patch
// =============================================================================

/// A single structural edit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Patch {
    /// Insert a value at `path` (object key must be absent conceptually;
    /// array index inserts).
    Add {
        /// Location of the edit.
        path: Path,
        /// The inserted value.
        value: Value,
    },
    /// Overwrite the value at `path`.
    Replace {
        /// Location of the edit.
        path: Path,
        /// The new value.
        value: Value,
    },
    /// Delete the value at `path`.
    Remove {
        /// Location of the edit.
        path: Path,
    },
}

impl Patch {
    /// The location this patch edits.
    pub fn path(&self) -> &Path {
        match self {
            Patch::Add { path, .. } | Patch::Replace { path, .. } | Patch::Remove { path } => path,
        }
    }

    /// Rough in-memory footprint, used for history accounting.
    pub fn approx_size(&self) -> usize {
        let path_size = self
            .path()
            .segments()
            .iter()
            .map(|seg| match seg {
                Seg::Key(k) => k.len() + 8,
                Seg::Index(_) => 8,
            })
            .sum::<usize>();
        let value_size = match self {
            Patch::Add { value, .. } | Patch::Replace { value, .. } => approx_value_size(value),
            Patch::Remove { .. } => 0,
        };
        path_size + value_size + 16
    }
}

/// Cheap recursive estimate of a JSON value's footprint.
pub(crate) fn approx_value_size(value: &Value) -> usize {
    match value {
        Value::Null => 4,
        Value::Bool(_) => 5,
        Value::Number(_) => 8,
        Value::String(s) => s.len() + 16,
        Value::Array(items) => items.iter().map(approx_value_size).sum::<usize>() + 16,
        Value::Object(map) => {
            map.iter()
                .map(|(k, v)| k.len() + approx_value_size(v))
                .sum::<usize>()
                + 16
        }
    }
}

/// Human-readable JSON type name, for error messages.
pub(crate) fn value_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// =============================================================================
// Patch Error
// =============================================================================

/// Errors from applying a patch list to a document.
#[derive(Debug, Error)]
pub enum PatchError {
    /// A path segment addressed a key or index that does not exist.
    #[error("path {path} does not exist in the target document")]
    MissingPath {
        /// The unreachable path, rendered.
        path: String,
    },

    /// A path segment descended into a scalar.
    #[error("path {path} addresses a {found} where an object or array was required")]
    NotAContainer {
        /// The offending path, rendered.
        path: String,
        /// The JSON type actually found.
        found: &'static str,
    },

    /// An array index was past the end of the array.
    #[error("index {index} out of bounds at {path} (len {len})")]
    IndexOutOfBounds {
        /// The offending path, rendered.
        path: String,
        /// The requested index.
        index: usize,
        /// The array length.
        len: usize,
    },

    /// Remove was attempted against the document root.
    #[error("cannot remove the document root")]
    RemoveRoot,
}

// =============================================================================
// Apply
// =============================================================================

/// Apply a patch list to a document, producing a new document.
///
/// Pure: `base` is never mutated. Patches apply in list order; the first
/// failure aborts and nothing is returned.
pub fn apply_patches(base: &Value, patches: &[Patch]) -> Result<Value, PatchError> {
    let mut out = base.clone();
    for patch in patches {
        apply_one(&mut out, patch)?;
    }
    Ok(out)
}

fn apply_one(target: &mut Value, patch: &Patch) -> Result<(), PatchError> {
    let path = patch.path();
    let Some((last, parents)) = path.split_last() else {
        // Root edits: Add and Replace both overwrite the whole document.
        return match patch {
            Patch::Add { value, .. } | Patch::Replace { value, .. } => {
                *target = value.clone();
                Ok(())
            }
            Patch::Remove { .. } => Err(PatchError::RemoveRoot),
        };
    };

    let mut cur = target;
    let mut walked = Path::root();
    for seg in parents {
        walked = walked.child(seg.clone());
        cur = descend(cur, seg, &walked)?;
    }

    match (patch, last) {
        (Patch::Add { value, .. }, Seg::Key(key)) => {
            let map = as_object(cur, path)?;
            map.insert(key.clone(), value.clone());
            Ok(())
        }
        (Patch::Add { value, .. }, Seg::Index(index)) => {
            let arr = as_array(cur, path)?;
            if *index > arr.len() {
                return Err(PatchError::IndexOutOfBounds {
                    path: path.to_string(),
                    index: *index,
                    len: arr.len(),
                });
            }
            arr.insert(*index, value.clone());
            Ok(())
        }
        (Patch::Replace { value, .. }, seg) => {
            let slot = descend(cur, seg, path)?;
            *slot = value.clone();
            Ok(())
        }
        (Patch::Remove { .. }, Seg::Key(key)) => {
            let map = as_object(cur, path)?;
            map.remove(key).ok_or_else(|| PatchError::MissingPath {
                path: path.to_string(),
            })?;
            Ok(())
        }
        (Patch::Remove { .. }, Seg::Index(index)) => {
            let arr = as_array(cur, path)?;
            if *index >= arr.len() {
                return Err(PatchError::IndexOutOfBounds {
                    path: path.to_string(),
                    index: *index,
                    len: arr.len(),
                });
            }
            arr.remove(*index);
            Ok(())
        }
    }
}

fn descend<'v>(value: &'v mut Value, seg: &Seg, at: &Path) -> Result<&'v mut Value, PatchError> {
    let found = value_type_name(value);
    match (value, seg) {
        (Value::Object(map), Seg::Key(key)) => {
            map.get_mut(key).ok_or_else(|| PatchError::MissingPath {
                path: at.to_string(),
            })
        }
        (Value::Array(arr), Seg::Index(index)) => {
            let len = arr.len();
            arr.get_mut(*index)
                .ok_or_else(|| PatchError::IndexOutOfBounds {
                    path: at.to_string(),
                    index: *index,
                    len,
                })
        }
        _ => Err(PatchError::NotAContainer {
            path: at.to_string(),
            found,
        }),
    }
}

fn as_object<'v>(
    value: &'v mut Value,
    at: &Path,
) -> Result<&'v mut serde_json::Map<String, Value>, PatchError> {
    let found = value_type_name(value);
    value.as_object_mut().ok_or(PatchError::NotAContainer {
        path: at.to_string(),
        found,
    })
}

fn as_array<'v>(value: &'v mut Value, at: &Path) -> Result<&'v mut Vec<Value>, PatchError> {
    let found = value_type_name(value);
    value.as_array_mut().ok_or(PatchError::NotAContainer {
        path: at.to_string(),
        found,
    })
}

// =============================================================================
// Diff
// =============================================================================

/// Compute forward and inverse patch lists between two documents.
///
/// Guarantees:
/// - `apply_patches(base, &forward) == next`
/// - `apply_patches(next, &inverse) == base`
///
/// Both hold bit-for-bit. An unchanged document yields two empty lists.
///
/// Each forward patch is generated together with its exact inverse; the
/// inverse list is the mirrored sequence in reverse application order, so
/// replaying it unwinds the transition step by step.
pub fn diff(base: &Value, next: &Value) -> (Vec<Patch>, Vec<Patch>) {
    let mut pairs = Vec::new();
    diff_at(Path::root(), base, next, &mut pairs);
    let mut forward = Vec::with_capacity(pairs.len());
    let mut inverse = Vec::with_capacity(pairs.len());
    for (f, i) in pairs {
        forward.push(f);
        inverse.push(i);
    }
    inverse.reverse();
    (forward, inverse)
}

fn diff_at(path: Path, base: &Value, next: &Value, pairs: &mut Vec<(Patch, Patch)>) {
    if base == next {
        return;
    }
    match (base, next) {
        (Value::Object(a), Value::Object(b)) => {
            for (key, old) in a {
                if !b.contains_key(key) {
                    let at = path.child(Seg::Key(key.clone()));
                    pairs.push((
                        Patch::Remove { path: at.clone() },
                        Patch::Add {
                            path: at,
                            value: old.clone(),
                        },
                    ));
                }
            }
            for (key, new) in b {
                let at = path.child(Seg::Key(key.clone()));
                match a.get(key) {
                    Some(old) => diff_at(at, old, new, pairs),
                    None => pairs.push((
                        Patch::Add {
                            path: at.clone(),
                            value: new.clone(),
                        },
                        Patch::Remove { path: at },
                    )),
                }
            }
        }
        (Value::Array(a), Value::Array(b)) => {
            let shared = a.len().min(b.len());
            for i in 0..shared {
                diff_at(path.child(Seg::Index(i)), &a[i], &b[i], pairs);
            }
            if b.len() > a.len() {
                // Appended tail: forward adds ascend, so the reversed
                // inverse removes descend.
                for i in a.len()..b.len() {
                    let at = path.child(Seg::Index(i));
                    pairs.push((
                        Patch::Add {
                            path: at.clone(),
                            value: b[i].clone(),
                        },
                        Patch::Remove { path: at },
                    ));
                }
            } else if a.len() > b.len() {
                // Truncated tail: forward removes descend from the end, so
                // the reversed inverse re-adds ascending.
                for i in (b.len()..a.len()).rev() {
                    let at = path.child(Seg::Index(i));
                    pairs.push((
                        Patch::Remove { path: at.clone() },
                        Patch::Add {
                            path: at,
                            value: a[i].clone(),
                        },
                    ));
                }
            }
        }
        _ => {
            pairs.push((
                Patch::Replace {
                    path: path.clone(),
                    value: next.clone(),
                },
                Patch::Replace {
                    path,
                    value: base.clone(),
                },
            ));
        }
    }
}
