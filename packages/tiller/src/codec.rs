//! The patch codec capability: draft production and patch replay.
//!
//! The mutation engine treats diff/apply as an injected primitive rather
//! than something it owns. [`StructuralCodec`] is the default: fork the
//! committed document into a draft, run the (middleware-wrapped) recipe
//! against it, and derive the forward/inverse pair from what actually
//! changed. A custom codec can be supplied at build time, e.g. to plug in a
//! different diff strategy.

use serde_json::Value;

use crate::patch::{apply_patches, diff, Patch, PatchError};

/// The outcome of producing one state transition.
#[derive(Debug)]
pub struct Produced {
    /// The candidate next document.
    pub next: Value,
    /// Patches that turn the base into `next`, in application order.
    pub forward: Vec<Patch>,
    /// Patches that turn `next` back into the base, in application order.
    pub inverse: Vec<Patch>,
}

/// Diff/apply capability consumed by the mutation engine.
pub trait PatchCodec: 'static {
    /// Fork `base` into a draft, run `recipe` against it, and return the
    /// candidate document plus its forward/inverse patch pair.
    ///
    /// A recipe error aborts production; the base is untouched either way.
    fn produce(
        &self,
        base: &Value,
        recipe: &mut dyn FnMut(&mut Value) -> anyhow::Result<()>,
    ) -> anyhow::Result<Produced>;

    /// Replay a patch list against an arbitrary document.
    fn apply(&self, base: &Value, patches: &[Patch]) -> Result<Value, PatchError>;
}

/// Default codec: clone-draft plus recursive structural diff.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuralCodec;

impl PatchCodec for StructuralCodec {
    fn produce(
        &self,
        base: &Value,
        recipe: &mut dyn FnMut(&mut Value) -> anyhow::Result<()>,
    ) -> anyhow::Result<Produced> {
        let mut draft = base.clone();
        recipe(&mut draft)?;
        let (forward, inverse) = diff(base, &draft);
        Ok(Produced {
            next: draft,
            forward,
            inverse,
        })
    }

    fn apply(&self, base: &Value, patches: &[Patch]) -> Result<Value, PatchError> {
        apply_patches(base, patches)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_produce_reports_exact_patches() {
        let codec = StructuralCodec;
        let base = json!({"count": 0});
        let produced = codec
            .produce(&base, &mut |draft| {
                draft["count"] = json!(5);
                Ok(())
            })
            .unwrap();

        assert_eq!(produced.next, json!({"count": 5}));
        assert_eq!(codec.apply(&base, &produced.forward).unwrap(), produced.next);
        assert_eq!(codec.apply(&produced.next, &produced.inverse).unwrap(), base);
    }

    #[test]
    fn test_produce_unchanged_draft_is_empty() {
        let codec = StructuralCodec;
        let base = json!({"count": 0});
        let produced = codec.produce(&base, &mut |_| Ok(())).unwrap();
        assert!(produced.forward.is_empty());
        assert!(produced.inverse.is_empty());
    }

    #[test]
    fn test_produce_recipe_error_propagates() {
        let codec = StructuralCodec;
        let base = json!({"count": 0});
        let err = codec
            .produce(&base, &mut |_| Err(anyhow::anyhow!("nope")))
            .unwrap_err();
        assert!(err.to_string().contains("nope"));
        // base untouched by construction (produce never mutates its input)
        assert_eq!(base, json!({"count": 0}));
    }
}
