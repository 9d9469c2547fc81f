//! Override merge of YAML documents.
//!
//! Maps merge key by key; lists and scalars from the overlay replace the
//! base value outright. Nothing here touches the filesystem.

use crate::error::ValidationError;
use serde_yaml::Value;

/// Result of merging a snippet over the live configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedDocument {
    /// `Null` when there was nothing to merge into.
    pub value: Value,
    pub rendered: String,
}

impl MergedDocument {
    pub fn empty() -> Self {
        Self { value: Value::Null, rendered: String::new() }
    }

    pub fn from_value(value: Value) -> Result<Self, ValidationError> {
        let rendered = serde_yaml::to_string(&value)
            .map_err(|e| ValidationError::Malformed(e.to_string()))?;
        Ok(Self { value, rendered })
    }

    pub fn is_empty(&self) -> bool {
        self.rendered.trim().is_empty()
    }
}

/// Produces the document the installer will write.
pub trait MergeEngine {
    fn merge(&self, base: &[u8], overlay: &Value) -> Result<MergedDocument, ValidationError>;
}

/// In-process equivalent of `yq eval-all '. as $item ireduce ({}; . * $item)'`.
#[derive(Debug, Clone, Copy, Default)]
pub struct OverrideMerge;

impl MergeEngine for OverrideMerge {
    fn merge(&self, base: &[u8], overlay: &Value) -> Result<MergedDocument, ValidationError> {
        match parse_base(base)? {
            // An empty file has no document to merge into.
            None => Ok(MergedDocument::empty()),
            // Merging a mapping over a list or scalar would drop the base.
            Some(base @ Value::Mapping(_)) => MergedDocument::from_value(merge(&base, overlay)),
            Some(_) => Err(ValidationError::NotAMapping),
        }
    }
}

/// Parse the live file. Empty, blank or comment-only input yields `None`.
pub fn parse_base(bytes: &[u8]) -> Result<Option<Value>, ValidationError> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| ValidationError::Malformed(format!("not UTF-8: {e}")))?;
    let blank = text.lines()
        .map(str::trim)
        .all(|l| l.is_empty() || l.starts_with('#') || l == "---");
    if blank {
        return Ok(None);
    }
    let value: Value = serde_yaml::from_str(text)
        .map_err(|e| ValidationError::Malformed(e.to_string()))?;
    match value {
        Value::Null => Ok(None),
        v => Ok(Some(v)),
    }
}

/// Recursively merge `overlay` over `base`, overlay winning.
pub fn merge(base: &Value, overlay: &Value) -> Value {
    match (base, overlay) {
        (Value::Mapping(b), Value::Mapping(o)) => {
            let mut out = b.clone();
            for (k, ov) in o {
                let merged = match out.get(k) {
                    Some(bv) => merge(bv, ov),
                    None => ov.clone(),
                };
                out.insert(k.clone(), merged);
            }
            Value::Mapping(out)
        }
        (_, o) => o.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn yaml(s: &str) -> Value {
        serde_yaml::from_str(s).unwrap()
    }

    #[test]
    fn nested_maps_merge_and_lists_replace() {
        let base = yaml("a: {x: 1, y: [1, 2]}\nb: keep\n");
        let over = yaml("a: {y: [3], z: true}\n");
        let out = merge(&base, &over);
        assert_eq!(out, yaml("a: {x: 1, y: [3], z: true}\nb: keep\n"));
    }

    #[test]
    fn scalar_overlay_replaces_map() {
        let out = merge(&yaml("a: {x: 1}"), &yaml("a: 2"));
        assert_eq!(out, yaml("a: 2"));
    }

    #[test]
    fn base_key_order_is_kept() {
        let out = merge(&yaml("z: 1\na: 2\n"), &yaml("m: 3\nz: 9\n"));
        let keys: Vec<_> = out.as_mapping().unwrap().keys()
            .map(|k| k.as_str().unwrap().to_string()).collect();
        assert_eq!(keys, ["z", "a", "m"]);
    }

    #[test]
    fn blank_and_comment_only_bases_are_empty() {
        assert_eq!(parse_base(b"").unwrap(), None);
        assert_eq!(parse_base(b"  \n").unwrap(), None);
        assert_eq!(parse_base(b"# nothing here\n").unwrap(), None);
        let merged = OverrideMerge.merge(b"", &yaml("a: 1")).unwrap();
        assert!(merged.is_empty());
    }

    #[test]
    fn non_mapping_base_is_rejected() {
        let over = yaml("a: 1");
        assert_eq!(OverrideMerge.merge(b"- keep\n- me\n", &over), Err(ValidationError::NotAMapping));
        assert_eq!(OverrideMerge.merge(b"just a string\n", &over), Err(ValidationError::NotAMapping));
    }

    #[test]
    fn broken_base_is_reported() {
        let err = OverrideMerge.merge(b"a: [1, 2\n", &yaml("b: 1")).unwrap_err();
        assert!(matches!(err, ValidationError::Malformed(_)));
    }
}
