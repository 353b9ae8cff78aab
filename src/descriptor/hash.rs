//! Property snapshot hashing for change detection.
//!
//! This module provides deterministic hashing of resolved property bags
//! to detect changes between runs and enable idempotent operations.

use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use super::spec::{Descriptor, PropertyValue, ResourceSpec};

/// Hasher for computing descriptor and property-bag fingerprints.
#[derive(Debug, Default)]
pub struct SpecHasher;

impl SpecHasher {
    /// Creates a new hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes a hash of the entire descriptor.
    ///
    /// This hash changes when any declared resource or export changes.
    #[must_use]
    pub fn hash_descriptor(&self, descriptor: &Descriptor) -> String {
        let mut hasher = Sha256::new();

        hasher.update(descriptor.project.name.as_bytes());
        hasher.update(descriptor.project.environment.as_bytes());
        if let Some(region) = &descriptor.project.region {
            hasher.update(region.as_bytes());
        }

        for resource in &descriptor.resources {
            hasher.update(self.hash_resource(resource).as_bytes());
        }

        for (name, value) in &descriptor.exports {
            hasher.update(name.as_bytes());
            Self::update_value(&mut hasher, value);
        }

        hex::encode(hasher.finalize())
    }

    /// Computes a hash for a single resource declaration.
    #[must_use]
    pub fn hash_resource(&self, resource: &ResourceSpec) -> String {
        let mut hasher = Sha256::new();

        hasher.update(resource.name.as_bytes());
        hasher.update(resource.kind.to_string().as_bytes());
        hasher.update(if resource.protect { [1u8] } else { [0u8] });
        if let Some(import_id) = &resource.import_id {
            hasher.update(import_id.as_bytes());
        }

        Self::update_properties(&mut hasher, &resource.properties);

        hex::encode(hasher.finalize())
    }

    /// Computes a hash over a resolved property bag.
    ///
    /// Used as the `properties_hash` stored on a physical record; two bags
    /// hash equal iff they are structurally equal.
    #[must_use]
    pub fn hash_properties(&self, properties: &BTreeMap<String, PropertyValue>) -> String {
        let mut hasher = Sha256::new();
        Self::update_properties(&mut hasher, properties);
        hex::encode(hasher.finalize())
    }

    /// Computes a short hash (first 8 characters) for display purposes.
    #[must_use]
    pub fn short_hash(&self, hash: &str) -> String {
        hash.chars().take(8).collect()
    }

    fn update_properties(hasher: &mut Sha256, properties: &BTreeMap<String, PropertyValue>) {
        // BTreeMap iteration is already ordered, so the digest is
        // deterministic without an explicit sort.
        for (key, value) in properties {
            hasher.update(key.as_bytes());
            Self::update_value(hasher, value);
        }
    }

    fn update_value(hasher: &mut Sha256, value: &PropertyValue) {
        // A type tag per variant keeps e.g. Integer(1) and String("1")
        // from colliding.
        match value {
            PropertyValue::Bool(b) => {
                hasher.update([0u8]);
                hasher.update(if *b { [1u8] } else { [0u8] });
            }
            PropertyValue::Integer(i) => {
                hasher.update([1u8]);
                hasher.update(i.to_be_bytes());
            }
            PropertyValue::Float(v) => {
                hasher.update([2u8]);
                hasher.update(v.to_be_bytes());
            }
            PropertyValue::String(s) => {
                hasher.update([3u8]);
                hasher.update(s.as_bytes());
            }
            PropertyValue::Reference(r) => {
                hasher.update([4u8]);
                hasher.update(r.expression().as_bytes());
            }
            PropertyValue::List(items) => {
                hasher.update([5u8]);
                hasher.update((items.len() as u64).to_be_bytes());
                for item in items {
                    Self::update_value(hasher, item);
                }
            }
            PropertyValue::Map(map) => {
                hasher.update([6u8]);
                hasher.update((map.len() as u64).to_be_bytes());
                for (key, item) in map {
                    hasher.update(key.as_bytes());
                    Self::update_value(hasher, item);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::spec::ResourceKind;

    fn props(yaml: &str) -> BTreeMap<String, PropertyValue> {
        serde_yaml::from_str(yaml).expect("test properties should parse")
    }

    #[test]
    fn test_properties_hash_deterministic() {
        let hasher = SpecHasher::new();
        let bag = props("name: voting-app-cluster\nsettings:\n  insights: disabled\n");

        assert_eq!(hasher.hash_properties(&bag), hasher.hash_properties(&bag));
    }

    #[test]
    fn test_properties_hash_detects_change() {
        let hasher = SpecHasher::new();
        let a = props("name: voting-app-cluster\n");
        let b = props("name: voting-app-cluster-2\n");

        assert_ne!(hasher.hash_properties(&a), hasher.hash_properties(&b));
    }

    #[test]
    fn test_type_tags_avoid_scalar_collisions() {
        let hasher = SpecHasher::new();
        let as_int = props("port: 80\n");
        let as_str = props("port: \"80\"\n");

        assert_ne!(
            hasher.hash_properties(&as_int),
            hasher.hash_properties(&as_str)
        );
    }

    #[test]
    fn test_resource_hash_includes_protect_flag() {
        let hasher = SpecHasher::new();
        let mut resource = ResourceSpec {
            name: String::from("cluster"),
            kind: ResourceKind::Cluster,
            protect: false,
            import_id: None,
            properties: props("name: c1\n"),
        };
        let unprotected = hasher.hash_resource(&resource);
        resource.protect = true;

        assert_ne!(unprotected, hasher.hash_resource(&resource));
    }

    #[test]
    fn test_short_hash() {
        let hasher = SpecHasher::new();
        let short = hasher.short_hash("abcdef1234567890");
        assert_eq!(short, "abcdef12");
    }
}
