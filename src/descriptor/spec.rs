//! Descriptor types for the reconciliation engine.
//!
//! This module defines the structs that map to the `groundwork.infra.yaml`
//! file. A descriptor is a fully declarative statement of desired state:
//! logical resources, their property bags, and the references wiring them
//! together.

use std::collections::BTreeMap;
use std::fmt;

use serde::de::{MapAccess, SeqAccess, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// The root descriptor structure for a Groundwork project.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Descriptor {
    /// Project-level configuration.
    pub project: ProjectConfig,
    /// State backend configuration.
    #[serde(default)]
    pub state: StateConfig,
    /// Logical resources, in author order.
    pub resources: Vec<ResourceSpec>,
    /// Named run outputs, resolved after a successful apply.
    #[serde(default)]
    pub exports: BTreeMap<String, PropertyValue>,
}

/// Project-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProjectConfig {
    /// Unique name for the project.
    pub name: String,
    /// Environment (e.g., "dev", "staging", "prod").
    #[serde(default = "default_environment")]
    pub environment: String,
    /// Target region hint, forwarded to the provider.
    #[serde(default)]
    pub region: Option<String>,
}

/// State backend configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct StateConfig {
    /// Backend type (local or s3).
    #[serde(default)]
    pub backend: StateBackend,
    /// S3 bucket name (required for s3 backend).
    #[serde(default)]
    pub bucket: Option<String>,
    /// S3 key prefix (optional).
    #[serde(default)]
    pub prefix: Option<String>,
    /// S3 region (optional, uses AWS default if not specified).
    #[serde(default)]
    pub region: Option<String>,
    /// Local state directory path (for local backend).
    #[serde(default)]
    pub path: Option<String>,
}

/// State backend types.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StateBackend {
    /// Local file-based state storage.
    #[default]
    Local,
    /// AWS S3-based state storage.
    S3,
}

/// A single logical resource declaration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResourceSpec {
    /// Unique logical name, stable across runs.
    pub name: String,
    /// Resource kind.
    pub kind: ResourceKind,
    /// Forbid replace/delete on this resource.
    #[serde(default)]
    pub protect: bool,
    /// Physical identifier of an already-existing resource to adopt
    /// instead of creating.
    #[serde(default)]
    pub import_id: Option<String>,
    /// Desired properties. Values may be literals or references.
    #[serde(default)]
    pub properties: BTreeMap<String, PropertyValue>,
}

/// Kinds of resources the engine knows how to describe.
///
/// The kind determines which property changes can be applied in place and
/// which force a replacement of the physical resource.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceKind {
    /// IAM role.
    Role,
    /// Log group.
    LogGroup,
    /// Compute cluster.
    Cluster,
    /// Task (container) definition.
    TaskDefinition,
    /// Load balancer target group.
    TargetGroup,
    /// Load balancer.
    LoadBalancer,
    /// Load balancer listener.
    Listener,
    /// Long-running service on a cluster.
    Service,
    /// Private DNS namespace for service discovery.
    DnsNamespace,
    /// Service-discovery service entry.
    DiscoveryService,
}

/// A typed reference edge: this value is the `output` of the resource
/// named `resource`, available once that resource is ready.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Reference {
    /// Logical name of the referenced resource.
    pub resource: String,
    /// Output field read from the referenced resource.
    pub output: String,
}

/// A property value: a literal, a collection, or a [`Reference`].
///
/// References are written `${resource.output}` in the descriptor and are
/// substituted with the referenced resource's recorded output during
/// planning and execution.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    /// Boolean literal.
    Bool(bool),
    /// Integer literal.
    Integer(i64),
    /// Floating point literal.
    Float(f64),
    /// String literal.
    String(String),
    /// Ordered list of values.
    List(Vec<PropertyValue>),
    /// Nested property map.
    Map(BTreeMap<String, PropertyValue>),
    /// Reference to another resource's output.
    Reference(Reference),
}

// Default value functions

fn default_environment() -> String {
    String::from("dev")
}

impl Reference {
    /// Parses the inside of a reference expression, e.g. `cluster.arn`.
    ///
    /// # Errors
    ///
    /// Returns an error message if the expression is not `resource.output`.
    pub fn parse(expr: &str) -> Result<Self, String> {
        let Some((resource, output)) = expr.split_once('.') else {
            return Err(format!(
                "expected '<resource>.<output>', got '{expr}'"
            ));
        };

        if resource.is_empty()
            || !resource
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
        {
            return Err(format!("invalid resource name '{resource}'"));
        }

        if output.is_empty()
            || !output
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(format!("invalid output field '{output}'"));
        }

        Ok(Self {
            resource: resource.to_string(),
            output: output.to_string(),
        })
    }

    /// Parses a full `${resource.output}` expression if the string is one.
    ///
    /// Returns `None` for ordinary strings.
    #[must_use]
    pub fn parse_expression(s: &str) -> Option<Result<Self, String>> {
        let inner = s.strip_prefix("${")?.strip_suffix('}')?;
        Some(Self::parse(inner))
    }

    /// Returns the `${resource.output}` expression form.
    #[must_use]
    pub fn expression(&self) -> String {
        format!("${{{}.{}}}", self.resource, self.output)
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.expression())
    }
}

impl PropertyValue {
    /// Returns the string content if this is a string literal.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns true if this value or any nested value is a reference.
    #[must_use]
    pub fn contains_reference(&self) -> bool {
        match self {
            Self::Reference(_) => true,
            Self::List(items) => items.iter().any(Self::contains_reference),
            Self::Map(map) => map.values().any(Self::contains_reference),
            _ => false,
        }
    }

    /// Collects every reference in this value, depth-first, together with
    /// the dotted field path it was found at.
    pub fn collect_references<'a>(
        &'a self,
        path: &str,
        out: &mut Vec<(String, &'a Reference)>,
    ) {
        match self {
            Self::Reference(reference) => out.push((path.to_string(), reference)),
            Self::List(items) => {
                for (i, item) in items.iter().enumerate() {
                    item.collect_references(&format!("{path}[{i}]"), out);
                }
            }
            Self::Map(map) => {
                for (key, value) in map {
                    value.collect_references(&format!("{path}.{key}"), out);
                }
            }
            _ => {}
        }
    }

    /// Renders a short scalar form for diff details and tables.
    ///
    /// Collections render as compact JSON-ish summaries.
    #[must_use]
    pub fn render(&self) -> String {
        match self {
            Self::Bool(b) => b.to_string(),
            Self::Integer(i) => i.to_string(),
            Self::Float(v) => v.to_string(),
            Self::String(s) => s.clone(),
            Self::Reference(r) => r.expression(),
            Self::List(items) => {
                let inner: Vec<String> = items.iter().map(Self::render).collect();
                format!("[{}]", inner.join(", "))
            }
            Self::Map(map) => {
                let inner: Vec<String> = map
                    .iter()
                    .map(|(k, v)| format!("{k}: {}", v.render()))
                    .collect();
                format!("{{{}}}", inner.join(", "))
            }
        }
    }
}

impl Serialize for PropertyValue {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Integer(i) => serializer.serialize_i64(*i),
            Self::Float(v) => serializer.serialize_f64(*v),
            Self::String(s) => serializer.serialize_str(s),
            Self::Reference(r) => serializer.serialize_str(&r.expression()),
            Self::List(items) => items.serialize(serializer),
            Self::Map(map) => map.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for PropertyValue {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(PropertyValueVisitor)
    }
}

struct PropertyValueVisitor;

impl<'de> Visitor<'de> for PropertyValueVisitor {
    type Value = PropertyValue;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a scalar, list, map, or ${resource.output} reference")
    }

    fn visit_bool<E: serde::de::Error>(self, v: bool) -> Result<Self::Value, E> {
        Ok(PropertyValue::Bool(v))
    }

    fn visit_i64<E: serde::de::Error>(self, v: i64) -> Result<Self::Value, E> {
        Ok(PropertyValue::Integer(v))
    }

    fn visit_u64<E: serde::de::Error>(self, v: u64) -> Result<Self::Value, E> {
        i64::try_from(v)
            .map(PropertyValue::Integer)
            .map_err(|_| E::custom(format!("integer {v} out of range")))
    }

    fn visit_f64<E: serde::de::Error>(self, v: f64) -> Result<Self::Value, E> {
        Ok(PropertyValue::Float(v))
    }

    fn visit_str<E: serde::de::Error>(self, v: &str) -> Result<Self::Value, E> {
        match Reference::parse_expression(v) {
            Some(Ok(reference)) => Ok(PropertyValue::Reference(reference)),
            Some(Err(reason)) => Err(E::custom(format!(
                "invalid reference '{v}': {reason}"
            ))),
            None => Ok(PropertyValue::String(v.to_string())),
        }
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Self::Value, A::Error> {
        let mut items = Vec::new();
        while let Some(item) = seq.next_element()? {
            items.push(item);
        }
        Ok(PropertyValue::List(items))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> Result<Self::Value, A::Error> {
        let mut map = BTreeMap::new();
        while let Some((key, value)) = access.next_entry::<String, PropertyValue>()? {
            map.insert(key, value);
        }
        Ok(PropertyValue::Map(map))
    }
}

impl ResourceKind {
    /// Property fields whose change cannot be applied in place and instead
    /// forces a replacement of the physical resource.
    #[must_use]
    pub const fn replacement_fields(self) -> &'static [&'static str] {
        match self {
            Self::Role | Self::LogGroup | Self::Cluster => &["name"],
            Self::TaskDefinition => &["family", "network_mode", "requires_compatibilities"],
            Self::TargetGroup => &["name", "port", "protocol", "vpc_id", "target_type"],
            Self::LoadBalancer => &["name", "load_balancer_type"],
            Self::Listener => &["load_balancer_arn"],
            Self::Service => &["name", "cluster_arn", "launch_type"],
            Self::DnsNamespace => &["name", "vpc"],
            Self::DiscoveryService => &["name", "namespace_id"],
        }
    }

    /// Properties that must be present for a declaration of this kind.
    #[must_use]
    pub const fn required_properties(self) -> &'static [&'static str] {
        match self {
            Self::Role => &["name", "assume_role_policy"],
            Self::LogGroup | Self::Cluster | Self::LoadBalancer | Self::DnsNamespace => {
                &["name"]
            }
            Self::TaskDefinition => &["family", "container_definitions"],
            Self::TargetGroup => &["name", "port", "protocol"],
            Self::Listener => &["load_balancer_arn", "port"],
            Self::Service => &["name", "cluster_arn"],
            Self::DiscoveryService => &["name", "namespace_id"],
        }
    }

    /// Returns true if a change to `field` forces replacement.
    #[must_use]
    pub fn field_requires_replacement(self, field: &str) -> bool {
        // Nested paths like "subnets[0]" classify by their root field.
        let root = field
            .split(['.', '['])
            .next()
            .unwrap_or(field);
        self.replacement_fields().contains(&root)
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Role => "role",
            Self::LogGroup => "log-group",
            Self::Cluster => "cluster",
            Self::TaskDefinition => "task-definition",
            Self::TargetGroup => "target-group",
            Self::LoadBalancer => "load-balancer",
            Self::Listener => "listener",
            Self::Service => "service",
            Self::DnsNamespace => "dns-namespace",
            Self::DiscoveryService => "discovery-service",
        };
        write!(f, "{s}")
    }
}

impl Descriptor {
    /// Returns the fully qualified project name including environment.
    #[must_use]
    pub fn qualified_name(&self) -> String {
        format!("{}-{}", self.project.name, self.project.environment)
    }

    /// Returns all logical resource names, in author order.
    #[must_use]
    pub fn resource_names(&self) -> Vec<&str> {
        self.resources.iter().map(|r| r.name.as_str()).collect()
    }

    /// Looks up a resource by logical name.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ResourceSpec> {
        self.resources.iter().find(|r| r.name == name)
    }

    /// Returns the names of all protected resources.
    #[must_use]
    pub fn protected_names(&self) -> Vec<&str> {
        self.resources
            .iter()
            .filter(|r| r.protect)
            .map(|r| r.name.as_str())
            .collect()
    }

    /// Returns the number of resources carrying an adopt hint.
    #[must_use]
    pub fn adopted_count(&self) -> usize {
        self.resources.iter().filter(|r| r.import_id.is_some()).count()
    }
}

impl ResourceSpec {
    /// Collects every reference in this resource's property bag together
    /// with the field path it occurs at.
    #[must_use]
    pub fn references(&self) -> Vec<(String, &Reference)> {
        let mut out = Vec::new();
        for (field, value) in &self.properties {
            value.collect_references(field, &mut out);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reference_parse() {
        let r = Reference::parse("cluster.arn").unwrap();
        assert_eq!(r.resource, "cluster");
        assert_eq!(r.output, "arn");
        assert_eq!(r.expression(), "${cluster.arn}");
    }

    #[test]
    fn test_reference_parse_invalid() {
        assert!(Reference::parse("noseparator").is_err());
        assert!(Reference::parse(".arn").is_err());
        assert!(Reference::parse("cluster.").is_err());
        assert!(Reference::parse("clu ster.arn").is_err());
    }

    #[test]
    fn test_property_value_reference_roundtrip() {
        let yaml = "cluster_arn: ${cluster.arn}\ncount: 2\n";
        let parsed: BTreeMap<String, PropertyValue> = serde_yaml::from_str(yaml).unwrap();

        assert_eq!(
            parsed["cluster_arn"],
            PropertyValue::Reference(Reference {
                resource: String::from("cluster"),
                output: String::from("arn"),
            })
        );
        assert_eq!(parsed["count"], PropertyValue::Integer(2));

        let back = serde_yaml::to_string(&parsed).unwrap();
        assert!(back.contains("${cluster.arn}"));
    }

    #[test]
    fn test_property_value_plain_string() {
        let parsed: PropertyValue = serde_yaml::from_str("\"redis:alpine\"").unwrap();
        assert_eq!(parsed, PropertyValue::String(String::from("redis:alpine")));
    }

    #[test]
    fn test_nested_reference_collection() {
        let yaml = r"
subnets:
  - ${subnet-a.id}
  - ${subnet-b.id}
health_check:
  target: ${target-group.arn}
port: 80
";
        let spec = ResourceSpec {
            name: String::from("lb"),
            kind: ResourceKind::LoadBalancer,
            protect: false,
            import_id: None,
            properties: serde_yaml::from_str(yaml).unwrap(),
        };

        let refs = spec.references();
        assert_eq!(refs.len(), 3);
        let paths: Vec<&str> = refs.iter().map(|(p, _)| p.as_str()).collect();
        assert!(paths.contains(&"subnets[0]"));
        assert!(paths.contains(&"subnets[1]"));
        assert!(paths.contains(&"health_check.target"));
    }

    #[test]
    fn test_field_requires_replacement_root_path() {
        assert!(ResourceKind::TargetGroup.field_requires_replacement("vpc_id"));
        assert!(ResourceKind::Cluster.field_requires_replacement("name"));
        assert!(!ResourceKind::Cluster.field_requires_replacement("settings"));
        assert!(ResourceKind::TaskDefinition
            .field_requires_replacement("requires_compatibilities[0]"));
    }

    #[test]
    fn test_kind_kebab_case_serde() {
        let kind: ResourceKind = serde_yaml::from_str("task-definition").unwrap();
        assert_eq!(kind, ResourceKind::TaskDefinition);
        assert_eq!(kind.to_string(), "task-definition");
    }
}
