//! Descriptor validation.
//!
//! This module provides structural validation of descriptors, ensuring the
//! declared resources are internally consistent before any graph or plan is
//! built. Reference cycles are not checked here; that is the graph
//! builder's job.

use crate::error::{DescriptorError, GroundworkError, Result};
use std::collections::HashSet;
use tracing::debug;

use super::spec::{Descriptor, PropertyValue, ResourceSpec, StateBackend};

/// Validator for descriptors.
#[derive(Debug, Default)]
pub struct DescriptorValidator;

/// Validation result containing all errors found.
#[derive(Debug, Default)]
pub struct ValidationResult {
    /// List of validation errors.
    pub errors: Vec<ValidationError>,
    /// List of warnings (non-fatal issues).
    pub warnings: Vec<String>,
}

/// A single validation error.
#[derive(Debug)]
pub struct ValidationError {
    /// The field path that failed validation.
    pub field: String,
    /// The error message.
    pub message: String,
}

impl DescriptorValidator {
    /// Creates a new validator.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Validates a descriptor.
    ///
    /// # Errors
    ///
    /// Returns the first error found if validation fails.
    pub fn validate(&self, descriptor: &Descriptor) -> Result<ValidationResult> {
        let mut result = ValidationResult::default();

        Self::validate_project(&descriptor.project, &mut result);
        Self::validate_state(&descriptor.state, &mut result);
        Self::validate_resources(&descriptor.resources, &mut result);
        Self::validate_exports(descriptor, &mut result);

        if result.errors.is_empty() {
            debug!("Descriptor validation passed");
            Ok(result)
        } else {
            let first_error = &result.errors[0];
            Err(GroundworkError::Descriptor(DescriptorError::ValidationError {
                message: first_error.message.clone(),
                field: Some(first_error.field.clone()),
            }))
        }
    }

    /// Validates project configuration.
    fn validate_project(
        project: &super::spec::ProjectConfig,
        result: &mut ValidationResult,
    ) {
        if project.name.is_empty() {
            result.errors.push(ValidationError {
                field: String::from("project.name"),
                message: String::from("Project name cannot be empty"),
            });
        } else if !is_valid_name(&project.name) {
            result.errors.push(ValidationError {
                field: String::from("project.name"),
                message: format!(
                    "Project name '{}' is invalid. Must be lowercase alphanumeric with hyphens.",
                    project.name
                ),
            });
        }

        if project.environment.is_empty() {
            result.errors.push(ValidationError {
                field: String::from("project.environment"),
                message: String::from("Environment cannot be empty"),
            });
        }
    }

    /// Validates state configuration.
    fn validate_state(state: &super::spec::StateConfig, result: &mut ValidationResult) {
        match state.backend {
            StateBackend::S3 => {
                if state.bucket.is_none() || state.bucket.as_ref().is_some_and(String::is_empty) {
                    result.errors.push(ValidationError {
                        field: String::from("state.bucket"),
                        message: String::from("S3 bucket name is required when using S3 backend"),
                    });
                }
            }
            StateBackend::Local => {
                // Local backend is always valid
            }
        }
    }

    /// Validates all resource declarations.
    fn validate_resources(resources: &[ResourceSpec], result: &mut ValidationResult) {
        if resources.is_empty() {
            result
                .warnings
                .push(String::from("No resources defined in descriptor"));
            return;
        }

        let declared: HashSet<&str> = resources.iter().map(|r| r.name.as_str()).collect();
        let mut seen_names = HashSet::new();

        for (i, resource) in resources.iter().enumerate() {
            let prefix = format!("resources[{i}]");

            // Unique name
            if !seen_names.insert(resource.name.as_str()) {
                result.errors.push(ValidationError {
                    field: format!("{prefix}.name"),
                    message: format!("Duplicate resource name: {}", resource.name),
                });
            }

            // Name format
            if !is_valid_name(&resource.name) {
                result.errors.push(ValidationError {
                    field: format!("{prefix}.name"),
                    message: format!(
                        "Resource name '{}' is invalid. Must be lowercase alphanumeric with hyphens.",
                        resource.name
                    ),
                });
            }

            Self::validate_import(resource, &prefix, result);
            Self::validate_required_properties(resource, &prefix, result);
            Self::validate_references(resource, &declared, &prefix, result);
        }
    }

    /// Validates the adopt hint on a resource.
    fn validate_import(resource: &ResourceSpec, prefix: &str, result: &mut ValidationResult) {
        let Some(import_id) = &resource.import_id else {
            return;
        };

        if import_id.is_empty() {
            result.errors.push(ValidationError {
                field: format!("{prefix}.import_id"),
                message: format!(
                    "Resource '{}' has an empty import_id; omit it to create the resource",
                    resource.name
                ),
            });
        }

        if !resource.protect {
            result.warnings.push(format!(
                "Resource '{}' is adopted via import_id but not protected; \
                 a descriptor change could replace the pre-existing resource",
                resource.name
            ));
        }
    }

    /// Validates kind-specific required properties.
    fn validate_required_properties(
        resource: &ResourceSpec,
        prefix: &str,
        result: &mut ValidationResult,
    ) {
        for required in resource.kind.required_properties() {
            if !resource.properties.contains_key(*required) {
                result.errors.push(ValidationError {
                    field: format!("{prefix}.properties.{required}"),
                    message: format!(
                        "Resource '{}' of kind '{}' requires property '{required}'",
                        resource.name, resource.kind
                    ),
                });
            }
        }
    }

    /// Validates that every reference targets a declared resource.
    fn validate_references(
        resource: &ResourceSpec,
        declared: &HashSet<&str>,
        prefix: &str,
        result: &mut ValidationResult,
    ) {
        for (field, reference) in resource.references() {
            if reference.resource == resource.name {
                result.errors.push(ValidationError {
                    field: format!("{prefix}.properties.{field}"),
                    message: format!(
                        "Resource '{}' references itself via {}",
                        resource.name,
                        reference.expression()
                    ),
                });
            } else if !declared.contains(reference.resource.as_str()) {
                result.errors.push(ValidationError {
                    field: format!("{prefix}.properties.{field}"),
                    message: format!(
                        "Resource '{}' references undeclared resource '{}'",
                        resource.name, reference.resource
                    ),
                });
            }
        }
    }

    /// Validates that exports reference declared resources.
    fn validate_exports(descriptor: &Descriptor, result: &mut ValidationResult) {
        let declared: HashSet<&str> = descriptor
            .resources
            .iter()
            .map(|r| r.name.as_str())
            .collect();

        for (name, value) in &descriptor.exports {
            let mut refs = Vec::new();
            value.collect_references(name, &mut refs);

            for (field, reference) in refs {
                if !declared.contains(reference.resource.as_str()) {
                    result.errors.push(ValidationError {
                        field: format!("exports.{field}"),
                        message: format!(
                            "Export '{name}' references undeclared resource '{}'",
                            reference.resource
                        ),
                    });
                }
            }

            if matches!(value, PropertyValue::Map(_)) {
                result.warnings.push(format!(
                    "Export '{name}' is a nested map; consider exporting scalar values"
                ));
            }
        }
    }
}

/// Validates that a name follows the naming convention.
/// Names must be lowercase alphanumeric with hyphens, starting with a letter.
fn is_valid_name(name: &str) -> bool {
    if name.is_empty() {
        return false;
    }

    let mut chars = name.chars();

    // First character must be a letter
    if let Some(first) = chars.next()
        && !first.is_ascii_lowercase() {
            return false;
        }

    // Rest must be lowercase alphanumeric or hyphen
    for c in chars {
        if !c.is_ascii_lowercase() && !c.is_ascii_digit() && c != '-' {
            return false;
        }
    }

    // Cannot end with hyphen
    if name.ends_with('-') {
        return false;
    }

    // Cannot have consecutive hyphens
    if name.contains("--") {
        return false;
    }

    true
}

impl ValidationResult {
    /// Returns true if validation passed (no errors).
    #[must_use]
    pub const fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }

    /// Returns the number of errors.
    #[must_use]
    pub const fn error_count(&self) -> usize {
        self.errors.len()
    }

    /// Returns the number of warnings.
    #[must_use]
    pub const fn warning_count(&self) -> usize {
        self.warnings.len()
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::DescriptorParser;

    fn parse(yaml: &str) -> Descriptor {
        DescriptorParser::new()
            .parse_yaml(yaml, None)
            .expect("test descriptor should parse")
    }

    #[test]
    fn test_valid_name() {
        assert!(is_valid_name("cluster"));
        assert!(is_valid_name("frontend-service-123"));
        assert!(is_valid_name("a"));
    }

    #[test]
    fn test_invalid_name() {
        assert!(!is_valid_name(""));
        assert!(!is_valid_name("Cluster")); // uppercase
        assert!(!is_valid_name("123-svc")); // starts with number
        assert!(!is_valid_name("svc_a")); // underscore
        assert!(!is_valid_name("svc-")); // ends with hyphen
        assert!(!is_valid_name("svc--a")); // consecutive hyphens
    }

    #[test]
    fn test_duplicate_names_rejected() {
        let descriptor = parse(
            r"
project:
  name: p
resources:
  - name: cluster
    kind: cluster
    properties:
      name: c
  - name: cluster
    kind: cluster
    properties:
      name: c
",
        );
        assert!(DescriptorValidator::new().validate(&descriptor).is_err());
    }

    #[test]
    fn test_unknown_reference_rejected() {
        let descriptor = parse(
            r"
project:
  name: p
resources:
  - name: svc
    kind: service
    properties:
      name: svc
      cluster_arn: ${missing.arn}
",
        );
        assert!(DescriptorValidator::new().validate(&descriptor).is_err());
    }

    #[test]
    fn test_self_reference_rejected() {
        let descriptor = parse(
            r"
project:
  name: p
resources:
  - name: svc
    kind: service
    properties:
      name: svc
      cluster_arn: ${svc.arn}
",
        );
        assert!(DescriptorValidator::new().validate(&descriptor).is_err());
    }

    #[test]
    fn test_missing_required_property_rejected() {
        let descriptor = parse(
            r"
project:
  name: p
resources:
  - name: svc
    kind: service
    properties:
      name: svc
",
        );
        // Service requires cluster_arn.
        assert!(DescriptorValidator::new().validate(&descriptor).is_err());
    }

    #[test]
    fn test_adopted_without_protect_warns() {
        let descriptor = parse(
            r"
project:
  name: p
resources:
  - name: cluster
    kind: cluster
    import_id: cluster-b3a046f
    properties:
      name: c
",
        );
        let result = DescriptorValidator::new().validate(&descriptor).unwrap();
        assert!(result.is_valid());
        assert_eq!(result.warning_count(), 1);
    }

    #[test]
    fn test_valid_descriptor_passes() {
        let descriptor = parse(
            r"
project:
  name: voting-app
  environment: prod
resources:
  - name: cluster
    kind: cluster
    properties:
      name: voting-app-cluster
  - name: frontend-service
    kind: service
    properties:
      name: voting-app-frontend
      cluster_arn: ${cluster.arn}
exports:
  cluster_name: ${cluster.name}
",
        );
        let result = DescriptorValidator::new().validate(&descriptor).unwrap();
        assert!(result.is_valid());
    }
}
