//! Descriptor handling: parsing, validation, and hashing.
//!
//! The descriptor is the user-authored desired state: a set of logical
//! resources with property bags, protection flags, adopt hints, and named
//! exports.

mod hash;
mod parser;
mod spec;
mod validator;

pub use hash::SpecHasher;
pub use parser::{find_descriptor_file, DescriptorParser};
pub use spec::{
    Descriptor, ProjectConfig, PropertyValue, Reference, ResourceKind, ResourceSpec, StateBackend,
    StateConfig,
};
pub use validator::{DescriptorValidator, ValidationError, ValidationResult};
