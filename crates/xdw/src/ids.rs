//! Workflow instance identifiers.

use crate::{XdwError, XdwResult};
use std::fmt;
use uuid::Uuid;

/// IHE namespace suffix appended to an instance id to form the workflow instance id.
pub const WORKFLOW_INSTANCE_ID_SUFFIX: &str = "^^^^urn:ihe:iti:xdw:2011:workflowInstanceId";

/// Identifier of one workflow instance (the document id extension).
///
/// Instance ids are version 4 UUIDs in their lowercase hyphenated form. Documents created by
/// this engine always carry that form; [`InstanceId::parse`] accepts nothing else so that a
/// looked-up id compares equal to the stored one byte for byte.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct InstanceId(Uuid);

impl Default for InstanceId {
    fn default() -> Self {
        Self::new()
    }
}

impl InstanceId {
    /// Generate a fresh instance id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Validate an externally supplied instance id.
    ///
    /// # Errors
    ///
    /// Returns [`XdwError::InvalidInstanceId`] if `input` is not a lowercase hyphenated UUID.
    pub fn parse(input: &str) -> XdwResult<Self> {
        let uuid = Uuid::parse_str(input)
            .map_err(|_| XdwError::InvalidInstanceId(input.to_string()))?;
        if uuid.hyphenated().to_string() != input {
            return Err(XdwError::InvalidInstanceId(input.to_string()));
        }
        Ok(Self(uuid))
    }

    /// Root of the document identifier (the namespace URN without the `^` separators).
    pub fn root() -> String {
        WORKFLOW_INSTANCE_ID_SUFFIX.replace('^', "")
    }

    /// The full workflow instance id, `<uuid>^^^^urn:ihe:iti:xdw:2011:workflowInstanceId`.
    pub fn workflow_instance_id(&self) -> String {
        format!("{}{WORKFLOW_INSTANCE_ID_SUFFIX}", self.0.hyphenated())
    }
}

impl fmt::Display for InstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.hyphenated())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_ids_parse_back() {
        let id = InstanceId::new();
        let parsed = InstanceId::parse(&id.to_string()).unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn parse_rejects_non_canonical_forms() {
        assert!(InstanceId::parse("not-a-uuid").is_err());
        assert!(InstanceId::parse("550E8400-E29B-41D4-A716-446655440000").is_err());
        assert!(InstanceId::parse("550e8400e29b41d4a716446655440000").is_err());
        assert!(InstanceId::parse("550e8400-e29b-41d4-a716-446655440000").is_ok());
    }

    #[test]
    fn workflow_instance_id_carries_namespace() {
        let id = InstanceId::parse("550e8400-e29b-41d4-a716-446655440000").unwrap();
        assert_eq!(
            id.workflow_instance_id(),
            "550e8400-e29b-41d4-a716-446655440000^^^^urn:ihe:iti:xdw:2011:workflowInstanceId"
        );
        assert_eq!(InstanceId::root(), "urn:ihe:iti:xdw:2011:workflowInstanceId");
    }
}
