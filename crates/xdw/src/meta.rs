//! XDS metadata companion of a workflow definition.
//!
//! Each pathway may register a metadata record describing how its workflow documents are
//! published to an XDS registry (class, type and confidentiality codes, repository, mime type).
//! The engine stores it verbatim and reads a handful of fields back; unknown keys are tolerated so
//! registries can carry site-specific extensions.

use crate::{schema_mismatch, XdwError, XdwResult};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct XdsDocumentMeta {
    pub id: String,
    pub repositoryuniqueid: String,
    pub registryoid: String,
    pub languagecode: String,
    pub docname: String,
    pub docdesc: String,
    pub docid: String,
    pub authorinstitution: String,
    pub authorperson: String,
    pub classcode: String,
    pub classcodescheme: String,
    pub classcodevalue: String,
    pub typecode: String,
    pub typecodescheme: String,
    pub typecodevalue: String,
    pub practicesettingcode: String,
    pub practicesettingscheme: String,
    pub practicesettingvalue: String,
    pub confcode: String,
    pub confcodescheme: String,
    pub confcodevalue: String,
    pub facilitycode: String,
    pub facilitycodescheme: String,
    pub facilitycodevalue: String,
    pub formatcode: String,
    pub formatcodescheme: String,
    pub formatcodevalue: String,
    pub mimetype: String,
    pub objecttype: String,
}

/// XDS metadata operations.
pub struct XdsMeta;

impl XdsMeta {
    /// Parse an XDS metadata registration payload.
    ///
    /// # Errors
    ///
    /// Returns [`XdwError`] if the payload is empty or a known field has the wrong type.
    pub fn parse(json_text: &str) -> XdwResult<XdsDocumentMeta> {
        if json_text.trim().is_empty() {
            return Err(XdwError::InvalidInput(
                "XDS metadata payload cannot be empty".into(),
            ));
        }
        let mut deserializer = serde_json::Deserializer::from_str(json_text);
        serde_path_to_error::deserialize(&mut deserializer)
            .map_err(|e| schema_mismatch("XDS metadata", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_fields_and_ignores_extensions() {
        let meta = XdsMeta::parse(
            r#"{"repositoryuniqueid": "1.2.3", "confcode": "N", "mimetype": "text/xml", "site": "x"}"#,
        )
        .unwrap();
        assert_eq!(meta.repositoryuniqueid, "1.2.3");
        assert_eq!(meta.confcode, "N");
        assert_eq!(meta.classcode, "");
    }

    #[test]
    fn rejects_wrong_types() {
        let err = XdsMeta::parse(r#"{"confcode": 5}"#).unwrap_err();
        assert!(err.to_string().contains("confcode"));
    }
}
