//! Constants shared across the engine.

/// Version tag of the current (non-deprecated) workflow row and its events.
pub const CURRENT_VERSION: u32 = 0;

/// Default base of the back-reference stamped on inline-reference parts.
pub const DEFAULT_EVENT_SERVICE_URL: &str = "/eventservice/event";

/// Default cross-reference key whose local id is the home community id.
pub const DEFAULT_XDS_DOMAIN_KEY: &str = "xdsdomain";

/// NHS number OID, the default patient identifier root.
pub const NHS_OID_DEFAULT: &str = "2.16.840.1.113883.2.1.4.1";

pub const PATIENT_ASSIGNING_AUTHORITY: &str = "NHS";

/// Broker topic for registry notifications filtered on document type code.
pub const DSUB_TOPIC_TYPE_CODE: &str = "$XDSDocumentEntryTypeCode";

pub const CREATED_EVENT_TYPE: &str = "CREATED";
pub const CLOSED_EVENT_TYPE: &str = "CLOSED";

/// Label used wherever a completion target cannot be computed.
pub const NON_SPECIFIED: &str = "Non Specified";
