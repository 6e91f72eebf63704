//! Validated primitives shared by every XDW crate.
//!
//! A workflow instance is keyed by `(pathway, patient)`. Both halves of that key arrive as free
//! text from registration payloads, events and the command line, so they are validated once at the
//! boundary and carried as newtypes afterwards.

/// Errors that can occur when creating validated text types.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum TextError {
    /// The input text was empty or contained only whitespace
    #[error("text cannot be empty")]
    Empty,

    /// The input contained whitespace where none is allowed
    #[error("text cannot contain whitespace: {0:?}")]
    Whitespace(String),
}

/// Name of a clinical pathway, for example `toc` or `ctr`.
///
/// Pathway names are case-insensitive throughout the system. The stored form is trimmed and
/// lower-cased; [`Pathway::reference`] produces the upper-case form written into documents as the
/// workflow definition reference.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Pathway(String);

impl Pathway {
    /// Creates a new `Pathway` from the given input.
    ///
    /// # Arguments
    ///
    /// * `input` - Pathway name; surrounding whitespace is ignored.
    ///
    /// # Errors
    ///
    /// Returns [`TextError::Empty`] for blank input and [`TextError::Whitespace`] when the name
    /// contains interior whitespace.
    pub fn new(input: impl AsRef<str>) -> Result<Self, TextError> {
        let trimmed = input.as_ref().trim();
        if trimmed.is_empty() {
            return Err(TextError::Empty);
        }
        if trimmed.chars().any(char::is_whitespace) {
            return Err(TextError::Whitespace(trimmed.to_owned()));
        }
        Ok(Self(trimmed.to_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Upper-case definition reference, e.g. `TOC`.
    pub fn reference(&self) -> String {
        self.0.to_uppercase()
    }

    /// Name under which the XDS metadata companion of this pathway is registered.
    pub fn meta_name(&self) -> String {
        format!("{}_meta", self.0)
    }
}

/// Patient identifier (NHS number or equivalent).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PatientId(String);

impl PatientId {
    /// Creates a new `PatientId`, trimming surrounding whitespace.
    ///
    /// # Errors
    ///
    /// Returns [`TextError::Empty`] for blank input and [`TextError::Whitespace`] when the
    /// identifier contains interior whitespace.
    pub fn new(input: impl AsRef<str>) -> Result<Self, TextError> {
        let trimmed = input.as_ref().trim();
        if trimmed.is_empty() {
            return Err(TextError::Empty);
        }
        if trimmed.chars().any(char::is_whitespace) {
            return Err(TextError::Whitespace(trimmed.to_owned()));
        }
        Ok(Self(trimmed.to_owned()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

macro_rules! text_newtype_impls {
    ($ty:ident) => {
        impl std::fmt::Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl AsRef<str> for $ty {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl std::str::FromStr for $ty {
            type Err = TextError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }

        impl serde::Serialize for $ty {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                serializer.serialize_str(&self.0)
            }
        }

        impl<'de> serde::Deserialize<'de> for $ty {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                let s = String::deserialize(deserializer)?;
                Self::new(&s).map_err(serde::de::Error::custom)
            }
        }
    };
}

text_newtype_impls!(Pathway);
text_newtype_impls!(PatientId);
