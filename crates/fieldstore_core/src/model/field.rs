//! Field value model for the three storage partitions.
//!
//! # Responsibility
//! - Define identifiers, languages and versions used as partition keys.
//! - Define the sharing classification and the partition it maps to.
//!
//! # Invariants
//! - A `FieldValue` carries a language only when its partition keys on one,
//!   and a version only for the versioned partition.
//! - `Version` values are always >= 1.
//! - `Language` names are non-empty culture tags (`en`, `de-DE`, `zh-Hans-CN`).

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use uuid::Uuid;

/// Stable item identifier.
pub type ItemId = Uuid;
/// Stable field (template field) identifier.
pub type FieldId = Uuid;
/// Template identifier of an item.
pub type TemplateId = Uuid;
/// Identifier of a detached blob value.
pub type BlobId = Uuid;

static LANGUAGE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Za-z]{1,8}(-[A-Za-z0-9]{1,8})*$").expect("valid language regex")
});

/// Validation errors for partition key values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldValidationError {
    EmptyLanguage,
    InvalidLanguage(String),
    InvalidVersion(i64),
}

impl Display for FieldValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyLanguage => write!(f, "language name cannot be empty"),
            Self::InvalidLanguage(value) => write!(f, "invalid language name `{value}`"),
            Self::InvalidVersion(value) => {
                write!(f, "invalid version number {value}; versions start at 1")
            }
        }
    }
}

impl Error for FieldValidationError {}

/// Content language of a field value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Language(String);

impl Language {
    pub fn new(name: impl Into<String>) -> Result<Self, FieldValidationError> {
        let name = name.into();
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Err(FieldValidationError::EmptyLanguage);
        }
        if !LANGUAGE_RE.is_match(trimmed) {
            return Err(FieldValidationError::InvalidLanguage(trimmed.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl Display for Language {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<String> for Language {
    type Error = FieldValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Language> for String {
    fn from(value: Language) -> Self {
        value.0
    }
}

/// Item version number within one language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct Version(i64);

impl Version {
    pub const FIRST: Version = Version(1);

    pub fn new(number: i64) -> Result<Self, FieldValidationError> {
        if number < 1 {
            return Err(FieldValidationError::InvalidVersion(number));
        }
        Ok(Self(number))
    }

    pub fn number(self) -> i64 {
        self.0
    }
}

impl Display for Version {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<i64> for Version {
    type Error = FieldValidationError;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Version> for i64 {
    fn from(value: Version) -> Self {
        value.0
    }
}

/// Sharing classification of a field.
///
/// `Unknown` is a valid terminal classification for fields whose definition
/// cannot be resolved; it addresses all three partitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SharingType {
    Shared,
    Unversioned,
    Versioned,
    Unknown,
}

impl SharingType {
    /// Order in which a change set is applied to the partitions.
    pub const WRITE_ORDER: [SharingType; 3] = [
        SharingType::Shared,
        SharingType::Unversioned,
        SharingType::Versioned,
    ];

    /// Partitions addressed by this classification.
    pub fn partitions(self) -> &'static [Partition] {
        match self {
            Self::Shared => &[Partition::SharedFields],
            Self::Unversioned => &[Partition::UnversionedFields],
            Self::Versioned => &[Partition::VersionedFields],
            Self::Unknown => &Partition::ALL,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Shared => "shared",
            Self::Unversioned => "unversioned",
            Self::Versioned => "versioned",
            Self::Unknown => "unknown",
        }
    }
}

impl Display for SharingType {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Physical field table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Partition {
    SharedFields,
    UnversionedFields,
    VersionedFields,
}

impl Partition {
    pub const ALL: [Partition; 3] = [
        Partition::SharedFields,
        Partition::UnversionedFields,
        Partition::VersionedFields,
    ];

    pub fn table_name(self) -> &'static str {
        match self {
            Self::SharedFields => "shared_fields",
            Self::UnversionedFields => "unversioned_fields",
            Self::VersionedFields => "versioned_fields",
        }
    }

    pub fn sharing_type(self) -> SharingType {
        match self {
            Self::SharedFields => SharingType::Shared,
            Self::UnversionedFields => SharingType::Unversioned,
            Self::VersionedFields => SharingType::Versioned,
        }
    }
}

impl Display for Partition {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.table_name())
    }
}

/// Key columns beyond `(item_id, field_id)` for one partition.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum FieldScope {
    Shared,
    Unversioned { language: Language },
    Versioned { language: Language, version: Version },
}

impl FieldScope {
    /// Builds the scope of `partition` for a save in `(language, version)`.
    pub fn for_partition(partition: Partition, language: &Language, version: Version) -> Self {
        match partition {
            Partition::SharedFields => Self::Shared,
            Partition::UnversionedFields => Self::Unversioned {
                language: language.clone(),
            },
            Partition::VersionedFields => Self::Versioned {
                language: language.clone(),
                version,
            },
        }
    }

    /// Builds the write scope for a classified field.
    ///
    /// Returns `None` for `SharingType::Unknown`, which has no single target.
    pub fn for_sharing(sharing: SharingType, language: &Language, version: Version) -> Option<Self> {
        match sharing.partitions() {
            [partition] => Some(Self::for_partition(*partition, language, version)),
            _ => None,
        }
    }

    pub fn partition(&self) -> Partition {
        match self {
            Self::Shared => Partition::SharedFields,
            Self::Unversioned { .. } => Partition::UnversionedFields,
            Self::Versioned { .. } => Partition::VersionedFields,
        }
    }

    pub fn language(&self) -> Option<&Language> {
        match self {
            Self::Shared => None,
            Self::Unversioned { language } | Self::Versioned { language, .. } => Some(language),
        }
    }

    pub fn version(&self) -> Option<Version> {
        match self {
            Self::Versioned { version, .. } => Some(*version),
            _ => None,
        }
    }
}

/// One persisted field row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldValue {
    pub item_id: ItemId,
    pub field_id: FieldId,
    pub scope: FieldScope,
    /// Raw field text. Blob fields hold the blob id.
    pub value: String,
    /// Unix epoch milliseconds of the first write.
    pub created: i64,
    /// Unix epoch milliseconds of the latest write.
    pub updated: i64,
}

impl FieldValue {
    /// Creates a fresh row whose `created` and `updated` are both `now`.
    pub fn new(
        item_id: ItemId,
        field_id: FieldId,
        scope: FieldScope,
        value: impl Into<String>,
        now: i64,
    ) -> Self {
        Self {
            item_id,
            field_id,
            scope,
            value: value.into(),
            created: now,
            updated: now,
        }
    }

    pub fn partition(&self) -> Partition {
        self.scope.partition()
    }
}
