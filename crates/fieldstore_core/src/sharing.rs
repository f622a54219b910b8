//! Field sharing classification.
//!
//! # Responsibility
//! - Map a field definition, or a bare field id, to its `SharingType`.
//!
//! # Invariants
//! - A definition always wins over the default registry.
//! - Fields unknown to both resolve to `SharingType::Unknown`, never an error.

use crate::model::field::{FieldId, SharingType};
use crate::model::item::{FieldChange, FieldDefinition};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Default sharing of well-known fields, used when a change carries no
/// resolvable definition.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DefaultSharingRegistry {
    entries: HashMap<FieldId, SharingType>,
}

impl DefaultSharingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, field_id: FieldId, sharing: SharingType) -> Self {
        self.insert(field_id, sharing);
        self
    }

    pub fn insert(&mut self, field_id: FieldId, sharing: SharingType) -> Option<SharingType> {
        self.entries.insert(field_id, sharing)
    }

    pub fn get(&self, field_id: FieldId) -> Option<SharingType> {
        self.entries.get(&field_id).copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Resolves field sharing from definitions with a registry fallback.
#[derive(Debug, Clone, Default)]
pub struct SharingClassifier {
    registry: DefaultSharingRegistry,
}

impl SharingClassifier {
    pub fn new(registry: DefaultSharingRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &DefaultSharingRegistry {
        &self.registry
    }

    /// Derives sharing from a declared policy. `shared` beats `unversioned`.
    pub fn classify_definition(&self, definition: &FieldDefinition) -> SharingType {
        if definition.shared {
            SharingType::Shared
        } else if definition.unversioned {
            SharingType::Unversioned
        } else {
            SharingType::Versioned
        }
    }

    /// Falls back to the registry for a field without definition.
    pub fn classify_id(&self, field_id: FieldId) -> SharingType {
        self.registry.get(field_id).unwrap_or(SharingType::Unknown)
    }

    pub fn classify(&self, definition: Option<&FieldDefinition>, field_id: FieldId) -> SharingType {
        match definition {
            Some(definition) => self.classify_definition(definition),
            None => self.classify_id(field_id),
        }
    }

    pub fn classify_change(&self, change: &FieldChange) -> SharingType {
        self.classify(change.definition.as_ref(), change.field_id)
    }
}

#[cfg(test)]
mod tests {
    use super::{DefaultSharingRegistry, SharingClassifier};
    use crate::model::field::SharingType;
    use crate::model::item::{FieldChange, FieldDefinition};
    use uuid::Uuid;

    #[test]
    fn definition_policy_is_derived_with_shared_precedence() {
        let classifier = SharingClassifier::default();
        let field_id = Uuid::new_v4();

        let mut both = FieldDefinition::shared(field_id, "title");
        both.unversioned = true;

        assert_eq!(classifier.classify_definition(&both), SharingType::Shared);
        assert_eq!(
            classifier.classify_definition(&FieldDefinition::unversioned(field_id, "t")),
            SharingType::Unversioned
        );
        assert_eq!(
            classifier.classify_definition(&FieldDefinition::versioned(field_id, "t")),
            SharingType::Versioned
        );
    }

    #[test]
    fn bare_id_falls_back_to_registry_then_unknown() {
        let known = Uuid::new_v4();
        let orphan = Uuid::new_v4();
        let classifier =
            SharingClassifier::new(DefaultSharingRegistry::new().with(known, SharingType::Shared));

        assert_eq!(classifier.classify_id(known), SharingType::Shared);
        assert_eq!(classifier.classify_id(orphan), SharingType::Unknown);
        assert_eq!(
            classifier.classify_change(&FieldChange::remove_by_id(orphan)),
            SharingType::Unknown
        );
    }

    #[test]
    fn definition_overrides_registry_entry() {
        let field_id = Uuid::new_v4();
        let classifier = SharingClassifier::new(
            DefaultSharingRegistry::new().with(field_id, SharingType::Shared),
        );
        let change = FieldChange::set(FieldDefinition::versioned(field_id, "body"), "x");

        assert_eq!(classifier.classify_change(&change), SharingType::Versioned);
    }
}
