//! Item, field definition and change-set model.
//!
//! These types mirror the read-only metadata handed in by the surrounding
//! item repository layer. Core never resolves templates itself.

use crate::model::field::{BlobId, FieldId, ItemId, Language, TemplateId, Version};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Template id of language definition items.
///
/// Saving an item based on this template invalidates the language list cache.
pub const LANGUAGE_TEMPLATE_ID: TemplateId =
    Uuid::from_u128(0xf68f_13a6_3395_426a_b9a1_fa2d_c60d_94eb);

/// Identity and placement of one item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemDefinition {
    pub id: ItemId,
    pub name: String,
    pub template_id: TemplateId,
    pub branch_id: Option<Uuid>,
    /// `None` for root items.
    pub parent_id: Option<ItemId>,
}

impl ItemDefinition {
    pub fn new(id: ItemId, name: impl Into<String>, template_id: TemplateId) -> Self {
        Self {
            id,
            name: name.into(),
            template_id,
            branch_id: None,
            parent_id: None,
        }
    }

    pub fn with_parent(mut self, parent_id: ItemId) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    pub fn is_language_definition(&self, language_template_id: TemplateId) -> bool {
        self.template_id == language_template_id
    }
}

/// Declared sharing policy of a template field.
///
/// `shared` takes precedence over `unversioned`; a field with neither flag is
/// versioned.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDefinition {
    pub field_id: FieldId,
    pub name: String,
    pub shared: bool,
    pub unversioned: bool,
}

impl FieldDefinition {
    pub fn shared(field_id: FieldId, name: impl Into<String>) -> Self {
        Self {
            field_id,
            name: name.into(),
            shared: true,
            unversioned: false,
        }
    }

    pub fn unversioned(field_id: FieldId, name: impl Into<String>) -> Self {
        Self {
            field_id,
            name: name.into(),
            shared: false,
            unversioned: true,
        }
    }

    pub fn versioned(field_id: FieldId, name: impl Into<String>) -> Self {
        Self {
            field_id,
            name: name.into(),
            shared: false,
            unversioned: false,
        }
    }
}

/// One requested field mutation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldChange {
    pub field_id: FieldId,
    /// `None` when the field definition could not be resolved (orphaned field).
    pub definition: Option<FieldDefinition>,
    pub value: String,
    /// Value before this change; used to detect orphaned blobs.
    pub original_value: String,
    pub remove_field: bool,
    pub is_blob: bool,
}

impl FieldChange {
    /// Sets a field whose definition is known.
    pub fn set(definition: FieldDefinition, value: impl Into<String>) -> Self {
        Self {
            field_id: definition.field_id,
            definition: Some(definition),
            value: value.into(),
            original_value: String::new(),
            remove_field: false,
            is_blob: false,
        }
    }

    /// Sets a field known only by id.
    pub fn set_by_id(field_id: FieldId, value: impl Into<String>) -> Self {
        Self {
            field_id,
            definition: None,
            value: value.into(),
            original_value: String::new(),
            remove_field: false,
            is_blob: false,
        }
    }

    /// Removes a field whose definition is known.
    pub fn remove(definition: FieldDefinition) -> Self {
        let mut change = Self::set(definition, "");
        change.remove_field = true;
        change
    }

    /// Removes a field known only by id.
    pub fn remove_by_id(field_id: FieldId) -> Self {
        let mut change = Self::set_by_id(field_id, "");
        change.remove_field = true;
        change
    }

    pub fn with_original_value(mut self, original_value: impl Into<String>) -> Self {
        self.original_value = original_value.into();
        self
    }

    pub fn as_blob(mut self) -> Self {
        self.is_blob = true;
        self
    }

    /// Returns the blob id this change detaches, if any.
    ///
    /// A blob is detached when a blob field changes value and its previous
    /// value parses as an id. Whether the blob may be deleted still depends on
    /// other rows referencing it.
    pub fn detached_blob_id(&self) -> Option<BlobId> {
        if !self.is_blob || self.value == self.original_value {
            return None;
        }
        Uuid::parse_str(self.original_value.trim()).ok()
    }
}

/// Item property changes applied together with field changes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ItemPropertyChanges {
    pub name: Option<String>,
    pub template_id: Option<TemplateId>,
    pub branch_id: Option<Uuid>,
}

impl ItemPropertyChanges {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.template_id.is_none() && self.branch_id.is_none()
    }
}

/// Complete save request for one item in one `(language, version)`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemChanges {
    pub item: ItemDefinition,
    pub language: Language,
    pub version: Version,
    /// Clears all rows of `(item, language, version)` before reapplying.
    pub full_update: bool,
    pub properties: ItemPropertyChanges,
    pub field_changes: Vec<FieldChange>,
}

impl ItemChanges {
    pub fn new(item: ItemDefinition, language: Language, version: Version) -> Self {
        Self {
            item,
            language,
            version,
            full_update: false,
            properties: ItemPropertyChanges::default(),
            field_changes: Vec::new(),
        }
    }

    pub fn with_field(mut self, change: FieldChange) -> Self {
        self.field_changes.push(change);
        self
    }

    pub fn has_properties_changed(&self) -> bool {
        !self.properties.is_empty()
    }

    pub fn has_fields_changed(&self) -> bool {
        !self.field_changes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::{FieldChange, FieldDefinition};
    use uuid::Uuid;

    #[test]
    fn detached_blob_requires_blob_flag_changed_value_and_id_shaped_original() {
        let field_id = Uuid::new_v4();
        let blob_id = Uuid::new_v4();
        let braced = format!("{{{blob_id}}}");

        let detached = FieldChange::set(FieldDefinition::shared(field_id, "image"), "")
            .with_original_value(braced.as_str())
            .as_blob();
        assert_eq!(detached.detached_blob_id(), Some(blob_id));

        let not_blob = FieldChange::set_by_id(field_id, "").with_original_value(braced.as_str());
        assert_eq!(not_blob.detached_blob_id(), None);

        let unchanged = FieldChange::set_by_id(field_id, braced.as_str())
            .with_original_value(braced.as_str())
            .as_blob();
        assert_eq!(unchanged.detached_blob_id(), None);

        let not_an_id = FieldChange::set_by_id(field_id, "")
            .with_original_value("plain text")
            .as_blob();
        assert_eq!(not_an_id.detached_blob_id(), None);
    }
}
