//! Partition store contracts and SQLite implementation.
//!
//! # Responsibility
//! - Provide keyed CRUD over `shared_fields`, `unversioned_fields` and
//!   `versioned_fields`.
//! - Provide the enumeration and copy primitives used by field migration.
//! - Answer whether a detached blob id is still referenced.
//!
//! # Invariants
//! - Every statement is rendered through `SqlDialect`; no quoted identifier is
//!   hard-coded here.
//! - Enumeration reads carry the configured read table hint. They are
//!   maintenance reads and tolerate eventual consistency.
//! - Upserts keep `created` of an existing row and advance `updated`.

use crate::db::SqlDialect;
use crate::model::field::{
    FieldId, FieldScope, FieldValue, ItemId, Language, Partition, Version,
};
use crate::repo::error::{StoreError, StoreResult};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, Row};
use std::fmt::{Display, Formatter};
use uuid::Uuid;

const SHARED_COLUMNS: &str = "{item_id}, {field_id}, NULL AS {language}, NULL AS {version}, {value}, {created}, {updated}";
const UNVERSIONED_COLUMNS: &str =
    "{item_id}, {field_id}, {language}, NULL AS {version}, {value}, {created}, {updated}";
const VERSIONED_COLUMNS: &str =
    "{item_id}, {field_id}, {language}, {version}, {value}, {created}, {updated}";

const SHARED_UPSERT_SQL: &str = "INSERT INTO {shared_fields} ({item_id}, {field_id}, {value}, {created}, {updated})
     VALUES (?1, ?2, ?3, ?4, ?5)
     ON CONFLICT ({item_id}, {field_id})
     DO UPDATE SET {value} = excluded.{value}, {updated} = excluded.{updated};";
const UNVERSIONED_UPSERT_SQL: &str = "INSERT INTO {unversioned_fields} ({item_id}, {field_id}, {value}, {created}, {updated}, {language})
     VALUES (?1, ?2, ?3, ?4, ?5, ?6)
     ON CONFLICT ({item_id}, {language}, {field_id})
     DO UPDATE SET {value} = excluded.{value}, {updated} = excluded.{updated};";
const VERSIONED_UPSERT_SQL: &str = "INSERT INTO {versioned_fields} ({item_id}, {field_id}, {value}, {created}, {updated}, {language}, {version})
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
     ON CONFLICT ({item_id}, {language}, {version}, {field_id})
     DO UPDATE SET {value} = excluded.{value}, {updated} = excluded.{updated};";

const COPY_SHARED_TO_VERSIONED_SQL: &str = "INSERT INTO {versioned_fields} ({item_id}, {language}, {version}, {field_id}, {value}, {created}, {updated})
     SELECT {item_id}, ?3, ?4, {field_id}, {value}, {created}, {updated}
     FROM {shared_fields}
     WHERE {item_id} = ?1 AND {field_id} = ?2;";
const COPY_UNVERSIONED_TO_VERSIONED_SQL: &str = "INSERT INTO {versioned_fields} ({item_id}, {language}, {version}, {field_id}, {value}, {created}, {updated})
     SELECT {item_id}, {language}, ?4, {field_id}, {value}, {created}, {updated}
     FROM {unversioned_fields}
     WHERE {item_id} = ?1 AND {field_id} = ?2 AND {language} = ?3;";

/// `?2` is the subtree root; the CTE yields the root plus all descendants.
const SUBTREE_CTE: &str = "WITH RECURSIVE subtree(id) AS (
        SELECT ?2
        UNION
        SELECT child.{id}
        FROM {items} child
        INNER JOIN subtree node ON child.{parent_id} = node.id
     ) ";

const BLOB_REFERENCE_SQL: &str = "SELECT
        EXISTS (SELECT 1 FROM {shared_fields}%HINT% WHERE {value} LIKE ?1)
     OR EXISTS (SELECT 1 FROM {versioned_fields}%HINT% WHERE {value} LIKE ?1)
     OR EXISTS (SELECT 1 FROM {archived_fields}%HINT% WHERE {value} LIKE ?1);";

/// Set of items an operation is restricted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ItemScope {
    /// Every item in the store.
    All,
    /// The root item and all of its descendants.
    Subtree(ItemId),
}

impl ItemScope {
    pub fn from_root(root_item_id: Option<ItemId>) -> Self {
        root_item_id.map_or(Self::All, Self::Subtree)
    }
}

impl Display for ItemScope {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::All => write!(f, "all"),
            Self::Subtree(root) => write!(f, "subtree:{root}"),
        }
    }
}

/// Raw access to the three field partitions.
pub trait PartitionStore {
    /// Point lookup by full partition key.
    fn get_field(
        &self,
        item_id: ItemId,
        field_id: FieldId,
        scope: &FieldScope,
    ) -> StoreResult<Option<FieldValue>>;
    /// Range scan of one item in one partition.
    fn list_item_fields(&self, item_id: ItemId, partition: Partition)
        -> StoreResult<Vec<FieldValue>>;
    /// Range scan of one field in one partition.
    fn list_field_rows(&self, field_id: FieldId, partition: Partition)
        -> StoreResult<Vec<FieldValue>>;
    /// Inserts a row or updates value and `updated` of the existing one.
    fn upsert_field(&self, value: &FieldValue) -> StoreResult<()>;
    /// Deletes one row by full key. Returns the number of deleted rows.
    fn delete_field(&self, item_id: ItemId, field_id: FieldId, scope: &FieldScope)
        -> StoreResult<usize>;
    /// Deletes all rows of `(item, language, version)`: the item's shared
    /// rows, its unversioned rows in `language` and its versioned rows in
    /// `(language, version)`.
    fn clear_item_version(
        &self,
        item_id: ItemId,
        language: &Language,
        version: Version,
    ) -> StoreResult<usize>;
    /// Deletes every row of `field_id` in `partition` within `scope`.
    fn delete_field_in_scope(
        &self,
        partition: Partition,
        field_id: FieldId,
        scope: ItemScope,
    ) -> StoreResult<usize>;
    /// Distinct items holding `field_id` in `partition` within `scope`.
    fn distinct_items_with_field(
        &self,
        partition: Partition,
        field_id: FieldId,
        scope: ItemScope,
    ) -> StoreResult<Vec<ItemId>>;
    /// Distinct languages an item has in `partition`, across all fields.
    fn distinct_languages(&self, partition: Partition, item_id: ItemId)
        -> StoreResult<Vec<Language>>;
    /// Distinct versions an item has in `language`, across all fields.
    fn distinct_versions(&self, item_id: ItemId, language: &Language) -> StoreResult<Vec<Version>>;
    /// Copies the field row(s) of `source` into the versioned partition at
    /// `(language, version)`. Returns the number of inserted rows.
    fn copy_to_versioned(
        &self,
        source: Partition,
        item_id: ItemId,
        field_id: FieldId,
        language: &Language,
        version: Version,
    ) -> StoreResult<usize>;
    /// Whether any shared, versioned or archived value matches `blob_ref`
    /// (SQL `LIKE`).
    fn is_blob_referenced(&self, blob_ref: &str) -> StoreResult<bool>;
}

/// SQLite-backed partition store over a connection or open transaction.
pub struct SqlitePartitionStore<'conn> {
    conn: &'conn Connection,
    dialect: &'conn SqlDialect,
}

impl<'conn> SqlitePartitionStore<'conn> {
    pub fn new(conn: &'conn Connection, dialect: &'conn SqlDialect) -> Self {
        Self { conn, dialect }
    }

    fn query_fields(
        &self,
        sql: &str,
        partition: Partition,
        bind_values: Vec<Value>,
    ) -> StoreResult<Vec<FieldValue>> {
        let mut stmt = self.conn.prepare(sql)?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut values = Vec::new();
        while let Some(row) = rows.next()? {
            values.push(parse_field_row(row, partition)?);
        }
        Ok(values)
    }
}

impl PartitionStore for SqlitePartitionStore<'_> {
    fn get_field(
        &self,
        item_id: ItemId,
        field_id: FieldId,
        scope: &FieldScope,
    ) -> StoreResult<Option<FieldValue>> {
        let partition = scope.partition();
        let sql = self.dialect.render(&format!(
            "SELECT {} FROM {} WHERE {};",
            select_columns(partition),
            table_ref(partition),
            key_predicate(partition)
        ));
        let mut values = self.query_fields(&sql, partition, key_params(item_id, field_id, scope))?;
        Ok(values.pop())
    }

    fn list_item_fields(
        &self,
        item_id: ItemId,
        partition: Partition,
    ) -> StoreResult<Vec<FieldValue>> {
        let sql = self.dialect.render(&format!(
            "SELECT {} FROM {} WHERE {{item_id}} = ?1 ORDER BY 2, 3, 4;",
            select_columns(partition),
            table_ref(partition)
        ));
        self.query_fields(&sql, partition, vec![Value::Text(item_id.to_string())])
    }

    fn list_field_rows(
        &self,
        field_id: FieldId,
        partition: Partition,
    ) -> StoreResult<Vec<FieldValue>> {
        let sql = self.dialect.render(&format!(
            "SELECT {} FROM {} WHERE {{field_id}} = ?1 ORDER BY 1, 3, 4;",
            select_columns(partition),
            table_ref(partition)
        ));
        self.query_fields(&sql, partition, vec![Value::Text(field_id.to_string())])
    }

    fn upsert_field(&self, value: &FieldValue) -> StoreResult<()> {
        let mut bind_values = vec![
            Value::Text(value.item_id.to_string()),
            Value::Text(value.field_id.to_string()),
            Value::Text(value.value.clone()),
            Value::Integer(value.created),
            Value::Integer(value.updated),
        ];
        let template = match &value.scope {
            FieldScope::Shared => SHARED_UPSERT_SQL,
            FieldScope::Unversioned { language } => {
                bind_values.push(Value::Text(language.to_string()));
                UNVERSIONED_UPSERT_SQL
            }
            FieldScope::Versioned { language, version } => {
                bind_values.push(Value::Text(language.to_string()));
                bind_values.push(Value::Integer(version.number()));
                VERSIONED_UPSERT_SQL
            }
        };

        self.conn
            .execute(&self.dialect.render(template), params_from_iter(bind_values))?;
        Ok(())
    }

    fn delete_field(
        &self,
        item_id: ItemId,
        field_id: FieldId,
        scope: &FieldScope,
    ) -> StoreResult<usize> {
        let partition = scope.partition();
        let sql = self.dialect.render(&format!(
            "DELETE FROM {} WHERE {};",
            table_ref(partition),
            key_predicate(partition)
        ));
        let deleted = self
            .conn
            .execute(&sql, params_from_iter(key_params(item_id, field_id, scope)))?;
        Ok(deleted)
    }

    fn clear_item_version(
        &self,
        item_id: ItemId,
        language: &Language,
        version: Version,
    ) -> StoreResult<usize> {
        let item = item_id.to_string();
        let mut deleted = self.conn.execute(
            &self
                .dialect
                .render("DELETE FROM {shared_fields} WHERE {item_id} = ?1;"),
            params![item],
        )?;
        deleted += self.conn.execute(
            &self.dialect.render(
                "DELETE FROM {unversioned_fields} WHERE {item_id} = ?1 AND {language} = ?2;",
            ),
            params![item, language.as_str()],
        )?;
        deleted += self.conn.execute(
            &self.dialect.render(
                "DELETE FROM {versioned_fields}
                 WHERE {item_id} = ?1 AND {language} = ?2 AND {version} = ?3;",
            ),
            params![item, language.as_str(), version.number()],
        )?;
        Ok(deleted)
    }

    fn delete_field_in_scope(
        &self,
        partition: Partition,
        field_id: FieldId,
        scope: ItemScope,
    ) -> StoreResult<usize> {
        let deleted = match scope {
            ItemScope::All => self.conn.execute(
                &self.dialect.render(&format!(
                    "DELETE FROM {} WHERE {{field_id}} = ?1;",
                    table_ref(partition)
                )),
                params![field_id.to_string()],
            )?,
            ItemScope::Subtree(root) => self.conn.execute(
                &self.dialect.render(&format!(
                    "{SUBTREE_CTE}
                     DELETE FROM {}
                     WHERE {{field_id}} = ?1 AND {{item_id}} IN (SELECT id FROM subtree);",
                    table_ref(partition)
                )),
                params![field_id.to_string(), root.to_string()],
            )?,
        };
        Ok(deleted)
    }

    fn distinct_items_with_field(
        &self,
        partition: Partition,
        field_id: FieldId,
        scope: ItemScope,
    ) -> StoreResult<Vec<ItemId>> {
        let (sql, bind_values) = match scope {
            ItemScope::All => (
                format!(
                    "SELECT DISTINCT {{item_id}} FROM {}%HINT%
                     WHERE {{field_id}} = ?1
                     ORDER BY {{item_id}};",
                    table_ref(partition)
                ),
                vec![Value::Text(field_id.to_string())],
            ),
            ItemScope::Subtree(root) => (
                format!(
                    "{SUBTREE_CTE}
                     SELECT DISTINCT {{item_id}} FROM {}%HINT%
                     WHERE {{field_id}} = ?1 AND {{item_id}} IN (SELECT id FROM subtree)
                     ORDER BY {{item_id}};",
                    table_ref(partition)
                ),
                vec![
                    Value::Text(field_id.to_string()),
                    Value::Text(root.to_string()),
                ],
            ),
        };

        let mut stmt = self.conn.prepare(&self.dialect.render_read(&sql))?;
        let mut rows = stmt.query(params_from_iter(bind_values))?;
        let mut item_ids = Vec::new();
        while let Some(row) = rows.next()? {
            let text: String = row.get(0)?;
            item_ids.push(parse_uuid(&text, partition, "item_id")?);
        }
        Ok(item_ids)
    }

    fn distinct_languages(
        &self,
        partition: Partition,
        item_id: ItemId,
    ) -> StoreResult<Vec<Language>> {
        if partition == Partition::SharedFields {
            return Err(StoreError::InvalidData(format!(
                "{partition} has no language column"
            )));
        }
        let sql = self.dialect.render_read(&format!(
            "SELECT DISTINCT {{language}} FROM {}%HINT%
             WHERE {{item_id}} = ?1
             ORDER BY {{language}};",
            table_ref(partition)
        ));

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params![item_id.to_string()])?;
        let mut languages = Vec::new();
        while let Some(row) = rows.next()? {
            let text: String = row.get(0)?;
            languages.push(parse_language(Some(text), partition)?);
        }
        Ok(languages)
    }

    fn distinct_versions(&self, item_id: ItemId, language: &Language) -> StoreResult<Vec<Version>> {
        let sql = self.dialect.render_read(
            "SELECT DISTINCT {version} FROM {versioned_fields}%HINT%
             WHERE {item_id} = ?1 AND {language} = ?2
             ORDER BY {version};",
        );

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params![item_id.to_string(), language.as_str()])?;
        let mut versions = Vec::new();
        while let Some(row) = rows.next()? {
            versions.push(parse_version(row.get(0)?)?);
        }
        Ok(versions)
    }

    fn copy_to_versioned(
        &self,
        source: Partition,
        item_id: ItemId,
        field_id: FieldId,
        language: &Language,
        version: Version,
    ) -> StoreResult<usize> {
        let template = match source {
            Partition::SharedFields => COPY_SHARED_TO_VERSIONED_SQL,
            Partition::UnversionedFields => COPY_UNVERSIONED_TO_VERSIONED_SQL,
            Partition::VersionedFields => {
                return Err(StoreError::InvalidData(
                    "cannot copy versioned rows onto themselves".to_string(),
                ))
            }
        };
        let inserted = self.conn.execute(
            &self.dialect.render(template),
            params![
                item_id.to_string(),
                field_id.to_string(),
                language.as_str(),
                version.number()
            ],
        )?;
        Ok(inserted)
    }

    fn is_blob_referenced(&self, blob_ref: &str) -> StoreResult<bool> {
        let referenced: i64 = self.conn.query_row(
            &self.dialect.render_read(BLOB_REFERENCE_SQL),
            params![blob_ref],
            |row| row.get(0),
        )?;
        Ok(referenced != 0)
    }
}

fn table_ref(partition: Partition) -> String {
    format!("{{{}}}", partition.table_name())
}

fn select_columns(partition: Partition) -> &'static str {
    match partition {
        Partition::SharedFields => SHARED_COLUMNS,
        Partition::UnversionedFields => UNVERSIONED_COLUMNS,
        Partition::VersionedFields => VERSIONED_COLUMNS,
    }
}

fn key_predicate(partition: Partition) -> &'static str {
    match partition {
        Partition::SharedFields => "{item_id} = ?1 AND {field_id} = ?2",
        Partition::UnversionedFields => "{item_id} = ?1 AND {field_id} = ?2 AND {language} = ?3",
        Partition::VersionedFields => {
            "{item_id} = ?1 AND {field_id} = ?2 AND {language} = ?3 AND {version} = ?4"
        }
    }
}

fn key_params(item_id: ItemId, field_id: FieldId, scope: &FieldScope) -> Vec<Value> {
    let mut values = vec![
        Value::Text(item_id.to_string()),
        Value::Text(field_id.to_string()),
    ];
    if let Some(language) = scope.language() {
        values.push(Value::Text(language.to_string()));
    }
    if let Some(version) = scope.version() {
        values.push(Value::Integer(version.number()));
    }
    values
}

fn parse_field_row(row: &Row<'_>, partition: Partition) -> StoreResult<FieldValue> {
    let item_text: String = row.get(0)?;
    let field_text: String = row.get(1)?;
    let language: Option<String> = row.get(2)?;
    let version: Option<i64> = row.get(3)?;

    let scope = match partition {
        Partition::SharedFields => FieldScope::Shared,
        Partition::UnversionedFields => FieldScope::Unversioned {
            language: parse_language(language, partition)?,
        },
        Partition::VersionedFields => FieldScope::Versioned {
            language: parse_language(language, partition)?,
            version: parse_version(version.ok_or_else(|| {
                StoreError::InvalidData(format!("missing version in {partition}"))
            })?)?,
        },
    };

    Ok(FieldValue {
        item_id: parse_uuid(&item_text, partition, "item_id")?,
        field_id: parse_uuid(&field_text, partition, "field_id")?,
        scope,
        value: row.get(4)?,
        created: row.get(5)?,
        updated: row.get(6)?,
    })
}

fn parse_uuid(value: &str, partition: Partition, column: &str) -> StoreResult<Uuid> {
    Uuid::parse_str(value).map_err(|_| {
        StoreError::InvalidData(format!("invalid uuid `{value}` in {partition}.{column}"))
    })
}

fn parse_language(value: Option<String>, partition: Partition) -> StoreResult<Language> {
    let value =
        value.ok_or_else(|| StoreError::InvalidData(format!("missing language in {partition}")))?;
    Language::new(value.as_str()).map_err(|err| {
        StoreError::InvalidData(format!("invalid language `{value}` in {partition}: {err}"))
    })
}

fn parse_version(value: i64) -> StoreResult<Version> {
    Version::new(value).map_err(|err| StoreError::InvalidData(err.to_string()))
}
