//! Item definition repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Persist item identity rows (name, template, branch, parent).
//! - Resolve item subtrees for scoped maintenance.
//!
//! # Invariants
//! - `update_item_definition` only touches columns named by the change set
//!   and always advances `updated`.
//! - Subtree listing includes the root and is ordered by depth, then id.

use crate::db::SqlDialect;
use crate::model::field::ItemId;
use crate::model::item::{ItemDefinition, ItemPropertyChanges};
use crate::repo::error::{StoreError, StoreResult};
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

const SELECT_ITEM_SQL: &str = "SELECT {id}, {name}, {template_id}, {branch_id}, {parent_id}
     FROM {items}
     WHERE {id} = ?1;";

const INSERT_ITEM_SQL: &str = "INSERT INTO {items} ({id}, {name}, {template_id}, {branch_id}, {parent_id}, {created}, {updated})
     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6);";

const UPDATE_ITEM_SQL: &str = "UPDATE {items}
     SET {name} = COALESCE(?2, {name}),
         {template_id} = COALESCE(?3, {template_id}),
         {branch_id} = COALESCE(?4, {branch_id}),
         {updated} = ?5
     WHERE {id} = ?1;";

const SUBTREE_SQL: &str = "WITH RECURSIVE subtree(id, depth) AS (
        SELECT {id}, 0 FROM {items} WHERE {id} = ?1
        UNION ALL
        SELECT child.{id}, node.depth + 1
        FROM {items} child
        INNER JOIN subtree node ON child.{parent_id} = node.id
     )
     SELECT id FROM subtree ORDER BY depth ASC, id ASC;";

/// Persistence of item definitions.
pub trait ItemStore {
    fn create_item(&self, item: &ItemDefinition, now: i64) -> StoreResult<()>;
    fn get_item(&self, item_id: ItemId) -> StoreResult<Option<ItemDefinition>>;
    /// Applies property changes. Returns `false` when the item row is absent.
    fn update_item_definition(
        &self,
        item: &ItemDefinition,
        changes: &ItemPropertyChanges,
        now: i64,
    ) -> StoreResult<bool>;
    /// Returns `root` and all descendants present in the store.
    fn list_subtree(&self, root: ItemId) -> StoreResult<Vec<ItemId>>;
}

pub struct SqliteItemRepository<'conn> {
    conn: &'conn Connection,
    dialect: &'conn SqlDialect,
}

impl<'conn> SqliteItemRepository<'conn> {
    pub fn new(conn: &'conn Connection, dialect: &'conn SqlDialect) -> Self {
        Self { conn, dialect }
    }
}

impl ItemStore for SqliteItemRepository<'_> {
    fn create_item(&self, item: &ItemDefinition, now: i64) -> StoreResult<()> {
        self.conn.execute(
            &self.dialect.render(INSERT_ITEM_SQL),
            params![
                item.id.to_string(),
                item.name.as_str(),
                item.template_id.to_string(),
                item.branch_id.map(|id| id.to_string()),
                item.parent_id.map(|id| id.to_string()),
                now
            ],
        )?;
        Ok(())
    }

    fn get_item(&self, item_id: ItemId) -> StoreResult<Option<ItemDefinition>> {
        let row = self
            .conn
            .query_row(
                &self.dialect.render(SELECT_ITEM_SQL),
                params![item_id.to_string()],
                read_item_columns,
            )
            .optional()?;
        row.map(parse_item_columns).transpose()
    }

    fn update_item_definition(
        &self,
        item: &ItemDefinition,
        changes: &ItemPropertyChanges,
        now: i64,
    ) -> StoreResult<bool> {
        let updated = self.conn.execute(
            &self.dialect.render(UPDATE_ITEM_SQL),
            params![
                item.id.to_string(),
                changes.name.as_deref(),
                changes.template_id.map(|id| id.to_string()),
                changes.branch_id.map(|id| id.to_string()),
                now
            ],
        )?;
        Ok(updated > 0)
    }

    fn list_subtree(&self, root: ItemId) -> StoreResult<Vec<ItemId>> {
        let mut stmt = self.conn.prepare(&self.dialect.render(SUBTREE_SQL))?;
        let mut rows = stmt.query(params![root.to_string()])?;
        let mut item_ids = Vec::new();
        while let Some(row) = rows.next()? {
            let text: String = row.get(0)?;
            item_ids.push(parse_id(&text, "id")?);
        }
        Ok(item_ids)
    }
}

type ItemColumns = (String, String, String, Option<String>, Option<String>);

fn read_item_columns(row: &Row<'_>) -> rusqlite::Result<ItemColumns> {
    Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?, row.get(4)?))
}

fn parse_item_columns(columns: ItemColumns) -> StoreResult<ItemDefinition> {
    let (id, name, template_id, branch_id, parent_id) = columns;
    Ok(ItemDefinition {
        id: parse_id(&id, "id")?,
        name,
        template_id: parse_id(&template_id, "template_id")?,
        branch_id: branch_id
            .as_deref()
            .map(|value| parse_id(value, "branch_id"))
            .transpose()?,
        parent_id: parent_id
            .as_deref()
            .map(|value| parse_id(value, "parent_id"))
            .transpose()?,
    })
}

fn parse_id(value: &str, column: &str) -> StoreResult<Uuid> {
    Uuid::parse_str(value)
        .map_err(|_| StoreError::InvalidData(format!("invalid uuid `{value}` in items.{column}")))
}
