//! Entity mapping contract and the SQL derived from it.

use super::{RepositoryError, RepositoryResult};
use once_cell::sync::Lazy;
use regex::Regex;
use rusqlite::types::{FromSql, ToSql, Value};
use rusqlite::Row;
use std::fmt::Debug;

static SQL_IDENTIFIER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").expect("valid identifier regex"));

/// Table mapping for one persisted type.
///
/// Entities without an identifier are inserted with a generated one, which
/// requires the table to keep SQLite's `rowid`.
pub trait Entity: Clone + Send + Sync + 'static {
    type Id: ToSql + FromSql + Clone + Debug + Send + Sync + 'static;

    const TABLE: &'static str;
    const ID_COLUMN: &'static str;
    /// Persisted columns other than the identifier.
    const COLUMNS: &'static [&'static str];

    fn id(&self) -> Option<Self::Id>;

    fn set_id(&mut self, id: Self::Id);

    /// Values for `COLUMNS`, in the same order.
    fn column_values(&self) -> Vec<Value>;

    /// Builds an entity from a row selecting the identifier and `COLUMNS`.
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self>;
}

/// Sort key for `Repository::list`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderBy {
    pub column: String,
    pub descending: bool,
}

impl OrderBy {
    pub fn asc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            descending: false,
        }
    }

    pub fn desc(column: impl Into<String>) -> Self {
        Self {
            column: column.into(),
            descending: true,
        }
    }
}

/// Scan options for `Repository::list`. Defaults to identifier order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EntityQuery {
    pub order_by: Option<OrderBy>,
    pub limit: Option<u32>,
    pub offset: u32,
}

/// Statements for one entity type, built once when a repository binds.
#[derive(Debug, Clone)]
pub(crate) struct EntitySql {
    pub select_all: String,
    pub select_by_id: String,
    pub select_id_by_rowid: String,
    pub exists: String,
    pub count: String,
    pub insert_generated: String,
    pub insert_with_id: String,
    pub update: Option<String>,
    pub delete_by_id: String,
    pub delete_all: String,
    columns: Vec<&'static str>,
    id_column: &'static str,
}

impl EntitySql {
    pub fn for_entity<E: Entity>() -> RepositoryResult<Self> {
        check_identifier(E::TABLE)?;
        check_identifier(E::ID_COLUMN)?;
        for (index, column) in E::COLUMNS.iter().enumerate() {
            check_identifier(column)?;
            if column.eq_ignore_ascii_case(E::ID_COLUMN) {
                return Err(RepositoryError::InvalidMapping(format!(
                    "`{}` lists its identifier column `{column}` in COLUMNS",
                    E::TABLE
                )));
            }
            if E::COLUMNS[..index]
                .iter()
                .any(|other| other.eq_ignore_ascii_case(column))
            {
                return Err(RepositoryError::InvalidMapping(format!(
                    "`{}` maps column `{column}` twice",
                    E::TABLE
                )));
            }
        }

        let table = E::TABLE;
        let id = E::ID_COLUMN;
        let columns = E::COLUMNS;
        let all_columns = std::iter::once(id)
            .chain(columns.iter().copied())
            .collect::<Vec<_>>()
            .join(", ");
        let select = format!("SELECT {all_columns} FROM {table}");

        let insert_generated = if columns.is_empty() {
            format!("INSERT INTO {table} DEFAULT VALUES;")
        } else {
            format!(
                "INSERT INTO {table} ({}) VALUES ({});",
                columns.join(", "),
                placeholders(1, columns.len())
            )
        };
        let update = (!columns.is_empty()).then(|| {
            let assignments = columns
                .iter()
                .enumerate()
                .map(|(index, column)| format!("{column} = ?{}", index + 1))
                .collect::<Vec<_>>()
                .join(", ");
            format!(
                "UPDATE {table} SET {assignments} WHERE {id} = ?{};",
                columns.len() + 1
            )
        });

        Ok(Self {
            select_all: select.clone(),
            select_by_id: format!("{select} WHERE {id} = ?1;"),
            select_id_by_rowid: format!("SELECT {id} FROM {table} WHERE rowid = ?1;"),
            exists: format!("SELECT EXISTS(SELECT 1 FROM {table} WHERE {id} = ?1);"),
            count: format!("SELECT COUNT(*) FROM {table};"),
            insert_generated,
            insert_with_id: format!(
                "INSERT INTO {table} ({all_columns}) VALUES ({});",
                placeholders(1, columns.len() + 1)
            ),
            update,
            delete_by_id: format!("DELETE FROM {table} WHERE {id} = ?1;"),
            delete_all: format!("DELETE FROM {table};"),
            columns: columns.to_vec(),
            id_column: id,
        })
    }

    /// Renders a scan statement for `query` with bound limit/offset values.
    pub fn list(&self, query: &EntityQuery) -> RepositoryResult<(String, Vec<Value>)> {
        let mut sql = self.select_all.clone();
        match &query.order_by {
            Some(order) => {
                let column = self.mapped_column(&order.column).ok_or_else(|| {
                    RepositoryError::InvalidQuery(format!("unknown column `{}`", order.column))
                })?;
                let direction = if order.descending { "DESC" } else { "ASC" };
                sql.push_str(&format!(" ORDER BY {column} {direction}"));
                if column != self.id_column {
                    sql.push_str(&format!(", {} ASC", self.id_column));
                }
            }
            None => sql.push_str(&format!(" ORDER BY {} ASC", self.id_column)),
        }

        let mut bind_values = Vec::new();
        if let Some(limit) = query.limit {
            sql.push_str(" LIMIT ?");
            bind_values.push(Value::Integer(i64::from(limit)));
            if query.offset > 0 {
                sql.push_str(" OFFSET ?");
                bind_values.push(Value::Integer(i64::from(query.offset)));
            }
        } else if query.offset > 0 {
            sql.push_str(" LIMIT -1 OFFSET ?");
            bind_values.push(Value::Integer(i64::from(query.offset)));
        }
        sql.push(';');

        Ok((sql, bind_values))
    }

    pub fn column_count(&self) -> usize {
        self.columns.len()
    }

    fn mapped_column(&self, name: &str) -> Option<&'static str> {
        let name = name.trim();
        std::iter::once(self.id_column)
            .chain(self.columns.iter().copied())
            .find(|column| column.eq_ignore_ascii_case(name))
    }
}

fn check_identifier(value: &str) -> RepositoryResult<()> {
    if SQL_IDENTIFIER_RE.is_match(value) {
        Ok(())
    } else {
        Err(RepositoryError::InvalidMapping(format!(
            "`{value}` is not a valid SQL identifier"
        )))
    }
}

fn placeholders(first: usize, count: usize) -> String {
    (first..first + count)
        .map(|index| format!("?{index}"))
        .collect::<Vec<_>>()
        .join(", ")
}

#[cfg(test)]
mod tests {
    use super::{Entity, EntityQuery, EntitySql, OrderBy};
    use crate::repo::RepositoryError;
    use rusqlite::types::Value;
    use rusqlite::Row;

    #[derive(Clone)]
    struct Book {
        id: Option<i64>,
        title: String,
    }

    impl Entity for Book {
        type Id = i64;
        const TABLE: &'static str = "book";
        const ID_COLUMN: &'static str = "id";
        const COLUMNS: &'static [&'static str] = &["title"];

        fn id(&self) -> Option<i64> {
            self.id
        }

        fn set_id(&mut self, id: i64) {
            self.id = Some(id);
        }

        fn column_values(&self) -> Vec<Value> {
            vec![Value::Text(self.title.clone())]
        }

        fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
            Ok(Self {
                id: row.get("id")?,
                title: row.get("title")?,
            })
        }
    }

    #[derive(Clone)]
    struct Injected;

    impl Entity for Injected {
        type Id = i64;
        const TABLE: &'static str = "book; DROP TABLE book";
        const ID_COLUMN: &'static str = "id";
        const COLUMNS: &'static [&'static str] = &[];

        fn id(&self) -> Option<i64> {
            None
        }

        fn set_id(&mut self, _id: i64) {}

        fn column_values(&self) -> Vec<Value> {
            Vec::new()
        }

        fn from_row(_row: &Row<'_>) -> rusqlite::Result<Self> {
            Ok(Self)
        }
    }

    #[test]
    fn builds_statements_from_mapping() {
        let sql = EntitySql::for_entity::<Book>().unwrap();
        assert_eq!(sql.select_by_id, "SELECT id, title FROM book WHERE id = ?1;");
        assert_eq!(sql.insert_generated, "INSERT INTO book (title) VALUES (?1);");
        assert_eq!(
            sql.insert_with_id,
            "INSERT INTO book (id, title) VALUES (?1, ?2);"
        );
        assert_eq!(
            sql.update.as_deref(),
            Some("UPDATE book SET title = ?1 WHERE id = ?2;")
        );
        assert_eq!(sql.column_count(), 1);
    }

    #[test]
    fn rejects_non_identifier_table_names() {
        let err = EntitySql::for_entity::<Injected>().unwrap_err();
        assert!(matches!(err, RepositoryError::InvalidMapping(_)));
    }

    #[test]
    fn list_orders_by_mapped_column_with_id_tiebreak() {
        let sql = EntitySql::for_entity::<Book>().unwrap();
        let (statement, values) = sql
            .list(&EntityQuery {
                order_by: Some(OrderBy::desc("TITLE")),
                limit: Some(5),
                offset: 10,
            })
            .unwrap();
        assert_eq!(
            statement,
            "SELECT id, title FROM book ORDER BY title DESC, id ASC LIMIT ? OFFSET ?;"
        );
        assert_eq!(values, vec![Value::Integer(5), Value::Integer(10)]);
    }

    #[test]
    fn list_rejects_unmapped_order_column() {
        let sql = EntitySql::for_entity::<Book>().unwrap();
        let err = sql
            .list(&EntityQuery {
                order_by: Some(OrderBy::asc("rowid")),
                ..EntityQuery::default()
            })
            .unwrap_err();
        assert!(matches!(err, RepositoryError::InvalidQuery(_)));
    }
}
