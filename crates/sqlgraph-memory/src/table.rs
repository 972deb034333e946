//! Table storage and row matching for the in-memory backend.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use sqlgraph_core::{Error, QueryError, QueryErrorKind, Result, Value};

pub(crate) type StoredRow = BTreeMap<&'static str, Value>;

/// One table: its declared columns, constraints and rows in insertion order.
#[derive(Debug, Clone)]
pub(crate) struct Table {
    pub name: &'static str,
    pub columns: Vec<&'static str>,
    /// Primary key column; link tables have none.
    pub key: Option<&'static str>,
    pub generated: bool,
    pub next_id: i64,
    /// Column sets that must be unique across rows (NULLs never collide).
    pub unique: Vec<Vec<&'static str>>,
    pub rows: Vec<StoredRow>,
}

impl Table {
    pub fn new(name: &'static str, columns: Vec<&'static str>) -> Self {
        Self {
            name,
            columns,
            key: None,
            generated: false,
            next_id: 1,
            unique: Vec::new(),
            rows: Vec::new(),
        }
    }

    pub fn check_columns<'a>(&self, columns: impl IntoIterator<Item = &'a &'static str>) -> Result<()> {
        for column in columns {
            if !self.columns.contains(column) {
                return Err(Error::Query(QueryError::new(
                    QueryErrorKind::Syntax,
                    format!("no such column: {}.{}", self.name, column),
                )));
            }
        }
        Ok(())
    }

    /// Insert `row`, generating the key when needed. Returns the stored row's index.
    pub fn insert(&mut self, mut row: StoredRow) -> Result<usize> {
        self.check_columns(row.keys())?;
        if let Some(key) = self.key {
            let missing = row.get(key).is_none_or(Value::is_null);
            if missing && self.generated {
                row.insert(key, Value::BigInt(self.next_id));
                self.next_id += 1;
            } else if let Some(id) = row.get(key).and_then(Value::as_i64) {
                self.next_id = self.next_id.max(id + 1);
            }
        }
        self.check_unique(&row, None)?;
        self.rows.push(row);
        Ok(self.rows.len() - 1)
    }

    /// Apply `set` to every row whose `key_column` equals `key`.
    pub fn update(&mut self, key_column: &'static str, key: &Value, set: &[(&'static str, Value)]) -> Result<u64> {
        self.check_columns(set.iter().map(|(c, _)| c))?;
        let targets: Vec<usize> = self
            .rows
            .iter()
            .enumerate()
            .filter(|(_, row)| cell_eq(row.get(key_column), key))
            .map(|(i, _)| i)
            .collect();

        for &i in &targets {
            let mut updated = self.rows[i].clone();
            for (column, value) in set {
                updated.insert(*column, value.clone());
            }
            self.check_unique(&updated, Some(i))?;
            self.rows[i] = updated;
        }
        Ok(targets.len() as u64)
    }

    /// Remove every row matching all `filters`.
    pub fn delete(&mut self, filters: &[(&'static str, Value)]) -> Result<u64> {
        self.check_columns(filters.iter().map(|(c, _)| c))?;
        let before = self.rows.len();
        self.rows
            .retain(|row| !filters.iter().all(|(column, value)| cell_eq(row.get(column), value)));
        Ok((before - self.rows.len()) as u64)
    }

    fn check_unique(&self, row: &StoredRow, skip: Option<usize>) -> Result<()> {
        for columns in &self.unique {
            let values: Vec<&Value> = columns.iter().filter_map(|c| row.get(c)).collect();
            if values.len() != columns.len() || values.iter().any(|v| v.is_null()) {
                continue;
            }
            let clash = self.rows.iter().enumerate().any(|(i, other)| {
                Some(i) != skip
                    && columns
                        .iter()
                        .zip(&values)
                        .all(|(c, v)| cell_eq(other.get(c), v))
            });
            if clash {
                return Err(Error::Query(QueryError::unique_violation(format!(
                    "duplicate key value violates unique constraint on {}({})",
                    self.name,
                    columns.join(", ")
                ))));
            }
        }
        Ok(())
    }

    /// The cell values of `row` for `columns`; undeclared cells read as NULL.
    pub fn project(row: &StoredRow, columns: &[&'static str]) -> Vec<Value> {
        columns
            .iter()
            .map(|c| row.get(c).cloned().unwrap_or(Value::Null))
            .collect()
    }
}

/// SQL `=`: NULL equals nothing.
pub(crate) fn cell_eq(cell: Option<&Value>, value: &Value) -> bool {
    match cell {
        Some(cell) => !cell.is_null() && !value.is_null() && cell.same_as(value),
        None => false,
    }
}

/// Total order used for ORDER BY: NULLs first, then numbers, text, and the
/// rendered form of anything else.
pub(crate) fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a.is_null(), b.is_null()) {
        (true, true) => return Ordering::Equal,
        (true, false) => return Ordering::Less,
        (false, true) => return Ordering::Greater,
        (false, false) => {}
    }
    if let (Some(x), Some(y)) = (a.as_i64(), b.as_i64()) {
        return x.cmp(&y);
    }
    if let (Some(x), Some(y)) = (a.as_f64(), b.as_f64()) {
        return x.total_cmp(&y);
    }
    if let (Some(x), Some(y)) = (a.as_str(), b.as_str()) {
        return x.cmp(y);
    }
    if let (Some(x), Some(y)) = (a.as_bool(), b.as_bool()) {
        return x.cmp(&y);
    }
    a.to_string().cmp(&b.to_string())
}
