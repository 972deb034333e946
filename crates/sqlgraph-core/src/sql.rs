//! Rendering structured statements to SQL for a live transaction.

use crate::connection::{Dialect, TransactionOps};
use crate::error::Error;
use crate::key::KeyValue;
use crate::row::Row;
use crate::statement::{
    Executed, KeyFilter, LinkedSelect, PARENT_COLUMN, Query, RootQuery, Select, Statement,
    StatementExecutor,
};
use crate::value::Value;
use asupersync::{Cx, Outcome};

/// Accumulates SQL text and its positional parameters.
struct SqlBuilder {
    dialect: Dialect,
    sql: String,
    params: Vec<Value>,
}

impl SqlBuilder {
    fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            sql: String::new(),
            params: Vec::new(),
        }
    }

    fn push(&mut self, text: &str) -> &mut Self {
        self.sql.push_str(text);
        self
    }

    fn ident(&mut self, name: &str) -> &mut Self {
        let quoted = self.dialect.quote_identifier(name);
        self.sql.push_str(&quoted);
        self
    }

    fn qualified(&mut self, alias: &str, name: &str) -> &mut Self {
        self.sql.push_str(alias);
        self.sql.push('.');
        self.ident(name)
    }

    fn param(&mut self, value: Value) -> &mut Self {
        self.params.push(value);
        let placeholder = self.dialect.placeholder(self.params.len());
        self.sql.push_str(&placeholder);
        self
    }

    fn ident_list(&mut self, names: &[&str]) -> &mut Self {
        for (i, name) in names.iter().enumerate() {
            if i > 0 {
                self.push(", ");
            }
            self.ident(name);
        }
        self
    }

    fn key_filter(&mut self, alias: Option<&str>, filter: &KeyFilter) -> &mut Self {
        if filter.keys.is_empty() {
            return self.push("1 = 0");
        }
        if let [column] = filter.columns.as_slice() {
            self.column(alias, column).push(" IN (");
            for (i, key) in filter.keys.iter().enumerate() {
                if i > 0 {
                    self.push(", ");
                }
                self.param(key.first().cloned().unwrap_or(Value::Null));
            }
            return self.push(")");
        }
        // Composite keys render as a disjunction of conjunctions, which
        // every dialect accepts.
        for (i, key) in filter.keys.iter().enumerate() {
            if i > 0 {
                self.push(" OR ");
            }
            self.composite_match(alias, &filter.columns, key);
        }
        self
    }

    fn composite_match(&mut self, alias: Option<&str>, columns: &[&str], key: &KeyValue) {
        self.push("(");
        for (j, (column, value)) in columns.iter().zip(key.values()).enumerate() {
            if j > 0 {
                self.push(" AND ");
            }
            self.column(alias, column).push(" = ").param(value.clone());
        }
        self.push(")");
    }

    fn column(&mut self, alias: Option<&str>, name: &str) -> &mut Self {
        match alias {
            Some(alias) => self.qualified(alias, name),
            None => self.ident(name),
        }
    }

    fn finish(self) -> (String, Vec<Value>) {
        (self.sql, self.params)
    }
}

/// Render a write statement.
pub fn render_statement(dialect: Dialect, statement: &Statement) -> (String, Vec<Value>) {
    let mut b = SqlBuilder::new(dialect);
    match statement {
        Statement::Insert {
            table,
            columns,
            values,
            returning,
        } => {
            b.push("INSERT INTO ").ident(table);
            if columns.is_empty() {
                match dialect {
                    Dialect::Mysql => b.push(" () VALUES ()"),
                    Dialect::Postgres | Dialect::Sqlite => b.push(" DEFAULT VALUES"),
                };
            } else {
                b.push(" (").ident_list(columns).push(") VALUES (");
                for (i, value) in values.iter().enumerate() {
                    if i > 0 {
                        b.push(", ");
                    }
                    b.param(value.clone());
                }
                b.push(")");
            }
            if let (Some(column), true) = (returning, dialect.supports_returning()) {
                b.push(" RETURNING ").ident(column);
            }
        }
        Statement::Update {
            table,
            key_column,
            key,
            set,
        } => {
            b.push("UPDATE ").ident(table).push(" SET ");
            for (i, (column, value)) in set.iter().enumerate() {
                if i > 0 {
                    b.push(", ");
                }
                b.ident(column).push(" = ").param(value.clone());
            }
            b.push(" WHERE ").ident(key_column).push(" = ").param(key.clone());
        }
        Statement::Delete { table, filters } => {
            b.push("DELETE FROM ").ident(table).push(" WHERE ");
            for (i, (column, value)) in filters.iter().enumerate() {
                if i > 0 {
                    b.push(" AND ");
                }
                b.ident(column).push(" = ").param(value.clone());
            }
        }
    }
    b.finish()
}

/// Render a read.
pub fn render_query(dialect: Dialect, query: &Query) -> (String, Vec<Value>) {
    let mut b = SqlBuilder::new(dialect);
    match query {
        Query::Select(select) => render_select(&mut b, select),
        Query::Linked(linked) => render_linked(&mut b, linked),
        Query::Roots(roots) => render_roots(&mut b, roots),
    }
    b.finish()
}

fn render_select(b: &mut SqlBuilder, select: &Select) {
    b.push("SELECT ")
        .ident_list(&select.columns)
        .push(" FROM ")
        .ident(select.table)
        .push(" WHERE ")
        .key_filter(None, &select.filter);
    if !select.order_by.is_empty() {
        b.push(" ORDER BY ").ident_list(&select.order_by);
    }
}

fn render_linked(b: &mut SqlBuilder, linked: &LinkedSelect) {
    b.push("SELECT ")
        .qualified("l", linked.link.local_column)
        .push(" AS ")
        .ident(PARENT_COLUMN);
    for column in &linked.columns {
        b.push(", ").qualified("t", column);
    }
    b.push(" FROM ")
        .ident(linked.link.table)
        .push(" l JOIN ")
        .ident(linked.table)
        .push(" t ON ")
        .qualified("t", linked.id_column)
        .push(" = ")
        .qualified("l", linked.link.remote_column)
        .push(" WHERE ");
    let filter = KeyFilter::by(linked.link.local_column, linked.parent_keys.clone());
    b.key_filter(Some("l"), &filter);
    b.push(" ORDER BY ")
        .qualified("l", linked.link.local_column)
        .push(", ")
        .qualified("t", linked.id_column);
}

fn render_roots(b: &mut SqlBuilder, roots: &RootQuery) {
    b.push("SELECT ")
        .ident_list(&roots.columns)
        .push(" FROM ")
        .ident(roots.table);
    if let Some(predicate) = &roots.predicate {
        b.push(" WHERE (");
        let mut params = predicate.params.iter();
        for (i, part) in predicate.sql.split('?').enumerate() {
            if i > 0 {
                b.param(params.next().cloned().unwrap_or(Value::Null));
            }
            b.push(part);
        }
        b.push(")");
    }
    if !roots.order_by.is_empty() {
        b.push(" ORDER BY ");
        for (i, term) in roots.order_by.iter().enumerate() {
            if i > 0 {
                b.push(", ");
            }
            b.ident(term.column)
                .push(if term.descending { " DESC" } else { " ASC" });
        }
    }
    match (roots.limit, roots.offset) {
        (Some(limit), _) => {
            b.push(&format!(" LIMIT {limit}"));
        }
        (None, Some(_)) if b.dialect == Dialect::Mysql => {
            b.push(" LIMIT 18446744073709551615");
        }
        (None, Some(_)) if b.dialect == Dialect::Sqlite => {
            b.push(" LIMIT -1");
        }
        _ => {}
    }
    if let Some(offset) = roots.offset {
        b.push(&format!(" OFFSET {offset}"));
    }
}

fn attach_sql(outcome_err: Error, sql: &str) -> Error {
    match outcome_err {
        Error::Query(q) if q.sql.is_none() => Error::Query(q.with_sql(sql)),
        other => other,
    }
}

/// [`StatementExecutor`] over a live transaction, rendering SQL per dialect.
pub struct SqlExecutor<T> {
    tx: T,
    dialect: Dialect,
}

impl<T: TransactionOps> SqlExecutor<T> {
    pub fn new(tx: T, dialect: Dialect) -> Self {
        Self { tx, dialect }
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    /// Give the transaction back for commit or rollback.
    pub fn into_inner(self) -> T {
        self.tx
    }

    async fn last_insert_id(&self, cx: &Cx) -> Outcome<Option<Value>, Error> {
        match self.tx.query(cx, "SELECT LAST_INSERT_ID()", &[]).await {
            Outcome::Ok(rows) => Outcome::Ok(rows.first().and_then(|r| r.get(0).cloned())),
            Outcome::Err(e) => Outcome::Err(e),
            Outcome::Cancelled(r) => Outcome::Cancelled(r),
            Outcome::Panicked(p) => Outcome::Panicked(p),
        }
    }
}

impl<T: TransactionOps> StatementExecutor for SqlExecutor<T> {
    async fn query(&self, cx: &Cx, query: &Query) -> Outcome<Vec<Row>, Error> {
        let (sql, params) = render_query(self.dialect, query);
        tracing::trace!(sql = %sql, params = params.len(), "Executing query");
        match self.tx.query(cx, &sql, &params).await {
            Outcome::Err(e) => Outcome::Err(attach_sql(e, &sql)),
            other => other,
        }
    }

    async fn execute(&self, cx: &Cx, statement: &Statement) -> Outcome<Executed, Error> {
        let (sql, params) = render_statement(self.dialect, statement);
        tracing::trace!(sql = %sql, params = params.len(), "Executing statement");

        let wants_id = matches!(statement, Statement::Insert { returning: Some(_), .. });
        if wants_id && self.dialect.supports_returning() {
            return match self.tx.query(cx, &sql, &params).await {
                Outcome::Ok(rows) => Outcome::Ok(Executed {
                    rows_affected: rows.len() as u64,
                    generated_id: rows.first().and_then(|r| r.get(0).cloned()),
                }),
                Outcome::Err(e) => Outcome::Err(attach_sql(e, &sql)),
                Outcome::Cancelled(r) => Outcome::Cancelled(r),
                Outcome::Panicked(p) => Outcome::Panicked(p),
            };
        }

        let rows_affected = match self.tx.execute(cx, &sql, &params).await {
            Outcome::Ok(n) => n,
            Outcome::Err(e) => return Outcome::Err(attach_sql(e, &sql)),
            Outcome::Cancelled(r) => return Outcome::Cancelled(r),
            Outcome::Panicked(p) => return Outcome::Panicked(p),
        };
        let generated_id = if wants_id {
            match self.last_insert_id(cx).await {
                Outcome::Ok(id) => id,
                Outcome::Err(e) => return Outcome::Err(e),
                Outcome::Cancelled(r) => return Outcome::Cancelled(r),
                Outcome::Panicked(p) => return Outcome::Panicked(p),
            }
        } else {
            None
        };
        Outcome::Ok(Executed {
            rows_affected,
            generated_id,
        })
    }

    async fn savepoint(&self, cx: &Cx, name: &str) -> Outcome<(), Error> {
        self.tx.savepoint(cx, name).await
    }

    async fn rollback_to(&self, cx: &Cx, name: &str) -> Outcome<(), Error> {
        self.tx.rollback_to(cx, name).await
    }

    async fn release(&self, cx: &Cx, name: &str) -> Outcome<(), Error> {
        self.tx.release(cx, name).await
    }
}
