use rusqlite::types::Value;

/// An inner join contributed by an adapter or metric.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Join {
    /// Table with alias, e.g. `scm_repositories r`.
    pub table: String,
    pub on: String,
}

impl Join {
    pub fn new(table: impl Into<String>, on: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            on: on.into(),
        }
    }

    pub fn to_sql(&self) -> String {
        format!("JOIN {} ON {}", self.table, self.on)
    }
}

/// One boolean condition with its bound values. `sql` uses anonymous `?`
/// placeholders, consumed left to right by `params`.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub sql: String,
    pub params: Vec<Value>,
}

impl Predicate {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    pub fn with_params(sql: impl Into<String>, params: Vec<Value>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }

    pub fn eq(column: &str, value: impl Into<Value>) -> Self {
        Self::with_params(format!("{column} = ?"), vec![value.into()])
    }

    /// `column IN (?, ...)`. An empty list matches nothing.
    pub fn in_list(column: &str, values: Vec<Value>) -> Self {
        if values.is_empty() {
            return Self::new("0 = 1");
        }
        Self::with_params(
            format!("{column} IN ({})", placeholders(values.len())),
            values,
        )
    }
}

pub fn placeholders(n: usize) -> String {
    vec!["?"; n].join(", ")
}

/// Joins and predicates for one query. Adding an equal join or predicate
/// twice keeps the first; rendering follows insertion order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SqlFragments {
    joins: Vec<Join>,
    predicates: Vec<Predicate>,
}

impl SqlFragments {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn join(mut self, join: Join) -> Self {
        self.add_join(join);
        self
    }

    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.add_predicate(predicate);
        self
    }

    pub fn add_join(&mut self, join: Join) {
        if !self.joins.contains(&join) {
            self.joins.push(join);
        }
    }

    pub fn add_predicate(&mut self, predicate: Predicate) {
        if !self.predicates.contains(&predicate) {
            self.predicates.push(predicate);
        }
    }

    /// Union with another fragment set.
    pub fn merge(&mut self, other: SqlFragments) {
        for j in other.joins {
            self.add_join(j);
        }
        for p in other.predicates {
            self.add_predicate(p);
        }
    }

    pub fn joins(&self) -> &[Join] {
        &self.joins
    }

    pub fn predicates(&self) -> &[Predicate] {
        &self.predicates
    }

    pub fn is_empty(&self) -> bool {
        self.joins.is_empty() && self.predicates.is_empty()
    }
}
