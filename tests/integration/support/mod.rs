//! In-memory storage that interprets the statement shapes the query layer
//! emits, so behaviour can be checked without a PostgreSQL server.
//!
//! Supported: `SELECT * / COUNT(*)`, multi-row `INSERT`, `UPDATE`, `DELETE`,
//! `RETURNING *`, `ORDER BY`, `LIMIT`, `IS [NOT] NULL`, `= ANY($n)`,
//! comparison operators, single-row subselects (with the cardinality error
//! a real engine raises) and `BEGIN`/`COMMIT`/`ROLLBACK` snapshots.

#![allow(dead_code)]

use breakwater::executor::{ConnectionSource, Executor, QueryResult, StorageError};
use breakwater::value::{Record, SqlValue};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, Default)]
struct Table {
    columns: Vec<String>,
    unique: Vec<String>,
    rows: Vec<Record>,
    next_id: i64,
}

#[derive(Default)]
struct State {
    tables: HashMap<String, Table>,
    snapshot: Option<HashMap<String, Table>>,
}

#[derive(Default)]
struct Inner {
    state: Mutex<State>,
    statements: Mutex<Vec<(String, Vec<SqlValue>)>>,
    leased: AtomicUsize,
    released: AtomicUsize,
}

/// Shared in-memory database; also a [`ConnectionSource`] counting leases.
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a table. A column named `id` is filled from a sequence when
    /// an insert leaves it null.
    pub fn table(self, name: &str, columns: &[&str]) -> Self {
        let table = Table {
            columns: columns.iter().map(|c| c.to_string()).collect(),
            next_id: 1,
            ..Table::default()
        };
        self.inner.state.lock().unwrap().tables.insert(name.to_string(), table);
        self
    }

    pub fn unique(self, table: &str, column: &str) -> Self {
        if let Some(t) = self.inner.state.lock().unwrap().tables.get_mut(table) {
            t.unique.push(column.to_string());
        }
        self
    }

    pub fn rows(&self, table: &str) -> Vec<Record> {
        self.inner.state.lock().unwrap().tables[table].rows.clone()
    }

    pub fn statements(&self) -> Vec<String> {
        self.inner
            .statements
            .lock()
            .unwrap()
            .iter()
            .map(|(sql, _)| sql.clone())
            .collect()
    }

    pub fn last_arguments(&self) -> Vec<SqlValue> {
        self.inner
            .statements
            .lock()
            .unwrap()
            .last()
            .map(|(_, args)| args.clone())
            .unwrap_or_default()
    }

    pub fn leased(&self) -> usize {
        self.inner.leased.load(AtomicOrdering::SeqCst)
    }

    pub fn released(&self) -> usize {
        self.inner.released.load(AtomicOrdering::SeqCst)
    }

    /// A connection outside the lease counters, for binding by hand.
    pub fn connection(&self) -> MemoryConn {
        MemoryConn {
            inner: self.inner.clone(),
        }
    }
}

impl ConnectionSource for MemoryStore {
    type Connection = MemoryConn;

    fn acquire(&self) -> Result<MemoryConn, StorageError> {
        self.inner.leased.fetch_add(1, AtomicOrdering::SeqCst);
        Ok(self.connection())
    }

    fn release(&self, _conn: MemoryConn) {
        self.inner.released.fetch_add(1, AtomicOrdering::SeqCst);
    }
}

pub struct MemoryConn {
    inner: Arc<Inner>,
}

impl Executor for MemoryConn {
    fn execute(&self, sql: &str, args: &[SqlValue]) -> Result<QueryResult, StorageError> {
        self.inner
            .statements
            .lock()
            .unwrap()
            .push((sql.to_string(), args.to_vec()));
        let statement = Parser::new(sql, args).statement()?;
        let mut state = self.inner.state.lock().unwrap();
        run(&mut state, statement)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Ident(String),
    Param(usize),
    Word(String),
    Sym(&'static str),
}

fn tokenize(sql: &str) -> Vec<Tok> {
    let chars: Vec<char> = sql.chars().collect();
    let mut out = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
        } else if c == '"' {
            let mut ident = String::new();
            i += 1;
            while i < chars.len() {
                if chars[i] == '"' {
                    if chars.get(i + 1) == Some(&'"') {
                        ident.push('"');
                        i += 2;
                        continue;
                    }
                    i += 1;
                    break;
                }
                ident.push(chars[i]);
                i += 1;
            }
            out.push(Tok::Ident(ident));
        } else if c == '$' {
            let start = i + 1;
            i += 1;
            while i < chars.len() && chars[i].is_ascii_digit() {
                i += 1;
            }
            let n: String = chars[start..i].iter().collect();
            out.push(Tok::Param(n.parse().unwrap()));
        } else if c.is_ascii_alphabetic() {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                i += 1;
            }
            let word: String = chars[start..i].iter().collect();
            out.push(Tok::Word(word.to_ascii_uppercase()));
        } else {
            let two: String = chars[i..(i + 2).min(chars.len())].iter().collect();
            let sym = match two.as_str() {
                "!=" => Some("!="),
                "<=" => Some("<="),
                ">=" => Some(">="),
                _ => None,
            };
            if let Some(sym) = sym {
                out.push(Tok::Sym(sym));
                i += 2;
                continue;
            }
            let sym = match c {
                '(' => "(",
                ')' => ")",
                ',' => ",",
                '=' => "=",
                '<' => "<",
                '>' => ">",
                '*' => "*",
                '.' => ".",
                other => panic!("unexpected character {other:?} in {sql}"),
            };
            out.push(Tok::Sym(sym));
            i += 1;
        }
    }
    out
}

#[derive(Debug)]
enum Cond {
    Null { column: String, negated: bool },
    Any { column: String, values: Vec<Value>, negated: bool },
    Cmp { column: String, op: &'static str, value: Value },
    Sub { column: String, table: String, inner: String, filter: Vec<Cond> },
}

#[derive(Debug)]
enum Stmt {
    Begin,
    Commit,
    Rollback,
    Select { table: String, filter: Vec<Cond>, order: Vec<(String, bool)>, limit: Option<usize> },
    Count { table: String, filter: Vec<Cond> },
    Insert { table: String, columns: Vec<String>, tuples: Vec<Vec<Value>>, returning: bool },
    Update { table: String, set: Vec<(String, Value)>, filter: Vec<Cond>, returning: bool },
    Delete { table: String, filter: Vec<Cond>, returning: bool },
}

fn to_json(value: &SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::Null,
        SqlValue::Bool(b) => Value::Bool(*b),
        SqlValue::Int(i) => Value::from(*i),
        SqlValue::Float(f) => Value::from(*f),
        SqlValue::Text(s) => Value::String(s.clone()),
        SqlValue::Json(v) => v.clone(),
        SqlValue::Array(items) => Value::Array(items.iter().map(to_json).collect()),
        SqlValue::PendingTimestamp => panic!("unresolved timestamp reached storage"),
    }
}

struct Parser<'a> {
    toks: Vec<Tok>,
    pos: usize,
    args: &'a [SqlValue],
    sql: &'a str,
}

impl<'a> Parser<'a> {
    fn new(sql: &'a str, args: &'a [SqlValue]) -> Self {
        Self {
            toks: tokenize(sql),
            pos: 0,
            args,
            sql,
        }
    }

    fn syntax(&self) -> StorageError {
        StorageError::with_code("42601", format!("syntax error at token {} in {}", self.pos, self.sql))
    }

    fn peek(&self) -> Option<&Tok> {
        self.toks.get(self.pos)
    }

    fn eat_word(&mut self, word: &str) -> bool {
        if self.peek() == Some(&Tok::Word(word.to_string())) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn eat_sym(&mut self, sym: &str) -> bool {
        if matches!(self.peek(), Some(Tok::Sym(s)) if *s == sym) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn word(&mut self, word: &str) -> Result<(), StorageError> {
        if self.eat_word(word) {
            Ok(())
        } else {
            Err(self.syntax())
        }
    }

    fn sym(&mut self, sym: &str) -> Result<(), StorageError> {
        if self.eat_sym(sym) {
            Ok(())
        } else {
            Err(self.syntax())
        }
    }

    fn ident(&mut self) -> Result<String, StorageError> {
        match self.toks.get(self.pos).cloned() {
            Some(Tok::Ident(name)) => {
                self.pos += 1;
                Ok(name)
            }
            _ => Err(self.syntax()),
        }
    }

    fn table(&mut self) -> Result<String, StorageError> {
        let first = self.ident()?;
        if self.eat_sym(".") {
            Ok(format!("{first}.{}", self.ident()?))
        } else {
            Ok(first)
        }
    }

    fn param(&mut self) -> Result<Value, StorageError> {
        match self.toks.get(self.pos).cloned() {
            Some(Tok::Param(n)) => {
                self.pos += 1;
                let value = self.args.get(n - 1).ok_or_else(|| self.syntax())?;
                Ok(to_json(value))
            }
            _ => Err(self.syntax()),
        }
    }

    fn done(&self) -> Result<(), StorageError> {
        if self.pos == self.toks.len() {
            Ok(())
        } else {
            Err(self.syntax())
        }
    }

    fn returning(&mut self) -> Result<bool, StorageError> {
        if self.eat_word("RETURNING") {
            self.sym("*")?;
            return Ok(true);
        }
        Ok(false)
    }

    fn statement(mut self) -> Result<Stmt, StorageError> {
        if self.eat_word("BEGIN") {
            return Ok(Stmt::Begin);
        }
        if self.eat_word("COMMIT") {
            return Ok(Stmt::Commit);
        }
        if self.eat_word("ROLLBACK") {
            return Ok(Stmt::Rollback);
        }
        let stmt = if self.eat_word("SELECT") {
            if self.eat_word("COUNT") {
                self.sym("(")?;
                self.sym("*")?;
                self.sym(")")?;
                self.word("AS")?;
                self.ident()?;
                self.word("FROM")?;
                let table = self.table()?;
                let filter = self.filter()?;
                Stmt::Count { table, filter }
            } else {
                self.sym("*")?;
                self.word("FROM")?;
                let table = self.table()?;
                let filter = self.filter()?;
                let mut order = Vec::new();
                if self.eat_word("ORDER") {
                    self.word("BY")?;
                    loop {
                        let column = self.ident()?;
                        let desc = if self.eat_word("DESC") {
                            true
                        } else {
                            self.eat_word("ASC");
                            false
                        };
                        order.push((column, desc));
                        if !self.eat_sym(",") {
                            break;
                        }
                    }
                }
                let limit = if self.eat_word("LIMIT") {
                    self.param()?.as_u64().map(|n| n as usize)
                } else {
                    None
                };
                Stmt::Select { table, filter, order, limit }
            }
        } else if self.eat_word("INSERT") {
            self.word("INTO")?;
            let table = self.table()?;
            let mut columns = Vec::new();
            let mut tuples = Vec::new();
            if self.eat_word("DEFAULT") {
                self.word("VALUES")?;
                tuples.push(Vec::new());
            } else {
                self.sym("(")?;
                loop {
                    columns.push(self.ident()?);
                    if !self.eat_sym(",") {
                        break;
                    }
                }
                self.sym(")")?;
                self.word("VALUES")?;
                loop {
                    self.sym("(")?;
                    let mut tuple = Vec::new();
                    loop {
                        tuple.push(self.param()?);
                        if !self.eat_sym(",") {
                            break;
                        }
                    }
                    self.sym(")")?;
                    tuples.push(tuple);
                    if !self.eat_sym(",") {
                        break;
                    }
                }
            }
            let returning = self.returning()?;
            Stmt::Insert { table, columns, tuples, returning }
        } else if self.eat_word("UPDATE") {
            let table = self.table()?;
            self.word("SET")?;
            let mut set = Vec::new();
            loop {
                let column = self.ident()?;
                self.sym("=")?;
                set.push((column, self.param()?));
                if !self.eat_sym(",") {
                    break;
                }
            }
            let filter = self.filter()?;
            let returning = self.returning()?;
            Stmt::Update { table, set, filter, returning }
        } else if self.eat_word("DELETE") {
            self.word("FROM")?;
            let table = self.table()?;
            let filter = self.filter()?;
            let returning = self.returning()?;
            Stmt::Delete { table, filter, returning }
        } else {
            return Err(self.syntax());
        };
        self.done()?;
        Ok(stmt)
    }

    fn filter(&mut self) -> Result<Vec<Cond>, StorageError> {
        let mut conds = Vec::new();
        if !self.eat_word("WHERE") {
            return Ok(conds);
        }
        loop {
            conds.push(self.cond()?);
            if !self.eat_word("AND") {
                return Ok(conds);
            }
        }
    }

    fn any(&mut self) -> Result<Vec<Value>, StorageError> {
        self.word("ANY")?;
        self.sym("(")?;
        let values = match self.param()? {
            Value::Array(items) => items,
            _ => return Err(self.syntax()),
        };
        self.sym(")")?;
        Ok(values)
    }

    fn cond(&mut self) -> Result<Cond, StorageError> {
        if self.eat_word("NOT") {
            self.sym("(")?;
            let column = self.ident()?;
            self.sym("=")?;
            let values = self.any()?;
            self.sym(")")?;
            return Ok(Cond::Any { column, values, negated: true });
        }
        let column = self.ident()?;
        if self.eat_word("IS") {
            let negated = self.eat_word("NOT");
            self.word("NULL")?;
            return Ok(Cond::Null { column, negated });
        }
        let op = match self.toks.get(self.pos) {
            Some(Tok::Sym(op)) => *op,
            _ => return Err(self.syntax()),
        };
        self.pos += 1;
        if op == "=" && self.peek() == Some(&Tok::Word("ANY".to_string())) {
            let values = self.any()?;
            return Ok(Cond::Any { column, values, negated: false });
        }
        if op == "=" && self.eat_sym("(") {
            self.word("SELECT")?;
            let inner = self.ident()?;
            self.word("FROM")?;
            let table = self.table()?;
            let filter = self.filter()?;
            self.sym(")")?;
            return Ok(Cond::Sub { column, table, inner, filter });
        }
        let value = self.param()?;
        Ok(Cond::Cmp { column, op, value })
    }
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Null, _) | (_, Value::Null) => None,
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}

fn column<'r>(row: &'r Record, name: &str) -> &'r Value {
    row.get(name).unwrap_or(&Value::Null)
}

fn no_table(name: &str) -> StorageError {
    StorageError::with_code("42P01", format!("relation \"{name}\" does not exist"))
}

fn matching(tables: &HashMap<String, Table>, name: &str, filter: &[Cond]) -> Result<Vec<usize>, StorageError> {
    let table = tables.get(name).ok_or_else(|| no_table(name))?;
    let mut hits = Vec::new();
    for (index, row) in table.rows.iter().enumerate() {
        let mut keep = true;
        for cond in filter {
            if !eval(tables, cond, row)? {
                keep = false;
                break;
            }
        }
        if keep {
            hits.push(index);
        }
    }
    Ok(hits)
}

fn eval(tables: &HashMap<String, Table>, cond: &Cond, row: &Record) -> Result<bool, StorageError> {
    Ok(match cond {
        Cond::Null { column: c, negated } => column(row, c).is_null() != *negated,
        Cond::Any { column: c, values, negated } => {
            let value = column(row, c);
            if value.is_null() {
                return Ok(false);
            }
            let hit = values.iter().any(|v| compare(value, v) == Some(Ordering::Equal));
            hit != *negated
        }
        Cond::Cmp { column: c, op, value } => match compare(column(row, c), value) {
            None => false,
            Some(ord) => match *op {
                "=" => ord == Ordering::Equal,
                "!=" => ord != Ordering::Equal,
                "<" => ord == Ordering::Less,
                ">" => ord == Ordering::Greater,
                "<=" => ord != Ordering::Greater,
                ">=" => ord != Ordering::Less,
                _ => false,
            },
        },
        Cond::Sub { column: c, table, inner, filter } => {
            let hits = matching(tables, table, filter)?;
            if hits.len() > 1 {
                return Err(StorageError::with_code(
                    "21000",
                    "more than one row returned by a subquery used as an expression",
                ));
            }
            match hits.first() {
                Some(&index) => {
                    let target = column(&tables[table].rows[index], inner);
                    compare(column(row, c), target) == Some(Ordering::Equal)
                }
                None => false,
            }
        }
    })
}

fn check_unique(table: &Table, row: &Record, skip: Option<usize>) -> Result<(), StorageError> {
    for col in &table.unique {
        let value = column(row, col);
        if value.is_null() {
            continue;
        }
        let clash = table
            .rows
            .iter()
            .enumerate()
            .any(|(i, other)| Some(i) != skip && column(other, col) == value);
        if clash {
            return Err(StorageError::with_code(
                "23505",
                format!("duplicate key value violates unique constraint on \"{col}\""),
            ));
        }
    }
    Ok(())
}

fn run(state: &mut State, stmt: Stmt) -> Result<QueryResult, StorageError> {
    match stmt {
        Stmt::Begin => {
            state.snapshot = Some(state.tables.clone());
            Ok(QueryResult::affected(0))
        }
        Stmt::Commit => {
            state.snapshot = None;
            Ok(QueryResult::affected(0))
        }
        Stmt::Rollback => {
            if let Some(snapshot) = state.snapshot.take() {
                state.tables = snapshot;
            }
            Ok(QueryResult::affected(0))
        }
        Stmt::Select { table, filter, order, limit } => {
            let hits = matching(&state.tables, &table, &filter)?;
            let rows = &state.tables[&table].rows;
            let mut out: Vec<Record> = hits.into_iter().map(|i| rows[i].clone()).collect();
            for (col, desc) in order.iter().rev() {
                out.sort_by(|a, b| {
                    let ord = compare(column(a, col), column(b, col)).unwrap_or(Ordering::Equal);
                    if *desc {
                        ord.reverse()
                    } else {
                        ord
                    }
                });
            }
            if let Some(n) = limit {
                out.truncate(n);
            }
            Ok(QueryResult::from_rows(out))
        }
        Stmt::Count { table, filter } => {
            let n = matching(&state.tables, &table, &filter)?.len();
            let mut row = Record::new();
            row.insert("count".to_string(), Value::from(n as i64));
            Ok(QueryResult::from_rows(vec![row]))
        }
        Stmt::Insert { table, columns, tuples, returning } => {
            let mut staged = state.tables.get(&table).cloned().ok_or_else(|| no_table(&table))?;
            let mut inserted = Vec::new();
            for tuple in tuples {
                let mut row: Record = staged.columns.iter().map(|c| (c.clone(), Value::Null)).collect();
                for (col, value) in columns.iter().zip(tuple) {
                    if !staged.columns.contains(col) {
                        return Err(StorageError::with_code(
                            "42703",
                            format!("column \"{col}\" does not exist"),
                        ));
                    }
                    row.insert(col.clone(), value);
                }
                if staged.columns.iter().any(|c| c == "id") {
                    match row["id"].as_i64() {
                        Some(id) => staged.next_id = staged.next_id.max(id + 1),
                        None => {
                            row.insert("id".to_string(), Value::from(staged.next_id));
                            staged.next_id += 1;
                        }
                    }
                }
                check_unique(&staged, &row, None)?;
                staged.rows.push(row.clone());
                inserted.push(row);
            }
            state.tables.insert(table, staged);
            Ok(shaped(inserted, returning))
        }
        Stmt::Update { table, set, filter, returning } => {
            let hits = matching(&state.tables, &table, &filter)?;
            let mut staged = state.tables[&table].clone();
            let mut updated = Vec::new();
            for index in hits {
                let mut row = staged.rows[index].clone();
                for (col, value) in &set {
                    if !staged.columns.contains(col) {
                        return Err(StorageError::with_code(
                            "42703",
                            format!("column \"{col}\" does not exist"),
                        ));
                    }
                    row.insert(col.clone(), value.clone());
                }
                check_unique(&staged, &row, Some(index))?;
                staged.rows[index] = row.clone();
                updated.push(row);
            }
            state.tables.insert(table, staged);
            Ok(shaped(updated, returning))
        }
        Stmt::Delete { table, filter, returning } => {
            let hits = matching(&state.tables, &table, &filter)?;
            let staged = state.tables.get_mut(&table).ok_or_else(|| no_table(&table))?;
            let mut deleted = Vec::new();
            for index in hits.into_iter().rev() {
                deleted.push(staged.rows.remove(index));
            }
            deleted.reverse();
            Ok(shaped(deleted, returning))
        }
    }
}

fn shaped(rows: Vec<Record>, returning: bool) -> QueryResult {
    if returning {
        QueryResult::from_rows(rows)
    } else {
        QueryResult::affected(rows.len() as u64)
    }
}
