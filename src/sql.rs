use sqlparser::ast::{
    self, AssignmentTarget, BinaryOperator, Expr, FromTable, ObjectNamePart, SetExpr, Statement,
    TableFactor, TableObject, Value, ValueWithSpan,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;

use crate::limits::{MAX_INSERT_ROWS, MAX_SQL_LEN};
use crate::model::*;

/// The only table.
pub const TABLE: &str = "intervals";

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    /// One create per row, applied in order.
    Insert { rows: Vec<CreateRequest> },
    /// `None` fields keep the stored value.
    Update {
        key: Span,
        from: Option<Ts>,
        to: Option<Ts>,
        price: Option<Price>,
    },
    Delete { key: Span },
    SelectAll,
    SelectOne { key: Span },
    SelectRange {
        from: Option<Ts>,
        to: Option<Ts>,
        strict: bool,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Column {
    From,
    To,
    Price,
}

impl Column {
    fn parse(name: &str) -> Option<Column> {
        match name {
            "from" => Some(Column::From),
            "to" => Some(Column::To),
            "price" => Some(Column::Price),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Column::From => "from",
            Column::To => "to",
            Column::Price => "price",
        }
    }
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    if sql.len() > MAX_SQL_LEN {
        return Err(SqlError::Unsupported("statement too long".into()));
    }
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    let stmt = match stmts.as_slice() {
        [] => return Err(SqlError::Empty),
        [stmt] => stmt,
        _ => return Err(SqlError::Unsupported("multiple statements".into())),
    };

    match stmt {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Update {
            table,
            assignments,
            selection,
            ..
        } => parse_update(table, assignments, selection.as_ref()),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    expect_table(insert_table_name(insert)?)?;

    let columns: Vec<Column> = if insert.columns.is_empty() {
        vec![Column::From, Column::To, Column::Price]
    } else {
        insert
            .columns
            .iter()
            .map(|ident| {
                let name = ident.value.to_lowercase();
                Column::parse(&name).ok_or(SqlError::UnknownColumn(name))
            })
            .collect::<Result<_, _>>()?
    };
    for required in [Column::From, Column::To, Column::Price] {
        if !columns.contains(&required) {
            return Err(SqlError::MissingColumn(required.name()));
        }
    }

    let all_rows = extract_all_insert_rows(insert)?;
    if all_rows.len() > MAX_INSERT_ROWS {
        return Err(SqlError::TooManyRows(all_rows.len()));
    }

    let mut rows = Vec::with_capacity(all_rows.len());
    for (i, row) in all_rows.iter().enumerate() {
        if row.len() != columns.len() {
            return Err(SqlError::WrongArity(columns.len(), row.len()));
        }
        let (mut from, mut to, mut price) = (None, None, None);
        for (column, expr) in columns.iter().zip(row) {
            let at_row = |e: SqlError| SqlError::Parse(format!("row {}: {e}", i + 1));
            match column {
                Column::From => from = Some(parse_ts_expr(expr).map_err(at_row)?),
                Column::To => to = Some(parse_ts_expr(expr).map_err(at_row)?),
                Column::Price => price = Some(parse_price_expr(expr).map_err(at_row)?),
            }
        }
        let (Some(from), Some(to), Some(price)) = (from, to, price) else {
            return Err(SqlError::MissingColumn("from, to, price"));
        };
        rows.push(CreateRequest::new(checked_span(from, to)?, price));
    }
    Ok(Command::Insert { rows })
}

fn parse_update(
    table: &ast::TableWithJoins,
    assignments: &[ast::Assignment],
    selection: Option<&Expr>,
) -> Result<Command, SqlError> {
    expect_table(table_factor_name(&table.relation)?)?;

    let (mut from, mut to, mut price) = (None, None, None);
    for assignment in assignments {
        let name = match &assignment.target {
            AssignmentTarget::ColumnName(name) => object_name_last(name),
            AssignmentTarget::Tuple(_) => None,
        }
        .ok_or_else(|| SqlError::Unsupported("tuple assignment".into()))?;
        match Column::parse(&name) {
            Some(Column::From) => from = Some(parse_ts_expr(&assignment.value)?),
            Some(Column::To) => to = Some(parse_ts_expr(&assignment.value)?),
            Some(Column::Price) => price = Some(parse_price_expr(&assignment.value)?),
            None => return Err(SqlError::UnknownColumn(name)),
        }
    }
    if let (Some(f), Some(t)) = (from, to) {
        checked_span(f, t)?;
    }

    let key = extract_key(selection)?;
    Ok(Command::Update {
        key,
        from,
        to,
        price,
    })
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    expect_table(delete_table_name(delete)?)?;
    let key = extract_key(delete.selection.as_ref())?;
    Ok(Command::Delete { key })
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };
    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    expect_table(table_factor_name(&select.from[0].relation)?)?;

    let Some(selection) = &select.selection else {
        return Ok(Command::SelectAll);
    };
    let mut filters = Vec::new();
    collect_filters(selection, &mut filters)?;
    filters_to_command(&filters)
}

// ── WHERE clauses ─────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cmp {
    Eq,
    GtEq,
    LtEq,
}

#[derive(Debug, Clone, Copy)]
struct Filter {
    column: Column,
    cmp: Cmp,
    value: Ts,
}

fn collect_filters(expr: &Expr, out: &mut Vec<Filter>) -> Result<(), SqlError> {
    match expr {
        Expr::Nested(inner) => collect_filters(inner, out),
        Expr::BinaryOp {
            left,
            op: BinaryOperator::And,
            right,
        } => {
            collect_filters(left, out)?;
            collect_filters(right, out)
        }
        Expr::BinaryOp { left, op, right } => {
            let cmp = match op {
                BinaryOperator::Eq => Cmp::Eq,
                BinaryOperator::GtEq => Cmp::GtEq,
                BinaryOperator::LtEq => Cmp::LtEq,
                other => return Err(SqlError::Unsupported(format!("operator {other}"))),
            };
            let name = expr_column_name(left)
                .ok_or_else(|| SqlError::Unsupported(format!("filter on {left}")))?;
            let column = match Column::parse(&name) {
                Some(Column::Price) => {
                    return Err(SqlError::Unsupported("filter on price".into()));
                }
                Some(column) => column,
                None => return Err(SqlError::UnknownColumn(name)),
            };
            out.push(Filter {
                column,
                cmp,
                value: parse_ts_expr(right)?,
            });
            Ok(())
        }
        other => Err(SqlError::Unsupported(format!("filter {other}"))),
    }
}

/// The one shape allowed on UPDATE and DELETE: `"from" = '…' AND "to" = '…'`.
fn extract_key(selection: Option<&Expr>) -> Result<Span, SqlError> {
    let selection = selection.ok_or(SqlError::MissingFilter("\"from\" = … AND \"to\" = …"))?;
    let mut filters = Vec::new();
    collect_filters(selection, &mut filters)?;
    match filters_to_command(&filters)? {
        Command::SelectOne { key } => Ok(key),
        _ => Err(SqlError::MissingFilter("\"from\" = … AND \"to\" = …")),
    }
}

fn filters_to_command(filters: &[Filter]) -> Result<Command, SqlError> {
    let find = |column: Column, cmp: Cmp| {
        filters
            .iter()
            .find(|f| f.column == column && f.cmp == cmp)
            .map(|f| f.value)
    };

    if filters.iter().any(|f| f.cmp == Cmp::Eq) {
        return match (find(Column::From, Cmp::Eq), find(Column::To, Cmp::Eq), filters.len()) {
            (Some(from), Some(to), 2) => Ok(Command::SelectOne {
                key: checked_span(from, to)?,
            }),
            _ => Err(SqlError::MissingFilter("\"from\" = … AND \"to\" = …")),
        };
    }

    // "to" >= A AND "from" <= B: anything touching [A, B].
    // "from" >= A AND "to" <= B: only what lies inside [A, B].
    let loose_from = find(Column::To, Cmp::GtEq);
    let loose_to = find(Column::From, Cmp::LtEq);
    let strict_from = find(Column::From, Cmp::GtEq);
    let strict_to = find(Column::To, Cmp::LtEq);

    let loose = loose_from.is_some() || loose_to.is_some();
    let strict = strict_from.is_some() || strict_to.is_some();
    let (from, to) = match (loose, strict) {
        (true, true) => {
            return Err(SqlError::Unsupported(
                "mixed overlap and containment range filters".into(),
            ));
        }
        (true, false) => (loose_from, loose_to),
        _ => (strict_from, strict_to),
    };
    if filters.len() > usize::from(from.is_some()) + usize::from(to.is_some()) {
        return Err(SqlError::Unsupported("repeated range filter".into()));
    }
    if let (Some(f), Some(t)) = (from, to) {
        checked_span(f, t)?;
    }
    Ok(Command::SelectRange { from, to, strict })
}

fn checked_span(from: Ts, to: Ts) -> Result<Span, SqlError> {
    if to < from {
        return Err(SqlError::InvalidRange { from, to });
    }
    Ok(Span::new(from, to))
}

// ── Helpers ───────────────────────────────────────────────────

fn expect_table(name: String) -> Result<(), SqlError> {
    if name == TABLE {
        Ok(())
    } else {
        Err(SqlError::UnknownTable(name))
    }
}

fn object_name_last(name: &ast::ObjectName) -> Option<String> {
    name.0.last().and_then(|part| match part {
        ObjectNamePart::Identifier(ident) => Some(ident.value.to_lowercase()),
        _ => None,
    })
}

fn insert_table_name(insert: &ast::Insert) -> Result<String, SqlError> {
    match &insert.table {
        TableObject::TableName(name) => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("unsupported table object in INSERT".into())),
    }
}

fn delete_table_name(delete: &ast::Delete) -> Result<String, SqlError> {
    let tables_with_joins = match &delete.from {
        FromTable::WithFromKeyword(t) | FromTable::WithoutKeyword(t) => t,
    };
    if let Some(first) = tables_with_joins.first() {
        table_factor_name(&first.relation)
    } else {
        Err(SqlError::Parse("DELETE without table".into()))
    }
}

fn table_factor_name(tf: &TableFactor) -> Result<String, SqlError> {
    match tf {
        TableFactor::Table { name, .. } => {
            object_name_last(name).ok_or_else(|| SqlError::Parse("empty table name".into()))
        }
        _ => Err(SqlError::Parse("complex table expression".into())),
    }
}

fn extract_all_insert_rows(insert: &ast::Insert) -> Result<Vec<Vec<Expr>>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => {
            if values.rows.is_empty() {
                return Err(SqlError::Parse("empty VALUES".into()));
            }
            Ok(values.rows.clone())
        }
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

/// Literal text of a value, looking through casts such as `'…'::timestamp`.
fn literal_text(expr: &Expr) -> Result<&str, SqlError> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => match value {
            Value::SingleQuotedString(s) | Value::Number(s, _) => Ok(s.as_str()),
            Value::Null => Err(SqlError::Parse("NULL not allowed".into())),
            _ => Err(SqlError::Parse(format!("expected literal, got {value}"))),
        },
        Expr::Cast { expr, .. } | Expr::Nested(expr) => literal_text(expr),
        _ => Err(SqlError::Parse(format!("expected literal, got {expr}"))),
    }
}

fn parse_ts_expr(expr: &Expr) -> Result<Ts, SqlError> {
    let ts = parse_ts(literal_text(expr)?).map_err(SqlError::Value)?;
    if !(crate::limits::MIN_VALID_TS..=crate::limits::MAX_VALID_TS).contains(&ts) {
        return Err(SqlError::Parse(format!("timestamp {} out of range", format_ts(ts))));
    }
    Ok(ts)
}

fn parse_price_expr(expr: &Expr) -> Result<Price, SqlError> {
    if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr: inner,
    } = expr
    {
        let text = literal_text(inner)?;
        return Err(SqlError::Value(ParseError::NegativePrice(format!("-{text}"))));
    }
    literal_text(expr)?.parse().map_err(SqlError::Value)
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    UnknownColumn(String),
    MissingColumn(&'static str),
    WrongArity(usize, usize),
    MissingFilter(&'static str),
    TooManyRows(usize),
    InvalidRange { from: Ts, to: Ts },
    Value(ParseError),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t} (expected {TABLE})"),
            SqlError::UnknownColumn(c) => write!(f, "unknown column: {c}"),
            SqlError::MissingColumn(c) => write!(f, "missing column: {c}"),
            SqlError::WrongArity(expected, got) => {
                write!(f, "expected {expected} values per row, got {got}")
            }
            SqlError::MissingFilter(shape) => write!(f, "missing filter: WHERE {shape}"),
            SqlError::TooManyRows(n) => {
                write!(f, "too many rows in one INSERT: {n} (max {MAX_INSERT_ROWS})")
            }
            SqlError::InvalidRange { from, to } => write!(
                f,
                "\"to\" ({}) is before \"from\" ({})",
                format_ts(*to),
                format_ts(*from)
            ),
            SqlError::Value(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for SqlError {}
