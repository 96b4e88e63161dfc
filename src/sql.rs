use chrono::NaiveDate;
use sqlparser::ast::{self, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value, ValueWithSpan};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertReservation {
        id: Ulid,
        date: NaiveDate,
        start: ClockTime,
        end: ClockTime,
        name: String,
        email: String,
        phone: String,
        message: Option<String>,
    },
    InsertEvent {
        reservation_id: Ulid,
        event: LifecycleEvent,
    },
    InsertMeetingLink {
        reservation_id: Ulid,
        meeting_ref: String,
    },
    DeleteReservation {
        id: Ulid,
    },
    SelectSlots {
        date: NaiveDate,
    },
    SelectAvailability {
        date: NaiveDate,
        start: ClockTime,
        end: ClockTime,
    },
    SelectReservations {
        id: Option<Ulid>,
        date: Option<NaiveDate>,
    },
    /// `today` anchors the "upcoming" count; the server date when absent.
    SelectStats {
        today: Option<NaiveDate>,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let dialect = PostgreSqlDialect {};
    let stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.is_empty() {
        return Err(SqlError::Empty);
    }

    match &stmts[0] {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Delete(delete) => parse_delete(delete),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let values = extract_insert_values(insert)?;

    match table.as_str() {
        "reservations" => {
            if values.len() < 7 {
                return Err(SqlError::WrongArity("reservations", 7, values.len()));
            }
            let message = match values.get(7) {
                Some(expr) => parse_string_or_null(expr)?,
                None => None,
            };
            Ok(Command::InsertReservation {
                id: parse_ulid(&values[0])?,
                date: parse_date_expr(&values[1])?,
                start: parse_time_expr(&values[2])?,
                end: parse_time_expr(&values[3])?,
                name: parse_string_or_null(&values[4])?.unwrap_or_default(),
                email: parse_string_or_null(&values[5])?.unwrap_or_default(),
                phone: parse_string_or_null(&values[6])?.unwrap_or_default(),
                message,
            })
        }
        "reservation_events" => {
            if values.len() < 2 {
                return Err(SqlError::WrongArity("reservation_events", 2, values.len()));
            }
            let name = parse_string(&values[1])?;
            let event = LifecycleEvent::parse(&name)
                .ok_or_else(|| SqlError::Parse(format!("unknown event: {name}")))?;
            Ok(Command::InsertEvent {
                reservation_id: parse_ulid(&values[0])?,
                event,
            })
        }
        "meeting_links" => {
            if values.len() < 2 {
                return Err(SqlError::WrongArity("meeting_links", 2, values.len()));
            }
            Ok(Command::InsertMeetingLink {
                reservation_id: parse_ulid(&values[0])?,
                meeting_ref: parse_string(&values[1])?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = extract_where_id(&delete.selection)?;

    match table.as_str() {
        "reservations" => Ok(Command::DeleteReservation { id }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = match query.body.as_ref() {
        SetExpr::Select(s) => s,
        _ => return Err(SqlError::Unsupported("non-SELECT query".into())),
    };

    if select.from.is_empty() {
        return Err(SqlError::Parse("SELECT without FROM".into()));
    }
    let table = table_factor_name(&select.from[0].relation)?;

    let mut filters = Vec::new();
    if let Some(selection) = &select.selection {
        collect_eq_filters(selection, &mut filters)?;
    }
    let allowed: &[&str] = match table.as_str() {
        "slots" => &["date"],
        "availability" => &["date", "start", "end"],
        "reservations" => &["id", "date"],
        "stats" => &["today"],
        _ => return Err(SqlError::UnknownTable(table)),
    };
    if let Some((col, _)) = filters.iter().find(|(col, _)| !allowed.contains(&col.as_str())) {
        return Err(SqlError::Unsupported(format!("filter on {table}.{col}")));
    }
    let filter = |name: &str| filters.iter().find(|(col, _)| col == name).map(|(_, e)| *e);

    match table.as_str() {
        "slots" => Ok(Command::SelectSlots {
            date: parse_date_expr(filter("date").ok_or(SqlError::MissingFilter("date"))?)?,
        }),
        "availability" => Ok(Command::SelectAvailability {
            date: parse_date_expr(filter("date").ok_or(SqlError::MissingFilter("date"))?)?,
            start: parse_time_expr(filter("start").ok_or(SqlError::MissingFilter("start"))?)?,
            end: parse_time_expr(filter("end").ok_or(SqlError::MissingFilter("end"))?)?,
        }),
        "reservations" => Ok(Command::SelectReservations {
            id: filter("id").map(parse_ulid).transpose()?,
            date: filter("date").map(parse_date_expr).transpose()?,
        }),
        _ => Ok(Command::SelectStats {
            today: filter("today").map(parse_date_expr).transpose()?,
        }),
    }
}

/// Flatten `a = x AND (b = y AND c = z)` into `[(a, x), (b, y), (c, z)]`.
fn collect_eq_filters<'a>(expr: &'a Expr, out: &mut Vec<(String, &'a Expr)>) -> Result<(), SqlError> {
    match expr {
        Expr::Nested(inner) => collect_eq_filters(inner, out),
        Expr::BinaryOp { left, op, right } => match op {
            ast::BinaryOperator::And => {
                collect_eq_filters(left, out)?;
                collect_eq_filters(right, out)
            }
            ast::BinaryOperator::Eq => {
                let col = expr_column_name(left)
                    .ok_or_else(|| SqlError::Unsupported(format!("filter {expr}")))?;
                out.push((col, right.as_ref()));
                Ok(())
            }
            _ => Err(SqlError::Unsupported(format!("operator {op}"))),
        },
        _ => Err(SqlError::Unsupported(format!("filter {expr}"))),
    }
}

// ── Helpers ───────────────────────────────────────────────────

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

fn extract_insert_values(insert: &ast::Insert) -> Result<Vec<Expr>, SqlError> {
    let body = insert
        .source
        .as_ref()
        .ok_or(SqlError::Parse("no VALUES".into()))?;
    match body.body.as_ref() {
        SetExpr::Values(values) => match values.rows.as_slice() {
            [] => Err(SqlError::Parse("empty VALUES".into())),
            [row] => Ok(row.clone()),
            _ => Err(SqlError::Unsupported("multi-row INSERT".into())),
        },
        _ => Err(SqlError::Parse("expected VALUES".into())),
    }
}

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    let sel = selection.as_ref().ok_or(SqlError::MissingFilter("id"))?;
    match sel {
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::Eq,
            right,
        } => {
            if expr_column_name(left).as_deref() == Some("id") {
                parse_ulid(right)
            } else {
                Err(SqlError::MissingFilter("id"))
            }
        }
        _ => Err(SqlError::MissingFilter("id")),
    }
}

fn expr_column_name(expr: &Expr) -> Option<String> {
    match expr {
        Expr::Identifier(ident) => Some(ident.value.to_lowercase()),
        Expr::CompoundIdentifier(parts) => parts.last().map(|i| i.value.to_lowercase()),
        _ => None,
    }
}

fn extract_value(expr: &Expr) -> Option<&Value> {
    match expr {
        Expr::Value(ValueWithSpan { value, .. }) => Some(value),
        _ => None,
    }
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        Some(Value::SingleQuotedString(s)) => Ok(Some(s.clone())),
        Some(value) => Err(SqlError::Parse(format!("expected string or NULL, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    parse_string_or_null(expr)?.ok_or_else(|| SqlError::Parse("unexpected NULL".into()))
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    let s = parse_string(expr)?;
    Ulid::from_string(&s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
}

fn parse_date_expr(expr: &Expr) -> Result<NaiveDate, SqlError> {
    let s = parse_string(expr)?;
    parse_date(&s).ok_or_else(|| SqlError::Parse(format!("bad date {s:?} (expected YYYY-MM-DD)")))
}

fn parse_time_expr(expr: &Expr) -> Result<ClockTime, SqlError> {
    let s = parse_string(expr)?;
    s.parse().map_err(|e: ParseTimeError| SqlError::Parse(e.to_string()))
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    WrongArity(&'static str, usize, usize),
    MissingFilter(&'static str),
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::WrongArity(t, expected, got) => {
                write!(f, "{t}: expected {expected} values, got {got}")
            }
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
        }
    }
}

impl std::error::Error for SqlError {}
