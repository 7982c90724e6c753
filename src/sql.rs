use sqlparser::ast::{self, BinaryOperator, Expr, FromTable, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value, ValueWithSpan};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    InsertFacility {
        id: Ulid,
        name: String,
    },
    InsertEquipment {
        id: Ulid,
        name: String,
        quantity: u32,
    },
    SetResourceActive {
        resource: ResourceRef,
        active: bool,
    },
    InsertReservation {
        id: ReservationId,
        purpose: String,
        attendees: Option<u32>,
        items: Vec<ItemRequest>,
    },
    UpdateReservationItems {
        reservation_id: ReservationId,
        request_id: Option<Ulid>,
        items: Vec<ItemRequest>,
    },
    CancelReservation {
        id: ReservationId,
    },
    InsertApprovalLog {
        reservation_id: ReservationId,
        action: ApprovalAction,
        comment: Option<String>,
        request_id: Option<Ulid>,
    },
    SelectResources,
    SelectReservations {
        id: Option<ReservationId>,
        requester: Option<UserId>,
    },
    SelectItems {
        reservation_id: ReservationId,
    },
    SelectApprovalLogs {
        reservation_id: ReservationId,
    },
    SelectAudits {
        reservation_id: ReservationId,
    },
    SelectConflicts {
        reservation_id: ReservationId,
    },
    SelectAvailability {
        resource: ResourceRef,
        start: Ms,
        end: Ms,
    },
    SelectCapacity {
        resource: ResourceRef,
        start: Ms,
        end: Ms,
        exclude: Option<ReservationId>,
    },
    Listen {
        channel: String,
    },
}

pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    let trimmed = sql.trim();
    if trimmed.to_uppercase().starts_with("LISTEN ") {
        let channel = trimmed[7..].trim().trim_matches(';').trim_matches('"').to_string();
        return Ok(Command::Listen { channel });
    }

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

// ── INSERT ────────────────────────────────────────────────────

/// One VALUES row, addressed by column name. Without a column list the
/// table's documented column order applies.
struct Row<'a> {
    columns: &'a [String],
    values: &'a [Expr],
}

impl<'a> Row<'a> {
    fn get(&self, column: &str) -> Option<&'a Expr> {
        self.columns
            .iter()
            .position(|c| c == column)
            .and_then(|i| self.values.get(i))
    }

    fn require(&self, column: &'static str) -> Result<&'a Expr, SqlError> {
        self.get(column).ok_or(SqlError::MissingColumn(column))
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let defaults: &[&str] = match table.as_str() {
        "facilities" => &["id", "name"],
        "equipment" => &["id", "name", "quantity"],
        "resource_activity" => &["resource", "active"],
        "reservations" => &["id", "purpose", "attendees", "resource", "start", "end", "quantity"],
        "reservation_edits" => &["reservation_id", "resource", "start", "end", "quantity", "request_id"],
        "approval_logs" => &["reservation_id", "action", "comment", "id"],
        _ => return Err(SqlError::UnknownTable(table)),
    };
    let columns: Vec<String> = if insert.columns.is_empty() {
        defaults.iter().map(|c| c.to_string()).collect()
    } else {
        insert.columns.iter().map(|c| c.value.to_lowercase()).collect()
    };
    let rows = extract_all_insert_rows(insert)?;
    let rows: Vec<Row<'_>> = rows
        .iter()
        .map(|values| Row { columns: &columns, values })
        .collect();
    let first = &rows[0];

    match table.as_str() {
        "facilities" => Ok(Command::InsertFacility {
            id: parse_ulid_expr(first.require("id")?)?,
            name: parse_string_expr(first.require("name")?)?,
        }),
        "equipment" => Ok(Command::InsertEquipment {
            id: parse_ulid_expr(first.require("id")?)?,
            name: parse_string_expr(first.require("name")?)?,
            quantity: first.get("quantity").map(parse_u32).transpose()?.unwrap_or(1),
        }),
        "resource_activity" => Ok(Command::SetResourceActive {
            resource: parse_resource_expr(first.require("resource")?)?,
            active: parse_bool(first.require("active")?)?,
        }),
        "reservations" => {
            let id = parse_ulid_expr(first.require("id")?)?;
            let purpose = parse_string_expr(first.require("purpose")?)?;
            let attendees = match first.get("attendees") {
                Some(e) => parse_i64_or_null(e)?
                    .map(|v| u32::try_from(v).map_err(|_| SqlError::Invalid(format!("{v} attendees"))))
                    .transpose()?,
                None => None,
            };
            let mut items = Vec::with_capacity(rows.len());
            for (i, row) in rows.iter().enumerate() {
                let row_id = parse_ulid_expr(row.require("id")?)?;
                if row_id != id {
                    return Err(SqlError::Invalid(format!(
                        "row {i}: every row must repeat reservation id {id}"
                    )));
                }
                items.push(parse_item(row).map_err(|e| e.in_row(i))?);
            }
            Ok(Command::InsertReservation { id, purpose, attendees, items })
        }
        "reservation_edits" => {
            let reservation_id = parse_ulid_expr(first.require("reservation_id")?)?;
            let request_id = first.get("request_id").map(parse_ulid_or_null).transpose()?.flatten();
            let mut items = Vec::with_capacity(rows.len());
            for (i, row) in rows.iter().enumerate() {
                if parse_ulid_expr(row.require("reservation_id")?)? != reservation_id {
                    return Err(SqlError::Invalid(format!(
                        "row {i}: every row must edit reservation {reservation_id}"
                    )));
                }
                items.push(parse_item(row).map_err(|e| e.in_row(i))?);
            }
            Ok(Command::UpdateReservationItems { reservation_id, request_id, items })
        }
        "approval_logs" => {
            let action = parse_string_expr(first.require("action")?)?;
            Ok(Command::InsertApprovalLog {
                reservation_id: parse_ulid_expr(first.require("reservation_id")?)?,
                action: action.parse::<ApprovalAction>().map_err(SqlError::Invalid)?,
                comment: first.get("comment").map(parse_string_or_null).transpose()?.flatten(),
                request_id: first.get("id").map(parse_ulid_or_null).transpose()?.flatten(),
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_item(row: &Row<'_>) -> Result<ItemRequest, SqlError> {
    let resource = parse_resource_expr(row.require("resource")?)?;
    let start = parse_i64_expr(row.require("start")?)?;
    let end = parse_i64_expr(row.require("end")?)?;
    let interval = TimeInterval::new(start, end).map_err(|e| SqlError::Invalid(e.to_string()))?;
    let quantity = row.get("quantity").map(parse_u32).transpose()?.unwrap_or(1);
    Ok(ItemRequest { resource, interval, quantity })
}

// ── DELETE ────────────────────────────────────────────────────

fn parse_delete(delete: &ast::Delete) -> Result<Command, SqlError> {
    let table = delete_table_name(delete)?;
    let id = extract_where_id(&delete.selection)?;

    match table.as_str() {
        "reservations" => Ok(Command::CancelReservation { id }),
        _ => Err(SqlError::UnknownTable(table)),
    }
}

// ── SELECT ────────────────────────────────────────────────────

/// `column op value` terms of a WHERE clause made only of ANDs.
struct Filters<'a> {
    terms: Vec<(String, &'a BinaryOperator, &'a Expr)>,
}

impl<'a> Filters<'a> {
    fn from_selection(selection: Option<&'a Expr>) -> Result<Self, SqlError> {
        let mut terms = Vec::new();
        if let Some(expr) = selection {
            collect_terms(expr, &mut terms)?;
        }
        Ok(Self { terms })
    }

    fn find(&self, column: &str, op: BinaryOperator) -> Option<&'a Expr> {
        self.terms
            .iter()
            .find(|(c, o, _)| c == column && **o == op)
            .map(|(_, _, e)| *e)
    }

    fn eq(&self, column: &str) -> Option<&'a Expr> {
        self.find(column, BinaryOperator::Eq)
    }

    fn require_eq(&self, column: &'static str) -> Result<&'a Expr, SqlError> {
        self.eq(column).ok_or(SqlError::MissingFilter(column))
    }

    /// `start >= a AND "end" <= b`
    fn window(&self) -> Result<(Ms, Ms), SqlError> {
        let start = self
            .find("start", BinaryOperator::GtEq)
            .ok_or(SqlError::MissingFilter("start"))?;
        let end = self
            .find("end", BinaryOperator::LtEq)
            .ok_or(SqlError::MissingFilter("end"))?;
        Ok((parse_i64_expr(start)?, parse_i64_expr(end)?))
    }
}

fn collect_terms<'a>(expr: &'a Expr, out: &mut Vec<(String, &'a BinaryOperator, &'a Expr)>) -> Result<(), SqlError> {
    match expr {
        Expr::BinaryOp {
            left,
            op: BinaryOperator::And,
            right,
        } => {
            collect_terms(left, out)?;
            collect_terms(right, out)
        }
        Expr::BinaryOp { left, op, right } => {
            let column = expr_column_name(left)
                .ok_or_else(|| SqlError::Unsupported(format!("filter on {left}")))?;
            out.push((column, op, right.as_ref()));
            Ok(())
        }
        Expr::Nested(inner) => collect_terms(inner, out),
        other => Err(SqlError::Unsupported(format!("filter {other}"))),
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
    let filters = Filters::from_selection(select.selection.as_ref())?;

    match table.as_str() {
        "resources" => Ok(Command::SelectResources),
        "reservations" => Ok(Command::SelectReservations {
            id: filters.eq("id").map(parse_ulid_expr).transpose()?,
            requester: filters.eq("requester_id").map(parse_ulid_expr).transpose()?,
        }),
        "reservation_items" => Ok(Command::SelectItems {
            reservation_id: parse_ulid_expr(filters.require_eq("reservation_id")?)?,
        }),
        "approval_logs" => Ok(Command::SelectApprovalLogs {
            reservation_id: parse_ulid_expr(filters.require_eq("reservation_id")?)?,
        }),
        "reservation_audits" => Ok(Command::SelectAudits {
            reservation_id: parse_ulid_expr(filters.require_eq("reservation_id")?)?,
        }),
        "conflicts" => Ok(Command::SelectConflicts {
            reservation_id: parse_ulid_expr(filters.require_eq("reservation_id")?)?,
        }),
        "availability" => {
            let (start, end) = filters.window()?;
            Ok(Command::SelectAvailability {
                resource: parse_resource_expr(filters.require_eq("resource")?)?,
                start,
                end,
            })
        }
        "capacity" => {
            let (start, end) = filters.window()?;
            Ok(Command::SelectCapacity {
                resource: parse_resource_expr(filters.require_eq("resource")?)?,
                start,
                end,
                exclude: filters.eq("exclude").map(parse_ulid_expr).transpose()?,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
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

fn extract_where_id(selection: &Option<Expr>) -> Result<Ulid, SqlError> {
    let filters = Filters::from_selection(selection.as_ref())?;
    parse_ulid_expr(filters.require_eq("id")?)
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

fn parse_string_expr(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.clone()),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr:?}"))),
    }
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        _ => parse_string_expr(expr).map(Some),
    }
}

fn parse_resource_expr(expr: &Expr) -> Result<ResourceRef, SqlError> {
    parse_string_expr(expr)?
        .parse()
        .map_err(|e: BadResourceRef| SqlError::Invalid(e.to_string()))
}

fn parse_ulid_expr(expr: &Expr) -> Result<Ulid, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::SingleQuotedString(s) | Value::Number(s, _) => {
                Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
            }
            _ => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_ulid_or_null(expr: &Expr) -> Result<Option<Ulid>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        _ => parse_ulid_expr(expr).map(Some),
    }
}

fn parse_i64_expr(expr: &Expr) -> Result<i64, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Number(s, _) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
            Value::SingleQuotedString(s) => s
                .parse()
                .map_err(|e| SqlError::Parse(format!("bad i64: {e}"))),
            _ => Err(SqlError::Parse(format!("expected number, got {value:?}"))),
        }
    } else if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        Ok(-parse_i64_expr(expr)?)
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

fn parse_i64_or_null(expr: &Expr) -> Result<Option<i64>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        _ => parse_i64_expr(expr).map(Some),
    }
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64_expr(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Invalid(format!("{v} out of u32 range")))
}

fn parse_bool(expr: &Expr) -> Result<bool, SqlError> {
    if let Some(value) = extract_value(expr) {
        match value {
            Value::Boolean(b) => Ok(*b),
            Value::SingleQuotedString(s) => match s.to_lowercase().as_str() {
                "true" | "t" | "1" => Ok(true),
                "false" | "f" | "0" => Ok(false),
                _ => Err(SqlError::Parse(format!("bad bool: {s}"))),
            },
            Value::Number(n, _) => Ok(n != "0"),
            _ => Err(SqlError::Parse(format!("expected bool, got {value:?}"))),
        }
    } else {
        Err(SqlError::Parse(format!("expected value, got {expr:?}")))
    }
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug)]
pub enum SqlError {
    Parse(String),
    Empty,
    Unsupported(String),
    UnknownTable(String),
    MissingColumn(&'static str),
    MissingFilter(&'static str),
    /// Well-formed SQL carrying a value the domain cannot accept.
    Invalid(String),
}

impl SqlError {
    fn in_row(self, row: usize) -> Self {
        match self {
            SqlError::Parse(s) => SqlError::Parse(format!("row {row}: {s}")),
            SqlError::Invalid(s) => SqlError::Invalid(format!("row {row}: {s}")),
            other => other,
        }
    }
}

impl std::fmt::Display for SqlError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SqlError::Parse(s) => write!(f, "parse error: {s}"),
            SqlError::Empty => write!(f, "empty query"),
            SqlError::Unsupported(s) => write!(f, "unsupported: {s}"),
            SqlError::UnknownTable(t) => write!(f, "unknown table: {t}"),
            SqlError::MissingColumn(col) => write!(f, "missing column: {col}"),
            SqlError::MissingFilter(col) => write!(f, "missing filter: {col}"),
            SqlError::Invalid(s) => write!(f, "invalid value: {s}"),
        }
    }
}

impl std::error::Error for SqlError {}
