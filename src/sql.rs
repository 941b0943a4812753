use std::ops::ControlFlow;

use sqlparser::ast::{
    self, Expr, ObjectNamePart, SetExpr, Statement, TableFactor, TableObject, Value, ValueWithSpan, visit_expressions,
    visit_expressions_mut,
};
use sqlparser::dialect::PostgreSqlDialect;
use sqlparser::parser::Parser;
use ulid::Ulid;

use crate::limits::DEFAULT_PAGE_SIZE;
use crate::model::*;

/// Parsed command from SQL input.
#[derive(Debug, PartialEq)]
pub enum Command {
    PutVenue {
        id: Ulid,
        owner_id: Ulid,
        hourly_rate: Money,
        active: bool,
        hours: Option<OpeningHours>,
    },
    CreateBooking {
        venue_id: Ulid,
        customer_id: Ulid,
        start: Ms,
        end: Ms,
        notes: Option<String>,
    },
    ConfirmPayment {
        booking_id: Ulid,
        method: String,
        transaction_id: String,
    },
    CancelBooking {
        booking_id: Ulid,
        actor: Actor,
    },
    /// `outcome` is `Completed` or `NoShow`.
    FinishBooking {
        booking_id: Ulid,
        outcome: BookingStatus,
    },
    GetBooking {
        id: Ulid,
    },
    /// Venue-scoped when `venue_id` is set.
    ListBookings {
        actor: Actor,
        status: Option<BookingStatus>,
        venue_id: Option<Ulid>,
        page: u32,
        page_size: u32,
    },
    SelectAvailability {
        venue_id: Ulid,
        start: Ms,
        end: Ms,
    },
}

/// How a bound `$n` parameter is decoded off the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    Text,
    Int,
}

const MAX_PARAMS: usize = 32;

/// A statement parsed once with its `$n` placeholders left in the tree.
#[derive(Debug, Clone)]
pub struct Prepared {
    statement: Statement,
    table: String,
    params: Vec<ParamKind>,
}

impl Prepared {
    /// Target table, lowercased.
    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn param_kinds(&self) -> &[ParamKind] {
        &self.params
    }

    /// Put the bound values into the parsed tree as literals and interpret
    /// it. Parameter text is never lexed as SQL.
    pub fn bind(&self, params: &[Option<String>]) -> Result<Command, SqlError> {
        if params.len() != self.params.len() {
            return Err(SqlError::Parse(format!(
                "expected {} parameters, got {}",
                self.params.len(),
                params.len()
            )));
        }
        if params.is_empty() {
            return interpret(&self.statement);
        }

        let mut statement = self.statement.clone();
        let _ = visit_expressions_mut(&mut statement, |expr| {
            if let Expr::Value(ValueWithSpan { value, .. }) = expr
                && let Some(i) = placeholder_index(value).map(|n| n - 1)
                && let (Some(bound), Some(kind)) = (params.get(i), self.params.get(i))
            {
                *value = match (bound, kind) {
                    (None, _) => Value::Null,
                    (Some(v), ParamKind::Int) => Value::Number(v.clone(), false),
                    (Some(v), ParamKind::Text) => Value::SingleQuotedString(v.clone()),
                };
            }
            ControlFlow::<()>::Continue(())
        });
        interpret(&statement)
    }
}

/// Parse one statement, keeping `$n` placeholders for a later [`Prepared::bind`].
pub fn prepare(sql: &str) -> Result<Prepared, SqlError> {
    let dialect = PostgreSqlDialect {};
    let mut stmts = Parser::parse_sql(&dialect, sql).map_err(|e| SqlError::Parse(e.to_string()))?;
    if stmts.len() > 1 {
        return Err(SqlError::Unsupported("multiple statements".into()));
    }
    let statement = stmts.pop().ok_or(SqlError::Empty)?;
    let table = statement_table(&statement)?;
    let params = param_kinds(&statement, &table)?;
    Ok(Prepared {
        statement,
        table,
        params,
    })
}

/// Parse and interpret a statement that carries no parameters.
pub fn parse_sql(sql: &str) -> Result<Command, SqlError> {
    prepare(sql)?.bind(&[])
}

fn interpret(statement: &Statement) -> Result<Command, SqlError> {
    match statement {
        Statement::Insert(insert) => parse_insert(insert),
        Statement::Query(query) => parse_select(query),
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn statement_table(statement: &Statement) -> Result<String, SqlError> {
    match statement {
        Statement::Insert(insert) => insert_table_name(insert),
        Statement::Query(query) => {
            let select = select_of(query)?;
            match select.from.first() {
                Some(from) => table_factor_name(&from.relation),
                None => Err(SqlError::Parse("SELECT without FROM".into())),
            }
        }
        other => Err(SqlError::Unsupported(format!("{other}"))),
    }
}

fn select_of(query: &ast::Query) -> Result<&ast::Select, SqlError> {
    match query.body.as_ref() {
        SetExpr::Select(s) => Ok(s.as_ref()),
        _ => Err(SqlError::Unsupported("non-SELECT query".into())),
    }
}

/// `$n` → n, for n >= 1.
fn placeholder_index(value: &Value) -> Option<usize> {
    match value {
        Value::Placeholder(p) => p.strip_prefix('$')?.parse().ok().filter(|n| *n > 0),
        _ => None,
    }
}

/// One kind per placeholder `$1..=$max`. Timestamps and paging take
/// integers; everything else binds as text.
fn param_kinds(statement: &Statement, table: &str) -> Result<Vec<ParamKind>, SqlError> {
    let mut count = 0;
    let flow = visit_expressions(statement, |expr| {
        if let Expr::Value(ValueWithSpan {
            value: value @ Value::Placeholder(_),
            ..
        }) = expr
        {
            match placeholder_index(value) {
                Some(n) if n <= MAX_PARAMS => count = count.max(n),
                _ => return ControlFlow::Break(SqlError::Unsupported(format!("parameter {value}"))),
            }
        }
        ControlFlow::Continue(())
    });
    if let ControlFlow::Break(e) = flow {
        return Err(e);
    }

    let mut kinds = vec![ParamKind::Text; count];
    let mut mark_int = |expr: &Expr| {
        if let Some(n) = extract_value(expr).and_then(placeholder_index)
            && let Some(kind) = kinds.get_mut(n - 1)
        {
            *kind = ParamKind::Int;
        }
    };
    match statement {
        Statement::Insert(insert) if table == "bookings" => {
            if let Ok(values) = extract_insert_values(insert) {
                values.iter().skip(2).take(2).for_each(&mut mark_int);
            }
        }
        Statement::Query(query) => {
            if let Some(selection) = select_of(query).ok().and_then(|s| s.selection.as_ref()) {
                mark_int_filters(selection, &mut mark_int);
            }
        }
        _ => {}
    }
    Ok(kinds)
}

fn mark_int_filters(expr: &Expr, mark: &mut impl FnMut(&Expr)) {
    match expr {
        Expr::Nested(inner) => mark_int_filters(inner, mark),
        Expr::BinaryOp {
            left,
            op: ast::BinaryOperator::And,
            right,
        } => {
            mark_int_filters(left, mark);
            mark_int_filters(right, mark);
        }
        Expr::BinaryOp { left, right, .. } => {
            if matches!(
                expr_column_name(left).as_deref(),
                Some("start" | "end" | "page" | "page_size")
            ) {
                mark(right);
            }
        }
        _ => {}
    }
}

fn parse_insert(insert: &ast::Insert) -> Result<Command, SqlError> {
    let table = insert_table_name(insert)?;
    let values = extract_insert_values(insert)?;

    match table.as_str() {
        "venues" => {
            if values.len() < 3 {
                return Err(SqlError::WrongArity("venues", 3, values.len()));
            }
            let active = match values.get(3) {
                Some(v) => parse_bool_or_null(v)?.unwrap_or(true),
                None => true,
            };
            let hours = match (values.get(4), values.get(5)) {
                (None, None) => None,
                (Some(open), Some(close)) => {
                    match (parse_minute_of_day_or_null(open)?, parse_minute_of_day_or_null(close)?) {
                        (None, None) => None,
                        (Some(o), Some(c)) => Some(
                            OpeningHours::new(o, c)
                                .ok_or_else(|| SqlError::Parse(format!("invalid opening hours {o}..{c}")))?,
                        ),
                        _ => return Err(SqlError::Parse("opens_at and closes_at must both be set".into())),
                    }
                }
                _ => return Err(SqlError::WrongArity("venues", 6, values.len())),
            };
            let hourly_rate = parse_money(&values[2])?;
            if hourly_rate.is_negative() {
                return Err(SqlError::Parse("hourly rate must not be negative".into()));
            }
            Ok(Command::PutVenue {
                id: parse_ulid(&values[0])?,
                owner_id: parse_ulid(&values[1])?,
                hourly_rate,
                active,
                hours,
            })
        }
        "bookings" => {
            if values.len() < 4 {
                return Err(SqlError::WrongArity("bookings", 4, values.len()));
            }
            let notes = match values.get(4) {
                Some(v) => parse_string_or_null(v)?,
                None => None,
            };
            Ok(Command::CreateBooking {
                venue_id: parse_ulid(&values[0])?,
                customer_id: parse_ulid(&values[1])?,
                start: parse_i64(&values[2])?,
                end: parse_i64(&values[3])?,
                notes,
            })
        }
        "payments" => {
            if values.len() < 3 {
                return Err(SqlError::WrongArity("payments", 3, values.len()));
            }
            Ok(Command::ConfirmPayment {
                booking_id: parse_ulid(&values[0])?,
                method: parse_string(&values[1])?,
                transaction_id: parse_string(&values[2])?,
            })
        }
        "cancellations" => {
            if values.len() < 3 {
                return Err(SqlError::WrongArity("cancellations", 3, values.len()));
            }
            Ok(Command::CancelBooking {
                booking_id: parse_ulid(&values[0])?,
                actor: Actor::new(parse_ulid(&values[1])?, parse_role(&values[2])?),
            })
        }
        "completions" => {
            if values.len() < 2 {
                return Err(SqlError::WrongArity("completions", 2, values.len()));
            }
            let outcome = match parse_status(&values[1])? {
                s @ (BookingStatus::Completed | BookingStatus::NoShow) => s,
                other => {
                    return Err(SqlError::Parse(format!(
                        "completion outcome must be completed or no_show, got {other}"
                    )));
                }
            };
            Ok(Command::FinishBooking {
                booking_id: parse_ulid(&values[0])?,
                outcome,
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

fn parse_select(query: &ast::Query) -> Result<Command, SqlError> {
    let select = select_of(query)?;
    let from = select
        .from
        .first()
        .ok_or_else(|| SqlError::Parse("SELECT without FROM".into()))?;
    let table = table_factor_name(&from.relation)?;

    let mut filters = Filters::default();
    if let Some(selection) = &select.selection {
        collect_filters(selection, &mut filters)?;
    }

    match table.as_str() {
        "availability" => {
            let cmd = Command::SelectAvailability {
                venue_id: filters.venue_id.ok_or(SqlError::MissingFilter("venue_id"))?,
                start: filters.start.ok_or(SqlError::MissingFilter("start"))?,
                end: filters.end.ok_or(SqlError::MissingFilter("end"))?,
            };
            filters.only(&table, &["venue_id", "start", "end"])?;
            Ok(cmd)
        }
        "bookings" => {
            if let Some(id) = filters.id {
                filters.only(&table, &["id"])?;
                return Ok(Command::GetBooking { id });
            }
            let actor_id = filters.actor_id.ok_or(SqlError::MissingFilter("actor_id"))?;
            let role = filters.actor_role.ok_or(SqlError::MissingFilter("actor_role"))?;
            filters.only(
                &table,
                &["actor_id", "actor_role", "status", "venue_id", "page", "page_size"],
            )?;
            Ok(Command::ListBookings {
                actor: Actor::new(actor_id, role),
                status: filters.status,
                venue_id: filters.venue_id,
                page: filters.page.unwrap_or(1),
                page_size: filters.page_size.unwrap_or(DEFAULT_PAGE_SIZE),
            })
        }
        _ => Err(SqlError::UnknownTable(table)),
    }
}

#[derive(Default)]
struct Filters {
    id: Option<Ulid>,
    venue_id: Option<Ulid>,
    actor_id: Option<Ulid>,
    actor_role: Option<Role>,
    status: Option<BookingStatus>,
    start: Option<Ms>,
    end: Option<Ms>,
    page: Option<u32>,
    page_size: Option<u32>,
}

impl Filters {
    fn given(&self) -> Vec<&'static str> {
        [
            ("id", self.id.is_some()),
            ("venue_id", self.venue_id.is_some()),
            ("actor_id", self.actor_id.is_some()),
            ("actor_role", self.actor_role.is_some()),
            ("status", self.status.is_some()),
            ("start", self.start.is_some()),
            ("end", self.end.is_some()),
            ("page", self.page.is_some()),
            ("page_size", self.page_size.is_some()),
        ]
        .into_iter()
        .filter_map(|(name, set)| set.then_some(name))
        .collect()
    }

    /// Reject any filter the query on `table` would not honour.
    fn only(&self, table: &str, allowed: &[&str]) -> Result<(), SqlError> {
        match self.given().into_iter().find(|f| !allowed.contains(f)) {
            Some(extra) => Err(SqlError::Unsupported(format!("filter on {extra} for {table}"))),
            None => Ok(()),
        }
    }
}

fn collect_filters(expr: &Expr, filters: &mut Filters) -> Result<(), SqlError> {
    match expr {
        Expr::Nested(inner) => collect_filters(inner, filters)?,
        Expr::BinaryOp { left, op, right } => match op {
            ast::BinaryOperator::And => {
                collect_filters(left, filters)?;
                collect_filters(right, filters)?;
            }
            ast::BinaryOperator::Eq => match expr_column_name(left).as_deref() {
                Some("id") => filters.id = Some(parse_ulid(right)?),
                Some("venue_id") => filters.venue_id = Some(parse_ulid(right)?),
                Some("actor_id") => filters.actor_id = Some(parse_ulid(right)?),
                Some("actor_role") => filters.actor_role = Some(parse_role(right)?),
                Some("status") => filters.status = Some(parse_status(right)?),
                Some("page") => filters.page = Some(parse_u32(right)?),
                Some("page_size") => filters.page_size = Some(parse_u32(right)?),
                Some(other) => return Err(SqlError::Unsupported(format!("filter on {other}"))),
                None => return Err(SqlError::Parse(format!("expected column, got {left}"))),
            },
            ast::BinaryOperator::GtEq | ast::BinaryOperator::LtEq => {
                match (expr_column_name(left).as_deref(), op) {
                    (Some("start"), ast::BinaryOperator::GtEq) => filters.start = Some(parse_i64(right)?),
                    (Some("end"), ast::BinaryOperator::LtEq) => filters.end = Some(parse_i64(right)?),
                    _ => return Err(SqlError::Unsupported(format!("filter {left} {op}"))),
                }
            }
            other => return Err(SqlError::Unsupported(format!("operator {other}"))),
        },
        other => return Err(SqlError::Unsupported(format!("WHERE clause {other}"))),
    }
    Ok(())
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

fn is_null(expr: &Expr) -> bool {
    matches!(extract_value(expr), Some(Value::Null))
}

/// Quoted string or bare number, as text.
fn parse_text(expr: &Expr) -> Result<&str, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s) | Value::Number(s, _)) => Ok(s.as_str()),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_ulid(expr: &Expr) -> Result<Ulid, SqlError> {
    let s = parse_text(expr)?;
    Ulid::from_string(s).map_err(|e| SqlError::Parse(format!("bad ULID: {e}")))
}

fn parse_i64(expr: &Expr) -> Result<i64, SqlError> {
    if let Expr::UnaryOp {
        op: ast::UnaryOperator::Minus,
        expr,
    } = expr
    {
        return parse_i64(expr)?
            .checked_neg()
            .ok_or_else(|| SqlError::Parse("i64 overflow".into()));
    }
    parse_text(expr)?
        .parse()
        .map_err(|e| SqlError::Parse(format!("bad i64: {e}")))
}

fn parse_u32(expr: &Expr) -> Result<u32, SqlError> {
    let v = parse_i64(expr)?;
    u32::try_from(v).map_err(|_| SqlError::Parse(format!("{v} out of u32 range")))
}

fn parse_money(expr: &Expr) -> Result<Money, SqlError> {
    parse_text(expr)?
        .parse()
        .map_err(|e: ParseMoneyError| SqlError::Parse(e.to_string()))
}

fn parse_string(expr: &Expr) -> Result<String, SqlError> {
    match extract_value(expr) {
        Some(Value::SingleQuotedString(s)) => Ok(s.clone()),
        Some(value) => Err(SqlError::Parse(format!("expected string, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

fn parse_string_or_null(expr: &Expr) -> Result<Option<String>, SqlError> {
    if is_null(expr) {
        return Ok(None);
    }
    parse_string(expr).map(Some)
}

fn parse_role(expr: &Expr) -> Result<Role, SqlError> {
    parse_text(expr)?.parse().map_err(SqlError::Parse)
}

fn parse_status(expr: &Expr) -> Result<BookingStatus, SqlError> {
    parse_text(expr)?.parse().map_err(SqlError::Parse)
}

fn parse_bool_or_null(expr: &Expr) -> Result<Option<bool>, SqlError> {
    match extract_value(expr) {
        Some(Value::Null) => Ok(None),
        Some(Value::Boolean(b)) => Ok(Some(*b)),
        Some(Value::SingleQuotedString(s)) => match s.to_lowercase().as_str() {
            "true" | "t" | "1" => Ok(Some(true)),
            "false" | "f" | "0" => Ok(Some(false)),
            _ => Err(SqlError::Parse(format!("bad bool: {s}"))),
        },
        Some(Value::Number(n, _)) => Ok(Some(n != "0")),
        Some(value) => Err(SqlError::Parse(format!("expected bool, got {value:?}"))),
        None => Err(SqlError::Parse(format!("expected value, got {expr}"))),
    }
}

/// Minutes after midnight, given as a number or as `'HH:MM'`.
fn parse_minute_of_day_or_null(expr: &Expr) -> Result<Option<u16>, SqlError> {
    if is_null(expr) {
        return Ok(None);
    }
    let text = parse_text(expr)?;
    let minutes = match text.split_once(':') {
        Some((h, m)) => {
            let h: u16 = h.parse().map_err(|_| SqlError::Parse(format!("bad time: {text}")))?;
            let m: u16 = m.parse().map_err(|_| SqlError::Parse(format!("bad time: {text}")))?;
            if m >= 60 {
                return Err(SqlError::Parse(format!("bad time: {text}")));
            }
            h.checked_mul(60).and_then(|h| h.checked_add(m))
        }
        None => text.parse().ok(),
    };
    minutes
        .filter(|m| *m <= 1440)
        .map(Some)
        .ok_or_else(|| SqlError::Parse(format!("bad time: {text}")))
}

// ── Errors ────────────────────────────────────────────────────

#[derive(Debug, PartialEq)]
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
