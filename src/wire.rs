use std::fmt::Debug;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::Sink;
use futures::stream;
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo, QueryResponse,
    Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;

use crate::auth::CourtbookAuthSource;
use crate::engine::{Engine, EngineError};
use crate::model::*;
use crate::observability::{QUERIES_TOTAL, QUERY_DURATION_SECONDS, command_label};
use crate::sql::{self, Command, ParamKind, Prepared, SqlError};
use crate::store::{StoreError, WalStore};

pub struct CourtbookHandler {
    engine: Arc<Engine>,
    store: Arc<WalStore>,
    query_parser: Arc<CourtbookQueryParser>,
}

impl CourtbookHandler {
    pub fn new(engine: Arc<Engine>, store: Arc<WalStore>) -> Self {
        Self {
            engine,
            store,
            query_parser: Arc::new(CourtbookQueryParser),
        }
    }

    async fn execute(&self, cmd: Command) -> PgWireResult<Vec<Response>> {
        let label = command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        metrics::histogram!(QUERY_DURATION_SECONDS, "command" => label).record(started.elapsed().as_secs_f64());
        result
    }

    async fn execute_command(&self, cmd: Command) -> PgWireResult<Vec<Response>> {
        let engine = &self.engine;
        match cmd {
            Command::PutVenue {
                id,
                owner_id,
                hourly_rate,
                active,
                hours,
            } => {
                let venue = Venue {
                    id,
                    owner_id,
                    hourly_rate,
                    hours,
                    active,
                };
                self.store.put_venue(venue).await.map_err(store_err)?;
                Ok(vec![Response::Execution(Tag::new("INSERT").with_rows(1))])
            }
            Command::CreateBooking {
                venue_id,
                customer_id,
                start,
                end,
                notes,
            } => {
                let req = BookingRequest {
                    customer_id,
                    venue_id,
                    start,
                    end,
                    notes,
                };
                let booking = engine.create_booking(req).await.map_err(engine_err)?;
                booking_response(vec![booking])
            }
            Command::ConfirmPayment {
                booking_id,
                method,
                transaction_id,
            } => {
                let payment = PaymentRef { method, transaction_id };
                let booking = engine
                    .confirm_payment(booking_id, payment)
                    .await
                    .map_err(engine_err)?;
                booking_response(vec![booking])
            }
            Command::CancelBooking { booking_id, actor } => {
                let outcome = engine
                    .cancel_booking(booking_id, &actor)
                    .await
                    .map_err(engine_err)?;
                refund_response(outcome)
            }
            Command::FinishBooking { booking_id, outcome } => {
                let booking = match outcome {
                    BookingStatus::NoShow => engine.mark_no_show(booking_id).await,
                    _ => engine.mark_completed(booking_id).await,
                }
                .map_err(engine_err)?;
                booking_response(vec![booking])
            }
            Command::GetBooking { id } => {
                let booking = engine.get_booking(id).await.map_err(engine_err)?;
                booking_response(vec![booking])
            }
            Command::ListBookings {
                actor,
                status,
                venue_id: Some(venue_id),
                page,
                page_size,
            } => {
                if status.is_some() {
                    return Err(user_error(
                        "0A000",
                        "status filter is not supported together with venue_id".into(),
                    ));
                }
                let page = engine
                    .venue_bookings(venue_id, &actor, page, page_size)
                    .await
                    .map_err(engine_err)?;
                booking_response(page.items)
            }
            Command::ListBookings {
                actor,
                status,
                venue_id: None,
                page,
                page_size,
            } => {
                let filter = BookingFilter {
                    status,
                    page,
                    page_size,
                    ..BookingFilter::default()
                };
                let page = engine.list_bookings(&actor, filter).await.map_err(engine_err)?;
                booking_response(page.items)
            }
            Command::SelectAvailability { venue_id, start, end } => {
                let slots = engine
                    .free_slots(venue_id, start, end)
                    .await
                    .map_err(engine_err)?;

                let schema = Arc::new(availability_schema());
                let vid = venue_id.to_string();
                let rows: Vec<PgWireResult<_>> = slots
                    .into_iter()
                    .map(|slot| {
                        let mut encoder = DataRowEncoder::new(schema.clone());
                        encoder.encode_field(&vid)?;
                        encoder.encode_field(&slot.start)?;
                        encoder.encode_field(&slot.end)?;
                        Ok(encoder.take_row())
                    })
                    .collect();

                Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
            }
        }
    }
}

// ── Result rows ──────────────────────────────────────────────────

fn text_field(name: &str, ty: Type) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, ty, FieldFormat::Text)
}

fn booking_schema() -> Vec<FieldInfo> {
    vec![
        text_field("id", Type::VARCHAR),
        text_field("venue_id", Type::VARCHAR),
        text_field("customer_id", Type::VARCHAR),
        text_field("start", Type::INT8),
        text_field("end", Type::INT8),
        text_field("status", Type::VARCHAR),
        text_field("total_amount", Type::NUMERIC),
        text_field("notes", Type::VARCHAR),
        text_field("payment_method", Type::VARCHAR),
        text_field("transaction_id", Type::VARCHAR),
        text_field("created_at", Type::INT8),
        text_field("updated_at", Type::INT8),
    ]
}

fn refund_schema() -> Vec<FieldInfo> {
    vec![
        text_field("booking_id", Type::VARCHAR),
        text_field("refund_percent", Type::INT4),
        text_field("refund_amount", Type::NUMERIC),
        text_field("payment_method", Type::VARCHAR),
        text_field("transaction_id", Type::VARCHAR),
    ]
}

fn availability_schema() -> Vec<FieldInfo> {
    vec![
        text_field("venue_id", Type::VARCHAR),
        text_field("start", Type::INT8),
        text_field("end", Type::INT8),
    ]
}

fn booking_response(bookings: Vec<Booking>) -> PgWireResult<Vec<Response>> {
    let schema = Arc::new(booking_schema());
    let rows: Vec<PgWireResult<_>> = bookings
        .into_iter()
        .map(|b| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encoder.encode_field(&b.id.to_string())?;
            encoder.encode_field(&b.venue_id.to_string())?;
            encoder.encode_field(&b.customer_id.to_string())?;
            encoder.encode_field(&b.span.start)?;
            encoder.encode_field(&b.span.end)?;
            encoder.encode_field(&b.status.as_str().to_string())?;
            encoder.encode_field(&b.total_amount.to_string())?;
            encoder.encode_field(&b.notes)?;
            encoder.encode_field(&b.payment.as_ref().map(|p| p.method.clone()))?;
            encoder.encode_field(&b.payment.as_ref().map(|p| p.transaction_id.clone()))?;
            encoder.encode_field(&b.created_at)?;
            encoder.encode_field(&b.updated_at)?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
}

fn refund_response(outcome: RefundOutcome) -> PgWireResult<Vec<Response>> {
    let schema = Arc::new(refund_schema());
    let mut encoder = DataRowEncoder::new(schema.clone());
    encoder.encode_field(&outcome.booking_id.to_string())?;
    encoder.encode_field(&i32::from(outcome.percent))?;
    encoder.encode_field(&outcome.amount.to_string())?;
    encoder.encode_field(&outcome.payment.as_ref().map(|p| p.method.clone()))?;
    encoder.encode_field(&outcome.payment.as_ref().map(|p| p.transaction_id.clone()))?;
    let rows = vec![Ok(encoder.take_row())];
    Ok(vec![Response::Query(QueryResponse::new(schema, stream::iter(rows)))])
}

/// Result columns for statements against `table`.
fn result_schema(table: &str) -> Vec<FieldInfo> {
    match table {
        "availability" => availability_schema(),
        "cancellations" => refund_schema(),
        "bookings" | "payments" | "completions" => booking_schema(),
        _ => vec![],
    }
}

#[async_trait]
impl SimpleQueryHandler for CourtbookHandler {
    async fn do_query<C>(&self, _client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        self.execute(cmd).await
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct CourtbookQueryParser;

#[async_trait]
impl QueryParser for CourtbookQueryParser {
    type Statement = Prepared;

    async fn parse_sql<C>(&self, _client: &C, sql: &str, _types: &[Option<Type>]) -> PgWireResult<Prepared>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        sql::prepare(sql).map_err(sql_err)
    }

    fn get_parameter_types(&self, stmt: &Prepared) -> PgWireResult<Vec<Type>> {
        Ok(parameter_types(stmt))
    }

    fn get_result_schema(&self, stmt: &Prepared, _column_format: Option<&Format>) -> PgWireResult<Vec<FieldInfo>> {
        Ok(result_schema(stmt.table()))
    }
}

fn parameter_types(stmt: &Prepared) -> Vec<Type> {
    stmt.param_kinds()
        .iter()
        .map(|kind| match kind {
            ParamKind::Int => Type::INT8,
            ParamKind::Text => Type::VARCHAR,
        })
        .collect()
}

/// Decode each bound parameter by its kind, honouring the client's text or
/// binary format and any integer width it declared at Parse time.
fn bound_parameters(portal: &Portal<Prepared>) -> PgWireResult<Vec<Option<String>>> {
    let declared = &portal.statement.parameter_types;
    let kinds = portal.statement.statement.param_kinds();
    if portal.parameter_len() != kinds.len() {
        return Err(user_error(
            "08P01",
            format!("bind supplies {} parameters, statement needs {}", portal.parameter_len(), kinds.len()),
        ));
    }

    kinds
        .iter()
        .enumerate()
        .map(|(i, kind)| {
            let decoded = match kind {
                ParamKind::Text => portal.parameter::<String>(i, &Type::VARCHAR),
                ParamKind::Int => {
                    let ty = declared.get(i).cloned().flatten();
                    let n = if ty == Some(Type::INT2) {
                        portal.parameter::<i16>(i, &Type::INT2).map(|v| v.map(i64::from))
                    } else if ty == Some(Type::INT4) {
                        portal.parameter::<i32>(i, &Type::INT4).map(|v| v.map(i64::from))
                    } else {
                        portal.parameter::<i64>(i, &Type::INT8)
                    };
                    n.map(|v| v.map(|n| n.to_string()))
                }
            };
            decoded.map_err(|e| user_error("42601", format!("parameter ${}: {e}", i + 1)))
        })
        .collect()
}

#[async_trait]
impl ExtendedQueryHandler for CourtbookHandler {
    type Statement = Prepared;
    type QueryParser = CourtbookQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        _client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let params = bound_parameters(portal)?;
        let cmd = portal.statement.statement.bind(&params).map_err(sql_err)?;
        let mut responses = self.execute(cmd).await?;
        if responses.is_empty() {
            return Ok(Response::EmptyQuery);
        }
        Ok(responses.remove(0))
    }

    async fn do_describe_statement<C>(
        &self,
        _client: &mut C,
        target: &StoredStatement<Self::Statement>,
    ) -> PgWireResult<DescribeStatementResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let param_types = parameter_types(&target.statement)
            .into_iter()
            .enumerate()
            .map(|(i, server)| target.parameter_types.get(i).cloned().flatten().unwrap_or(server))
            .collect();
        Ok(DescribeStatementResponse::new(
            param_types,
            result_schema(target.statement.table()),
        ))
    }

    async fn do_describe_portal<C>(
        &self,
        _client: &mut C,
        target: &Portal<Self::Statement>,
    ) -> PgWireResult<DescribePortalResponse>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        Ok(DescribePortalResponse::new(result_schema(target.statement.statement.table())))
    }
}

// ── Factory ──────────────────────────────────────────────────────

pub struct CourtbookFactory {
    handler: Arc<CourtbookHandler>,
    auth_handler: Arc<CleartextPasswordAuthStartupHandler<CourtbookAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl CourtbookFactory {
    pub fn new(engine: Arc<Engine>, store: Arc<WalStore>, password: String) -> Self {
        let auth_source = CourtbookAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(CourtbookHandler::new(engine, store)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(auth_source, param_provider)),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for CourtbookFactory {
    fn simple_query_handler(&self) -> Arc<impl SimpleQueryHandler> {
        self.handler.clone()
    }

    fn extended_query_handler(&self) -> Arc<impl ExtendedQueryHandler> {
        self.handler.clone()
    }

    fn startup_handler(&self) -> Arc<impl StartupHandler> {
        self.auth_handler.clone()
    }

    fn copy_handler(&self) -> Arc<impl CopyHandler> {
        self.noop.clone()
    }
}

/// Serve one client connection to completion.
pub async fn process_connection(
    socket: TcpStream,
    engine: Arc<Engine>,
    store: Arc<WalStore>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> std::io::Result<()> {
    let factory = CourtbookFactory::new(engine, store, password);
    pgwire::tokio::process_socket(socket, tls, factory).await
}

// ── Errors ───────────────────────────────────────────────────────

/// SQLSTATE for each engine error kind.
pub fn sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::InvalidWindow(_) => "22023",
        EngineError::VenueNotFound(_) | EngineError::NotFound(_) => "P0002",
        EngineError::VenueInactive(_) | EngineError::InvalidState { .. } => "55000",
        EngineError::SlotUnavailable(_) => "23P01",
        EngineError::Forbidden(_) => "42501",
        EngineError::Conflict(_) => "40001",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::Storage(_) => "58030",
    }
}

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new("ERROR".into(), code.into(), message)))
}

fn engine_err(e: EngineError) -> PgWireError {
    match &e {
        EngineError::Storage(_) => tracing::error!("{e}"),
        _ => tracing::debug!("request rejected: {e}"),
    }
    user_error(sqlstate(&e), e.to_string())
}

fn store_err(e: StoreError) -> PgWireError {
    engine_err(EngineError::from(e))
}

fn sql_err(e: SqlError) -> PgWireError {
    user_error("42601", e.to_string())
}
