use std::fmt::Debug;
use std::io;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use futures::stream;
use futures::{Sink, SinkExt};
use pgwire::api::auth::cleartext::CleartextPasswordAuthStartupHandler;
use pgwire::api::auth::{DefaultServerParameterProvider, StartupHandler};
use pgwire::api::copy::CopyHandler;
use pgwire::api::portal::{Format, Portal};
use pgwire::api::query::{ExtendedQueryHandler, SimpleQueryHandler};
use pgwire::api::results::{
    DataRowEncoder, DescribePortalResponse, DescribeStatementResponse, FieldFormat, FieldInfo,
    QueryResponse, Response, Tag,
};
use pgwire::api::stmt::{QueryParser, StoredStatement};
use pgwire::api::store::PortalStore;
use pgwire::api::{ClientInfo, ClientPortalStore, NoopHandler, PgWireServerHandlers, Type};
use pgwire::error::{ErrorInfo, PgWireError, PgWireResult};
use pgwire::messages::PgWireBackendMessage;
use pgwire::messages::data::DataRow;
use pgwire::messages::response::NotificationResponse;
use pgwire::tokio::TlsAcceptor;
use tokio::net::TcpStream;
use tokio::sync::{Mutex, broadcast};
use ulid::Ulid;

use crate::auth::ReservdAuthSource;
use crate::engine::{ConflictReason, Engine, EngineError};
use crate::model::*;
use crate::notify::{Notice, NotifyHub};
use crate::observability::{self, QUERIES_TOTAL, QUERY_DURATION_SECONDS};
use crate::sql::{self, Command, SqlError};

/// The one channel a session can LISTEN on: notices for the session user.
pub const NOTICE_CHANNEL: &str = "reservations";

/// Serve one client connection until it closes.
pub async fn process_connection(
    socket: TcpStream,
    engine: Arc<Engine>,
    hub: Arc<NotifyHub>,
    password: String,
    tls: Option<TlsAcceptor>,
) -> io::Result<()> {
    let factory = Arc::new(ReservdFactory::new(engine, hub, password));
    pgwire::tokio::process_socket(socket, tls, factory).await
}

/// Handles one session. `listener` is set by LISTEN; queued notices go out
/// ahead of the result of each later command.
pub struct ReservdHandler {
    engine: Arc<Engine>,
    hub: Arc<NotifyHub>,
    listener: Mutex<Option<broadcast::Receiver<Notice>>>,
    query_parser: Arc<ReservdQueryParser>,
}

impl ReservdHandler {
    pub fn new(engine: Arc<Engine>, hub: Arc<NotifyHub>) -> Self {
        Self {
            engine,
            hub,
            listener: Mutex::new(None),
            query_parser: Arc::new(ReservdQueryParser),
        }
    }

    async fn deliver_notices<C>(&self, client: &mut C) -> PgWireResult<()>
    where
        C: ClientInfo + Sink<PgWireBackendMessage> + Unpin + Send,
        PgWireError: From<C::Error>,
    {
        let pending = {
            let mut listener = self.listener.lock().await;
            let Some(rx) = listener.as_mut() else {
                return Ok(());
            };
            drain(rx)
        };
        let pid = client.pid_and_secret_key().0;
        for notice in pending {
            let message = NotificationResponse::new(pid, NOTICE_CHANNEL.to_string(), notice_payload(&notice));
            client.send(PgWireBackendMessage::NotificationResponse(message)).await?;
        }
        Ok(())
    }

    /// The session user name is the caller's id.
    fn resolve_actor<C: ClientInfo>(&self, client: &C) -> PgWireResult<UserId> {
        let user = client.metadata().get("user").cloned().unwrap_or_default();
        Ulid::from_string(&user).map_err(|_| {
            user_error("28000", format!("session user '{user}' is not a user id"))
        })
    }

    async fn run(&self, actor: UserId, query: &str) -> PgWireResult<Response> {
        let cmd = sql::parse_sql(query).map_err(sql_err)?;
        let label = observability::command_label(&cmd);
        let started = Instant::now();
        let result = self.execute_command(actor, cmd).await;
        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(QUERIES_TOTAL, "command" => label, "status" => status).increment(1);
        metrics::histogram!(QUERY_DURATION_SECONDS, "command" => label)
            .record(started.elapsed().as_secs_f64());
        if let Err(e) = &result {
            tracing::debug!("{label} by {actor} failed: {e}");
        }
        result.map_err(engine_err)
    }

    async fn execute_command(&self, actor: UserId, cmd: Command) -> Result<Response, EngineError> {
        let engine = &self.engine;
        match cmd {
            Command::InsertFacility { id, name } => {
                engine.register_resource(actor, Resource::facility(id, name)).await?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::InsertEquipment { id, name, quantity } => {
                engine
                    .register_resource(actor, Resource::equipment(id, name, quantity))
                    .await?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::SetResourceActive { resource, active } => {
                engine.set_resource_active(actor, resource, active).await?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::InsertReservation { id, purpose, attendees, items } => {
                let reservation = engine
                    .create_reservation(actor, NewReservation { id, purpose, attendees, items })
                    .await?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(reservation.items.len())))
            }
            Command::UpdateReservationItems { reservation_id, request_id, items } => {
                let reservation = engine
                    .edit_items(actor, reservation_id, items, request_id.unwrap_or_else(Ulid::new))
                    .await?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(reservation.items.len())))
            }
            Command::CancelReservation { id } => {
                let canceled = engine.cancel(actor, id, Ulid::new()).await?;
                Ok(Response::Execution(Tag::new("DELETE").with_rows(usize::from(canceled))))
            }
            Command::InsertApprovalLog { reservation_id, action, comment, request_id } => {
                engine
                    .transition(actor, reservation_id, action, comment, request_id.unwrap_or_else(Ulid::new))
                    .await?;
                Ok(Response::Execution(Tag::new("INSERT").with_rows(1)))
            }
            Command::SelectResources => {
                let resources = engine.resources().await?;
                query_response(resources_schema(), resources, |enc, r| {
                    enc.encode_field(&r.resource.to_string())?;
                    enc.encode_field(&r.resource.kind.as_str())?;
                    enc.encode_field(&r.name)?;
                    enc.encode_field(&(r.quantity as i64))?;
                    enc.encode_field(&r.active)
                })
            }
            Command::SelectReservations { id, requester } => {
                let reservations = match (id, requester) {
                    (Some(id), _) => vec![self.visible_reservation(actor, id).await?],
                    (None, Some(requester)) if requester == actor => engine.reservations_for(actor).await?,
                    (None, Some(requester)) => {
                        if !engine.is_admin(actor).await {
                            return Err(EngineError::Unauthorized(actor));
                        }
                        engine.reservations_for(requester).await?
                    }
                    (None, None) if engine.is_admin(actor).await => engine.all_reservations(actor).await?,
                    (None, None) => engine.reservations_for(actor).await?,
                };
                query_response(reservations_schema(), reservations, |enc, r| {
                    enc.encode_field(&r.id.to_string())?;
                    enc.encode_field(&r.requester.to_string())?;
                    enc.encode_field(&r.purpose)?;
                    enc.encode_field(&r.attendees.map(i64::from))?;
                    enc.encode_field(&r.status.as_str())?;
                    enc.encode_field(&r.is_canceled)?;
                    enc.encode_field(&r.created_at)?;
                    enc.encode_field(&r.updated_at)
                })
            }
            Command::SelectItems { reservation_id } => {
                let reservation = self.visible_reservation(actor, reservation_id).await?;
                let rid = reservation.id.to_string();
                query_response(items_schema(), reservation.items, |enc, item| {
                    enc.encode_field(&item.id.to_string())?;
                    enc.encode_field(&rid)?;
                    enc.encode_field(&item.resource.to_string())?;
                    enc.encode_field(&item.interval.start)?;
                    enc.encode_field(&item.interval.end)?;
                    enc.encode_field(&(item.quantity as i64))
                })
            }
            Command::SelectApprovalLogs { reservation_id } => {
                self.visible_reservation(actor, reservation_id).await?;
                let logs = engine.approval_logs(reservation_id).await?;
                query_response(approval_logs_schema(), logs, |enc, log| {
                    enc.encode_field(&log.id.to_string())?;
                    enc.encode_field(&log.reservation_id.to_string())?;
                    enc.encode_field(&log.acted_by.to_string())?;
                    enc.encode_field(&log.action.as_str())?;
                    enc.encode_field(&log.comment)?;
                    enc.encode_field(&log.acted_at)
                })
            }
            Command::SelectAudits { reservation_id } => {
                self.visible_reservation(actor, reservation_id).await?;
                let audits = engine.audit_trail(reservation_id).await?;
                query_response(audits_schema(), audits, |enc, audit| {
                    enc.encode_field(&audit.id.to_string())?;
                    enc.encode_field(&audit.reservation_id.to_string())?;
                    enc.encode_field(&audit.changed_by.to_string())?;
                    enc.encode_field(&audit.change.as_str())?;
                    enc.encode_field(&audit.change_data)?;
                    enc.encode_field(&audit.changed_at)
                })
            }
            Command::SelectConflicts { reservation_id } => {
                let reservation = self.visible_reservation(actor, reservation_id).await?;
                let report = engine.check_existing(reservation.id).await?;
                let mut rows: Vec<ConflictRow> = report
                    .conflicts
                    .iter()
                    .map(|c| ConflictRow {
                        item: c.item,
                        resource: c.resource.to_string(),
                        interval: Some(c.interval),
                        reason: c.reason.to_string(),
                        available: match c.reason {
                            ConflictReason::InsufficientQuantity { available, .. } => Some(available),
                            ConflictReason::SlotTaken => None,
                        },
                    })
                    .collect();
                rows.extend(report.failures.iter().map(|f| ConflictRow {
                    item: f.item,
                    resource: f.resource.to_string(),
                    interval: reservation.items.get(f.item).map(|i| i.interval),
                    reason: f.error.clone(),
                    available: None,
                }));
                rows.sort_by_key(|r| r.item);
                query_response(conflicts_schema(), rows, |enc, row| {
                    enc.encode_field(&(row.item as i32))?;
                    enc.encode_field(&row.resource)?;
                    enc.encode_field(&row.interval.map(|iv| iv.start))?;
                    enc.encode_field(&row.interval.map(|iv| iv.end))?;
                    enc.encode_field(&row.reason)?;
                    enc.encode_field(&row.available)
                })
            }
            Command::SelectAvailability { resource, start, end } => {
                let window = TimeInterval::new(start, end)?;
                let free = engine.free_windows(resource, window).await?;
                let rid = resource.to_string();
                query_response(availability_schema(), free, |enc, slot| {
                    enc.encode_field(&rid)?;
                    enc.encode_field(&slot.start)?;
                    enc.encode_field(&slot.end)
                })
            }
            Command::Listen { channel } => {
                if channel != NOTICE_CHANNEL {
                    return Err(EngineError::InvalidRequest(format!(
                        "unknown channel '{channel}' (expected {NOTICE_CHANNEL})"
                    )));
                }
                let mut listener = self.listener.lock().await;
                if listener.is_none() {
                    *listener = Some(self.hub.subscribe(actor));
                }
                Ok(Response::Execution(Tag::new("LISTEN")))
            }
            Command::SelectCapacity { resource, start, end, exclude } => {
                let window = TimeInterval::new(start, end)?;
                let available = match resource.kind {
                    ResourceKind::Facility => i64::from(engine.is_free(resource, window, exclude).await?),
                    ResourceKind::Equipment => engine.available_quantity(resource, window, exclude).await?,
                };
                let rid = resource.to_string();
                query_response(capacity_schema(), [available], |enc, available| {
                    enc.encode_field(&rid)?;
                    enc.encode_field(&start)?;
                    enc.encode_field(&end)?;
                    enc.encode_field(available)
                })
            }
        }
    }

    /// Reservation details are visible to their requester and to admins.
    async fn visible_reservation(&self, actor: UserId, id: ReservationId) -> Result<Reservation, EngineError> {
        let reservation = self.engine.reservation(id).await?;
        if reservation.requester != actor && !self.engine.is_admin(actor).await {
            return Err(EngineError::Unauthorized(actor));
        }
        Ok(reservation)
    }
}

fn drain(rx: &mut broadcast::Receiver<Notice>) -> Vec<Notice> {
    let mut notices = Vec::new();
    loop {
        match rx.try_recv() {
            Ok(notice) => notices.push(notice),
            Err(broadcast::error::TryRecvError::Lagged(missed)) => {
                tracing::warn!("listener fell behind, {missed} notices dropped");
            }
            Err(_) => break,
        }
    }
    notices
}

fn notice_payload(notice: &Notice) -> String {
    let (event, comment) = match notice {
        Notice::ReservationApproved { comment, .. } => ("approved", comment),
        Notice::ReservationRejected { comment, .. } => ("rejected", comment),
        Notice::ChangeRequested { comment, .. } => ("change_requested", comment),
    };
    serde_json::json!({
        "event": event,
        "reservation_id": notice.reservation_id().to_string(),
        "comment": comment,
    })
    .to_string()
}

struct ConflictRow {
    item: usize,
    resource: String,
    interval: Option<TimeInterval>,
    reason: String,
    available: Option<i64>,
}

fn query_response<T>(
    schema: Vec<FieldInfo>,
    rows: impl IntoIterator<Item = T>,
    encode: impl Fn(&mut DataRowEncoder, &T) -> PgWireResult<()>,
) -> Result<Response, EngineError> {
    let schema = Arc::new(schema);
    let rows: Vec<PgWireResult<DataRow>> = rows
        .into_iter()
        .map(|row| {
            let mut encoder = DataRowEncoder::new(schema.clone());
            encode(&mut encoder, &row)?;
            Ok(encoder.take_row())
        })
        .collect();
    Ok(Response::Query(QueryResponse::new(schema, stream::iter(rows))))
}

// ── Result schemas ───────────────────────────────────────────────

fn text(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::VARCHAR, FieldFormat::Text)
}

fn int8(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::INT8, FieldFormat::Text)
}

fn boolean(name: &str) -> FieldInfo {
    FieldInfo::new(name.into(), None, None, Type::BOOL, FieldFormat::Text)
}

fn resources_schema() -> Vec<FieldInfo> {
    vec![text("resource"), text("kind"), text("name"), int8("quantity"), boolean("active")]
}

fn reservations_schema() -> Vec<FieldInfo> {
    vec![
        text("id"),
        text("requester_id"),
        text("purpose"),
        int8("attendees"),
        text("status"),
        boolean("is_canceled"),
        int8("created_at"),
        int8("updated_at"),
    ]
}

fn items_schema() -> Vec<FieldInfo> {
    vec![
        text("id"),
        text("reservation_id"),
        text("resource"),
        int8("start"),
        int8("end"),
        int8("quantity"),
    ]
}

fn approval_logs_schema() -> Vec<FieldInfo> {
    vec![
        text("id"),
        text("reservation_id"),
        text("acted_by"),
        text("action"),
        text("comment"),
        int8("acted_at"),
    ]
}

fn audits_schema() -> Vec<FieldInfo> {
    vec![
        text("id"),
        text("reservation_id"),
        text("changed_by"),
        text("change_type"),
        text("change_data"),
        int8("changed_at"),
    ]
}

fn conflicts_schema() -> Vec<FieldInfo> {
    vec![
        FieldInfo::new("item".into(), None, None, Type::INT4, FieldFormat::Text),
        text("resource"),
        int8("start"),
        int8("end"),
        text("reason"),
        int8("available"),
    ]
}

fn availability_schema() -> Vec<FieldInfo> {
    vec![text("resource"), int8("start"), int8("end")]
}

fn capacity_schema() -> Vec<FieldInfo> {
    vec![text("resource"), int8("start"), int8("end"), int8("available")]
}

/// Result columns for a statement, decided from the table it selects from.
fn result_schema(sql: &str) -> Vec<FieldInfo> {
    let lower = sql.to_lowercase();
    let mut words = lower.split_whitespace();
    if words.next() != Some("select") {
        return vec![];
    }
    let table = words
        .skip_while(|w| *w != "from")
        .nth(1)
        .map(|t| t.trim_matches(|c| c == ';' || c == '"'));
    match table {
        Some("resources") => resources_schema(),
        Some("reservations") => reservations_schema(),
        Some("reservation_items") => items_schema(),
        Some("approval_logs") => approval_logs_schema(),
        Some("reservation_audits") => audits_schema(),
        Some("conflicts") => conflicts_schema(),
        Some("availability") => availability_schema(),
        Some("capacity") => capacity_schema(),
        _ => vec![],
    }
}

#[async_trait]
impl SimpleQueryHandler for ReservdHandler {
    async fn do_query<C>(&self, client: &mut C, query: &str) -> PgWireResult<Vec<Response>>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let actor = self.resolve_actor(client)?;
        let response = self.run(actor, query).await?;
        self.deliver_notices(client).await?;
        Ok(vec![response])
    }
}

// ── Extended Query Protocol ──────────────────────────────────────

#[derive(Debug)]
pub struct ReservdQueryParser;

#[async_trait]
impl QueryParser for ReservdQueryParser {
    type Statement = String;

    async fn parse_sql<C>(&self, _client: &C, sql: &str, _types: &[Option<Type>]) -> PgWireResult<String>
    where
        C: ClientInfo + Unpin + Send + Sync,
    {
        Ok(sql.to_string())
    }

    fn get_parameter_types(&self, stmt: &String) -> PgWireResult<Vec<Type>> {
        Ok(vec![Type::VARCHAR; count_params(stmt)])
    }

    fn get_result_schema(&self, stmt: &String, _column_format: Option<&Format>) -> PgWireResult<Vec<FieldInfo>> {
        Ok(result_schema(stmt))
    }
}

#[async_trait]
impl ExtendedQueryHandler for ReservdHandler {
    type Statement = String;
    type QueryParser = ReservdQueryParser;

    fn query_parser(&self) -> Arc<Self::QueryParser> {
        self.query_parser.clone()
    }

    async fn do_query<C>(
        &self,
        client: &mut C,
        portal: &Portal<Self::Statement>,
        _max_rows: usize,
    ) -> PgWireResult<Response>
    where
        C: ClientInfo + ClientPortalStore + Sink<PgWireBackendMessage> + Unpin + Send + Sync,
        C::PortalStore: PortalStore<Statement = Self::Statement>,
        C::Error: Debug,
        PgWireError: From<C::Error>,
    {
        let actor = self.resolve_actor(client)?;
        let sql = substitute_params(&portal.statement.statement, &portal.parameters);
        let response = self.run(actor, &sql).await?;
        self.deliver_notices(client).await?;
        Ok(response)
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
        let param_types = vec![Type::VARCHAR; count_params(&target.statement)];
        Ok(DescribeStatementResponse::new(param_types, result_schema(&target.statement)))
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
        Ok(DescribePortalResponse::new(result_schema(&target.statement.statement)))
    }
}

/// Highest `$N` placeholder in the statement.
fn count_params(sql: &str) -> usize {
    let bytes = sql.as_bytes();
    let mut max = 0usize;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] != b'$' {
            i += 1;
            continue;
        }
        i += 1;
        let start = i;
        while i < bytes.len() && bytes[i].is_ascii_digit() {
            i += 1;
        }
        if let Ok(n) = sql[start..i].parse::<usize>() {
            max = max.max(n);
        }
    }
    max
}

/// Inline bound text parameters as quoted literals in one left-to-right
/// pass, so text inside a bound value is never read as a placeholder.
fn substitute_params<B: AsRef<[u8]>>(sql: &str, params: &[Option<B>]) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut rest = sql;
    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];
        let digits = after.bytes().take_while(u8::is_ascii_digit).count();
        let param = after[..digits]
            .parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(|i| params.get(i));
        match param {
            Some(Some(bytes)) => {
                let value = String::from_utf8_lossy(bytes.as_ref()).replace('\'', "''");
                out.push('\'');
                out.push_str(&value);
                out.push('\'');
            }
            Some(None) => out.push_str("NULL"),
            None => out.push_str(&rest[pos..pos + 1 + digits]),
        }
        rest = &after[digits..];
    }
    out.push_str(rest);
    out
}

// ── Factory ──────────────────────────────────────────────────────

pub struct ReservdFactory {
    handler: Arc<ReservdHandler>,
    auth_handler: Arc<CleartextPasswordAuthStartupHandler<ReservdAuthSource, DefaultServerParameterProvider>>,
    noop: Arc<NoopHandler>,
}

impl ReservdFactory {
    pub fn new(engine: Arc<Engine>, hub: Arc<NotifyHub>, password: String) -> Self {
        let auth_source = ReservdAuthSource::new(password);
        let param_provider = DefaultServerParameterProvider::default();
        Self {
            handler: Arc::new(ReservdHandler::new(engine, hub)),
            auth_handler: Arc::new(CleartextPasswordAuthStartupHandler::new(auth_source, param_provider)),
            noop: Arc::new(NoopHandler),
        }
    }
}

impl PgWireServerHandlers for ReservdFactory {
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

// ── Errors ───────────────────────────────────────────────────────

fn user_error(code: &str, message: String) -> PgWireError {
    PgWireError::UserError(Box::new(ErrorInfo::new("ERROR".into(), code.into(), message)))
}

fn sqlstate(e: &EngineError) -> &'static str {
    match e {
        EngineError::InvalidInterval(_) | EngineError::InvalidRequest(_) => "22023",
        EngineError::ResourceNotFound(_) | EngineError::ReservationNotFound(_) => "P0002",
        EngineError::ConflictExists(_) => "23P01",
        EngineError::InvalidTransition { .. } => "55000",
        EngineError::Unauthorized(_) => "42501",
        EngineError::LimitExceeded(_) => "54000",
        EngineError::AlreadyExists(_) => "23505",
        EngineError::TransientFailure(_) => "40001",
        EngineError::InvariantViolation(_) => "XX000",
    }
}

fn engine_err(e: EngineError) -> PgWireError {
    user_error(sqlstate(&e), e.to_string())
}

fn sql_err(e: SqlError) -> PgWireError {
    let code = match e {
        SqlError::UnknownTable(_) => "42P01",
        SqlError::Invalid(_) => "22023",
        _ => "42601",
    };
    user_error(code, e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_highest_placeholder() {
        assert_eq!(count_params("SELECT * FROM resources"), 0);
        assert_eq!(count_params("SELECT * FROM capacity WHERE resource = $1 AND start >= $3 AND \"end\" <= $2"), 3);
        assert_eq!(count_params("INSERT INTO facilities VALUES ($10, $2)"), 10);
    }

    #[test]
    fn placeholders_inside_bound_values_stay_literal() {
        let params = [Some(b"$2".to_vec()), Some(b"it's".to_vec()), None];
        assert_eq!(
            substitute_params("SELECT $1, $2, $3, $4, $ FROM t", &params),
            "SELECT '$2', 'it''s', NULL, $4, $ FROM t"
        );
        let ten: Vec<Option<Vec<u8>>> = (1..=10).map(|i| Some(i.to_string().into_bytes())).collect();
        assert_eq!(substitute_params("VALUES ($10, $1)", &ten), "VALUES ('10', '1')");
    }

    #[test]
    fn notice_payload_is_json() {
        let id = Ulid::new();
        let payload = notice_payload(&Notice::ChangeRequested {
            reservation_id: id,
            requester: Ulid::new(),
            comment: Some("smaller room?".into()),
        });
        let parsed: serde_json::Value = serde_json::from_str(&payload).unwrap();
        assert_eq!(parsed["event"], "change_requested");
        assert_eq!(parsed["reservation_id"], id.to_string());
        assert_eq!(parsed["comment"], "smaller room?");
    }

    #[test]
    fn result_schema_follows_the_selected_table() {
        assert_eq!(result_schema("SELECT * FROM resources").len(), 5);
        assert_eq!(result_schema("select * from availability where resource = $1").len(), 3);
        assert_eq!(result_schema("SELECT * FROM \"capacity\";").len(), 4);
        assert!(result_schema("INSERT INTO facilities VALUES ($1, $2)").is_empty());
        assert!(result_schema("SELECT * FROM nowhere").is_empty());
    }

    #[test]
    fn engine_errors_carry_distinct_sqlstates() {
        let id = Ulid::new();
        assert_eq!(sqlstate(&EngineError::ReservationNotFound(id)), "P0002");
        assert_eq!(sqlstate(&EngineError::Unauthorized(id)), "42501");
        assert_eq!(sqlstate(&EngineError::ConflictExists(Default::default())), "23P01");
        assert_eq!(sqlstate(&EngineError::LimitExceeded("x")), "54000");
    }
}
