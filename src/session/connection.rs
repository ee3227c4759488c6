use crate::error::{PgError, SqlState};
use crate::protocol::{
    AuthenticationMessage, BackendMessage, FrontendMessage, PostgresCodec, StartupMessage, TransactionStatus,
    PROTOCOL_VERSION_3,
};
use crate::query::{CancelHandle, ExecutableStatement, ParsedStatement, Portal, PortalState, QueryEngine};
use crate::session::state::{SessionPhase, SessionState};
use crate::session::Gateway;
use crate::OctopusError;
use futures::{SinkExt, StreamExt};
use std::io;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio_util::codec::Framed;
use tracing::{debug, error, info, warn};

/// Why a message handler stopped.
enum SessionError {
    /// Reported to the client; FATAL ends the session.
    Client(PgError),
    /// The connection itself is gone.
    Transport(io::Error),
}

impl From<PgError> for SessionError {
    fn from(err: PgError) -> Self {
        SessionError::Client(err)
    }
}

impl From<io::Error> for SessionError {
    fn from(err: io::Error) -> Self {
        SessionError::Transport(err)
    }
}

impl From<OctopusError> for SessionError {
    fn from(err: OctopusError) -> Self {
        match err {
            OctopusError::Io(e) => SessionError::Transport(e),
            other => SessionError::Client(other.into()),
        }
    }
}

type SessionResult<T = ()> = std::result::Result<T, SessionError>;

fn named_object_error() -> SessionError {
    OctopusError::Protocol("named prepared statement is not supported".to_string()).into()
}

fn message_type(msg: &FrontendMessage) -> char {
    match msg {
        FrontendMessage::Password(_) => 'p',
        FrontendMessage::Query(_) => 'Q',
        FrontendMessage::Parse { .. } => 'P',
        FrontendMessage::Bind { .. } => 'B',
        FrontendMessage::Execute { .. } => 'E',
        FrontendMessage::Sync => 'S',
        FrontendMessage::Terminate => 'X',
        FrontendMessage::Close { .. } => 'C',
        FrontendMessage::Describe { .. } => 'D',
        FrontendMessage::Flush => 'H',
        FrontendMessage::CopyData => 'd',
        FrontendMessage::CopyDone => 'c',
        FrontendMessage::CopyFail => 'f',
        FrontendMessage::Unknown(tag) => *tag as char,
        FrontendMessage::SslRequest
        | FrontendMessage::GssEncRequest
        | FrontendMessage::CancelRequest { .. }
        | FrontendMessage::StartupMessage(_) => '\0',
    }
}

/// One client connection, driven from the first byte to close.
///
/// Messages are handled strictly in order. Only the unnamed statement and
/// the unnamed portal exist.
pub struct Session<S> {
    framed: Framed<S, PostgresCodec>,
    gateway: Gateway,
    state: SessionState,
    peer: String,
    cancel: Arc<CancelHandle>,
    engine: Option<QueryEngine>,
    parsed: Option<Arc<ParsedStatement>>,
    executable: Option<ExecutableStatement>,
    portal: Option<Box<dyn Portal>>,
}

impl<S> Session<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S, gateway: Gateway, peer: String) -> Self {
        Session {
            framed: Framed::new(stream, PostgresCodec::new()),
            gateway,
            state: SessionState::new(),
            peer,
            cancel: Arc::new(CancelHandle::new()),
            engine: None,
            parsed: None,
            executable: None,
            portal: None,
        }
    }

    pub async fn run(mut self) {
        debug!("session {} started for {}", self.state.id, self.peer);
        let first = match self.framed.next().await {
            Some(Ok(msg)) => msg,
            Some(Err(e)) => {
                warn!("failed to read startup packet from {}: {}", self.peer, e);
                return self.close().await;
            }
            None => return self.close().await,
        };

        match first {
            FrontendMessage::CancelRequest { process_id, secret_key } => {
                debug!("cancel request (pid={}) from {}", process_id, self.peer);
                self.gateway.registry.cancel(secret_key);
                self.close().await
            }
            FrontendMessage::SslRequest | FrontendMessage::GssEncRequest => {
                let err = PgError::fatal(SqlState::FeatureNotSupported, "unsupported frontend protocol");
                let _ = self.report(&err).await;
                self.close().await
            }
            FrontendMessage::StartupMessage(startup) => {
                let Some(_admission) = self.gateway.registry.try_admit() else {
                    return self.reject().await;
                };
                self.state.phase = SessionPhase::Startup;
                let result = match self.startup(startup).await {
                    Ok(()) => self.message_loop().await,
                    Err(e) => Err(e),
                };
                match result {
                    Ok(()) => {}
                    Err(SessionError::Client(err)) => {
                        let _ = self.report(&err).await;
                    }
                    Err(SessionError::Transport(e)) => {
                        debug!("connection from {} lost: {}", self.peer, e);
                    }
                }
                self.close().await
            }
            other => {
                let err = PgError::fatal(
                    SqlState::ProtocolViolation,
                    format!("invalid frontend message type '{}'", message_type(&other)),
                );
                let _ = self.report(&err).await;
                self.close().await
            }
        }
    }

    /// Refuse the connection because the gateway is full.
    pub async fn reject(mut self) {
        info!("rejecting connection from {}: too many clients", self.peer);
        let err = PgError::fatal(SqlState::TooManyConnections, "too many clients already, rejected");
        let _ = self.report(&err).await;
        self.close().await
    }

    async fn startup(&mut self, startup: StartupMessage) -> SessionResult {
        if startup.protocol_version != PROTOCOL_VERSION_3 {
            return Err(PgError::fatal(SqlState::FeatureNotSupported, "unsupported frontend protocol").into());
        }
        debug!("startup parameters from {}: {:?}", self.peer, startup.parameters);
        self.state.client_params = startup.parameters;
        self.state.phase = SessionPhase::Authenticating;
        self.authenticate().await?;
        self.state.phase = SessionPhase::Ready;
        Ok(())
    }

    /// Cleartext password exchange. Passwords are compared as stored.
    async fn authenticate(&mut self) -> SessionResult {
        self.framed
            .send(BackendMessage::Authentication(AuthenticationMessage::CleartextPassword))
            .await?;

        let password = match self.framed.next().await {
            Some(Ok(FrontendMessage::Password(password))) => password,
            Some(Ok(other)) => {
                return Err(PgError::fatal(
                    SqlState::ProtocolViolation,
                    format!("expected password response, got message type '{}'", message_type(&other)),
                )
                .into());
            }
            Some(Err(e)) => return Err(e.into()),
            None => return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into()),
        };

        let user = self.state.user().map(str::to_string).ok_or_else(|| {
            PgError::fatal(
                SqlState::ProtocolViolation,
                "no PostgreSQL user name specified in startup packet",
            )
        })?;
        let expected = self
            .gateway
            .catalog
            .password_of(&user)
            .ok_or_else(|| PgError::fatal(SqlState::ProtocolViolation, format!("invalid user name '{user}'")))?;
        if password != expected {
            return Err(PgError::fatal(
                SqlState::InvalidPassword,
                OctopusError::InvalidPassword(user).to_string(),
            )
            .into());
        }

        let context = self.gateway.catalog.open_context(&user);
        self.engine = Some(QueryEngine::new(context, self.cancel.clone()));
        let secret = self.gateway.registry.register(self.cancel.clone());
        self.state.secret = Some(secret);

        self.framed
            .feed(BackendMessage::Authentication(AuthenticationMessage::Ok))
            .await?;
        for (name, value) in self.state.server_parameters() {
            self.framed
                .feed(BackendMessage::ParameterStatus {
                    name: name.to_string(),
                    value,
                })
                .await?;
        }
        self.framed
            .feed(BackendMessage::BackendKeyData {
                process_id: 0,
                secret_key: secret,
            })
            .await?;
        info!("user {} authenticated from {} (session {})", user, self.peer, self.state.id);
        Ok(())
    }

    async fn message_loop(&mut self) -> SessionResult {
        let mut ready = true;
        let mut skip_until_sync = false;

        loop {
            if ready {
                self.framed
                    .send(BackendMessage::ReadyForQuery {
                        status: TransactionStatus::Idle,
                    })
                    .await?;
                ready = false;
            }

            let msg = match self.framed.next().await {
                Some(msg) => msg?,
                None => {
                    info!("client {} disconnected", self.peer);
                    return Ok(());
                }
            };

            if skip_until_sync && !matches!(msg, FrontendMessage::Sync | FrontendMessage::Terminate) {
                debug!("discarding '{}' until Sync", message_type(&msg));
                continue;
            }

            let extended = matches!(
                msg,
                FrontendMessage::Parse { .. }
                    | FrontendMessage::Bind { .. }
                    | FrontendMessage::Describe { .. }
                    | FrontendMessage::Execute { .. }
                    | FrontendMessage::Close { .. }
            );

            let result = match msg {
                FrontendMessage::Query(text) => {
                    ready = true;
                    self.handle_query(&text).await
                }
                FrontendMessage::Parse {
                    name,
                    query,
                    param_types,
                } => self.handle_parse(&name, &query, &param_types).await,
                FrontendMessage::Bind {
                    portal,
                    statement,
                    formats,
                    values,
                    result_formats,
                } => self.handle_bind(&portal, &statement, formats, values, result_formats).await,
                FrontendMessage::Execute { portal, max_rows } => self.handle_execute(&portal, max_rows).await,
                FrontendMessage::Describe { typ, name } => self.handle_describe(typ, &name).await,
                FrontendMessage::Close { typ, name } => self.handle_close(typ, &name).await,
                FrontendMessage::Sync => {
                    skip_until_sync = false;
                    ready = true;
                    Ok(())
                }
                FrontendMessage::Flush => self.framed.flush().await.map_err(SessionError::from),
                FrontendMessage::Terminate => {
                    info!("terminate received from {}", self.peer);
                    return Ok(());
                }
                FrontendMessage::CopyData | FrontendMessage::CopyDone | FrontendMessage::CopyFail => Ok(()),
                other => Err(PgError::fatal(
                    SqlState::ProtocolViolation,
                    format!("invalid frontend message type '{}'", message_type(&other)),
                )
                .into()),
            };

            match result {
                Ok(()) => {}
                Err(SessionError::Client(err)) if !err.is_fatal() => {
                    self.report(&err).await?;
                    if extended {
                        skip_until_sync = true;
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn engine(&self) -> SessionResult<&QueryEngine> {
        self.engine
            .as_ref()
            .ok_or_else(|| PgError::fatal(SqlState::ProtocolViolation, "session is not authenticated").into())
    }

    fn close_portal(&mut self) {
        if let Some(mut portal) = self.portal.take() {
            portal.close();
        }
    }

    /// Open a portal over the bound statement.
    fn new_portal(&self) -> SessionResult<Box<dyn Portal>> {
        let executable = self
            .executable
            .clone()
            .ok_or_else(|| PgError::error(SqlState::ProtocolViolation, "no bound statement"))?;
        Ok(self.engine()?.execute(executable)?)
    }

    fn bound_statement_is_empty(&self) -> bool {
        self.executable
            .as_ref()
            .is_some_and(|e| matches!(e.parsed.as_ref(), ParsedStatement::Empty))
    }

    async fn handle_query(&mut self, text: &str) -> SessionResult {
        debug!("query: {}", text);
        self.close_portal();
        self.parsed = None;
        self.executable = None;

        let parsed = self.engine()?.parse(text, &[])?;
        if matches!(parsed.as_ref(), ParsedStatement::Empty) {
            self.framed.feed(BackendMessage::EmptyQueryResponse).await?;
            return Ok(());
        }
        let mut portal = self
            .engine()?
            .execute(QueryEngine::bind(parsed, vec![], vec![], vec![]))?;

        if let Some(fields) = portal.describe().await? {
            self.framed.feed(BackendMessage::RowDescription(fields)).await?;
        }
        let batch = portal.run(0).await?;
        for row in batch.rows {
            self.framed.feed(BackendMessage::DataRow(row)).await?;
        }
        let tag = portal.completion_tag()?;
        self.framed.feed(BackendMessage::CommandComplete { tag }).await?;
        Ok(())
    }

    async fn handle_parse(&mut self, name: &str, query: &str, param_types: &[i32]) -> SessionResult {
        debug!("parse: {} (parameter types {:?})", query, param_types);
        if !name.is_empty() {
            return Err(named_object_error());
        }
        let parsed = self.engine()?.parse(query, param_types)?;
        self.close_portal();
        self.executable = None;
        self.parsed = Some(parsed);
        self.framed.feed(BackendMessage::ParseComplete).await?;
        Ok(())
    }

    async fn handle_bind(
        &mut self,
        portal: &str,
        statement: &str,
        formats: Vec<i16>,
        values: Vec<Option<Vec<u8>>>,
        result_formats: Vec<i16>,
    ) -> SessionResult {
        debug!("bind: {} value(s), result formats {:?}", values.len(), result_formats);
        if !portal.is_empty() || !statement.is_empty() {
            return Err(named_object_error());
        }
        let parsed = self
            .parsed
            .clone()
            .ok_or_else(|| PgError::error(SqlState::ProtocolViolation, "no pending statement"))?;
        self.close_portal();
        self.executable = Some(QueryEngine::bind(parsed, formats, values, result_formats));
        self.framed.feed(BackendMessage::BindComplete).await?;
        Ok(())
    }

    async fn handle_execute(&mut self, portal: &str, max_rows: i32) -> SessionResult {
        debug!("execute (max_rows={})", max_rows);
        if !portal.is_empty() {
            return Err(named_object_error());
        }
        if self.bound_statement_is_empty() {
            self.framed.feed(BackendMessage::EmptyQueryResponse).await?;
            return Ok(());
        }

        let mut portal = match self.portal.take() {
            Some(p) if !matches!(p.state(), PortalState::Done | PortalState::Failed) => p,
            _ => self.new_portal()?,
        };
        let batch = portal.run(usize::try_from(max_rows).unwrap_or(0)).await?;
        for row in batch.rows {
            self.framed.feed(BackendMessage::DataRow(row)).await?;
        }
        if batch.suspended {
            self.framed.feed(BackendMessage::PortalSuspended).await?;
            self.portal = Some(portal);
        } else {
            let tag = portal.completion_tag()?;
            self.framed.feed(BackendMessage::CommandComplete { tag }).await?;
        }
        Ok(())
    }

    async fn handle_describe(&mut self, typ: u8, name: &str) -> SessionResult {
        debug!("describe ({}, {:?})", typ as char, name);
        if !name.is_empty() {
            return Err(named_object_error());
        }
        match typ {
            b'S' => {
                let parsed = self
                    .parsed
                    .clone()
                    .ok_or_else(|| PgError::error(SqlState::ProtocolViolation, "no pending statement"))?;
                let engine = self.engine()?;
                let description = engine.describe_statement(&parsed).await?;
                self.framed
                    .feed(BackendMessage::ParameterDescription(description.param_types))
                    .await?;
                let fields = description.fields;
                self.send_fields(fields).await
            }
            b'P' => {
                if self.bound_statement_is_empty() {
                    self.framed.feed(BackendMessage::NoData).await?;
                    return Ok(());
                }
                let mut portal = match self.portal.take() {
                    Some(p) => p,
                    None => self.new_portal()?,
                };
                let fields = portal.describe().await?;
                self.portal = Some(portal);
                self.send_fields(fields).await
            }
            other => Err(PgError::fatal(
                SqlState::ProtocolViolation,
                format!("invalid DESCRIBE message subtype {other}"),
            )
            .into()),
        }
    }

    async fn send_fields(&mut self, fields: Option<Vec<crate::protocol::FieldDescription>>) -> SessionResult {
        let msg = match fields {
            Some(fields) => BackendMessage::RowDescription(fields),
            None => BackendMessage::NoData,
        };
        self.framed.feed(msg).await?;
        Ok(())
    }

    async fn handle_close(&mut self, typ: u8, name: &str) -> SessionResult {
        debug!("close ({}, {:?})", typ as char, name);
        if !name.is_empty() {
            return Err(named_object_error());
        }
        match typ {
            b'P' => self.close_portal(),
            b'S' => {
                self.close_portal();
                self.parsed = None;
                self.executable = None;
            }
            other => {
                return Err(PgError::fatal(
                    SqlState::ProtocolViolation,
                    format!("invalid CLOSE message subtype {other}"),
                )
                .into());
            }
        }
        self.framed.feed(BackendMessage::CloseComplete).await?;
        Ok(())
    }

    /// Send an ErrorResponse. Called once per failure.
    async fn report(&mut self, err: &PgError) -> io::Result<()> {
        if err.is_fatal() {
            error!("session {}: {}", self.state.id, err);
        } else {
            warn!("session {}: {}", self.state.id, err);
        }
        self.framed
            .send(BackendMessage::ErrorResponse(Box::new(err.to_error_response())))
            .await
    }

    /// Release everything the session holds: the portal and its backend
    /// worker, the catalog context and the registry entry.
    async fn close(mut self) {
        self.close_portal();
        self.executable = None;
        self.parsed = None;
        self.engine = None;
        if let Some(secret) = self.state.secret.take() {
            self.gateway.registry.unregister(secret);
        }
        if let Err(e) = self.framed.close().await {
            debug!("error closing connection to {}: {}", self.peer, e);
        }
        self.state.phase = SessionPhase::Closed;
        info!("session {} closed", self.state.id);
    }
}
