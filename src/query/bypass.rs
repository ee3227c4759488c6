use crate::catalog::introspect::open_connection;
use crate::catalog::Catalog;
use crate::protocol::FieldDescription;
use crate::query::cancel::CancelHandle;
use crate::query::portal::{field_description, Batch, Portal, PortalState, Row};
use crate::query::statement::{ExecutableStatement, ParsedStatement, QueryType};
use crate::translator::TableNameTranslator;
use crate::types::{FormatCode, PgType, ValueConverter};
use crate::{OctopusError, Result};
use async_trait::async_trait;
use rusqlite::types::Value;
use rusqlite::{Connection, ErrorCode, InterruptHandle};
use sqlparser::ast::Statement;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Rows buffered between the backend worker and the session.
const ROW_CHANNEL_CAPACITY: usize = 256;

/// Where a validated statement runs and the text the backend receives.
#[derive(Debug, Clone)]
pub struct BackendTarget {
    /// `None` when the statement references no data source; it then runs on
    /// a private in-memory database.
    pub url: Option<String>,
    pub sql: String,
}

impl BackendTarget {
    /// Pick the single data source a statement touches and translate the
    /// statement into backend form. Fails before anything is opened when
    /// more than one data source is involved.
    pub fn resolve(catalog: &Catalog, statement: &Statement) -> Result<Self> {
        let sources = TableNameTranslator::data_sources(statement);
        if sources.len() > 1 {
            let names: Vec<&str> = sources.iter().map(String::as_str).collect();
            return Err(OctopusError::NotSupported(format!(
                "query across multiple data sources ({})",
                names.join(", ")
            )));
        }
        let url = match sources.first() {
            Some(name) => {
                let tree = catalog.read_schema();
                let source = tree.data_source(name).ok_or_else(|| {
                    OctopusError::backend(format!("data source \"{name}\" does not exist"))
                })?;
                Some(source.url.clone())
            }
            None => None,
        };
        Ok(BackendTarget {
            url,
            sql: TableNameTranslator::to_dsn(statement).to_string(),
        })
    }

    fn connect(&self) -> Result<Connection> {
        let conn = match &self.url {
            Some(url) => open_connection(url),
            None => Connection::open_in_memory(),
        };
        conn.map_err(backend_error)
    }
}

fn backend_error(err: rusqlite::Error) -> OctopusError {
    if err.sqlite_error_code() == Some(ErrorCode::OperationInterrupted) {
        OctopusError::Canceled
    } else {
        OctopusError::backend(err)
    }
}

fn statement_columns(stmt: &rusqlite::Statement<'_>) -> Vec<(String, PgType)> {
    stmt.columns()
        .iter()
        .map(|c| (c.name().to_string(), PgType::from_decltype(c.decl_type())))
        .collect()
}

/// Prepare the statement on its backend and report its result columns in
/// text format, without running it.
pub fn describe_columns(target: &BackendTarget) -> Result<Vec<FieldDescription>> {
    let conn = target.connect()?;
    let stmt = conn.prepare(&target.sql).map_err(backend_error)?;
    Ok(statement_columns(&stmt)
        .iter()
        .map(|(name, ty)| field_description(name, *ty, FormatCode::Text))
        .collect())
}

/// Decode Bind values by their parameter types and wire formats.
fn decode_params(executable: &ExecutableStatement, param_types: &[i32]) -> Result<Vec<Value>> {
    let values = &executable.param_values;
    if values.len() != param_types.len() {
        return Err(OctopusError::InvalidParameter(format!(
            "bind message supplies {} parameters, but prepared statement requires {}",
            values.len(),
            param_types.len()
        )));
    }
    let formats = FormatCode::resolve(&executable.param_formats, values.len())?;
    values
        .iter()
        .zip(param_types)
        .zip(formats)
        .map(|((value, oid), format)| {
            let pg_type = PgType::from_oid(*oid)
                .filter(PgType::is_parameter_type)
                .ok_or_else(|| OctopusError::NotSupported(format!("parameter type with OID {oid}")))?;
            ValueConverter::decode_param(value.as_deref(), pg_type, format)
        })
        .collect()
}

struct BackendJob {
    target: BackendTarget,
    params: Vec<Value>,
    result_formats: Vec<i16>,
}

enum WorkerEvent {
    Ready {
        fields: Vec<FieldDescription>,
        interrupt: Arc<InterruptHandle>,
    },
    Row(Row),
    Done {
        changes: usize,
    },
    Failed(OctopusError),
}

fn run_worker(job: BackendJob, tx: mpsc::Sender<WorkerEvent>, cancel: Arc<CancelHandle>) {
    let conn = match job.target.connect() {
        Ok(conn) => conn,
        Err(e) => {
            let _ = tx.blocking_send(WorkerEvent::Failed(e));
            return;
        }
    };
    let interrupt = Arc::new(conn.get_interrupt_handle());
    cancel.set(interrupt.clone());
    let result = stream_rows(&conn, &job, &tx, &interrupt);
    cancel.clear(&interrupt);
    if let Err(e) = result {
        debug!("by-pass statement failed: {}", e);
        let _ = tx.blocking_send(WorkerEvent::Failed(e));
    }
}

/// Step the statement, sending rows until the result ends or the portal
/// goes away.
fn stream_rows(
    conn: &Connection,
    job: &BackendJob,
    tx: &mpsc::Sender<WorkerEvent>,
    interrupt: &Arc<InterruptHandle>,
) -> Result<()> {
    let mut stmt = conn.prepare(&job.target.sql).map_err(backend_error)?;
    let columns = statement_columns(&stmt);
    let formats = FormatCode::resolve(&job.result_formats, columns.len())?;
    for ((name, ty), format) in columns.iter().zip(&formats) {
        if *format == FormatCode::Binary && !ty.supports_binary() {
            return Err(OctopusError::NotSupported(format!(
                "binary format for column \"{name}\" of type {}",
                ty.name()
            )));
        }
    }
    let fields = columns
        .iter()
        .zip(&formats)
        .map(|((name, ty), format)| field_description(name, *ty, *format))
        .collect();
    let ready = WorkerEvent::Ready {
        fields,
        interrupt: interrupt.clone(),
    };
    if tx.blocking_send(ready).is_err() {
        return Ok(());
    }

    for (i, value) in job.params.iter().enumerate() {
        let name = format!("${}", i + 1);
        if let Some(index) = stmt.parameter_index(&name).map_err(backend_error)? {
            stmt.raw_bind_parameter(index, value).map_err(backend_error)?;
        }
    }

    if columns.is_empty() {
        let changes = stmt.raw_execute().map_err(backend_error)?;
        let _ = tx.blocking_send(WorkerEvent::Done { changes });
        return Ok(());
    }

    let mut rows = stmt.raw_query();
    let mut count = 0usize;
    while let Some(row) = rows.next().map_err(backend_error)? {
        let mut values = Vec::with_capacity(columns.len());
        for (i, ((_, ty), format)) in columns.iter().zip(&formats).enumerate() {
            let value = Value::from(row.get_ref(i).map_err(backend_error)?);
            values.push(ValueConverter::encode(&value, *ty, *format)?);
        }
        if tx.blocking_send(WorkerEvent::Row(values)).is_err() {
            debug!("portal closed after {} row(s), releasing statement", count);
            return Ok(());
        }
        count += 1;
    }
    let _ = tx.blocking_send(WorkerEvent::Done { changes: count });
    Ok(())
}

/// Portal that forwards a statement to the one backend it touches.
///
/// The backend connection lives on a dedicated worker thread which prepares
/// the statement, binds the parameters and streams encoded rows back over a
/// bounded channel. Dropping the receiver stops the worker.
pub struct BypassPortal {
    job: Option<BackendJob>,
    query_type: QueryType,
    cancel: Arc<CancelHandle>,
    state: PortalState,
    receiver: Option<mpsc::Receiver<WorkerEvent>>,
    interrupt: Option<Arc<InterruptHandle>>,
    fields: Vec<FieldDescription>,
    sent: usize,
    changes: Option<usize>,
}

impl BypassPortal {
    pub fn open(catalog: &Catalog, executable: &ExecutableStatement, cancel: Arc<CancelHandle>) -> Result<Self> {
        let ParsedStatement::Query {
            statement,
            query_type,
            param_types,
        } = executable.parsed.as_ref()
        else {
            return Err(OctopusError::Internal("by-pass portal over a non-query statement".to_string()));
        };
        let target = BackendTarget::resolve(catalog, statement)?;
        let params = decode_params(executable, param_types)?;
        debug!("by-pass query: {}", target.sql);
        Ok(BypassPortal {
            job: Some(BackendJob {
                target,
                params,
                result_formats: executable.result_formats.clone(),
            }),
            query_type: *query_type,
            cancel,
            state: PortalState::Initial,
            receiver: None,
            interrupt: None,
            fields: Vec::new(),
            sent: 0,
            changes: None,
        })
    }

    async fn activate(&mut self) -> Result<()> {
        if self.state != PortalState::Initial {
            return Ok(());
        }
        self.state = PortalState::Active;
        let job = self
            .job
            .take()
            .ok_or_else(|| OctopusError::Internal("portal has no statement".to_string()))?;
        let (tx, rx) = mpsc::channel(ROW_CHANNEL_CAPACITY);
        let cancel = self.cancel.clone();
        std::thread::Builder::new()
            .name("bypass-worker".to_string())
            .spawn(move || run_worker(job, tx, cancel))
            .map_err(|e| OctopusError::Internal(format!("failed to start backend worker: {e}")))?;
        self.receiver = Some(rx);

        match self.next_event().await? {
            WorkerEvent::Ready { fields, interrupt } => {
                self.fields = fields;
                self.interrupt = Some(interrupt);
                Ok(())
            }
            WorkerEvent::Failed(e) => Err(e),
            _ => Err(OctopusError::Internal("backend worker sent rows before columns".to_string())),
        }
    }

    async fn next_event(&mut self) -> Result<WorkerEvent> {
        let receiver = self
            .receiver
            .as_mut()
            .ok_or_else(|| OctopusError::Internal("portal is closed".to_string()))?;
        receiver
            .recv()
            .await
            .ok_or_else(|| OctopusError::Internal("backend worker exited unexpectedly".to_string()))
    }

    async fn fetch(&mut self, max_rows: usize) -> Result<Batch> {
        self.activate().await?;
        let mut batch = Batch::default();
        while self.changes.is_none() {
            if max_rows != 0 && batch.rows.len() == max_rows {
                batch.suspended = true;
                break;
            }
            match self.next_event().await? {
                WorkerEvent::Row(row) => batch.rows.push(row),
                WorkerEvent::Done { changes } => {
                    self.changes = Some(changes);
                    self.receiver = None;
                }
                WorkerEvent::Failed(e) => return Err(e),
                WorkerEvent::Ready { .. } => {
                    return Err(OctopusError::Internal("backend worker described twice".to_string()));
                }
            }
        }
        self.sent += batch.rows.len();
        Ok(batch)
    }

    fn fail(&mut self, err: OctopusError) -> OctopusError {
        match &err {
            OctopusError::Canceled => info!("by-pass query canceled"),
            other => warn!("by-pass query failed: {}", other),
        }
        self.state = PortalState::Failed;
        self.close();
        err
    }

    fn check_usable(&self) -> Result<()> {
        match self.state {
            PortalState::Done | PortalState::Failed => Err(OctopusError::Internal(format!(
                "portal is {:?} and cannot be used",
                self.state
            ))),
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl Portal for BypassPortal {
    async fn describe(&mut self) -> Result<Option<Vec<FieldDescription>>> {
        self.check_usable()?;
        if let Err(e) = self.activate().await {
            return Err(self.fail(e));
        }
        Ok(if self.fields.is_empty() { None } else { Some(self.fields.clone()) })
    }

    async fn run(&mut self, max_rows: usize) -> Result<Batch> {
        self.check_usable()?;
        match self.fetch(max_rows).await {
            Ok(batch) => Ok(batch),
            Err(e) => Err(self.fail(e)),
        }
    }

    fn completion_tag(&mut self) -> Result<String> {
        self.check_usable()?;
        let Some(changes) = self.changes else {
            return Err(OctopusError::Internal("portal has not been run to completion".to_string()));
        };
        self.state = PortalState::Done;
        let rows = match self.query_type {
            QueryType::Select => self.sent,
            _ => changes,
        };
        Ok(self.query_type.completion_tag(rows))
    }

    fn close(&mut self) {
        self.job = None;
        self.receiver = None;
        if self.changes.is_none() {
            if let Some(interrupt) = self.interrupt.take() {
                interrupt.interrupt();
            }
        }
    }

    fn state(&self) -> PortalState {
        self.state
    }
}

impl Drop for BypassPortal {
    fn drop(&mut self) {
        self.close();
    }
}
