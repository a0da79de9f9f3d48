//! MS SQL Server connection using tiberius

use std::sync::atomic::{AtomicBool, Ordering};

use futures::TryStreamExt;
use procbatch::{BoundParameter, ServerVersion};
use procbatch_core::{BatchError, CursorItem};
use tiberius::{Client, Config, QueryItem};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};

use crate::convert::{bound_to_params, column_data_to_value, column_to_meta};

const VERSION_QUERY: &str = "SELECT CAST(SERVERPROPERTY('ProductVersion') AS nvarchar(128))";

/// MS SQL Server connection errors
#[derive(Debug, thiserror::Error)]
pub enum MssqlConnectionError {
    #[error("Invalid connection string: {0}")]
    InvalidConnectionString(String),

    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Query execution failed: {0}")]
    QueryFailed(String),

    #[error("Unrecognized server version: {0}")]
    UnknownVersion(String),

    #[error("Connection is closed")]
    ConnectionClosed,

    #[error("Tiberius error: {0}")]
    Tiberius(#[from] tiberius::error::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<MssqlConnectionError> for BatchError {
    fn from(err: MssqlConnectionError) -> Self {
        BatchError::Driver(err.to_string())
    }
}

/// A single tiberius client, used by one batch at a time
pub struct MssqlConnection {
    client: Mutex<Client<Compat<TcpStream>>>,
    closed: AtomicBool,
    version: ServerVersion,
    host: String,
}

impl MssqlConnection {
    /// Connect using an ADO.NET style connection string
    /// (`server=tcp:host,1433;database=app;user id=sa;password=...`)
    #[tracing::instrument(skip(connection_string))]
    pub async fn connect(connection_string: &str) -> Result<Self, MssqlConnectionError> {
        let config = Config::from_ado_string(connection_string)
            .map_err(|e| MssqlConnectionError::InvalidConnectionString(e.to_string()))?;
        let host = config.get_addr();
        tracing::debug!(host = %host, "connecting to MS SQL Server");

        let tcp = TcpStream::connect(&host)
            .await
            .map_err(|e| MssqlConnectionError::ConnectionFailed(e.to_string()))?;
        tcp.set_nodelay(true)?;

        let mut client = Client::connect(config, tcp.compat_write())
            .await
            .map_err(|e| MssqlConnectionError::ConnectionFailed(e.to_string()))?;

        let version = query_version(&mut client).await?;
        tracing::debug!(host = %host, version = %version, "connected to MS SQL Server");

        Ok(Self {
            client: Mutex::new(client),
            closed: AtomicBool::new(false),
            version,
            host,
        })
    }

    pub fn server_version(&self) -> ServerVersion {
        self.version
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        tracing::debug!(host = %self.host, "MS SQL Server connection closed");
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Send `sql` and record the whole response.
    ///
    /// A server error ends the recording with a [`CursorItem::Error`] in the
    /// place it occurred, so everything before it stays readable.
    pub async fn run_batch(
        &self,
        sql: &str,
        parameters: &[BoundParameter],
    ) -> Result<Vec<CursorItem>, MssqlConnectionError> {
        self.ensure_not_closed()?;
        let start = std::time::Instant::now();

        let params = bound_to_params(parameters);
        let param_refs: Vec<&dyn tiberius::ToSql> =
            params.iter().map(|p| p as &dyn tiberius::ToSql).collect();

        let mut client = self.client.lock().await;
        let mut stream = match client.query(sql, &param_refs[..]).await {
            Ok(stream) => stream,
            Err(tiberius::error::Error::Server(e)) => {
                tracing::debug!(error = %e, "batch failed before returning results");
                return Ok(vec![CursorItem::Error(e.to_string())]);
            }
            Err(e) => return Err(e.into()),
        };

        let mut items = Vec::new();
        loop {
            match stream.try_next().await {
                Ok(Some(QueryItem::Metadata(meta))) => {
                    let columns = meta
                        .columns()
                        .iter()
                        .enumerate()
                        .map(|(ordinal, column)| column_to_meta(column, ordinal))
                        .collect();
                    items.push(CursorItem::ResultSet(columns));
                }
                Ok(Some(QueryItem::Row(row))) => {
                    let values = row
                        .into_iter()
                        .map(column_data_to_value)
                        .collect::<procbatch_core::Result<Vec<_>>>()
                        .map_err(|e| MssqlConnectionError::QueryFailed(e.to_string()))?;
                    items.push(CursorItem::Row(values));
                }
                Ok(None) => break,
                Err(tiberius::error::Error::Server(e)) => {
                    tracing::debug!(error = %e, "batch raised a server error");
                    items.push(CursorItem::Error(e.to_string()));
                    break;
                }
                Err(e) => return Err(e.into()),
            }
        }

        tracing::debug!(
            items = items.len(),
            duration_ms = start.elapsed().as_millis() as u64,
            "batch response received"
        );
        Ok(items)
    }

    fn ensure_not_closed(&self) -> Result<(), MssqlConnectionError> {
        if self.is_closed() {
            return Err(MssqlConnectionError::ConnectionClosed);
        }
        Ok(())
    }
}

async fn query_version(
    client: &mut Client<Compat<TcpStream>>,
) -> Result<ServerVersion, MssqlConnectionError> {
    let row = client.query(VERSION_QUERY, &[]).await?.into_row().await?;
    let text = match &row {
        Some(row) => row.try_get::<&str, _>(0)?,
        None => None,
    }
    .ok_or_else(|| MssqlConnectionError::UnknownVersion("no ProductVersion".into()))?;
    parse_product_version(text)
}

/// Parse `SERVERPROPERTY('ProductVersion')`, e.g. `16.0.1000.6`
pub(crate) fn parse_product_version(text: &str) -> Result<ServerVersion, MssqlConnectionError> {
    text.parse::<ServerVersion>()
        .map_err(|_| MssqlConnectionError::UnknownVersion(text.to_string()))
}

impl std::fmt::Debug for MssqlConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MssqlConnection")
            .field("host", &self.host)
            .field("version", &self.version)
            .field("closed", &self.is_closed())
            .finish()
    }
}
