//! REST firmware connection
//!
//! Each request is validated on three levels: HTTP status, JSON body and
//! the firmware's `err` field. Only user globals are writable, through a
//! `set global.<name> = <literal>` command.

use async_trait::async_trait;
use machlink_core::{
    BackendKind, ConnectionError, Error, EventBus, MachineMessage, MemoryAccess, ProtocolError,
    Result, Value, ValueKind,
};
use parking_lot::Mutex;
use serde_json::Value as Json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

use super::address::RestAddress;
use super::persisted::literal;
use super::transport::{HttpResponse, HttpTransport};

/// Object model flags: verbose, no nesting limit
const MODEL_FLAGS: &str = "d99vn";

/// Validated access to one firmware instance
pub struct RestConnection {
    transport: Arc<dyn HttpTransport>,
    password: String,
    call_timeout: Duration,
    events: Arc<EventBus>,
    session: AtomicBool,
    last_report: Mutex<Option<String>>,
}

impl RestConnection {
    /// Wrap a transport
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        password: impl Into<String>,
        call_timeout: Duration,
        events: Arc<EventBus>,
    ) -> Self {
        Self {
            transport,
            password: password.into(),
            call_timeout,
            events,
            session: AtomicBool::new(false),
            last_report: Mutex::new(None),
        }
    }

    /// Whether a session is open
    pub fn has_session(&self) -> bool {
        self.session.load(Ordering::SeqCst)
    }

    /// Log a failure and put it on the message bus, once per distinct failure
    pub fn report(&self, context: &str, error: &Error) {
        let text = format!("{}: {}", context, error);
        {
            let mut last = self.last_report.lock();
            if last.as_deref() == Some(text.as_str()) {
                tracing::debug!("{}", text);
                return;
            }
            *last = Some(text);
        }

        let mut message = MachineMessage::error(BackendKind::Rest, context, error.to_string());
        if let Error::Protocol(protocol) = error {
            if let Some(code) = protocol.code() {
                message = message.with_code(code);
            }
        }
        self.events.message(message);
    }

    fn timeout_error(&self) -> Error {
        ConnectionError::Timeout {
            timeout_ms: self.call_timeout.as_millis() as u64,
        }
        .into()
    }

    fn parse(path: &str, response: HttpResponse) -> Result<Json> {
        if !response.is_success() {
            return Err(ConnectionError::Http {
                reason: format!("{} returned HTTP {}", path, response.status),
            }
            .into());
        }
        serde_json::from_str(&response.body).map_err(|e| {
            ProtocolError::MalformedResponse {
                operation: path.to_string(),
                reason: e.to_string(),
            }
            .into()
        })
    }

    fn check_err(path: &str, json: Json) -> Result<Json> {
        match json.get("err").and_then(Json::as_i64) {
            None | Some(0) => Ok(json),
            Some(code) => Err(ProtocolError::Rejected {
                operation: path.to_string(),
                code,
                message: Self::describe_err(path, code).to_string(),
            }
            .into()),
        }
    }

    fn describe_err(path: &str, code: i64) -> &'static str {
        match (path, code) {
            ("/rr_connect", 1) => "wrong password",
            ("/rr_connect", 2) => "no more sessions available",
            (_, 1) => "not found",
            _ => "request failed",
        }
    }

    /// GET with HTTP and JSON validation, without looking at `err`
    async fn fetch(&self, path: &str, query: &[(&str, &str)]) -> Result<Json> {
        let response = timeout(self.call_timeout, self.transport.get(path, query))
            .await
            .map_err(|_| self.timeout_error())??;
        Self::parse(path, response)
    }

    /// GET with full validation
    pub async fn request(&self, path: &str, query: &[(&str, &str)]) -> Result<Json> {
        let json = self.fetch(path, query).await?;
        Self::check_err(path, json)
    }

    /// Check that the web server answers at all
    pub async fn ping(&self) -> Result<()> {
        let response = timeout(
            self.call_timeout,
            self.transport
                .get("/rr_model", &[("key", "state.upTime"), ("flags", MODEL_FLAGS)]),
        )
        .await
        .map_err(|_| self.timeout_error())??;
        if response.status >= 500 {
            return Err(ConnectionError::Http {
                reason: format!("server error {}", response.status),
            }
            .into());
        }
        Ok(())
    }

    /// Open a session
    pub async fn connect_session(&self) -> Result<()> {
        let time = chrono::Local::now().format("%Y-%m-%dT%H:%M:%S").to_string();
        self.request(
            "/rr_connect",
            &[("password", self.password.as_str()), ("time", time.as_str())],
        )
        .await?;
        self.session.store(true, Ordering::SeqCst);
        self.last_report.lock().take();
        tracing::info!("Firmware session opened");
        Ok(())
    }

    /// Close the session, stale or not
    pub async fn disconnect_session(&self) -> Result<()> {
        self.session.store(false, Ordering::SeqCst);
        self.request("/rr_disconnect", &[]).await?;
        Ok(())
    }

    /// Object model value at `key`; `Null` when the key does not exist
    pub async fn model(&self, key: &str) -> Result<Json> {
        let json = self
            .request("/rr_model", &[("key", key), ("flags", MODEL_FLAGS)])
            .await?;
        Ok(json.get("result").cloned().unwrap_or(Json::Null))
    }

    /// Queue a G-code command
    pub async fn gcode(&self, code: &str) -> Result<()> {
        tracing::debug!(gcode = code, "Sending G-code");
        self.request("/rr_gcode", &[("gcode", code)]).await?;
        Ok(())
    }

    /// Store `content` at `path` on the firmware's file system
    pub async fn upload(&self, path: &str, content: &[u8]) -> Result<()> {
        let response = timeout(
            self.call_timeout,
            self.transport
                .post("/rr_upload", &[("name", path)], content.to_vec()),
        )
        .await
        .map_err(|_| self.timeout_error())??;
        Self::check_err("/rr_upload", Self::parse("/rr_upload", response)?)?;
        Ok(())
    }

    /// Content of the file at `path`; `None` when it does not exist
    pub async fn download(&self, path: &str) -> Result<Option<String>> {
        let response = timeout(
            self.call_timeout,
            self.transport.get("/rr_download", &[("name", path)]),
        )
        .await
        .map_err(|_| self.timeout_error())??;
        match response.status {
            404 => Ok(None),
            _ if response.is_success() => Ok(Some(response.body)),
            status => Err(ConnectionError::Http {
                reason: format!("download of {} failed with status {}", path, status),
            }
            .into()),
        }
    }

    /// Whether a file exists
    pub async fn file_exists(&self, path: &str) -> Result<bool> {
        let json = self.fetch("/rr_fileinfo", &[("name", path)]).await?;
        match json.get("err").and_then(Json::as_i64) {
            None | Some(0) => Ok(true),
            Some(1) => Ok(false),
            Some(_) => Self::check_err("/rr_fileinfo", json).map(|_| true),
        }
    }

    async fn read_cell(&self, address: &RestAddress, kind: ValueKind) -> Result<Option<Value>> {
        let root = self.model(address.model_key()).await?;
        Ok(address
            .select(&root)
            .and_then(|node| Value::from_json(node, kind)))
    }

    async fn write_cell(&self, address: &RestAddress, value: &Value) -> Result<()> {
        let Some(name) = address.global_name() else {
            return Err(ProtocolError::NotWritable {
                address: address.to_string(),
            }
            .into());
        };
        let literal = literal(value).ok_or_else(|| ProtocolError::UnexpectedValue {
            address: address.to_string(),
            expected: "a value with a literal form".to_string(),
        })?;
        self.gcode(&format!("set global.{} = {}", name, literal)).await
    }
}

#[async_trait]
impl MemoryAccess<RestAddress> for RestConnection {
    async fn read(&self, address: &RestAddress, kind: ValueKind) -> Option<Value> {
        match self.read_cell(address, kind).await {
            Ok(value) => {
                if value.is_none() {
                    tracing::debug!(address = %address, kind = %kind, "No value in object model");
                }
                value
            }
            Err(e) => {
                self.report(&format!("Read {}", address), &e);
                None
            }
        }
    }

    async fn write(&self, address: &RestAddress, value: Value) -> bool {
        match self.write_cell(address, &value).await {
            Ok(()) => true,
            Err(e) => {
                self.report(&format!("Write {}", address), &e);
                false
            }
        }
    }
}
