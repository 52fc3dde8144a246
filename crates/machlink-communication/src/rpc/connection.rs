//! RPC controller connection
//!
//! Wraps a [`RpcTransport`] with per-call timeouts and status validation,
//! and offers the controller's lifecycle, memory and program primitives.
//! Through its [`MemoryAccess`] impl, failures become absent values after
//! being logged and reported on the message bus.

use async_trait::async_trait;
use machlink_core::{
    BackendKind, ConnectionError, Error, EventBus, MachineMessage, MemoryAccess, ProtocolError,
    Result, Value, ValueKind,
};
use parking_lot::Mutex;
use serde_json::{json, Value as Json};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;

use super::address::RpcAddress;
use super::protocol::{Method, Request, Status, SystemStatus};
use super::transport::RpcTransport;

/// Decode a raw word as `kind`
pub fn decode_word(raw: u16, kind: ValueKind) -> Option<Value> {
    match kind {
        ValueKind::Bool => Some(Value::Bool(raw != 0)),
        ValueKind::Int16 => Some(Value::Int(i64::from(raw as i16))),
        ValueKind::UInt16 | ValueKind::Int32 | ValueKind::UInt32 => Some(Value::Int(i64::from(raw))),
        ValueKind::Float64 => Some(Value::Float(f64::from(raw))),
        ValueKind::Text | ValueKind::Pair => None,
    }
}

/// Decode bit `bit` of a raw word
pub fn decode_bit(raw: u16, bit: u8) -> Value {
    Value::Bool((raw >> bit) & 1 == 1)
}

/// Decode a raw double as `kind`
pub fn decode_double(raw: f64, kind: ValueKind) -> Option<Value> {
    match kind {
        ValueKind::Bool => Some(Value::Bool(raw != 0.0)),
        ValueKind::Int16 | ValueKind::UInt16 | ValueKind::Int32 | ValueKind::UInt32 => {
            (raw.is_finite() && raw.fract() == 0.0).then(|| Value::Int(raw as i64))
        }
        ValueKind::Float64 => Some(Value::Float(raw)),
        ValueKind::Text | ValueKind::Pair => None,
    }
}

/// Encode a value into a word; negative numbers use two's complement
pub fn encode_word(value: &Value) -> Option<u16> {
    match value {
        Value::Bool(b) => Some(u16::from(*b)),
        other => {
            let v = other.as_i64()?;
            if (i64::from(i16::MIN)..0).contains(&v) {
                Some(v as i16 as u16)
            } else {
                u16::try_from(v).ok()
            }
        }
    }
}

/// Validated access to one controller
pub struct RpcConnection {
    transport: Arc<dyn RpcTransport>,
    call_timeout: Duration,
    next_id: AtomicU64,
    events: Arc<EventBus>,
    last_report: Mutex<Option<String>>,
}

impl RpcConnection {
    /// Wrap a transport
    pub fn new(transport: Arc<dyn RpcTransport>, call_timeout: Duration, events: Arc<EventBus>) -> Self {
        Self {
            transport,
            call_timeout,
            next_id: AtomicU64::new(1),
            events,
            last_report: Mutex::new(None),
        }
    }

    /// Per-call timeout
    pub fn call_timeout(&self) -> Duration {
        self.call_timeout
    }

    /// Issue one call and validate its status
    pub async fn call(&self, method: Method, params: Json) -> Result<Json> {
        let request = Request::new(self.next_id.fetch_add(1, Ordering::Relaxed), method, params);
        let response = match timeout(self.call_timeout, self.transport.call(request)).await {
            Ok(response) => response?,
            Err(_) => {
                return Err(ConnectionError::Timeout {
                    timeout_ms: self.call_timeout.as_millis() as u64,
                }
                .into())
            }
        };

        match response.status {
            Status::Ok => Ok(response.result),
            Status::Busy => Err(ProtocolError::Rejected {
                operation: method.to_string(),
                code: 0,
                message: "controller busy".to_string(),
            }
            .into()),
            Status::Error => {
                let (code, message) = response
                    .error
                    .map(|e| (e.code(), e.message))
                    .unwrap_or((0, "unspecified error".to_string()));
                Err(ProtocolError::Rejected {
                    operation: method.to_string(),
                    code,
                    message,
                }
                .into())
            }
        }
    }

    /// Log a failure and put it on the message bus.
    ///
    /// Repeats of the previous failure are only logged at debug level so a
    /// dead connection does not flood the message display.
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

        let mut message = MachineMessage::error(BackendKind::Rpc, context, error.to_string());
        if let Error::Protocol(protocol) = error {
            if let Some(code) = protocol.code() {
                message = message.with_code(code);
            }
        }
        self.events.message(message);
    }

    fn clear_report(&self) {
        self.last_report.lock().take();
    }

    fn malformed(method: Method, reason: impl Into<String>) -> Error {
        ProtocolError::MalformedResponse {
            operation: method.to_string(),
            reason: reason.into(),
        }
        .into()
    }

    /// Open the session
    pub async fn connect(&self) -> Result<()> {
        self.transport.connect().await?;
        self.clear_report();
        Ok(())
    }

    /// Close the session
    pub async fn disconnect(&self) {
        self.transport.disconnect().await;
    }

    /// Whether a session is open
    pub fn is_connected(&self) -> bool {
        self.transport.is_connected()
    }

    /// Select the boot mode
    pub async fn select_boot_mode(&self, mode: u16) -> Result<()> {
        self.call(Method::BootModeSelect, json!({ "mode": mode })).await?;
        Ok(())
    }

    /// Query system state
    pub async fn system_status(&self) -> Result<SystemStatus> {
        let result = self.call(Method::SystemStatus, Json::Null).await?;
        serde_json::from_value(result).map_err(|e| Self::malformed(Method::SystemStatus, e.to_string()))
    }

    /// Enable auxiliary power
    pub async fn enable_auxiliary(&self) -> Result<()> {
        self.call(Method::AuxiliaryEnable, Json::Null).await?;
        Ok(())
    }

    /// Reset alarms and the NC kernel
    pub async fn reset(&self) -> Result<()> {
        self.call(Method::SystemReset, Json::Null).await?;
        Ok(())
    }

    /// Select the process mode
    pub async fn select_process_mode(&self, mode: u16) -> Result<()> {
        self.call(Method::ProcessModeSelect, json!({ "mode": mode })).await?;
        Ok(())
    }

    /// Store a part program under `number`
    pub async fn upload_program(&self, number: u16, content: &str) -> Result<()> {
        self.call(
            Method::ProgramUpload,
            json!({ "number": number, "content": content }),
        )
        .await?;
        Ok(())
    }

    /// Make program `number` active
    pub async fn select_program(&self, number: u16) -> Result<()> {
        self.call(Method::ProgramSelect, json!({ "number": number })).await?;
        Ok(())
    }

    /// Read `count` words starting at `start`
    pub async fn read_words(&self, start: u16, count: u16) -> Result<Vec<u16>> {
        let result = self
            .call(Method::ReadWords, json!({ "start": start, "count": count }))
            .await?;
        let items = result
            .as_array()
            .ok_or_else(|| Self::malformed(Method::ReadWords, "expected an array"))?;
        if items.len() != usize::from(count) {
            return Err(Self::malformed(
                Method::ReadWords,
                format!("expected {} words, got {}", count, items.len()),
            ));
        }
        items
            .iter()
            .map(|item| {
                item.as_u64()
                    .and_then(|v| u16::try_from(v).ok())
                    .ok_or_else(|| Self::malformed(Method::ReadWords, format!("bad word {}", item)))
            })
            .collect()
    }

    /// Write words starting at `start`
    pub async fn write_words(&self, start: u16, values: &[u16]) -> Result<()> {
        self.call(Method::WriteWords, json!({ "start": start, "values": values }))
            .await?;
        Ok(())
    }

    /// Read `count` doubles starting at `start`
    pub async fn read_doubles(&self, start: u16, count: u16) -> Result<Vec<f64>> {
        let result = self
            .call(Method::ReadDoubles, json!({ "start": start, "count": count }))
            .await?;
        let items = result
            .as_array()
            .ok_or_else(|| Self::malformed(Method::ReadDoubles, "expected an array"))?;
        if items.len() != usize::from(count) {
            return Err(Self::malformed(
                Method::ReadDoubles,
                format!("expected {} doubles, got {}", count, items.len()),
            ));
        }
        items
            .iter()
            .map(|item| {
                item.as_f64()
                    .ok_or_else(|| Self::malformed(Method::ReadDoubles, format!("bad double {}", item)))
            })
            .collect()
    }

    /// Write doubles starting at `start`
    pub async fn write_doubles(&self, start: u16, values: &[f64]) -> Result<()> {
        self.call(Method::WriteDoubles, json!({ "start": start, "values": values }))
            .await?;
        Ok(())
    }

    /// Set or clear one bit
    pub async fn write_bit(&self, index: u16, bit: u8, value: bool) -> Result<()> {
        self.call(
            Method::WriteBit,
            json!({ "index": index, "bit": bit, "value": value }),
        )
        .await?;
        Ok(())
    }

    /// Read one cell, surfacing transport faults
    pub async fn read_cell(&self, address: &RpcAddress, kind: ValueKind) -> Result<Option<Value>> {
        match *address {
            RpcAddress::Word { index } => {
                let words = self.read_words(index, 1).await?;
                Ok(words.first().and_then(|raw| decode_word(*raw, kind)))
            }
            RpcAddress::Bit { index, bit } => {
                let words = self.read_words(index, 1).await?;
                Ok(words.first().map(|raw| decode_bit(*raw, bit)))
            }
            RpcAddress::Double { index } => {
                let doubles = self.read_doubles(index, 1).await?;
                Ok(doubles.first().and_then(|raw| decode_double(*raw, kind)))
            }
        }
    }

    /// Write one cell, surfacing transport faults
    pub async fn write_cell(&self, address: &RpcAddress, value: &Value) -> Result<()> {
        let unexpected = |expected: &str| -> Error {
            ProtocolError::UnexpectedValue {
                address: address.to_string(),
                expected: expected.to_string(),
            }
            .into()
        };
        match *address {
            RpcAddress::Word { index } => {
                let raw = encode_word(value).ok_or_else(|| unexpected("16-bit word"))?;
                self.write_words(index, &[raw]).await
            }
            RpcAddress::Bit { index, bit } => {
                let flag = value.as_bool().ok_or_else(|| unexpected("bool"))?;
                self.write_bit(index, bit, flag).await
            }
            RpcAddress::Double { index } => {
                let raw = value.as_f64().ok_or_else(|| unexpected("number"))?;
                self.write_doubles(index, &[raw]).await
            }
        }
    }
}

#[async_trait]
impl MemoryAccess<RpcAddress> for RpcConnection {
    async fn read(&self, address: &RpcAddress, kind: ValueKind) -> Option<Value> {
        match self.read_cell(address, kind).await {
            Ok(Some(value)) => Some(value),
            Ok(None) => {
                tracing::warn!(address = %address, kind = %kind, "Cell cannot be decoded as requested");
                None
            }
            Err(e) => {
                self.report(&format!("Read {}", address), &e);
                None
            }
        }
    }

    async fn write(&self, address: &RpcAddress, value: Value) -> bool {
        match self.write_cell(address, &value).await {
            Ok(()) => true,
            Err(e) => {
                self.report(&format!("Write {}", address), &e);
                false
            }
        }
    }
}
