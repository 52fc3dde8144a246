//! Scripted controller and firmware standing in for real machines

#![allow(dead_code)]

use async_trait::async_trait;
use machlink_communication::rest::{HttpResponse, HttpTransport};
use machlink_communication::rpc::{Request, Response, RpcTransport};
use machlink_core::{AppEvent, ConnectionError, EventBus, MachineMessage, Result};
use parking_lot::Mutex;
use serde_json::{json, Value as Json};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

/// Drain every machine message published so far
pub fn drain_messages(rx: &mut broadcast::Receiver<AppEvent>) -> Vec<MachineMessage> {
    let mut messages = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let AppEvent::Message(message) = event {
            messages.push(message);
        }
    }
    messages
}

pub fn event_bus() -> Arc<EventBus> {
    Arc::new(EventBus::new())
}

// ---------------------------------------------------------------------------
// RPC controller
// ---------------------------------------------------------------------------

/// In-memory RPC controller.
///
/// Request bits in word 13 are acknowledged the way the real controller
/// does: homing sets the referenced bits in word 10, cycle start/stop and
/// feed hold drive the status bits in word 12.
pub struct MockController {
    words: Mutex<HashMap<u16, u16>>,
    doubles: Mutex<HashMap<u16, f64>>,
    programs: Mutex<BTreeMap<u16, String>>,
    calls: Mutex<Vec<(String, Json)>>,
    failing: Mutex<HashSet<String>>,
    connected: AtomicBool,
    refuse: AtomicBool,
    auto_ack: AtomicBool,
    booting_polls: AtomicUsize,
    fault: AtomicBool,
}

impl MockController {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            words: Mutex::new(HashMap::new()),
            doubles: Mutex::new(HashMap::new()),
            programs: Mutex::new(BTreeMap::new()),
            calls: Mutex::new(Vec::new()),
            failing: Mutex::new(HashSet::new()),
            connected: AtomicBool::new(false),
            refuse: AtomicBool::new(false),
            auto_ack: AtomicBool::new(true),
            booting_polls: AtomicUsize::new(0),
            fault: AtomicBool::new(false),
        })
    }

    pub fn set_word(&self, index: u16, value: u16) {
        self.words.lock().insert(index, value);
    }

    pub fn word(&self, index: u16) -> u16 {
        self.words.lock().get(&index).copied().unwrap_or(0)
    }

    pub fn bit(&self, index: u16, bit: u8) -> bool {
        self.word(index) & (1 << bit) != 0
    }

    pub fn set_double(&self, index: u16, value: f64) {
        self.doubles.lock().insert(index, value);
    }

    pub fn double(&self, index: u16) -> f64 {
        self.doubles.lock().get(&index).copied().unwrap_or(0.0)
    }

    pub fn program(&self, number: u16) -> Option<String> {
        self.programs.lock().get(&number).cloned()
    }

    /// Report `booting` for the next `polls` status queries
    pub fn boot_for(&self, polls: usize) {
        self.booting_polls.store(polls, Ordering::SeqCst);
    }

    pub fn set_fault(&self, fault: bool) {
        self.fault.store(fault, Ordering::SeqCst);
    }

    pub fn refuse_connections(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }

    pub fn set_auto_ack(&self, on: bool) {
        self.auto_ack.store(on, Ordering::SeqCst);
    }

    /// Answer every `method` call with a class 2, number 17 error
    pub fn fail_method(&self, method: &str) {
        self.failing.lock().insert(method.to_string());
    }

    pub fn heal_method(&self, method: &str) {
        self.failing.lock().remove(method);
    }

    pub fn calls(&self, method: &str) -> Vec<Json> {
        self.calls
            .lock()
            .iter()
            .filter(|(m, _)| m == method)
            .map(|(_, params)| params.clone())
            .collect()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    fn set_bit(&self, index: u16, bit: u8, value: bool) {
        let mut words = self.words.lock();
        let word = words.entry(index).or_default();
        if value {
            *word |= 1 << bit;
        } else {
            *word &= !(1 << bit);
        }
    }

    fn acknowledge(&self, index: u16, bit: u8, value: bool) {
        if index != 13 || !value || !self.auto_ack.load(Ordering::SeqCst) {
            return;
        }
        match bit {
            0 => self.set_bit(12, 0, true),
            1 => self.set_bit(12, 0, false),
            2 => self.set_bit(12, 1, true),
            3 => {
                for axis in 0..5 {
                    self.set_bit(10, axis, true);
                }
            }
            _ => {}
        }
    }

    fn status(&self) -> Json {
        let booting = self
            .booting_polls
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        let state = if booting {
            "booting"
        } else if self.fault.load(Ordering::SeqCst) {
            "fault"
        } else {
            "up"
        };
        json!({ "state": state, "boot_mode": 1, "version": "mock 1.0" })
    }

    fn range(params: &Json) -> (u16, u16) {
        let start = params["start"].as_u64().unwrap_or(0) as u16;
        let count = params["count"].as_u64().unwrap_or(0) as u16;
        (start, count)
    }

    fn dispatch(&self, request: &Request) -> Json {
        let params = &request.params;
        match request.method.as_str() {
            "system.status" => self.status(),
            "memory.read_words" => {
                let (start, count) = Self::range(params);
                json!((start..start + count).map(|i| self.word(i)).collect::<Vec<_>>())
            }
            "memory.read_doubles" => {
                let (start, count) = Self::range(params);
                json!((start..start + count).map(|i| self.double(i)).collect::<Vec<_>>())
            }
            "memory.write_words" => {
                let start = params["start"].as_u64().unwrap_or(0) as u16;
                for (offset, value) in params["values"].as_array().into_iter().flatten().enumerate() {
                    self.set_word(start + offset as u16, value.as_u64().unwrap_or(0) as u16);
                }
                Json::Null
            }
            "memory.write_doubles" => {
                let start = params["start"].as_u64().unwrap_or(0) as u16;
                for (offset, value) in params["values"].as_array().into_iter().flatten().enumerate() {
                    self.set_double(start + offset as u16, value.as_f64().unwrap_or(0.0));
                }
                Json::Null
            }
            "memory.write_bit" => {
                let index = params["index"].as_u64().unwrap_or(0) as u16;
                let bit = params["bit"].as_u64().unwrap_or(0) as u8;
                let value = params["value"].as_bool().unwrap_or(false);
                self.set_bit(index, bit, value);
                self.acknowledge(index, bit, value);
                Json::Null
            }
            "program.upload" => {
                let number = params["number"].as_u64().unwrap_or(0) as u16;
                let content = params["content"].as_str().unwrap_or_default().to_string();
                self.programs.lock().insert(number, content);
                Json::Null
            }
            _ => Json::Null,
        }
    }
}

#[async_trait]
impl RpcTransport for MockController {
    async fn connect(&self) -> Result<()> {
        if self.refuse.load(Ordering::SeqCst) {
            return Err(ConnectionError::Refused {
                endpoint: "mock:5000".to_string(),
                reason: "connection refused".to_string(),
            }
            .into());
        }
        self.connected.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn call(&self, request: Request) -> Result<Response> {
        if !self.is_connected() {
            return Err(ConnectionError::NotConnected.into());
        }
        self.calls
            .lock()
            .push((request.method.clone(), request.params.clone()));
        if self.failing.lock().contains(&request.method) {
            return Ok(Response::error(request.id, 2, 17, "injected failure"));
        }
        Ok(Response::ok(request.id, self.dispatch(&request)))
    }
}

// ---------------------------------------------------------------------------
// REST firmware
// ---------------------------------------------------------------------------

/// In-memory REST firmware with an object model, a file system and a tiny
/// G-code interpreter
pub struct MockFirmware {
    model: Mutex<Json>,
    files: Mutex<BTreeMap<String, String>>,
    gcodes: Mutex<Vec<String>>,
    requests: Mutex<Vec<String>>,
    password: String,
    down: AtomicBool,
    run_macros: AtomicBool,
    uploads: AtomicUsize,
}

impl MockFirmware {
    pub fn new(password: &str) -> Arc<Self> {
        Arc::new(Self {
            model: Mutex::new(json!({
                "state": { "status": "idle", "upTime": 42, "currentTool": -1 },
                "move": { "axes": [
                    { "letter": "X", "machinePosition": 0.0, "homed": false },
                    { "letter": "Y", "machinePosition": 0.0, "homed": false },
                    { "letter": "Z", "machinePosition": 0.0, "homed": false }
                ] },
                "heat": { "heaters": [
                    { "current": 21.5, "active": 0.0 },
                    { "current": 22.0, "active": 0.0 }
                ] },
                "global": {}
            })),
            files: Mutex::new(BTreeMap::new()),
            gcodes: Mutex::new(Vec::new()),
            requests: Mutex::new(Vec::new()),
            password: password.to_string(),
            down: AtomicBool::new(false),
            run_macros: AtomicBool::new(true),
            uploads: AtomicUsize::new(0),
        })
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    /// Whether `M98` executes macros
    pub fn set_run_macros(&self, on: bool) {
        self.run_macros.store(on, Ordering::SeqCst);
    }

    pub fn set(&self, pointer: &str, value: Json) {
        if let Some(slot) = self.model.lock().pointer_mut(pointer) {
            *slot = value;
        }
    }

    pub fn get(&self, pointer: &str) -> Option<Json> {
        self.model.lock().pointer(pointer).cloned()
    }

    pub fn set_global(&self, name: &str, value: Json) {
        if let Some(globals) = self.model.lock()["global"].as_object_mut() {
            globals.insert(name.to_string(), value);
        }
    }

    pub fn global(&self, name: &str) -> Option<Json> {
        self.model.lock()["global"].get(name).cloned()
    }

    pub fn put_file(&self, path: &str, content: &str) {
        self.files.lock().insert(path.to_string(), content.to_string());
    }

    pub fn file(&self, path: &str) -> Option<String> {
        self.files.lock().get(path).cloned()
    }

    pub fn uploads(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }

    pub fn gcodes(&self) -> Vec<String> {
        self.gcodes.lock().clone()
    }

    pub fn requests(&self, path: &str) -> usize {
        self.requests.lock().iter().filter(|p| *p == path).count()
    }

    fn parse_literal(text: &str) -> Json {
        let text = text.trim();
        if let Some(inner) = text.strip_prefix('"').and_then(|t| t.strip_suffix('"')) {
            return Json::String(inner.replace("\"\"", "\""));
        }
        serde_json::from_str(text).unwrap_or(Json::Null)
    }

    fn lookup(&self, key: &str) -> Json {
        let model = self.model.lock();
        key.split('.')
            .try_fold(&*model, |node, part| node.get(part))
            .cloned()
            .unwrap_or(Json::Null)
    }

    fn run_macro(&self, path: &str) {
        let Some(content) = self.file(path) else {
            return;
        };
        if !self.run_macros.load(Ordering::SeqCst) {
            return;
        }
        for line in content.lines() {
            let Some(rest) = line.trim().strip_prefix("global ") else {
                continue;
            };
            if let Some((name, value)) = rest.split_once('=') {
                let name = name.trim();
                if self.global(name).is_none() {
                    self.set_global(name, Self::parse_literal(value));
                }
            }
        }
    }

    fn execute(&self, code: &str) {
        self.gcodes.lock().push(code.to_string());
        if let Some(rest) = code.strip_prefix("set global.") {
            if let Some((name, value)) = rest.split_once('=') {
                self.set_global(name.trim(), Self::parse_literal(value));
            }
            return;
        }
        if let Some(path) = code
            .strip_prefix("M98 P\"")
            .and_then(|rest| rest.strip_suffix('"'))
        {
            self.run_macro(path);
            return;
        }
        match code {
            "G28" => {
                let mut model = self.model.lock();
                for axis in model["move"]["axes"].as_array_mut().into_iter().flatten() {
                    axis["homed"] = Json::Bool(true);
                }
            }
            "M24" => self.set("/state/status", json!("processing")),
            "M25" => self.set("/state/status", json!("paused")),
            "M0" => self.set("/state/status", json!("idle")),
            _ => {}
        }
    }

    fn param<'a>(query: &[(&str, &'a str)], name: &str) -> Option<&'a str> {
        query.iter().find(|(key, _)| *key == name).map(|(_, value)| *value)
    }

    fn respond(&self, path: &str, query: &[(&str, &str)]) -> Json {
        match path {
            "/rr_connect" => {
                if Self::param(query, "password") == Some(self.password.as_str()) {
                    json!({ "err": 0, "sessionTimeout": 8000, "boardType": "mock" })
                } else {
                    json!({ "err": 1 })
                }
            }
            "/rr_disconnect" => json!({ "err": 0 }),
            "/rr_model" => {
                let key = Self::param(query, "key").unwrap_or_default();
                json!({ "key": key, "flags": "d99vn", "result": self.lookup(key) })
            }
            "/rr_gcode" => {
                self.execute(Self::param(query, "gcode").unwrap_or_default());
                json!({ "buff": 255 })
            }
            "/rr_fileinfo" => {
                let name = Self::param(query, "name").unwrap_or_default();
                match self.file(name) {
                    Some(content) => json!({ "err": 0, "size": content.len() }),
                    None => json!({ "err": 1 }),
                }
            }
            _ => Json::Null,
        }
    }
}

#[async_trait]
impl HttpTransport for MockFirmware {
    async fn get(&self, path: &str, query: &[(&str, &str)]) -> Result<HttpResponse> {
        if self.down.load(Ordering::SeqCst) {
            return Err(ConnectionError::Refused {
                endpoint: "http://mock".to_string(),
                reason: "connection refused".to_string(),
            }
            .into());
        }
        self.requests.lock().push(path.to_string());
        if path == "/rr_download" {
            let name = Self::param(query, "name").unwrap_or_default();
            return Ok(match self.file(name) {
                Some(content) => HttpResponse::ok(content),
                None => HttpResponse {
                    status: 404,
                    body: String::new(),
                },
            });
        }
        let body = self.respond(path, query);
        if body.is_null() {
            return Ok(HttpResponse {
                status: 404,
                body: String::new(),
            });
        }
        Ok(HttpResponse::ok(body.to_string()))
    }

    async fn post(&self, path: &str, query: &[(&str, &str)], body: Vec<u8>) -> Result<HttpResponse> {
        if self.down.load(Ordering::SeqCst) {
            return Err(ConnectionError::Refused {
                endpoint: "http://mock".to_string(),
                reason: "connection refused".to_string(),
            }
            .into());
        }
        self.requests.lock().push(path.to_string());
        if path != "/rr_upload" {
            return Ok(HttpResponse {
                status: 404,
                body: String::new(),
            });
        }
        let name = Self::param(query, "name").unwrap_or_default();
        self.files
            .lock()
            .insert(name.to_string(), String::from_utf8_lossy(&body).into_owned());
        self.uploads.fetch_add(1, Ordering::SeqCst);
        Ok(HttpResponse::ok(json!({ "err": 0 }).to_string()))
    }
}
