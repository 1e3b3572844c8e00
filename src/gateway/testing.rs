//! Scripted gateway standing in for the poll server in tests.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::Notify;

use super::{Method, RemoteGateway};
use crate::error::{PollError, Result};

/// What the fake server does with a request.
#[derive(Debug, Clone)]
pub enum Reply {
    Json(Value),
    Status(u16),
    Offline,
    /// Wait until the gate is opened, then answer with the inner reply.
    Held(Arc<Notify>, Box<Reply>),
}

impl Reply {
    fn into_result(self) -> Result<Value> {
        match self {
            Reply::Json(value) => Ok(value),
            Reply::Status(code) => Err(PollError::HttpStatus(code)),
            Reply::Offline => Err(PollError::NetworkUnreachable("connection refused".into())),
            Reply::Held(_, inner) => inner.into_result(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
    pub token: Option<String>,
}

#[derive(Default)]
struct Script {
    once: HashMap<(Method, String), VecDeque<Reply>>,
    always: HashMap<(Method, String), Reply>,
}

/// Answers from one-shot replies first, then standing routes. With nothing
/// configured every request is `Offline`.
#[derive(Default)]
pub struct ScriptedGateway {
    script: Mutex<Script>,
    calls: Mutex<Vec<RecordedCall>>,
}

impl ScriptedGateway {
    pub fn offline() -> Self {
        Self::default()
    }

    pub fn route(&self, method: Method, path: &str, reply: Reply) -> &Self {
        self.script
            .lock()
            .unwrap()
            .always
            .insert((method, path.to_string()), reply);
        self
    }

    pub fn route_once(&self, method: Method, path: &str, reply: Reply) -> &Self {
        self.script
            .lock()
            .unwrap()
            .once
            .entry((method, path.to_string()))
            .or_default()
            .push_back(reply);
        self
    }

    /// Drop every route so the server looks unreachable again.
    pub fn go_offline(&self) {
        *self.script.lock().unwrap() = Script::default();
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_to(&self, method: Method, path: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|c| c.method == method && c.path == path)
            .count()
    }
}

#[async_trait]
impl RemoteGateway for ScriptedGateway {
    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<Value>,
        token: Option<&str>,
    ) -> Result<Value> {
        self.calls.lock().unwrap().push(RecordedCall {
            method: method.clone(),
            path: path.to_string(),
            body,
            token: token.map(str::to_string),
        });

        let reply = {
            let mut script = self.script.lock().unwrap();
            let key = (method, path.to_string());
            match script.once.get_mut(&key).and_then(VecDeque::pop_front) {
                Some(reply) => reply,
                None => script.always.get(&key).cloned().unwrap_or(Reply::Offline),
            }
        };

        if let Reply::Held(gate, _) = &reply {
            gate.notified().await;
        }
        reply.into_result()
    }
}
