//! The application layer: a miniature HTTP-style request/response service
//! riding on top of the presentation layer.

use crate::layer::{Layer, Neighbors, SharedLayer};
use crate::layers::presentation::DataFormat;
use crate::layers::session::SessionId;
use crate::stack::Role;
use crate::utility::Endpoint;
use crate::{Control, FxDashMap, Message};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::fmt::{self, Display};
use std::sync::{Arc, Mutex, RwLock};

/// A simple HTTP request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpRequest {
    pub method: String,
    pub path: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: String,
}

impl HttpRequest {
    pub fn new(method: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            path: path.into(),
            headers: BTreeMap::new(),
            body: String::new(),
        }
    }

    /// A builder method that adds a header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// A builder method that sets the body.
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }
}

impl Display for HttpRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{} {} HTTP/1.1", self.method, self.path)?;
        for (name, value) in &self.headers {
            writeln!(f, "{name}: {value}")?;
        }
        write!(f, "\n{}", self.body)
    }
}

/// A simple HTTP response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpResponse {
    pub status_code: u16,
    pub status_message: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub body: String,
}

impl HttpResponse {
    pub fn new(status_code: u16, status_message: impl Into<String>) -> Self {
        Self {
            status_code,
            status_message: status_message.into(),
            headers: BTreeMap::new(),
            body: String::new(),
        }
    }

    /// A builder method that adds a header.
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// A builder method that sets the body.
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = body.into();
        self
    }
}

impl Display for HttpResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "HTTP/1.1 {} {}", self.status_code, self.status_message)?;
        for (name, value) in &self.headers {
            writeln!(f, "{name}: {value}")?;
        }
        write!(f, "\n{}", self.body)
    }
}

/// Either side of an HTTP exchange, distinguished by which required fields
/// the record carries.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum HttpPayload {
    Request(HttpRequest),
    Response(HttpResponse),
}

/// Answers an [`HttpRequest`] arriving at a route.
pub type RouteHandler = Arc<dyn Fn(&HttpRequest) -> HttpResponse + Send + Sync>;

/// Consumes the [`HttpResponse`] to an earlier request.
pub type ResponseCallback = Box<dyn FnOnce(&HttpResponse) + Send>;

/// The application layer controller.
///
/// On a server, dispatches inbound requests to registered route handlers and
/// sends the answers back. On a client, sends requests and hands inbound
/// responses to the callbacks waiting for them.
pub struct ApplicationLayer {
    role: Role,
    routes: FxDashMap<String, RouteHandler>,
    callbacks: Mutex<VecDeque<ResponseCallback>>,
    session_id: RwLock<Option<SessionId>>,
    remote: RwLock<Option<Endpoint>>,
    neighbors: Neighbors,
}

impl ApplicationLayer {
    /// Creates an application layer for the given role.
    pub fn new(role: Role) -> Self {
        Self {
            role,
            routes: FxDashMap::default(),
            callbacks: Mutex::new(VecDeque::new()),
            session_id: RwLock::new(None),
            remote: RwLock::new(None),
            neighbors: Neighbors::new(),
        }
    }

    /// Registers a handler for a route path.
    pub fn add_route(&self, path: impl Into<String>, handler: RouteHandler) {
        self.routes.insert(path.into(), handler);
    }

    /// Sets the remote endpoint requests should be addressed to.
    pub fn set_remote(&self, remote: Endpoint) {
        *self.remote.write().unwrap() = Some(remote);
    }

    /// Sets the layer below this one.
    pub fn set_lower(&self, layer: SharedLayer) {
        self.neighbors.set_lower(layer);
    }

    /// Sends a request toward the remote endpoint, optionally registering a
    /// callback for the response. Only meaningful on a client.
    pub fn send_request(&self, request: HttpRequest, callback: Option<ResponseCallback>) {
        if self.role == Role::Server {
            tracing::error!("cannot send request, this is a server");
            return;
        }
        tracing::info!("sending {} request to {}", request.method, request.path);

        if let Some(callback) = callback {
            self.callbacks.lock().unwrap().push_back(callback);
        }

        let bytes = match serde_json::to_vec(&request) {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::error!("failed to encode request: {err}");
                return;
            }
        };

        let mut control = Control::new().with_data_format(DataFormat::Json);
        if let Some(session_id) = self.session_id.read().unwrap().clone() {
            control = control.with_session_id(session_id);
        }
        if let Some(remote) = *self.remote.read().unwrap() {
            control = control
                .with_remote_ip(remote.address)
                .with_remote_port(remote.port);
        }
        self.neighbors.down(Message::from(bytes), control);
    }

    /// Sends a response back over the session the request arrived on. Only
    /// meaningful on a server.
    pub fn send_response(&self, response: HttpResponse) {
        if self.role == Role::Client {
            tracing::error!("cannot send response, this is a client");
            return;
        }
        tracing::info!(
            "sending response: {} {}",
            response.status_code,
            response.status_message
        );

        let bytes = match serde_json::to_vec(&response) {
            Ok(bytes) => bytes,
            Err(err) => {
                tracing::error!("failed to encode response: {err}");
                return;
            }
        };

        let mut control = Control::new().with_data_format(DataFormat::Json);
        if let Some(session_id) = self.session_id.read().unwrap().clone() {
            control = control.with_session_id(session_id);
        }
        self.neighbors.down(Message::from(bytes), control);
    }

    /// Dispatches a request to its route handler, or answers 404.
    fn handle_request(&self, request: &HttpRequest) -> HttpResponse {
        match self.routes.get(&request.path) {
            Some(handler) => handler(request),
            None => HttpResponse::new(404, "Not Found")
                .with_header("Content-Type", "text/plain")
                .with_body("404 Not Found"),
        }
    }
}

impl Layer for ApplicationLayer {
    fn name(&self) -> &'static str {
        "Application"
    }

    fn send_down(&self, message: Message, control: Control) {
        // The application layer is the top of the stack; anything a user
        // program hands it goes straight down
        self.neighbors.down(message, control);
    }

    fn send_up(&self, message: Message, control: Control) {
        // Adopt the session the peer opened toward us
        {
            let mut session_id = self.session_id.write().unwrap();
            if session_id.is_none() {
                *session_id = control.session_id.clone();
            }
        }

        if control.data_format != Some(DataFormat::Json) {
            tracing::info!(
                "received data: {}",
                String::from_utf8_lossy(message.as_slice())
            );
            return;
        }

        match serde_json::from_slice::<HttpPayload>(message.as_slice()) {
            Ok(HttpPayload::Request(request)) => {
                tracing::info!("received {} request for {}", request.method, request.path);
                let response = self.handle_request(&request);
                self.send_response(response);
            }
            Ok(HttpPayload::Response(response)) => {
                tracing::info!(
                    "received response: {} {}",
                    response.status_code,
                    response.status_message
                );
                let callback = self.callbacks.lock().unwrap().pop_front();
                match callback {
                    Some(callback) => callback(&response),
                    None => tracing::debug!("no callback waiting for the response"),
                }
            }
            Err(err) => tracing::error!("error processing application payload: {err}"),
        }
    }
}
