//! Name-based intra-process RPC dispatch.
//!
//! Modules call each other through this envelope instead of importing
//! one another, so cyclic service references stay brokered and a later
//! move to HTTP or gRPC transports only replaces this dispatcher. A
//! process-wide singleton serves production wiring; tests build
//! isolated instances.

use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::debug;

use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct ServiceRequest {
    pub method: String,
    pub path: String,
    pub data: Value,
    pub headers: HashMap<String, String>,
}

impl ServiceRequest {
    pub fn new(method: impl Into<String>, path: impl Into<String>, data: Value) -> Self {
        Self {
            method: method.into().to_uppercase(),
            path: path.into(),
            data,
            headers: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ServiceError {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct ServiceResponse {
    pub success: bool,
    pub data: Option<Value>,
    pub error: Option<ServiceError>,
}

impl ServiceResponse {
    fn ok(data: Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    fn err(e: &AppError) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(ServiceError {
                code: e.code().to_string(),
                message: e.public_message(),
            }),
        }
    }

    fn err_code(code: &str, message: String) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(ServiceError {
                code: code.to_string(),
                message,
            }),
        }
    }
}

type Handler = Arc<dyn Fn(ServiceRequest) -> BoxFuture<'static, Result<Value, AppError>> + Send + Sync>;

#[derive(Default)]
pub struct ServiceRegistry {
    services: RwLock<HashMap<String, HashMap<String, Handler>>>,
}

fn route_key(method: &str, path: &str) -> String {
    format!("{} {}", method.to_uppercase(), path)
}

impl ServiceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The production singleton.
    pub fn global() -> &'static ServiceRegistry {
        static GLOBAL: Lazy<ServiceRegistry> = Lazy::new(ServiceRegistry::new);
        &GLOBAL
    }

    /// Registers a handler under `(service, method, path)`, replacing
    /// any previous registration for the same route.
    pub fn register<F>(&self, service: &str, method: &str, path: &str, handler: F)
    where
        F: Fn(ServiceRequest) -> BoxFuture<'static, Result<Value, AppError>>
            + Send
            + Sync
            + 'static,
    {
        self.services
            .write()
            .entry(service.to_string())
            .or_default()
            .insert(route_key(method, path), Arc::new(handler));
        debug!(service, method, path, "service route registered");
    }

    pub fn unregister_service(&self, service: &str) {
        self.services.write().remove(service);
    }

    /// Dispatches one envelope. Unknown service and unknown route
    /// surface as failed responses, never as panics.
    pub async fn request(&self, service: &str, req: ServiceRequest) -> ServiceResponse {
        let handler = {
            let services = self.services.read();
            let Some(routes) = services.get(service) else {
                return ServiceResponse::err_code(
                    "SERVICE_NOT_FOUND",
                    format!("no service registered as {service}"),
                );
            };
            match routes.get(&route_key(&req.method, &req.path)) {
                Some(h) => h.clone(),
                None => {
                    return ServiceResponse::err(&AppError::NotFound(format!(
                        "{} {} in {service}",
                        req.method, req.path
                    )));
                }
            }
        };

        match handler(req).await {
            Ok(data) => ServiceResponse::ok(data),
            Err(e) => ServiceResponse::err(&e),
        }
    }
}
