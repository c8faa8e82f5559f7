use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use futures::future::BoxFuture;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use tracing::{debug, error, warn};
use wt_core::protocol::{ErrorCode, ErrorObject, Request, Response};

use super::{EventSink, FromServices, Method, RpcError, Services, StreamMethod};

type Handler =
    Box<dyn Fn(&Services, Value, EventSink) -> BoxFuture<'static, Result<Value, RpcError>> + Send + Sync>;

/// Method name to handler, plus the services every handler draws from.
pub struct RpcRegistry {
    services: Arc<Services>,
    handlers: HashMap<&'static str, Handler>,
}

fn parse_params<P: DeserializeOwned>(params: Value) -> Result<P, RpcError> {
    let params = if params.is_null() { json!({}) } else { params };
    serde_json::from_value(params).map_err(|e| RpcError::InvalidParams(e.to_string()))
}

fn to_result<O: Serialize>(output: &O) -> Result<Value, RpcError> {
    serde_json::to_value(output).map_err(|e| RpcError::Internal(e.to_string()))
}

impl RpcRegistry {
    pub fn new(services: Arc<Services>) -> Self {
        Self {
            services,
            handlers: HashMap::new(),
        }
    }

    pub const fn services(&self) -> &Arc<Services> {
        &self.services
    }

    /// Add a request/response method.
    pub fn register<M: Method>(&mut self) -> &mut Self {
        let handler: Handler = Box::new(|services, params, _events| {
            let deps = M::Deps::from_services(services);
            Box::pin(async move {
                let params = parse_params::<M::Params>(params)?;
                let output = M::call(deps, params).await?;
                to_result(&output)
            })
        });
        self.insert(M::NAME, handler);
        self
    }

    /// Add a method that streams events before its response.
    pub fn register_stream<M: StreamMethod>(&mut self) -> &mut Self {
        let handler: Handler = Box::new(|services, params, events| {
            let deps = M::Deps::from_services(services);
            Box::pin(async move {
                let params = parse_params::<M::Params>(params)?;
                let output = M::call(deps, params, events).await?;
                to_result(&output)
            })
        });
        self.insert(M::NAME, handler);
        self
    }

    fn insert(&mut self, name: &'static str, handler: Handler) {
        if self.handlers.insert(name, handler).is_some() {
            warn!(method = name, "Method registered twice, keeping the latest");
        }
    }

    /// Registered method names, sorted.
    pub fn methods(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.handlers.keys().copied().collect();
        names.sort_unstable();
        names
    }

    /// Run one request to completion. Never fails: every outcome, including
    /// a panicking handler, becomes a response.
    pub async fn dispatch(&self, request: Request, events: EventSink) -> Response {
        let Request {
            method, params, id, ..
        } = request;
        let Some(handler) = self.handlers.get(method.as_str()) else {
            warn!(method, "Unknown method");
            return Response::failure(
                id,
                ErrorObject::new(ErrorCode::MethodNotFound, format!("Method not found: {method}"))
                    .with_data(json!({ "method": method })),
            );
        };

        let started = Instant::now();
        let outcome = tokio::spawn(handler(&self.services, params, events)).await;
        let elapsed_ms = started.elapsed().as_millis();
        match outcome {
            Ok(Ok(result)) => {
                debug!(method, elapsed_ms, "Request handled");
                Response::success(id, result)
            }
            Ok(Err(e)) => {
                warn!(method, elapsed_ms, error = %e, "Request failed");
                Response::failure(id, e.to_error_object())
            }
            Err(e) => {
                error!(method, elapsed_ms, error = %e, "Handler panicked");
                Response::failure(
                    id,
                    ErrorObject::new(
                        ErrorCode::InternalError,
                        format!("Internal error while handling {method}"),
                    ),
                )
            }
        }
    }
}
