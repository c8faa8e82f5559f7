//! Named-method registry and dispatcher.
//!
//! Each method is a type implementing [`Method`] (or [`StreamMethod`]) that
//! names its parameters and the bundle of services it needs. The registry
//! erases those types behind one handler signature and owns the error and
//! panic mapping.

mod error;
mod registry;
mod services;
mod sink;

use std::future::Future;

use serde::Serialize;
use serde::de::DeserializeOwned;

pub use error::RpcError;
pub use registry::RpcRegistry;
pub use services::{DaemonControl, FromServices, InFlight, Services};
pub use sink::EventSink;

/// A request/response method.
pub trait Method: 'static {
    const NAME: &'static str;
    type Params: DeserializeOwned + Send + 'static;
    type Deps: FromServices;
    type Output: Serialize + Send + 'static;

    fn call(
        deps: Self::Deps,
        params: Self::Params,
    ) -> impl Future<Output = Result<Self::Output, RpcError>> + Send + 'static;
}

/// A method that may push event lines before its final response.
pub trait StreamMethod: 'static {
    const NAME: &'static str;
    type Params: DeserializeOwned + Send + 'static;
    type Deps: FromServices;
    type Output: Serialize + Send + 'static;

    fn call(
        deps: Self::Deps,
        params: Self::Params,
        events: EventSink,
    ) -> impl Future<Output = Result<Self::Output, RpcError>> + Send + 'static;
}
