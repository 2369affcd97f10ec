//! Request handlers for the HTTP and RPC endpoints

pub mod http;
pub mod rpc;

use std::convert::Infallible;
use std::sync::Arc;
use warp::{Filter, Reply};

use crate::services::AppServices;

pub use http::{error_reply, with_access};
pub use rpc::{dispatch, handle_rpc_socket};

// Helper function to include the service graph in a request
pub fn with_services(
    services: Arc<AppServices>,
) -> impl Filter<Extract = (Arc<AppServices>,), Error = Infallible> + Clone {
    warp::any().map(move || services.clone())
}

/// HTTP routes and the `/rpc` WebSocket endpoint, with access logging and JSON rejections
pub fn app(
    services: Arc<AppServices>,
) -> impl Filter<Extract = (impl Reply,), Error = Infallible> + Clone {
    http::routes(services.clone())
        .or(rpc::rpc_route(services))
        .with(warp::log("flaggate::http"))
        .recover(http::handle_rejection)
}
