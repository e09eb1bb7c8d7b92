//! JSON-RPC Server
//!
//! JSON-RPC 2.0 over HTTP on localhost TCP.

use crate::handler::RpcHandler;
use crate::rate_limiter::RateLimiter;
use crate::types::{
    ClearCompletedRequest, EnqueueRequest, GetJobRequest, ListJobsRequest, PingRequest,
    WaitJobRequest,
};
use jsonrpsee::server::{Server, ServerHandle};
use jsonrpsee::RpcModule;
use recall_core::application::{JobQueue, OffscreenController};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

// Note: jsonrpsee doesn't support Unix sockets directly (hyper limitation)
// Using TCP on localhost as secure alternative (no external access)
pub const DEFAULT_RPC_HOST: &str = "127.0.0.1";
pub const DEFAULT_RPC_PORT: u16 = 9627;

/// RPC Server Configuration
#[derive(Debug, Clone)]
pub struct RpcServerConfig {
    pub host: String,
    pub port: u16,
    /// Token bucket size for jobs.enqueue.v1
    pub rate_limit_burst: u32,
    /// Tokens refilled per second
    pub rate_limit_rate: u32,
}

impl Default for RpcServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_RPC_HOST.to_string(),
            port: DEFAULT_RPC_PORT,
            rate_limit_burst: 200,
            rate_limit_rate: 100,
        }
    }
}

/// RPC Server
pub struct RpcServer {
    config: RpcServerConfig,
    handler: Arc<RpcHandler>,
}

impl RpcServer {
    pub fn new(
        config: RpcServerConfig,
        queue: Arc<JobQueue>,
        controller: Arc<OffscreenController>,
    ) -> Self {
        let limiter = RateLimiter::new(config.rate_limit_burst, config.rate_limit_rate);
        Self {
            config,
            handler: Arc::new(RpcHandler::new(queue, controller, limiter)),
        }
    }

    /// Start the JSON-RPC server, returning the bound address and its handle
    ///
    /// Security: Only binds to the configured host (127.0.0.1 by default)
    pub async fn start(self) -> Result<(SocketAddr, ServerHandle), String> {
        let addr = format!("{}:{}", self.config.host, self.config.port);

        let server = Server::builder()
            .build(&addr)
            .await
            .map_err(|e| format!("Failed to build server on {}: {}", addr, e))?;
        let local_addr = server
            .local_addr()
            .map_err(|e| format!("Failed to read bound address: {}", e))?;

        let module = build_module(self.handler)?;

        info!(addr = %local_addr, "JSON-RPC server started (localhost only)");
        Ok((local_addr, server.start(module)))
    }
}

macro_rules! register {
    ($module:ident, $handler:ident, $name:literal, $req:ty, $method:ident) => {{
        let handler = $handler.clone();
        $module.register_async_method($name, move |params, _, _| {
            let handler = handler.clone();
            async move {
                let req: $req = params.parse()?;
                handler.$method(req).await
            }
        })
        .map_err(|e| e.to_string())?;
    }};
    // Methods whose params may be omitted
    ($module:ident, $handler:ident, $name:literal, $req:ty, $method:ident, optional) => {{
        let handler = $handler.clone();
        $module.register_async_method($name, move |params, _, _| {
            let handler = handler.clone();
            async move {
                let req: Option<$req> = params.parse()?;
                handler.$method(req.unwrap_or_default()).await
            }
        })
        .map_err(|e| e.to_string())?;
    }};
}

fn build_module(handler: Arc<RpcHandler>) -> Result<RpcModule<()>, String> {
    let mut module = RpcModule::new(());

    register!(module, handler, "jobs.enqueue.v1", EnqueueRequest, enqueue);
    register!(module, handler, "jobs.get.v1", GetJobRequest, get);
    register!(module, handler, "jobs.list.v1", ListJobsRequest, list, optional);
    register!(
        module,
        handler,
        "jobs.clear_completed.v1",
        ClearCompletedRequest,
        clear_completed,
        optional
    );
    register!(module, handler, "jobs.wait.v1", WaitJobRequest, wait);
    register!(module, handler, "worker.ping.v1", PingRequest, ping, optional);

    Ok(module)
}
