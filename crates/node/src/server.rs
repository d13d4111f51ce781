//! HTTP transport server.
//!
//! Multiplexes the node's public surface on one port: the identify
//! handshake on `GET /`, overlay RPC ingress on `POST /rpc/`, and shard
//! transfers on `/shards/{hash}`. Transfers are token-gated and fully
//! streamed; an upload is hashed as it lands and any integrity or size
//! violation unlinks the partial shard.

use std::convert::Infallible;
use std::sync::Arc;

use futures::{StreamExt, TryStreamExt};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full, Limited, StreamBody};
use hyper::body::{Bytes, Frame, Incoming};
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use sha2::{Digest, Sha256};
use tokio::net::TcpListener;
use tokio_util::io::ReaderStream;

use silo_protocol::hashing::content_hash_from_digest;
use silo_protocol::RpcRequest;

use crate::error::Result;
use crate::handlers::RpcHandlers;
use crate::metrics;
use crate::state::{NodeEvent, NodeState};

type RespBody = BoxBody<Bytes, std::io::Error>;

/// The node's HTTP transport server.
pub struct ShardServer {
    state: Arc<NodeState>,
    handlers: Arc<RpcHandlers>,
}

impl ShardServer {
    pub fn new(state: Arc<NodeState>, handlers: Arc<RpcHandlers>) -> Self {
        Self { state, handlers }
    }

    /// Accept loop. One task per connection.
    pub async fn run(self: Arc<Self>, listener: TcpListener) -> Result<()> {
        loop {
            let (stream, remote) = listener.accept().await?;
            let server = self.clone();
            tokio::spawn(async move {
                let io = TokioIo::new(stream);
                let service = service_fn(move |req| {
                    let server = server.clone();
                    async move { Ok::<_, Infallible>(server.route(req).await) }
                });
                if let Err(e) = http1::Builder::new().serve_connection(io, service).await {
                    tracing::debug!(remote = %remote, "Connection error: {}", e);
                }
            });
        }
    }

    async fn route(&self, req: Request<Incoming>) -> Response<RespBody> {
        let method = req.method().clone();
        let path = req.uri().path().to_string();

        if method == Method::OPTIONS {
            return respond(StatusCode::OK, Bytes::new());
        }

        if let Some(hash) = path.strip_prefix("/shards/") {
            let hash = hash.trim_end_matches('/').to_string();
            let token = query_param(req.uri().query(), "token");
            return match method {
                Method::POST => self.upload(&hash, token.as_deref(), req.into_body()).await,
                Method::GET => self.download(&hash, token.as_deref()).await,
                _ => respond(StatusCode::METHOD_NOT_ALLOWED, "Method not allowed"),
            };
        }

        match (method, path.as_str()) {
            (Method::GET, "/") => self.identify(),
            (Method::POST, "/rpc" | "/rpc/") => self.rpc_ingress(req.into_body()).await,
            _ => respond(StatusCode::NOT_FOUND, "Not found"),
        }
    }

    /// `GET /`: unauthenticated identify handshake.
    fn identify(&self) -> Response<RespBody> {
        match serde_json::to_vec(&self.state.contact()) {
            Ok(body) => json_response(StatusCode::OK, body),
            Err(_) => respond(StatusCode::INTERNAL_SERVER_ERROR, "Internal error"),
        }
    }

    /// `POST /rpc/`: overlay RPC ingress.
    async fn rpc_ingress(&self, body: Incoming) -> Response<RespBody> {
        let limit = self.state.config.transfer.max_rpc_body_bytes;
        let collected = match Limited::new(body, limit).collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(_) => return respond(StatusCode::BAD_REQUEST, "Envelope too large or truncated"),
        };
        let request: RpcRequest = match serde_json::from_slice(&collected) {
            Ok(request) => request,
            Err(_) => return respond(StatusCode::BAD_REQUEST, "Malformed RPC envelope"),
        };
        let reply = self.handlers.dispatch(request).await;
        match serde_json::to_vec(&reply) {
            Ok(body) => json_response(StatusCode::OK, body),
            Err(_) => respond(StatusCode::INTERNAL_SERVER_ERROR, "Internal error"),
        }
    }

    /// `POST /shards/{hash}?token=`: token-gated streamed upload.
    async fn upload(
        &self,
        hash: &str,
        token: Option<&str>,
        mut body: Incoming,
    ) -> Response<RespBody> {
        let Some(token) = token else {
            return respond(StatusCode::UNAUTHORIZED, "Not authorized");
        };
        let authorized = {
            let tokens = self.state.tokens.lock().expect("token table lock");
            tokens.authorize(token, hash).map(|record| record.clone())
        };
        if authorized.is_err() {
            return respond(StatusCode::UNAUTHORIZED, "Not authorized");
        }

        let Ok(Some((_, contract))) = self.state.contracts.find_by_hash(hash) else {
            return respond(StatusCode::NOT_FOUND, "Contract not found");
        };
        let data_size = contract.data_size().unwrap_or(0);

        let mut writer = match self.state.shards.write_stream(hash).await {
            Ok(writer) => writer,
            Err(_) => return respond(StatusCode::INTERNAL_SERVER_ERROR, "Internal error"),
        };

        let mut hasher = Sha256::new();
        let mut received = 0u64;
        while let Some(frame) = body.frame().await {
            let frame = match frame {
                Ok(frame) => frame,
                Err(_) => {
                    let _ = writer.abort().await;
                    self.revoke(token);
                    return respond(StatusCode::BAD_REQUEST, "Transfer interrupted");
                }
            };
            let Some(data) = frame.data_ref() else {
                continue;
            };
            received += data.len() as u64;
            if received > data_size {
                let _ = writer.abort().await;
                let _ = self.state.shards.unlink(hash).await;
                self.revoke(token);
                return respond(StatusCode::BAD_REQUEST, "Shard exceeds contracted size");
            }
            hasher.update(data);
            if writer.write_chunk(data).await.is_err() {
                let _ = writer.abort().await;
                self.revoke(token);
                return respond(StatusCode::INTERNAL_SERVER_ERROR, "Internal error");
            }
        }

        let digest: [u8; 32] = hasher.finalize().into();
        if content_hash_from_digest(&digest) != hash {
            let _ = writer.abort().await;
            let _ = self.state.shards.unlink(hash).await;
            self.revoke(token);
            return respond(StatusCode::BAD_REQUEST, "Hash does not match contract");
        }

        if writer.commit().await.is_err() {
            self.revoke(token);
            return respond(StatusCode::INTERNAL_SERVER_ERROR, "Internal error");
        }

        self.revoke(token);
        metrics::UPLOADS_TOTAL.inc();
        let _ = self.state.events.send(NodeEvent::ShardUploaded {
            hash: hash.to_string(),
        });
        tracing::info!(hash = %hash, bytes = received, "Shard uploaded");
        respond(StatusCode::OK, Bytes::new())
    }

    /// `GET /shards/{hash}?token=`: token-gated streamed download.
    async fn download(&self, hash: &str, token: Option<&str>) -> Response<RespBody> {
        let Some(token) = token else {
            return respond(StatusCode::UNAUTHORIZED, "Not authorized");
        };
        {
            let tokens = self.state.tokens.lock().expect("token table lock");
            if tokens.authorize(token, hash).is_err() {
                return respond(StatusCode::UNAUTHORIZED, "Not authorized");
            }
        }

        let file = match self.state.shards.read_stream(hash).await {
            Ok(file) => file,
            Err(_) => return respond(StatusCode::NOT_FOUND, "Shard not found"),
        };

        // Revocation and the downloaded event fire when the stream ends.
        let tokens = self.state.tokens.clone();
        let events = self.state.events.clone();
        let token = token.to_string();
        let hash = hash.to_string();
        let tail = futures::stream::once(async move {
            tokens.lock().expect("token table lock").reject(&token);
            metrics::DOWNLOADS_TOTAL.inc();
            let _ = events.send(NodeEvent::ShardDownloaded { hash });
            Ok::<Frame<Bytes>, std::io::Error>(Frame::data(Bytes::new()))
        });
        let stream = ReaderStream::new(file).map_ok(Frame::data).chain(tail);

        let mut response = Response::new(BodyExt::boxed(StreamBody::new(stream)));
        response.headers_mut().insert(
            hyper::header::CONTENT_TYPE,
            hyper::header::HeaderValue::from_static("application/octet-stream"),
        );
        apply_cors(&mut response);
        response
    }

    fn revoke(&self, token: &str) {
        self.state
            .tokens
            .lock()
            .expect("token table lock")
            .reject(token);
    }
}

fn query_param(query: Option<&str>, name: &str) -> Option<String> {
    query?
        .split('&')
        .filter_map(|pair| pair.split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.to_string())
}

fn full_body(data: impl Into<Bytes>) -> RespBody {
    Full::new(data.into())
        .map_err(|never: Infallible| match never {})
        .boxed()
}

fn respond(status: StatusCode, body: impl Into<Bytes>) -> Response<RespBody> {
    let mut response = Response::new(full_body(body));
    *response.status_mut() = status;
    apply_cors(&mut response);
    response
}

fn json_response(status: StatusCode, body: Vec<u8>) -> Response<RespBody> {
    let mut response = respond(status, body);
    response.headers_mut().insert(
        hyper::header::CONTENT_TYPE,
        hyper::header::HeaderValue::from_static("application/json"),
    );
    response
}

fn apply_cors(response: &mut Response<RespBody>) {
    let headers = response.headers_mut();
    headers.insert(
        hyper::header::ACCESS_CONTROL_ALLOW_ORIGIN,
        hyper::header::HeaderValue::from_static("*"),
    );
    headers.insert(
        hyper::header::ACCESS_CONTROL_ALLOW_METHODS,
        hyper::header::HeaderValue::from_static("*"),
    );
    headers.insert(
        hyper::header::ACCESS_CONTROL_ALLOW_HEADERS,
        hyper::header::HeaderValue::from_static("*"),
    );
}
