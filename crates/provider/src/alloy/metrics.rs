// This file is part of Rundler.
//
// Rundler is free software: you can redistribute it and/or modify it under the
// terms of the GNU Lesser General Public License as published by the Free Software
// Foundation, either version 3 of the License, or (at your option) any later version.
//
// Rundler is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY;
// without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.
// See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with Rundler.
// If not, see https://www.gnu.org/licenses/.

use std::{
    task::{Context, Poll},
    time::Instant,
};

use alloy_json_rpc::{RequestPacket, ResponsePacket, ResponsePayload, RpcError};
use alloy_transport::{BoxFuture, TransportError};
use futures_util::FutureExt;
use metrics::{Counter, Gauge, Histogram};
use metrics_derive::Metrics;
use tower::{Layer, Service};

#[derive(Metrics)]
#[metrics(scope = "node_rpc")]
struct NodeRpcMetrics {
    #[metric(describe = "total count of requests sent to the node.")]
    num_requests: Counter,
    #[metric(describe = "the number of requests awaiting a response.")]
    open_requests: Gauge,
    #[metric(describe = "the distribution of request latency in milliseconds.")]
    request_latency: Histogram,
    #[metric(describe = "the count of JSON-RPC error responses.")]
    error_responses: Counter,
    #[metric(describe = "the count of requests failing below the JSON-RPC layer.")]
    transport_errors: Counter,
}

/// Records per-method request metrics for calls to the node.
#[derive(Debug, Default, Clone, Copy)]
pub(crate) struct NodeRpcMetricLayer;

impl<S> Layer<S> for NodeRpcMetricLayer {
    type Service = NodeRpcMetricService<S>;

    fn layer(&self, service: S) -> Self::Service {
        NodeRpcMetricService { service }
    }
}

/// Service produced by [`NodeRpcMetricLayer`]
#[derive(Debug, Clone)]
pub struct NodeRpcMetricService<S> {
    service: S,
}

impl<S> Service<RequestPacket> for NodeRpcMetricService<S>
where
    S: Service<RequestPacket, Response = ResponsePacket, Error = TransportError>
        + Send
        + Sync
        + Clone
        + 'static,
    S::Future: Send,
{
    type Response = ResponsePacket;
    type Error = TransportError;
    type Future = BoxFuture<'static, Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.service.poll_ready(cx)
    }

    fn call(&mut self, request: RequestPacket) -> Self::Future {
        let metrics = NodeRpcMetrics::new_with_labels(&[("method", method_name(&request))]);
        metrics.num_requests.increment(1);
        metrics.open_requests.increment(1);
        let start = Instant::now();

        let mut svc = self.service.clone();
        async move {
            let response = svc.call(request).await;
            metrics.open_requests.decrement(1);
            metrics
                .request_latency
                .record(start.elapsed().as_millis() as f64);
            match &response {
                Ok(packet) if is_error_response(packet) => metrics.error_responses.increment(1),
                Ok(_) => {}
                Err(RpcError::ErrorResp(_)) => metrics.error_responses.increment(1),
                Err(_) => metrics.transport_errors.increment(1),
            }
            response
        }
        .boxed()
    }
}

fn method_name(req: &RequestPacket) -> String {
    match req {
        RequestPacket::Single(request) => request.method().to_string(),
        RequestPacket::Batch(_) => "batch".to_string(),
    }
}

fn is_error_response(packet: &ResponsePacket) -> bool {
    match packet {
        ResponsePacket::Single(resp) => matches!(resp.payload, ResponsePayload::Failure(_)),
        ResponsePacket::Batch(resps) => resps
            .iter()
            .any(|r| matches!(r.payload, ResponsePayload::Failure(_))),
    }
}
