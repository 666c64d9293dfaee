//! HTTP query surface.
//!
//! Thin axum handlers over [`Monitor`]. Every utilization read takes a
//! fresh queue sample; the capacity write is the only mutating route.

use axum::{
    Json, Router,
    extract::{Path, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, put},
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{debug, info};

use linkmon_core::{
    CoreError, EndpointUtilization, MacAddress, Monitor, QueueDepth, UtilizationReading,
};

/// Build the router serving `monitor`.
pub fn router(monitor: Monitor) -> Router {
    Router::new()
        .route("/test", get(liveness))
        .route("/get_link_utilization", get(link_utilization))
        .route(
            "/get_user_link_utilization/:endpoint_id",
            get(user_link_utilization),
        )
        .route("/set_bottleneck_capacity_Bps", put(set_bottleneck_capacity))
        .route("/get_link_stats", get(link_stats))
        .route("/get_user_stats", get(user_stats))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(monitor)
}

// ── Payloads ─────────────────────────────────────────────────────────

/// `{link_utilization, queue_length}`; utilization is `null` while the
/// bottleneck capacity is unset and the queue length is `-1` when the
/// sample failed.
#[derive(Debug, Serialize)]
struct UtilizationBody {
    link_utilization: Option<f64>,
    queue_length: QueueDepth,
}

impl From<UtilizationReading> for UtilizationBody {
    fn from(r: UtilizationReading) -> Self {
        Self {
            link_utilization: r.utilization,
            queue_length: r.queue_length,
        }
    }
}

#[derive(Debug, Deserialize)]
struct CapacityRequest {
    #[serde(rename = "bottleneck_capacity_Bps")]
    bottleneck_capacity_bps: u64,
}

#[derive(Debug, Serialize)]
struct LinkStatsBody {
    link_utilization: Option<f64>,
    sending_rate_bps: f64,
    increment_bytes: f64,
    updated_at: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(rename = "bottleneck_capacity_Bps")]
    bottleneck_capacity_bps: Option<u64>,
    connected_devices: Vec<String>,
}

// ── Errors ───────────────────────────────────────────────────────────

/// Client-facing rejection: a status code plus `{"error": "..."}`.
#[derive(Debug)]
struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self {
            status: rejection.status(),
            message: rejection.body_text(),
        }
    }
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::InvalidCapacity { .. }
            | CoreError::InvalidEndpoint { .. }
            | CoreError::ValidationFailed { .. } => Self::bad_request(err.to_string()),
            other => Self {
                status: StatusCode::INTERNAL_SERVER_ERROR,
                message: other.to_string(),
            },
        }
    }
}

// ── Handlers ─────────────────────────────────────────────────────────

async fn liveness() -> Json<serde_json::Value> {
    Json(json!([{ "test": 0 }]))
}

async fn link_utilization(State(monitor): State<Monitor>) -> Json<UtilizationBody> {
    Json(monitor.utilization(None).await.into())
}

async fn user_link_utilization(
    State(monitor): State<Monitor>,
    Path(endpoint_id): Path<String>,
) -> Result<Json<UtilizationBody>, ApiError> {
    let index: u32 = endpoint_id.parse().map_err(|_| {
        ApiError::bad_request(format!("endpoint id must be an integer, got '{endpoint_id}'"))
    })?;
    let mac = MacAddress::from_endpoint_index(index)?;
    debug!(endpoint = %mac, "user utilization query");
    Ok(Json(monitor.utilization(Some(&mac)).await.into()))
}

async fn set_bottleneck_capacity(
    State(monitor): State<Monitor>,
    body: Result<Json<CapacityRequest>, JsonRejection>,
) -> Result<StatusCode, ApiError> {
    let Json(request) = body?;
    monitor.set_bottleneck_capacity(request.bottleneck_capacity_bps)?;
    info!(
        capacity = request.bottleneck_capacity_bps,
        "bottleneck capacity set via API"
    );
    Ok(StatusCode::NO_CONTENT)
}

async fn link_stats(State(monitor): State<Monitor>) -> Json<LinkStatsBody> {
    let link = monitor.link();
    Json(LinkStatsBody {
        link_utilization: link.utilization,
        sending_rate_bps: link.sending_rate_bps,
        increment_bytes: link.increment_bytes,
        updated_at: link.updated_at,
        bottleneck_capacity_bps: monitor.bottleneck_capacity(),
        connected_devices: monitor
            .connected_devices()
            .iter()
            .map(ToString::to_string)
            .collect(),
    })
}

async fn user_stats(State(monitor): State<Monitor>) -> Json<Vec<EndpointUtilization>> {
    Json(monitor.endpoints())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use std::sync::Arc;

    use axum::body::{Body, to_bytes};
    use axum::http::{Method, Request};
    use pretty_assertions::assert_eq;
    use serde_json::Value;
    use tower::ServiceExt;

    use linkmon_core::{
        DatapathId, FlowStats, MonitorConfig, PortStats, QueueSampler, TransportEvent,
    };

    use super::*;

    struct FixedQueue(QueueDepth);

    impl QueueSampler for FixedQueue {
        fn sample(&self, _interface: &str) -> QueueDepth {
            self.0
        }
    }

    fn monitor(capacity: Option<u64>, queue: QueueDepth) -> Monitor {
        let config = MonitorConfig {
            bottleneck_capacity_bps: capacity,
            ..MonitorConfig::default()
        };
        Monitor::new(config, Arc::new(FixedQueue(queue))).unwrap()
    }

    fn feed_flow(monitor: &Monitor, bytes: u64) {
        monitor.handle_event(TransportEvent::FlowStats {
            datapath: DatapathId::new(1),
            entries: vec![FlowStats {
                priority: 1,
                in_port: 1,
                eth_src: MacAddress::from_endpoint_index(1).unwrap(),
                eth_dst: MacAddress::from_endpoint_index(4).unwrap(),
                out_port: Some(3),
                packet_count: 0,
                byte_count: bytes,
            }],
        });
    }

    fn feed_port(monitor: &Monitor, rx_bytes: u64) {
        monitor.handle_event(TransportEvent::PortStats {
            datapath: DatapathId::new(2),
            entries: vec![PortStats {
                port_no: 2,
                rx_bytes,
                ..PortStats::default()
            }],
        });
    }

    async fn send(app: Router, method: Method, uri: &str, body: Option<&str>) -> (StatusCode, Value) {
        let request = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(b) => request
                .header("content-type", "application/json")
                .body(Body::from(b.to_owned())),
            None => request.body(Body::empty()),
        }
        .unwrap();
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    async fn get(app: Router, uri: &str) -> (StatusCode, Value) {
        send(app, Method::GET, uri, None).await
    }

    #[tokio::test]
    async fn liveness_payload_is_fixed() {
        let (status, body) = get(router(monitor(None, QueueDepth::Unavailable)), "/test").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!([{ "test": 0 }]));
    }

    #[tokio::test]
    async fn link_utilization_defaults_to_zero() {
        let app = router(monitor(Some(490_000), QueueDepth::Bytes(345)));
        let (status, body) = get(app, "/get_link_utilization").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "link_utilization": 0.0, "queue_length": 345 }));
    }

    #[tokio::test]
    async fn link_utilization_after_port_snapshots() {
        let m = monitor(Some(100_000), QueueDepth::Unavailable);
        feed_port(&m, 0);
        feed_port(&m, 10_000);
        let (_, body) = get(router(m), "/get_link_utilization").await;
        let util = body["link_utilization"].as_f64().unwrap();
        assert!((util - 0.2).abs() < 1e-9);
        assert_eq!(body["queue_length"], json!(-1));
    }

    #[tokio::test]
    async fn user_utilization_by_endpoint_id() {
        let m = monitor(Some(490_000), QueueDepth::Bytes(0));
        feed_flow(&m, 0);
        feed_flow(&m, 24_500);
        let (status, body) = get(router(m.clone()), "/get_user_link_utilization/1").await;
        assert_eq!(status, StatusCode::OK);
        let util = body["link_utilization"].as_f64().unwrap();
        assert!((util - 0.1111).abs() < 1e-4);

        // Never observed: zero, not an error.
        let (status, body) = get(router(m), "/get_user_link_utilization/7").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["link_utilization"], json!(0.0));
    }

    #[tokio::test]
    async fn invalid_endpoint_ids_are_client_errors() {
        let m = monitor(None, QueueDepth::Unavailable);
        let (status, _) = get(router(m.clone()), "/get_user_link_utilization/abc").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, body) = get(router(m), "/get_user_link_utilization/300").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("300"));
    }

    #[tokio::test]
    async fn unset_capacity_reports_null_placeholder() {
        let m = monitor(None, QueueDepth::Bytes(0));
        feed_flow(&m, 0);
        feed_flow(&m, 24_500);
        let (status, body) = get(router(m), "/get_user_link_utilization/1").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["link_utilization"], Value::Null);
    }

    #[tokio::test]
    async fn set_capacity_returns_no_content_and_applies() {
        let m = monitor(None, QueueDepth::Unavailable);
        let (status, body) = send(
            router(m.clone()),
            Method::PUT,
            "/set_bottleneck_capacity_Bps",
            Some(r#"{"bottleneck_capacity_Bps": 490000}"#),
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);
        assert_eq!(body, Value::Null);
        assert_eq!(m.bottleneck_capacity(), Some(490_000));
    }

    #[tokio::test]
    async fn malformed_capacity_bodies_are_rejected() {
        let m = monitor(Some(490_000), QueueDepth::Unavailable);
        for body in [
            "not json",
            r#"{"capacity": 5}"#,
            r#"{"bottleneck_capacity_Bps": -3}"#,
            r#"{"bottleneck_capacity_Bps": "fast"}"#,
            r#"{"bottleneck_capacity_Bps": 0}"#,
        ] {
            let (status, _) = send(
                router(m.clone()),
                Method::PUT,
                "/set_bottleneck_capacity_Bps",
                Some(body),
            )
            .await;
            assert!(status.is_client_error(), "{body} -> {status}");
        }
        assert_eq!(m.bottleneck_capacity(), Some(490_000));
    }

    #[tokio::test]
    async fn link_stats_include_capacity_and_devices() {
        let m = monitor(Some(490_000), QueueDepth::Unavailable);
        m.handle_event(TransportEvent::DeviceConnected(DatapathId::new(2)));
        let (status, body) = get(router(m), "/get_link_stats").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["bottleneck_capacity_Bps"], json!(490_000));
        assert_eq!(body["connected_devices"], json!(["0000000000000002"]));
    }

    #[tokio::test]
    async fn user_stats_list_endpoints() {
        let m = monitor(Some(490_000), QueueDepth::Unavailable);
        feed_flow(&m, 0);
        feed_flow(&m, 1_000);
        let (_, body) = get(router(m), "/get_user_stats").await;
        let rows = body.as_array().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["mac"], json!("00:00:00:00:00:01"));
        assert_eq!(rows[0]["active_endpoints"], json!(1));
    }
}
