use axum::{response::IntoResponse, routing::get, Router};
use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};

pub struct DevkitMetrics {
    pub registry: Registry,
    pub frames_streamed_total: IntCounter,
    pub messages_sent_total: IntCounter,
    pub conversion_errors_total: IntCounter,
    pub renders_written_total: IntCounter,
    pub connected_clients: IntGauge,
}

impl DevkitMetrics {
    pub fn new() -> Self {
        let registry = Registry::new_custom(Some("truckscenes_devkit".into()), None).unwrap();

        macro_rules! reg {
            ($m:expr) => {{
                registry.register(Box::new($m.clone())).unwrap();
                $m
            }};
        }

        Self {
            frames_streamed_total: reg!(IntCounter::new(
                "frames_streamed_total",
                "Samples walked by the streaming relay"
            )
            .unwrap()),
            messages_sent_total: reg!(IntCounter::new(
                "messages_sent_total",
                "Foxglove messages queued to at least one subscriber"
            )
            .unwrap()),
            conversion_errors_total: reg!(IntCounter::new(
                "conversion_errors_total",
                "Per-sensor conversion failures (logged, not fatal)"
            )
            .unwrap()),
            renders_written_total: reg!(IntCounter::new(
                "renders_written_total",
                "Bird's-eye-view images written to disk"
            )
            .unwrap()),
            connected_clients: reg!(IntGauge::new(
                "connected_clients",
                "Foxglove WebSocket clients currently connected"
            )
            .unwrap()),
            registry,
        }
    }

    pub fn router(&self) -> Router {
        let reg = self.registry.clone();
        Router::new().route(
            "/metrics",
            get(move || {
                let reg = reg.clone();
                async move {
                    let mf = reg.gather();
                    let mut buf = Vec::new();
                    TextEncoder::new().encode(&mf, &mut buf).unwrap();
                    String::from_utf8(buf).unwrap().into_response()
                }
            }),
        )
    }
}
