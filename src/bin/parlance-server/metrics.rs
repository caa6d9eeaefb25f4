//! Prometheus instrumentation for parlance-server.
//!
//! Two layers: generic HTTP request accounting on every routed endpoint, and
//! recognition-session metrics (count, wall-clock duration, in-flight gauge)
//! recorded by the recognize handler. Sessions are labeled by language and
//! outcome so per-language error rates and latency are separable.

use std::sync::OnceLock;
use std::time::{Duration, Instant};

use axum::body::Body;
use axum::extract::MatchedPath;
use axum::http::Request;
use axum::http::{HeaderValue, StatusCode, header};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGauge, Opts as PromOpts, Registry,
    TextEncoder,
};

// Batch recognitions run from sub-second (short clips) to minutes (long
// recordings through a busy transcoder gate).
const RECOGNITION_DURATION_BUCKETS: &[f64] = &[0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0];

struct Metrics {
    registry: Registry,
    http_requests_total: IntCounterVec,
    http_request_duration_seconds: HistogramVec,
    recognitions_total: IntCounterVec,
    recognition_duration_seconds: HistogramVec,
    recognitions_in_flight: IntGauge,
}

static METRICS: OnceLock<Metrics> = OnceLock::new();

fn metrics() -> &'static Metrics {
    METRICS.get_or_init(|| {
        let registry = Registry::new();

        let http_requests_total = IntCounterVec::new(
            PromOpts::new(
                "parlance_http_requests_total",
                "Total HTTP requests served by parlance-server.",
            ),
            &["status"],
        )
        .expect("metrics definition must be valid");

        let http_request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "parlance_http_request_duration_seconds",
                "HTTP request latency in seconds.",
            ),
            &["status"],
        )
        .expect("metrics definition must be valid");

        let recognitions_total = IntCounterVec::new(
            PromOpts::new(
                "parlance_recognitions_total",
                "Recognition sessions by language and outcome.",
            ),
            &["language", "outcome"],
        )
        .expect("metrics definition must be valid");

        let recognition_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "parlance_recognition_duration_seconds",
                "End-to-end recognition session duration (staging through final flush).",
            )
            .buckets(RECOGNITION_DURATION_BUCKETS.to_vec()),
            &["language", "outcome"],
        )
        .expect("metrics definition must be valid");

        let recognitions_in_flight = IntGauge::new(
            "parlance_recognitions_in_flight",
            "Recognition sessions currently running on the blocking pool.",
        )
        .expect("metrics definition must be valid");

        registry
            .register(Box::new(http_requests_total.clone()))
            .expect("metrics must register");
        registry
            .register(Box::new(http_request_duration_seconds.clone()))
            .expect("metrics must register");
        registry
            .register(Box::new(recognitions_total.clone()))
            .expect("metrics must register");
        registry
            .register(Box::new(recognition_duration_seconds.clone()))
            .expect("metrics must register");
        registry
            .register(Box::new(recognitions_in_flight.clone()))
            .expect("metrics must register");

        Metrics {
            registry,
            http_requests_total,
            http_request_duration_seconds,
            recognitions_total,
            recognition_duration_seconds,
            recognitions_in_flight,
        }
    })
}

pub fn init() {
    let _ = metrics();
}

/// RAII guard marking one recognition session as in flight.
pub struct SessionGuard;

pub fn session_started() -> SessionGuard {
    metrics().recognitions_in_flight.inc();
    SessionGuard
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        metrics().recognitions_in_flight.dec();
    }
}

/// Record one finished recognition session.
pub fn observe_recognition(language: &str, outcome: &str, elapsed: Duration) {
    let m = metrics();
    m.recognitions_total
        .with_label_values(&[language, outcome])
        .inc();
    m.recognition_duration_seconds
        .with_label_values(&[language, outcome])
        .observe(elapsed.as_secs_f64());
}

pub async fn prometheus_metrics() -> Response {
    let families = metrics().registry.gather();
    let mut buf = Vec::new();
    if TextEncoder::new().encode(&families, &mut buf).is_err() {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            "failed to encode metrics",
        )
            .into_response();
    }

    (
        [(
            header::CONTENT_TYPE,
            HeaderValue::from_static("text/plain; version=0.0.4; charset=utf-8"),
        )],
        buf,
    )
        .into_response()
}

pub async fn track_http_metrics(req: Request<Body>, next: Next) -> Response {
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str())
        .unwrap_or_else(|| req.uri().path())
        .to_owned();

    if route == "/metrics" || route == "/healthz" {
        return next.run(req).await;
    }

    let start = Instant::now();
    let response = next.run(req).await;

    let status = response.status().as_u16().to_string();
    metrics()
        .http_requests_total
        .with_label_values(&[&status])
        .inc();
    metrics()
        .http_request_duration_seconds
        .with_label_values(&[&status])
        .observe(start.elapsed().as_secs_f64());

    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recognition_observations_count_and_time_sessions() {
        let counter = metrics()
            .recognitions_total
            .with_label_values(&["en", "ok"]);
        let histogram = metrics()
            .recognition_duration_seconds
            .with_label_values(&["en", "ok"]);
        let count_before = counter.get();
        let samples_before = histogram.get_sample_count();

        observe_recognition("en", "ok", Duration::from_millis(1500));

        assert_eq!(counter.get(), count_before + 1);
        assert_eq!(histogram.get_sample_count(), samples_before + 1);
        assert!(histogram.get_sample_sum() >= 1.5);
    }

    #[test]
    fn in_flight_gauge_tracks_guards() {
        let before = metrics().recognitions_in_flight.get();
        let guard = session_started();
        assert_eq!(metrics().recognitions_in_flight.get(), before + 1);
        drop(guard);
        assert_eq!(metrics().recognitions_in_flight.get(), before);
    }
}
