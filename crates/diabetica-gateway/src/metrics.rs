use std::sync::atomic::{AtomicU64, Ordering};

use axum::{
    body::Body,
    extract::State,
    http::Request,
    middleware::Next,
    response::{IntoResponse, Response},
};

use crate::state::AppState;

#[derive(Debug, Default)]
pub struct Metrics {
    pub requests_total: AtomicU64,
    pub requests_inflight: AtomicU64,
    pub status_2xx: AtomicU64,
    pub status_4xx: AtomicU64,
    pub status_5xx: AtomicU64,
    pub predictions_total: AtomicU64,
    pub prediction_failures: AtomicU64,
}

fn counter(body: &mut String, name: &str, kind: &str, help: &str, value: &AtomicU64) {
    body.push_str(&format!(
        "# HELP diabetica_{name} {help}\n\
         # TYPE diabetica_{name} {kind}\n\
         diabetica_{name} {}\n",
        value.load(Ordering::Relaxed),
    ));
}

pub fn render_metrics(metrics: &Metrics) -> String {
    let mut body = String::new();
    let rows: [(&str, &str, &str, &AtomicU64); 7] = [
        ("requests_total", "counter", "Total HTTP requests handled.", &metrics.requests_total),
        ("requests_inflight", "gauge", "Currently in-flight HTTP requests.", &metrics.requests_inflight),
        ("responses_2xx", "counter", "Total 2xx responses.", &metrics.status_2xx),
        ("responses_4xx", "counter", "Total 4xx responses.", &metrics.status_4xx),
        ("responses_5xx", "counter", "Total 5xx responses.", &metrics.status_5xx),
        (
            "predictions_total",
            "counter",
            "Questions forwarded to the prediction endpoint.",
            &metrics.predictions_total,
        ),
        (
            "prediction_failures_total",
            "counter",
            "Questions answered with an error message.",
            &metrics.prediction_failures,
        ),
    ];
    for (name, kind, help, value) in rows {
        counter(&mut body, name, kind, help, value);
    }
    body
}

pub async fn metrics_handler(State(st): State<AppState>) -> impl IntoResponse {
    let body = render_metrics(&st.metrics);
    (
        axum::http::StatusCode::OK,
        [(axum::http::header::CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

/// Holds one slot in `requests_inflight` until dropped, so a cancelled
/// request still gives its slot back.
struct InflightGuard<'a>(&'a AtomicU64);

impl<'a> InflightGuard<'a> {
    fn enter(gauge: &'a AtomicU64) -> Self {
        gauge.fetch_add(1, Ordering::Relaxed);
        Self(gauge)
    }
}

impl Drop for InflightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

pub async fn track_requests(
    State(st): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Result<Response, std::convert::Infallible> {
    let inflight = InflightGuard::enter(&st.metrics.requests_inflight);
    let resp = next.run(req).await;
    drop(inflight);
    st.metrics.requests_total.fetch_add(1, Ordering::Relaxed);

    let status = resp.status().as_u16();
    if status >= 500 {
        st.metrics.status_5xx.fetch_add(1, Ordering::Relaxed);
    } else if status >= 400 {
        st.metrics.status_4xx.fetch_add(1, Ordering::Relaxed);
    } else if status >= 200 {
        st.metrics.status_2xx.fetch_add(1, Ordering::Relaxed);
    }

    Ok(resp)
}
