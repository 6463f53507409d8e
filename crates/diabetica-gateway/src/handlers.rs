use std::sync::atomic::Ordering;

use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    Form, Json,
};
use serde::{Deserialize, Serialize};
use tracing::Instrument;
use uuid::Uuid;

use crate::form::{render_outcome, render_page};
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct AskForm {
    #[serde(default)]
    pub text: String,
}

#[derive(Debug, Deserialize)]
pub struct ApiPredictRequest {
    pub data: Vec<String>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ApiPredictResponse {
    pub data: Vec<String>,
}

/// Runs one question through the prediction client and renders the outcome.
/// Never fails: errors come back as display text.
async fn answer(st: &AppState, question: &str) -> String {
    let request_id = format!("req_{}", Uuid::new_v4());
    let span = tracing::info_span!("predict", %request_id, question_chars = question.chars().count());

    async {
        st.metrics.predictions_total.fetch_add(1, Ordering::Relaxed);
        let outcome = st.client.ask(question).await;
        match &outcome {
            Ok(answer) => tracing::info!(answer_chars = answer.chars().count(), "prediction served"),
            Err(e) => {
                st.metrics.prediction_failures.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(error=%e, "prediction failed");
            }
        }
        render_outcome(&outcome)
    }
    .instrument(span)
    .await
}

pub async fn index(Query(q): Query<AskForm>) -> Html<String> {
    Html(render_page(&q.text, None))
}

pub async fn submit(State(st): State<AppState>, Form(form): Form<AskForm>) -> Html<String> {
    let output = answer(&st, &form.text).await;
    Html(render_page(&form.text, Some(&output)))
}

pub async fn api_predict(
    State(st): State<AppState>,
    Json(req): Json<ApiPredictRequest>,
) -> Response {
    let Some(question) = req.data.first() else {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({"error": {"message": "data must contain one question"}})),
        )
            .into_response();
    };

    let output = answer(&st, question).await;
    Json(ApiPredictResponse { data: vec![output] }).into_response()
}

pub async fn healthz() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::Body;
    use axum::http::{header, Request};
    use serde_json::json;
    use tower::ServiceExt;

    use crate::build_app;
    use crate::predict::tests::FakeEndpoint;
    use crate::predict::{Instance, PredictionClient};

    use super::*;

    const ANSWER: &str = "Early symptoms include frequent urination and increased thirst.";

    fn app_with(fake: Arc<FakeEndpoint>) -> (axum::Router, AppState) {
        let st = AppState::new(PredictionClient::new(fake));
        (build_app(st.clone()), st)
    }

    async fn body_string(resp: Response) -> String {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    fn form_post(text: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .body(Body::from(format!("text={}", urlencoding::encode(text))))
            .unwrap()
    }

    #[tokio::test]
    async fn example_question_end_to_end() {
        let fake = FakeEndpoint::answering(vec![json!(ANSWER)]);
        let (app, _) = app_with(fake.clone());
        let question = "What are the early symptoms of diabetes?";

        let resp = app.oneshot(form_post(question)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_string(resp).await;

        assert!(body.contains(&format!(
            r#"<output id="response" for="text">{ANSWER}</output>"#
        )));
        assert!(body.contains(&format!("{question}</textarea>")));
        assert_eq!(
            *fake.calls.lock().unwrap(),
            vec![vec![Instance {
                text: question.to_string()
            }]]
        );
    }

    #[tokio::test]
    async fn failures_render_as_text_and_server_keeps_serving() {
        let fake = FakeEndpoint::failing("model unavailable");
        let (app, st) = app_with(fake);

        for _ in 0..2 {
            let resp = app.clone().oneshot(form_post("q")).await.unwrap();
            assert_eq!(resp.status(), StatusCode::OK);
            let body = body_string(resp).await;
            assert!(body.contains(
                r#"<output id="response" for="text">Error processing request: prediction endpoint returned 503: model unavailable</output>"#
            ));
        }
        assert_eq!(st.metrics.prediction_failures.load(Ordering::Relaxed), 2);
        assert_eq!(st.metrics.status_2xx.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn index_prefills_from_query() {
        let (app, _) = app_with(FakeEndpoint::answering(vec![json!("unused")]));
        let req = Request::builder()
            .uri("/?text=How%20is%20Type%202%20diabetes%20diagnosed%3F")
            .body(Body::empty())
            .unwrap();
        let body = body_string(app.oneshot(req).await.unwrap()).await;
        assert!(body.contains("How is Type 2 diabetes diagnosed?</textarea>"));
        assert!(body.contains(r#"<output id="response" for="text"></output>"#));
    }

    #[tokio::test]
    async fn api_predict_mirrors_form() {
        let (app, _) = app_with(FakeEndpoint::answering(vec![json!(ANSWER)]));
        let req = Request::builder()
            .method("POST")
            .uri("/api/predict")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(json!({"data": ["symptoms?"]}).to_string()))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let parsed: ApiPredictResponse = serde_json::from_str(&body_string(resp).await).unwrap();
        assert_eq!(parsed.data, vec![ANSWER.to_string()]);
    }

    #[tokio::test]
    async fn api_predict_requires_a_question() {
        let (app, _) = app_with(FakeEndpoint::answering(vec![json!("x")]));
        let req = Request::builder()
            .method("POST")
            .uri("/api/predict")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(r#"{"data": []}"#))
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn health_and_metrics() {
        let (app, _) = app_with(FakeEndpoint::answering(vec![json!("x")]));
        let resp = app
            .clone()
            .oneshot(Request::builder().uri("/healthz").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(body_string(resp).await, "ok");

        app.clone().oneshot(form_post("q")).await.unwrap();
        let resp = app
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = body_string(resp).await;
        assert!(body.contains("diabetica_predictions_total 1\n"));
        assert!(body.contains("diabetica_prediction_failures_total 0\n"));
    }
}
