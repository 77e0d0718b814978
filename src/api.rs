pub(crate) mod health;
pub(crate) mod metrics;
pub(crate) mod run;

use axum::{
    Router,
    routing::{get, post},
};
use tower_http::trace::TraceLayer;

use crate::app::AppState;

pub(crate) fn router(state: AppState) -> Router {
    Router::new()
        .route("/health/ready", get(health::ready))
        .route("/health/live", get(health::live))
        .route("/metrics", get(metrics::exporter))
        .route("/v1/briefings/run", post(run::run_briefing))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::{Body, to_bytes};
    use axum::http::{Request, StatusCode};
    use serde_json::{Value, json};
    use tower::ServiceExt;

    use super::*;
    use crate::app::ComponentRegistry;
    use crate::clients::TimeSource;
    use crate::config::Config;
    use crate::observability::Telemetry;
    use crate::pipeline::state::Document;
    use crate::pipeline::test_support::{
        FixedClock, RecordingTransport, ScriptedModel, ScriptedSearch, at,
    };
    use crate::pipeline::{PipelineRunner, PipelineSettings};
    use crate::scheduler::Scheduler;
    use crate::store::InMemoryFingerprintStore;

    fn test_router() -> Router {
        let config = temp_env::with_vars(
            [
                ("TAVILY_API_KEY", Some("tvly-test")),
                ("GROQ_API_KEY", Some("gsk-test")),
            ],
            || Config::from_env().expect("config should load"),
        );
        let telemetry = Telemetry::without_tracing().expect("telemetry");
        let clock = Arc::new(FixedClock::new(at("2025-03-01T09:00:00+00:00")));
        let search = ScriptedSearch::default().with(
            "ai news",
            Ok(vec![Document::new("One", "https://one.example", "body")]),
        );
        let model = ScriptedModel {
            queries: Ok(vec!["ai news".to_string()]),
            ..ScriptedModel::default()
        };
        let pipeline = PipelineRunner::builder(PipelineSettings::default())
            .with_search(Arc::new(search))
            .with_language_model(Arc::new(model))
            .with_mail_transport(Arc::new(RecordingTransport::accepting()))
            .with_time_source(Arc::clone(&clock) as Arc<dyn TimeSource>)
            .with_store(Arc::new(InMemoryFingerprintStore::new()))
            .with_metrics(telemetry.metrics())
            .build()
            .expect("pipeline builds");
        let scheduler = Scheduler::new(Arc::new(pipeline), clock, None);

        let registry =
            ComponentRegistry::from_parts(Arc::new(config), telemetry, scheduler, None);
        router(AppState::new(registry))
    }

    async fn json_body(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        serde_json::from_slice(&bytes).expect("json body")
    }

    #[tokio::test]
    async fn live_and_ready_endpoints_respond() {
        let app = test_router();

        let live = app
            .clone()
            .oneshot(Request::get("/health/live").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert_eq!(live.status(), StatusCode::OK);

        let ready = app
            .oneshot(Request::get("/health/ready").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        assert_eq!(ready.status(), StatusCode::OK);
        assert_eq!(json_body(ready).await["status"], "ready");
    }

    #[tokio::test]
    async fn run_endpoint_returns_terminal_state() {
        let app = test_router();
        let request = Request::post("/v1/briefings/run")
            .header("content-type", "application/json")
            .body(Body::from(
                json!({
                    "recipient": "reader@example.com",
                    "topics": ["ai"],
                    "timezone": "UTC",
                    "schedule_time": "09:00"
                })
                .to_string(),
            ))
            .expect("request");

        let response = app.clone().oneshot(request).await.expect("response");

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["metadata"]["email_sent"], true);
        assert_eq!(body["metadata"]["outcome"]["status"], "completed");
        assert_eq!(body["briefs"].as_array().map(Vec::len), Some(1));

        let metrics = app
            .oneshot(Request::get("/metrics").body(Body::empty()).expect("request"))
            .await
            .expect("response");
        let text = to_bytes(metrics.into_body(), usize::MAX).await.expect("body");
        let text = String::from_utf8(text.to_vec()).expect("utf8");
        assert!(text.contains("briefing_runs_total{outcome=\"completed\"} 1"));
    }

    #[tokio::test]
    async fn run_endpoint_rejects_blank_recipient() {
        let app = test_router();
        let request = Request::post("/v1/briefings/run")
            .header("content-type", "application/json")
            .body(Body::from(json!({ "recipient": " ", "topics": ["ai"] }).to_string()))
            .expect("request");

        let response = app.oneshot(request).await.expect("response");

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
