use axum::{
    extract::DefaultBodyLimit,
    routing::{delete, get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::handlers::{admin, characters, favorites, healthz, media, readyz, tasks};
use crate::state::AppState;

/// Room for a 10 MiB upload plus multipart framing; the upload routes
/// enforce the exact file limit themselves.
const BODY_LIMIT_BYTES: usize = 12 * 1024 * 1024;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/auth/verify", get(tasks::verify))
        .route("/tasks/log", post(tasks::log_task))
        .route("/history", get(tasks::history).delete(tasks::delete_history))
        .route("/history/pending", get(tasks::pending))
        .route("/admin/tasks", get(admin::list_tasks))
        .route("/admin/users", get(admin::users))
        .route("/admin/stats", get(admin::stats))
        .route("/admin/users/ban", post(admin::ban).delete(admin::unban))
        .route("/characters", get(characters::list).post(characters::create))
        .route("/characters/:id", get(characters::get).delete(characters::delete))
        .route("/characters/:id/assets", get(characters::assets))
        .route("/characters/:id/references", get(characters::references))
        .route(
            "/characters/:id/references/:reference_id",
            delete(characters::delete_reference),
        )
        .route(
            "/characters/:id/resources/:task_id",
            delete(characters::delete_resource),
        )
        .route("/characters/:id/tasks/pending", get(characters::pending))
        .route(
            "/characters/:id/favorites",
            get(characters::favorites)
                .post(characters::add_favorite)
                .delete(characters::remove_favorite),
        )
        .route(
            "/characters/:id/outfits",
            get(characters::list_outfits).post(characters::create_outfit),
        )
        .route(
            "/characters/:id/outfits/:outfit_id",
            get(characters::get_outfit)
                .patch(characters::update_outfit)
                .delete(characters::delete_outfit),
        )
        .route(
            "/favorites",
            get(favorites::list).post(favorites::add).delete(favorites::remove),
        )
        .route(
            "/favorites/global",
            get(favorites::list).post(favorites::add).delete(favorites::remove),
        )
        .route("/generate/flux", post(media::flux))
        .route("/generate/gemini-image", post(media::gemini_image))
        .route("/generate/qwen", post(media::qwen))
        .route("/generate/photo-to-live-prompt", post(media::photo_to_live_prompt))
        .route("/generate/pose-control/reverse-pose", post(media::reverse_pose))
        .route("/kling/generate", post(media::kling_generate))
        .route("/kling/photo-to-live", post(media::kling_photo_to_live))
        .route("/kling/query", get(media::kling_query))
        .route("/video/generate", post(media::video_generate))
        .route("/video/query", post(media::video_query))
        .route("/video/download", get(media::video_download))
        .route("/download", get(media::download))
        .route("/upload/image", post(media::upload_image))
        .route("/upload/to-aimovely", post(media::upload_to_aimovely))
        .route("/resource/upload", post(media::resource_upload))
        .layer(DefaultBodyLimit::max(BODY_LIMIT_BYTES))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{harness, task, ADMIN_EMAIL, USER_EMAIL};
    use axum::{
        body::Body,
        http::{header, Request, StatusCode},
    };
    use http_body_util::BodyExt;
    use serde_json::{json, Value};
    use tower::ServiceExt;

    fn request(method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri(uri);
        if let Some(token) = token {
            builder = builder.header(header::AUTHORIZATION, format!("Bearer {token}"));
        }
        match body {
            Some(body) => builder
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        }
    }

    async fn send(router: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = router.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    #[tokio::test]
    async fn health_needs_no_token() {
        let router = build_router(harness().state);
        let (status, _) = send(router, request("GET", "/healthz", None, None)).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn missing_and_invalid_tokens_are_distinct_401s() {
        let h = harness();
        let (status, body) =
            send(build_router(h.state.clone()), request("GET", "/history", None, None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "auth_missing");

        let (status, body) = send(
            build_router(h.state),
            request("GET", "/history", Some("bogus"), None),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "auth_invalid");
    }

    #[tokio::test]
    async fn verify_reports_identity_or_invalid() {
        let h = harness();
        let (status, body) = send(
            build_router(h.state.clone()),
            request("GET", "/auth/verify", Some("user"), None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["valid"], true);
        assert_eq!(body["email"], USER_EMAIL);

        let (status, body) =
            send(build_router(h.state), request("GET", "/auth/verify", None, None)).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["valid"], false);
    }

    #[tokio::test]
    async fn admin_routes_are_forbidden_to_users() {
        let h = harness();
        let (status, body) = send(
            build_router(h.state.clone()),
            request("GET", "/admin/tasks", Some("user"), None),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["code"], "forbidden");

        h.store.seed_task(task("t1", USER_EMAIL, 1)).await;
        let (status, body) = send(
            build_router(h.state),
            request("GET", "/admin/tasks?limit=0", Some("admin"), None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["pagination"], json!({ "limit": 1, "offset": 0, "total": 1 }));
    }

    #[tokio::test]
    async fn banned_callers_are_rejected_after_verification() {
        let h = harness();
        let ban = json!({ "email": USER_EMAIL, "reason": "spam" });
        let (status, _) = send(
            build_router(h.state.clone()),
            request("POST", "/admin/users/ban", Some("admin"), Some(ban)),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(
            build_router(h.state.clone()),
            request("GET", "/history/pending", Some("user"), None),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["code"], "user_banned");

        let uri = format!("/admin/users/ban?email={}", USER_EMAIL.to_uppercase());
        let (status, _) = send(
            build_router(h.state.clone()),
            request("DELETE", &uri, Some("admin"), None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let (status, _) = send(
            build_router(h.state),
            request("GET", "/history/pending", Some("user"), None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn banning_an_admin_is_a_validation_error() {
        let h = harness();
        let ban = json!({ "email": ADMIN_EMAIL });
        let (status, body) = send(
            build_router(h.state),
            request("POST", "/admin/users/ban", Some("admin"), Some(ban)),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "validation_error");
    }

    #[tokio::test]
    async fn malformed_ban_of_an_admin_is_still_a_validation_error() {
        let h = harness();
        let ban = json!({ "email": ADMIN_EMAIL, "reason": 5 });
        let (status, body) = send(
            build_router(h.state),
            request("POST", "/admin/users/ban", Some("admin"), Some(ban)),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "validation_error");
    }

    #[tokio::test]
    async fn bad_bodies_without_a_token_answer_401() {
        let h = harness();
        let garbled = Request::builder()
            .method("POST")
            .uri("/tasks/log")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let (status, body) = send(build_router(h.state.clone()), garbled).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "auth_missing");

        let untyped = Request::builder()
            .method("POST")
            .uri("/kling/generate")
            .body(Body::from("{}"))
            .unwrap();
        let (status, body) = send(build_router(h.state.clone()), untyped).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "auth_missing");

        let (status, body) = send(
            build_router(h.state),
            request("POST", "/upload/image", None, None),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["code"], "auth_missing");
    }

    #[tokio::test]
    async fn authenticated_non_json_body_is_a_validation_error() {
        let h = harness();
        let garbled = Request::builder()
            .method("POST")
            .uri("/tasks/log")
            .header(header::AUTHORIZATION, "Bearer user")
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from("{not json"))
            .unwrap();
        let (status, body) = send(build_router(h.state), garbled).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "validation_error");
    }

    #[tokio::test]
    async fn global_favorites_are_served_on_both_paths() {
        let h = harness();
        h.store.seed_task(task("t1", USER_EMAIL, 1)).await;
        let (status, _) = send(
            build_router(h.state.clone()),
            request("POST", "/favorites", Some("user"), Some(json!({ "task_id": "t1" }))),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(
            build_router(h.state.clone()),
            request("GET", "/favorites/global", Some("user"), None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["favorites"][0]["task_id"], "t1");

        let (status, _) = send(
            build_router(h.state.clone()),
            request("DELETE", "/favorites/global?task_id=t1", Some("user"), None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        let (_, body) = send(
            build_router(h.state),
            request("GET", "/favorites", Some("user"), None),
        )
        .await;
        assert_eq!(body["favorites"], json!([]));
    }

    #[tokio::test]
    async fn outfit_routes_hide_foreign_characters() {
        let h = harness();
        let uri = format!("/characters/{}/outfits", uuid::Uuid::new_v4());
        let (status, body) =
            send(build_router(h.state.clone()), request("GET", &uri, Some("user"), None)).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["code"], "not_found");

        let patch = json!({ "outfit_type": "formal" });
        let outfit_uri = format!("{uri}/{}", uuid::Uuid::new_v4());
        let (status, _) = send(
            build_router(h.state),
            request("PATCH", &outfit_uri, Some("user"), Some(patch)),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn logged_task_shows_up_in_history() {
        let h = harness();
        let payload = json!({ "task_id": "gen-1", "task_type": "text-to-image", "prompt": "fox" });
        let (status, body) = send(
            build_router(h.state.clone()),
            request("POST", "/tasks/log", Some("user"), Some(payload)),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "success": true }));

        let (status, body) = send(
            build_router(h.state),
            request("GET", "/history?pageSize=5", Some("user"), None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"][0]["task_id"], "gen-1");
        assert_eq!(
            body["pagination"],
            json!({ "page": 1, "pageSize": 5, "total": 1, "totalPages": 1 })
        );
    }
}
