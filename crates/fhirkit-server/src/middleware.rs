use axum::{
    body::Body,
    http::{HeaderName, HeaderValue, Method, Request, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use fhirkit_api::{ApiError, validate_accept, validate_content_type};
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

pub async fn request_id(mut req: Request<Body>, next: Next) -> Response {
    let header_name = HeaderName::from_static(REQUEST_ID_HEADER);

    // Preserve an incoming request id, otherwise generate one
    let req_id_value = req
        .headers()
        .get(&header_name)
        .cloned()
        .or_else(|| HeaderValue::from_str(&Uuid::new_v4().to_string()).ok())
        .unwrap_or_else(|| HeaderValue::from_static("unknown"));

    req.extensions_mut().insert(req_id_value.clone());

    let mut res = next.run(req).await;
    res.headers_mut().insert(header_name, req_id_value);
    res
}

// Content negotiation: accept FHIR JSON and plain JSON for Accept, and
// require one of them as the Content-Type of POST and PUT bodies.
pub async fn content_negotiation(req: Request<Body>, next: Next) -> Response {
    if let Err(err) = validate_accept(req.headers()) {
        return err.into_response();
    }

    let needs_body_type = matches!(*req.method(), Method::POST | Method::PUT);
    if needs_body_type {
        if !req.headers().contains_key(header::CONTENT_TYPE) {
            return ApiError::unsupported_media_type(
                "Content-Type must be application/fhir+json or application/json",
            )
            .into_response();
        }
        if let Err(err) = validate_content_type(req.headers()) {
            return err.into_response();
        }
    }

    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Router, http::StatusCode, middleware, routing::post};
    use tower::ServiceExt;

    fn app() -> Router {
        Router::new()
            .route("/", post(|| async { "ok" }).get(|| async { "ok" }))
            .layer(middleware::from_fn(content_negotiation))
            .layer(middleware::from_fn(request_id))
    }

    #[tokio::test]
    async fn request_id_is_generated_or_propagated() {
        let res = app()
            .oneshot(Request::get("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert!(res.headers().contains_key(REQUEST_ID_HEADER));

        let res = app()
            .oneshot(
                Request::get("/")
                    .header(REQUEST_ID_HEADER, "abc")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.headers()[REQUEST_ID_HEADER], "abc");
    }

    #[tokio::test]
    async fn post_requires_json_content_type() {
        let res = app()
            .oneshot(Request::post("/").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);

        let res = app()
            .oneshot(
                Request::post("/")
                    .header(header::CONTENT_TYPE, "application/fhir+json")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn xml_accept_is_rejected() {
        let res = app()
            .oneshot(
                Request::get("/")
                    .header(header::ACCEPT, "application/fhir+xml")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(res.status(), StatusCode::UNSUPPORTED_MEDIA_TYPE);
    }
}
