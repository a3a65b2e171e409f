use actix_web::{test, web, App, HttpResponse};
use confide::SecurityHeaders;

async fn ok() -> HttpResponse {
    HttpResponse::Ok().body("ok")
}

#[actix_web::test]
async fn base_headers_are_applied() {
    let app = test::init_service(
        App::new()
            .wrap(SecurityHeaders::default())
            .route("/ping", web::get().to(ok)),
    )
    .await;

    let resp = test::TestRequest::get().uri("/ping").send_request(&app).await;
    assert_eq!(resp.status(), 200);
    let h = resp.headers();
    assert_eq!(
        h.get("content-security-policy").unwrap(),
        "default-src 'none'; frame-ancestors 'none'; base-uri 'none'"
    );
    assert_eq!(h.get("referrer-policy").unwrap(), "no-referrer");
    assert_eq!(h.get("x-content-type-options").unwrap(), "nosniff");
    assert_eq!(h.get("x-frame-options").unwrap(), "DENY");
    assert_eq!(h.get("cache-control").unwrap(), "no-store");
    // HSTS stays off unless requested
    assert!(h.get("strict-transport-security").is_none());
}

#[actix_web::test]
async fn hsts_is_opt_in() {
    let app = test::init_service(
        App::new()
            .wrap(SecurityHeaders::default().with_hsts(true))
            .route("/ping", web::get().to(ok)),
    )
    .await;

    let resp = test::TestRequest::get().uri("/ping").send_request(&app).await;
    assert_eq!(
        resp.headers().get("strict-transport-security").unwrap(),
        "max-age=63072000; includeSubDomains; preload"
    );
}

#[actix_web::test]
async fn handler_set_headers_are_not_overwritten() {
    let app = test::init_service(
        App::new()
            .wrap(SecurityHeaders::default())
            .route(
                "/custom",
                web::get().to(|| async {
                    HttpResponse::Ok()
                        .insert_header(("cache-control", "max-age=60"))
                        .body("ok")
                }),
            ),
    )
    .await;

    let resp = test::TestRequest::get()
        .uri("/custom")
        .send_request(&app)
        .await;
    assert_eq!(resp.headers().get("cache-control").unwrap(), "max-age=60");
}
