#![cfg(feature = "inmem-store")]

use std::sync::Arc;

use actix_web::{test, App};
use async_trait::async_trait;
use serial_test::serial;

use confide::auth::{create_jwt, Role};
use confide::identity::IdentityCodec;
use confide::mailer::{MailError, Mailer};
use confide::notify::Notifier;
use confide::rate_limit::{InMemoryRateLimiter, RateLimitConfig, RateLimiterFacade};
use confide::repo::inmem::InMemRepo;
use confide::{config, AppState};

const KEY: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

struct NullMailer;

#[async_trait]
impl Mailer for NullMailer {
    async fn send(&self, _to: &str, _subject: &str, _text: &str) -> Result<(), MailError> {
        Ok(())
    }
}

fn setup_env() {
    std::env::set_var("JWT_SECRET", "unit-test-secret-at-least-32-chars!!");
    std::env::set_var("ENCRYPTION_SECRET_KEY", KEY);
    std::env::set_var("CONFIDE_DATA_DIR", tempfile::tempdir().unwrap().path());
}

fn state() -> AppState {
    let repo = Arc::new(InMemRepo::new());
    let codec = Arc::new(IdentityCodec::from_hex_key(KEY).unwrap());
    let notifier = Arc::new(Notifier::new(repo.clone(), Arc::new(NullMailer)));
    AppState {
        repo,
        codec,
        notifier,
        // handlers under test should never trip the limiter
        limits: RateLimiterFacade::new(InMemoryRateLimiter::new(false), RateLimitConfig::from_env()),
    }
}

fn bearer(mid: &str, gender: &str, roles: Vec<Role>) -> (&'static str, String) {
    let token = create_jwt(mid, gender, roles).unwrap();
    ("Authorization", format!("Bearer {token}"))
}

macro_rules! app {
    ($state:expr) => {
        test::init_service(
            App::new()
                .app_data(actix_web::web::Data::new($state.clone()))
                .configure(config),
        )
        .await
    };
}

async fn body_json(resp: actix_web::dev::ServiceResponse) -> serde_json::Value {
    let body = test::read_body(resp).await;
    serde_json::from_slice(&body).unwrap()
}

#[actix_web::test]
#[serial]
async fn confession_response_never_carries_owner_material() {
    setup_env();
    let state = state();
    let app = app!(state);

    let resp = test::TestRequest::post()
        .uri("/api/v1/confessions")
        .insert_header(bearer("owner-mid", "f", vec![Role::User]))
        .set_json(serde_json::json!({"content": "something honest", "college": "nit-x"}))
        .send_request(&app)
        .await;
    assert_eq!(resp.status(), 201);
    let created = body_json(resp).await;
    assert_eq!(created["content"], "something honest");
    assert_eq!(created["college"], "nit-x");
    // the encrypted owner reference and like membership stay server-side
    assert!(created.get("encrypted_owner_mid").is_none());
    assert!(created.get("owner_iv").is_none());
    assert!(created.get("likes").is_none());
    assert_eq!(created["like_count"], 0);
    let id = created["id"].as_str().unwrap().to_string();

    let resp = test::TestRequest::get()
        .uri(&format!("/api/v1/confessions/{id}"))
        .insert_header(bearer("someone-else", "m", vec![Role::User]))
        .send_request(&app)
        .await;
    assert_eq!(resp.status(), 200);
    let fetched = body_json(resp).await;
    assert!(fetched.get("encrypted_owner_mid").is_none());
}

#[actix_web::test]
#[serial]
async fn reply_exchange_and_unread_flow() {
    setup_env();
    let state = state();
    let app = app!(state);

    let owner = bearer("owner-mid", "f", vec![Role::User]);
    let replier = bearer("replier-mid", "m", vec![Role::User]);

    let resp = test::TestRequest::post()
        .uri("/api/v1/confessions")
        .insert_header(owner.clone())
        .set_json(serde_json::json!({"content": "late night thought", "college": "nit-x"}))
        .send_request(&app)
        .await;
    let confession_id = body_json(resp).await["id"].as_str().unwrap().to_string();

    // replier opens the exchange
    let resp = test::TestRequest::post()
        .uri("/api/v1/replies")
        .insert_header(replier.clone())
        .set_json(serde_json::json!({"confession_id": confession_id, "content": "hi"}))
        .send_request(&app)
        .await;
    assert_eq!(resp.status(), 200);

    // the confessor's inbox shows the exchange but no identifier for it
    let resp = test::TestRequest::get()
        .uri("/api/v1/inbox")
        .insert_header(owner.clone())
        .send_request(&app)
        .await;
    let inbox = body_json(resp).await;
    assert_eq!(inbox.as_array().unwrap().len(), 1);
    let thread = &inbox[0];
    assert_eq!(thread["you_are_confessor"], true);
    assert_eq!(thread["confession_content"], "late night thought");
    assert_eq!(thread["replies"][0]["content"], "hi");
    assert_eq!(thread["replies"][0]["from_you"], false);
    assert!(thread["replies"][0].get("replier_mid").is_none());
    let primary_id = thread["replies"][0]["id"].as_str().unwrap().to_string();

    // confessor answers, addressed by exchange id; replier follows up
    let resp = test::TestRequest::post()
        .uri("/api/v1/replies")
        .insert_header(owner.clone())
        .set_json(serde_json::json!({
            "confession_id": confession_id,
            "content": "hello",
            "primary_reply_id": primary_id,
        }))
        .send_request(&app)
        .await;
    assert_eq!(resp.status(), 200);
    let resp = test::TestRequest::post()
        .uri("/api/v1/replies")
        .insert_header(replier.clone())
        .set_json(serde_json::json!({"confession_id": confession_id, "content": "how are you"}))
        .send_request(&app)
        .await;
    assert_eq!(resp.status(), 200);

    // owner is missing the primary and the follow-up; replier misses "hello"
    let resp = test::TestRequest::get()
        .uri("/api/v1/inbox/unread-count")
        .insert_header(owner.clone())
        .send_request(&app)
        .await;
    assert_eq!(body_json(resp).await["count"], 2);
    let resp = test::TestRequest::get()
        .uri("/api/v1/inbox/unread-count")
        .insert_header(replier.clone())
        .send_request(&app)
        .await;
    assert_eq!(body_json(resp).await["count"], 1);

    // replier catches up; a second mark is a no-op
    let resp = test::TestRequest::post()
        .uri("/api/v1/replies/seen")
        .insert_header(replier.clone())
        .set_json(serde_json::json!({
            "confession_id": confession_id,
            "primary_reply_id": primary_id,
        }))
        .send_request(&app)
        .await;
    assert_eq!(body_json(resp).await["changed"], true);
    let resp = test::TestRequest::post()
        .uri("/api/v1/replies/seen")
        .insert_header(replier.clone())
        .set_json(serde_json::json!({
            "confession_id": confession_id,
            "primary_reply_id": primary_id,
        }))
        .send_request(&app)
        .await;
    assert_eq!(body_json(resp).await["changed"], false);
    let resp = test::TestRequest::get()
        .uri("/api/v1/inbox/unread-count")
        .insert_header(replier)
        .send_request(&app)
        .await;
    assert_eq!(body_json(resp).await["count"], 0);

    // the confessor clears their side too: the primary itself plus the
    // follow-up, after which the badge reads zero
    let resp = test::TestRequest::post()
        .uri("/api/v1/replies/primary-seen")
        .insert_header(owner.clone())
        .set_json(serde_json::json!({
            "confession_id": confession_id,
            "primary_reply_id": primary_id,
        }))
        .send_request(&app)
        .await;
    assert_eq!(body_json(resp).await["changed"], true);
    let resp = test::TestRequest::post()
        .uri("/api/v1/replies/seen")
        .insert_header(owner.clone())
        .set_json(serde_json::json!({
            "confession_id": confession_id,
            "primary_reply_id": primary_id,
        }))
        .send_request(&app)
        .await;
    assert_eq!(body_json(resp).await["changed"], true);
    let resp = test::TestRequest::get()
        .uri("/api/v1/inbox/unread-count")
        .insert_header(owner.clone())
        .send_request(&app)
        .await;
    assert_eq!(body_json(resp).await["count"], 0);

    // messages render from the replier's side with direction flags only
    let resp = test::TestRequest::get()
        .uri("/api/v1/inbox")
        .insert_header(bearer("replier-mid", "m", vec![Role::User]))
        .send_request(&app)
        .await;
    let inbox = body_json(resp).await;
    let msgs = inbox[0]["replies"][0]["messages"].as_array().unwrap();
    assert_eq!(msgs.len(), 2);
    assert_eq!(msgs[0]["content"], "hello");
    assert_eq!(msgs[0]["from_confessor"], true);
    assert_eq!(msgs[1]["content"], "how are you");
    assert_eq!(msgs[1]["from_you"], true);
    assert!(msgs[0].get("sent_by").is_none());
}

#[actix_web::test]
#[serial]
async fn confessor_reply_requires_an_exchange() {
    setup_env();
    let state = state();
    let app = app!(state);

    let owner = bearer("owner-mid", "f", vec![Role::User]);
    let resp = test::TestRequest::post()
        .uri("/api/v1/confessions")
        .insert_header(owner.clone())
        .set_json(serde_json::json!({"content": "x", "college": "nit-x"}))
        .send_request(&app)
        .await;
    let confession_id = body_json(resp).await["id"].as_str().unwrap().to_string();

    // no primary_reply_id -> nothing to address
    let resp = test::TestRequest::post()
        .uri("/api/v1/replies")
        .insert_header(owner)
        .set_json(serde_json::json!({"confession_id": confession_id, "content": "hello?"}))
        .send_request(&app)
        .await;
    assert_eq!(resp.status(), 404);
}

#[actix_web::test]
#[serial]
async fn seen_marking_is_limited_to_participants() {
    setup_env();
    let state = state();
    let app = app!(state);

    let owner = bearer("owner-mid", "f", vec![Role::User]);
    let replier = bearer("replier-mid", "m", vec![Role::User]);
    let resp = test::TestRequest::post()
        .uri("/api/v1/confessions")
        .insert_header(owner)
        .set_json(serde_json::json!({"content": "x", "college": "nit-x"}))
        .send_request(&app)
        .await;
    let confession_id = body_json(resp).await["id"].as_str().unwrap().to_string();
    test::TestRequest::post()
        .uri("/api/v1/replies")
        .insert_header(replier.clone())
        .set_json(serde_json::json!({"confession_id": confession_id, "content": "hi"}))
        .send_request(&app)
        .await;
    let resp = test::TestRequest::get()
        .uri("/api/v1/inbox")
        .insert_header(replier)
        .send_request(&app)
        .await;
    let primary_id = body_json(resp).await[0]["replies"][0]["id"]
        .as_str()
        .unwrap()
        .to_string();

    // an outsider gets the same 404 for a real id as for a made-up one,
    // and leaves no trace in the seen sets
    for id in [primary_id.as_str(), "made-up"] {
        for uri in ["/api/v1/replies/seen", "/api/v1/replies/primary-seen"] {
            let resp = test::TestRequest::post()
                .uri(uri)
                .insert_header(bearer("lurker-mid", "m", vec![Role::User]))
                .set_json(serde_json::json!({
                    "confession_id": confession_id,
                    "primary_reply_id": id,
                }))
                .send_request(&app)
                .await;
            assert_eq!(resp.status(), 404);
        }
    }
}

#[actix_web::test]
#[serial]
async fn admin_endpoints_are_role_gated() {
    setup_env();
    let state = state();
    let app = app!(state);

    let resp = test::TestRequest::post()
        .uri("/api/v1/confessions")
        .insert_header(bearer("owner-mid", "f", vec![Role::User]))
        .set_json(serde_json::json!({"content": "x", "college": "nit-x"}))
        .send_request(&app)
        .await;
    let id = body_json(resp).await["id"].as_str().unwrap().to_string();

    // plain users cannot reveal or write the directory
    let resp = test::TestRequest::get()
        .uri(&format!("/api/v1/admin/confessions/{id}/owner"))
        .insert_header(bearer("nosy", "m", vec![Role::User]))
        .send_request(&app)
        .await;
    assert_eq!(resp.status(), 403);
    let resp = test::TestRequest::post()
        .uri("/api/v1/admin/directory")
        .insert_header(bearer("nosy", "m", vec![Role::User]))
        .set_json(serde_json::json!({"mid": "m1", "email": "m1@example.com"}))
        .send_request(&app)
        .await;
    assert_eq!(resp.status(), 403);

    // an admin gets the decrypted owner back
    let resp = test::TestRequest::get()
        .uri(&format!("/api/v1/admin/confessions/{id}/owner"))
        .insert_header(bearer("admin-mid", "m", vec![Role::Admin, Role::User]))
        .send_request(&app)
        .await;
    assert_eq!(resp.status(), 200);
    assert_eq!(body_json(resp).await["mid"], "owner-mid");

    let resp = test::TestRequest::post()
        .uri("/api/v1/admin/directory")
        .insert_header(bearer("admin-mid", "m", vec![Role::Admin]))
        .set_json(serde_json::json!({"mid": "m1", "email": "m1@example.com"}))
        .send_request(&app)
        .await;
    assert_eq!(resp.status(), 200);
}

#[actix_web::test]
#[serial]
async fn missing_token_is_unauthorized() {
    setup_env();
    let state = state();
    let app = app!(state);

    let resp = test::TestRequest::get()
        .uri("/api/v1/inbox")
        .send_request(&app)
        .await;
    assert_eq!(resp.status(), 401);
}

#[actix_web::test]
#[serial]
async fn confession_rate_limit_applies_per_member() {
    setup_env();
    std::env::set_var("RL_CONFESSION_LIMIT", "2");
    let repo = Arc::new(InMemRepo::new());
    let codec = Arc::new(IdentityCodec::from_hex_key(KEY).unwrap());
    let notifier = Arc::new(Notifier::new(repo.clone(), Arc::new(NullMailer)));
    let state = AppState {
        repo,
        codec,
        notifier,
        limits: RateLimiterFacade::new(InMemoryRateLimiter::new(true), RateLimitConfig::from_env()),
    };
    std::env::remove_var("RL_CONFESSION_LIMIT");
    let app = app!(state);

    let post = |hdr: (&'static str, String)| {
        test::TestRequest::post()
            .uri("/api/v1/confessions")
            .insert_header(hdr)
            .set_json(serde_json::json!({"content": "x", "college": "nit-x"}))
    };
    for _ in 0..2 {
        let resp = post(bearer("heavy", "m", vec![Role::User]))
            .send_request(&app)
            .await;
        assert_eq!(resp.status(), 201);
    }
    let resp = post(bearer("heavy", "m", vec![Role::User]))
        .send_request(&app)
        .await;
    assert_eq!(resp.status(), 429);
    // a different member has their own window
    let resp = post(bearer("light", "f", vec![Role::User]))
        .send_request(&app)
        .await;
    assert_eq!(resp.status(), 201);
}
