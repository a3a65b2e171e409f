use actix_web::{web, HttpResponse};
use chrono::Utc;
use std::sync::Arc;
use tracing::warn;

use crate::auth::Auth;
use crate::error::ApiError;
use crate::identity::IdentityCodec;
use crate::inbox;
use crate::models::*;
use crate::notify::Notifier;
use crate::rate_limit::RateLimiterFacade;
use crate::repo::Repo;

pub fn config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .service(
                web::resource("/confessions").route(web::post().to(create_confession)),
            )
            .service(web::resource("/confessions/{id}").route(web::get().to(get_confession)))
            .service(
                web::resource("/confessions/{id}/like").route(web::post().to(like_confession)),
            )
            .service(web::resource("/replies").route(web::post().to(submit_reply)))
            .service(web::resource("/replies/seen").route(web::post().to(mark_seen)))
            .service(
                web::resource("/replies/primary-seen").route(web::post().to(mark_primary_seen)),
            )
            .service(web::resource("/inbox").route(web::get().to(get_inbox)))
            .service(web::resource("/inbox/unread-count").route(web::get().to(unread_count)))
            // Admin: the single sanctioned plaintext-exposure path
            .service(
                web::resource("/admin/confessions/{id}/owner")
                    .route(web::get().to(admin_confession_owner)),
            )
            .service(web::resource("/admin/directory").route(web::post().to(admin_set_directory))),
    );
}

#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<dyn Repo>,
    pub codec: Arc<IdentityCodec>,
    pub notifier: Arc<Notifier>,
    pub limits: RateLimiterFacade,
}

macro_rules! ensure_admin {
    ($auth:expr) => {
        if !$auth.0.is_admin() {
            return Err(ApiError::Forbidden);
        }
    };
}

#[utoipa::path(
    post,
    path = "/api/v1/confessions",
    request_body = NewConfession,
    responses(
        (status = 201, description = "Confession created", body = ConfessionView),
        (status = 429, description = "Rate limited")
    )
)]
pub async fn create_confession(
    auth: Auth,
    data: web::Data<AppState>,
    payload: web::Json<NewConfession>,
) -> Result<HttpResponse, ApiError> {
    if !data.limits.allow_confession(auth.0.mid()) {
        return Err(ApiError::RateLimited);
    }
    // the owner MID is sealed before anything touches storage
    let sealed = data.codec.encrypt(auth.0.mid()).map_err(|_| ApiError::Internal)?;
    let new = payload.into_inner();
    let confession = Confession {
        id: uuid::Uuid::new_v4().to_string(),
        content: new.content,
        college: new.college,
        gender: auth.0.gender.clone(),
        encrypted_owner_mid: sealed.ciphertext,
        owner_iv: sealed.iv,
        likes: Vec::new(),
        comments: Vec::new(),
        created_at: Utc::now(),
    };
    let confession = data.repo.create_confession(confession).await?;
    Ok(HttpResponse::Created().json(ConfessionView::from(&confession)))
}

#[utoipa::path(
    get,
    path = "/api/v1/confessions/{id}",
    params(("id" = String, Path, description = "Confession id")),
    responses(
        (status = 200, description = "Confession", body = ConfessionView),
        (status = 404, description = "Confession not found")
    )
)]
pub async fn get_confession(
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    let confession = data.repo.get_confession(&path.into_inner()).await?;
    Ok(HttpResponse::Ok().json(ConfessionView::from(&confession)))
}

#[utoipa::path(
    post,
    path = "/api/v1/confessions/{id}/like",
    params(("id" = String, Path, description = "Confession id")),
    responses(
        (status = 200, description = "Toggle outcome", body = LikeToggle),
        (status = 404, description = "Confession not found"),
        (status = 429, description = "Rate limited")
    )
)]
pub async fn like_confession(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    if !data.limits.allow_like(auth.0.mid()) {
        return Err(ApiError::RateLimited);
    }
    let confession_id = path.into_inner();
    let toggle = data.repo.toggle_like(&confession_id, auth.0.mid()).await?;
    if toggle.liked {
        // detached: the response does not wait on mail delivery
        crate::milestones::spawn_like_milestone(
            data.repo.clone(),
            data.codec.clone(),
            data.notifier.clone(),
            confession_id,
            toggle.like_count,
        );
    }
    Ok(HttpResponse::Ok().json(toggle))
}

#[derive(Debug, serde::Deserialize, utoipa::ToSchema)]
pub struct NewReplyMessage {
    pub confession_id: String,
    pub content: String,
    /// Required when the sender is the confessor: names which exchange the
    /// message belongs to. Repliers are keyed by their own MID instead.
    pub primary_reply_id: Option<String>,
}

#[utoipa::path(
    post,
    path = "/api/v1/replies",
    request_body = NewReplyMessage,
    responses(
        (status = 200, description = "Reply stored"),
        (status = 404, description = "Confession or exchange not found"),
        (status = 429, description = "Rate limited"),
        (status = 500, description = "Could not save reply")
    )
)]
pub async fn submit_reply(
    auth: Auth,
    data: web::Data<AppState>,
    payload: web::Json<NewReplyMessage>,
) -> Result<HttpResponse, ApiError> {
    let sender_mid = auth.0.mid().to_string();
    if !data.limits.allow_reply(&sender_mid) {
        return Err(ApiError::RateLimited);
    }
    let req = payload.into_inner();
    let confession = data.repo.get_confession(&req.confession_id).await?;

    // resolve the confessor; failure aborts with the generic save error
    let confessor_mid = data
        .codec
        .decrypt(&confession.encrypted_owner_mid, &confession.owner_iv)
        .map_err(|_| {
            warn!(confession_id = %req.confession_id, "owner identity unreadable on reply");
            ApiError::ReplyNotSaved
        })?;
    let sent_by_confessor = confessor_mid == sender_mid;

    let (replier_mid, replier_gender) = if sent_by_confessor {
        // confessor messages an existing exchange, addressed by primary id
        let primary_reply_id = req.primary_reply_id.ok_or(ApiError::NotFound)?;
        let thread = data
            .repo
            .get_thread(&req.confession_id, &confessor_mid)
            .await?;
        let primary = thread
            .replies
            .iter()
            .find(|p| p.id == primary_reply_id)
            .ok_or(ApiError::NotFound)?;
        (primary.replier_mid.clone(), primary.replier_gender.clone())
    } else {
        (sender_mid.clone(), auth.0.gender.clone())
    };

    let append = AppendReply {
        confession_id: req.confession_id,
        confessor_mid,
        confessor_gender: confession.gender.clone(),
        confession_content: data.codec.encrypt(&confession.content)?,
        replier_mid,
        replier_gender,
        content: data.codec.encrypt(&req.content)?,
        sent_by: sender_mid,
        sent_by_confessor,
        sender_gender: auth.0.gender.clone(),
    };
    data.repo.append_reply(append).await.map_err(|e| match e {
        crate::repo::RepoError::NotFound => ApiError::NotFound,
        _ => ApiError::ReplyNotSaved,
    })?;
    // nothing echoed back beyond what the caller already has
    Ok(HttpResponse::Ok().json(serde_json::json!({"status":"ok"})))
}

#[derive(Debug, serde::Deserialize, utoipa::ToSchema)]
pub struct MarkSeenRequest {
    pub confession_id: String,
    pub primary_reply_id: String,
}

/// Resolve the confessor MID for a seen-state request and verify the
/// viewer actually participates in the addressed exchange. Outsiders get
/// the same 404 as a missing primary so existing ids cannot be probed.
async fn authorize_seen(
    data: &AppState,
    req: &MarkSeenRequest,
    viewer_mid: &str,
) -> Result<String, ApiError> {
    let confession = data.repo.get_confession(&req.confession_id).await?;
    let confessor_mid = data
        .codec
        .decrypt(&confession.encrypted_owner_mid, &confession.owner_iv)
        .map_err(|_| ApiError::Internal)?;
    let thread = data
        .repo
        .get_thread(&req.confession_id, &confessor_mid)
        .await?;
    let primary = thread
        .replies
        .iter()
        .find(|p| p.id == req.primary_reply_id)
        .ok_or(ApiError::NotFound)?;
    if viewer_mid != confessor_mid && viewer_mid != primary.replier_mid {
        return Err(ApiError::NotFound);
    }
    Ok(confessor_mid)
}

#[utoipa::path(
    post,
    path = "/api/v1/replies/seen",
    request_body = MarkSeenRequest,
    responses(
        (status = 200, description = "Seen state updated", body = SeenUpdate),
        (status = 404, description = "Thread or primary reply not found")
    )
)]
pub async fn mark_seen(
    auth: Auth,
    data: web::Data<AppState>,
    payload: web::Json<MarkSeenRequest>,
) -> Result<HttpResponse, ApiError> {
    let req = payload.into_inner();
    let confessor_mid = authorize_seen(&data, &req, auth.0.mid()).await?;
    let update = data
        .repo
        .mark_all_secondary_seen(
            &req.confession_id,
            &confessor_mid,
            &req.primary_reply_id,
            auth.0.mid(),
        )
        .await?;
    Ok(HttpResponse::Ok().json(update))
}

#[utoipa::path(
    post,
    path = "/api/v1/replies/primary-seen",
    request_body = MarkSeenRequest,
    responses(
        (status = 200, description = "Seen state updated", body = SeenUpdate),
        (status = 404, description = "Thread or primary reply not found")
    )
)]
pub async fn mark_primary_seen(
    auth: Auth,
    data: web::Data<AppState>,
    payload: web::Json<MarkSeenRequest>,
) -> Result<HttpResponse, ApiError> {
    let req = payload.into_inner();
    let confessor_mid = authorize_seen(&data, &req, auth.0.mid()).await?;
    let update = data
        .repo
        .mark_primary_seen(
            &req.confession_id,
            &confessor_mid,
            &req.primary_reply_id,
            auth.0.mid(),
        )
        .await?;
    Ok(HttpResponse::Ok().json(update))
}

#[utoipa::path(
    get,
    path = "/api/v1/inbox",
    responses((status = 200, description = "Threads for the caller", body = [inbox::ThreadView]))
)]
pub async fn get_inbox(auth: Auth, data: web::Data<AppState>) -> Result<HttpResponse, ApiError> {
    let threads = data.repo.threads_for_viewer(auth.0.mid()).await?;
    let mut views = Vec::with_capacity(threads.len());
    for thread in &threads {
        match inbox::thread_view(thread, auth.0.mid(), &data.codec) {
            Ok(view) => views.push(view),
            // corrupted entries are non-fatal: skip and keep serving
            Err(_) => warn!(thread_id = %thread.id, "skipping unreadable thread in inbox"),
        }
    }
    Ok(HttpResponse::Ok().json(views))
}

#[utoipa::path(
    get,
    path = "/api/v1/inbox/unread-count",
    responses((status = 200, description = "Derived unread badge count"))
)]
pub async fn unread_count(
    auth: Auth,
    data: web::Data<AppState>,
) -> Result<HttpResponse, ApiError> {
    let threads = data.repo.threads_for_viewer(auth.0.mid()).await?;
    let count = inbox::unread_count(&threads, auth.0.mid());
    Ok(HttpResponse::Ok().json(serde_json::json!({ "count": count })))
}

#[derive(Debug, serde::Serialize, utoipa::ToSchema)]
pub struct OwnerReveal {
    pub mid: String,
}

#[utoipa::path(
    get,
    path = "/api/v1/admin/confessions/{id}/owner",
    params(("id" = String, Path, description = "Confession id")),
    responses(
        (status = 200, description = "Decrypted owner MID", body = OwnerReveal),
        (status = 403, description = "Forbidden - Admins only"),
        (status = 404, description = "Confession not found")
    )
)]
pub async fn admin_confession_owner(
    auth: Auth,
    data: web::Data<AppState>,
    path: web::Path<String>,
) -> Result<HttpResponse, ApiError> {
    ensure_admin!(auth);
    let confession = data.repo.get_confession(&path.into_inner()).await?;
    let mid = data
        .codec
        .decrypt(&confession.encrypted_owner_mid, &confession.owner_iv)
        .map_err(|_| ApiError::Internal)?;
    Ok(HttpResponse::Ok().json(OwnerReveal { mid }))
}

#[derive(Debug, serde::Deserialize, utoipa::ToSchema)]
pub struct DirectoryEntry {
    pub mid: String,
    pub email: String,
}

#[utoipa::path(
    post,
    path = "/api/v1/admin/directory",
    request_body = DirectoryEntry,
    responses(
        (status = 200, description = "Mapping stored"),
        (status = 403, description = "Forbidden - Admins only")
    )
)]
pub async fn admin_set_directory(
    auth: Auth,
    data: web::Data<AppState>,
    payload: web::Json<DirectoryEntry>,
) -> Result<HttpResponse, ApiError> {
    ensure_admin!(auth);
    let entry = payload.into_inner();
    data.repo.set_email_for_mid(&entry.mid, &entry.email).await?;
    Ok(HttpResponse::Ok().json(serde_json::json!({"status":"ok"})))
}
