use crate::inbox::{MessageView, PrimaryReplyView, ThreadView};
use crate::models::{ConfessionView, LikeToggle, NewConfession, SeenUpdate};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        crate::routes::create_confession,
        crate::routes::get_confession,
        crate::routes::like_confession,
        crate::routes::submit_reply,
        crate::routes::mark_seen,
        crate::routes::mark_primary_seen,
        crate::routes::get_inbox,
        crate::routes::unread_count,
        crate::routes::admin_confession_owner,
        crate::routes::admin_set_directory,
    ),
    components(schemas(
        ConfessionView, NewConfession, LikeToggle, SeenUpdate,
        ThreadView, PrimaryReplyView, MessageView,
        crate::routes::NewReplyMessage, crate::routes::MarkSeenRequest,
        crate::routes::OwnerReveal, crate::routes::DirectoryEntry,
    )),
    tags(
        (name = "confessions", description = "Anonymous confession operations"),
        (name = "replies", description = "Anonymous reply threads"),
        (name = "inbox", description = "Seen state and unread badges"),
    )
)]
pub struct ApiDoc;
