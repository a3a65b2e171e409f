use crate::models::*;

#[derive(thiserror::Error, Debug)]
pub enum RepoError {
    #[error("not found")]
    NotFound,
    #[error("conflict")]
    Conflict,
    #[error("internal: {0}")]
    Internal(String),
}

pub type RepoResult<T> = Result<T, RepoError>;

use async_trait::async_trait;

#[async_trait]
pub trait ConfessionRepo: Send + Sync {
    async fn create_confession(&self, confession: Confession) -> RepoResult<Confession>;
    async fn get_confession(&self, id: &str) -> RepoResult<Confession>;
    /// Atomic like toggle: one call flips membership of `mid` in the like
    /// set and reports the resulting count. Concurrent toggles must not
    /// lose updates.
    async fn toggle_like(&self, confession_id: &str, mid: &str) -> RepoResult<LikeToggle>;
}

#[async_trait]
pub trait ReplyThreadRepo: Send + Sync {
    /// Single atomic find-or-create-and-append. Creates the thread on the
    /// first reply, then either starts a new primary (unknown replier) or
    /// appends a secondary under the replier's existing primary. The
    /// sender's own MID pre-seeds the new entry's seen set.
    ///
    /// Atomic with respect to thread structure: concurrent appends from
    /// two repliers both land; no partial writes on error.
    async fn append_reply(&self, append: AppendReply) -> RepoResult<ReplyThread>;

    async fn get_thread(&self, confession_id: &str, confessor_mid: &str)
        -> RepoResult<ReplyThread>;

    /// Threads the viewer participates in, as confessor or replier.
    async fn threads_for_viewer(&self, viewer_mid: &str) -> RepoResult<Vec<ReplyThread>>;

    /// Add `viewer_mid` to the given primary's own seen set. Without this
    /// the confessor's unread badge could never clear: appends seed a
    /// primary's seen set with the replier only.
    async fn mark_primary_seen(
        &self,
        confession_id: &str,
        confessor_mid: &str,
        primary_reply_id: &str,
        viewer_mid: &str,
    ) -> RepoResult<SeenUpdate>;

    /// Add `viewer_mid` to the seen set of every secondary under the given
    /// primary that does not already carry it. Persists only when at least
    /// one entry changed; idempotent.
    async fn mark_all_secondary_seen(
        &self,
        confession_id: &str,
        confessor_mid: &str,
        primary_reply_id: &str,
        viewer_mid: &str,
    ) -> RepoResult<SeenUpdate>;
}

#[async_trait]
pub trait NotificationLogRepo: Send + Sync {
    async fn find_log(
        &self,
        recipient: &str,
        kind: NotificationKind,
        reference_id: &str,
        milestone: Option<u32>,
    ) -> RepoResult<Option<NotificationLog>>;

    /// Insert exactly one row per tuple. A duplicate tuple yields
    /// `RepoError::Conflict`; callers treat that as successful suppression.
    /// The backing store's uniqueness guarantee, not the upfront
    /// `find_log`, is the authoritative dedup guard.
    async fn insert_log(&self, log: NotificationLog) -> RepoResult<()>;
}

#[async_trait]
pub trait DirectoryRepo: Send + Sync {
    /// MID -> deliverable address, owned by user management.
    async fn email_for_mid(&self, mid: &str) -> Option<String>;
    async fn set_email_for_mid(&self, mid: &str, email: &str) -> RepoResult<()>;
}

pub trait Repo: ConfessionRepo + ReplyThreadRepo + NotificationLogRepo + DirectoryRepo {}

impl<T> Repo for T where
    T: ConfessionRepo + ReplyThreadRepo + NotificationLogRepo + DirectoryRepo
{
}

#[cfg(feature = "inmem-store")]
pub mod inmem {
    use super::*;
    use chrono::Utc;
    use serde::{Deserialize, Serialize};
    use std::collections::HashMap;
    use std::path::{Path, PathBuf};
    use std::sync::{Arc, RwLock};

    const SNAPSHOT_PATH: &str = "data/state.json";

    fn thread_key(confession_id: &str, confessor_mid: &str) -> String {
        format!("{confession_id}\u{1f}{confessor_mid}")
    }

    #[derive(Default, Serialize, Deserialize)]
    struct State {
        confessions: HashMap<Id, Confession>,
        // keyed by (confession_id, confessor_mid)
        threads: HashMap<String, ReplyThread>,
        notification_logs: Vec<NotificationLog>,
        directory: HashMap<String, String>,
    }

    impl State {
        fn log_exists(
            &self,
            recipient: &str,
            kind: NotificationKind,
            reference_id: &str,
            milestone: Option<u32>,
        ) -> bool {
            self.notification_logs.iter().any(|l| {
                l.recipient == recipient
                    && l.kind == kind
                    && l.reference_id == reference_id
                    && l.milestone == milestone
            })
        }
    }

    #[derive(Clone)]
    pub struct InMemRepo {
        state: Arc<RwLock<State>>,
        snapshot_path: Arc<PathBuf>,
    }

    impl InMemRepo {
        fn data_dir() -> PathBuf {
            std::env::var("CONFIDE_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("data"))
        }

        fn snapshot_path() -> PathBuf {
            if std::env::var("CONFIDE_DATA_DIR").is_ok() {
                let mut p = Self::data_dir();
                p.push("state.json");
                p
            } else {
                PathBuf::from(SNAPSHOT_PATH)
            }
        }

        fn load_state_from(path: &Path) -> State {
            match std::fs::read(path) {
                Ok(bytes) => match serde_json::from_slice::<State>(&bytes) {
                    Ok(s) => {
                        log::info!("[inmem] loaded snapshot '{}'", path.display());
                        s
                    }
                    Err(e) => {
                        log::warn!(
                            "[inmem] failed to parse snapshot '{}': {e}. Starting empty.",
                            path.display()
                        );
                        State::default()
                    }
                },
                Err(_) => State::default(),
            }
        }

        fn persist(&self) {
            let path = self.snapshot_path.clone();
            if let Ok(s) = serde_json::to_vec_pretty(&*self.state.read().unwrap()) {
                if let Some(dir) = path.parent() {
                    let _ = std::fs::create_dir_all(dir);
                }
                if let Err(e) = std::fs::write(&*path, s) {
                    log::error!("[inmem] failed to write snapshot '{}': {e}", path.display());
                }
            }
        }

        pub fn new() -> Self {
            let snapshot_path = Self::snapshot_path();
            let state = Self::load_state_from(&snapshot_path);
            Self {
                state: Arc::new(RwLock::new(state)),
                snapshot_path: Arc::new(snapshot_path),
            }
        }
    }

    impl Default for InMemRepo {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl ConfessionRepo for InMemRepo {
        async fn create_confession(&self, confession: Confession) -> RepoResult<Confession> {
            let mut s = self.state.write().unwrap();
            if s.confessions.contains_key(&confession.id) {
                return Err(RepoError::Conflict);
            }
            s.confessions.insert(confession.id.clone(), confession.clone());
            drop(s); // release lock before persisting
            self.persist();
            Ok(confession)
        }

        async fn get_confession(&self, id: &str) -> RepoResult<Confession> {
            let s = self.state.read().unwrap();
            s.confessions.get(id).cloned().ok_or(RepoError::NotFound)
        }

        async fn toggle_like(&self, confession_id: &str, mid: &str) -> RepoResult<LikeToggle> {
            let mut s = self.state.write().unwrap();
            let confession = s
                .confessions
                .get_mut(confession_id)
                .ok_or(RepoError::NotFound)?;
            let liked = if let Some(pos) = confession.likes.iter().position(|m| m == mid) {
                confession.likes.remove(pos);
                false
            } else {
                confession.likes.push(mid.to_string());
                true
            };
            let like_count = confession.likes.len();
            drop(s);
            self.persist();
            Ok(LikeToggle { liked, like_count })
        }
    }

    #[async_trait]
    impl ReplyThreadRepo for InMemRepo {
        async fn append_reply(&self, append: AppendReply) -> RepoResult<ReplyThread> {
            let now = Utc::now();
            let mut s = self.state.write().unwrap();
            let key = thread_key(&append.confession_id, &append.confessor_mid);
            let thread = s.threads.entry(key).or_insert_with(|| ReplyThread {
                id: uuid::Uuid::new_v4().to_string(),
                confession_id: append.confession_id.clone(),
                confessor_mid: append.confessor_mid.clone(),
                confessor_gender: append.confessor_gender.clone(),
                confession_content: append.confession_content.clone(),
                replies: Vec::new(),
                created_at: now,
            });

            match thread
                .replies
                .iter_mut()
                .find(|p| p.replier_mid == append.replier_mid)
            {
                Some(primary) => {
                    primary.secondary_replies.push(SecondaryReply {
                        content: append.content,
                        sent_by: append.sent_by.clone(),
                        sent_by_confessor: append.sent_by_confessor,
                        sender_gender: append.sender_gender,
                        seen: vec![append.sent_by],
                        created_at: now,
                    });
                }
                None => {
                    thread.replies.push(PrimaryReply {
                        id: uuid::Uuid::new_v4().to_string(),
                        content: append.content,
                        replier_mid: append.replier_mid.clone(),
                        replier_gender: append.replier_gender,
                        seen: vec![append.replier_mid],
                        secondary_replies: Vec::new(),
                        created_at: now,
                    });
                }
            }

            let updated = thread.clone();
            drop(s);
            self.persist();
            Ok(updated)
        }

        async fn get_thread(
            &self,
            confession_id: &str,
            confessor_mid: &str,
        ) -> RepoResult<ReplyThread> {
            let s = self.state.read().unwrap();
            s.threads
                .get(&thread_key(confession_id, confessor_mid))
                .cloned()
                .ok_or(RepoError::NotFound)
        }

        async fn threads_for_viewer(&self, viewer_mid: &str) -> RepoResult<Vec<ReplyThread>> {
            let s = self.state.read().unwrap();
            let mut v: Vec<_> = s
                .threads
                .values()
                .filter(|t| {
                    t.confessor_mid == viewer_mid
                        || t.replies.iter().any(|p| p.replier_mid == viewer_mid)
                })
                .cloned()
                .collect();
            v.sort_by(|a, b| b.created_at.cmp(&a.created_at)); // latest first
            Ok(v)
        }

        async fn mark_primary_seen(
            &self,
            confession_id: &str,
            confessor_mid: &str,
            primary_reply_id: &str,
            viewer_mid: &str,
        ) -> RepoResult<SeenUpdate> {
            let mut s = self.state.write().unwrap();
            let thread = s
                .threads
                .get_mut(&thread_key(confession_id, confessor_mid))
                .ok_or(RepoError::NotFound)?;
            let primary = thread
                .replies
                .iter_mut()
                .find(|p| p.id == primary_reply_id)
                .ok_or(RepoError::NotFound)?;

            let changed = if primary.seen.iter().any(|m| m == viewer_mid) {
                false
            } else {
                primary.seen.push(viewer_mid.to_string());
                true
            };
            drop(s);
            if changed {
                self.persist();
            }
            Ok(SeenUpdate { changed })
        }

        async fn mark_all_secondary_seen(
            &self,
            confession_id: &str,
            confessor_mid: &str,
            primary_reply_id: &str,
            viewer_mid: &str,
        ) -> RepoResult<SeenUpdate> {
            let mut s = self.state.write().unwrap();
            let thread = s
                .threads
                .get_mut(&thread_key(confession_id, confessor_mid))
                .ok_or(RepoError::NotFound)?;
            let primary = thread
                .replies
                .iter_mut()
                .find(|p| p.id == primary_reply_id)
                .ok_or(RepoError::NotFound)?;

            let mut changed = false;
            for secondary in &mut primary.secondary_replies {
                if !secondary.seen.iter().any(|m| m == viewer_mid) {
                    secondary.seen.push(viewer_mid.to_string());
                    changed = true;
                }
            }
            drop(s);
            if changed {
                // skip no-op persistence
                self.persist();
            }
            Ok(SeenUpdate { changed })
        }
    }

    #[async_trait]
    impl NotificationLogRepo for InMemRepo {
        async fn find_log(
            &self,
            recipient: &str,
            kind: NotificationKind,
            reference_id: &str,
            milestone: Option<u32>,
        ) -> RepoResult<Option<NotificationLog>> {
            let s = self.state.read().unwrap();
            Ok(s.notification_logs
                .iter()
                .find(|l| {
                    l.recipient == recipient
                        && l.kind == kind
                        && l.reference_id == reference_id
                        && l.milestone == milestone
                })
                .cloned())
        }

        async fn insert_log(&self, log: NotificationLog) -> RepoResult<()> {
            // uniqueness check and insert share the write lock, so a lost
            // race surfaces as Conflict here rather than a double row
            let mut s = self.state.write().unwrap();
            if s.log_exists(&log.recipient, log.kind, &log.reference_id, log.milestone) {
                return Err(RepoError::Conflict);
            }
            s.notification_logs.push(log);
            drop(s);
            self.persist();
            Ok(())
        }
    }

    #[async_trait]
    impl DirectoryRepo for InMemRepo {
        async fn email_for_mid(&self, mid: &str) -> Option<String> {
            let s = self.state.read().unwrap();
            s.directory.get(mid).cloned()
        }

        async fn set_email_for_mid(&self, mid: &str, email: &str) -> RepoResult<()> {
            let mut s = self.state.write().unwrap();
            s.directory.insert(mid.to_string(), email.to_string());
            drop(s);
            self.persist();
            Ok(())
        }
    }
}

// Postgres implementation (feature = "postgres-store")
#[cfg(feature = "postgres-store")]
pub mod pg {
    use super::*;
    use sqlx::{Pool, Postgres, Row};

    #[derive(Clone)]
    pub struct PgRepo {
        pool: Pool<Postgres>,
    }

    impl PgRepo {
        pub fn new(pool: Pool<Postgres>) -> Self {
            Self { pool }
        }

        async fn load_thread(
            &self,
            confession_id: &str,
            confessor_mid: &str,
        ) -> RepoResult<ReplyThread> {
            let row = sqlx::query(
                "SELECT id, confession_id, confessor_mid, confessor_gender, \
                 confession_ciphertext, confession_iv, created_at \
                 FROM reply_threads WHERE confession_id = $1 AND confessor_mid = $2",
            )
            .bind(confession_id)
            .bind(confessor_mid)
            .fetch_optional(&self.pool)
            .await
            .map_err(internal)?
            .ok_or(RepoError::NotFound)?;
            self.hydrate_thread(row).await
        }

        async fn hydrate_thread(&self, row: sqlx::postgres::PgRow) -> RepoResult<ReplyThread> {
            let thread_id: String = row.get("id");
            let mut thread = ReplyThread {
                id: thread_id.clone(),
                confession_id: row.get("confession_id"),
                confessor_mid: row.get("confessor_mid"),
                confessor_gender: row.get("confessor_gender"),
                confession_content: crate::identity::Sealed {
                    ciphertext: row.get("confession_ciphertext"),
                    iv: row.get("confession_iv"),
                },
                replies: Vec::new(),
                created_at: row.get("created_at"),
            };

            let primaries = sqlx::query(
                "SELECT id, ciphertext, iv, replier_mid, replier_gender, seen, created_at \
                 FROM primary_replies WHERE thread_id = $1 ORDER BY created_at, id",
            )
            .bind(&thread_id)
            .fetch_all(&self.pool)
            .await
            .map_err(internal)?;

            for p in primaries {
                let primary_id: String = p.get("id");
                let secondaries = sqlx::query(
                    "SELECT ciphertext, iv, sent_by, sent_by_confessor, sender_gender, seen, \
                     created_at FROM secondary_replies WHERE primary_reply_id = $1 \
                     ORDER BY created_at, ordinal",
                )
                .bind(&primary_id)
                .fetch_all(&self.pool)
                .await
                .map_err(internal)?
                .into_iter()
                .map(|s| SecondaryReply {
                    content: crate::identity::Sealed {
                        ciphertext: s.get("ciphertext"),
                        iv: s.get("iv"),
                    },
                    sent_by: s.get("sent_by"),
                    sent_by_confessor: s.get("sent_by_confessor"),
                    sender_gender: s.get("sender_gender"),
                    seen: s.get("seen"),
                    created_at: s.get("created_at"),
                })
                .collect();

                thread.replies.push(PrimaryReply {
                    id: primary_id,
                    content: crate::identity::Sealed {
                        ciphertext: p.get("ciphertext"),
                        iv: p.get("iv"),
                    },
                    replier_mid: p.get("replier_mid"),
                    replier_gender: p.get("replier_gender"),
                    seen: p.get("seen"),
                    secondary_replies: secondaries,
                    created_at: p.get("created_at"),
                });
            }
            Ok(thread)
        }
    }

    fn internal(e: sqlx::Error) -> RepoError {
        RepoError::Internal(e.to_string())
    }

    #[async_trait]
    impl ConfessionRepo for PgRepo {
        async fn create_confession(&self, c: Confession) -> RepoResult<Confession> {
            sqlx::query(
                "INSERT INTO confessions \
                 (id, content, college, gender, encrypted_owner_mid, owner_iv, created_at) \
                 VALUES ($1,$2,$3,$4,$5,$6,$7)",
            )
            .bind(&c.id)
            .bind(&c.content)
            .bind(&c.college)
            .bind(&c.gender)
            .bind(&c.encrypted_owner_mid)
            .bind(&c.owner_iv)
            .bind(c.created_at)
            .execute(&self.pool)
            .await
            .map_err(|_| RepoError::Conflict)?;
            Ok(c)
        }

        async fn get_confession(&self, id: &str) -> RepoResult<Confession> {
            let row = sqlx::query(
                "SELECT id, content, college, gender, encrypted_owner_mid, owner_iv, created_at \
                 FROM confessions WHERE id = $1",
            )
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(internal)?
            .ok_or(RepoError::NotFound)?;

            let likes: Vec<String> =
                sqlx::query("SELECT mid FROM likes WHERE confession_id = $1 ORDER BY created_at")
                    .bind(id)
                    .fetch_all(&self.pool)
                    .await
                    .map_err(internal)?
                    .into_iter()
                    .map(|r| r.get("mid"))
                    .collect();

            Ok(Confession {
                id: row.get("id"),
                content: row.get("content"),
                college: row.get("college"),
                gender: row.get("gender"),
                encrypted_owner_mid: row.get("encrypted_owner_mid"),
                owner_iv: row.get("owner_iv"),
                likes,
                comments: Vec::new(),
                created_at: row.get("created_at"),
            })
        }

        async fn toggle_like(&self, confession_id: &str, mid: &str) -> RepoResult<LikeToggle> {
            let mut tx = self.pool.begin().await.map_err(internal)?;
            let exists = sqlx::query("SELECT 1 FROM confessions WHERE id = $1")
                .bind(confession_id)
                .fetch_optional(&mut *tx)
                .await
                .map_err(internal)?;
            if exists.is_none() {
                return Err(RepoError::NotFound);
            }
            let deleted = sqlx::query("DELETE FROM likes WHERE confession_id = $1 AND mid = $2")
                .bind(confession_id)
                .bind(mid)
                .execute(&mut *tx)
                .await
                .map_err(internal)?;
            let liked = if deleted.rows_affected() == 0 {
                sqlx::query(
                    "INSERT INTO likes (confession_id, mid) VALUES ($1,$2) \
                     ON CONFLICT (confession_id, mid) DO NOTHING",
                )
                .bind(confession_id)
                .bind(mid)
                .execute(&mut *tx)
                .await
                .map_err(internal)?;
                true
            } else {
                false
            };
            let count: i64 = sqlx::query("SELECT COUNT(*) AS n FROM likes WHERE confession_id = $1")
                .bind(confession_id)
                .fetch_one(&mut *tx)
                .await
                .map_err(internal)?
                .get("n");
            tx.commit().await.map_err(internal)?;
            Ok(LikeToggle {
                liked,
                like_count: count as usize,
            })
        }
    }

    #[async_trait]
    impl ReplyThreadRepo for PgRepo {
        async fn append_reply(&self, append: AppendReply) -> RepoResult<ReplyThread> {
            // one transaction per append: thread creation, primary lookup
            // and the message insert commit together or not at all
            let mut tx = self.pool.begin().await.map_err(internal)?;

            let thread_id: String = match sqlx::query(
                "INSERT INTO reply_threads \
                 (id, confession_id, confessor_mid, confessor_gender, \
                  confession_ciphertext, confession_iv) \
                 VALUES ($1,$2,$3,$4,$5,$6) \
                 ON CONFLICT (confession_id, confessor_mid) DO NOTHING \
                 RETURNING id",
            )
            .bind(uuid::Uuid::new_v4().to_string())
            .bind(&append.confession_id)
            .bind(&append.confessor_mid)
            .bind(&append.confessor_gender)
            .bind(&append.confession_content.ciphertext)
            .bind(&append.confession_content.iv)
            .fetch_optional(&mut *tx)
            .await
            .map_err(internal)?
            {
                Some(row) => row.get("id"),
                None => sqlx::query(
                    "SELECT id FROM reply_threads \
                     WHERE confession_id = $1 AND confessor_mid = $2 FOR UPDATE",
                )
                .bind(&append.confession_id)
                .bind(&append.confessor_mid)
                .fetch_one(&mut *tx)
                .await
                .map_err(internal)?
                .get("id"),
            };

            let primary = sqlx::query(
                "SELECT id FROM primary_replies WHERE thread_id = $1 AND replier_mid = $2",
            )
            .bind(&thread_id)
            .bind(&append.replier_mid)
            .fetch_optional(&mut *tx)
            .await
            .map_err(internal)?;

            match primary {
                Some(row) => {
                    let primary_id: String = row.get("id");
                    sqlx::query(
                        "INSERT INTO secondary_replies \
                         (primary_reply_id, ordinal, ciphertext, iv, sent_by, \
                          sent_by_confessor, sender_gender, seen) \
                         VALUES ($1, \
                           (SELECT COALESCE(MAX(ordinal),0)+1 FROM secondary_replies \
                            WHERE primary_reply_id = $1), \
                           $2,$3,$4,$5,$6,$7)",
                    )
                    .bind(&primary_id)
                    .bind(&append.content.ciphertext)
                    .bind(&append.content.iv)
                    .bind(&append.sent_by)
                    .bind(append.sent_by_confessor)
                    .bind(&append.sender_gender)
                    .bind(vec![append.sent_by.clone()])
                    .execute(&mut *tx)
                    .await
                    .map_err(internal)?;
                }
                None => {
                    sqlx::query(
                        "INSERT INTO primary_replies \
                         (id, thread_id, ciphertext, iv, replier_mid, replier_gender, seen) \
                         VALUES ($1,$2,$3,$4,$5,$6,$7)",
                    )
                    .bind(uuid::Uuid::new_v4().to_string())
                    .bind(&thread_id)
                    .bind(&append.content.ciphertext)
                    .bind(&append.content.iv)
                    .bind(&append.replier_mid)
                    .bind(&append.replier_gender)
                    .bind(vec![append.replier_mid.clone()])
                    .execute(&mut *tx)
                    .await
                    .map_err(internal)?;
                }
            }

            tx.commit().await.map_err(internal)?;
            self.load_thread(&append.confession_id, &append.confessor_mid)
                .await
        }

        async fn get_thread(
            &self,
            confession_id: &str,
            confessor_mid: &str,
        ) -> RepoResult<ReplyThread> {
            self.load_thread(confession_id, confessor_mid).await
        }

        async fn threads_for_viewer(&self, viewer_mid: &str) -> RepoResult<Vec<ReplyThread>> {
            let rows = sqlx::query(
                "SELECT DISTINCT t.id, t.confession_id, t.confessor_mid, t.confessor_gender, \
                 t.confession_ciphertext, t.confession_iv, t.created_at \
                 FROM reply_threads t \
                 LEFT JOIN primary_replies p ON p.thread_id = t.id \
                 WHERE t.confessor_mid = $1 OR p.replier_mid = $1 \
                 ORDER BY t.created_at DESC",
            )
            .bind(viewer_mid)
            .fetch_all(&self.pool)
            .await
            .map_err(internal)?;
            let mut threads = Vec::with_capacity(rows.len());
            for row in rows {
                threads.push(self.hydrate_thread(row).await?);
            }
            Ok(threads)
        }

        async fn mark_primary_seen(
            &self,
            confession_id: &str,
            confessor_mid: &str,
            primary_reply_id: &str,
            viewer_mid: &str,
        ) -> RepoResult<SeenUpdate> {
            let owned = sqlx::query(
                "SELECT p.id FROM primary_replies p \
                 JOIN reply_threads t ON t.id = p.thread_id \
                 WHERE p.id = $1 AND t.confession_id = $2 AND t.confessor_mid = $3",
            )
            .bind(primary_reply_id)
            .bind(confession_id)
            .bind(confessor_mid)
            .fetch_optional(&self.pool)
            .await
            .map_err(internal)?;
            if owned.is_none() {
                return Err(RepoError::NotFound);
            }

            let updated = sqlx::query(
                "UPDATE primary_replies SET seen = array_append(seen, $2) \
                 WHERE id = $1 AND NOT ($2 = ANY(seen))",
            )
            .bind(primary_reply_id)
            .bind(viewer_mid)
            .execute(&self.pool)
            .await
            .map_err(internal)?;
            Ok(SeenUpdate {
                changed: updated.rows_affected() > 0,
            })
        }

        async fn mark_all_secondary_seen(
            &self,
            confession_id: &str,
            confessor_mid: &str,
            primary_reply_id: &str,
            viewer_mid: &str,
        ) -> RepoResult<SeenUpdate> {
            // primary must belong to the addressed thread
            let owned = sqlx::query(
                "SELECT p.id FROM primary_replies p \
                 JOIN reply_threads t ON t.id = p.thread_id \
                 WHERE p.id = $1 AND t.confession_id = $2 AND t.confessor_mid = $3",
            )
            .bind(primary_reply_id)
            .bind(confession_id)
            .bind(confessor_mid)
            .fetch_optional(&self.pool)
            .await
            .map_err(internal)?;
            if owned.is_none() {
                return Err(RepoError::NotFound);
            }

            let updated = sqlx::query(
                "UPDATE secondary_replies SET seen = array_append(seen, $2) \
                 WHERE primary_reply_id = $1 AND NOT ($2 = ANY(seen))",
            )
            .bind(primary_reply_id)
            .bind(viewer_mid)
            .execute(&self.pool)
            .await
            .map_err(internal)?;
            Ok(SeenUpdate {
                changed: updated.rows_affected() > 0,
            })
        }
    }

    #[async_trait]
    impl NotificationLogRepo for PgRepo {
        async fn find_log(
            &self,
            recipient: &str,
            kind: NotificationKind,
            reference_id: &str,
            milestone: Option<u32>,
        ) -> RepoResult<Option<NotificationLog>> {
            let row = sqlx::query(
                "SELECT recipient, kind, reference_id, milestone, sent_at FROM notification_log \
                 WHERE recipient = $1 AND kind = $2 AND reference_id = $3 \
                 AND milestone IS NOT DISTINCT FROM $4",
            )
            .bind(recipient)
            .bind(kind_str(kind))
            .bind(reference_id)
            .bind(milestone.map(|m| m as i32))
            .fetch_optional(&self.pool)
            .await
            .map_err(internal)?;
            Ok(row.map(|r| NotificationLog {
                recipient: r.get("recipient"),
                kind,
                reference_id: r.get("reference_id"),
                milestone: r.get::<Option<i32>, _>("milestone").map(|m| m as u32),
                sent_at: r.get("sent_at"),
            }))
        }

        async fn insert_log(&self, log: NotificationLog) -> RepoResult<()> {
            // the unique index over (recipient, kind, reference_id, milestone)
            // is the load-bearing dedup guard; DO NOTHING turns a lost race
            // into rows_affected = 0
            let res = sqlx::query(
                "INSERT INTO notification_log (recipient, kind, reference_id, milestone, sent_at) \
                 VALUES ($1,$2,$3,$4,$5) ON CONFLICT DO NOTHING",
            )
            .bind(&log.recipient)
            .bind(kind_str(log.kind))
            .bind(&log.reference_id)
            .bind(log.milestone.map(|m| m as i32))
            .bind(log.sent_at)
            .execute(&self.pool)
            .await
            .map_err(internal)?;
            if res.rows_affected() == 0 {
                return Err(RepoError::Conflict);
            }
            Ok(())
        }
    }

    fn kind_str(kind: NotificationKind) -> &'static str {
        match kind {
            NotificationKind::LikeMilestone => "LIKE_MILESTONE",
            NotificationKind::NewComment => "NEW_COMMENT",
            NotificationKind::NewDm => "NEW_DM",
            NotificationKind::NewConfessionBroadcast => "NEW_CONFESSION_BROADCAST",
        }
    }

    #[async_trait]
    impl DirectoryRepo for PgRepo {
        async fn email_for_mid(&self, mid: &str) -> Option<String> {
            sqlx::query("SELECT email FROM directory WHERE mid = $1")
                .bind(mid)
                .fetch_optional(&self.pool)
                .await
                .ok()
                .flatten()
                .map(|r| r.get("email"))
        }

        async fn set_email_for_mid(&self, mid: &str, email: &str) -> RepoResult<()> {
            sqlx::query(
                "INSERT INTO directory (mid, email) VALUES ($1,$2) \
                 ON CONFLICT (mid) DO UPDATE SET email = EXCLUDED.email",
            )
            .bind(mid)
            .bind(email)
            .execute(&self.pool)
            .await
            .map_err(internal)?;
            Ok(())
        }
    }
}
