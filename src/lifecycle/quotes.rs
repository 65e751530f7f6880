use serde_json::json;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};
use tracing::info;

use super::{field_changes, Lifecycle, LifecycleError, QuoteStatus};
use crate::db::{self, event_types, insert_event, tables, Quote};

#[derive(Debug, Clone)]
pub struct NewQuote {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub country_code: Option<String>,
    pub product: Option<String>,
    pub message: Option<String>,
    pub status: QuoteStatus,
    pub owner_id: Option<i64>,
    pub estimated_value: f64,
}

/// Field-level update; `None` leaves the stored value untouched
#[derive(Debug, Clone, Default)]
pub struct QuotePatch {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub country_code: Option<String>,
    pub product: Option<String>,
    pub message: Option<String>,
    pub status: Option<QuoteStatus>,
    pub owner_id: Option<i64>,
    pub estimated_value: Option<f64>,
}

impl QuotePatch {
    pub fn is_empty(&self) -> bool {
        self.fields().is_empty()
    }

    fn fields(&self) -> Vec<&'static str> {
        let mut fields = Vec::new();
        if self.name.is_some() {
            fields.push("name");
        }
        if self.email.is_some() {
            fields.push("email");
        }
        if self.phone.is_some() {
            fields.push("phone");
        }
        if self.country_code.is_some() {
            fields.push("country_code");
        }
        if self.product.is_some() {
            fields.push("product");
        }
        if self.message.is_some() {
            fields.push("message");
        }
        if self.status.is_some() {
            fields.push("status");
        }
        if self.owner_id.is_some() {
            fields.push("owner_id");
        }
        if self.estimated_value.is_some() {
            fields.push("estimated_value");
        }
        fields
    }
}

/// No-op write that takes the write lock and returns the row as stored
pub(super) async fn lock_quote(
    conn: &mut SqliteConnection,
    id: i64,
) -> Result<Option<Quote>, LifecycleError> {
    let quote = sqlx::query_as::<_, Quote>(
        "UPDATE quotes SET updated_at = updated_at WHERE id = ? RETURNING *",
    )
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(quote)
}

pub(super) async fn insert_quote(
    conn: &mut SqliteConnection,
    quote: &NewQuote,
    now: &str,
) -> Result<Quote, LifecycleError> {
    let created = sqlx::query_as::<_, Quote>(
        r#"
        INSERT INTO quotes (name, email, phone, country_code, product, message, status, owner_id, estimated_value, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        RETURNING *
        "#,
    )
    .bind(&quote.name)
    .bind(&quote.email)
    .bind(&quote.phone)
    .bind(&quote.country_code)
    .bind(&quote.product)
    .bind(&quote.message)
    .bind(quote.status)
    .bind(quote.owner_id)
    .bind(quote.estimated_value)
    .bind(now)
    .bind(now)
    .fetch_one(&mut *conn)
    .await?;
    Ok(created)
}

impl Lifecycle {
    pub async fn create_quote(
        &self,
        quote: NewQuote,
        actor_id: Option<i64>,
    ) -> Result<Quote, LifecycleError> {
        db::bounded(self.timeout, async {
            let now = db::now();
            let mut tx = self.pool.begin().await?;

            let created = insert_quote(&mut tx, &quote, &now).await?;
            insert_event(
                &mut tx,
                event_types::QUOTE_CREATED,
                tables::QUOTES,
                created.id,
                actor_id,
                &json!({ "quote": created }),
            )
            .await?;

            tx.commit().await?;
            info!(quote_id = created.id, actor_id = actor_id, "Quote created");
            Ok(created)
        })
        .await
    }

    /// Apply a patch. `authorize` receives the stored owner and may veto.
    /// An empty patch returns the quote unchanged and records nothing.
    pub async fn update_quote<F>(
        &self,
        id: i64,
        patch: QuotePatch,
        actor_id: Option<i64>,
        authorize: F,
    ) -> Result<Quote, LifecycleError>
    where
        F: FnOnce(Option<i64>) -> bool + Send,
    {
        db::bounded(self.timeout, async {
            let now = db::now();
            let mut tx = self.pool.begin().await?;

            let current = lock_quote(&mut tx, id)
                .await?
                .ok_or(LifecycleError::NotFound("Quote"))?;
            if !authorize(current.owner_id) {
                return Err(LifecycleError::Forbidden);
            }
            if let Some(next) = patch.status {
                if !current.status.can_transition_to(next) {
                    return Err(LifecycleError::InvalidTransition {
                        record: "quote",
                        from: current.status.to_string(),
                        to: next.to_string(),
                    });
                }
            }

            let fields = patch.fields();
            if fields.is_empty() {
                return Ok(current);
            }

            let mut query = QueryBuilder::<Sqlite>::new("UPDATE quotes SET ");
            let mut set = query.separated(", ");
            if let Some(name) = &patch.name {
                set.push("name = ").push_bind_unseparated(name);
            }
            if let Some(email) = &patch.email {
                set.push("email = ").push_bind_unseparated(email);
            }
            if let Some(phone) = &patch.phone {
                set.push("phone = ").push_bind_unseparated(phone);
            }
            if let Some(country_code) = &patch.country_code {
                set.push("country_code = ").push_bind_unseparated(country_code);
            }
            if let Some(product) = &patch.product {
                set.push("product = ").push_bind_unseparated(product);
            }
            if let Some(message) = &patch.message {
                set.push("message = ").push_bind_unseparated(message);
            }
            if let Some(status) = patch.status {
                set.push("status = ").push_bind_unseparated(status);
            }
            if let Some(owner_id) = patch.owner_id {
                set.push("owner_id = ").push_bind_unseparated(owner_id);
            }
            if let Some(value) = patch.estimated_value {
                set.push("estimated_value = ").push_bind_unseparated(value);
            }
            set.push("updated_at = ").push_bind_unseparated(&now);
            query.push(" WHERE id = ").push_bind(id).push(" RETURNING *");

            let updated = query
                .build_query_as::<Quote>()
                .fetch_one(&mut *tx)
                .await?;

            insert_event(
                &mut tx,
                event_types::QUOTE_UPDATED,
                tables::QUOTES,
                id,
                actor_id,
                &field_changes(&current, &updated, &fields),
            )
            .await?;

            tx.commit().await?;
            info!(quote_id = id, actor_id = actor_id, fields = ?fields, "Quote updated");
            Ok(updated)
        })
        .await
    }

    pub async fn delete_quote<F>(
        &self,
        id: i64,
        actor_id: Option<i64>,
        authorize: F,
    ) -> Result<(), LifecycleError>
    where
        F: FnOnce(Option<i64>) -> bool + Send,
    {
        db::bounded(self.timeout, async {
            let mut tx = self.pool.begin().await?;

            let current = lock_quote(&mut tx, id)
                .await?
                .ok_or(LifecycleError::NotFound("Quote"))?;
            if !authorize(current.owner_id) {
                return Err(LifecycleError::Forbidden);
            }

            sqlx::query("DELETE FROM quotes WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            insert_event(
                &mut tx,
                event_types::QUOTE_DELETED,
                tables::QUOTES,
                id,
                actor_id,
                &json!({}),
            )
            .await?;

            tx.commit().await?;
            info!(quote_id = id, actor_id = actor_id, "Quote deleted");
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_user, list_events, NewUser};
    use sqlx::SqlitePool;
    use std::time::Duration;

    async fn setup() -> (SqlitePool, Lifecycle, i64) {
        let pool = db::connect_in_memory().await.unwrap();
        let user = create_user(
            &pool,
            NewUser {
                username: "hana",
                email: None,
                password_hash: "x",
                role: "sales",
                must_change_password: false,
            },
        )
        .await
        .unwrap();
        let lifecycle = Lifecycle::new(pool.clone(), Duration::from_secs(5));
        (pool, lifecycle, user.id)
    }

    fn new_quote(owner_id: Option<i64>) -> NewQuote {
        NewQuote {
            name: "Acme Mills".to_string(),
            email: "buyer@acme.test".to_string(),
            phone: None,
            country_code: Some("+44".to_string()),
            product: Some("Extruder X2".to_string()),
            message: None,
            status: QuoteStatus::Pending,
            owner_id,
            estimated_value: 0.0,
        }
    }

    #[tokio::test]
    async fn test_create_records_event() {
        let (pool, lifecycle, user_id) = setup().await;
        let quote = lifecycle
            .create_quote(new_quote(Some(user_id)), Some(user_id))
            .await
            .unwrap();
        assert_eq!(quote.status, QuoteStatus::Pending);

        let events = list_events(&pool, tables::QUOTES, quote.id).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, event_types::QUOTE_CREATED);
        assert_eq!(events[0].actor_id, Some(user_id));
        assert_eq!(events[0].changes["quote"]["name"], "Acme Mills");
    }

    #[tokio::test]
    async fn test_update_applies_only_present_fields() {
        let (pool, lifecycle, user_id) = setup().await;
        let quote = lifecycle
            .create_quote(new_quote(Some(user_id)), Some(user_id))
            .await
            .unwrap();

        let patch = QuotePatch {
            status: Some(QuoteStatus::Sent),
            estimated_value: Some(1250.0),
            ..QuotePatch::default()
        };
        let updated = lifecycle
            .update_quote(quote.id, patch, Some(user_id), |_| true)
            .await
            .unwrap();
        assert_eq!(updated.status, QuoteStatus::Sent);
        assert_eq!(updated.estimated_value, 1250.0);
        assert_eq!(updated.name, "Acme Mills");
        assert_eq!(updated.product.as_deref(), Some("Extruder X2"));

        let events = list_events(&pool, tables::QUOTES, quote.id).await.unwrap();
        assert_eq!(events[0].event_type, event_types::QUOTE_UPDATED);
        assert_eq!(events[0].changes["status"]["from"], "pending");
        assert_eq!(events[0].changes["status"]["to"], "sent");
        assert!(events[0].changes.get("name").is_none());
    }

    #[tokio::test]
    async fn test_update_rejects_illegal_transition() {
        let (pool, lifecycle, user_id) = setup().await;
        let mut won = new_quote(None);
        won.status = QuoteStatus::Won;
        let quote = lifecycle.create_quote(won, None).await.unwrap();

        let patch = QuotePatch {
            status: Some(QuoteStatus::Pending),
            ..QuotePatch::default()
        };
        let err = lifecycle
            .update_quote(quote.id, patch, Some(user_id), |_| true)
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::InvalidTransition { .. }));

        // Nothing besides the creation was recorded
        let events = list_events(&pool, tables::QUOTES, quote.id).await.unwrap();
        assert_eq!(events.len(), 1);
    }

    #[tokio::test]
    async fn test_guard_sees_stored_owner() {
        let (_pool, lifecycle, user_id) = setup().await;
        let quote = lifecycle
            .create_quote(new_quote(Some(user_id)), Some(user_id))
            .await
            .unwrap();

        let patch = QuotePatch {
            name: Some("Renamed".to_string()),
            ..QuotePatch::default()
        };
        let err = lifecycle
            .update_quote(quote.id, patch, Some(99), |owner| owner == Some(99))
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::Forbidden));

        let err = lifecycle
            .delete_quote(quote.id, Some(99), |owner| owner == Some(99))
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::Forbidden));
    }

    #[tokio::test]
    async fn test_empty_patch_is_noop() {
        let (pool, lifecycle, user_id) = setup().await;
        let quote = lifecycle.create_quote(new_quote(None), None).await.unwrap();
        let same = lifecycle
            .update_quote(quote.id, QuotePatch::default(), Some(user_id), |_| true)
            .await
            .unwrap();
        assert_eq!(same.updated_at, quote.updated_at);
        assert_eq!(list_events(&pool, tables::QUOTES, quote.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_delete_keeps_event_trail() {
        let (pool, lifecycle, user_id) = setup().await;
        let quote = lifecycle.create_quote(new_quote(None), None).await.unwrap();
        lifecycle
            .delete_quote(quote.id, Some(user_id), |_| true)
            .await
            .unwrap();

        assert!(db::get_quote(&pool, quote.id).await.unwrap().is_none());
        let events = list_events(&pool, tables::QUOTES, quote.id).await.unwrap();
        assert_eq!(events[0].event_type, event_types::QUOTE_DELETED);
        assert_eq!(events[0].changes, json!({}));

        let err = lifecycle
            .delete_quote(quote.id, Some(user_id), |_| true)
            .await
            .unwrap_err();
        assert!(matches!(err, LifecycleError::NotFound(_)));
    }
}
