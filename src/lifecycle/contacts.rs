use serde::Serialize;
use serde_json::json;
use sqlx::{QueryBuilder, Sqlite, SqliteConnection};
use tracing::info;

use super::quotes::insert_quote;
use super::{
    field_changes, ContactStatus, Lifecycle, LifecycleError, NewQuote, QuoteStatus,
    DEFAULT_PRODUCT,
};
use crate::db::{self, event_types, insert_event, tables, Contact, Quote};

#[derive(Debug, Clone)]
pub struct NewContact {
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub country_code: Option<String>,
    pub subject: Option<String>,
    pub message: Option<String>,
    pub owner_id: Option<i64>,
}

#[derive(Debug, Clone, Default)]
pub struct ContactPatch {
    pub name: Option<String>,
    pub email: Option<String>,
    pub phone: Option<String>,
    pub country_code: Option<String>,
    pub subject: Option<String>,
    pub message: Option<String>,
    pub status: Option<ContactStatus>,
    pub owner_id: Option<i64>,
}

impl ContactPatch {
    pub fn is_empty(&self) -> bool {
        self.fields().is_empty()
    }

    fn fields(&self) -> Vec<&'static str> {
        [
            ("name", self.name.is_some()),
            ("email", self.email.is_some()),
            ("phone", self.phone.is_some()),
            ("country_code", self.country_code.is_some()),
            ("subject", self.subject.is_some()),
            ("message", self.message.is_some()),
            ("status", self.status.is_some()),
            ("owner_id", self.owner_id.is_some()),
        ]
        .into_iter()
        .filter_map(|(field, present)| present.then_some(field))
        .collect()
    }
}

/// Result of converting a contact: the new quote and the updated contact
#[derive(Debug, Clone, Serialize)]
pub struct Conversion {
    pub quote: Quote,
    pub contact: Contact,
}

async fn lock_contact(
    conn: &mut SqliteConnection,
    id: i64,
) -> Result<Option<Contact>, LifecycleError> {
    let contact = sqlx::query_as::<_, Contact>(
        "UPDATE contacts SET updated_at = updated_at WHERE id = ? RETURNING *",
    )
    .bind(id)
    .fetch_optional(&mut *conn)
    .await?;
    Ok(contact)
}

impl Lifecycle {
    pub async fn create_contact(
        &self,
        contact: NewContact,
        actor_id: Option<i64>,
    ) -> Result<Contact, LifecycleError> {
        db::bounded(self.timeout, async {
            let now = db::now();
            let mut tx = self.pool.begin().await?;

            let created = sqlx::query_as::<_, Contact>(
                r#"
                INSERT INTO contacts (name, email, phone, country_code, subject, message, status, owner_id, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                RETURNING *
                "#,
            )
            .bind(&contact.name)
            .bind(&contact.email)
            .bind(&contact.phone)
            .bind(&contact.country_code)
            .bind(&contact.subject)
            .bind(&contact.message)
            .bind(ContactStatus::New)
            .bind(contact.owner_id)
            .bind(&now)
            .bind(&now)
            .fetch_one(&mut *tx)
            .await?;

            insert_event(
                &mut tx,
                event_types::CONTACT_CREATED,
                tables::CONTACTS,
                created.id,
                actor_id,
                &json!({ "contact": created }),
            )
            .await?;

            tx.commit().await?;
            info!(contact_id = created.id, actor_id = actor_id, "Contact created");
            Ok(created)
        })
        .await
    }

    /// Same contract as `update_quote`. Setting `converted` directly is a
    /// transition error; only `convert_contact` enters that state.
    pub async fn update_contact<F>(
        &self,
        id: i64,
        patch: ContactPatch,
        actor_id: Option<i64>,
        authorize: F,
    ) -> Result<Contact, LifecycleError>
    where
        F: FnOnce(Option<i64>) -> bool + Send,
    {
        db::bounded(self.timeout, async {
            let mut tx = self.pool.begin().await?;

            let current = lock_contact(&mut tx, id)
                .await?
                .ok_or(LifecycleError::NotFound("Contact"))?;
            if !authorize(current.owner_id) {
                return Err(LifecycleError::Forbidden);
            }
            if let Some(next) = patch.status {
                if !current.status.can_transition_to(next) {
                    return Err(LifecycleError::InvalidTransition {
                        record: "contact",
                        from: current.status.to_string(),
                        to: next.to_string(),
                    });
                }
            }

            let fields = patch.fields();
            if fields.is_empty() {
                return Ok(current);
            }

            let now = db::now();
            let mut query = QueryBuilder::<Sqlite>::new("UPDATE contacts SET ");
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
            if let Some(subject) = &patch.subject {
                set.push("subject = ").push_bind_unseparated(subject);
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
            set.push("updated_at = ").push_bind_unseparated(&now);
            query.push(" WHERE id = ").push_bind(id).push(" RETURNING *");

            let updated = query
                .build_query_as::<Contact>()
                .fetch_one(&mut *tx)
                .await?;

            insert_event(
                &mut tx,
                event_types::CONTACT_UPDATED,
                tables::CONTACTS,
                id,
                actor_id,
                &field_changes(&current, &updated, &fields),
            )
            .await?;

            tx.commit().await?;
            info!(contact_id = id, actor_id = actor_id, fields = ?fields, "Contact updated");
            Ok(updated)
        })
        .await
    }

    pub async fn delete_contact<F>(
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

            let current = lock_contact(&mut tx, id)
                .await?
                .ok_or(LifecycleError::NotFound("Contact"))?;
            if !authorize(current.owner_id) {
                return Err(LifecycleError::Forbidden);
            }

            sqlx::query("DELETE FROM contacts WHERE id = ?")
                .bind(id)
                .execute(&mut *tx)
                .await?;
            insert_event(
                &mut tx,
                event_types::CONTACT_DELETED,
                tables::CONTACTS,
                id,
                actor_id,
                &json!({}),
            )
            .await?;

            tx.commit().await?;
            info!(contact_id = id, actor_id = actor_id, "Contact deleted");
            Ok(())
        })
        .await
    }

    /// Turn a contact into a pending quote owned by the converting user.
    ///
    /// Quote insert, contact update and both events commit together. A
    /// contact that already points at a quote is rejected with
    /// `AlreadyConverted` and nothing is written.
    pub async fn convert_contact<F>(
        &self,
        id: i64,
        actor_id: i64,
        authorize: F,
    ) -> Result<Conversion, LifecycleError>
    where
        F: FnOnce(Option<i64>) -> bool + Send,
    {
        db::bounded(self.timeout, async {
            let now = db::now();
            let mut tx = self.pool.begin().await?;

            let contact = lock_contact(&mut tx, id)
                .await?
                .ok_or(LifecycleError::NotFound("Contact"))?;
            if !authorize(contact.owner_id) {
                return Err(LifecycleError::Forbidden);
            }
            if contact.is_converted() {
                return Err(LifecycleError::AlreadyConverted {
                    contact_id: id,
                    quote_id: contact.converted_to_quote_id,
                });
            }

            let quote = insert_quote(
                &mut tx,
                &NewQuote {
                    name: contact.name.clone(),
                    email: contact.email.clone(),
                    phone: contact.phone.clone(),
                    country_code: contact.country_code.clone(),
                    product: Some(
                        contact
                            .subject
                            .clone()
                            .filter(|s| !s.trim().is_empty())
                            .unwrap_or_else(|| DEFAULT_PRODUCT.to_string()),
                    ),
                    message: contact.message.clone(),
                    status: QuoteStatus::Pending,
                    owner_id: Some(actor_id),
                    estimated_value: 0.0,
                },
                &now,
            )
            .await?;

            let contact = sqlx::query_as::<_, Contact>(
                r#"
                UPDATE contacts
                SET converted_to_quote_id = ?, status = ?, updated_at = ?
                WHERE id = ? AND converted_to_quote_id IS NULL
                RETURNING *
                "#,
            )
            .bind(quote.id)
            .bind(ContactStatus::Converted)
            .bind(&now)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or(LifecycleError::AlreadyConverted {
                contact_id: id,
                quote_id: None,
            })?;

            insert_event(
                &mut tx,
                event_types::CONTACT_CONVERTED,
                tables::CONTACTS,
                id,
                Some(actor_id),
                &json!({ "to_quote_id": quote.id }),
            )
            .await?;
            insert_event(
                &mut tx,
                event_types::QUOTE_CREATED_FROM_CONTACT,
                tables::QUOTES,
                quote.id,
                Some(actor_id),
                &json!({ "from_contact_id": id }),
            )
            .await?;

            tx.commit().await?;
            info!(
                contact_id = id,
                quote_id = quote.id,
                actor_id = actor_id,
                "Contact converted to quote"
            );
            Ok(Conversion { quote, contact })
        })
        .await
    }
}
