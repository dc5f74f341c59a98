use anyhow::{Context, Result};
use sea_orm::{
    ActiveModelTrait, ColumnTrait, Condition, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};

use crate::entities::{events, prelude::*};

/// Fields for creating or updating a calendar event.
#[derive(Debug, Clone)]
pub struct EventInput {
    pub title: String,
    pub event_date: String,
    pub event_time: Option<String>,
    pub description: Option<String>,
    pub location: Option<String>,
    pub visibility: String,
}

pub struct EventRepository {
    conn: DatabaseConnection,
}

impl EventRepository {
    #[must_use]
    pub const fn new(conn: DatabaseConnection) -> Self {
        Self { conn }
    }

    /// Events for one month (YYYY-MM): all community events plus the
    /// viewer's own personal events, ordered by date then time.
    pub async fn for_month(&self, month: &str, viewer: &str) -> Result<Vec<events::Model>> {
        Events::find()
            .filter(events::Column::EventDate.like(format!("{month}-%")))
            .filter(
                Condition::any()
                    .add(events::Column::Visibility.eq("community"))
                    .add(
                        Condition::all()
                            .add(events::Column::Visibility.eq("personal"))
                            .add(events::Column::CreatedBy.eq(viewer)),
                    ),
            )
            .order_by_asc(events::Column::EventDate)
            .order_by_asc(events::Column::EventTime)
            .all(&self.conn)
            .await
            .context("Failed to query events for month")
    }

    pub async fn get(&self, id: i32) -> Result<Option<events::Model>> {
        Events::find_by_id(id)
            .one(&self.conn)
            .await
            .context("Failed to query event")
    }

    pub async fn create(&self, created_by: &str, input: EventInput) -> Result<events::Model> {
        let now = chrono::Utc::now().to_rfc3339();

        let event = events::ActiveModel {
            title: Set(input.title),
            event_date: Set(input.event_date),
            event_time: Set(input.event_time),
            description: Set(input.description),
            location: Set(input.location),
            visibility: Set(input.visibility),
            created_by: Set(created_by.to_string()),
            created_at: Set(now.clone()),
            updated_at: Set(now),
            ..Default::default()
        }
        .insert(&self.conn)
        .await
        .context("Failed to insert event")?;

        Ok(event)
    }

    pub async fn update(&self, id: i32, input: EventInput) -> Result<Option<events::Model>> {
        let event = Events::find_by_id(id)
            .one(&self.conn)
            .await
            .context("Failed to query event for update")?;

        let Some(event) = event else {
            return Ok(None);
        };

        let mut active: events::ActiveModel = event.into();
        active.title = Set(input.title);
        active.event_date = Set(input.event_date);
        active.event_time = Set(input.event_time);
        active.description = Set(input.description);
        active.location = Set(input.location);
        active.visibility = Set(input.visibility);
        active.updated_at = Set(chrono::Utc::now().to_rfc3339());

        let updated = active.update(&self.conn).await?;
        Ok(Some(updated))
    }

    pub async fn delete(&self, id: i32) -> Result<bool> {
        let result = Events::delete_by_id(id)
            .exec(&self.conn)
            .await
            .context("Failed to delete event")?;

        Ok(result.rows_affected > 0)
    }

    /// List every event, for admin export
    pub async fn list_all(&self) -> Result<Vec<events::Model>> {
        Events::find()
            .order_by_asc(events::Column::Id)
            .all(&self.conn)
            .await
            .context("Failed to list events")
    }

    /// Replace or merge events from an admin import, in one transaction
    pub async fn import(&self, imported: Vec<events::Model>, replace: bool) -> Result<u64> {
        let txn = self.conn.begin().await?;

        if replace {
            Events::delete_many().exec(&txn).await?;
        }

        let mut inserted = 0u64;
        for model in imported {
            let now = chrono::Utc::now().to_rfc3339();
            events::ActiveModel {
                title: Set(model.title),
                event_date: Set(model.event_date),
                event_time: Set(model.event_time),
                description: Set(model.description),
                location: Set(model.location),
                visibility: Set(model.visibility),
                created_by: Set(model.created_by),
                created_at: Set(if model.created_at.is_empty() {
                    now.clone()
                } else {
                    model.created_at
                }),
                updated_at: Set(now),
                ..Default::default()
            }
            .insert(&txn)
            .await?;
            inserted += 1;
        }

        txn.commit().await?;
        Ok(inserted)
    }
}
