use sea_orm::entity::prelude::*;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "intents")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub title: String,
    pub description: Option<String>,
    pub creator_agent_id: String,
    pub status: String,
    /// Canonical JSON object.
    pub state: String,
    pub version: i64,
    /// JSON array of strings.
    pub constraints: String,
    pub parent_id: Option<String>,
    /// JSON array of intent ids.
    pub depends_on: String,
    pub retry_policy: Option<String>,
    /// Persisted roll-up summary for hierarchy roots.
    pub aggregate: Option<String>,
    /// Last event sequence handed out; the event log for this intent is
    /// exactly `1..=last_event_seq`.
    pub last_event_seq: i64,
    pub created_at: DateTimeUtc,
    pub updated_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
