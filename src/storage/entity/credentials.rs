use sea_orm::entity::prelude::*;

/// Access-restricted namespace: only the grant administration path writes
/// here and only the tool broker reads `secret` back.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "credentials")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub auth_type: String,
    /// Non-secret JSON execution config.
    pub metadata: String,
    /// Sealed secret document; see `storage::vault`.
    pub secret: String,
    pub created_at: DateTimeUtc,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
