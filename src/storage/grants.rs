//! Access-restricted namespaces for tool grants and credentials.
//!
//! Secrets go in sealed (`storage::vault`) and only come back out through
//! [`Store::credential_secret`], which the tool broker alone calls at
//! execution time.

use sea_orm::ActiveValue::Set;
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, QueryFilter};
use serde_json::Value;
use uuid::Uuid;

use crate::errors::CoreError;
use crate::model::{Credential, GrantConstraints, ToolGrant};
use crate::storage::entity::{credentials, grants};
use crate::storage::{Store, from_json, parse_uuid, to_json};

fn grant_from_row(row: grants::Model) -> Result<ToolGrant, CoreError> {
    Ok(ToolGrant {
        id: parse_uuid(&row.id)?,
        agent_id: row.agent_id,
        tool_name: row.tool_name,
        credential_id: parse_uuid(&row.credential_id)?,
        constraints: row
            .constraints
            .as_deref()
            .map(from_json::<GrantConstraints>)
            .transpose()?,
        expires_at: row.expires_at,
        created_at: row.created_at,
    })
}

impl Store {
    /// Store a credential; the secret document is sealed before it touches
    /// the table.
    pub async fn put_credential(
        &self,
        credential: &Credential,
        secret: &Value,
    ) -> Result<(), CoreError> {
        let sealed = self.vault().seal(secret)?;
        credentials::ActiveModel {
            id: Set(credential.id.to_string()),
            auth_type: Set(credential.auth_type.as_str().to_string()),
            metadata: Set(to_json(&credential.metadata)?),
            secret: Set(sealed),
            created_at: Set(credential.created_at),
        }
        .insert(self.db())
        .await?;
        Ok(())
    }

    /// Non-secret half of a credential.
    pub async fn credential(&self, id: Uuid) -> Result<Credential, CoreError> {
        let row = credentials::Entity::find_by_id(id.to_string())
            .one(self.db())
            .await?
            .ok_or_else(|| CoreError::not_found(format!("credential {id}")))?;
        Ok(Credential {
            id: parse_uuid(&row.id)?,
            auth_type: row
                .auth_type
                .parse()
                .map_err(|e: String| CoreError::internal(e))?,
            metadata: from_json(&row.metadata)?,
            created_at: row.created_at,
        })
    }

    /// Unsealed secret document. Broker-only.
    pub async fn credential_secret(&self, id: Uuid) -> Result<Value, CoreError> {
        let row = credentials::Entity::find_by_id(id.to_string())
            .one(self.db())
            .await?
            .ok_or_else(|| CoreError::not_found(format!("credential {id}")))?;
        self.vault().open(&row.secret)
    }

    pub async fn put_grant(&self, grant: &ToolGrant) -> Result<(), CoreError> {
        grants::ActiveModel {
            id: Set(grant.id.to_string()),
            agent_id: Set(grant.agent_id.clone()),
            tool_name: Set(grant.tool_name.clone()),
            credential_id: Set(grant.credential_id.to_string()),
            constraints: Set(grant.constraints.as_ref().map(to_json).transpose()?),
            expires_at: Set(grant.expires_at),
            created_at: Set(grant.created_at),
        }
        .insert(self.db())
        .await?;
        Ok(())
    }

    pub async fn find_grant(
        &self,
        agent_id: &str,
        tool_name: &str,
    ) -> Result<Option<ToolGrant>, CoreError> {
        let row = grants::Entity::find()
            .filter(grants::Column::AgentId.eq(agent_id))
            .filter(grants::Column::ToolName.eq(tool_name))
            .one(self.db())
            .await?;
        row.map(grant_from_row).transpose()
    }
}
