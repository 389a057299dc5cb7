//! Owner membership for clone roots.

use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use serde_json::Value as JsonValue;
use tracing::info;
use uuid::Uuid;

use callsheet_core::{
    defaults::MEMBERSHIP_COLLECTION, Document, DocumentStore, Fields, NewDocument,
    FIELD_CREATED_AT, FIELD_ROLE, FIELD_USER_ID, ROLE_OWNER,
};

use crate::error::{CloneError, Result};

/// Grants the owner role on a clone root.
#[derive(Clone)]
pub struct MembershipProvisioner {
    store: Arc<dyn DocumentStore>,
}

impl MembershipProvisioner {
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// Create the owner membership of `new_root_id` for `owner_id`.
    ///
    /// Returns the membership document id. An existing owner membership for
    /// the same user is returned instead of writing a second one, so the call
    /// can be repeated to repair an orphaned root.
    pub async fn provision_owner(&self, new_root_id: Uuid, owner_id: Uuid) -> Result<Uuid> {
        let failed = |source: callsheet_core::Error| CloneError::MembershipProvisioningFailure {
            new_root_id,
            source,
        };

        if let Some(existing) = self
            .owner_membership(new_root_id, owner_id)
            .await
            .map_err(failed)?
        {
            return Ok(existing);
        }

        let mut data = Fields::new();
        data.insert(FIELD_USER_ID.to_string(), JsonValue::String(owner_id.to_string()));
        data.insert(FIELD_ROLE.to_string(), JsonValue::String(ROLE_OWNER.to_string()));
        data.insert(
            FIELD_CREATED_AT.to_string(),
            JsonValue::String(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)),
        );

        let membership_id = self
            .store
            .create_document(MEMBERSHIP_COLLECTION, NewDocument::new(Some(new_root_id), data))
            .await
            .map_err(failed)?;

        info!(
            subsystem = "clone",
            component = "membership",
            op = "provision_owner",
            new_root_id = %new_root_id,
            owner_id = %owner_id,
            "Owner membership provisioned"
        );
        Ok(membership_id)
    }

    /// Id of the owner membership `owner_id` holds on `root_id`, if any.
    pub async fn owner_membership(
        &self,
        root_id: Uuid,
        owner_id: Uuid,
    ) -> callsheet_core::Result<Option<Uuid>> {
        let members = self
            .store
            .read_by_parent(MEMBERSHIP_COLLECTION, root_id)
            .await?;
        Ok(members
            .iter()
            .find(|m| is_owner(m, owner_id))
            .map(|m| m.id))
    }
}

fn is_owner(member: &Document, owner_id: Uuid) -> bool {
    member.uuid_field(FIELD_USER_ID) == Some(owner_id)
        && member.field(FIELD_ROLE).and_then(JsonValue::as_str) == Some(ROLE_OWNER)
}
