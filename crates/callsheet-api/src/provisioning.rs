//! Account provisioning.
//!
//! Creating an account also gives its owner a private copy of the demo
//! project. The demo clone is best-effort: its failure is logged and the
//! account is still created.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use callsheet_clone::CloneError;
use callsheet_core::{defaults::ACCOUNT_COLLECTION, NewDocument};

use crate::error::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct CreateAccountRequest {
    pub owner_id: Uuid,
    pub owner_namespace: Uuid,
    pub display_name: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct CreateAccountResponse {
    pub account_id: Uuid,
    /// Root of the owner's demo project, when one exists.
    pub demo_project_id: Option<Uuid>,
}

pub async fn provision_account(
    state: &AppState,
    req: CreateAccountRequest,
) -> Result<CreateAccountResponse, ApiError> {
    let display_name = req.display_name.trim();
    if display_name.is_empty() {
        return Err(ApiError::BadRequest("display_name must not be empty".into()));
    }

    let data = json!({
        "owner_id": req.owner_id.to_string(),
        "display_name": display_name,
        "created_at": Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
    });
    let account_id = state
        .documents
        .create_document(
            ACCOUNT_COLLECTION,
            NewDocument::new(
                Some(req.owner_namespace),
                data.as_object().cloned().unwrap_or_default(),
            ),
        )
        .await?;

    info!(
        subsystem = "api",
        component = "provisioning",
        op = "create_account",
        account_id = %account_id,
        owner_id = %req.owner_id,
        "Account created"
    );

    let demo_project_id = match state
        .orchestrator
        .clone_template_for(req.owner_id, req.owner_namespace)
        .await
    {
        Ok(outcome) => Some(outcome.new_root_id),
        Err(CloneError::DuplicateExists {
            existing_root_id, ..
        }) => Some(existing_root_id),
        Err(e) => {
            // The orchestrator already reported the failure in detail.
            warn!(
                subsystem = "api",
                component = "provisioning",
                op = "demo_clone",
                account_id = %account_id,
                owner_id = %req.owner_id,
                error_kind = e.kind(),
                "Continuing without demo project"
            );
            None
        }
    };

    Ok(CreateAccountResponse {
        account_id,
        demo_project_id,
    })
}
