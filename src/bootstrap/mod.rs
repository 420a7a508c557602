//! Startup reconciliation of declarative job mappings.
//!
//! The config file may declare job mappings; on startup they are
//! reconciled into the store. Stored credentials win over config
//! credentials: a token obtained through the code-exchange flow (and
//! its refresh capability) is never overwritten from config.

use std::sync::Arc;

use tracing::{error, info};

use crate::config::BootstrapAccount;
use crate::database::models::job::PLACEHOLDER_ACCESS_TOKEN;
use crate::database::models::JobDbModel;
use crate::database::repositories::JobRepository;
use crate::manager::JobManager;

/// Reconcile the declarative account list into the store.
///
/// Failures on individual entries are logged and skipped; bootstrap
/// never aborts startup.
pub async fn bootstrap_jobs(
    accounts: &[BootstrapAccount],
    manager: &JobManager,
    jobs: &Arc<dyn JobRepository>,
) {
    if accounts.is_empty() {
        return;
    }

    for account in accounts {
        if account.source_channel_id.is_empty() || account.sink_account_id.is_empty() {
            error!(
                ?account,
                "Skipping invalid bootstrap mapping (missing source_channel_id or sink_account_id)"
            );
            continue;
        }

        let existing = match lookup_existing(jobs, account).await {
            Ok(existing) => existing,
            Err(e) => {
                error!(
                    channel = %account.source_channel_id,
                    error = %e,
                    "Bootstrap lookup failed"
                );
                continue;
            }
        };

        match existing {
            None => create_mapping(account, manager).await,
            Some(existing) => reconcile_mapping(account, &existing, manager).await,
        }
    }
}

async fn lookup_existing(
    jobs: &Arc<dyn JobRepository>,
    account: &BootstrapAccount,
) -> crate::Result<Option<JobDbModel>> {
    if let Some(job) = jobs.get_job_by_sink(&account.sink_account_id).await? {
        return Ok(Some(job));
    }
    jobs.get_job_by_source(&account.source_channel_id).await
}

async fn create_mapping(account: &BootstrapAccount, manager: &JobManager) {
    // A token is optional in config; without one a placeholder is
    // stored and the credential manager demands re-authorization on
    // first publish.
    let token = match account.sink_access_token.as_deref().filter(|t| !t.is_empty()) {
        Some(token) => token.to_string(),
        None => {
            info!(
                channel = %account.source_channel_id,
                "Creating mapping without a token; set one via the exchange-code endpoint"
            );
            PLACEHOLDER_ACCESS_TOKEN.to_string()
        }
    };

    let created = match manager
        .create_mapping(&account.source_channel_id, &account.sink_account_id, &token)
        .await
    {
        Ok(created) => created,
        Err(e) => {
            error!(
                channel = %account.source_channel_id,
                error = %e,
                "Failed to bootstrap mapping"
            );
            return;
        }
    };

    info!(
        channel = %account.source_channel_id,
        sink_account = %account.sink_account_id,
        "Bootstrapped mapping"
    );

    if account.is_active == Some(false) {
        if let Err(e) = manager.set_active(&created.id, false).await {
            error!(job_id = %created.id, error = %e, "Failed to deactivate bootstrapped mapping");
        }
    }
}

async fn reconcile_mapping(
    account: &BootstrapAccount,
    existing: &JobDbModel,
    manager: &JobManager,
) {
    let mut source_update = "";
    let mut sink_update = "";
    let mut token_update = "";
    let mut active_update = None;

    if account.source_channel_id != existing.source_channel_id {
        source_update = account.source_channel_id.as_str();
    }
    if account.sink_account_id != existing.sink_account_id {
        sink_update = account.sink_account_id.as_str();
    }

    if let Some(config_token) = account.sink_access_token.as_deref().filter(|t| !t.is_empty()) {
        if config_token != existing.sink_access_token {
            if !existing.has_configured_token() {
                // Nothing usable stored; take the config token.
                token_update = config_token;
            } else if existing.has_refresh_token() {
                info!(
                    job_id = %existing.id,
                    "Stored token has refresh capability; keeping it over the config token"
                );
            } else {
                info!(
                    job_id = %existing.id,
                    "Stored token differs from config; use the exchange-code endpoint to \
                     obtain a refreshable token instead"
                );
            }
        }
    }

    if let Some(active) = account.is_active {
        if existing.active() != active {
            active_update = Some(active);
        }
    }

    let needs_update = !source_update.is_empty()
        || !sink_update.is_empty()
        || !token_update.is_empty()
        || active_update.is_some();
    if !needs_update {
        return;
    }

    match manager
        .update_mapping(
            &existing.id,
            source_update,
            sink_update,
            token_update,
            active_update,
        )
        .await
    {
        Ok(_) => {
            info!(
                channel = %existing.source_channel_id,
                sink_account = %existing.sink_account_id,
                "Updated bootstrapped mapping"
            );
        }
        Err(e) => {
            error!(
                channel = %existing.source_channel_id,
                error = %e,
                "Failed to update bootstrapped mapping"
            );
        }
    }
}
