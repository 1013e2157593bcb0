//! Boot-time reconciliation of stale durable live flags
//!
//! The job registry is in-memory only, so any owner settings row still
//! flagged `is_running` at process start belongs to a supervisor that
//! no longer exists. Those flags are force-cleared before the API comes
//! up; this is a silent correction, not a user-facing error.

use crate::db::SettingsStore;
use crate::error::SupervisorError;
use tracing::info;

/// Clear every stale `is_running` flag, returning how many were found.
pub async fn recover_stale_live_flags(
    store: &dyn SettingsStore,
) -> Result<u32, SupervisorError> {
    let owners = store.owners_with_running_flag().await?;
    for owner_id in &owners {
        info!(
            owner_id,
            "clearing stale live flag left over from previous run"
        );
        store.set_live_flag(*owner_id, false, None).await?;
    }
    Ok(owners.len() as u32)
}
