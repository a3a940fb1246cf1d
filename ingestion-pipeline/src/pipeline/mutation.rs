use common::{error::AppError, storage::store::ContentStore};
use tracing::{debug, error, warn};

const TEMP_SUFFIX: &str = ".tmp";
const BACKUP_SUFFIX: &str = ".bak";

/// Replaces the content at `location`, optionally moving it to `new_location` afterwards.
///
/// The new content is staged next to the original and swapped in by renames, with the
/// original parked as a backup. Until the final rename completes a failure restores the
/// backup, so either the old or the complete new content sits at `location`.
pub async fn atomic_update(
    store: &dyn ContentStore,
    location: &str,
    content: &str,
    new_location: Option<&str>,
) -> Result<(), AppError> {
    let temp = format!("{location}{TEMP_SUFFIX}");
    let backup = format!("{location}{BACKUP_SUFFIX}");

    if let Err(err) = swap_in(store, location, &temp, &backup, content, new_location).await {
        restore(store, location, &temp, &backup).await;
        return Err(AppError::StoreMutation {
            path: location.to_string(),
            message: err.to_string(),
        });
    }

    if let Err(err) = store.delete(&backup).await {
        warn!(backup = %backup, error = %err, "update committed but the backup could not be removed");
    }

    debug!(location, new_location, "record updated atomically");
    Ok(())
}

async fn swap_in(
    store: &dyn ContentStore,
    location: &str,
    temp: &str,
    backup: &str,
    content: &str,
    new_location: Option<&str>,
) -> Result<(), AppError> {
    store.write(temp, content).await?;
    store.rename(location, backup).await?;
    store.rename(temp, location).await?;
    if let Some(target) = new_location.filter(|target| *target != location) {
        store.rename(location, target).await?;
    }
    Ok(())
}

async fn restore(store: &dyn ContentStore, location: &str, temp: &str, backup: &str) {
    match store.exists(backup).await {
        Ok(true) => {
            if let Err(err) = store.rename(backup, location).await {
                error!(backup = %backup, error = %err, "failed to restore record from backup");
            }
        }
        Ok(false) => {}
        Err(err) => error!(backup = %backup, error = %err, "could not check for a backup"),
    }

    if let Err(err) = store.delete(temp).await {
        debug!(temp = %temp, error = %err, "staged content could not be removed");
    }
}
