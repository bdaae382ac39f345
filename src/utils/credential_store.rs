use keyring::Entry;
use tracing::debug;

use crate::error::{WorkbenchError, WorkbenchResult};

const SERVICE_NAME: &str = "space_workbench";
/// Namespace used by the desktop query tool; entries are migrated on read.
const LEGACY_SERVICE_NAME: &str = "space_query";

fn keyring_error(context: &str, err: keyring::Error) -> WorkbenchError {
    WorkbenchError::Credential(format!("{context}: {err}"))
}

fn entry_in(service_name: &str, profile_name: &str) -> WorkbenchResult<Entry> {
    Entry::new(service_name, profile_name).map_err(|e| keyring_error("Keyring error", e))
}

/// Store the password for a connection profile in the OS keyring.
pub fn store_password(profile_name: &str, password: &str) -> WorkbenchResult<()> {
    entry_in(SERVICE_NAME, profile_name)?
        .set_password(password)
        .map_err(|e| keyring_error("Failed to store password in keyring", e))?;
    debug!("Stored password for profile {profile_name}");
    Ok(())
}

/// Look up the password for a profile. `Ok(None)` when nothing is stored.
pub fn get_password(profile_name: &str) -> WorkbenchResult<Option<String>> {
    let entry = entry_in(SERVICE_NAME, profile_name)?;
    match entry.get_password() {
        Ok(password) => Ok(Some(password)),
        Err(keyring::Error::NoEntry) => migrate_legacy(&entry, profile_name),
        Err(e) => Err(keyring_error("Failed to retrieve password from keyring", e)),
    }
}

fn migrate_legacy(entry: &Entry, profile_name: &str) -> WorkbenchResult<Option<String>> {
    let legacy = entry_in(LEGACY_SERVICE_NAME, profile_name)?;
    match legacy.get_password() {
        Ok(password) => {
            if entry.set_password(&password).is_ok() {
                let _ = legacy.delete_credential();
                debug!("Migrated legacy keyring entry for profile {profile_name}");
            }
            Ok(Some(password))
        }
        Err(keyring::Error::NoEntry) => Ok(None),
        Err(e) => Err(keyring_error("Failed to retrieve password from keyring", e)),
    }
}

/// Remove the stored password for a profile. Absent entries are not an error.
pub fn delete_password(profile_name: &str) -> WorkbenchResult<()> {
    for service in [SERVICE_NAME, LEGACY_SERVICE_NAME] {
        match entry_in(service, profile_name)?.delete_credential() {
            Ok(()) | Err(keyring::Error::NoEntry) => {}
            Err(e) => return Err(keyring_error("Failed to delete password from keyring", e)),
        }
    }
    Ok(())
}
