use anyhow::{Context, Result};
use keyring::Entry;

const SERVICE_NAME: &str = "menucache-sage";

/// Sage account passwords kept in the OS keychain, keyed by login email.
pub struct CredentialStore;

impl CredentialStore {
    /// Store a password for `email` in the OS keychain
    pub fn store(email: &str, password: &str) -> Result<()> {
        let entry = Entry::new(SERVICE_NAME, email).context("Failed to create keyring entry")?;
        entry
            .set_password(password)
            .context("Failed to store password in keychain")?;
        Ok(())
    }

    pub fn get_password(email: &str) -> Result<String> {
        let entry = Entry::new(SERVICE_NAME, email).context("Failed to create keyring entry")?;
        entry
            .get_password()
            .context("Failed to retrieve password from keychain")
    }
}
