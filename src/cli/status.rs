use super::config::{config_path_or_default, load_with_env};
use std::sync::Arc;
use surfwatch::identity::UserId;
use surfwatch::persistence::{FileDocumentStore, PreferenceStore, StoreResult};

/// What is stored for one operator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityStatus {
    pub user: UserId,
    pub has_session: bool,
    pub has_template: bool,
}

/// Show stored identities and whether each has a session and a template
pub async fn execute(config_path: Option<String>) -> Result<(), Box<dyn std::error::Error>> {
    let config = load_with_env(&config_path_or_default(config_path))?;

    println!("📊 surfwatch status");
    println!();
    println!("Store: {}", config.storage.path.display());

    let store = FileDocumentStore::open(&config.storage.path).await?;
    let identities = collect(&PreferenceStore::new(Arc::new(store))).await?;

    if identities.is_empty() {
        println!("No operators have logged in yet");
        return Ok(());
    }

    println!();
    println!("{:<16} {:<8} {:<8}", "USER", "SESSION", "TEMPLATE");
    for status in &identities {
        println!(
            "{:<16} {:<8} {:<8}",
            status.user,
            if status.has_session { "yes" } else { "no" },
            if status.has_template { "yes" } else { "no" },
        );
    }
    Ok(())
}

/// Status of every identity with a stored document
pub async fn collect(preferences: &PreferenceStore) -> StoreResult<Vec<IdentityStatus>> {
    let mut statuses = Vec::new();
    for user in preferences.known_users().await? {
        let prefs = preferences.preferences(user).await?;
        statuses.push(IdentityStatus {
            user,
            has_session: prefs.session.is_some_and(|t| !t.is_empty()),
            has_template: prefs.template.is_some_and(|t| !t.is_empty()),
        });
    }
    Ok(statuses)
}
