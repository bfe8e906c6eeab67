use crate::db::models::Identity;
use crate::services::{DeviceDirectory, IdentityStore};
use anyhow::Result;
use log::info;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Outcome of resolving a subscription request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Authorization {
    /// Devices the identity may subscribe to, in request order
    pub granted: Vec<String>,
    /// Requested devices that were left out
    pub dropped: Vec<String>,
}

/// Resolve `requested` against the identity and the currently enabled devices.
///
/// An empty request resolves to every enabled device the identity covers,
/// sorted. Unknown, disabled and unauthorized devices all end up in `dropped`.
pub fn authorize_against(
    identity: &Identity,
    requested: &[String],
    enabled: &BTreeSet<String>,
) -> Authorization {
    if requested.is_empty() {
        return Authorization {
            granted: enabled
                .iter()
                .filter(|serial| identity.covers(serial))
                .cloned()
                .collect(),
            dropped: Vec::new(),
        };
    }

    let mut seen = BTreeSet::new();
    let mut authorization = Authorization::default();

    for serial in requested {
        if !seen.insert(serial.as_str()) {
            continue;
        }

        if enabled.contains(serial) && identity.covers(serial) {
            authorization.granted.push(serial.clone());
        } else {
            authorization.dropped.push(serial.clone());
        }
    }

    authorization
}

/// Resolves subscription requests against the live device directory and
/// the current state of the requesting account
#[derive(Clone)]
pub struct SubscriptionAuthorizer {
    directory: Arc<dyn DeviceDirectory>,
    identities: Arc<dyn IdentityStore>,
}

impl SubscriptionAuthorizer {
    pub fn new(directory: Arc<dyn DeviceDirectory>, identities: Arc<dyn IdentityStore>) -> Self {
        Self {
            directory,
            identities,
        }
    }

    /// Reload the identity from the store; `None` once the account is gone
    /// or disabled
    pub async fn refresh(&self, identity: &Identity) -> Result<Option<Identity>> {
        match self.identities.identity(&identity.user_id).await? {
            Some(current) if current.active => Ok(Some(current)),
            _ => {
                info!("Account {} is no longer active", identity.username);
                Ok(None)
            }
        }
    }

    /// Authorize against the enabled set as of now; nothing is cached
    pub async fn authorize(&self, identity: &Identity, requested: &[String]) -> Result<Authorization> {
        let enabled = self.directory.enabled_devices().await?;
        Ok(authorize_against(identity, requested, &enabled))
    }

    /// Whether the account, as stored right now, may use a single device
    /// (exists, enabled, covered)
    pub async fn can_access(&self, identity: &Identity, serial: &str) -> Result<bool> {
        let Some(identity) = self.refresh(identity).await? else {
            return Ok(false);
        };
        let device = self.directory.device(serial).await?;
        Ok(device.map_or(false, |d| d.enabled && identity.covers(serial)))
    }
}
