//! Registration and push coordination
//!
//! The [`RegistrationCoordinator`] reconciles per-account contact parameters
//! with the current push token, and turns registration state changes into
//! user notices and a service status.
//!
//! Reconciliation is computed as a [`ReconcilePlan`]: the list of accounts
//! whose contact parameters actually change, plus a single flag telling the
//! caller to issue one coalesced `refresh_registers`. The engine context
//! executes the plan through the engine proxy.
//!
//! # Failure notices
//!
//! Registration failures only reach the user for accounts that were
//! provisioned recently (remote provisioning succeeded or the user just set the
//! account up). `Unauthorized` and `IoError` each surface one notice per
//! account until that account registers successfully again; every other
//! failure is logged.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{AccountConfig, PushConfig, SoftphoneConfig};
use crate::events::{ServiceStatus, UserNotice};

/// Account identifier
pub type AccountId = String;

/// Registration phase reported by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RegistrationPhase {
    None,
    Progress,
    Ok,
    Failed,
    Cleared,
}

/// Failure class attached to a `Failed` registration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RegistrationErrorKind {
    Unauthorized,
    IoError,
    Other,
}

/// Last known registration state of one account
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistrationState {
    pub account_id: AccountId,
    pub phase: RegistrationPhase,
    pub last_error: Option<RegistrationErrorKind>,
}

/// New contact parameters for one account (`None` clears them)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactUpdate {
    pub account_id: AccountId,
    pub params: Option<String>,
}

/// Result of one reconciliation pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcilePlan {
    pub updates: Vec<ContactUpdate>,
    /// Issue one `refresh_registers` after applying the updates
    pub refresh: bool,
}

/// What a registration state change asks the notifier to show
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RegistrationOutcome {
    pub notice: Option<UserNotice>,
    pub status: Option<ServiceStatus>,
}

/// Build the push contact parameters for an account
pub fn contact_parameters(app_id: &str, push_type: &str, token: &str) -> String {
    format!("app-id={app_id};pn-type={push_type};pn-tok={token};pn-silent=1")
}

/// Registration/push state owned by the engine context
#[derive(Debug)]
pub struct RegistrationCoordinator {
    push: PushConfig,
    accounts: Vec<AccountConfig>,
    default_account: Option<AccountId>,
    token: Option<String>,
    applied: HashMap<AccountId, String>,
    states: HashMap<AccountId, RegistrationState>,
    recently_provisioned: HashSet<AccountId>,
    notified: HashSet<(AccountId, RegistrationErrorKind)>,
    last_status: Option<ServiceStatus>,
}

impl RegistrationCoordinator {
    /// Engine accounts are assumed to start without push parameters
    pub fn new(config: &SoftphoneConfig) -> Self {
        Self {
            push: config.push.clone(),
            accounts: config.accounts.clone(),
            default_account: config.default_account_id().map(str::to_string),
            token: None,
            applied: HashMap::new(),
            states: HashMap::new(),
            recently_provisioned: HashSet::new(),
            notified: HashSet::new(),
            last_status: None,
        }
    }

    pub fn push_token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn state(&self, account_id: &str) -> Option<&RegistrationState> {
        self.states.get(account_id)
    }

    /// Contact parameters currently applied to an account
    pub fn applied_parameters(&self, account_id: &str) -> Option<&str> {
        self.applied.get(account_id).map(String::as_str)
    }

    pub fn is_recently_provisioned(&self, account_id: &str) -> bool {
        self.recently_provisioned.contains(account_id)
    }

    /// Store a refreshed (or revoked) token and reconcile every account
    pub fn on_push_token(&mut self, token: Option<String>) -> ReconcilePlan {
        self.token = token.filter(|t| !t.is_empty());
        info!(has_token = self.token.is_some(), "Push token refreshed");
        self.reconcile()
    }

    /// Adopt a reloaded configuration and reconcile with the stored token
    pub fn reconfigure(&mut self, config: &SoftphoneConfig) -> ReconcilePlan {
        self.push = config.push.clone();
        self.accounts = config.accounts.clone();
        self.default_account = config.default_account_id().map(str::to_string);

        let known: HashSet<&str> = self.accounts.iter().map(|a| a.id.as_str()).collect();
        self.applied.retain(|id, _| known.contains(id.as_str()));
        self.states.retain(|id, _| known.contains(id.as_str()));
        self.recently_provisioned.retain(|id| known.contains(id.as_str()));
        self.notified.retain(|(id, _)| known.contains(id.as_str()));

        self.reconcile()
    }

    /// Compute contact parameter changes for every configured account
    pub fn reconcile(&mut self) -> ReconcilePlan {
        let mut plan = ReconcilePlan::default();

        for account in &self.accounts {
            let desired = self.desired_parameters(account);
            let current = self.applied.get(&account.id);
            if current == desired.as_ref() {
                continue;
            }

            match &desired {
                Some(params) => {
                    self.applied.insert(account.id.clone(), params.clone());
                }
                None => {
                    self.applied.remove(&account.id);
                }
            }
            debug!(account_id = %account.id, push = desired.is_some(), "Contact parameters changed");
            plan.updates.push(ContactUpdate {
                account_id: account.id.clone(),
                params: desired,
            });
        }

        plan.refresh = !plan.updates.is_empty();
        if plan.refresh {
            info!(accounts = plan.updates.len(), "Coalesced re-registration");
        }
        plan
    }

    fn desired_parameters(&self, account: &AccountConfig) -> Option<String> {
        if !self.push.enabled || !account.push_allowed {
            return None;
        }
        let app_id = self.push.app_id.as_deref()?;
        let token = self.token.as_deref()?;
        Some(contact_parameters(app_id, &self.push.push_type, token))
    }

    /// Mark one account as just provisioned
    pub fn mark_provisioned(&mut self, account_id: &str) {
        self.recently_provisioned.insert(account_id.to_string());
    }

    /// Remote provisioning succeeded: every configured account is fresh
    pub fn mark_all_provisioned(&mut self) {
        for account in &self.accounts {
            self.recently_provisioned.insert(account.id.clone());
        }
    }

    /// Engine reached GlobalState On
    pub fn on_engine_started(&mut self) -> Option<ServiceStatus> {
        self.update_status(ServiceStatus::Started)
    }

    /// Apply a registration state change
    pub fn on_registration_state(
        &mut self,
        account_id: &str,
        phase: RegistrationPhase,
        error: Option<RegistrationErrorKind>,
    ) -> RegistrationOutcome {
        self.states.insert(
            account_id.to_string(),
            RegistrationState {
                account_id: account_id.to_string(),
                phase,
                last_error: if phase == RegistrationPhase::Failed { error } else { None },
            },
        );

        let mut outcome = RegistrationOutcome::default();
        match phase {
            RegistrationPhase::Ok => {
                if self.recently_provisioned.remove(account_id) {
                    debug!(account_id, "Account registered after provisioning");
                }
                self.notified.retain(|(id, _)| id != account_id);
            }
            RegistrationPhase::Failed => {
                outcome.notice = self.classify_failure(account_id, error.unwrap_or(RegistrationErrorKind::Other));
            }
            _ => {}
        }

        if self.default_account.as_deref() == Some(account_id) {
            let status = match phase {
                RegistrationPhase::Ok => Some(ServiceStatus::Registered),
                RegistrationPhase::Failed | RegistrationPhase::Cleared => Some(ServiceStatus::RegistrationFailure),
                RegistrationPhase::None => Some(ServiceStatus::Started),
                RegistrationPhase::Progress => None,
            };
            outcome.status = status.and_then(|s| self.update_status(s));
        }
        outcome
    }

    fn classify_failure(&mut self, account_id: &str, kind: RegistrationErrorKind) -> Option<UserNotice> {
        if !self.recently_provisioned.contains(account_id) {
            warn!(account_id, error = ?kind, "Registration failed");
            return None;
        }
        let notice = match kind {
            RegistrationErrorKind::Unauthorized => UserNotice::RegistrationUnauthorized {
                account_id: account_id.to_string(),
            },
            RegistrationErrorKind::IoError => UserNotice::RegistrationNetworkError {
                account_id: account_id.to_string(),
            },
            RegistrationErrorKind::Other => {
                warn!(account_id, "Registration failed for provisioned account");
                return None;
            }
        };
        if !self.notified.insert((account_id.to_string(), kind)) {
            debug!(account_id, error = ?kind, "Registration failure already notified");
            return None;
        }
        Some(notice)
    }

    fn update_status(&mut self, status: ServiceStatus) -> Option<ServiceStatus> {
        if self.last_status == Some(status) {
            return None;
        }
        self.last_status = Some(status);
        Some(status)
    }
}
