use std::collections::HashSet;
use std::future::Future;

use super::permission::Role;

/// The acting user and the roles they hold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub identifier: String,
    pub roles: HashSet<Role>,
}

impl Principal {
    pub fn new(identifier: impl Into<String>) -> Self {
        Self {
            identifier: identifier.into(),
            roles: HashSet::new(),
        }
    }

    /// Holds no roles and matches no identifier placeholder. Used for
    /// candidate-role discovery outside any authenticated request.
    pub fn anonymous() -> Self {
        Self::new(String::new())
    }

    pub fn with_roles(mut self, roles: impl IntoIterator<Item = Role>) -> Self {
        self.roles = roles.into_iter().collect();
        self
    }

    pub fn has_role(&self, role: &Role) -> bool {
        self.roles.contains(role)
    }

    /// Role keys in a stable order.
    pub fn role_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.roles.iter().map(|role| role.key().to_string()).collect();
        keys.sort();
        keys
    }
}

tokio::task_local! {
    static CURRENT_PRINCIPAL: Principal;
}

/// Ambient principal of the running task, installed per request.
pub struct SecurityContext;

impl SecurityContext {
    pub async fn scope<F: Future>(principal: Principal, future: F) -> F::Output {
        CURRENT_PRINCIPAL.scope(principal, future).await
    }

    pub fn current() -> Option<Principal> {
        CURRENT_PRINCIPAL.try_with(Principal::clone).ok()
    }
}

/// Source of the ambient principal.
pub trait CurrentPrincipal: Send + Sync {
    fn current_user_identifier(&self) -> Option<String>;
    fn current_user_roles(&self) -> HashSet<Role>;
}

/// Reads the principal installed with [`SecurityContext::scope`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TaskScopedPrincipal;

impl CurrentPrincipal for TaskScopedPrincipal {
    fn current_user_identifier(&self) -> Option<String> {
        CURRENT_PRINCIPAL.try_with(|principal| principal.identifier.clone()).ok()
    }

    fn current_user_roles(&self) -> HashSet<Role> {
        CURRENT_PRINCIPAL
            .try_with(|principal| principal.roles.clone())
            .unwrap_or_default()
    }
}

/// A fixed principal, for system jobs and tests.
impl CurrentPrincipal for Principal {
    fn current_user_identifier(&self) -> Option<String> {
        Some(self.identifier.clone())
    }

    fn current_user_roles(&self) -> HashSet<Role> {
        self.roles.clone()
    }
}
