//! Permission gate
//!
//! The pipeline asks one yes/no question per call: may this caller perform
//! the operation's permission. Who the caller is and how their permission
//! set was resolved belongs to the transport. `RolePolicy` is the stock
//! answer used by the binary and by tests.

use std::collections::{BTreeMap, BTreeSet};
use tracing::{info, warn};

use crate::registry::Operation;

/// Opaque authorization decision.
pub trait Authorizer: Send + Sync {
    fn can_perform(&self, permission: &str) -> bool;
}

impl<F> Authorizer for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn can_perform(&self, permission: &str) -> bool {
        self(permission)
    }
}

/// Role name to permission set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RolePolicy {
    roles: BTreeMap<String, BTreeSet<String>>,
}

impl RolePolicy {
    /// `admin` gets everything, `operator` everything except packet
    /// capture, `viewer` the passive lookups.
    pub fn builtin() -> Self {
        let all: BTreeSet<String> = Operation::ALL
            .iter()
            .map(|op| op.permission().to_string())
            .collect();
        let operator = all
            .iter()
            .filter(|p| p.as_str() != Operation::PacketCapture.permission())
            .cloned()
            .collect();
        let viewer = [
            Operation::Ping,
            Operation::DnsLookup,
            Operation::Whois,
            Operation::Geolocation,
        ]
        .iter()
        .map(|op| op.permission().to_string())
        .collect();

        let mut roles = BTreeMap::new();
        roles.insert("admin".to_string(), all);
        roles.insert("operator".to_string(), operator);
        roles.insert("viewer".to_string(), viewer);
        Self { roles }
    }

    /// Replace or add roles. A configured role fully replaces a built-in
    /// role of the same name.
    pub fn with_roles<I, S>(mut self, roles: I) -> Self
    where
        I: IntoIterator<Item = (String, Vec<S>)>,
        S: Into<String>,
    {
        for (name, permissions) in roles {
            let set: BTreeSet<String> = permissions.into_iter().map(Into::into).collect();
            info!(role = %name, permissions = set.len(), "role configured");
            self.roles.insert(name, set);
        }
        self
    }

    pub fn role_names(&self) -> impl Iterator<Item = &str> {
        self.roles.keys().map(String::as_str)
    }

    pub fn permissions(&self, role: &str) -> Option<&BTreeSet<String>> {
        self.roles.get(role)
    }

    /// Decision object for one caller. Unknown roles are denied everything.
    pub fn authorizer_for(&self, role: &str) -> RoleAuthorizer {
        let permissions = match self.roles.get(role) {
            Some(p) => p.clone(),
            None => {
                warn!(target: "security", role, "unknown role, denying all operations");
                BTreeSet::new()
            }
        };
        RoleAuthorizer {
            role: role.to_string(),
            permissions,
        }
    }
}

impl Default for RolePolicy {
    fn default() -> Self {
        Self::builtin()
    }
}

/// Permission set resolved for one role.
#[derive(Debug, Clone)]
pub struct RoleAuthorizer {
    role: String,
    permissions: BTreeSet<String>,
}

impl RoleAuthorizer {
    pub fn role(&self) -> &str {
        &self.role
    }
}

impl Authorizer for RoleAuthorizer {
    fn can_perform(&self, permission: &str) -> bool {
        self.permissions.contains(permission)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_roles() {
        let policy = RolePolicy::builtin();

        let admin = policy.authorizer_for("admin");
        assert!(Operation::ALL.iter().all(|op| admin.can_perform(op.permission())));

        let operator = policy.authorizer_for("operator");
        assert!(operator.can_perform("net.port_scan"));
        assert!(!operator.can_perform("net.capture"));

        let viewer = policy.authorizer_for("viewer");
        assert!(viewer.can_perform("net.ping"));
        assert!(viewer.can_perform("dns.lookup"));
        assert!(!viewer.can_perform("net.traceroute"));
    }

    #[test]
    fn test_unknown_role_is_denied() {
        let guest = RolePolicy::builtin().authorizer_for("guest");
        assert!(!guest.can_perform("net.ping"));
        assert_eq!(guest.role(), "guest");
    }

    #[test]
    fn test_configured_roles_override() {
        let policy = RolePolicy::builtin().with_roles([
            ("viewer".to_string(), vec!["net.ping"]),
            ("auditor".to_string(), vec!["tls.inspect", "intel.whois"]),
        ]);
        assert!(!policy.authorizer_for("viewer").can_perform("dns.lookup"));
        assert!(policy.authorizer_for("auditor").can_perform("tls.inspect"));
        assert_eq!(policy.role_names().count(), 4);
    }

    #[test]
    fn test_closures_are_authorizers() {
        let only_dns = |p: &str| p.starts_with("dns.");
        assert!(only_dns.can_perform("dns.lookup"));
        assert!(!only_dns.can_perform("net.ping"));
    }
}
