/*!
 * # Role-Based Access Control (RBAC) Module
 *
 * Clinic staff roles and the pharmacy permissions they carry.
 */

use lazy_static::lazy_static;
use std::collections::{HashMap, HashSet};
use tracing::warn;

use super::permissions::consts;

/// Role definition with associated permissions
#[derive(Debug, Clone)]
pub struct Role {
    pub name: &'static str,
    pub description: &'static str,
    pub permissions: Vec<&'static str>,
}

lazy_static! {
    pub static ref ROLES: HashMap<&'static str, Role> = {
        let mut roles = HashMap::new();

        roles.insert(
            "admin",
            Role {
                name: "admin",
                description: "Clinic administrator with full access",
                permissions: vec!["*"],
            },
        );

        // Front-desk staff run the pharmacy counter and its books
        roles.insert(
            "administratif",
            Role {
                name: "administratif",
                description: "Administrative staff",
                permissions: vec!["sales:*", "stock:*", consts::REPORTS_READ],
            },
        );

        roles.insert(
            "infirmier",
            Role {
                name: "infirmier",
                description: "Nurse dispensing medication",
                permissions: vec![consts::SALES_CREATE, consts::SALES_READ, consts::STOCK_READ],
            },
        );

        roles.insert(
            "medecin",
            Role {
                name: "medecin",
                description: "Physician checking availability",
                permissions: vec![consts::STOCK_READ, consts::SALES_READ],
            },
        );

        roles
    };
}

/// Union of the permissions granted by `role_names`. Unknown roles grant
/// nothing; role names are case-insensitive.
pub fn permissions_for_roles(role_names: &[String]) -> HashSet<String> {
    let mut permissions = HashSet::new();

    for role_name in role_names {
        match ROLES.get(role_name.to_ascii_lowercase().as_str()) {
            Some(role) => {
                permissions.extend(role.permissions.iter().map(|p| p.to_string()));
            }
            None => warn!("Role not found: {}", role_name),
        }
    }

    permissions
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::permissions::permission_matches;

    fn grants(roles: &[&str], required: &str) -> bool {
        let roles: Vec<String> = roles.iter().map(|r| r.to_string()).collect();
        permissions_for_roles(&roles)
            .iter()
            .any(|p| permission_matches(p, required))
    }

    #[test]
    fn nurse_can_sell_but_not_receive_stock() {
        assert!(grants(&["INFIRMIER"], consts::SALES_CREATE));
        assert!(!grants(&["infirmier"], consts::STOCK_RECEIVE));
        assert!(!grants(&["infirmier"], consts::REPORTS_READ));
    }

    #[test]
    fn physician_is_read_only() {
        assert!(grants(&["medecin"], consts::STOCK_READ));
        assert!(!grants(&["medecin"], consts::SALES_CREATE));
    }

    #[test]
    fn admin_and_office_cover_everything_they_should() {
        for permission in consts::ALL {
            assert!(grants(&["admin"], permission));
            assert!(grants(&["administratif"], permission));
        }
    }

    #[test]
    fn unknown_role_grants_nothing() {
        assert!(!grants(&["janitor"], consts::SALES_READ));
    }
}
