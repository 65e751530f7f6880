//! Role-based permissions with ALL / OWN scope.
//!
//! A grant is `(module, action, scope)`. `ALL` covers every record of the
//! module; `OWN` only records whose `owner_id` is the requesting user.
//! No matching grant means no access.

use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::fmt;
use std::str::FromStr;
use tracing::warn;

use crate::db::{self, DbError, OwnerScope};

macro_rules! string_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub enum $name {
            $(#[serde(rename = $text)] $variant),+
        }

        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text),+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(format!("unknown {} '{}'", stringify!($name), other)),
                }
            }
        }
    };
}

string_enum!(Module {
    Quotes => "QUOTES",
    Contacts => "CONTACTS",
    Reports => "REPORTS",
    Catalog => "CATALOG",
    Templates => "TEMPLATES",
    Settings => "SETTINGS",
    Users => "USERS",
});

string_enum!(Action {
    View => "VIEW",
    Read => "READ",
    Create => "CREATE",
    Update => "UPDATE",
    Delete => "DELETE",
    Export => "EXPORT",
    Convert => "CONVERT",
});

string_enum!(Scope {
    All => "ALL",
    Own => "OWN",
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Permission {
    pub module: Module,
    pub action: Action,
    pub scope: Scope,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserPermissions {
    #[serde(skip)]
    pub user_id: i64,
    pub role: String,
    pub permissions: Vec<Permission>,
}

impl UserPermissions {
    fn grants(&self, module: Module, action: Action) -> impl Iterator<Item = &Permission> {
        self.permissions
            .iter()
            .filter(move |p| p.module == module && p.action == action)
    }

    /// Gate a single record. `owner_id = None` (unowned record) is only
    /// reachable through an ALL grant.
    pub fn can_access_resource(
        &self,
        module: Module,
        action: Action,
        owner_id: Option<i64>,
    ) -> bool {
        self.grants(module, action).any(|p| match p.scope {
            Scope::All => true,
            Scope::Own => owner_id == Some(self.user_id),
        })
    }

    /// Any grant at all, ALL or OWN
    pub fn has_any_access(&self, module: Module, action: Action) -> bool {
        self.grants(module, action).next().is_some()
    }

    /// An ALL grant, i.e. no owner filter applies
    pub fn has_unrestricted_access(&self, module: Module, action: Action) -> bool {
        self.grants(module, action).any(|p| p.scope == Scope::All)
    }

    /// Row filter for list queries; `None` when the user has no access at all
    pub fn owner_scope(&self, module: Module, action: Action) -> Option<OwnerScope> {
        if self.has_unrestricted_access(module, action) {
            Some(OwnerScope::Unrestricted)
        } else if self.has_any_access(module, action) {
            Some(OwnerScope::OwnedBy(self.user_id))
        } else {
            None
        }
    }
}

#[derive(Clone)]
pub struct PermissionResolver {
    pool: SqlitePool,
    timeout: std::time::Duration,
}

impl PermissionResolver {
    pub fn new(pool: SqlitePool, timeout: std::time::Duration) -> Self {
        Self { pool, timeout }
    }

    /// Role and grants for a user. Missing user, storage failure or timeout
    /// all yield `None`, which callers treat as deny.
    pub async fn get_user_permissions(&self, user_id: i64) -> Option<UserPermissions> {
        let rows = db::bounded(self.timeout, async {
            let rows: Vec<(String, Option<String>, Option<String>, Option<String>)> =
                sqlx::query_as(
                    r#"
                    SELECT u.role, p.module, p.action, p.scope
                    FROM users u
                    LEFT JOIN roles r ON r.name = u.role
                    LEFT JOIN role_permissions rp ON rp.role_id = r.id
                    LEFT JOIN permissions p ON p.id = rp.permission_id
                    WHERE u.id = ?
                    "#,
                )
                .bind(user_id)
                .fetch_all(&self.pool)
                .await?;
            Ok::<_, DbError>(rows)
        })
        .await;

        let rows = match rows {
            Ok(rows) => rows,
            Err(e) => {
                warn!(user_id = user_id, error = %e, "Permission lookup failed; denying");
                return None;
            }
        };

        let role = rows.first()?.0.clone();
        let permissions = rows
            .into_iter()
            .filter_map(|(_, module, action, scope)| {
                let (module, action, scope) = (module?, action?, scope?);
                match (module.parse(), action.parse(), scope.parse()) {
                    (Ok(module), Ok(action), Ok(scope)) => Some(Permission {
                        module,
                        action,
                        scope,
                    }),
                    _ => {
                        warn!(%module, %action, %scope, "Skipping unrecognized permission grant");
                        None
                    }
                }
            })
            .collect();

        Some(UserPermissions {
            user_id,
            role,
            permissions,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{create_user, NewUser};

    fn perms(user_id: i64, grants: &[(Module, Action, Scope)]) -> UserPermissions {
        UserPermissions {
            user_id,
            role: "test".to_string(),
            permissions: grants
                .iter()
                .map(|&(module, action, scope)| Permission {
                    module,
                    action,
                    scope,
                })
                .collect(),
        }
    }

    #[test]
    fn test_own_scope_only_matches_own_records() {
        let p = perms(7, &[(Module::Quotes, Action::Update, Scope::Own)]);
        assert!(p.can_access_resource(Module::Quotes, Action::Update, Some(7)));
        assert!(!p.can_access_resource(Module::Quotes, Action::Update, Some(8)));
        assert!(!p.can_access_resource(Module::Quotes, Action::Update, None));
        assert!(!p.can_access_resource(Module::Quotes, Action::Delete, Some(7)));
        assert!(!p.can_access_resource(Module::Contacts, Action::Update, Some(7)));
    }

    #[test]
    fn test_all_scope_matches_everything() {
        let p = perms(7, &[(Module::Quotes, Action::Update, Scope::All)]);
        assert!(p.can_access_resource(Module::Quotes, Action::Update, Some(7)));
        assert!(p.can_access_resource(Module::Quotes, Action::Update, Some(8)));
        assert!(p.can_access_resource(Module::Quotes, Action::Update, None));
    }

    #[test]
    fn test_any_vs_unrestricted() {
        let own = perms(1, &[(Module::Quotes, Action::Read, Scope::Own)]);
        assert!(own.has_any_access(Module::Quotes, Action::Read));
        assert!(!own.has_unrestricted_access(Module::Quotes, Action::Read));
        assert_eq!(
            own.owner_scope(Module::Quotes, Action::Read),
            Some(OwnerScope::OwnedBy(1))
        );

        let all = perms(1, &[(Module::Quotes, Action::Read, Scope::All)]);
        assert_eq!(
            all.owner_scope(Module::Quotes, Action::Read),
            Some(OwnerScope::Unrestricted)
        );

        let none = perms(1, &[]);
        assert!(!none.has_any_access(Module::Quotes, Action::Read));
        assert_eq!(none.owner_scope(Module::Quotes, Action::Read), None);
    }

    #[test]
    fn test_wire_names() {
        assert_eq!("CONTACTS".parse::<Module>().unwrap(), Module::Contacts);
        assert!("contacts".parse::<Module>().is_err());
        assert_eq!(Action::Convert.to_string(), "CONVERT");
        assert_eq!(serde_json::to_string(&Scope::Own).unwrap(), "\"OWN\"");
    }

    async fn user_with_role(pool: &SqlitePool, username: &str, role: &str) -> i64 {
        create_user(
            pool,
            NewUser {
                username,
                email: None,
                password_hash: "x",
                role,
                must_change_password: false,
            },
        )
        .await
        .unwrap()
        .id
    }

    #[tokio::test]
    async fn test_seeded_roles_resolve() {
        let pool = db::connect_in_memory().await.unwrap();
        let resolver = PermissionResolver::new(pool.clone(), std::time::Duration::from_secs(5));

        let admin = user_with_role(&pool, "root", "admin").await;
        let p = resolver.get_user_permissions(admin).await.unwrap();
        assert_eq!(p.role, "admin");
        assert!(p.has_unrestricted_access(Module::Users, Action::Delete));
        assert!(p.can_access_resource(Module::Quotes, Action::Update, Some(999)));

        let sales = user_with_role(&pool, "sam", "sales").await;
        let p = resolver.get_user_permissions(sales).await.unwrap();
        assert!(p.can_access_resource(Module::Quotes, Action::Update, Some(sales)));
        assert!(!p.can_access_resource(Module::Quotes, Action::Update, Some(admin)));
        assert!(!p.has_any_access(Module::Users, Action::Read));

        let viewer = user_with_role(&pool, "vic", "viewer").await;
        let p = resolver.get_user_permissions(viewer).await.unwrap();
        assert!(p.has_unrestricted_access(Module::Quotes, Action::Read));
        assert!(!p.has_any_access(Module::Quotes, Action::Update));
    }

    #[tokio::test]
    async fn test_unknown_role_is_default_deny() {
        let pool = db::connect_in_memory().await.unwrap();
        let resolver = PermissionResolver::new(pool.clone(), std::time::Duration::from_secs(5));
        let id = user_with_role(&pool, "odd", "intern").await;

        let p = resolver.get_user_permissions(id).await.unwrap();
        assert_eq!(p.role, "intern");
        assert!(p.permissions.is_empty());
        assert!(!p.has_any_access(Module::Quotes, Action::Read));
    }

    #[tokio::test]
    async fn test_missing_user_and_failures_yield_none() {
        let pool = db::connect_in_memory().await.unwrap();
        let resolver = PermissionResolver::new(pool.clone(), std::time::Duration::from_secs(5));
        assert!(resolver.get_user_permissions(42).await.is_none());

        pool.close().await;
        assert!(resolver.get_user_permissions(1).await.is_none());
    }
}
