use serde::Serialize;

use crate::models::UserRole;

/// Route areas and the roles allowed into them
const PROTECTED_AREAS: &[(&str, &[UserRole])] = &[
    ("admin", &[UserRole::Admin]),
    ("user", &[UserRole::User, UserRole::Admin]),
    ("affiliate", &[UserRole::Affiliate, UserRole::Admin]),
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Access {
    Public,
    Allowed,
    Unauthenticated,
    Forbidden,
}

/// Roles needed for a path, or None when it is public
///
/// Works for page paths (`/admin/users`) and their API twins
/// (`/api/admin/users`). Matches whole segments only.
pub fn required_roles(path: &str) -> Option<&'static [UserRole]> {
    let mut segments = path
        .split(['?', '#'])
        .next()
        .unwrap_or_default()
        .split('/')
        .filter(|s| !s.is_empty());

    let mut area = segments.next()?;
    if area.eq_ignore_ascii_case("api") {
        area = segments.next()?;
    }

    PROTECTED_AREAS
        .iter()
        .find(|(name, _)| area.eq_ignore_ascii_case(name))
        .map(|(_, roles)| *roles)
}

pub fn check_access(path: &str, role: Option<UserRole>) -> Access {
    match (required_roles(path), role) {
        (None, _) => Access::Public,
        (Some(_), None) => Access::Unauthenticated,
        (Some(roles), Some(role)) if roles.contains(&role) => Access::Allowed,
        (Some(_), Some(_)) => Access::Forbidden,
    }
}

/// Where the frontend should send the browser instead, if anywhere
pub fn redirect_for(path: &str, access: Access, role: Option<UserRole>) -> Option<String> {
    match access {
        Access::Public | Access::Allowed => None,
        Access::Unauthenticated => Some(format!("/login?redirect={}", path)),
        Access::Forbidden => Some(role.map_or("/login", |r| r.home_path()).to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_roles() {
        assert_eq!(required_roles("/admin"), Some(&[UserRole::Admin][..]));
        assert_eq!(required_roles("/admin/dashboard"), Some(&[UserRole::Admin][..]));
        assert_eq!(
            required_roles("/api/user/dashboard"),
            Some(&[UserRole::User, UserRole::Admin][..])
        );
        assert_eq!(
            required_roles("/affiliate?tab=referrals"),
            Some(&[UserRole::Affiliate, UserRole::Admin][..])
        );
        assert_eq!(required_roles("/"), None);
        assert_eq!(required_roles("/login"), None);
        assert_eq!(required_roles("/api/webhooks/signal"), None);
    }

    #[test]
    fn test_segment_matching() {
        assert_eq!(required_roles("/users"), None);
        assert_eq!(required_roles("/administrator"), None);
        assert_eq!(required_roles("/api/affiliates"), None);
        assert_eq!(required_roles("/ADMIN/x"), Some(&[UserRole::Admin][..]));
    }

    #[test]
    fn test_check_access() {
        assert_eq!(check_access("/login", None), Access::Public);
        assert_eq!(check_access("/admin", None), Access::Unauthenticated);
        assert_eq!(check_access("/admin", Some(UserRole::User)), Access::Forbidden);
        assert_eq!(check_access("/admin", Some(UserRole::Admin)), Access::Allowed);
        assert_eq!(check_access("/user", Some(UserRole::Admin)), Access::Allowed);
        assert_eq!(check_access("/user", Some(UserRole::Affiliate)), Access::Forbidden);
        assert_eq!(
            check_access("/affiliate/dashboard", Some(UserRole::Affiliate)),
            Access::Allowed
        );
    }

    #[test]
    fn test_redirects() {
        assert_eq!(
            redirect_for("/admin", Access::Unauthenticated, None),
            Some("/login?redirect=/admin".to_string())
        );
        assert_eq!(
            redirect_for("/admin", Access::Forbidden, Some(UserRole::Affiliate)),
            Some("/affiliate/dashboard".to_string())
        );
        assert_eq!(redirect_for("/user", Access::Allowed, Some(UserRole::User)), None);
    }
}
