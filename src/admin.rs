//! Admin capability check.

use crate::verify::VerifiedIdentity;

pub trait IsAdmin: Send + Sync {
    fn is_admin(&self, identity: &VerifiedIdentity) -> bool;
}

/// Grants admin to users whose email domain is listed. An empty list grants nobody.
#[derive(Clone, Debug, Default)]
pub struct EmailDomainAdmin {
    domains: Vec<String>,
}

impl EmailDomainAdmin {
    #[must_use]
    pub fn new<I, S>(domains: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            domains: domains
                .into_iter()
                .map(|d| d.as_ref().trim().trim_start_matches('@').to_ascii_lowercase())
                .filter(|d| !d.is_empty())
                .collect(),
        }
    }
}

impl IsAdmin for EmailDomainAdmin {
    fn is_admin(&self, identity: &VerifiedIdentity) -> bool {
        let Some((_, domain)) = identity.email.rsplit_once('@') else {
            return false;
        };
        let domain = domain.to_ascii_lowercase();
        self.domains.iter().any(|d| *d == domain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn identity(email: &str) -> VerifiedIdentity {
        VerifiedIdentity {
            user_id: Uuid::new_v4(),
            email: email.to_string(),
            issuer: "custodia".to_string(),
            session_id: None,
        }
    }

    #[test]
    fn matches_domain_case_insensitively() {
        let admin = EmailDomainAdmin::new(["Example.COM", "@ops.example.com"]);
        assert!(admin.is_admin(&identity("root@example.com")));
        assert!(admin.is_admin(&identity("oncall@OPS.example.com")));
        assert!(!admin.is_admin(&identity("root@example.com.evil.test")));
        assert!(!admin.is_admin(&identity("example.com")));
    }

    #[test]
    fn empty_list_grants_nobody() {
        let admin = EmailDomainAdmin::new(Vec::<String>::new());
        assert!(!admin.is_admin(&identity("root@example.com")));
        let admin = EmailDomainAdmin::new([" "]);
        assert!(!admin.is_admin(&identity("root@example.com")));
    }
}
