use anyhow::anyhow;
use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Teacher,
    Student,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::Teacher => "teacher",
            Role::Student => "student",
        }
    }

    pub fn parse(s: &str) -> Option<Role> {
        match s {
            "admin" => Some(Role::Admin),
            "teacher" => Some(Role::Teacher),
            "student" => Some(Role::Student),
            _ => None,
        }
    }

    pub fn is_staff(&self) -> bool {
        matches!(self, Role::Admin | Role::Teacher)
    }
}

/// The authenticated caller, resolved from the bearer token. The bootstrap
/// admin token from configuration has no row in api_tokens, so `token_id`
/// is None for it.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub token_id: Option<String>,
    pub role: Role,
    pub student_id: Option<String>,
}

impl AuthUser {
    /// Staff may read any student; a student token only its own record.
    pub fn may_view_student(&self, student_id: &str) -> bool {
        self.role.is_staff() || self.student_id.as_deref() == Some(student_id)
    }
}

/// Tokens are stored as SHA-256 hex digests; the plaintext leaves the
/// process exactly once, in the issue response.
pub fn token_digest(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IssuedToken {
    pub id: String,
    pub token: String,
    pub role: Role,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub student_id: Option<String>,
    pub created_at: String,
}

pub fn issue_token(
    conn: &Connection,
    role: Role,
    label: &str,
    student_id: Option<&str>,
) -> anyhow::Result<IssuedToken> {
    let id = Uuid::new_v4().to_string();
    let token = Uuid::new_v4().to_string();
    let created_at = Utc::now().to_rfc3339();
    conn.execute(
        "INSERT INTO api_tokens(id, token_hash, role, label, student_id, created_at)
         VALUES(?, ?, ?, ?, ?, ?)",
        (
            &id,
            token_digest(&token),
            role.as_str(),
            label,
            student_id,
            &created_at,
        ),
    )?;
    Ok(IssuedToken {
        id,
        token,
        role,
        label: label.to_string(),
        student_id: student_id.map(|s| s.to_string()),
        created_at,
    })
}

/// Resolve a presented bearer token. `bootstrap_digest` is the digest of
/// the configured admin token, when one is set. Unknown and revoked tokens
/// both come back as None.
pub fn authenticate(
    conn: &Connection,
    bootstrap_digest: Option<&str>,
    bearer: &str,
) -> anyhow::Result<Option<AuthUser>> {
    let digest = token_digest(bearer);
    if bootstrap_digest == Some(digest.as_str()) {
        return Ok(Some(AuthUser {
            token_id: None,
            role: Role::Admin,
            student_id: None,
        }));
    }
    let row = conn
        .query_row(
            "SELECT id, role, student_id FROM api_tokens
             WHERE token_hash = ? AND revoked_at IS NULL",
            [&digest],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                ))
            },
        )
        .optional()?;
    let Some((token_id, role_str, student_id)) = row else {
        return Ok(None);
    };
    let role = Role::parse(&role_str)
        .ok_or_else(|| anyhow!("token {} carries unknown role '{}'", token_id, role_str))?;
    Ok(Some(AuthUser {
        token_id: Some(token_id),
        role,
        student_id,
    }))
}

/// Mark a token revoked. Returns false when the id is unknown.
pub fn revoke_token(conn: &Connection, token_id: &str) -> anyhow::Result<bool> {
    let changed = conn.execute(
        "UPDATE api_tokens SET revoked_at = ? WHERE id = ? AND revoked_at IS NULL",
        (Utc::now().to_rfc3339(), token_id),
    )?;
    Ok(changed > 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_is_stable_hex() {
        let d = token_digest("abc");
        assert_eq!(d.len(), 64);
        assert_eq!(d, token_digest("abc"));
        assert_ne!(d, token_digest("abd"));
    }

    #[test]
    fn role_round_trip() {
        for role in [Role::Admin, Role::Teacher, Role::Student] {
            assert_eq!(Role::parse(role.as_str()), Some(role));
        }
        assert_eq!(Role::parse("principal"), None);
    }

    #[test]
    fn student_sees_only_own_record() {
        let user = AuthUser {
            token_id: Some("t".into()),
            role: Role::Student,
            student_id: Some("s1".into()),
        };
        assert!(user.may_view_student("s1"));
        assert!(!user.may_view_student("s2"));
    }
}
