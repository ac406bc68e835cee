use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const CURSOR: &str = "cursor";
pub const NEW_CURSOR: &str = "newCursor";
pub const DELETE_CURSOR: &str = "deleteCursor";

/// Cursor/selection frame exchanged between collaborators.
///
/// Unknown client fields are carried through untouched in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CursorOperation {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(rename = "userID", default)]
    pub user_id: String,
    #[serde(rename = "authorID", default)]
    pub author_id: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub color: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<Value>,
    #[serde(default)]
    pub editing: bool,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Who a session is, as far as presence is concerned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceIdentity {
    pub doc_id: String,
    pub user_id: String,
    pub author_id: String,
    pub name: String,
    pub color: String,
}

impl PresenceIdentity {
    /// Member stored in the document's connection set.
    pub fn connection_member(&self) -> String {
        connection_member(&self.user_id, &self.author_id)
    }

    pub fn stamp(&self, op: &mut CursorOperation) {
        op.user_id = self.user_id.clone();
        op.author_id = self.author_id.clone();
        op.name = self.name.clone();
        op.color = self.color.clone();
    }

    pub fn cursor(&self, kind: &str) -> CursorOperation {
        let mut op = CursorOperation {
            kind: kind.to_string(),
            ..Default::default()
        };
        self.stamp(&mut op);
        op
    }
}

pub fn connection_member(user_id: &str, author_id: &str) -> String {
    format!("{user_id}:{author_id}")
}

/// Splits a connection member back into `(user_id, author_id)`.
pub fn parse_connection_member(member: &str) -> Option<(&str, &str)> {
    let (user, author) = member.rsplit_once(':')?;
    if user.is_empty() || author.is_empty() {
        return None;
    }
    Some((user, author))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn keeps_unknown_client_fields() {
        let raw = r#"{"type":"cursor","range":{"index":3,"length":0},"editing":true,"scroll":12}"#;
        let op: CursorOperation = serde_json::from_str(raw).unwrap();
        assert_eq!(op.kind, CURSOR);
        assert!(op.editing);
        assert_eq!(op.extra.get("scroll"), Some(&Value::from(12)));

        let out = serde_json::to_value(&op).unwrap();
        assert_eq!(out["scroll"], 12);
        assert_eq!(out["range"]["index"], 3);
    }

    #[test]
    fn stamping_overrides_client_identity() {
        let identity = PresenceIdentity {
            doc_id: "d".into(),
            user_id: "u1".into(),
            author_id: "a".into(),
            name: "Ada".into(),
            color: "#ff0000".into(),
        };
        let mut op: CursorOperation =
            serde_json::from_str(r#"{"type":"cursor","userID":"spoofed","name":"Eve"}"#).unwrap();
        identity.stamp(&mut op);
        assert_eq!(op.user_id, "u1");
        assert_eq!(op.author_id, "a");
        assert_eq!(op.name, "Ada");
    }

    #[test]
    fn connection_members_round_trip() {
        assert_eq!(parse_connection_member(&connection_member("u", "1f")), Some(("u", "1f")));
        assert_eq!(parse_connection_member("nocolon"), None);
        assert_eq!(parse_connection_member("u:"), None);
    }
}
