use std::fmt;

use serde::{Deserialize, Serialize};

/// Who a message is addressed to. Parsed exactly once from the wire/storage
/// descriptor at the boundary; everything downstream matches on the variants
/// instead of re-inspecting strings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecipientSet {
    /// Every live connection, regardless of room join state.
    Broadcast,
    /// One or more usernames. The sender always receives an echo.
    Direct(Vec<String>),
    /// A group room; delivery is gated by room join state, not the roster.
    Group(i64),
}

impl RecipientSet {
    /// Parse a recipient descriptor: `all`, `group-<id>`, or a comma-joined
    /// username list.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err("empty recipient descriptor".into());
        }
        if raw == "all" {
            return Ok(Self::Broadcast);
        }
        if let Some(id) = raw.strip_prefix("group-") {
            let id: i64 = id
                .parse()
                .map_err(|_| format!("malformed group room '{raw}'"))?;
            return Ok(Self::Group(id));
        }
        let mut names = Vec::new();
        for name in raw.split(',') {
            let name = name.trim();
            if name.is_empty() {
                continue;
            }
            if !names.iter().any(|n| n == name) {
                names.push(name.to_string());
            }
        }
        if names.is_empty() {
            return Err(format!("no usernames in descriptor '{raw}'"));
        }
        Ok(Self::Direct(names))
    }

    /// The storage/wire form of this recipient set.
    pub fn descriptor(&self) -> String {
        match self {
            Self::Broadcast => "all".into(),
            Self::Direct(names) => names.join(","),
            Self::Group(id) => format!("group-{id}"),
        }
    }

    /// A canonical key for per-room ordering. Direct sets are sorted so that
    /// "A,B" and "B,A" sequence through the same room.
    pub fn scope_key(&self) -> String {
        match self {
            Self::Broadcast => "all".into(),
            Self::Group(id) => format!("group-{id}"),
            Self::Direct(names) => {
                let mut sorted: Vec<&str> = names.iter().map(String::as_str).collect();
                sorted.sort_unstable();
                sorted.join(",")
            }
        }
    }

    pub fn group_id(&self) -> Option<i64> {
        match self {
            Self::Group(id) => Some(*id),
            _ => None,
        }
    }

    /// Whether `username` is named as a recipient. Broadcast includes
    /// everyone; group scoping is decided by the roster, not here.
    pub fn names_user(&self, username: &str) -> bool {
        match self {
            Self::Broadcast => true,
            Self::Direct(names) => names.iter().any(|n| n == username),
            Self::Group(_) => false,
        }
    }
}

impl fmt::Display for RecipientSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.descriptor())
    }
}

/// A joinable room. Clients join group rooms (`group-<id>`) and named rooms
/// (their own username, or an agreed pair key). The registry and dispatcher
/// only ever match on this type.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RoomKey {
    Group(i64),
    Named(String),
}

impl RoomKey {
    pub fn parse(raw: &str) -> Result<Self, String> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err("empty room name".into());
        }
        if let Some(id) = raw.strip_prefix("group-") {
            let id: i64 = id.parse().map_err(|_| format!("malformed room '{raw}'"))?;
            return Ok(Self::Group(id));
        }
        Ok(Self::Named(raw.to_string()))
    }
}

impl fmt::Display for RoomKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Group(id) => write!(f, "group-{id}"),
            Self::Named(name) => f.write_str(name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_broadcast() {
        assert_eq!(RecipientSet::parse("all").unwrap(), RecipientSet::Broadcast);
    }

    #[test]
    fn parses_group_room() {
        assert_eq!(
            RecipientSet::parse("group-42").unwrap(),
            RecipientSet::Group(42)
        );
        assert!(RecipientSet::parse("group-abc").is_err());
    }

    #[test]
    fn parses_direct_list_dropping_blanks_and_dupes() {
        let set = RecipientSet::parse("Bob, Alice,,Bob").unwrap();
        assert_eq!(
            set,
            RecipientSet::Direct(vec!["Bob".into(), "Alice".into()])
        );
        assert_eq!(set.descriptor(), "Bob,Alice");
    }

    #[test]
    fn rejects_empty_descriptor() {
        assert!(RecipientSet::parse("").is_err());
        assert!(RecipientSet::parse(" , ").is_err());
    }

    #[test]
    fn scope_key_is_order_independent_for_direct() {
        let a = RecipientSet::parse("Alice,Bob").unwrap();
        let b = RecipientSet::parse("Bob,Alice").unwrap();
        assert_eq!(a.scope_key(), b.scope_key());
    }

    #[test]
    fn room_key_discriminates_groups() {
        assert_eq!(RoomKey::parse("group-7").unwrap(), RoomKey::Group(7));
        assert_eq!(
            RoomKey::parse("Alice").unwrap(),
            RoomKey::Named("Alice".into())
        );
        assert!(RoomKey::parse("group-x").is_err());
    }
}
