//! History bucket identities.
//!
//! Every chat history hangs off a channel key: either the group channel `~`
//! or the canonical key for an unordered pair of users. Deriving the pair
//! key from the lexicographically ordered names guarantees one bucket per
//! pair no matter who sends first.

use crate::name::{Name, GROUP_CHANNEL};

/// Separator between the two names of a pair channel key.
pub const PAIR_SEPARATOR: &[u8] = b"&/)";

/// Identifies one history bucket.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ChannelKey(Vec<u8>);

impl ChannelKey {
    /// The group-chat channel.
    pub fn group() -> Self {
        Self(GROUP_CHANNEL.to_vec())
    }

    /// Canonical key for the unordered pair `{a, b}`: the lesser name, the
    /// separator, the greater name, compared bytewise.
    pub fn pair(a: &Name, b: &Name) -> Self {
        let (first, second) = if a <= b { (a, b) } else { (b, a) };
        let mut key = Vec::with_capacity(
            first.as_bytes().len() + PAIR_SEPARATOR.len() + second.as_bytes().len(),
        );
        key.extend_from_slice(first.as_bytes());
        key.extend_from_slice(PAIR_SEPARATOR);
        key.extend_from_slice(second.as_bytes());
        Self(key)
    }

    pub fn is_group(&self) -> bool {
        self.0 == GROUP_CHANNEL
    }

    /// Whether this key names a pair channel with `name` on either side.
    pub fn involves(&self, name: &Name) -> bool {
        let n = name.as_bytes();
        if self.0.len() <= n.len() {
            return false;
        }
        let starts = self.0.starts_with(n) && self.0[n.len()..].starts_with(PAIR_SEPARATOR);
        let ends = self.0.ends_with(n) && self.0[..self.0.len() - n.len()].ends_with(PAIR_SEPARATOR);
        starts || ends
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> Name {
        Name::new(s).unwrap()
    }

    #[test]
    fn pair_key_is_symmetric() {
        let ana = name("Ana");
        let bob = name("Bob");
        assert_eq!(ChannelKey::pair(&ana, &bob), ChannelKey::pair(&bob, &ana));
    }

    #[test]
    fn pair_key_layout() {
        let key = ChannelKey::pair(&name("Bob"), &name("Ana"));
        assert_eq!(key.as_bytes(), b"Ana&/)Bob");
    }

    #[test]
    fn prefix_names_order_bytewise() {
        let key = ChannelKey::pair(&name("ab"), &name("a"));
        assert_eq!(key.as_bytes(), b"a&/)ab");
    }

    #[test]
    fn involves_either_side() {
        let ana = name("Ana");
        let bob = name("Bob");
        let cleo = name("Cleo");
        let key = ChannelKey::pair(&ana, &bob);
        assert!(key.involves(&ana));
        assert!(key.involves(&bob));
        assert!(!key.involves(&cleo));
        // A name merely contained in another user's name does not match.
        assert!(!key.involves(&name("An")));
        assert!(!key.involves(&name("ob")));
    }

    #[test]
    fn group_key() {
        let key = ChannelKey::group();
        assert!(key.is_group());
        assert_eq!(key.as_bytes(), b"~");
        assert!(!key.involves(&name("Ana")));
    }

    #[test]
    fn self_pair_involves_its_user() {
        let ana = name("Ana");
        let key = ChannelKey::pair(&ana, &ana);
        assert_eq!(key.as_bytes(), b"Ana&/)Ana");
        assert!(key.involves(&ana));
    }
}
