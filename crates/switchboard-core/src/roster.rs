//! The ordered roster of connected users.

use std::time::Instant;

use thiserror::Error;

use crate::name::Name;
use crate::presence::Presence;

/// A connected user.
///
/// Generic over the send handle so this crate never learns what a
/// connection is; the server instantiates `H` with its outbound channel.
#[derive(Debug)]
pub struct User<H> {
    pub name: Name,
    pub presence: Presence,
    /// Instant of the most recently observed client-originated action.
    pub last_action: Instant,
    pub handle: H,
}

/// Insertion-ordered collection of connected users, unique by name.
///
/// Traversal order is admission order. Lookup is a linear scan; the roster
/// is small and the ordered walk is the hot path.
#[derive(Debug)]
pub struct Roster<H> {
    users: Vec<User<H>>,
}

/// Rejected insertion: the name is already claimed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("a user named {0} is already connected")]
pub struct DuplicateName(pub Name);

impl<H> Roster<H> {
    pub fn new() -> Self {
        Self { users: Vec::new() }
    }

    /// Append a user at the end, preserving admission order.
    pub fn insert_end(&mut self, user: User<H>) -> Result<(), DuplicateName> {
        if self.users.iter().any(|u| u.name == user.name) {
            return Err(DuplicateName(user.name.clone()));
        }
        self.users.push(user);
        Ok(())
    }

    /// Remove and return the named user; survivors keep their relative order.
    pub fn remove_by_name(&mut self, name: &Name) -> Option<User<H>> {
        let idx = self.users.iter().position(|u| u.name == *name)?;
        Some(self.users.remove(idx))
    }

    pub fn find_by_name(&mut self, name: &Name) -> Option<&mut User<H>> {
        self.users.iter_mut().find(|u| u.name == *name)
    }

    pub fn get(&self, name: &Name) -> Option<&User<H>> {
        self.users.iter().find(|u| u.name == *name)
    }

    /// Iterate users in admission order.
    pub fn iter(&self) -> impl Iterator<Item = &User<H>> {
        self.users.iter()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = &mut User<H>> {
        self.users.iter_mut()
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

impl<H> Default for Roster<H> {
    fn default() -> Self {
        Self::new()
    }
}
