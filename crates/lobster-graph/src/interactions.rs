//! Implicit-feedback interaction sets.

use crate::error::{Error, Result};

/// A validated set of observed (user, item) interactions.
///
/// Pairs are deduplicated and kept in ascending `(user, item)` order, so every
/// structure derived from the set is deterministic regardless of the order the
/// dataset delivered them in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InteractionSet {
    n_users: usize,
    n_items: usize,
    pairs: Vec<(u32, u32)>,
}

impl InteractionSet {
    /// Build an interaction set, rejecting ids outside the declared ranges.
    ///
    /// # Arguments
    /// - `n_users`: number of users (node ids `[0, n_users)`)
    /// - `n_items`: number of items (node ids `[n_users, n_users + n_items)`)
    /// - `pairs`: observed `(user_id, item_id)` interactions
    pub fn new(
        n_users: usize,
        n_items: usize,
        pairs: impl IntoIterator<Item = (u32, u32)>,
    ) -> Result<Self> {
        let n_nodes = n_users + n_items;
        if u32::try_from(n_nodes).is_err() {
            return Err(Error::NodeSpaceTooLarge(n_nodes));
        }

        let mut pairs: Vec<(u32, u32)> = pairs.into_iter().collect();
        for &(user, item) in &pairs {
            if user as usize >= n_users {
                return Err(Error::UserOutOfRange { id: user, n_users });
            }
            if item as usize >= n_items {
                return Err(Error::ItemOutOfRange { id: item, n_items });
            }
        }
        pairs.sort_unstable();
        pairs.dedup();

        Ok(Self {
            n_users,
            n_items,
            pairs,
        })
    }

    pub fn n_users(&self) -> usize {
        self.n_users
    }

    pub fn n_items(&self) -> usize {
        self.n_items
    }

    /// Size of the combined user + item node space.
    pub fn n_nodes(&self) -> usize {
        self.n_users + self.n_items
    }

    /// Distinct interactions in ascending `(user, item)` order.
    pub fn pairs(&self) -> &[(u32, u32)] {
        &self.pairs
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    /// Node id of an item in the combined node space.
    pub fn item_node(&self, item: u32) -> u32 {
        self.n_users as u32 + item
    }

    /// Items each user interacted with, indexed by user id (sorted).
    pub fn items_by_user(&self) -> Vec<Vec<u32>> {
        let mut by_user = vec![Vec::new(); self.n_users];
        for &(user, item) in &self.pairs {
            by_user[user as usize].push(item);
        }
        by_user
    }
}
