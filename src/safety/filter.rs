//! Inbound message filter.

use std::collections::HashSet;

use crate::config::FilterConfig;
use crate::protocol::InboundEvent;

/// Why an event was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Not a group message.
    NotGroup,
    /// Sender is blacklisted.
    Blacklisted,
    /// Group is outside the configured service groups.
    OutsideServiceGroups,
}

/// Decides whether an inbound event is ignored.
///
/// Built once from config and never mutated, so it can be shared freely.
#[derive(Debug, Clone, Default)]
pub struct MessageFilter {
    service_groups: HashSet<i64>,
    blacklist: HashSet<i64>,
}

impl MessageFilter {
    pub fn new(config: &FilterConfig) -> Self {
        Self {
            service_groups: config.service_groups.iter().copied().collect(),
            blacklist: config.blacklist_users.iter().copied().collect(),
        }
    }

    /// First matching rule, or `None` when the event is kept.
    ///
    /// Rules in order: non-group channel, blacklisted sender, then a group
    /// outside a non-empty service set. A zero group id skips the last rule.
    pub fn check(&self, event: &InboundEvent) -> Option<DropReason> {
        if event.message_type != "group" {
            return Some(DropReason::NotGroup);
        }
        if self.blacklist.contains(&event.user_id) {
            return Some(DropReason::Blacklisted);
        }
        if !self.service_groups.is_empty()
            && event.group_id != 0
            && !self.service_groups.contains(&event.group_id)
        {
            return Some(DropReason::OutsideServiceGroups);
        }
        None
    }

    pub fn should_drop(&self, event: &InboundEvent) -> bool {
        self.check(event).is_some()
    }
}
