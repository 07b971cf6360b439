//! Who may issue `!!command` messages.

use std::collections::HashSet;

use crate::config::CommandConfig;

/// Command allow-list. When not required, everyone is allowed.
#[derive(Debug, Clone, Default)]
pub struct CommandPermissions {
    required: bool,
    authorized: HashSet<i64>,
    denied_message: String,
}

impl CommandPermissions {
    pub fn new(config: &CommandConfig) -> Self {
        Self {
            required: config.require_permission,
            authorized: config.authorized_users.iter().copied().collect(),
            denied_message: config.permission_denied_msg.clone(),
        }
    }

    pub fn allows(&self, user_id: i64) -> bool {
        !self.required || self.authorized.contains(&user_id)
    }

    /// Reply sent to the group when a command is refused.
    pub fn denied_message(&self) -> &str {
        &self.denied_message
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_by_default() {
        let perms = CommandPermissions::new(&CommandConfig::default());
        assert!(perms.allows(1));
        assert!(!perms.denied_message().is_empty());
    }

    #[test]
    fn test_allow_list_enforced() {
        let perms = CommandPermissions::new(&CommandConfig {
            require_permission: true,
            authorized_users: vec![42],
            permission_denied_msg: "nope".to_string(),
        });
        assert!(perms.allows(42));
        assert!(!perms.allows(1));
        assert_eq!(perms.denied_message(), "nope");
    }

    #[test]
    fn test_required_with_empty_list_denies_everyone() {
        let perms = CommandPermissions::new(&CommandConfig {
            require_permission: true,
            ..CommandConfig::default()
        });
        assert!(!perms.allows(0));
    }
}
