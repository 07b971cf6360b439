//! Outbound text rendering.

/// Placeholder replaced by the chat text in the group message template.
pub const MESSAGE_PLACEHOLDER: &str = "{message}";

pub const CANCELLED_NOTICE: &str = "命令已取消";
pub const EXPIRED_NOTICE: &str = "命令确认已超时，请重新发送命令";
pub const CONFIRMED_NOTICE: &str = "命令已确认，正在广播到所有客户端";

/// Renders every piece of text the bridge produces.
#[derive(Debug, Clone)]
pub struct Formatter {
    group_template: String,
}

impl Formatter {
    pub fn new(group_template: impl Into<String>) -> Self {
        Self {
            group_template: group_template.into(),
        }
    }

    /// IM chat text as forwarded to the hub. Every placeholder occurrence
    /// is replaced; a template without one drops the text.
    pub fn group_message(&self, text: &str) -> String {
        self.group_template.replace(MESSAGE_PLACEHOLDER, text)
    }

    /// Hub chat as shown in an IM group.
    pub fn hub_chat(&self, origin: &str, sender: &str, text: &str) -> String {
        format!("<[{origin}] {sender}> {text}")
    }

    /// Hub event as shown in an IM group.
    pub fn hub_event(&self, origin: &str, detail: &str) -> String {
        format!("<[{origin}]> {detail}")
    }

    /// Prompt asking the sender to confirm a broadcast command.
    pub fn confirmation_prompt(&self, sender: &str, command: &str) -> String {
        format!("@{sender} 您要执行命令：{command}\n请回复 '确认' 或 '取消'")
    }
}

impl Default for Formatter {
    fn default() -> Self {
        Self::new(MESSAGE_PLACEHOLDER)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pretty_assertions::assert_eq;

    #[test]
    fn test_identity_template() {
        assert_eq!(Formatter::default().group_message("hi there"), "hi there");
    }

    #[test]
    fn test_template_replaces_every_placeholder() {
        let f = Formatter::new("[QQ] {message} / {message}");
        assert_eq!(f.group_message("x"), "[QQ] x / x");
    }

    #[test]
    fn test_outbound_shapes() {
        let f = Formatter::default();
        assert_eq!(f.hub_chat("survival", "Steve", "hello"), "<[survival] Steve> hello");
        assert_eq!(f.hub_event("survival", "Steve joined"), "<[survival]> Steve joined");
    }

    #[test]
    fn test_confirmation_prompt() {
        assert_eq!(
            Formatter::default().confirmation_prompt("alice", "reset"),
            "@alice 您要执行命令：reset\n请回复 '确认' 或 '取消'"
        );
    }
}
