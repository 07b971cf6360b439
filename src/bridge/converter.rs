//! Translation between OneBot events and hub messages.
//!
//! Inbound (IM to hub) runs the filter, the confirmation gate and command
//! parsing, and yields at most one [`CanonicalMessage`]. Outbound (hub to
//! IM) resolves the routing target and fans the rendered text out to one
//! or more groups.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::bridge::confirmation::ConfirmationManager;
use crate::bridge::formatter::Formatter;
use crate::channels::GroupSender;
use crate::config::Config;
use crate::protocol::hub::GROUP_TARGET_PREFIX;
use crate::protocol::{CanonicalMessage, InboundEvent, MessageContent, Route, group_target};
use crate::safety::{CommandPermissions, MessageFilter};

/// Marker that turns a chat line into a command.
pub const COMMAND_PREFIX: &str = "!!command ";

/// `executeAt` value that routes a command through the confirmation gate.
pub const CONFIRM_ALL_SENTINEL: &str = "i_confirm_all_client";

/// Lowercase fragments that identify hub events reporting command runs.
const COMMAND_EXECUTION_KEYWORDS: [&str; 4] = [
    "executed command",
    "player executed",
    "changed the block",
    "command ->",
];

/// Per-message outcome of an outbound translation.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct OutboundReport {
    pub delivered: usize,
    pub failed: usize,
    pub skipped: usize,
}

impl OutboundReport {
    pub fn attempted(&self) -> usize {
        self.delivered + self.failed
    }
}

/// Parsed `!!command` line.
#[derive(Debug, PartialEq, Eq)]
enum CommandLine<'a> {
    /// Marker without a target; forwarded as chat.
    Bare,
    Targeted {
        execute_at: &'a str,
        command: &'a str,
    },
}

fn parse_command(text: &str) -> CommandLine<'_> {
    let mut parts = text.splitn(3, ' ');
    parts.next();
    match parts.next() {
        Some(execute_at) if !execute_at.is_empty() => CommandLine::Targeted {
            execute_at,
            command: parts.next().unwrap_or_default(),
        },
        _ => CommandLine::Bare,
    }
}

/// Whether a hub event only reports that some command was executed.
pub fn is_command_execution(message: &CanonicalMessage) -> bool {
    let MessageContent::Event(detail) = &message.content else {
        return false;
    };
    let detail = detail.to_lowercase();
    COMMAND_EXECUTION_KEYWORDS
        .iter()
        .any(|keyword| detail.contains(keyword))
}

/// Converts and routes messages in both directions.
pub struct MessageConverter {
    client_id: String,
    filter: MessageFilter,
    permissions: CommandPermissions,
    formatter: Formatter,
    /// Broadcast targets, in configured order without duplicates.
    service_groups: Vec<i64>,
    filter_command_executions: bool,
    confirmations: Arc<ConfirmationManager>,
    im: Arc<dyn GroupSender>,
}

impl MessageConverter {
    pub fn new(
        config: &Config,
        confirmations: Arc<ConfirmationManager>,
        im: Arc<dyn GroupSender>,
    ) -> Self {
        let mut service_groups = Vec::with_capacity(config.filter.service_groups.len());
        for &group in &config.filter.service_groups {
            if !service_groups.contains(&group) {
                service_groups.push(group);
            }
        }

        Self {
            client_id: config.grunichat.client_id.clone(),
            filter: MessageFilter::new(&config.filter),
            permissions: CommandPermissions::new(&config.command),
            formatter: Formatter::new(config.format.group_message_format.clone()),
            service_groups,
            filter_command_executions: config.filter.filter_command_executions,
            confirmations,
            im,
        }
    }

    /// Translate an IM event into a hub message.
    ///
    /// `None` means nothing is forwarded: the event was filtered, consumed
    /// by the confirmation gate, refused, or parked for confirmation.
    pub async fn inbound(&self, event: &InboundEvent) -> Option<CanonicalMessage> {
        self.inbound_at(event, Utc::now()).await
    }

    /// [`MessageConverter::inbound`] with confirmation ages measured
    /// against `now`.
    pub async fn inbound_at(
        &self,
        event: &InboundEvent,
        now: DateTime<Utc>,
    ) -> Option<CanonicalMessage> {
        if event.post_type != "message" {
            tracing::trace!(post_type = %event.post_type, "Ignoring non-message event");
            return None;
        }

        if let Some(reason) = self.filter.check(event) {
            tracing::debug!(
                user_id = event.user_id,
                group_id = event.group_id,
                ?reason,
                "Event filtered"
            );
            return None;
        }

        let sender = event.display_name();
        let text = match event.message.text() {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(
                    user_id = event.user_id,
                    error = %e,
                    "Unsupported message payload, using empty text"
                );
                String::new()
            }
        };

        if self
            .confirmations
            .try_resolve_reply_at(event.user_id, event.group_id, &text, now)
            .await
        {
            return None;
        }

        if text.starts_with(COMMAND_PREFIX) {
            if !self.permissions.allows(event.user_id) {
                tracing::warn!(
                    user_id = event.user_id,
                    group_id = event.group_id,
                    text = %text,
                    "Command refused, sender not authorized"
                );
                if let Err(e) = self
                    .im
                    .send_group_message(event.group_id, self.permissions.denied_message())
                    .await
                {
                    tracing::warn!(
                        group_id = event.group_id,
                        error = %e,
                        "Failed to send permission denied reply"
                    );
                }
                return None;
            }

            if let CommandLine::Targeted { execute_at, command } = parse_command(&text) {
                if execute_at == CONFIRM_ALL_SENTINEL {
                    self.confirmations
                        .request_confirmation_at(
                            event.user_id,
                            event.group_id,
                            sender,
                            command,
                            &text,
                            now,
                        )
                        .await;
                    return None;
                }
                return Some(
                    CanonicalMessage::command(&self.client_id, sender, command)
                        .with_target(execute_at),
                );
            }
        }

        let mut message =
            CanonicalMessage::chat(&self.client_id, sender, self.formatter.group_message(&text));
        if event.group_id != 0 {
            message = message.with_target(group_target(event.group_id));
        }
        Some(message)
    }

    /// Deliver a hub message to the IM groups it is routed to.
    pub async fn outbound(&self, message: &CanonicalMessage) -> OutboundReport {
        let mut report = OutboundReport::default();

        let text = match &message.content {
            MessageContent::Chat(text) => {
                self.formatter.hub_chat(&message.origin, &message.sender, text)
            }
            MessageContent::Event(detail) => self.formatter.hub_event(&message.origin, detail),
            other => {
                tracing::debug!(
                    kind = other.kind(),
                    from = %message.origin,
                    "Ignoring hub message kind"
                );
                return report;
            }
        };

        let targets = match message.route() {
            Ok(Route::Broadcast) => self.service_groups.clone(),
            Ok(Route::Group(group_id)) => vec![group_id],
            Err(e) => {
                let target = message.routing_target.as_deref().unwrap_or_default();
                if target.starts_with(GROUP_TARGET_PREFIX) {
                    tracing::error!(
                        routing_target = target,
                        error = %e,
                        "Invalid group id in routing target"
                    );
                } else {
                    tracing::debug!(
                        routing_target = target,
                        "Routing target is not a group, not delivered"
                    );
                }
                return report;
            }
        };

        if targets.is_empty() {
            tracing::debug!(
                from = %message.origin,
                "Broadcast with no service groups configured"
            );
            return report;
        }

        if self.filter_command_executions && is_command_execution(message) {
            tracing::debug!(from = %message.origin, "Command execution event filtered");
            report.skipped = targets.len();
            return report;
        }

        for group_id in targets {
            match self.im.send_group_message(group_id, &text).await {
                Ok(()) => report.delivered += 1,
                Err(e) => {
                    tracing::warn!(group_id, error = %e, "Failed to deliver hub message to group");
                    report.failed += 1;
                }
            }
        }

        tracing::debug!(
            correlation_id = %message.correlation_id,
            delivered = report.delivered,
            failed = report.failed,
            "Hub message delivered"
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    use crate::bridge::formatter::EXPIRED_NOTICE;
    use crate::channels::HubPublisher;
    use crate::error::TransportError;
    use crate::protocol::InboundFrame;

    #[derive(Default)]
    struct Recorder {
        group: std::sync::Mutex<Vec<(i64, String)>>,
        hub: std::sync::Mutex<Vec<CanonicalMessage>>,
        failing_group: Option<i64>,
    }

    #[async_trait]
    impl GroupSender for Recorder {
        async fn send_group_message(
            &self,
            group_id: i64,
            message: &str,
        ) -> Result<(), TransportError> {
            if self.failing_group == Some(group_id) {
                return Err(TransportError::NotConnected {
                    name: "onebot".to_string(),
                });
            }
            self.group.lock().unwrap().push((group_id, message.to_string()));
            Ok(())
        }
    }

    #[async_trait]
    impl HubPublisher for Recorder {
        async fn publish(&self, message: &CanonicalMessage) -> Result<(), TransportError> {
            self.hub.lock().unwrap().push(message.clone());
            Ok(())
        }
    }

    fn converter_with(config: Config, recorder: Recorder) -> (MessageConverter, Arc<Recorder>) {
        let recorder = Arc::new(recorder);
        let confirmations = Arc::new(ConfirmationManager::new(
            Formatter::new(config.format.group_message_format.clone()),
            Arc::clone(&recorder) as Arc<dyn GroupSender>,
            Arc::clone(&recorder) as Arc<dyn HubPublisher>,
        ));
        let im = Arc::clone(&recorder) as Arc<dyn GroupSender>;
        let converter = MessageConverter::new(&config, confirmations, im);
        (converter, recorder)
    }

    fn converter(config: Config) -> (MessageConverter, Arc<Recorder>) {
        converter_with(config, Recorder::default())
    }

    fn group_message(user_id: i64, group_id: i64, text: &str) -> InboundEvent {
        let raw = json!({
            "post_type": "message",
            "message_type": "group",
            "user_id": user_id,
            "group_id": group_id,
            "message": text,
            "sender": {"nickname": "nick", "card": ""}
        });
        match InboundFrame::parse(&raw.to_string()).unwrap() {
            InboundFrame::Event(event) => *event,
            InboundFrame::Response(_) => unreachable!(),
        }
    }

    #[test]
    fn test_parse_command() {
        assert_eq!(parse_command("!!command "), CommandLine::Bare);
        assert_eq!(
            parse_command("!!command server_1"),
            CommandLine::Targeted {
                execute_at: "server_1",
                command: "",
            }
        );
        assert_eq!(
            parse_command("!!command server_1 say hello world"),
            CommandLine::Targeted {
                execute_at: "server_1",
                command: "say hello world",
            }
        );
    }

    #[test]
    fn test_command_execution_detection() {
        let event = |detail: &str| CanonicalMessage::event("s", detail);
        assert!(is_command_execution(&event("Steve EXECUTED COMMAND /tp")));
        assert!(is_command_execution(&event("console command -> list")));
        assert!(!is_command_execution(&event("Steve joined")));
        assert!(!is_command_execution(&CanonicalMessage::chat(
            "s",
            "a",
            "player executed"
        )));
    }

    #[tokio::test]
    async fn test_chat_gets_group_target_and_template() {
        let mut config = Config::default();
        config.format.group_message_format = "[QQ] {message}".to_string();
        let (c, _) = converter(config);

        let msg = c.inbound(&group_message(1, 555, "hello")).await.unwrap();
        assert_eq!(msg.content, MessageContent::Chat("[QQ] hello".to_string()));
        assert_eq!(msg.routing_target.as_deref(), Some("group_555"));
        assert_eq!(msg.sender, "nick");
        assert_eq!(msg.origin, Config::default().grunichat.client_id);
    }

    #[tokio::test]
    async fn test_non_message_and_private_events_ignored() {
        let (c, _) = converter(Config::default());
        let mut notice = group_message(1, 2, "x");
        notice.post_type = "notice".to_string();
        assert!(c.inbound(&notice).await.is_none());

        let mut private = group_message(1, 2, "x");
        private.message_type = "private".to_string();
        assert!(c.inbound(&private).await.is_none());
    }

    #[tokio::test]
    async fn test_targeted_command() {
        let (c, _) = converter(Config::default());
        let msg = c
            .inbound(&group_message(1, 2, "!!command survival say hi all"))
            .await
            .unwrap();
        assert_eq!(msg.content, MessageContent::Command("say hi all".to_string()));
        assert_eq!(msg.routing_target.as_deref(), Some("survival"));
    }

    #[tokio::test]
    async fn test_bare_marker_is_chat() {
        let (c, _) = converter(Config::default());
        let msg = c.inbound(&group_message(1, 2, "!!command ")).await.unwrap();
        assert_eq!(msg.content, MessageContent::Chat("!!command ".to_string()));
    }

    #[tokio::test]
    async fn test_unauthorized_command_gets_denial() {
        let mut config = Config::default();
        config.command.require_permission = true;
        config.command.authorized_users = vec![99];
        let denial = config.command.permission_denied_msg.clone();
        let (c, rec) = converter(config);

        let out = c.inbound(&group_message(1, 2, "!!command s stop")).await;
        assert!(out.is_none());
        assert_eq!(*rec.group.lock().unwrap(), vec![(2, denial)]);
    }

    #[tokio::test]
    async fn test_sentinel_parks_command_and_prompts() {
        let (c, rec) = converter(Config::default());
        let out = c
            .inbound(&group_message(1, 2, "!!command i_confirm_all_client reset"))
            .await;
        assert!(out.is_none());
        assert_eq!(c.confirmations.pending_count().await, 1);
        assert!(rec.group.lock().unwrap()[0].1.contains("reset"));

        // The affirm reply is consumed, and the command goes to the hub.
        assert!(c.inbound(&group_message(1, 2, "yes")).await.is_none());
        assert_eq!(rec.hub.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_sentinel_without_command_parks_empty_command() {
        let (c, rec) = converter(Config::default());
        let out = c
            .inbound(&group_message(1, 2, "!!command i_confirm_all_client"))
            .await;
        assert!(out.is_none());
        assert_eq!(c.confirmations.pending_count().await, 1);
        assert_eq!(
            *rec.group.lock().unwrap(),
            vec![(2, "@nick 您要执行命令：\n请回复 '确认' 或 '取消'".to_string())]
        );
        assert!(rec.hub.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_target_without_command_is_empty_command() {
        let (c, rec) = converter(Config::default());
        let msg = c
            .inbound(&group_message(1, 2, "!!command survival"))
            .await
            .unwrap();
        assert_eq!(msg.content, MessageContent::Command(String::new()));
        assert_eq!(msg.routing_target.as_deref(), Some("survival"));
        assert_eq!(c.confirmations.pending_count().await, 0);
        assert!(rec.group.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stale_affirm_is_forwarded_as_chat() {
        let (c, rec) = converter(Config::default());
        let t0 = DateTime::parse_from_rfc3339("2024-05-01T12:00:00Z")
            .unwrap()
            .with_timezone(&Utc);

        let parked = c
            .inbound_at(
                &group_message(1, 2, "!!command i_confirm_all_client reset"),
                t0,
            )
            .await;
        assert!(parked.is_none());

        let late = t0 + chrono::Duration::seconds(301);
        let msg = c.inbound_at(&group_message(1, 2, "yes"), late).await.unwrap();
        assert_eq!(msg.content, MessageContent::Chat("yes".to_string()));
        assert_eq!(msg.routing_target.as_deref(), Some("group_2"));

        assert!(rec.hub.lock().unwrap().is_empty());
        assert_eq!(
            rec.group.lock().unwrap().last().map(|(g, t)| (*g, t.clone())),
            Some((2, EXPIRED_NOTICE.to_string()))
        );
        assert_eq!(c.confirmations.pending_count().await, 0);
    }

    #[tokio::test]
    async fn test_blacklisted_command_gets_no_reply() {
        let mut config = Config::default();
        config.filter.blacklist_users = vec![7];
        config.command.require_permission = true;
        let (c, rec) = converter(config);

        let out = c
            .inbound(&group_message(7, 2, "!!command survival stop"))
            .await;
        assert!(out.is_none());
        assert!(rec.group.lock().unwrap().is_empty());
        assert!(rec.hub.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_blacklisted_affirm_leaves_pending_entry() {
        let mut config = Config::default();
        config.filter.blacklist_users = vec![7];
        let (c, rec) = converter(config);
        c.confirmations
            .request_confirmation(7, 2, "nick", "reset", "!!command i_confirm_all_client reset")
            .await;
        rec.group.lock().unwrap().clear();

        assert!(c.inbound(&group_message(7, 2, "yes")).await.is_none());
        assert!(rec.hub.lock().unwrap().is_empty());
        assert!(rec.group.lock().unwrap().is_empty());
        assert_eq!(c.confirmations.pending_count().await, 1);
    }

    #[tokio::test]
    async fn test_outbound_routing() {
        let mut config = Config::default();
        config.filter.service_groups = vec![10, 20, 10];
        let (c, rec) = converter(config);

        let chat = || CanonicalMessage::chat("survival", "Steve", "hi");

        let direct = chat().with_target("group_42");
        assert_eq!(c.outbound(&direct).await.delivered, 1);

        let broadcast = CanonicalMessage::event("survival", "Steve joined");
        assert_eq!(c.outbound(&broadcast).await.delivered, 2);

        let bad = chat().with_target("group_abc");
        assert_eq!(c.outbound(&bad).await, OutboundReport::default());

        let other = chat().with_target("server_lobby");
        assert_eq!(c.outbound(&other).await.attempted(), 0);

        assert_eq!(
            *rec.group.lock().unwrap(),
            vec![
                (42, "<[survival] Steve> hi".to_string()),
                (10, "<[survival]> Steve joined".to_string()),
                (20, "<[survival]> Steve joined".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_commands_from_hub_not_delivered() {
        let (c, rec) = converter(Config::default());
        let cmd = CanonicalMessage::command("hub", "ops", "stop").with_target("group_1");
        assert_eq!(c.outbound(&cmd).await, OutboundReport::default());
        assert!(rec.group.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_command_execution_events_skipped_when_enabled() {
        let mut config = Config::default();
        config.filter.service_groups = vec![10, 20];
        config.filter.filter_command_executions = true;
        let (c, rec) = converter(config);

        let report = c
            .outbound(&CanonicalMessage::event("s", "Steve executed command /give"))
            .await;
        assert_eq!(report.skipped, 2);
        assert!(rec.group.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_failed_group_does_not_stop_fanout() {
        let mut config = Config::default();
        config.filter.service_groups = vec![10, 20, 30];
        let (c, rec) = converter_with(
            config,
            Recorder {
                failing_group: Some(20),
                ..Recorder::default()
            },
        );

        let report = c.outbound(&CanonicalMessage::chat("s", "a", "hi")).await;
        assert_eq!(
            report,
            OutboundReport {
                delivered: 2,
                failed: 1,
                skipped: 0,
            }
        );
        assert_eq!(rec.group.lock().unwrap().len(), 2);
    }
}
