//! Plain-text transcripts of space histories, used for export.

use chrono::{DateTime, Local};
use lloom_llm::ModelDescriptor;

use crate::message::{Message, Role, Timestamp};
use crate::space::Space;

const MESSAGE_RULE: &str = "\n\n---\n\n";
const SECTION_BREAK: &str = "\n\n\n";
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

fn format_timestamp(timestamp: Timestamp) -> String {
    timestamp
        .to_local()
        .map(|local| local.format(TIMESTAMP_FORMAT).to_string())
        .unwrap_or_else(|| timestamp.as_millis().to_string())
}

fn message_label(message: &Message) -> String {
    match (message.role, message.model.as_deref()) {
        (Role::User, _) => "User".to_string(),
        (Role::Assistant, Some(model)) if !model.trim().is_empty() => {
            format!("Assistant ({model})")
        }
        (Role::Assistant, _) => "Assistant".to_string(),
    }
}

pub fn format_message(message: &Message) -> String {
    format!(
        "### {}\n{}\n\n{}",
        message_label(message),
        format_timestamp(message.timestamp),
        message.content
    )
}

/// Renders one history. An empty history renders to an empty string; callers
/// are expected to check [`Space::has_history`] first.
pub fn format_space(space: &Space) -> String {
    space
        .messages()
        .iter()
        .map(format_message)
        .collect::<Vec<_>>()
        .join(MESSAGE_RULE)
}

/// Section title: the model's display name when known, else the 1-based
/// position of the space.
pub fn section_title(space: &Space, index: usize, models: &[ModelDescriptor]) -> String {
    models
        .iter()
        .find(|model| model.id == space.selected_model())
        .map(|model| model.name.clone())
        .unwrap_or_else(|| format!("Space {}", index + 1))
}

/// Renders every space that has history, one titled section each.
///
/// Returns `None` when there is nothing to export, so callers can tell
/// "no content" apart from an empty document.
pub fn format_all(spaces: &[Space], models: &[ModelDescriptor]) -> Option<String> {
    let sections = spaces
        .iter()
        .enumerate()
        .filter(|(_, space)| space.has_history())
        .map(|(index, space)| {
            format!(
                "## {}\n\n{}",
                section_title(space, index, models),
                format_space(space)
            )
        })
        .collect::<Vec<_>>();

    if sections.is_empty() {
        None
    } else {
        Some(sections.join(SECTION_BREAK))
    }
}

pub fn export_file_name(now: DateTime<Local>) -> String {
    format!("lloom-chat-{}.md", now.format("%Y%m%d-%H%M%S"))
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use lloom_llm::static_models;

    use super::*;
    use crate::ids::SpaceId;

    fn space_with(model: &str, messages: Vec<Message>) -> Space {
        let mut space = Space::new(SpaceId::new_v7(), model);
        for message in messages {
            match message.role {
                Role::User => space.begin_submission(message),
                Role::Assistant => space.settle_success(message),
            }
        }
        space
    }

    #[test]
    fn empty_space_formats_to_nothing() {
        let space = space_with("openai/gpt-4o", Vec::new());
        assert!(format_space(&space).is_empty());
    }

    #[test]
    fn labels_and_rules_between_messages() {
        let space = space_with(
            "openai/gpt-4o",
            vec![
                Message::user("ping"),
                Message::assistant("pong", "GPT-4o"),
                Message::assistant("anonymous", ""),
            ],
        );

        let text = format_space(&space);
        let blocks = text.split(MESSAGE_RULE).collect::<Vec<_>>();

        assert_eq!(blocks.len(), 3);
        assert!(blocks[0].starts_with("### User\n"));
        assert!(blocks[0].ends_with("\n\nping"));
        assert!(blocks[1].starts_with("### Assistant (GPT-4o)\n"));
        assert!(blocks[1].ends_with("\n\npong"));
        assert!(blocks[2].starts_with("### Assistant\n"));
    }

    #[test]
    fn timestamp_line_is_human_readable() {
        let message = Message {
            timestamp: Timestamp::from_millis(1_700_000_000_000),
            ..Message::user("hi")
        };

        let expected = Local
            .timestamp_millis_opt(1_700_000_000_000)
            .unwrap()
            .format(TIMESTAMP_FORMAT)
            .to_string();
        assert_eq!(format_message(&message), format!("### User\n{expected}\n\nhi"));
    }

    #[test]
    fn all_empty_is_nothing_to_export() {
        let spaces = vec![
            space_with("openai/gpt-4o", Vec::new()),
            space_with("mistralai/mistral-large", Vec::new()),
        ];
        assert_eq!(format_all(&spaces, &static_models()), None);
        assert_eq!(format_all(&[], &static_models()), None);
    }

    #[test]
    fn sections_skip_empty_spaces_and_fall_back_to_position() {
        let spaces = vec![
            space_with("openai/gpt-4o", vec![Message::user("first")]),
            space_with("mistralai/mistral-large", Vec::new()),
            space_with("vendor/unlisted", vec![Message::user("third")]),
        ];

        let text = format_all(&spaces, &static_models()).unwrap();
        let sections = text.split(SECTION_BREAK).collect::<Vec<_>>();

        assert_eq!(sections.len(), 2);
        assert!(sections[0].starts_with("## GPT-4o\n\n### User"));
        assert!(sections[1].starts_with("## Space 3\n\n### User"));
        assert!(!text.contains("Mistral Large"));
    }

    #[test]
    fn export_name_embeds_time() {
        let now = Local.with_ymd_and_hms(2024, 5, 1, 9, 30, 5).unwrap();
        assert_eq!(export_file_name(now), "lloom-chat-20240501-093005.md");
    }
}
