//! Unit tests for the message and skill models.

use skill_relay::models::message::{Message, Role};
use skill_relay::models::skill::Skill;

// ── Message ─────────────────────────────────────────────────────────────────

/// Constructors set the role and generate distinct ids.
#[test]
fn message_constructors_set_role_and_unique_id() {
    let user = Message::user("hi");
    let assistant = Message::assistant("hello");

    assert_eq!(user.role, Role::User);
    assert!(!user.is_assistant());
    assert!(assistant.is_assistant());
    assert_ne!(user.id, assistant.id, "ids must be unique");
}

/// Messages serialize with a snake_case role.
#[test]
fn message_serializes_role_in_snake_case() {
    let message = Message::assistant("hello");
    let value = serde_json::to_value(&message).expect("serialize");

    assert_eq!(value["role"], "assistant");
    assert_eq!(value["content"], "hello");
    assert!(value["created_at"].is_string());
}

// ── Skill ───────────────────────────────────────────────────────────────────

/// The selector is the name prefixed with a slash.
#[test]
fn skill_selector_prefixes_slash() {
    let skill = Skill::new("id", "git-commit", "");
    assert_eq!(skill.selector(), "/git-commit");
}

/// Display names capitalise each dash-separated word.
#[test]
fn skill_display_name_is_title_cased() {
    assert_eq!(Skill::new("", "git-commit", "").display_name(), "Git Commit");
    assert_eq!(Skill::new("", "pdf", "").display_name(), "Pdf");
    assert_eq!(
        Skill::new("", "web--SEARCH", "").display_name(),
        "Web Search"
    );
}

/// A skill record without id or description deserializes with defaults.
#[test]
fn skill_deserializes_with_defaults() {
    let skill: Skill = serde_json::from_str(r#"{"name":"review"}"#).expect("deserialize");

    assert_eq!(skill.name, "review");
    assert!(skill.id.is_empty());
    assert!(skill.description.is_empty());
}
