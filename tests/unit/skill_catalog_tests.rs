//! Unit tests for the skill catalog: lookup, filtering and prompt composition.

use skill_relay::models::skill::Skill;
use skill_relay::skills::SkillCatalog;
use skill_relay::AppError;

fn catalog() -> SkillCatalog {
    SkillCatalog::new([
        Skill::new("s2", "pdf", "Fill and extract PDF forms"),
        Skill::new("s1", "git-commit", "Write a commit message"),
        Skill::new("", "review", "Review a pull request"),
    ])
}

// ── Catalog ─────────────────────────────────────────────────────────────────

/// Skills are sorted by name and missing ids take the name.
#[test]
fn skills_are_sorted_and_ids_filled() {
    let catalog = catalog();
    let names: Vec<_> = catalog.skills().iter().map(|s| s.name.as_str()).collect();

    assert_eq!(names, vec!["git-commit", "pdf", "review"]);
    assert_eq!(catalog.len(), 3);
    assert_eq!(catalog.get("review").map(|s| s.name.as_str()), Some("review"));
    assert!(catalog.get("missing").is_none());
}

/// Filtering matches name or description case-insensitively.
#[test]
fn filter_matches_name_or_description() {
    let catalog = catalog();

    let by_name: Vec<_> = catalog.filter("GIT").iter().map(|s| s.id.as_str()).collect();
    assert_eq!(by_name, vec!["s1"]);

    let by_description: Vec<_> = catalog.filter("pull").iter().map(|s| s.id.as_str()).collect();
    assert_eq!(by_description, vec!["review"]);
}

/// A leading slash is ignored and an empty query matches everything.
#[test]
fn filter_accepts_slash_and_empty_queries() {
    let catalog = catalog();

    assert_eq!(catalog.filter("/pdf").len(), 1);
    assert_eq!(catalog.filter("").len(), 3);
    assert_eq!(catalog.filter("/").len(), 3);
    assert!(catalog.filter("nothing-like-this").is_empty());
}

// ── Prompt composition ──────────────────────────────────────────────────────

/// A skill prefixes its selector to the text.
#[test]
fn compose_prompt_with_skill() {
    let catalog = catalog();

    assert_eq!(
        catalog.compose_prompt("  fix typo ", Some("s1")).expect("prompt"),
        "/git-commit fix typo"
    );
    assert_eq!(
        catalog.compose_prompt("", Some("s2")).expect("prompt"),
        "/pdf",
        "a skill alone is a valid prompt"
    );
}

/// Without a skill the trimmed text is sent as-is.
#[test]
fn compose_prompt_without_skill() {
    let prompt = catalog().compose_prompt("\thello\n", None).expect("prompt");
    assert_eq!(prompt, "hello");
}

/// Unknown skills and empty prompts are rejected.
#[test]
fn compose_prompt_rejects_bad_input() {
    let catalog = catalog();

    assert_eq!(
        catalog.compose_prompt("x", Some("nope")),
        Err(AppError::UnknownSkill("nope".into()))
    );
    assert!(matches!(
        catalog.compose_prompt("   ", None),
        Err(AppError::InvalidInput(_))
    ));
}
