//! User profile stages: loading, best-effort fact extraction, and upserts.

use std::sync::Arc;

use async_trait::async_trait;

use crate::node::{Node, NodeContext, NodeError, SideEffect};
use crate::state::{ConversationState, StateDelta, UserProfile};
use crate::storage::Storage;

/// Loads the stored profile; first contact is the absence of one, and a
/// skeleton record is seeded so the next turn is no longer first contact.
pub struct CheckUserProfile {
    storage: Arc<dyn Storage>,
}

impl CheckUserProfile {
    #[must_use]
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl Node for CheckUserProfile {
    fn side_effect(&self) -> SideEffect {
        SideEffect::ExternalRead
    }

    async fn run(
        &self,
        state: &ConversationState,
        _ctx: NodeContext,
    ) -> Result<StateDelta, NodeError> {
        let profile = self.storage.load_profile(&state.user_identifier).await?;
        let mut delta = StateDelta::new();
        match profile {
            Some(profile) => {
                delta.first_contact = Some(false);
                delta.profile = Some(profile);
            }
            None => {
                self.storage
                    .upsert_profile(&state.user_identifier, &UserProfile::default())
                    .await?;
                delta.first_contact = Some(true);
            }
        }
        Ok(delta)
    }
}

/// Best-effort scan of the inbound text for a self-introduced name.
///
/// Additive only: nothing is extracted once the profile already has a
/// name. Pattern matching over words, no model call.
pub struct ExtractUserInfo;

impl ExtractUserInfo {
    #[must_use]
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Node for ExtractUserInfo {
    fn side_effect(&self) -> SideEffect {
        SideEffect::PureTransform
    }

    async fn run(
        &self,
        state: &ConversationState,
        _ctx: NodeContext,
    ) -> Result<StateDelta, NodeError> {
        let mut delta = StateDelta::new();
        let already_named = state
            .user_profile
            .as_ref()
            .is_some_and(UserProfile::has_name);
        if already_named {
            return Ok(delta);
        }
        if let Some(name) = extract_name(&state.current_input, state.first_contact) {
            tracing::debug!(%name, "name extracted from inbound message");
            delta.extracted_name = Some(name);
        }
        Ok(delta)
    }
}

const NAME_PREFIXES: [&[&str]; 6] = [
    &["my", "name", "is"],
    &["i", "am"],
    &["i'm"],
    &["call", "me"],
    &["this", "is"],
    &["it's"],
];

const GREETINGS: [&str; 7] = ["hi", "hello", "hey", "thanks", "ok", "yes", "no"];

fn clean_word(word: &str) -> &str {
    word.trim_matches(|c: char| !c.is_alphanumeric())
}

fn is_name_word(word: &str) -> bool {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.is_uppercase() && chars.all(|c| c.is_alphabetic()),
        None => false,
    }
}

/// Find a self-introduced name in free text.
///
/// Matches "my name is X", "i'm X", "call me X" and friends; on a first
/// contact turn a bare capitalized one-or-two word message is also treated
/// as a name reply (the agent just asked for one).
fn extract_name(input: &str, first_contact: bool) -> Option<String> {
    let words: Vec<&str> = input.split_whitespace().collect();
    let lowered: Vec<String> = words.iter().map(|w| clean_word(w).to_lowercase()).collect();

    for prefix in NAME_PREFIXES {
        for start in 0..lowered.len() {
            if lowered[start..].len() < prefix.len() {
                break;
            }
            if lowered[start..start + prefix.len()] == *prefix {
                let name_words: Vec<&str> = words[start + prefix.len()..]
                    .iter()
                    .map(|w| clean_word(w))
                    .take_while(|w| is_name_word(w))
                    .take(3)
                    .collect();
                if !name_words.is_empty() {
                    let candidate = name_words.join(" ");
                    if (2..=50).contains(&candidate.len()) {
                        return Some(candidate);
                    }
                }
            }
        }
    }

    // A bare name in reply to the first-contact name request.
    if first_contact && (1..=2).contains(&words.len()) {
        let cleaned: Vec<&str> = words.iter().map(|w| clean_word(w)).collect();
        if cleaned.iter().all(|w| is_name_word(w))
            && !cleaned
                .iter()
                .any(|w| GREETINGS.contains(&w.to_lowercase().as_str()))
        {
            let candidate = cleaned.join(" ");
            if (2..=50).contains(&candidate.len()) {
                return Some(candidate);
            }
        }
    }

    None
}

/// Persists extracted profile facts; only fills fields that are empty, so
/// concurrent or repeated extraction cannot clobber known data.
pub struct SaveUserProfile {
    storage: Arc<dyn Storage>,
}

impl SaveUserProfile {
    #[must_use]
    pub fn new(storage: Arc<dyn Storage>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl Node for SaveUserProfile {
    fn side_effect(&self) -> SideEffect {
        SideEffect::ExternalWrite
    }

    async fn run(
        &self,
        state: &ConversationState,
        _ctx: NodeContext,
    ) -> Result<StateDelta, NodeError> {
        let Some(name) = state.extracted_name.clone() else {
            return Ok(StateDelta::new());
        };

        let mut profile = state.user_profile.clone().unwrap_or_default();
        if profile.has_name() {
            return Ok(StateDelta::new());
        }
        profile.name = Some(name);
        self.storage
            .upsert_profile(&state.user_identifier, &profile)
            .await?;
        tracing::info!(user = %state.user_identifier, "profile name saved");

        let mut delta = StateDelta::new();
        delta.profile = Some(profile);
        Ok(delta)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::NodeId;
    use crate::state::Channel;
    use crate::storage::InMemoryStorage;

    fn ctx() -> NodeContext {
        NodeContext {
            node: NodeId::ExtractUserInfo,
            step: 1,
        }
    }

    #[test]
    fn extracts_introduced_names() {
        assert_eq!(
            extract_name("Hi, my name is Maria", false),
            Some("Maria".to_string())
        );
        assert_eq!(
            extract_name("I'm John Silva", false),
            Some("John Silva".to_string())
        );
        assert_eq!(extract_name("call me Ana", false), Some("Ana".to_string()));
        assert_eq!(extract_name("what are your hours?", false), None);
        assert_eq!(extract_name("my name is", false), None);
    }

    #[test]
    fn bare_name_only_counts_on_first_contact() {
        assert_eq!(extract_name("Carlos", true), Some("Carlos".to_string()));
        assert_eq!(extract_name("Carlos", false), None);
        assert_eq!(extract_name("Hello", true), None);
        assert_eq!(extract_name("ok", true), None);
    }

    #[tokio::test]
    async fn first_contact_seeds_a_profile() {
        let storage = Arc::new(InMemoryStorage::new());
        let node = CheckUserProfile::new(storage.clone());
        let state = ConversationState::new_turn("c1", Channel::Web, "u1", "hi");

        let delta = node.run(&state, ctx()).await.unwrap();
        assert_eq!(delta.first_contact, Some(true));
        assert!(storage.load_profile("u1").await.unwrap().is_some());

        // Second turn: no longer first contact.
        let delta = node.run(&state, ctx()).await.unwrap();
        assert_eq!(delta.first_contact, Some(false));
    }

    #[tokio::test]
    async fn save_profile_never_overwrites_a_name() {
        let storage = Arc::new(InMemoryStorage::new());
        let node = SaveUserProfile::new(storage.clone());
        let mut state = ConversationState::new_turn("c1", Channel::Web, "u1", "I'm Eve");
        state.extracted_name = Some("Eve".to_string());
        state.user_profile = Some(UserProfile {
            name: Some("Alice".to_string()),
            ..Default::default()
        });

        node.run(&state, ctx()).await.unwrap();
        assert!(storage.load_profile("u1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_profile_is_idempotent() {
        let storage = Arc::new(InMemoryStorage::new());
        let node = SaveUserProfile::new(storage.clone());
        let mut state = ConversationState::new_turn("c1", Channel::Web, "u1", "I'm Eve");
        state.extracted_name = Some("Eve".to_string());

        node.run(&state, ctx()).await.unwrap();
        node.run(&state, ctx()).await.unwrap();
        let profile = storage.load_profile("u1").await.unwrap().unwrap();
        assert_eq!(profile.name.as_deref(), Some("Eve"));
    }
}
