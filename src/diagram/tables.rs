//! Box and arrow tables for each provider diagram
//!
//! Every state identifier has one box. Arrows are keyed by the literal pair
//! `"(prev box)->(curr box)"`. Several pairs may share one arrow key when the
//! diagram draws a single arrow for transitions coming from different boxes.

use crate::fsm::{EmailStateId, OAuthStateId, ProviderId, StateTag};
use std::collections::HashMap;

/// One drawn arrow between two boxes
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArrowSpec {
    pub key: String,
    pub from_state: &'static str,
    pub to_state: &'static str,
}

const EMAIL_ARROWS: &[(&str, &str, &str)] = &[
    ("Idle", "SubmittingToBackend", "submit"),
    ("SubmittingToBackend", "WaitingForUserToClickLink", "link-sent"),
    ("SubmittingToBackend", "BadCredential", "send-failed"),
    ("SubmittingToBackend", "SignedIn", "password-accepted"),
    ("WaitingForUserToClickLink", "Idle", "restart"),
    ("BadCredential", "Idle", "credential-changed"),
    ("Idle", "LinkOpenedSameContext", "same-context"),
    ("WaitingForUserToClickLink", "LinkOpenedSameContext", "same-context"),
    ("Idle", "LinkOpenedDifferentContext", "different-context"),
    ("WaitingForUserToClickLink", "LinkOpenedDifferentContext", "different-context"),
    ("LinkOpenedSameContext", "SignedIn", "link-verified"),
    ("LinkOpenedSameContext", "AuthFailed", "link-rejected"),
    ("LinkOpenedDifferentContext", "WaitingForReenteredCredential", "prompt-reentry"),
    ("WaitingForReenteredCredential", "Authorizing", "reentered"),
    ("Authorizing", "SignedIn", "authorized"),
    ("Authorizing", "AuthFailed", "authorization-failed"),
    ("AuthFailed", "Idle", "retry"),
    ("SignedIn", "Idle", "logout"),
];

const OAUTH_ARROWS: &[(&str, &str, &str)] = &[
    ("Idle", "RedirectingToProvider", "login"),
    ("RedirectingToProvider", "Authorizing", "returned"),
    ("Authorizing", "SignedIn", "authorized"),
    ("Authorizing", "AuthFailed", "failed"),
    ("AuthFailed", "Idle", "retry"),
    ("SignedIn", "Idle", "logout"),
];

/// `WaitingForUserToClickLink` -> `waiting-for-user-to-click-link`
fn kebab_case(tag: &str) -> String {
    let mut out = String::with_capacity(tag.len() + 8);
    for (i, c) in tag.chars().enumerate() {
        if c.is_ascii_uppercase() {
            if i > 0 {
                out.push('-');
            }
            out.push(c.to_ascii_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}

/// Lookup key of an arrow
pub fn pair_key(prev_box: &str, curr_box: &str) -> String {
    format!("({})->({})", prev_box, curr_box)
}

#[derive(Debug, Clone)]
pub struct DiagramTable {
    provider: ProviderId,
    /// (state tag, box key), in state declaration order
    boxes: Vec<(&'static str, String)>,
    arrows: Vec<ArrowSpec>,
    /// "(prev box)->(curr box)" -> arrow key
    lookup: HashMap<String, String>,
}

impl DiagramTable {
    pub fn for_provider(provider: ProviderId) -> Self {
        match provider {
            ProviderId::Email => Self::build(
                provider,
                EmailStateId::all().iter().map(|id| id.as_str()),
                EMAIL_ARROWS,
            ),
            _ => Self::build(
                provider,
                OAuthStateId::all().iter().map(|id| id.as_str()),
                OAUTH_ARROWS,
            ),
        }
    }

    fn build(
        provider: ProviderId,
        states: impl Iterator<Item = &'static str>,
        arrows: &[(&'static str, &'static str, &'static str)],
    ) -> Self {
        let boxes: Vec<(&'static str, String)> = states
            .map(|tag| (tag, format!("{}-box-{}", provider, kebab_case(tag))))
            .collect();

        let mut table = Self {
            provider,
            boxes,
            arrows: Vec::with_capacity(arrows.len()),
            lookup: HashMap::new(),
        };

        for &(from, to, name) in arrows {
            let key = format!("{}-arrow-{}", provider, name);
            let pair = match (table.box_for(from), table.box_for(to)) {
                (Some(from_box), Some(to_box)) => Some(pair_key(from_box, to_box)),
                _ => None,
            };
            if let Some(pair) = pair {
                table.lookup.insert(pair, key.clone());
            }
            table.arrows.push(ArrowSpec {
                key,
                from_state: from,
                to_state: to,
            });
        }
        table
    }

    pub fn provider(&self) -> ProviderId {
        self.provider
    }

    pub fn box_for(&self, state: &str) -> Option<&str> {
        self.boxes
            .iter()
            .find(|(tag, _)| *tag == state)
            .map(|(_, key)| key.as_str())
    }

    /// Arrow drawn for `prev -> curr`, `None` when the diagram has no such arrow
    pub fn arrow_for(&self, prev_box: &str, curr_box: &str) -> Option<&str> {
        self.lookup
            .get(&pair_key(prev_box, curr_box))
            .map(String::as_str)
    }

    pub fn boxes(&self) -> impl Iterator<Item = (&'static str, &str)> {
        self.boxes.iter().map(|(tag, key)| (*tag, key.as_str()))
    }

    pub fn arrows(&self) -> &[ArrowSpec] {
        &self.arrows
    }

    /// Every element key the diagram resource has to provide
    pub fn element_keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.boxes.iter().map(|(_, key)| key.as_str()).collect();
        for arrow in &self.arrows {
            if !keys.contains(&arrow.key.as_str()) {
                keys.push(arrow.key.as_str());
            }
        }
        keys
    }
}
