//! Diagram mapper - highlight the current state of a machine on its diagram
//!
//! The mapper keeps the last two boxes a machine went through. The newest one is
//! the highlighted box; the pair gives the highlighted arrow. Rendering goes
//! through a [`HighlightSink`] and is deferred until the diagram resource
//! reports it is loaded ([`DiagramMapper::on_ready`]).

use crate::fsm::ProviderId;
use crate::{Error, Result};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

pub mod graph;
pub mod tables;

pub use graph::{DiagramArrow, DiagramBox, DiagramGraph, GraphStats};
pub use tables::{ArrowSpec, DiagramTable, pair_key};

/// Number of boxes remembered for arrow lookup
pub const HISTORY_LEN: usize = 2;

/// Default class added to highlighted elements
pub const DEFAULT_HIGHLIGHT_CLASS: &str = "highlighted";

/// Rendering side channel: toggles classes on named diagram elements
pub trait HighlightSink: Send {
    /// Whether the loaded diagram contains an element with this key
    fn has_element(&self, key: &str) -> bool;

    fn add_class(&mut self, key: &str, class: &str);

    fn remove_class(&mut self, key: &str, class: &str);
}

/// In-memory sink tracking the classes of every known element
#[derive(Debug, Clone, Default)]
pub struct ElementClasses {
    elements: BTreeMap<String, BTreeSet<String>>,
}

impl ElementClasses {
    pub fn new<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            elements: keys
                .into_iter()
                .map(|k| (k.into(), BTreeSet::new()))
                .collect(),
        }
    }

    /// Sink holding every element of the provider's diagram
    pub fn for_provider(provider: ProviderId) -> Self {
        Self::new(DiagramTable::for_provider(provider).element_keys())
    }

    pub fn classes(&self, key: &str) -> Vec<&str> {
        self.elements
            .get(key)
            .map(|c| c.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Keys of the elements carrying the class
    pub fn with_class(&self, class: &str) -> Vec<&str> {
        self.elements
            .iter()
            .filter(|(_, classes)| classes.contains(class))
            .map(|(key, _)| key.as_str())
            .collect()
    }
}

impl HighlightSink for ElementClasses {
    fn has_element(&self, key: &str) -> bool {
        self.elements.contains_key(key)
    }

    fn add_class(&mut self, key: &str, class: &str) {
        if let Some(classes) = self.elements.get_mut(key) {
            classes.insert(class.to_string());
        }
    }

    fn remove_class(&mut self, key: &str, class: &str) {
        if let Some(classes) = self.elements.get_mut(key) {
            classes.remove(class);
        }
    }
}

/// Maps machine transitions to diagram highlights
pub struct DiagramMapper {
    table: DiagramTable,
    highlight_class: String,
    history: VecDeque<String>,
    highlighted_box: Option<String>,
    highlighted_arrow: Option<String>,
    /// What the sink currently shows, so it can be cleared
    rendered: (Option<String>, Option<String>),
    sink: Option<Box<dyn HighlightSink>>,
}

impl DiagramMapper {
    pub fn new(provider: ProviderId) -> Self {
        Self {
            table: DiagramTable::for_provider(provider),
            highlight_class: DEFAULT_HIGHLIGHT_CLASS.to_string(),
            history: VecDeque::with_capacity(HISTORY_LEN + 1),
            highlighted_box: None,
            highlighted_arrow: None,
            rendered: (None, None),
            sink: None,
        }
    }

    pub fn with_highlight_class(mut self, class: impl Into<String>) -> Self {
        self.highlight_class = class.into();
        self
    }

    pub fn provider(&self) -> ProviderId {
        self.table.provider()
    }

    pub fn table(&self) -> &DiagramTable {
        &self.table
    }

    pub fn is_ready(&self) -> bool {
        self.sink.is_some()
    }

    /// Recent boxes, oldest first
    pub fn history(&self) -> Vec<&str> {
        self.history.iter().map(String::as_str).collect()
    }

    pub fn highlighted_box(&self) -> Option<&str> {
        self.highlighted_box.as_deref()
    }

    pub fn highlighted_arrow(&self) -> Option<&str> {
        self.highlighted_arrow.as_deref()
    }

    pub fn arrow_for(&self, prev_box: &str, curr_box: &str) -> Option<&str> {
        self.table.arrow_for(prev_box, curr_box)
    }

    /// Record that the machine entered `state`
    pub fn enqueue(&mut self, state: &str) {
        let Some(box_key) = self.table.box_for(state) else {
            tracing::warn!(
                provider = %self.provider(),
                "No diagram box for state {}",
                state
            );
            return;
        };

        self.history.push_back(box_key.to_string());
        while self.history.len() > HISTORY_LEN {
            self.history.pop_front();
        }

        self.highlighted_box = self.history.back().cloned();
        self.highlighted_arrow = match (self.history.front(), self.history.back()) {
            (Some(prev), Some(curr)) if self.history.len() == HISTORY_LEN => {
                self.table.arrow_for(prev, curr).map(str::to_string)
            }
            _ => None,
        };

        self.render();
    }

    /// The diagram resource finished loading.
    ///
    /// Fails when the resource lacks an element of this provider's diagram.
    pub fn on_ready(&mut self, sink: Box<dyn HighlightSink>) -> Result<()> {
        if let Some(missing) = self
            .table
            .element_keys()
            .into_iter()
            .find(|key| !sink.has_element(key))
        {
            return Err(Error::config(format!(
                "Diagram for {} has no element '{}'",
                self.provider(),
                missing
            )));
        }

        self.sink = Some(sink);
        self.rendered = (None, None);
        self.render();
        Ok(())
    }

    fn render(&mut self) {
        let Some(sink) = self.sink.as_mut() else {
            return;
        };

        let (old_box, old_arrow) = &self.rendered;
        for key in [old_box, old_arrow].into_iter().flatten() {
            sink.remove_class(key, &self.highlight_class);
        }
        for key in [&self.highlighted_box, &self.highlighted_arrow]
            .into_iter()
            .flatten()
        {
            sink.add_class(key, &self.highlight_class);
        }

        self.rendered = (self.highlighted_box.clone(), self.highlighted_arrow.clone());
    }

    pub fn graph(&self) -> DiagramGraph {
        DiagramGraph::from_table(&self.table)
    }

    /// Graphviz rendering with the current highlight
    pub fn to_dot(&self) -> String {
        self.graph()
            .to_dot(self.highlighted_box(), self.highlighted_arrow())
    }
}

impl std::fmt::Debug for DiagramMapper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiagramMapper")
            .field("provider", &self.provider())
            .field("history", &self.history)
            .field("highlighted_box", &self.highlighted_box)
            .field("highlighted_arrow", &self.highlighted_arrow)
            .field("ready", &self.is_ready())
            .finish()
    }
}
