use super::tables::DiagramTable;
use crate::fsm::ProviderId;
use petgraph::Direction;
use petgraph::prelude::EdgeRef;
use petgraph::stable_graph::{EdgeIndex, NodeIndex, StableGraph};
use std::collections::HashMap;

/// A state box of the diagram
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagramBox {
    pub key: String,
    pub state: &'static str,
}

/// An arrow of the diagram. Arrows sharing a key are highlighted together.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiagramArrow {
    pub key: String,
    pub from_state: &'static str,
    pub to_state: &'static str,
}

/// The directed graph drawn for one provider machine.
///
/// Nodes are state boxes and edges the arrows between them. Built from the
/// provider's [`DiagramTable`], it gives the Graphviz rendering used by the CLI.
pub struct DiagramGraph {
    pub graph: StableGraph<DiagramBox, DiagramArrow>,

    /// State tag -> node, so arrows can be linked by state name
    pub box_index: HashMap<&'static str, NodeIndex>,

    pub provider: ProviderId,
}

impl DiagramGraph {
    pub fn new(provider: ProviderId) -> Self {
        Self {
            graph: StableGraph::new(),
            box_index: HashMap::new(),
            provider,
        }
    }

    pub fn from_table(table: &DiagramTable) -> Self {
        let mut graph = Self::new(table.provider());
        for (state, key) in table.boxes() {
            graph.add_box(DiagramBox {
                key: key.to_string(),
                state,
            });
        }
        for arrow in table.arrows() {
            graph.add_arrow(DiagramArrow {
                key: arrow.key.clone(),
                from_state: arrow.from_state,
                to_state: arrow.to_state,
            });
        }
        graph
    }

    /// Adds a box to the graph and updates the box index.
    pub fn add_box(&mut self, diagram_box: DiagramBox) -> NodeIndex {
        let state = diagram_box.state;
        let node_index = self.graph.add_node(diagram_box);
        self.box_index.insert(state, node_index);
        node_index
    }

    /// Adds an arrow between two existing boxes.
    pub fn add_arrow(&mut self, arrow: DiagramArrow) -> Option<EdgeIndex> {
        if let (Some(&from_idx), Some(&to_idx)) = (
            self.box_index.get(arrow.from_state),
            self.box_index.get(arrow.to_state),
        ) {
            Some(self.graph.add_edge(from_idx, to_idx, arrow))
        } else {
            None
        }
    }

    /// Arrows leaving the box of the given state
    pub fn outgoing_arrows(&self, state: &str) -> Vec<&DiagramArrow> {
        if let Some(&node_idx) = self.box_index.get(state) {
            self.graph
                .edges_directed(node_idx, Direction::Outgoing)
                .filter_map(|edge| self.graph.edge_weight(edge.id()))
                .collect()
        } else {
            Vec::new()
        }
    }

    /// Boxes no arrow leads to, reachable only by restoring or forcing a state
    pub fn unreachable_boxes(&self) -> Vec<&DiagramBox> {
        self.graph
            .node_indices()
            .filter(|&idx| self.graph.edges_directed(idx, Direction::Incoming).count() == 0)
            .filter_map(|idx| self.graph.node_weight(idx))
            .collect()
    }

    /// Export to DOT format for Graphviz, with the highlighted elements filled
    pub fn to_dot(&self, highlighted_box: Option<&str>, highlighted_arrow: Option<&str>) -> String {
        let mut dot = format!("digraph {} {{\n", self.provider);
        dot.push_str("  rankdir=LR;\n");
        dot.push_str("  node [shape=box, style=\"rounded,filled\"];\n\n");

        let mut nodes: Vec<&DiagramBox> = self
            .graph
            .node_indices()
            .filter_map(|idx| self.graph.node_weight(idx))
            .collect();
        nodes.sort_by(|a, b| a.key.cmp(&b.key));
        for diagram_box in nodes {
            let color = if highlighted_box == Some(diagram_box.key.as_str()) {
                "gold"
            } else {
                "white"
            };
            dot.push_str(&format!(
                "  \"{}\" [label=\"{}\", fillcolor=\"{}\"];\n",
                diagram_box.key, diagram_box.state, color
            ));
        }

        dot.push('\n');

        for edge_idx in self.graph.edge_indices() {
            if let Some((from_idx, to_idx)) = self.graph.edge_endpoints(edge_idx)
                && let (Some(from_box), Some(to_box), Some(arrow)) = (
                    self.graph.node_weight(from_idx),
                    self.graph.node_weight(to_idx),
                    self.graph.edge_weight(edge_idx),
                )
            {
                let style = if highlighted_arrow == Some(arrow.key.as_str()) {
                    ", color=\"gold\", penwidth=2"
                } else {
                    ""
                };
                dot.push_str(&format!(
                    "  \"{}\" -> \"{}\" [id=\"{}\"{}];\n",
                    from_box.key, to_box.key, arrow.key, style
                ));
            }
        }

        dot.push_str("}\n");
        dot
    }

    pub fn stats(&self) -> GraphStats {
        let mut arrow_keys: Vec<&str> = self
            .graph
            .edge_indices()
            .filter_map(|idx| self.graph.edge_weight(idx))
            .map(|a| a.key.as_str())
            .collect();
        arrow_keys.sort_unstable();
        arrow_keys.dedup();

        GraphStats {
            total_boxes: self.graph.node_count(),
            total_edges: self.graph.edge_count(),
            distinct_arrows: arrow_keys.len(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphStats {
    pub total_boxes: usize,
    pub total_edges: usize,
    pub distinct_arrows: usize,
}
