//! Rebuild the nested section tree from flat section and edge rows.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::model::{Section, SectionHierarchyEdge};

/// What to do with an edge whose child section is not in the input.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MissingChildPolicy {
    /// Drop the reference silently.
    #[default]
    Skip,
    /// Drop the reference and add a warning to the tree.
    Report,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RenderOptions {
    pub missing_child: MissingChildPolicy,
}

/// A section with its reconstructed descendants.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SectionRenderingNode {
    pub section: Section,
    /// Direct children only, in sibling order.
    pub immediate_children: Vec<Section>,
    pub child_nodes: Vec<SectionRenderingNode>,
    /// No children and no hierarchy membership.
    pub is_standalone: bool,
}

impl SectionRenderingNode {
    /// All descendants in pre-order.
    pub fn flatten(&self) -> Vec<&Section> {
        let mut out = Vec::new();
        for child in &self.child_nodes {
            out.push(&child.section);
            out.extend(child.flatten());
        }
        out
    }

    /// Number of levels below this node.
    pub fn depth(&self) -> usize {
        self.child_nodes.iter().map(|c| c.depth() + 1).max().unwrap_or(0)
    }
}

/// Top-level nodes in document order plus anything noticed on the way.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RenderingTree {
    pub nodes: Vec<SectionRenderingNode>,
    pub warnings: Vec<String>,
}

impl RenderingTree {
    /// Every section reachable from the top level, pre-order.
    pub fn flatten(&self) -> Vec<&Section> {
        let mut out = Vec::new();
        for node in &self.nodes {
            out.push(&node.section);
            out.extend(node.flatten());
        }
        out
    }
}

struct Builder<'s> {
    by_id: HashMap<i64, &'s Section>,
    children: HashMap<i64, Vec<&'s SectionHierarchyEdge>>,
    options: RenderOptions,
    warnings: Vec<String>,
    visited: HashSet<i64>,
}

impl<'s> Builder<'s> {
    fn node(&mut self, section: &'s Section, path: &mut HashSet<i64>) -> SectionRenderingNode {
        let id = section.id.unwrap_or_default();
        path.insert(id);
        self.visited.insert(id);

        let edges = self.children.get(&id).cloned().unwrap_or_default();
        let mut built: Vec<(Option<i32>, SectionRenderingNode)> = Vec::with_capacity(edges.len());
        for edge in edges {
            let Some(&child) = self.by_id.get(&edge.child_section_id) else {
                if self.options.missing_child == MissingChildPolicy::Report {
                    self.warnings.push(format!(
                        "Section {} references missing child {}",
                        id, edge.child_section_id
                    ));
                }
                continue;
            };
            if path.contains(&edge.child_section_id) {
                warn!("Hierarchy cycle at section {} -> {}", id, edge.child_section_id);
                self.warnings.push(format!(
                    "Cycle: section {} is an ancestor of its parent {}",
                    edge.child_section_id, id
                ));
                continue;
            }
            built.push((edge.sequence_number, self.node(child, path)));
        }

        // Stable: siblings without a sequence keep their relative order, last.
        built.sort_by_key(|(seq, _)| (seq.is_none(), *seq));

        path.remove(&id);
        let child_nodes: Vec<SectionRenderingNode> = built.into_iter().map(|(_, n)| n).collect();
        SectionRenderingNode {
            section: section.clone(),
            immediate_children: child_nodes.iter().map(|n| n.section.clone()).collect(),
            child_nodes,
            is_standalone: false,
        }
    }

    /// Top-level node; standalone when none of its children resolved.
    fn top_level(&mut self, section: &'s Section) -> SectionRenderingNode {
        let mut node = self.node(section, &mut HashSet::new());
        node.is_standalone = node.child_nodes.is_empty();
        node
    }
}

/// Walk up first parents from an unreached section until a section repeats.
/// Every unreached section has an unreached parent, so the walk ends on a
/// cycle member.
fn cycle_entry(start: i64, parents: &HashMap<i64, i64>) -> i64 {
    let mut seen = HashSet::new();
    let mut current = start;
    while seen.insert(current) {
        match parents.get(&current) {
            Some(&parent) => current = parent,
            None => break,
        }
    }
    current
}

/// Build the rendering tree for one document.
///
/// `sections` must be in original document order. Sections that appear as
/// the child of a known parent are reached only through that parent; every
/// other section is emitted at the top level, in input order, either as a
/// standalone node or as the root of its subtree.
pub fn build_rendering_tree(
    sections: &[Section],
    edges: &[SectionHierarchyEdge],
    options: RenderOptions,
) -> RenderingTree {
    let by_id: HashMap<i64, &Section> = sections
        .iter()
        .filter_map(|s| s.id.map(|id| (id, s)))
        .collect();

    let mut children: HashMap<i64, Vec<&SectionHierarchyEdge>> = HashMap::new();
    let mut parents: HashMap<i64, i64> = HashMap::new();
    let mut pairs: HashSet<(i64, i64)> = HashSet::new();
    for edge in edges {
        if !by_id.contains_key(&edge.parent_section_id) {
            continue;
        }
        // A repeated pair keeps its first sequence number.
        if !pairs.insert((edge.parent_section_id, edge.child_section_id)) {
            continue;
        }
        children.entry(edge.parent_section_id).or_default().push(edge);
        if by_id.contains_key(&edge.child_section_id) {
            parents.entry(edge.child_section_id).or_insert(edge.parent_section_id);
        }
    }

    let mut builder = Builder {
        by_id,
        children,
        options,
        warnings: Vec::new(),
        visited: HashSet::new(),
    };

    let mut nodes = Vec::new();
    for section in sections {
        let Some(id) = section.id else {
            continue;
        };
        if parents.contains_key(&id) {
            continue;
        }
        nodes.push(builder.top_level(section));
    }

    // Sections whose every ancestor is a child too sit on a cycle with no
    // way in from the top level.
    for section in sections {
        let Some(id) = section.id else {
            continue;
        };
        if builder.visited.contains(&id) {
            continue;
        }
        let entry = cycle_entry(id, &parents);
        let Some(&root) = builder.by_id.get(&entry) else {
            continue;
        };
        warn!("Section {} is only reachable through a cycle", entry);
        builder
            .warnings
            .push(format!("Section {} is only reachable through a cycle; shown at top level", entry));
        nodes.push(builder.top_level(root));
    }

    RenderingTree {
        nodes,
        warnings: builder.warnings,
    }
}
