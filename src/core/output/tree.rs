//! The hierarchical sample model built once per tick.
//!
//! A tree is an ordered list of sections. Each section holds either
//! measurements or subsections, each subsection either measurements or
//! sub-subsections, and sub-subsections hold measurements only. Insertion order
//! is emission order for every sink.
//!
//! All three serializers share the traversal defined here: JSON walks the full
//! structure through [`TreeVisitor`], InfluxDB and Prometheus only need the
//! innermost measurement groups and iterate [`SampleTree::leaf_groups`].

use std::collections::BTreeMap;

use super::measurement::Measurement;

/// Free-form labels attached to subsections and sub-subsections.
pub type Labels = BTreeMap<String, String>;

/// Content of a tree node: measurements or child nodes, never both.
#[derive(Debug, Clone)]
pub enum NodeContent<C> {
    Empty,
    Measurements(Vec<Measurement>),
    Children(Vec<C>),
}

impl<C> Default for NodeContent<C> {
    fn default() -> Self {
        NodeContent::Empty
    }
}

impl<C> NodeContent<C> {
    /// Measurements of this node, empty if it holds children.
    pub fn measurements(&self) -> &[Measurement] {
        match self {
            NodeContent::Measurements(m) => m,
            _ => &[],
        }
    }

    /// Children of this node, empty if it holds measurements.
    pub fn children(&self) -> &[C] {
        match self {
            NodeContent::Children(c) => c,
            _ => &[],
        }
    }

    /// Measurement list to append to, turning an empty node into a
    /// measurement node. `None` if the node already holds children.
    pub(crate) fn measurements_mut(&mut self) -> Option<&mut Vec<Measurement>> {
        if matches!(self, NodeContent::Empty) {
            *self = NodeContent::Measurements(Vec::new());
        }
        match self {
            NodeContent::Measurements(m) => Some(m),
            _ => None,
        }
    }

    /// Child list to append to, turning an empty node into a parent node.
    /// `None` if the node already holds measurements.
    pub(crate) fn children_mut(&mut self) -> Option<&mut Vec<C>> {
        if matches!(self, NodeContent::Empty) {
            *self = NodeContent::Children(Vec::new());
        }
        match self {
            NodeContent::Children(c) => Some(c),
            _ => None,
        }
    }
}

/// Top level node.
#[derive(Debug, Clone)]
pub struct Section {
    pub name: String,
    pub content: NodeContent<Subsection>,
}

impl Section {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_owned(),
            content: NodeContent::Empty,
        }
    }

    /// Raw value of the first direct measurement called `name`.
    pub fn value_of(&self, name: &str) -> Option<&str> {
        self.content
            .measurements()
            .iter()
            .find(|m| m.name() == name)
            .map(|m| m.raw_value())
    }
}

/// Second level node.
#[derive(Debug, Clone)]
pub struct Subsection {
    pub name: String,
    pub labels: Labels,
    pub content: NodeContent<SubSubsection>,
}

impl Subsection {
    pub fn new(name: &str, labels: Labels) -> Self {
        Self {
            name: name.to_owned(),
            labels,
            content: NodeContent::Empty,
        }
    }
}

/// Third level node; always a measurement group.
#[derive(Debug, Clone)]
pub struct SubSubsection {
    pub name: String,
    pub labels: Labels,
    pub measurements: Vec<Measurement>,
}

impl SubSubsection {
    pub fn new(name: &str, labels: Labels) -> Self {
        Self {
            name: name.to_owned(),
            labels,
            measurements: Vec::new(),
        }
    }
}

/// Depth at which a leaf group was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LeafLevel {
    Section,
    Subsection,
    SubSubsection,
}

/// The innermost node of a branch that carries measurements.
#[derive(Debug, Clone, Copy)]
pub struct LeafGroup<'a> {
    /// Name of the enclosing section.
    pub section: &'a str,
    /// Name of the node holding the measurements.
    pub name: &'a str,
    pub level: LeafLevel,
    /// Labels of the node, `None` for section level groups.
    pub labels: Option<&'a Labels>,
    pub measurements: &'a [Measurement],
}

/// Receives the structure of a tree in document order.
///
/// `depth` is 0 for sections, 1 for subsections and 2 for sub-subsections.
pub trait TreeVisitor {
    type Error;

    fn open_node(&mut self, name: &str, depth: usize) -> Result<(), Self::Error>;

    /// Called once for every node that holds measurements, possibly with an
    /// empty slice for a sub-subsection nobody wrote into.
    fn measurements(&mut self, measurements: &[Measurement], depth: usize)
        -> Result<(), Self::Error>;

    fn close_node(&mut self, depth: usize, last: bool) -> Result<(), Self::Error>;
}

/// One tick worth of sections.
#[derive(Debug, Default, Clone)]
pub struct SampleTree {
    sections: Vec<Section>,
}

impl SampleTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sections(&self) -> &[Section] {
        &self.sections
    }

    pub fn section(&self, name: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.name == name)
    }

    pub fn is_empty(&self) -> bool {
        self.sections.is_empty()
    }

    pub fn len(&self) -> usize {
        self.sections.len()
    }

    /// Drops every section, keeping the allocated capacity for the next tick.
    pub fn clear(&mut self) {
        self.sections.clear();
    }

    pub fn capacity(&self) -> usize {
        self.sections.capacity()
    }

    pub(crate) fn sections_mut(&mut self) -> &mut Vec<Section> {
        &mut self.sections
    }

    /// Total number of measurements in the tree.
    pub fn measurement_count(&self) -> usize {
        self.leaf_groups().map(|g| g.measurements.len()).sum()
    }

    /// Iterates the non-empty measurement groups in emission order.
    pub fn leaf_groups(&self) -> LeafGroups<'_> {
        LeafGroups {
            sections: &self.sections,
            sec: 0,
            sub: 0,
            subsub: 0,
        }
    }

    /// Walks the whole structure, including empty nodes.
    pub fn walk<V: TreeVisitor>(&self, visitor: &mut V) -> Result<(), V::Error> {
        let n_sec = self.sections.len();
        for (i, sec) in self.sections.iter().enumerate() {
            visitor.open_node(&sec.name, 0)?;
            match &sec.content {
                NodeContent::Empty => {}
                NodeContent::Measurements(ms) => visitor.measurements(ms, 0)?,
                NodeContent::Children(subs) => {
                    for (j, sub) in subs.iter().enumerate() {
                        visitor.open_node(&sub.name, 1)?;
                        match &sub.content {
                            NodeContent::Empty => {}
                            NodeContent::Measurements(ms) => visitor.measurements(ms, 1)?,
                            NodeContent::Children(subsubs) => {
                                for (k, subsub) in subsubs.iter().enumerate() {
                                    visitor.open_node(&subsub.name, 2)?;
                                    visitor.measurements(&subsub.measurements, 2)?;
                                    visitor.close_node(2, k + 1 == subsubs.len())?;
                                }
                            }
                        }
                        visitor.close_node(1, j + 1 == subs.len())?;
                    }
                }
            }
            visitor.close_node(0, i + 1 == n_sec)?;
        }
        Ok(())
    }
}

/// Iterator over the leaf groups of a [`SampleTree`].
pub struct LeafGroups<'a> {
    sections: &'a [Section],
    sec: usize,
    sub: usize,
    subsub: usize,
}

impl LeafGroups<'_> {
    fn next_section(&mut self) {
        self.sec += 1;
        self.sub = 0;
        self.subsub = 0;
    }

    fn next_subsection(&mut self) {
        self.sub += 1;
        self.subsub = 0;
    }
}

impl<'a> Iterator for LeafGroups<'a> {
    type Item = LeafGroup<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        let sections = self.sections;
        loop {
            let section = sections.get(self.sec)?;
            match &section.content {
                NodeContent::Empty => self.next_section(),
                NodeContent::Measurements(ms) => {
                    self.next_section();
                    if !ms.is_empty() {
                        return Some(LeafGroup {
                            section: &section.name,
                            name: &section.name,
                            level: LeafLevel::Section,
                            labels: None,
                            measurements: ms,
                        });
                    }
                }
                NodeContent::Children(subs) => {
                    let Some(sub) = subs.get(self.sub) else {
                        self.next_section();
                        continue;
                    };
                    match &sub.content {
                        NodeContent::Empty => self.next_subsection(),
                        NodeContent::Measurements(ms) => {
                            self.next_subsection();
                            if !ms.is_empty() {
                                return Some(LeafGroup {
                                    section: &section.name,
                                    name: &sub.name,
                                    level: LeafLevel::Subsection,
                                    labels: Some(&sub.labels),
                                    measurements: ms,
                                });
                            }
                        }
                        NodeContent::Children(subsubs) => {
                            let Some(subsub) = subsubs.get(self.subsub) else {
                                self.next_subsection();
                                continue;
                            };
                            self.subsub += 1;
                            if !subsub.measurements.is_empty() {
                                return Some(LeafGroup {
                                    section: &section.name,
                                    name: &subsub.name,
                                    level: LeafLevel::SubSubsection,
                                    labels: Some(&subsub.labels),
                                    measurements: &subsub.measurements,
                                });
                            }
                        }
                    }
                }
            }
        }
    }
}
