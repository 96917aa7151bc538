use crate::core::types::{AttributeFilter, AttributeOp, TermType};
use crate::query::filter::FilterQuery;

/// A single keyword leaf: what to match, how fuzzily, and where.
#[derive(Debug, Clone)]
pub struct TermSpec {
    pub keyword: String,
    pub term_type: TermType,
    /// Edit-distance bound used when the plan runs its fuzzy pass.
    pub edit_threshold: u8,
    pub attribute_filter: AttributeFilter,
    pub boost: f32,
}

/// A phrase leaf: all keywords must match the record, and some alignment
/// of their positions must fit within `slop`.
#[derive(Debug, Clone)]
pub struct PhraseSpec {
    pub keywords: Vec<String>,
    pub slop: u32,
    pub attribute_filter: AttributeFilter,
    pub boost: f32,
}

/// A geo leaf; evaluated against the pluggable quad-tree interface.
#[derive(Debug, Clone)]
pub struct GeoSpec {
    pub min_lat: f64,
    pub min_lng: f64,
    pub max_lat: f64,
    pub max_lng: f64,
}

#[derive(Debug, Clone)]
pub enum LogicalNodeKind {
    And,
    Or,
    Not,
    Term(TermSpec),
    Phrase(PhraseSpec),
    Geo(GeoSpec),
}

#[derive(Debug, Clone)]
pub struct LogicalNode {
    pub kind: LogicalNodeKind,
    pub children: Vec<usize>,
}

/// Ascending or descending post-sort on a refining attribute.
#[derive(Debug, Clone)]
pub struct SortSpec {
    pub attribute: String,
    pub descending: bool,
}

#[derive(Debug, Clone)]
pub enum FacetRequest {
    /// One bucket per distinct value of the attribute.
    Categorical { attribute: String },
    /// Fixed-width buckets over [start, end), plus under/overflow buckets.
    Range { attribute: String, start: f64, end: f64, gap: f64 },
}

/// The caller-built query tree plus its post-processing directives. Nodes
/// live in an arena; children are indices.
#[derive(Debug, Clone)]
pub struct LogicalPlan {
    pub nodes: Vec<LogicalNode>,
    pub root: Option<usize>,
    pub top_k: usize,
    /// ACL role; records carrying an ACL must list it.
    pub role_id: Option<String>,
    pub filter: Option<FilterQuery>,
    pub facets: Vec<FacetRequest>,
    pub sort: Option<SortSpec>,
    pub max_time_ms: Option<u64>,
    /// Original query text, used to key the feedback index.
    pub query_text: Option<String>,
}

impl LogicalPlan {
    pub fn new(top_k: usize) -> Self {
        LogicalPlan {
            nodes: Vec::new(),
            root: None,
            top_k,
            role_id: None,
            filter: None,
            facets: Vec::new(),
            sort: None,
            max_time_ms: None,
            query_text: None,
        }
    }

    fn push(&mut self, kind: LogicalNodeKind, children: Vec<usize>) -> usize {
        self.nodes.push(LogicalNode { kind, children });
        self.nodes.len() - 1
    }

    pub fn term(&mut self, spec: TermSpec) -> usize {
        self.push(LogicalNodeKind::Term(spec), Vec::new())
    }

    pub fn phrase(&mut self, spec: PhraseSpec) -> usize {
        self.push(LogicalNodeKind::Phrase(spec), Vec::new())
    }

    pub fn geo(&mut self, spec: GeoSpec) -> usize {
        self.push(LogicalNodeKind::Geo(spec), Vec::new())
    }

    pub fn and(&mut self, children: Vec<usize>) -> usize {
        self.push(LogicalNodeKind::And, children)
    }

    pub fn or(&mut self, children: Vec<usize>) -> usize {
        self.push(LogicalNodeKind::Or, children)
    }

    pub fn not(&mut self, child: usize) -> usize {
        self.push(LogicalNodeKind::Not, vec![child])
    }

    pub fn set_root(&mut self, node: usize) {
        self.root = Some(node);
    }

    pub fn node(&self, idx: usize) -> &LogicalNode {
        &self.nodes[idx]
    }

    /// Largest edit threshold anywhere in the tree; zero means the fuzzy
    /// pass would be identical to the exact pass and is skipped.
    pub fn max_edit_threshold(&self) -> u8 {
        self.nodes
            .iter()
            .map(|n| match &n.kind {
                LogicalNodeKind::Term(t) => t.edit_threshold,
                _ => 0,
            })
            .max()
            .unwrap_or(0)
    }

    /// Deterministic serialization of the tree and its directives, used as
    /// the result-cache key.
    pub fn unique_string(&self) -> String {
        let mut out = String::new();
        if let Some(root) = self.root {
            self.write_node(root, &mut out);
        }
        out.push_str(&format!("|k={}", self.top_k));
        if let Some(role) = &self.role_id {
            out.push_str(&format!("|role={}", role));
        }
        if let Some(filter) = &self.filter {
            out.push_str(&format!("|fq={}", filter.source()));
        }
        for facet in &self.facets {
            match facet {
                FacetRequest::Categorical { attribute } => {
                    out.push_str(&format!("|facet={}", attribute));
                }
                FacetRequest::Range { attribute, start, end, gap } => {
                    out.push_str(&format!("|facet={}:{}:{}:{}", attribute, start, end, gap));
                }
            }
        }
        if let Some(sort) = &self.sort {
            out.push_str(&format!("|sort={}:{}", sort.attribute, if sort.descending { "desc" } else { "asc" }));
        }
        out
    }

    fn write_node(&self, idx: usize, out: &mut String) {
        let node = &self.nodes[idx];
        match &node.kind {
            LogicalNodeKind::And => out.push_str("AND("),
            LogicalNodeKind::Or => out.push_str("OR("),
            LogicalNodeKind::Not => out.push_str("NOT("),
            LogicalNodeKind::Term(t) => {
                out.push_str(&format!(
                    "T[{}:{}:{}:{}:{:?}:{:?}]",
                    t.keyword,
                    match t.term_type {
                        TermType::Prefix => "p",
                        TermType::Complete => "c",
                    },
                    t.edit_threshold,
                    t.boost,
                    t.attribute_filter.attrs,
                    t.attribute_filter.op,
                ));
                return;
            }
            LogicalNodeKind::Phrase(p) => {
                out.push_str(&format!("P[{}:{}:{:?}]", p.keywords.join(" "), p.slop, p.attribute_filter.attrs));
                return;
            }
            LogicalNodeKind::Geo(g) => {
                out.push_str(&format!("G[{},{},{},{}]", g.min_lat, g.min_lng, g.max_lat, g.max_lng));
                return;
            }
        }
        for (i, &child) in node.children.iter().enumerate() {
            if i > 0 {
                out.push(',');
            }
            self.write_node(child, out);
        }
        out.push(')');
    }

    /// Instant-search convenience: AND of the words, every word a Complete
    /// term except the last, which matches as a prefix (the user is still
    /// typing it).
    pub fn from_keywords(words: &[&str], top_k: usize, edit_threshold: u8) -> Self {
        let mut plan = LogicalPlan::new(top_k);
        let mut terms = Vec::new();
        for (i, word) in words.iter().enumerate() {
            let term_type = if i + 1 == words.len() { TermType::Prefix } else { TermType::Complete };
            terms.push(plan.term(TermSpec {
                keyword: word.to_string(),
                term_type,
                edit_threshold,
                attribute_filter: AttributeFilter { attrs: Vec::new(), op: AttributeOp::Or },
                boost: 1.0,
            }));
        }
        match terms.len() {
            0 => {}
            1 => plan.set_root(terms[0]),
            _ => {
                let root = plan.and(terms);
                plan.set_root(root);
            }
        }
        plan.query_text = Some(words.join(" "));
        plan
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_string_is_deterministic_and_distinguishes_plans() {
        let a = LogicalPlan::from_keywords(&["pink", "floyd"], 10, 1);
        let b = LogicalPlan::from_keywords(&["pink", "floyd"], 10, 1);
        let c = LogicalPlan::from_keywords(&["pink", "floyd"], 20, 1);
        let d = LogicalPlan::from_keywords(&["pink"], 10, 1);
        assert_eq!(a.unique_string(), b.unique_string());
        assert_ne!(a.unique_string(), c.unique_string());
        assert_ne!(a.unique_string(), d.unique_string());
    }

    #[test]
    fn from_keywords_marks_only_last_term_prefix() {
        let plan = LogicalPlan::from_keywords(&["pink", "flo"], 10, 2);
        let root = plan.root.unwrap();
        let children = &plan.node(root).children;
        match (&plan.node(children[0]).kind, &plan.node(children[1]).kind) {
            (LogicalNodeKind::Term(a), LogicalNodeKind::Term(b)) => {
                assert_eq!(a.term_type, TermType::Complete);
                assert_eq!(b.term_type, TermType::Prefix);
            }
            _ => panic!("expected two terms"),
        }
    }
}
