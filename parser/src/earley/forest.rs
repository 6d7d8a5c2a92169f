use std::cell::{Ref, RefCell};
use std::collections::HashMap;
use std::fmt::Write;
use std::rc::Rc;

use indexmap::IndexMap;

use super::alloc::{FAMILY_AC, NODE_AC};
use super::grammar::{Grammar, ProdIdx, Sym};

/// Identity of an SPPF node: symbol, dot position, production, and the
/// token span covered. For completed productions `dot` is 0 and `prod`
/// is None, so all productions of a nonterminal deriving the same span
/// share one node; the production that actually fired is recorded in the
/// family entry instead.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct Label {
    pub sym: Sym,
    pub dot: u32,
    pub prod: Option<ProdIdx>,
    pub start: u32,
    pub end: u32,
}

impl Label {
    pub fn new(sym: Sym, dot: u32, prod: Option<ProdIdx>, start: u32, end: u32) -> Label {
        Label {
            sym,
            dot,
            prod,
            start,
            end,
        }
    }
}

pub type NodeRef = Rc<Node>;

/// One alternative derivation of a node: a production and up to two
/// children. Both children absent with a production set denotes an
/// epsilon derivation; an absent left child is the unary case.
#[derive(Debug)]
pub struct Family {
    prod: Option<ProdIdx>,
    left: Option<NodeRef>,
    right: Option<NodeRef>,
}

impl Family {
    pub fn prod(&self) -> Option<ProdIdx> {
        self.prod
    }

    pub fn left(&self) -> Option<&NodeRef> {
        self.left.as_ref()
    }

    pub fn right(&self) -> Option<&NodeRef> {
        self.right.as_ref()
    }
}

impl Drop for Family {
    fn drop(&mut self) {
        FAMILY_AC.free();
    }
}

fn same_child(a: &Option<NodeRef>, b: &Option<NodeRef>) -> bool {
    match (a, b) {
        (None, None) => true,
        (Some(x), Some(y)) => Rc::ptr_eq(x, y),
        _ => false,
    }
}

/// A node of the Shared Packed Parse Forest. Nodes form a DAG: children
/// span strict subranges of their parent, so plain reference counting
/// suffices for the whole forest.
#[derive(Debug)]
pub struct Node {
    label: Label,
    families: RefCell<Vec<Family>>,
}

impl Node {
    pub fn new(label: Label) -> NodeRef {
        NODE_AC.alloc();
        Rc::new(Node {
            label,
            families: RefCell::new(Vec::new()),
        })
    }

    pub fn label(&self) -> &Label {
        &self.label
    }

    /// Token nodes carry a non-negative symbol code (the token id);
    /// nonterminal nodes a negative one.
    pub fn is_token(&self) -> bool {
        !self.label.sym.is_nonterminal()
    }

    pub fn families(&self) -> Ref<'_, Vec<Family>> {
        self.families.borrow()
    }

    /// Insert a family entry unless an identical `(prod, left, right)`
    /// triple is already present.
    pub fn add_family(&self, prod: Option<ProdIdx>, left: Option<NodeRef>, right: Option<NodeRef>) {
        let mut families = self.families.borrow_mut();
        for f in families.iter() {
            if f.prod == prod && same_child(&f.left, &left) && same_child(&f.right, &right) {
                return;
            }
        }
        FAMILY_AC.alloc();
        families.push(Family { prod, left, right });
    }

    /// Number of distinct parse trees packed into this forest, saturating
    /// at `u64::MAX`. Token and empty nodes count 1; otherwise the sum
    /// over families of the product of the children's counts. A node
    /// reached again while its own count is pending indicates a cyclic
    /// grammar (S derives S); such an edge contributes 1.
    pub fn num_combinations(&self) -> u64 {
        fn count(node: &Node, memo: &mut HashMap<*const Node, Option<u64>>) -> u64 {
            if node.is_token() {
                return 1;
            }
            let key = node as *const Node;
            match memo.get(&key) {
                Some(Some(c)) => return *c,
                Some(None) => {
                    debug_assert!(false, "loop in forest at {:?}", node.label);
                    return 1;
                }
                None => {}
            }
            memo.insert(key, None);
            let mut comb: u64 = 0;
            for f in node.families.borrow().iter() {
                let l = f.left.as_ref().map_or(1, |n| count(n, memo));
                let r = f.right.as_ref().map_or(1, |n| count(n, memo));
                comb = comb.saturating_add(l.saturating_mul(r));
            }
            let result = if comb == 0 { 1 } else { comb };
            memo.insert(key, Some(result));
            result
        }
        count(self, &mut HashMap::new())
    }

    /// Indented textual dump of the forest, one label line per node and
    /// an "Option N" header wherever a node packs more than one family.
    pub fn dump(&self, grammar: &Grammar) -> String {
        let mut out = String::new();
        self.dump_into(grammar, 0, &mut out);
        out
    }

    fn dump_into(&self, grammar: &Grammar, indent: usize, out: &mut String) {
        let pad = "  ".repeat(indent);
        let dot_item = self
            .label
            .prod
            .map_or(Sym::END, |p| grammar.prod(p).item(self.label.dot));
        let name = if self.label.sym.is_nonterminal() {
            grammar.name_of(self.label.sym).to_string()
        } else {
            format!("[Token {}]", self.label.sym.code())
        };
        writeln!(
            out,
            "{}Label: {} {} {} {} {}",
            pad, name, self.label.dot, dot_item.code(), self.label.start, self.label.end
        )
        .unwrap();
        let families = self.families.borrow();
        let ambiguous = families.len() > 1;
        for (ix, f) in families.iter().enumerate() {
            if ambiguous {
                writeln!(out, "{}Option {}", pad, ix + 1).unwrap();
            }
            if let Some(left) = &f.left {
                left.dump_into(grammar, indent + 1, out);
            }
            if let Some(right) = &f.right {
                right.dump_into(grammar, indent + 1, out);
            }
        }
    }
}

impl Drop for Node {
    fn drop(&mut self) {
        NODE_AC.free();
    }
}

/// Per-column memoization of forest nodes by label, so that one column's
/// work creates at most one node per label. Reset after each column; the
/// dict's reference is dropped but nodes stay alive through any state or
/// family entry that took a reference.
pub(crate) struct NodeDict {
    nodes: IndexMap<Label, NodeRef>,
}

impl NodeDict {
    pub fn new() -> NodeDict {
        NodeDict {
            nodes: IndexMap::new(),
        }
    }

    pub fn lookup_or_add(&mut self, label: Label) -> NodeRef {
        if let Some(n) = self.nodes.get(&label) {
            return n.clone();
        }
        let n = Node::new(label);
        self.nodes.insert(label, n.clone());
        n
    }

    pub fn reset(&mut self) {
        self.nodes.clear();
    }
}
