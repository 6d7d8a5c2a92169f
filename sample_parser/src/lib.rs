use std::collections::{HashMap, HashSet};
use std::rc::Rc;

use earley_forest::{Grammar, GrammarBuilder, Node, NodeRef, Sym, TokenMatcher};

/// Matches terminal `t` for token position `i` iff `tokens[i] == t`.
/// Works with the default token list, where the token argument passed
/// to the matcher is the position itself.
pub struct SeqMatcher {
    pub tokens: Vec<u32>,
}

impl TokenMatcher for SeqMatcher {
    fn matches(&self, _handle: u32, token: u32, terminal: u32) -> bool {
        self.tokens.get(token as usize) == Some(&terminal)
    }
}

/// An ambiguous clause grammar in the shape of natural language:
///
/// ```text
/// S0  -> S
/// S   -> Y | S OgS
/// Y   -> noun verb Adv        (terminals 1=noun, 2=verb, 4=adverb)
/// OgS -> and S                (terminal 3="and")
/// Adv -> adverb | epsilon
/// ```
///
/// "and" chains can associate either way, so multi-clause sentences
/// parse ambiguously. Returns the grammar and its root.
pub fn demo_grammar() -> (Grammar, Sym) {
    let mut b = GrammarBuilder::new();
    let s0 = b.nonterminal("S0");
    let s = b.nonterminal("S");
    let y = b.nonterminal("Y");
    let og_s = b.nonterminal("OgS");
    let adv = b.nonterminal("Adv");
    let noun = b.terminal(1);
    let verb = b.terminal(2);
    let and = b.terminal(3);
    let adverb = b.terminal(4);
    b.production(s0, &[s]);
    b.production(s, &[y]);
    b.production(s, &[s, og_s]);
    b.production(y, &[noun, verb, adv]);
    b.production(og_s, &[and, s]);
    b.production(adv, &[adverb]);
    b.production(adv, &[]);
    let grammar = b.build(s0).expect("demo grammar is well-formed");
    (grammar, s0)
}

/// "noun verb and noun verb adverb and noun verb": three clauses
/// joined by "and".
pub fn demo_tokens() -> Vec<u32> {
    vec![1, 2, 3, 1, 2, 4, 3, 1, 2]
}

/// Every node reachable from `root`, each exactly once.
pub fn collect_nodes(root: &NodeRef) -> Vec<NodeRef> {
    let mut seen: HashSet<*const Node> = HashSet::new();
    let mut stack = vec![root.clone()];
    let mut nodes = Vec::new();
    while let Some(node) = stack.pop() {
        if !seen.insert(Rc::as_ptr(&node)) {
            continue;
        }
        for family in node.families().iter() {
            if let Some(left) = family.left() {
                stack.push(left.clone());
            }
            if let Some(right) = family.right() {
                stack.push(right.clone());
            }
        }
        nodes.push(node);
    }
    nodes
}

/// Structural checks every returned forest must satisfy: one node per
/// label, no duplicate family entries, and spans nested inside the
/// input.
pub fn assert_forest_invariants(root: &NodeRef, num_tokens: u32) {
    let nodes = collect_nodes(root);

    let mut by_label: HashMap<_, *const Node> = HashMap::new();
    for node in &nodes {
        let label = *node.label();
        assert!(label.start <= label.end, "span inverted: {:?}", label);
        assert!(label.end <= num_tokens, "span past input: {:?}", label);
        if let Some(prev) = by_label.insert(label, Rc::as_ptr(node)) {
            assert_eq!(
                prev,
                Rc::as_ptr(node),
                "two distinct nodes share label {:?}",
                label
            );
        }
    }

    for node in &nodes {
        let families = node.families();
        for (i, a) in families.iter().enumerate() {
            for b in families.iter().skip(i + 1) {
                let same_left = match (a.left(), b.left()) {
                    (None, None) => true,
                    (Some(x), Some(y)) => Rc::ptr_eq(x, y),
                    _ => false,
                };
                let same_right = match (a.right(), b.right()) {
                    (None, None) => true,
                    (Some(x), Some(y)) => Rc::ptr_eq(x, y),
                    _ => false,
                };
                assert!(
                    !(a.prod() == b.prod() && same_left && same_right),
                    "duplicate family entry under {:?}",
                    node.label()
                );
            }
        }
    }

    assert_eq!(root.label().start, 0);
    assert_eq!(root.label().end, num_tokens);
}

/// The forest rendered with node identity erased, for comparing the
/// structure of two parses.
pub fn forest_shape(root: &NodeRef, grammar: &Grammar) -> String {
    root.dump(grammar)
}
