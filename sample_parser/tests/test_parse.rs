use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use earley_forest::{Grammar, GrammarBuilder, NodeRef, ParseError, Parser, TokenMatcher};
use sample_parser::*;

fn quiet_parser(grammar: Arc<Grammar>, tokens: Vec<u32>) -> Parser {
    Parser::new(grammar, Box::new(SeqMatcher { tokens }))
}

/// Keeps the matcher inspectable after it has been boxed into the
/// parser.
struct Shared<T>(Rc<T>);

impl<T: TokenMatcher> TokenMatcher for Shared<T> {
    fn matches(&self, handle: u32, token: u32, terminal: u32) -> bool {
        self.0.matches(handle, token, terminal)
    }
}

/// SeqMatcher that records which token positions the parser asked
/// about.
struct RecordingMatcher {
    tokens: Vec<u32>,
    queried: RefCell<Vec<u32>>,
}

impl TokenMatcher for RecordingMatcher {
    fn matches(&self, _handle: u32, token: u32, terminal: u32) -> bool {
        self.queried.borrow_mut().push(token);
        self.tokens.get(token as usize) == Some(&terminal)
    }
}

#[test]
fn ambiguous_clause_sentence() {
    let (grammar, root_sym) = demo_grammar();
    let grammar = Arc::new(grammar);
    let tokens = demo_tokens();
    let num_tokens = tokens.len() as u32;
    let mut parser = quiet_parser(grammar.clone(), tokens);

    let root = parser.parse(0, root_sym, num_tokens, None).unwrap();
    assert_eq!(root.label().sym, root_sym);
    assert_eq!(root.label().dot, 0);
    assert_eq!(root.label().prod, None);
    assert_eq!((root.label().start, root.label().end), (0, num_tokens));

    // The root has the single S0 -> S step; the ambiguity sits in the
    // S node spanning the whole sentence, which packs both the left-
    // and the right-associated "and" combination.
    let families = root.families();
    assert_eq!(families.len(), 1);
    let s_node = families[0].right().unwrap();
    assert!(s_node.families().len() >= 2);
    drop(families);

    assert_eq!(root.num_combinations(), 2);
    assert_forest_invariants(&root, num_tokens);
}

#[test]
fn parse_is_deterministic() {
    let (grammar, root_sym) = demo_grammar();
    let grammar = Arc::new(grammar);
    let num_tokens = demo_tokens().len() as u32;

    let mut shapes = Vec::new();
    for _ in 0..2 {
        let mut parser = quiet_parser(grammar.clone(), demo_tokens());
        let root = parser.parse(0, root_sym, num_tokens, None).unwrap();
        shapes.push(forest_shape(&root, &grammar));
    }
    assert_eq!(shapes[0], shapes[1]);
}

#[test]
fn forest_independent_of_production_insertion_order() {
    // The clause grammar again, with every production registered in the
    // opposite order. That flips production ids (which feed the state
    // hash) and the order the predictor pushes alternatives, so states
    // land in different bins and the agenda walks them differently --
    // but the chart contents and the forest must not change.
    let (grammar, root_sym) = demo_grammar();

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
    b.production(adv, &[]);
    b.production(adv, &[adverb]);
    b.production(og_s, &[and, s]);
    b.production(y, &[noun, verb, adv]);
    b.production(s, &[s, og_s]);
    b.production(s, &[y]);
    b.production(s0, &[s]);
    let reversed = b.build(s0).unwrap();

    let num_tokens = demo_tokens().len() as u32;
    let mut parser = quiet_parser(Arc::new(grammar), demo_tokens());
    let mut rev_parser = quiet_parser(Arc::new(reversed), demo_tokens());
    let root = parser.parse(0, root_sym, num_tokens, None).unwrap();
    let rev_root = rev_parser.parse(0, s0, num_tokens, None).unwrap();

    assert_eq!(root.num_combinations(), rev_root.num_combinations());
    let num_families =
        |nodes: &[NodeRef]| nodes.iter().map(|n| n.families().len()).sum::<usize>();
    let nodes = collect_nodes(&root);
    let rev_nodes = collect_nodes(&rev_root);
    assert_eq!(nodes.len(), rev_nodes.len());
    assert_eq!(num_families(&nodes), num_families(&rev_nodes));
    assert_forest_invariants(&rev_root, num_tokens);
}

#[test]
fn catalan_count_independent_of_production_order() {
    // S -> S S | a declared both ways round yields the same five trees.
    let mut counts = Vec::new();
    for flipped in [false, true] {
        let mut b = GrammarBuilder::new();
        let s = b.nonterminal("S");
        let a = b.terminal(1);
        if flipped {
            b.production(s, &[a]);
            b.production(s, &[s, s]);
        } else {
            b.production(s, &[s, s]);
            b.production(s, &[a]);
        }
        let mut parser = quiet_parser(Arc::new(b.build(s).unwrap()), vec![1, 1, 1, 1]);
        let root = parser.parse(0, s, 4, None).unwrap();
        counts.push(root.num_combinations());
    }
    assert_eq!(counts, vec![5, 5]);
}

#[test]
fn empty_input_is_rejected() {
    let (grammar, root_sym) = demo_grammar();
    let mut parser = quiet_parser(Arc::new(grammar), vec![]);
    let err = parser.parse(0, root_sym, 0, None).unwrap_err();
    assert!(matches!(err, ParseError::InvalidArgument(_)));
    assert_eq!(err.error_token(), 0);
}

#[test]
fn mismatched_terminal_fails_at_first_token() {
    let mut b = GrammarBuilder::new();
    let s = b.nonterminal("S");
    let one = b.terminal(1);
    b.terminal(2);
    b.production(s, &[one]);
    let mut parser = quiet_parser(Arc::new(b.build(s).unwrap()), vec![2]);
    let err = parser.parse(0, s, 1, None).unwrap_err();
    assert_eq!(err, ParseError::Rejected { token: 0 });
}

#[test]
fn epsilon_alternative_not_taken_for_nonempty_span() {
    // S -> A; A -> epsilon | 1; input [1]: the spanning derivation goes
    // through A -> 1 only.
    let mut b = GrammarBuilder::new();
    let s = b.nonterminal("S");
    let a = b.nonterminal("A");
    let one = b.terminal(1);
    b.production(s, &[a]);
    b.production(a, &[]);
    b.production(a, &[one]);
    let grammar = Arc::new(b.build(s).unwrap());
    let mut parser = quiet_parser(grammar.clone(), vec![1]);
    let root = parser.parse(0, s, 1, None).unwrap();
    assert_eq!(root.num_combinations(), 1);
    assert_forest_invariants(&root, 1);
    for node in collect_nodes(&root) {
        for family in node.families().iter() {
            let epsilon = family.left().is_none() && family.right().is_none();
            assert!(!epsilon, "epsilon family under {:?}", node.label());
        }
    }
}

#[test]
fn catalan_count_of_binary_bracketings() {
    // S -> S S | a over [a, a, a, a]: five distinct trees.
    let mut b = GrammarBuilder::new();
    let s = b.nonterminal("S");
    let a = b.terminal(1);
    b.production(s, &[s, s]);
    b.production(s, &[a]);
    let grammar = Arc::new(b.build(s).unwrap());
    let mut parser = quiet_parser(grammar.clone(), vec![1, 1, 1, 1]);
    let root = parser.parse(0, s, 4, None).unwrap();
    assert_eq!(root.num_combinations(), 5);
    assert_forest_invariants(&root, 4);
}

#[test]
fn sentinel_column_is_never_matched() {
    let (grammar, root_sym) = demo_grammar();
    let tokens = demo_tokens();
    let num_tokens = tokens.len() as u32;
    let matcher = Rc::new(RecordingMatcher {
        tokens,
        queried: RefCell::new(Vec::new()),
    });
    let mut parser = Parser::new(Arc::new(grammar), Box::new(Shared(matcher.clone())));
    parser.parse(0, root_sym, num_tokens, None).unwrap();
    // With the default token list the matcher sees positions. The
    // sentinel column sits at position num_tokens and must refuse
    // matches without consulting the host.
    let queried = matcher.queried.borrow();
    assert!(!queried.is_empty());
    assert!(queried.iter().all(|&t| t < num_tokens));
}

#[test]
fn binary_round_trip_parses_identically() {
    let (grammar, root_sym) = demo_grammar();
    let bytes = grammar.to_binary();
    let loaded = Arc::new(Grammar::from_binary(&bytes).unwrap());
    assert_eq!(loaded.root(), root_sym);

    let num_tokens = demo_tokens().len() as u32;
    let mut parser = quiet_parser(Arc::new(grammar), demo_tokens());
    let mut loaded_parser = quiet_parser(loaded.clone(), demo_tokens());

    let root = parser.parse(0, root_sym, num_tokens, None).unwrap();
    let loaded_root = loaded_parser.parse(0, loaded.root(), num_tokens, None).unwrap();

    assert_eq!(root.num_combinations(), loaded_root.num_combinations());
    assert_eq!(
        collect_nodes(&root).len(),
        collect_nodes(&loaded_root).len()
    );
    assert_forest_invariants(&loaded_root, num_tokens);
}

#[test]
fn explicit_token_list_reaches_matcher() {
    // Token values are opaque to the parser; the matcher sees them
    // verbatim.
    let mut b = GrammarBuilder::new();
    let s = b.nonterminal("S");
    let one = b.terminal(1);
    let two = b.terminal(2);
    b.production(s, &[one, two]);
    let grammar = Arc::new(b.build(s).unwrap());

    struct ValueMatcher;
    impl TokenMatcher for ValueMatcher {
        fn matches(&self, _handle: u32, token: u32, terminal: u32) -> bool {
            (token == 100 && terminal == 1) || (token == 200 && terminal == 2)
        }
    }

    let mut parser = Parser::new(grammar, Box::new(ValueMatcher));
    let root = parser.parse(0, s, 2, Some(&[100, 200])).unwrap();
    assert_eq!((root.label().start, root.label().end), (0, 2));
    assert!(parser.parse(0, s, 2, Some(&[200, 100])).is_err());
}
