mod alloc;
mod forest;
mod grammar;
mod parser;

pub use alloc::{
    allocation_report, print_allocation_report, AllocCounter, COLUMN_AC, FAMILY_AC, GRAMMAR_AC,
    HNODE_AC, NODE_AC, NONTERMINAL_AC, PRODUCTION_AC, STATE_AC,
};
pub use forest::{Family, Label, Node, NodeRef};
pub use grammar::{
    Grammar, GrammarBuilder, Nonterminal, ProdIdx, Production, Sym, MAX_PRODUCTION_LEN,
};
pub use parser::{ParseError, Parser, ParserStats, TokenMatcher};
