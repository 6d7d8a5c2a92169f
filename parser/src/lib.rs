pub mod earley;
pub mod ffi;
mod logging;

pub use earley::{
    allocation_report, print_allocation_report, Family, Grammar, GrammarBuilder, Label, Node,
    NodeRef, Nonterminal, ParseError, Parser, ParserStats, ProdIdx, Production, Sym, TokenMatcher,
    MAX_PRODUCTION_LEN,
};
pub use logging::Logger;

#[macro_export]
macro_rules! loginfo {
    ($logger:expr, $($arg:tt)*) => {
        if $logger.level_enabled(2) {
            use std::fmt::Write;
            writeln!($logger, $($arg)*).unwrap();
        }
    };
}

#[macro_export]
macro_rules! logwarn {
    ($logger:expr, $($arg:tt)*) => {
        if $logger.level_enabled(1) {
            use std::fmt::Write;
            $logger.write_str("Warning: ").unwrap();
            writeln!($logger, $($arg)*).unwrap();
        }
    };
}
