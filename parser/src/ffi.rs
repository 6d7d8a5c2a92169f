//! Stable C ABI. Grammars, parsers and forest roots are handed out as
//! opaque pointers; every `new_*` has a matching `delete_*`. Forest
//! nodes are not thread-safe: a forest must be dumped, counted and
//! released on the thread that parsed it.

use std::ffi::{c_char, CStr};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::ptr::NonNull;
use std::rc::Rc;
use std::sync::Arc;

use crate::earley::{self, Grammar, Node, Parser, TokenMatcher};
use crate::logging::Logger;

/// Host-supplied token/terminal matching predicate. Must be pure with
/// respect to a given (handle, token, terminal) during one parse.
pub type MatchingFn = extern "C" fn(handle: u32, token: u32, terminal: u32) -> bool;

/// Optional host-supplied cache allocator: returns a zero-initialized
/// buffer of at least `size` bytes for the given token, valid until the
/// parse returns, or null to let the parser allocate its own.
pub type CacheAllocFn = extern "C" fn(handle: u32, token: u32, size: u32) -> *mut u8;

struct CallbackMatcher {
    match_fn: MatchingFn,
    alloc_fn: Option<CacheAllocFn>,
}

impl TokenMatcher for CallbackMatcher {
    fn matches(&self, handle: u32, token: u32, terminal: u32) -> bool {
        (self.match_fn)(handle, token, terminal)
    }

    fn alloc_cache(&self, handle: u32, token: u32, size: usize) -> Option<NonNull<u8>> {
        let alloc_fn = self.alloc_fn?;
        NonNull::new(alloc_fn(handle, token, size as u32))
    }
}

// No panic may cross the FFI boundary; anything that slips through the
// library's own error handling turns into the entry point's null/default
// result.
fn ffi_guard<R>(default: R, f: impl FnOnce() -> R) -> R {
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(r) => r,
        Err(_) => default,
    }
}

/// Load a grammar from a binary grammar file. Returns null if the file
/// is missing or malformed. Free with delete_grammar().
#[no_mangle]
pub extern "C" fn new_grammar(path: *const c_char) -> *mut Grammar {
    ffi_guard(std::ptr::null_mut(), || {
        if path.is_null() {
            return std::ptr::null_mut();
        }
        // SAFETY: the caller passes a NUL-terminated path string.
        let path = match unsafe { CStr::from_ptr(path) }.to_str() {
            Ok(p) => p,
            Err(_) => return std::ptr::null_mut(),
        };
        match Grammar::from_binary_file(path) {
            Ok(g) => Arc::into_raw(Arc::new(g)) as *mut Grammar,
            Err(e) => {
                eprintln!("grammar load failed: {}", e);
                std::ptr::null_mut()
            }
        }
    })
}

/// Release one reference to the grammar. The grammar stays alive while
/// any parser created from it exists.
#[no_mangle]
pub extern "C" fn delete_grammar(grammar: *mut Grammar) {
    ffi_guard((), || {
        if !grammar.is_null() {
            // SAFETY: the pointer came from new_grammar().
            unsafe { drop(Arc::from_raw(grammar)) };
        }
    })
}

fn make_parser(
    grammar: *const Grammar,
    match_fn: Option<MatchingFn>,
    alloc_fn: Option<CacheAllocFn>,
) -> *mut Parser {
    if grammar.is_null() {
        return std::ptr::null_mut();
    }
    let match_fn = match match_fn {
        Some(f) => f,
        None => return std::ptr::null_mut(),
    };
    // SAFETY: the pointer came from new_grammar() and the caller keeps
    // its reference until delete_grammar(); we take one of our own.
    let grammar = unsafe {
        Arc::increment_strong_count(grammar);
        Arc::from_raw(grammar)
    };
    let matcher = Box::new(CallbackMatcher { match_fn, alloc_fn });
    let mut parser = Parser::new(grammar, matcher);
    // Warnings go to stderr; there is nobody to drain a buffer here.
    *parser.logger_mut() = Logger::new(0, 1);
    Box::into_raw(Box::new(parser))
}

/// Create a parser over the grammar with the given matching function.
/// Returns null on a null grammar or matcher. Free with delete_parser().
#[no_mangle]
pub extern "C" fn new_parser(grammar: *const Grammar, match_fn: Option<MatchingFn>) -> *mut Parser {
    ffi_guard(std::ptr::null_mut(), || make_parser(grammar, match_fn, None))
}

/// Like new_parser(), additionally taking a cache allocator that lets
/// the host share match-cache buffers between identical tokens.
#[no_mangle]
pub extern "C" fn new_parser_ext(
    grammar: *const Grammar,
    match_fn: Option<MatchingFn>,
    alloc_fn: Option<CacheAllocFn>,
) -> *mut Parser {
    ffi_guard(std::ptr::null_mut(), || {
        make_parser(grammar, match_fn, alloc_fn)
    })
}

#[no_mangle]
pub extern "C" fn delete_parser(parser: *mut Parser) {
    ffi_guard((), || {
        if !parser.is_null() {
            // SAFETY: the pointer came from new_parser().
            unsafe { drop(Box::from_raw(parser)) };
        }
    })
}

/// Parse tokens 0..num_tokens-1 against the grammar's root nonterminal;
/// the host maps token indices to real tokens inside its matcher, keyed
/// by the opaque handle. Returns the forest root (release it with
/// delete_forest()), or null with *error_token set to the index of the
/// first failing token.
#[no_mangle]
pub extern "C" fn earley_parse(
    parser: *mut Parser,
    num_tokens: u32,
    handle: u32,
    error_token: *mut u32,
) -> *mut Node {
    ffi_guard(std::ptr::null_mut(), || {
        // SAFETY: the pointer came from new_parser(); the host does not
        // call into one parser from two threads at once.
        let parser = match unsafe { parser.as_mut() } {
            Some(p) => p,
            None => return std::ptr::null_mut(),
        };
        let root = parser.grammar().root();
        match parser.parse(handle, root, num_tokens, None) {
            Ok(node) => {
                if !error_token.is_null() {
                    // SAFETY: the caller passes a valid out-pointer.
                    unsafe { *error_token = 0 };
                }
                Rc::into_raw(node) as *mut Node
            }
            Err(e) => {
                if !error_token.is_null() {
                    // SAFETY: as above.
                    unsafe { *error_token = e.error_token() };
                }
                std::ptr::null_mut()
            }
        }
    })
}

/// Release the caller's reference to a parse result.
#[no_mangle]
pub extern "C" fn delete_forest(node: *mut Node) {
    ffi_guard((), || {
        if !node.is_null() {
            // SAFETY: the pointer came from earley_parse().
            unsafe { drop(Rc::from_raw(node)) };
        }
    })
}

/// Print an indented textual dump of the forest to stdout.
#[no_mangle]
pub extern "C" fn dump_forest(node: *const Node, grammar: *const Grammar) {
    ffi_guard((), || {
        // SAFETY: pointers came from earley_parse() / new_grammar().
        let (node, grammar) = match unsafe { (node.as_ref(), grammar.as_ref()) } {
            (Some(n), Some(g)) => (n, g),
            _ => return,
        };
        print!("{}", node.dump(grammar));
    })
}

/// Number of distinct parse trees in the forest, saturating at
/// u32::MAX. Returns 0 for a null node.
#[no_mangle]
pub extern "C" fn num_combinations(node: *const Node) -> u32 {
    ffi_guard(0, || {
        // SAFETY: the pointer came from earley_parse().
        match unsafe { node.as_ref() } {
            Some(n) => n.num_combinations().min(u32::MAX as u64) as u32,
            None => 0,
        }
    })
}

/// Print the per-class allocation balance sheet to stdout.
#[no_mangle]
pub extern "C" fn print_allocation_report() {
    ffi_guard((), earley::print_allocation_report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::earley::GrammarBuilder;
    use std::ffi::CString;

    extern "C" fn match_eq(_handle: u32, token: u32, terminal: u32) -> bool {
        // Token index i carries token value i + 1 in this test grammar.
        token + 1 == terminal
    }

    fn grammar_ptr() -> *mut Grammar {
        let mut b = GrammarBuilder::new();
        let s = b.nonterminal("S");
        let one = b.terminal(1);
        let two = b.terminal(2);
        b.production(s, &[one, two]);
        Arc::into_raw(Arc::new(b.build(s).unwrap())) as *mut Grammar
    }

    #[test]
    fn parse_and_free_through_ffi() {
        let g = grammar_ptr();
        let p = new_parser(g, Some(match_eq));
        assert!(!p.is_null());
        let mut error_token = u32::MAX;
        let node = earley_parse(p, 2, 0, &mut error_token);
        assert!(!node.is_null());
        assert_eq!(error_token, 0);
        assert_eq!(num_combinations(node), 1);
        delete_forest(node);
        delete_parser(p);
        delete_grammar(g);
    }

    #[test]
    fn failed_parse_reports_token() {
        let g = grammar_ptr();
        let p = new_parser(g, Some(match_eq));
        let mut error_token = 0;
        // Three tokens cannot match the length-2 production: the chart
        // runs dry after consuming two of them.
        let node = earley_parse(p, 3, 0, &mut error_token);
        assert!(node.is_null());
        assert_eq!(error_token, 3);
        delete_parser(p);
        delete_grammar(g);
    }

    #[test]
    fn null_arguments_are_rejected() {
        assert!(new_grammar(std::ptr::null()).is_null());
        assert!(new_parser(std::ptr::null(), Some(match_eq)).is_null());
        let g = grammar_ptr();
        assert!(new_parser(g, None).is_null());
        assert_eq!(num_combinations(std::ptr::null()), 0);
        delete_forest(std::ptr::null_mut());
        delete_parser(std::ptr::null_mut());
        delete_grammar(g);
    }

    #[test]
    fn missing_grammar_file_is_null() {
        let path = CString::new("/nonexistent/grammar.bin").unwrap();
        assert!(new_grammar(path.as_ptr()).is_null());
    }
}
