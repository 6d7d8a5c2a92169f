// Per-class allocation/free tallies, used to diagnose leaks in the
// refcounted forest and the state arena. Counters are global so that
// they survive individual parser instances; all increments happen on
// construction and all decrements in Drop impls.

use std::fmt::Write;
use std::sync::atomic::{AtomicUsize, Ordering};

pub struct AllocCounter {
    allocs: AtomicUsize,
    frees: AtomicUsize,
}

impl AllocCounter {
    pub const fn new() -> Self {
        AllocCounter {
            allocs: AtomicUsize::new(0),
            frees: AtomicUsize::new(0),
        }
    }

    #[inline(always)]
    pub fn alloc(&self) {
        self.allocs.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn free(&self) {
        self.frees.fetch_add(1, Ordering::Relaxed);
    }

    pub fn num_allocs(&self) -> usize {
        self.allocs.load(Ordering::Relaxed)
    }

    pub fn num_frees(&self) -> usize {
        self.frees.load(Ordering::Relaxed)
    }

    /// Outstanding allocations; zero once every owner has been dropped.
    pub fn balance(&self) -> isize {
        self.num_allocs() as isize - self.num_frees() as isize
    }
}

pub static NONTERMINAL_AC: AllocCounter = AllocCounter::new();
pub static PRODUCTION_AC: AllocCounter = AllocCounter::new();
pub static GRAMMAR_AC: AllocCounter = AllocCounter::new();
pub static NODE_AC: AllocCounter = AllocCounter::new();
pub static FAMILY_AC: AllocCounter = AllocCounter::new();
pub static STATE_AC: AllocCounter = AllocCounter::new();
pub static COLUMN_AC: AllocCounter = AllocCounter::new();
pub static HNODE_AC: AllocCounter = AllocCounter::new();

pub fn allocation_report() -> String {
    let classes: &[(&str, &AllocCounter)] = &[
        ("Nonterminals", &NONTERMINAL_AC),
        ("Productions", &PRODUCTION_AC),
        ("Grammars", &GRAMMAR_AC),
        ("Nodes", &NODE_AC),
        ("Families", &FAMILY_AC),
        ("States", &STATE_AC),
        ("Columns", &COLUMN_AC),
        ("HNodes", &HNODE_AC),
    ];
    let mut out = String::new();
    out.push_str("\nMemory allocation status\n");
    out.push_str("------------------------\n");
    for (name, ac) in classes {
        writeln!(
            out,
            "{:<14}: {:6} {:6}",
            name,
            ac.balance(),
            ac.num_allocs()
        )
        .unwrap();
    }
    out
}

pub fn print_allocation_report() {
    print!("{}", allocation_report());
}
