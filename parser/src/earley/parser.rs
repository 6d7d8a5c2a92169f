// In this file, "Scott 2008" refers to
// Elizabeth Scott, "SPPF-style parsing from Earley recognisers",
// Electronic Notes in Theoretical Computer Science 203(2), 2008 --
// the paper whose makeNode construction and H set this parser follows.

use std::ptr::NonNull;
use std::rc::Rc;
use std::sync::Arc;

use instant::Instant;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::loginfo;
use crate::logging::Logger;

use super::alloc::{COLUMN_AC, HNODE_AC, STATE_AC};
use super::forest::{Label, Node, NodeDict, NodeRef};
use super::grammar::{Grammar, ProdIdx, Sym};

const TRACE: bool = false;
const DEBUG: bool = false;

macro_rules! trace {
    ($($arg:tt)*) => {
        if cfg!(feature = "logging") && TRACE {
            eprintln!($($arg)*);
        }
    }
}

macro_rules! debug {
    ($($arg:tt)*) => {
        if cfg!(feature = "logging") && DEBUG {
            eprintln!($($arg)*);
        }
    }
}

/// Number of hash bins per column. Prime, so the weak xor mix of the
/// state hash still spreads.
const NUM_BINS: usize = 997;

/// States per arena chunk.
const CHUNK_SLOTS: usize = 2048;

/// Token value of the sentinel column past the end of the input. The
/// sentinel never matches any terminal.
const TOKEN_NONE: u32 = u32::MAX;

type StateId = u32;
const NO_STATE: StateId = u32::MAX;

/// Decides whether a token matches a terminal. The handle is an opaque
/// id the host uses to find its side tables; it is passed through
/// unchanged. Results must be stable for a given (handle, token,
/// terminal) during one parse -- they are cached per column.
pub trait TokenMatcher {
    fn matches(&self, handle: u32, token: u32, terminal: u32) -> bool;

    /// Optionally hand out a cache buffer of `size` bytes for the given
    /// token, shared between all columns holding an identical token so
    /// match results carry over. The buffer must be zero-initialized,
    /// at least `size` bytes, and stay valid until the parse returns.
    /// The default allocates nothing; the parser then uses its own
    /// per-column buffer.
    fn alloc_cache(&self, _handle: u32, _token: u32, _size: usize) -> Option<NonNull<u8>> {
        None
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// Recognition failed: no parse covers the input up to this token.
    #[error("no parse at token {token}")]
    Rejected { token: u32 },
}

impl ParseError {
    /// Index of the first failing token, 0 for argument errors.
    pub fn error_token(&self) -> u32 {
        match self {
            ParseError::Rejected { token } => *token,
            ParseError::InvalidArgument(_) => 0,
        }
    }
}

#[derive(Debug, Default, Serialize, Deserialize, Clone)]
pub struct ParserStats {
    pub columns: usize,
    pub states: usize,
    pub predictions: usize,
    pub completions: usize,
    pub scans: usize,
    pub match_calls: usize,
    pub compute_time_us: u64,
}

impl ParserStats {
    pub fn delta(&self, previous: &ParserStats) -> ParserStats {
        ParserStats {
            columns: self.columns - previous.columns,
            states: self.states - previous.states,
            predictions: self.predictions - previous.predictions,
            completions: self.completions - previous.completions,
            scans: self.scans - previous.scans,
            match_calls: self.match_calls - previous.match_calls,
            compute_time_us: self.compute_time_us - previous.compute_time_us,
        }
    }

    pub fn max(&self, other: &ParserStats) -> ParserStats {
        ParserStats {
            columns: self.columns.max(other.columns),
            states: self.states.max(other.states),
            predictions: self.predictions.max(other.predictions),
            completions: self.completions.max(other.completions),
            scans: self.scans.max(other.scans),
            match_calls: self.match_calls.max(other.match_calls),
            compute_time_us: self.compute_time_us.max(other.compute_time_us),
        }
    }
}

// An Earley state: a dotted production with a start column, plus the
// forest node built for the part of the production already matched.
// Identity is structural over (nt, prod, dot, start); the node is
// excluded because within one column it is fully determined by the
// other four fields. The two link fields thread the state into its
// column's hash bin and into the per-nonterminal index chain.
struct State {
    nt: Sym,
    prod: ProdIdx,
    dot: u32,
    start: u32,
    w: Option<NodeRef>,
    next: StateId,
    nt_next: StateId,
}

impl State {
    #[inline(always)]
    fn same(&self, other: &State) -> bool {
        self.nt == other.nt
            && self.prod == other.prod
            && self.dot == other.dot
            && self.start == other.start
    }

    // The hash mixes the node pointer as well; states that compare
    // equal carry the same node, so this cannot split them across bins.
    #[inline(always)]
    fn hash(&self) -> u32 {
        let w_bits = self.w.as_ref().map_or(0, |w| Rc::as_ptr(w) as usize as u32);
        (self.nt.code() as u32)
            ^ self.prod.as_u32()
            ^ (self.dot << 7)
            ^ (self.start << 9)
            ^ (w_bits << 1)
    }
}

impl Drop for State {
    fn drop(&mut self) {
        STATE_AC.free();
    }
}

// Bump allocator for states. Chunks never reallocate, so a StateId
// (chunk * CHUNK_SLOTS + slot) stays valid for the whole parse. The one
// deallocation supported before the bulk free is rewinding the most
// recent allocation, used when push() rejects a freshly made state.
struct StateArena {
    chunks: Vec<Vec<State>>,
    total: usize,
}

impl StateArena {
    fn new() -> StateArena {
        StateArena {
            chunks: vec![Vec::with_capacity(CHUNK_SLOTS)],
            total: 0,
        }
    }

    fn alloc(
        &mut self,
        nt: Sym,
        prod: ProdIdx,
        dot: u32,
        start: u32,
        w: Option<NodeRef>,
    ) -> StateId {
        if self.chunks.last().unwrap().len() == CHUNK_SLOTS {
            self.chunks.push(Vec::with_capacity(CHUNK_SLOTS));
        }
        let chunk_ix = self.chunks.len() - 1;
        let chunk = self.chunks.last_mut().unwrap();
        let id = (chunk_ix * CHUNK_SLOTS + chunk.len()) as StateId;
        chunk.push(State {
            nt,
            prod,
            dot,
            start,
            w,
            next: NO_STATE,
            nt_next: NO_STATE,
        });
        STATE_AC.alloc();
        self.total += 1;
        id
    }

    #[inline(always)]
    fn get(&self, id: StateId) -> &State {
        &self.chunks[id as usize / CHUNK_SLOTS][id as usize % CHUNK_SLOTS]
    }

    #[inline(always)]
    fn get_mut(&mut self, id: StateId) -> &mut State {
        &mut self.chunks[id as usize / CHUNK_SLOTS][id as usize % CHUNK_SLOTS]
    }

    /// Rewind the most recent allocation. `id` must be the top of the
    /// arena; no allocation may have happened since it was handed out.
    fn discard_last(&mut self, id: StateId) {
        let chunk_ix = self.chunks.len() - 1;
        let chunk = self.chunks.last_mut().unwrap();
        debug_assert_eq!(
            id as usize,
            chunk_ix * CHUNK_SLOTS + chunk.len() - 1,
            "discard_last on a state that is not the arena top"
        );
        chunk.pop();
    }

    fn num_allocated(&self) -> usize {
        self.total
    }
}

// Per-column match cache: one byte per terminal id, bit 7 = result
// cached, bit 0 = token matches. Either owned by the column or handed
// out by the host so identical tokens share their results.
enum MatchCache {
    Absent,
    Owned(Box<[u8]>),
    Shared { ptr: NonNull<u8>, len: usize },
}

impl MatchCache {
    #[inline(always)]
    fn get(&self, ix: usize) -> u8 {
        match self {
            MatchCache::Absent => 0,
            MatchCache::Owned(buf) => buf[ix],
            MatchCache::Shared { ptr, len } => {
                assert!(ix < *len);
                // SAFETY: the host guarantees the buffer covers `len`
                // bytes and outlives the parse; ix is bounds-checked.
                unsafe { *ptr.as_ptr().add(ix) }
            }
        }
    }

    #[inline(always)]
    fn set(&mut self, ix: usize, val: u8) {
        match self {
            MatchCache::Absent => {}
            MatchCache::Owned(buf) => buf[ix] = val,
            MatchCache::Shared { ptr, len } => {
                assert!(ix < *len);
                // SAFETY: as in get(); the parse is single-threaded, so
                // no concurrent writer exists.
                unsafe { *ptr.as_ptr().add(ix) = val }
            }
        }
    }
}

struct StateBin {
    head: StateId,
    tail: StateId,
}

// The Earley set for one input position: a deduplicated collection of
// states in hash bins, an index from "nonterminal expected at the dot"
// to the states expecting it, and the terminal match cache active while
// the column is being processed.
struct Column {
    token: u32,
    bins: Vec<StateBin>,
    // Agenda enumeration: per-bin cursor of the last state returned,
    // plus the bin the enumerator currently stands in.
    cursors: Vec<StateId>,
    enum_bin: usize,
    nt_heads: Vec<StateId>,
    cache: MatchCache,
    num_states: usize,
}

impl Column {
    fn new(num_nonterminals: usize, token: u32) -> Column {
        COLUMN_AC.alloc();
        Column {
            token,
            bins: (0..NUM_BINS)
                .map(|_| StateBin {
                    head: NO_STATE,
                    tail: NO_STATE,
                })
                .collect(),
            cursors: vec![NO_STATE; NUM_BINS],
            enum_bin: 0,
            nt_heads: vec![NO_STATE; num_nonterminals],
            cache: MatchCache::Absent,
            num_states: 0,
        }
    }

    fn is_empty(&self) -> bool {
        self.num_states == 0
    }

    /// Add `s` unless an equal state is already present. On true, the
    /// state is linked into its bin and, if a nonterminal is at its dot,
    /// into that nonterminal's index chain. On false the caller still
    /// owns the state and is expected to discard it.
    fn add_state(&mut self, grammar: &Grammar, arena: &mut StateArena, s: StateId) -> bool {
        let bin_ix = arena.get(s).hash() as usize % NUM_BINS;
        let mut q = self.bins[bin_ix].head;
        while q != NO_STATE {
            if arena.get(q).same(arena.get(s)) {
                return false;
            }
            q = arena.get(q).next;
        }
        arena.get_mut(s).next = NO_STATE;
        let bin = &mut self.bins[bin_ix];
        if bin.head == NO_STATE {
            bin.head = s;
        } else {
            arena.get_mut(bin.tail).next = s;
        }
        bin.tail = s;
        self.num_states += 1;

        let st = arena.get(s);
        let item = grammar.prod(st.prod).item(st.dot);
        if item.is_nonterminal() {
            let ix = item.nt_index();
            arena.get_mut(s).nt_next = self.nt_heads[ix];
            self.nt_heads[ix] = s;
        }
        true
    }

    #[inline(always)]
    fn nt_head(&self, nt: Sym) -> StateId {
        self.nt_heads[nt.nt_index()]
    }

    /// Round-robin agenda enumerator. Returns each state exactly once;
    /// bins use tail insertion, so states added during enumeration are
    /// seen by a later call within the same fixpoint.
    fn next_state(&mut self, arena: &StateArena) -> Option<StateId> {
        let mut visited = 0;
        while visited < NUM_BINS {
            let b = self.enum_bin;
            let next = match self.cursors[b] {
                NO_STATE => self.bins[b].head,
                last => arena.get(last).next,
            };
            if next != NO_STATE {
                self.cursors[b] = next;
                return Some(next);
            }
            self.enum_bin = (b + 1) % NUM_BINS;
            visited += 1;
        }
        None
    }

    fn reset_enum(&mut self) {
        self.cursors.fill(NO_STATE);
        self.enum_bin = 0;
    }

    /// Allocate the match cache. Called immediately before the column's
    /// work begins; the sentinel column gets no cache since it never
    /// matches anything.
    fn start_parse(&mut self, matcher: &dyn TokenMatcher, handle: u32, num_terminals: u32) {
        if self.token == TOKEN_NONE {
            return;
        }
        let len = num_terminals as usize + 1;
        self.cache = match matcher.alloc_cache(handle, self.token, len) {
            Some(ptr) => MatchCache::Shared { ptr, len },
            None => MatchCache::Owned(vec![0u8; len].into_boxed_slice()),
        };
    }

    /// Release the match cache once the column is closed.
    fn stop_parse(&mut self) {
        self.cache = MatchCache::Absent;
    }

    /// Does this column's token match `terminal`? Consults the cache
    /// first; the external matcher is invoked at most once per terminal.
    fn matches(
        &mut self,
        matcher: &dyn TokenMatcher,
        handle: u32,
        terminal: u32,
        stats: &mut ParserStats,
    ) -> bool {
        if self.token == TOKEN_NONE {
            // Sentinel column: never match.
            return false;
        }
        let ix = terminal as usize;
        let cached = self.cache.get(ix);
        if cached & 0x80 != 0 {
            return cached & 0x01 != 0;
        }
        stats.match_calls += 1;
        let m = matcher.matches(handle, self.token, terminal);
        self.cache.set(ix, 0x80 | m as u8);
        m
    }
}

impl Drop for Column {
    fn drop(&mut self) {
        COLUMN_AC.free();
    }
}

// An element of the per-column H set: a nullable completion of `nt`
// with its (empty-span) forest node, kept so later predictions of `nt`
// in the same column can be advanced immediately (Scott 2008).
struct HEntry {
    nt: Sym,
    v: NodeRef,
}

impl HEntry {
    fn new(nt: Sym, v: NodeRef) -> HEntry {
        HNODE_AC.alloc();
        HEntry { nt, v }
    }
}

impl Drop for HEntry {
    fn drop(&mut self) {
        HNODE_AC.free();
    }
}

/// The Earley-Scott parser. Holds a shared immutable grammar and the
/// host's token matcher; every call to [`Parser::parse`] runs an
/// independent recognition with its own columns, state arena and node
/// dictionary, so parsers over the same grammar may run in parallel.
pub struct Parser {
    grammar: Arc<Grammar>,
    matcher: Box<dyn TokenMatcher>,
    logger: Logger,
    stats: ParserStats,
}

impl Parser {
    /// Create a parser with a quiet logger; raise the levels through
    /// [`Parser::logger_mut`] to get per-column progress output.
    pub fn new(grammar: Arc<Grammar>, matcher: Box<dyn TokenMatcher>) -> Parser {
        Parser {
            grammar,
            matcher,
            logger: Logger::new(0, 0),
            stats: ParserStats::default(),
        }
    }

    pub fn grammar(&self) -> &Arc<Grammar> {
        &self.grammar
    }

    pub fn logger(&self) -> &Logger {
        &self.logger
    }

    pub fn logger_mut(&mut self) -> &mut Logger {
        &mut self.logger
    }

    /// Cumulative statistics over all parses run by this parser.
    pub fn stats(&self) -> &ParserStats {
        &self.stats
    }

    /// Parse `num_tokens` tokens against `start`, returning the root of
    /// the shared packed parse forest covering every derivation. When
    /// `token_list` is None the tokens are 0, 1, ..., num_tokens-1; the
    /// host resolves them through its matcher either way.
    pub fn parse(
        &mut self,
        handle: u32,
        start: Sym,
        num_tokens: u32,
        token_list: Option<&[u32]>,
    ) -> Result<NodeRef, ParseError> {
        if num_tokens == 0 {
            return Err(ParseError::InvalidArgument("num_tokens is zero"));
        }
        if !start.is_nonterminal() {
            return Err(ParseError::InvalidArgument(
                "start symbol is not a nonterminal",
            ));
        }
        if self.grammar.nonterminal(start).is_none() {
            return Err(ParseError::InvalidArgument(
                "start symbol not in the grammar",
            ));
        }
        if let Some(toks) = token_list {
            if toks.len() != num_tokens as usize {
                return Err(ParseError::InvalidArgument("token list length mismatch"));
            }
        }

        let t0 = Instant::now();
        let mut run = ParseRun::new(
            &self.grammar,
            self.matcher.as_ref(),
            handle,
            num_tokens,
            token_list,
        );
        let result = run.run(start, &mut self.stats, &mut self.logger);
        self.stats.compute_time_us += t0.elapsed().as_micros() as u64;
        result.map_err(|token| ParseError::Rejected { token })
    }
}

// All per-invocation parsing state. Dropping it tears everything down:
// the columns own no states, the arena's states release their forest
// references, and whatever the node dictionary still holds goes last.
struct ParseRun<'a> {
    grammar: &'a Grammar,
    matcher: &'a dyn TokenMatcher,
    handle: u32,
    num_tokens: u32,
    columns: Vec<Column>,
    arena: StateArena,
    ndv: NodeDict,
    h: Vec<HEntry>,
    seen_nt: Vec<bool>,
    // Scan agendas, linked through State::next. q is drained by the
    // scanner of the current column; q0 collects states for the next.
    q: StateId,
    q0: StateId,
}

impl<'a> ParseRun<'a> {
    fn new(
        grammar: &'a Grammar,
        matcher: &'a dyn TokenMatcher,
        handle: u32,
        num_tokens: u32,
        token_list: Option<&'a [u32]>,
    ) -> ParseRun<'a> {
        let num_nts = grammar.num_nonterminals() as usize;
        let columns = (0..=num_tokens)
            .map(|i| {
                let token = if i == num_tokens {
                    TOKEN_NONE
                } else {
                    token_list.map_or(i, |t| t[i as usize])
                };
                Column::new(num_nts, token)
            })
            .collect();
        ParseRun {
            grammar,
            matcher,
            handle,
            num_tokens,
            columns,
            arena: StateArena::new(),
            ndv: NodeDict::new(),
            h: Vec::new(),
            seen_nt: vec![false; num_nts],
            q: NO_STATE,
            q0: NO_STATE,
        }
    }

    /// Route a freshly made state: states with a nonterminal at the dot
    /// or completed go into the column; a state facing a terminal that
    /// matches the column's token goes onto the scan agenda. Returns
    /// false if the state was neither placed nor queued -- the caller
    /// discards it.
    fn push(&mut self, s: StateId, col: usize, to_q0: bool, stats: &mut ParserStats) -> bool {
        let (prod, dot) = {
            let st = self.arena.get(s);
            (st.prod, st.dot)
        };
        let item = self.grammar.prod(prod).item(dot);
        if item.code() <= 0 {
            // Nonterminal at the dot, or a completed production.
            self.columns[col].add_state(self.grammar, &mut self.arena, s)
        } else if self.columns[col].matches(self.matcher, self.handle, item.terminal_index(), stats)
        {
            let head = if to_q0 { self.q0 } else { self.q };
            self.arena.get_mut(s).next = head;
            if to_q0 {
                self.q0 = s;
            } else {
                self.q = s;
            }
            true
        } else {
            false
        }
    }

    // makeNode of Scott 2008. Advancing the dot of `s` over a child
    // node `v` yields either `v` itself (nothing to pack yet: the dot
    // moved to position 1 of a production of length >= 2) or the
    // dictionary node for the advanced label with a (prod, w, v) family
    // added. Completed productions are labelled by nonterminal alone,
    // dot 0 and no production, so every production deriving the same
    // span packs into one node.
    fn make_node(&mut self, s: StateId, end: u32, v: NodeRef) -> NodeRef {
        let (nt, prod_ix, dot, start, w) = {
            let st = self.arena.get(s);
            (st.nt, st.prod, st.dot, st.start, st.w.clone())
        };
        let dot1 = dot + 1;
        let n = self.grammar.prod(prod_ix).len();
        if dot1 == 1 && n >= 2 {
            return v;
        }
        let label = if dot1 < n {
            Label::new(nt, dot1, Some(prod_ix), start, end)
        } else {
            Label::new(nt, 0, None, start, end)
        };
        let y = self.ndv.lookup_or_add(label);
        y.add_family(Some(prod_ix), w, Some(v));
        y
    }

    /// Allocate the state `s` advanced one item, carrying node `y`.
    fn alloc_advanced(&mut self, s: StateId, y: NodeRef) -> StateId {
        let (nt, prod, dot, start) = {
            let st = self.arena.get(s);
            (st.nt, st.prod, st.dot, st.start)
        };
        self.arena.alloc(nt, prod, dot + 1, start, Some(y))
    }

    fn run(
        &mut self,
        start: Sym,
        stats: &mut ParserStats,
        logger: &mut Logger,
    ) -> Result<NodeRef, u32> {
        stats.columns += self.columns.len();

        // Seed column 0 with every production of the start nonterminal.
        self.columns[0].start_parse(self.matcher, self.handle, self.grammar.num_terminals());
        for p in self.grammar.prod_range(start) {
            let s = self.arena.alloc(start, ProdIdx(p), 0, 0, None);
            if !self.push(s, 0, true, stats) {
                self.arena.discard_last(s);
            }
        }

        let mut error_token = None;
        for i in 0..=self.num_tokens {
            let iu = i as usize;
            loginfo!(logger, "column {} token {}", i, self.columns[iu].token);

            if self.columns[iu].is_empty() && self.q0 == NO_STATE {
                // The chart is empty and nothing is waiting to be
                // scanned in: recognition failed at this token.
                error_token = Some(i);
                break;
            }

            self.q = std::mem::replace(&mut self.q0, NO_STATE);
            self.h.clear();
            self.seen_nt.fill(false);
            self.columns[iu].reset_enum();

            // Close the column: the agenda also yields states added by
            // the steps below, until nothing new appears.
            while let Some(s) = self.columns[iu].next_state(&self.arena) {
                let (s_nt, s_prod, s_start, s_w) = {
                    let st = self.arena.get(s);
                    (st.nt, st.prod, st.start, st.w.clone())
                };
                let item = self.grammar.prod(s_prod).item(self.arena.get(s).dot);
                trace!("  agenda: {}", self.state_to_string(s));

                if item.is_nonterminal() {
                    // Predictor. Expand the nonterminal once per column;
                    // the H loop below must run on every visit, since H
                    // entries accumulate while the column closes.
                    let nt_ix = item.nt_index();
                    if !self.seen_nt[nt_ix] {
                        self.seen_nt[nt_ix] = true;
                        stats.predictions += 1;
                        for p in self.grammar.prod_range(item) {
                            let ps = self.arena.alloc(item, ProdIdx(p), 0, i, None);
                            if !self.push(ps, iu, false, stats) {
                                self.arena.discard_last(ps);
                            }
                        }
                    }
                    let mut hx = 0;
                    while hx < self.h.len() {
                        if self.h[hx].nt == item {
                            let v = self.h[hx].v.clone();
                            let y = self.make_node(s, i, v);
                            let adv = self.alloc_advanced(s, y);
                            if !self.push(adv, iu, false, stats) {
                                self.arena.discard_last(adv);
                            }
                        }
                        hx += 1;
                    }
                } else if item.is_end() {
                    // Completer. A state completed over an empty span
                    // gets an epsilon family and joins the H set.
                    stats.completions += 1;
                    let w = match s_w {
                        Some(w) => w,
                        None => {
                            let w = self.ndv.lookup_or_add(Label::new(s_nt, 0, None, i, i));
                            w.add_family(Some(s_prod), None, None);
                            w
                        }
                    };
                    if s_start == i {
                        self.h.push(HEntry::new(s_nt, w.clone()));
                    }
                    let mut t = self.columns[s_start as usize].nt_head(s_nt);
                    while t != NO_STATE {
                        let t_next = self.arena.get(t).nt_next;
                        let y = self.make_node(t, i, w.clone());
                        let adv = self.alloc_advanced(t, y);
                        if !self.push(adv, iu, false, stats) {
                            self.arena.discard_last(adv);
                        }
                        t = t_next;
                    }
                }
                // States with a terminal at the dot never reach the
                // column; push() routed them onto the scan agenda.
            }

            self.h.clear();
            self.ndv.reset();

            // Scanner: advance every queued state over the token into
            // the next column. One token node is shared by all of them.
            if self.q != NO_STATE {
                debug_assert!(i < self.num_tokens);
                let token = self.columns[iu].token;
                let v = Node::new(Label::new(Sym::from_code(token as i32), 0, None, i, i + 1));
                self.columns[iu + 1].start_parse(
                    self.matcher,
                    self.handle,
                    self.grammar.num_terminals(),
                );
                let mut q = std::mem::replace(&mut self.q, NO_STATE);
                while q != NO_STATE {
                    let q_next = self.arena.get(q).next;
                    let y = self.make_node(q, i + 1, v.clone());
                    stats.scans += 1;
                    // Reuse the state instead of allocating an advanced
                    // copy: move the dot and swap in the new node.
                    {
                        let st = self.arena.get_mut(q);
                        st.dot += 1;
                        st.next = NO_STATE;
                        debug_assert_eq!(st.nt_next, NO_STATE);
                        st.w = Some(y);
                    }
                    if !self.push(q, iu + 1, true, stats) {
                        // The slot is not the arena top; drop the forest
                        // reference and leave the slot to the bulk free.
                        self.arena.get_mut(q).w = None;
                    }
                    q = q_next;
                }
                // The token node now lives only through the family
                // entries that captured it.
            }

            self.columns[iu].stop_parse();
        }

        stats.states += self.arena.num_allocated();

        if let Some(token) = error_token {
            debug!("no parse at token {}", token);
            return Err(token);
        }
        debug_assert_eq!(self.q, NO_STATE);
        debug_assert_eq!(self.q0, NO_STATE);

        // Scan the sentinel column for a completed start state covering
        // the whole input; its node is the forest root.
        let last = self.num_tokens as usize;
        self.columns[last].reset_enum();
        while let Some(s) = self.columns[last].next_state(&self.arena) {
            let st = self.arena.get(s);
            if st.nt == start && st.start == 0 && self.grammar.prod(st.prod).item(st.dot).is_end() {
                if let Some(w) = &st.w {
                    return Ok(w.clone());
                }
            }
        }
        Err(self.num_tokens)
    }

    #[allow(dead_code)]
    fn state_to_string(&self, s: StateId) -> String {
        let st = self.arena.get(s);
        let prod = self.grammar.prod(st.prod);
        let mut rhs = String::new();
        for (ix, item) in prod.items().iter().enumerate() {
            if ix as u32 == st.dot {
                rhs.push_str(". ");
            }
            rhs.push_str(&format!("{:?} ", item));
        }
        if st.dot >= prod.len() {
            rhs.push('.');
        }
        format!(
            "{} -> {} [{}]",
            self.grammar.name_of(st.nt),
            rhs.trim_end(),
            st.start
        )
    }
}
