//! Protocol state machine model: triggers, directions, states and transitions.
//!
//! States are plain values compared by `(name, start)`. Three sentinel states are
//! reserved: [`State::ANY`] matches every state, [`State::DEAD`] and
//! [`State::DYING`] mark a destroyed or dying actor. A "null" [`Transition`]
//! records explicitly that a state has no further legal transitions.
//!
//! This module only stores the model and its matching rules; validation of a
//! concrete protocol happens in [`crate::typecheck`].

use crate::ast::{Ast, NodeId, NodeKind};
use serde::Serialize;
use std::borrow::Cow;
use std::collections::{BTreeSet, VecDeque};
use std::fmt;

/// How a message participates in a state transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Trigger {
    Send,
    Recv,
    Call,
    Answer,
}

impl Trigger {
    pub const ALL: [Trigger; 4] = [Trigger::Send, Trigger::Recv, Trigger::Call, Trigger::Answer];

    /// `send`/`call` leave this side, `recv`/`answer` arrive at it.
    pub fn direction(self) -> Direction {
        match self {
            Trigger::Send | Trigger::Call => Direction::Out,
            Trigger::Recv | Trigger::Answer => Direction::In,
        }
    }

    /// True for the triggers reserved to blocking (sync or intr) messages.
    pub fn is_blocking(self) -> bool {
        matches!(self, Trigger::Call | Trigger::Answer)
    }

    pub fn from_keyword(s: &str) -> Option<Trigger> {
        match s {
            "send" => Some(Trigger::Send),
            "recv" => Some(Trigger::Recv),
            "call" => Some(Trigger::Call),
            "answer" => Some(Trigger::Answer),
            _ => None,
        }
    }

    pub fn keyword(self) -> &'static str {
        match self {
            Trigger::Send => "send",
            Trigger::Recv => "recv",
            Trigger::Call => "call",
            Trigger::Answer => "answer",
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

/// Message direction, seen from the parent side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// Child to parent (`parent:` section).
    In,
    /// Parent to child (`child:` section).
    Out,
    /// Either way (`both:` section).
    InOut,
}

impl Direction {
    pub fn is_in(self) -> bool {
        matches!(self, Direction::In | Direction::InOut)
    }

    pub fn is_out(self) -> bool {
        matches!(self, Direction::Out | Direction::InOut)
    }

    /// Whether a message declared with this direction may fire in `dir`.
    pub fn allows(self, dir: Direction) -> bool {
        match dir {
            Direction::In => self.is_in(),
            Direction::Out => self.is_out(),
            Direction::InOut => self == Direction::InOut,
        }
    }

    pub fn from_section(s: &str) -> Option<Direction> {
        match s {
            "parent" => Some(Direction::In),
            "child" => Some(Direction::Out),
            "both" => Some(Direction::InOut),
            _ => None,
        }
    }
}

/// Send semantics, ordered from least to most blocking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SendSemantics {
    Async,
    Sync,
    Intr,
}

impl SendSemantics {
    pub fn from_keyword(s: &str) -> Option<SendSemantics> {
        match s {
            "async" => Some(SendSemantics::Async),
            "sync" => Some(SendSemantics::Sync),
            "intr" | "rpc" => Some(SendSemantics::Intr),
            _ => None,
        }
    }

    pub fn keyword(self) -> &'static str {
        match self {
            SendSemantics::Async => "async",
            SendSemantics::Sync => "sync",
            SendSemantics::Intr => "intr",
        }
    }

    pub fn is_async(self) -> bool {
        self == SendSemantics::Async
    }
}

impl fmt::Display for SendSemantics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.keyword())
    }
}

/// Nesting level a message may be delivered at while the receiver is blocked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize)]
pub enum Nesting {
    #[default]
    #[serde(rename = "not")]
    NotNested,
    #[serde(rename = "inside_sync")]
    InsideSyncNested,
    #[serde(rename = "inside_cpow")]
    InsideCpowNested,
}

impl Nesting {
    pub fn from_keyword(s: &str) -> Option<Nesting> {
        match s {
            "not" => Some(Nesting::NotNested),
            "inside_sync" => Some(Nesting::InsideSyncNested),
            "inside_cpow" => Some(Nesting::InsideCpowNested),
            _ => None,
        }
    }

    pub fn keyword(self) -> &'static str {
        match self {
            Nesting::NotNested => "not",
            Nesting::InsideSyncNested => "inside_sync",
            Nesting::InsideCpowNested => "inside_cpow",
        }
    }

    /// Constant name used by the generated message header flags.
    pub fn cxx_name(self) -> &'static str {
        match self {
            Nesting::NotNested => "NOT_NESTED",
            Nesting::InsideSyncNested => "NESTED_INSIDE_SYNC",
            Nesting::InsideCpowNested => "NESTED_INSIDE_CPOW",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    #[default]
    Normal,
    High,
}

impl Priority {
    pub fn from_keyword(s: &str) -> Option<Priority> {
        match s {
            "normal" => Some(Priority::Normal),
            "high" => Some(Priority::High),
            _ => None,
        }
    }

    pub fn cxx_name(self) -> &'static str {
        match self {
            Priority::Normal => "NORMAL_PRIORITY",
            Priority::High => "HIGH_PRIORITY",
        }
    }
}

/// A protocol state. Equality is by `(name, start)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct State {
    name: Cow<'static, str>,
    start: bool,
}

impl State {
    /// Matches from every state; itself a start state.
    pub const ANY: State = State { name: Cow::Borrowed("[any]"), start: true };
    pub const DEAD: State = State { name: Cow::Borrowed("[dead]"), start: false };
    pub const DYING: State = State { name: Cow::Borrowed("[dying]"), start: false };

    pub fn new(name: impl Into<String>, start: bool) -> Self {
        State { name: Cow::Owned(name.into()), start }
    }

    /// Map a name written in source to a state, turning the reserved
    /// `__Any__`, `__Dead__` and `__Dying__` spellings into sentinels.
    pub fn from_source(name: &str, start: bool) -> Self {
        match name {
            "__Any__" => State::ANY,
            "__Dead__" => State::DEAD,
            "__Dying__" => State::DYING,
            _ => State::new(name, start),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_start(&self) -> bool {
        self.start
    }

    pub fn is_any(&self) -> bool {
        *self == State::ANY
    }

    pub fn is_dead(&self) -> bool {
        *self == State::DEAD
    }

    pub fn is_dying(&self) -> bool {
        *self == State::DYING
    }

    pub fn is_sentinel(&self) -> bool {
        self.is_any() || self.is_dead() || self.is_dying()
    }

    /// Whether transitions declared on `self` apply while in `current`.
    pub fn matches(&self, current: &State) -> bool {
        self.is_any() || self.same_name(current)
    }

    /// Destination lists name states without the `start` flag, so lookups
    /// by name are needed alongside strict equality.
    pub fn same_name(&self, other: &State) -> bool {
        self.name == other.name
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start && !self.is_any() {
            write!(f, "start {}", self.name)
        } else {
            f.write_str(&self.name)
        }
    }
}

/// `(trigger, message, destinations)`; the null transition has none of them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transition {
    pub trigger: Option<Trigger>,
    pub msg: Option<String>,
    pub to_states: Vec<State>,
}

impl Transition {
    pub fn new(trigger: Trigger, msg: impl Into<String>, to_states: Vec<State>) -> Self {
        Transition { trigger: Some(trigger), msg: Some(msg.into()), to_states }
    }

    pub fn null() -> Self {
        Transition { trigger: None, msg: None, to_states: Vec::new() }
    }

    pub fn is_null(&self) -> bool {
        self.trigger.is_none() && self.msg.is_none() && self.to_states.is_empty()
    }

    pub fn direction(&self) -> Option<Direction> {
        self.trigger.map(Trigger::direction)
    }
}

/// Read-only view over the transition statements of one protocol.
#[derive(Debug, Clone, Default)]
pub struct StateMachine {
    stmts: Vec<(State, Vec<Transition>)>,
}

impl StateMachine {
    pub fn of_protocol(ast: &Ast, protocol: NodeId) -> Self {
        let stmts = ast
            .children_of_kind(protocol, &[NodeKind::TransitionStmt])
            .into_iter()
            .filter_map(|stmt| {
                let state = ast.as_transition_stmt(stmt)?.state.clone();
                let transitions = ast
                    .children_of_kind(stmt, &[NodeKind::Transition])
                    .into_iter()
                    .filter_map(|t| ast.as_transition(t).cloned())
                    .collect();
                Some((state, transitions))
            })
            .collect();
        StateMachine { stmts }
    }

    pub fn is_empty(&self) -> bool {
        self.stmts.is_empty()
    }

    pub fn states(&self) -> impl Iterator<Item = &State> {
        self.stmts.iter().map(|(s, _)| s)
    }

    pub fn start_states(&self) -> Vec<&State> {
        self.states().filter(|s| s.is_start() && !s.is_any()).collect()
    }

    /// Non-null transitions legal in `current`, including those declared on
    /// the ANY state.
    pub fn transitions_from<'a>(&'a self, current: &'a State) -> impl Iterator<Item = &'a Transition> {
        self.stmts
            .iter()
            .filter(move |(s, _)| s.matches(current))
            .flat_map(|(_, ts)| ts.iter())
            .filter(|t| !t.is_null())
    }

    /// A state with no legal transitions, explicit or implicit.
    pub fn is_terminal(&self, state: &State) -> bool {
        self.transitions_from(state).next().is_none()
    }

    /// Names of states reachable from the start states.
    pub fn reachable(&self) -> BTreeSet<String> {
        let mut seen = BTreeSet::new();
        let mut queue: VecDeque<State> = self.start_states().into_iter().cloned().collect();
        while let Some(state) = queue.pop_front() {
            if !seen.insert(state.name().to_string()) {
                continue;
            }
            for t in self.transitions_from(&state) {
                for to in &t.to_states {
                    if !seen.contains(to.name()) {
                        queue.push_back(to.clone());
                    }
                }
            }
        }
        seen
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn trigger_direction_is_total() {
        let dirs: Vec<_> = Trigger::ALL.iter().map(|t| t.direction()).collect();
        assert_eq!(dirs, vec![Direction::Out, Direction::In, Direction::Out, Direction::In]);
    }

    #[test]
    fn any_state_matches_everything() {
        let a = State::new("A", true);
        let b = State::new("B", false);
        assert!(State::ANY.matches(&a));
        assert!(State::ANY.matches(&b));
        assert!(State::ANY.matches(&State::DEAD));
        assert!(!a.matches(&b));
        assert!(State::ANY.is_start());
    }

    #[test]
    fn state_equality_includes_start_flag() {
        assert_ne!(State::new("A", true), State::new("A", false));
        assert_eq!(State::new("A", false), State::new("A", false));
        assert!(State::new("A", true).same_name(&State::new("A", false)));
    }

    #[test]
    fn sentinels_from_source_names() {
        assert!(State::from_source("__Dead__", false).is_dead());
        assert!(State::from_source("__Dying__", false).is_dying());
        assert!(State::from_source("__Any__", false).is_any());
        assert!(!State::from_source("Dead", false).is_sentinel());
    }

    #[test]
    fn null_transition() {
        let t = Transition::null();
        assert!(t.is_null());
        assert_eq!(t.direction(), None);
        assert!(!Transition::new(Trigger::Send, "M", vec![]).is_null());
    }

    #[test]
    fn direction_allows() {
        assert!(Direction::InOut.allows(Direction::In));
        assert!(Direction::InOut.allows(Direction::Out));
        assert!(Direction::In.allows(Direction::In));
        assert!(!Direction::In.allows(Direction::Out));
    }

    fn machine(states: &str) -> StateMachine {
        let src = format!("protocol PTest {{ child: async A(); async B(); {} }};", states);
        let ast = crate::parser::parse(&src, "PTest.ipdl").expect("parse");
        let (pid, _) = ast.protocol().expect("protocol");
        StateMachine::of_protocol(&ast, pid)
    }

    #[test]
    fn terminal_states() {
        let m = machine("start state S: send A goto T; state T:");
        assert!(!m.is_terminal(&State::new("S", true)));
        assert!(m.is_terminal(&State::new("T", false)));

        let m = machine("start state S: send A goto T; state T: state __Any__: send B goto S;");
        assert!(!m.is_terminal(&State::new("T", false)));
        assert_eq!(m.transitions_from(&State::new("T", false)).count(), 1);
    }

    #[test]
    fn semantics_order() {
        assert!(SendSemantics::Async < SendSemantics::Sync);
        assert!(SendSemantics::Sync < SendSemantics::Intr);
        assert_eq!(SendSemantics::from_keyword("rpc"), Some(SendSemantics::Intr));
    }
}
