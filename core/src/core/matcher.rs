//! Single-pass multi-signature search.
//!
//! `SignatureMatcher` compiles a fixed set of literal signatures into an
//! Aho-Corasick automaton (byte trie + failure links + output links) once,
//! and then reports which signatures occur in a body in one left-to-right
//! scan, however many signatures there are.

use std::collections::{BTreeSet, HashMap, VecDeque};

use log::trace;

const ROOT: usize = 0;

#[derive(Debug, Default)]
struct State {
    next: HashMap<u8, usize>,
    fail: usize,
    /// signature that ends exactly at this state
    output: Option<usize>,
    /// nearest state on the failure chain that has an output
    output_link: Option<usize>,
}

/// Immutable matcher over a signature set. Cheap to share behind an `Arc`.
#[derive(Debug)]
pub struct SignatureMatcher {
    signatures: Vec<String>,
    states: Vec<State>,
}

impl SignatureMatcher {
    /// Builds the automaton. Blank signatures are dropped, duplicates
    /// collapsed. Signature order does not affect results.
    pub fn new<I, S>(signatures: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut signatures: Vec<String> = signatures
            .into_iter()
            .map(Into::into)
            .filter(|s| {
                let keep = !s.trim().is_empty();
                if !keep {
                    trace!("blank signature skipped");
                }
                keep
            })
            .collect();
        signatures.sort();
        signatures.dedup();

        let mut matcher = Self {
            signatures,
            states: vec![State::default()],
        };
        for index in 0..matcher.signatures.len() {
            matcher.insert(index);
        }
        matcher.link();
        matcher
    }

    fn insert(&mut self, index: usize) {
        let mut current = ROOT;
        for &byte in self.signatures[index].as_bytes() {
            current = match self.states[current].next.get(&byte) {
                Some(&next) => next,
                None => {
                    self.states.push(State::default());
                    let created = self.states.len() - 1;
                    self.states[current].next.insert(byte, created);
                    created
                }
            };
        }
        self.states[current].output = Some(index);
    }

    /// Breadth-first pass computing failure and output links.
    fn link(&mut self) {
        let mut queue = VecDeque::new();
        let roots: Vec<usize> = self.states[ROOT].next.values().copied().collect();
        for child in roots {
            self.states[child].fail = ROOT;
            queue.push_back(child);
        }

        while let Some(state) = queue.pop_front() {
            let edges: Vec<(u8, usize)> = self.states[state]
                .next
                .iter()
                .map(|(&b, &s)| (b, s))
                .collect();
            for (byte, child) in edges {
                let mut fallback = self.states[state].fail;
                let fail = loop {
                    if let Some(&target) = self.states[fallback].next.get(&byte) {
                        break target;
                    }
                    if fallback == ROOT {
                        break ROOT;
                    }
                    fallback = self.states[fallback].fail;
                };
                self.states[child].fail = fail;
                self.states[child].output_link = if self.states[fail].output.is_some() {
                    Some(fail)
                } else {
                    self.states[fail].output_link
                };
                queue.push_back(child);
            }
        }
    }

    fn step(&self, mut state: usize, byte: u8) -> usize {
        loop {
            if let Some(&next) = self.states[state].next.get(&byte) {
                return next;
            }
            if state == ROOT {
                return ROOT;
            }
            state = self.states[state].fail;
        }
    }

    /// Signatures present in `body`, each reported once, case-sensitive,
    /// plain substring semantics.
    pub fn query<'a>(&'a self, body: &str) -> BTreeSet<&'a str> {
        let mut found = vec![false; self.signatures.len()];
        let mut remaining = self.signatures.len();
        let mut state = ROOT;

        for &byte in body.as_bytes() {
            if remaining == 0 {
                break;
            }
            state = self.step(state, byte);

            let mut hit = if self.states[state].output.is_some() {
                Some(state)
            } else {
                self.states[state].output_link
            };
            while let Some(s) = hit {
                if let Some(index) = self.states[s].output {
                    if !found[index] {
                        found[index] = true;
                        remaining -= 1;
                    }
                }
                hit = self.states[s].output_link;
            }
        }

        found
            .iter()
            .zip(&self.signatures)
            .filter(|(hit, _)| **hit)
            .map(|(_, sig)| sig.as_str())
            .collect()
    }

    pub fn is_match(&self, body: &str) -> bool {
        let mut state = ROOT;
        for &byte in body.as_bytes() {
            state = self.step(state, byte);
            if self.states[state].output.is_some() || self.states[state].output_link.is_some() {
                return true;
            }
        }
        false
    }

    pub fn len(&self) -> usize {
        self.signatures.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signatures.is_empty()
    }
}
