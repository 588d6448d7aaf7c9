//! Token trie mapping subject patterns to values.

use super::{is_valid_channel_name, FWC, PWC, SEPARATOR};
use crate::error::{Result, StoreError};
use std::collections::HashMap;
use std::fmt;

struct Node<V> {
    values: Vec<V>,
    literals: HashMap<String, Node<V>>,
    pwc: Option<Box<Node<V>>>,
    fwc: Option<Box<Node<V>>>,
}

impl<V> Default for Node<V> {
    fn default() -> Self {
        Self {
            values: Vec::new(),
            literals: HashMap::new(),
            pwc: None,
            fwc: None,
        }
    }
}

impl<V: Clone> Node<V> {
    fn child_mut(&mut self, token: &str) -> &mut Node<V> {
        match token {
            PWC => self.pwc.get_or_insert_with(Box::default),
            FWC => self.fwc.get_or_insert_with(Box::default),
            _ => self.literals.entry(token.to_string()).or_default(),
        }
    }

    /// Collects matches in widest-to-narrowest order: at every level the `>`
    /// branch is visited before `*`, and `*` before the literal token.
    fn collect(&self, tokens: &[&str], out: &mut Vec<V>) {
        let Some((first, rest)) = tokens.split_first() else {
            out.extend(self.values.iter().cloned());
            return;
        };
        if let Some(fwc) = &self.fwc {
            out.extend(fwc.values.iter().cloned());
        }
        if let Some(pwc) = &self.pwc {
            pwc.collect(rest, out);
        }
        if let Some(node) = self.literals.get(*first) {
            node.collect(rest, out);
        }
    }

    fn nodes_size(&self) -> usize {
        let nested: usize = self.literals.values().map(Node::nodes_size).sum::<usize>()
            + self.pwc.as_ref().map_or(0, |n| n.nodes_size())
            + self.fwc.as_ref().map_or(0, |n| n.nodes_size());
        self.literals.len()
            + usize::from(self.pwc.is_some())
            + usize::from(self.fwc.is_some())
            + nested
    }
}

/// Subject matcher: values keyed by subject pattern, looked up by literal subject.
pub struct Sublist<V> {
    root: Node<V>,
    count: usize,
}

impl<V> Default for Sublist<V> {
    fn default() -> Self {
        Self {
            root: Node::default(),
            count: 0,
        }
    }
}

impl<V: Clone> Sublist<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `value` under `pattern`. Values inserted under the same pattern
    /// are returned in insertion order.
    pub fn insert(&mut self, pattern: &str, value: V) -> Result<()> {
        if !is_valid_channel_name(pattern, true) {
            return Err(StoreError::InvalidChannel(pattern.to_string()));
        }
        let mut node = &mut self.root;
        for token in pattern.split(SEPARATOR) {
            node = node.child_mut(token);
        }
        node.values.push(value);
        self.count += 1;
        Ok(())
    }

    /// All values whose pattern matches the literal `subject`, ordered from
    /// the widest pattern to the narrowest.
    pub fn matches(&self, subject: &str) -> Vec<V> {
        let tokens: Vec<&str> = subject.split(SEPARATOR).collect();
        let mut out = Vec::new();
        self.root.collect(&tokens, &mut out);
        out
    }

    /// Number of inserted values.
    pub fn count(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }
}

impl<V: Clone> fmt::Debug for Sublist<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Sublist {{ nodes_size: {}, values_size: {} }}",
            self.root.nodes_size(),
            self.count
        )
    }
}
