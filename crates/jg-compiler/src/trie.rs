//! Arena trie with failure links
//!
//! Nodes live in a flat vector and are identified by their creation index,
//! so the root is always node 0. Children and failure links are plain
//! indices: failure links only ever point at shallower nodes, which keeps
//! the graph free of ownership cycles.

use std::collections::VecDeque;

use jg_core::ALPHABET_SIZE;

const NO_CHILD: u32 = u32::MAX;

/// Root node id.
pub const ROOT: u32 = 0;

#[derive(Debug, Clone)]
struct TrieNode {
    children: [u32; ALPHABET_SIZE],
    fail: u32,
    terminal: bool,
    accept: bool,
}

impl TrieNode {
    fn new() -> Self {
        Self {
            children: [NO_CHILD; ALPHABET_SIZE],
            fail: ROOT,
            terminal: false,
            accept: false,
        }
    }
}

/// Returned when inserting would exceed the node limit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CapacityExceeded {
    pub limit: usize,
}

/// Construction-time trie.
#[derive(Debug, Clone)]
pub struct Trie {
    nodes: Vec<TrieNode>,
    max_nodes: usize,
}

impl Trie {
    /// Create a trie holding at most `max_nodes` nodes (root included).
    pub fn with_capacity_limit(max_nodes: usize) -> Self {
        Self {
            nodes: vec![TrieNode::new()],
            max_nodes,
        }
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.len() == 1
    }

    /// Insert a symbol sequence, creating nodes on demand, and mark its last
    /// node as terminal.
    pub fn insert(&mut self, symbols: &[u8]) -> Result<(), CapacityExceeded> {
        let mut node = ROOT;
        for &symbol in symbols {
            let slot = self.nodes[node as usize].children[symbol as usize];
            node = if slot == NO_CHILD {
                if self.nodes.len() >= self.max_nodes {
                    return Err(CapacityExceeded { limit: self.max_nodes });
                }
                let id = self.nodes.len() as u32;
                self.nodes.push(TrieNode::new());
                self.nodes[node as usize].children[symbol as usize] = id;
                id
            } else {
                slot
            };
        }
        self.nodes[node as usize].terminal = true;
        self.nodes[node as usize].accept = true;
        Ok(())
    }

    pub fn child(&self, node: u32, symbol: u8) -> Option<u32> {
        let child = self.nodes[node as usize].children[symbol as usize];
        (child != NO_CHILD).then_some(child)
    }

    pub fn fail(&self, node: u32) -> u32 {
        self.nodes[node as usize].fail
    }

    pub fn is_terminal(&self, node: u32) -> bool {
        self.nodes[node as usize].terminal
    }

    /// Effective accept flag (own terminal flag OR'd along the failure chain).
    /// Only meaningful after `build_failure_links`.
    pub fn is_accepting(&self, node: u32) -> bool {
        self.nodes[node as usize].accept
    }

    /// Compute failure links breadth-first and propagate acceptance.
    ///
    /// Returns every node id in BFS order (root first).
    pub fn build_failure_links(&mut self) -> Vec<u32> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut queue = VecDeque::new();

        order.push(ROOT);
        self.nodes[ROOT as usize].fail = ROOT;
        for symbol in 0..ALPHABET_SIZE as u8 {
            if let Some(child) = self.child(ROOT, symbol) {
                self.nodes[child as usize].fail = ROOT;
                self.nodes[child as usize].accept = self.nodes[child as usize].terminal;
                queue.push_back(child);
            }
        }

        while let Some(node) = queue.pop_front() {
            order.push(node);

            for symbol in 0..ALPHABET_SIZE as u8 {
                let Some(child) = self.child(node, symbol) else {
                    continue;
                };

                let mut fallback = self.fail(node);
                while fallback != ROOT && self.child(fallback, symbol).is_none() {
                    fallback = self.fail(fallback);
                }
                let target = match self.child(fallback, symbol) {
                    // Never let a node fail to itself.
                    Some(target) if target != child => target,
                    _ => ROOT,
                };

                let inherited = self.nodes[target as usize].accept;
                let entry = &mut self.nodes[child as usize];
                entry.fail = target;
                entry.accept = entry.terminal || inherited;

                queue.push_back(child);
            }
        }

        order
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jg_core::fingerprint::encode_symbols;

    fn trie_of(patterns: &[&str]) -> Trie {
        let mut trie = Trie::with_capacity_limit(usize::MAX);
        for pattern in patterns {
            trie.insert(&encode_symbols(pattern).unwrap()).unwrap();
        }
        trie
    }

    fn walk(trie: &Trie, text: &str) -> u32 {
        let mut node = ROOT;
        for symbol in encode_symbols(text).unwrap() {
            node = trie.child(node, symbol).unwrap();
        }
        node
    }

    #[test]
    fn ids_follow_creation_order() {
        let trie = trie_of(&["ab", "ac"]);
        assert_eq!(trie.len(), 4);
        assert_eq!(walk(&trie, "a"), 1);
        assert_eq!(walk(&trie, "ab"), 2);
        assert_eq!(walk(&trie, "ac"), 3);
    }

    #[test]
    fn shared_prefixes_share_nodes() {
        let trie = trie_of(&["abcd", "abce"]);
        assert_eq!(trie.len(), 6);
    }

    #[test]
    fn failure_links_point_to_longest_suffix() {
        let mut trie = trie_of(&["abcd", "bc", "c"]);
        trie.build_failure_links();

        // "abc" -> "bc" -> "c" -> root
        let abc = walk(&trie, "abc");
        let bc = walk(&trie, "bc");
        let c = walk(&trie, "c");
        assert_eq!(trie.fail(abc), bc);
        assert_eq!(trie.fail(bc), c);
        assert_eq!(trie.fail(c), ROOT);
    }

    #[test]
    fn root_children_fail_to_root() {
        let mut trie = trie_of(&["a", "b"]);
        trie.build_failure_links();
        assert_eq!(trie.fail(walk(&trie, "a")), ROOT);
        assert_eq!(trie.fail(walk(&trie, "b")), ROOT);
    }

    #[test]
    fn repeated_symbol_does_not_self_loop() {
        let mut trie = trie_of(&["aaaa"]);
        trie.build_failure_links();
        let a = walk(&trie, "a");
        let aa = walk(&trie, "aa");
        let aaa = walk(&trie, "aaa");
        assert_eq!(trie.fail(a), ROOT);
        assert_eq!(trie.fail(aa), a);
        assert_eq!(trie.fail(aaa), aa);
    }

    #[test]
    fn acceptance_propagates_through_failure_links() {
        let mut trie = trie_of(&["abcd", "bc"]);
        let order = trie.build_failure_links();

        assert_eq!(order.len(), trie.len());
        assert_eq!(order[0], ROOT);

        let abc = walk(&trie, "abc");
        assert!(!trie.is_terminal(abc));
        assert!(trie.is_accepting(abc));
        assert!(!trie.is_accepting(walk(&trie, "ab")));
        assert!(!trie.is_accepting(ROOT));
    }

    #[test]
    fn insert_respects_capacity_limit() {
        let mut trie = Trie::with_capacity_limit(3);
        assert!(trie.insert(&[1, 2]).is_ok());
        assert_eq!(trie.insert(&[3]), Err(CapacityExceeded { limit: 3 }));
    }
}
