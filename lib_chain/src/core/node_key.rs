//! # Node Ordering Key
//!
//! Chain nodes are named `index#base` (`0#.DJI`, `1F#.DJI`) or carry a bare root
//! name (`.DJI`). `NodeKey` orders them by `base` first and then numerically by
//! `index`, so the engine can ask for "the most recently resolved node" without
//! depending on the order in which responses arrived.
//!
//! Indices are compared by significant length and then digit by digit. For any
//! radix up to 36 this is the numeric order, so the same key works for decimal
//! and hexadecimal chains, and for the mixed probe batch that is used to tell them
//! apart.

use std::cmp::Ordering;
use std::fmt;

/// Index radix of synthesized node names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Radix {
    /// `0#X`, `9#X`, `10#X`, ...
    #[default]
    Decimal,
    /// `0#X`, `9#X`, `A#X`, ...
    Hexadecimal,
}

impl Radix {
    /// Formats `index` as a node name on `base`.
    pub fn node_name(self, index: u32, base: &str) -> String {
        match self {
            Radix::Decimal => format!("{}#{}", index, base),
            Radix::Hexadecimal => format!("{:X}#{}", index, base),
        }
    }
}

/// Splits a node name into `(index, base)`.
///
/// The split happens at the first `#`. A name without one is a bare root name
/// and has no index.
pub fn split_node_name(name: &str) -> (Option<&str>, &str) {
    match name.split_once('#') {
        Some((index, base)) => (Some(index), base),
        None => (None, name),
    }
}

/// # Node Key
///
/// Total order over node names. Two keys are equal only when the names are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct NodeKey {
    name: String,
}

impl NodeKey {
    /// Wraps a node name.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// The full node name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

impl From<&str> for NodeKey {
    fn from(name: &str) -> Self {
        NodeKey::new(name)
    }
}

impl From<String> for NodeKey {
    fn from(name: String) -> Self {
        NodeKey::new(name)
    }
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Compares two index strings numerically without knowing their radix.
fn compare_index(a: &str, b: &str) -> Ordering {
    let a_sig = a.trim_start_matches('0');
    let b_sig = b.trim_start_matches('0');
    a_sig
        .len()
        .cmp(&b_sig.len())
        .then_with(|| {
            a_sig
                .bytes()
                .map(|c| c.to_ascii_uppercase())
                .cmp(b_sig.bytes().map(|c| c.to_ascii_uppercase()))
        })
}

impl Ord for NodeKey {
    fn cmp(&self, other: &Self) -> Ordering {
        let (a_index, a_base) = split_node_name(&self.name);
        let (b_index, b_base) = split_node_name(&other.name);

        a_base
            .cmp(b_base)
            .then_with(|| match (a_index, b_index) {
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Less,
                (Some(_), None) => Ordering::Greater,
                (Some(a), Some(b)) => compare_index(a, b),
            })
            // Keeps the order total for spellings like `01#X` and `1#X`.
            .then_with(|| self.name.cmp(&other.name))
    }
}

impl PartialOrd for NodeKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sorted(names: &[&str]) -> Vec<String> {
        let mut keys: Vec<NodeKey> = names.iter().map(|n| NodeKey::from(*n)).collect();
        keys.sort();
        keys.into_iter().map(|k| k.name().to_string()).collect()
    }

    #[test]
    fn test_decimal_indices_sort_numerically() {
        assert_eq!(
            sorted(&["10#X", "2#X", "1#X", "0#X", "100#X"]),
            vec!["0#X", "1#X", "2#X", "10#X", "100#X"]
        );
    }

    #[test]
    fn test_hex_indices_sort_numerically() {
        assert_eq!(
            sorted(&["1F#X", "A#X", "10#X", "9#X", "3C#X", "60#X"]),
            vec!["9#X", "A#X", "10#X", "1F#X", "3C#X", "60#X"]
        );
    }

    #[test]
    fn test_bare_root_sorts_before_derived_names() {
        assert_eq!(sorted(&["1#X", "X", "0#X"]), vec!["X", "0#X", "1#X"]);
    }

    #[test]
    fn test_grouped_by_base() {
        assert_eq!(
            sorted(&["1#B", "0#A", "2#A", "0#B"]),
            vec!["0#A", "2#A", "0#B", "1#B"]
        );
    }

    #[test]
    fn test_leading_zeros_keep_order_total() {
        let a = NodeKey::from("01#X");
        let b = NodeKey::from("1#X");
        assert_ne!(a.cmp(&b), Ordering::Equal);
        assert!(NodeKey::from("01#X") < NodeKey::from("2#X"));
    }

    #[test]
    fn test_radix_node_name() {
        assert_eq!(Radix::Decimal.node_name(31, ".DJI"), "31#.DJI");
        assert_eq!(Radix::Hexadecimal.node_name(31, ".DJI"), "1F#.DJI");
    }

    #[test]
    fn test_split_node_name() {
        assert_eq!(split_node_name("0#UNIVERSE.PK"), (Some("0"), "UNIVERSE.PK"));
        assert_eq!(split_node_name(".DJI"), (None, ".DJI"));
    }
}
