//! Load directives
//!
//! Each `load*` call on a query registers one path. Paths are merged into a
//! [`LoadTree`] so that paths sharing a prefix share one node.

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadMode {
    /// Joined into the same statement
    Eager,
    /// Fetched by id (or by owner id) on first access
    Lazy,
    /// Fetched on first access together with every other row of the same query run
    Batch,
}

/// One requested related-object fetch path node.
#[derive(Debug, Clone, PartialEq)]
pub struct LoadingPropertyInfo {
    pub property: &'static str,
    pub mode: LoadMode,
    pub children: LoadTree,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadTree {
    pub children: Vec<LoadingPropertyInfo>,
}

impl LoadTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.children.is_empty()
    }

    pub fn get(&self, property: &str) -> Option<&LoadingPropertyInfo> {
        self.children.iter().find(|c| c.property == property)
    }

    /// Registers `path`. Nodes created on the way take `mode`; the last node's
    /// mode is overwritten, existing intermediate nodes keep theirs.
    pub fn add(&mut self, path: &[&'static str], mode: LoadMode) {
        let Some((first, rest)) = path.split_first() else {
            return;
        };
        let position = match self.children.iter().position(|c| c.property == *first) {
            Some(position) => position,
            None => {
                self.children.push(LoadingPropertyInfo {
                    property: first,
                    mode,
                    children: LoadTree::new(),
                });
                self.children.len() - 1
            }
        };
        let node = &mut self.children[position];
        if rest.is_empty() {
            node.mode = mode;
        } else {
            node.children.add(rest, mode);
        }
    }

    /// Folds another tree in; nodes present in both take `other`'s mode.
    pub fn merge(&mut self, other: &LoadTree) {
        for node in &other.children {
            match self.children.iter_mut().find(|c| c.property == node.property) {
                Some(existing) => {
                    existing.mode = node.mode;
                    existing.children.merge(&node.children);
                }
                None => self.children.push(node.clone()),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_shared_prefix_shares_node() {
        let mut tree = LoadTree::new();
        tree.add(&["orders", "lines"], LoadMode::Eager);
        tree.add(&["orders", "customer"], LoadMode::Lazy);
        assert_eq!(tree.children.len(), 1);
        let orders = tree.get("orders").unwrap();
        assert_eq!(orders.mode, LoadMode::Eager);
        assert_eq!(orders.children.children.len(), 2);
        assert_eq!(orders.children.get("customer").unwrap().mode, LoadMode::Lazy);
    }

    #[test]
    fn test_explicit_registration_overrides_mode() {
        let mut tree = LoadTree::new();
        tree.add(&["orders", "lines"], LoadMode::Batch);
        assert_eq!(tree.get("orders").unwrap().mode, LoadMode::Batch);
        tree.add(&["orders"], LoadMode::Eager);
        assert_eq!(tree.get("orders").unwrap().mode, LoadMode::Eager);
        assert_eq!(
            tree.get("orders").unwrap().children.get("lines").unwrap().mode,
            LoadMode::Batch
        );
    }

    #[test]
    fn test_merge() {
        let mut a = LoadTree::new();
        a.add(&["customer"], LoadMode::Lazy);
        let mut b = LoadTree::new();
        b.add(&["customer", "orders"], LoadMode::Eager);
        b.add(&["lines"], LoadMode::Eager);
        a.merge(&b);
        assert_eq!(a.children.len(), 2);
        assert_eq!(a.get("customer").unwrap().mode, LoadMode::Eager);
        assert!(a.get("customer").unwrap().children.get("orders").is_some());
    }
}
