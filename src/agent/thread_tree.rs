//! Arena-backed comment tree.
//!
//! Comment threads can nest arbitrarily deep, so the tree is an arena with a
//! parent-id index built once and walked iteratively. Malformed data
//! (orphaned parents, parent cycles) truncates a walk instead of recursing
//! forever.

use std::collections::{HashMap, HashSet};

use crate::agent::store::CommentRecord;

pub struct CommentTree {
    arena: Vec<CommentRecord>,
    by_id: HashMap<String, usize>,
}

impl CommentTree {
    /// Builds the tree from an unordered comment list.
    ///
    /// A duplicated id keeps the first occurrence.
    pub fn build(comments: Vec<CommentRecord>) -> Self {
        let mut by_id = HashMap::with_capacity(comments.len());
        for (index, comment) in comments.iter().enumerate() {
            by_id.entry(comment.id.clone()).or_insert(index);
        }
        Self {
            arena: comments,
            by_id,
        }
    }

    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    pub fn get(&self, comment_id: &str) -> Option<&CommentRecord> {
        self.by_id.get(comment_id).map(|&index| &self.arena[index])
    }

    /// The ancestors of a comment, oldest first, excluding the comment
    /// itself.
    ///
    /// The chain stops at a root, at a parent id with no matching comment,
    /// or at the first repeated node when the parent links form a cycle.
    pub fn ancestor_chain(&self, comment_id: &str) -> Vec<&CommentRecord> {
        let mut chain = Vec::new();
        let mut seen = HashSet::new();

        let Some(&start) = self.by_id.get(comment_id) else {
            return chain;
        };
        seen.insert(start);

        let mut parent_id = self.arena[start].parent_id.as_deref();
        while let Some(id) = parent_id {
            let Some(&index) = self.by_id.get(id) else {
                break;
            };
            if !seen.insert(index) {
                break;
            }
            chain.push(&self.arena[index]);
            parent_id = self.arena[index].parent_id.as_deref();
        }

        chain.reverse();
        chain
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn comment(id: &str, parent_id: Option<&str>) -> CommentRecord {
        CommentRecord {
            id: id.to_string(),
            parent_id: parent_id.map(str::to_string),
            author: "someone".to_string(),
            body: format!("body of {id}"),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn chain_runs_root_to_parent() {
        let tree = CommentTree::build(vec![
            comment("a", None),
            comment("b", Some("a")),
            comment("c", Some("b")),
        ]);

        let chain = tree.ancestor_chain("c");
        let ids: Vec<&str> = chain.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }

    #[test]
    fn root_comment_has_no_ancestors() {
        let tree = CommentTree::build(vec![comment("a", None)]);
        assert!(tree.ancestor_chain("a").is_empty());
    }

    #[test]
    fn unknown_comment_yields_empty_chain() {
        let tree = CommentTree::build(vec![comment("a", None)]);
        assert!(tree.ancestor_chain("zzz").is_empty());
    }

    #[test]
    fn orphaned_parent_truncates_the_chain() {
        let tree = CommentTree::build(vec![
            comment("b", Some("deleted")),
            comment("c", Some("b")),
        ]);

        let chain = tree.ancestor_chain("c");
        let ids: Vec<&str> = chain.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["b"]);
    }

    #[test]
    fn parent_cycle_terminates() {
        // a -> b -> a, malformed but must not loop.
        let tree = CommentTree::build(vec![
            comment("a", Some("b")),
            comment("b", Some("a")),
            comment("c", Some("a")),
        ]);

        let chain = tree.ancestor_chain("c");
        let ids: Vec<&str> = chain.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["b", "a"]);
    }

    #[test]
    fn deep_chain_does_not_recurse() {
        let mut comments = vec![comment("c0", None)];
        for n in 1..5000 {
            let parent = format!("c{}", n - 1);
            comments.push(comment(&format!("c{n}"), Some(&parent)));
        }
        let tree = CommentTree::build(comments);

        let chain = tree.ancestor_chain("c4999");
        assert_eq!(chain.len(), 4999);
        assert_eq!(chain[0].id, "c0");
    }

    #[test]
    fn duplicate_ids_keep_the_first() {
        let mut first = comment("dup", None);
        first.body = "first".to_string();
        let mut second = comment("dup", None);
        second.body = "second".to_string();

        let tree = CommentTree::build(vec![first, second]);
        assert_eq!(tree.get("dup").map(|c| c.body.as_str()), Some("first"));
        assert_eq!(tree.len(), 2);
    }
}
