//! Open-stack rebalancing.
//!
//! Template control flow is free to skip or repeat parts of the tree whose
//! element boundaries do not line up with the control-flow boundaries.
//! Before a node is appended to the output, the rebalancer compares the
//! node's place in the original tree with the currently open elements and,
//! when they disagree, emits the minimal sequence of synthetic end tags
//! and reopened start tags that puts the node into a balanced context.

use std::rc::Rc;

use thiserror::Error;

use super::ExecState;
use crate::xmltree::{Node, Token};

#[derive(Error, Debug, Clone)]
#[error("rebalancing failed: {0}")]
pub struct RebalanceError(pub String);

/// Rebalances the open stack for `incoming`, appending synthetic tokens to
/// the output path as needed. Must run before `incoming` itself is
/// appended.
pub(super) fn rebalance(state: &mut ExecState, incoming: &Rc<Node>) -> Result<(), RebalanceError> {
    // Detached from the tree, or nothing open yet: no balancing context.
    let Some(parent) = incoming.parent() else {
        return Ok(());
    };
    if state.open_stack.is_empty() {
        return Ok(());
    }
    let Some(previous) = state.output_path.last().cloned() else {
        return Ok(());
    };
    let Some(top) = state.open_stack.last().cloned() else {
        return Ok(());
    };

    // Sibling of the previous node: same depth, nothing to do.
    if same_node(Some(&parent), previous.parent().as_ref()) {
        return Ok(());
    }
    // Child of the previous node: depth grew by one legitimately.
    if Rc::ptr_eq(&parent, &previous) {
        return Ok(());
    }
    // First node after an end tag popped its parent: still consistent.
    if Rc::ptr_eq(&parent, &top) {
        return Ok(());
    }

    let (left_tree, _common, right_tree) = common_paths(incoming, &state.open_stack);

    // A lone end tag that itself restores the balance needs no synthetic
    // tokens: `<body><p>[[ if false then ]]</p><p>Hello</p><p>[[ end ]]</p>`
    // renders as `<body><p></p></body>`, not as two empty paragraphs.
    if left_tree.len() == 1 && right_tree.len() == 1 {
        if let (Some(left), Some(right)) = (left_tree[0].start_local(), right_tree[0].start_local()) {
            if let Some(Token::EndElement { name }) = incoming.token() {
                if left == right && left == name.local {
                    return Ok(());
                }
            }
        }
    }

    // Close everything on the open stack down to the common ancestor.
    for open in right_tree.iter().rev() {
        let Some(Token::StartElement { name, .. }) = open.token() else {
            return Err(RebalanceError("open stack holds a non-element node".to_string()));
        };
        let end = Node::detached(Token::EndElement { name: name.clone() }, Some(open));
        state.output_path.push(end);
        state.trace.push(format!("EndNode({}) - balanced", name.local));
        state.open_stack.pop();
    }

    // Reopen the incoming node's ancestor chain below the common ancestor.
    for open in &left_tree {
        let Some(Token::StartElement { name, .. }) = open.token() else {
            return Err(RebalanceError(
                "ancestor chain of the incoming node holds a non-element node".to_string(),
            ));
        };
        state.output_path.push(Rc::clone(open));
        state.trace.push(format!("StartNode({}) - balanced", name.local));
        state.open_stack.push(Rc::clone(open));
    }

    Ok(())
}

/// Splits the ancestor chains of `node` and the open stack at their deepest
/// common node. `left` holds the ancestors of `node` below the common node
/// in root-to-leaf order; `right` holds the open-stack suffix above the
/// common node, also root-to-leaf. `common` is `None` when the chains do
/// not meet, in which case `right` is the whole stack.
pub(super) fn common_paths(
    node: &Rc<Node>,
    stack: &[Rc<Node>],
) -> (Vec<Rc<Node>>, Option<Rc<Node>>, Vec<Rc<Node>>) {
    let mut left = Vec::new();
    let mut common = None;

    let mut cursor = node.parent();
    while let Some(ancestor) = cursor {
        if stack.iter().any(|open| Rc::ptr_eq(open, &ancestor)) {
            common = Some(ancestor);
            break;
        }
        cursor = ancestor.parent();
        left.push(ancestor);
    }

    let mut right = Vec::new();
    for open in stack.iter().rev() {
        if let Some(common) = &common {
            if Rc::ptr_eq(open, common) {
                break;
            }
        }
        right.push(Rc::clone(open));
    }

    left.reverse();
    right.reverse();
    (left, common, right)
}

fn same_node(a: Option<&Rc<Node>>, b: Option<&Rc<Node>>) -> bool {
    match (a, b) {
        (Some(a), Some(b)) => Rc::ptr_eq(a, b),
        (None, None) => true,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::xmltree::Token;

    fn chardata(label: &str, parent: Option<&Rc<Node>>) -> Rc<Node> {
        Node::detached(Token::CharData(label.to_string()), parent)
    }

    #[test]
    fn common_paths_without_stack() {
        let node_a = chardata("a", None);
        let (left, common, right) = common_paths(&node_a, &[]);
        assert!(left.is_empty());
        assert!(common.is_none());
        assert!(right.is_empty());
    }

    #[test]
    fn common_paths_splits_at_deepest_shared_ancestor() {
        // a ─ b ─ c ─ d ─ e      (stack)
        //      └─ x ─ y ─ z      (incoming chain)
        let a = chardata("a", None);
        let b = chardata("b", Some(&a));
        let c = chardata("c", Some(&b));
        let d = chardata("d", Some(&c));
        let e = chardata("e", Some(&d));
        let x = chardata("x", Some(&b));
        let y = chardata("y", Some(&x));
        let z = chardata("z", Some(&y));

        let stack = vec![
            Rc::clone(&a),
            Rc::clone(&b),
            Rc::clone(&c),
            Rc::clone(&d),
            Rc::clone(&e),
        ];
        let (left, common, right) = common_paths(&z, &stack);

        assert_eq!(left.len(), 2);
        assert!(Rc::ptr_eq(&left[0], &x));
        assert!(Rc::ptr_eq(&left[1], &y));

        assert!(Rc::ptr_eq(&common.unwrap(), &b));

        assert_eq!(right.len(), 3);
        assert!(Rc::ptr_eq(&right[0], &c));
        assert!(Rc::ptr_eq(&right[1], &d));
        assert!(Rc::ptr_eq(&right[2], &e));
    }

    #[test]
    fn common_paths_with_disjoint_stack_returns_whole_stack() {
        let a = chardata("a", None);
        let b = chardata("b", Some(&a));
        let other = chardata("other", None);
        let stack = vec![Rc::clone(&other)];
        let (left, common, right) = common_paths(&b, &stack);
        // The incoming chain never meets the stack: everything reopens.
        assert_eq!(left.len(), 1);
        assert!(Rc::ptr_eq(&left[0], &a));
        assert!(common.is_none());
        assert_eq!(right.len(), 1);
        assert!(Rc::ptr_eq(&right[0], &other));
    }
}
