//! Fan a per-stack operation out over an environment tree.
//!
//! Any operation written for a single leaf can be lifted into a bulk
//! operation over a whole sub-tree: leaves report `{leaf_name: result}`,
//! composites merge what their children report into one flat map.

use std::collections::{BTreeMap, BTreeSet};
use std::thread;

use crate::error::{Error, Result};

/// A node in a dispatch tree.
pub trait Dispatchable: Sync + Sized {
    fn name(&self) -> &str;
    fn is_leaf(&self) -> bool;
    /// Direct children; empty for leaves.
    fn children(&self) -> Vec<&Self>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchMode {
    #[default]
    Sequential,
    /// One scoped thread per child subtree.
    Parallel,
}

/// Run `op` on every leaf under `node` and merge the results.
///
/// The merged map is keyed by leaf name and is the same in both modes. A leaf
/// name seen in two branches fails with `dispatch.duplicate_leaf` before `op`
/// runs on any leaf. Failures inside `op` belong to `T` and never stop
/// sibling leaves.
pub fn recurse_into_sub_environments<N, T, F>(
    node: &N,
    mode: DispatchMode,
    op: &F,
) -> Result<BTreeMap<String, T>>
where
    N: Dispatchable,
    T: Send,
    F: Fn(&N) -> T + Sync,
{
    check_unique_leaves(node, &mut BTreeSet::new())?;
    dispatch_node(node, mode, op)
}

fn check_unique_leaves<'a, N: Dispatchable>(
    node: &'a N,
    seen: &mut BTreeSet<&'a str>,
) -> Result<()> {
    if node.is_leaf() {
        if !seen.insert(node.name()) {
            return Err(Error::dispatch_duplicate_leaf(node.name().to_string()));
        }
        return Ok(());
    }

    for child in node.children() {
        check_unique_leaves(child, seen)?;
    }
    Ok(())
}

fn dispatch_node<N, T, F>(node: &N, mode: DispatchMode, op: &F) -> Result<BTreeMap<String, T>>
where
    N: Dispatchable,
    T: Send,
    F: Fn(&N) -> T + Sync,
{
    if node.is_leaf() {
        log_status!("dispatch", "{}", node.name());
        let mut results = BTreeMap::new();
        results.insert(node.name().to_string(), op(node));
        return Ok(results);
    }

    let children = node.children();
    let child_results = match mode {
        DispatchMode::Sequential => children
            .into_iter()
            .map(|child| dispatch_node(child, mode, op))
            .collect::<Vec<_>>(),
        DispatchMode::Parallel => dispatch_parallel(&children, mode, op)?,
    };

    let mut merged = BTreeMap::new();
    for results in child_results {
        merged.extend(results?);
    }
    Ok(merged)
}

fn dispatch_parallel<N, T, F>(
    children: &[&N],
    mode: DispatchMode,
    op: &F,
) -> Result<Vec<Result<BTreeMap<String, T>>>>
where
    N: Dispatchable,
    T: Send,
    F: Fn(&N) -> T + Sync,
{
    thread::scope(|scope| {
        let handles: Vec<_> = children
            .iter()
            .map(|child| scope.spawn(move || dispatch_node(*child, mode, op)))
            .collect();

        handles
            .into_iter()
            .map(|handle| {
                handle.join().map_err(|_| {
                    Error::internal_unexpected("Dispatch thread panicked".to_string())
                })
            })
            .collect()
    })
}

/// Lift a per-leaf operation into a tree operation with a fixed mode.
pub fn lift<N, T, F>(mode: DispatchMode, op: F) -> impl Fn(&N) -> Result<BTreeMap<String, T>>
where
    N: Dispatchable,
    T: Send,
    F: Fn(&N) -> T + Sync,
{
    move |node| recurse_into_sub_environments(node, mode, &op)
}
