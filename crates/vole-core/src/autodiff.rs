use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};

use crate::element::Element;
use crate::error::Result;
use crate::tensor::Tensor;

// Reverse-mode sweep over the tape
//
// The forward pass leaves a DAG behind: every tracked tensor points at the
// Function that made it and the inputs it was made from. Backpropagation
// is two steps:
//
//   1. topological_sort — DFS from the root, post-order, reversed, so the
//      root comes first and every node appears before all of its inputs.
//      Constants (no history) are pruned from the traversal entirely.
//   2. backpropagate — walk that order with a map from node identity to
//      accumulated gradient. At each non-leaf node, run the Function's
//      backward, reconcile each produced gradient to its input's shape,
//      and fold it into the map; when two paths reach the same node their
//      gradients sum. Leaves deposit the finished gradient in their grad
//      slot.
//
// Node identity is the address of the shared History allocation, so all
// clones of one tensor handle count as the same node.

pub(crate) fn topological_sort<T: Element>(root: &Tensor<T>) -> Vec<Tensor<T>> {
    let mut visited = HashSet::new();
    let mut order = Vec::new();
    visit(root, &mut visited, &mut order);
    order.reverse();
    order
}

fn visit<T: Element>(t: &Tensor<T>, visited: &mut HashSet<usize>, order: &mut Vec<Tensor<T>>) {
    let Some(history) = t.history() else {
        return; // constant
    };
    if !visited.insert(t.id()) {
        return;
    }
    for input in &history.inputs {
        visit(input, visited, order);
    }
    order.push(t.clone());
}

pub(crate) fn backpropagate<T: Element>(root: &Tensor<T>, seed: Tensor<T>) -> Result<()> {
    let order = topological_sort(root);
    let mut derivs: HashMap<usize, Tensor<T>> = HashMap::new();
    derivs.insert(root.id(), seed);

    for node in &order {
        let grad = match derivs.get(&node.id()) {
            Some(g) => g.clone(),
            // every non-root entry was deposited by an earlier node
            None => panic!("no derivative recorded for a traversed node"),
        };
        let history = match node.history() {
            Some(h) => h,
            None => panic!("constant tensor escaped the traversal prune"),
        };

        let Some(func) = history.func.as_ref() else {
            // leaf: the sweep ends here, deposit into the grad slot
            node.add_grad(&grad);
            continue;
        };

        let grads = func.backward(&history.ctx, &grad)?;
        assert_eq!(
            grads.len(),
            history.inputs.len(),
            "backward produced {} gradients for {} inputs",
            grads.len(),
            history.inputs.len(),
        );
        for (input, g) in history.inputs.iter().zip(grads) {
            if input.is_constant() {
                continue;
            }
            let g = input.expand(&g)?;
            match derivs.entry(input.id()) {
                Entry::Occupied(mut e) => {
                    let sum = e.get().add_raw(&g)?;
                    e.insert(sum);
                }
                Entry::Vacant(e) => {
                    e.insert(g);
                }
            }
        }
    }
    Ok(())
}
