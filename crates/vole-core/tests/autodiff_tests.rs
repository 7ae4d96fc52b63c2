// Integration tests for the reverse-mode sweep: gradients through every
// primitive, multi-path accumulation, broadcasting reconciliation, and the
// gradient state machine.

use vole_core::{Backend, Error, Tensor};

fn approx_eq(a: f64, b: f64, tol: f64) -> bool {
    (a - b).abs() < tol
}

fn assert_vec_approx(got: &[f64], expected: &[f64], tol: f64) {
    assert_eq!(
        got.len(),
        expected.len(),
        "length mismatch: {} vs {}",
        got.len(),
        expected.len()
    );
    for (i, (g, e)) in got.iter().zip(expected.iter()).enumerate() {
        assert!(
            approx_eq(*g, *e, tol),
            "index {}: got {} expected {} (tol {})",
            i,
            g,
            e,
            tol
        );
    }
}

fn leaf(data: Vec<f64>, shape: &[usize]) -> Tensor<f64> {
    Tensor::from_vec(data, shape, Backend::seq())
        .unwrap()
        .set_requires_grad(true)
}

#[test]
fn test_negate_gradient() -> vole_core::Result<()> {
    let x = leaf(vec![1.0, 2.0, 3.0], &[3]);
    let loss = x.neg()?.sum(None)?;
    loss.backward()?;

    let grad = x.grad().expect("leaf gradient");
    assert_eq!(grad.dims(), &[3]);
    assert_vec_approx(&grad.to_vec(), &[-1.0, -1.0, -1.0], 1e-12);
    Ok(())
}

#[test]
fn test_multiply_gradients() -> vole_core::Result<()> {
    let x = leaf(vec![2.0, 3.0], &[2]);
    let y = leaf(vec![5.0, 7.0], &[2]);
    let loss = x.mul(&y)?.sum(None)?;
    loss.backward()?;

    assert_vec_approx(&x.grad().unwrap().to_vec(), &[5.0, 7.0], 1e-12);
    assert_vec_approx(&y.grad().unwrap().to_vec(), &[2.0, 3.0], 1e-12);
    Ok(())
}

#[test]
fn test_sum_full_reduction_gradient() -> vole_core::Result<()> {
    let x = leaf(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]);
    let loss = x.sum(None)?;
    assert_eq!(loss.item()?, 21.0);
    loss.backward()?;

    let grad = x.grad().unwrap();
    assert_eq!(grad.dims(), &[2, 3]);
    assert_vec_approx(&grad.to_vec(), &[1.0; 6], 1e-12);
    Ok(())
}

#[test]
fn test_sum_one_dim_gradient() -> vole_core::Result<()> {
    let x = leaf(vec![1.0, 2.0, 3.0, 4.0], &[2, 2]);
    // sum over rows keeps a size-1 dim: [2, 2] → [1, 2]
    let s = x.sum(Some(0))?;
    assert_eq!(s.dims(), &[1, 2]);
    assert_vec_approx(&s.to_vec(), &[4.0, 6.0], 1e-12);

    let loss = s.sum(None)?;
    loss.backward()?;
    assert_vec_approx(&x.grad().unwrap().to_vec(), &[1.0; 4], 1e-12);
    Ok(())
}

#[test]
fn test_matmul_identity_gradient() -> vole_core::Result<()> {
    let a = leaf(vec![1.0, 2.0, 3.0, 4.0], &[2, 2]);
    let eye = Tensor::eye(2, Backend::seq())?;
    let y = a.matmul(&eye)?;
    assert_vec_approx(&y.to_vec(), &[1.0, 2.0, 3.0, 4.0], 1e-12);

    let loss = y.sum(None)?;
    loss.backward()?;
    // d(sum(A @ I))/dA = 1 @ Iᵀ = all ones
    assert_vec_approx(&a.grad().unwrap().to_vec(), &[1.0; 4], 1e-12);
    Ok(())
}

#[test]
fn test_matmul_gradients_both_sides() -> vole_core::Result<()> {
    let a = leaf(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], &[2, 3]);
    let b = leaf(vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0], &[3, 2]);
    let loss = a.matmul(&b)?.sum(None)?;
    loss.backward()?;

    // dA = 1 @ Bᵀ: row i of dA is the column sums of Bᵀ, i.e. row sums of B
    assert_vec_approx(
        &a.grad().unwrap().to_vec(),
        &[5.0, 7.0, 9.0, 5.0, 7.0, 9.0],
        1e-12,
    );
    // dB = Aᵀ @ 1: row j of dB is the column sums of A
    assert_vec_approx(
        &b.grad().unwrap().to_vec(),
        &[5.0, 5.0, 7.0, 7.0, 9.0, 9.0],
        1e-12,
    );
    Ok(())
}

#[test]
fn test_batched_matmul_gradients_reduce_to_operand_shapes() -> vole_core::Result<()> {
    // [2, 2, 2] @ [2, 1]: the rank-2 rhs broadcasts across the batch, so
    // its gradient has to be summed back over the batch axis
    let a = leaf(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0], &[2, 2, 2]);
    let b = leaf(vec![1.0, -1.0], &[2, 1]);
    let loss = a.matmul(&b)?.sum(None)?;
    loss.backward()?;

    // dA = 1 @ Bᵀ, replicated per batch
    let ga = a.grad().unwrap();
    assert_eq!(ga.dims(), &[2, 2, 2]);
    assert_vec_approx(
        &ga.to_vec(),
        &[1.0, -1.0, 1.0, -1.0, 1.0, -1.0, 1.0, -1.0],
        1e-12,
    );

    // dB = Σ_batch Aᵀ @ 1: the column sums of each batch of A, summed
    let gb = b.grad().unwrap();
    assert_eq!(gb.dims(), &[2, 1]);
    assert_vec_approx(&gb.to_vec(), &[16.0, 20.0], 1e-12);
    Ok(())
}

#[test]
fn test_multi_path_accumulation() -> vole_core::Result<()> {
    // x feeds the same Mul twice: d(x·x)/dx = 2x
    let x = leaf(vec![3.0, -4.0], &[2]);
    let loss = x.mul(&x)?.sum(None)?;
    loss.backward()?;
    assert_vec_approx(&x.grad().unwrap().to_vec(), &[6.0, -8.0], 1e-12);
    Ok(())
}

#[test]
fn test_diamond_graph_accumulation() -> vole_core::Result<()> {
    // y = x + x and z = x * x share the leaf; d(y + z) = 2 + 2x
    let x = leaf(vec![1.0, 2.0], &[2]);
    let y = x.add(&x)?;
    let z = x.mul(&x)?;
    let loss = y.add(&z)?.sum(None)?;
    loss.backward()?;
    assert_vec_approx(&x.grad().unwrap().to_vec(), &[4.0, 6.0], 1e-12);
    Ok(())
}

#[test]
fn test_broadcast_add_gradients() -> vole_core::Result<()> {
    let a = leaf(vec![1.0, 2.0, 3.0, 4.0], &[4, 1]);
    let b = leaf(vec![10.0, 20.0, 30.0, 40.0], &[1, 4]);
    let out = a.add(&b)?;
    assert_eq!(out.dims(), &[4, 4]);

    let loss = out.sum(None)?;
    loss.backward()?;

    // each element of a reached 4 outputs, same for b — and each gradient
    // keeps its own operand's exact shape
    let ga = a.grad().unwrap();
    let gb = b.grad().unwrap();
    assert_eq!(ga.dims(), &[4, 1]);
    assert_eq!(gb.dims(), &[1, 4]);
    assert_vec_approx(&ga.to_vec(), &[4.0; 4], 1e-12);
    assert_vec_approx(&gb.to_vec(), &[4.0; 4], 1e-12);
    Ok(())
}

#[test]
fn test_gradient_shape_matches_leaf_exactly() -> vole_core::Result<()> {
    // broadcasting adds a leading axis; the reconciled gradient must come
    // back as [4], not [1, 4]
    let a = leaf(vec![0.0; 8], &[2, 4]);
    let b = leaf(vec![1.0, 2.0, 3.0, 4.0], &[4]);
    let loss = a.add(&b)?.sum(None)?;
    loss.backward()?;

    let gb = b.grad().unwrap();
    assert_eq!(gb.dims(), &[4]);
    assert_vec_approx(&gb.to_vec(), &[2.0; 4], 1e-12);
    Ok(())
}

#[test]
fn test_relu_gradient_mask() -> vole_core::Result<()> {
    let x = leaf(vec![-1.0, 0.0, 2.0], &[3]);
    let loss = x.relu()?.sum(None)?;
    loss.backward()?;
    // the mask passes gradient where input == relu(input), including 0
    assert_vec_approx(&x.grad().unwrap().to_vec(), &[0.0, 1.0, 1.0], 1e-12);
    Ok(())
}

#[test]
fn test_sigmoid_gradient_value() -> vole_core::Result<()> {
    let x = leaf(vec![0.0], &[1]);
    let s = x.sigmoid()?;
    assert!(approx_eq(s.item()?, 0.5, 1e-12));
    s.backward()?;
    // s(1-s) at s = 0.5
    assert!(approx_eq(x.grad().unwrap().item()?, 0.25, 1e-12));
    Ok(())
}

#[test]
fn test_exp_and_inv_gradients() -> vole_core::Result<()> {
    let x = leaf(vec![1.0], &[1]);
    x.exp()?.backward()?;
    assert!(approx_eq(x.grad().unwrap().item()?, 1.0f64.exp(), 1e-12));

    let y = leaf(vec![2.0], &[1]);
    y.inv()?.backward()?;
    // d(1/x)/dx = -1/x²
    assert!(approx_eq(y.grad().unwrap().item()?, -0.25, 1e-12));
    Ok(())
}

#[test]
fn test_view_gradient_restores_shape() -> vole_core::Result<()> {
    let x = leaf(vec![1.0, 2.0, 3.0, 4.0], &[2, 2]);
    let loss = x.view([4])?.mul_scalar(2.0)?.sum(None)?;
    loss.backward()?;

    let grad = x.grad().unwrap();
    assert_eq!(grad.dims(), &[2, 2]);
    assert_vec_approx(&grad.to_vec(), &[2.0; 4], 1e-12);
    Ok(())
}

#[test]
fn test_detach_stops_gradient() -> vole_core::Result<()> {
    let x = leaf(vec![3.0, 5.0], &[2]);
    // the detached factor is a constant: d(c·x)/dx = c = x's values
    let c = x.detach();
    let loss = c.mul(&x)?.sum(None)?;
    loss.backward()?;
    assert_vec_approx(&x.grad().unwrap().to_vec(), &[3.0, 5.0], 1e-12);
    Ok(())
}

#[test]
fn test_constants_are_pruned() -> vole_core::Result<()> {
    let x = leaf(vec![1.0, 2.0], &[2]);
    let c = Tensor::from_vec(vec![10.0, 20.0], [2], Backend::seq())?;
    let loss = x.mul(&c)?.sum(None)?;
    loss.backward()?;

    assert_vec_approx(&x.grad().unwrap().to_vec(), &[10.0, 20.0], 1e-12);
    assert!(c.grad().is_none());
    Ok(())
}

#[test]
fn test_repeated_backward_accumulates_and_zero_grad_resets() -> vole_core::Result<()> {
    let x = leaf(vec![1.0, 1.0], &[2]);
    let loss = x.mul_scalar(3.0)?.sum(None)?;
    loss.backward()?;
    loss.backward()?;
    assert_vec_approx(&x.grad().unwrap().to_vec(), &[6.0, 6.0], 1e-12);

    x.zero_grad();
    assert!(x.grad().is_none());
    loss.backward()?;
    assert_vec_approx(&x.grad().unwrap().to_vec(), &[3.0, 3.0], 1e-12);
    Ok(())
}

#[test]
fn test_backward_with_explicit_seed() -> vole_core::Result<()> {
    let x = leaf(vec![1.0, 2.0, 3.0], &[3]);
    let y = x.mul_scalar(2.0)?;
    let seed = Tensor::from_vec(vec![1.0, 10.0, 100.0], [3], Backend::seq())?;
    y.backward_with(&seed)?;
    assert_vec_approx(&x.grad().unwrap().to_vec(), &[2.0, 20.0, 200.0], 1e-12);
    Ok(())
}

#[test]
fn test_backward_errors() {
    let backend = Backend::<f64>::seq();

    // non-scalar without a seed
    let x = Tensor::from_vec(vec![1.0, 2.0], [2], backend.clone())
        .unwrap()
        .set_requires_grad(true);
    let y = x.neg().unwrap();
    assert!(matches!(y.backward(), Err(Error::NotAScalar { .. })));

    // constant tensors have no tape to walk
    let c = Tensor::from_vec(vec![1.0], [1], backend).unwrap();
    assert!(c.backward().is_err());
}

#[test]
fn test_requires_grad_state_machine() -> vole_core::Result<()> {
    let c = Tensor::from_vec(vec![1.0, 2.0], [2], Backend::<f64>::seq())?;
    assert!(c.is_constant() && !c.is_leaf());

    let leaf = c.set_requires_grad(true);
    assert!(leaf.is_leaf() && leaf.requires_grad());

    let node = leaf.neg()?;
    assert!(node.requires_grad() && !node.is_leaf() && !node.is_constant());

    let back = node.detach();
    assert!(back.is_constant());

    let off = leaf.set_requires_grad(false);
    assert!(off.is_constant());
    Ok(())
}

#[test]
fn test_parents_reflect_the_graph() -> vole_core::Result<()> {
    let c = Tensor::from_vec(vec![1.0, 2.0], [2], Backend::<f64>::seq())?;
    assert!(c.parents().is_empty());

    let x = leaf(vec![3.0, 4.0], &[2]);
    assert!(x.parents().is_empty());

    let node = x.mul(&c)?;
    let parents = node.parents();
    assert_eq!(parents.len(), 2);
    assert_eq!(parents[0].to_vec(), x.to_vec());
    assert_eq!(parents[1].to_vec(), c.to_vec());
    Ok(())
}

#[test]
fn test_softmax_gradient_sums_to_zero() -> vole_core::Result<()> {
    // softmax output sums to 1 along the dim, so the gradient of one
    // component pushes mass between components: the input gradient sums
    // to ~0
    let x = leaf(vec![0.5, -0.5, 1.5], &[1, 3]);
    let sm = x.softmax(1)?;
    let total: f64 = sm.to_vec().iter().sum();
    assert!(approx_eq(total, 1.0, 1e-9));

    // pick out the first component via a constant mask
    let mask = Tensor::from_vec(vec![1.0, 0.0, 0.0], [1, 3], Backend::seq())?;
    sm.mul(&mask)?.sum(None)?.backward()?;
    let gsum: f64 = x.grad().unwrap().to_vec().iter().sum();
    assert!(approx_eq(gsum, 0.0, 1e-9));
    Ok(())
}
