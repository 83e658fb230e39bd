//! End-to-end optimizer runs on small pose graphs and scalar problems.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]

use approx::assert_relative_eq;
use factorgraph::core::{Values, pose_key};
use factorgraph::error::FactorGraphError;
use factorgraph::factors::{BetweenFactor, PriorFactor};
use factorgraph::linalg::{LinearSolverType, NoiseModel};
use factorgraph::logger::init_test_logger;
use factorgraph::manifold::{LieGroup, Manifold, SE3, SO3};
use factorgraph::{
    NonlinearFactorGraph, NonlinearOptimizer, OptimizationStatus, OptimizerConfig,
    OptimizerPhase, OptimizerType, Ordering,
};
use nalgebra::{DVector, Vector3};
use rand::{Rng, SeedableRng};
use std::f64::consts::{FRAC_PI_2, PI};
use std::sync::Arc;

type TestResult = Result<(), Box<dyn std::error::Error>>;

/// Four poses on a unit square, each turned a quarter turn from the last.
fn square() -> Vec<SE3> {
    let corners = [
        Vector3::new(0.0, 0.0, 0.0),
        Vector3::new(1.0, 0.0, 0.0),
        Vector3::new(1.0, 1.0, 0.0),
        Vector3::new(0.0, 1.0, 0.0),
    ];
    corners
        .iter()
        .enumerate()
        .map(|(i, t)| SE3::new(SO3::from_euler_angles(0.0, 0.0, i as f64 * FRAC_PI_2), *t))
        .collect()
}

/// Odometry around the square plus the closing edge, anchored by a prior on
/// the first pose.
fn square_graph(anchor: NoiseModel) -> NonlinearFactorGraph {
    let poses = square();
    let mut graph = NonlinearFactorGraph::new();
    graph.add(PriorFactor::new(pose_key(0), poses[0].clone(), anchor).unwrap());
    for i in 0..poses.len() {
        let j = (i + 1) % poses.len();
        graph.add(
            BetweenFactor::new(
                pose_key(i as u64),
                pose_key(j as u64),
                poses[i].between(&poses[j]),
                NoiseModel::isotropic(6, 0.1).unwrap(),
            )
            .unwrap(),
        );
    }
    graph
}

fn square_truth() -> Values {
    let mut values = Values::new();
    for (i, pose) in square().into_iter().enumerate() {
        values.insert(pose_key(i as u64), pose).unwrap();
    }
    values
}

fn perturbed_square(seed: u64) -> Values {
    let mut rng = rand::rngs::StdRng::seed_from_u64(seed);
    let mut values = square_truth();
    for i in 1..4 {
        let delta: Vec<f64> = (0..6).map(|_| rng.random_range(-0.1..0.1)).collect();
        let pose = values.pose3(pose_key(i)).unwrap().retract(&delta).unwrap();
        values.update(pose_key(i), pose).unwrap();
    }
    values
}

fn converging_config() -> OptimizerConfig {
    OptimizerConfig::new()
        .with_max_iterations(50)
        .with_error_threshold(1e-16)
}

#[test]
fn levenberg_marquardt_closes_the_square() -> TestResult {
    init_test_logger();
    let optimizer = NonlinearOptimizer::with_min_degree(
        Arc::new(square_graph(NoiseModel::hard(6))),
        perturbed_square(3),
        converging_config(),
    )?;
    let result = optimizer.optimize();

    assert!(result.is_success(), "{result}");
    assert_eq!(result.state.phase(), OptimizerPhase::Converged);
    assert!(result.final_error < result.initial_error);
    assert!(result.values().is_approx(&square_truth(), 1e-6));
    Ok(())
}

#[test]
fn gauss_newton_closes_the_square() -> TestResult {
    init_test_logger();
    let config = converging_config().with_optimizer_type(OptimizerType::GaussNewton);
    let optimizer = NonlinearOptimizer::with_min_degree(
        Arc::new(square_graph(NoiseModel::hard(6))),
        perturbed_square(5),
        config,
    )?;
    let result = optimizer.optimize();

    assert!(result.is_success(), "{result}");
    assert!(result.values().is_approx(&square_truth(), 1e-6));
    Ok(())
}

#[test]
fn sparse_cholesky_agrees_with_elimination() -> TestResult {
    let graph = Arc::new(square_graph(NoiseModel::isotropic(6, 1e-3)?));
    let mut finals = Vec::new();
    for solver in [
        LinearSolverType::SequentialElimination,
        LinearSolverType::SparseCholesky,
    ] {
        let optimizer = NonlinearOptimizer::with_min_degree(
            Arc::clone(&graph),
            perturbed_square(9),
            converging_config().with_linear_solver_type(solver),
        )?;
        let result = optimizer.optimize();
        assert!(result.is_success(), "{solver}: {result}");
        finals.push(result.state.values().clone());
    }
    assert!(finals[0].is_approx(&finals[1], 1e-6));
    assert!(finals[0].is_approx(&square_truth(), 1e-6));
    Ok(())
}

#[test]
fn hard_prior_is_met_exactly() -> TestResult {
    let x = pose_key(0);
    let mut graph = NonlinearFactorGraph::new();
    graph.add(PriorFactor::new(x, DVector::from_element(1, 1.0), NoiseModel::hard(1))?);
    graph.add(PriorFactor::new(x, DVector::from_element(1, 3.0), NoiseModel::unit(1))?);

    let mut values = Values::new();
    values.insert(x, DVector::from_element(1, 0.0))?;

    let optimizer = NonlinearOptimizer::new(
        Arc::new(graph),
        values,
        Ordering::from_keys([x])?,
        OptimizerConfig::default(),
    )?;
    assert_relative_eq!(optimizer.error(), 5.0, epsilon = 1e-12);

    let result = optimizer.optimize();
    assert_eq!(result.status, OptimizationStatus::Converged);
    assert_relative_eq!(result.values().vector(x)?[0], 1.0, epsilon = 1e-12);
    // only the soft prior is left unsatisfied
    assert_relative_eq!(result.final_error, 2.0, epsilon = 1e-12);
    Ok(())
}

#[test]
fn already_optimal_start_stops_at_threshold() -> TestResult {
    let optimizer = NonlinearOptimizer::with_min_degree(
        Arc::new(square_graph(NoiseModel::hard(6))),
        square_truth(),
        converging_config(),
    )?;
    let result = optimizer.optimize();
    assert_eq!(result.status, OptimizationStatus::ErrorThresholdReached);
    assert_eq!(result.iterations, 0);
    Ok(())
}

/// Five poses turned a fifth of a turn apart around a loop, odometry equal to
/// the exact relative poses and a soft prior on the first pose.
fn pentagon() -> (NonlinearFactorGraph, Values) {
    let poses: Vec<SE3> = (0..5)
        .map(|i| {
            let angle = i as f64 * 2.0 * PI / 5.0;
            SE3::new(
                SO3::from_euler_angles(0.1, -0.2, angle),
                Vector3::new(angle.cos(), angle.sin(), 0.1 * i as f64),
            )
        })
        .collect();
    let mut graph = NonlinearFactorGraph::new();
    let anchor = NoiseModel::isotropic(6, 0.01).unwrap();
    graph.add(PriorFactor::new(pose_key(0), poses[0].clone(), anchor).unwrap());
    let mut values = Values::new();
    for i in 0..poses.len() {
        let j = (i + 1) % poses.len();
        graph.add(
            BetweenFactor::new(
                pose_key(i as u64),
                pose_key(j as u64),
                poses[i].between(&poses[j]),
                NoiseModel::isotropic(6, 0.1).unwrap(),
            )
            .unwrap(),
        );
        values.insert(pose_key(i as u64), poses[i].clone()).unwrap();
    }
    (graph, values)
}

#[test]
fn levenberg_marquardt_stays_put_at_exact_optimum() -> TestResult {
    let (graph, truth) = pentagon();
    let optimizer = NonlinearOptimizer::with_min_degree(
        Arc::new(graph),
        truth.clone(),
        OptimizerConfig::default(),
    )?;
    assert!(optimizer.error() < 1e-20);

    let next = optimizer.iterate()?;
    assert!(next.error() < 1e-20);
    assert!(next.values().is_approx(&truth, 1e-9));

    let result = optimizer.optimize();
    assert!(result.is_success(), "{result}");
    assert!(result.values().is_approx(&truth, 1e-9));
    Ok(())
}

#[test]
fn hard_pose_prior_is_met_from_off_prior_start() -> TestResult {
    let anchor = SE3::new(
        SO3::from_euler_angles(0.3, -0.1, 0.7),
        Vector3::new(1.0, 2.0, -0.5),
    );
    let measured = SE3::new(
        SO3::from_euler_angles(0.0, 0.2, FRAC_PI_2),
        Vector3::new(1.0, 0.0, 0.0),
    );
    let mut graph = NonlinearFactorGraph::new();
    graph.add(PriorFactor::new(pose_key(0), anchor.clone(), NoiseModel::hard(6))?);
    graph.add(BetweenFactor::new(
        pose_key(0),
        pose_key(1),
        measured.clone(),
        NoiseModel::isotropic(6, 0.1)?,
    )?);
    let graph = Arc::new(graph);

    let mut initial = Values::new();
    initial.insert(pose_key(0), anchor.retract(&[0.05, -0.04, 0.03, 0.1, -0.2, 0.15])?)?;
    let second = anchor.compose(&measured);
    initial.insert(pose_key(1), second.retract(&[-0.02, 0.06, 0.01, -0.1, 0.05, 0.2])?)?;

    for optimizer_type in [OptimizerType::GaussNewton, OptimizerType::LevenbergMarquardt] {
        let optimizer = NonlinearOptimizer::with_min_degree(
            Arc::clone(&graph),
            initial.clone(),
            OptimizerConfig::new().with_optimizer_type(optimizer_type),
        )?;
        let next = optimizer.iterate()?;
        let x0 = next.values().pose3(pose_key(0))?;
        let residual = anchor.local_coordinates(x0);
        assert!(residual.norm() < 1e-12, "{optimizer_type}: {residual}");
    }
    Ok(())
}

#[test]
fn iteration_bound_is_respected() -> TestResult {
    let optimizer = NonlinearOptimizer::with_min_degree(
        Arc::new(square_graph(NoiseModel::hard(6))),
        perturbed_square(3),
        converging_config().with_max_iterations(1),
    )?;
    let result = optimizer.optimize();
    assert_eq!(result.status, OptimizationStatus::MaxIterationsReached);
    assert_eq!(result.iterations, 1);
    assert!(result.final_error < result.initial_error);
    Ok(())
}

#[test]
fn ordering_must_cover_the_graph() {
    let graph = Arc::new(square_graph(NoiseModel::hard(6)));
    let partial = Ordering::from_keys([pose_key(0), pose_key(1)]).unwrap();
    let result =
        NonlinearOptimizer::new(graph, square_truth(), partial, OptimizerConfig::default());
    assert!(matches!(result, Err(FactorGraphError::OrderingFailed(_))));
}

#[test]
fn missing_initial_value_is_rejected() {
    let graph = Arc::new(square_graph(NoiseModel::hard(6)));
    let mut values = Values::new();
    for (i, pose) in square().into_iter().take(3).enumerate() {
        values.insert(pose_key(i as u64), pose).unwrap();
    }
    let result = NonlinearOptimizer::with_min_degree(graph, values, OptimizerConfig::default());
    assert!(matches!(result, Err(FactorGraphError::OrderingFailed(_))));
}

#[test]
fn invalid_config_is_rejected() {
    let graph = Arc::new(square_graph(NoiseModel::hard(6)));
    let config = OptimizerConfig::new().with_lambda_factor(0.5);
    let result = NonlinearOptimizer::with_min_degree(graph, square_truth(), config);
    assert!(matches!(result, Err(FactorGraphError::InvalidInput(_))));
}
