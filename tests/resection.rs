use approx::{assert_relative_eq, relative_eq};
use nalgebra::Point3;
use resect::{
    model::ResidualConvention,
    observation::{ImageSide, Role},
    pipeline::{Pipeline, ResectionProblem},
    rmse::rmse,
    sensor::SensorConfig,
    simulation::{Scene, Simulation, grid},
    solver::{LeastSquaresProblem, LevenbergMarquardt},
    state::{Attitude, ParameterVector, Quadratic},
};
use rstest::rstest;

fn nadir_scene() -> Scene {
    Scene::new(
        ParameterVector::stationary(Point3::new(50.0, 50.0, 1000.0), Attitude::default()),
        ParameterVector::stationary(Point3::new(60.0, 50.0, 1000.0), Attitude::default()),
    )
}

/// Four corner control points followed by held-out check points.
fn corner_points() -> Vec<(Point3<f64>, Role)> {
    let control = [(0.0, 0.0), (100.0, 0.0), (0.0, 100.0), (100.0, 100.0)];
    let check = [(25.0, 25.0), (75.0, 40.0), (60.0, 80.0), (10.0, 90.0)];

    control
        .iter()
        .map(|&(x, y)| (Point3::new(x, y, 0.0), Role::ControlPoint))
        .chain(
            check
                .iter()
                .map(|&(x, y)| (Point3::new(x, y, 0.0), Role::CheckPoint)),
        )
        .collect()
}

#[rstest]
#[case(ImageSide::Left, 50.0)]
#[case(ImageSide::Right, 60.0)]
fn nadir_scenario(#[case] side: ImageSide, #[case] expected_x: f64) {
    let config = SensorConfig::default();
    let simulation = Simulation::new(config);
    let set = simulation.observation_set(&nadir_scene(), corner_points());

    let report = Pipeline::new(&set, config, ResidualConvention::Frame)
        .run(side)
        .unwrap();

    assert!(report.summary.termination.is_converged());
    assert!(report.summary.iterations <= 100);
    assert_relative_eq!(report.solved.position[2].constant, 1000.0, max_relative = 1e-3);
    assert_relative_eq!(report.seed.position[0].constant, expected_x, epsilon = 1e-6);
    assert_relative_eq!(report.seed.position[1].constant, 50.0, epsilon = 1e-6);

    let rmse = report.rmse.unwrap();
    assert!(rmse >= 0.0);
    assert!(rmse < 1e-9, "rmse {rmse}");
}

#[test]
fn perturbed_seed_recovers_truth() {
    let truth = ParameterVector::new(
        [
            Quadratic::new(250.0, 0.8, 0.002),
            Quadratic::new(200.0, -0.2, 0.001),
            Quadratic::new(400.0, 0.05, -0.001),
        ],
        [
            Quadratic::new(0.01, 0.0005, 0.00001),
            Quadratic::new(-0.02, 0.0003, -0.00002),
            Quadratic::new(0.3, 0.001, 0.00001),
        ],
    );
    let scene = Scene::new(truth, truth);

    let ground = [
        (40.0, 20.0, 5.0),
        (480.0, 10.0, 60.0),
        (30.0, 410.0, 25.0),
        (460.0, 390.0, 80.0),
        (250.0, 200.0, 40.0),
        (120.0, 300.0, 10.0),
        (380.0, 120.0, 70.0),
        (200.0, 60.0, 35.0),
        (320.0, 330.0, 15.0),
        (90.0, 150.0, 55.0),
    ];
    let simulation = Simulation::new(SensorConfig::default());
    let set = simulation.observation_set(
        &scene,
        ground
            .iter()
            .map(|&(x, y, z)| (Point3::new(x, y, z), Role::ControlPoint)),
    );
    assert_eq!(set.control_points().count(), 10);

    let mut seed = truth;
    seed.position[0].constant += 0.5;
    seed.position[2].constant += 1.0;
    seed.attitude[2].constant += 1e-3;

    let problem = ResectionProblem::new(*simulation.model(), set.control_points(), ImageSide::Left);
    let mut params = seed.to_vector();
    let initial_cost = problem.cost(&params);
    let summary = LevenbergMarquardt::new()
        .minimize(&problem, &mut params)
        .unwrap();

    assert!(initial_cost > 0.0);
    assert!(summary.termination.is_converged(), "{summary}");
    assert!(summary.iterations <= 100);
    assert!(problem.residuals(&params).amax() < 1e-10, "{summary}");

    let expected = truth.to_vector();
    for (i, (solved, expected)) in params.iter().zip(expected.iter()).enumerate() {
        assert!(
            relative_eq!(*solved, *expected, max_relative = 1e-6),
            "coefficient {i}: {solved} vs {expected}"
        );
    }
}

#[test]
fn stereo_run_improves_on_seed() {
    let config = SensorConfig::default();
    let scene = Scene::new(
        ParameterVector::new(
            [
                Quadratic::new(35.0, 0.5, 0.0),
                Quadratic::constant(45.0),
                Quadratic::constant(1000.0),
            ],
            [Quadratic::default(); 3],
        ),
        ParameterVector::new(
            [
                Quadratic::new(55.0, 0.5, 0.0),
                Quadratic::constant(45.0),
                Quadratic::constant(1000.0),
            ],
            [Quadratic::default(); 3],
        ),
    );
    let simulation = Simulation::new(config);
    let set = simulation.observation_set(&scene, grid(Point3::origin(), 10.0, 10, 10, 3));

    let pipeline = Pipeline::new(&set, config, ResidualConvention::Frame);
    let report = pipeline.par_run();
    assert!(report.is_success());

    for side in ImageSide::BOTH {
        let side_report = report.side(side).as_ref().unwrap();
        assert_eq!(side_report.side, side);
        assert!(side_report.summary.final_cost <= side_report.summary.initial_cost);

        let seed_rmse = rmse(pipeline.model(), &side_report.seed, set.check_points(), side).unwrap();
        let solved_rmse = side_report.rmse.as_ref().copied().unwrap();
        assert!(solved_rmse.is_finite());
        assert!(solved_rmse < seed_rmse, "{solved_rmse} >= {seed_rmse}");
    }
}
