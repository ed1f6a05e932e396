use clap::Parser;
use nalgebra::Point3;
use resect::{
    sensor::SensorConfig,
    simulation::{Scene, Simulation, grid},
    state::{ParameterVector, Quadratic},
};
use std::{
    fs::File,
    io::{BufWriter, Write},
    path::PathBuf,
    process::ExitCode,
};
use tracing::{Level, error, info};

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// Destination file. Writes to stdout when omitted.
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Ground points along each axis of the grid.
    #[arg(long, default_value_t = 10)]
    size: usize,

    /// Distance between neighbouring ground points.
    #[arg(long, default_value_t = 10.0)]
    spacing: f64,

    /// Tag every k-th point as a control point.
    #[arg(long, default_value_t = 3)]
    gcp_every: usize,

    /// Flying height of both sensors.
    #[arg(long, default_value_t = 1000.0)]
    height: f64,

    /// Along-track distance flown per record.
    #[arg(long, default_value_t = 0.5)]
    velocity: f64,

    /// Separation between the left and right perspective centres.
    #[arg(long, default_value_t = 20.0)]
    baseline: f64,
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::builder()
                .with_default_directive(Level::INFO.into())
                .from_env_lossy(),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let center = args.spacing * args.size.saturating_sub(1) as f64 / 2.0;
    let trajectory = |offset: f64| {
        ParameterVector::new(
            [
                Quadratic::new(center + offset, args.velocity, 0.0),
                Quadratic::constant(center),
                Quadratic::constant(args.height),
            ],
            [Quadratic::default(); 3],
        )
    };
    let scene = Scene::new(
        trajectory(-args.baseline / 2.0),
        trajectory(args.baseline / 2.0),
    );

    let simulation = Simulation::new(SensorConfig::default());
    let points = grid(
        Point3::origin(),
        args.spacing,
        args.size,
        args.size,
        args.gcp_every,
    );
    let set = simulation.observation_set(&scene, points);
    info!(
        control_points = set.control_points().count(),
        check_points = set.check_points().count(),
        "simulated observations"
    );

    let writer: Box<dyn Write> = match &args.output {
        Some(path) => match File::create(path) {
            Ok(file) => Box::new(BufWriter::new(file)),
            Err(err) => {
                error!("unable to create {}: {err}", path.display());
                return ExitCode::FAILURE;
            }
        },
        None => Box::new(std::io::stdout().lock()),
    };

    match simulation.write_csv(&set, writer) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("{err}");
            ExitCode::FAILURE
        }
    }
}
