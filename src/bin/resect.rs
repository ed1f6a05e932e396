use clap::{Parser, ValueEnum};
use resect::{
    error::Error,
    model::ResidualConvention,
    observation::{ImageSide, ObservationSet},
    pipeline::{Pipeline, StereoReport},
    sensor::SensorConfig,
    solver::LevenbergMarquardt,
};
use std::{
    path::{Path, PathBuf},
    process::ExitCode,
};
use tracing::{Level, error, info};
use uom::si::{f64::Length, length::meter};

#[derive(Clone, Copy, ValueEnum)]
enum Convention {
    /// Along-track residual is the projected x coordinate.
    LineScan,
    /// Both projected coordinates are compared with the observation.
    Frame,
}

impl From<Convention> for ResidualConvention {
    fn from(convention: Convention) -> Self {
        match convention {
            Convention::LineScan => ResidualConvention::LineScan,
            Convention::Frame => ResidualConvention::Frame,
        }
    }
}

#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Args {
    /// Tagged point file.
    #[arg(default_value = "data/tagged.csv")]
    path: PathBuf,

    /// Principal distance in meters.
    #[arg(long, default_value_t = 1.082)]
    principal_distance: f64,

    /// Pixel size in meters.
    #[arg(long, default_value_t = 1.3e-5)]
    pixel_size: f64,

    /// Rows per image, used to centre pixel coordinates.
    #[arg(long, default_value_t = 6000)]
    rows: usize,

    #[arg(long, value_enum, default_value_t = Convention::LineScan)]
    convention: Convention,

    #[arg(long, default_value_t = 100)]
    max_iterations: usize,

    /// Write solved parameters and RMSE per side to this CSV file.
    #[arg(short, long)]
    output: Option<PathBuf>,
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

    if !(args.principal_distance > 0.0 && args.pixel_size > 0.0) {
        error!("principal distance and pixel size must be greater than zero");
        return ExitCode::FAILURE;
    }

    let config = SensorConfig::new(
        Length::new::<meter>(args.principal_distance),
        Length::new::<meter>(args.pixel_size),
        args.rows,
    );

    let observations = match ObservationSet::from_path(&args.path, &config) {
        Ok(observations) => observations,
        Err(err) => {
            error!("{err}");
            return ExitCode::FAILURE;
        }
    };
    info!(
        path = %args.path.display(),
        control_points = observations.control_points().count(),
        check_points = observations.check_points().count(),
        "loaded observations"
    );

    let solver = LevenbergMarquardt::new().with_max_iterations(args.max_iterations);
    let report = Pipeline::new(&observations, config, args.convention.into())
        .with_solver(solver)
        .par_run();

    for side in ImageSide::BOTH {
        println!("===== {} Image =====", side.name());
        match report.side(side) {
            Ok(side_report) => {
                println!("{}", side_report.summary);
                print!("{}", side_report.solved);
            }
            Err(err) => println!("failed: {err}"),
        }
        println!();
    }

    for side in ImageSide::BOTH {
        match report.side(side) {
            Ok(side_report) => match &side_report.rmse {
                Ok(rmse) => println!("{} Image RMSE: {rmse}", side.name()),
                Err(err) => println!("{} Image RMSE: unavailable ({err})", side.name()),
            },
            Err(_) => println!("{} Image RMSE: unavailable", side.name()),
        }
    }

    if let Some(output) = &args.output {
        if let Err(err) = write_report(output, &report) {
            error!("{err}");
            return ExitCode::FAILURE;
        }
        info!(path = %output.display(), "wrote solved parameters");
    }

    if report.is_success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

fn write_report(path: &Path, report: &StereoReport) -> Result<(), Error> {
    let to_io = |source: std::io::Error| Error::Io {
        path: path.to_path_buf(),
        source,
    };

    let mut writer = csv::Writer::from_path(path).map_err(|err| to_io(err.into()))?;

    let mut header = vec!["side".to_string()];
    for name in ["X", "Y", "Z", "omega", "phi", "kappa"] {
        header.extend((0..3).map(|power| format!("{name}{power}")));
    }
    header.extend(["rmse", "iterations", "termination"].map(String::from));
    writer.write_record(&header).map_err(|err| to_io(err.into()))?;

    for side_report in [&report.left, &report.right].into_iter().flatten() {
        let mut record = vec![side_report.side.name().to_string()];
        record.extend(side_report.solved.to_vector().iter().map(f64::to_string));
        record.push(
            side_report
                .rmse
                .as_ref()
                .map_or_else(|_| String::new(), f64::to_string),
        );
        record.push(side_report.summary.iterations.to_string());
        record.push(side_report.summary.termination.to_string());
        writer.write_record(&record).map_err(|err| to_io(err.into()))?;
    }

    writer.flush().map_err(to_io)
}
