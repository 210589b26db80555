//! Run the statistical area filter over part of a PFM structure.
//!
//! Started by the editor with `--share-id`, it takes the edit polygon and the
//! filter parameters from the session segment and reports back through the
//! modcode handshake. Stand-alone, it needs `--rect`.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::AtomicBool;

use abe::{
    filter_poly_area, format_edit_return_status, report_filter_status, AbeError, AcceptAll,
    FeatureSet, FilterArea, FilterConfig, FilterOutcome, Mbr, OpenMode, PfmFile,
};
use clap::Parser;
use pfm_io::{AbeShareSegment, ShareConfig, ShareError};

#[derive(Parser)]
#[command(name = "pfm_area_filter")]
#[command(about = "Statistical 3x3 area filter for PFM structures", long_about = None)]
struct Cli {
    /// PFM list file
    pfm: PathBuf,

    /// Filter rectangle as min_x,min_y,max_x,max_y
    #[arg(long, value_delimiter = ',', num_args = 4, allow_hyphen_values = true)]
    rect: Option<Vec<f64>>,

    /// ABE_SHARE session id
    #[arg(long)]
    share_id: Option<u32>,

    /// JSON filter configuration
    #[arg(long)]
    config: Option<PathBuf>,

    /// JSON point features protected from filtering
    #[arg(long)]
    features: Option<PathBuf>,

    /// Standard-deviation multiplier
    #[arg(long)]
    filter_std: Option<f32>,

    /// Only invalidate soundings deeper than their neighbourhood
    #[arg(long)]
    deep_only: bool,

    /// Feature protection radius in metres
    #[arg(long)]
    feature_radius: Option<f32>,
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    let share = match cli.share_id.map(attach_session).transpose() {
        Ok(share) => share,
        Err(e) => {
            eprintln!("pfm_area_filter: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let result = run(&cli, share.as_ref());
    if let Some(segment) = &share {
        report_filter_status(segment, result.as_ref().ok().copied());
    }
    match result {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("pfm_area_filter: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn attach_session(id: u32) -> Result<AbeShareSegment, AbeError> {
    let segment = AbeShareSegment::attach(id, &ShareConfig::from_env())?;
    if !segment.is_live() {
        return Err(ShareError::BadSegment {
            key: segment.key().to_string(),
            reason: "the owning session has ended",
        }
        .into());
    }
    Ok(segment)
}

/// Filter the requested area, returning the number of soundings invalidated.
fn run(cli: &Cli, share: Option<&AbeShareSegment>) -> Result<usize, AbeError> {
    let state = share.map(AbeShareSegment::snapshot);

    let mut config = match &cli.config {
        Some(path) => FilterConfig::from_json_file(path)?,
        None => match &state {
            Some(s) if s.filter.filter_std > 0.0 => FilterConfig::new().with_share_params(&s.filter),
            _ => FilterConfig::new(),
        },
    };
    if let Some(filter_std) = cli.filter_std {
        config = config.with_filter_std(filter_std);
    }
    if cli.deep_only {
        config = config.with_deep_filter_only(true);
    }
    if let Some(radius) = cli.feature_radius {
        config = config.with_feature_radius(radius);
    }
    config.validate()?;

    let area = match (&cli.rect, &state) {
        (Some(r), _) => FilterArea::Rectangle(Mbr::new(r[0], r[1], r[2], r[3])),
        (None, Some(s)) if s.polygon.len() >= 3 => FilterArea::Polygon(s.polygon.clone()),
        _ => {
            return Err(AbeError::InvalidArea {
                reason: "no --rect given and no session edit polygon",
            })
        }
    };
    let features = match &cli.features {
        Some(path) => FeatureSet::from_json_file(path)?,
        None => FeatureSet::new(),
    };

    let mut pfm = PfmFile::open(&cli.pfm, OpenMode::Update)?;
    let cancel = AtomicBool::new(false);
    let outcome = filter_poly_area(&mut pfm, &area, &config, &features, &AcceptAll, &cancel)?;
    pfm.close()?;

    let invalidated = match outcome {
        FilterOutcome::Completed { invalidated, .. } => invalidated,
        FilterOutcome::Cancelled => 0,
    };
    println!(
        "{}",
        format_edit_return_status(
            i32::from(invalidated > 0),
            i32::try_from(invalidated).unwrap_or(i32::MAX)
        )
    );

    Ok(invalidated)
}
