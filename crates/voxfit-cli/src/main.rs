//! voxfit CLI — fit a body model to voxel network predictions.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::fs::File;
use std::path::{Path, PathBuf};

use nalgebra::{DMatrix, DVector, Point3};
use ndarray::{Array2, Array3, Array4};
use ndarray_npy::{NpzReader, ReadNpyExt};

use voxfit::body::{DeformableModel, LbsModel};
use voxfit::export::{write_obj_file, write_outcome};
use voxfit::marching::extract_surface;
use voxfit::pipeline::{
    Gender, GroundTruthInfo, JointPrediction, PipelineConfig, PipelineInputs, VoxelPrediction,
};
use voxfit::volume::{labels_to_occupancy, reorient_volume, VolumeGrid};

type CliError = Box<dyn std::error::Error>;
type CliResult<T> = Result<T, CliError>;

#[derive(Parser)]
#[command(name = "voxfit")]
#[command(about = "Fit a skinned parametric body model to voxel and 3D joint network predictions")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
#[allow(clippy::large_enum_variant)]
enum Commands {
    /// Fit the body model to one sample's predictions.
    Fit(CliFitArgs),

    /// Print the dimensions of a body model archive.
    ModelInfo {
        /// Path to the body model archive (NPZ).
        #[arg(long)]
        model: PathBuf,
    },

    /// Extract an iso-surface from a voxel grid and write it as OBJ.
    Extract {
        /// Path to the voxel grid (NPY, f32, predictor storage order).
        #[arg(long)]
        volume: PathBuf,

        /// Iso level for surface extraction.
        #[arg(long, default_value = "0.5")]
        iso_level: f32,

        /// Path to write the mesh (OBJ).
        #[arg(long)]
        out: PathBuf,
    },
}

#[derive(Debug, Clone, Args)]
struct CliFitArgs {
    /// Directory holding model_f.npz and model_m.npz; the sample's gender
    /// picks the file.
    #[arg(long, required_unless_present = "model")]
    model_dir: Option<PathBuf>,

    /// Explicit body model archive (NPZ); overrides --model-dir.
    #[arg(long)]
    model: Option<PathBuf>,

    /// Ground-truth voxels (NPY, predictor storage order): f32 occupancy, or
    /// u8 part labels with --parts (0 = background).
    #[arg(long)]
    gt: PathBuf,

    /// Predicted voxels (NPY, f32, predictor storage order): a 3D occupancy
    /// grid, or 4D per-part logits with --parts (channel 0 = background).
    #[arg(long)]
    pred: PathBuf,

    /// Treat the prediction as per-part logits and the ground truth as part
    /// labels.
    #[arg(long)]
    parts: bool,

    /// Predicted 3D joints (NPY, f64, J x 3).
    #[arg(long)]
    joints: PathBuf,

    /// Model joint index per prediction row, comma separated. Omit when the
    /// prediction covers every model joint in model order.
    #[arg(long)]
    joint_map: Option<String>,

    /// Foreground segmentation mask (grayscale image, resolution x resolution).
    #[arg(long)]
    mask: PathBuf,

    /// Ground-truth record (NPZ: pose P x F f64, shape S x F f64,
    /// zrot 1 x 1 f64, gender 1 x 1 i64).
    #[arg(long)]
    info: PathBuf,

    /// Gender override when the record carries none.
    #[arg(long, value_enum)]
    gender: Option<GenderArg>,

    /// Directory for mesh and parameter outputs.
    #[arg(long)]
    out_dir: PathBuf,

    /// Output filename stem.
    #[arg(long, default_value = "sample")]
    stem: String,

    /// Path to write alignment and stage reports (JSON).
    #[arg(long)]
    report: Option<PathBuf>,

    /// Iso level for surface extraction.
    #[arg(long, default_value = "0.5")]
    iso_level: f32,

    /// Correspondence rounds for the surface stage.
    #[arg(long, default_value = "1")]
    rounds: usize,

    /// Cap on surface points fed to the solver (0 keeps every point).
    #[arg(long, default_value = "0")]
    max_surface_points: usize,

    /// Seed for the surface subsampling draw.
    #[arg(long, default_value = "0")]
    seed: u64,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum GenderArg {
    Female,
    Male,
}

impl GenderArg {
    fn to_core(self) -> Gender {
        match self {
            Self::Female => Gender::Female,
            Self::Male => Gender::Male,
        }
    }
}

fn build_pipeline_config(args: &CliFitArgs) -> PipelineConfig {
    let mut config = PipelineConfig {
        iso_level: args.iso_level,
        ..Default::default()
    };
    config.surface_fit.outer_iterations = args.rounds;
    config.surface_fit.max_surface_points = args.max_surface_points;
    config.surface_fit.seed = args.seed;
    config
}

fn main() -> CliResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Fit(args) => run_fit(&args),
        Commands::ModelInfo { model } => run_model_info(&model),
        Commands::Extract {
            volume,
            iso_level,
            out,
        } => run_extract(&volume, iso_level, &out),
    }
}

// ── loaders ────────────────────────────────────────────────────────────

fn load_lbs_model(path: &Path) -> CliResult<LbsModel> {
    let mut npz = NpzReader::new(File::open(path)?)?;
    let template: Array2<f32> = npz.by_name("v_template")?;
    let faces: Array2<u32> = npz.by_name("f")?;
    let shape_dirs: Array3<f32> = npz.by_name("shapedirs")?;
    let joint_regressor: Array2<f32> = npz.by_name("J_regressor")?;
    let kintree: Array2<i32> = npz.by_name("kintree_table")?;
    let weights: Array2<f32> = npz.by_name("weights")?;

    if template.ncols() != 3 {
        return Err(format!("v_template must be V x 3, got {:?}", template.dim()).into());
    }
    let template: Vec<Point3<f64>> = template
        .rows()
        .into_iter()
        .map(|r| Point3::new(r[0] as f64, r[1] as f64, r[2] as f64))
        .collect();

    if faces.ncols() != 3 {
        return Err(format!("f must be F x 3, got {:?}", faces.dim()).into());
    }
    let faces: Vec<[u32; 3]> = faces
        .rows()
        .into_iter()
        .map(|r| [r[0], r[1], r[2]])
        .collect();

    // Row 0 of kintree_table is the parent of each joint; the root entry is
    // a sentinel and maps to itself.
    if kintree.nrows() == 0 {
        return Err(format!("kintree_table is empty in {}", path.display()).into());
    }
    let joints = kintree.ncols();
    let mut parents = Vec::with_capacity(joints);
    for j in 0..joints {
        if j == 0 {
            parents.push(0);
            continue;
        }
        let p = kintree[[0, j]];
        if p < 0 || p as usize >= joints {
            return Err(format!("kintree_table parent {} of joint {} is out of range", p, j).into());
        }
        parents.push(p as usize);
    }

    let model = LbsModel::from_parts(
        template,
        shape_dirs.mapv(f64::from),
        joint_regressor.mapv(f64::from),
        parents,
        weights.mapv(f64::from),
        faces,
    )?;
    Ok(model)
}

fn load_info(path: &Path, gender_override: Option<GenderArg>) -> CliResult<GroundTruthInfo> {
    let mut npz = NpzReader::new(File::open(path)?)?;
    let pose: Array2<f64> = npz.by_name("pose")?;
    let shape: Array2<f64> = npz.by_name("shape")?;
    let zrot: Array2<f64> = npz.by_name("zrot")?;

    let gender = match gender_override {
        Some(g) => g.to_core(),
        None => {
            let flag: Array2<i64> = npz.by_name("gender")?;
            let flag = flag[[0, 0]];
            Gender::from_flag(flag).ok_or_else(|| -> CliError {
                format!("unrecognized gender flag {} in {}", flag, path.display()).into()
            })?
        }
    };

    if shape.ncols() == 0 {
        return Err(format!("empty shape record in {}", path.display()).into());
    }
    let pose_frames = DMatrix::from_fn(pose.nrows(), pose.ncols(), |r, c| pose[[r, c]]);
    let shape = DVector::from_fn(shape.nrows(), |r, _| shape[[r, 0]]);

    Ok(GroundTruthInfo {
        gender,
        pose_frames,
        shape,
        zrot: zrot[[0, 0]],
    })
}

fn load_ground_truth(path: &Path, parts: bool) -> CliResult<Array3<f32>> {
    let file = File::open(path)?;
    if parts {
        let labels = Array3::<u8>::read_npy(file)?;
        Ok(labels_to_occupancy(&labels))
    } else {
        Ok(Array3::<f32>::read_npy(file)?)
    }
}

fn load_prediction(path: &Path, parts: bool) -> CliResult<VoxelPrediction> {
    let file = File::open(path)?;
    if parts {
        Ok(VoxelPrediction::Parts(Array4::<f32>::read_npy(file)?))
    } else {
        Ok(VoxelPrediction::Occupancy(Array3::<f32>::read_npy(file)?))
    }
}

fn load_joints(path: &Path, joint_map: Option<&str>) -> CliResult<JointPrediction> {
    let raw = Array2::<f64>::read_npy(File::open(path)?)?;
    if raw.ncols() != 3 {
        return Err(format!("joints must be J x 3, got {:?}", raw.dim()).into());
    }
    let positions = raw
        .rows()
        .into_iter()
        .map(|r| Point3::new(r[0], r[1], r[2]))
        .collect();
    let model_indices = joint_map.map(parse_joint_map).transpose()?;
    Ok(JointPrediction {
        positions,
        model_indices,
    })
}

fn parse_joint_map(spec: &str) -> CliResult<Vec<usize>> {
    spec.split(',')
        .map(|tok| {
            tok.trim().parse::<usize>().map_err(|e| -> CliError {
                format!("bad joint map entry {:?}: {}", tok, e).into()
            })
        })
        .collect()
}

fn resolve_model_path(args: &CliFitArgs, gender: Gender) -> CliResult<PathBuf> {
    if let Some(path) = &args.model {
        return Ok(path.clone());
    }
    let dir = args
        .model_dir
        .as_ref()
        .ok_or_else(|| -> CliError { "provide --model or --model-dir".to_string().into() })?;
    let name = match gender {
        Gender::Female => "model_f.npz",
        Gender::Male => "model_m.npz",
    };
    Ok(dir.join(name))
}

// ── fit ────────────────────────────────────────────────────────────────

fn run_fit(args: &CliFitArgs) -> CliResult<()> {
    let info = load_info(&args.info, args.gender)?;
    tracing::info!("Sample gender: {}", info.gender.as_str());

    let model_path = resolve_model_path(args, info.gender)?;
    tracing::info!("Loading model: {}", model_path.display());
    let model = load_lbs_model(&model_path)?;
    tracing::info!(
        "Model: {} joints, {} pose parameters, {} shape directions",
        model.joint_count(),
        model.pose_len(),
        model.shape_len(),
    );

    let ground_truth = load_ground_truth(&args.gt, args.parts)?;
    let prediction = load_prediction(&args.pred, args.parts)?;
    let joints = load_joints(&args.joints, args.joint_map.as_deref())?;
    let mask = image::open(&args.mask)
        .map_err(|e| -> CliError {
            format!("Failed to open mask {}: {}", args.mask.display(), e).into()
        })?
        .to_luma8();

    let inputs = PipelineInputs {
        ground_truth,
        prediction,
        joints,
        mask,
        info,
    };
    let config = build_pipeline_config(args);
    let outcome = voxfit::pipeline::run(&model, inputs, &config)?;

    tracing::info!(
        "Joint stage: cost {:.5} -> {:.5} over {} iterations (converged: {})",
        outcome.stage1.initial_cost,
        outcome.stage1.final_cost,
        outcome.stage1.solver_iterations,
        outcome.stage1.converged,
    );
    tracing::info!(
        "Surface stage: cost {:.5} -> {:.5} over {} iterations in {} rounds (converged: {})",
        outcome.stage2.initial_cost,
        outcome.stage2.final_cost,
        outcome.stage2.solver_iterations,
        outcome.stage2.outer_rounds,
        outcome.stage2.converged,
    );

    write_outcome(&args.out_dir, &args.stem, &outcome, model.faces())?;

    if let Some(report_path) = &args.report {
        let report = serde_json::json!({
            "alignment": outcome.alignment,
            "stage1": outcome.stage1,
            "stage2": outcome.stage2,
        });
        std::fs::write(report_path, serde_json::to_string_pretty(&report)?)?;
        tracing::info!("Fit report written to {}", report_path.display());
    }

    Ok(())
}

// ── model-info ─────────────────────────────────────────────────────────

fn run_model_info(path: &Path) -> CliResult<()> {
    let model = load_lbs_model(path)?;

    println!("voxfit body model: {}", path.display());
    println!("  vertices:          {}", model.vertices().len());
    println!("  triangles:         {}", model.faces().len());
    println!("  joints:            {}", model.joint_count());
    println!("  pose parameters:   {}", model.pose_len());
    println!("  shape directions:  {}", model.shape_len());

    Ok(())
}

// ── extract ────────────────────────────────────────────────────────────

fn run_extract(volume: &Path, iso_level: f32, out: &Path) -> CliResult<()> {
    tracing::info!("Loading volume: {}", volume.display());
    let grid = Array3::<f32>::read_npy(File::open(volume)?)?;
    let grid = VolumeGrid::new(reorient_volume(grid));
    let (nx, ny, nz) = grid.dims();
    tracing::info!("Volume size: {}x{}x{}", nx, ny, nz);

    let mesh = extract_surface(&grid, iso_level)?;
    tracing::info!(
        "Extracted {} vertices, {} triangles",
        mesh.vertex_count(),
        mesh.triangle_count(),
    );

    write_obj_file(out, &mesh.vertices, &mesh.triangles)?;
    tracing::info!("Mesh written to {}", out.display());

    Ok(())
}
