//! Command line front end for `cmr_core`.

mod formats;

use clap::{Parser, Subcommand};
use cmr_core::centerline::{self, CenterlineParameters};
use cmr_core::graphcut::BkSolver;
use cmr_core::io::{line_format, mesh_format};
use cmr_core::marching_cubes;
use cmr_core::measuring_plane::{self, MaskSource};
use cmr_core::nalgebra::Vector3;
use cmr_core::{CmrError, FlowImage4D, Transform3};
use log::{error, info};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(name = "cmr", about = "4D flow CMR analysis core")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Extracts a surface mesh from a scalar segmentation at a given iso-value.
    ExtractMesh {
        /// Raw scalar grid input (see `formats::load_scalar_image`).
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        iso: f64,
        #[arg(long)]
        output: PathBuf,
    },
    /// Extracts one centerline per target vertex through a vessel lumen.
    ExtractCenterlines {
        /// Vessel surface mesh, e.g. produced by `extract-mesh`.
        #[arg(long)]
        mesh: PathBuf,
        /// Segmentation the lumen is carved from.
        #[arg(long)]
        segmentation: PathBuf,
        #[arg(long)]
        seed: u32,
        /// Comma-separated target vertex indices.
        #[arg(long, value_delimiter = ',')]
        targets: Vec<u32>,
        #[arg(long, default_value_t = 3)]
        upscale: u32,
        #[arg(long, default_value_t = 5)]
        penalty_exp: i32,
        #[arg(long, default_value_t = 500)]
        smooth_iter: u32,
        #[arg(long, default_value_t = 3)]
        smooth_kernel: u32,
        #[arg(long, default_value_t = 0.1)]
        smooth_relax: f64,
        /// Output `.line` files are written as `<output_prefix>_<target>.line`.
        #[arg(long)]
        output_prefix: PathBuf,
    },
    /// Solves a min-cut/max-flow problem on an N-dimensional lattice.
    Graphcut {
        #[arg(long)]
        cap_file: PathBuf,
        /// Optional file to write the per-node cut side assignment to.
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Computes hemodynamic statistics on a measuring plane anchored at a
    /// centerline point.
    Stats {
        #[arg(long)]
        line: PathBuf,
        #[arg(long)]
        flow: PathBuf,
        #[arg(long)]
        segmentation: Option<PathBuf>,
        #[arg(long)]
        mesh: Option<PathBuf>,
        /// `<centerline point index>:<timestep to highlight>`.
        #[arg(long)]
        plane_at: String,
        #[arg(long, default_value_t = 64)]
        sx: usize,
        #[arg(long, default_value_t = 64)]
        sy: usize,
        #[arg(long, default_value_t = 1.0)]
        spacing_mm: f64,
    },
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    let result = match cli.command {
        Command::ExtractMesh { input, iso, output } => run_extract_mesh(&input, iso, &output),
        Command::ExtractCenterlines {
            mesh,
            segmentation,
            seed,
            targets,
            upscale,
            penalty_exp,
            smooth_iter,
            smooth_kernel,
            smooth_relax,
            output_prefix,
        } => run_extract_centerlines(
            &mesh,
            &segmentation,
            seed,
            &targets,
            CenterlineParameters {
                image_upscale: upscale,
                distance_penalty_exponent: penalty_exp,
                num_smooth_iterations: smooth_iter,
                smooth_kernel_size: smooth_kernel,
                smooth_relaxation: smooth_relax,
            },
            &output_prefix,
        ),
        Command::Graphcut { cap_file, output } => run_graphcut(&cap_file, output.as_deref()),
        Command::Stats {
            line,
            flow,
            segmentation,
            mesh,
            plane_at,
            sx,
            sy,
            spacing_mm,
        } => run_stats(
            &line,
            &flow,
            segmentation.as_deref(),
            mesh.as_deref(),
            &plane_at,
            sx,
            sy,
            spacing_mm,
        ),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e @ CliError::UnreadableInput(_)) => {
            error!("{e}");
            ExitCode::from(1)
        }
        Err(e @ CliError::EmptyTargetSet) => {
            error!("{e}");
            ExitCode::from(2)
        }
        Err(e @ CliError::GraphCutDidNotConverge(_)) => {
            error!("{e}");
            ExitCode::from(3)
        }
        Err(e @ CliError::WriteFailure(_)) => {
            error!("{e}");
            ExitCode::from(4)
        }
    }
}

/// Exit-code classification for the four non-zero cases the external
/// interface promises; everything else is a programmer error and panics.
#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("{0}")]
    UnreadableInput(String),
    #[error("empty target set")]
    EmptyTargetSet,
    #[error("graph cut did not converge after {0} iterations")]
    GraphCutDidNotConverge(usize),
    #[error("{0}")]
    WriteFailure(String),
}

impl From<anyhow::Error> for CliError {
    fn from(e: anyhow::Error) -> Self {
        CliError::UnreadableInput(e.to_string())
    }
}

fn run_extract_mesh(input: &std::path::Path, iso: f64, output: &std::path::Path) -> Result<(), CliError> {
    let image = formats::load_scalar_image(input)?;
    let mesh = marching_cubes::apply(&image, iso)
        .map_err(|e| CliError::UnreadableInput(e.to_string()))?;
    info!("extracted {} points, {} triangles", mesh.num_points(), mesh.num_triangles());

    let bytes = mesh_format::write_mesh(&mesh);
    std::fs::write(output, bytes)
        .map_err(|e| CliError::WriteFailure(format!("writing {}: {e}", output.display())))
}

fn run_extract_centerlines(
    mesh_path: &std::path::Path,
    segmentation_path: &std::path::Path,
    seed: u32,
    targets: &[u32],
    params: CenterlineParameters,
    output_prefix: &std::path::Path,
) -> Result<(), CliError> {
    if targets.is_empty() {
        return Err(CliError::EmptyTargetSet);
    }

    let mesh_bytes = std::fs::read(mesh_path)
        .map_err(|e| CliError::UnreadableInput(format!("reading {}: {e}", mesh_path.display())))?;
    let mut mesh = mesh_format::read_mesh(&mesh_bytes).map_err(|e| CliError::UnreadableInput(e.to_string()))?;
    let segmentation = formats::load_scalar_image(segmentation_path)?;

    let result = centerline::extract(&mut mesh, &segmentation, seed, targets, &params);
    if !result.success {
        return Err(CliError::EmptyTargetSet);
    }
    if result.lines.len() < targets.len() {
        info!(
            "{} of {} targets were unreachable and were skipped",
            targets.len() - result.lines.len(),
            targets.len()
        );
    }

    // `result.lines` only carries the targets that were actually reached,
    // in order but without their original target id, so output files are
    // numbered by position among the successful lines rather than by target.
    for (i, line) in result.lines.iter().enumerate() {
        let path = PathBuf::from(format!("{}_{i}.line", output_prefix.display()));
        let bytes = line_format::write_line(line);
        std::fs::write(&path, bytes)
            .map_err(|e| CliError::WriteFailure(format!("writing {}: {e}", path.display())))?;
        info!("wrote {} ({} points)", path.display(), line.num_points());
    }

    Ok(())
}

fn run_graphcut(cap_file: &std::path::Path, output: Option<&std::path::Path>) -> Result<(), CliError> {
    let graph = formats::load_capacity_graph(cap_file)?;

    let mut solver = BkSolver::new(&graph.shape);
    for (coords, cap) in &graph.sources {
        solver.set_source_capacity(coords, *cap);
    }
    for (coords, cap) in &graph.sinks {
        solver.set_sink_capacity(coords, *cap);
    }
    for (coords, axis, forward, backward) in &graph.edges {
        solver.set_edge_capacity(coords, *axis, *forward, *backward);
    }

    let cut = solver.run().map_err(|e| match e {
        CmrError::GraphCutDidNotConverge(iterations) => CliError::GraphCutDidNotConverge(iterations),
        other => CliError::UnreadableInput(other.to_string()),
    })?;

    info!("min-cut flow value: {}", cut.flow_value());

    if let Some(output) = output {
        let mut text = String::new();
        for (node, side) in cut.assignment().iter().enumerate() {
            text.push_str(&format!("{node} {side:?}\n"));
        }
        std::fs::write(output, text)
            .map_err(|e| CliError::WriteFailure(format!("writing {}: {e}", output.display())))?;
    } else {
        println!("flow = {}", cut.flow_value());
    }

    Ok(())
}

fn run_stats(
    line_path: &std::path::Path,
    flow_path: &std::path::Path,
    segmentation_path: Option<&std::path::Path>,
    mesh_path: Option<&std::path::Path>,
    plane_at: &str,
    sx: usize,
    sy: usize,
    spacing_mm: f64,
) -> Result<(), CliError> {
    let (point_idx_str, highlight_t_str) = plane_at
        .split_once(':')
        .ok_or_else(|| CliError::UnreadableInput(format!("malformed --plane-at '{plane_at}', expected <idx>:<t>")))?;
    let point_idx: usize = point_idx_str
        .parse()
        .map_err(|_| CliError::UnreadableInput(format!("bad centerline point index '{point_idx_str}'")))?;
    let highlight_t: usize = highlight_t_str
        .parse()
        .map_err(|_| CliError::UnreadableInput(format!("bad timestep '{highlight_t_str}'")))?;

    let line_bytes = std::fs::read(line_path)
        .map_err(|e| CliError::UnreadableInput(format!("reading {}: {e}", line_path.display())))?;
    let line = line_format::read_line(&line_bytes).map_err(|e| CliError::UnreadableInput(e.to_string()))?;
    if point_idx >= line.num_points() {
        return Err(CliError::UnreadableInput(format!(
            "centerline point index {point_idx} out of range (line has {} points)",
            line.num_points()
        )));
    }

    let flow = load_flow_image(flow_path)?;

    let center = line.points()[point_idx];
    let tangent = line.tangent(point_idx);
    let plane = measuring_plane::plane_transform_at(
        center,
        tangent,
        Vector3::new(1.0, 0.0, 0.0),
        sx,
        sy,
        spacing_mm,
        flow.dt_ms(),
    );

    let mesh;
    let segmentation;
    let mask_source = match (mesh_path, segmentation_path) {
        (Some(p), _) => {
            let bytes = std::fs::read(p).map_err(|e| CliError::UnreadableInput(format!("reading {}: {e}", p.display())))?;
            mesh = mesh_format::read_mesh(&bytes).map_err(|e| CliError::UnreadableInput(e.to_string()))?;
            MaskSource::Mesh(&mesh)
        }
        (None, Some(p)) => {
            segmentation = formats::load_scalar_image(p)?;
            MaskSource::Segmentation(&segmentation)
        }
        (None, None) => {
            return Err(CliError::UnreadableInput(
                "stats requires either --mesh or --segmentation for the plane mask".into(),
            ))
        }
    };

    let stats = measuring_plane::sample(&plane, sx, sy, flow.num_times(), &flow, mask_source);

    println!("forward_flow_volume  = {:.4} ml", stats.forward_flow_volume);
    println!("backward_flow_volume = {:.4} ml", stats.backward_flow_volume);
    println!("net_flow_volume      = {:.4} ml", stats.net_flow_volume);
    println!("cardiac_output       = {:.4} l/min", stats.cardiac_output);
    println!("percentaged_back_flow = {:.2}%", stats.percentaged_back_flow);
    println!("normal_is_aligned    = {}", stats.normal_is_aligned);
    if let Some(m) = stats.timesteps.get(highlight_t) {
        println!(
            "timestep {highlight_t}: flow_rate = {:.4}, area = {:.4} mm^2",
            m.flow_rate, m.area
        );
    } else {
        error!("requested highlight timestep {highlight_t} is out of range ({} timesteps)", stats.timesteps.len());
    }

    Ok(())
}

/// Raw flow image layout: `u32 nx, ny, nz, num_times, f64 origin[3],
/// f64 scale[3], f64 dt_ms, f64 values[nx*ny*nz*num_times*3]` (vector
/// components interleaved x,y,z), little-endian.
fn load_flow_image(path: &std::path::Path) -> Result<FlowImage4D, CliError> {
    let bytes = std::fs::read(path)
        .map_err(|e| CliError::UnreadableInput(format!("reading {}: {e}", path.display())))?;
    let mut cursor = 0usize;

    let read_u32 = |bytes: &[u8], cursor: &mut usize| -> Result<u32, CliError> {
        let end = *cursor + 4;
        if end > bytes.len() {
            return Err(CliError::UnreadableInput("truncated flow image".into()));
        }
        let v = u32::from_le_bytes(bytes[*cursor..end].try_into().unwrap());
        *cursor = end;
        Ok(v)
    };
    let read_f64 = |bytes: &[u8], cursor: &mut usize| -> Result<f64, CliError> {
        let end = *cursor + 8;
        if end > bytes.len() {
            return Err(CliError::UnreadableInput("truncated flow image".into()));
        }
        let v = f64::from_le_bytes(bytes[*cursor..end].try_into().unwrap());
        *cursor = end;
        Ok(v)
    };

    let nx = read_u32(&bytes, &mut cursor)? as usize;
    let ny = read_u32(&bytes, &mut cursor)? as usize;
    let nz = read_u32(&bytes, &mut cursor)? as usize;
    let num_times = read_u32(&bytes, &mut cursor)? as usize;
    let origin = Vector3::new(
        read_f64(&bytes, &mut cursor)?,
        read_f64(&bytes, &mut cursor)?,
        read_f64(&bytes, &mut cursor)?,
    );
    let scale = Vector3::new(
        read_f64(&bytes, &mut cursor)?,
        read_f64(&bytes, &mut cursor)?,
        read_f64(&bytes, &mut cursor)?,
    );
    let dt_ms = read_f64(&bytes, &mut cursor)?;

    let mut flow = FlowImage4D::new([nx, ny, nz], num_times, Transform3::new(origin, scale), dt_ms);
    for t in 0..num_times {
        for z in 0..nz {
            for y in 0..ny {
                for x in 0..nx {
                    let v = Vector3::new(
                        read_f64(&bytes, &mut cursor)?,
                        read_f64(&bytes, &mut cursor)?,
                        read_f64(&bytes, &mut cursor)?,
                    );
                    flow.set(x, y, z, t, v);
                }
            }
        }
    }

    Ok(flow)
}
