use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand, ValueEnum};
use tilexr_common::{GRID_SIZE, TILE_WORLD_SIZE, TileCoord, ZoneCoord};
use tilexr_compositor::{CompositorConfig, SimulatedRuntime, XrSubsystem};
use tilexr_geometry::{GeometryUploader, SnapshotExchange};
use tilexr_partition::ZonePartitioner;
use tilexr_render::{
    GraphicsContext, HeadlessContext, LeaseOwner, RenderTarget, SharedContextArbiter, ViewPass,
    Viewport,
};
use tilexr_render_wgpu::WgpuContext;
use tilexr_world::{Occupant, Terrain, WallEdge, WorldGrid};
use tracing_subscriber::EnvFilter;

const SURFACE_2D: (u32, u32) = (640, 640);

#[derive(Parser)]
#[command(name = "tilexr-cli", about = "CLI tool for tilexr operations")]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print version and crate info
    Info,
    /// Print the effective compositor config as JSON
    Config {
        /// Config file to load and validate (defaults are printed otherwise)
        #[arg(short, long)]
        path: Option<PathBuf>,
    },
    /// Run the game loop, upload cycles and the XR compositor against a
    /// simulated runtime
    Simulate {
        /// Number of game-logic ticks
        #[arg(short, long, default_value = "240")]
        ticks: u64,
        /// Milliseconds per game-logic tick
        #[arg(long, default_value = "16")]
        tick_ms: u64,
        #[arg(short, long, value_enum, default_value = "headless")]
        backend: Backend,
        #[arg(short, long)]
        config: Option<PathBuf>,
        /// Milliseconds the 2D renderer holds the context each tick
        #[arg(long, default_value = "0")]
        hold_2d_ms: u64,
        /// Frames the runtime asks to skip right after start
        #[arg(long, default_value = "0")]
        skip_frames: u32,
        /// Lose the session after this many frames
        #[arg(long)]
        lose_after: Option<u64>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Backend {
    Headless,
    Wgpu,
}

struct SimulateArgs {
    ticks: u64,
    tick: Duration,
    hold_2d: Duration,
    skip_frames: u32,
    lose_after: Option<u64>,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .init();

    match cli.command {
        Commands::Info => {
            println!("tilexr-cli v{}", env!("CARGO_PKG_VERSION"));
            println!("common: {}", tilexr_common::crate_info());
            println!("world: {}", tilexr_world::crate_info());
            println!("partition: {}", tilexr_partition::crate_info());
            println!("geometry: {}", tilexr_geometry::crate_info());
            println!("render: {}", tilexr_render::crate_info());
            println!("render-wgpu: {}", tilexr_render_wgpu::crate_info());
            println!("compositor: {}", tilexr_compositor::crate_info());
        }
        Commands::Config { path } => {
            let config = load_config(path)?;
            println!("{}", config.to_json_pretty()?);
        }
        Commands::Simulate {
            ticks,
            tick_ms,
            backend,
            config,
            hold_2d_ms,
            skip_frames,
            lose_after,
        } => {
            let config = load_config(config)?;
            let args = SimulateArgs {
                ticks,
                tick: Duration::from_millis(tick_ms),
                hold_2d: Duration::from_millis(hold_2d_ms),
                skip_frames,
                lose_after,
            };
            match backend {
                Backend::Headless => simulate(HeadlessContext::new(), config, args)?,
                Backend::Wgpu => {
                    let context = wgpu_context(&config)?;
                    simulate(context, config, args)?;
                }
            }
        }
    }

    Ok(())
}

fn load_config(path: Option<PathBuf>) -> anyhow::Result<CompositorConfig> {
    Ok(match path {
        Some(path) => CompositorConfig::load(&path)?,
        None => CompositorConfig::default(),
    })
}

/// Offscreen wgpu context with every simulated swapchain image and the 2D
/// surface registered as targets.
fn wgpu_context(config: &CompositorConfig) -> anyhow::Result<WgpuContext> {
    let mut context = WgpuContext::headless(tilexr_render_wgpu::TARGET_FORMAT)?;
    let extent = config.swapchain;
    for image in 0..SimulatedRuntime::SWAPCHAIN_IMAGES {
        for eye in 0..2 {
            context.create_offscreen_target(
                RenderTarget::Swapchain { image, eye },
                extent.width,
                extent.height,
            );
        }
    }
    context.create_offscreen_target(RenderTarget::Surface2d, SURFACE_2D.0, SURFACE_2D.1);
    Ok(context)
}

/// A walled floor with a few props, so every zone has geometry.
fn build_world() -> anyhow::Result<WorldGrid> {
    let mut world = WorldGrid::new();
    let size = GRID_SIZE as u16;
    for x in 0..size {
        for y in 0..size {
            world.set_terrain(TileCoord::new(0, x, y), Some(Terrain::new((x ^ y) % 8)))?;
        }
    }
    for i in 0..size {
        let wall = |edge| Occupant::Wall {
            edge,
            height: 2.0,
            material: 11,
        };
        world.add_occupant(TileCoord::new(0, i, 0), wall(WallEdge::South))?;
        world.add_occupant(TileCoord::new(0, i, size - 1), wall(WallEdge::North))?;
    }
    for zone in ZoneCoord::all() {
        let (x, y) = zone.tile_origin();
        world.add_occupant(
            TileCoord::new(0, x + 3, y + 3),
            Occupant::Decoration {
                offset: [0.5, 0.5],
                size: 0.4,
                height: 1.2,
                material: 20 + u16::from(zone.x),
            },
        )?;
    }
    Ok(world)
}

/// One 2D frame: a top-down pass over the whole grid with no zone draws.
fn draw_2d<C: GraphicsContext>(arbiter: &SharedContextArbiter<C>, hold: Duration) -> anyhow::Result<()> {
    let extent = GRID_SIZE as f32 * TILE_WORLD_SIZE;
    let view_proj = glam::Mat4::orthographic_rh(0.0, extent, 0.0, extent, -100.0, 100.0)
        * glam::Mat4::from_rotation_x(std::f32::consts::FRAC_PI_2);
    let mut lease = arbiter.acquire_exclusive(LeaseOwner::Renderer2d);
    lease.begin_view(&ViewPass {
        target: RenderTarget::Surface2d,
        viewport: Viewport::full(SURFACE_2D.0, SURFACE_2D.1),
        view_proj,
    })?;
    lease.flush()?;
    if !hold.is_zero() {
        std::thread::sleep(hold);
    }
    Ok(())
}

fn simulate<C: GraphicsContext + 'static>(
    context: C,
    config: CompositorConfig,
    args: SimulateArgs,
) -> anyhow::Result<()> {
    let mut world = build_world()?;
    world.drain_events();
    let partitioner = ZonePartitioner::new();
    partitioner.mark_all_dirty();
    let exchange = Arc::new(SnapshotExchange::new());
    let mut uploader = GeometryUploader::new();
    let report = uploader.run_cycle(&world, &partitioner, &exchange);
    println!(
        "Initial snapshot: zones={}, failed={}, elapsed={:?}",
        report.rebuilt.len(),
        report.failed.len(),
        report.elapsed
    );

    let arbiter = Arc::new(SharedContextArbiter::new(context, config.arbiter_config()));
    let runtime = SimulatedRuntime::new();
    let sim = runtime.handle();
    sim.skip_next_frames(args.skip_frames);
    if let Some(frames) = args.lose_after {
        sim.lose_session_after(frames);
    }

    let start_on_launch = config.start_on_launch;
    let mut xr = XrSubsystem::new(runtime, Arc::clone(&arbiter), Arc::clone(&exchange), config);
    let updates = xr.subscribe();
    if start_on_launch {
        xr.start()?;
    }

    let size = GRID_SIZE as u64;
    for tick in 0..args.ticks {
        if !start_on_launch && tick == 1 {
            tracing::info!("starting XR subsystem on request");
            xr.start()?;
        }

        let index = tick.wrapping_mul(2_654_435_761) % (size * size);
        let tile = TileCoord::new(0, (index % size) as u16, (index / size) as u16);
        world.set_height(tile, 0.25 + (tick % 4) as f32 * 0.25)?;
        world.step();
        let events = world.drain_events();
        partitioner.mark_events(&events);
        let report = uploader.run_cycle(&world, &partitioner, &exchange);
        tracing::debug!(
            tick,
            rebuilt = report.rebuilt.len(),
            reused = report.reused,
            "upload cycle"
        );

        draw_2d(&arbiter, args.hold_2d)?;
        std::thread::sleep(args.tick);
    }

    let active = xr.is_active();
    xr.stop();

    for update in updates.try_iter() {
        println!(
            "{} -> {} ({}){}",
            update.previous,
            update.state,
            update.display().label(),
            update
                .reason
                .as_deref()
                .map(|r| format!(": {r}"))
                .unwrap_or_default()
        );
    }

    let stats = xr.stats();
    let counters = sim.counters();
    let pool = uploader.pool_stats();
    let lease_stats = arbiter.stats();
    println!("Compositor active at end: {active}");
    println!(
        "Frames: rendered={}, skipped={}, dropped={} (contention={}, submit={}, render={}), draws={}",
        stats.rendered,
        stats.skipped,
        stats.dropped(),
        stats.dropped_contention,
        stats.dropped_submit,
        stats.dropped_render,
        stats.draw_calls
    );
    println!(
        "Frame time: avg={:?}, max={:?}; losses={}, reconnects={}",
        stats.avg_frame, stats.max_frame, stats.session_losses, stats.reconnects
    );
    println!(
        "Runtime: layers={}, skips={}, images acquired={} released={}",
        counters.layers_submitted,
        counters.skips_submitted,
        counters.images_acquired,
        counters.images_released
    );
    println!(
        "Lease: exclusive={}, contended={}, grace overruns={}",
        lease_stats.exclusive_grants, lease_stats.contended, lease_stats.grace_overruns
    );
    println!(
        "Buffer pool: allocated={}, reused={}, returned={}, available={}",
        pool.allocated, pool.reused, pool.returned, pool.available
    );
    println!(
        "GPU buffers resident after stop: {}",
        arbiter.acquire_shared(LeaseOwner::Lifecycle).resident_buffers()
    );

    let violations = sim.violations();
    if !violations.is_empty() {
        anyhow::bail!("runtime protocol violations: {}", violations.join("; "));
    }
    Ok(())
}
