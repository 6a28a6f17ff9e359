//! Scene host - a toy host process exposing an in-memory scene.
//!
//! Clients can create boxes and spheres, query them and list everything
//! created so far. All scene access happens on one host thread, and each
//! batch of edits is logged as a transaction in polling mode.
//!
//! ```text
//! cargo run --example scene_host -- --port 11000 --polling --debug
//! ```

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use clap::Parser;
use hostwire::codec::{Point3d, Vector3d};
use hostwire::{
    CapabilitySurface, DispatchMode, HostKind, HostThread, Server, ServerConfig, Transactions,
};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

#[derive(Parser, Debug)]
#[command(name = "scene-host")]
#[command(about = "Expose a toy scene over hostwire")]
struct Args {
    /// Port to listen on
    #[arg(short, long)]
    port: Option<u16>,

    /// Address to bind to
    #[arg(long)]
    host: Option<std::net::IpAddr>,

    /// JSON config file; command line flags override it
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Run requests in batches instead of blocking per request
    #[arg(long)]
    polling: bool,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    /// Print the capability manifest and exit
    #[arg(long)]
    describe: bool,
}

enum Shape {
    Box { corner: Point3d, size: Vector3d },
    Sphere { center: Point3d, radius: f64 },
}

struct Solid {
    id: usize,
    shape: Shape,
}

impl HostKind for Solid {
    const KIND: &'static str = "solid";
}

impl Solid {
    fn volume(&self) -> f64 {
        match &self.shape {
            Shape::Box { size, .. } => size.x * size.y * size.z,
            Shape::Sphere { radius, .. } => 4.0 / 3.0 * std::f64::consts::PI * radius.powi(3),
        }
    }

    fn anchor(&self) -> Point3d {
        match &self.shape {
            Shape::Box { corner, .. } => *corner,
            Shape::Sphere { center, .. } => *center,
        }
    }
}

#[derive(Default)]
struct Scene {
    solids: Vec<Arc<Solid>>,
}

impl Scene {
    fn add(&mut self, shape: Shape) -> Arc<Solid> {
        let solid = Arc::new(Solid {
            id: self.solids.len(),
            shape,
        });
        self.solids.push(solid.clone());
        solid
    }
}

/// Logs each batch as one undo step.
struct UndoLog {
    scene: Arc<Mutex<Scene>>,
    mark: usize,
}

impl Transactions for UndoLog {
    fn begin(&mut self) -> anyhow::Result<()> {
        self.mark = lock(&self.scene)?.solids.len();
        Ok(())
    }

    fn commit(&mut self) -> anyhow::Result<()> {
        let added = lock(&self.scene)?.solids.len() - self.mark;
        if added > 0 {
            info!("Committed undo step with {} new solids", added);
        }
        Ok(())
    }
}

fn lock(scene: &Mutex<Scene>) -> anyhow::Result<std::sync::MutexGuard<'_, Scene>> {
    scene
        .lock()
        .map_err(|_| anyhow::anyhow!("scene lock poisoned"))
}

fn surface(scene: &Arc<Mutex<Scene>>) -> hostwire::Result<CapabilitySurface> {
    let boxes = scene.clone();
    let spheres = scene.clone();
    let listing = scene.clone();

    CapabilitySurface::builder()
        .operation("CreateBox", move |(corner, size): (Point3d, Vector3d)| {
            anyhow::ensure!(
                size.x > 0.0 && size.y > 0.0 && size.z > 0.0,
                "box dimensions must be positive"
            );
            Ok(lock(&boxes)?.add(Shape::Box { corner, size }))
        })
        .operation("CreateSphere", move |(center, radius): (Point3d, f64)| {
            anyhow::ensure!(radius > 0.0, "radius must be positive, got {}", radius);
            Ok(lock(&spheres)?.add(Shape::Sphere { center, radius }))
        })
        .operation("Volume", |(solid,): (Arc<Solid>,)| Ok(solid.volume()))
        .operation("Anchor", |(solid,): (Arc<Solid>,)| Ok(solid.anchor()))
        .operation("SolidId", |(solid,): (Arc<Solid>,)| Ok(solid.id as i32))
        .operation("AllSolids", move |(): ()| Ok(lock(&listing)?.solids.clone()))
        .operation("TotalVolume", |(solids,): (Vec<Arc<Solid>>,)| {
            Ok(solids.iter().map(|s| s.volume()).sum::<f64>())
        })
        .build()
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let log_level = if args.debug { Level::DEBUG } else { Level::INFO };
    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .with_thread_ids(false)
        .compact()
        .init();

    let mut config = match &args.config {
        Some(path) => ServerConfig::from_json_file(path)
            .with_context(|| format!("loading {}", path.display()))?,
        None => ServerConfig::default(),
    };
    if let Some(ip) = args.host {
        config.bind_addr.set_ip(ip);
    }
    if let Some(port) = args.port {
        config.bind_addr.set_port(port);
    }
    if args.polling {
        config.mode = DispatchMode::Polling;
    }

    let scene = Arc::new(Mutex::new(Scene::default()));
    let surface = surface(&scene)?;

    if args.describe {
        println!("{}", serde_json::to_string_pretty(&surface.describe())?);
        return Ok(());
    }

    let undo = UndoLog {
        scene: scene.clone(),
        mark: 0,
    };
    let server = Server::builder()
        .config(config)
        .capabilities(surface)
        .executor(HostThread::spawn("scene-host", Some(Box::new(undo)))?)
        .bind()
        .await?;

    info!("Scene host ready on {}", server.local_addr()?);
    server.serve().await?;
    Ok(())
}
