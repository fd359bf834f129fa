//! Panel driver entry point.
//!
//! Loads the TOML configuration, spawns one session per configured panel,
//! opens the grid, pushes a test pattern, and runs until Ctrl-C.
//!
//! The binary currently wires sessions to the simulated transport so the
//! whole stack runs headless; a radio-backed `PanelTransport` slots in at
//! the same seam without touching anything above it.

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use blink_core::Bitmap;
use blink_driver::config;
use blink_driver::transport::mock::MockPanelTransport;
use blink_driver::{DisplaySession, ManagedPanelSpec, PanelManager, PanelTransport};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialise structured logging.  Level is overridden by `RUST_LOG`.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let path = config::config_file_path();
    let cfg = config::load_config(&path)
        .with_context(|| format!("loading config from {}", path.display()))?;
    cfg.validate().context("validating config")?;

    if cfg.panels.list.is_empty() {
        anyhow::bail!(
            "no panels configured; add [[panels.list]] entries to {}",
            path.display()
        );
    }

    info!(
        panels = cfg.panels.list.len(),
        variant = ?cfg.device.variant,
        "panel driver starting"
    );

    // ── Spawn one session per configured panel ────────────────────────────────
    let session_config = cfg.session_config();
    let mut specs = Vec::with_capacity(cfg.panels.list.len());
    for entry in &cfg.panels.list {
        let (transport, _panel) =
            MockPanelTransport::with_address(cfg.device.variant, &entry.address);
        let transport: Arc<dyn PanelTransport> = Arc::new(transport);
        let session = DisplaySession::spawn(&entry.name, transport, session_config.clone());
        specs.push(ManagedPanelSpec {
            placement: blink_core::PanelPlacement {
                name: entry.name.clone(),
                address: entry.address.clone(),
                column: entry.column,
                row: entry.row,
            },
            session,
            brightness: entry.effective_brightness(&cfg.device),
            rotation: entry.effective_rotation(&cfg.device)?,
        });
    }

    // ── Open the grid ─────────────────────────────────────────────────────────
    let manager = PanelManager::open(
        cfg.grid_geometry(),
        specs,
        cfg.panels.startup,
        cfg.startup_window(),
        cfg.panels.failure,
    )
    .await
    .context("opening panel grid")?;

    for name in manager.degraded_panels() {
        warn!(panel = %name, "panel missed the startup window");
    }

    // ── Push a test pattern ───────────────────────────────────────────────────
    let geometry = manager.geometry();
    let image = test_pattern(geometry.canvas_width(), geometry.canvas_height());
    let report = manager.send_image(&image).await.context("sending image")?;
    for (name, err) in report.failed() {
        warn!(panel = %name, error = %err, "test pattern not delivered");
    }
    info!(
        delivered = report.outcomes.len() - report.failed_count(),
        total = report.outcomes.len(),
        "test pattern sent"
    );

    info!("panel driver ready.  Press Ctrl-C to exit.");
    tokio::signal::ctrl_c()
        .await
        .context("waiting for shutdown signal")?;
    info!("shutdown signal received");

    manager.close().await;
    info!("panel driver stopped");
    Ok(())
}

/// A diagonal color gradient sized to the composite canvas.
fn test_pattern(width: u32, height: u32) -> Bitmap {
    let mut image = Bitmap::new(width, height);
    for y in 0..height {
        for x in 0..width {
            let r = (x * 255 / width.max(1)) as u8;
            let g = (y * 255 / height.max(1)) as u8;
            image.set_rgb(x, y, (r, g, 0x40));
        }
    }
    image
}
