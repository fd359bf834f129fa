//! PanelManager: treats a grid of panels as one composite display.
//!
//! The manager owns one [`DisplaySession`] per configured panel.  An
//! incoming image is validated against the grid, cropped into per-panel
//! tiles, and fanned out to all sessions concurrently; the call joins every
//! send and reports a per-panel outcome map.  Panels never share state, so
//! one slow or dead panel can delay a send barrier but cannot corrupt its
//! neighbors.

use std::collections::HashMap;
use std::time::Duration;

use blink_core::{geometry, Bitmap, GeometryError, GridGeometry, PanelPlacement, Rotation};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::task::JoinSet;
use tracing::{info, warn};

use crate::session::{DisplaySession, SessionError};

/// How `open` treats panels that fail to come up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StartupPolicy {
    /// Every panel must reach READY or `open` fails and releases all links.
    WaitAll,
    /// Panels that miss the startup window are marked degraded; the grid
    /// opens with the rest.
    BestEffort,
}

/// How `send_image` treats per-panel failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Failures are reported in the outcome map; the call itself succeeds.
    BestEffort,
    /// Any panel failure fails the whole send.  Delivered tiles stay on
    /// their panels; there is no wire operation to take a frame back.
    Atomic,
}

/// Manager-level errors.
#[derive(Debug, Error)]
pub enum ManagerError {
    #[error(transparent)]
    Geometry(#[from] GeometryError),

    /// `WaitAll` startup: a panel failed to reach READY.
    #[error("panel '{name}' failed to start: {source}")]
    Startup {
        name: String,
        #[source]
        source: SessionError,
    },

    /// `Atomic` send: at least one panel failed.
    #[error("send failed on {failed} of {total} panels")]
    PartialFailure {
        failed: usize,
        total: usize,
        report: SendReport,
    },

    /// A manager task panicked.  Should not happen; surfaced rather than
    /// swallowed.
    #[error("panel task failed to join: {0}")]
    Join(String),
}

/// Per-panel results of one fan-out operation, keyed by panel name.
#[derive(Debug, Default)]
pub struct SendReport {
    pub outcomes: HashMap<String, Result<(), SessionError>>,
}

impl SendReport {
    pub fn all_ok(&self) -> bool {
        self.outcomes.values().all(Result::is_ok)
    }

    pub fn failed(&self) -> impl Iterator<Item = (&str, &SessionError)> {
        self.outcomes
            .iter()
            .filter_map(|(name, outcome)| outcome.as_ref().err().map(|e| (name.as_str(), e)))
    }

    pub fn failed_count(&self) -> usize {
        self.failed().count()
    }
}

/// One panel under management: its grid placement, its session, and the
/// initial appearance settings applied at startup.
pub struct ManagedPanelSpec {
    pub placement: PanelPlacement,
    pub session: DisplaySession,
    /// Brightness applied once the panel is READY (0 = off, 255 = full).
    pub brightness: u8,
    /// Rotation applied once the panel is READY.
    pub rotation: Rotation,
}

#[derive(Debug)]
struct ManagedPanel {
    placement: PanelPlacement,
    session: DisplaySession,
    degraded: bool,
}

/// Orchestrates a fixed grid of panels.
#[derive(Debug)]
pub struct PanelManager {
    geometry: GridGeometry,
    panels: Vec<ManagedPanel>,
    failure: FailurePolicy,
}

impl PanelManager {
    /// Validates the grid, brings every panel up per `startup`, and applies
    /// each panel's initial brightness and rotation.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::Geometry`] for an invalid grid, and under
    /// [`StartupPolicy::WaitAll`] a [`ManagerError::Startup`] for the first
    /// panel that fails (all links are released before returning).
    pub async fn open(
        geometry: GridGeometry,
        specs: Vec<ManagedPanelSpec>,
        startup: StartupPolicy,
        startup_window: Duration,
        failure: FailurePolicy,
    ) -> Result<Self, ManagerError> {
        let placements: Vec<PanelPlacement> =
            specs.iter().map(|s| s.placement.clone()).collect();
        geometry::validate_placements(&geometry, &placements)?;

        let mut join_set = JoinSet::new();
        for spec in &specs {
            let session = spec.session.clone();
            let name = spec.placement.name.clone();
            let brightness = spec.brightness;
            let rotation = spec.rotation;
            join_set.spawn(async move {
                let result = bring_up_panel(&session, brightness, rotation, startup_window).await;
                (name, result)
            });
        }

        let mut failures: HashMap<String, SessionError> = HashMap::new();
        while let Some(joined) = join_set.join_next().await {
            let (name, result) = joined.map_err(|e| ManagerError::Join(e.to_string()))?;
            if let Err(err) = result {
                warn!(panel = %name, error = %err, "panel failed to start");
                failures.insert(name, err);
            }
        }

        if startup == StartupPolicy::WaitAll {
            if let Some((name, source)) = failures.drain().next() {
                // One bad panel fails the whole grid; release everything.
                for spec in &specs {
                    spec.session.close().await;
                }
                return Err(ManagerError::Startup { name, source });
            }
        }

        let panels = specs
            .into_iter()
            .map(|spec| {
                let degraded = failures.contains_key(&spec.placement.name);
                ManagedPanel {
                    placement: spec.placement,
                    session: spec.session,
                    degraded,
                }
            })
            .collect::<Vec<_>>();

        let ready = panels.iter().filter(|p| !p.degraded).count();
        info!(
            panels = panels.len(),
            ready,
            degraded = panels.len() - ready,
            "panel grid open"
        );

        Ok(Self {
            geometry,
            panels,
            failure,
        })
    }

    pub fn geometry(&self) -> GridGeometry {
        self.geometry
    }

    /// Names of panels that missed the startup window, in grid order.
    pub fn degraded_panels(&self) -> Vec<&str> {
        self.panels
            .iter()
            .filter(|p| p.degraded)
            .map(|p| p.placement.name.as_str())
            .collect()
    }

    /// Crops `image` into per-panel tiles and sends them all concurrently.
    ///
    /// The image must match the grid canvas exactly; no resampling ever
    /// happens.  Degraded panels are still attempted — their sessions may
    /// have recovered through reconnection.
    ///
    /// # Errors
    ///
    /// Returns [`ManagerError::Geometry`] for a mismatched image, and under
    /// [`FailurePolicy::Atomic`] a [`ManagerError::PartialFailure`] carrying
    /// the outcome map when any panel fails.
    pub async fn send_image(&self, image: &Bitmap) -> Result<SendReport, ManagerError> {
        self.geometry.check_canvas(image)?;

        let mut join_set = JoinSet::new();
        for panel in &self.panels {
            let tile = image.tile(
                &self.geometry,
                panel.placement.column,
                panel.placement.row,
            )?;
            let session = panel.session.clone();
            let name = panel.placement.name.clone();
            join_set.spawn(async move {
                let result = session.send_frame(tile).await;
                (name, result)
            });
        }

        let mut report = SendReport::default();
        while let Some(joined) = join_set.join_next().await {
            let (name, result) = joined.map_err(|e| ManagerError::Join(e.to_string()))?;
            if let Err(err) = &result {
                warn!(panel = %name, error = %err, "tile send failed");
            }
            report.outcomes.insert(name, result);
        }

        let failed = report.failed_count();
        if failed > 0 && self.failure == FailurePolicy::Atomic {
            return Err(ManagerError::PartialFailure {
                failed,
                total: self.panels.len(),
                report,
            });
        }
        Ok(report)
    }

    /// Sets brightness on every panel concurrently.
    pub async fn set_brightness(&self, level: u8) -> Result<SendReport, ManagerError> {
        self.fan_out(move |session| async move { session.set_brightness(level).await })
            .await
    }

    /// Sets rotation on every panel concurrently.
    pub async fn set_rotation(&self, rotation: Rotation) -> Result<SendReport, ManagerError> {
        self.fan_out(move |session| async move { session.set_rotation(rotation).await })
            .await
    }

    /// Closes every session.  Idempotent; safe to call on a grid that never
    /// fully opened.
    pub async fn close(&self) {
        let mut join_set = JoinSet::new();
        for panel in &self.panels {
            let session = panel.session.clone();
            join_set.spawn(async move { session.close().await });
        }
        while join_set.join_next().await.is_some() {}
        info!(panels = self.panels.len(), "panel grid closed");
    }

    /// Runs `op` against every panel concurrently.  The report carries one
    /// outcome per panel; a panicked task surfaces as a join error rather
    /// than a silently missing entry.
    async fn fan_out<F, Fut>(&self, op: F) -> Result<SendReport, ManagerError>
    where
        F: Fn(DisplaySession) -> Fut,
        Fut: std::future::Future<Output = Result<(), SessionError>> + Send + 'static,
    {
        let mut join_set = JoinSet::new();
        for panel in &self.panels {
            let name = panel.placement.name.clone();
            let fut = op(panel.session.clone());
            join_set.spawn(async move { (name, fut.await) });
        }
        let mut report = SendReport::default();
        while let Some(joined) = join_set.join_next().await {
            let (name, result) = joined.map_err(|e| ManagerError::Join(e.to_string()))?;
            report.outcomes.insert(name, result);
        }
        Ok(report)
    }
}

/// Connects one panel and applies its initial appearance, bounded by the
/// startup window.
async fn bring_up_panel(
    session: &DisplaySession,
    brightness: u8,
    rotation: Rotation,
    window: Duration,
) -> Result<(), SessionError> {
    let bring_up = async {
        session.connect().await?;
        session.set_brightness(brightness).await?;
        session.set_rotation(rotation).await?;
        Ok(())
    };
    match tokio::time::timeout(window, bring_up).await {
        Ok(result) => result,
        Err(_) => Err(SessionError::Unavailable),
    }
}
