//! The reconciliation loop: poll, rank, plan, apply, report, sleep.

use crate::display::{DisplaySink, StatusSnapshot};
use chrono::Local;
use stagehand_core::layout::{self, GridSpec, LayoutOp, SlotChange, SlotTable};
use stagehand_core::{RankedRoomList, RoomTarget};
use stagehand_obs::{
    BrowserSourceSettings, ControlSession, ItemTransform, RequestError, SessionState,
};
use stagehand_ranking::{fetch_ranked, RankingSource};
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum OperationError {
    #[error("{op} failed: {error}")]
    Request {
        op: &'static str,
        #[source]
        error: RequestError,
    },
    #[error("source {source_name} is not an item of scene {scene}")]
    MissingItem { scene: String, source_name: String },
}

impl OperationError {
    fn resets_session(&self) -> bool {
        matches!(self, OperationError::Request { error, .. } if error.resets_session())
    }
}

fn request_failed(op: &'static str) -> impl FnOnce(RequestError) -> OperationError {
    move |error| OperationError::Request { op, error }
}

/// Inputs that stay fixed for the life of the loop.
pub struct LoopContext<S> {
    pub source: S,
    pub targets: Vec<RoomTarget>,
    pub grid: GridSpec,
    pub interval: Duration,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub applied: usize,
    pub failed: usize,
    pub slots_committed: usize,
    pub slots_failed: usize,
}

/// Owns the control session and the last layout known to be on screen.
pub struct Reconciler {
    session: ControlSession,
    slots: SlotTable,
    scene_ready: bool,
    last_error: Option<String>,
}

impl Reconciler {
    pub fn new(session: ControlSession, grid: &GridSpec) -> Self {
        Self {
            session,
            slots: SlotTable::empty(grid),
            scene_ready: false,
            last_error: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.session.state()
    }

    pub fn slots(&self) -> &SlotTable {
        &self.slots
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    pub async fn close(&mut self) {
        self.session.close().await;
    }

    /// A fresh session knows nothing about the remote scene, so the whole
    /// layout is asserted again from an empty table.
    async fn ensure_connected(&mut self, grid: &GridSpec) -> bool {
        if self.session.check_alive().await {
            return true;
        }
        match self.session.connect().await {
            Ok(()) => {
                self.slots = SlotTable::empty(grid);
                self.scene_ready = false;
                true
            }
            Err(err) => {
                warn!("obs_connect_error: {err}");
                self.last_error = Some(err.to_string());
                false
            }
        }
    }

    pub async fn reconcile(&mut self, ranked: &RankedRoomList, grid: &GridSpec) -> CycleReport {
        let mut report = CycleReport::default();
        self.last_error = None;
        if !self.ensure_connected(grid).await {
            return report;
        }

        let plan = layout::plan(ranked, &self.slots, grid);
        if plan.is_converged() {
            self.slots = plan.slots;
            return report;
        }
        debug!(
            "layout_plan: changes={} ops={}",
            plan.changes.len(),
            plan.op_count()
        );

        let mut committed = plan.slots;
        let mut failed_slots = Vec::new();
        let mut aborted = false;
        for change in &plan.changes {
            if aborted {
                failed_slots.push(change.slot);
                continue;
            }
            match self.apply_change(change, &mut report).await {
                Ok(()) => {
                    report.slots_committed += 1;
                    info!(
                        "slot_assigned: slot={} room={}",
                        change.slot, change.room_id
                    );
                }
                Err(err) => {
                    warn!(
                        "slot_apply_error: slot={} room={} {err}",
                        change.slot, change.room_id
                    );
                    aborted = err.resets_session();
                    self.last_error = Some(err.to_string());
                    failed_slots.push(change.slot);
                }
            }
        }

        // Failed slots go back to what was last confirmed on screen, unless that
        // room was placed by a slot that did commit.
        for &index in &failed_slots {
            committed.set_assignment(index, None);
        }
        for index in failed_slots {
            report.slots_failed += 1;
            let prior = self
                .slots
                .get(index)
                .and_then(|slot| slot.assignment.clone())
                .filter(|assignment| committed.slot_of(&assignment.room_id).is_none());
            committed.set_assignment(index, prior);
        }
        self.slots = committed;
        report
    }

    async fn apply_change(
        &mut self,
        change: &SlotChange,
        report: &mut CycleReport,
    ) -> Result<(), OperationError> {
        for op in &change.ops {
            match self.apply_op(op).await {
                Ok(()) => {
                    report.applied += 1;
                    debug!("layout_op_applied: slot={} op={}", change.slot, op.label());
                }
                Err(err) => {
                    report.failed += 1;
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    async fn apply_op(&mut self, op: &LayoutOp) -> Result<(), OperationError> {
        match op {
            LayoutOp::EnsureScene { scene } => self.ensure_scene(scene).await,
            LayoutOp::EnsureSource {
                scene,
                source,
                url,
                width,
                height,
                fps,
            } => {
                let settings = BrowserSourceSettings::new(url.as_str(), *width, *height, *fps);
                match self
                    .session
                    .create_browser_source(scene, source, &settings)
                    .await
                {
                    Ok(()) => {
                        info!("source_created: scene={scene} source={source} url={url}");
                        Ok(())
                    }
                    Err(err) if err.is_already_exists() => {
                        debug!("source_exists: source={source}");
                        Ok(())
                    }
                    Err(error) => Err(OperationError::Request {
                        op: op.label(),
                        error,
                    }),
                }
            }
            LayoutOp::SetTransform {
                scene,
                source,
                geometry,
            } => {
                let items = self
                    .session
                    .list_scene_items(scene)
                    .await
                    .map_err(request_failed(op.label()))?;
                let item = items
                    .iter()
                    .find(|item| &item.source_name == source)
                    .ok_or_else(|| OperationError::MissingItem {
                        scene: scene.clone(),
                        source_name: source.clone(),
                    })?;
                self.session
                    .set_item_transform(scene, item.scene_item_id, ItemTransform::from(geometry))
                    .await
                    .map_err(request_failed(op.label()))
            }
        }
    }

    /// List, create if missing, switch; done once per session.
    async fn ensure_scene(&mut self, scene: &str) -> Result<(), OperationError> {
        if self.scene_ready {
            return Ok(());
        }
        let op = "ensure_scene";
        let scenes = self
            .session
            .list_scenes()
            .await
            .map_err(request_failed(op))?;
        if !scenes.contains(scene) {
            match self.session.create_scene(scene).await {
                Ok(()) => info!("scene_created: scene={scene}"),
                Err(err) if err.is_already_exists() => {}
                Err(error) => return Err(OperationError::Request { op, error }),
            }
        }
        if !scenes.is_program(scene) {
            self.session
                .switch_scene(scene)
                .await
                .map_err(request_failed(op))?;
            info!("scene_switched: scene={scene}");
        }
        self.scene_ready = true;
        Ok(())
    }
}

pub struct Director<S> {
    ctx: LoopContext<S>,
    reconciler: Option<Reconciler>,
    cycle: u64,
}

impl<S: RankingSource> Director<S> {
    /// `reconciler` is `None` in monitor-only mode.
    pub fn new(ctx: LoopContext<S>, reconciler: Option<Reconciler>) -> Self {
        Self {
            ctx,
            reconciler,
            cycle: 0,
        }
    }

    pub async fn run_cycle(&mut self) -> StatusSnapshot {
        self.cycle += 1;
        let ranked = fetch_ranked(&self.ctx.source, &self.ctx.targets).await;
        match ranked.top_live() {
            Some(top) => info!(
                "top_room: cycle={} id={} name={} viewers={}",
                self.cycle,
                top.id,
                top.display_name(),
                top.viewers_display
            ),
            None => info!("top_room: cycle={} none live", self.cycle),
        }

        let report = match self.reconciler.as_mut() {
            Some(reconciler) => reconciler.reconcile(&ranked, &self.ctx.grid).await,
            None => CycleReport::default(),
        };
        if report != CycleReport::default() {
            debug!(
                "cycle_report: cycle={} applied={} failed={} slots_committed={} slots_failed={}",
                self.cycle, report.applied, report.failed, report.slots_committed, report.slots_failed
            );
        }
        let reconciler = self.reconciler.as_ref();
        StatusSnapshot {
            cycle: self.cycle,
            taken_at: Local::now(),
            session: reconciler.map(Reconciler::state),
            scene_name: self.ctx.grid.scene_name.clone(),
            ranked,
            slots: reconciler.map(|reconciler| reconciler.slots().clone()),
            ops_applied: report.applied,
            ops_failed: report.failed,
            last_error: reconciler.and_then(|reconciler| reconciler.last_error().map(str::to_string)),
            interval: self.ctx.interval,
        }
    }

    /// Runs cycles until `shutdown` resolves. An in-flight cycle is abandoned.
    pub async fn run<D, F>(&mut self, sink: &mut D, shutdown: F)
    where
        D: DisplaySink + ?Sized,
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        loop {
            let snapshot = tokio::select! {
                _ = &mut shutdown => None,
                snapshot = self.run_cycle() => Some(snapshot),
            };
            let Some(snapshot) = snapshot else {
                break;
            };
            sink.publish(&snapshot);
            let stop = tokio::select! {
                _ = &mut shutdown => true,
                _ = tokio::time::sleep(self.ctx.interval) => false,
            };
            if stop {
                break;
            }
        }
        info!("shutdown_requested: cycle={}", self.cycle);
    }

    pub async fn shutdown(&mut self) {
        if let Some(reconciler) = self.reconciler.as_mut() {
            reconciler.close().await;
        }
    }
}
