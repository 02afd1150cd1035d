//! Grid placement for the room wall and the minimal operation set that moves the
//! remote scene from its last known layout to the one implied by a ranking.

use crate::{RankedRoomList, Room};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

pub const DEFAULT_SCENE_NAME: &str = "Live Room Wall";
pub const DEFAULT_CAPACITY: usize = 6;
pub const DEFAULT_COLUMNS: usize = 3;
pub const DEFAULT_TILE_WIDTH: u32 = 1080;
pub const DEFAULT_TILE_HEIGHT: u32 = 1920;
pub const DEFAULT_MARGIN: u32 = 20;
pub const DEFAULT_SOURCE_FPS: u32 = 30;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridSpec {
    pub scene_name: String,
    pub capacity: usize,
    pub columns: usize,
    pub tile_width: u32,
    pub tile_height: u32,
    pub margin: u32,
    /// Resolution the browser source renders at; tiles scale it down or up.
    pub source_width: u32,
    pub source_height: u32,
    pub source_fps: u32,
}

impl Default for GridSpec {
    fn default() -> Self {
        Self {
            scene_name: DEFAULT_SCENE_NAME.to_string(),
            capacity: DEFAULT_CAPACITY,
            columns: DEFAULT_COLUMNS,
            tile_width: DEFAULT_TILE_WIDTH,
            tile_height: DEFAULT_TILE_HEIGHT,
            margin: DEFAULT_MARGIN,
            source_width: DEFAULT_TILE_WIDTH,
            source_height: DEFAULT_TILE_HEIGHT,
            source_fps: DEFAULT_SOURCE_FPS,
        }
    }
}

impl GridSpec {
    pub fn cell(&self, index: usize) -> (usize, usize) {
        let columns = self.columns.max(1);
        (index / columns, index % columns)
    }

    pub fn geometry(&self, index: usize) -> SlotGeometry {
        let (row, col) = self.cell(index);
        let x = self.margin as u64 + col as u64 * (self.tile_width as u64 + self.margin as u64);
        let y = self.margin as u64 + row as u64 * (self.tile_height as u64 + self.margin as u64);
        SlotGeometry {
            x: x as f64,
            y: y as f64,
            width: self.tile_width,
            height: self.tile_height,
            scale_x: ratio(self.tile_width, self.source_width),
            scale_y: ratio(self.tile_height, self.source_height),
        }
    }
}

fn ratio(tile: u32, source: u32) -> f64 {
    if source == 0 {
        1.0
    } else {
        tile as f64 / source as f64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SlotGeometry {
    pub x: f64,
    pub y: f64,
    pub width: u32,
    pub height: u32,
    pub scale_x: f64,
    pub scale_y: f64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotAssignment {
    pub room_id: String,
    pub source_name: String,
    pub url: String,
}

impl SlotAssignment {
    pub fn for_room(room: &Room) -> Self {
        Self {
            room_id: room.id.clone(),
            source_name: room.source_name(),
            url: room.url.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Slot {
    pub index: usize,
    pub row: usize,
    pub col: usize,
    pub geometry: SlotGeometry,
    pub assignment: Option<SlotAssignment>,
}

impl Slot {
    pub fn room_id(&self) -> Option<&str> {
        self.assignment.as_ref().map(|a| a.room_id.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotTable {
    slots: Vec<Slot>,
}

impl SlotTable {
    pub fn empty(grid: &GridSpec) -> Self {
        let slots = (0..grid.capacity)
            .map(|index| {
                let (row, col) = grid.cell(index);
                Slot {
                    index,
                    row,
                    col,
                    geometry: grid.geometry(index),
                    assignment: None,
                }
            })
            .collect();
        Self { slots }
    }

    pub fn slots(&self) -> &[Slot] {
        &self.slots
    }

    pub fn get(&self, index: usize) -> Option<&Slot> {
        self.slots.get(index)
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn assigned(&self) -> usize {
        self.slots.iter().filter(|slot| slot.assignment.is_some()).count()
    }

    pub fn slot_of(&self, room_id: &str) -> Option<usize> {
        self.slots
            .iter()
            .find(|slot| slot.room_id() == Some(room_id))
            .map(|slot| slot.index)
    }

    pub fn set_assignment(&mut self, index: usize, assignment: Option<SlotAssignment>) {
        if let Some(slot) = self.slots.get_mut(index) {
            slot.assignment = assignment;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum LayoutOp {
    EnsureScene {
        scene: String,
    },
    EnsureSource {
        scene: String,
        source: String,
        url: String,
        width: u32,
        height: u32,
        fps: u32,
    },
    SetTransform {
        scene: String,
        source: String,
        geometry: SlotGeometry,
    },
}

impl LayoutOp {
    pub fn label(&self) -> &'static str {
        match self {
            LayoutOp::EnsureScene { .. } => "ensure_scene",
            LayoutOp::EnsureSource { .. } => "ensure_source",
            LayoutOp::SetTransform { .. } => "set_transform",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotChange {
    pub slot: usize,
    pub room_id: String,
    pub ops: Vec<LayoutOp>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LayoutPlan {
    pub slots: SlotTable,
    pub changes: Vec<SlotChange>,
}

impl LayoutPlan {
    pub fn op_count(&self) -> usize {
        self.changes.iter().map(|change| change.ops.len()).sum()
    }

    pub fn is_converged(&self) -> bool {
        self.changes.is_empty()
    }
}

pub fn plan(ranked: &RankedRoomList, existing: &SlotTable, grid: &GridSpec) -> LayoutPlan {
    let mut slots = SlotTable::empty(grid);
    for slot in existing.slots().iter().take(slots.capacity()) {
        slots.set_assignment(slot.index, slot.assignment.clone());
    }

    let placed: Vec<&Room> = ranked.placeable().take(grid.capacity).collect();
    let placed_ids: HashSet<&str> = placed.iter().map(|room| room.id.as_str()).collect();

    let mut changes = Vec::new();
    for index in 0..slots.capacity() {
        let current = slots.get(index).and_then(|slot| slot.room_id().map(str::to_string));
        match placed.get(index) {
            Some(room) => {
                if current.as_deref() == Some(room.id.as_str()) {
                    continue;
                }
                changes.push(slot_change(index, room, grid));
                slots.set_assignment(index, Some(SlotAssignment::for_room(room)));
            }
            None => {
                // Sources are never removed; only forget a room that moved to another slot.
                if let Some(room_id) = current {
                    if placed_ids.contains(room_id.as_str()) {
                        slots.set_assignment(index, None);
                    }
                }
            }
        }
    }

    LayoutPlan { slots, changes }
}

fn slot_change(index: usize, room: &Room, grid: &GridSpec) -> SlotChange {
    let source = room.source_name();
    SlotChange {
        slot: index,
        room_id: room.id.clone(),
        ops: vec![
            LayoutOp::EnsureScene {
                scene: grid.scene_name.clone(),
            },
            LayoutOp::EnsureSource {
                scene: grid.scene_name.clone(),
                source: source.clone(),
                url: room.url.clone(),
                width: grid.source_width,
                height: grid.source_height,
                fps: grid.source_fps,
            },
            LayoutOp::SetTransform {
                scene: grid.scene_name.clone(),
                source,
                geometry: grid.geometry(index),
            },
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{failed_room, room};

    fn ranked(rooms: Vec<Room>) -> RankedRoomList {
        RankedRoomList::from_rooms(rooms)
    }

    fn slot_ids(table: &SlotTable) -> Vec<Option<&str>> {
        table.slots().iter().map(|slot| slot.room_id()).collect()
    }

    #[test]
    fn geometry_follows_grid_formula() {
        let grid = GridSpec::default();
        let first = grid.geometry(0);
        assert_eq!((first.x, first.y), (20.0, 20.0));
        let third = grid.geometry(2);
        assert_eq!((third.x, third.y), (2220.0, 20.0));
        let fifth = grid.geometry(4);
        assert_eq!(grid.cell(4), (1, 1));
        assert_eq!((fifth.x, fifth.y), (1120.0, 1960.0));
        assert_eq!((fifth.scale_x, fifth.scale_y), (1.0, 1.0));
    }

    #[test]
    fn scale_tracks_tile_to_source_ratio() {
        let grid = GridSpec {
            tile_width: 540,
            tile_height: 960,
            ..GridSpec::default()
        };
        let geometry = grid.geometry(0);
        assert_eq!((geometry.scale_x, geometry.scale_y), (0.5, 0.5));
    }

    #[test]
    fn failed_rooms_are_not_placed() {
        let grid = GridSpec::default();
        let list = ranked(vec![room("a", 500), room("b", 300), failed_room("c")]);
        let plan = plan(&list, &SlotTable::empty(&grid), &grid);
        assert_eq!(
            slot_ids(&plan.slots),
            vec![Some("a"), Some("b"), None, None, None, None]
        );
        assert_eq!(plan.changes.len(), 2);
        assert_eq!(plan.op_count(), 6);
        let labels: Vec<&str> = plan.changes[0].ops.iter().map(LayoutOp::label).collect();
        assert_eq!(labels, vec!["ensure_scene", "ensure_source", "set_transform"]);
    }

    #[test]
    fn second_plan_with_same_ranking_converges() {
        let grid = GridSpec::default();
        let list = ranked(vec![room("a", 5), room("b", 4), room("c", 3)]);
        let first = plan(&list, &SlotTable::empty(&grid), &grid);
        assert!(!first.is_converged());
        let second = plan(&list, &first.slots, &grid);
        assert!(second.is_converged());
        assert_eq!(second.op_count(), 0);
        assert_eq!(second.slots, first.slots);
    }

    #[test]
    fn only_capacity_rooms_receive_operations() {
        let grid = GridSpec::default();
        let rooms = (0..8u64).map(|n| room(&format!("r{n}"), 100 - n)).collect();
        let plan = plan(&ranked(rooms), &SlotTable::empty(&grid), &grid);
        assert_eq!(plan.slots.assigned(), 6);
        assert_eq!(plan.changes.len(), 6);
        let touched: HashSet<&str> = plan.changes.iter().map(|c| c.room_id.as_str()).collect();
        assert!(!touched.contains("r6"));
        assert!(!touched.contains("r7"));
    }

    #[test]
    fn never_assigns_two_rooms_to_one_slot() {
        let grid = GridSpec::default();
        let list = ranked(vec![room("a", 9), room("b", 8), room("c", 7), room("d", 6)]);
        let plan = plan(&list, &SlotTable::empty(&grid), &grid);
        let mut slots_seen = HashSet::new();
        for change in &plan.changes {
            assert!(slots_seen.insert(change.slot));
        }
        let mut rooms_seen = HashSet::new();
        for id in plan.slots.slots().iter().filter_map(Slot::room_id) {
            assert!(rooms_seen.insert(id));
        }
    }

    #[test]
    fn swapped_rooms_touch_only_moved_slots() {
        let grid = GridSpec::default();
        let before = plan(
            &ranked(vec![room("a", 9), room("b", 8), room("c", 7)]),
            &SlotTable::empty(&grid),
            &grid,
        );
        let after = plan(
            &ranked(vec![room("b", 10), room("a", 9), room("c", 7)]),
            &before.slots,
            &grid,
        );
        let moved: Vec<usize> = after.changes.iter().map(|c| c.slot).collect();
        assert_eq!(moved, vec![0, 1]);
        assert_eq!(slot_ids(&after.slots)[..3], [Some("b"), Some("a"), Some("c")]);
        match &after.changes[0].ops[2] {
            LayoutOp::SetTransform { source, geometry, .. } => {
                assert_eq!(source, "live_b");
                assert_eq!(geometry.x, 20.0);
            }
            other => panic!("unexpected op: {other:?}"),
        }
    }

    #[test]
    fn dropped_rooms_keep_their_slot() {
        let grid = GridSpec::default();
        let before = plan(
            &ranked(vec![room("a", 9), room("b", 8)]),
            &SlotTable::empty(&grid),
            &grid,
        );
        let after = plan(
            &ranked(vec![room("a", 9), failed_room("b")]),
            &before.slots,
            &grid,
        );
        assert!(after.is_converged());
        assert_eq!(slot_ids(&after.slots)[..2], [Some("a"), Some("b")]);
    }

    #[test]
    fn room_moving_up_clears_its_stale_slot() {
        let grid = GridSpec::default();
        let before = plan(
            &ranked(vec![room("a", 9), room("b", 8)]),
            &SlotTable::empty(&grid),
            &grid,
        );
        let after = plan(&ranked(vec![room("b", 8), failed_room("a")]), &before.slots, &grid);
        assert_eq!(after.changes.len(), 1);
        assert_eq!(after.changes[0].slot, 0);
        assert_eq!(slot_ids(&after.slots)[..2], [Some("b"), None]);
    }

    #[test]
    fn existing_table_is_resized_to_grid_capacity() {
        let wide = GridSpec {
            capacity: 4,
            ..GridSpec::default()
        };
        let narrow = GridSpec {
            capacity: 2,
            ..GridSpec::default()
        };
        let list = ranked(vec![room("a", 4), room("b", 3), room("c", 2), room("d", 1)]);
        let before = plan(&list, &SlotTable::empty(&wide), &wide);
        let after = plan(&list, &before.slots, &narrow);
        assert_eq!(after.slots.capacity(), 2);
        assert!(after.is_converged());
    }
}
