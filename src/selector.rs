//! Keeps the longest scenes when a video has more scenes than frames allowed

use std::cmp::Ordering;

use tracing::debug;

use crate::common::Scene;

/// Reduce `scenes` to at most `budget` entries
///
/// Scenes are ranked by duration, longest first, with ties going to the
/// earlier scene. The survivors come back in chronological order and are
/// re-indexed `0..k`. A list that already fits the budget is returned in its
/// original order.
pub fn select(mut scenes: Vec<Scene>, budget: usize) -> Vec<Scene> {
    if scenes.len() > budget {
        debug!("Selecting {} of {} scenes by duration", budget, scenes.len());

        scenes.sort_by(|a, b| by_duration_desc(a, b).then_with(|| a.start_time.total_cmp(&b.start_time)));
        scenes.truncate(budget);
        scenes.sort_by(|a, b| a.start_time.total_cmp(&b.start_time));
    }

    for (index, scene) in scenes.iter_mut().enumerate() {
        scene.index = index;
    }
    scenes
}

/// Duration in whole nanoseconds
///
/// Scene bounds are `frame / fps`, so two scenes spanning the same number of
/// frames can differ in the last bit of `duration()`. Rounding makes them
/// compare equal and leaves the tie to the start time.
fn duration_key(scene: &Scene) -> i64 {
    (scene.duration() * 1e9).round() as i64
}

fn by_duration_desc(a: &Scene, b: &Scene) -> Ordering {
    duration_key(b).cmp(&duration_key(a))
}
