//! Shadow layer scheduling.
//!
//! Layer `i` of the shadow map array belongs to light `i`. A layer is
//! recomputed when its light is new or changed, or when scene geometry moved.

use strata_core::ByteWriter;
use strata_world::Light;

use crate::error::Result;
use crate::upload::{ensure, BufferTarget, UploadReport, UploadSink};

/// Picks the lights whose shadow layers are stale.
#[derive(Debug, Clone)]
pub struct ShadowScheduler {
    max_layers: u32,
    rendered: Vec<Option<Light>>,
}

impl ShadowScheduler {
    pub fn new(max_layers: u32) -> Self {
        Self {
            max_layers,
            rendered: Vec::new(),
        }
    }

    pub const fn max_layers(&self) -> u32 {
        self.max_layers
    }

    /// Light indices to re-render this frame, ascending.
    pub fn select(&mut self, lights: &[Light], geometry_changed: bool) -> Vec<u32> {
        let count = lights.len().min(self.max_layers as usize);
        if count > 0 && lights.len() > count {
            tracing::trace!(lights = lights.len(), layers = self.max_layers, "lights beyond the layer count are unshadowed");
        }
        self.rendered.resize(count, None);
        let mut selected = Vec::new();
        for (index, light) in lights.iter().take(count).enumerate() {
            let slot = &mut self.rendered[index];
            if geometry_changed || slot.as_ref() != Some(light) {
                *slot = Some(light.clone());
                selected.push(index as u32);
            }
        }
        selected
    }

    /// Forget every layer, e.g. after the shadow map was recreated.
    pub fn invalidate(&mut self) {
        self.rendered.clear();
    }
}

/// Upload the selected indices for the shadow dispatch.
pub fn upload_shadow_indices(
    sink: &mut impl UploadSink,
    report: &mut UploadReport,
    indices: &[u32],
) -> Result<bool> {
    let required = (indices.len().max(1) * 4) as u64;
    if !ensure(sink, report, BufferTarget::ShadowIndices, required)? {
        return Ok(false);
    }
    if indices.is_empty() {
        return Ok(true);
    }
    let mut w = ByteWriter::with_capacity(indices.len() * 4);
    for &index in indices {
        w.u32(index);
    }
    sink.write_buffer(BufferTarget::ShadowIndices, 0, w.as_slice())?;
    Ok(true)
}

#[cfg(test)]
mod tests {
    use glam::Vec3;

    use super::*;
    use crate::upload::testing::MemorySink;

    #[test]
    fn new_and_moved_lights_are_selected() {
        let mut scheduler = ShadowScheduler::new(16);
        let mut lights = vec![
            Light::directional(Vec3::NEG_Y, Vec3::ONE, 1.0),
            Light::point(Vec3::new(0.0, 4.0, 0.0), Vec3::ONE, 2.0, 20.0),
        ];
        assert_eq!(scheduler.select(&lights, false), vec![0, 1]);
        assert!(scheduler.select(&lights, false).is_empty());

        lights[1].set_position(Vec3::new(1.0, 4.0, 0.0));
        assert_eq!(scheduler.select(&lights, false), vec![1]);

        lights.push(Light::point(Vec3::ZERO, Vec3::ONE, 1.0, 5.0));
        assert_eq!(scheduler.select(&lights, false), vec![2]);
        assert_eq!(scheduler.select(&lights, true), vec![0, 1, 2]);
    }

    #[test]
    fn removing_a_light_reselects_shifted_layers() {
        let mut scheduler = ShadowScheduler::new(16);
        let mut lights = vec![
            Light::point(Vec3::ZERO, Vec3::ONE, 1.0, 5.0),
            Light::point(Vec3::X, Vec3::ONE, 1.0, 5.0),
        ];
        scheduler.select(&lights, false);
        lights.remove(0);
        assert_eq!(scheduler.select(&lights, false), vec![0]);
    }

    #[test]
    fn layer_count_caps_selection() {
        let mut scheduler = ShadowScheduler::new(2);
        let lights: Vec<_> = (0..4)
            .map(|i| Light::point(Vec3::splat(i as f32), Vec3::ONE, 1.0, 5.0))
            .collect();
        assert_eq!(scheduler.select(&lights, false), vec![0, 1]);
        scheduler.invalidate();
        assert_eq!(scheduler.select(&lights, false), vec![0, 1]);
    }

    #[test]
    fn indices_are_written_little_endian() {
        let mut sink = MemorySink::new(32);
        let mut report = UploadReport::default();
        assert!(upload_shadow_indices(&mut sink, &mut report, &[3, 1]).unwrap());
        assert_eq!(sink.buffer(BufferTarget::ShadowIndices), &[3, 0, 0, 0, 1, 0, 0, 0]);
    }
}
