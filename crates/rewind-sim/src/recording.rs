//! Seeded synthetic recordings with a known source layout.

use rand::Rng;
use rewind_core::protocol::{Location, Source, SourceId, SourceKind};
use rewind_core::Recording;

/// Shape of a generated recording.
#[derive(Debug, Clone)]
pub struct RecordingPlan {
    pub modules: usize,
    /// Upper bound on identical copies of each module's script.
    pub max_copies: usize,
    /// Probability that a module ships a source map.
    pub mapped_rate: f64,
    pub steps: usize,
    pub max_depth: u32,
    pub lines: u32,
}

impl Default for RecordingPlan {
    fn default() -> Self {
        RecordingPlan {
            modules: 4,
            max_copies: 3,
            mapped_rate: 0.6,
            steps: 40,
            max_depth: 3,
            lines: 12,
        }
    }
}

/// Sources belonging to one module. Copies of a script share url and
/// content hash and therefore correspond to each other, as do their
/// source-mapped originals.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModuleLayout {
    pub url: String,
    pub generated: Vec<SourceId>,
    /// Original of `generated[i]` at index `i`; empty when unmapped.
    pub originals: Vec<SourceId>,
}

impl ModuleLayout {
    pub fn is_mapped(&self) -> bool {
        !self.originals.is_empty()
    }

    /// Location in the original source for a generated location.
    pub fn original_location(&self, location: &Location) -> Option<Location> {
        let copy = self.generated.iter().position(|id| *id == location.source_id)?;
        let original = self.originals.get(copy)?;
        Some(Location::new(original.clone(), original_line(location.line), 0))
    }
}

fn original_line(generated_line: u32) -> u32 {
    generated_line * 2 + 1
}

/// A recording together with the layout it was generated from.
#[derive(Debug, Clone)]
pub struct SimRecording {
    pub recording: Recording,
    pub modules: Vec<ModuleLayout>,
}

impl SimRecording {
    pub fn generate<R: Rng>(rng: &mut R, plan: &RecordingPlan) -> Self {
        let mut recording = Recording::new(format!("sim-{}", rng.gen::<u32>()));
        let mut modules = Vec::with_capacity(plan.modules);

        for m in 0..plan.modules.max(1) {
            let url = format!("module{m}.js");
            let copies = rng.gen_range(1..=plan.max_copies.max(1));
            let mapped = rng.gen_bool(plan.mapped_rate.clamp(0.0, 1.0));
            let mut layout = ModuleLayout {
                url: url.clone(),
                generated: Vec::new(),
                originals: Vec::new(),
            };
            for c in 0..copies {
                let id = format!("m{m}c{c}");
                recording = recording.with_source(
                    Source::new(id.clone(), SourceKind::ScriptSource)
                        .with_url(url.clone())
                        .with_hash(format!("js{m}")),
                );
                layout.generated.push(id);
            }
            if mapped {
                for c in 0..copies {
                    let id = format!("m{m}c{c}-src");
                    let generated = layout.generated[c].clone();
                    recording = recording.with_source(
                        Source::new(id.clone(), SourceKind::SourceMapped)
                            .with_url(format!("module{m}.ts"))
                            .with_hash(format!("ts{m}"))
                            .with_generated(&[generated.as_str()]),
                    );
                    layout.originals.push(id);
                }
            }
            modules.push(layout);
        }

        let mut depth = 0u32;
        for point in 1..=plan.steps.max(1) as u64 {
            let module = &modules[rng.gen_range(0..modules.len())];
            let copy = &module.generated[rng.gen_range(0..module.generated.len())];
            let line = rng.gen_range(1..=plan.lines.max(1));
            let generated = Location::new(copy.clone(), line, 0);
            let mut location = vec![generated.clone()];
            location.extend(module.original_location(&generated));
            recording = recording.with_step(point, point as f64, location, depth);

            depth = match rng.gen_range(0..3) {
                0 => depth.saturating_sub(1),
                1 => (depth + 1).min(plan.max_depth),
                _ => depth,
            };
        }

        SimRecording {
            recording: recording.fully_loaded(),
            modules,
        }
    }

    pub fn module_of(&self, source_id: &str) -> Option<&ModuleLayout> {
        self.modules.iter().find(|m| {
            m.generated.iter().any(|id| id == source_id) || m.originals.iter().any(|id| id == source_id)
        })
    }

    pub fn is_original(&self, source_id: &str) -> bool {
        self.modules
            .iter()
            .any(|m| m.originals.iter().any(|id| id == source_id))
    }

    /// Ids expected to correspond to `source_id`, in registration order.
    pub fn corresponding(&self, source_id: &str) -> Vec<SourceId> {
        match self.module_of(source_id) {
            Some(module) if self.is_original(source_id) => module.originals.clone(),
            Some(module) => module.generated.clone(),
            None => vec![source_id.to_string()],
        }
    }

    pub fn all_source_ids(&self) -> Vec<SourceId> {
        self.recording.sources.iter().map(|s| s.source_id.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_generation_is_seeded() {
        let plan = RecordingPlan::default();
        let a = SimRecording::generate(&mut ChaCha8Rng::seed_from_u64(9), &plan);
        let b = SimRecording::generate(&mut ChaCha8Rng::seed_from_u64(9), &plan);
        assert_eq!(a.modules, b.modules);
        assert_eq!(a.recording.steps, b.recording.steps);
    }

    #[test]
    fn test_steps_map_to_originals() {
        let plan = RecordingPlan {
            mapped_rate: 1.0,
            ..Default::default()
        };
        let sim = SimRecording::generate(&mut ChaCha8Rng::seed_from_u64(3), &plan);
        for step in &sim.recording.steps {
            assert_eq!(step.location.len(), 2);
            assert!(sim.is_original(&step.location[1].source_id));
        }
        assert_eq!(sim.recording.loaded.len(), 1);
    }
}
