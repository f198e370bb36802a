//! The ordered pass list executed every frame.
//!
//! Building the order is kept separate from encoding it so the sequence can
//! be checked without a device. The renderer walks [`FramePlan::submissions`]
//! and submits each group before recording the next.

/// One GPU pass.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PassStep {
    /// Clears HDR and depth, draws opaque geometry.
    Unlit,
    /// Loads HDR, raymarches every volume node.
    Volume,
    /// Compute pass writing the over-threshold HDR into bloom mip 0.
    Bright,
    /// Samples mip `level - 1` into mip `level`, clearing it first.
    Downsample { level: u32 },
    /// Samples mip `level + 1` and blends additively into mip `level`.
    Upsample { level: u32 },
    /// Tone-maps HDR plus bloom mip 0 onto the surface.
    Final,
}

/// Groups of passes submitted together.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Submission {
    Unlit,
    Volume,
    Bright,
    Bloom,
    Final,
}

/// Passes timed as one span by the timestamp queries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TimedPass {
    Unlit,
    Volume,
    Bright,
    BloomDownsample,
    BloomUpsample,
    Final,
}

impl TimedPass {
    pub const ALL: [TimedPass; 6] = [
        TimedPass::Unlit,
        TimedPass::Volume,
        TimedPass::Bright,
        TimedPass::BloomDownsample,
        TimedPass::BloomUpsample,
        TimedPass::Final,
    ];

    pub fn label(self) -> &'static str {
        match self {
            TimedPass::Unlit => "Unlit",
            TimedPass::Volume => "Volume",
            TimedPass::Bright => "Bright",
            TimedPass::BloomDownsample => "Bloom Downsample",
            TimedPass::BloomUpsample => "Bloom Upsample",
            TimedPass::Final => "Final",
        }
    }

    /// Index of the begin query; the end query follows it.
    pub fn query_index(self) -> u32 {
        match self {
            TimedPass::Unlit => 0,
            TimedPass::Volume => 2,
            TimedPass::Bright => 4,
            TimedPass::BloomDownsample => 6,
            TimedPass::BloomUpsample => 8,
            TimedPass::Final => 10,
        }
    }
}

impl PassStep {
    pub fn submission(self) -> Submission {
        match self {
            PassStep::Unlit => Submission::Unlit,
            PassStep::Volume => Submission::Volume,
            PassStep::Bright => Submission::Bright,
            PassStep::Downsample { .. } | PassStep::Upsample { .. } => Submission::Bloom,
            PassStep::Final => Submission::Final,
        }
    }

    pub fn timed_pass(self) -> TimedPass {
        match self {
            PassStep::Unlit => TimedPass::Unlit,
            PassStep::Volume => TimedPass::Volume,
            PassStep::Bright => TimedPass::Bright,
            PassStep::Downsample { .. } => TimedPass::BloomDownsample,
            PassStep::Upsample { .. } => TimedPass::BloomUpsample,
            PassStep::Final => TimedPass::Final,
        }
    }
}

/// Begin and end query indices to attach to one pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TimestampSlots {
    pub beginning: Option<u32>,
    pub end: Option<u32>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FramePlan {
    steps: Vec<PassStep>,
}

impl FramePlan {
    /// The full chain for a bloom target with `mip_count` levels.
    pub fn new(mip_count: u32) -> Self {
        let mip_count = mip_count.max(1);
        let mut steps = vec![PassStep::Unlit, PassStep::Volume, PassStep::Bright];
        steps.extend((1..mip_count).map(|level| PassStep::Downsample { level }));
        steps.extend((0..mip_count - 1).rev().map(|level| PassStep::Upsample { level }));
        steps.push(PassStep::Final);
        Self { steps }
    }

    pub fn steps(&self) -> &[PassStep] {
        &self.steps
    }

    /// Consecutive runs of steps sharing a [`Submission`], in order.
    pub fn submissions(&self) -> Vec<(Submission, &[PassStep])> {
        let mut groups = Vec::new();
        let mut start = 0;
        for i in 1..=self.steps.len() {
            let boundary = i == self.steps.len()
                || self.steps[i].submission() != self.steps[start].submission();
            if boundary {
                groups.push((self.steps[start].submission(), &self.steps[start..i]));
                start = i;
            }
        }
        groups
    }

    /// Query slots for the step at `index`: a timed span begins on its first
    /// pass and ends on its last.
    pub fn timestamp_slots(&self, index: usize) -> TimestampSlots {
        let Some(step) = self.steps.get(index) else {
            return TimestampSlots::default();
        };
        let kind = step.timed_pass();
        let first = self.steps.iter().position(|s| s.timed_pass() == kind);
        let last = self.steps.iter().rposition(|s| s.timed_pass() == kind);
        let base = kind.query_index();
        TimestampSlots {
            beginning: (first == Some(index)).then_some(base),
            end: (last == Some(index)).then_some(base + 1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passes_run_in_dependency_order() {
        let plan = FramePlan::new(4);
        assert_eq!(
            plan.steps(),
            &[
                PassStep::Unlit,
                PassStep::Volume,
                PassStep::Bright,
                PassStep::Downsample { level: 1 },
                PassStep::Downsample { level: 2 },
                PassStep::Downsample { level: 3 },
                PassStep::Upsample { level: 2 },
                PassStep::Upsample { level: 1 },
                PassStep::Upsample { level: 0 },
                PassStep::Final,
            ]
        );
    }

    #[test]
    fn single_mip_skips_the_chain() {
        let plan = FramePlan::new(1);
        assert_eq!(
            plan.steps(),
            &[PassStep::Unlit, PassStep::Volume, PassStep::Bright, PassStep::Final]
        );
        assert_eq!(plan.submissions().len(), 4);
    }

    #[test]
    fn bloom_steps_share_one_submission() {
        let plan = FramePlan::new(3);
        let groups: Vec<(Submission, usize)> =
            plan.submissions().iter().map(|(s, steps)| (*s, steps.len())).collect();
        assert_eq!(
            groups,
            vec![
                (Submission::Unlit, 1),
                (Submission::Volume, 1),
                (Submission::Bright, 1),
                (Submission::Bloom, 4),
                (Submission::Final, 1),
            ]
        );
    }

    #[test]
    fn downsample_and_upsample_counts_match_the_chain() {
        let plan = FramePlan::new(9);
        let down = plan
            .steps()
            .iter()
            .filter(|s| matches!(s, PassStep::Downsample { .. }))
            .count();
        let up = plan
            .steps()
            .iter()
            .filter(|s| matches!(s, PassStep::Upsample { .. }))
            .count();
        assert_eq!(down, 8);
        assert_eq!(up, 8);
    }

    #[test]
    fn timed_spans_cover_first_to_last_pass() {
        let plan = FramePlan::new(3);
        // Unlit, Volume, Bright, Down1, Down2, Up1, Up0, Final
        assert_eq!(
            plan.timestamp_slots(0),
            TimestampSlots {
                beginning: Some(0),
                end: Some(1)
            }
        );
        assert_eq!(plan.timestamp_slots(3).beginning, Some(6));
        assert_eq!(plan.timestamp_slots(3).end, None);
        assert_eq!(plan.timestamp_slots(4).end, Some(7));
        assert_eq!(plan.timestamp_slots(6).end, Some(9));
        assert_eq!(plan.timestamp_slots(7).beginning, Some(10));
        assert_eq!(plan.timestamp_slots(99), TimestampSlots::default());
    }
}
