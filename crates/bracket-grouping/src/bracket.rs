//! Focus bracket detection and grouping for FocusGroup
//!
//! A focus bracket is a run of frames shot back to back while the lens steps
//! through focus. Candidates are ordered, then walked once: each frame joins
//! the current run when it is close enough to its predecessor in both capture
//! time and focus-step count, otherwise it starts a new run. Runs of two or
//! more frames are persisted as groups led by their first frame.
//!
//! Filename order stands in for capture order by default because EXIF
//! timestamps only resolve whole seconds, which cannot order frames within a
//! burst. Results are only as good as the filenames are monotonic.

use std::cmp::Ordering;
use std::collections::HashSet;
use serde::{Deserialize, Serialize};
use crate::catalog::{GroupStore, ImageId, ImageRecord};
use crate::inspect::{to_absolute_time, FocusReader};

/// Ordering applied to candidates before the grouping pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BracketOrder {
    /// Lexical filename order
    #[default]
    Filename,
    /// Capture timestamp, ties broken by filename
    CaptureTime,
}

impl BracketOrder {
    pub fn compare(&self, a: &ImageRecord, b: &ImageRecord) -> Ordering {
        match self {
            BracketOrder::Filename => a.filename.cmp(&b.filename),
            BracketOrder::CaptureTime => to_absolute_time(&a.capture_timestamp)
                .cmp(&to_absolute_time(&b.capture_timestamp))
                .then_with(|| a.filename.cmp(&b.filename)),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BracketConfig {
    /// Largest capture-time gap between neighbouring frames (seconds, inclusive)
    pub time_gap_seconds: i64,
    /// Largest focus-step change between neighbouring frames (inclusive)
    pub focus_step_threshold: i64,
    /// Candidate ordering
    pub order: BracketOrder,
}

impl Default for BracketConfig {
    fn default() -> Self {
        Self {
            time_gap_seconds: 10,
            focus_step_threshold: 150,
            order: BracketOrder::Filename,
        }
    }
}

impl BracketConfig {
    /// Adjacency test between a frame and its predecessor.
    ///
    /// `time_diff` is signed (current minus previous) and is never made
    /// absolute: a frame that sorts after a later-captured one always passes
    /// the time check. Only the focus delta is absolute.
    pub fn is_adjacent(&self, time_diff: i64, focus_diff: u64) -> bool {
        let within_focus = u64::try_from(self.focus_step_threshold)
            .map(|threshold| focus_diff <= threshold)
            .unwrap_or(false);
        time_diff <= self.time_gap_seconds && within_focus
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bracket {
    /// First frame of the run; every member follows it
    pub leader: ImageId,
    /// Remaining frames, in pass order
    pub members: Vec<ImageId>,
    /// Focus position of every frame, leader first
    pub focus_positions: Vec<i64>,
}

impl Bracket {
    pub fn frame_count(&self) -> usize {
        self.members.len() + 1
    }

    /// Total focus travel covered by the bracket
    pub fn focus_span(&self) -> u64 {
        let min = self.focus_positions.iter().min().copied().unwrap_or(0);
        let max = self.focus_positions.iter().max().copied().unwrap_or(0);
        max.abs_diff(min)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupingOutcome {
    /// The pass ran over the ungrouped candidates
    Completed,
    /// Fewer than two ungrouped candidates; nothing was examined
    NotEnoughImages,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupingReport {
    pub outcome: GroupingOutcome,
    /// Size of the selection handed to the grouper
    pub candidates: usize,
    /// Candidates skipped because they already belonged to a group
    pub skipped_grouped: usize,
    /// Groups created by this pass
    pub brackets: Vec<Bracket>,
    /// Frames left ungrouped because their run had a single frame
    pub singles: Vec<ImageId>,
}

impl GroupingReport {
    fn new(candidates: usize, skipped_grouped: usize, outcome: GroupingOutcome) -> Self {
        Self {
            outcome,
            candidates,
            skipped_grouped,
            brackets: Vec::new(),
            singles: Vec::new(),
        }
    }

    pub fn groups_created(&self) -> usize {
        self.brackets.len()
    }

    /// Number of frames placed in a group (leaders included)
    pub fn grouped_frames(&self) -> usize {
        self.brackets.iter().map(Bracket::frame_count).sum()
    }

    /// Human-readable one-line summary of the pass
    pub fn summary(&self) -> String {
        match self.outcome {
            GroupingOutcome::NotEnoughImages => format!(
                "Not enough ungrouped images ({} selected, {} already grouped)",
                self.candidates, self.skipped_grouped
            ),
            GroupingOutcome::Completed => format!(
                "Created {} focus bracket group(s) from {} image(s); {} left ungrouped, {} already grouped",
                self.groups_created(),
                self.grouped_frames(),
                self.singles.len(),
                self.skipped_grouped
            ),
        }
    }
}

/// Run accumulated during the pass; each frame carries its focus reading
struct Run {
    frames: Vec<(ImageRecord, i64)>,
}

impl Run {
    fn start(image: ImageRecord, focus: i64) -> Self {
        Self { frames: vec![(image, focus)] }
    }

    fn push(&mut self, image: ImageRecord, focus: i64) {
        self.frames.push((image, focus));
    }
}

pub struct BracketGrouper {
    config: BracketConfig,
}

impl BracketGrouper {
    pub fn new(config: BracketConfig) -> Self {
        Self { config }
    }

    pub fn with_default_config() -> Self {
        Self::new(BracketConfig::default())
    }

    pub fn config(&self) -> &BracketConfig {
        &self.config
    }

    /// Group candidates using the configured ordering.
    pub fn group<F, S>(&self, candidates: Vec<ImageRecord>, focus: &mut F, store: &mut S) -> GroupingReport
    where
        F: FocusReader + ?Sized,
        S: GroupStore + ?Sized,
    {
        let order = self.config.order;
        self.group_by(candidates, |a, b| order.compare(a, b), focus, store)
    }

    /// Group candidates using a caller-supplied ordering.
    ///
    /// Records that already belong to a group are skipped: members following
    /// another record, and leaders that other records follow. Focus positions are
    /// read exactly once per examined record. Store failures are logged and do
    /// not stop the pass.
    pub fn group_by<C, F, S>(
        &self,
        candidates: Vec<ImageRecord>,
        compare: C,
        focus: &mut F,
        store: &mut S,
    ) -> GroupingReport
    where
        C: FnMut(&ImageRecord, &ImageRecord) -> Ordering,
        F: FocusReader + ?Sized,
        S: GroupStore + ?Sized,
    {
        let candidate_count = candidates.len();
        let followed: HashSet<ImageId> = candidates
            .iter()
            .filter(|image| image.is_grouped())
            .map(|image| image.leader.clone())
            .collect();
        let mut ungrouped: Vec<ImageRecord> = candidates
            .into_iter()
            .filter(|image| !image.is_grouped() && !followed.contains(&image.id))
            .filter(|image| !Self::leads_group(&*store, &image.id))
            .collect();
        let skipped = candidate_count - ungrouped.len();

        if ungrouped.len() < 2 {
            let report = GroupingReport::new(candidate_count, skipped, GroupingOutcome::NotEnoughImages);
            log::info!("{}", report.summary());
            return report;
        }

        ungrouped.sort_by(compare);
        let mut report = GroupingReport::new(candidate_count, skipped, GroupingOutcome::Completed);

        let mut ordered = ungrouped.into_iter();
        let Some(first) = ordered.next() else {
            return report;
        };
        let mut prev_time = to_absolute_time(&first.capture_timestamp);
        let mut prev_focus = focus.focus_position(&first);
        log::debug!("{}: focus {} (run start)", first.filename, prev_focus);
        let mut run = Run::start(first, prev_focus);

        for image in ordered {
            let time = to_absolute_time(&image.capture_timestamp);
            let position = focus.focus_position(&image);
            let time_diff = time - prev_time;
            let focus_diff = prev_focus.abs_diff(position);

            if self.config.is_adjacent(time_diff, focus_diff) {
                log::debug!(
                    "{}: focus {} joins run (dt {}s, dfocus {})",
                    image.filename, position, time_diff, focus_diff
                );
                run.push(image, position);
            } else {
                log::debug!(
                    "{}: focus {} starts new run (dt {}s, dfocus {})",
                    image.filename, position, time_diff, focus_diff
                );
                let finished = std::mem::replace(&mut run, Run::start(image, position));
                self.close_run(finished, store, &mut report);
            }

            prev_time = time;
            prev_focus = position;
        }
        self.close_run(run, store, &mut report);

        log::info!("{}", report.summary());
        report
    }

    /// Ask the store whether a record already leads a group. A failed lookup
    /// counts as grouped so the record is left alone.
    fn leads_group<S>(store: &S, id: &ImageId) -> bool
    where
        S: GroupStore + ?Sized,
    {
        store.has_members(id).unwrap_or_else(|e| {
            log::error!("Failed to look up group members of {}: {:#}", id, e);
            true
        })
    }

    /// Persist a finished run as a group, or record its lone frame as a single.
    fn close_run<S>(&self, run: Run, store: &mut S, report: &mut GroupingReport)
    where
        S: GroupStore + ?Sized,
    {
        let mut frames = run.frames.into_iter();
        let Some((leader, leader_focus)) = frames.next() else {
            return;
        };
        let rest: Vec<(ImageRecord, i64)> = frames.collect();
        if rest.is_empty() {
            report.singles.push(leader.id);
            return;
        }

        let mut bracket = Bracket {
            leader: leader.id.clone(),
            members: Vec::with_capacity(rest.len()),
            focus_positions: vec![leader_focus],
        };
        for (member, position) in rest {
            if let Err(e) = store.group_with(&member.id, &leader.id) {
                log::error!("Failed to group {} with {}: {:#}", member.id, leader.id, e);
            }
            bracket.members.push(member.id);
            bracket.focus_positions.push(position);
        }

        log::info!(
            "Grouped {} frame(s) under {} (focus span {})",
            bracket.frame_count(),
            leader.filename,
            bracket.focus_span()
        );
        report.brackets.push(bracket);
    }
}
