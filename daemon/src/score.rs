use crate::models::{Build, Queued};
use buildmaster_common::config::ScoreKind;
use buildmaster_common::Pocket;
use chrono::NaiveDateTime;

/// Queue age stops counting after a day.
const MAX_AGE_MINUTES: i64 = 24 * 60;

/// A queue item eligible for dispatch in the current tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub queue: Queued,
    pub build: Build,
    pub pocket: Pocket,
    pub score: i32,
}

/// Decides the order candidates are dispatched in, higher scores go first.
pub trait ScorePolicy: Send + Sync {
    fn score(&self, candidate: &Candidate, now: NaiveDateTime) -> i32;
}

/// Every candidate is equally important.
#[derive(Debug, Default)]
pub struct FlatScore;

impl ScorePolicy for FlatScore {
    fn score(&self, _candidate: &Candidate, _now: NaiveDateTime) -> i32 {
        1
    }
}

/// Prefers security fixes, then older queue items.
#[derive(Debug, Default)]
pub struct AgeScore;

impl AgeScore {
    fn pocket_bonus(pocket: Pocket) -> i32 {
        match pocket {
            Pocket::Security => 3000,
            Pocket::Release => 1500,
            Pocket::Updates => 1000,
            Pocket::Proposed => 500,
            Pocket::Backports => 0,
        }
    }
}

impl ScorePolicy for AgeScore {
    fn score(&self, candidate: &Candidate, now: NaiveDateTime) -> i32 {
        let age = (now - candidate.queue.created_at)
            .num_minutes()
            .clamp(0, MAX_AGE_MINUTES);
        age as i32 + Self::pocket_bonus(candidate.pocket)
    }
}

pub fn policy(kind: ScoreKind) -> Box<dyn ScorePolicy> {
    match kind {
        ScoreKind::Flat => Box::new(FlatScore),
        ScoreKind::Age => Box::new(AgeScore),
    }
}

/// Highest score first, ties broken by build id.
pub fn sort_candidates(candidates: &mut [Candidate]) {
    candidates.sort_by(|a, b| b.score.cmp(&a.score).then(a.build.id.cmp(&b.build.id)));
}
