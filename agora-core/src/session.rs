//! Participant registry.
//!
//! Tracks who is in a presentation, whether they are connected, and every
//! answer they had accepted per slide. Participants are keyed by a stable id
//! that survives reconnects; a reconnecting client re-attaches to its record
//! instead of creating a new one, so submission counts carry over.
//!
//! Participant ids are public (they appear in leaderboards and boards), so
//! re-attaching also needs the resume token handed out on the first join.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::aggregate::Submission;
use crate::answer::{Answer, NormalizedAnswer};
use crate::error::{LiveError, LiveResult};

pub const MAX_NAME_CHARS: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ParticipantStatus {
    Active,
    /// Joined before the presenter went live.
    Waiting,
    /// Removed by the presenter; rejoining is refused until admitted.
    Kicked,
}

/// One accepted answer, kept so aggregates can be rebuilt and the answer
/// echoed back to a reconnecting client.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedAnswer {
    pub answer: Answer,
    pub normalized: NormalizedAnswer,
    pub at_ms: u64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SlideRecord {
    /// Units consumed against the resubmission policy.
    pub used: u32,
    pub answers: Vec<RecordedAnswer>,
}

#[derive(Debug, Clone)]
pub struct Participant {
    pub id: Uuid,
    pub display_name: String,
    pub status: ParticipantStatus,
    pub connected: bool,
    pub joined_at_ms: u64,
    /// Secret shared only with the participant's own connection.
    pub resume_token: Uuid,
    records: HashMap<Uuid, SlideRecord>,
}

impl Participant {
    pub fn record(&self, slide_id: Uuid) -> Option<&SlideRecord> {
        self.records.get(&slide_id)
    }

    pub fn used(&self, slide_id: Uuid) -> u32 {
        self.records.get(&slide_id).map_or(0, |r| r.used)
    }

    /// Latest accepted answer on a slide.
    pub fn last_answer(&self, slide_id: Uuid) -> Option<&Answer> {
        self.records.get(&slide_id)?.answers.last().map(|r| &r.answer)
    }
}

/// Presenter-facing view of one participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RosterEntry {
    pub participant_id: Uuid,
    #[serde(rename = "name")]
    pub display_name: String,
    pub status: ParticipantStatus,
    pub connected: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct JoinOutcome {
    pub participant_id: Uuid,
    /// The id was already known; its history was kept.
    pub rejoined: bool,
    pub status: ParticipantStatus,
    pub resume_token: Uuid,
}

#[derive(Debug, Default)]
pub struct ParticipantRegistry {
    participants: HashMap<Uuid, Participant>,
}

pub fn clean_name(name: &str) -> LiveResult<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(LiveError::validation("Please enter a name"));
    }
    if name.chars().count() > MAX_NAME_CHARS {
        return Err(LiveError::validation(format!(
            "Names are limited to {MAX_NAME_CHARS} characters"
        )));
    }
    Ok(name.to_string())
}

impl ParticipantRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Join or re-attach.
    ///
    /// A known id keeps its record when `resume_token` matches the one it
    /// was issued; an empty name on rejoin keeps the old one. `capacity`
    /// only limits brand new participants.
    pub fn join(
        &mut self,
        participant_id: Option<Uuid>,
        resume_token: Option<Uuid>,
        display_name: &str,
        live: bool,
        capacity: Option<usize>,
        now_ms: u64,
    ) -> LiveResult<JoinOutcome> {
        let fresh_status = if live { ParticipantStatus::Active } else { ParticipantStatus::Waiting };

        if let Some(existing) = participant_id.and_then(|id| self.participants.get_mut(&id)) {
            if resume_token != Some(existing.resume_token) {
                log::warn!("Refused resume of participant {} without its token", existing.id);
                return Err(LiveError::unauthorized("Cannot resume this participant session"));
            }
            if existing.status == ParticipantStatus::Kicked {
                return Err(LiveError::unauthorized(
                    "You have been removed from this presentation",
                ));
            }
            if !display_name.trim().is_empty() {
                existing.display_name = clean_name(display_name)?;
            }
            existing.connected = true;
            if live {
                existing.status = ParticipantStatus::Active;
            }
            return Ok(JoinOutcome {
                participant_id: existing.id,
                rejoined: true,
                status: existing.status,
                resume_token: existing.resume_token,
            });
        }

        let display_name = clean_name(display_name)?;
        if let Some(limit) = capacity {
            if self.admitted_count() >= limit {
                return Err(LiveError::Capacity { limit });
            }
        }
        let id = participant_id.unwrap_or_else(Uuid::new_v4);
        let resume_token = Uuid::new_v4();
        self.participants.insert(
            id,
            Participant {
                id,
                display_name,
                status: fresh_status,
                connected: true,
                joined_at_ms: now_ms,
                resume_token,
                records: HashMap::new(),
            },
        );
        Ok(JoinOutcome {
            participant_id: id,
            rejoined: false,
            status: fresh_status,
            resume_token,
        })
    }

    pub fn get(&self, id: Uuid) -> Option<&Participant> {
        self.participants.get(&id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Participant> {
        self.participants.values()
    }

    /// Participant allowed to submit right now.
    pub fn active(&self, id: Uuid) -> LiveResult<&Participant> {
        let p = self.participants.get(&id).ok_or_else(|| LiveError::not_found("Participant"))?;
        match p.status {
            ParticipantStatus::Active => Ok(p),
            ParticipantStatus::Waiting => Err(LiveError::NotLive),
            ParticipantStatus::Kicked => Err(LiveError::unauthorized(
                "You have been removed from this presentation",
            )),
        }
    }

    /// Mark disconnected. Records stay for a later reconnect.
    pub fn detach(&mut self, id: Uuid) -> bool {
        match self.participants.get_mut(&id) {
            Some(p) if p.connected => {
                p.connected = false;
                true
            }
            _ => false,
        }
    }

    pub fn kick(&mut self, id: Uuid) -> LiveResult<()> {
        let p = self.participants.get_mut(&id).ok_or_else(|| LiveError::not_found("Participant"))?;
        p.status = ParticipantStatus::Kicked;
        p.connected = false;
        Ok(())
    }

    /// Lift a kick. The participant must reconnect to take part again.
    pub fn admit(&mut self, id: Uuid, live: bool) -> LiveResult<()> {
        let p = self.participants.get_mut(&id).ok_or_else(|| LiveError::not_found("Participant"))?;
        if p.status != ParticipantStatus::Kicked {
            return Err(LiveError::validation("Participant is not removed"));
        }
        p.status = if live { ParticipantStatus::Active } else { ParticipantStatus::Waiting };
        Ok(())
    }

    /// Move every waiting participant to active; returns who moved.
    pub fn promote_waiting(&mut self) -> Vec<Uuid> {
        let mut moved: Vec<Uuid> = self
            .participants
            .values_mut()
            .filter(|p| p.status == ParticipantStatus::Waiting)
            .map(|p| {
                p.status = ParticipantStatus::Active;
                p.id
            })
            .collect();
        moved.sort();
        moved
    }

    pub fn used(&self, id: Uuid, slide_id: Uuid) -> u32 {
        self.participants.get(&id).map_or(0, |p| p.used(slide_id))
    }

    pub fn record(&mut self, id: Uuid, slide_id: Uuid, answer: RecordedAnswer, cost: u32) -> LiveResult<&SlideRecord> {
        let p = self.participants.get_mut(&id).ok_or_else(|| LiveError::not_found("Participant"))?;
        let record = p.records.entry(slide_id).or_default();
        record.used += cost;
        record.answers.push(answer);
        Ok(&*record)
    }

    /// Forget every answer on a slide, restoring everyone's quota.
    pub fn reset_slide(&mut self, slide_id: Uuid) {
        for p in self.participants.values_mut() {
            p.records.remove(&slide_id);
        }
    }

    /// All accepted answers on a slide, ready to replay into an aggregator.
    pub fn answers(&self, slide_id: Uuid) -> Vec<(Submission, NormalizedAnswer)> {
        let mut out = Vec::new();
        for p in self.participants.values() {
            let Some(record) = p.records.get(&slide_id) else {
                continue;
            };
            for r in &record.answers {
                out.push((
                    Submission {
                        participant_id: p.id,
                        display_name: p.display_name.clone(),
                        at_ms: r.at_ms,
                    },
                    r.normalized.clone(),
                ));
            }
        }
        out
    }

    /// Ordered by join time.
    pub fn roster(&self) -> Vec<RosterEntry> {
        let mut list: Vec<&Participant> = self.participants.values().collect();
        list.sort_by(|a, b| a.joined_at_ms.cmp(&b.joined_at_ms).then(a.id.cmp(&b.id)));
        list.into_iter()
            .map(|p| RosterEntry {
                participant_id: p.id,
                display_name: p.display_name.clone(),
                status: p.status,
                connected: p.connected,
            })
            .collect()
    }

    /// Participants counted against the capacity limit.
    pub fn admitted_count(&self) -> usize {
        self.participants
            .values()
            .filter(|p| p.status != ParticipantStatus::Kicked)
            .count()
    }

    pub fn connected_count(&self) -> usize {
        self.participants.values().filter(|p| p.connected).count()
    }

    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }
}
