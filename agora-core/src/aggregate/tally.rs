//! Counting reducers for the fixed-shape slide types.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{shape_mismatch, AggregateSnapshot, Reducer, RunningMean, Submission, Verdict};
use crate::answer::NormalizedAnswer;
use crate::error::LiveResult;
use crate::slide::{Area, Point};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptionTally {
    pub option: String,
    pub count: u64,
}

#[derive(Debug, Clone)]
pub struct ChoiceTally {
    options: Vec<String>,
    counts: Vec<u64>,
    responses: u64,
}

impl ChoiceTally {
    pub fn new(options: Vec<String>) -> Self {
        let counts = vec![0; options.len()];
        Self { options, counts, responses: 0 }
    }
}

impl Reducer for ChoiceTally {
    fn fold(&mut self, _sub: &Submission, answer: &NormalizedAnswer) -> LiveResult<Option<Verdict>> {
        let NormalizedAnswer::Choice(picked) = answer else {
            return Err(shape_mismatch("choice", answer));
        };
        for &idx in picked {
            let slot = self.counts.get_mut(idx).ok_or_else(|| shape_mismatch("choice", answer))?;
            *slot += 1;
        }
        self.responses += 1;
        Ok(None)
    }

    fn snapshot(&self) -> AggregateSnapshot {
        let mut votes: Vec<OptionTally> = self
            .options
            .iter()
            .zip(&self.counts)
            .map(|(option, &count)| OptionTally { option: option.clone(), count })
            .collect();
        // sort_by is stable: equal counts keep option order
        votes.sort_by(|a, b| b.count.cmp(&a.count));
        AggregateSnapshot::MultipleChoice {
            votes,
            total_responses: self.responses,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatementStats {
    pub statement: String,
    pub average: Option<f64>,
    pub count: u64,
    pub distribution: BTreeMap<i64, u64>,
}

#[derive(Debug, Clone)]
pub struct ScaleTally {
    statements: Vec<String>,
    means: Vec<RunningMean>,
    distributions: Vec<BTreeMap<i64, u64>>,
    overall: RunningMean,
    responses: u64,
}

impl ScaleTally {
    pub fn new(statements: Vec<String>) -> Self {
        // A scale without statements is a single unnamed statement.
        let statements = if statements.is_empty() { vec![String::new()] } else { statements };
        let n = statements.len();
        Self {
            statements,
            means: vec![RunningMean::default(); n],
            distributions: vec![BTreeMap::new(); n],
            overall: RunningMean::default(),
            responses: 0,
        }
    }
}

impl Reducer for ScaleTally {
    fn fold(&mut self, _sub: &Submission, answer: &NormalizedAnswer) -> LiveResult<Option<Verdict>> {
        let NormalizedAnswer::Scale(values) = answer else {
            return Err(shape_mismatch("scale", answer));
        };
        if values.len() != self.statements.len() {
            return Err(shape_mismatch("scale", answer));
        }
        for (i, &v) in values.iter().enumerate() {
            self.means[i].push(v as f64);
            *self.distributions[i].entry(v).or_default() += 1;
            self.overall.push(v as f64);
        }
        self.responses += 1;
        Ok(None)
    }

    fn snapshot(&self) -> AggregateSnapshot {
        let statements = self
            .statements
            .iter()
            .zip(self.means.iter().zip(&self.distributions))
            .map(|(statement, (mean, dist))| StatementStats {
                statement: statement.clone(),
                average: mean.mean(),
                count: mean.count(),
                distribution: dist.clone(),
            })
            .collect();
        AggregateSnapshot::Scales {
            statements,
            overall_average: self.overall.mean(),
            total_responses: self.responses,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct WordTally {
    frequencies: BTreeMap<String, u64>,
    total_words: u64,
    participants: HashSet<Uuid>,
}

impl Reducer for WordTally {
    fn fold(&mut self, sub: &Submission, answer: &NormalizedAnswer) -> LiveResult<Option<Verdict>> {
        let NormalizedAnswer::Words(words) = answer else {
            return Err(shape_mismatch("word cloud", answer));
        };
        for word in words {
            *self.frequencies.entry(word.clone()).or_default() += 1;
            self.total_words += 1;
        }
        self.participants.insert(sub.participant_id);
        Ok(None)
    }

    fn snapshot(&self) -> AggregateSnapshot {
        AggregateSnapshot::WordCloud {
            frequencies: self.frequencies.clone(),
            total_words: self.total_words,
            total_responses: self.participants.len() as u64,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RankStat {
    pub item: String,
    /// 1 = ranked first.
    pub average_rank: Option<f64>,
    pub count: u64,
}

#[derive(Debug, Clone)]
pub struct RankTally {
    items: Vec<String>,
    ranks: Vec<RunningMean>,
    responses: u64,
}

impl RankTally {
    pub fn new(items: Vec<String>) -> Self {
        let ranks = vec![RunningMean::default(); items.len()];
        Self { items, ranks, responses: 0 }
    }
}

impl Reducer for RankTally {
    fn fold(&mut self, _sub: &Submission, answer: &NormalizedAnswer) -> LiveResult<Option<Verdict>> {
        let NormalizedAnswer::Ranking(order) = answer else {
            return Err(shape_mismatch("ranking", answer));
        };
        for (position, &item) in order.iter().enumerate() {
            let mean = self.ranks.get_mut(item).ok_or_else(|| shape_mismatch("ranking", answer))?;
            mean.push((position + 1) as f64);
        }
        self.responses += 1;
        Ok(None)
    }

    fn snapshot(&self) -> AggregateSnapshot {
        let mut items: Vec<RankStat> = self
            .items
            .iter()
            .zip(&self.ranks)
            .map(|(item, mean)| RankStat {
                item: item.clone(),
                average_rank: mean.mean(),
                count: mean.count(),
            })
            .collect();
        // unranked items sink to the bottom, ties keep item order
        items.sort_by(|a, b| {
            let key = |s: &RankStat| s.average_rank.unwrap_or(f64::INFINITY);
            key(a).total_cmp(&key(b))
        });
        AggregateSnapshot::Ranking {
            items,
            total_responses: self.responses,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PointStat {
    pub item: String,
    pub average: Option<f64>,
    pub total: u64,
}

#[derive(Debug, Clone)]
pub struct PointTally {
    items: Vec<String>,
    means: Vec<RunningMean>,
    totals: Vec<u64>,
    responses: u64,
}

impl PointTally {
    pub fn new(items: Vec<String>) -> Self {
        let n = items.len();
        Self {
            items,
            means: vec![RunningMean::default(); n],
            totals: vec![0; n],
            responses: 0,
        }
    }
}

impl Reducer for PointTally {
    fn fold(&mut self, _sub: &Submission, answer: &NormalizedAnswer) -> LiveResult<Option<Verdict>> {
        let NormalizedAnswer::Points(points) = answer else {
            return Err(shape_mismatch("hundred points", answer));
        };
        if points.len() != self.items.len() {
            return Err(shape_mismatch("hundred points", answer));
        }
        // Unallocated items count as 0 so averages share one denominator.
        for (i, &p) in points.iter().enumerate() {
            self.means[i].push(f64::from(p));
            self.totals[i] += u64::from(p);
        }
        self.responses += 1;
        Ok(None)
    }

    fn snapshot(&self) -> AggregateSnapshot {
        let items = self
            .items
            .iter()
            .zip(self.means.iter().zip(&self.totals))
            .map(|(item, (mean, &total))| PointStat {
                item: item.clone(),
                average: mean.mean(),
                total,
            })
            .collect();
        AggregateSnapshot::HundredPoints {
            items,
            total_responses: self.responses,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GridStat {
    pub item: String,
    pub average_x: Option<f64>,
    pub average_y: Option<f64>,
    pub count: u64,
}

#[derive(Debug, Clone)]
pub struct GridTally {
    items: Vec<String>,
    xs: Vec<RunningMean>,
    ys: Vec<RunningMean>,
    responses: u64,
}

impl GridTally {
    pub fn new(items: Vec<String>) -> Self {
        let n = items.len();
        Self {
            items,
            xs: vec![RunningMean::default(); n],
            ys: vec![RunningMean::default(); n],
            responses: 0,
        }
    }
}

impl Reducer for GridTally {
    fn fold(&mut self, _sub: &Submission, answer: &NormalizedAnswer) -> LiveResult<Option<Verdict>> {
        let NormalizedAnswer::Grid(positions) = answer else {
            return Err(shape_mismatch("grid", answer));
        };
        if positions.len() != self.items.len() {
            return Err(shape_mismatch("grid", answer));
        }
        for (i, p) in positions.iter().enumerate() {
            if let Some(p) = p {
                self.xs[i].push(p.x);
                self.ys[i].push(p.y);
            }
        }
        self.responses += 1;
        Ok(None)
    }

    fn snapshot(&self) -> AggregateSnapshot {
        let items = self
            .items
            .iter()
            .enumerate()
            .map(|(i, item)| GridStat {
                item: item.clone(),
                average_x: self.xs[i].mean(),
                average_y: self.ys[i].mean(),
                count: self.xs[i].count(),
            })
            .collect();
        AggregateSnapshot::Grid {
            items,
            total_responses: self.responses,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PinMark {
    pub participant_id: Uuid,
    pub x: f64,
    pub y: f64,
    /// `None` when the slide has no correct area.
    pub is_correct: Option<bool>,
}

#[derive(Debug, Clone)]
pub struct PinTally {
    correct_area: Option<Area>,
    pins: Vec<(u64, PinMark)>,
    cx: RunningMean,
    cy: RunningMean,
    correct: u64,
    incorrect: u64,
}

impl PinTally {
    pub fn new(correct_area: Option<Area>) -> Self {
        Self {
            correct_area,
            pins: Vec::new(),
            cx: RunningMean::default(),
            cy: RunningMean::default(),
            correct: 0,
            incorrect: 0,
        }
    }
}

impl Reducer for PinTally {
    fn fold(&mut self, sub: &Submission, answer: &NormalizedAnswer) -> LiveResult<Option<Verdict>> {
        let NormalizedAnswer::Pin(p) = answer else {
            return Err(shape_mismatch("pin", answer));
        };
        let is_correct = self.correct_area.map(|area| area.contains(*p));
        match is_correct {
            Some(true) => self.correct += 1,
            Some(false) => self.incorrect += 1,
            None => {}
        }
        self.cx.push(p.x);
        self.cy.push(p.y);
        self.pins.push((
            sub.at_ms,
            PinMark {
                participant_id: sub.participant_id,
                x: p.x,
                y: p.y,
                is_correct,
            },
        ));
        Ok(is_correct.map(|is_correct| Verdict { is_correct, points: None }))
    }

    fn snapshot(&self) -> AggregateSnapshot {
        let mut pins = self.pins.clone();
        pins.sort_by(|(ta, a), (tb, b)| ta.cmp(tb).then(a.participant_id.cmp(&b.participant_id)));
        let centroid = match (self.cx.mean(), self.cy.mean()) {
            (Some(x), Some(y)) => Some(Point::new(x, y)),
            _ => None,
        };
        AggregateSnapshot::PinOnImage {
            pins: pins.into_iter().map(|(_, mark)| mark).collect(),
            centroid,
            correct_count: self.correct,
            incorrect_count: self.incorrect,
            total_responses: self.cx.count(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct GuessTally {
    correct_answer: i64,
    distribution: BTreeMap<i64, u64>,
    correct: u64,
    responses: u64,
}

impl GuessTally {
    pub fn new(correct_answer: i64) -> Self {
        Self {
            correct_answer,
            distribution: BTreeMap::new(),
            correct: 0,
            responses: 0,
        }
    }
}

impl Reducer for GuessTally {
    fn fold(&mut self, _sub: &Submission, answer: &NormalizedAnswer) -> LiveResult<Option<Verdict>> {
        let NormalizedAnswer::Guess(n) = answer else {
            return Err(shape_mismatch("guess", answer));
        };
        let is_correct = *n == self.correct_answer;
        *self.distribution.entry(*n).or_default() += 1;
        if is_correct {
            self.correct += 1;
        }
        self.responses += 1;
        Ok(Some(Verdict { is_correct, points: None }))
    }

    fn snapshot(&self) -> AggregateSnapshot {
        AggregateSnapshot::GuessNumber {
            distribution: self.distribution.clone(),
            correct_count: self.correct,
            total_responses: self.responses,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sub(n: u128) -> Submission {
        Submission {
            participant_id: Uuid::from_u128(n),
            display_name: format!("P{n}"),
            at_ms: n as u64,
        }
    }

    #[test]
    fn test_choice_votes_sorted_by_count() {
        let mut t = ChoiceTally::new(vec!["A".into(), "B".into(), "C".into()]);
        t.fold(&sub(1), &NormalizedAnswer::Choice(vec![2])).unwrap();
        t.fold(&sub(2), &NormalizedAnswer::Choice(vec![0, 2])).unwrap();
        let AggregateSnapshot::MultipleChoice { votes, total_responses } = t.snapshot() else {
            panic!("wrong snapshot");
        };
        assert_eq!(total_responses, 2);
        let order: Vec<_> = votes.iter().map(|v| (v.option.as_str(), v.count)).collect();
        assert_eq!(order, vec![("C", 2), ("A", 1), ("B", 0)]);
    }

    #[test]
    fn test_scale_means_and_distribution() {
        let mut t = ScaleTally::new(vec!["speed".into(), "price".into()]);
        t.fold(&sub(1), &NormalizedAnswer::Scale(vec![2, 5])).unwrap();
        t.fold(&sub(2), &NormalizedAnswer::Scale(vec![4, 5])).unwrap();
        let AggregateSnapshot::Scales { statements, overall_average, total_responses } = t.snapshot() else {
            panic!("wrong snapshot");
        };
        assert_eq!(total_responses, 2);
        assert_eq!(statements[0].average, Some(3.0));
        assert_eq!(statements[1].distribution.get(&5), Some(&2));
        assert_eq!(overall_average, Some(4.0));
    }

    #[test]
    fn test_scale_without_statements_has_one_row() {
        let mut t = ScaleTally::new(vec![]);
        t.fold(&sub(1), &NormalizedAnswer::Scale(vec![7])).unwrap();
        assert!(t.fold(&sub(2), &NormalizedAnswer::Scale(vec![1, 2])).is_err());
    }

    #[test]
    fn test_word_frequencies_count_participants_once() {
        let mut t = WordTally::default();
        t.fold(&sub(1), &NormalizedAnswer::Words(vec!["rust".into()])).unwrap();
        t.fold(&sub(1), &NormalizedAnswer::Words(vec!["rust".into(), "go".into()])).unwrap();
        let AggregateSnapshot::WordCloud { frequencies, total_words, total_responses } = t.snapshot() else {
            panic!("wrong snapshot");
        };
        assert_eq!(frequencies.get("rust"), Some(&2));
        assert_eq!(total_words, 3);
        assert_eq!(total_responses, 1);
    }

    #[test]
    fn test_points_average_includes_zero_allocations() {
        let mut t = PointTally::new(vec!["X".into(), "Y".into()]);
        t.fold(&sub(1), &NormalizedAnswer::Points(vec![100, 0])).unwrap();
        t.fold(&sub(2), &NormalizedAnswer::Points(vec![50, 50])).unwrap();
        let AggregateSnapshot::HundredPoints { items, .. } = t.snapshot() else {
            panic!("wrong snapshot");
        };
        assert_eq!(items[0].average, Some(75.0));
        assert_eq!(items[1].average, Some(25.0));
        assert_eq!(items[1].total, 50);
    }

    #[test]
    fn test_grid_skips_unplaced_items() {
        let mut t = GridTally::new(vec!["X".into(), "Y".into()]);
        t.fold(&sub(1), &NormalizedAnswer::Grid(vec![Some(Point::new(2.0, 4.0)), None])).unwrap();
        t.fold(&sub(2), &NormalizedAnswer::Grid(vec![Some(Point::new(4.0, 8.0)), None])).unwrap();
        let AggregateSnapshot::Grid { items, total_responses } = t.snapshot() else {
            panic!("wrong snapshot");
        };
        assert_eq!(total_responses, 2);
        assert_eq!((items[0].average_x, items[0].average_y), (Some(3.0), Some(6.0)));
        assert_eq!(items[1].average_x, None);
        assert_eq!(items[1].count, 0);
    }

    #[test]
    fn test_pin_correctness_and_centroid() {
        let area = Area { x: 0.0, y: 0.0, width: 50.0, height: 50.0 };
        let mut t = PinTally::new(Some(area));
        let v = t.fold(&sub(1), &NormalizedAnswer::Pin(Point::new(10.0, 10.0))).unwrap();
        assert_eq!(v, Some(Verdict { is_correct: true, points: None }));
        let v = t.fold(&sub(2), &NormalizedAnswer::Pin(Point::new(90.0, 30.0))).unwrap();
        assert_eq!(v.map(|v| v.is_correct), Some(false));
        let AggregateSnapshot::PinOnImage { centroid, correct_count, incorrect_count, pins, .. } = t.snapshot() else {
            panic!("wrong snapshot");
        };
        assert_eq!(centroid, Some(Point::new(50.0, 20.0)));
        assert_eq!((correct_count, incorrect_count), (1, 1));
        assert_eq!(pins.len(), 2);

        let mut open = PinTally::new(None);
        assert_eq!(open.fold(&sub(1), &NormalizedAnswer::Pin(Point::new(1.0, 1.0))).unwrap(), None);
    }

    #[test]
    fn test_guess_exact_match_only() {
        let mut t = GuessTally::new(42);
        let hit = t.fold(&sub(1), &NormalizedAnswer::Guess(42)).unwrap();
        let miss = t.fold(&sub(2), &NormalizedAnswer::Guess(41)).unwrap();
        assert_eq!(hit.map(|v| v.is_correct), Some(true));
        assert_eq!(miss.map(|v| v.is_correct), Some(false));
        let AggregateSnapshot::GuessNumber { distribution, correct_count, total_responses } = t.snapshot() else {
            panic!("wrong snapshot");
        };
        assert_eq!(correct_count, 1);
        assert_eq!(total_responses, 2);
        assert_eq!(distribution.get(&41), Some(&1));
    }

    #[test]
    fn test_reducer_rejects_wrong_shape() {
        let mut t = GuessTally::new(1);
        assert!(t.fold(&sub(1), &NormalizedAnswer::Text("x".into())).is_err());
    }
}
