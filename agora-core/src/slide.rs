//! Presentation and slide definitions.
//!
//! Slides are loaded from an external catalog and are immutable once the
//! presentation starts; a changed slide must carry a new identifier.
//!
//! JSON shape (one slide):
//! ```text
//! { "id": "…", "question": "Pick one", "type": "multiple_choice",
//!   "options": ["A", "B"], "allowMultiple": false }
//! ```

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{LiveError, LiveResult};

/// Side length of the percent canvas used by pins and correct areas.
pub const CANVAS_EXTENT: f64 = 100.0;

/// Points every hundred-points participant may distribute.
pub const POINT_BUDGET: u32 = 100;

/// 2D position. Pins use percent coordinates, grids use the slide's axis range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned rectangle in percent coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Area {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl Area {
    /// Inclusive containment test, edges count as inside.
    pub fn contains(&self, p: Point) -> bool {
        p.x >= self.x && p.x <= self.x + self.width && p.y >= self.y && p.y <= self.y + self.height
    }
}

/// Value range shared by both axes of a 2×2 grid.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AxisRange {
    pub min: f64,
    pub max: f64,
}

impl Default for AxisRange {
    fn default() -> Self {
        Self { min: 0.0, max: 10.0 }
    }
}

impl AxisRange {
    pub fn contains(&self, v: f64) -> bool {
        v.is_finite() && v >= self.min && v <= self.max
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EmbedProvider {
    Miro,
    Powerpoint,
    GoogleSlides,
    Pdf,
    Video,
    Image,
    Instruction,
}

fn one() -> u32 {
    1
}

fn default_max_length() -> usize {
    280
}

fn default_guess_min() -> i64 {
    1
}

fn default_guess_max() -> i64 {
    10
}

fn default_guess_answer() -> i64 {
    5
}

fn default_time_limit() -> u64 {
    30
}

fn default_max_points() -> u32 {
    1000
}

/// Type tag plus type-specific settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum SlideKind {
    MultipleChoice {
        options: Vec<String>,
        #[serde(default)]
        allow_multiple: bool,
    },
    Scales {
        #[serde(default)]
        statements: Vec<String>,
        min_value: i64,
        max_value: i64,
    },
    WordCloud {
        #[serde(default = "one")]
        max_words_per_participant: u32,
    },
    OpenEnded {
        #[serde(default)]
        allow_voting: bool,
        #[serde(default = "default_max_length")]
        max_length: usize,
    },
    Ranking {
        items: Vec<String>,
    },
    HundredPoints {
        items: Vec<String>,
        #[serde(default)]
        allow_empty: bool,
    },
    #[serde(rename = "2x2_grid")]
    Grid {
        items: Vec<String>,
        #[serde(default)]
        axis: AxisRange,
    },
    PinOnImage {
        image_url: String,
        #[serde(default)]
        correct_area: Option<Area>,
    },
    GuessNumber {
        #[serde(default = "default_guess_min")]
        min_value: i64,
        #[serde(default = "default_guess_max")]
        max_value: i64,
        #[serde(default = "default_guess_answer")]
        correct_answer: i64,
    },
    Qna {
        #[serde(default)]
        allow_multiple: bool,
    },
    Quiz {
        options: Vec<String>,
        correct_option: usize,
        #[serde(default = "default_time_limit")]
        time_limit_secs: u64,
        #[serde(default = "default_max_points")]
        max_points: u32,
    },
    Leaderboard {
        #[serde(default)]
        linked_quiz: Option<Uuid>,
    },
    Embed {
        provider: EmbedProvider,
        #[serde(default)]
        url: Option<String>,
    },
}

impl SlideKind {
    /// Wire name of the slide type.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::MultipleChoice { .. } => "multiple_choice",
            Self::Scales { .. } => "scales",
            Self::WordCloud { .. } => "word_cloud",
            Self::OpenEnded { .. } => "open_ended",
            Self::Ranking { .. } => "ranking",
            Self::HundredPoints { .. } => "hundred_points",
            Self::Grid { .. } => "2x2_grid",
            Self::PinOnImage { .. } => "pin_on_image",
            Self::GuessNumber { .. } => "guess_number",
            Self::Qna { .. } => "qna",
            Self::Quiz { .. } => "quiz",
            Self::Leaderboard { .. } => "leaderboard",
            Self::Embed { .. } => "embed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Slide {
    pub id: Uuid,
    #[serde(default)]
    pub question: String,
    #[serde(flatten)]
    pub kind: SlideKind,
}

impl Slide {
    pub fn new(question: impl Into<String>, kind: SlideKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            question: question.into(),
            kind,
        }
    }

    /// Check type-specific settings for internal consistency.
    pub fn validate(&self) -> LiveResult<()> {
        let bad = |msg: &str| Err(LiveError::validation(format!("Slide {}: {msg}", self.id)));
        match &self.kind {
            SlideKind::MultipleChoice { options, .. } => {
                if options.iter().all(|o| o.trim().is_empty()) {
                    return bad("multiple choice needs at least one option");
                }
            }
            SlideKind::Scales { min_value, max_value, .. } => {
                if min_value >= max_value {
                    return bad("scale minimum must be below maximum");
                }
            }
            SlideKind::WordCloud { max_words_per_participant } => {
                if *max_words_per_participant == 0 {
                    return bad("word cloud must allow at least one word");
                }
            }
            SlideKind::OpenEnded { max_length, .. } => {
                if *max_length == 0 {
                    return bad("open ended max length must be positive");
                }
            }
            SlideKind::Ranking { items } | SlideKind::HundredPoints { items, .. } => {
                if items.is_empty() {
                    return bad("item list is empty");
                }
            }
            SlideKind::Grid { items, axis } => {
                if items.is_empty() {
                    return bad("grid item list is empty");
                }
                if !(axis.min < axis.max) {
                    return bad("grid axis minimum must be below maximum");
                }
            }
            SlideKind::PinOnImage { correct_area, .. } => {
                if let Some(area) = correct_area {
                    let inside = area.x >= 0.0
                        && area.y >= 0.0
                        && area.width >= 0.0
                        && area.height >= 0.0
                        && area.x + area.width <= CANVAS_EXTENT
                        && area.y + area.height <= CANVAS_EXTENT;
                    if !inside {
                        return bad("correct area lies outside the image");
                    }
                }
            }
            SlideKind::GuessNumber { min_value, max_value, correct_answer } => {
                if min_value >= max_value {
                    return bad("guess minimum must be below maximum");
                }
                if correct_answer < min_value || correct_answer > max_value {
                    return bad("correct answer outside the guess range");
                }
            }
            SlideKind::Quiz { options, correct_option, time_limit_secs, .. } => {
                if options.len() < 2 {
                    return bad("quiz needs at least two options");
                }
                if *correct_option >= options.len() {
                    return bad("quiz correct option out of range");
                }
                if *time_limit_secs == 0 {
                    return bad("quiz time limit must be positive");
                }
            }
            SlideKind::Qna { .. } | SlideKind::Leaderboard { .. } | SlideKind::Embed { .. } => {}
        }
        Ok(())
    }

    /// Copy safe to send to participants: server-side answers are removed.
    pub fn public_view(&self) -> PublicSlide {
        let mut kind = self.kind.clone();
        let mut hidden = false;
        match &mut kind {
            SlideKind::Quiz { correct_option, .. } => {
                *correct_option = 0;
                hidden = true;
            }
            SlideKind::GuessNumber { correct_answer, .. } => {
                *correct_answer = 0;
                hidden = true;
            }
            SlideKind::PinOnImage { correct_area, .. } => {
                hidden = correct_area.take().is_some();
            }
            _ => {}
        }
        PublicSlide {
            id: self.id,
            question: self.question.clone(),
            kind,
            answer_hidden: hidden,
        }
    }
}

/// Participant-facing slide. `answer_hidden` tells the client that any
/// correctness fields are placeholders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublicSlide {
    pub id: Uuid,
    pub question: String,
    #[serde(flatten)]
    pub kind: SlideKind,
    #[serde(default)]
    pub answer_hidden: bool,
}

/// Presentation definition as provided by the catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Presentation {
    pub id: Uuid,
    pub title: String,
    pub access_code: String,
    /// Secret the presenter proves on `start-presentation`.
    pub presenter_token: String,
    pub slides: Vec<Slide>,
}

impl Presentation {
    pub fn validate(&self) -> LiveResult<()> {
        if self.access_code.trim().is_empty() {
            return Err(LiveError::validation("Presentation access code is empty"));
        }
        let mut seen = std::collections::HashSet::new();
        for slide in &self.slides {
            if !seen.insert(slide.id) {
                return Err(LiveError::validation(format!("Duplicate slide id {}", slide.id)));
            }
            slide.validate()?;
        }
        Ok(())
    }

    pub fn slide(&self, id: Uuid) -> Option<&Slide> {
        self.slides.iter().find(|s| s.id == id)
    }

    /// Metadata shared with participants.
    pub fn info(&self, current_slide_index: usize, is_live: bool) -> PresentationInfo {
        PresentationInfo {
            id: self.id,
            title: self.title.clone(),
            access_code: self.access_code.clone(),
            is_live,
            current_slide_index,
            slide_count: self.slides.len(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresentationInfo {
    pub id: Uuid,
    pub title: String,
    pub access_code: String,
    pub is_live: bool,
    pub current_slide_index: usize,
    pub slide_count: usize,
}
